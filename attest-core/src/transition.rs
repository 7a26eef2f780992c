//! State-transition logs.
//!
//! Stateful entities never store their state. Each one owns an append-only
//! log of transitions and its current state is the `to_state` of the
//! latest transition, ordered by `(created_at, id)`.

use crate::enums::{ControlState, EntityType, EvidenceState, TaskState};
use crate::error::{CoreError, CoreResult};
use crate::gid::Gid;
use crate::page::{CursorValue, OrderField, Paginated};
use crate::scope::Scope;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::str::FromStr;

/// Where the transitions of one entity type live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionLog {
    pub table: &'static str,
    /// Column referencing the owning entity
    pub entity_column: &'static str,
    pub entity_type: EntityType,
    pub transition_type: EntityType,
}

impl TransitionLog {
    pub const CONTROL: TransitionLog = TransitionLog {
        table: "control_state_transitions",
        entity_column: "control_id",
        entity_type: EntityType::Control,
        transition_type: EntityType::ControlStateTransition,
    };

    pub const TASK: TransitionLog = TransitionLog {
        table: "task_state_transitions",
        entity_column: "task_id",
        entity_type: EntityType::Task,
        transition_type: EntityType::TaskStateTransition,
    };

    pub const EVIDENCE: TransitionLog = TransitionLog {
        table: "evidence_state_transitions",
        entity_column: "evidence_id",
        entity_type: EntityType::Evidence,
        transition_type: EntityType::EvidenceStateTransition,
    };

    /// Check that `entity_id` belongs to this log.
    pub fn ensure_entity(&self, entity_id: &Gid) -> CoreResult<()> {
        entity_id.ensure_type(self.entity_type)?;
        Ok(())
    }
}

/// A state enum backed by a transition log.
pub trait EntityState:
    Copy
    + Eq
    + Hash
    + Debug
    + Display
    + FromStr<Err = CoreError>
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const INITIAL: Self;
    const LOG: TransitionLog;

    fn as_str(&self) -> &'static str;
}

impl EntityState for ControlState {
    const INITIAL: Self = ControlState::NotStarted;
    const LOG: TransitionLog = TransitionLog::CONTROL;

    fn as_str(&self) -> &'static str {
        ControlState::as_str(self)
    }
}

impl EntityState for TaskState {
    const INITIAL: Self = TaskState::Todo;
    const LOG: TransitionLog = TransitionLog::TASK;

    fn as_str(&self) -> &'static str {
        TaskState::as_str(self)
    }
}

impl EntityState for EvidenceState {
    const INITIAL: Self = EvidenceState::Valid;
    const LOG: TransitionLog = TransitionLog::EVIDENCE;

    fn as_str(&self) -> &'static str {
        EvidenceState::as_str(self)
    }
}

/// A transition about to be appended. The store fills in `from_state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransition {
    pub id: Gid,
    pub to_state: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewTransition {
    pub fn new<S: EntityState>(scope: &Scope, to_state: S, reason: Option<String>) -> Self {
        Self {
            id: scope.mint(S::LOG.transition_type),
            to_state: to_state.as_str().to_string(),
            reason,
            created_at: crate::record::timestamp_now(),
        }
    }

    /// The transition every stateful entity is created with.
    pub fn initial<S: EntityState>(scope: &Scope) -> Self {
        Self::new(scope, S::INITIAL, None)
    }

    /// A copy stamped strictly after `previous`, so that a transition always
    /// sorts after the one it was chained from.
    pub fn stamped_after(&self, previous: Option<DateTime<Utc>>) -> Self {
        let mut next = self.clone();
        if let Some(previous) = previous {
            next.created_at = next.created_at.max(previous + chrono::Duration::microseconds(1));
        }
        next
    }
}

/// A stored transition with its states still in text form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRow {
    pub id: Gid,
    pub entity_id: Gid,
    pub from_state: Option<String>,
    pub to_state: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransitionRow {
    pub fn from_new(entity_id: Gid, from_state: Option<&str>, transition: &NewTransition) -> Self {
        Self {
            id: transition.id,
            entity_id,
            from_state: from_state.map(str::to_string),
            to_state: transition.to_state.clone(),
            reason: transition.reason.clone(),
            created_at: transition.created_at,
            updated_at: transition.created_at,
        }
    }

    pub fn typed<S: EntityState>(&self) -> CoreResult<StateTransition<S>> {
        let parse = |raw: &str| {
            raw.parse::<S>().map_err(|_| {
                CoreError::internal(format!("stored state {:?} is not a valid {}", raw, S::LOG.entity_type))
            })
        };
        Ok(StateTransition {
            id: self.id,
            entity_id: self.entity_id,
            from_state: self.from_state.as_deref().map(&parse).transpose()?,
            to_state: parse(&self.to_state)?,
            reason: self.reason.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    fn recency_key(&self) -> (DateTime<Utc>, Gid) {
        (self.created_at, self.id)
    }
}

impl Paginated for TransitionRow {
    fn cursor_id(&self) -> Gid {
        self.id
    }

    fn cursor_value(&self, field: OrderField) -> Option<CursorValue> {
        match field {
            OrderField::CreatedAt => Some(CursorValue::Timestamp(self.created_at)),
            OrderField::UpdatedAt => Some(CursorValue::Timestamp(self.updated_at)),
            _ => None,
        }
    }
}

/// A decoded transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition<S> {
    pub id: Gid,
    pub entity_id: Gid,
    pub from_state: Option<S>,
    pub to_state: S,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The transition that defines the current state: latest `created_at`,
/// ties broken by the highest id.
pub fn latest<'a>(rows: impl IntoIterator<Item = &'a TransitionRow>) -> Option<&'a TransitionRow> {
    rows.into_iter().max_by_key(|row| row.recency_key())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gid::TenantId;
    use chrono::Duration;
    use proptest::prelude::*;

    fn row(scope: &Scope, entity_id: Gid, to: TaskState, at: DateTime<Utc>) -> TransitionRow {
        let mut t = NewTransition::new(scope, to, None);
        t.created_at = at;
        TransitionRow::from_new(entity_id, None, &t)
    }

    #[test]
    fn test_initial_transition() {
        let scope = Scope::new(TenantId::generate());
        let t = NewTransition::initial::<ControlState>(&scope);
        assert_eq!(t.to_state, "NOT_STARTED");
        assert_eq!(t.id.entity_type(), EntityType::ControlStateTransition);
        assert!(t.reason.is_none());
    }

    #[test]
    fn test_latest_breaks_ties_by_id() {
        let scope = Scope::new(TenantId::generate());
        let task = scope.mint(EntityType::Task);
        let at = timestamp_for_test();
        let first = row(&scope, task, TaskState::Todo, at);
        let second = row(&scope, task, TaskState::Done, at);
        assert!(second.id > first.id);

        let rows = [second.clone(), first];
        assert_eq!(latest(&rows).map(|r| r.id), Some(second.id));
        assert_eq!(latest(std::iter::empty()), None);
    }

    #[test]
    fn test_stamped_after_never_sorts_before_previous() {
        let scope = Scope::new(TenantId::generate());
        let t = NewTransition::new(&scope, TaskState::Done, None);

        let later = t.created_at + Duration::seconds(5);
        let bumped = t.stamped_after(Some(later));
        assert_eq!(bumped.created_at, later + Duration::microseconds(1));
        assert_eq!(bumped.id, t.id);

        let earlier = t.created_at - Duration::seconds(5);
        assert_eq!(t.stamped_after(Some(earlier)).created_at, t.created_at);
        assert_eq!(t.stamped_after(None), t);
    }

    #[test]
    fn test_typed_rejects_unknown_state() {
        let scope = Scope::new(TenantId::generate());
        let mut r = row(&scope, scope.mint(EntityType::Task), TaskState::Done, timestamp_for_test());
        assert_eq!(r.typed::<TaskState>().map(|t| t.to_state).ok(), Some(TaskState::Done));
        r.to_state = "ARCHIVED".to_string();
        assert!(r.typed::<TaskState>().is_err());
    }

    #[test]
    fn test_log_descriptors_match_entities() {
        assert!(TransitionLog::EVIDENCE
            .ensure_entity(&Scope::new(TenantId::generate()).mint(EntityType::Evidence))
            .is_ok());
        assert!(TransitionLog::TASK
            .ensure_entity(&Scope::new(TenantId::generate()).mint(EntityType::Control))
            .is_err());
    }

    fn timestamp_for_test() -> DateTime<Utc> {
        crate::record::timestamp_now()
    }

    proptest! {
        #[test]
        fn prop_latest_is_max_recency(offsets in prop::collection::vec(0i64..5, 1..20)) {
            let scope = Scope::new(TenantId::generate());
            let task = scope.mint(EntityType::Task);
            let base = timestamp_for_test();
            let rows: Vec<TransitionRow> = offsets
                .iter()
                .enumerate()
                .map(|(i, off)| {
                    let state = if i % 2 == 0 { TaskState::Todo } else { TaskState::Done };
                    row(&scope, task, state, base + Duration::seconds(*off))
                })
                .collect();

            let max_at = rows.iter().map(|r| r.created_at).max();
            let winner = latest(&rows);
            prop_assert_eq!(winner.map(|r| r.created_at), max_at);
            let top_id = rows.iter().filter(|r| Some(r.created_at) == max_at).map(|r| r.id).max();
            prop_assert_eq!(winner.map(|r| r.id), top_id);
        }
    }
}
