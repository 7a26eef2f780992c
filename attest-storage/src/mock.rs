//! In-memory store for tests.
//!
//! Rows are kept as [`RowValues`] per table, so the same record mappings the
//! PostgreSQL store uses are exercised here. Every write operation runs on a
//! working copy of the tables that replaces the shared copy only when the
//! operation succeeds, which gives the all-or-nothing behaviour of a
//! database transaction. Foreign keys follow the PostgreSQL schema.

use crate::{
    ensure_initial, ensure_new_id, ensure_order, ensure_transition, ensure_transition_order, Store,
};
use ::async_trait::async_trait;
use attest_core::transition::latest;
use attest_core::{
    timestamp_now, Column, CoreError, CoreResult, Cursor, DeleteCounts, Deletable, EntityType,
    Framework, Gid, ImportBundle, Listable, NewTransition, Page, Record, RowValues, Scope,
    SqlParam, Task, TaskLink, TransitionLog, TransitionRow,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

// ============================================================================
// FOREIGN KEYS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnDelete {
    Restrict,
    SetNull,
    Cascade,
}

struct Reference {
    table: &'static str,
    column: &'static str,
    target: EntityType,
    on_delete: OnDelete,
}

const REFERENCES: &[Reference] = &[
    Reference {
        table: "frameworks",
        column: "organization_id",
        target: EntityType::Organization,
        on_delete: OnDelete::Restrict,
    },
    Reference {
        table: "controls",
        column: "framework_id",
        target: EntityType::Framework,
        on_delete: OnDelete::Restrict,
    },
    Reference {
        table: "tasks",
        column: "assigned_to",
        target: EntityType::People,
        on_delete: OnDelete::SetNull,
    },
    Reference {
        table: "evidences",
        column: "task_id",
        target: EntityType::Task,
        on_delete: OnDelete::Cascade,
    },
    Reference {
        table: "vendors",
        column: "organization_id",
        target: EntityType::Organization,
        on_delete: OnDelete::Restrict,
    },
    Reference {
        table: "peoples",
        column: "organization_id",
        target: EntityType::Organization,
        on_delete: OnDelete::Restrict,
    },
    Reference {
        table: "policies",
        column: "organization_id",
        target: EntityType::Organization,
        on_delete: OnDelete::Restrict,
    },
    Reference {
        table: "policies",
        column: "owner_id",
        target: EntityType::People,
        on_delete: OnDelete::Restrict,
    },
];

const LOGS: [(TransitionLog, OnDelete); 3] = [
    (TransitionLog::CONTROL, OnDelete::Restrict),
    (TransitionLog::TASK, OnDelete::Restrict),
    (TransitionLog::EVIDENCE, OnDelete::Cascade),
];

fn holds_id(value: &SqlParam, id: &Gid) -> bool {
    match value {
        SqlParam::Bytes(bytes) | SqlParam::OptBytes(Some(bytes)) => bytes == id.as_bytes(),
        _ => false,
    }
}

// ============================================================================
// FAULT INJECTION
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct FailPoint {
    entity_type: EntityType,
    remaining: usize,
}

#[derive(Debug, Default)]
struct Faults {
    armed: Mutex<Option<FailPoint>>,
}

impl Faults {
    fn check(&self, entity_type: EntityType) -> CoreResult<()> {
        let mut armed = self
            .armed
            .lock()
            .map_err(|_| CoreError::internal("fault injector lock poisoned"))?;
        let trip = match armed.as_mut() {
            Some(point) if point.entity_type == entity_type => {
                if point.remaining == 0 {
                    true
                } else {
                    point.remaining -= 1;
                    false
                }
            }
            _ => false,
        };
        if trip {
            *armed = None;
            return Err(CoreError::store_unavailable(
                "insert",
                format!("injected failure inserting {}", entity_type),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// TABLES
// ============================================================================

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<&'static str, BTreeMap<Gid, RowValues>>,
    transitions: HashMap<&'static str, BTreeMap<Gid, TransitionRow>>,
    links: Vec<TaskLink>,
}

impl Tables {
    fn row(&self, scope: &Scope, id: &Gid) -> Option<&RowValues> {
        if !scope.owns(id) {
            return None;
        }
        self.rows.get(id.entity_type().table())?.get(id)
    }

    fn require_row(&self, scope: &Scope, id: &Gid) -> CoreResult<&RowValues> {
        self.row(scope, id).ok_or_else(|| CoreError::not_found(*id))
    }

    fn check_references(&self, scope: &Scope, columns: &[Column], row: &RowValues) -> CoreResult<()> {
        for column in columns {
            let Some(target) = column.references else {
                continue;
            };
            let Some(id) = row.opt_gid(column.name)? else {
                continue;
            };
            if id.entity_type() != target || self.row(scope, &id).is_none() {
                return Err(CoreError::invalid_argument(
                    column.name,
                    format!("references a missing {}", target),
                ));
            }
        }
        Ok(())
    }

    fn insert_record<T: Record>(&mut self, scope: &Scope, record: &T, faults: &Faults) -> CoreResult<()> {
        let id = record.id();
        ensure_new_id(scope, &id, T::ENTITY_TYPE)?;
        faults.check(T::ENTITY_TYPE)?;
        let row = record.to_row();
        self.check_references(scope, T::COLUMNS, &row)?;
        let table = self.rows.entry(T::TABLE).or_default();
        if table.contains_key(&id) {
            return Err(CoreError::invalid_argument("id", format!("{} already exists", id)));
        }
        table.insert(id, row);
        Ok(())
    }

    fn latest_of(&self, log: &TransitionLog, entity_id: &Gid) -> Option<&TransitionRow> {
        let rows = self.transitions.get(log.table)?;
        latest(rows.values().filter(|r| r.entity_id == *entity_id))
    }

    fn state_of(&self, log: &TransitionLog, entity_id: &Gid) -> Option<&str> {
        self.latest_of(log, entity_id).map(|r| r.to_state.as_str())
    }

    /// `from_state` and the stamped transition for appending `transition`
    /// after the latest one.
    fn chain(
        &self,
        log: &TransitionLog,
        entity_id: &Gid,
        transition: &NewTransition,
    ) -> (Option<String>, NewTransition) {
        let (from, after) = self
            .latest_of(log, entity_id)
            .map(|r| (r.to_state.clone(), r.created_at))
            .unzip();
        (from, transition.stamped_after(after))
    }

    /// Decode a row, joining its current state. Stateful rows without any
    /// transition, or not in `state_filter`, yield `None`.
    fn materialize<T: Record>(&self, row: &RowValues, state_filter: Option<&str>) -> CoreResult<Option<T>> {
        let mut record = T::from_row(row)?;
        match T::STATE_LOG {
            Some(log) => {
                let Some(state) = self.state_of(&log, &record.id()) else {
                    return Ok(None);
                };
                if state_filter.is_some_and(|wanted| wanted != state) {
                    return Ok(None);
                }
                record.apply_state(state)?;
            }
            None if state_filter.is_some() => {
                return Err(CoreError::invalid_argument(
                    "state",
                    format!("{} has no state", T::ENTITY_TYPE),
                ));
            }
            None => {}
        }
        Ok(Some(record))
    }

    fn load<T: Record>(&self, scope: &Scope, id: Gid) -> CoreResult<T> {
        if id.entity_type() != T::ENTITY_TYPE {
            return Err(CoreError::not_found(id));
        }
        let row = self.require_row(scope, &id)?;
        self.materialize::<T>(row, None)?
            .ok_or_else(|| CoreError::not_found(id))
    }

    fn insert_transition(
        &mut self,
        scope: &Scope,
        log: &TransitionLog,
        entity_id: Gid,
        from_state: Option<&str>,
        transition: &NewTransition,
    ) -> CoreResult<TransitionRow> {
        ensure_transition(scope, log, &entity_id, transition)?;
        self.require_row(scope, &entity_id)?;
        let table = self.transitions.entry(log.table).or_default();
        if table.contains_key(&transition.id) {
            return Err(CoreError::invalid_argument(
                "id",
                format!("{} already exists", transition.id),
            ));
        }
        let row = TransitionRow::from_new(entity_id, from_state, transition);
        table.insert(transition.id, row.clone());
        Ok(row)
    }

    fn purge_transitions(&mut self, log: &TransitionLog, entity_id: &Gid) -> i64 {
        let Some(table) = self.transitions.get_mut(log.table) else {
            return 0;
        };
        let before = table.len();
        table.retain(|_, r| r.entity_id != *entity_id);
        (before - table.len()) as i64
    }

    /// Remove one row, applying the referential actions of the schema.
    fn remove_row(&mut self, id: &Gid) -> CoreResult<i64> {
        for reference in REFERENCES.iter().filter(|r| r.target == id.entity_type()) {
            let referencing: Vec<Gid> = self
                .rows
                .get(reference.table)
                .map(|table| {
                    table
                        .iter()
                        .filter(|(_, row)| row.get(reference.column).is_some_and(|v| holds_id(v, id)))
                        .map(|(key, _)| *key)
                        .collect()
                })
                .unwrap_or_default();
            if referencing.is_empty() {
                continue;
            }
            match reference.on_delete {
                OnDelete::Restrict => {
                    return Err(CoreError::invalid_argument(
                        reference.column,
                        format!("{} is still referenced from {}", id, reference.table),
                    ));
                }
                OnDelete::SetNull => {
                    if let Some(table) = self.rows.get_mut(reference.table) {
                        for key in &referencing {
                            if let Some(row) = table.get_mut(key) {
                                row.set(reference.column, SqlParam::OptBytes(None));
                            }
                        }
                    }
                }
                OnDelete::Cascade => {
                    for key in &referencing {
                        self.remove_row(key)?;
                    }
                }
            }
        }

        for (log, on_delete) in LOGS {
            if log.entity_type != id.entity_type() {
                continue;
            }
            let remaining = self
                .transitions
                .get(log.table)
                .map_or(0, |t| t.values().filter(|r| r.entity_id == *id).count());
            if remaining == 0 {
                continue;
            }
            if on_delete != OnDelete::Cascade {
                return Err(CoreError::invalid_argument(
                    log.entity_column,
                    format!("{} still has {} transitions", id, remaining),
                ));
            }
            self.purge_transitions(&log, id);
        }

        if self.links.iter().any(|l| l.task_id == *id || l.control_id == *id) {
            return Err(CoreError::invalid_argument(
                "id",
                format!("{} is still referenced from controls_tasks", id),
            ));
        }

        let removed = self
            .rows
            .get_mut(id.entity_type().table())
            .and_then(|table| table.remove(id));
        Ok(i64::from(removed.is_some()))
    }

    fn remove_links(&mut self, keep: impl Fn(&TaskLink) -> bool) -> i64 {
        let before = self.links.len();
        self.links.retain(keep);
        (before - self.links.len()) as i64
    }

    fn delete_task_link(&mut self, scope: &Scope, task_id: Gid, control_id: Gid) -> CoreResult<DeleteCounts> {
        self.require_row(scope, &task_id)?;
        if !self
            .links
            .iter()
            .any(|l| l.task_id == task_id && l.control_id == control_id)
        {
            return Err(CoreError::not_found(task_id));
        }

        let mut counts = DeleteCounts {
            link_count: self.links.iter().filter(|l| l.task_id == task_id).count() as i64,
            ..Default::default()
        };
        counts.unlinked =
            self.remove_links(|l| !(l.task_id == task_id && l.control_id == control_id));
        if counts.link_count <= 1 {
            counts.deleted_transitions = self.purge_transitions(&TransitionLog::TASK, &task_id);
            counts.deleted_links = self.remove_links(|l| l.task_id != task_id);
            counts.deleted_entities = self.remove_row(&task_id)?;
        }
        counts.verify_unlink(task_id)?;
        Ok(counts)
    }

    fn delete_control(&mut self, scope: &Scope, control_id: Gid) -> CoreResult<DeleteCounts> {
        if control_id.entity_type() != EntityType::Control {
            return Err(CoreError::not_found(control_id));
        }
        self.require_row(scope, &control_id)?;

        let task_ids: Vec<Gid> = self
            .links
            .iter()
            .filter(|l| l.control_id == control_id)
            .map(|l| l.task_id)
            .collect();
        let mut counts = DeleteCounts {
            link_count: task_ids.len() as i64,
            ..Default::default()
        };
        counts.deleted_links = self.remove_links(|l| l.control_id != control_id);

        for task_id in task_ids {
            if self.links.iter().any(|l| l.task_id == task_id) {
                continue;
            }
            counts.deleted_transitions += self.purge_transitions(&TransitionLog::TASK, &task_id);
            counts.deleted_tasks += self.remove_row(&task_id)?;
        }

        counts.deleted_transitions += self.purge_transitions(&TransitionLog::CONTROL, &control_id);
        counts.deleted_entities = self.remove_row(&control_id)?;
        counts.verify_destroy(control_id, true)?;
        Ok(counts)
    }

    fn window<T: Record>(
        &self,
        rows: impl Iterator<Item = CoreResult<Option<T>>>,
        cursor: &Cursor,
    ) -> CoreResult<Page<T>> {
        let mut records = Vec::new();
        for row in rows {
            if let Some(record) = row? {
                records.push(record);
            }
        }
        Page::new(cursor.window(records)?, cursor)
    }
}

// ============================================================================
// MOCK STORAGE
// ============================================================================

/// In-memory [`Store`] for testing.
#[derive(Debug, Clone, Default)]
pub struct MockStorage {
    tables: Arc<RwLock<Tables>>,
    faults: Arc<Faults>,
}

impl MockStorage {
    /// Create a new mock storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `after` further inserts of `entity_type` succeed, then fail the
    /// next one with a store error. The fail point disarms once tripped.
    pub fn fail_insert(&self, entity_type: EntityType, after: usize) {
        if let Ok(mut armed) = self.faults.armed.lock() {
            *armed = Some(FailPoint {
                entity_type,
                remaining: after,
            });
        }
    }

    /// Clear all stored data.
    pub async fn clear(&self) {
        *self.tables.write().await = Tables::default();
    }

    /// Number of stored rows of `entity_type`, across tenants.
    pub async fn row_count(&self, entity_type: EntityType) -> usize {
        let tables = self.tables.read().await;
        match entity_type {
            EntityType::ControlStateTransition
            | EntityType::TaskStateTransition
            | EntityType::EvidenceStateTransition => {
                tables.transitions.get(entity_type.table()).map_or(0, |t| t.len())
            }
            _ => tables.rows.get(entity_type.table()).map_or(0, |t| t.len()),
        }
    }

    /// Number of stored task links, across tenants.
    pub async fn link_count(&self) -> usize {
        self.tables.read().await.links.len()
    }

    async fn transact<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut Tables, &Faults) -> CoreResult<R> + Send,
    ) -> CoreResult<R> {
        let mut guard = self.tables.write().await;
        let mut working = guard.clone();
        match f(&mut working, &*self.faults) {
            Ok(result) => {
                *guard = working;
                Ok(result)
            }
            Err(e) => {
                tracing::debug!(operation, error = %e, "mock transaction rolled back");
                Err(e)
            }
        }
    }

    async fn read<R>(&self, f: impl FnOnce(&Tables) -> CoreResult<R> + Send) -> CoreResult<R> {
        let guard = self.tables.read().await;
        f(&guard)
    }
}

#[async_trait]
impl Store for MockStorage {
    // === Record Operations ===

    async fn insert<T: Record>(
        &self,
        scope: &Scope,
        record: &T,
        initial: Option<&NewTransition>,
    ) -> CoreResult<T> {
        let log = ensure_initial::<T>(scope, initial)?;
        self.transact("insert", |t, faults| {
            t.insert_record(scope, record, faults)?;
            if let (Some(log), Some(initial)) = (log, initial) {
                t.insert_transition(scope, &log, record.id(), None, initial)?;
            }
            t.load::<T>(scope, record.id())
        })
        .await
    }

    async fn get<T: Record>(&self, scope: &Scope, id: Gid) -> CoreResult<T> {
        self.read(|t| t.load::<T>(scope, id)).await
    }

    async fn list<T: Listable>(
        &self,
        scope: &Scope,
        parent_id: Gid,
        state: Option<&str>,
        cursor: &Cursor,
    ) -> CoreResult<Page<T>> {
        ensure_order::<T>(cursor)?;
        let parent = SqlParam::from(parent_id);
        self.read(|t| {
            let rows = t
                .rows
                .get(T::TABLE)
                .into_iter()
                .flat_map(|table| table.iter())
                .filter(|(id, row)| scope.owns(id) && row.get(T::PARENT_COLUMN) == Some(&parent))
                .map(|(_, row)| t.materialize::<T>(row, state));
            t.window(rows, cursor)
        })
        .await
    }

    async fn update<T: Record>(
        &self,
        scope: &Scope,
        id: Gid,
        expected_version: i32,
        patch: &T::Patch,
        state_change: Option<&NewTransition>,
    ) -> CoreResult<T> {
        self.transact("update", |t, _| {
            let mut row = match t.row(scope, &id) {
                Some(row) if id.entity_type() == T::ENTITY_TYPE => row.clone(),
                _ => return Err(CoreError::not_found(id)),
            };
            let version = row.int("version")?;
            if version != expected_version {
                return Err(CoreError::ConcurrentModification {
                    entity_type: T::ENTITY_TYPE,
                    id,
                    expected_version,
                });
            }

            for (column, value) in T::patch_row(patch) {
                row.set(column, value);
            }
            row.set("version", version + 1);
            row.set("updated_at", timestamp_now());
            t.check_references(scope, T::COLUMNS, &row)?;
            t.rows.entry(T::TABLE).or_default().insert(id, row);

            if let Some(change) = state_change {
                let log = T::STATE_LOG.ok_or_else(|| {
                    CoreError::internal(format!("{} has no transition log", T::ENTITY_TYPE))
                })?;
                let (from, change) = t.chain(&log, &id, change);
                if from.as_deref() != Some(change.to_state.as_str()) {
                    t.insert_transition(scope, &log, id, from.as_deref(), &change)?;
                }
            }
            t.load::<T>(scope, id)
        })
        .await
    }

    async fn delete<T: Deletable>(&self, scope: &Scope, id: Gid) -> CoreResult<DeleteCounts> {
        self.transact("delete", |t, _| {
            if id.entity_type() != T::ENTITY_TYPE || t.row(scope, &id).is_none() {
                return Err(CoreError::not_found(id));
            }
            let mut counts = DeleteCounts::default();
            if let Some(log) = T::STATE_LOG {
                counts.deleted_transitions = t.purge_transitions(&log, &id);
            }
            counts.deleted_entities = t.remove_row(&id)?;
            counts.verify_destroy(id, T::STATE_LOG.is_some())?;
            Ok(counts)
        })
        .await
    }

    // === Task Operations ===

    async fn task_insert(
        &self,
        scope: &Scope,
        task: &Task,
        control_id: Gid,
        initial: &NewTransition,
    ) -> CoreResult<Task> {
        control_id.ensure_type(EntityType::Control)?;
        self.transact("task_insert", |t, faults| {
            t.require_row(scope, &control_id)?;
            t.insert_record(scope, task, faults)?;
            t.links.push(TaskLink {
                task_id: task.id,
                control_id,
                created_at: task.created_at,
            });
            t.insert_transition(scope, &TransitionLog::TASK, task.id, None, initial)?;
            t.load::<Task>(scope, task.id)
        })
        .await
    }

    async fn task_link(
        &self,
        scope: &Scope,
        task_id: Gid,
        control_id: Gid,
    ) -> CoreResult<TaskLink> {
        task_id.ensure_type(EntityType::Task)?;
        control_id.ensure_type(EntityType::Control)?;
        self.transact("task_link", |t, _| {
            t.require_row(scope, &task_id)?;
            t.require_row(scope, &control_id)?;
            if t
                .links
                .iter()
                .any(|l| l.task_id == task_id && l.control_id == control_id)
            {
                return Err(CoreError::invalid_argument(
                    "control_id",
                    "task is already linked to this control",
                ));
            }
            let link = TaskLink {
                task_id,
                control_id,
                created_at: timestamp_now(),
            };
            t.links.push(link.clone());
            Ok(link)
        })
        .await
    }

    async fn task_links(&self, scope: &Scope, task_id: Gid) -> CoreResult<Vec<TaskLink>> {
        self.read(|t| {
            t.require_row(scope, &task_id)?;
            let mut links: Vec<TaskLink> = t
                .links
                .iter()
                .filter(|l| l.task_id == task_id)
                .cloned()
                .collect();
            links.sort_by(|a, b| (a.created_at, a.control_id).cmp(&(b.created_at, b.control_id)));
            Ok(links)
        })
        .await
    }

    async fn task_list_for_control(
        &self,
        scope: &Scope,
        control_id: Gid,
        state: Option<&str>,
        cursor: &Cursor,
    ) -> CoreResult<Page<Task>> {
        ensure_order::<Task>(cursor)?;
        self.read(|t| {
            let rows = t
                .links
                .iter()
                .filter(|l| l.control_id == control_id)
                .filter_map(|l| t.row(scope, &l.task_id))
                .map(|row| t.materialize::<Task>(row, state));
            t.window(rows, cursor)
        })
        .await
    }

    async fn task_delete(
        &self,
        scope: &Scope,
        task_id: Gid,
        control_id: Gid,
    ) -> CoreResult<DeleteCounts> {
        self.transact("task_delete", |t, _| t.delete_task_link(scope, task_id, control_id))
            .await
    }

    async fn control_delete(&self, scope: &Scope, control_id: Gid) -> CoreResult<DeleteCounts> {
        self.transact("control_delete", |t, _| t.delete_control(scope, control_id))
            .await
    }

    async fn framework_delete(
        &self,
        scope: &Scope,
        framework_id: Gid,
    ) -> CoreResult<DeleteCounts> {
        self.transact("framework_delete", |t, _| {
            if framework_id.entity_type() != EntityType::Framework {
                return Err(CoreError::not_found(framework_id));
            }
            t.require_row(scope, &framework_id)?;

            let parent = SqlParam::from(framework_id);
            let control_ids: Vec<Gid> = t
                .rows
                .get("controls")
                .map(|table| {
                    table
                        .iter()
                        .filter(|(_, row)| row.get("framework_id") == Some(&parent))
                        .map(|(id, _)| *id)
                        .collect()
                })
                .unwrap_or_default();

            let mut total = DeleteCounts::default();
            for control_id in control_ids {
                total.accumulate(&t.delete_control(scope, control_id)?);
            }
            let removed = t.remove_row(&framework_id)?;
            if removed != 1 {
                return Err(CoreError::IncompleteCascade {
                    entity_type: EntityType::Framework,
                    id: framework_id,
                    reason: format!("removed {} framework rows", removed),
                });
            }
            total.deleted_entities += removed;
            Ok(total)
        })
        .await
    }

    async fn framework_import(
        &self,
        scope: &Scope,
        bundle: &ImportBundle,
    ) -> CoreResult<Framework> {
        self.transact("framework_import", |t, faults| {
            t.insert_record(scope, &bundle.framework, faults)?;
            for imported in &bundle.controls {
                t.insert_record(scope, &imported.control, faults)?;
                t.insert_transition(
                    scope,
                    &TransitionLog::CONTROL,
                    imported.control.id,
                    None,
                    &imported.initial,
                )?;
            }
            for imported in &bundle.controls {
                for task in &imported.tasks {
                    t.insert_record(scope, &task.task, faults)?;
                    t.links.push(TaskLink {
                        task_id: task.task.id,
                        control_id: imported.control.id,
                        created_at: task.task.created_at,
                    });
                    t.insert_transition(
                        scope,
                        &TransitionLog::TASK,
                        task.task.id,
                        None,
                        &task.initial,
                    )?;
                }
            }
            t.load::<Framework>(scope, bundle.framework.id)
        })
        .await
    }

    // === Transition Log Operations ===

    async fn transition_record(
        &self,
        scope: &Scope,
        log: &TransitionLog,
        entity_id: Gid,
        transition: &NewTransition,
    ) -> CoreResult<TransitionRow> {
        self.transact("transition_record", |t, _| {
            let (from_state, transition) = t.chain(log, &entity_id, transition);
            t.insert_transition(scope, log, entity_id, from_state.as_deref(), &transition)
        })
        .await
    }

    async fn current_state(
        &self,
        scope: &Scope,
        log: &TransitionLog,
        entity_id: Gid,
    ) -> CoreResult<String> {
        self.read(|t| {
            log.ensure_entity(&entity_id)?;
            t.require_row(scope, &entity_id)?;
            t.state_of(log, &entity_id)
                .map(str::to_string)
                .ok_or(CoreError::NoStateRecorded {
                    entity_type: log.entity_type,
                    id: entity_id,
                })
        })
        .await
    }

    async fn transition_list(
        &self,
        scope: &Scope,
        log: &TransitionLog,
        entity_id: Gid,
        cursor: &Cursor,
    ) -> CoreResult<Page<TransitionRow>> {
        ensure_transition_order(cursor)?;
        self.read(|t| {
            log.ensure_entity(&entity_id)?;
            t.require_row(scope, &entity_id)?;
            let rows: Vec<TransitionRow> = t
                .transitions
                .get(log.table)
                .into_iter()
                .flat_map(|table| table.values())
                .filter(|r| r.entity_id == entity_id)
                .cloned()
                .collect();
            Page::new(cursor.window(rows)?, cursor)
        })
        .await
    }

    async fn health_check(&self) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::{
        Control, ControlImportance, ControlState, ErrorKind, Evidence, EvidenceState,
        ImportedControl, ImportedTask, OrderBy, Organization, People, PeopleKind, Policy,
        PolicyStatus, TaskPatch, TaskState, TenantId,
    };

    struct World {
        store: MockStorage,
        scope: Scope,
        organization: Organization,
        framework: Framework,
    }

    fn organization(scope: &Scope) -> Organization {
        let now = timestamp_now();
        Organization {
            id: scope.mint(EntityType::Organization),
            name: "Acme".to_string(),
            logo_ref: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn framework(scope: &Scope, organization_id: Gid) -> Framework {
        let now = timestamp_now();
        Framework {
            id: scope.mint(EntityType::Framework),
            organization_id,
            name: "SOC 2".to_string(),
            description: String::new(),
            content_ref: "soc2".to_string(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn control(scope: &Scope, framework_id: Gid, name: &str) -> Control {
        let now = timestamp_now();
        Control {
            id: scope.mint(EntityType::Control),
            framework_id,
            category: "Access".to_string(),
            importance: ControlImportance::Mandatory,
            name: name.to_string(),
            description: String::new(),
            content_ref: name.to_lowercase(),
            standards: vec![],
            state: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn task(scope: &Scope, name: &str) -> Task {
        let now = timestamp_now();
        Task {
            id: scope.mint(EntityType::Task),
            name: name.to_string(),
            description: String::new(),
            content_ref: String::new(),
            time_estimate_secs: None,
            assigned_to: None,
            state: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn people(scope: &Scope, organization_id: Gid) -> People {
        let now = timestamp_now();
        People {
            id: scope.mint(EntityType::People),
            organization_id,
            kind: PeopleKind::Employee,
            full_name: "Grace Hopper".to_string(),
            primary_email_address: "grace@example.com".to_string(),
            additional_email_addresses: vec![],
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    async fn world() -> CoreResult<World> {
        let store = MockStorage::new();
        let scope = Scope::new(TenantId::generate());
        let organization = store.insert(&scope, &organization(&scope), None).await?;
        let framework = store
            .insert(&scope, &framework(&scope, organization.id), None)
            .await?;
        Ok(World {
            store,
            scope,
            organization,
            framework,
        })
    }

    impl World {
        async fn control(&self, name: &str) -> CoreResult<Control> {
            let initial = NewTransition::initial::<ControlState>(&self.scope);
            self.store
                .insert(&self.scope, &control(&self.scope, self.framework.id, name), Some(&initial))
                .await
        }

        async fn task(&self, control_id: Gid, name: &str) -> CoreResult<Task> {
            let initial = NewTransition::initial::<TaskState>(&self.scope);
            self.store
                .task_insert(&self.scope, &task(&self.scope, name), control_id, &initial)
                .await
        }
    }

    fn first(n: u32) -> Cursor {
        Cursor::head(n, OrderBy::default())
    }

    #[tokio::test]
    async fn test_insert_get_with_state() -> CoreResult<()> {
        let w = world().await?;
        let control = w.control("MFA").await?;
        assert_eq!(control.state, Some(ControlState::NotStarted));

        let fetched: Control = w.store.get(&w.scope, control.id).await?;
        assert_eq!(fetched, control);
        Ok(())
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicates_and_dangling_references() -> CoreResult<()> {
        let w = world().await?;
        let dup = w.store.insert(&w.scope, &w.framework, None).await;
        assert_eq!(dup.err().map(|e| e.kind()), Some(ErrorKind::InvalidArgument));

        let orphan = framework(&w.scope, w.scope.mint(EntityType::Organization));
        let err = w.store.insert(&w.scope, &orphan, None).await.err();
        assert!(matches!(err, Some(CoreError::InvalidArgument { ref field, .. }) if field == "organization_id"));
        Ok(())
    }

    #[tokio::test]
    async fn test_other_tenants_see_nothing() -> CoreResult<()> {
        let w = world().await?;
        let stranger = Scope::new(TenantId::generate());
        let err = w.store.get::<Framework>(&stranger, w.framework.id).await.err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::NotFound));

        let page = w
            .store
            .list::<Framework>(&stranger, w.organization.id, None, &first(10))
            .await?;
        assert!(page.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_checks_version() -> CoreResult<()> {
        let w = world().await?;
        let control = w.control("Backups").await?;
        let t = w.task(control.id, "Verify restore").await?;

        let patch = TaskPatch {
            name: Some("Verify restores".to_string()),
            ..Default::default()
        };
        let updated: Task = w.store.update(&w.scope, t.id, 1, &patch, None).await?;
        assert_eq!(updated.version, 2);
        assert_eq!(updated.name, "Verify restores");
        assert!(updated.updated_at >= t.updated_at);

        let stale = w.store.update::<Task>(&w.scope, t.id, 1, &patch, None).await.err();
        assert!(matches!(
            stale,
            Some(CoreError::ConcurrentModification { expected_version: 1, .. })
        ));
        let current: Task = w.store.get(&w.scope, t.id).await?;
        assert_eq!(current.version, 2);

        let missing = w
            .store
            .update::<Task>(&w.scope, w.scope.mint(EntityType::Task), 1, &patch, None)
            .await
            .err();
        assert_eq!(missing.map(|e| e.kind()), Some(ErrorKind::NotFound));
        Ok(())
    }

    #[tokio::test]
    async fn test_update_appends_transition_only_on_change() -> CoreResult<()> {
        let w = world().await?;
        let control = w.control("Logging").await?;
        let t = w.task(control.id, "Ship logs").await?;

        let same = NewTransition::new(&w.scope, TaskState::Todo, None);
        w.store
            .update::<Task>(&w.scope, t.id, 1, &TaskPatch::default(), Some(&same))
            .await?;
        assert_eq!(w.store.row_count(EntityType::TaskStateTransition).await, 1);

        let done = NewTransition::new(&w.scope, TaskState::Done, Some("shipped".to_string()));
        let updated: Task = w
            .store
            .update(&w.scope, t.id, 2, &TaskPatch::default(), Some(&done))
            .await?;
        assert_eq!(updated.state, Some(TaskState::Done));

        let history = w
            .store
            .transition_list(&w.scope, &TransitionLog::TASK, t.id, &first(10))
            .await?;
        let latest = history.nodes().next().cloned();
        assert_eq!(latest.as_ref().and_then(|r| r.from_state.clone()), Some("TODO".to_string()));
        assert_eq!(latest.map(|r| r.to_state), Some("DONE".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_filters_by_state() -> CoreResult<()> {
        let w = world().await?;
        let a = w.control("A").await?;
        w.control("B").await?;
        w.store
            .transition_record(
                &w.scope,
                &TransitionLog::CONTROL,
                a.id,
                &NewTransition::new(&w.scope, ControlState::Implemented, None),
            )
            .await?;

        let implemented = w
            .store
            .list::<Control>(&w.scope, w.framework.id, Some("IMPLEMENTED"), &first(10))
            .await?;
        assert_eq!(implemented.nodes().map(|c| c.id).collect::<Vec<_>>(), vec![a.id]);

        let all = w
            .store
            .list::<Control>(&w.scope, w.framework.id, None, &first(10))
            .await?;
        assert_eq!(all.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_transition_record_chains_from_current_state() -> CoreResult<()> {
        let w = world().await?;
        let control = w.control("Encryption").await?;
        let t = w.task(control.id, "Rotate keys").await?;

        // Prepared before the second one but recorded after it.
        let stale = NewTransition::new(&w.scope, TaskState::Todo, Some("reopened".to_string()));
        let done = NewTransition::new(&w.scope, TaskState::Done, None);
        let first_row = w
            .store
            .transition_record(&w.scope, &TransitionLog::TASK, t.id, &done)
            .await?;
        assert_eq!(first_row.from_state.as_deref(), Some("TODO"));

        let second_row = w
            .store
            .transition_record(&w.scope, &TransitionLog::TASK, t.id, &stale)
            .await?;
        assert_eq!(second_row.from_state.as_deref(), Some("DONE"));
        assert!(second_row.created_at > first_row.created_at);

        let current = w
            .store
            .current_state(&w.scope, &TransitionLog::TASK, t.id)
            .await?;
        assert_eq!(current, "TODO");

        let missing = w
            .store
            .transition_record(&w.scope, &TransitionLog::TASK, w.scope.mint(EntityType::Task), &done)
            .await
            .err();
        assert_eq!(missing.map(|e| e.kind()), Some(ErrorKind::NotFound));
        Ok(())
    }

    #[tokio::test]
    async fn test_current_state_without_transitions() -> CoreResult<()> {
        let w = world().await?;
        let control = w.control("Orphaned").await?;
        w.store
            .tables
            .write()
            .await
            .transitions
            .clear();

        let err = w
            .store
            .current_state(&w.scope, &TransitionLog::CONTROL, control.id)
            .await
            .err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::NoStateRecorded));
        Ok(())
    }

    #[tokio::test]
    async fn test_task_delete_single_and_shared_links() -> CoreResult<()> {
        let w = world().await?;
        let a = w.control("A").await?;
        let b = w.control("B").await?;

        let solo = w.task(a.id, "solo").await?;
        let counts = w.store.task_delete(&w.scope, solo.id, a.id).await?;
        assert!(counts.destroyed());
        assert_eq!(counts.deleted_transitions, 1);
        let gone = w.store.get::<Task>(&w.scope, solo.id).await.err();
        assert_eq!(gone.map(|e| e.kind()), Some(ErrorKind::NotFound));

        let shared = w.task(a.id, "shared").await?;
        w.store.task_link(&w.scope, shared.id, b.id).await?;
        let counts = w.store.task_delete(&w.scope, shared.id, a.id).await?;
        assert!(!counts.destroyed());
        assert_eq!(counts.link_count, 2);

        let links = w.store.task_links(&w.scope, shared.id).await?;
        assert_eq!(links.iter().map(|l| l.control_id).collect::<Vec<_>>(), vec![b.id]);
        assert_eq!(
            w.store.current_state(&w.scope, &TransitionLog::TASK, shared.id).await?,
            "TODO"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_task_delete_unlinked_control_is_not_found() -> CoreResult<()> {
        let w = world().await?;
        let a = w.control("A").await?;
        let b = w.control("B").await?;
        let t = w.task(a.id, "only on A").await?;

        let err = w.store.task_delete(&w.scope, t.id, b.id).await.err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::NotFound));
        assert_eq!(w.store.link_count().await, 1);
        assert!(w.store.get::<Task>(&w.scope, t.id).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_task_delete_cascades_evidence() -> CoreResult<()> {
        let w = world().await?;
        let a = w.control("A").await?;
        let t = w.task(a.id, "collect").await?;
        let now = timestamp_now();
        let evidence = Evidence {
            id: w.scope.mint(EntityType::Evidence),
            task_id: t.id,
            name: "screenshot".to_string(),
            object_key: "blobs/1".to_string(),
            mime_type: "image/png".to_string(),
            size: 1024,
            state: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        let initial = NewTransition::initial::<EvidenceState>(&w.scope);
        w.store.insert(&w.scope, &evidence, Some(&initial)).await?;

        w.store.task_delete(&w.scope, t.id, a.id).await?;
        assert_eq!(w.store.row_count(EntityType::Evidence).await, 0);
        assert_eq!(w.store.row_count(EntityType::EvidenceStateTransition).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_control_delete_keeps_shared_tasks() -> CoreResult<()> {
        let w = world().await?;
        let a = w.control("A").await?;
        let b = w.control("B").await?;
        let only_a = w.task(a.id, "only A").await?;
        let shared = w.task(a.id, "shared").await?;
        w.store.task_link(&w.scope, shared.id, b.id).await?;

        let counts = w.store.control_delete(&w.scope, a.id).await?;
        assert_eq!(counts.link_count, 2);
        assert_eq!(counts.deleted_links, 2);
        assert_eq!(counts.deleted_tasks, 1);

        assert!(w.store.get::<Task>(&w.scope, only_a.id).await.is_err());
        assert!(w.store.get::<Task>(&w.scope, shared.id).await.is_ok());
        assert!(w.store.get::<Control>(&w.scope, a.id).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_framework_delete_removes_everything() -> CoreResult<()> {
        let w = world().await?;
        let a = w.control("A").await?;
        let b = w.control("B").await?;
        let shared = w.task(a.id, "shared").await?;
        w.store.task_link(&w.scope, shared.id, b.id).await?;

        let counts = w.store.framework_delete(&w.scope, w.framework.id).await?;
        assert_eq!(counts.deleted_entities, 3);
        assert_eq!(counts.deleted_tasks, 1);
        for entity_type in [
            EntityType::Framework,
            EntityType::Control,
            EntityType::Task,
            EntityType::ControlStateTransition,
            EntityType::TaskStateTransition,
        ] {
            assert_eq!(w.store.row_count(entity_type).await, 0, "{}", entity_type);
        }
        assert_eq!(w.store.link_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_people_delete_respects_references() -> CoreResult<()> {
        let w = world().await?;
        let owner = w.store.insert(&w.scope, &people(&w.scope, w.organization.id), None).await?;
        let assignee = w.store.insert(&w.scope, &people(&w.scope, w.organization.id), None).await?;
        let now = timestamp_now();
        let policy = Policy {
            id: w.scope.mint(EntityType::Policy),
            organization_id: w.organization.id,
            name: "Access policy".to_string(),
            content: String::new(),
            status: PolicyStatus::Draft,
            review_date: None,
            owner_id: owner.id,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        w.store.insert(&w.scope, &policy, None).await?;

        let blocked = w.store.delete::<People>(&w.scope, owner.id).await.err();
        assert_eq!(blocked.map(|e| e.kind()), Some(ErrorKind::InvalidArgument));

        let a = w.control("A").await?;
        let t = w.task(a.id, "assigned").await?;
        let patch = TaskPatch {
            assigned_to: Some(Some(assignee.id)),
            ..Default::default()
        };
        w.store.update::<Task>(&w.scope, t.id, 1, &patch, None).await?;
        w.store.delete::<People>(&w.scope, assignee.id).await?;
        let t: Task = w.store.get(&w.scope, t.id).await?;
        assert_eq!(t.assigned_to, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_import_failure_leaves_nothing_behind() -> CoreResult<()> {
        let w = world().await?;
        let import_framework = framework(&w.scope, w.organization.id);
        let controls = (0..2)
            .map(|i| {
                let c = control(&w.scope, import_framework.id, &format!("C{}", i));
                ImportedControl {
                    control: c,
                    initial: NewTransition::initial::<ControlState>(&w.scope),
                    tasks: (0..2)
                        .map(|j| ImportedTask {
                            task: task(&w.scope, &format!("T{}{}", i, j)),
                            initial: NewTransition::initial::<TaskState>(&w.scope),
                        })
                        .collect(),
                }
            })
            .collect();
        let bundle = ImportBundle {
            framework: import_framework,
            controls,
        };

        w.store.fail_insert(EntityType::Task, bundle.task_count() - 1);
        let err = w.store.framework_import(&w.scope, &bundle).await.err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::StoreUnavailable));
        assert_eq!(w.store.row_count(EntityType::Framework).await, 1);
        assert_eq!(w.store.row_count(EntityType::Control).await, 0);
        assert_eq!(w.store.row_count(EntityType::Task).await, 0);
        assert_eq!(w.store.link_count().await, 0);

        let framework = w.store.framework_import(&w.scope, &bundle).await?;
        assert_eq!(framework.id, bundle.framework.id);
        assert_eq!(w.store.row_count(EntityType::Task).await, 4);
        assert_eq!(w.store.row_count(EntityType::TaskStateTransition).await, 4);
        assert_eq!(w.store.link_count().await, 4);
        Ok(())
    }
}
