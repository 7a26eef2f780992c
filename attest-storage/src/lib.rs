//! Attest Storage - Store Trait and Mock Implementation
//!
//! Defines the storage abstraction every service runs against. The
//! PostgreSQL implementation lives in attest-pg; [`MockStorage`] keeps
//! everything in memory for tests.

pub mod mock;

pub use mock::MockStorage;

use ::async_trait::async_trait;
use attest_core::{
    CoreError, CoreResult, Cursor, DeleteCounts, Deletable, EntityType, Framework, Gid,
    ImportBundle, Listable, NewTransition, OrderField, Page, Record, Scope, Task, TaskLink,
    TransitionLog, TransitionRow,
};

/// Async store for Attest records.
///
/// Every method takes the caller's [`Scope`]; rows of other tenants are
/// invisible and reported as not found. Every method that writes more than
/// one row does so atomically.
#[async_trait]
pub trait Store: Send + Sync {
    // ========================================================================
    // RECORD OPERATIONS
    // ========================================================================

    /// Insert a record. Stateful records must come with their initial
    /// transition, stateless ones without.
    async fn insert<T: Record>(
        &self,
        scope: &Scope,
        record: &T,
        initial: Option<&NewTransition>,
    ) -> CoreResult<T>;

    /// Get a record by id, with its derived state.
    async fn get<T: Record>(&self, scope: &Scope, id: Gid) -> CoreResult<T>;

    /// List the records under `parent_id`, optionally only those whose
    /// current state is `state`.
    async fn list<T: Listable>(
        &self,
        scope: &Scope,
        parent_id: Gid,
        state: Option<&str>,
        cursor: &Cursor,
    ) -> CoreResult<Page<T>>;

    /// Apply `patch` if the stored version is still `expected_version`.
    ///
    /// A `state_change` is appended to the transition log in the same
    /// transaction when it differs from the current state.
    async fn update<T: Record>(
        &self,
        scope: &Scope,
        id: Gid,
        expected_version: i32,
        patch: &T::Patch,
        state_change: Option<&NewTransition>,
    ) -> CoreResult<T>;

    /// Delete a record and its transition history.
    async fn delete<T: Deletable>(&self, scope: &Scope, id: Gid) -> CoreResult<DeleteCounts>;

    // ========================================================================
    // TASK OPERATIONS
    // ========================================================================

    /// Insert a task linked to `control_id`, with its initial transition.
    async fn task_insert(
        &self,
        scope: &Scope,
        task: &Task,
        control_id: Gid,
        initial: &NewTransition,
    ) -> CoreResult<Task>;

    /// Link an existing task to another control.
    async fn task_link(&self, scope: &Scope, task_id: Gid, control_id: Gid)
        -> CoreResult<TaskLink>;

    /// Links of a task, oldest first.
    async fn task_links(&self, scope: &Scope, task_id: Gid) -> CoreResult<Vec<TaskLink>>;

    async fn task_list_for_control(
        &self,
        scope: &Scope,
        control_id: Gid,
        state: Option<&str>,
        cursor: &Cursor,
    ) -> CoreResult<Page<Task>>;

    /// Remove a task from one control, destroying it when that was its
    /// last link.
    async fn task_delete(
        &self,
        scope: &Scope,
        task_id: Gid,
        control_id: Gid,
    ) -> CoreResult<DeleteCounts>;

    /// Delete a control, severing its task links and destroying the tasks
    /// it was the last link of.
    async fn control_delete(&self, scope: &Scope, control_id: Gid) -> CoreResult<DeleteCounts>;

    /// Delete a framework and all of its controls.
    async fn framework_delete(&self, scope: &Scope, framework_id: Gid)
        -> CoreResult<DeleteCounts>;

    /// Write an imported framework with its controls, tasks, links and
    /// initial transitions in one transaction.
    async fn framework_import(&self, scope: &Scope, bundle: &ImportBundle)
        -> CoreResult<Framework>;

    // ========================================================================
    // TRANSITION LOG OPERATIONS
    // ========================================================================

    /// Append one transition. `from_state` is the entity's current state,
    /// read under the same lock as the insert.
    async fn transition_record(
        &self,
        scope: &Scope,
        log: &TransitionLog,
        entity_id: Gid,
        transition: &NewTransition,
    ) -> CoreResult<TransitionRow>;

    /// `to_state` of the latest transition.
    async fn current_state(
        &self,
        scope: &Scope,
        log: &TransitionLog,
        entity_id: Gid,
    ) -> CoreResult<String>;

    async fn transition_list(
        &self,
        scope: &Scope,
        log: &TransitionLog,
        entity_id: Gid,
        cursor: &Cursor,
    ) -> CoreResult<Page<TransitionRow>>;

    // ========================================================================
    // HEALTH
    // ========================================================================

    async fn health_check(&self) -> CoreResult<()>;
}

/// Check an id about to be inserted: right type, minted by this tenant.
pub fn ensure_new_id(scope: &Scope, id: &Gid, entity_type: EntityType) -> CoreResult<()> {
    id.ensure_type(entity_type)?;
    if !scope.owns(id) {
        return Err(CoreError::invalid_argument(
            "id",
            format!("{} belongs to another tenant", id),
        ));
    }
    Ok(())
}

/// Check that a record type and its optional initial transition agree.
pub fn ensure_initial<T: Record>(
    scope: &Scope,
    initial: Option<&NewTransition>,
) -> CoreResult<Option<TransitionLog>> {
    match (T::STATE_LOG, initial) {
        (Some(log), Some(t)) => {
            ensure_new_id(scope, &t.id, log.transition_type)?;
            Ok(Some(log))
        }
        (None, None) => Ok(None),
        (Some(_), None) => Err(CoreError::internal(format!(
            "{} requires an initial transition",
            T::ENTITY_TYPE
        ))),
        (None, Some(_)) => Err(CoreError::internal(format!(
            "{} has no transition log",
            T::ENTITY_TYPE
        ))),
    }
}

/// Check a transition against its log before appending it.
pub fn ensure_transition(
    scope: &Scope,
    log: &TransitionLog,
    entity_id: &Gid,
    transition: &NewTransition,
) -> CoreResult<()> {
    log.ensure_entity(entity_id)?;
    ensure_new_id(scope, &transition.id, log.transition_type)
}

/// Check that `T` can be listed in the cursor's ordering.
pub fn ensure_order<T: Record>(cursor: &Cursor) -> CoreResult<()> {
    let field = cursor.order_by().field;
    if !T::supports_order(field) {
        return Err(CoreError::invalid_argument(
            "order_by",
            format!("{} cannot be ordered by {}", T::ENTITY_TYPE, field),
        ));
    }
    Ok(())
}

/// Transitions are ordered by time only.
pub fn ensure_transition_order(cursor: &Cursor) -> CoreResult<()> {
    match cursor.order_by().field {
        OrderField::CreatedAt | OrderField::UpdatedAt => Ok(()),
        field => Err(CoreError::invalid_argument(
            "order_by",
            format!("transitions cannot be ordered by {}", field),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::{ErrorKind, OrderBy, OrderDirection, TenantId};

    #[test]
    fn test_ensure_new_id() {
        let scope = Scope::new(TenantId::generate());
        let other = Scope::new(TenantId::generate());

        assert!(ensure_new_id(&scope, &scope.mint(EntityType::Task), EntityType::Task).is_ok());
        assert_eq!(
            ensure_new_id(&scope, &scope.mint(EntityType::Task), EntityType::Control)
                .err()
                .map(|e| e.kind()),
            Some(ErrorKind::InvalidArgument)
        );
        assert_eq!(
            ensure_new_id(&scope, &other.mint(EntityType::Task), EntityType::Task)
                .err()
                .map(|e| e.kind()),
            Some(ErrorKind::InvalidArgument)
        );
    }

    #[test]
    fn test_ensure_initial_matches_state_log() {
        let scope = Scope::new(TenantId::generate());
        let initial = NewTransition::initial::<attest_core::TaskState>(&scope);

        assert!(ensure_initial::<Task>(&scope, Some(&initial)).is_ok());
        assert!(ensure_initial::<Task>(&scope, None).is_err());
        assert!(ensure_initial::<attest_core::Vendor>(&scope, Some(&initial)).is_err());
        assert_eq!(ensure_initial::<attest_core::Vendor>(&scope, None).ok(), Some(None));
    }

    #[test]
    fn test_order_checks() {
        let by_name = Cursor::head(5, OrderBy::new(OrderField::Name, OrderDirection::Asc));
        let by_full_name = Cursor::head(5, OrderBy::new(OrderField::FullName, OrderDirection::Asc));

        assert!(ensure_order::<Task>(&by_name).is_ok());
        assert_eq!(
            ensure_order::<Task>(&by_full_name).err().map(|e| e.kind()),
            Some(ErrorKind::InvalidArgument)
        );
        assert!(ensure_order::<attest_core::People>(&by_full_name).is_ok());

        assert!(ensure_transition_order(&Cursor::head(5, OrderBy::default())).is_ok());
        assert!(ensure_transition_order(&by_name).is_err());
    }
}
