//! State history shared by controls, tasks and evidences.

use crate::pagination::ListArgs;
use crate::validation;
use crate::TenantService;
use attest_core::{
    CoreError, CoreResult, EntityState, Gid, NewTransition, Page, StateTransition,
};
use attest_storage::Store;

pub(crate) async fn current_state<S: Store, T: EntityState>(
    svc: &TenantService<S>,
    entity_id: Gid,
) -> CoreResult<T> {
    let log = T::LOG;
    validation::require_id(svc.scope(), entity_id, log.entity_type, "id")?;
    let raw = svc
        .store()
        .current_state(svc.scope(), &log, entity_id)
        .await?;
    raw.parse::<T>().map_err(|_| {
        CoreError::internal(format!(
            "stored state {:?} is not a valid {}",
            raw, log.entity_type
        ))
    })
}

pub(crate) async fn state_transitions<S: Store, T: EntityState>(
    svc: &TenantService<S>,
    entity_id: Gid,
    args: &ListArgs,
) -> CoreResult<Page<StateTransition<T>>> {
    let log = T::LOG;
    validation::require_id(svc.scope(), entity_id, log.entity_type, "id")?;
    let cursor = svc.cursor(args)?;
    let page = svc
        .store()
        .transition_list(svc.scope(), &log, entity_id, &cursor)
        .await?;
    page.try_map(|row| row.typed::<T>())
}

/// Append a transition from the current state to `to_state`.
pub(crate) async fn record_transition<S: Store, T: EntityState>(
    svc: &TenantService<S>,
    entity_id: Gid,
    to_state: T,
    reason: Option<String>,
) -> CoreResult<StateTransition<T>> {
    let log = T::LOG;
    validation::require_id(svc.scope(), entity_id, log.entity_type, "id")?;
    let transition = NewTransition::new(svc.scope(), to_state, reason);
    let row = svc
        .store()
        .transition_record(svc.scope(), &log, entity_id, &transition)
        .await?;
    tracing::info!(
        tenant_id = %svc.scope().tenant_id(),
        entity_id = %entity_id,
        from_state = ?row.from_state,
        to_state = %to_state,
        "Recorded transition"
    );
    row.typed::<T>()
}
