//! Controls

use crate::pagination::ListArgs;
use crate::transitions;
use crate::validation;
use crate::TenantService;
use attest_core::{
    timestamp_now, Control, ControlImportance, ControlPatch, ControlState, CoreResult,
    DeleteCounts, EntityType, Gid, NewTransition, Page, StateTransition,
};
use attest_storage::Store;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateControlRequest {
    pub framework_id: Gid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub importance: ControlImportance,
    #[serde(default)]
    pub content_ref: String,
    #[serde(default)]
    pub standards: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateControlRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub importance: Option<ControlImportance>,
    pub content_ref: Option<String>,
    pub standards: Option<Vec<String>>,
    /// Recorded as a transition when it differs from the current state
    pub state: Option<ControlState>,
    pub reason: Option<String>,
}

pub struct ControlService<'a, S: Store> {
    pub(crate) svc: &'a TenantService<S>,
}

impl<S: Store> ControlService<'_, S> {
    /// Create a control in `NOT_STARTED`.
    pub async fn create(&self, req: CreateControlRequest) -> CoreResult<Control> {
        let scope = self.svc.scope();
        validation::require_id(scope, req.framework_id, EntityType::Framework, "framework_id")?;
        let now = timestamp_now();
        let control = Control {
            id: scope.mint(EntityType::Control),
            framework_id: req.framework_id,
            category: req.category,
            importance: req.importance,
            name: validation::require_name("name", &req.name)?,
            description: req.description,
            content_ref: req.content_ref,
            standards: req.standards,
            state: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.svc
            .create_record(control, Some(NewTransition::initial::<ControlState>(scope)))
            .await
    }

    pub async fn get(&self, id: Gid) -> CoreResult<Control> {
        self.svc.get_record(id).await
    }

    pub async fn list_for_framework(
        &self,
        framework_id: Gid,
        state: Option<ControlState>,
        args: &ListArgs,
    ) -> CoreResult<Page<Control>> {
        self.svc
            .list_records(framework_id, state.as_ref().map(ControlState::as_str), args)
            .await
    }

    pub async fn update(
        &self,
        id: Gid,
        expected_version: i32,
        req: UpdateControlRequest,
    ) -> CoreResult<Control> {
        let patch = ControlPatch {
            category: req.category,
            importance: req.importance,
            name: validation::optional_name("name", req.name)?,
            description: req.description,
            content_ref: req.content_ref,
            standards: req.standards,
        };
        let change = req
            .state
            .map(|state| NewTransition::new(self.svc.scope(), state, req.reason));
        self.svc
            .update_record::<Control>(id, expected_version, patch, change)
            .await
    }

    /// Delete a control. Tasks it shares with other controls are only
    /// unlinked; the others go with it.
    pub async fn delete(&self, id: Gid) -> CoreResult<DeleteCounts> {
        let scope = self.svc.scope();
        validation::require_id(scope, id, EntityType::Control, "id")?;
        let counts = self.svc.store().control_delete(scope, id).await?;
        tracing::info!(
            tenant_id = %scope.tenant_id(),
            control_id = %id,
            unlinked = counts.unlinked,
            deleted_tasks = counts.deleted_tasks,
            "Deleted control"
        );
        Ok(counts)
    }

    pub async fn current_state(&self, id: Gid) -> CoreResult<ControlState> {
        transitions::current_state(self.svc, id).await
    }

    pub async fn state_transitions(
        &self,
        id: Gid,
        args: &ListArgs,
    ) -> CoreResult<Page<StateTransition<ControlState>>> {
        transitions::state_transitions(self.svc, id, args).await
    }

    pub async fn record_transition(
        &self,
        id: Gid,
        to_state: ControlState,
        reason: Option<String>,
    ) -> CoreResult<StateTransition<ControlState>> {
        transitions::record_transition(self.svc, id, to_state, reason).await
    }
}
