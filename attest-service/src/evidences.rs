//! Evidences

use crate::pagination::ListArgs;
use crate::transitions;
use crate::validation;
use crate::TenantService;
use attest_core::{
    timestamp_now, CoreResult, DeleteCounts, EntityType, Evidence, EvidencePatch, EvidenceState,
    Gid, NewTransition, Page, StateTransition,
};
use attest_storage::Store;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEvidenceRequest {
    pub task_id: Gid,
    pub name: String,
    /// Key of the already uploaded blob
    pub object_key: String,
    pub mime_type: String,
    pub size: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvidenceRequest {
    pub name: Option<String>,
    pub object_key: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<i64>,
    pub state: Option<EvidenceState>,
    pub reason: Option<String>,
}

pub struct EvidenceService<'a, S: Store> {
    pub(crate) svc: &'a TenantService<S>,
}

impl<S: Store> EvidenceService<'_, S> {
    /// Record evidence for a task. New evidence is `VALID`.
    pub async fn create(&self, req: CreateEvidenceRequest) -> CoreResult<Evidence> {
        let scope = self.svc.scope();
        validation::require_id(scope, req.task_id, EntityType::Task, "task_id")?;
        validation::require_non_negative("size", req.size)?;
        let now = timestamp_now();
        let evidence = Evidence {
            id: scope.mint(EntityType::Evidence),
            task_id: req.task_id,
            name: validation::require_name("name", &req.name)?,
            object_key: validation::require_name("object_key", &req.object_key)?,
            mime_type: req.mime_type,
            size: req.size,
            state: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.svc
            .create_record(evidence, Some(NewTransition::initial::<EvidenceState>(scope)))
            .await
    }

    pub async fn get(&self, id: Gid) -> CoreResult<Evidence> {
        self.svc.get_record(id).await
    }

    pub async fn list_for_task(
        &self,
        task_id: Gid,
        state: Option<EvidenceState>,
        args: &ListArgs,
    ) -> CoreResult<Page<Evidence>> {
        self.svc
            .list_records(task_id, state.as_ref().map(EvidenceState::as_str), args)
            .await
    }

    pub async fn update(
        &self,
        id: Gid,
        expected_version: i32,
        req: UpdateEvidenceRequest,
    ) -> CoreResult<Evidence> {
        if let Some(size) = req.size {
            validation::require_non_negative("size", size)?;
        }
        let patch = EvidencePatch {
            name: validation::optional_name("name", req.name)?,
            object_key: validation::optional_name("object_key", req.object_key)?,
            mime_type: req.mime_type,
            size: req.size,
        };
        let change = req
            .state
            .map(|state| NewTransition::new(self.svc.scope(), state, req.reason));
        self.svc
            .update_record::<Evidence>(id, expected_version, patch, change)
            .await
    }

    pub async fn delete(&self, id: Gid) -> CoreResult<DeleteCounts> {
        self.svc.delete_record::<Evidence>(id).await
    }

    pub async fn current_state(&self, id: Gid) -> CoreResult<EvidenceState> {
        transitions::current_state(self.svc, id).await
    }

    pub async fn state_transitions(
        &self,
        id: Gid,
        args: &ListArgs,
    ) -> CoreResult<Page<StateTransition<EvidenceState>>> {
        transitions::state_transitions(self.svc, id, args).await
    }

    pub async fn record_transition(
        &self,
        id: Gid,
        to_state: EvidenceState,
        reason: Option<String>,
    ) -> CoreResult<StateTransition<EvidenceState>> {
        transitions::record_transition(self.svc, id, to_state, reason).await
    }
}
