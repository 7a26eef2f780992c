//! Tasks

use crate::pagination::ListArgs;
use crate::transitions;
use crate::validation;
use crate::TenantService;
use attest_core::{
    timestamp_now, CoreResult, DeleteCounts, EntityType, Gid, NewTransition, Page,
    StateTransition, Task, TaskLink, TaskPatch, TaskState,
};
use attest_storage::Store;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub control_id: Gid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content_ref: String,
    pub time_estimate_secs: Option<i64>,
    pub assigned_to: Option<Gid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub content_ref: Option<String>,
    /// `Some(None)` clears the estimate
    #[serde(default)]
    pub time_estimate_secs: Option<Option<i64>>,
    pub state: Option<TaskState>,
    pub reason: Option<String>,
}

pub struct TaskService<'a, S: Store> {
    pub(crate) svc: &'a TenantService<S>,
}

impl<S: Store> TaskService<'_, S> {
    /// Create a task in `TODO`, linked to `req.control_id`.
    pub async fn create(&self, req: CreateTaskRequest) -> CoreResult<Task> {
        let scope = self.svc.scope();
        validation::require_id(scope, req.control_id, EntityType::Control, "control_id")?;
        if let Some(people_id) = req.assigned_to {
            validation::require_id(scope, people_id, EntityType::People, "assigned_to")?;
        }
        if let Some(secs) = req.time_estimate_secs {
            validation::require_non_negative("time_estimate_secs", secs)?;
        }
        let now = timestamp_now();
        let task = Task {
            id: scope.mint(EntityType::Task),
            name: validation::require_name("name", &req.name)?,
            description: req.description,
            content_ref: req.content_ref,
            time_estimate_secs: req.time_estimate_secs,
            assigned_to: req.assigned_to,
            state: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        let created = self
            .svc
            .store()
            .task_insert(
                scope,
                &task,
                req.control_id,
                &NewTransition::initial::<TaskState>(scope),
            )
            .await?;
        tracing::info!(
            tenant_id = %scope.tenant_id(),
            task_id = %created.id,
            control_id = %req.control_id,
            "Created task"
        );
        Ok(created)
    }

    /// Attach an existing task to another control.
    pub async fn link_to_control(&self, task_id: Gid, control_id: Gid) -> CoreResult<TaskLink> {
        let scope = self.svc.scope();
        validation::require_id(scope, task_id, EntityType::Task, "task_id")?;
        validation::require_id(scope, control_id, EntityType::Control, "control_id")?;
        let link = self.svc.store().task_link(scope, task_id, control_id).await?;
        tracing::info!(
            tenant_id = %scope.tenant_id(),
            task_id = %task_id,
            control_id = %control_id,
            "Linked task"
        );
        Ok(link)
    }

    pub async fn get(&self, id: Gid) -> CoreResult<Task> {
        self.svc.get_record(id).await
    }

    /// Controls the task is linked to, oldest link first.
    pub async fn links(&self, id: Gid) -> CoreResult<Vec<TaskLink>> {
        let scope = self.svc.scope();
        validation::require_id(scope, id, EntityType::Task, "id")?;
        self.svc.store().task_links(scope, id).await
    }

    pub async fn list_for_control(
        &self,
        control_id: Gid,
        state: Option<TaskState>,
        args: &ListArgs,
    ) -> CoreResult<Page<Task>> {
        let scope = self.svc.scope();
        validation::require_id(scope, control_id, EntityType::Control, "control_id")?;
        let cursor = self.svc.cursor(args)?;
        self.svc
            .store()
            .task_list_for_control(
                scope,
                control_id,
                state.as_ref().map(TaskState::as_str),
                &cursor,
            )
            .await
    }

    pub async fn update(
        &self,
        id: Gid,
        expected_version: i32,
        req: UpdateTaskRequest,
    ) -> CoreResult<Task> {
        if let Some(Some(secs)) = req.time_estimate_secs {
            validation::require_non_negative("time_estimate_secs", secs)?;
        }
        let patch = TaskPatch {
            name: validation::optional_name("name", req.name)?,
            description: req.description,
            content_ref: req.content_ref,
            time_estimate_secs: req.time_estimate_secs,
            assigned_to: None,
        };
        let change = req
            .state
            .map(|state| NewTransition::new(self.svc.scope(), state, req.reason));
        self.svc
            .update_record::<Task>(id, expected_version, patch, change)
            .await
    }

    pub async fn assign(&self, id: Gid, expected_version: i32, people_id: Gid) -> CoreResult<Task> {
        validation::require_id(self.svc.scope(), people_id, EntityType::People, "assigned_to")?;
        let patch = TaskPatch {
            assigned_to: Some(Some(people_id)),
            ..Default::default()
        };
        self.svc
            .update_record::<Task>(id, expected_version, patch, None)
            .await
    }

    pub async fn unassign(&self, id: Gid, expected_version: i32) -> CoreResult<Task> {
        let patch = TaskPatch {
            assigned_to: Some(None),
            ..Default::default()
        };
        self.svc
            .update_record::<Task>(id, expected_version, patch, None)
            .await
    }

    /// Remove the task from `control_id`. The task itself, with its
    /// evidences and history, is destroyed once no control links to it.
    pub async fn delete(&self, task_id: Gid, control_id: Gid) -> CoreResult<DeleteCounts> {
        let scope = self.svc.scope();
        validation::require_id(scope, task_id, EntityType::Task, "task_id")?;
        validation::require_id(scope, control_id, EntityType::Control, "control_id")?;
        let counts = self
            .svc
            .store()
            .task_delete(scope, task_id, control_id)
            .await?;
        tracing::info!(
            tenant_id = %scope.tenant_id(),
            task_id = %task_id,
            control_id = %control_id,
            link_count = counts.link_count,
            destroyed = counts.destroyed(),
            "Deleted task link"
        );
        Ok(counts)
    }

    pub async fn current_state(&self, id: Gid) -> CoreResult<TaskState> {
        transitions::current_state(self.svc, id).await
    }

    pub async fn state_transitions(
        &self,
        id: Gid,
        args: &ListArgs,
    ) -> CoreResult<Page<StateTransition<TaskState>>> {
        transitions::state_transitions(self.svc, id, args).await
    }

    pub async fn record_transition(
        &self,
        id: Gid,
        to_state: TaskState,
        reason: Option<String>,
    ) -> CoreResult<StateTransition<TaskState>> {
        transitions::record_transition(self.svc, id, to_state, reason).await
    }
}
