//! Frameworks

use crate::import::FrameworkDocument;
use crate::pagination::ListArgs;
use crate::validation;
use crate::TenantService;
use attest_core::{
    timestamp_now, CoreResult, DeleteCounts, EntityType, Framework, FrameworkPatch, Gid, Page,
};
use attest_storage::Store;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFrameworkRequest {
    pub organization_id: Gid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content_ref: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFrameworkRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub content_ref: Option<String>,
}

pub struct FrameworkService<'a, S: Store> {
    pub(crate) svc: &'a TenantService<S>,
}

impl<S: Store> FrameworkService<'_, S> {
    pub async fn create(&self, req: CreateFrameworkRequest) -> CoreResult<Framework> {
        let scope = self.svc.scope();
        validation::require_id(
            scope,
            req.organization_id,
            EntityType::Organization,
            "organization_id",
        )?;
        let now = timestamp_now();
        let framework = Framework {
            id: scope.mint(EntityType::Framework),
            organization_id: req.organization_id,
            name: validation::require_name("name", &req.name)?,
            description: req.description,
            content_ref: req.content_ref,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.svc.create_record(framework, None).await
    }

    pub async fn get(&self, id: Gid) -> CoreResult<Framework> {
        self.svc.get_record(id).await
    }

    pub async fn list_for_organization(
        &self,
        organization_id: Gid,
        args: &ListArgs,
    ) -> CoreResult<Page<Framework>> {
        self.svc.list_records(organization_id, None, args).await
    }

    pub async fn update(
        &self,
        id: Gid,
        expected_version: i32,
        req: UpdateFrameworkRequest,
    ) -> CoreResult<Framework> {
        let patch = FrameworkPatch {
            name: validation::optional_name("name", req.name)?,
            description: req.description,
            content_ref: req.content_ref,
        };
        self.svc
            .update_record::<Framework>(id, expected_version, patch, None)
            .await
    }

    /// Delete a framework with all of its controls. Tasks shared with
    /// controls of other frameworks survive.
    pub async fn delete(&self, id: Gid) -> CoreResult<DeleteCounts> {
        let scope = self.svc.scope();
        validation::require_id(scope, id, EntityType::Framework, "id")?;
        let counts = self.svc.store().framework_delete(scope, id).await?;
        tracing::info!(
            tenant_id = %scope.tenant_id(),
            framework_id = %id,
            deleted_entities = counts.deleted_entities,
            deleted_tasks = counts.deleted_tasks,
            deleted_links = counts.deleted_links,
            "Deleted framework"
        );
        Ok(counts)
    }

    /// Import a framework document into `organization_id`.
    pub async fn import(
        &self,
        organization_id: Gid,
        document: FrameworkDocument,
    ) -> CoreResult<Framework> {
        let scope = self.svc.scope();
        validation::require_id(
            scope,
            organization_id,
            EntityType::Organization,
            "organization_id",
        )?;
        document.validate()?;
        let bundle = document.into_bundle(scope, organization_id);
        let framework = self.svc.store().framework_import(scope, &bundle).await?;
        tracing::info!(
            tenant_id = %scope.tenant_id(),
            framework_id = %framework.id,
            controls = bundle.controls.len(),
            tasks = bundle.task_count(),
            "Imported framework"
        );
        Ok(framework)
    }

    /// Parse and import a JSON framework document.
    pub async fn import_json(&self, organization_id: Gid, json: &str) -> CoreResult<Framework> {
        let document = FrameworkDocument::from_json(json)?;
        self.import(organization_id, document).await
    }
}
