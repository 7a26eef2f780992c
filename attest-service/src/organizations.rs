//! Organizations

use crate::validation;
use crate::TenantService;
use attest_core::{
    timestamp_now, CoreResult, EntityType, Gid, Organization, OrganizationPatch, Record, Scope,
    TenantId,
};
use attest_storage::Store;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrganizationRequest {
    pub name: String,
    pub logo_ref: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrganizationRequest {
    pub name: Option<String>,
    /// `Some(None)` removes the logo
    #[serde(default)]
    pub logo_ref: Option<Option<String>>,
}

/// Create an organization under a freshly minted tenant.
pub(crate) async fn create<S: Store>(
    store: &S,
    req: CreateOrganizationRequest,
) -> CoreResult<Organization> {
    let name = validation::require_name("name", &req.name)?;
    let scope = Scope::new(TenantId::generate());
    let now = timestamp_now();
    let organization = Organization {
        id: Gid::new(scope.tenant_id(), EntityType::Organization),
        name,
        logo_ref: req.logo_ref,
        version: 1,
        created_at: now,
        updated_at: now,
    };
    let created = store.insert(&scope, &organization, None).await?;
    tracing::info!(
        tenant_id = %scope.tenant_id(),
        organization_id = %created.id(),
        "Created organization"
    );
    Ok(created)
}

pub struct OrganizationService<'a, S: Store> {
    pub(crate) svc: &'a TenantService<S>,
}

impl<S: Store> OrganizationService<'_, S> {
    pub async fn get(&self, id: Gid) -> CoreResult<Organization> {
        self.svc.get_record(id).await
    }

    pub async fn update(
        &self,
        id: Gid,
        expected_version: i32,
        req: UpdateOrganizationRequest,
    ) -> CoreResult<Organization> {
        let patch = OrganizationPatch {
            name: validation::optional_name("name", req.name)?,
            logo_ref: req.logo_ref,
        };
        self.svc
            .update_record::<Organization>(id, expected_version, patch, None)
            .await
    }
}
