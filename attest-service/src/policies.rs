//! Policies

use crate::pagination::ListArgs;
use crate::validation;
use crate::TenantService;
use attest_core::{
    timestamp_now, CoreResult, DeleteCounts, EntityType, Gid, Page, Policy, PolicyPatch,
    PolicyStatus,
};
use attest_storage::Store;
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePolicyRequest {
    pub organization_id: Gid,
    pub name: String,
    #[serde(default)]
    pub content: String,
    pub status: PolicyStatus,
    pub review_date: Option<DateTime<Utc>>,
    pub owner_id: Gid,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePolicyRequest {
    pub name: Option<String>,
    pub content: Option<String>,
    pub status: Option<PolicyStatus>,
    #[serde(default)]
    pub review_date: Option<Option<DateTime<Utc>>>,
    pub owner_id: Option<Gid>,
}

pub struct PolicyService<'a, S: Store> {
    pub(crate) svc: &'a TenantService<S>,
}

impl<S: Store> PolicyService<'_, S> {
    pub async fn create(&self, req: CreatePolicyRequest) -> CoreResult<Policy> {
        let scope = self.svc.scope();
        validation::require_id(
            scope,
            req.organization_id,
            EntityType::Organization,
            "organization_id",
        )?;
        validation::require_id(scope, req.owner_id, EntityType::People, "owner_id")?;
        let now = timestamp_now();
        let policy = Policy {
            id: scope.mint(EntityType::Policy),
            organization_id: req.organization_id,
            name: validation::require_name("name", &req.name)?,
            content: req.content,
            status: req.status,
            review_date: req.review_date,
            owner_id: req.owner_id,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.svc.create_record(policy, None).await
    }

    pub async fn get(&self, id: Gid) -> CoreResult<Policy> {
        self.svc.get_record(id).await
    }

    pub async fn list_for_organization(
        &self,
        organization_id: Gid,
        args: &ListArgs,
    ) -> CoreResult<Page<Policy>> {
        self.svc.list_records(organization_id, None, args).await
    }

    pub async fn update(
        &self,
        id: Gid,
        expected_version: i32,
        req: UpdatePolicyRequest,
    ) -> CoreResult<Policy> {
        if let Some(owner_id) = req.owner_id {
            validation::require_id(self.svc.scope(), owner_id, EntityType::People, "owner_id")?;
        }
        let patch = PolicyPatch {
            name: validation::optional_name("name", req.name)?,
            content: req.content,
            status: req.status,
            review_date: req.review_date,
            owner_id: req.owner_id,
        };
        self.svc
            .update_record::<Policy>(id, expected_version, patch, None)
            .await
    }

    pub async fn delete(&self, id: Gid) -> CoreResult<DeleteCounts> {
        self.svc.delete_record::<Policy>(id).await
    }
}
