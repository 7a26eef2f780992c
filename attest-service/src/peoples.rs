//! People

use crate::pagination::ListArgs;
use crate::validation;
use crate::TenantService;
use attest_core::{
    timestamp_now, CoreError, CoreResult, DeleteCounts, EntityType, Gid, Page, People,
    PeopleKind, PeoplePatch,
};
use attest_storage::Store;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePeopleRequest {
    pub organization_id: Gid,
    pub kind: PeopleKind,
    pub full_name: String,
    pub primary_email_address: String,
    #[serde(default)]
    pub additional_email_addresses: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePeopleRequest {
    pub kind: Option<PeopleKind>,
    pub full_name: Option<String>,
    pub primary_email_address: Option<String>,
    pub additional_email_addresses: Option<Vec<String>>,
}

fn require_email(field: &str, value: &str) -> CoreResult<String> {
    let value = validation::require_name(field, value)?;
    match value.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(value),
        _ => Err(CoreError::invalid_argument(field, "not an email address")),
    }
}

fn require_emails(field: &str, values: Vec<String>) -> CoreResult<Vec<String>> {
    values.iter().map(|v| require_email(field, v)).collect()
}

pub struct PeopleService<'a, S: Store> {
    pub(crate) svc: &'a TenantService<S>,
}

impl<S: Store> PeopleService<'_, S> {
    pub async fn create(&self, req: CreatePeopleRequest) -> CoreResult<People> {
        let scope = self.svc.scope();
        validation::require_id(
            scope,
            req.organization_id,
            EntityType::Organization,
            "organization_id",
        )?;
        let now = timestamp_now();
        let people = People {
            id: scope.mint(EntityType::People),
            organization_id: req.organization_id,
            kind: req.kind,
            full_name: validation::require_name("full_name", &req.full_name)?,
            primary_email_address: require_email(
                "primary_email_address",
                &req.primary_email_address,
            )?,
            additional_email_addresses: require_emails(
                "additional_email_addresses",
                req.additional_email_addresses,
            )?,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.svc.create_record(people, None).await
    }

    pub async fn get(&self, id: Gid) -> CoreResult<People> {
        self.svc.get_record(id).await
    }

    pub async fn list_for_organization(
        &self,
        organization_id: Gid,
        args: &ListArgs,
    ) -> CoreResult<Page<People>> {
        self.svc.list_records(organization_id, None, args).await
    }

    pub async fn update(
        &self,
        id: Gid,
        expected_version: i32,
        req: UpdatePeopleRequest,
    ) -> CoreResult<People> {
        let patch = PeoplePatch {
            kind: req.kind,
            full_name: validation::optional_name("full_name", req.full_name)?,
            primary_email_address: req
                .primary_email_address
                .map(|v| require_email("primary_email_address", &v))
                .transpose()?,
            additional_email_addresses: req
                .additional_email_addresses
                .map(|v| require_emails("additional_email_addresses", v))
                .transpose()?,
        };
        self.svc
            .update_record::<People>(id, expected_version, patch, None)
            .await
    }

    /// Fails while a policy is owned by this person; tasks assigned to
    /// them become unassigned.
    pub async fn delete(&self, id: Gid) -> CoreResult<DeleteCounts> {
        self.svc.delete_record::<People>(id).await
    }
}
