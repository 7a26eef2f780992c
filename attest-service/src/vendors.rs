//! Vendors

use crate::pagination::ListArgs;
use crate::validation;
use crate::TenantService;
use attest_core::{
    timestamp_now, CoreResult, DeleteCounts, EntityType, Gid, Page, RiskTier, ServiceCriticality,
    Vendor, VendorPatch,
};
use attest_storage::Store;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVendorRequest {
    pub organization_id: Gid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub risk_tier: RiskTier,
    pub service_criticality: ServiceCriticality,
    pub status_page_url: Option<String>,
    pub terms_of_service_url: Option<String>,
    pub privacy_policy_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVendorRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub risk_tier: Option<RiskTier>,
    pub service_criticality: Option<ServiceCriticality>,
    #[serde(default)]
    pub status_page_url: Option<Option<String>>,
    #[serde(default)]
    pub terms_of_service_url: Option<Option<String>>,
    #[serde(default)]
    pub privacy_policy_url: Option<Option<String>>,
}

pub struct VendorService<'a, S: Store> {
    pub(crate) svc: &'a TenantService<S>,
}

impl<S: Store> VendorService<'_, S> {
    pub async fn create(&self, req: CreateVendorRequest) -> CoreResult<Vendor> {
        let scope = self.svc.scope();
        validation::require_id(
            scope,
            req.organization_id,
            EntityType::Organization,
            "organization_id",
        )?;
        let now = timestamp_now();
        let vendor = Vendor {
            id: scope.mint(EntityType::Vendor),
            organization_id: req.organization_id,
            name: validation::require_name("name", &req.name)?,
            description: req.description,
            risk_tier: req.risk_tier,
            service_criticality: req.service_criticality,
            status_page_url: req.status_page_url,
            terms_of_service_url: req.terms_of_service_url,
            privacy_policy_url: req.privacy_policy_url,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.svc.create_record(vendor, None).await
    }

    pub async fn get(&self, id: Gid) -> CoreResult<Vendor> {
        self.svc.get_record(id).await
    }

    pub async fn list_for_organization(
        &self,
        organization_id: Gid,
        args: &ListArgs,
    ) -> CoreResult<Page<Vendor>> {
        self.svc.list_records(organization_id, None, args).await
    }

    pub async fn update(
        &self,
        id: Gid,
        expected_version: i32,
        req: UpdateVendorRequest,
    ) -> CoreResult<Vendor> {
        let patch = VendorPatch {
            name: validation::optional_name("name", req.name)?,
            description: req.description,
            risk_tier: req.risk_tier,
            service_criticality: req.service_criticality,
            status_page_url: req.status_page_url,
            terms_of_service_url: req.terms_of_service_url,
            privacy_policy_url: req.privacy_policy_url,
        };
        self.svc
            .update_record::<Vendor>(id, expected_version, patch, None)
            .await
    }

    pub async fn delete(&self, id: Gid) -> CoreResult<DeleteCounts> {
        self.svc.delete_record::<Vendor>(id).await
    }
}
