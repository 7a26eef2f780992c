//! Attest Service - Tenant-Scoped Operations
//!
//! [`Service`] owns a [`Store`] and hands out a [`TenantService`] per
//! request. Every entity service borrows the tenant service, so each call
//! runs under exactly one [`Scope`].
//!
//! ```ignore
//! let service = Service::new(store);
//! let org = service.create_organization(request).await?;
//! let tenant = service.with_tenant(org.tenant_id());
//! let page = tenant.frameworks().list_for_organization(org.id, &ListArgs::first(10)).await?;
//! ```

pub mod controls;
pub mod evidences;
pub mod frameworks;
pub mod import;
pub mod organizations;
pub mod pagination;
pub mod peoples;
pub mod policies;
pub mod tasks;
pub mod telemetry;
mod transitions;
pub mod validation;
pub mod vendors;

pub use controls::{ControlService, CreateControlRequest, UpdateControlRequest};
pub use evidences::{CreateEvidenceRequest, EvidenceService, UpdateEvidenceRequest};
pub use frameworks::{CreateFrameworkRequest, FrameworkService, UpdateFrameworkRequest};
pub use import::FrameworkDocument;
pub use organizations::{CreateOrganizationRequest, OrganizationService, UpdateOrganizationRequest};
pub use pagination::ListArgs;
pub use peoples::{CreatePeopleRequest, PeopleService, UpdatePeopleRequest};
pub use policies::{CreatePolicyRequest, PolicyService, UpdatePolicyRequest};
pub use tasks::{CreateTaskRequest, TaskService, UpdateTaskRequest};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
pub use vendors::{CreateVendorRequest, UpdateVendorRequest, VendorService};

use attest_core::{
    CoreResult, Cursor, DeleteCounts, Deletable, Gid, Listable, NewTransition, Organization,
    Page, PaginationConfig, Record, Scope, TenantId,
};
use attest_storage::Store;
use std::sync::Arc;

/// Entry point shared by all requests.
pub struct Service<S: Store> {
    store: Arc<S>,
    pagination: PaginationConfig,
}

impl<S: Store> Clone for Service<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            pagination: self.pagination,
        }
    }
}

impl<S: Store> Service<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            pagination: PaginationConfig::default(),
        }
    }

    pub fn with_pagination(store: S, pagination: PaginationConfig) -> CoreResult<Self> {
        pagination.validate()?;
        Ok(Self {
            store: Arc::new(store),
            pagination,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Operations bound to one tenant.
    pub fn with_tenant(&self, tenant_id: TenantId) -> TenantService<S> {
        TenantService {
            store: Arc::clone(&self.store),
            scope: Scope::new(tenant_id),
            pagination: self.pagination,
        }
    }

    /// Create an organization in a tenant of its own.
    pub async fn create_organization(
        &self,
        req: CreateOrganizationRequest,
    ) -> CoreResult<Organization> {
        organizations::create(self.store.as_ref(), req).await
    }

    pub async fn health_check(&self) -> CoreResult<()> {
        self.store.health_check().await
    }
}

/// Operations of one tenant.
pub struct TenantService<S: Store> {
    store: Arc<S>,
    scope: Scope,
    pagination: PaginationConfig,
}

impl<S: Store> TenantService<S> {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn organizations(&self) -> OrganizationService<'_, S> {
        OrganizationService { svc: self }
    }

    pub fn frameworks(&self) -> FrameworkService<'_, S> {
        FrameworkService { svc: self }
    }

    pub fn controls(&self) -> ControlService<'_, S> {
        ControlService { svc: self }
    }

    pub fn tasks(&self) -> TaskService<'_, S> {
        TaskService { svc: self }
    }

    pub fn evidences(&self) -> EvidenceService<'_, S> {
        EvidenceService { svc: self }
    }

    pub fn vendors(&self) -> VendorService<'_, S> {
        VendorService { svc: self }
    }

    pub fn peoples(&self) -> PeopleService<'_, S> {
        PeopleService { svc: self }
    }

    pub fn policies(&self) -> PolicyService<'_, S> {
        PolicyService { svc: self }
    }

    // ========================================================================
    // SHARED RECORD PLUMBING
    // ========================================================================

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn cursor(&self, args: &ListArgs) -> CoreResult<Cursor> {
        args.cursor(&self.pagination)
    }

    pub(crate) async fn create_record<T: Record>(
        &self,
        record: T,
        initial: Option<NewTransition>,
    ) -> CoreResult<T> {
        let created = self
            .store
            .insert(&self.scope, &record, initial.as_ref())
            .await?;
        tracing::info!(
            tenant_id = %self.scope.tenant_id(),
            entity_id = %created.id(),
            entity_type = %T::ENTITY_TYPE,
            "Created"
        );
        Ok(created)
    }

    pub(crate) async fn get_record<T: Record>(&self, id: Gid) -> CoreResult<T> {
        validation::require_id(&self.scope, id, T::ENTITY_TYPE, "id")?;
        self.store.get(&self.scope, id).await
    }

    pub(crate) async fn list_records<T: Listable>(
        &self,
        parent_id: Gid,
        state: Option<&str>,
        args: &ListArgs,
    ) -> CoreResult<Page<T>> {
        validation::require_id(&self.scope, parent_id, T::PARENT_TYPE, T::PARENT_COLUMN)?;
        let cursor = self.cursor(args)?;
        self.store.list(&self.scope, parent_id, state, &cursor).await
    }

    pub(crate) async fn update_record<T: Record>(
        &self,
        id: Gid,
        expected_version: i32,
        patch: T::Patch,
        state_change: Option<NewTransition>,
    ) -> CoreResult<T> {
        validation::require_id(&self.scope, id, T::ENTITY_TYPE, "id")?;
        validation::require_version(expected_version)?;
        let updated = self
            .store
            .update::<T>(
                &self.scope,
                id,
                expected_version,
                &patch,
                state_change.as_ref(),
            )
            .await?;
        tracing::debug!(
            tenant_id = %self.scope.tenant_id(),
            entity_id = %id,
            version = updated.version(),
            "Updated"
        );
        Ok(updated)
    }

    pub(crate) async fn delete_record<T: Deletable>(&self, id: Gid) -> CoreResult<DeleteCounts> {
        validation::require_id(&self.scope, id, T::ENTITY_TYPE, "id")?;
        let counts = self.store.delete::<T>(&self.scope, id).await?;
        tracing::info!(
            tenant_id = %self.scope.tenant_id(),
            entity_id = %id,
            entity_type = %T::ENTITY_TYPE,
            "Deleted"
        );
        Ok(counts)
    }
}
