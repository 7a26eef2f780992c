//! Compliance entities and their patches.

use crate::enums::{
    ControlImportance, ControlState, EntityType, EvidenceState, PeopleKind, PolicyStatus,
    RiskTier, ServiceCriticality, TaskState,
};
use crate::error::CoreResult;
use crate::gid::{Gid, TenantId};
use crate::page::{CursorValue, OrderField, Paginated};
use crate::record::{
    Column, ColumnKind, Deletable, Listable, Record, RowValues, CREATED_AT, ID, UPDATED_AT,
    VERSION,
};
use crate::sql::SqlParam;
use crate::transition::{NewTransition, TransitionLog};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Implements [`Paginated`] on timestamps plus the listed text fields.
macro_rules! paginated {
    ($ty:ty $(, $field:ident => $attr:ident)*) => {
        impl Paginated for $ty {
            fn cursor_id(&self) -> Gid {
                self.id
            }

            fn cursor_value(&self, field: OrderField) -> Option<CursorValue> {
                match field {
                    OrderField::CreatedAt => Some(CursorValue::Timestamp(self.created_at)),
                    OrderField::UpdatedAt => Some(CursorValue::Timestamp(self.updated_at)),
                    $(OrderField::$field => Some(CursorValue::Text(self.$attr.clone())),)*
                    #[allow(unreachable_patterns)]
                    _ => None,
                }
            }
        }
    };
}

fn push_set<T: Into<SqlParam> + Clone>(
    out: &mut Vec<(&'static str, SqlParam)>,
    column: &'static str,
    value: &Option<T>,
) {
    if let Some(v) = value {
        out.push((column, v.clone().into()));
    }
}

// ============================================================================
// ORGANIZATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: Gid,
    pub name: String,
    /// Blob storage reference for the logo
    pub logo_ref: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    /// The tenant this organization owns.
    pub fn tenant_id(&self) -> TenantId {
        self.id.tenant_id()
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrganizationPatch {
    pub name: Option<String>,
    pub logo_ref: Option<Option<String>>,
}

paginated!(Organization, Name => name);

impl Record for Organization {
    type Patch = OrganizationPatch;

    const ENTITY_TYPE: EntityType = EntityType::Organization;
    const TABLE: &'static str = "organizations";
    const COLUMNS: &'static [Column] = &[
        ID,
        Column::new("name", ColumnKind::Text),
        Column::new("logo_ref", ColumnKind::OptText),
        VERSION,
        CREATED_AT,
        UPDATED_AT,
    ];
    const ORDER_FIELDS: &'static [OrderField] =
        &[OrderField::CreatedAt, OrderField::UpdatedAt, OrderField::Name];

    fn id(&self) -> Gid {
        self.id
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn to_row(&self) -> RowValues {
        RowValues::new()
            .with("id", self.id)
            .with("name", self.name.as_str())
            .with("logo_ref", self.logo_ref.clone())
            .with("version", self.version)
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at)
    }

    fn from_row(row: &RowValues) -> CoreResult<Self> {
        Ok(Self {
            id: row.gid("id")?,
            name: row.text("name")?,
            logo_ref: row.opt_text("logo_ref")?,
            version: row.int("version")?,
            created_at: row.timestamp("created_at")?,
            updated_at: row.timestamp("updated_at")?,
        })
    }

    fn patch_row(patch: &Self::Patch) -> Vec<(&'static str, SqlParam)> {
        let mut out = Vec::new();
        push_set(&mut out, "name", &patch.name);
        if let Some(logo_ref) = &patch.logo_ref {
            out.push(("logo_ref", SqlParam::OptString(logo_ref.clone())));
        }
        out
    }
}

// ============================================================================
// FRAMEWORK
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Framework {
    pub id: Gid,
    pub organization_id: Gid,
    pub name: String,
    pub description: String,
    pub content_ref: String,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct FrameworkPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub content_ref: Option<String>,
}

paginated!(Framework, Name => name);

impl Record for Framework {
    type Patch = FrameworkPatch;

    const ENTITY_TYPE: EntityType = EntityType::Framework;
    const TABLE: &'static str = "frameworks";
    const COLUMNS: &'static [Column] = &[
        ID,
        Column::foreign("organization_id", ColumnKind::Gid, EntityType::Organization),
        Column::new("name", ColumnKind::Text),
        Column::new("description", ColumnKind::Text),
        Column::new("content_ref", ColumnKind::Text),
        VERSION,
        CREATED_AT,
        UPDATED_AT,
    ];
    const ORDER_FIELDS: &'static [OrderField] =
        &[OrderField::CreatedAt, OrderField::UpdatedAt, OrderField::Name];

    fn id(&self) -> Gid {
        self.id
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn to_row(&self) -> RowValues {
        RowValues::new()
            .with("id", self.id)
            .with("organization_id", self.organization_id)
            .with("name", self.name.as_str())
            .with("description", self.description.as_str())
            .with("content_ref", self.content_ref.as_str())
            .with("version", self.version)
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at)
    }

    fn from_row(row: &RowValues) -> CoreResult<Self> {
        Ok(Self {
            id: row.gid("id")?,
            organization_id: row.gid("organization_id")?,
            name: row.text("name")?,
            description: row.text("description")?,
            content_ref: row.text("content_ref")?,
            version: row.int("version")?,
            created_at: row.timestamp("created_at")?,
            updated_at: row.timestamp("updated_at")?,
        })
    }

    fn patch_row(patch: &Self::Patch) -> Vec<(&'static str, SqlParam)> {
        let mut out = Vec::new();
        push_set(&mut out, "name", &patch.name);
        push_set(&mut out, "description", &patch.description);
        push_set(&mut out, "content_ref", &patch.content_ref);
        out
    }
}

impl Listable for Framework {
    const PARENT_COLUMN: &'static str = "organization_id";
    const PARENT_TYPE: EntityType = EntityType::Organization;
}

// ============================================================================
// CONTROL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Control {
    pub id: Gid,
    pub framework_id: Gid,
    pub category: String,
    pub importance: ControlImportance,
    pub name: String,
    pub description: String,
    pub content_ref: String,
    pub standards: Vec<String>,
    /// Derived from the transition log on every read
    pub state: Option<ControlState>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ControlPatch {
    pub category: Option<String>,
    pub importance: Option<ControlImportance>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub content_ref: Option<String>,
    pub standards: Option<Vec<String>>,
}

paginated!(Control, Name => name);

impl Record for Control {
    type Patch = ControlPatch;

    const ENTITY_TYPE: EntityType = EntityType::Control;
    const TABLE: &'static str = "controls";
    const COLUMNS: &'static [Column] = &[
        ID,
        Column::foreign("framework_id", ColumnKind::Gid, EntityType::Framework),
        Column::new("category", ColumnKind::Text),
        Column::new("importance", ColumnKind::Text),
        Column::new("name", ColumnKind::Text),
        Column::new("description", ColumnKind::Text),
        Column::new("content_ref", ColumnKind::Text),
        Column::new("standards", ColumnKind::TextArray),
        VERSION,
        CREATED_AT,
        UPDATED_AT,
    ];
    const STATE_LOG: Option<TransitionLog> = Some(TransitionLog::CONTROL);
    const ORDER_FIELDS: &'static [OrderField] =
        &[OrderField::CreatedAt, OrderField::UpdatedAt, OrderField::Name];

    fn id(&self) -> Gid {
        self.id
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn to_row(&self) -> RowValues {
        RowValues::new()
            .with("id", self.id)
            .with("framework_id", self.framework_id)
            .with("category", self.category.as_str())
            .with("importance", self.importance.as_str())
            .with("name", self.name.as_str())
            .with("description", self.description.as_str())
            .with("content_ref", self.content_ref.as_str())
            .with("standards", self.standards.clone())
            .with("version", self.version)
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at)
    }

    fn from_row(row: &RowValues) -> CoreResult<Self> {
        Ok(Self {
            id: row.gid("id")?,
            framework_id: row.gid("framework_id")?,
            category: row.text("category")?,
            importance: row.parse("importance")?,
            name: row.text("name")?,
            description: row.text("description")?,
            content_ref: row.text("content_ref")?,
            standards: row.text_array("standards")?,
            state: None,
            version: row.int("version")?,
            created_at: row.timestamp("created_at")?,
            updated_at: row.timestamp("updated_at")?,
        })
    }

    fn patch_row(patch: &Self::Patch) -> Vec<(&'static str, SqlParam)> {
        let mut out = Vec::new();
        push_set(&mut out, "category", &patch.category);
        if let Some(importance) = patch.importance {
            out.push(("importance", importance.as_str().into()));
        }
        push_set(&mut out, "name", &patch.name);
        push_set(&mut out, "description", &patch.description);
        push_set(&mut out, "content_ref", &patch.content_ref);
        push_set(&mut out, "standards", &patch.standards);
        out
    }

    fn apply_state(&mut self, state: &str) -> CoreResult<()> {
        self.state = Some(state.parse()?);
        Ok(())
    }
}

impl Listable for Control {
    const PARENT_COLUMN: &'static str = "framework_id";
    const PARENT_TYPE: EntityType = EntityType::Framework;
}

// ============================================================================
// TASK
// ============================================================================

/// A unit of work. Tasks hang off controls through [`TaskLink`] rows, so
/// one task can serve several controls.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Gid,
    pub name: String,
    pub description: String,
    pub content_ref: String,
    pub time_estimate_secs: Option<i64>,
    /// People the task is assigned to
    pub assigned_to: Option<Gid>,
    pub state: Option<TaskState>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub content_ref: Option<String>,
    pub time_estimate_secs: Option<Option<i64>>,
    pub assigned_to: Option<Option<Gid>>,
}

paginated!(Task, Name => name);

impl Record for Task {
    type Patch = TaskPatch;

    const ENTITY_TYPE: EntityType = EntityType::Task;
    const TABLE: &'static str = "tasks";
    const COLUMNS: &'static [Column] = &[
        ID,
        Column::new("name", ColumnKind::Text),
        Column::new("description", ColumnKind::Text),
        Column::new("content_ref", ColumnKind::Text),
        Column::new("time_estimate_secs", ColumnKind::OptLong),
        Column::foreign("assigned_to", ColumnKind::OptGid, EntityType::People),
        VERSION,
        CREATED_AT,
        UPDATED_AT,
    ];
    const STATE_LOG: Option<TransitionLog> = Some(TransitionLog::TASK);
    const ORDER_FIELDS: &'static [OrderField] =
        &[OrderField::CreatedAt, OrderField::UpdatedAt, OrderField::Name];

    fn id(&self) -> Gid {
        self.id
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn to_row(&self) -> RowValues {
        RowValues::new()
            .with("id", self.id)
            .with("name", self.name.as_str())
            .with("description", self.description.as_str())
            .with("content_ref", self.content_ref.as_str())
            .with("time_estimate_secs", SqlParam::OptLong(self.time_estimate_secs))
            .with("assigned_to", self.assigned_to)
            .with("version", self.version)
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at)
    }

    fn from_row(row: &RowValues) -> CoreResult<Self> {
        Ok(Self {
            id: row.gid("id")?,
            name: row.text("name")?,
            description: row.text("description")?,
            content_ref: row.text("content_ref")?,
            time_estimate_secs: row.opt_long("time_estimate_secs")?,
            assigned_to: row.opt_gid("assigned_to")?,
            state: None,
            version: row.int("version")?,
            created_at: row.timestamp("created_at")?,
            updated_at: row.timestamp("updated_at")?,
        })
    }

    fn patch_row(patch: &Self::Patch) -> Vec<(&'static str, SqlParam)> {
        let mut out = Vec::new();
        push_set(&mut out, "name", &patch.name);
        push_set(&mut out, "description", &patch.description);
        push_set(&mut out, "content_ref", &patch.content_ref);
        if let Some(estimate) = patch.time_estimate_secs {
            out.push(("time_estimate_secs", SqlParam::OptLong(estimate)));
        }
        if let Some(assignee) = patch.assigned_to {
            out.push(("assigned_to", assignee.into()));
        }
        out
    }

    fn apply_state(&mut self, state: &str) -> CoreResult<()> {
        self.state = Some(state.parse()?);
        Ok(())
    }
}

/// Association of a task with one control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLink {
    pub task_id: Gid,
    pub control_id: Gid,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// EVIDENCE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub id: Gid,
    pub task_id: Gid,
    pub name: String,
    /// Blob storage key of the uploaded file
    pub object_key: String,
    pub mime_type: String,
    pub size: i64,
    pub state: Option<EvidenceState>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct EvidencePatch {
    pub name: Option<String>,
    pub object_key: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<i64>,
}

paginated!(Evidence, Name => name);

impl Record for Evidence {
    type Patch = EvidencePatch;

    const ENTITY_TYPE: EntityType = EntityType::Evidence;
    const TABLE: &'static str = "evidences";
    const COLUMNS: &'static [Column] = &[
        ID,
        Column::foreign("task_id", ColumnKind::Gid, EntityType::Task),
        Column::new("name", ColumnKind::Text),
        Column::new("object_key", ColumnKind::Text),
        Column::new("mime_type", ColumnKind::Text),
        Column::new("size", ColumnKind::Long),
        VERSION,
        CREATED_AT,
        UPDATED_AT,
    ];
    const STATE_LOG: Option<TransitionLog> = Some(TransitionLog::EVIDENCE);
    const ORDER_FIELDS: &'static [OrderField] =
        &[OrderField::CreatedAt, OrderField::UpdatedAt, OrderField::Name];

    fn id(&self) -> Gid {
        self.id
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn to_row(&self) -> RowValues {
        RowValues::new()
            .with("id", self.id)
            .with("task_id", self.task_id)
            .with("name", self.name.as_str())
            .with("object_key", self.object_key.as_str())
            .with("mime_type", self.mime_type.as_str())
            .with("size", self.size)
            .with("version", self.version)
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at)
    }

    fn from_row(row: &RowValues) -> CoreResult<Self> {
        Ok(Self {
            id: row.gid("id")?,
            task_id: row.gid("task_id")?,
            name: row.text("name")?,
            object_key: row.text("object_key")?,
            mime_type: row.text("mime_type")?,
            size: row.long("size")?,
            state: None,
            version: row.int("version")?,
            created_at: row.timestamp("created_at")?,
            updated_at: row.timestamp("updated_at")?,
        })
    }

    fn patch_row(patch: &Self::Patch) -> Vec<(&'static str, SqlParam)> {
        let mut out = Vec::new();
        push_set(&mut out, "name", &patch.name);
        push_set(&mut out, "object_key", &patch.object_key);
        push_set(&mut out, "mime_type", &patch.mime_type);
        push_set(&mut out, "size", &patch.size);
        out
    }

    fn apply_state(&mut self, state: &str) -> CoreResult<()> {
        self.state = Some(state.parse()?);
        Ok(())
    }
}

impl Listable for Evidence {
    const PARENT_COLUMN: &'static str = "task_id";
    const PARENT_TYPE: EntityType = EntityType::Task;
}

impl Deletable for Evidence {}

// ============================================================================
// VENDOR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vendor {
    pub id: Gid,
    pub organization_id: Gid,
    pub name: String,
    pub description: String,
    pub risk_tier: RiskTier,
    pub service_criticality: ServiceCriticality,
    pub status_page_url: Option<String>,
    pub terms_of_service_url: Option<String>,
    pub privacy_policy_url: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct VendorPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub risk_tier: Option<RiskTier>,
    pub service_criticality: Option<ServiceCriticality>,
    pub status_page_url: Option<Option<String>>,
    pub terms_of_service_url: Option<Option<String>>,
    pub privacy_policy_url: Option<Option<String>>,
}

paginated!(Vendor, Name => name);

impl Record for Vendor {
    type Patch = VendorPatch;

    const ENTITY_TYPE: EntityType = EntityType::Vendor;
    const TABLE: &'static str = "vendors";
    const COLUMNS: &'static [Column] = &[
        ID,
        Column::foreign("organization_id", ColumnKind::Gid, EntityType::Organization),
        Column::new("name", ColumnKind::Text),
        Column::new("description", ColumnKind::Text),
        Column::new("risk_tier", ColumnKind::Text),
        Column::new("service_criticality", ColumnKind::Text),
        Column::new("status_page_url", ColumnKind::OptText),
        Column::new("terms_of_service_url", ColumnKind::OptText),
        Column::new("privacy_policy_url", ColumnKind::OptText),
        VERSION,
        CREATED_AT,
        UPDATED_AT,
    ];
    const ORDER_FIELDS: &'static [OrderField] =
        &[OrderField::CreatedAt, OrderField::UpdatedAt, OrderField::Name];

    fn id(&self) -> Gid {
        self.id
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn to_row(&self) -> RowValues {
        RowValues::new()
            .with("id", self.id)
            .with("organization_id", self.organization_id)
            .with("name", self.name.as_str())
            .with("description", self.description.as_str())
            .with("risk_tier", self.risk_tier.as_str())
            .with("service_criticality", self.service_criticality.as_str())
            .with("status_page_url", self.status_page_url.clone())
            .with("terms_of_service_url", self.terms_of_service_url.clone())
            .with("privacy_policy_url", self.privacy_policy_url.clone())
            .with("version", self.version)
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at)
    }

    fn from_row(row: &RowValues) -> CoreResult<Self> {
        Ok(Self {
            id: row.gid("id")?,
            organization_id: row.gid("organization_id")?,
            name: row.text("name")?,
            description: row.text("description")?,
            risk_tier: row.parse("risk_tier")?,
            service_criticality: row.parse("service_criticality")?,
            status_page_url: row.opt_text("status_page_url")?,
            terms_of_service_url: row.opt_text("terms_of_service_url")?,
            privacy_policy_url: row.opt_text("privacy_policy_url")?,
            version: row.int("version")?,
            created_at: row.timestamp("created_at")?,
            updated_at: row.timestamp("updated_at")?,
        })
    }

    fn patch_row(patch: &Self::Patch) -> Vec<(&'static str, SqlParam)> {
        let mut out = Vec::new();
        push_set(&mut out, "name", &patch.name);
        push_set(&mut out, "description", &patch.description);
        if let Some(tier) = patch.risk_tier {
            out.push(("risk_tier", tier.as_str().into()));
        }
        if let Some(criticality) = patch.service_criticality {
            out.push(("service_criticality", criticality.as_str().into()));
        }
        for (column, url) in [
            ("status_page_url", &patch.status_page_url),
            ("terms_of_service_url", &patch.terms_of_service_url),
            ("privacy_policy_url", &patch.privacy_policy_url),
        ] {
            if let Some(url) = url {
                out.push((column, SqlParam::OptString(url.clone())));
            }
        }
        out
    }
}

impl Listable for Vendor {
    const PARENT_COLUMN: &'static str = "organization_id";
    const PARENT_TYPE: EntityType = EntityType::Organization;
}

impl Deletable for Vendor {}

// ============================================================================
// PEOPLE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct People {
    pub id: Gid,
    pub organization_id: Gid,
    pub kind: PeopleKind,
    pub full_name: String,
    pub primary_email_address: String,
    pub additional_email_addresses: Vec<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PeoplePatch {
    pub kind: Option<PeopleKind>,
    pub full_name: Option<String>,
    pub primary_email_address: Option<String>,
    pub additional_email_addresses: Option<Vec<String>>,
}

paginated!(People, FullName => full_name);

impl Record for People {
    type Patch = PeoplePatch;

    const ENTITY_TYPE: EntityType = EntityType::People;
    const TABLE: &'static str = "peoples";
    const COLUMNS: &'static [Column] = &[
        ID,
        Column::foreign("organization_id", ColumnKind::Gid, EntityType::Organization),
        Column::new("kind", ColumnKind::Text),
        Column::new("full_name", ColumnKind::Text),
        Column::new("primary_email_address", ColumnKind::Text),
        Column::new("additional_email_addresses", ColumnKind::TextArray),
        VERSION,
        CREATED_AT,
        UPDATED_AT,
    ];
    const ORDER_FIELDS: &'static [OrderField] =
        &[OrderField::CreatedAt, OrderField::UpdatedAt, OrderField::FullName];

    fn id(&self) -> Gid {
        self.id
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn to_row(&self) -> RowValues {
        RowValues::new()
            .with("id", self.id)
            .with("organization_id", self.organization_id)
            .with("kind", self.kind.as_str())
            .with("full_name", self.full_name.as_str())
            .with("primary_email_address", self.primary_email_address.as_str())
            .with("additional_email_addresses", self.additional_email_addresses.clone())
            .with("version", self.version)
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at)
    }

    fn from_row(row: &RowValues) -> CoreResult<Self> {
        Ok(Self {
            id: row.gid("id")?,
            organization_id: row.gid("organization_id")?,
            kind: row.parse("kind")?,
            full_name: row.text("full_name")?,
            primary_email_address: row.text("primary_email_address")?,
            additional_email_addresses: row.text_array("additional_email_addresses")?,
            version: row.int("version")?,
            created_at: row.timestamp("created_at")?,
            updated_at: row.timestamp("updated_at")?,
        })
    }

    fn patch_row(patch: &Self::Patch) -> Vec<(&'static str, SqlParam)> {
        let mut out = Vec::new();
        if let Some(kind) = patch.kind {
            out.push(("kind", kind.as_str().into()));
        }
        push_set(&mut out, "full_name", &patch.full_name);
        push_set(&mut out, "primary_email_address", &patch.primary_email_address);
        push_set(&mut out, "additional_email_addresses", &patch.additional_email_addresses);
        out
    }
}

impl Listable for People {
    const PARENT_COLUMN: &'static str = "organization_id";
    const PARENT_TYPE: EntityType = EntityType::Organization;
}

impl Deletable for People {}

// ============================================================================
// POLICY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub id: Gid,
    pub organization_id: Gid,
    pub name: String,
    pub content: String,
    pub status: PolicyStatus,
    pub review_date: Option<DateTime<Utc>>,
    /// People responsible for the policy
    pub owner_id: Gid,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PolicyPatch {
    pub name: Option<String>,
    pub content: Option<String>,
    pub status: Option<PolicyStatus>,
    pub review_date: Option<Option<DateTime<Utc>>>,
    pub owner_id: Option<Gid>,
}

paginated!(Policy, Name => name);

impl Record for Policy {
    type Patch = PolicyPatch;

    const ENTITY_TYPE: EntityType = EntityType::Policy;
    const TABLE: &'static str = "policies";
    const COLUMNS: &'static [Column] = &[
        ID,
        Column::foreign("organization_id", ColumnKind::Gid, EntityType::Organization),
        Column::new("name", ColumnKind::Text),
        Column::new("content", ColumnKind::Text),
        Column::new("status", ColumnKind::Text),
        Column::new("review_date", ColumnKind::OptTimestamp),
        Column::foreign("owner_id", ColumnKind::Gid, EntityType::People),
        VERSION,
        CREATED_AT,
        UPDATED_AT,
    ];
    const ORDER_FIELDS: &'static [OrderField] =
        &[OrderField::CreatedAt, OrderField::UpdatedAt, OrderField::Name];

    fn id(&self) -> Gid {
        self.id
    }

    fn version(&self) -> i32 {
        self.version
    }

    fn to_row(&self) -> RowValues {
        RowValues::new()
            .with("id", self.id)
            .with("organization_id", self.organization_id)
            .with("name", self.name.as_str())
            .with("content", self.content.as_str())
            .with("status", self.status.as_str())
            .with("review_date", SqlParam::OptTimestamp(self.review_date))
            .with("owner_id", self.owner_id)
            .with("version", self.version)
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at)
    }

    fn from_row(row: &RowValues) -> CoreResult<Self> {
        Ok(Self {
            id: row.gid("id")?,
            organization_id: row.gid("organization_id")?,
            name: row.text("name")?,
            content: row.text("content")?,
            status: row.parse("status")?,
            review_date: row.opt_timestamp("review_date")?,
            owner_id: row.gid("owner_id")?,
            version: row.int("version")?,
            created_at: row.timestamp("created_at")?,
            updated_at: row.timestamp("updated_at")?,
        })
    }

    fn patch_row(patch: &Self::Patch) -> Vec<(&'static str, SqlParam)> {
        let mut out = Vec::new();
        push_set(&mut out, "name", &patch.name);
        push_set(&mut out, "content", &patch.content);
        if let Some(status) = patch.status {
            out.push(("status", status.as_str().into()));
        }
        if let Some(review_date) = patch.review_date {
            out.push(("review_date", SqlParam::OptTimestamp(review_date)));
        }
        push_set(&mut out, "owner_id", &patch.owner_id);
        out
    }
}

impl Listable for Policy {
    const PARENT_COLUMN: &'static str = "organization_id";
    const PARENT_TYPE: EntityType = EntityType::Organization;
}

impl Deletable for Policy {}

// ============================================================================
// FRAMEWORK IMPORT
// ============================================================================

/// Everything a framework import writes, with ids already minted.
#[derive(Debug, Clone)]
pub struct ImportBundle {
    pub framework: Framework,
    pub controls: Vec<ImportedControl>,
}

#[derive(Debug, Clone)]
pub struct ImportedControl {
    pub control: Control,
    pub initial: NewTransition,
    pub tasks: Vec<ImportedTask>,
}

#[derive(Debug, Clone)]
pub struct ImportedTask {
    pub task: Task,
    pub initial: NewTransition,
}

impl ImportBundle {
    pub fn task_count(&self) -> usize {
        self.controls.iter().map(|c| c.tasks.len()).sum()
    }
}
