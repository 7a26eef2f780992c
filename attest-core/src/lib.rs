//! Attest Core - Entity Types and Query Building Blocks
//!
//! Identifiers, tenant scopes, keyset cursors, transition-log types and the
//! record descriptions shared by every store implementation. This crate does
//! no I/O.

pub mod cascade;
pub mod config;
pub mod entities;
pub mod enums;
pub mod error;
pub mod gid;
pub mod page;
pub mod record;
pub mod scope;
pub mod sql;
pub mod transition;

pub use cascade::DeleteCounts;
pub use config::PaginationConfig;
pub use entities::{
    Control, ControlPatch, Evidence, EvidencePatch, Framework, FrameworkPatch, ImportBundle,
    ImportedControl, ImportedTask, Organization, OrganizationPatch, People, PeoplePatch, Policy,
    PolicyPatch, Task, TaskLink, TaskPatch, Vendor, VendorPatch,
};
pub use enums::{
    ControlImportance, ControlState, EntityType, EvidenceState, PeopleKind, PolicyStatus,
    RiskTier, ServiceCriticality, TaskState,
};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use gid::{Gid, GidError, TenantId};
pub use page::{
    Cursor, CursorKey, CursorValue, Edge, OrderBy, OrderDirection, OrderField, Page, PageInfo,
    Paginated, Position,
};
pub use record::{timestamp_now, Column, ColumnKind, Deletable, Listable, Record, RowValues};
pub use scope::Scope;
pub use sql::{BoundQuery, NamedArgs, SqlParam};
pub use transition::{EntityState, NewTransition, StateTransition, TransitionLog, TransitionRow};
