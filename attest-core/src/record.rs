//! Persistable records.
//!
//! Every entity describes its table through [`Record`]: the column list,
//! how to flatten itself into [`RowValues`] and back, and how a patch maps
//! onto column assignments. Both stores are written once against this
//! trait.

use crate::enums::EntityType;
use crate::error::{CoreError, CoreResult};
use crate::gid::Gid;
use crate::page::{OrderField, Paginated};
use crate::sql::SqlParam;
use crate::transition::TransitionLog;
use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::str::FromStr;

/// Current time at the precision PostgreSQL keeps (microseconds).
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

// ============================================================================
// COLUMNS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Gid,
    OptGid,
    Text,
    OptText,
    Int,
    Long,
    OptLong,
    Timestamp,
    OptTimestamp,
    TextArray,
}

/// One persisted column of a record table (besides `tenant_id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    /// Entity type a foreign key column points at
    pub references: Option<EntityType>,
}

impl Column {
    pub const fn new(name: &'static str, kind: ColumnKind) -> Self {
        Self {
            name,
            kind,
            references: None,
        }
    }

    pub const fn foreign(name: &'static str, kind: ColumnKind, target: EntityType) -> Self {
        Self {
            name,
            kind,
            references: Some(target),
        }
    }
}

pub const ID: Column = Column::new("id", ColumnKind::Gid);
pub const VERSION: Column = Column::new("version", ColumnKind::Int);
pub const CREATED_AT: Column = Column::new("created_at", ColumnKind::Timestamp);
pub const UPDATED_AT: Column = Column::new("updated_at", ColumnKind::Timestamp);

/// Column values of one row keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowValues {
    values: BTreeMap<&'static str, SqlParam>,
}

impl RowValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: impl Into<SqlParam>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &'static str, value: impl Into<SqlParam>) {
        self.values.insert(name, value.into());
    }

    pub fn get(&self, name: &str) -> Option<&SqlParam> {
        self.values.get(name)
    }

    fn require(&self, name: &str) -> CoreResult<&SqlParam> {
        self.get(name)
            .ok_or_else(|| CoreError::internal(format!("column {} missing from row", name)))
    }

    fn mismatch(name: &str, expected: &str, got: &SqlParam) -> CoreError {
        CoreError::internal(format!(
            "column {} holds {:?}, expected {}",
            name, got, expected
        ))
    }

    pub fn gid(&self, name: &str) -> CoreResult<Gid> {
        match self.require(name)? {
            SqlParam::Bytes(bytes) | SqlParam::OptBytes(Some(bytes)) => Gid::from_slice(bytes)
                .map_err(|e| CoreError::internal(format!("column {}: {}", name, e))),
            other => Err(Self::mismatch(name, "an id", other)),
        }
    }

    pub fn opt_gid(&self, name: &str) -> CoreResult<Option<Gid>> {
        match self.require(name)? {
            SqlParam::OptBytes(None) => Ok(None),
            _ => self.gid(name).map(Some),
        }
    }

    pub fn text(&self, name: &str) -> CoreResult<String> {
        match self.require(name)? {
            SqlParam::String(s) | SqlParam::OptString(Some(s)) => Ok(s.clone()),
            other => Err(Self::mismatch(name, "text", other)),
        }
    }

    pub fn opt_text(&self, name: &str) -> CoreResult<Option<String>> {
        match self.require(name)? {
            SqlParam::OptString(None) => Ok(None),
            _ => self.text(name).map(Some),
        }
    }

    pub fn int(&self, name: &str) -> CoreResult<i32> {
        match self.require(name)? {
            SqlParam::Int(v) => Ok(*v),
            other => Err(Self::mismatch(name, "an integer", other)),
        }
    }

    pub fn long(&self, name: &str) -> CoreResult<i64> {
        match self.require(name)? {
            SqlParam::Long(v) | SqlParam::OptLong(Some(v)) => Ok(*v),
            other => Err(Self::mismatch(name, "a bigint", other)),
        }
    }

    pub fn opt_long(&self, name: &str) -> CoreResult<Option<i64>> {
        match self.require(name)? {
            SqlParam::OptLong(None) => Ok(None),
            _ => self.long(name).map(Some),
        }
    }

    pub fn timestamp(&self, name: &str) -> CoreResult<DateTime<Utc>> {
        match self.require(name)? {
            SqlParam::Timestamp(v) | SqlParam::OptTimestamp(Some(v)) => Ok(*v),
            other => Err(Self::mismatch(name, "a timestamp", other)),
        }
    }

    pub fn opt_timestamp(&self, name: &str) -> CoreResult<Option<DateTime<Utc>>> {
        match self.require(name)? {
            SqlParam::OptTimestamp(None) => Ok(None),
            _ => self.timestamp(name).map(Some),
        }
    }

    pub fn text_array(&self, name: &str) -> CoreResult<Vec<String>> {
        match self.require(name)? {
            SqlParam::TextArray(v) => Ok(v.clone()),
            other => Err(Self::mismatch(name, "a text array", other)),
        }
    }

    /// Parse a text column into one of the string-backed enums.
    pub fn parse<T>(&self, name: &str) -> CoreResult<T>
    where
        T: FromStr<Err = CoreError>,
    {
        let raw = self.text(name)?;
        raw.parse()
            .map_err(|e| CoreError::internal(format!("column {}: {}", name, e)))
    }
}

// ============================================================================
// RECORD TRAITS
// ============================================================================

/// A versioned entity persisted in its own table.
pub trait Record: Paginated + Serialize + Clone + Debug + Send + Sync + 'static {
    /// Partial update; `None` fields are left untouched.
    type Patch: Debug + Clone + Default + Send + Sync;

    const ENTITY_TYPE: EntityType;
    const TABLE: &'static str;
    /// Columns in insert order, `tenant_id` excluded.
    const COLUMNS: &'static [Column];
    /// Transition log the current state is derived from, for stateful
    /// entities.
    const STATE_LOG: Option<TransitionLog> = None;
    const ORDER_FIELDS: &'static [OrderField] = &[OrderField::CreatedAt, OrderField::UpdatedAt];

    fn id(&self) -> Gid;

    fn version(&self) -> i32;

    fn to_row(&self) -> RowValues;

    fn from_row(row: &RowValues) -> CoreResult<Self>;

    /// Column assignments for the fields set in `patch`.
    fn patch_row(patch: &Self::Patch) -> Vec<(&'static str, SqlParam)>;

    /// Install the derived state read alongside the row.
    fn apply_state(&mut self, _state: &str) -> CoreResult<()> {
        Ok(())
    }

    fn supports_order(field: OrderField) -> bool {
        Self::ORDER_FIELDS.contains(&field)
    }
}

/// Records listed under a single parent column.
pub trait Listable: Record {
    const PARENT_COLUMN: &'static str;
    const PARENT_TYPE: EntityType;
}

/// Records that can be deleted on their own, without a cascade.
pub trait Deletable: Record {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gid::TenantId;

    #[test]
    fn test_timestamp_now_has_microsecond_precision() {
        let now = timestamp_now();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn test_row_values_accessors() -> CoreResult<()> {
        let id = Gid::new(TenantId::generate(), EntityType::Task);
        let row = RowValues::new()
            .with("id", id)
            .with("assigned_to", Option::<Gid>::None)
            .with("name", "review access")
            .with("description", SqlParam::OptString(None))
            .with("version", 3i32)
            .with("size", SqlParam::OptLong(Some(7)))
            .with("standards", vec!["ISO27001".to_string()]);

        assert_eq!(row.gid("id")?, id);
        assert_eq!(row.opt_gid("assigned_to")?, None);
        assert_eq!(row.text("name")?, "review access");
        assert_eq!(row.opt_text("description")?, None);
        assert_eq!(row.int("version")?, 3);
        assert_eq!(row.long("size")?, 7);
        assert_eq!(row.text_array("standards")?, vec!["ISO27001".to_string()]);
        Ok(())
    }

    #[test]
    fn test_row_values_type_errors_are_internal() {
        let row = RowValues::new().with("version", "three");
        assert!(row.int("version").is_err());
        assert!(row.text("missing").is_err());
        assert!(row.gid("version").is_err());
    }
}
