//! Conversions between [`SqlParam`] / [`RowValues`] and tokio-postgres.

use attest_core::{
    Column, ColumnKind, CoreError, CoreResult, Gid, RowValues, SqlParam, TaskLink, TransitionRow,
};
use chrono::{DateTime, Utc};
use tokio_postgres::types::{FromSql, ToSql};
use tokio_postgres::Row;

pub trait AsToSql {
    /// Reference usable as a tokio-postgres query parameter.
    fn as_to_sql(&self) -> &(dyn ToSql + Sync);
}

impl AsToSql for SqlParam {
    fn as_to_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            SqlParam::Bytes(v) => v,
            SqlParam::OptBytes(v) => v,
            SqlParam::String(v) => v,
            SqlParam::OptString(v) => v,
            SqlParam::Int(v) => v,
            SqlParam::Long(v) => v,
            SqlParam::OptLong(v) => v,
            SqlParam::Bool(v) => v,
            SqlParam::Timestamp(v) => v,
            SqlParam::OptTimestamp(v) => v,
            SqlParam::TextArray(v) => v,
        }
    }
}

pub fn get<'a, T: FromSql<'a>>(row: &'a Row, name: &str) -> CoreResult<T> {
    row.try_get(name)
        .map_err(|e| CoreError::internal(format!("cannot decode column {}: {}", name, e)))
}

pub fn get_gid(row: &Row, name: &str) -> CoreResult<Gid> {
    let bytes: Vec<u8> = get(row, name)?;
    Gid::from_slice(&bytes).map_err(|e| CoreError::internal(format!("column {}: {}", name, e)))
}

/// Read the listed columns of `row`.
pub fn row_values(row: &Row, columns: &[Column]) -> CoreResult<RowValues> {
    let mut values = RowValues::new();
    for column in columns {
        let name = column.name;
        let value = match column.kind {
            ColumnKind::Gid => SqlParam::Bytes(get(row, name)?),
            ColumnKind::OptGid => SqlParam::OptBytes(get(row, name)?),
            ColumnKind::Text => SqlParam::String(get(row, name)?),
            ColumnKind::OptText => SqlParam::OptString(get(row, name)?),
            ColumnKind::Int => SqlParam::Int(get(row, name)?),
            ColumnKind::Long => SqlParam::Long(get(row, name)?),
            ColumnKind::OptLong => SqlParam::OptLong(get(row, name)?),
            ColumnKind::Timestamp => SqlParam::Timestamp(get::<DateTime<Utc>>(row, name)?),
            ColumnKind::OptTimestamp => {
                SqlParam::OptTimestamp(get::<Option<DateTime<Utc>>>(row, name)?)
            }
            ColumnKind::TextArray => SqlParam::TextArray(get(row, name)?),
        };
        values.set(name, value);
    }
    Ok(values)
}

pub fn transition_row(row: &Row) -> CoreResult<TransitionRow> {
    Ok(TransitionRow {
        id: get_gid(row, "id")?,
        entity_id: get_gid(row, "entity_id")?,
        from_state: get(row, "from_state")?,
        to_state: get(row, "to_state")?,
        reason: get(row, "reason")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

pub fn task_link(row: &Row) -> CoreResult<TaskLink> {
    Ok(TaskLink {
        task_id: get_gid(row, "task_id")?,
        control_id: get_gid(row, "control_id")?,
        created_at: get(row, "created_at")?,
    })
}
