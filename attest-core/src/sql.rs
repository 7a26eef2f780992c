//! Named SQL arguments.
//!
//! Query fragments reference their parameters as `@name`. Fragments from a
//! [`Scope`](crate::Scope), a [`Cursor`](crate::Cursor) and the calling
//! operation are concatenated and their [`NamedArgs`] merged; [`NamedArgs::bind`]
//! then rewrites the text to positional `$n` placeholders. Binding is strict:
//! a placeholder without a value and a value without a placeholder are both
//! errors.

use crate::error::{CoreError, CoreResult};
use crate::gid::{Gid, TenantId};
use chrono::{DateTime, Utc};

/// Type-erased SQL parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// BYTEA value (identifiers)
    Bytes(Vec<u8>),
    /// Optional BYTEA value
    OptBytes(Option<Vec<u8>>),
    String(String),
    OptString(Option<String>),
    Int(i32),
    Long(i64),
    OptLong(Option<i64>),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    OptTimestamp(Option<DateTime<Utc>>),
    /// TEXT[] value
    TextArray(Vec<String>),
}

impl From<Gid> for SqlParam {
    fn from(id: Gid) -> Self {
        SqlParam::Bytes(id.as_bytes().to_vec())
    }
}

impl From<Option<Gid>> for SqlParam {
    fn from(id: Option<Gid>) -> Self {
        SqlParam::OptBytes(id.map(|id| id.as_bytes().to_vec()))
    }
}

impl From<TenantId> for SqlParam {
    fn from(id: TenantId) -> Self {
        SqlParam::Bytes(id.as_bytes().to_vec())
    }
}

impl From<&str> for SqlParam {
    fn from(value: &str) -> Self {
        SqlParam::String(value.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(value: String) -> Self {
        SqlParam::String(value)
    }
}

impl From<Option<String>> for SqlParam {
    fn from(value: Option<String>) -> Self {
        SqlParam::OptString(value)
    }
}

impl From<i32> for SqlParam {
    fn from(value: i32) -> Self {
        SqlParam::Int(value)
    }
}

impl From<i64> for SqlParam {
    fn from(value: i64) -> Self {
        SqlParam::Long(value)
    }
}

impl From<DateTime<Utc>> for SqlParam {
    fn from(value: DateTime<Utc>) -> Self {
        SqlParam::Timestamp(value)
    }
}

impl From<Vec<String>> for SqlParam {
    fn from(value: Vec<String>) -> Self {
        SqlParam::TextArray(value)
    }
}

/// Ordered set of named query arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedArgs {
    entries: Vec<(String, SqlParam)>,
}

impl NamedArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`NamedArgs::insert`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<SqlParam>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set `name`, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<SqlParam>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Merge `other` into `self`. The same name bound to two different
    /// values is a query construction error.
    pub fn merge(&mut self, other: NamedArgs) -> CoreResult<()> {
        for (name, value) in other.entries {
            if let Some(existing) = self.get(&name) {
                if *existing != value {
                    return Err(CoreError::internal(format!(
                        "conflicting values for query argument @{}",
                        name
                    )));
                }
                continue;
            }
            self.entries.push((name, value));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&SqlParam> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Rewrite `@name` placeholders in `sql` to `$n` and collect the
    /// positional parameter list.
    ///
    /// Text inside single-quoted literals is left untouched. A name used
    /// more than once maps to the same position.
    pub fn bind(&self, sql: &str) -> CoreResult<BoundQuery> {
        let mut out = String::with_capacity(sql.len());
        let mut order: Vec<&str> = Vec::new();
        let mut params: Vec<SqlParam> = Vec::new();
        let mut chars = sql.char_indices().peekable();
        let mut in_literal = false;

        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                in_literal = !in_literal;
                out.push(c);
                continue;
            }
            let starts_name = chars
                .peek()
                .map(|(_, next)| next.is_ascii_alphabetic() || *next == '_')
                .unwrap_or(false);
            if in_literal || c != '@' || !starts_name {
                out.push(c);
                continue;
            }

            let start = i + 1;
            let mut end = start;
            while let Some((j, next)) = chars.peek() {
                if next.is_ascii_alphanumeric() || *next == '_' {
                    end = j + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let name = &sql[start..end];

            let position = match order.iter().position(|n| *n == name) {
                Some(p) => p + 1,
                None => {
                    let value = self.get(name).ok_or_else(|| {
                        CoreError::internal(format!("missing query argument @{}", name))
                    })?;
                    order.push(name);
                    params.push(value.clone());
                    order.len()
                }
            };
            out.push('$');
            out.push_str(&position.to_string());
        }

        if let Some(unused) = self.names().find(|n| !order.contains(n)) {
            return Err(CoreError::internal(format!(
                "query argument @{} is not referenced",
                unused
            )));
        }

        Ok(BoundQuery { sql: out, params })
    }
}

/// Query text with positional placeholders and their values.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_bind_rewrites_and_reuses_positions() -> CoreResult<()> {
        let args = NamedArgs::new()
            .with("tenant_id", SqlParam::Bytes(vec![1, 2]))
            .with("task_id", SqlParam::Bytes(vec![3]));
        let bound = args.bind(
            "SELECT 1 FROM tasks WHERE tenant_id = @tenant_id AND id = @task_id AND tenant_id = @tenant_id",
        )?;
        assert_eq!(
            bound.sql,
            "SELECT 1 FROM tasks WHERE tenant_id = $1 AND id = $2 AND tenant_id = $1"
        );
        assert_eq!(bound.params.len(), 2);
        assert_eq!(bound.params[1], SqlParam::Bytes(vec![3]));
        Ok(())
    }

    #[test]
    fn test_bind_is_strict() {
        let missing = NamedArgs::new().bind("SELECT @nope");
        assert_eq!(missing.err().map(|e| e.kind()), Some(ErrorKind::Internal));

        let unused = NamedArgs::new().with("extra", 1i32).bind("SELECT 1");
        assert_eq!(unused.err().map(|e| e.kind()), Some(ErrorKind::Internal));
    }

    #[test]
    fn test_bind_ignores_literals_and_casts() -> CoreResult<()> {
        let args = NamedArgs::new().with("name", "x");
        let bound = args.bind("SELECT '@literal', @name::text, 'a@b'")?;
        assert_eq!(bound.sql, "SELECT '@literal', $1::text, 'a@b'");
        Ok(())
    }

    #[test]
    fn test_merge_rejects_conflicts() {
        let mut args = NamedArgs::new().with("limit", 5i64);
        assert!(args.merge(NamedArgs::new().with("limit", 5i64)).is_ok());
        assert!(args.merge(NamedArgs::new().with("limit", 6i64)).is_err());
        assert_eq!(args.len(), 1);
    }
}
