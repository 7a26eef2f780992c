//! Request validation at the service boundary

use attest_core::{CoreError, CoreResult, EntityType, Gid, Scope};

/// Trimmed, non-empty text.
pub fn require_name(field: &str, value: &str) -> CoreResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoreError::invalid_argument(field, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

pub fn optional_name(field: &str, value: Option<String>) -> CoreResult<Option<String>> {
    value.map(|v| require_name(field, &v)).transpose()
}

/// A caller-supplied id must name the expected entity type and belong to
/// the caller's tenant. Ids of other tenants are reported as not found.
pub fn require_id(scope: &Scope, id: Gid, expected: EntityType, field: &str) -> CoreResult<()> {
    if id.entity_type() != expected {
        return Err(CoreError::invalid_argument(
            field,
            format!("expected a {} id, got a {} id", expected, id.entity_type()),
        ));
    }
    scope.ensure_owns(&id)
}

pub fn require_version(expected_version: i32) -> CoreResult<()> {
    if expected_version < 1 {
        return Err(CoreError::invalid_argument(
            "expected_version",
            "must be at least 1",
        ));
    }
    Ok(())
}

pub fn require_non_negative(field: &str, value: i64) -> CoreResult<()> {
    if value < 0 {
        return Err(CoreError::invalid_argument(field, "must not be negative"));
    }
    Ok(())
}
