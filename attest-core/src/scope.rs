//! Tenant scope.

use crate::enums::EntityType;
use crate::error::{CoreError, CoreResult};
use crate::gid::{Gid, TenantId};
use crate::sql::NamedArgs;

/// The tenant boundary of one request.
///
/// Every store operation takes a `Scope`; queries splice in
/// [`Scope::sql_fragment`] and bind [`Scope::sql_arguments`]. A scope is
/// built per request and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scope {
    tenant_id: TenantId,
}

impl Scope {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn sql_fragment(&self) -> &'static str {
        "tenant_id = @tenant_id"
    }

    /// Predicate qualified with a table alias, for joins.
    pub fn qualified_sql_fragment(&self, alias: &str) -> String {
        format!("{}.tenant_id = @tenant_id", alias)
    }

    pub fn sql_arguments(&self) -> NamedArgs {
        NamedArgs::new().with("tenant_id", self.tenant_id)
    }

    /// Mint an identifier owned by this tenant.
    pub fn mint(&self, entity_type: EntityType) -> Gid {
        Gid::new(self.tenant_id, entity_type)
    }

    pub fn owns(&self, id: &Gid) -> bool {
        id.tenant_id() == self.tenant_id
    }

    /// Reject ids of other tenants as missing, so a caller cannot learn
    /// whether a foreign id exists.
    pub fn ensure_owns(&self, id: &Gid) -> CoreResult<()> {
        if !self.owns(id) {
            return Err(CoreError::not_found(*id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sql::SqlParam;

    #[test]
    fn test_fragment_and_arguments_bind_together() -> CoreResult<()> {
        let tenant = TenantId::generate();
        let scope = Scope::new(tenant);
        let sql = format!(
            "SELECT id FROM tasks t WHERE {} AND {}",
            scope.sql_fragment(),
            scope.qualified_sql_fragment("t")
        );
        let bound = scope.sql_arguments().bind(&sql)?;
        assert_eq!(
            bound.sql,
            "SELECT id FROM tasks t WHERE tenant_id = $1 AND t.tenant_id = $1"
        );
        assert_eq!(bound.params, vec![SqlParam::Bytes(tenant.as_bytes().to_vec())]);
        Ok(())
    }

    #[test]
    fn test_foreign_ids_are_not_found() {
        let scope = Scope::new(TenantId::generate());
        let mine = scope.mint(EntityType::Control);
        let theirs = Scope::new(TenantId::generate()).mint(EntityType::Control);

        assert!(scope.owns(&mine));
        assert!(scope.ensure_owns(&mine).is_ok());
        assert!(!scope.owns(&theirs));
        assert_eq!(
            scope.ensure_owns(&theirs).err().map(|e| e.kind()),
            Some(ErrorKind::NotFound)
        );
    }
}
