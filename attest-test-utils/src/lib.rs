//! Attest Test Utilities
//!
//! Shared test infrastructure for the Attest workspace:
//! - Proptest generators for identifiers, states and cursor keys
//! - Fixtures building valid, unsaved entities for a tenant
//! - Assertions on [`CoreError`] kinds

// Re-export mock storage from its source crate
pub use attest_storage::MockStorage;

// Re-export core types for convenience
pub use attest_core::{
    timestamp_now, Control, ControlImportance, ControlState, CoreError, CoreResult, Cursor,
    CursorKey, CursorValue, EntityType, ErrorKind, Evidence, EvidenceState, Framework, Gid,
    ImportBundle, ImportedControl, ImportedTask, NewTransition, OrderBy, OrderDirection,
    OrderField, Organization, People, PeopleKind, Policy, PolicyStatus, RiskTier, Scope,
    ServiceCriticality, Task, TaskState, TenantId, TransitionRow, Vendor,
};

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Attest types.

    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use proptest::prelude::*;

    // === Identity Generators ===

    pub fn arb_tenant_id() -> impl Strategy<Value = TenantId> {
        any::<[u8; 8]>().prop_map(TenantId::from_bytes)
    }

    /// Any of the eight record types (transition types excluded).
    pub fn arb_record_type() -> impl Strategy<Value = EntityType> {
        prop::sample::select(EntityType::ALL[..8].to_vec())
    }

    pub fn arb_entity_type() -> impl Strategy<Value = EntityType> {
        prop::sample::select(EntityType::ALL.to_vec())
    }

    /// A freshly minted id of an arbitrary tenant and type.
    pub fn arb_gid() -> impl Strategy<Value = Gid> {
        (arb_tenant_id(), arb_entity_type()).prop_map(|(tenant, ty)| Gid::new(tenant, ty))
    }

    // === Time Generators ===

    /// Microsecond-precision timestamp between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        (1_577_836_800i64..1_893_456_000i64, 0u32..1_000_000).prop_map(|(secs, micros)| {
            DateTime::from_timestamp(secs, micros * 1_000).unwrap_or_else(timestamp_now)
        })
    }

    // === Enum Generators ===

    pub fn arb_control_state() -> impl Strategy<Value = ControlState> {
        prop::sample::select(ControlState::ALL.to_vec())
    }

    pub fn arb_task_state() -> impl Strategy<Value = TaskState> {
        prop::sample::select(TaskState::ALL.to_vec())
    }

    pub fn arb_evidence_state() -> impl Strategy<Value = EvidenceState> {
        prop::sample::select(EvidenceState::ALL.to_vec())
    }

    pub fn arb_order_field() -> impl Strategy<Value = OrderField> {
        prop_oneof![
            Just(OrderField::CreatedAt),
            Just(OrderField::UpdatedAt),
            Just(OrderField::Name),
            Just(OrderField::FullName),
        ]
    }

    pub fn arb_order_by() -> impl Strategy<Value = OrderBy> {
        (
            arb_order_field(),
            prop_oneof![Just(OrderDirection::Asc), Just(OrderDirection::Desc)],
        )
            .prop_map(|(field, direction)| OrderBy::new(field, direction))
    }

    // === Cursor Generators ===

    /// A cursor key whose value matches the kind of its field.
    pub fn arb_cursor_key() -> impl Strategy<Value = CursorKey> {
        (arb_gid(), arb_order_field(), arb_timestamp(), "[ -~]{0,40}").prop_map(
            |(id, field, ts, text)| {
                let value = match field {
                    OrderField::CreatedAt | OrderField::UpdatedAt => CursorValue::Timestamp(ts),
                    OrderField::Name | OrderField::FullName => CursorValue::Text(text),
                };
                CursorKey::new(id, field, value)
            },
        )
    }

    // === Transition Generators ===

    /// A task transition history of 1..16 entries, some sharing a
    /// timestamp so ties have to be broken by id.
    pub fn arb_task_history(tenant: TenantId) -> impl Strategy<Value = Vec<TransitionRow>> {
        let entity_id = Gid::new(tenant, EntityType::Task);
        prop::collection::vec((0i64..5, arb_task_state()), 1..16).prop_map(move |steps| {
            let base = timestamp_now();
            steps
                .into_iter()
                .map(|(offset, state)| {
                    let created_at = base + Duration::seconds(offset);
                    TransitionRow {
                        id: Gid::new(tenant, EntityType::TaskStateTransition),
                        entity_id,
                        from_state: None,
                        to_state: state.as_str().to_string(),
                        reason: None,
                        created_at,
                        updated_at: created_at,
                    }
                })
                .collect()
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Valid, unsaved entities with fresh ids minted for a scope.

    use super::*;

    pub fn tenant_scope() -> Scope {
        Scope::new(TenantId::generate())
    }

    /// An organization owning the tenant of `scope`.
    pub fn test_organization(scope: &Scope) -> Organization {
        let now = timestamp_now();
        Organization {
            id: scope.mint(EntityType::Organization),
            name: "Acme Corp".to_string(),
            logo_ref: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn test_framework(scope: &Scope, organization_id: Gid) -> Framework {
        let now = timestamp_now();
        Framework {
            id: scope.mint(EntityType::Framework),
            organization_id,
            name: "SOC 2".to_string(),
            description: "Trust services criteria".to_string(),
            content_ref: "soc2".to_string(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn test_control(scope: &Scope, framework_id: Gid, name: &str) -> Control {
        let now = timestamp_now();
        Control {
            id: scope.mint(EntityType::Control),
            framework_id,
            category: "Access Control".to_string(),
            importance: ControlImportance::Mandatory,
            name: name.to_string(),
            description: format!("{} control", name),
            content_ref: name.to_lowercase().replace(' ', "-"),
            standards: vec!["SOC2".to_string()],
            state: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn test_task(scope: &Scope, name: &str) -> Task {
        let now = timestamp_now();
        Task {
            id: scope.mint(EntityType::Task),
            name: name.to_string(),
            description: String::new(),
            content_ref: String::new(),
            time_estimate_secs: Some(3_600),
            assigned_to: None,
            state: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn test_evidence(scope: &Scope, task_id: Gid) -> Evidence {
        let now = timestamp_now();
        Evidence {
            id: scope.mint(EntityType::Evidence),
            task_id,
            name: "access-review.pdf".to_string(),
            object_key: format!("evidence/{}", task_id),
            mime_type: "application/pdf".to_string(),
            size: 2_048,
            state: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn test_vendor(scope: &Scope, organization_id: Gid, name: &str) -> Vendor {
        let now = timestamp_now();
        Vendor {
            id: scope.mint(EntityType::Vendor),
            organization_id,
            name: name.to_string(),
            description: String::new(),
            risk_tier: RiskTier::General,
            service_criticality: ServiceCriticality::Medium,
            status_page_url: None,
            terms_of_service_url: None,
            privacy_policy_url: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn test_people(scope: &Scope, organization_id: Gid, full_name: &str) -> People {
        let now = timestamp_now();
        People {
            id: scope.mint(EntityType::People),
            organization_id,
            kind: PeopleKind::Employee,
            full_name: full_name.to_string(),
            primary_email_address: format!(
                "{}@example.com",
                full_name.to_lowercase().replace(' ', ".")
            ),
            additional_email_addresses: vec![],
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn test_policy(scope: &Scope, organization_id: Gid, owner_id: Gid) -> Policy {
        let now = timestamp_now();
        Policy {
            id: scope.mint(EntityType::Policy),
            organization_id,
            name: "Information Security Policy".to_string(),
            content: String::new(),
            status: PolicyStatus::Draft,
            review_date: None,
            owner_id,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// A framework with `controls` controls of `tasks_per_control` tasks
    /// each, ready for `Store::framework_import`.
    pub fn test_import_bundle(
        scope: &Scope,
        organization_id: Gid,
        controls: usize,
        tasks_per_control: usize,
    ) -> ImportBundle {
        let framework = test_framework(scope, organization_id);
        let controls = (0..controls)
            .map(|c| ImportedControl {
                control: test_control(scope, framework.id, &format!("Control {}", c)),
                initial: NewTransition::initial::<ControlState>(scope),
                tasks: (0..tasks_per_control)
                    .map(|t| ImportedTask {
                        task: test_task(scope, &format!("Task {}.{}", c, t)),
                        initial: NewTransition::initial::<TaskState>(scope),
                    })
                    .collect(),
            })
            .collect();
        ImportBundle {
            framework,
            controls,
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on Attest results.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &CoreResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_kind<T: std::fmt::Debug>(result: &CoreResult<T>, kind: ErrorKind) {
        match result {
            Err(e) => assert_eq!(e.kind(), kind, "Wrong error kind: {}", e),
            Ok(v) => panic!("Expected {:?} error, got Ok({:?})", kind, v),
        }
    }

    /// Assert that a result is a NotFound error for `id`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &CoreResult<T>, id: Gid) {
        match result {
            Err(CoreError::NotFound { id: got, entity_type }) => {
                assert_eq!(*got, id, "Wrong id in NotFound error");
                assert_eq!(*entity_type, id.entity_type(), "Wrong entity type in NotFound error");
            }
            other => panic!("Expected NotFound error for {}, got: {:?}", id, other),
        }
    }

    /// Assert that a result is an InvalidArgument error naming `field`.
    #[track_caller]
    pub fn assert_invalid_argument<T: std::fmt::Debug>(result: &CoreResult<T>, field: &str) {
        match result {
            Err(CoreError::InvalidArgument { field: got, .. }) => {
                assert_eq!(got, field, "Wrong field in InvalidArgument error");
            }
            other => panic!("Expected InvalidArgument error for {}, got: {:?}", field, other),
        }
    }

    #[track_caller]
    pub fn assert_concurrent_modification<T: std::fmt::Debug>(
        result: &CoreResult<T>,
        expected_version: i32,
    ) {
        match result {
            Err(CoreError::ConcurrentModification {
                expected_version: got,
                ..
            }) => assert_eq!(*got, expected_version),
            other => panic!("Expected ConcurrentModification error, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::assertions::*;
    use super::fixtures::*;
    use super::generators::*;
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fixtures_share_the_scope_tenant() {
        let scope = tenant_scope();
        let org = test_organization(&scope);
        let bundle = test_import_bundle(&scope, org.id, 2, 3);

        assert_eq!(org.tenant_id(), scope.tenant_id());
        assert_eq!(bundle.task_count(), 6);
        assert!(bundle
            .controls
            .iter()
            .all(|c| c.control.framework_id == bundle.framework.id && scope.owns(&c.control.id)));
    }

    #[test]
    fn test_assertions_match_error_kinds() {
        let id = tenant_scope().mint(EntityType::Task);
        let missing: CoreResult<()> = Err(CoreError::not_found(id));
        assert_not_found(&missing, id);
        assert_kind(&missing, ErrorKind::NotFound);
        assert_invalid_argument::<()>(&Err(CoreError::invalid_argument("name", "empty")), "name");
        assert_ok(&Ok::<_, CoreError>(1));
    }

    proptest! {
        #[test]
        fn prop_cursor_keys_decode(key in arb_cursor_key()) {
            prop_assert_eq!(CursorKey::decode(&key.encode()).ok(), Some(key));
        }

        #[test]
        fn prop_histories_belong_to_one_task(history in arb_task_history(TenantId::generate())) {
            let entity = history[0].entity_id;
            prop_assert!(history.iter().all(|row| row.entity_id == entity));
        }
    }
}
