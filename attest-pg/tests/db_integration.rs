//! Integration tests against a live PostgreSQL.
//!
//! Run with `ATTEST_DB_*` pointing at a scratch database and
//! `--features db-tests`. Each test works in a fresh tenant, so tests can
//! share the database and run in parallel.

#![cfg(feature = "db-tests")]

use attest_core::{ControlPatch, DeleteCounts, TransitionLog};
use attest_pg::{migrate, DbConfig, DbResultExt, PgStore};
use attest_storage::Store;
use attest_test_utils::assertions::*;
use attest_test_utils::fixtures::*;
use attest_test_utils::*;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

static MIGRATED: OnceCell<()> = OnceCell::const_new();

async fn test_store() -> CoreResult<PgStore> {
    let config = DbConfig::from_env();
    let pool = config.create_pool()?;
    MIGRATED
        .get_or_try_init(|| async {
            let mut client = pool.get().await.db_context("migrate")?;
            migrate(&mut client).await.map(|_| ())
        })
        .await?;
    Ok(PgStore::new(pool))
}

/// Organization, framework and one control saved for a fresh tenant.
async fn seeded(store: &PgStore) -> CoreResult<(Scope, Organization, Framework, Control)> {
    let scope = tenant_scope();
    let org = store.insert(&scope, &test_organization(&scope), None).await?;
    let framework = store
        .insert(&scope, &test_framework(&scope, org.id), None)
        .await?;
    let control = store
        .insert(
            &scope,
            &test_control(&scope, framework.id, "Access Review"),
            Some(&NewTransition::initial::<ControlState>(&scope)),
        )
        .await?;
    Ok((scope, org, framework, control))
}

#[tokio::test]
async fn db_health_check() -> CoreResult<()> {
    let store = test_store().await?;
    store.health_check().await
}

#[tokio::test]
async fn db_insert_get_and_update() -> CoreResult<()> {
    let store = test_store().await?;
    let (scope, _, _, control) = seeded(&store).await?;

    assert_eq!(control.state, Some(ControlState::NotStarted));
    let fetched: Control = store.get(&scope, control.id).await?;
    assert_eq!(fetched, control);

    let patch = ControlPatch {
        name: Some("Quarterly Access Review".to_string()),
        ..Default::default()
    };
    let change = NewTransition::new(&scope, ControlState::InProgress, Some("kickoff".to_string()));
    let updated: Control = store
        .update(&scope, control.id, 1, &patch, Some(&change))
        .await?;
    assert_eq!(updated.version, 2);
    assert_eq!(updated.name, "Quarterly Access Review");
    assert_eq!(updated.state, Some(ControlState::InProgress));

    let stale = store
        .update::<Control>(&scope, control.id, 1, &patch, None)
        .await;
    assert_concurrent_modification(&stale, 1);

    let history = store
        .transition_list(
            &scope,
            &TransitionLog::CONTROL,
            control.id,
            &Cursor::head(10, OrderBy::default()),
        )
        .await?;
    assert_eq!(history.len(), 2);
    let latest = history.nodes().next().map(|t| t.from_state.clone());
    assert_eq!(latest, Some(Some("NOT_STARTED".to_string())));
    Ok(())
}

#[tokio::test]
async fn db_tenants_are_isolated() -> CoreResult<()> {
    let store = test_store().await?;
    let (_, org, framework, control) = seeded(&store).await?;
    let other = tenant_scope();

    assert_not_found(&store.get::<Control>(&other, control.id).await, control.id);
    let page = store
        .list::<Control>(
            &other,
            framework.id,
            None,
            &Cursor::head(10, OrderBy::default()),
        )
        .await?;
    assert!(page.is_empty());

    let foreign = test_framework(&other, org.id);
    let result = store.insert(&other, &foreign, None).await;
    assert_invalid_argument(&result, "organization_id");
    Ok(())
}

#[tokio::test]
async fn db_list_paginates_by_name() -> CoreResult<()> {
    let store = test_store().await?;
    let (scope, _, framework, _) = seeded(&store).await?;
    for name in ["Backups", "Change Management", "Encryption", "Logging"] {
        store
            .insert(
                &scope,
                &test_control(&scope, framework.id, name),
                Some(&NewTransition::initial::<ControlState>(&scope)),
            )
            .await?;
    }

    let order = OrderBy::new(OrderField::Name, OrderDirection::Asc);
    let first = store
        .list::<Control>(&scope, framework.id, None, &Cursor::head(2, order))
        .await?;
    let names: Vec<&str> = first.nodes().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["Access Review", "Backups"]);
    assert!(first.page_info.has_next_page);

    let after = first
        .page_info
        .end_cursor
        .clone()
        .ok_or_else(|| CoreError::internal("missing end cursor"))?;
    let second = store
        .list::<Control>(
            &scope,
            framework.id,
            None,
            &Cursor::head(2, order).starting_after(after),
        )
        .await?;
    let names: Vec<&str> = second.nodes().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["Change Management", "Encryption"]);

    let implemented = store
        .list::<Control>(
            &scope,
            framework.id,
            Some("IMPLEMENTED"),
            &Cursor::head(10, order),
        )
        .await?;
    assert!(implemented.is_empty());
    Ok(())
}

#[tokio::test]
async fn db_task_delete_cascades_on_last_link() -> CoreResult<()> {
    let store = test_store().await?;
    let (scope, _, framework, control_a) = seeded(&store).await?;
    let control_b = store
        .insert(
            &scope,
            &test_control(&scope, framework.id, "Encryption"),
            Some(&NewTransition::initial::<ControlState>(&scope)),
        )
        .await?;

    let task = store
        .task_insert(
            &scope,
            &test_task(&scope, "Rotate keys"),
            control_a.id,
            &NewTransition::initial::<TaskState>(&scope),
        )
        .await?;
    store.task_link(&scope, task.id, control_b.id).await?;
    let evidence = store
        .insert(
            &scope,
            &test_evidence(&scope, task.id),
            Some(&NewTransition::initial::<EvidenceState>(&scope)),
        )
        .await?;

    let first = store.task_delete(&scope, task.id, control_a.id).await?;
    assert_eq!(
        first,
        DeleteCounts {
            link_count: 2,
            unlinked: 1,
            ..Default::default()
        }
    );
    let links = store.task_links(&scope, task.id).await?;
    assert_eq!(links.len(), 1);

    let second = store.task_delete(&scope, task.id, control_b.id).await?;
    assert_eq!(second.deleted_entities, 1);
    assert_eq!(second.deleted_transitions, 1);
    assert_not_found(&store.get::<Task>(&scope, task.id).await, task.id);
    assert_not_found(&store.get::<Evidence>(&scope, evidence.id).await, evidence.id);
    Ok(())
}

/// A second control in the seeded framework and a task linked to both.
async fn shared_task(
    store: &PgStore,
    scope: &Scope,
    framework: &Framework,
    control_a: &Control,
) -> CoreResult<(Control, Task)> {
    let control_b = store
        .insert(
            scope,
            &test_control(scope, framework.id, "Encryption"),
            Some(&NewTransition::initial::<ControlState>(scope)),
        )
        .await?;
    let task = store
        .task_insert(
            scope,
            &test_task(scope, "Rotate keys"),
            control_a.id,
            &NewTransition::initial::<TaskState>(scope),
        )
        .await?;
    store.task_link(scope, task.id, control_b.id).await?;
    Ok((control_b, task))
}

async fn joined<T>(handle: JoinHandle<CoreResult<T>>) -> CoreResult<T> {
    handle
        .await
        .map_err(|e| CoreError::internal(format!("task panicked: {}", e)))?
}

/// Deleting one control while the task is unlinked from the other must
/// leave neither a task without links nor a link to a missing task.
async fn assert_destroyed_once(
    store: &PgStore,
    scope: &Scope,
    task: &Task,
    by_control: &DeleteCounts,
    by_task: &DeleteCounts,
) -> CoreResult<()> {
    assert_eq!(by_control.deleted_tasks + by_task.deleted_entities, 1);
    assert_not_found(&store.get::<Task>(scope, task.id).await, task.id);
    let orphans = store
        .transition_list(
            scope,
            &TransitionLog::TASK,
            task.id,
            &Cursor::head(10, OrderBy::default()),
        )
        .await;
    assert_not_found(&orphans, task.id);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn db_control_delete_waits_for_linked_task_lock() -> CoreResult<()> {
    let store = test_store().await?;
    let (scope, _, framework, control_a) = seeded(&store).await?;
    let (control_b, task) = shared_task(&store, &scope, &framework, &control_a).await?;

    let pool = DbConfig::from_env().create_pool()?;
    let mut holder = pool.get().await.db_context("hold_task")?;
    let held = holder.transaction().await.db_context("hold_task")?;
    let task_bytes = task.id.as_bytes().to_vec();
    held.query("SELECT id FROM tasks WHERE id = $1 FOR UPDATE", &[&task_bytes])
        .await
        .db_context("hold_task")?;

    let (control_a_id, control_b_id, task_id) = (control_a.id, control_b.id, task.id);
    let control_delete = tokio::spawn({
        let store = store.clone();
        async move { store.control_delete(&scope, control_a_id).await }
    });
    let task_delete = tokio::spawn({
        let store = store.clone();
        async move { store.task_delete(&scope, task_id, control_b_id).await }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!control_delete.is_finished());
    assert!(!task_delete.is_finished());

    held.commit().await.db_context("hold_task")?;
    let by_control = joined(control_delete).await?;
    let by_task = joined(task_delete).await?;
    assert_eq!(by_control.deleted_entities, 1);
    assert_destroyed_once(&store, &scope, &task, &by_control, &by_task).await?;
    assert_not_found(&store.get::<Control>(&scope, control_a.id).await, control_a.id);
    let left: Control = store.get(&scope, control_b.id).await?;
    assert_eq!(left.id, control_b.id);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn db_racing_control_and_task_deletes_never_orphan() -> CoreResult<()> {
    let store = test_store().await?;
    for _ in 0..20 {
        let (scope, _, framework, control_a) = seeded(&store).await?;
        let (control_b, task) = shared_task(&store, &scope, &framework, &control_a).await?;

        let (control_a_id, control_b_id, task_id) = (control_a.id, control_b.id, task.id);
        let control_delete = tokio::spawn({
            let store = store.clone();
            async move { store.control_delete(&scope, control_a_id).await }
        });
        let task_delete = tokio::spawn({
            let store = store.clone();
            async move { store.task_delete(&scope, task_id, control_b_id).await }
        });

        let by_control = joined(control_delete).await?;
        let by_task = joined(task_delete).await?;
        assert_destroyed_once(&store, &scope, &task, &by_control, &by_task).await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn db_concurrent_transitions_chain_from_each_other() -> CoreResult<()> {
    let store = test_store().await?;
    let (scope, _, _, control) = seeded(&store).await?;
    let task = store
        .task_insert(
            &scope,
            &test_task(&scope, "Review logs"),
            control.id,
            &NewTransition::initial::<TaskState>(&scope),
        )
        .await?;

    let task_id = task.id;
    let writers: Vec<_> = (0..8)
        .map(|i| {
            let store = store.clone();
            let to_state = if i % 2 == 0 { TaskState::Done } else { TaskState::Todo };
            tokio::spawn(async move {
                let transition = NewTransition::new(&scope, to_state, None);
                store
                    .transition_record(&scope, &TransitionLog::TASK, task_id, &transition)
                    .await
            })
        })
        .collect();
    for writer in writers {
        joined(writer).await?;
    }

    let history = store
        .transition_list(
            &scope,
            &TransitionLog::TASK,
            task.id,
            &Cursor::head(20, OrderBy::default()),
        )
        .await?;
    let mut chain: Vec<TransitionRow> = history.nodes().cloned().collect();
    chain.reverse();
    assert_eq!(chain.len(), 9);
    assert_eq!(chain[0].from_state, None);
    for pair in chain.windows(2) {
        assert_eq!(pair[1].from_state.as_deref(), Some(pair[0].to_state.as_str()));
        assert!(pair[1].created_at > pair[0].created_at);
    }
    let current = store
        .current_state(&scope, &TransitionLog::TASK, task.id)
        .await?;
    assert_eq!(chain.last().map(|t| t.to_state.clone()), Some(current));
    Ok(())
}

#[tokio::test]
async fn db_framework_import_and_delete() -> CoreResult<()> {
    let store = test_store().await?;
    let (scope, org, _, _) = seeded(&store).await?;
    let bundle = test_import_bundle(&scope, org.id, 3, 2);

    let framework = store.framework_import(&scope, &bundle).await?;
    let controls = store
        .list::<Control>(
            &scope,
            framework.id,
            None,
            &Cursor::head(10, OrderBy::default()),
        )
        .await?;
    assert_eq!(controls.len(), 3);

    let counts = store.framework_delete(&scope, framework.id).await?;
    assert_eq!(counts.deleted_tasks, 6);
    assert_eq!(counts.deleted_links, 6);
    assert_eq!(counts.deleted_entities, 4);
    assert_not_found(
        &store.get::<Framework>(&scope, framework.id).await,
        framework.id,
    );
    Ok(())
}

#[tokio::test]
async fn db_people_references() -> CoreResult<()> {
    let store = test_store().await?;
    let (scope, org, _, control) = seeded(&store).await?;
    let owner = store
        .insert(&scope, &test_people(&scope, org.id, "Ada Lovelace"), None)
        .await?;
    let policy = store
        .insert(&scope, &test_policy(&scope, org.id, owner.id), None)
        .await?;
    let mut task = test_task(&scope, "Review policy");
    task.assigned_to = Some(owner.id);
    let task = store
        .task_insert(
            &scope,
            &task,
            control.id,
            &NewTransition::initial::<TaskState>(&scope),
        )
        .await?;

    assert_kind(
        &store.delete::<People>(&scope, owner.id).await,
        ErrorKind::InvalidArgument,
    );

    store.delete::<Policy>(&scope, policy.id).await?;
    store.delete::<People>(&scope, owner.id).await?;
    let task: Task = store.get(&scope, task.id).await?;
    assert_eq!(task.assigned_to, None);
    Ok(())
}
