//! PostgreSQL implementation of [`Store`].

use crate::config::DbConfig;
use crate::error::DbResultExt;
use crate::params::{get, get_gid, row_values, task_link, transition_row, AsToSql};
use crate::query;
use ::async_trait::async_trait;
use attest_core::{
    timestamp_now, BoundQuery, Column, CoreError, CoreResult, Cursor, DeleteCounts, Deletable,
    EntityType, Framework, Gid, ImportBundle, Listable, NewTransition, Page, Record, RowValues,
    Scope, SqlParam, Task, TaskLink, TransitionLog, TransitionRow,
};
use attest_storage::{
    ensure_initial, ensure_new_id, ensure_order, ensure_transition, ensure_transition_order, Store,
};
use chrono::{DateTime, Utc};
use deadpool_postgres::{GenericClient, Pool};
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

// ============================================================================
// QUERY HELPERS
// ============================================================================

fn params(query: &BoundQuery) -> Vec<&(dyn ToSql + Sync)> {
    query.params.iter().map(|p| p.as_to_sql()).collect()
}

async fn fetch_all<C: GenericClient>(
    client: &C,
    operation: &'static str,
    query: BoundQuery,
) -> CoreResult<Vec<Row>> {
    let params = params(&query);
    client
        .query(query.sql.as_str(), &params)
        .await
        .db_context(operation)
}

async fn fetch_opt<C: GenericClient>(
    client: &C,
    operation: &'static str,
    query: BoundQuery,
) -> CoreResult<Option<Row>> {
    let params = params(&query);
    client
        .query_opt(query.sql.as_str(), &params)
        .await
        .db_context(operation)
}

async fn fetch_one<C: GenericClient>(
    client: &C,
    operation: &'static str,
    query: BoundQuery,
) -> CoreResult<Row> {
    let params = params(&query);
    client
        .query_one(query.sql.as_str(), &params)
        .await
        .db_context(operation)
}

async fn execute<C: GenericClient>(
    client: &C,
    operation: &'static str,
    query: BoundQuery,
) -> CoreResult<u64> {
    let params = params(&query);
    client
        .execute(query.sql.as_str(), &params)
        .await
        .db_context(operation)
}

fn decode<T: Record>(row: &Row) -> CoreResult<T> {
    let mut record = T::from_row(&row_values(row, T::COLUMNS)?)?;
    if T::STATE_LOG.is_some() {
        let state: String = get(row, "state")?;
        record.apply_state(&state)?;
    }
    Ok(record)
}

fn decode_page<T: Record>(rows: &[Row], cursor: &Cursor) -> CoreResult<Page<T>> {
    let records = rows.iter().map(decode::<T>).collect::<CoreResult<Vec<_>>>()?;
    Page::new(records, cursor)
}

fn delete_counts(row: &Row) -> CoreResult<DeleteCounts> {
    Ok(DeleteCounts {
        link_count: get(row, "link_count")?,
        unlinked: get(row, "unlinked")?,
        deleted_links: get(row, "deleted_links")?,
        deleted_transitions: get(row, "deleted_transitions")?,
        deleted_entities: get(row, "deleted_entities")?,
        deleted_tasks: get(row, "deleted_tasks")?,
    })
}

/// Foreign keys only prove that a row exists. Check that each referenced
/// id has the right type and belongs to the caller's tenant.
fn check_references<'a>(
    scope: &Scope,
    columns: &[Column],
    values: impl IntoIterator<Item = (&'static str, &'a SqlParam)>,
) -> CoreResult<()> {
    for (name, value) in values {
        let Some(target) = columns
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.references)
        else {
            continue;
        };
        let Some(id) = RowValues::new().with(name, value.clone()).opt_gid(name)? else {
            continue;
        };
        if id.entity_type() != target || !scope.owns(&id) {
            return Err(CoreError::invalid_argument(
                name,
                format!("references a missing {}", target),
            ));
        }
    }
    Ok(())
}

async fn exists<C: GenericClient>(
    client: &C,
    scope: &Scope,
    id: Gid,
    lock: bool,
) -> CoreResult<bool> {
    if !scope.owns(&id) {
        return Ok(false);
    }
    let query = query::exists(scope, id.entity_type().table(), id, lock)?;
    Ok(fetch_opt(client, "exists", query).await?.is_some())
}

async fn require<C: GenericClient>(
    client: &C,
    scope: &Scope,
    id: Gid,
    lock: bool,
) -> CoreResult<()> {
    if !exists(client, scope, id, lock).await? {
        return Err(CoreError::not_found(id));
    }
    Ok(())
}

async fn fetch_record<T: Record, C: GenericClient>(
    client: &C,
    scope: &Scope,
    id: Gid,
) -> CoreResult<T> {
    if id.entity_type() != T::ENTITY_TYPE || !scope.owns(&id) {
        return Err(CoreError::not_found(id));
    }
    match fetch_opt(client, "get", query::select_one::<T>(scope, id)?).await? {
        Some(row) => decode(&row),
        None => Err(CoreError::not_found(id)),
    }
}

async fn insert_record<T: Record, C: GenericClient>(
    client: &C,
    scope: &Scope,
    record: &T,
) -> CoreResult<()> {
    ensure_new_id(scope, &record.id(), T::ENTITY_TYPE)?;
    let row = record.to_row();
    check_references(
        scope,
        T::COLUMNS,
        T::COLUMNS
            .iter()
            .filter_map(|c| row.get(c.name).map(|v| (c.name, v))),
    )?;
    execute(client, "insert", query::insert(scope, record)?).await?;
    Ok(())
}

async fn append_transition<C: GenericClient>(
    client: &C,
    scope: &Scope,
    log: &TransitionLog,
    entity_id: Gid,
    from_state: Option<&str>,
    transition: &NewTransition,
) -> CoreResult<TransitionRow> {
    ensure_transition(scope, log, &entity_id, transition)?;
    let query = query::insert_transition(scope, log, entity_id, from_state, transition)?;
    transition_row(&fetch_one(client, "transition_record", query).await?)
}

/// `to_state` and `created_at` of the latest transition.
async fn latest_state<C: GenericClient>(
    client: &C,
    scope: &Scope,
    log: &TransitionLog,
    entity_id: Gid,
) -> CoreResult<Option<(String, DateTime<Utc>)>> {
    let query = query::current_state(scope, log, entity_id)?;
    match fetch_opt(client, "current_state", query).await? {
        Some(row) => Ok(Some((get(&row, "to_state")?, get(&row, "created_at")?))),
        None => Ok(None),
    }
}

async fn insert_task<C: GenericClient>(
    client: &C,
    scope: &Scope,
    task: &Task,
    control_id: Gid,
    initial: &NewTransition,
) -> CoreResult<()> {
    insert_record(client, scope, task).await?;
    execute(
        client,
        "task_insert",
        query::insert_link(scope, task.id, control_id, task.created_at)?,
    )
    .await?;
    append_transition(client, scope, &TransitionLog::TASK, task.id, None, initial).await?;
    Ok(())
}

async fn delete_control<C: GenericClient>(
    client: &C,
    scope: &Scope,
    control_id: Gid,
) -> CoreResult<DeleteCounts> {
    if control_id.entity_type() != EntityType::Control {
        return Err(CoreError::not_found(control_id));
    }
    require(client, scope, control_id, true).await?;
    fetch_all(
        client,
        "control_delete",
        query::lock_control_tasks(scope, control_id)?,
    )
    .await?;
    let row = fetch_one(
        client,
        "control_delete",
        query::delete_control(scope, control_id)?,
    )
    .await?;
    let counts = delete_counts(&row)?;
    counts.verify_destroy(control_id, true)?;
    Ok(counts)
}

// ============================================================================
// PG STORE
// ============================================================================

/// [`Store`] backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> CoreResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Current pool size, for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self, operation: &'static str) -> CoreResult<deadpool_postgres::Object> {
        self.pool.get().await.db_context(operation)
    }
}

#[async_trait]
impl Store for PgStore {
    // === Record Operations ===

    async fn insert<T: Record>(
        &self,
        scope: &Scope,
        record: &T,
        initial: Option<&NewTransition>,
    ) -> CoreResult<T> {
        let log = ensure_initial::<T>(scope, initial)?;
        let mut conn = self.get_conn("insert").await?;
        let tx = conn.transaction().await.db_context("insert")?;

        insert_record(&tx, scope, record).await?;
        if let (Some(log), Some(initial)) = (log, initial) {
            append_transition(&tx, scope, &log, record.id(), None, initial).await?;
        }
        let stored = fetch_record::<T, _>(&tx, scope, record.id()).await?;

        tx.commit().await.db_context("insert")?;
        tracing::debug!(entity_type = %T::ENTITY_TYPE, id = %record.id(), "Record inserted");
        Ok(stored)
    }

    async fn get<T: Record>(&self, scope: &Scope, id: Gid) -> CoreResult<T> {
        let conn = self.get_conn("get").await?;
        fetch_record::<T, _>(&conn, scope, id).await
    }

    async fn list<T: Listable>(
        &self,
        scope: &Scope,
        parent_id: Gid,
        state: Option<&str>,
        cursor: &Cursor,
    ) -> CoreResult<Page<T>> {
        ensure_order::<T>(cursor)?;
        let query = query::select_children::<T>(scope, parent_id, state, cursor)?;
        let conn = self.get_conn("list").await?;
        let rows = fetch_all(&conn, "list", query).await?;
        decode_page(&rows, cursor)
    }

    async fn update<T: Record>(
        &self,
        scope: &Scope,
        id: Gid,
        expected_version: i32,
        patch: &T::Patch,
        state_change: Option<&NewTransition>,
    ) -> CoreResult<T> {
        if id.entity_type() != T::ENTITY_TYPE || !scope.owns(&id) {
            return Err(CoreError::not_found(id));
        }
        let changes = T::patch_row(patch);
        check_references(scope, T::COLUMNS, changes.iter().map(|(n, v)| (*n, v)))?;
        let log = match state_change {
            Some(_) => Some(T::STATE_LOG.ok_or_else(|| {
                CoreError::internal(format!("{} has no transition log", T::ENTITY_TYPE))
            })?),
            None => None,
        };

        let mut conn = self.get_conn("update").await?;
        let tx = conn.transaction().await.db_context("update")?;

        let query = query::update::<T>(scope, id, expected_version, patch, timestamp_now())?;
        if fetch_opt(&tx, "update", query).await?.is_none() {
            if exists(&tx, scope, id, false).await? {
                return Err(CoreError::ConcurrentModification {
                    entity_type: T::ENTITY_TYPE,
                    id,
                    expected_version,
                });
            }
            return Err(CoreError::not_found(id));
        }

        if let (Some(log), Some(change)) = (log, state_change) {
            let (from, after) = latest_state(&tx, scope, &log, id).await?.unzip();
            if from.as_deref() != Some(change.to_state.as_str()) {
                let change = change.stamped_after(after);
                append_transition(&tx, scope, &log, id, from.as_deref(), &change).await?;
            }
        }
        let stored = fetch_record::<T, _>(&tx, scope, id).await?;

        tx.commit().await.db_context("update")?;
        Ok(stored)
    }

    async fn delete<T: Deletable>(&self, scope: &Scope, id: Gid) -> CoreResult<DeleteCounts> {
        if id.entity_type() != T::ENTITY_TYPE || !scope.owns(&id) {
            return Err(CoreError::not_found(id));
        }
        let mut conn = self.get_conn("delete").await?;
        let tx = conn.transaction().await.db_context("delete")?;

        let row = fetch_one(&tx, "delete", query::delete::<T>(scope, id)?).await?;
        let counts = delete_counts(&row)?;
        if counts.deleted_entities == 0 {
            return Err(CoreError::not_found(id));
        }
        counts.verify_destroy(id, T::STATE_LOG.is_some())?;

        tx.commit().await.db_context("delete")?;
        tracing::debug!(entity_type = %T::ENTITY_TYPE, %id, "Record deleted");
        Ok(counts)
    }

    // === Task Operations ===

    async fn task_insert(
        &self,
        scope: &Scope,
        task: &Task,
        control_id: Gid,
        initial: &NewTransition,
    ) -> CoreResult<Task> {
        control_id.ensure_type(EntityType::Control)?;
        let mut conn = self.get_conn("task_insert").await?;
        let tx = conn.transaction().await.db_context("task_insert")?;

        require(&tx, scope, control_id, true).await?;
        insert_task(&tx, scope, task, control_id, initial).await?;
        let stored = fetch_record::<Task, _>(&tx, scope, task.id).await?;

        tx.commit().await.db_context("task_insert")?;
        Ok(stored)
    }

    async fn task_link(
        &self,
        scope: &Scope,
        task_id: Gid,
        control_id: Gid,
    ) -> CoreResult<TaskLink> {
        task_id.ensure_type(EntityType::Task)?;
        control_id.ensure_type(EntityType::Control)?;
        let mut conn = self.get_conn("task_link").await?;
        let tx = conn.transaction().await.db_context("task_link")?;

        require(&tx, scope, control_id, true).await?;
        require(&tx, scope, task_id, true).await?;
        let linked = fetch_opt(&tx, "task_link", query::link_exists(scope, task_id, control_id)?)
            .await?
            .is_some();
        if linked {
            return Err(CoreError::invalid_argument(
                "control_id",
                "task is already linked to this control",
            ));
        }
        let link = TaskLink {
            task_id,
            control_id,
            created_at: timestamp_now(),
        };
        execute(
            &tx,
            "task_link",
            query::insert_link(scope, task_id, control_id, link.created_at)?,
        )
        .await?;

        tx.commit().await.db_context("task_link")?;
        Ok(link)
    }

    async fn task_links(&self, scope: &Scope, task_id: Gid) -> CoreResult<Vec<TaskLink>> {
        let conn = self.get_conn("task_links").await?;
        require(&conn, scope, task_id, false).await?;
        let rows = fetch_all(&conn, "task_links", query::select_links(scope, task_id)?).await?;
        rows.iter().map(task_link).collect()
    }

    async fn task_list_for_control(
        &self,
        scope: &Scope,
        control_id: Gid,
        state: Option<&str>,
        cursor: &Cursor,
    ) -> CoreResult<Page<Task>> {
        ensure_order::<Task>(cursor)?;
        let query = query::select_tasks_for_control(scope, control_id, state, cursor)?;
        let conn = self.get_conn("task_list_for_control").await?;
        let rows = fetch_all(&conn, "task_list_for_control", query).await?;
        decode_page(&rows, cursor)
    }

    async fn task_delete(
        &self,
        scope: &Scope,
        task_id: Gid,
        control_id: Gid,
    ) -> CoreResult<DeleteCounts> {
        if task_id.entity_type() != EntityType::Task {
            return Err(CoreError::not_found(task_id));
        }
        let mut conn = self.get_conn("task_delete").await?;
        let tx = conn.transaction().await.db_context("task_delete")?;

        require(&tx, scope, task_id, true).await?;
        let linked = fetch_opt(&tx, "task_delete", query::link_exists(scope, task_id, control_id)?)
            .await?
            .is_some();
        if !linked {
            return Err(CoreError::not_found(task_id));
        }
        let row = fetch_one(
            &tx,
            "task_delete",
            query::delete_task_link(scope, task_id, control_id)?,
        )
        .await?;
        let counts = delete_counts(&row)?;
        counts.verify_unlink(task_id)?;

        tx.commit().await.db_context("task_delete")?;
        tracing::debug!(
            %task_id,
            %control_id,
            destroyed = counts.destroyed(),
            "Task removed from control"
        );
        Ok(counts)
    }

    async fn control_delete(&self, scope: &Scope, control_id: Gid) -> CoreResult<DeleteCounts> {
        let mut conn = self.get_conn("control_delete").await?;
        let tx = conn.transaction().await.db_context("control_delete")?;

        let counts = delete_control(&tx, scope, control_id).await?;

        tx.commit().await.db_context("control_delete")?;
        tracing::debug!(%control_id, deleted_tasks = counts.deleted_tasks, "Control deleted");
        Ok(counts)
    }

    async fn framework_delete(
        &self,
        scope: &Scope,
        framework_id: Gid,
    ) -> CoreResult<DeleteCounts> {
        if framework_id.entity_type() != EntityType::Framework {
            return Err(CoreError::not_found(framework_id));
        }
        let mut conn = self.get_conn("framework_delete").await?;
        let tx = conn.transaction().await.db_context("framework_delete")?;

        require(&tx, scope, framework_id, true).await?;
        let rows = fetch_all(
            &tx,
            "framework_delete",
            query::select_control_ids(scope, framework_id)?,
        )
        .await?;
        let mut total = DeleteCounts::default();
        for row in &rows {
            let control_id = get_gid(row, "id")?;
            total.accumulate(&delete_control(&tx, scope, control_id).await?);
        }

        let removed = execute(
            &tx,
            "framework_delete",
            query::delete_row(scope, Framework::TABLE, framework_id)?,
        )
        .await?;
        if removed != 1 {
            return Err(CoreError::IncompleteCascade {
                entity_type: EntityType::Framework,
                id: framework_id,
                reason: format!("removed {} framework rows", removed),
            });
        }
        total.deleted_entities += 1;

        tx.commit().await.db_context("framework_delete")?;
        tracing::info!(
            %framework_id,
            controls = rows.len(),
            deleted_tasks = total.deleted_tasks,
            "Framework deleted"
        );
        Ok(total)
    }

    async fn framework_import(
        &self,
        scope: &Scope,
        bundle: &ImportBundle,
    ) -> CoreResult<Framework> {
        let mut conn = self.get_conn("framework_import").await?;
        let tx = conn.transaction().await.db_context("framework_import")?;

        insert_record(&tx, scope, &bundle.framework).await?;
        for imported in &bundle.controls {
            insert_record(&tx, scope, &imported.control).await?;
            append_transition(
                &tx,
                scope,
                &TransitionLog::CONTROL,
                imported.control.id,
                None,
                &imported.initial,
            )
            .await?;
        }
        for imported in &bundle.controls {
            for task in &imported.tasks {
                insert_task(&tx, scope, &task.task, imported.control.id, &task.initial).await?;
            }
        }
        let framework = fetch_record::<Framework, _>(&tx, scope, bundle.framework.id).await?;

        tx.commit().await.db_context("framework_import")?;
        tracing::info!(
            framework_id = %framework.id,
            controls = bundle.controls.len(),
            "Framework imported"
        );
        Ok(framework)
    }

    // === Transition Log Operations ===

    async fn transition_record(
        &self,
        scope: &Scope,
        log: &TransitionLog,
        entity_id: Gid,
        transition: &NewTransition,
    ) -> CoreResult<TransitionRow> {
        ensure_transition(scope, log, &entity_id, transition)?;
        let mut conn = self.get_conn("transition_record").await?;
        let tx = conn.transaction().await.db_context("transition_record")?;

        require(&tx, scope, entity_id, true).await?;
        let (from_state, after) = latest_state(&tx, scope, log, entity_id).await?.unzip();
        let transition = transition.stamped_after(after);
        let row = append_transition(
            &tx,
            scope,
            log,
            entity_id,
            from_state.as_deref(),
            &transition,
        )
        .await?;

        tx.commit().await.db_context("transition_record")?;
        Ok(row)
    }

    async fn current_state(
        &self,
        scope: &Scope,
        log: &TransitionLog,
        entity_id: Gid,
    ) -> CoreResult<String> {
        log.ensure_entity(&entity_id)?;
        let conn = self.get_conn("current_state").await?;
        require(&conn, scope, entity_id, false).await?;
        latest_state(&conn, scope, log, entity_id)
            .await?
            .map(|(state, _)| state)
            .ok_or(CoreError::NoStateRecorded {
                entity_type: log.entity_type,
                id: entity_id,
            })
    }

    async fn transition_list(
        &self,
        scope: &Scope,
        log: &TransitionLog,
        entity_id: Gid,
        cursor: &Cursor,
    ) -> CoreResult<Page<TransitionRow>> {
        ensure_transition_order(cursor)?;
        log.ensure_entity(&entity_id)?;
        let conn = self.get_conn("transition_list").await?;
        require(&conn, scope, entity_id, false).await?;
        let query = query::select_transitions(scope, log, entity_id, cursor)?;
        let rows = fetch_all(&conn, "transition_list", query).await?;
        let transitions = rows
            .iter()
            .map(transition_row)
            .collect::<CoreResult<Vec<_>>>()?;
        Page::new(transitions, cursor)
    }

    // === Health ===

    async fn health_check(&self) -> CoreResult<()> {
        let conn = self.get_conn("health_check").await?;
        conn.query_one("SELECT 1", &[])
            .await
            .db_context("health_check")?;
        Ok(())
    }
}
