//! SQL text for every store operation.
//!
//! Builders splice the [`Scope`] and [`Cursor`] fragments into the query,
//! merge their arguments with the operation's own and bind the result to
//! positional parameters. Nothing here touches a connection.

use attest_core::{
    BoundQuery, Column, CoreError, CoreResult, Cursor, Gid, Listable, NamedArgs, NewTransition,
    Record, Scope, TransitionLog,
};
use chrono::{DateTime, Utc};

fn columns(columns: &[Column], alias: &str) -> String {
    columns
        .iter()
        .map(|c| format!("{}.{}", alias, c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn bind(sql: &str, parts: impl IntoIterator<Item = NamedArgs>) -> CoreResult<BoundQuery> {
    let mut args = NamedArgs::new();
    for part in parts {
        args.merge(part)?;
    }
    args.bind(sql)
}

fn state_filter<T: Record>(state: Option<&str>) -> CoreResult<(&'static str, NamedArgs)> {
    match (state, T::STATE_LOG) {
        (None, _) => Ok(("", NamedArgs::new())),
        (Some(state), Some(_)) => Ok(("state = @state AND ", NamedArgs::new().with("state", state))),
        (Some(_), None) => Err(CoreError::invalid_argument(
            "state",
            format!("{} has no state", T::ENTITY_TYPE),
        )),
    }
}

// ============================================================================
// RECORDS
// ============================================================================

pub fn insert<T: Record>(scope: &Scope, record: &T) -> CoreResult<BoundQuery> {
    let row = record.to_row();
    let mut args = NamedArgs::new();
    for column in T::COLUMNS {
        let value = row.get(column.name).cloned().ok_or_else(|| {
            CoreError::internal(format!("{} row is missing {}", T::TABLE, column.name))
        })?;
        args.insert(column.name, value);
    }
    let names: Vec<&str> = T::COLUMNS.iter().map(|c| c.name).collect();
    let sql = format!(
        "INSERT INTO {} (tenant_id, {}) VALUES (@tenant_id, @{})",
        T::TABLE,
        names.join(", "),
        names.join(", @")
    );
    bind(&sql, [scope.sql_arguments(), args])
}

/// `records` CTE holding the rows of `T` that match `filter`, joined with
/// their current state for stateful records. Rows without any transition
/// are left out.
fn records_cte<T: Record>(scope: &Scope, filter: &str) -> String {
    match T::STATE_LOG {
        Some(log) => format!(
            "WITH latest_states AS (\
                SELECT {entity} AS entity_id, to_state, \
                    ROW_NUMBER() OVER (PARTITION BY {entity} ORDER BY created_at DESC, id DESC) AS rank \
                FROM {log_table} \
                WHERE {scope}\
            ), \
            records AS (\
                SELECT {columns}, s.to_state AS state \
                FROM {table} e \
                INNER JOIN latest_states s ON s.entity_id = e.id AND s.rank = 1 \
                WHERE {qualified} AND {filter}\
            ) ",
            entity = log.entity_column,
            log_table = log.table,
            scope = scope.sql_fragment(),
            columns = columns(T::COLUMNS, "e"),
            table = T::TABLE,
            qualified = scope.qualified_sql_fragment("e"),
            filter = filter,
        ),
        None => format!(
            "WITH records AS (\
                SELECT {columns} FROM {table} e WHERE {qualified} AND {filter}\
            ) ",
            columns = columns(T::COLUMNS, "e"),
            table = T::TABLE,
            qualified = scope.qualified_sql_fragment("e"),
            filter = filter,
        ),
    }
}

pub fn select_one<T: Record>(scope: &Scope, id: Gid) -> CoreResult<BoundQuery> {
    let sql = format!("{}SELECT * FROM records", records_cte::<T>(scope, "e.id = @id"));
    bind(&sql, [scope.sql_arguments(), NamedArgs::new().with("id", id)])
}

fn select_page<T: Record>(
    scope: &Scope,
    filter: &str,
    filter_args: NamedArgs,
    state: Option<&str>,
    cursor: &Cursor,
) -> CoreResult<BoundQuery> {
    let (state_sql, state_args) = state_filter::<T>(state)?;
    let sql = format!(
        "{}SELECT * FROM records WHERE {}{}",
        records_cte::<T>(scope, filter),
        state_sql,
        cursor.sql_fragment()
    );
    bind(
        &sql,
        [scope.sql_arguments(), filter_args, state_args, cursor.sql_arguments()],
    )
}

pub fn select_children<T: Listable>(
    scope: &Scope,
    parent_id: Gid,
    state: Option<&str>,
    cursor: &Cursor,
) -> CoreResult<BoundQuery> {
    select_page::<T>(
        scope,
        &format!("e.{} = @parent_id", T::PARENT_COLUMN),
        NamedArgs::new().with("parent_id", parent_id),
        state,
        cursor,
    )
}

pub fn select_tasks_for_control(
    scope: &Scope,
    control_id: Gid,
    state: Option<&str>,
    cursor: &Cursor,
) -> CoreResult<BoundQuery> {
    select_page::<attest_core::Task>(
        scope,
        "EXISTS (SELECT 1 FROM controls_tasks ct WHERE ct.task_id = e.id AND ct.control_id = @control_id)",
        NamedArgs::new().with("control_id", control_id),
        state,
        cursor,
    )
}

/// Existence check for one row, optionally locking it.
pub fn exists(scope: &Scope, table: &str, id: Gid, lock: bool) -> CoreResult<BoundQuery> {
    let sql = format!(
        "SELECT id FROM {} WHERE {} AND id = @id{}",
        table,
        scope.sql_fragment(),
        if lock { " FOR UPDATE" } else { "" }
    );
    bind(&sql, [scope.sql_arguments(), NamedArgs::new().with("id", id)])
}

/// Conditional write: matches nothing unless the stored version is
/// `expected_version`.
pub fn update<T: Record>(
    scope: &Scope,
    id: Gid,
    expected_version: i32,
    patch: &T::Patch,
    updated_at: DateTime<Utc>,
) -> CoreResult<BoundQuery> {
    let mut args = NamedArgs::new()
        .with("id", id)
        .with("expected_version", expected_version)
        .with("updated_at", updated_at);
    let mut assignments = Vec::new();
    for (column, value) in T::patch_row(patch) {
        assignments.push(format!("{} = @set_{}", column, column));
        args.insert(format!("set_{}", column), value);
    }
    assignments.push("version = version + 1".to_string());
    assignments.push("updated_at = @updated_at".to_string());

    let sql = format!(
        "UPDATE {} SET {} WHERE {} AND id = @id AND version = @expected_version RETURNING id",
        T::TABLE,
        assignments.join(", "),
        scope.sql_fragment()
    );
    bind(&sql, [scope.sql_arguments(), args])
}

/// Delete a standalone record and its transition history.
pub fn delete<T: Record>(scope: &Scope, id: Gid) -> CoreResult<BoundQuery> {
    let transitions = match T::STATE_LOG {
        Some(log) => format!(
            "delete_transitions AS (\
                DELETE FROM {} WHERE {} AND {} = @id RETURNING id\
            ), ",
            log.table,
            scope.sql_fragment(),
            log.entity_column
        ),
        None => "delete_transitions AS (SELECT NULL::BYTEA AS id WHERE FALSE), ".to_string(),
    };
    let sql = format!(
        "WITH {}delete_record AS (\
            DELETE FROM {} WHERE {} AND id = @id RETURNING id\
        ) \
        SELECT \
            0::BIGINT AS link_count, \
            0::BIGINT AS unlinked, \
            0::BIGINT AS deleted_links, \
            (SELECT COUNT(*) FROM delete_transitions) AS deleted_transitions, \
            (SELECT COUNT(*) FROM delete_record) AS deleted_entities, \
            0::BIGINT AS deleted_tasks",
        transitions,
        T::TABLE,
        scope.sql_fragment()
    );
    bind(&sql, [scope.sql_arguments(), NamedArgs::new().with("id", id)])
}

// ============================================================================
// TASK LINKS AND CASCADES
// ============================================================================

pub fn insert_link(
    scope: &Scope,
    task_id: Gid,
    control_id: Gid,
    created_at: DateTime<Utc>,
) -> CoreResult<BoundQuery> {
    bind(
        "INSERT INTO controls_tasks (tenant_id, task_id, control_id, created_at) \
         VALUES (@tenant_id, @task_id, @control_id, @created_at)",
        [
            scope.sql_arguments(),
            NamedArgs::new()
                .with("task_id", task_id)
                .with("control_id", control_id)
                .with("created_at", created_at),
        ],
    )
}

pub fn link_exists(scope: &Scope, task_id: Gid, control_id: Gid) -> CoreResult<BoundQuery> {
    let sql = format!(
        "SELECT task_id FROM controls_tasks WHERE {} AND task_id = @task_id AND control_id = @control_id",
        scope.sql_fragment()
    );
    bind(
        &sql,
        [
            scope.sql_arguments(),
            NamedArgs::new()
                .with("task_id", task_id)
                .with("control_id", control_id),
        ],
    )
}

pub fn select_links(scope: &Scope, task_id: Gid) -> CoreResult<BoundQuery> {
    let sql = format!(
        "SELECT task_id, control_id, created_at FROM controls_tasks \
         WHERE {} AND task_id = @task_id ORDER BY created_at, control_id",
        scope.sql_fragment()
    );
    bind(
        &sql,
        [scope.sql_arguments(), NamedArgs::new().with("task_id", task_id)],
    )
}

/// Remove one task link and, when it was the last one, the task with its
/// transitions. The other links are deleted in their own CTE so no row is
/// targeted twice within the statement.
pub fn delete_task_link(scope: &Scope, task_id: Gid, control_id: Gid) -> CoreResult<BoundQuery> {
    let sql = format!(
        "WITH link_count AS (\
            SELECT COUNT(*) AS count FROM controls_tasks WHERE {scope} AND task_id = @task_id\
        ), \
        delete_link AS (\
            DELETE FROM controls_tasks \
            WHERE {scope} AND task_id = @task_id AND control_id = @control_id \
            RETURNING task_id\
        ), \
        delete_other_links AS (\
            DELETE FROM controls_tasks \
            WHERE {scope} AND task_id = @task_id AND control_id <> @control_id \
                AND (SELECT count FROM link_count) <= 1 \
            RETURNING task_id\
        ), \
        delete_transitions AS (\
            DELETE FROM task_state_transitions \
            WHERE {scope} AND task_id = @task_id AND (SELECT count FROM link_count) <= 1 \
            RETURNING id\
        ), \
        delete_task AS (\
            DELETE FROM tasks \
            WHERE {scope} AND id = @task_id AND (SELECT count FROM link_count) <= 1 \
            RETURNING id\
        ) \
        SELECT \
            (SELECT count FROM link_count) AS link_count, \
            (SELECT COUNT(*) FROM delete_link) AS unlinked, \
            (SELECT COUNT(*) FROM delete_other_links) AS deleted_links, \
            (SELECT COUNT(*) FROM delete_transitions) AS deleted_transitions, \
            (SELECT COUNT(*) FROM delete_task) AS deleted_entities, \
            0::BIGINT AS deleted_tasks",
        scope = scope.sql_fragment()
    );
    bind(
        &sql,
        [
            scope.sql_arguments(),
            NamedArgs::new()
                .with("task_id", task_id)
                .with("control_id", control_id),
        ],
    )
}

/// Delete a control with its links and transitions, destroying the tasks
/// it held the last link of.
pub fn delete_control(scope: &Scope, control_id: Gid) -> CoreResult<BoundQuery> {
    let sql = format!(
        "WITH task_links AS (\
            SELECT task_id FROM controls_tasks WHERE {scope} AND control_id = @control_id\
        ), \
        orphaned AS (\
            SELECT tl.task_id FROM task_links tl \
            WHERE NOT EXISTS (\
                SELECT 1 FROM controls_tasks ct \
                WHERE ct.task_id = tl.task_id AND ct.control_id <> @control_id\
            )\
        ), \
        delete_links AS (\
            DELETE FROM controls_tasks WHERE {scope} AND control_id = @control_id \
            RETURNING task_id\
        ), \
        delete_task_transitions AS (\
            DELETE FROM task_state_transitions \
            WHERE {scope} AND task_id IN (SELECT task_id FROM orphaned) \
            RETURNING id\
        ), \
        delete_tasks AS (\
            DELETE FROM tasks WHERE {scope} AND id IN (SELECT task_id FROM orphaned) \
            RETURNING id\
        ), \
        delete_control_transitions AS (\
            DELETE FROM control_state_transitions WHERE {scope} AND control_id = @control_id \
            RETURNING id\
        ), \
        delete_control AS (\
            DELETE FROM controls WHERE {scope} AND id = @control_id RETURNING id\
        ) \
        SELECT \
            (SELECT COUNT(*) FROM task_links) AS link_count, \
            0::BIGINT AS unlinked, \
            (SELECT COUNT(*) FROM delete_links) AS deleted_links, \
            (SELECT COUNT(*) FROM delete_task_transitions) \
                + (SELECT COUNT(*) FROM delete_control_transitions) AS deleted_transitions, \
            (SELECT COUNT(*) FROM delete_control) AS deleted_entities, \
            (SELECT COUNT(*) FROM delete_tasks) AS deleted_tasks",
        scope = scope.sql_fragment()
    );
    bind(
        &sql,
        [
            scope.sql_arguments(),
            NamedArgs::new().with("control_id", control_id),
        ],
    )
}

/// Row locks on every task linked to the control, taken in id order.
pub fn lock_control_tasks(scope: &Scope, control_id: Gid) -> CoreResult<BoundQuery> {
    let sql = format!(
        "SELECT t.id FROM tasks t JOIN controls_tasks ct ON ct.task_id = t.id \
         WHERE {} AND ct.control_id = @control_id ORDER BY t.id FOR UPDATE OF t",
        scope.qualified_sql_fragment("t")
    );
    bind(
        &sql,
        [
            scope.sql_arguments(),
            NamedArgs::new().with("control_id", control_id),
        ],
    )
}

pub fn select_control_ids(scope: &Scope, framework_id: Gid) -> CoreResult<BoundQuery> {
    let sql = format!(
        "SELECT id FROM controls WHERE {} AND framework_id = @framework_id ORDER BY id FOR UPDATE",
        scope.sql_fragment()
    );
    bind(
        &sql,
        [
            scope.sql_arguments(),
            NamedArgs::new().with("framework_id", framework_id),
        ],
    )
}

pub fn delete_row(scope: &Scope, table: &str, id: Gid) -> CoreResult<BoundQuery> {
    let sql = format!(
        "DELETE FROM {} WHERE {} AND id = @id",
        table,
        scope.sql_fragment()
    );
    bind(&sql, [scope.sql_arguments(), NamedArgs::new().with("id", id)])
}

// ============================================================================
// TRANSITION LOGS
// ============================================================================

pub fn insert_transition(
    scope: &Scope,
    log: &TransitionLog,
    entity_id: Gid,
    from_state: Option<&str>,
    transition: &NewTransition,
) -> CoreResult<BoundQuery> {
    let sql = format!(
        "INSERT INTO {} (id, tenant_id, {}, from_state, to_state, reason, created_at, updated_at) \
         VALUES (@id, @tenant_id, @entity_id, @from_state, @to_state, @reason, @created_at, @created_at) \
         RETURNING id, {} AS entity_id, from_state, to_state, reason, created_at, updated_at",
        log.table, log.entity_column, log.entity_column
    );
    bind(
        &sql,
        [
            scope.sql_arguments(),
            NamedArgs::new()
                .with("id", transition.id)
                .with("entity_id", entity_id)
                .with("from_state", from_state.map(str::to_string))
                .with("to_state", transition.to_state.as_str())
                .with("reason", transition.reason.clone())
                .with("created_at", transition.created_at),
        ],
    )
}

/// `to_state` of the highest ranked transition by recency.
pub fn current_state(scope: &Scope, log: &TransitionLog, entity_id: Gid) -> CoreResult<BoundQuery> {
    let sql = format!(
        "WITH ranked AS (\
            SELECT to_state, created_at, ROW_NUMBER() OVER (ORDER BY created_at DESC, id DESC) AS rank \
            FROM {} WHERE {} AND {} = @entity_id\
        ) \
        SELECT to_state, created_at FROM ranked WHERE rank = 1",
        log.table,
        scope.sql_fragment(),
        log.entity_column
    );
    bind(
        &sql,
        [
            scope.sql_arguments(),
            NamedArgs::new().with("entity_id", entity_id),
        ],
    )
}

pub fn select_transitions(
    scope: &Scope,
    log: &TransitionLog,
    entity_id: Gid,
    cursor: &Cursor,
) -> CoreResult<BoundQuery> {
    let sql = format!(
        "WITH transitions AS (\
            SELECT id, {} AS entity_id, from_state, to_state, reason, created_at, updated_at \
            FROM {} WHERE {} AND {} = @entity_id\
        ) \
        SELECT * FROM transitions WHERE {}",
        log.entity_column,
        log.table,
        scope.sql_fragment(),
        log.entity_column,
        cursor.sql_fragment()
    );
    bind(
        &sql,
        [
            scope.sql_arguments(),
            NamedArgs::new().with("entity_id", entity_id),
            cursor.sql_arguments(),
        ],
    )
}
