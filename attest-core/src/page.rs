//! Keyset pagination.
//!
//! A [`Cursor`] is a position on the stable sort key `(order field, id)` plus
//! a window size and a reading direction. Stores splice
//! [`Cursor::sql_fragment`] into their queries (or evaluate
//! [`Cursor::window`] in process) and hand the rows to [`Page::new`], which
//! trims the look-ahead row and derives the page info.

use crate::config::PaginationConfig;
use crate::error::{CoreError, CoreResult};
use crate::gid::Gid;
use crate::sql::{NamedArgs, SqlParam};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

// ============================================================================
// ORDERING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderDirection {
    Asc,
    #[default]
    Desc,
}

impl OrderDirection {
    pub const fn as_sql(self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }

    pub const fn reverse(self) -> Self {
        match self {
            OrderDirection::Asc => OrderDirection::Desc,
            OrderDirection::Desc => OrderDirection::Asc,
        }
    }
}

/// Kind of value a cursor carries for its order field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorValueKind {
    Timestamp,
    Text,
}

/// Fields listings can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderField {
    CreatedAt,
    UpdatedAt,
    Name,
    FullName,
}

impl OrderField {
    pub const fn as_str(self) -> &'static str {
        match self {
            OrderField::CreatedAt => "CREATED_AT",
            OrderField::UpdatedAt => "UPDATED_AT",
            OrderField::Name => "NAME",
            OrderField::FullName => "FULL_NAME",
        }
    }

    pub const fn column(self) -> &'static str {
        match self {
            OrderField::CreatedAt => "created_at",
            OrderField::UpdatedAt => "updated_at",
            OrderField::Name => "name",
            OrderField::FullName => "full_name",
        }
    }

    /// Expression used in keyset comparisons and ORDER BY. Text compares
    /// bytewise so SQL and in-process windows agree.
    pub const fn sql_expr(self) -> &'static str {
        match self {
            OrderField::CreatedAt => "created_at",
            OrderField::UpdatedAt => "updated_at",
            OrderField::Name => "name COLLATE \"C\"",
            OrderField::FullName => "full_name COLLATE \"C\"",
        }
    }

    pub const fn kind(self) -> CursorValueKind {
        match self {
            OrderField::CreatedAt | OrderField::UpdatedAt => CursorValueKind::Timestamp,
            OrderField::Name | OrderField::FullName => CursorValueKind::Text,
        }
    }
}

impl fmt::Display for OrderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: OrderField,
    pub direction: OrderDirection,
}

impl OrderBy {
    pub const fn new(field: OrderField, direction: OrderDirection) -> Self {
        Self { field, direction }
    }
}

impl Default for OrderBy {
    fn default() -> Self {
        Self::new(OrderField::CreatedAt, OrderDirection::Desc)
    }
}

// ============================================================================
// CURSOR KEYS
// ============================================================================

/// Value of the order field at a cursor position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CursorValue {
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl CursorValue {
    pub fn kind(&self) -> CursorValueKind {
        match self {
            CursorValue::Timestamp(_) => CursorValueKind::Timestamp,
            CursorValue::Text(_) => CursorValueKind::Text,
        }
    }

    fn render(&self) -> String {
        match self {
            CursorValue::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::Micros, true),
            CursorValue::Text(text) => text.clone(),
        }
    }

    fn parse(kind: CursorValueKind, raw: &str) -> CoreResult<Self> {
        match kind {
            CursorValueKind::Timestamp => DateTime::parse_from_rfc3339(raw)
                .map(|ts| CursorValue::Timestamp(ts.with_timezone(&Utc)))
                .map_err(|e| CoreError::invalid_cursor(format!("bad timestamp: {}", e))),
            CursorValueKind::Text => Ok(CursorValue::Text(raw.to_string())),
        }
    }
}

impl From<&CursorValue> for SqlParam {
    fn from(value: &CursorValue) -> Self {
        match value {
            CursorValue::Timestamp(ts) => SqlParam::Timestamp(*ts),
            CursorValue::Text(text) => SqlParam::String(text.clone()),
        }
    }
}

/// Position of one row on the sort key, in encodable form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CursorKey {
    pub id: Gid,
    pub field: OrderField,
    pub value: CursorValue,
}

#[derive(Deserialize)]
struct CursorKeyWire {
    id: Gid,
    field: OrderField,
    value: String,
}

impl CursorKey {
    pub fn new(id: Gid, field: OrderField, value: CursorValue) -> Self {
        Self { id, field, value }
    }

    /// Opaque external form: base64 of `{"id", "field", "value"}`.
    pub fn encode(&self) -> String {
        let json = serde_json::json!({
            "id": self.id.to_string(),
            "field": self.field.as_str(),
            "value": self.value.render(),
        });
        URL_SAFE_NO_PAD.encode(json.to_string())
    }

    pub fn decode(encoded: &str) -> CoreResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| CoreError::invalid_cursor(e.to_string()))?;
        let wire: CursorKeyWire =
            serde_json::from_slice(&bytes).map_err(|e| CoreError::invalid_cursor(e.to_string()))?;
        let value = CursorValue::parse(wire.field.kind(), &wire.value)?;
        Ok(Self {
            id: wire.id,
            field: wire.field,
            value,
        })
    }

    fn sort_key(&self) -> (&CursorValue, &Gid) {
        (&self.value, &self.id)
    }
}

impl fmt::Display for CursorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl Serialize for CursorKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for CursorKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        CursorKey::decode(&raw).map_err(de::Error::custom)
    }
}

/// Rows that can be positioned on a sort key.
pub trait Paginated {
    fn cursor_id(&self) -> Gid;

    /// Value of `field` for this row, `None` when the row cannot be
    /// ordered by it.
    fn cursor_value(&self, field: OrderField) -> Option<CursorValue>;

    fn cursor_key(&self, field: OrderField) -> CoreResult<CursorKey> {
        let value = self.cursor_value(field).ok_or_else(|| {
            CoreError::internal(format!("row {} cannot be ordered by {}", self.cursor_id(), field))
        })?;
        Ok(CursorKey::new(self.cursor_id(), field, value))
    }
}

// ============================================================================
// CURSOR
// ============================================================================

/// Which end of the ordering a window is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// `first` / `after`: read forward
    Head,
    /// `last` / `before`: read backward
    Tail,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    size: u32,
    position: Position,
    after: Option<CursorKey>,
    before: Option<CursorKey>,
    order_by: OrderBy,
}

impl Cursor {
    /// Build a cursor from connection-style arguments.
    pub fn new(
        first: Option<i32>,
        after: Option<&str>,
        last: Option<i32>,
        before: Option<&str>,
        order_by: OrderBy,
        config: &PaginationConfig,
    ) -> CoreResult<Self> {
        if first.is_some() && last.is_some() {
            return Err(CoreError::invalid_argument(
                "first",
                "first and last cannot be combined",
            ));
        }
        let requested = first.or(last);
        if let Some(n) = requested {
            if n < 0 {
                return Err(CoreError::invalid_argument(
                    if first.is_some() { "first" } else { "last" },
                    "must not be negative",
                ));
            }
        }
        let size = requested
            .map(|n| n.unsigned_abs())
            .unwrap_or(config.default_page_size)
            .min(config.max_page_size);
        let position = if last.is_some() {
            Position::Tail
        } else {
            Position::Head
        };

        let decode = |raw: Option<&str>| -> CoreResult<Option<CursorKey>> {
            let Some(raw) = raw else { return Ok(None) };
            let key = CursorKey::decode(raw)?;
            if key.field != order_by.field {
                return Err(CoreError::invalid_cursor(format!(
                    "cursor was created for {} ordering, not {}",
                    key.field, order_by.field
                )));
            }
            Ok(Some(key))
        };

        Ok(Self {
            size,
            position,
            after: decode(after)?,
            before: decode(before)?,
            order_by,
        })
    }

    /// Forward window from the start of the ordering.
    pub fn head(size: u32, order_by: OrderBy) -> Self {
        Self {
            size,
            position: Position::Head,
            after: None,
            before: None,
            order_by,
        }
    }

    /// Backward window from the end of the ordering.
    pub fn tail(size: u32, order_by: OrderBy) -> Self {
        Self {
            position: Position::Tail,
            ..Self::head(size, order_by)
        }
    }

    pub fn starting_after(mut self, key: CursorKey) -> Self {
        self.after = Some(key);
        self
    }

    pub fn ending_before(mut self, key: CursorKey) -> Self {
        self.before = Some(key);
        self
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn after_key(&self) -> Option<&CursorKey> {
        self.after.as_ref()
    }

    pub fn before_key(&self) -> Option<&CursorKey> {
        self.before.as_ref()
    }

    pub fn order_by(&self) -> OrderBy {
        self.order_by
    }

    /// Direction rows are fetched in; backward windows read reversed.
    pub fn query_direction(&self) -> OrderDirection {
        match self.position {
            Position::Head => self.order_by.direction,
            Position::Tail => self.order_by.direction.reverse(),
        }
    }

    /// Keyset predicate over `(order field, id)`; `TRUE` when unbounded.
    pub fn sql_predicate(&self) -> String {
        let expr = self.order_by.field.sql_expr();
        let (after_op, before_op) = match self.order_by.direction {
            OrderDirection::Desc => ("<", ">"),
            OrderDirection::Asc => (">", "<"),
        };
        let mut parts = Vec::with_capacity(2);
        if self.after.is_some() {
            parts.push(format!(
                "({}, id) {} (@cursor_after_value, @cursor_after_id)",
                expr, after_op
            ));
        }
        if self.before.is_some() {
            parts.push(format!(
                "({}, id) {} (@cursor_before_value, @cursor_before_id)",
                expr, before_op
            ));
        }
        if parts.is_empty() {
            "TRUE".to_string()
        } else {
            parts.join(" AND ")
        }
    }

    /// Predicate followed by ORDER BY and a LIMIT of one look-ahead row.
    pub fn sql_fragment(&self) -> String {
        let dir = self.query_direction().as_sql();
        format!(
            "{} ORDER BY {} {}, id {} LIMIT {}",
            self.sql_predicate(),
            self.order_by.field.sql_expr(),
            dir,
            dir,
            u64::from(self.size) + 1
        )
    }

    pub fn sql_arguments(&self) -> NamedArgs {
        let mut args = NamedArgs::new();
        if let Some(after) = &self.after {
            args.insert("cursor_after_value", &after.value);
            args.insert("cursor_after_id", after.id);
        }
        if let Some(before) = &self.before {
            args.insert("cursor_before_value", &before.value);
            args.insert("cursor_before_id", before.id);
        }
        args
    }

    /// In-process rendering of [`Cursor::sql_fragment`]: filter, order and
    /// limit `rows` exactly as the SQL would.
    pub fn window<T: Paginated>(&self, rows: impl IntoIterator<Item = T>) -> CoreResult<Vec<T>> {
        let field = self.order_by.field;
        let mut keyed = Vec::new();
        for row in rows {
            let key = row.cursor_key(field)?;
            let after_ok = self.after.as_ref().map_or(true, |after| {
                let ord = key.sort_key().cmp(&after.sort_key());
                match self.order_by.direction {
                    OrderDirection::Desc => ord == Ordering::Less,
                    OrderDirection::Asc => ord == Ordering::Greater,
                }
            });
            let before_ok = self.before.as_ref().map_or(true, |before| {
                let ord = key.sort_key().cmp(&before.sort_key());
                match self.order_by.direction {
                    OrderDirection::Desc => ord == Ordering::Greater,
                    OrderDirection::Asc => ord == Ordering::Less,
                }
            });
            if after_ok && before_ok {
                keyed.push((key, row));
            }
        }

        keyed.sort_by(|(a, _), (b, _)| a.sort_key().cmp(&b.sort_key()));
        if self.query_direction() == OrderDirection::Desc {
            keyed.reverse();
        }
        keyed.truncate(self.size as usize + 1);
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }
}

// ============================================================================
// PAGE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge<T> {
    pub cursor: CursorKey,
    pub node: T,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<CursorKey>,
    pub end_cursor: Option<CursorKey>,
}

/// One window of rows in caller order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub edges: Vec<Edge<T>>,
    pub page_info: PageInfo,
}

impl<T: Paginated> Page<T> {
    /// Build a page from rows fetched in query order with up to one
    /// look-ahead row.
    ///
    /// A bound on the far side of the window (`before` when paging forward,
    /// `after` when paging backward) always has rows beyond it, so it sets
    /// the matching flag whatever the look-ahead says.
    pub fn new(mut rows: Vec<T>, cursor: &Cursor) -> CoreResult<Self> {
        let size = cursor.size() as usize;
        let has_more = rows.len() > size;
        rows.truncate(size);

        let (has_next_page, has_previous_page) = match cursor.position() {
            Position::Head => (
                has_more || cursor.before_key().is_some(),
                cursor.after_key().is_some(),
            ),
            Position::Tail => {
                rows.reverse();
                (
                    cursor.before_key().is_some(),
                    has_more || cursor.after_key().is_some(),
                )
            }
        };

        let field = cursor.order_by().field;
        let edges = rows
            .into_iter()
            .map(|node| {
                Ok(Edge {
                    cursor: node.cursor_key(field)?,
                    node,
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;

        let page_info = PageInfo {
            has_next_page,
            has_previous_page,
            start_cursor: edges.first().map(|e| e.cursor.clone()),
            end_cursor: edges.last().map(|e| e.cursor.clone()),
        };
        Ok(Self { edges, page_info })
    }
}

impl<T> Page<T> {
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().map(|e| &e.node)
    }

    pub fn into_nodes(self) -> Vec<T> {
        self.edges.into_iter().map(|e| e.node).collect()
    }

    /// Convert every node, keeping cursors and page info.
    pub fn try_map<U>(self, mut f: impl FnMut(T) -> CoreResult<U>) -> CoreResult<Page<U>> {
        let edges = self
            .edges
            .into_iter()
            .map(|e| {
                Ok(Edge {
                    cursor: e.cursor,
                    node: f(e.node)?,
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Page {
            edges,
            page_info: self.page_info,
        })
    }
}
