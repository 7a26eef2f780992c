//! Connection-style list arguments

use attest_core::{CoreResult, Cursor, OrderBy, PaginationConfig};

/// `first`/`after`/`last`/`before` as a caller passes them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListArgs {
    pub first: Option<i32>,
    pub after: Option<String>,
    pub last: Option<i32>,
    pub before: Option<String>,
    /// Defaults to newest first
    pub order_by: Option<OrderBy>,
}

impl ListArgs {
    pub fn first(n: i32) -> Self {
        Self {
            first: Some(n),
            ..Default::default()
        }
    }

    pub fn last(n: i32) -> Self {
        Self {
            last: Some(n),
            ..Default::default()
        }
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    pub fn before(mut self, cursor: impl Into<String>) -> Self {
        self.before = Some(cursor.into());
        self
    }

    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn cursor(&self, config: &PaginationConfig) -> CoreResult<Cursor> {
        Cursor::new(
            self.first,
            self.after.as_deref(),
            self.last,
            self.before.as_deref(),
            self.order_by.unwrap_or_default(),
            config,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::{ErrorKind, OrderDirection, OrderField, Position};

    #[test]
    fn test_defaults_to_head_of_default_size() -> CoreResult<()> {
        let cursor = ListArgs::default().cursor(&PaginationConfig::default())?;
        assert_eq!(cursor.size(), 25);
        assert_eq!(cursor.position(), Position::Head);
        assert_eq!(cursor.order_by(), OrderBy::default());
        Ok(())
    }

    #[test]
    fn test_last_reads_from_tail_and_clamps() -> CoreResult<()> {
        let order = OrderBy::new(OrderField::Name, OrderDirection::Asc);
        let cursor = ListArgs::last(500)
            .order_by(order)
            .cursor(&PaginationConfig::default())?;
        assert_eq!(cursor.size(), 100);
        assert_eq!(cursor.position(), Position::Tail);
        assert_eq!(cursor.order_by(), order);
        Ok(())
    }

    #[test]
    fn test_rejects_garbage_cursor() {
        let result = ListArgs::first(5)
            .after("not a cursor")
            .cursor(&PaginationConfig::default());
        assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::InvalidArgument));
    }
}
