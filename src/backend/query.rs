//! PostgREST query-string encoding.
//!
//! Filters are kept as ordered `(key, value)` pairs so they can be handed to
//! `reqwest::RequestBuilder::query` unchanged.

use std::fmt::Display;

use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    table: String,
    params: Vec<(String, String)>,
}

impl Query {
    pub fn table(table: &str) -> Self {
        Query {
            table: table.to_string(),
            params: Vec::new(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.params.push(("select".into(), columns.into()));
        self
    }

    pub fn eq(mut self, column: &str, value: impl Display) -> Self {
        self.params.push((column.into(), format!("eq.{}", value)));
        self
    }

    pub fn in_list(mut self, column: &str, values: &[Uuid]) -> Self {
        let joined = values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.params.push((column.into(), format!("in.({})", joined)));
        self
    }

    pub fn is_null(mut self, column: &str) -> Self {
        self.params.push((column.into(), "is.null".into()));
        self
    }

    /// Raw `or=(…)` group; `expr` is the inside of the parentheses.
    pub fn or(mut self, expr: &str) -> Self {
        self.params.push(("or".into(), format!("({})", expr)));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        let dir = if ascending { "asc" } else { "desc" };
        self.params.push(("order".into(), format!("{}.{}", column, dir)));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.params.push(("limit".into(), n.to_string()));
        self
    }

    pub fn on_conflict(mut self, columns: &str) -> Self {
        self.params.push(("on_conflict".into(), columns.into()));
        self
    }
}

/// Both directions of a direct-message pair, as an `or` expression.
pub fn pair_filter(a: Uuid, b: Uuid) -> String {
    format!(
        "and(sender_id.eq.{a},receiver_id.eq.{b}),and(sender_id.eq.{b},receiver_id.eq.{a})"
    )
}

/// Parses the total from a `Content-Range` header (`0-24/120` or `*/0`).
pub fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_query_encoding() {
        let me = Uuid::nil();
        let peer = Uuid::from_u128(1);
        let q = Query::table("messages")
            .select("*")
            .or(&pair_filter(me, peer))
            .order("created_at", true)
            .limit(200);
        assert_eq!(q.table_name(), "messages");
        let params = q.params();
        assert_eq!(params[0], ("select".to_string(), "*".to_string()));
        assert_eq!(params[1].0, "or");
        assert!(params[1].1.starts_with("(and(sender_id.eq.00000000-0000-0000-0000-000000000000,"));
        assert!(params[1].1.ends_with("receiver_id.eq.00000000-0000-0000-0000-000000000000))"));
        assert_eq!(params[2], ("order".to_string(), "created_at.asc".to_string()));
        assert_eq!(params[3], ("limit".to_string(), "200".to_string()));
    }

    #[test]
    fn test_in_and_is_null_filters() {
        let ids = [Uuid::from_u128(1), Uuid::from_u128(2)];
        let q = Query::table("messages").in_list("sender_id", &ids).is_null("seen_at");
        assert_eq!(
            q.params()[0].1,
            format!("in.({},{})", ids[0], ids[1])
        );
        assert_eq!(q.params()[1], ("seen_at".to_string(), "is.null".to_string()));
    }

    #[test]
    fn test_content_range_total() {
        assert_eq!(parse_content_range_total("0-4/5"), Some(5));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("*/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }
}
