//! Row selection vocabulary
//!
//! A `Query` is a conjunction of column filters, an ordering and an
//! optional limit. The same value is evaluated by the embedded store and
//! encoded onto the REST query string by the remote backend, using the
//! `column=op.value` convention:
//!
//! ```text
//! status=eq.available&order=bed_number.asc&limit=10
//! user_id=not.is.null
//! ```

use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use std::cmp::Ordering;

/// Comparison applied to a single column
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Eq(Value),
    Neq(Value),
    IsNull,
    NotNull,
}

/// A single column predicate
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::Eq(value.into()),
        }
    }

    pub fn neq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::Neq(value.into()),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::IsNull,
        }
    }

    pub fn not_null(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::NotNull,
        }
    }

    /// Evaluate against a JSON row
    pub fn matches(&self, row: &Value) -> bool {
        let field = row.get(&self.column).unwrap_or(&Value::Null);
        match &self.op {
            FilterOp::Eq(v) => loose_eq(field, v),
            FilterOp::Neq(v) => !field.is_null() && !loose_eq(field, v),
            FilterOp::IsNull => field.is_null(),
            FilterOp::NotNull => !field.is_null(),
        }
    }

    /// Encode as a query-string pair
    pub fn to_param(&self) -> (String, String) {
        let value = match &self.op {
            FilterOp::Eq(v) => format!("eq.{}", scalar_text(v)),
            FilterOp::Neq(v) => format!("neq.{}", scalar_text(v)),
            FilterOp::IsNull => "is.null".to_string(),
            FilterOp::NotNull => "not.is.null".to_string(),
        };
        (self.column.clone(), value)
    }

    /// Decode a `column=op.value` pair. Values stay text; they are
    /// compared against the row's own type when evaluated.
    pub fn from_param(column: &str, raw: &str) -> Option<Self> {
        let op = if raw == "is.null" {
            FilterOp::IsNull
        } else if raw == "not.is.null" {
            FilterOp::NotNull
        } else if let Some(v) = raw.strip_prefix("eq.") {
            FilterOp::Eq(Value::String(v.to_string()))
        } else if let Some(v) = raw.strip_prefix("neq.") {
            FilterOp::Neq(Value::String(v.to_string()))
        } else {
            return None;
        };

        Some(Self {
            column: column.to_string(),
            op,
        })
    }
}

/// Sort key
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }
}

/// Filters, ordering and limit for a select
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(column, value))
    }

    pub fn order_by(mut self, order: Order) -> Self {
        self.order.push(order);
        self
    }

    pub fn asc(self, column: impl Into<String>) -> Self {
        self.order_by(Order::asc(column))
    }

    pub fn desc(self, column: impl Into<String>) -> Self {
        self.order_by(Order::desc(column))
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a row passes every filter
    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Compare two rows under this query's ordering
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        for order in &self.order {
            let left = a.get(&order.column).unwrap_or(&Value::Null);
            let right = b.get(&order.column).unwrap_or(&Value::Null);
            let ord = compare_values(left, right, order.ascending);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Filter, sort (stable) and truncate rows
    pub fn apply(&self, rows: Vec<Value>) -> Vec<Value> {
        let mut rows: Vec<Value> = rows.into_iter().filter(|r| self.matches(r)).collect();
        if !self.order.is_empty() {
            rows.sort_by(|a, b| self.compare(a, b));
        }
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
        rows
    }

    /// Encode as query-string pairs
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = self.filters.iter().map(Filter::to_param).collect();

        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
                .collect::<Vec<_>>()
                .join(",");
            params.push(("order".to_string(), order));
        }

        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }

        params
    }

    /// Decode query-string pairs; unknown operators are reported by column name
    pub fn from_params<'a, I>(params: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut query = Query::new();

        for (key, value) in params {
            match key {
                "order" => {
                    for part in value.split(',').filter(|p| !p.is_empty()) {
                        let (column, dir) = part.rsplit_once('.').unwrap_or((part, "asc"));
                        match dir {
                            "asc" => query.order.push(Order::asc(column)),
                            "desc" => query.order.push(Order::desc(column)),
                            _ => return Err(format!("invalid order direction '{}'", dir)),
                        }
                    }
                }
                "limit" => {
                    let limit = value
                        .parse()
                        .map_err(|_| format!("invalid limit '{}'", value))?;
                    query.limit = Some(limit);
                }
                "select" => {}
                column => {
                    let filter = Filter::from_param(column, value)
                        .ok_or_else(|| format!("unsupported filter on '{}'", column))?;
                    query.filters.push(filter);
                }
            }
        }

        Ok(query)
    }
}

/// Equality that tolerates untyped query-string values ("3" == 3).
/// Text is only read as a number or boolean when the other side is one,
/// so text columns compare verbatim ("007" != "7").
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s.trim().parse::<f64>().ok() == n.as_f64()
        }
        (Value::String(s), Value::Bool(flag)) | (Value::Bool(flag), Value::String(s)) => {
            s.parse::<bool>().ok() == Some(*flag)
        }
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => false,
    }
}

/// Nulls sort last ascending, first descending
fn compare_values(a: &Value, b: &Value, ascending: bool) -> Ordering {
    let ord = match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => return if ascending { Ordering::Greater } else { Ordering::Less },
        (_, Value::Null) => return if ascending { Ordering::Less } else { Ordering::Greater },
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(tx), Some(ty)) => tx.cmp(&ty),
            _ => x.cmp(y),
        },
        _ => a.to_string().cmp(&b.to_string()),
    };

    if ascending {
        ord
    } else {
        ord.reverse()
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    // Cheap pre-check so plain names never hit the parser
    if s.len() < 20 || s.as_bytes().get(4) != Some(&b'-') {
        return None;
    }
    DateTime::parse_from_rfc3339(s).ok()
}

fn scalar_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_loose_equality() {
        let row = json!({"priority": 3, "bed_number": "12", "is_read": false});
        assert!(Filter::from_param("priority", "eq.3").unwrap().matches(&row));
        assert!(Filter::from_param("bed_number", "eq.12").unwrap().matches(&row));
        assert!(Filter::from_param("is_read", "eq.false").unwrap().matches(&row));
        assert!(!Filter::from_param("priority", "eq.4").unwrap().matches(&row));
    }

    #[test]
    fn test_null_filters() {
        let with = json!({"user_id": "u1"});
        let without = json!({"user_id": null});
        assert!(Filter::not_null("user_id").matches(&with));
        assert!(!Filter::not_null("user_id").matches(&without));
        assert!(Filter::is_null("user_id").matches(&without));
        assert!(Filter::is_null("missing").matches(&with));
    }

    #[test]
    fn test_order_priority_then_created_at() {
        let rows = vec![
            json!({"id": "a", "priority": 3, "created_at": "2024-01-01T10:00:00Z"}),
            json!({"id": "b", "priority": 1, "created_at": "2024-01-01T11:00:00Z"}),
            json!({"id": "c", "priority": 1, "created_at": "2024-01-01T09:00:00.5Z"}),
        ];
        let query = Query::new().asc("priority").asc("created_at");
        let ids: Vec<_> = query
            .apply(rows)
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_params_round_trip() {
        let query = Query::new()
            .eq("user_id", "u1")
            .filter(Filter::not_null("type"))
            .desc("created_at")
            .limit(10);
        let params = query.to_params();
        let decoded =
            Query::from_params(params.iter().map(|(k, v)| (k.as_str(), v.as_str()))).unwrap();
        assert_eq!(decoded, query);
    }

    #[test]
    fn test_numeric_looking_text_survives_round_trip() {
        let row = json!({"bed_number": "007", "contact_number": "+15550100", "priority": 2});
        let query = Query::new()
            .eq("bed_number", "007")
            .eq("contact_number", "+15550100")
            .eq("priority", 2);
        assert!(query.matches(&row));

        let params = query.to_params();
        let decoded =
            Query::from_params(params.iter().map(|(k, v)| (k.as_str(), v.as_str()))).unwrap();
        assert!(decoded.matches(&row));
        assert!(!decoded.matches(&json!({"bed_number": "7", "contact_number": "+15550100", "priority": 2})));
        assert!(!Filter::from_param("contact_number", "eq.15550100").unwrap().matches(&row));
    }

    #[test]
    fn test_unsupported_operator() {
        let err = Query::from_params(vec![("name", "like.*x*")]).unwrap_err();
        assert!(err.contains("name"));
    }
}
