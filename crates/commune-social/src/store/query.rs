//! Query builder and its encoding into the REST API's URL syntax.

use serde_json::Value;

use super::Table;

/// A row predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Neq(String, Value),
    Lt(String, Value),
    Gt(String, Value),
    IsNull(String),
    Or(Vec<Filter>),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(column.to_string(), value.into())
    }

    pub fn neq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Neq(column.to_string(), value.into())
    }

    pub fn lt(column: &str, value: impl Into<Value>) -> Self {
        Filter::Lt(column.to_string(), value.into())
    }

    pub fn gt(column: &str, value: impl Into<Value>) -> Self {
        Filter::Gt(column.to_string(), value.into())
    }

    pub fn is_null(column: &str) -> Self {
        Filter::IsNull(column.to_string())
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    /// Top-level query parameter, e.g. `("user_id", "eq.42")` or
    /// `("or", "(a.eq.1,b.eq.2)")`.
    pub fn to_param(&self) -> (String, String) {
        match self {
            Filter::Eq(col, v) => (col.clone(), format!("eq.{}", render_value(v))),
            Filter::Neq(col, v) => (col.clone(), format!("neq.{}", render_value(v))),
            Filter::Lt(col, v) => (col.clone(), format!("lt.{}", render_value(v))),
            Filter::Gt(col, v) => (col.clone(), format!("gt.{}", render_value(v))),
            Filter::IsNull(col) => (col.clone(), "is.null".to_string()),
            Filter::Or(items) => ("or".to_string(), group(items)),
            Filter::And(items) => ("and".to_string(), group(items)),
        }
    }

    /// Nested form used inside logical groups, e.g. `a.eq.1` or `and(a.eq.1,b.eq.2)`.
    fn to_expr(&self) -> String {
        match self {
            Filter::Eq(col, v) => format!("{col}.eq.{}", quote_in_group(v)),
            Filter::Neq(col, v) => format!("{col}.neq.{}", quote_in_group(v)),
            Filter::Lt(col, v) => format!("{col}.lt.{}", quote_in_group(v)),
            Filter::Gt(col, v) => format!("{col}.gt.{}", quote_in_group(v)),
            Filter::IsNull(col) => format!("{col}.is.null"),
            Filter::Or(items) => format!("or{}", group(items)),
            Filter::And(items) => format!("and{}", group(items)),
        }
    }
}

fn group(items: &[Filter]) -> String {
    let inner: Vec<String> = items.iter().map(Filter::to_expr).collect();
    format!("({})", inner.join(","))
}

/// Render a scalar the way the REST API expects it in a filter.
pub(crate) fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Inside `or(...)`/`and(...)` groups, reserved characters must be quoted.
fn quote_in_group(value: &Value) -> String {
    let raw = render_value(value);
    if raw.chars().any(|c| matches!(c, ',' | '(' | ')' | ':' | '"' | ' ')) {
        format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        raw
    }
}

/// Sort order for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A select/update/delete target: table, filters, ordering, limit, projection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: Table,
    pub columns: String,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            columns: "*".to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    /// Restrict the returned columns (comma-separated).
    pub fn select(mut self, columns: &str) -> Self {
        self.columns = columns.to_string();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(column, value))
    }

    pub fn neq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::neq(column, value))
    }

    pub fn lt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::lt(column, value))
    }

    pub fn or(self, filters: Vec<Filter>) -> Self {
        self.filter(Filter::or(filters))
    }

    pub fn order_asc(mut self, column: &str) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending: true,
        });
        self
    }

    pub fn order_desc(mut self, column: &str) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending: false,
        });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Encode as URL query parameters. `select` is only meaningful for reads.
    pub fn to_params(&self, include_select: bool) -> Vec<(String, String)> {
        let mut params = Vec::with_capacity(self.filters.len() + 3);
        if include_select {
            params.push(("select".to_string(), self.columns.clone()));
        }
        params.extend(self.filters.iter().map(Filter::to_param));
        if let Some(order) = &self.order {
            let dir = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{dir}", order.column)));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }
}
