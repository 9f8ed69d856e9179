//! Query and filter description shared by every backend
//!
//! The same [`Filter`] is rendered to PostgREST query parameters by the REST
//! backend, evaluated against JSON rows by the local backend, and used to
//! scope realtime topics.

use serde_json::Value;

/// One filter condition
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column = value`
    Eq(String, Value),
    /// `a = x OR b = y OR ...`
    AnyEq(Vec<(String, Value)>),
}

/// Conjunction of conditions
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq(column.to_string(), value.into()));
        self
    }

    pub fn any_eq(mut self, alternatives: Vec<(&str, Value)>) -> Self {
        self.conditions.push(Condition::AnyEq(
            alternatives
                .into_iter()
                .map(|(c, v)| (c.to_string(), v))
                .collect(),
        ));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Every column referenced by this filter
    pub fn columns(&self) -> Vec<&str> {
        let mut cols = Vec::new();
        for c in &self.conditions {
            match c {
                Condition::Eq(col, _) => cols.push(col.as_str()),
                Condition::AnyEq(alts) => cols.extend(alts.iter().map(|(col, _)| col.as_str())),
            }
        }
        cols
    }

    /// Evaluates the filter against a JSON row
    pub fn matches(&self, row: &Value) -> bool {
        self.conditions.iter().all(|c| match c {
            Condition::Eq(col, v) => value_eq(row.get(col), v),
            Condition::AnyEq(alts) => alts.iter().any(|(col, v)| value_eq(row.get(col), v)),
        })
    }

    /// Renders PostgREST query parameters (`col=eq.v`, `or=(a.eq.x,b.eq.y)`)
    pub fn to_postgrest(&self) -> Vec<(String, String)> {
        self.conditions
            .iter()
            .map(|c| match c {
                Condition::Eq(col, v) => (col.clone(), postgrest_op(v)),
                Condition::AnyEq(alts) => {
                    let inner = alts
                        .iter()
                        .map(|(col, v)| format!("{}.{}", col, postgrest_list_op(v)))
                        .collect::<Vec<_>>()
                        .join(",");
                    ("or".to_string(), format!("({})", inner))
                }
            })
            .collect()
    }
}

fn postgrest_op(v: &Value) -> String {
    match v {
        Value::Null => "is.null".to_string(),
        other => format!("eq.{}", scalar_text(other)),
    }
}

/// Operator inside a logic group, where `,` `.` `:` `(` `)` are syntax:
/// such values go in double quotes with `"` and `\` backslash-escaped
fn postgrest_list_op(v: &Value) -> String {
    let Value::String(text) = v else {
        return postgrest_op(v);
    };
    let reserved = text.is_empty()
        || text.contains([',', '.', ':', '(', ')', '"', '\\'])
        || text.chars().any(char::is_whitespace);
    if reserved {
        let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
        format!("eq.\"{}\"", escaped)
    } else {
        postgrest_op(v)
    }
}

/// Text form of a scalar as used in filters and realtime predicates
pub fn scalar_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn value_eq(actual: Option<&Value>, expected: &Value) -> bool {
    match (actual, expected) {
        (None, Value::Null) | (Some(Value::Null), Value::Null) => true,
        (Some(Value::Number(a)), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Some(a), b) => a == b,
        (None, _) => false,
    }
}

/// Sort order
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A read against one table
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub filter: Filter,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            filter: Filter::default(),
            order: None,
            limit: None,
        }
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filter = self.filter.eq(column, value);
        self
    }

    pub fn any_eq(mut self, alternatives: Vec<(&str, Value)>) -> Self {
        self.filter = self.filter.any_eq(alternatives);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// PostgREST query parameters for this read
    pub fn to_postgrest(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(self.filter.to_postgrest());
        if let Some(o) = &self.order {
            let dir = if o.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{}", o.column, dir)));
        }
        if let Some(l) = self.limit {
            params.push(("limit".to_string(), l.to_string()));
        }
        params
    }
}

/// Column and table names are interpolated into SQL paths and URLs, so only
/// plain identifiers are accepted.
pub fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn postgrest_rendering() {
        let q = Query::table("messages")
            .any_eq(vec![("sender_id", json!("u1")), ("recipient_id", json!("u1"))])
            .eq("is_ai", false)
            .order("created_at", true)
            .limit(10);
        let params = q.to_postgrest();
        assert!(params.contains(&("or".into(), "(sender_id.eq.u1,recipient_id.eq.u1)".into())));
        assert!(params.contains(&("is_ai".into(), "eq.false".into())));
        assert!(params.contains(&("order".into(), "created_at.asc".into())));
        assert!(params.contains(&("limit".into(), "10".into())));
    }

    #[test]
    fn or_group_values_with_syntax_characters_are_quoted() {
        let f = Filter::new().any_eq(vec![
            ("location_name", json!("Berlin, Germany")),
            ("title", json!("say \"hi\" (now)")),
            ("member_count", json!(3)),
            ("id", json!("7f3c-91ab")),
        ]);
        let params = f.to_postgrest();
        assert_eq!(
            params,
            vec![(
                "or".to_string(),
                r#"(location_name.eq."Berlin, Germany",title.eq."say \"hi\" (now)",member_count.eq.3,id.eq.7f3c-91ab)"#
                    .to_string()
            )]
        );
        // plain equality parameters stay unquoted
        let eq = Filter::new().eq("location_name", "Berlin, Germany").to_postgrest();
        assert_eq!(eq[0].1, "eq.Berlin, Germany");
    }

    #[test]
    fn matches_numbers_and_missing_nulls() {
        let f = Filter::new().eq("member_count", 3).eq("deleted_at", Value::Null);
        assert!(f.matches(&json!({"member_count": 3.0})));
        assert!(!f.matches(&json!({"member_count": 4})));
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("community_members"));
        assert!(!is_identifier("x;drop"));
        assert!(!is_identifier(""));
    }
}
