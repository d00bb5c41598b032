use serde_json::Value as Json;

/// A scalar bound into (or read back from) a SQL statement.
///
/// `DbSession` is deliberately driver-agnostic (§9 "Polymorphism": a small
/// capability set, not an inheritance tree), so parameters and row cells
/// travel through this enum rather than sqlx's statically-typed bind/decode
/// machinery.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(Json),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<Json> for Value {
    fn from(v: Json) -> Self {
        Value::Json(v)
    }
}

/// One result row, as an ordered list of `(column_name, value)` pairs —
/// ordered because some callers (e.g. the trigger synthesizer's column list)
/// care about declaration order, not just lookup.
#[derive(Debug, Clone, Default)]
pub struct Row(pub Vec<(String, Value)>);

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Stringified form, used by the conflict detector's field comparison
    /// (§4.5: "compare each source-payload field ... using stringified
    /// equality" — values arrive as heterogeneous scalar types across
    /// drivers, so this is the one safe common denominator).
    pub fn stringify(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::Json(j) => j.to_string(),
        }
    }
}
