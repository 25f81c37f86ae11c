//! Attribute/field values, physical field types, and typed comparison.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

// ============================================================================
// Values
// ============================================================================

/// A single attribute or field value.
///
/// JSON numbers deserialize as `Integer` when integral and `Double` otherwise,
/// strings as `Text`, arrays of bytes as `Binary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Double(f64),
    Text(String),
    Binary(Vec<u8>),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Compare this value against a filter literal, coercing the literal to
    /// this value's kind when it parses.
    pub fn compare_literal(&self, operator: Operator, literal: &str) -> bool {
        let rhs = match self {
            Value::Integer(_) => literal
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .unwrap_or_else(|_| Value::text(literal)),
            Value::Double(_) => literal
                .trim()
                .parse::<f64>()
                .map(Value::Double)
                .unwrap_or_else(|_| Value::text(literal)),
            _ => Value::text(literal),
        };
        compare(self, operator, &rhs)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{i}"),
            Value::Double(d) => write!(f, "{d}"),
            Value::Text(s) => f.write_str(s),
            Value::Binary(bytes) => {
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
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
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

// ============================================================================
// Field types
// ============================================================================

/// Physical field type as configured on a source field.
///
/// Unrecognized type names fall back to `Varchar`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    #[default]
    Varchar,
    Integer,
    Double,
    Binary,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::Varchar => "VARCHAR",
            FieldType::Integer => "INTEGER",
            FieldType::Double => "DOUBLE",
            FieldType::Binary => "BINARY",
        }
    }
}

impl From<&str> for FieldType {
    fn from(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "INTEGER" | "INT" | "SMALLINT" | "BIGINT" | "TINYINT" => FieldType::Integer,
            "DOUBLE" | "FLOAT" | "REAL" | "DECIMAL" | "NUMERIC" => FieldType::Double,
            "BINARY" | "VARBINARY" | "BLOB" | "BYTEA" => FieldType::Binary,
            _ => FieldType::Varchar,
        }
    }
}

impl From<String> for FieldType {
    fn from(name: String) -> Self {
        FieldType::from(name.as_str())
    }
}

impl From<FieldType> for String {
    fn from(ty: FieldType) -> Self {
        ty.name().to_string()
    }
}

/// Coerce a value to a field type.
///
/// `Varchar` always yields the textual form. Numeric types parse text and pass
/// already-typed values through. `None` means the value cannot be represented
/// in the target type.
pub fn convert(value: &Value, ty: FieldType) -> Option<Value> {
    match ty {
        FieldType::Varchar => Some(Value::Text(value.to_string())),
        FieldType::Integer => match value {
            Value::Integer(_) => Some(value.clone()),
            Value::Double(d) if d.fract() == 0.0 && d.is_finite() => Some(Value::Integer(*d as i64)),
            Value::Text(s) => s.trim().parse().ok().map(Value::Integer),
            _ => None,
        },
        FieldType::Double => match value {
            Value::Double(_) => Some(value.clone()),
            Value::Integer(i) => Some(Value::Double(*i as f64)),
            Value::Text(s) => s.trim().parse().ok().map(Value::Double),
            Value::Binary(_) => None,
        },
        FieldType::Binary => Some(value.clone()),
    }
}

// ============================================================================
// Operators
// ============================================================================

/// Comparison operator shared by relationships and simple filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "<>")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
        }
    }

    pub fn parse(symbol: &str) -> Option<Self> {
        Some(match symbol.trim() {
            "=" | "==" | "~=" => Operator::Eq,
            "<>" | "!=" => Operator::Ne,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            _ => return None,
        })
    }

    /// The operator that holds when the operands are swapped.
    pub fn mirrored(self) -> Self {
        match self {
            Operator::Lt => Operator::Gt,
            Operator::Le => Operator::Ge,
            Operator::Gt => Operator::Lt,
            Operator::Ge => Operator::Le,
            other => other,
        }
    }

    pub fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Ne => ordering != Ordering::Equal,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Le => ordering != Ordering::Greater,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Ge => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ============================================================================
// Comparison
// ============================================================================

/// Case-insensitive lexical ordering.
pub fn cmp_ignore_case(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

/// Compare two values with `operator`.
///
/// Text compares case-insensitively, numbers by natural order (mixed
/// integer/double widen to double), binary supports only `=` and `<>`.
/// Values of unrelated kinds compare by their textual form.
pub fn compare(a: &Value, operator: Operator, b: &Value) -> bool {
    let ordering = match (a, b) {
        (Value::Text(x), Value::Text(y)) => Some(cmp_ignore_case(x, y)),
        (Value::Integer(x), Value::Integer(y)) => Some(x.cmp(y)),
        (Value::Double(x), Value::Double(y)) => x.partial_cmp(y),
        (Value::Integer(x), Value::Double(y)) => (*x as f64).partial_cmp(y),
        (Value::Double(x), Value::Integer(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Binary(x), Value::Binary(y)) => {
            return match operator {
                Operator::Eq => x == y,
                Operator::Ne => x != y,
                _ => false,
            }
        }
        _ => Some(cmp_ignore_case(&a.to_string(), &b.to_string())),
    };

    match ordering {
        Some(ordering) => operator.accepts(ordering),
        None => operator == Operator::Ne,
    }
}
