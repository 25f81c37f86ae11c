//! Search filters.
//!
//! Filters are immutable trees. Combining filters always builds a new tree
//! (`append_and` / `append_or`); nothing is mutated in place.

use crate::value::{Operator, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const OBJECT_CLASS: &str = "objectClass";

// ============================================================================
// Model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
pub enum Filter {
    And {
        children: Vec<Filter>,
    },
    Or {
        children: Vec<Filter>,
    },
    Not {
        child: Box<Filter>,
    },
    Simple {
        attribute: String,
        operator: Operator,
        value: String,
    },
    Substring {
        attribute: String,
        initial: Option<String>,
        any: Vec<String>,
        last: Option<String>,
    },
    Present {
        attribute: String,
    },
}

impl Filter {
    pub fn simple(attribute: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        Filter::Simple {
            attribute: attribute.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn equal(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self::simple(attribute, Operator::Eq, value)
    }

    pub fn present(attribute: impl Into<String>) -> Self {
        Filter::Present {
            attribute: attribute.into(),
        }
    }

    pub fn not(child: Filter) -> Self {
        Filter::Not {
            child: Box::new(child),
        }
    }

    /// The unconstrained `(objectClass=*)` filter.
    pub fn any_object() -> Self {
        Self::present(OBJECT_CLASS)
    }

    /// True for `(objectClass=*)`, which selects every entry.
    pub fn is_any_object(&self) -> bool {
        match self {
            Filter::Present { attribute } => attribute.eq_ignore_ascii_case(OBJECT_CLASS),
            Filter::Simple {
                attribute,
                operator: Operator::Eq,
                value,
            } => attribute.eq_ignore_ascii_case(OBJECT_CLASS) && value == "*",
            _ => false,
        }
    }

    /// The attribute a leaf filter constrains.
    pub fn attribute(&self) -> Option<&str> {
        match self {
            Filter::Simple { attribute, .. }
            | Filter::Substring { attribute, .. }
            | Filter::Present { attribute } => Some(attribute),
            _ => None,
        }
    }

    /// Evaluate against any attribute source.
    ///
    /// `objectClass` presence always holds; every entry carries object classes.
    pub fn matches<L: AttributeLookup + ?Sized>(&self, source: &L) -> bool {
        match self {
            Filter::And { children } => children.iter().all(|c| c.matches(source)),
            Filter::Or { children } => children.iter().any(|c| c.matches(source)),
            Filter::Not { child } => !child.matches(source),
            Filter::Present { attribute } => {
                attribute.eq_ignore_ascii_case(OBJECT_CLASS)
                    || source.lookup(attribute).is_some_and(|v| !v.is_empty())
            }
            Filter::Simple {
                attribute,
                operator,
                value,
            } => {
                if self.is_any_object() {
                    return true;
                }
                source.lookup(attribute).is_some_and(|values| {
                    values.iter().any(|v| v.compare_literal(*operator, value))
                })
            }
            Filter::Substring {
                attribute,
                initial,
                any,
                last,
            } => source.lookup(attribute).is_some_and(|values| {
                values.iter().any(|v| {
                    substring_matches(
                        &v.to_string().to_lowercase(),
                        initial.as_deref(),
                        any,
                        last.as_deref(),
                    )
                })
            }),
        }
    }
}

fn substring_matches(text: &str, initial: Option<&str>, any: &[String], last: Option<&str>) -> bool {
    let mut rest = text;
    if let Some(initial) = initial {
        let initial = initial.to_lowercase();
        let Some(stripped) = rest.strip_prefix(initial.as_str()) else {
            return false;
        };
        rest = stripped;
    }
    for part in any {
        let part = part.to_lowercase();
        let Some(pos) = rest.find(part.as_str()) else {
            return false;
        };
        rest = &rest[pos + part.len()..];
    }
    match last {
        Some(last) => rest.ends_with(last.to_lowercase().as_str()),
        None => true,
    }
}

/// Anything that can answer "which values does attribute X have".
pub trait AttributeLookup {
    fn lookup(&self, name: &str) -> Option<&[Value]>;
}

impl AttributeLookup for std::collections::BTreeMap<String, Vec<Value>> {
    fn lookup(&self, name: &str) -> Option<&[Value]> {
        self.get(name).map(Vec::as_slice).or_else(|| {
            self.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_slice())
        })
    }
}

// ============================================================================
// Combinators
// ============================================================================

/// AND `filter` onto `existing`. `None` is the identity on either side;
/// duplicates are skipped and an existing `And` is extended rather than nested.
pub fn append_and(existing: Option<Filter>, filter: Option<Filter>) -> Option<Filter> {
    combine(existing, filter, true)
}

/// OR `filter` onto `existing`, with the same absorption rules as `append_and`.
pub fn append_or(existing: Option<Filter>, filter: Option<Filter>) -> Option<Filter> {
    combine(existing, filter, false)
}

fn combine(existing: Option<Filter>, filter: Option<Filter>, conjunction: bool) -> Option<Filter> {
    let (existing, filter) = match (existing, filter) {
        (None, f) => return f,
        (e, None) => return e,
        (Some(e), Some(f)) if e == f => return Some(e),
        (Some(e), Some(f)) => (e, f),
    };

    let mut children = match existing {
        Filter::And { children } if conjunction => children,
        Filter::Or { children } if !conjunction => children,
        other => vec![other],
    };
    let incoming = match filter {
        Filter::And { children } if conjunction => children,
        Filter::Or { children } if !conjunction => children,
        other => vec![other],
    };
    for child in incoming {
        if !children.contains(&child) {
            children.push(child);
        }
    }

    Some(match children.len() {
        1 => children.remove(0),
        _ if conjunction => Filter::And { children },
        _ => Filter::Or { children },
    })
}

// ============================================================================
// Rendering (RFC 4515 string form, plus `<`, `>` and `<>`)
// ============================================================================

/// Escape special characters in a filter value.
pub fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And { children } => {
                f.write_str("(&")?;
                for child in children {
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
            Filter::Or { children } => {
                f.write_str("(|")?;
                for child in children {
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
            Filter::Not { child } => write!(f, "(!{child})"),
            Filter::Simple {
                attribute,
                operator,
                value,
            } => write!(f, "({attribute}{operator}{})", escape_filter_value(value)),
            Filter::Substring {
                attribute,
                initial,
                any,
                last,
            } => {
                write!(f, "({attribute}=")?;
                if let Some(initial) = initial {
                    f.write_str(&escape_filter_value(initial))?;
                }
                f.write_str("*")?;
                for part in any {
                    write!(f, "{}*", escape_filter_value(part))?;
                }
                if let Some(last) = last {
                    f.write_str(&escape_filter_value(last))?;
                }
                f.write_str(")")
            }
            Filter::Present { attribute } => write!(f, "({attribute}=*)"),
        }
    }
}
