//! Distinguished names.
//!
//! A `Dn` is an ordered list of RDNs, most specific first. Entry mapping DN
//! patterns may use the value `...` in an RDN to mark a value that is derived
//! per row; `Dn::matches` treats it as a wildcard.

use crate::error::MappingError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder value marking a dynamic RDN value in a DN pattern.
pub const DYNAMIC_VALUE: &str = "...";

// ============================================================================
// RDN
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Rdn {
    pairs: Vec<(String, String)>,
}

impl Rdn {
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            pairs: vec![(attribute.into(), value.into())],
        }
    }

    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(a, _)| a.as_str())
    }

    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(a, _)| a.eq_ignore_ascii_case(attribute))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_dynamic(&self) -> bool {
        self.pairs.iter().any(|(_, v)| v == DYNAMIC_VALUE)
    }

    /// True when `self` (concrete) matches `pattern`, honouring `...`.
    pub fn matches(&self, pattern: &Rdn) -> bool {
        self.pairs.len() == pattern.pairs.len()
            && pattern.pairs.iter().all(|(attr, value)| {
                self.get(attr).is_some_and(|mine| {
                    value == DYNAMIC_VALUE || mine.to_lowercase() == value.to_lowercase()
                })
            })
    }
}

impl PartialEq for Rdn {
    fn eq(&self, other: &Self) -> bool {
        self.pairs.len() == other.pairs.len()
            && self.pairs.iter().all(|(attr, value)| {
                other
                    .get(attr)
                    .is_some_and(|v| v.to_lowercase() == value.to_lowercase())
            })
    }
}

impl Eq for Rdn {}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (attr, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str("+")?;
            }
            if value == DYNAMIC_VALUE {
                write!(f, "{attr}={value}")?;
            } else {
                write!(f, "{attr}={}", escape_dn_value(value))?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// DN
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Dn {
    rdns: Vec<Rdn>,
}

impl Dn {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self, MappingError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::root());
        }

        let mut rdns = Vec::new();
        for component in split_unescaped(text, ',') {
            let mut pairs = Vec::new();
            for ava in split_unescaped(&component, '+') {
                let Some((attr, value)) = split_once_unescaped(&ava, '=') else {
                    return Err(MappingError::InvalidDn {
                        dn: text.to_string(),
                        message: format!("missing `=` in `{}`", ava.trim()),
                    });
                };
                let attr = attr.trim();
                if attr.is_empty() {
                    return Err(MappingError::InvalidDn {
                        dn: text.to_string(),
                        message: "empty attribute name".to_string(),
                    });
                }
                pairs.push((attr.to_string(), unescape_dn_value(value.trim())));
            }
            rdns.push(Rdn { pairs });
        }
        Ok(Self { rdns })
    }

    pub fn from_rdns(rdns: Vec<Rdn>) -> Self {
        Self { rdns }
    }

    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// The most specific RDN.
    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    pub fn parent(&self) -> Dn {
        Dn {
            rdns: self.rdns.iter().skip(1).cloned().collect(),
        }
    }

    pub fn child(&self, rdn: Rdn) -> Dn {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend(self.rdns.iter().cloned());
        Dn { rdns }
    }

    pub fn is_dynamic(&self) -> bool {
        self.rdns.iter().any(Rdn::is_dynamic)
    }

    /// True when this concrete DN matches `pattern` RDN by RDN.
    pub fn matches(&self, pattern: &Dn) -> bool {
        self.rdns.len() == pattern.rdns.len()
            && self
                .rdns
                .iter()
                .zip(&pattern.rdns)
                .all(|(rdn, p)| rdn.matches(p))
    }

    /// True when `self` equals `ancestor` or lies below it.
    pub fn ends_with(&self, ancestor: &Dn) -> bool {
        if ancestor.rdns.len() > self.rdns.len() {
            return false;
        }
        let skip = self.rdns.len() - ancestor.rdns.len();
        self.rdns[skip..]
            .iter()
            .zip(&ancestor.rdns)
            .all(|(a, b)| a == b || a.matches(b) || b.matches(a))
    }

    /// Lowercased rendering, suitable as a grouping key.
    pub fn normalized(&self) -> String {
        self.to_string().to_lowercase()
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.rdns == other.rdns
    }
}

impl Eq for Dn {}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{rdn}")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Dn {
    type Error = MappingError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Dn::parse(&text)
    }
}

impl From<Dn> for String {
    fn from(dn: Dn) -> Self {
        dn.to_string()
    }
}

impl std::str::FromStr for Dn {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dn::parse(s)
    }
}

// ============================================================================
// Escaping (RFC 4514)
// ============================================================================

/// Escape a DN attribute value.
pub fn escape_dn_value(value: &str) -> String {
    let count = value.chars().count();
    let mut out = String::with_capacity(value.len() + 4);
    for (i, ch) in value.chars().enumerate() {
        match ch {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                out.push('\\');
                out.push(ch);
            }
            '\0' => out.push_str("\\00"),
            ' ' if i == 0 || i + 1 == count => out.push_str("\\20"),
            '#' if i == 0 => out.push_str("\\23"),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape_dn_value(value: &str) -> String {
    let mut bytes = Vec::with_capacity(value.len());
    let raw = value.as_bytes();
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' && i + 1 < raw.len() {
            let hex = raw
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok());
            match hex {
                Some(b) => {
                    bytes.push(b);
                    i += 3;
                }
                None => {
                    bytes.push(raw[i + 1]);
                    i += 2;
                }
            }
        } else {
            bytes.push(raw[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn split_unescaped(text: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for ch in text.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
        } else if ch == '\\' {
            current.push(ch);
            escaped = true;
        } else if ch == sep {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    parts.push(current);
    parts
}

fn split_once_unescaped(text: &str, sep: char) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (i, ch) in text.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == sep {
            return Some((&text[..i], &text[i + ch.len_utf8()..]));
        }
    }
    None
}
