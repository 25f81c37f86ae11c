//! ModRdn: rename an entry by rewriting its RDN attribute values.
//!
//! The new values flow through the same derivation as modify, so fields
//! joined to the renamed ones follow along.

use crate::request::Entry;
use crate::values::Attributes;
use vdir_mapping::{Dn, Rdn, Value};

/// Attributes of `old` renamed to `new_rdn`. With `delete_old_rdn` the old
/// RDN values are removed, otherwise they stay as extra values.
pub fn renamed_attributes(old: &Entry, new_rdn: &Rdn, delete_old_rdn: bool) -> Attributes {
    let mut attributes = old.attributes.clone();
    if delete_old_rdn {
        if let Some(old_rdn) = old.dn.rdn() {
            for (attr, value) in old_rdn.pairs() {
                attributes.remove_values(attr, &[Value::text(value.clone())]);
            }
        }
    }
    for (attr, value) in new_rdn.pairs() {
        attributes.add(attr.clone(), Value::text(value.clone()));
    }
    attributes
}

pub fn renamed_dn(old: &Dn, new_rdn: &Rdn) -> Dn {
    old.parent().child(new_rdn.clone())
}
