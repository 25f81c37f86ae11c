//! DN computation for dynamic entries.

use crate::error::Result;
use crate::interpreter::Interpreter;
use crate::transform::cross_product;
use crate::values::SourceValues;
use ahash::AHashSet;
use vdir_mapping::dn::DYNAMIC_VALUE;
use vdir_mapping::{Dn, EntryId, Partition, Rdn};

/// DNs of `entry` derivable from `values`: parent DNs × RDNs.
///
/// When `parent` is given it is the only parent DN; otherwise dynamic parents
/// are computed from the same values, recursively. A dynamic RDN attribute
/// without a value yields no DN at all.
pub fn compute_dns(
    partition: &Partition,
    interpreter: &mut dyn Interpreter,
    entry: EntryId,
    values: &SourceValues,
    parent: Option<&Dn>,
) -> Result<Vec<Dn>> {
    let mapping = partition.entry(entry);

    let parents = match (parent, partition.parent(entry)) {
        (Some(dn), _) => vec![dn.clone()],
        (None, Some(p)) if partition.entry(p).dn.is_dynamic() => {
            compute_dns(partition, interpreter, p, values, None)?
        }
        (None, _) => vec![mapping.dn.parent()],
    };

    let Some(rdn) = mapping.dn.rdn() else {
        return Ok(vec![Dn::root()]);
    };
    let rdns = if rdn.is_dynamic() {
        compute_rdns(partition, interpreter, entry, rdn, values)?
    } else {
        vec![rdn.clone()]
    };

    let mut seen = AHashSet::new();
    let mut out = Vec::new();
    for parent in &parents {
        for rdn in &rdns {
            let dn = parent.child(rdn.clone());
            if seen.insert(dn.normalized()) {
                out.push(dn);
            }
        }
    }
    Ok(out)
}

fn compute_rdns(
    partition: &Partition,
    interpreter: &mut dyn Interpreter,
    entry: EntryId,
    pattern: &Rdn,
    values: &SourceValues,
) -> Result<Vec<Rdn>> {
    let mapping = partition.entry(entry);
    interpreter.clear();
    interpreter.set_values(values);

    let mut choices: Vec<Vec<(String, String)>> = Vec::new();
    for (attr, value) in pattern.pairs() {
        if value != DYNAMIC_VALUE {
            choices.push(vec![(attr.clone(), value.clone())]);
            continue;
        }
        let Some(attribute) = mapping.attribute(attr) else {
            return Ok(vec![]);
        };
        let Some(found) = interpreter.eval(&attribute.derivation)? else {
            return Ok(vec![]);
        };
        choices.push(
            found
                .iter()
                .map(|v| (attr.clone(), v.to_string()))
                .collect(),
        );
    }

    Ok(cross_product(&choices)
        .into_iter()
        .map(Rdn::from_pairs)
        .collect())
}
