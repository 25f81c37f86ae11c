//! Row shape transforms.

use crate::values::Row;

/// Every way of picking one element from each choice list, in order.
/// An empty choice list yields no combinations.
pub fn cross_product<T: Clone>(choices: &[Vec<T>]) -> Vec<Vec<T>> {
    let mut out: Vec<Vec<T>> = vec![vec![]];
    for options in choices {
        let mut next = Vec::with_capacity(out.len() * options.len());
        for prefix in &out {
            for option in options {
                let mut combo = prefix.clone();
                combo.push(option.clone());
                next.push(combo);
            }
        }
        out = next;
    }
    out
}

/// Expand a multi-valued row into single-valued rows, one per combination.
///
/// `{id: [1], mail: [a, b]}` becomes `{id: 1, mail: a}` and `{id: 1, mail: b}`.
pub fn flatten(row: &Row) -> Vec<Row> {
    if row.is_empty() {
        return vec![];
    }
    let fields: Vec<&str> = row.fields().collect();
    let choices: Vec<Vec<_>> = fields
        .iter()
        .map(|f| row.get(f).map(<[_]>::to_vec).unwrap_or_default())
        .collect();
    cross_product(&choices)
        .into_iter()
        .map(|combo| {
            let mut flat = Row::new();
            for (field, value) in fields.iter().zip(combo) {
                flat.add(*field, value);
            }
            flat
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdir_mapping::Value;

    #[test]
    fn flatten_expands_multi_valued_fields() {
        let mut row = Row::new();
        row.add("id", Value::Integer(1));
        row.set("mail", vec![Value::text("a"), Value::text("b")]);

        let rows = flatten(&row);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.first("id") == Some(&Value::Integer(1))));
        assert_eq!(rows[1].first("mail"), Some(&Value::text("b")));
    }

    #[test]
    fn cross_product_of_nothing_is_one_empty_combination() {
        assert_eq!(cross_product::<u8>(&[]), vec![Vec::<u8>::new()]);
        assert!(cross_product(&[vec![1], vec![]]).is_empty());
        assert!(flatten(&Row::new()).is_empty());
    }
}
