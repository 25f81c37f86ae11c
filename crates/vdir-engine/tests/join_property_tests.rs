use proptest::prelude::*;
use vdir_engine::{FilterProjector, JoinEngine, Row, SourceValues};
use vdir_mapping::{EntryId, FieldRef, Filter, Operator, Partition, Relationship, Value};

const DIRECTORY: &str = r#"{
  "sources": [
    { "name": "people", "fields": [
        { "name": "id", "type": "INTEGER", "primary_key": true },
        { "name": "uid" },
        { "name": "cn" } ] },
    { "name": "mailboxes", "fields": [
        { "name": "owner", "type": "INTEGER" },
        { "name": "address" } ] }
  ],
  "entries": [
    { "dn": "ou=People", "attributes": [{ "name": "ou", "rdn": true, "constant": "People" }] },
    { "dn": "uid=...,ou=People",
      "attributes": [
        { "name": "uid", "rdn": true, "variable": "a.uid" },
        { "name": "cn", "variable": "a.cn" },
        { "name": "mail", "variable": "b.address" }
      ],
      "sources": [
        { "alias": "a", "source": "people",
          "fields": [{ "name": "uid", "variable": "uid" }, { "name": "cn", "variable": "cn" }] },
        { "alias": "b", "source": "mailboxes", "required": false,
          "fields": [{ "name": "address", "variable": "mail" }] }
      ],
      "relationships": ["a.id = b.owner"]
    }
  ]
}"#;

fn partition() -> Partition {
    Partition::from_json(DIRECTORY).expect("valid partition")
}

fn people(partition: &Partition) -> EntryId {
    partition
        .entry_ids()
        .find(|&id| !partition.is_static(id))
        .expect("dynamic entry")
}

fn side(alias: &'static str, field: &'static str) -> impl Strategy<Value = Vec<SourceValues>> {
    prop::collection::vec(prop::collection::vec(0i64..5, 1..3), 0..5).prop_map(move |rows| {
        rows.into_iter()
            .map(|ids| {
                let mut values = SourceValues::new();
                values.add_all(format!("{alias}.{field}"), ids.into_iter().map(Value::Integer));
                values
            })
            .collect()
    })
}

fn operator() -> impl Strategy<Value = Operator> {
    prop_oneof![
        Just(Operator::Eq),
        Just(Operator::Ne),
        Just(Operator::Lt),
        Just(Operator::Le),
        Just(Operator::Gt),
        Just(Operator::Ge),
    ]
}

fn leaf() -> impl Strategy<Value = Filter> {
    (
        prop_oneof![Just("uid"), Just("cn"), Just("mail")],
        prop_oneof![Just("a"), Just("b"), Just("c")],
    )
        .prop_map(|(attribute, value)| Filter::equal(attribute, value))
}

fn filter() -> impl Strategy<Value = Filter> {
    leaf().prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..3).prop_map(|children| Filter::And { children }),
            prop::collection::vec(inner.clone(), 1..3).prop_map(|children| Filter::Or { children }),
            inner.prop_map(Filter::not),
        ]
    })
}

fn link() -> Relationship {
    Relationship::parse("a.id = b.owner").expect("relationship")
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    #[test]
    fn join_is_exactly_the_matching_pairs(left in side("a", "id"), right in side("b", "owner")) {
        let p = partition();
        let join = JoinEngine::new(&p, people(&p));
        let rels = [link()];

        let joined = join.join(&left, &right, &rels);
        let mut expected = Vec::new();
        for l in &left {
            for r in &right {
                if join.evaluate(&rels, l, r) {
                    expected.push(l.merged(r));
                }
            }
        }
        prop_assert_eq!(joined, expected);
    }

    #[test]
    fn left_join_adds_each_unmatched_row_once(left in side("a", "id"), right in side("b", "owner")) {
        let p = partition();
        let join = JoinEngine::new(&p, people(&p));
        let rels = [link()];

        let inner = join.join(&left, &right, &rels);
        let outer = join.left_join(&left, &right, &rels);
        let unmatched: Vec<&SourceValues> = left
            .iter()
            .filter(|l| !right.iter().any(|r| join.evaluate(&rels, l, r)))
            .collect();
        prop_assert_eq!(outer.len(), inner.len() + unmatched.len());
        for row in &inner {
            prop_assert!(outer.contains(row));
        }
        for row in unmatched {
            prop_assert!(outer.contains(row));
        }
    }

    #[test]
    fn evaluate_ignores_stored_direction(
        l in side("a", "id"),
        r in side("b", "owner"),
        op in operator(),
    ) {
        let p = partition();
        let join = JoinEngine::new(&p, people(&p));
        let forward = Relationship::new(FieldRef::new("a", "id"), op, FieldRef::new("b", "owner"));
        let backward = forward.reversed();

        for a in &l {
            for b in &r {
                let expected = join.evaluate(std::slice::from_ref(&forward), a, b);
                prop_assert_eq!(join.evaluate(std::slice::from_ref(&backward), a, b), expected);
                prop_assert_eq!(join.evaluate(std::slice::from_ref(&forward), b, a), expected);
                prop_assert_eq!(join.evaluate(std::slice::from_ref(&backward), b, a), expected);
            }
        }
    }

    #[test]
    fn projection_never_excludes_an_accepted_row(
        f in filter(),
        uid in prop_oneof![Just("a"), Just("b"), Just("c")],
        cn in prop_oneof![Just("a"), Just("b"), Just("c")],
    ) {
        let p = partition();
        let projector = FilterProjector::new(&p, people(&p));

        let attributes = vdir_engine::Attributes::from_pairs([("uid", uid), ("cn", cn)]);
        let row = Row::from_pairs([("uid", uid), ("cn", cn)]);
        if f.matches(&attributes) {
            if let Some(projected) = projector.project("a", &f) {
                prop_assert!(projected.filter.matches(&row), "{} narrowed to {}", f, projected.filter);
            }
        }
        // `b` carries none of these attributes except `mail`, which the
        // entry above does not have.
        if let Some(projected) = projector.project("b", &f) {
            prop_assert!(projected.filter.to_string().contains("address"));
        }
    }
}
