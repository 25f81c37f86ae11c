use proptest::prelude::*;
use vdir_mapping::{append_and, append_or, compare, convert, FieldType, Filter, Operator, Value};

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

fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        (-1000i64..1000).prop_map(Value::Integer),
        "[a-zA-Z]{0,6}".prop_map(Value::Text),
    ]
}

fn leaf() -> impl Strategy<Value = Filter> {
    ("[a-c]", "[0-3]").prop_map(|(a, v)| Filter::equal(a, v))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    #[test]
    fn integer_coercion_agrees_for_text_and_typed(n in any::<i64>()) {
        prop_assert_eq!(
            convert(&Value::text(n.to_string()), FieldType::Integer),
            convert(&Value::Integer(n), FieldType::Integer)
        );
        prop_assert_eq!(
            convert(&Value::Integer(n), FieldType::Varchar),
            Some(Value::Text(n.to_string()))
        );
    }

    #[test]
    fn double_coercion_agrees_for_text_and_typed(d in -1.0e9f64..1.0e9) {
        prop_assert_eq!(
            convert(&Value::text(d.to_string()), FieldType::Double),
            convert(&Value::Double(d), FieldType::Double)
        );
    }

    #[test]
    fn mirrored_operator_holds_for_swapped_operands(a in value(), b in value(), op in operator()) {
        prop_assert_eq!(compare(&a, op, &b), compare(&b, op.mirrored(), &a));
    }

    #[test]
    fn append_is_idempotent_and_absorbs_none(a in leaf(), b in leaf()) {
        let ab = append_and(Some(a.clone()), Some(b.clone()));
        prop_assert_eq!(append_and(ab.clone(), Some(b.clone())), ab.clone());
        prop_assert_eq!(append_and(ab.clone(), None), ab);
        prop_assert_eq!(append_or(None, Some(a.clone())), Some(a.clone()));
        let or = append_or(Some(a.clone()), Some(b.clone()));
        prop_assert_eq!(append_or(or.clone(), Some(a)), or);
    }
}
