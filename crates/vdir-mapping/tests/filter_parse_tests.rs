use vdir_mapping::{parse_filter, Filter, Operator};

#[test]
fn parses_nested_and_or_not() {
    let f = parse_filter("(&(objectClass=person)(|(cn=alice)(cn=bob))(!(uid=root)))").expect("parse");
    assert_eq!(
        f,
        Filter::And {
            children: vec![
                Filter::equal("objectClass", "person"),
                Filter::Or {
                    children: vec![Filter::equal("cn", "alice"), Filter::equal("cn", "bob")],
                },
                Filter::not(Filter::equal("uid", "root")),
            ],
        }
    );
}

#[test]
fn parses_presence_and_substrings() {
    assert_eq!(parse_filter("(mail=*)").unwrap(), Filter::present("mail"));
    assert_eq!(
        parse_filter("(cn=Al*ic*e)").unwrap(),
        Filter::Substring {
            attribute: "cn".into(),
            initial: Some("Al".into()),
            any: vec!["ic".into()],
            last: Some("e".into()),
        }
    );
    assert_eq!(
        parse_filter("(cn=*son)").unwrap(),
        Filter::Substring {
            attribute: "cn".into(),
            initial: None,
            any: vec![],
            last: Some("son".into()),
        }
    );
}

#[test]
fn parses_extended_operators() {
    assert_eq!(
        parse_filter("(age<>3)").unwrap(),
        Filter::simple("age", Operator::Ne, "3")
    );
    assert_eq!(
        parse_filter("(age<3)").unwrap(),
        Filter::simple("age", Operator::Lt, "3")
    );
    assert_eq!(
        parse_filter("(age>=30)").unwrap(),
        Filter::simple("age", Operator::Ge, "30")
    );
    // Approximate match is treated as equality.
    assert_eq!(parse_filter("(cn~=x)").unwrap(), Filter::equal("cn", "x"));
}

#[test]
fn accepts_bare_item_and_whitespace() {
    assert_eq!(parse_filter("cn=foo").unwrap(), Filter::equal("cn", "foo"));
    assert_eq!(
        parse_filter(" ( & ( cn = foo ) ( sn=bar ) ) ").unwrap(),
        Filter::And {
            children: vec![Filter::equal("cn", "foo"), Filter::equal("sn", "bar")],
        }
    );
}

#[test]
fn decodes_hex_escapes() {
    assert_eq!(
        parse_filter(r"(cn=a\28b\29\2a)").unwrap(),
        Filter::equal("cn", "a(b)*")
    );
}

#[test]
fn rendered_filter_parses_back() {
    let text = "(&(cn=a\\28b\\29)(|(age<=3)(mail=*))(!(sn=x*y)))";
    let f = parse_filter(text).unwrap();
    assert_eq!(f.to_string(), text);
}

#[test]
fn rejects_malformed_filters() {
    assert!(parse_filter("(cn=foo").is_err());
    assert!(parse_filter("(&)").is_err());
    assert!(parse_filter("(=foo)").is_err());
    let err = parse_filter("(cn=foo))").unwrap_err();
    assert!(err.to_string().contains("invalid filter"), "err={err}");
}
