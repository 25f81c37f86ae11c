//! Tests for the memory backend

use super::*;
use tempfile::tempdir;
use vdir_engine::{Backend, FetchRequest};
use vdir_mapping::{parse_filter, FieldConfig, FieldType, SourceConfig};

fn users() -> SourceConfig {
    SourceConfig::new(
        "users",
        vec![
            FieldConfig::new("id", FieldType::Integer).primary_key(),
            FieldConfig::new("uid", FieldType::Varchar),
        ],
    )
}

fn user(id: i64, uid: &str) -> Row {
    Row::from_pairs([("id", Value::Integer(id)), ("uid", Value::text(uid))])
}

fn seeded() -> MemoryBackend {
    let backend = MemoryBackend::in_memory();
    backend.insert_row("users", user(3, "carol"));
    backend.insert_row("users", user(1, "alice"));
    backend.insert_row("users", user(2, "bob"));
    backend
}

fn fetch_all(backend: &MemoryBackend, filter: Option<&str>, order_by: &[String]) -> Vec<Row> {
    let source = users();
    let filter = filter.map(|f| parse_filter(f).unwrap());
    let request = FetchRequest {
        source: &source,
        filter: filter.as_ref(),
        order_by,
    };
    backend
        .fetch(&request)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[test]
fn test_fetch_filters_and_orders() {
    let backend = seeded();

    let ordered = fetch_all(&backend, None, &["id".to_string()]);
    let ids: Vec<Option<&Value>> = ordered.iter().map(|r| r.first("id")).collect();
    assert_eq!(
        ids,
        vec![Some(&Value::Integer(1)), Some(&Value::Integer(2)), Some(&Value::Integer(3))]
    );

    let matched = fetch_all(&backend, Some("(|(uid=alice)(id>=3))"), &[]);
    assert_eq!(matched.len(), 2);

    let source = SourceConfig::new("nothing", vec![]);
    let request = FetchRequest {
        source: &source,
        filter: None,
        order_by: &[],
    };
    assert_eq!(backend.fetch(&request).unwrap().count(), 0);
}

#[test]
fn test_statements_apply_and_are_journaled() {
    let backend = seeded();

    let insert = Statement::insert(
        "users",
        "u",
        vec![
            ("id".to_string(), Some(Value::Integer(4))),
            ("uid".to_string(), Some(Value::text("dave"))),
            ("cn".to_string(), None),
        ],
    );
    assert_eq!(backend.execute(&insert).unwrap(), 1);
    assert!(backend.rows("users").iter().any(|r| r.get("cn").is_none() && r.first("id") == Some(&Value::Integer(4))));

    let update = Statement::update(
        "users",
        "u",
        vec![("uid".to_string(), Some(Value::text("bobby")))],
        Some(parse_filter("(id=2)").unwrap()),
    );
    assert_eq!(backend.execute(&update).unwrap(), 1);
    assert_eq!(fetch_all(&backend, Some("(uid=bobby)"), &[]).len(), 1);

    let delete = Statement::delete("users", "u", Some(parse_filter("(id<=2)").unwrap()));
    assert_eq!(backend.execute(&delete).unwrap(), 2);
    assert_eq!(backend.rows("users").len(), 2);

    let kinds: Vec<StatementKind> = backend.journal().iter().map(|s| s.kind).collect();
    assert_eq!(
        kinds,
        vec![StatementKind::Insert, StatementKind::Update, StatementKind::Delete]
    );
}

#[test]
fn test_update_to_null_removes_field() {
    let backend = seeded();
    let update = Statement::update(
        "users",
        "u",
        vec![("uid".to_string(), None)],
        Some(parse_filter("(id=1)").unwrap()),
    );
    backend.execute(&update).unwrap();
    assert_eq!(fetch_all(&backend, Some("(uid=*)"), &[]).len(), 2);
}

#[test]
fn test_failing_source_rejects_fetch_and_write() {
    let backend = seeded();
    backend.set_failing("users", true);

    let source = users();
    let request = FetchRequest {
        source: &source,
        filter: None,
        order_by: &[],
    };
    assert!(matches!(backend.fetch(&request), Err(BackendError::Failed(_))));
    let delete = Statement::delete("users", "u", None);
    assert!(backend.execute(&delete).is_err());
    assert_eq!(backend.rows("users").len(), 3);
    assert!(backend.journal().is_empty());

    backend.set_failing("users", false);
    assert_eq!(fetch_all(&backend, None, &[]).len(), 3);
}

#[test]
fn test_auto_flush_survives_reopen() {
    let dir = tempdir().unwrap();
    let config = StorageConfig {
        snapshot_path: Some(dir.path().join("directory.json")),
        auto_flush: true,
    };

    {
        let backend = MemoryBackend::new(config.clone()).unwrap();
        let insert = Statement::insert(
            "users",
            "u",
            vec![
                ("id".to_string(), Some(Value::Integer(7))),
                ("uid".to_string(), Some(Value::text("grace"))),
            ],
        );
        backend.execute(&insert).unwrap();
    }

    let reopened = MemoryBackend::new(config).unwrap();
    assert_eq!(reopened.rows("users"), vec![user(7, "grace")]);
}

#[test]
fn test_flush_without_path_is_a_no_op() {
    let backend = seeded();
    backend.flush().unwrap();
    assert!(backend.config().snapshot_path.is_none());
}
