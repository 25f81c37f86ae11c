//! Integration tests for the complete vdir pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Partition JSON → Engine → MemoryBackend
//! - Nested entries resolved through inherited sources
//! - Writes applied to the tables and read back through search
//!
//! Run with: cargo test --test integration_tests

use std::sync::Arc;
use tempfile::tempdir;
use vdir_engine::{
    Attributes, Engine, EngineConfig, ErrorKind, Modification, Scope, SearchRequest,
    StatementKind,
};
use vdir_mapping::{parse_filter, Dn, Partition, Rdn, Value};
use vdir_storage::persistence::{save_snapshot, Snapshot};
use vdir_storage::{MemoryBackend, StorageConfig};

// ============================================================================
// Fixtures
// ============================================================================

const PARTITION: &str = r#"{
  "name": "example",
  "sources": [
    { "name": "users", "fields": [
        { "name": "id", "type": "INTEGER", "primary_key": true },
        { "name": "uid" },
        { "name": "cn" },
        { "name": "password" } ] },
    { "name": "emails", "fields": [
        { "name": "id", "type": "INTEGER", "primary_key": true },
        { "name": "user_id", "type": "INTEGER" },
        { "name": "address" } ] },
    { "name": "groups", "fields": [
        { "name": "gid", "type": "INTEGER", "primary_key": true },
        { "name": "name" } ] },
    { "name": "members", "fields": [
        { "name": "gid", "type": "INTEGER", "primary_key": true },
        { "name": "uid", "primary_key": true } ] }
  ],
  "entries": [
    { "dn": "dc=example,dc=com", "object_classes": ["domain"],
      "attributes": [{ "name": "dc", "rdn": true, "constant": "example" }] },
    { "dn": "ou=Users,dc=example,dc=com", "object_classes": ["organizationalUnit"],
      "attributes": [{ "name": "ou", "rdn": true, "constant": "Users" }] },
    { "dn": "uid=...,ou=Users,dc=example,dc=com", "object_classes": ["person"],
      "attributes": [
        { "name": "uid", "rdn": true, "variable": "u.uid" },
        { "name": "cn", "variable": "u.cn" },
        { "name": "uidNumber", "variable": "u.id" },
        { "name": "userPassword", "variable": "u.password" },
        { "name": "mail", "variable": "e.address" }
      ],
      "sources": [
        { "alias": "u", "source": "users",
          "fields": [
            { "name": "id", "variable": "uidNumber" },
            { "name": "uid", "variable": "uid" },
            { "name": "cn", "variable": "cn" },
            { "name": "password", "variable": "userPassword" } ] },
        { "alias": "e", "source": "emails", "required": false,
          "fields": [{ "name": "address", "variable": "mail" }] }
      ],
      "relationships": ["u.id = e.user_id"]
    },
    { "dn": "ou=Groups,dc=example,dc=com", "object_classes": ["organizationalUnit"],
      "attributes": [{ "name": "ou", "rdn": true, "constant": "Groups" }] },
    { "dn": "cn=...,ou=Groups,dc=example,dc=com", "object_classes": ["groupOfNames"],
      "attributes": [
        { "name": "cn", "rdn": true, "variable": "g.name" },
        { "name": "gidNumber", "variable": "g.gid" }
      ],
      "sources": [
        { "alias": "g", "source": "groups",
          "fields": [
            { "name": "gid", "variable": "gidNumber" },
            { "name": "name", "variable": "cn" } ] }
      ]
    },
    { "dn": "uid=...,cn=...,ou=Groups,dc=example,dc=com", "object_classes": ["member"],
      "attributes": [
        { "name": "uid", "rdn": true, "variable": "m.uid" },
        { "name": "description", "expression": "${m.uid} in ${g.name}" }
      ],
      "sources": [
        { "alias": "m", "source": "members",
          "fields": [{ "name": "uid", "variable": "uid" }] }
      ],
      "relationships": ["g.gid = m.gid"]
    }
  ]
}"#;

const TABLES: &str = r#"{
  "tables": {
    "users": [
      { "id": 1, "uid": "alice", "cn": "Alice Liddell", "password": "secret" },
      { "id": 2, "uid": "bob", "cn": "Bob Builder", "password": "hunter2" }
    ],
    "emails": [
      { "id": 10, "user_id": 1, "address": "alice@example.com" },
      { "id": 11, "user_id": 1, "address": "liddell@example.com" }
    ],
    "groups": [
      { "gid": 100, "name": "admins" },
      { "gid": 200, "name": "staff" }
    ],
    "members": [
      { "gid": 100, "uid": "alice" },
      { "gid": 100, "uid": "bob" },
      { "gid": 200, "uid": "bob" }
    ]
  }
}"#;

/// Opt-in log output: `VDIR_LOG=debug cargo test --test integration_tests`.
fn init_logging() {
    if let Ok(directives) = std::env::var("VDIR_LOG") {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(directives))
            .with_test_writer()
            .try_init();
    }
}

fn directory() -> (Engine, Arc<MemoryBackend>) {
    init_logging();
    let partition = Partition::from_json(PARTITION).expect("valid partition");
    let backend = Arc::new(MemoryBackend::from_snapshot(
        Snapshot::from_json(TABLES).expect("valid tables"),
    ));
    let engine = Engine::new(Arc::new(partition), backend.clone());
    (engine, backend)
}

fn dn(text: &str) -> Dn {
    Dn::parse(text).unwrap()
}

fn dns(entries: &[vdir_engine::Entry]) -> Vec<String> {
    entries.iter().map(|e| e.dn.to_string()).collect()
}

// ============================================================================
// Reads
// ============================================================================

#[test]
fn test_whole_tree_subtree_search() {
    let (engine, _) = directory();

    let entries = engine
        .search(&SearchRequest::new(dn("dc=example,dc=com"), Scope::Subtree))
        .unwrap();
    let mut found = dns(&entries);
    found.sort();
    let mut expected = vec![
        "dc=example,dc=com",
        "ou=Users,dc=example,dc=com",
        "uid=alice,ou=Users,dc=example,dc=com",
        "uid=bob,ou=Users,dc=example,dc=com",
        "ou=Groups,dc=example,dc=com",
        "cn=admins,ou=Groups,dc=example,dc=com",
        "uid=alice,cn=admins,ou=Groups,dc=example,dc=com",
        "uid=bob,cn=admins,ou=Groups,dc=example,dc=com",
        "cn=staff,ou=Groups,dc=example,dc=com",
        "uid=bob,cn=staff,ou=Groups,dc=example,dc=com",
    ];
    expected.sort();
    assert_eq!(found, expected);
    assert_eq!(entries[0].dn.to_string(), "dc=example,dc=com");
}

#[test]
fn test_nested_entries_read_inherited_values() {
    let (engine, _) = directory();

    let member = engine
        .find(&dn("uid=bob,cn=staff,ou=Groups,dc=example,dc=com"))
        .unwrap();
    assert_eq!(
        member.attributes.first("description"),
        Some(&Value::text("bob in staff"))
    );
    assert!(member.source_values.contains_source("g"));

    // alice is only in admins.
    let err = engine
        .find(&dn("uid=alice,cn=staff,ou=Groups,dc=example,dc=com"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_one_level_members_with_filter() {
    let (engine, _) = directory();

    let request = SearchRequest::new(dn("cn=admins,ou=Groups,dc=example,dc=com"), Scope::OneLevel)
        .with_filter(parse_filter("(uid=b*)").unwrap());
    let entries = engine.search(&request).unwrap();
    assert_eq!(dns(&entries), vec!["uid=bob,cn=admins,ou=Groups,dc=example,dc=com"]);
}

#[test]
fn test_substring_filter_on_multi_valued_attribute() {
    let (engine, _) = directory();

    let request = SearchRequest::new(dn("ou=Users,dc=example,dc=com"), Scope::OneLevel)
        .with_filter(parse_filter("(&(mail=*liddell*)(objectClass=person))").unwrap())
        .with_attributes(["mail"]);
    let entries = engine.search(&request).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attributes.get("mail").map(<[Value]>::len), Some(2));
}

#[test]
fn test_bind_against_snapshot() {
    let (engine, _) = directory();
    let bob = dn("uid=bob,ou=Users,dc=example,dc=com");
    assert!(engine.bind(&bob, "hunter2").is_ok());
    assert_eq!(
        engine.bind(&bob, "secret").unwrap_err().kind(),
        ErrorKind::InvalidCredentials
    );
}

#[test]
fn test_engine_size_limit_from_config() {
    let (engine, _) = directory();
    // ou=Groups holds two groups; one fetch returning both is too many.
    let engine = engine.with_config(EngineConfig {
        size_limit: 1,
        ..EngineConfig::default()
    });
    let err = engine
        .search(&SearchRequest::new(dn("ou=Groups,dc=example,dc=com"), Scope::Subtree))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SizeLimitExceeded);
}

// ============================================================================
// Writes
// ============================================================================

#[test]
fn test_add_then_search() {
    let (engine, backend) = directory();

    let attributes = Attributes::from_pairs([
        ("uidNumber", Value::Integer(3)),
        ("cn", Value::text("Carol")),
        ("userPassword", Value::text("pw")),
        ("mail", Value::text("carol@example.com")),
    ]);
    engine
        .add(&dn("uid=carol,ou=Users,dc=example,dc=com"), &attributes)
        .unwrap();
    assert_eq!(backend.rows("emails").len(), 3);

    let carol = engine.find(&dn("uid=carol,ou=Users,dc=example,dc=com")).unwrap();
    assert_eq!(carol.attributes.first("mail"), Some(&Value::text("carol@example.com")));
    assert!(engine
        .bind(&dn("uid=carol,ou=Users,dc=example,dc=com"), "pw")
        .is_ok());
}

#[test]
fn test_add_without_mail_leaves_emails_alone() {
    let (engine, backend) = directory();

    engine
        .add(
            &dn("uid=dave,ou=Users,dc=example,dc=com"),
            &Attributes::from_pairs([("uidNumber", Value::Integer(4)), ("cn", Value::text("Dave"))]),
        )
        .unwrap();
    assert_eq!(backend.rows("emails").len(), 2);

    engine
        .modify(
            &dn("uid=alice,ou=Users,dc=example,dc=com"),
            &[Modification::delete("mail", vec![])],
        )
        .unwrap();
    assert!(backend.rows("emails").is_empty());
    let alice = engine.find(&dn("uid=alice,ou=Users,dc=example,dc=com")).unwrap();
    assert!(alice.attributes.get("mail").is_none());
}

#[test]
fn test_add_member_takes_group_key_from_parent() {
    let (engine, backend) = directory();

    engine
        .add(
            &dn("uid=alice,cn=staff,ou=Groups,dc=example,dc=com"),
            &Attributes::new(),
        )
        .unwrap();

    let journal = backend.journal();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].source_name, "members");
    assert!(journal[0]
        .assignments
        .contains(&("gid".to_string(), Some(Value::Integer(200)))));
    assert!(engine
        .find(&dn("uid=alice,cn=staff,ou=Groups,dc=example,dc=com"))
        .is_ok());
}

#[test]
fn test_add_under_missing_parent_is_not_found() {
    let (engine, backend) = directory();
    let err = engine
        .add(
            &dn("uid=alice,cn=nobody,ou=Groups,dc=example,dc=com"),
            &Attributes::new(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(backend.journal().is_empty());
}

#[test]
fn test_modify_add_value_inserts_row() {
    let (engine, backend) = directory();

    engine
        .modify(
            &dn("uid=bob,ou=Users,dc=example,dc=com"),
            &[Modification::add("mail", vec![Value::text("bob@example.com")])],
        )
        .unwrap();

    let journal = backend.journal();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].kind, StatementKind::Insert);
    let bob = engine.find(&dn("uid=bob,ou=Users,dc=example,dc=com")).unwrap();
    assert_eq!(bob.attributes.first("mail"), Some(&Value::text("bob@example.com")));
}

#[test]
fn test_modrdn_moves_entry() {
    let (engine, _) = directory();

    let renamed = engine
        .modrdn(
            &dn("uid=bob,ou=Users,dc=example,dc=com"),
            &Rdn::new("uid", "robert"),
            true,
        )
        .unwrap();
    assert!(engine.find(&renamed).is_ok());
    assert_eq!(
        engine
            .find(&dn("uid=bob,ou=Users,dc=example,dc=com"))
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn test_delete_member_leaves_other_groups() {
    let (engine, backend) = directory();

    engine
        .delete(&dn("uid=bob,cn=admins,ou=Groups,dc=example,dc=com"))
        .unwrap();
    assert_eq!(backend.rows("members").len(), 2);
    assert!(engine
        .find(&dn("uid=bob,cn=staff,ou=Groups,dc=example,dc=com"))
        .is_ok());
}

#[test]
fn test_delete_user_and_mail() {
    let (engine, backend) = directory();

    engine
        .delete(&dn("uid=alice,ou=Users,dc=example,dc=com"))
        .unwrap();
    assert!(backend.rows("emails").is_empty());
    assert_eq!(backend.rows("users").len(), 1);
    let last = backend.journal().last().cloned().unwrap();
    assert_eq!(last.source_name, "users");
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn test_writes_flush_to_snapshot() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tables.json");
    save_snapshot(&path, &Snapshot::from_json(TABLES).unwrap()).unwrap();

    let config = StorageConfig {
        snapshot_path: Some(path.clone()),
        auto_flush: true,
    };
    let partition = Arc::new(Partition::from_json(PARTITION).unwrap());
    {
        let backend = Arc::new(MemoryBackend::new(config.clone()).unwrap());
        let engine = Engine::new(partition.clone(), backend);
        engine
            .delete(&dn("uid=bob,cn=staff,ou=Groups,dc=example,dc=com"))
            .unwrap();
    }

    let backend = Arc::new(MemoryBackend::new(config).unwrap());
    let engine = Engine::new(partition, backend);
    let staff = engine
        .search(&SearchRequest::new(
            dn("cn=staff,ou=Groups,dc=example,dc=com"),
            Scope::OneLevel,
        ))
        .unwrap();
    assert!(staff.is_empty());

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["tables"]["members"].as_array().map(Vec::len), Some(2));
}
