//! Integration tests exercising the storage and ODM layers together
//! against a real (temp-file) SQLite database.

use docstore_core::db::{Database, Lookup};
use docstore_core::odm::{bind_database, unbind_database, FieldSpec, FieldType, ManyToMany, Model, RelatedSet};
use docstore_core::Result;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn temp_database() -> (TempDir, Arc<Database>) {
    let dir = TempDir::new().expect("create temp dir");
    let db = Database::open(dir.path().join("store.db")).expect("open database");
    (dir, db)
}

/// `bind_database`/`unbind_database` are process-wide; serialize the tests
/// below so they don't race each other's binding.
static ODM_TEST_LOCK: Mutex<()> = Mutex::new(());

// ============================================
// Indexed search + query plan
// ============================================

#[test]
fn indexed_search_uses_the_generated_column() {
    let (_dir, db) = temp_database();
    let users = db.collection("users", &["email".to_string()]).unwrap();
    users.insert(&json!({"email": "ada@example.com", "name": "Ada"})).unwrap();
    users.insert(&json!({"email": "grace@example.com", "name": "Grace"})).unwrap();

    let found = users.search("email", &json!("grace@example.com")).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].1["name"], "Grace");

    let plan = users.explain("email", &json!("grace@example.com")).unwrap();
    let uses_index = plan.iter().any(|step| step.detail.to_uppercase().contains("USING INDEX"));
    assert!(uses_index, "plan did not use the index: {plan:?}");
}

#[test]
fn unindexed_search_falls_back_to_json_scan() {
    let (_dir, db) = temp_database();
    let notes = db.collection("notes", &[]).unwrap();
    notes.insert(&json!({"body": "hello"})).unwrap();
    let plan = notes.explain("body", &json!("hello")).unwrap();
    let is_scan = plan.iter().any(|step| step.detail.to_uppercase().contains("SCAN"));
    assert!(is_scan, "plan unexpectedly used an index: {plan:?}");
}

// ============================================
// Transaction atomicity: bank transfer
// ============================================

#[test]
fn bank_transfer_is_atomic_on_failure() {
    let (_dir, db) = temp_database();
    let accounts = db.collection("accounts", &["owner".to_string()]).unwrap();
    let from_id = accounts.insert(&json!({"owner": "alice", "balance": 100})).unwrap();
    let to_id = accounts.insert(&json!({"owner": "bob", "balance": 0})).unwrap();

    let transfer = |amount: i64, fail: bool| -> Result<()> {
        db.transaction(|| {
            let from = accounts.get_by_id(from_id)?.unwrap();
            let balance = from["balance"].as_i64().unwrap();
            if balance < amount {
                return Err(docstore_core::Error::InvalidDocument("insufficient funds".to_string()));
            }
            accounts.update("owner", &json!("alice"), &json!({"balance": balance - amount}))?;
            if fail {
                return Err(docstore_core::Error::InvalidDocument("simulated failure".to_string()));
            }
            let to = accounts.get_by_id(to_id)?.unwrap();
            let to_balance = to["balance"].as_i64().unwrap();
            accounts.update("owner", &json!("bob"), &json!({"balance": to_balance + amount}))?;
            Ok(())
        })
    };

    // A transfer that fails after debiting alice must not leave bob credited
    // or alice debited.
    assert!(transfer(30, true).is_err());
    let alice = accounts.get_by_id(from_id).unwrap().unwrap();
    let bob = accounts.get_by_id(to_id).unwrap().unwrap();
    assert_eq!(alice["balance"], 100);
    assert_eq!(bob["balance"], 0);

    // A clean transfer commits both sides.
    transfer(30, false).unwrap();
    let alice = accounts.get_by_id(from_id).unwrap().unwrap();
    let bob = accounts.get_by_id(to_id).unwrap().unwrap();
    assert_eq!(alice["balance"], 70);
    assert_eq!(bob["balance"], 30);

    assert!(!db.in_transaction());
    assert_eq!(db.savepoint_depth(), 0);
}

// ============================================
// Savepoints
// ============================================

#[test]
fn savepoint_rollback_undoes_only_its_own_writes() {
    let (_dir, db) = temp_database();
    let log = db.collection("log", &[]).unwrap();

    db.begin().unwrap();
    log.insert(&json!({"line": 1})).unwrap();
    let sp = db.savepoint(None).unwrap();
    log.insert(&json!({"line": 2})).unwrap();
    db.rollback_to(&sp).unwrap();
    db.release(&sp).unwrap();
    log.insert(&json!({"line": 3})).unwrap();
    db.commit().unwrap();

    let rows = log.all(None, None).unwrap();
    let lines: Vec<i64> = rows.iter().map(|(_, v)| v["line"].as_i64().unwrap()).collect();
    assert_eq!(lines, vec![1, 3]);
}

#[test]
fn rollback_to_unknown_savepoint_is_an_error() {
    let (_dir, db) = temp_database();
    db.begin().unwrap();
    let err = db.rollback_to("nonexistent").unwrap_err();
    assert!(matches!(err, docstore_core::Error::InvalidTransactionState(_)));
    db.rollback().unwrap();
}

// ============================================
// Cursor pagination
// ============================================

#[test]
fn cursor_pagination_covers_every_row_exactly_once() {
    let (_dir, db) = temp_database();
    let items = db.collection("items", &[]).unwrap();
    let mut inserted = Vec::new();
    for i in 0..250 {
        inserted.push(items.insert(&json!({"n": i})).unwrap());
    }

    let mut seen = Vec::new();
    let mut cursor = None;
    loop {
        let page = items.all_cursor(cursor, 40).unwrap();
        assert!(page.items.len() <= 40);
        seen.extend(page.items.iter().map(|(id, _)| *id));
        if !page.has_more {
            assert!(page.next_cursor.is_none() || page.items.len() < 40);
            break;
        }
        cursor = page.next_cursor;
    }

    inserted.sort();
    seen.sort();
    assert_eq!(inserted, seen);
}

// ============================================
// ODM: lazy foreign keys and lookup operators
// ============================================

struct Author {
    id: Option<i64>,
    name: String,
}

impl Model for Author {
    fn indexed_fields() -> Vec<String> {
        vec![]
    }
    fn fields() -> &'static [FieldSpec] {
        static FIELDS: &[FieldSpec] = &[FieldSpec::new("name", FieldType::String)];
        FIELDS
    }
    fn id(&self) -> Option<i64> {
        self.id
    }
    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }
    fn to_fields(&self) -> Result<Map<String, Value>> {
        let mut m = Map::new();
        m.insert("name".to_string(), json!(self.name));
        Ok(m)
    }
    fn from_fields(id: i64, fields: Map<String, Value>) -> Result<Self> {
        Ok(Author {
            id: Some(id),
            name: fields.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
        })
    }
}

struct Post {
    id: Option<i64>,
    title: String,
    views: i64,
    author_id: i64,
}

impl Model for Post {
    fn collection_name() -> String {
        "posts".to_string()
    }
    fn indexed_fields() -> Vec<String> {
        vec!["author_id".to_string()]
    }
    fn fields() -> &'static [FieldSpec] {
        static FIELDS: &[FieldSpec] = &[
            FieldSpec::new("title", FieldType::String),
            FieldSpec::with_default("views", FieldType::Integer, json!(0)),
            FieldSpec::new("author_id", FieldType::Integer),
        ];
        FIELDS
    }
    fn id(&self) -> Option<i64> {
        self.id
    }
    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }
    fn to_fields(&self) -> Result<Map<String, Value>> {
        let mut m = Map::new();
        m.insert("title".to_string(), json!(self.title));
        m.insert("views".to_string(), json!(self.views));
        m.insert("author_id".to_string(), json!(self.author_id));
        Ok(m)
    }
    fn from_fields(id: i64, fields: Map<String, Value>) -> Result<Self> {
        Ok(Post {
            id: Some(id),
            title: fields.get("title").and_then(Value::as_str).unwrap_or_default().to_string(),
            views: fields.get("views").and_then(Value::as_i64).unwrap_or(0),
            author_id: fields.get("author_id").and_then(Value::as_i64).unwrap_or(0),
        })
    }
}

#[test]
fn odm_round_trips_and_follows_lazy_relations() {
    let (_dir, db) = temp_database();
    bind_database(db);

    let mut author = Author { id: None, name: "Ada Lovelace".to_string() };
    author.save().unwrap();
    let author_id = author.id().unwrap();

    let mut post = Post { id: None, title: "On the Analytical Engine".to_string(), views: 42, author_id };
    post.save().unwrap();

    let fetched = Post::get_by_id(post.id().unwrap()).unwrap().unwrap();
    assert_eq!(fetched.title, "On the Analytical Engine");

    let related_author = Author::get_by_id(fetched.author_id).unwrap().unwrap();
    assert_eq!(related_author.name, "Ada Lovelace");

    unbind_database();
}

#[test]
fn odm_lookup_operators_filter_correctly() {
    let (_dir, db) = temp_database();
    bind_database(db);

    let mut a = Post { id: None, title: "a".to_string(), views: 5, author_id: 1 };
    let mut b = Post { id: None, title: "b".to_string(), views: 50, author_id: 1 };
    let mut c = Post { id: None, title: "c".to_string(), views: 500, author_id: 2 };
    a.save().unwrap();
    b.save().unwrap();
    c.save().unwrap();

    let popular = Post::find_where("views", Lookup::Gte, Some(&json!(50))).unwrap();
    assert_eq!(popular.len(), 2);

    let by_author = Post::find_by("author_id", &json!(1)).unwrap();
    assert_eq!(by_author.len(), 2);

    unbind_database();
}

#[test]
fn operations_without_a_bound_database_raise_database_not_bound() {
    unbind_database();
    let err = Author::all().unwrap_err();
    assert!(matches!(err, docstore_core::Error::DatabaseNotBound));
}

// ============================================
// ODM: multi-field filter, count, insert_many, delete_many, paginate
// ============================================

#[test]
fn odm_filter_conjunction_and_count_agree_with_length() {
    let _guard = ODM_TEST_LOCK.lock().unwrap();
    let (_dir, db) = temp_database();
    bind_database(db);

    let ages = [17, 18, 19, 20, 21];
    let mut people: Vec<Post> = ages
        .iter()
        .map(|&age| Post { id: None, title: "p".to_string(), views: age, author_id: 9 })
        .collect();
    Post::insert_many(&mut people).unwrap();
    assert!(people.iter().all(|p| p.id().is_some()));

    let filters: Vec<(&str, Option<Value>)> = vec![("views__gte", Some(json!(18))), ("views__lt", Some(json!(21)))];
    let matched = Post::filter(&filters, None, None).unwrap();
    assert_eq!(matched.len(), 3);
    assert_eq!(Post::count(&filters).unwrap(), matched.len());

    unbind_database();
}

#[test]
fn odm_delete_many_requires_a_filter_and_removes_matches() {
    let _guard = ODM_TEST_LOCK.lock().unwrap();
    let (_dir, db) = temp_database();
    bind_database(db);

    let mut drafts = vec![
        Post { id: None, title: "d1".to_string(), views: 0, author_id: 1 },
        Post { id: None, title: "d2".to_string(), views: 0, author_id: 1 },
    ];
    Post::insert_many(&mut drafts).unwrap();

    let err = Post::delete_many(&[]).unwrap_err();
    assert!(matches!(err, docstore_core::Error::MissingPredicate));

    let removed = Post::delete_many(&[("author_id", Some(json!(1)))]).unwrap();
    assert_eq!(removed, 2);
    assert_eq!(Post::all().unwrap().len(), 0);

    unbind_database();
}

#[test]
fn odm_paginate_walks_every_row_in_chunks() {
    let _guard = ODM_TEST_LOCK.lock().unwrap();
    let (_dir, db) = temp_database();
    bind_database(db);

    let mut posts: Vec<Post> = (0..250)
        .map(|i| Post { id: None, title: format!("post-{i}"), views: i, author_id: 1 })
        .collect();
    Post::insert_many(&mut posts).unwrap();

    let seen: Vec<Post> = Post::paginate(&[]).collect::<Result<Vec<_>>>().unwrap();
    assert_eq!(seen.len(), 250);

    unbind_database();
}

#[test]
fn odm_foreign_key_joins_on_a_declared_field_not_just_rowid() {
    let _guard = ODM_TEST_LOCK.lock().unwrap();
    let (_dir, db) = temp_database();
    bind_database(db);

    let mut author = Author { id: None, name: "Grace Hopper".to_string() };
    author.save().unwrap();

    // Join on `name` (a declared field) instead of `_id`.
    let fk: docstore_core::odm::ForeignKey<Author> = docstore_core::odm::ForeignKey::on(json!("Grace Hopper"), "name", false);
    assert_eq!(fk.get().unwrap().unwrap().name, "Grace Hopper");

    unbind_database();
}

#[test]
fn odm_related_set_and_many_to_many_manage_their_relationships() {
    let _guard = ODM_TEST_LOCK.lock().unwrap();
    let (_dir, db) = temp_database();
    bind_database(db);

    let mut author = Author { id: None, name: "Ada Lovelace".to_string() };
    author.save().unwrap();
    let author_id = author.id().unwrap();

    let mut first = Post { id: None, title: "Notes on the Engine".to_string(), views: 0, author_id };
    let mut second = Post { id: None, title: "On Numbers".to_string(), views: 0, author_id };
    first.save().unwrap();
    second.save().unwrap();

    let posts: RelatedSet<Post> = RelatedSet::new(author_id, "author_id");
    assert_eq!(posts.count().unwrap(), 2);
    assert_eq!(posts.len().unwrap(), posts.count().unwrap());
    assert_eq!(posts.all(Some(1)).unwrap().len(), 1);
    let titled = posts.filter(&[("title", Some(json!("On Numbers")))], None).unwrap();
    assert_eq!(titled.len(), 1);
    assert_eq!(titled[0].title, "On Numbers");
    let iterated: Vec<Result<Post>> = (&posts).into_iter().collect();
    assert_eq!(iterated.len(), 2);

    let mut draft = Post { id: None, title: "Draft".to_string(), views: 0, author_id: 0 };
    draft.save().unwrap();
    posts.add(draft.id().unwrap()).unwrap();
    assert_eq!(posts.count().unwrap(), 3);
    posts.remove(draft.id().unwrap()).unwrap();
    assert_eq!(posts.count().unwrap(), 2);
    posts.clear().unwrap();
    assert_eq!(posts.count().unwrap(), 0);

    let tags: ManyToMany<Author> = ManyToMany::new(first.id().unwrap(), "post_tags", "post_id", "tag_id");
    assert!(!tags.contains(author_id).unwrap());
    tags.add(author_id).unwrap();
    assert!(tags.contains(author_id).unwrap());
    assert_eq!(tags.count().unwrap(), 1);
    tags.remove(author_id).unwrap();
    assert!(!tags.contains(author_id).unwrap());

    unbind_database();
}
