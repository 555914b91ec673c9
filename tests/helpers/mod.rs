#![allow(dead_code)]

use std::sync::Arc;

use memstore::model::Note;
use memstore::store::{MemoryStore, QdrantStore, SqliteStore};
use memstore::Store;
use tempfile::TempDir;

/// Namespace used by the local backends. Vectors in tests are 3-dimensional.
pub const NS: &str = "test:model:3";

/// Env var pointing at a live Qdrant. Qdrant tests return early when it is unset.
pub const QDRANT_URL_ENV: &str = "MEMSTORE_TEST_QDRANT_URL";

/// A backend under test plus whatever must outlive it.
pub struct Fixture {
    pub store: Arc<dyn Store>,
    pub namespace: String,
    _dir: Option<TempDir>,
}

impl Fixture {
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// A handle that can move into spawned tasks.
    pub fn shared(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }
}

pub async fn memory_fixture() -> Fixture {
    let store = MemoryStore::new();
    store.initialize(NS).await.unwrap();
    Fixture {
        store: Arc::new(store),
        namespace: NS.to_string(),
        _dir: None,
    }
}

pub async fn sqlite_fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(dir.path().join("memory.db")).unwrap();
    store.initialize(NS).await.unwrap();
    Fixture {
        store: Arc::new(store),
        namespace: NS.to_string(),
        _dir: Some(dir),
    }
}

/// A Qdrant store on a namespace no other test uses, or `None` when no server is configured.
pub async fn qdrant_fixture() -> Option<Fixture> {
    let url = std::env::var(QDRANT_URL_ENV).ok()?;
    let store = QdrantStore::connect(&url).await.unwrap();
    let namespace = format!("test:contract-{}:3", uuid::Uuid::now_v7().simple());
    store.initialize(&namespace).await.unwrap();
    Some(Fixture {
        store: Arc::new(store),
        namespace,
        _dir: None,
    })
}

pub fn note(id: &str, project: &str, group: &str, text: &str) -> Note {
    Note::new(id, project, group, text)
}

/// Note with a fixed `created_at`.
pub fn note_at(id: &str, project: &str, group: &str, created_at: &str) -> Note {
    let mut n = Note::new(id, project, group, format!("note {id}"));
    n.created_at = Some(created_at.to_string());
    n
}

pub fn tagged(id: &str, project: &str, tags: &[&str]) -> Note {
    let mut n = Note::new(id, project, "global", format!("note {id}"));
    n.tags = tags.iter().map(|t| t.to_string()).collect();
    n
}

/// Unit vector along axis `i` of a 3-dim space.
pub fn axis(i: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; 3];
    v[i % 3] = 1.0;
    v
}

pub fn negated(v: &[f32]) -> Vec<f32> {
    v.iter().map(|x| -x).collect()
}

pub fn utc(s: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .unwrap()
        .with_timezone(&chrono::Utc)
}

/// Scores from Qdrant are f32 on the wire; compare loosely.
pub fn assert_score(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-5,
        "score {actual} differs from expected {expected}"
    );
}
