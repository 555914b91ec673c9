//! The [`Store`] contract and the algorithms every backend shares.
//!
//! Three backends implement the same trait:
//!
//! | Backend | Module | Search execution |
//! |---------|--------|------------------|
//! | Reference (in-memory) | [`memory`] | client-side brute force |
//! | Embedded SQL | [`sqlite`] | brute force over stored rows |
//! | Remote vector DB | [`qdrant`] | server-side predicates + index |
//!
//! Whatever the execution strategy, results must match the reference pipeline:
//! project filter → group filter → tag AND filter → half-open time window →
//! cosine score → sort by score (ties by id) → truncate to `top_k`.

pub mod memory;
pub mod payload;
pub mod qdrant;
pub mod sqlite;

pub use memory::MemoryStore;
pub use qdrant::QdrantStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use crate::config::StorageConfig;
use crate::error::{Result, StoreError};
use crate::model::{GlobalConfig, Group, Note};

/// Operation set every backend implements.
///
/// All methods except [`initialize`](Store::initialize) and [`close`](Store::close)
/// return [`StoreError::NotInitialized`] until `initialize` has succeeded.
/// Cancellation is by dropping the returned future.
#[async_trait]
pub trait Store: Send + Sync {
    /// Bind this instance to `namespace`, creating storage if needed. Idempotent
    /// for the same namespace; a different namespace is rejected.
    async fn initialize(&self, namespace: &str) -> Result<()>;

    /// Release backend resources. Later calls fail with `NotInitialized`.
    async fn close(&self) -> Result<()>;

    /// Insert (or overwrite) a note. Returns the note as stored, with
    /// `created_at` filled in when it was absent.
    async fn add_note(&self, note: Note, embedding: &[f32]) -> Result<Note>;

    async fn get(&self, id: &str) -> Result<Note>;

    /// Replace an existing note wholesale. `NotFound` if the id is absent.
    async fn update(&self, note: Note, embedding: &[f32]) -> Result<Note>;

    async fn delete(&self, id: &str) -> Result<()>;

    async fn search(&self, query: &[f32], opts: &SearchOptions) -> Result<Vec<SearchResult>>;

    /// Newest first; notes without a usable `created_at` sort last.
    async fn list_recent(&self, opts: &ListOptions) -> Result<Vec<Note>>;

    /// Create or replace by `(project_id, key)`. Id and `updated_at` are server-assigned.
    async fn upsert_global(&self, config: GlobalConfig) -> Result<GlobalConfig>;

    /// `Ok(None)` when no value is stored for the key.
    async fn get_global(&self, project_id: &str, key: &str) -> Result<Option<GlobalConfig>>;

    async fn get_global_by_id(&self, id: &str) -> Result<GlobalConfig>;

    async fn delete_global_by_id(&self, id: &str) -> Result<()>;

    /// Insert a group. Re-adding the same id overwrites it; a different id with a
    /// `group_key` already used in the project is `InvalidInput`.
    async fn add_group(&self, group: &Group) -> Result<()>;

    async fn get_group(&self, id: &str) -> Result<Group>;

    async fn get_group_by_key(&self, project_id: &str, group_key: &str) -> Result<Group>;

    async fn update_group(&self, group: &Group) -> Result<()>;

    async fn delete_group(&self, id: &str) -> Result<()>;

    /// All groups of a project, ordered by `group_key`.
    async fn list_groups(&self, project_id: &str) -> Result<Vec<Group>>;
}

/// Build the backend named by `config.backend`. The store still needs
/// [`Store::initialize`] before use.
pub async fn open_store(config: &StorageConfig) -> Result<Box<dyn Store>> {
    match config.backend.as_str() {
        "memory" => Ok(Box::new(MemoryStore::new())),
        "sqlite" => {
            let store = SqliteStore::open(config.resolved_db_path())?
                .with_large_namespace_threshold(config.large_namespace_threshold);
            Ok(Box::new(store))
        }
        "qdrant" => Ok(Box::new(QdrantStore::connect(&config.url).await?)),
        other => Err(StoreError::InvalidInput(format!(
            "unknown store backend: {other}. Supported: memory, sqlite, qdrant"
        ))),
    }
}

// ── Options and results ──────────────────────────────────────────────────────

/// Filters and limit for [`Store::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub project_id: String,
    /// Exact match when set; all groups otherwise.
    pub group_id: Option<String>,
    /// Every listed tag must be present (case-sensitive). Empty means no filter.
    pub tags: Vec<String>,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub until: Option<DateTime<Utc>>,
    pub top_k: usize,
}

impl SearchOptions {
    pub fn new(project_id: impl Into<String>, top_k: usize) -> Self {
        Self {
            project_id: project_id.into(),
            group_id: None,
            tags: Vec::new(),
            since: None,
            until: None,
            top_k,
        }
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.project_id.is_empty() {
            return Err(StoreError::InvalidInput("projectId is required".into()));
        }
        if self.top_k == 0 {
            return Err(StoreError::InvalidInput("topK must be positive".into()));
        }
        Ok(())
    }

    /// Steps 1–4 of the search pipeline: project, group, tags, time window.
    pub fn matches(&self, note: &Note) -> bool {
        note.project_id == self.project_id
            && group_matches(self.group_id.as_deref(), note)
            && contains_all_tags(&note.tags, &self.tags)
            && within_window(note.created_at.as_deref(), self.since, self.until)
    }

    pub fn has_time_window(&self) -> bool {
        self.since.is_some() || self.until.is_some()
    }
}

/// Filters and limit for [`Store::list_recent`].
#[derive(Debug, Clone, PartialEq)]
pub struct ListOptions {
    pub project_id: String,
    pub group_id: Option<String>,
    pub tags: Vec<String>,
    pub limit: usize,
}

impl ListOptions {
    pub fn new(project_id: impl Into<String>, limit: usize) -> Self {
        Self {
            project_id: project_id.into(),
            group_id: None,
            tags: Vec::new(),
            limit,
        }
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.project_id.is_empty() {
            return Err(StoreError::InvalidInput("projectId is required".into()));
        }
        if self.limit == 0 {
            return Err(StoreError::InvalidInput("limit must be positive".into()));
        }
        Ok(())
    }

    /// Project, group, and tag filters (no time window).
    pub fn matches(&self, note: &Note) -> bool {
        note.project_id == self.project_id
            && group_matches(self.group_id.as_deref(), note)
            && contains_all_tags(&note.tags, &self.tags)
    }
}

/// A note with its similarity score in `[0, 1]` (1.0 = identical direction).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub note: Note,
    pub score: f64,
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

/// Initialization state shared by all backends.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) enum Lifecycle {
    #[default]
    Uninitialized,
    Ready(String),
    Closed,
}

impl Lifecycle {
    /// The bound namespace, or `NotInitialized`.
    pub(crate) fn namespace(&self) -> Result<&str> {
        match self {
            Lifecycle::Ready(ns) => Ok(ns),
            _ => Err(StoreError::NotInitialized),
        }
    }

    /// Move to `Ready(namespace)`. Returns `false` if already bound to it.
    pub(crate) fn begin(&mut self, namespace: &str) -> Result<bool> {
        match self {
            Lifecycle::Uninitialized => {
                *self = Lifecycle::Ready(namespace.to_string());
                Ok(true)
            }
            Lifecycle::Ready(current) if current == namespace => Ok(false),
            Lifecycle::Ready(current) => Err(StoreError::InvalidInput(format!(
                "store already initialized with namespace {current}"
            ))),
            Lifecycle::Closed => Err(StoreError::backend("initialize", "store is closed")),
        }
    }
}

// ── Shared algorithms ────────────────────────────────────────────────────────

/// Cosine distance in `[0, 2]`. Mismatched lengths and zero vectors are
/// maximally dissimilar (2.0).
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 2.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0;
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    (1.0 - similarity).clamp(0.0, 2.0)
}

/// Map a cosine distance onto `[0, 1]`: identical → 1.0, orthogonal → 0.5, opposite → 0.0.
pub fn score_from_distance(distance: f64) -> f64 {
    1.0 - distance / 2.0
}

pub fn similarity_score(query: &[f32], embedding: &[f32]) -> f64 {
    score_from_distance(cosine_distance(query, embedding))
}

/// `true` if every tag in `wanted` is in `tags` (case-sensitive). Empty `wanted` always matches.
pub fn contains_all_tags(tags: &[String], wanted: &[String]) -> bool {
    wanted.iter().all(|w| tags.contains(w))
}

fn group_matches(group_id: Option<&str>, note: &Note) -> bool {
    group_id.map_or(true, |g| note.group_id == g)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Half-open window `since <= created_at < until`. With either bound active,
/// a missing or unparsable timestamp is excluded.
pub fn within_window(
    created_at: Option<&str>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> bool {
    if since.is_none() && until.is_none() {
        return true;
    }
    let Some(created) = created_at.and_then(parse_timestamp) else {
        return false;
    };
    since.map_or(true, |s| s <= created) && until.map_or(true, |u| created < u)
}

/// Sort by score descending, then id ascending, and keep the first `top_k`.
pub fn rank_results(mut results: Vec<SearchResult>, top_k: usize) -> Vec<SearchResult> {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.note.id.cmp(&b.note.id))
    });
    results.truncate(top_k);
    results
}

/// Sort newest first, then id ascending, and keep the first `limit`.
///
/// Missing or unparsable timestamps sort after every usable one; unparsable
/// values are logged and otherwise ignored.
pub fn sort_recent(notes: Vec<Note>, limit: usize) -> Vec<Note> {
    let mut keyed: Vec<(Option<DateTime<Utc>>, Note)> = notes
        .into_iter()
        .map(|note| {
            let ts = note.created_at.as_deref().and_then(|raw| {
                let parsed = parse_timestamp(raw);
                if parsed.is_none() {
                    tracing::warn!(id = %note.id, created_at = %raw, "unparsable createdAt, sorting last");
                }
                parsed
            });
            (ts, note)
        })
        .collect();

    keyed.sort_by(|(ta, a), (tb, b)| {
        let by_time = match (ta, tb) {
            (Some(x), Some(y)) => y.cmp(x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_time.then_with(|| a.id.cmp(&b.id))
    });

    keyed.into_iter().take(limit).map(|(_, note)| note).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        parse_timestamp(s).unwrap()
    }

    fn note_at(id: &str, created_at: Option<&str>) -> Note {
        let mut note = Note::new(id, "/p", "global", "text");
        note.created_at = created_at.map(String::from);
        note
    }

    #[test]
    fn cosine_distance_known_angles() {
        assert!((cosine_distance(&[1.0, 0.0], &[2.0, 0.0])).abs() < 1e-12);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-12);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn cosine_distance_degenerate_inputs() {
        assert_eq!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 2.0);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 2.0);
        assert_eq!(cosine_distance(&[], &[]), 2.0);
    }

    #[test]
    fn score_mapping() {
        assert!((similarity_score(&[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-12);
        assert!((similarity_score(&[1.0, 0.0], &[0.0, 1.0]) - 0.5).abs() < 1e-12);
        assert!(similarity_score(&[1.0, 0.0], &[-1.0, 0.0]).abs() < 1e-12);
        assert_eq!(similarity_score(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn tag_filter_is_and_and_case_sensitive() {
        let tags = vec!["Go".to_string(), "rust".to_string()];
        assert!(contains_all_tags(&tags, &[]));
        assert!(contains_all_tags(&tags, &["Go".into()]));
        assert!(contains_all_tags(&tags, &["Go".into(), "rust".into()]));
        assert!(!contains_all_tags(&tags, &["go".into()]));
        assert!(!contains_all_tags(&tags, &["Go".into(), "python".into()]));
    }

    #[test]
    fn window_is_half_open() {
        let since = ts("2024-01-01T00:00:00Z");
        let until = ts("2024-01-02T00:00:00Z");
        assert!(within_window(Some("2024-01-01T00:00:00Z"), Some(since), Some(until)));
        assert!(!within_window(Some("2024-01-02T00:00:00Z"), Some(since), Some(until)));
        assert!(!within_window(Some("2023-12-31T23:59:59Z"), Some(since), None));
        assert!(within_window(Some("2030-01-01T00:00:00Z"), Some(since), None));
    }

    #[test]
    fn window_excludes_missing_or_bad_timestamps_only_when_active() {
        let since = ts("2024-01-01T00:00:00Z");
        assert!(within_window(None, None, None));
        assert!(within_window(Some("garbage"), None, None));
        assert!(!within_window(None, Some(since), None));
        assert!(!within_window(Some("garbage"), None, Some(since)));
    }

    #[test]
    fn window_compares_instants_across_offsets() {
        let since = ts("2024-01-01T00:00:00Z");
        assert!(within_window(Some("2024-01-01T09:00:00+09:00"), Some(since), None));
        assert!(!within_window(Some("2024-01-01T08:59:59+09:00"), Some(since), None));
    }

    #[test]
    fn search_options_match_pipeline() {
        let mut note = note_at("n1", Some("2024-01-01T12:00:00Z"));
        note.group_id = "feature-1".into();
        note.tags = vec!["a".into(), "b".into()];

        assert!(SearchOptions::new("/p", 5).matches(&note));
        assert!(!SearchOptions::new("/other", 5).matches(&note));
        assert!(SearchOptions::new("/p", 5).with_group("feature-1").matches(&note));
        assert!(!SearchOptions::new("/p", 5).with_group("global").matches(&note));
        assert!(SearchOptions::new("/p", 5).with_tags(["b", "a"]).matches(&note));
        assert!(!SearchOptions::new("/p", 5).with_tags(["A"]).matches(&note));
        assert!(!SearchOptions::new("/p", 5)
            .until(ts("2024-01-01T12:00:00Z"))
            .matches(&note));
    }

    #[test]
    fn options_validation() {
        assert!(SearchOptions::new("/p", 1).validate().is_ok());
        assert!(SearchOptions::new("/p", 0).validate().is_err());
        assert!(SearchOptions::new("", 1).validate().is_err());
        assert!(ListOptions::new("/p", 1).validate().is_ok());
        assert!(ListOptions::new("/p", 0).validate().is_err());
    }

    #[test]
    fn rank_orders_by_score_then_id() {
        let results = vec![
            SearchResult { note: note_at("b", None), score: 0.5 },
            SearchResult { note: note_at("c", None), score: 0.9 },
            SearchResult { note: note_at("a", None), score: 0.5 },
        ];
        let ranked = rank_results(results, 2);
        let ids: Vec<&str> = ranked.iter().map(|r| r.note.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn recent_sorts_unusable_timestamps_last() {
        let notes = vec![
            note_at("bad", Some("yesterday")),
            note_at("old", Some("2024-01-01T00:00:00Z")),
            note_at("none", None),
            note_at("new", Some("2024-06-01T00:00:00Z")),
        ];
        let sorted = sort_recent(notes, 10);
        let ids: Vec<&str> = sorted.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old", "bad", "none"]);
    }

    #[test]
    fn recent_truncates() {
        let notes = vec![
            note_at("a", Some("2024-01-01T00:00:00Z")),
            note_at("b", Some("2024-01-02T00:00:00Z")),
            note_at("c", Some("2024-01-03T00:00:00Z")),
        ];
        let sorted = sort_recent(notes, 2);
        let ids: Vec<&str> = sorted.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn lifecycle_transitions() {
        let mut state = Lifecycle::default();
        assert!(state.namespace().unwrap_err().is_not_initialized());
        assert!(state.begin("ns").unwrap());
        assert!(!state.begin("ns").unwrap());
        assert!(state.begin("other").is_err());
        assert_eq!(state.namespace().unwrap(), "ns");
        state = Lifecycle::Closed;
        assert!(state.namespace().unwrap_err().is_not_initialized());
        assert!(state.begin("ns").is_err());
    }
}
