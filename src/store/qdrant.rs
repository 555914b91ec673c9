//! Remote Qdrant backend.
//!
//! Each namespace maps to three collections: notes (cosine, namespace width),
//! `{name}_global_configs`, and `{name}_groups`. The two auxiliary collections
//! carry a 1-dimensional placeholder vector and are only ever read through
//! equality filters. Project/group/tag/time predicates for notes run on the
//! server; results are re-ranked locally so tie order matches the other
//! backends.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, GetPointsBuilder,
    PointId, PointStruct, PointsIdsList, Query, QueryPointsBuilder, Range, RetrievedPoint,
    ScrollPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload as QdrantPayload, Qdrant};
use tokio::sync::Mutex as AsyncMutex;

use super::payload::{
    global_from_payload, global_payload, group_from_payload, group_payload, note_from_payload,
    note_payload, payload_id, point_id, Payload, FIELD_CREATED_AT_TS, FIELD_GROUP_ID,
    FIELD_GROUP_KEY, FIELD_ID, FIELD_KEY, FIELD_PROJECT_ID, FIELD_TAGS, FIELD_TYPE,
    TYPE_GLOBAL_CONFIG, TYPE_GROUP,
};
use super::{
    rank_results, sort_recent, Lifecycle, ListOptions, SearchOptions, SearchResult, Store,
};
use crate::error::{OpContext, Result, StoreError};
use crate::model::{GlobalConfig, Group, Note};
use crate::namespace::{sanitize_collection_name, Namespace};

/// Width used when the namespace does not carry a known dimension yet.
pub const FALLBACK_DIMENSION: usize = 1536;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const SCROLL_PAGE: u32 = 256;
const GLOBAL_CONFIGS_SUFFIX: &str = "_global_configs";
const GROUPS_SUFFIX: &str = "_groups";

/// Collection names and width resolved at initialize.
#[derive(Debug, Clone)]
struct Collections {
    notes: String,
    globals: String,
    groups: String,
    dim: usize,
}

#[derive(Default)]
struct State {
    lifecycle: Lifecycle,
    collections: Option<Collections>,
}

/// Qdrant-backed [`Store`]. Holds no note data locally; the lock only guards
/// initialization state.
pub struct QdrantStore {
    client: Qdrant,
    endpoint: String,
    state: RwLock<State>,
    init_lock: AsyncMutex<()>,
}

impl QdrantStore {
    /// Connect to `url` and verify the server answers a health check.
    ///
    /// HTTP port 6333 is rewritten to the gRPC port 6334; a URL without a port
    /// gets 6334.
    pub async fn connect(url: &str) -> Result<Self> {
        let endpoint = grpc_endpoint(url);
        let client = Qdrant::from_url(&endpoint)
            .build()
            .map_err(|e| StoreError::ConnectionFailed(format!("{endpoint}: {e}")))?;
        let store = Self {
            client,
            endpoint,
            state: RwLock::new(State::default()),
            init_lock: AsyncMutex::new(()),
        };
        store.health_check().await?;
        tracing::debug!(endpoint = %store.endpoint, "connected to qdrant");
        Ok(store)
    }

    async fn health_check(&self) -> Result<()> {
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, self.client.health_check()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(StoreError::ConnectionFailed(format!("{}: {e}", self.endpoint))),
            Err(_) => Err(StoreError::ConnectionFailed(format!(
                "{}: health check timed out after {}s",
                self.endpoint,
                HEALTH_CHECK_TIMEOUT.as_secs()
            ))),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::backend("lock", "qdrant state lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::backend("lock", "qdrant state lock poisoned"))
    }

    /// Collection names, or `NotInitialized`. The lock is released before any RPC.
    fn collections(&self) -> Result<Collections> {
        let state = self.read()?;
        state.lifecycle.namespace()?;
        state.collections.clone().ok_or(StoreError::NotInitialized)
    }

    async fn ensure_collection(&self, name: &str, dim: usize) -> Result<()> {
        let exists = self
            .client
            .collection_exists(name)
            .await
            .during("initialize")?;
        if exists {
            return Ok(());
        }
        self.client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(VectorParamsBuilder::new(dim as u64, Distance::Cosine)),
            )
            .await
            .during("initialize")?;
        tracing::info!(collection = name, dim, "created qdrant collection");
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: Vec<f32>,
        payload: Payload,
        op: &'static str,
    ) -> Result<()> {
        let point = PointStruct::new(point_id(id), vector, QdrantPayload::from(payload));
        self.client
            .upsert_points(UpsertPointsBuilder::new(collection, vec![point]).wait(true))
            .await
            .during(op)?;
        Ok(())
    }

    /// Fetch the point addressed by `id`, confirming the payload carries the same string id.
    async fn fetch(&self, collection: &str, id: &str, op: &'static str) -> Result<Option<Payload>> {
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(collection, vec![PointId::from(point_id(id))])
                    .with_payload(true),
            )
            .await
            .during(op)?;
        Ok(response
            .result
            .into_iter()
            .map(|p| p.payload)
            .find(|p| payload_id(p) == Some(id)))
    }

    async fn remove(&self, collection: &str, id: &str, op: &'static str) -> Result<()> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(collection)
                    .points(PointsIdsList {
                        ids: vec![PointId::from(point_id(id))],
                    })
                    .wait(true),
            )
            .await
            .during(op)?;
        Ok(())
    }

    /// Every point matching `filter`, following scroll offsets to the end.
    async fn scroll_all(
        &self,
        collection: &str,
        filter: Filter,
        op: &'static str,
    ) -> Result<Vec<RetrievedPoint>> {
        let mut points = Vec::new();
        let mut offset: Option<PointId> = None;
        loop {
            let mut request = ScrollPointsBuilder::new(collection)
                .filter(filter.clone())
                .limit(SCROLL_PAGE)
                .with_payload(true)
                .with_vectors(false);
            if let Some(next) = offset.take() {
                request = request.offset(next);
            }
            let response = self.client.scroll(request).await.during(op)?;
            points.extend(response.result);
            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(points)
    }

    /// First point matching `filter`, if any.
    async fn find_one(
        &self,
        collection: &str,
        filter: Filter,
        op: &'static str,
    ) -> Result<Option<Payload>> {
        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(collection)
                    .filter(filter)
                    .limit(1)
                    .with_payload(true)
                    .with_vectors(false),
            )
            .await
            .during(op)?;
        Ok(response.result.into_iter().next().map(|p| p.payload))
    }

    /// `InvalidInput` if another group in the project already owns `group.group_key`.
    async fn check_group_key(&self, group: &Group) -> Result<()> {
        match self.get_group_by_key(&group.project_id, &group.group_key).await {
            Ok(existing) if existing.id != group.id => Err(StoreError::InvalidInput(format!(
                "group key {:?} already exists in project",
                group.group_key
            ))),
            Ok(_) | Err(StoreError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Notes matching `opts` scored 0.0, for queries the collection cannot answer
    /// (wrong width or a zero vector).
    async fn zero_scored(&self, c: &Collections, opts: &SearchOptions) -> Result<Vec<SearchResult>> {
        let points = self
            .scroll_all(&c.notes, search_filter(opts), "search")
            .await?;
        let results = points
            .into_iter()
            .map(|p| {
                note_from_payload(p.payload).map(|note| SearchResult { note, score: 0.0 })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(rank_results(results, opts.top_k))
    }
}

#[async_trait]
impl Store for QdrantStore {
    async fn initialize(&self, namespace: &str) -> Result<()> {
        let _serialized = self.init_lock.lock().await;
        {
            let state = self.read()?;
            match &state.lifecycle {
                Lifecycle::Ready(current) if current == namespace => return Ok(()),
                Lifecycle::Ready(current) => {
                    return Err(StoreError::InvalidInput(format!(
                        "store already initialized with namespace {current}"
                    )))
                }
                Lifecycle::Closed => {
                    return Err(StoreError::backend("initialize", "store is closed"))
                }
                Lifecycle::Uninitialized => {}
            }
        }

        self.health_check().await?;

        let dim = match namespace.parse::<Namespace>() {
            Ok(ns) if ns.is_dim_known() => ns.dim,
            Ok(_) => {
                tracing::warn!(namespace, fallback = FALLBACK_DIMENSION, "namespace dimension unknown, using fallback");
                FALLBACK_DIMENSION
            }
            Err(e) => {
                tracing::warn!(namespace, error = %e, fallback = FALLBACK_DIMENSION, "unparsable namespace, using fallback dimension");
                FALLBACK_DIMENSION
            }
        };

        let base = sanitize_collection_name(namespace);
        let collections = Collections {
            globals: format!("{base}{GLOBAL_CONFIGS_SUFFIX}"),
            groups: format!("{base}{GROUPS_SUFFIX}"),
            notes: base,
            dim,
        };
        self.ensure_collection(&collections.notes, dim).await?;
        self.ensure_collection(&collections.globals, 1).await?;
        self.ensure_collection(&collections.groups, 1).await?;

        let mut state = self.write()?;
        state.lifecycle.begin(namespace)?;
        tracing::info!(backend = "qdrant", namespace, collection = %collections.notes, dim, "store initialized");
        state.collections = Some(collections);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.write()?;
        state.lifecycle = Lifecycle::Closed;
        state.collections = None;
        tracing::debug!(backend = "qdrant", "store closed");
        Ok(())
    }

    async fn add_note(&self, mut note: Note, embedding: &[f32]) -> Result<Note> {
        let c = self.collections()?;
        check_width(embedding, c.dim)?;
        note.stamp_created_at();
        let payload = note_payload(&note)?;
        self.upsert(&c.notes, &note.id, embedding.to_vec(), payload, "add_note")
            .await?;
        tracing::debug!(id = %note.id, "note added");
        Ok(note)
    }

    async fn get(&self, id: &str) -> Result<Note> {
        let c = self.collections()?;
        let payload = self
            .fetch(&c.notes, id, "get")
            .await?
            .ok_or(StoreError::NotFound)?;
        note_from_payload(payload)
    }

    async fn update(&self, mut note: Note, embedding: &[f32]) -> Result<Note> {
        let c = self.collections()?;
        check_width(embedding, c.dim)?;
        if self.fetch(&c.notes, &note.id, "update").await?.is_none() {
            return Err(StoreError::NotFound);
        }
        note.stamp_created_at();
        let payload = note_payload(&note)?;
        self.upsert(&c.notes, &note.id, embedding.to_vec(), payload, "update")
            .await?;
        tracing::debug!(id = %note.id, "note updated");
        Ok(note)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let c = self.collections()?;
        if self.fetch(&c.notes, id, "delete").await?.is_none() {
            return Err(StoreError::NotFound);
        }
        self.remove(&c.notes, id, "delete").await?;
        tracing::debug!(id, "note deleted");
        Ok(())
    }

    async fn search(&self, query: &[f32], opts: &SearchOptions) -> Result<Vec<SearchResult>> {
        let c = self.collections()?;
        opts.validate()?;

        if query.len() != c.dim || query.iter().all(|v| *v == 0.0) {
            return self.zero_scored(&c, opts).await;
        }

        let response = self
            .client
            .query(
                QueryPointsBuilder::new(&c.notes)
                    .query(Query::new_nearest(query.to_vec()))
                    .filter(search_filter(opts))
                    .limit(opts.top_k as u64)
                    .with_payload(true),
            )
            .await
            .during("search")?;

        let results = response
            .result
            .into_iter()
            .map(|point| {
                let score = cosine_to_score(f64::from(point.score));
                note_from_payload(point.payload).map(|note| SearchResult { note, score })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(rank_results(results, opts.top_k))
    }

    async fn list_recent(&self, opts: &ListOptions) -> Result<Vec<Note>> {
        let c = self.collections()?;
        opts.validate()?;
        let filter = note_filter(&opts.project_id, opts.group_id.as_deref(), &opts.tags);
        let notes = self
            .scroll_all(&c.notes, filter, "list_recent")
            .await?
            .into_iter()
            .map(|p| note_from_payload(p.payload))
            .collect::<Result<Vec<_>>>()?;
        Ok(sort_recent(notes, opts.limit))
    }

    async fn upsert_global(&self, mut config: GlobalConfig) -> Result<GlobalConfig> {
        let c = self.collections()?;
        config.prepare_upsert();
        let payload = global_payload(&config)?;
        self.upsert(&c.globals, &config.id, vec![1.0], payload, "upsert_global")
            .await?;
        tracing::debug!(id = %config.id, "global config upserted");
        Ok(config)
    }

    async fn get_global(&self, project_id: &str, key: &str) -> Result<Option<GlobalConfig>> {
        let c = self.collections()?;
        let filter = Filter::must([
            Condition::matches(FIELD_TYPE, TYPE_GLOBAL_CONFIG.to_string()),
            Condition::matches(FIELD_PROJECT_ID, project_id.to_string()),
            Condition::matches(FIELD_KEY, key.to_string()),
        ]);
        self.find_one(&c.globals, filter, "get_global")
            .await?
            .map(global_from_payload)
            .transpose()
    }

    async fn get_global_by_id(&self, id: &str) -> Result<GlobalConfig> {
        let c = self.collections()?;
        let filter = Filter::must([
            Condition::matches(FIELD_TYPE, TYPE_GLOBAL_CONFIG.to_string()),
            Condition::matches(FIELD_ID, id.to_string()),
        ]);
        let payload = self
            .find_one(&c.globals, filter, "get_global_by_id")
            .await?
            .ok_or(StoreError::NotFound)?;
        global_from_payload(payload)
    }

    async fn delete_global_by_id(&self, id: &str) -> Result<()> {
        let c = self.collections()?;
        if self.fetch(&c.globals, id, "delete_global_by_id").await?.is_none() {
            return Err(StoreError::NotFound);
        }
        self.remove(&c.globals, id, "delete_global_by_id").await
    }

    async fn add_group(&self, group: &Group) -> Result<()> {
        let c = self.collections()?;
        self.check_group_key(group).await?;
        let payload = group_payload(group)?;
        self.upsert(&c.groups, &group.id, vec![1.0], payload, "add_group")
            .await
    }

    async fn get_group(&self, id: &str) -> Result<Group> {
        let c = self.collections()?;
        let filter = Filter::must([
            Condition::matches(FIELD_TYPE, TYPE_GROUP.to_string()),
            Condition::matches(FIELD_ID, id.to_string()),
        ]);
        let payload = self
            .find_one(&c.groups, filter, "get_group")
            .await?
            .ok_or(StoreError::NotFound)?;
        group_from_payload(payload)
    }

    async fn get_group_by_key(&self, project_id: &str, group_key: &str) -> Result<Group> {
        let c = self.collections()?;
        let filter = Filter::must([
            Condition::matches(FIELD_TYPE, TYPE_GROUP.to_string()),
            Condition::matches(FIELD_PROJECT_ID, project_id.to_string()),
            Condition::matches(FIELD_GROUP_KEY, group_key.to_string()),
        ]);
        let payload = self
            .find_one(&c.groups, filter, "get_group_by_key")
            .await?
            .ok_or(StoreError::NotFound)?;
        group_from_payload(payload)
    }

    async fn update_group(&self, group: &Group) -> Result<()> {
        let c = self.collections()?;
        if self.fetch(&c.groups, &group.id, "update_group").await?.is_none() {
            return Err(StoreError::NotFound);
        }
        self.check_group_key(group).await?;
        let payload = group_payload(group)?;
        self.upsert(&c.groups, &group.id, vec![1.0], payload, "update_group")
            .await
    }

    async fn delete_group(&self, id: &str) -> Result<()> {
        let c = self.collections()?;
        if self.fetch(&c.groups, id, "delete_group").await?.is_none() {
            return Err(StoreError::NotFound);
        }
        self.remove(&c.groups, id, "delete_group").await
    }

    async fn list_groups(&self, project_id: &str) -> Result<Vec<Group>> {
        let c = self.collections()?;
        let filter = Filter::must([
            Condition::matches(FIELD_TYPE, TYPE_GROUP.to_string()),
            Condition::matches(FIELD_PROJECT_ID, project_id.to_string()),
        ]);
        let mut groups = self
            .scroll_all(&c.groups, filter, "list_groups")
            .await?
            .into_iter()
            .map(|p| group_from_payload(p.payload))
            .collect::<Result<Vec<_>>>()?;
        groups.sort_by(|a, b| a.group_key.cmp(&b.group_key));
        Ok(groups)
    }
}

/// The notes collection has a fixed width; anything else is refused up front.
fn check_width(embedding: &[f32], dim: usize) -> Result<()> {
    if embedding.len() != dim {
        return Err(StoreError::InvalidInput(format!(
            "embedding has {} dimensions, collection expects {dim}",
            embedding.len()
        )));
    }
    Ok(())
}

/// Project, optional group, and one condition per required tag.
fn note_filter(project_id: &str, group_id: Option<&str>, tags: &[String]) -> Filter {
    let mut must = vec![Condition::matches(FIELD_PROJECT_ID, project_id.to_string())];
    if let Some(group) = group_id {
        must.push(Condition::matches(FIELD_GROUP_ID, group.to_string()));
    }
    must.extend(
        tags.iter()
            .map(|tag| Condition::matches(FIELD_TAGS, tag.clone())),
    );
    Filter::must(must)
}

/// [`note_filter`] plus the half-open `createdAtTimestamp` range.
fn search_filter(opts: &SearchOptions) -> Filter {
    let mut filter = note_filter(&opts.project_id, opts.group_id.as_deref(), &opts.tags);
    if opts.has_time_window() {
        let range = Range {
            gte: opts.since.map(unix_seconds),
            lt: opts.until.map(unix_seconds),
            ..Default::default()
        };
        filter.must.push(Condition::range(FIELD_CREATED_AT_TS, range));
    }
    filter
}

fn unix_seconds(t: chrono::DateTime<chrono::Utc>) -> f64 {
    t.timestamp() as f64 + f64::from(t.timestamp_subsec_nanos()) / 1e9
}

/// Qdrant reports raw cosine similarity in `[-1, 1]`; map it onto `[0, 1]`.
fn cosine_to_score(cosine: f64) -> f64 {
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Rewrite an HTTP endpoint to Qdrant's gRPC port.
pub fn grpc_endpoint(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let (scheme, rest) = trimmed.split_once("://").unwrap_or(("http", trimmed));
    let (authority, path) = match rest.find('/') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    let authority = match authority.rsplit_once(':') {
        Some((host, "6333")) => format!("{host}:6334"),
        Some((_, port)) if port.parse::<u16>().is_ok() => authority.to_string(),
        _ => format!("{authority}:6334"),
    };
    format!("{scheme}://{authority}{path}")
}
