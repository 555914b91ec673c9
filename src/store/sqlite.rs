//! Embedded SQLite backend.
//!
//! One database file holds any number of namespaces; every row is scoped by a
//! `namespace` column. Embeddings are stored as little-endian f32 blobs and
//! Search recomputes cosine distance for every candidate row; there is no
//! vector index. Project and group predicates run in SQL, tags and the time
//! window run in Rust through the shared pipeline.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{
    rank_results, similarity_score, sort_recent, Lifecycle, ListOptions, SearchOptions,
    SearchResult, Store,
};
use crate::db;
use crate::error::{OpContext, Result, StoreError};
use crate::model::{GlobalConfig, Group, Note};

const NOTE_COLUMNS: &str =
    "id, project_id, group_id, title, text, tags, source, created_at, metadata";

const GROUP_COLUMNS: &str =
    "id, project_id, group_key, title, description, created_at, updated_at";

struct Inner {
    conn: Option<Connection>,
    lifecycle: Lifecycle,
}

/// SQLite-backed [`Store`].
///
/// `rusqlite::Connection` is not `Sync`, so every call, reads included, is
/// serialized through one mutex; there is no reader/writer split. The
/// connection is only touched from tokio's blocking pool, so a busy database
/// file never stalls async tasks. WAL mode keeps other processes' readers
/// unblocked.
pub struct SqliteStore {
    inner: Arc<Mutex<Inner>>,
    path: Option<PathBuf>,
    large_namespace_threshold: usize,
    warned_large: Arc<AtomicBool>,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = db::open_database(path)
            .map_err(|e| StoreError::ConnectionFailed(format!("{e:#}")))?;
        Ok(Self::from_connection(conn, Some(path.to_path_buf())))
    }

    /// A private in-memory database. Mostly useful in tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = db::open_memory_database()
            .map_err(|e| StoreError::ConnectionFailed(format!("{e:#}")))?;
        Ok(Self::from_connection(conn, None))
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                conn: Some(conn),
                lifecycle: Lifecycle::Uninitialized,
            })),
            path,
            large_namespace_threshold: 5000,
            warned_large: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Note count at which a one-time advisory is logged. 0 disables it.
    pub fn with_large_namespace_threshold(mut self, threshold: usize) -> Self {
        self.large_namespace_threshold = threshold;
        self
    }

    /// Run `f` against the locked state on the blocking pool.
    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Inner) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .lock()
                .map_err(|_| StoreError::backend("lock", "sqlite connection lock poisoned"))?;
            f(&mut guard)
        })
        .await
        .during(op)?
    }

    /// Run `f` with the connection and bound namespace, or fail with `NotInitialized`.
    async fn with_conn<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection, &str) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.run(op, move |inner| {
            let Inner { conn, lifecycle } = inner;
            let namespace = lifecycle.namespace()?;
            let conn = conn.as_mut().ok_or(StoreError::NotInitialized)?;
            f(conn, namespace)
        })
        .await
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn initialize(&self, namespace: &str) -> Result<()> {
        let namespace = namespace.to_string();
        let path = self.path.clone();
        self.run("initialize", move |inner| {
            if inner.conn.is_none() {
                return Err(StoreError::backend("initialize", "store is closed"));
            }
            if inner.lifecycle.begin(&namespace)? {
                match &path {
                    Some(path) => tracing::info!(backend = "sqlite", %namespace, path = %path.display(), "store initialized"),
                    None => tracing::info!(backend = "sqlite", %namespace, "store initialized"),
                }
            }
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.run("close", |inner| {
            inner.lifecycle = Lifecycle::Closed;
            if let Some(conn) = inner.conn.take() {
                conn.close().map_err(|(_, e)| e).during("close")?;
                tracing::debug!(backend = "sqlite", "store closed");
            }
            Ok(())
        })
        .await
    }

    async fn add_note(&self, mut note: Note, embedding: &[f32]) -> Result<Note> {
        note.stamp_created_at();
        let embedding = embedding.to_vec();
        let threshold = self.large_namespace_threshold;
        let warned = Arc::clone(&self.warned_large);
        self.with_conn("add_note", move |conn, ns| {
            write_note(conn, ns, &note, &embedding, "add_note")?;
            tracing::debug!(id = %note.id, "note added");
            warn_if_large(conn, ns, threshold, &warned)?;
            Ok(note)
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Note> {
        let id = id.to_string();
        self.with_conn("get", move |conn, ns| {
            conn.query_row(
                &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE namespace = ?1 AND id = ?2"),
                params![ns, id],
                row_to_note,
            )
            .optional()
            .during("get")?
            .ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn update(&self, mut note: Note, embedding: &[f32]) -> Result<Note> {
        note.stamp_created_at();
        let embedding = embedding.to_vec();
        self.with_conn("update", move |conn, ns| {
            let tx = conn.transaction().during("update")?;
            let exists: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM notes WHERE namespace = ?1 AND id = ?2)",
                    params![ns, note.id],
                    |row| row.get(0),
                )
                .during("update")?;
            if !exists {
                return Err(StoreError::NotFound);
            }
            write_note(&tx, ns, &note, &embedding, "update")?;
            tx.commit().during("update")?;
            tracing::debug!(id = %note.id, "note updated");
            Ok(note)
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.with_conn("delete", move |conn, ns| {
            let affected = conn
                .execute(
                    "DELETE FROM notes WHERE namespace = ?1 AND id = ?2",
                    params![ns, id],
                )
                .during("delete")?;
            if affected == 0 {
                return Err(StoreError::NotFound);
            }
            tracing::debug!(%id, "note deleted");
            Ok(())
        })
        .await
    }

    async fn search(&self, query: &[f32], opts: &SearchOptions) -> Result<Vec<SearchResult>> {
        let query = query.to_vec();
        let opts = opts.clone();
        self.with_conn("search", move |conn, ns| {
            opts.validate()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {NOTE_COLUMNS}, embedding FROM notes
                     WHERE namespace = ?1 AND project_id = ?2
                       AND (?3 IS NULL OR group_id = ?3)"
                ))
                .during("search")?;
            let rows = stmt
                .query_map(params![ns, opts.project_id, opts.group_id], |row| {
                    let note = row_to_note(row)?;
                    let blob: Option<Vec<u8>> = row.get(9)?;
                    Ok((note, blob.map(|b| decode_embedding(&b)).unwrap_or_default()))
                })
                .during("search")?;

            let mut candidates = Vec::new();
            for row in rows {
                let (note, embedding) = row.during("search")?;
                if !opts.matches(&note) {
                    continue;
                }
                let score = similarity_score(&query, &embedding);
                candidates.push(SearchResult { note, score });
            }
            Ok(rank_results(candidates, opts.top_k))
        })
        .await
    }

    async fn list_recent(&self, opts: &ListOptions) -> Result<Vec<Note>> {
        let opts = opts.clone();
        self.with_conn("list_recent", move |conn, ns| {
            opts.validate()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {NOTE_COLUMNS} FROM notes
                     WHERE namespace = ?1 AND project_id = ?2
                       AND (?3 IS NULL OR group_id = ?3)"
                ))
                .during("list_recent")?;
            let notes = stmt
                .query_map(params![ns, opts.project_id, opts.group_id], row_to_note)
                .during("list_recent")?
                .collect::<rusqlite::Result<Vec<Note>>>()
                .during("list_recent")?;
            let matching = notes.into_iter().filter(|n| opts.matches(n)).collect();
            Ok(sort_recent(matching, opts.limit))
        })
        .await
    }

    async fn upsert_global(&self, mut config: GlobalConfig) -> Result<GlobalConfig> {
        config.prepare_upsert();
        let value = serde_json::to_string(&config.value).during("upsert_global")?;
        self.with_conn("upsert_global", move |conn, ns| {
            conn.execute(
                "INSERT INTO global_configs (id, namespace, project_id, key, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(namespace, project_id, key) DO UPDATE SET
                     id = excluded.id,
                     value = excluded.value,
                     updated_at = excluded.updated_at",
                params![config.id, ns, config.project_id, config.key, value, config.updated_at],
            )
            .during("upsert_global")?;
            tracing::debug!(id = %config.id, "global config upserted");
            Ok(config)
        })
        .await
    }

    async fn get_global(&self, project_id: &str, key: &str) -> Result<Option<GlobalConfig>> {
        let (project_id, key) = (project_id.to_string(), key.to_string());
        self.with_conn("get_global", move |conn, ns| {
            conn.query_row(
                "SELECT id, project_id, key, value, updated_at FROM global_configs
                 WHERE namespace = ?1 AND project_id = ?2 AND key = ?3",
                params![ns, project_id, key],
                row_to_global,
            )
            .optional()
            .during("get_global")
        })
        .await
    }

    async fn get_global_by_id(&self, id: &str) -> Result<GlobalConfig> {
        let id = id.to_string();
        self.with_conn("get_global_by_id", move |conn, ns| {
            conn.query_row(
                "SELECT id, project_id, key, value, updated_at FROM global_configs
                 WHERE namespace = ?1 AND id = ?2",
                params![ns, id],
                row_to_global,
            )
            .optional()
            .during("get_global_by_id")?
            .ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn delete_global_by_id(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.with_conn("delete_global_by_id", move |conn, ns| {
            let affected = conn
                .execute(
                    "DELETE FROM global_configs WHERE namespace = ?1 AND id = ?2",
                    params![ns, id],
                )
                .during("delete_global_by_id")?;
            if affected == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn add_group(&self, group: &Group) -> Result<()> {
        let group = group.clone();
        self.with_conn("add_group", move |conn, ns| {
            let tx = conn.transaction().during("add_group")?;
            check_group_key(&tx, ns, &group, "add_group")?;
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO groups (namespace, {GROUP_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    ns,
                    group.id,
                    group.project_id,
                    group.group_key,
                    group.title,
                    group.description,
                    group.created_at,
                    group.updated_at
                ],
            )
            .during("add_group")?;
            tx.commit().during("add_group")
        })
        .await
    }

    async fn get_group(&self, id: &str) -> Result<Group> {
        let id = id.to_string();
        self.with_conn("get_group", move |conn, ns| {
            conn.query_row(
                &format!("SELECT {GROUP_COLUMNS} FROM groups WHERE namespace = ?1 AND id = ?2"),
                params![ns, id],
                row_to_group,
            )
            .optional()
            .during("get_group")?
            .ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn get_group_by_key(&self, project_id: &str, group_key: &str) -> Result<Group> {
        let (project_id, group_key) = (project_id.to_string(), group_key.to_string());
        self.with_conn("get_group_by_key", move |conn, ns| {
            conn.query_row(
                &format!(
                    "SELECT {GROUP_COLUMNS} FROM groups
                     WHERE namespace = ?1 AND project_id = ?2 AND group_key = ?3"
                ),
                params![ns, project_id, group_key],
                row_to_group,
            )
            .optional()
            .during("get_group_by_key")?
            .ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn update_group(&self, group: &Group) -> Result<()> {
        let group = group.clone();
        self.with_conn("update_group", move |conn, ns| {
            let tx = conn.transaction().during("update_group")?;
            let exists: bool = tx
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM groups WHERE namespace = ?1 AND id = ?2)",
                    params![ns, group.id],
                    |row| row.get(0),
                )
                .during("update_group")?;
            if !exists {
                return Err(StoreError::NotFound);
            }
            check_group_key(&tx, ns, &group, "update_group")?;
            tx.execute(
                "UPDATE groups SET project_id = ?3, group_key = ?4, title = ?5,
                     description = ?6, created_at = ?7, updated_at = ?8
                 WHERE namespace = ?1 AND id = ?2",
                params![
                    ns,
                    group.id,
                    group.project_id,
                    group.group_key,
                    group.title,
                    group.description,
                    group.created_at,
                    group.updated_at
                ],
            )
            .during("update_group")?;
            tx.commit().during("update_group")
        })
        .await
    }

    async fn delete_group(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.with_conn("delete_group", move |conn, ns| {
            let affected = conn
                .execute(
                    "DELETE FROM groups WHERE namespace = ?1 AND id = ?2",
                    params![ns, id],
                )
                .during("delete_group")?;
            if affected == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn list_groups(&self, project_id: &str) -> Result<Vec<Group>> {
        let project_id = project_id.to_string();
        self.with_conn("list_groups", move |conn, ns| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {GROUP_COLUMNS} FROM groups
                     WHERE namespace = ?1 AND project_id = ?2
                     ORDER BY group_key ASC"
                ))
                .during("list_groups")?;
            let groups = stmt
                .query_map(params![ns, project_id], row_to_group)
                .during("list_groups")?
                .collect::<rusqlite::Result<Vec<Group>>>()
                .during("list_groups")?;
            Ok(groups)
        })
        .await
    }
}

/// Log once per store when the namespace reaches `threshold` notes.
fn warn_if_large(
    conn: &Connection,
    namespace: &str,
    threshold: usize,
    warned: &AtomicBool,
) -> Result<()> {
    if threshold == 0 || warned.load(Ordering::Relaxed) {
        return Ok(());
    }
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM notes WHERE namespace = ?1",
            params![namespace],
            |row| row.get(0),
        )
        .during("count_notes")?;
    if count as usize >= threshold && !warned.swap(true, Ordering::Relaxed) {
        tracing::warn!(
            namespace,
            count,
            threshold,
            "namespace is large for brute-force search; consider the qdrant backend"
        );
    }
    Ok(())
}

/// `InvalidInput` if another group in the project already owns `group.group_key`.
fn check_group_key(
    conn: &Connection,
    namespace: &str,
    group: &Group,
    op: &'static str,
) -> Result<()> {
    let clash: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM groups
             WHERE namespace = ?1 AND project_id = ?2 AND group_key = ?3 AND id != ?4)",
            params![namespace, group.project_id, group.group_key, group.id],
            |row| row.get(0),
        )
        .during(op)?;
    if clash {
        return Err(StoreError::InvalidInput(format!(
            "group key {:?} already exists in project",
            group.group_key
        )));
    }
    Ok(())
}

/// Insert or overwrite one note row.
fn write_note(
    conn: &Connection,
    namespace: &str,
    note: &Note,
    embedding: &[f32],
    op: &'static str,
) -> Result<()> {
    let tags = serde_json::to_string(&note.tags).during(op)?;
    let metadata = note
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .during(op)?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO notes ({NOTE_COLUMNS}, namespace, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            note.id,
            note.project_id,
            note.group_id,
            note.title,
            note.text,
            tags,
            note.source,
            note.created_at,
            metadata,
            namespace,
            encode_embedding(embedding)
        ],
    )
    .during(op)?;
    Ok(())
}

fn json_column<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_note(row: &Row<'_>) -> rusqlite::Result<Note> {
    let tags: String = row.get(5)?;
    let metadata: Option<String> = row.get(8)?;
    Ok(Note {
        id: row.get(0)?,
        project_id: row.get(1)?,
        group_id: row.get(2)?,
        title: row.get(3)?,
        text: row.get(4)?,
        tags: json_column(5, &tags)?,
        source: row.get(6)?,
        created_at: row.get(7)?,
        metadata: metadata.as_deref().map(|m| json_column(8, m)).transpose()?,
    })
}

fn row_to_global(row: &Row<'_>) -> rusqlite::Result<GlobalConfig> {
    let value: String = row.get(3)?;
    Ok(GlobalConfig {
        id: row.get(0)?,
        project_id: row.get(1)?,
        key: row.get(2)?,
        value: json_column(3, &value)?,
        updated_at: row.get(4)?,
    })
}

fn row_to_group(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        project_id: row.get(1)?,
        group_key: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Little-endian f32 bytes, 4 per component.
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`encode_embedding`]. A trailing partial component is ignored.
pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
