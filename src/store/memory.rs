//! Reference backend: everything in process memory.
//!
//! This is the semantic oracle for the other backends. Search is a full scan
//! through the shared pipeline in [`super`]; nothing persists past the process.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{
    rank_results, similarity_score, sort_recent, Lifecycle, ListOptions, SearchOptions,
    SearchResult, Store,
};
use crate::error::{Result, StoreError};
use crate::model::{GlobalConfig, Group, Note};

#[derive(Default)]
struct State {
    lifecycle: Lifecycle,
    notes: HashMap<String, (Note, Vec<f32>)>,
    /// Keyed by `(project_id, key)`.
    globals: HashMap<(String, String), GlobalConfig>,
    groups: HashMap<String, Group>,
}

impl State {
    fn ready(&self) -> Result<()> {
        self.lifecycle.namespace().map(|_| ())
    }

    /// `InvalidInput` if another group in the project already owns `group.group_key`.
    fn check_group_key(&self, group: &Group) -> Result<()> {
        let clash = self.groups.values().any(|g| {
            g.project_id == group.project_id && g.group_key == group.group_key && g.id != group.id
        });
        if clash {
            return Err(StoreError::InvalidInput(format!(
                "group key {:?} already exists in project",
                group.group_key
            )));
        }
        Ok(())
    }
}

/// In-memory [`Store`]. Values handed out are clones; callers can never alias
/// stored state.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::backend("lock", "memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::backend("lock", "memory store lock poisoned"))
    }

    /// Read access that also checks initialization.
    fn ready_read(&self) -> Result<RwLockReadGuard<'_, State>> {
        let state = self.read()?;
        state.ready()?;
        Ok(state)
    }

    fn ready_write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        let state = self.write()?;
        state.ready()?;
        Ok(state)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn initialize(&self, namespace: &str) -> Result<()> {
        let mut state = self.write()?;
        if state.lifecycle.begin(namespace)? {
            tracing::info!(backend = "memory", namespace, "store initialized");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.write()?;
        *state = State::default();
        tracing::debug!(backend = "memory", "store closed");
        Ok(())
    }

    async fn add_note(&self, mut note: Note, embedding: &[f32]) -> Result<Note> {
        let mut state = self.ready_write()?;
        note.stamp_created_at();
        state
            .notes
            .insert(note.id.clone(), (note.clone(), embedding.to_vec()));
        tracing::debug!(id = %note.id, "note added");
        Ok(note)
    }

    async fn get(&self, id: &str) -> Result<Note> {
        let state = self.ready_read()?;
        state
            .notes
            .get(id)
            .map(|(note, _)| note.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn update(&self, mut note: Note, embedding: &[f32]) -> Result<Note> {
        let mut state = self.ready_write()?;
        let Some(slot) = state.notes.get_mut(&note.id) else {
            return Err(StoreError::NotFound);
        };
        note.stamp_created_at();
        *slot = (note.clone(), embedding.to_vec());
        tracing::debug!(id = %note.id, "note updated");
        Ok(note)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut state = self.ready_write()?;
        state.notes.remove(id).ok_or(StoreError::NotFound)?;
        tracing::debug!(id, "note deleted");
        Ok(())
    }

    async fn search(&self, query: &[f32], opts: &SearchOptions) -> Result<Vec<SearchResult>> {
        let state = self.ready_read()?;
        opts.validate()?;
        let candidates: Vec<SearchResult> = state
            .notes
            .values()
            .filter(|(note, _)| opts.matches(note))
            .map(|(note, embedding)| SearchResult {
                note: note.clone(),
                score: similarity_score(query, embedding),
            })
            .collect();
        Ok(rank_results(candidates, opts.top_k))
    }

    async fn list_recent(&self, opts: &ListOptions) -> Result<Vec<Note>> {
        let state = self.ready_read()?;
        opts.validate()?;
        let matching: Vec<Note> = state
            .notes
            .values()
            .filter(|(note, _)| opts.matches(note))
            .map(|(note, _)| note.clone())
            .collect();
        Ok(sort_recent(matching, opts.limit))
    }

    async fn upsert_global(&self, mut config: GlobalConfig) -> Result<GlobalConfig> {
        let mut state = self.ready_write()?;
        config.prepare_upsert();
        state.globals.insert(
            (config.project_id.clone(), config.key.clone()),
            config.clone(),
        );
        tracing::debug!(id = %config.id, "global config upserted");
        Ok(config)
    }

    async fn get_global(&self, project_id: &str, key: &str) -> Result<Option<GlobalConfig>> {
        let state = self.ready_read()?;
        Ok(state
            .globals
            .get(&(project_id.to_string(), key.to_string()))
            .cloned())
    }

    async fn get_global_by_id(&self, id: &str) -> Result<GlobalConfig> {
        let state = self.ready_read()?;
        state
            .globals
            .values()
            .find(|c| c.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn delete_global_by_id(&self, id: &str) -> Result<()> {
        let mut state = self.ready_write()?;
        let before = state.globals.len();
        state.globals.retain(|_, c| c.id != id);
        if state.globals.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn add_group(&self, group: &Group) -> Result<()> {
        let mut state = self.ready_write()?;
        state.check_group_key(group)?;
        state.groups.insert(group.id.clone(), group.clone());
        Ok(())
    }

    async fn get_group(&self, id: &str) -> Result<Group> {
        let state = self.ready_read()?;
        state.groups.get(id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_group_by_key(&self, project_id: &str, group_key: &str) -> Result<Group> {
        let state = self.ready_read()?;
        state
            .groups
            .values()
            .find(|g| g.project_id == project_id && g.group_key == group_key)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update_group(&self, group: &Group) -> Result<()> {
        let mut state = self.ready_write()?;
        if !state.groups.contains_key(&group.id) {
            return Err(StoreError::NotFound);
        }
        state.check_group_key(group)?;
        state.groups.insert(group.id.clone(), group.clone());
        Ok(())
    }

    async fn delete_group(&self, id: &str) -> Result<()> {
        let mut state = self.ready_write()?;
        state.groups.remove(id).ok_or(StoreError::NotFound)?;
        Ok(())
    }

    async fn list_groups(&self, project_id: &str) -> Result<Vec<Group>> {
        let state = self.ready_read()?;
        let mut groups: Vec<Group> = state
            .groups
            .values()
            .filter(|g| g.project_id == project_id)
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.group_key.cmp(&b.group_key));
        Ok(groups)
    }
}
