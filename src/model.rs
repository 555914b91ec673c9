//! Core record types: [`Note`], [`GlobalConfig`], and [`Group`].
//!
//! All three serialize with camelCase keys so they round-trip through the JSON
//! the protocol layer exchanges with agents. Timestamps are RFC 3339 UTC strings.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Group id reserved for project-wide notes. Not creatable as a user group.
pub const GLOBAL_GROUP: &str = "global";

/// Prefix every [`GlobalConfig`] key must carry.
pub const GLOBAL_KEY_PREFIX: &str = "global.";

pub const GLOBAL_KEY_EMBEDDER_PROVIDER: &str = "global.memory.embedder.provider";
pub const GLOBAL_KEY_EMBEDDER_MODEL: &str = "global.memory.embedder.model";
pub const GLOBAL_KEY_GROUP_DEFAULTS: &str = "global.memory.groupDefaults";
pub const GLOBAL_KEY_PROJECT_CONVENTIONS: &str = "global.project.conventions";

/// A memory note, scoped by project and group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Caller-assigned id, unique within a namespace.
    pub id: String,
    /// Canonicalized project path.
    pub project_id: String,
    /// `[a-zA-Z0-9_-]+`; `"global"` for project-wide notes.
    pub group_id: String,
    pub title: Option<String>,
    pub text: String,
    /// Ordered, case-sensitive, duplicates allowed.
    #[serde(default)]
    pub tags: Vec<String>,
    pub source: Option<String>,
    /// RFC 3339 UTC. Filled with "now" on write when absent.
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Note {
    /// Minimal note with only the required fields set.
    pub fn new(
        id: impl Into<String>,
        project_id: impl Into<String>,
        group_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            group_id: group_id.into(),
            title: None,
            text: text.into(),
            tags: Vec::new(),
            source: None,
            created_at: None,
            metadata: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(StoreError::InvalidInput("note id must not be empty".into()));
        }
        if self.project_id.is_empty() {
            return Err(StoreError::InvalidInput("projectId must not be empty".into()));
        }
        validate_group_id(&self.group_id)?;
        if self.text.is_empty() {
            return Err(StoreError::InvalidInput("text must not be empty".into()));
        }
        Ok(())
    }

    /// Set `created_at` to the current time if it is missing.
    pub(crate) fn stamp_created_at(&mut self) {
        if self.created_at.is_none() {
            self.created_at = Some(now_rfc3339());
        }
    }
}

/// A project-scoped key/value setting. Upserted by `(project_id, key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    /// Always `global_config_id(project_id, key)`; caller values are overwritten.
    pub id: String,
    pub project_id: String,
    /// Must start with `"global."`.
    pub key: String,
    pub value: serde_json::Value,
    /// Server-set on every upsert.
    pub updated_at: Option<String>,
}

impl GlobalConfig {
    pub fn new(
        project_id: impl Into<String>,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        let project_id = project_id.into();
        let key = key.into();
        Self {
            id: global_config_id(&project_id, &key),
            project_id,
            key,
            value,
            updated_at: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_global_key(&self.key)
    }

    /// Assign the derived id and a fresh `updated_at`, as every backend does on upsert.
    pub(crate) fn prepare_upsert(&mut self) {
        self.id = global_config_id(&self.project_id, &self.key);
        self.updated_at = Some(now_rfc3339());
    }
}

/// A named group inside a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub project_id: String,
    pub group_key: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Group {
    /// New group with a UUIDv7 id and both timestamps set to now.
    pub fn new(
        project_id: impl Into<String>,
        group_key: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = now_rfc3339();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            project_id: project_id.into(),
            group_key: group_key.into(),
            title: title.into(),
            description: description.into(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(StoreError::InvalidInput("group id must not be empty".into()));
        }
        if self.project_id.is_empty() {
            return Err(StoreError::InvalidInput("projectId must not be empty".into()));
        }
        validate_group_key_for_create(&self.group_key)?;
        if self.title.is_empty() {
            return Err(StoreError::InvalidInput("title must not be empty".into()));
        }
        Ok(())
    }
}

/// Deterministic [`GlobalConfig`] id for a `(project_id, key)` pair.
pub fn global_config_id(project_id: &str, key: &str) -> String {
    format!("global:{project_id}:{key}")
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Group ids match `[a-zA-Z0-9_-]+`. `"global"` is accepted here (notes may use it).
pub fn validate_group_id(group_id: &str) -> Result<()> {
    if group_id.is_empty() {
        return Err(StoreError::InvalidInput("groupId must not be empty".into()));
    }
    if !group_id.chars().all(is_identifier_char) {
        return Err(StoreError::InvalidInput(format!(
            "groupId must match [a-zA-Z0-9_-]+, got {group_id:?}"
        )));
    }
    Ok(())
}

/// Like [`validate_group_id`], but rejects the reserved `"global"` key.
pub fn validate_group_key_for_create(group_key: &str) -> Result<()> {
    validate_group_id(group_key)?;
    if group_key == GLOBAL_GROUP {
        return Err(StoreError::InvalidInput(
            "group key 'global' is reserved".into(),
        ));
    }
    Ok(())
}

/// Keys match `global\.[a-zA-Z0-9._-]+`.
pub fn validate_global_key(key: &str) -> Result<()> {
    let Some(rest) = key.strip_prefix(GLOBAL_KEY_PREFIX) else {
        return Err(StoreError::InvalidInput(format!(
            "key must start with 'global.', got {key:?}"
        )));
    };
    if rest.is_empty() {
        return Err(StoreError::InvalidInput(format!(
            "key must have content after 'global.', got {key:?}"
        )));
    }
    if !rest.chars().all(|c| is_identifier_char(c) || c == '.') {
        return Err(StoreError::InvalidInput(format!(
            "key must match global.[a-zA-Z0-9._-]+, got {key:?}"
        )));
    }
    Ok(())
}

/// Current UTC time as RFC 3339 with second precision (`2024-01-15T10:30:00Z`).
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
