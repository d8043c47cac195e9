use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::config::{ApiConfiguration, FeatureToggles};
use crate::conversation::{Conversation, ConversationList};
use crate::error::Result;
use crate::logging::log_storage;
use crate::persona::Persona;
use crate::prompt_pipeline::PromptOverrides;

/// Blob keys. Each one is loaded and saved independently.
pub mod keys {
    pub const CONVERSATIONS: &str = "copilot-conversations";
    pub const SUGGESTIONS_ENABLED: &str = "copilot-suggestions-enabled";
    pub const INLINE_SUGGESTIONS_ENABLED: &str = "copilot-inline-suggestions-enabled";
    pub const CONTEXTUAL_HOOK_ENABLED: &str = "copilot-contextual-hook-enabled";
    pub const PERSONAS: &str = "copilot-personas";
    pub const ACTIVE_PERSONA: &str = "copilot-active-persona";
    pub const API_CONFIG: &str = "copilot-api-config";
    pub const PROMPT_OVERRIDES: &str = "copilot-prompt-overrides";
}

/// Default database location
pub fn default_db_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pivot-chat").join("pivot-chat.db")
}

/// SQLite-backed key-value store of JSON blobs.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            // A failure here surfaces from Connection::open below.
            let _ = std::fs::create_dir_all(parent);
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            -- Persisted application state, one JSON blob per key
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock leaves the connection itself usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock();
        f(&conn)
    }

    // ============ Raw blobs ============

    pub fn get_raw(&self, key: &str) -> Result<Option<String>> {
        self.with_connection(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM kv_store WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
    }

    pub fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now],
            )?;
            Ok(())
        })
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
            Ok(())
        })
    }

    pub fn reset_all_data(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM kv_store", [])?;
            Ok(())
        })
    }

    // ============ Typed blobs ============

    /// Load a blob. One that fails to parse loads as absent.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get_raw(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                log_storage(&format!("Ignoring invalid blob '{}': {}", key, e));
                Ok(None)
            }
        }
    }

    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set_raw(key, &raw)
    }

    /// Save `Some`, remove on `None`.
    pub fn save_optional<T: Serialize>(&self, key: &str, value: Option<&T>) -> Result<()> {
        match value {
            Some(value) => self.save(key, value),
            None => self.remove(key),
        }
    }

    pub fn load_conversations(&self) -> Result<Option<ConversationList>> {
        Ok(self
            .load::<Vec<Conversation>>(keys::CONVERSATIONS)?
            .map(ConversationList::from_vec))
    }

    pub fn save_conversations(&self, conversations: &ConversationList) -> Result<()> {
        self.save(keys::CONVERSATIONS, conversations)
    }

    /// Each toggle is its own blob; missing or invalid ones keep their default.
    pub fn load_toggles(&self) -> Result<FeatureToggles> {
        let defaults = FeatureToggles::default();
        Ok(FeatureToggles {
            suggestions_enabled: self
                .load(keys::SUGGESTIONS_ENABLED)?
                .unwrap_or(defaults.suggestions_enabled),
            inline_suggestions_enabled: self
                .load(keys::INLINE_SUGGESTIONS_ENABLED)?
                .unwrap_or(defaults.inline_suggestions_enabled),
            contextual_hook_enabled: self
                .load(keys::CONTEXTUAL_HOOK_ENABLED)?
                .unwrap_or(defaults.contextual_hook_enabled),
        })
    }

    pub fn save_toggles(&self, toggles: &FeatureToggles) -> Result<()> {
        self.save(keys::SUGGESTIONS_ENABLED, &toggles.suggestions_enabled)?;
        self.save(
            keys::INLINE_SUGGESTIONS_ENABLED,
            &toggles.inline_suggestions_enabled,
        )?;
        self.save(keys::CONTEXTUAL_HOOK_ENABLED, &toggles.contextual_hook_enabled)
    }

    pub fn load_personas(&self) -> Result<Option<Vec<Persona>>> {
        self.load(keys::PERSONAS)
    }

    pub fn save_personas(&self, personas: &[Persona]) -> Result<()> {
        self.save(keys::PERSONAS, personas)
    }

    pub fn load_active_persona(&self) -> Result<Option<String>> {
        self.load(keys::ACTIVE_PERSONA)
    }

    pub fn save_active_persona(&self, id: &str) -> Result<()> {
        self.save(keys::ACTIVE_PERSONA, id)
    }

    pub fn load_api_config(&self) -> Result<Option<ApiConfiguration>> {
        self.load(keys::API_CONFIG)
    }

    pub fn save_api_config(&self, config: Option<&ApiConfiguration>) -> Result<()> {
        self.save_optional(keys::API_CONFIG, config)
    }

    pub fn load_prompt_overrides(&self) -> Result<Option<PromptOverrides>> {
        self.load(keys::PROMPT_OVERRIDES)
    }

    pub fn save_prompt_overrides(&self, overrides: Option<&PromptOverrides>) -> Result<()> {
        self.save_optional(keys::PROMPT_OVERRIDES, overrides)
    }
}
