use std::sync::Arc;

use core_types::{LegacyNote, Note};
use kv_store::{KeyValueStore, StorageKey, StoreError};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, warn};

pub const DEFAULT_NAMESPACE: &str = "@NoteApp";
pub const NOTES_KEY: &str = "notes";

const REQUIRED_STRING_FIELDS: [&str; 4] = ["id", "title", "content", "category"];

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("failed to write notes under `{key}`: {source}")]
    StorageWrite {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error("failed to serialize notes: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("imported data is not valid JSON: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("imported data is not an array")]
    NotAnArray,
    #[error("imported record {index} has a bad shape: {reason}")]
    BadRecordShape { index: usize, reason: String },
}

/// Persists the whole note collection as one JSON array under a single key.
#[derive(Clone)]
pub struct NoteRepository {
    store: Arc<dyn KeyValueStore>,
    key: StorageKey,
}

impl NoteRepository {
    pub fn new(store: Arc<dyn KeyValueStore>, key: StorageKey) -> Self {
        Self { store, key }
    }

    pub fn with_default_key(store: Arc<dyn KeyValueStore>) -> Self {
        Self::new(store, StorageKey::new(DEFAULT_NAMESPACE, NOTES_KEY))
    }

    pub fn key(&self) -> &StorageKey {
        &self.key
    }

    /// Overwrites the stored collection with `notes`.
    pub async fn save(&self, notes: &[Note]) -> Result<(), RepositoryError> {
        let key = self.key.to_string();
        let text = serde_json::to_string(notes)?;
        if let Err(source) = self.store.set_item(&key, text).await {
            error!(key = %key, error = %source, "failed to save notes");
            return Err(RepositoryError::StorageWrite { key, source });
        }
        debug!(key = %key, count = notes.len(), "notes saved");
        Ok(())
    }

    /// Reads the stored collection. Never fails: a missing value, a failed
    /// read and an undecodable value all yield an empty collection.
    pub async fn load(&self) -> Vec<Note> {
        let key = self.key.to_string();
        let raw = match self.store.get_item(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(key = %key, error = %err, "failed to read notes");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<Note>>(&raw) {
            Ok(notes) => {
                debug!(key = %key, count = notes.len(), "notes loaded");
                notes
            }
            Err(err) => {
                warn!(key = %key, error = %err, "stored notes are not decodable");
                Vec::new()
            }
        }
    }

    pub async fn clear(&self) -> Result<(), RepositoryError> {
        let key = self.key.to_string();
        if let Err(source) = self.store.remove_item(&key).await {
            error!(key = %key, error = %source, "failed to clear notes");
            return Err(RepositoryError::StorageWrite { key, source });
        }
        debug!(key = %key, "notes cleared");
        Ok(())
    }

    pub fn export(&self, notes: &[Note]) -> Result<String, RepositoryError> {
        export_notes(notes)
    }

    pub fn import(&self, text: &str) -> Result<Vec<Note>, ImportError> {
        import_notes(text)
    }

    pub fn import_legacy(&self, text: &str) -> Result<Vec<Note>, ImportError> {
        import_legacy_notes(text)
    }
}

/// Pretty-printed JSON array with two-space indentation.
pub fn export_notes(notes: &[Note]) -> Result<String, RepositoryError> {
    Ok(serde_json::to_string_pretty(notes)?)
}

/// Parses and validates an exported collection. Every element must carry
/// string `id`, `title`, `content`, `category` and an integer `timestamp`;
/// values are taken as-is, without coercion.
pub fn import_notes(text: &str) -> Result<Vec<Note>, ImportError> {
    parse_array(text)?
        .into_iter()
        .enumerate()
        .map(|(index, item)| parse_record(index, item))
        .collect()
}

/// Parses a collection written in the legacy record shape and converts it to
/// canonical notes.
pub fn import_legacy_notes(text: &str) -> Result<Vec<Note>, ImportError> {
    parse_array(text)?
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value::<LegacyNote>(item)
                .map(Note::from)
                .map_err(|err| ImportError::BadRecordShape {
                    index,
                    reason: err.to_string(),
                })
        })
        .collect()
}

fn parse_array(text: &str) -> Result<Vec<Value>, ImportError> {
    match serde_json::from_str::<Value>(text).map_err(ImportError::Parse)? {
        Value::Array(items) => Ok(items),
        _ => Err(ImportError::NotAnArray),
    }
}

fn parse_record(index: usize, item: Value) -> Result<Note, ImportError> {
    let bad_shape = |reason: String| ImportError::BadRecordShape { index, reason };

    let Value::Object(mut fields) = item else {
        return Err(bad_shape("record is not an object".to_string()));
    };

    for name in REQUIRED_STRING_FIELDS {
        match fields.get(name) {
            Some(Value::String(_)) => {}
            Some(_) => return Err(bad_shape(format!("field `{name}` must be a string"))),
            None => return Err(bad_shape(format!("missing field `{name}`"))),
        }
    }
    let timestamp = match fields.get("timestamp") {
        Some(value @ Value::Number(_)) => value
            .as_i64()
            .ok_or_else(|| bad_shape("field `timestamp` must be an integer".to_string()))?,
        Some(_) => return Err(bad_shape("field `timestamp` must be a number".to_string())),
        None => return Err(bad_shape("missing field `timestamp`".to_string())),
    };

    Ok(Note {
        id: take_string(&mut fields, "id"),
        title: take_string(&mut fields, "title"),
        content: take_string(&mut fields, "content"),
        category: take_string(&mut fields, "category"),
        timestamp,
    })
}

fn take_string(fields: &mut Map<String, Value>, name: &str) -> String {
    match fields.remove(name) {
        Some(Value::String(value)) => value,
        _ => String::new(),
    }
}
