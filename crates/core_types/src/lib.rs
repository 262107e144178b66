use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type NoteId = String;

const ID_SUFFIX_LEN: usize = 9;
const ID_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

static LAST_ID_MILLIS: AtomicI64 = AtomicI64::new(0);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum UiLanguage {
    #[default]
    Es,
    En,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    pub content: String,
    pub category: String,
    /// Unix epoch milliseconds of creation or last replacement.
    pub timestamp: i64,
}

impl Note {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_unique_id(),
            title: title.into(),
            content: content.into(),
            category: category.into(),
            timestamp: now_millis(),
        }
    }

    pub fn from_draft(draft: NoteDraft) -> Self {
        Self::new(draft.title, draft.content, draft.category)
    }

    /// Builds the replacement record for an edit: same id, every other field
    /// taken from the draft and a fresh timestamp.
    pub fn replaced_with(&self, draft: NoteDraft) -> Self {
        Self {
            id: self.id.clone(),
            title: draft.title,
            content: draft.content,
            category: draft.category,
            timestamp: now_millis(),
        }
    }

    pub fn content_len(&self) -> usize {
        self.content.chars().count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteDraft {
    pub title: String,
    pub content: String,
    pub category: String,
}

impl NoteDraft {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            category: category.into(),
        }
    }

    pub fn from_note(note: &Note) -> Self {
        Self {
            title: note.title.clone(),
            content: note.content.clone(),
            category: note.category.clone(),
        }
    }

    /// Checks the draft before it may be turned into a persisted note.
    ///
    /// An empty `categories` slice accepts any category.
    pub fn validate(&self, categories: &[Category]) -> Result<(), NoteValidationError> {
        if self.title.trim().is_empty() {
            return Err(NoteValidationError::EmptyTitle);
        }
        if self.content.trim().is_empty() {
            return Err(NoteValidationError::EmptyContent);
        }
        if !categories.is_empty() && !categories.iter().any(|c| c.name == self.category) {
            return Err(NoteValidationError::UnknownCategory(self.category.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NoteValidationError {
    #[error("note title cannot be empty")]
    EmptyTitle,
    #[error("note content cannot be empty")]
    EmptyContent,
    #[error("unknown category `{0}`")]
    UnknownCategory(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub icon: String,
}

impl Category {
    pub fn new(name: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            icon: icon.into(),
        }
    }
}

pub fn default_categories() -> Vec<Category> {
    vec![
        Category::new("Teología", "book"),
        Category::new("Filosofía", "lightbulb"),
        Category::new("General", "clipboard"),
        Category::new("Personal", "user"),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegacyCategory {
    Teologia,
    Filosofia,
}

impl LegacyCategory {
    pub fn canonical_name(self) -> &'static str {
        match self {
            Self::Teologia => "Teología",
            Self::Filosofia => "Filosofía",
        }
    }
}

/// Record shape written by early releases: numeric id, no title and ISO-8601
/// creation/update instants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyNote {
    pub id: u64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub category: LegacyCategory,
}

impl From<LegacyNote> for Note {
    fn from(legacy: LegacyNote) -> Self {
        Self {
            id: legacy.id.to_string(),
            title: String::new(),
            content: legacy.content,
            category: legacy.category.canonical_name().to_string(),
            timestamp: legacy.updated_at.timestamp_millis(),
        }
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Returns `"<millis>-<random>"`, unique across calls within the process.
///
/// The time part never goes backwards even if the wall clock does; calls
/// within the same millisecond are told apart by the random base-36 suffix.
pub fn generate_unique_id() -> String {
    let now = now_millis();
    let previous = LAST_ID_MILLIS.fetch_max(now, Ordering::Relaxed);
    let millis = previous.max(now);

    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();

    format!("{millis}-{suffix}")
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn unique_ids_do_not_collide_in_tight_loop() {
        let ids: HashSet<String> = (0..10_000).map(|_| generate_unique_id()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn unique_id_has_time_and_random_parts() {
        let id = generate_unique_id();
        let (time, suffix) = id.split_once('-').expect("separator");
        assert!(time.parse::<i64>().expect("numeric time") > 0);
        assert_eq!(suffix.len(), ID_SUFFIX_LEN);
        assert!(
            suffix
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
        );
    }

    #[test]
    fn draft_validation_trims_whitespace() {
        let categories = default_categories();
        assert_eq!(
            NoteDraft::new("  ", "body", "General").validate(&categories),
            Err(NoteValidationError::EmptyTitle)
        );
        assert_eq!(
            NoteDraft::new("title", "\n\t", "General").validate(&categories),
            Err(NoteValidationError::EmptyContent)
        );
        assert!(
            NoteDraft::new("title", "body", "General")
                .validate(&categories)
                .is_ok()
        );
    }

    #[test]
    fn draft_validation_checks_configured_categories() {
        let draft = NoteDraft::new("title", "body", "Recetas");
        assert_eq!(
            draft.validate(&default_categories()),
            Err(NoteValidationError::UnknownCategory("Recetas".to_string()))
        );
        assert!(draft.validate(&[]).is_ok());
    }

    #[test]
    fn replacement_keeps_identity_and_refreshes_timestamp() {
        let mut original = Note::new("a", "b", "General");
        original.timestamp = 1;
        let edited = original.replaced_with(NoteDraft::new("c", "d", "Personal"));
        assert_eq!(edited.id, original.id);
        assert_eq!(edited.title, "c");
        assert_eq!(edited.category, "Personal");
        assert!(edited.timestamp > original.timestamp);
    }

    #[test]
    fn serializes_canonical_field_names() {
        let note = Note {
            id: "1".to_string(),
            title: "t".to_string(),
            content: "c".to_string(),
            category: "General".to_string(),
            timestamp: 42,
        };
        let json = serde_json::to_string(&note).expect("serialize");
        assert_eq!(
            json,
            r#"{"id":"1","title":"t","content":"c","category":"General","timestamp":42}"#
        );
    }

    #[test]
    fn converts_legacy_note() {
        let legacy: LegacyNote = serde_json::from_str(
            r#"{
                "id": 1700000000000,
                "content": "Sobre la gracia",
                "createdAt": "2023-11-14T22:13:20.000Z",
                "updatedAt": "2023-11-14T22:15:00.000Z",
                "category": "Teologia"
            }"#,
        )
        .expect("legacy json");
        let note = Note::from(legacy);
        assert_eq!(note.id, "1700000000000");
        assert_eq!(note.title, "");
        assert_eq!(note.category, "Teología");
        assert_eq!(note.timestamp, 1_700_000_100_000);
    }
}
