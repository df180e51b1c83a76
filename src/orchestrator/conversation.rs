//! Conversation model and durable storage.
//!
//! Conversations are JSON documents keyed by a partition identifier (the
//! active school). The orchestrator is the single writer and always
//! replaces a whole conversation object rather than mutating fields in
//! place, which keeps concurrent-update bugs structurally impossible.

use crate::channel::protocol::ToolResultSummary;
use crate::error::{Result, VoiceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Maximum characters of the first user turn used as a conversation title.
const TITLE_MAX_CHARS: usize = 48;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One exchange unit in a conversation. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Millisecond timestamp at submission; doubles as the turn id.
    pub id: i64,
    pub role: TurnRole,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResultSummary>,
}

impl Turn {
    #[must_use]
    pub fn user(text: &str) -> Self {
        Self {
            id: Utc::now().timestamp_millis(),
            role: TurnRole::User,
            text: text.to_owned(),
            tool_results: Vec::new(),
        }
    }

    #[must_use]
    pub fn assistant(text: String, tool_results: Vec<ToolResultSummary>) -> Self {
        Self {
            id: Utc::now().timestamp_millis(),
            role: TurnRole::Assistant,
            text,
            tool_results,
        }
    }
}

/// An ordered, append-only sequence of turns plus metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub turns: Vec<Turn>,
}

impl Conversation {
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: "New conversation".to_owned(),
            created_at: now,
            updated_at: now,
            turns: Vec::new(),
        }
    }

    /// Append a turn. The title tracks the first user turn.
    pub fn push_turn(&mut self, turn: Turn) {
        self.turns.push(turn);
        if let Some(first_user) = self.turns.iter().find(|t| t.role == TurnRole::User) {
            self.title = title_from(&first_user.text);
        }
        self.updated_at = Utc::now();
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

fn title_from(text: &str) -> String {
    let mut title: String = text.chars().take(TITLE_MAX_CHARS).collect();
    if text.chars().count() > TITLE_MAX_CHARS {
        title.push('…');
    }
    title
}

/// Durable conversation storage: one JSON document per partition.
pub struct ConversationStore {
    root: PathBuf,
}

impl ConversationStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Load every conversation stored under a partition. A missing file is
    /// an empty partition, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_all(&self, partition: &str) -> Result<Vec<Conversation>> {
        let path = self.path_for(partition);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map_err(|e| VoiceError::Storage(format!("corrupt partition {partition}: {e}")))
    }

    /// Replace one conversation inside its partition (read-modify-write of
    /// the whole document, written atomically via a temp file rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the partition cannot be read or written.
    pub fn replace(&self, partition: &str, conversation: &Conversation) -> Result<()> {
        let mut conversations = self.load_all(partition)?;
        match conversations.iter_mut().find(|c| c.id == conversation.id) {
            Some(slot) => *slot = conversation.clone(),
            None => conversations.push(conversation.clone()),
        }

        std::fs::create_dir_all(&self.root)?;
        let path = self.path_for(partition);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&conversations)
            .map_err(|e| VoiceError::Storage(format!("serialize partition: {e}")))?;
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn path_for(&self, partition: &str) -> PathBuf {
        let safe: String = partition
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        self.root.join(format!("conversations-{safe}.json"))
    }
}
