//! Wire frames for the backend channel.
//!
//! Both directions are closed tagged unions; a `type` field selects the
//! shape. Anything that fails to parse is logged and dropped by the client,
//! never surfaced as an error to the orchestrator.

use crate::playback::source::AudioFormat;
use serde::{Deserialize, Serialize};

/// Assistant activity state. The backend owns the authoritative value; the
/// client only mirrors what it receives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssistantState {
    #[default]
    Idle,
    Listening,
    Thinking,
    Speaking,
    Error,
}

/// Status of one backend tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Calling,
    Done,
    Error,
}

impl ToolCallStatus {
    /// Whether this status ends the tool's lifecycle.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// Summary of one tool result attached to an assistant reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResultSummary {
    pub tool: String,
    pub summary: String,
}

/// Frames sent from the client to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// User enabled speech capture.
    StartListening,
    /// User disabled capture, or capture was forced off while the
    /// assistant speaks.
    StopListening,
    /// A wake-word-stripped recognized utterance.
    TranscriptFinal { text: String },
    /// Typed or quick-suggestion input.
    Chat { text: String },
    /// Cancel the in-flight assistant response. Always precedes the turn
    /// frame that replaces it.
    Interrupt,
}

/// Frames received from the backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// State transition. Provider, wake word, and school arrive only on the
    /// bootstrap frame right after connect.
    AssistantState {
        state: AssistantState,
        #[serde(default)]
        llm_provider: Option<String>,
        #[serde(default)]
        wake_word: Option<String>,
        #[serde(default)]
        school: Option<String>,
    },
    /// The textual reply for the current turn.
    AssistantText {
        text: String,
        #[serde(default)]
        tool_results: Vec<ToolResultSummary>,
    },
    /// Synthesized audio for the current reply is available.
    AssistantAudioReady {
        #[serde(default)]
        audio_url: Option<String>,
        #[serde(default)]
        audio_b64: Option<String>,
        #[serde(default)]
        format: Option<AudioFormat>,
    },
    /// Progress of one backend tool call.
    ToolStatus {
        tool: String,
        status: ToolCallStatus,
    },
    /// Backend failure. Recoverable errors auto-dismiss in the UI.
    Error {
        message: String,
        #[serde(default)]
        recoverable: bool,
    },
}
