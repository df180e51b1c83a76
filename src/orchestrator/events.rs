//! Events emitted by the orchestrator for the UI shell.
//!
//! Intentionally lightweight so the orchestrator can emit without blocking
//! its own select loop. The UI reads assistant state only from
//! [`UiEvent::AssistantState`] mirrors; capture and playback activity are
//! secondary UX signals, never state sources.

use crate::channel::protocol::{AssistantState, ToolCallStatus};
use crate::orchestrator::conversation::Turn;

/// Severity of a user-visible notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeSeverity {
    Info,
    Warning,
    Error,
}

/// Events describing what the voice session is doing "right now".
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// Mirror of the backend's authoritative assistant state.
    AssistantState(AssistantState),
    /// Channel connectivity changed.
    Connectivity { connected: bool },
    /// Speech capture started or stopped.
    CaptureActive { active: bool },
    /// Continuous capture is unavailable; swap the primary input affordance
    /// to press-and-hold recording.
    CaptureUnsupported,
    /// Live partial transcript for a "hearing…" display.
    InterimTranscript { text: String },
    /// A final transcript matched no wake phrase; show a hint.
    WakeWordMiss { heard: String },
    /// The backend announced its intelligence provider.
    ProviderAnnounced { provider: String },
    /// A user turn was submitted and appended.
    UserTurn { conversation_id: String, turn: Turn },
    /// An assistant reply was appended (to the conversation that was active
    /// when its triggering turn was sent).
    AssistantTurn { conversation_id: String, turn: Turn },
    /// The active conversation changed.
    ActiveConversation { conversation_id: String },
    /// The storage partition (school) changed.
    PartitionSwitched { partition: String },
    /// A backend tool call progressed.
    ToolStatus { tool: String, status: ToolCallStatus },
    /// A terminal tool badge expired.
    ToolStatusCleared { tool: String },
    /// A reply clip is retained for manual playback (spoken responses off).
    PendingAudio { available: bool },
    /// A user-visible notice. Recoverable ones auto-dismiss via
    /// [`UiEvent::NoticeCleared`]; the rest persist until dismissed.
    Notice {
        message: String,
        severity: NoticeSeverity,
        auto_dismiss: bool,
    },
    /// The most recent auto-dismissing notice expired.
    NoticeCleared,
}
