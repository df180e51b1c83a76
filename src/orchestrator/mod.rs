//! Turn orchestration: the interaction state machine binding capture,
//! playback, and the duplex channel.

pub mod conversation;
pub mod coordinator;
pub mod events;

pub use conversation::{Conversation, ConversationStore, Turn, TurnRole};
pub use coordinator::{TurnOrchestrator, TurnSource};
pub use events::{NoticeSeverity, UiEvent};
