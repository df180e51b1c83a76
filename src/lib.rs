//! Vuddy voice interaction engine.
//!
//! This crate is the client core of a voice assistant: it captures speech,
//! gates it behind a wake word, streams recognized commands to a backend
//! orchestrator over a duplex WebSocket channel, and plays back synthesized
//! replies while staying responsive to mid-response interruption.
//!
//! # Architecture
//!
//! Four components coordinate over async channels on one event loop:
//! - **Speech capture**: wraps a platform recognizer behind a trait seam,
//!   survives transient errors via auto-restart, strips wake phrases
//! - **Audio playback**: one logical output channel with a monotonically
//!   increasing session token that invalidates stale async completions
//! - **Duplex channel**: reconnecting WebSocket client with typed frames
//! - **Turn orchestrator**: turn-taking policy, most importantly the
//!   interrupt-before-send ordering when the user barges in
//!
//! Tab screens, REST CRUD, and theming live in the embedding shell; the
//! backend (LLM, tools, TTS) is reached only through the channel protocol.

pub mod capture;
pub mod channel;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod playback;

#[cfg(test)]
mod test_utils;

pub use capture::{CaptureEngine, CaptureEvent, Recognizer, RecognizerEvent, WakeGate};
pub use channel::{AssistantState, ChannelClient, ClientFrame, ServerFrame, TurnChannel};
pub use config::VoiceConfig;
pub use error::{Result, VoiceError};
pub use orchestrator::{Conversation, Turn, TurnOrchestrator, UiEvent};
pub use playback::{AudioSource, CpalSink, PlaybackEngine, PlaybackStatus};
