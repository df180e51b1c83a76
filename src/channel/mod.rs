//! Duplex WebSocket channel to the backend orchestrator.

pub mod client;
pub mod protocol;

pub use client::{ChannelClient, ChannelEvent, SessionBootstrap, TurnChannel};
pub use protocol::{
    AssistantState, ClientFrame, ServerFrame, ToolCallStatus, ToolResultSummary,
};
