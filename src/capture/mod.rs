//! Continuous speech capture: recognizer adapter, wake-word gate, and the
//! listening state machine with auto-restart.

pub mod engine;
pub mod recognizer;
pub mod wake;

pub use engine::{CaptureEngine, CaptureEvent, CaptureState, StopReason};
pub use recognizer::{Recognizer, RecognizerError, RecognizerEvent};
pub use wake::{GateOutcome, WakeGate};
