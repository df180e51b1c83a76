//! Recognizer adapter seam.
//!
//! The engine never talks to a platform speech API directly. The embedding
//! shell adapts whatever recognizer it has (a system dictation service, a
//! browser bridge, a remote STT stream) into [`RecognizerEvent`]s pushed
//! through an mpsc sender, and implements [`Recognizer`] so the engine can
//! open and abort recognition sessions.

use crate::error::Result;

/// Recognizer error classes, mirroring the platform error vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerError {
    /// Session ended without hearing speech.
    NoSpeech,
    /// Microphone capture failed.
    AudioCapture,
    /// Recognition service unreachable.
    Network,
    /// User denied the microphone permission.
    NotAllowed,
    /// The recognition service itself is not permitted.
    ServiceNotAllowed,
}

impl RecognizerError {
    /// Whether this error ends capture for the session (no auto-restart).
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::NotAllowed | Self::ServiceNotAllowed)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoSpeech => "no-speech",
            Self::AudioCapture => "audio-capture",
            Self::Network => "network",
            Self::NotAllowed => "not-allowed",
            Self::ServiceNotAllowed => "service-not-allowed",
        }
    }

    /// Parse a platform error code. Unknown codes map to `None`; adapters
    /// should treat those as transient and report [`Self::Network`].
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "no-speech" => Some(Self::NoSpeech),
            "audio-capture" => Some(Self::AudioCapture),
            "network" => Some(Self::Network),
            "not-allowed" => Some(Self::NotAllowed),
            "service-not-allowed" => Some(Self::ServiceNotAllowed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecognizerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event surfaced by a recognizer session.
#[derive(Debug, Clone)]
pub enum RecognizerEvent {
    /// A recognition result. Interim results carry `is_final = false` and
    /// are only ever shown, never dispatched.
    Result { text: String, is_final: bool },
    /// The session hit an error. A transient error is usually followed by
    /// [`RecognizerEvent::Ended`].
    Error(RecognizerError),
    /// The session ended (naturally or after an abort).
    Ended,
}

/// A continuous-recognition session driver.
///
/// Implementations push [`RecognizerEvent`]s into the sender handed to them
/// at construction. `begin_session` may be called again after every `Ended`;
/// the engine owns the restart cadence.
pub trait Recognizer: Send + 'static {
    /// Whether recognition is available at all on this platform. When this
    /// returns `false` the engine reports itself unsupported and the caller
    /// must fall back to push-to-talk input.
    fn supported(&self) -> bool {
        true
    }

    /// Open a recognition session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be opened; the engine retries
    /// on its transient-error schedule.
    fn begin_session(&mut self) -> Result<()>;

    /// Abort the current session, if any. Must be idempotent. The adapter
    /// should suppress the `Ended` event for an aborted session or tolerate
    /// the engine ignoring it while stopped.
    fn abort_session(&mut self);
}
