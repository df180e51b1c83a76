//! Single-channel audio playback with token-guarded supersession.

pub mod decode;
pub mod engine;
pub mod sink;
pub mod source;

pub use decode::DecodedClip;
pub use engine::{PlaybackEngine, PlaybackEvent, PlaybackStatus};
pub use sink::{AudioSink, CpalSink, SinkSession};
pub use source::{AudioFormat, AudioSource};
