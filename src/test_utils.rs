//! Shared test utilities used across multiple test modules.

use crate::error::{Result, VoiceError};
use crate::playback::decode::DecodedClip;
use crate::playback::sink::{AudioSink, SinkSession};
use crate::playback::source::{AudioFormat, AudioSource};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Create a unique temporary directory for test isolation.
///
/// The directory name includes `prefix`, the process ID, and a nanosecond
/// timestamp so parallel tests never collide.
pub fn temp_test_root(prefix: &str, name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "vuddy-{prefix}-{name}-{}-{}",
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    std::fs::create_dir_all(&dir).expect("create temp test dir");
    dir
}

/// Build a minimal valid 16-bit PCM mono WAV byte stream.
#[must_use]
pub fn tiny_wav(sample_rate: u32, num_samples: usize) -> Vec<u8> {
    let data_size = (num_samples * 2) as u32;
    let mut wav = Vec::with_capacity(44 + num_samples * 2);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_size).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_size.to_le_bytes());
    for i in 0..num_samples {
        let sample = ((i % 64) as i16 - 32) * 256;
        wav.extend_from_slice(&sample.to_le_bytes());
    }
    wav
}

/// An inline WAV source that decodes without any network fetch.
#[must_use]
pub fn tiny_wav_source() -> AudioSource {
    AudioSource::Inline {
        data_b64: BASE64.encode(tiny_wav(8_000, 400)),
        format: AudioFormat::Wav,
    }
}

/// What a [`ScriptedSink`] was asked to do, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkAction {
    Unlock,
    Start,
    SessionPause,
    SessionResume,
    SessionStop,
}

/// A sink that records calls instead of producing sound.
///
/// The completion sender for the most recent session is retained so tests
/// can fire (or never fire) natural-end completions on demand.
#[derive(Clone)]
pub struct ScriptedSink {
    actions: Arc<Mutex<Vec<SinkAction>>>,
    fail_next_start: Arc<AtomicBool>,
    done: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl ScriptedSink {
    #[must_use]
    pub fn new() -> Self {
        Self {
            actions: Arc::new(Mutex::new(Vec::new())),
            fail_next_start: Arc::new(AtomicBool::new(false)),
            done: Arc::new(Mutex::new(None)),
        }
    }

    /// Shared handle to the recorded action log.
    #[must_use]
    pub fn actions(&self) -> Arc<Mutex<Vec<SinkAction>>> {
        Arc::clone(&self.actions)
    }

    /// Make the next `start` call fail (as an output path would before the
    /// unlock gesture).
    pub fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }

    /// Take the most recent session's completion sender.
    #[must_use]
    pub fn take_done(&self) -> Option<oneshot::Sender<()>> {
        self.done.lock().ok().and_then(|mut d| d.take())
    }

    fn record(&self, action: SinkAction) {
        if let Ok(mut actions) = self.actions.lock() {
            actions.push(action);
        }
    }
}

impl Default for ScriptedSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for ScriptedSink {
    fn unlock(&self) -> Result<()> {
        self.record(SinkAction::Unlock);
        Ok(())
    }

    fn start(&self, _clip: DecodedClip, done: oneshot::Sender<()>) -> Result<Box<dyn SinkSession>> {
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(VoiceError::Playback("sink start refused".into()));
        }
        self.record(SinkAction::Start);
        if let Ok(mut slot) = self.done.lock() {
            *slot = Some(done);
        }
        Ok(Box::new(ScriptedSession {
            actions: Arc::clone(&self.actions),
        }))
    }
}

struct ScriptedSession {
    actions: Arc<Mutex<Vec<SinkAction>>>,
}

impl SinkSession for ScriptedSession {
    fn pause(&mut self) {
        if let Ok(mut actions) = self.actions.lock() {
            actions.push(SinkAction::SessionPause);
        }
    }

    fn resume(&mut self) {
        if let Ok(mut actions) = self.actions.lock() {
            actions.push(SinkAction::SessionResume);
        }
    }

    fn stop(&mut self) {
        if let Ok(mut actions) = self.actions.lock() {
            actions.push(SinkAction::SessionStop);
        }
    }
}
