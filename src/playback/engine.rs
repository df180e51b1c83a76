//! Playback engine: one logical audio output with hard-stop semantics.
//!
//! Every `play` supersedes the previous request by bumping a monotonically
//! increasing token. Source resolution and decode are asynchronous, so every
//! completion re-checks its captured token and becomes a no-op when stale; a
//! later `play` or a `stop` therefore always wins, regardless of how late a
//! superseded callback lands.

use crate::config::PlaybackConfig;
use crate::error::{Result, VoiceError};
use crate::playback::decode::{DecodedClip, decode_clip};
use crate::playback::sink::{AudioSink, SinkSession};
use crate::playback::source::{AudioSource, load_bytes};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

/// Broadcast capacity for playback events.
const EVENT_CHANNEL_SIZE: usize = 32;
/// Durable marker recording that the output path was primed once.
const UNLOCK_MARKER: &str = "audio-unlocked";

/// Playback status of the single logical output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Idle,
    Loading,
    Playing,
    Paused,
}

/// Events emitted by the playback engine.
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    /// A clip started producing sound.
    Started,
    /// The current clip played to its natural end.
    Finished,
    /// Playback was halted by `stop` (or superseded with nothing after it).
    Stopped,
    Paused,
    Resumed,
    /// The sink refused to start before the output path was unlocked; the
    /// source is retained for `replay_pending`.
    Blocked,
    /// Fetch, decode, or sink failure for the current request.
    Failed { message: String },
}

struct EngineState {
    status: PlaybackStatus,
    session: Option<Box<dyn SinkSession>>,
    /// Most recently requested source that never played (blocked).
    pending: Option<AudioSource>,
    blocked: bool,
    unlocked: bool,
}

struct Inner {
    sink: Box<dyn AudioSink>,
    http: reqwest::Client,
    config: PlaybackConfig,
    /// Current playback token. Async completions compare their captured
    /// value against this and bail when stale.
    token: AtomicU64,
    state: Mutex<EngineState>,
    events: broadcast::Sender<PlaybackEvent>,
}

/// Handle to the single audio output channel. Cheap to clone.
#[derive(Clone)]
pub struct PlaybackEngine {
    inner: Arc<Inner>,
}

impl PlaybackEngine {
    /// Create the engine around a sink. There is exactly one engine per
    /// session; the sink handle is injected, never looked up ambiently.
    #[must_use]
    pub fn new(sink: Box<dyn AudioSink>, config: PlaybackConfig) -> Self {
        let unlocked = config.state_dir.join(UNLOCK_MARKER).exists();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: Arc::new(Inner {
                sink,
                http: reqwest::Client::new(),
                config,
                token: AtomicU64::new(0),
                state: Mutex::new(EngineState {
                    status: PlaybackStatus::Idle,
                    session: None,
                    pending: None,
                    blocked: false,
                    unlocked,
                }),
                events,
            }),
        }
    }

    /// Prime the output path from a user gesture. Idempotent; the unlocked
    /// status is recorded durably so repeat sessions skip the prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink rejects even silent output.
    pub async fn unlock(&self) -> Result<()> {
        if self.lock_state().unlocked {
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.sink.unlock())
            .await
            .map_err(|e| VoiceError::Playback(format!("unlock task failed: {e}")))??;

        {
            let mut state = self.lock_state();
            state.unlocked = true;
            state.blocked = false;
        }
        self.persist_unlock_marker();
        info!("audio output unlocked");
        Ok(())
    }

    /// Play one source, superseding whatever was in flight.
    ///
    /// The previous session is fully stopped (token invalidated, sink
    /// halted) *before* the new source is resolved; this ordering is load-
    /// bearing because resolution and decode are asynchronous.
    ///
    /// # Errors
    ///
    /// Returns an error when the request was still current at the point of
    /// failure. Superseded requests return `Ok` and have no effect.
    pub async fn play(&self, source: AudioSource) -> Result<()> {
        let token = self.supersede();
        debug!("playback request {token}");

        let bytes = match load_bytes(&self.inner.http, &source, &self.inner.config).await {
            Ok(bytes) => bytes,
            Err(e) => return self.fail_if_current(token, e),
        };
        if !self.is_current(token) {
            return Ok(());
        }

        let format = source.format();
        let decoded = tokio::task::spawn_blocking(move || decode_clip(bytes, format))
            .await
            .map_err(|e| VoiceError::Decode(format!("decode task failed: {e}")))?;
        let clip = match decoded {
            Ok(clip) => clip,
            Err(e) => return self.fail_if_current(token, e),
        };
        if !self.is_current(token) {
            return Ok(());
        }

        self.start_sink(token, source, clip)
    }

    /// Halt output immediately and reset to idle. Safe when nothing plays.
    pub fn stop(&self) {
        self.inner.token.fetch_add(1, Ordering::SeqCst);
        let was_active = {
            let mut state = self.lock_state();
            let was_active = state.status != PlaybackStatus::Idle;
            if let Some(mut session) = state.session.take() {
                session.stop();
            }
            state.status = PlaybackStatus::Idle;
            state.pending = None;
            was_active
        };
        if was_active {
            self.emit(PlaybackEvent::Stopped);
        }
    }

    /// Pause the playing clip. No-op unless playing.
    pub fn pause(&self) {
        let mut state = self.lock_state();
        if state.status != PlaybackStatus::Playing {
            return;
        }
        if let Some(session) = state.session.as_mut() {
            session.pause();
            state.status = PlaybackStatus::Paused;
            drop(state);
            self.emit(PlaybackEvent::Paused);
        }
    }

    /// Resume a paused clip. No-op unless paused.
    pub fn resume(&self) {
        let mut state = self.lock_state();
        if state.status != PlaybackStatus::Paused {
            return;
        }
        if let Some(session) = state.session.as_mut() {
            session.resume();
            state.status = PlaybackStatus::Playing;
            drop(state);
            self.emit(PlaybackEvent::Resumed);
        }
    }

    /// Replay the retained source that was blocked before unlock.
    ///
    /// # Errors
    ///
    /// Propagates `play` errors. A no-op returning `Ok` when nothing is
    /// pending.
    pub async fn replay_pending(&self) -> Result<()> {
        let pending = {
            let mut state = self.lock_state();
            state.blocked = false;
            state.pending.take()
        };
        match pending {
            Some(source) => self.play(source).await,
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn status(&self) -> PlaybackStatus {
        self.lock_state().status
    }

    /// Whether the last request was refused pending an unlock gesture.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.lock_state().blocked
    }

    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.lock_state().unlocked
    }

    /// Whether a blocked source is retained for replay.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.lock_state().pending.is_some()
    }

    /// Subscribe to playback events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.inner.events.subscribe()
    }

    // ── internals ───────────────────────────────────────────────────

    /// Invalidate the current request and halt its session, returning the
    /// new token. Runs synchronously so callers can rely on silence before
    /// their next side effect.
    fn supersede(&self) -> u64 {
        let token = self.inner.token.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.lock_state();
        if let Some(mut session) = state.session.take() {
            session.stop();
        }
        state.status = PlaybackStatus::Loading;
        token
    }

    fn start_sink(&self, token: u64, source: AudioSource, clip: DecodedClip) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        let mut state = self.lock_state();
        if !self.is_current(token) {
            return Ok(());
        }
        match self.inner.sink.start(clip, done_tx) {
            Ok(session) => {
                state.session = Some(session);
                state.status = PlaybackStatus::Playing;
                state.blocked = false;
                drop(state);
                self.emit(PlaybackEvent::Started);
                self.watch_completion(token, done_rx);
                Ok(())
            }
            Err(e) => {
                if state.unlocked {
                    state.status = PlaybackStatus::Idle;
                    drop(state);
                    self.emit(PlaybackEvent::Failed {
                        message: e.to_string(),
                    });
                    Err(e)
                } else {
                    warn!("playback blocked before unlock: {e}");
                    state.status = PlaybackStatus::Idle;
                    state.blocked = true;
                    state.pending = Some(source);
                    drop(state);
                    self.emit(PlaybackEvent::Blocked);
                    Ok(())
                }
            }
        }
    }

    fn watch_completion(&self, token: u64, done_rx: oneshot::Receiver<()>) {
        let engine = self.clone();
        tokio::spawn(async move {
            if done_rx.await.is_err() {
                // Session stopped before finishing; the superseder already
                // updated state.
                return;
            }
            if !engine.is_current(token) {
                return;
            }
            {
                let mut state = engine.lock_state();
                state.session = None;
                state.status = PlaybackStatus::Idle;
            }
            engine.emit(PlaybackEvent::Finished);
        });
    }

    fn fail_if_current(&self, token: u64, error: VoiceError) -> Result<()> {
        if !self.is_current(token) {
            return Ok(());
        }
        {
            let mut state = self.lock_state();
            state.status = PlaybackStatus::Idle;
        }
        self.emit(PlaybackEvent::Failed {
            message: error.to_string(),
        });
        Err(error)
    }

    fn is_current(&self, token: u64) -> bool {
        self.inner.token.load(Ordering::SeqCst) == token
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        match self.inner.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist_unlock_marker(&self) {
        let dir = &self.inner.config.state_dir;
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!("cannot create playback state dir: {e}");
            return;
        }
        if let Err(e) = std::fs::write(dir.join(UNLOCK_MARKER), b"1") {
            warn!("cannot persist unlock marker: {e}");
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        let _ = self.inner.events.send(event);
    }
}
