//! Speech capture engine: a `stopped ⇄ listening` state machine over a
//! platform recognizer, with auto-restart, wake-word gating, and duplicate
//! suppression.
//!
//! The recognizer surfaces events at its own pace; the engine turns them
//! into transitions. Restarts are driven by a single cancelable deadline so
//! an explicit `stop()` can never be followed by a zombie restart.

use crate::capture::recognizer::{Recognizer, RecognizerError, RecognizerEvent};
use crate::capture::wake::{GateOutcome, WakeGate};
use crate::config::CaptureConfig;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Broadcast capacity for capture events.
const EVENT_CHANNEL_SIZE: usize = 64;

/// Engine state. Restarts after errors or natural session ends keep the
/// engine in `Listening`; only `stop()` and permission errors leave it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Stopped,
    Listening,
}

/// Why the engine left the listening state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` was called.
    Requested,
    /// The platform denied the microphone or the recognition service.
    PermissionDenied,
}

/// Events emitted by the capture engine.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// Recognition began (or resumed after an explicit start).
    Started,
    /// Recognition ended and will not auto-restart.
    Stopped { reason: StopReason },
    /// A gated, stripped final transcript ready to submit as a turn.
    Command { text: String },
    /// Interim transcript for live display. Never dispatched.
    Interim { text: String },
    /// A final transcript that matched no wake phrase.
    WakeWordMiss { heard: String },
    /// A recognizer error. Transient errors auto-restart; fatal ones are
    /// followed by `Stopped { reason: PermissionDenied }`.
    Error { kind: RecognizerError },
    /// Recognition is unavailable on this platform; fall back to
    /// push-to-talk input.
    Unsupported,
}

/// Control commands accepted by the engine task.
enum Command {
    Start,
    Stop,
    AdoptWakePhrase(String),
}

/// Handle to a running capture engine task.
pub struct CaptureEngine {
    control_tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<CaptureEvent>,
    state_rx: watch::Receiver<CaptureState>,
    supported: bool,
}

impl CaptureEngine {
    /// Spawn the engine task over a recognizer and its event stream.
    ///
    /// `recognizer_rx` is the receiving half of the channel the recognizer
    /// adapter pushes [`RecognizerEvent`]s into.
    pub fn spawn<R: Recognizer>(
        config: &CaptureConfig,
        recognizer: R,
        recognizer_rx: mpsc::UnboundedReceiver<RecognizerEvent>,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (state_tx, state_rx) = watch::channel(CaptureState::Stopped);
        let supported = recognizer.supported();

        let task = EngineTask {
            recognizer,
            recognizer_rx,
            control_rx,
            events: events.clone(),
            state_tx,
            supported,
            gate: WakeGate::new(&config.wake_phrases),
            gating_enabled: config.wake_word_enabled,
            restart_after_end: Duration::from_millis(config.restart_after_end_ms),
            restart_after_error: Duration::from_millis(config.restart_after_error_ms),
            state: CaptureState::Stopped,
            restart_at: None,
            last_final: None,
        };
        tokio::spawn(task.run());

        Self {
            control_tx,
            events,
            state_rx,
            supported,
        }
    }

    /// Begin continuous recognition. A no-op while already listening.
    pub fn start(&self) {
        let _ = self.control_tx.send(Command::Start);
    }

    /// End recognition and suppress any pending auto-restart.
    pub fn stop(&self) {
        let _ = self.control_tx.send(Command::Stop);
    }

    /// Add a wake phrase at runtime (e.g. one announced by the backend).
    pub fn adopt_wake_phrase(&self, phrase: &str) {
        let _ = self
            .control_tx
            .send(Command::AdoptWakePhrase(phrase.to_owned()));
    }

    /// Subscribe to capture events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.events.subscribe()
    }

    /// Current engine state.
    #[must_use]
    pub fn state(&self) -> CaptureState {
        *self.state_rx.borrow()
    }

    /// Whether continuous recognition is available at all.
    #[must_use]
    pub fn supported(&self) -> bool {
        self.supported
    }
}

struct EngineTask<R: Recognizer> {
    recognizer: R,
    recognizer_rx: mpsc::UnboundedReceiver<RecognizerEvent>,
    control_rx: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<CaptureEvent>,
    state_tx: watch::Sender<CaptureState>,
    supported: bool,
    gate: WakeGate,
    gating_enabled: bool,
    restart_after_end: Duration,
    restart_after_error: Duration,
    state: CaptureState,
    /// Pending auto-restart deadline. `stop()` clears this before the
    /// recognizer is aborted, so a stop is never followed by a restart.
    restart_at: Option<Instant>,
    /// Most recent dispatched final transcript, for duplicate suppression.
    last_final: Option<String>,
}

impl<R: Recognizer> EngineTask<R> {
    async fn run(mut self) {
        // An unsupported adapter may drop its event sender outright; keep
        // serving control commands with the recognizer arm disabled.
        let mut recognizer_open = true;
        loop {
            let restart_at = self.restart_at;
            tokio::select! {
                cmd = self.control_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.handle_command(cmd);
                }
                ev = self.recognizer_rx.recv(), if recognizer_open => {
                    match ev {
                        Some(ev) => self.handle_recognizer_event(ev),
                        None => recognizer_open = false,
                    }
                }
                () = async {
                    match restart_at {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                } => {
                    self.restart_at = None;
                    self.restart_session();
                }
            }
        }
        self.recognizer.abort_session();
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start => {
                if !self.supported {
                    warn!("speech recognition unavailable; push-to-talk fallback required");
                    self.emit(CaptureEvent::Unsupported);
                    return;
                }
                if self.state == CaptureState::Listening {
                    return;
                }
                self.set_state(CaptureState::Listening);
                match self.recognizer.begin_session() {
                    Ok(()) => {
                        info!("speech capture started");
                        self.emit(CaptureEvent::Started);
                    }
                    Err(e) => {
                        warn!("recognizer failed to start: {e}; retrying");
                        self.restart_at = Some(Instant::now() + self.restart_after_error);
                    }
                }
            }
            Command::Stop => {
                // Clear the deadline first: a restart must never fire after
                // a deliberate stop.
                self.restart_at = None;
                if self.state == CaptureState::Stopped {
                    return;
                }
                self.recognizer.abort_session();
                self.set_state(CaptureState::Stopped);
                info!("speech capture stopped");
                self.emit(CaptureEvent::Stopped {
                    reason: StopReason::Requested,
                });
            }
            Command::AdoptWakePhrase(phrase) => {
                self.gate.add_phrase(&phrase);
            }
        }
    }

    fn handle_recognizer_event(&mut self, ev: RecognizerEvent) {
        if self.state == CaptureState::Stopped {
            // Late events from an aborted session.
            return;
        }
        match ev {
            RecognizerEvent::Result { text, is_final } => {
                if is_final {
                    self.handle_final(&text);
                } else if !text.trim().is_empty() {
                    self.emit(CaptureEvent::Interim { text });
                }
            }
            RecognizerEvent::Error(kind) => {
                self.emit(CaptureEvent::Error { kind });
                if kind.is_fatal() {
                    warn!("recognizer permission error: {kind}");
                    self.restart_at = None;
                    self.recognizer.abort_session();
                    self.set_state(CaptureState::Stopped);
                    self.emit(CaptureEvent::Stopped {
                        reason: StopReason::PermissionDenied,
                    });
                } else {
                    debug!("transient recognizer error: {kind}");
                    self.restart_at = Some(Instant::now() + self.restart_after_error);
                }
            }
            RecognizerEvent::Ended => {
                // Natural session end with no stop requested: restart on the
                // short delay unless an error already scheduled a longer one.
                if self.restart_at.is_none() {
                    self.restart_at = Some(Instant::now() + self.restart_after_end);
                }
            }
        }
    }

    fn handle_final(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if self.last_final.as_deref() == Some(text) {
            debug!("dropping duplicate final transcript");
            return;
        }
        self.last_final = Some(text.to_owned());

        if !self.gating_enabled {
            self.emit(CaptureEvent::Command {
                text: text.to_owned(),
            });
            return;
        }
        match self.gate.evaluate(text) {
            GateOutcome::Command(command) => {
                self.emit(CaptureEvent::Command { text: command });
            }
            GateOutcome::BareWake => {
                debug!("bare wake word, no payload");
            }
            GateOutcome::Miss => {
                self.emit(CaptureEvent::WakeWordMiss {
                    heard: text.to_owned(),
                });
            }
        }
    }

    fn restart_session(&mut self) {
        if self.state != CaptureState::Listening {
            return;
        }
        match self.recognizer.begin_session() {
            Ok(()) => debug!("recognizer session restarted"),
            Err(e) => {
                warn!("recognizer restart failed: {e}; retrying");
                self.restart_at = Some(Instant::now() + self.restart_after_error);
            }
        }
    }

    fn set_state(&mut self, state: CaptureState) {
        self.state = state;
        let _ = self.state_tx.send(state);
    }

    fn emit(&self, event: CaptureEvent) {
        let _ = self.events.send(event);
    }
}
