//! Turn orchestrator: the policy layer binding capture, playback, and the
//! duplex channel into one turn-taking discipline.
//!
//! The central contract is interrupt-before-send: when a new user turn
//! arrives while the assistant is speaking or audio is playing, playback is
//! stopped synchronously, then an `interrupt` frame goes out, and only then
//! the turn frame. Sending the turn first would let the backend race a
//! cancellation against a response it already started streaming, and risks
//! audible overlap.

use crate::capture::engine::{CaptureEngine, CaptureEvent, CaptureState, StopReason};
use crate::capture::wake::{GateOutcome, WakeGate};
use crate::channel::client::{ChannelEvent, TurnChannel};
use crate::channel::protocol::{
    AssistantState, ClientFrame, ServerFrame, ToolResultSummary,
};
use crate::config::VoiceConfig;
use crate::orchestrator::conversation::{Conversation, ConversationStore, Turn};
use crate::orchestrator::events::{NoticeSeverity, UiEvent};
use crate::playback::engine::{PlaybackEngine, PlaybackEvent, PlaybackStatus};
use crate::playback::source::{AudioFormat, AudioSource};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Broadcast capacity for UI events.
const EVENT_CHANNEL_SIZE: usize = 128;

/// Where a submitted turn came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnSource {
    /// Continuous recognition (already wake-gated by the capture engine).
    Voice,
    /// Typed text.
    Typed,
    /// A quick-suggestion tap.
    Suggestion,
    /// Push-to-talk recording (wake-gated on submission).
    PushToTalk,
}

impl TurnSource {
    fn frame(self, text: String) -> ClientFrame {
        match self {
            Self::Voice | Self::PushToTalk => ClientFrame::TranscriptFinal { text },
            Self::Typed | Self::Suggestion => ClientFrame::Chat { text },
        }
    }
}

/// Commands accepted by the orchestrator task.
enum Command {
    Submit { text: String, source: TurnSource },
    SubmitRecorded { text: String },
    SetListening(bool),
    SetSpeakResponses(bool),
    PlayPendingAudio,
    NewConversation,
    SelectConversation(String),
    SwitchPartition(String),
    ClearToolStatus { tool: String },
    ClearNotice,
    Shutdown,
}

/// Handle to a running orchestrator task.
pub struct TurnOrchestrator {
    cmd_tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<UiEvent>,
}

impl TurnOrchestrator {
    /// Spawn the orchestrator over the three engines.
    ///
    /// `channel_events` is the subscription matching `channel` (kept
    /// separate so tests can substitute a recording channel).
    #[must_use]
    pub fn spawn(
        config: &VoiceConfig,
        capture: CaptureEngine,
        playback: PlaybackEngine,
        channel: Arc<dyn TurnChannel>,
        channel_events: broadcast::Receiver<ChannelEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        let store = ConversationStore::new(config.conversation.root_dir.clone());
        let partition = config.conversation.partition.clone();
        let active = store
            .load_all(&partition)
            .ok()
            .and_then(|mut conversations| conversations.pop())
            .unwrap_or_default();

        let task = OrchestratorTask {
            capture_events: capture.subscribe(),
            playback_events: playback.subscribe(),
            channel_events,
            capture,
            playback,
            channel,
            store,
            events: events.clone(),
            cmd_tx: cmd_tx.clone(),
            cmd_rx,
            gate: WakeGate::new(&config.capture.wake_phrases),
            gating_enabled: config.capture.wake_word_enabled,
            partition,
            active,
            assistant_state: AssistantState::Idle,
            speak_responses: config.conversation.speak_responses,
            pending_audio: None,
            in_flight: None,
            last_submission: None,
            dedupe_window: Duration::from_millis(config.conversation.dedupe_window_ms),
            tool_status_clear: Duration::from_millis(config.conversation.tool_status_clear_ms),
            notice_dismiss: Duration::from_millis(config.conversation.notice_dismiss_ms),
        };
        tokio::spawn(task.run());

        Self { cmd_tx, events }
    }

    /// Submit typed input as a turn.
    pub fn submit_text(&self, text: &str) {
        self.send(Command::Submit {
            text: text.to_owned(),
            source: TurnSource::Typed,
        });
    }

    /// Submit a quick-suggestion tap as a turn.
    pub fn submit_suggestion(&self, text: &str) {
        self.send(Command::Submit {
            text: text.to_owned(),
            source: TurnSource::Suggestion,
        });
    }

    /// Submit a push-to-talk transcription. Wake gating still applies.
    pub fn submit_recorded(&self, text: &str) {
        self.send(Command::SubmitRecorded {
            text: text.to_owned(),
        });
    }

    /// Enable or disable continuous speech capture.
    pub fn set_listening(&self, listening: bool) {
        self.send(Command::SetListening(listening));
    }

    /// Toggle automatic spoken responses.
    pub fn set_speak_responses(&self, speak: bool) {
        self.send(Command::SetSpeakResponses(speak));
    }

    /// Play the reply clip retained while spoken responses were off.
    pub fn play_pending_audio(&self) {
        self.send(Command::PlayPendingAudio);
    }

    /// Start a fresh active conversation.
    pub fn new_conversation(&self) {
        self.send(Command::NewConversation);
    }

    /// Switch the active conversation. In-flight replies still land in the
    /// conversation that was active when their turn was sent.
    pub fn select_conversation(&self, conversation_id: &str) {
        self.send(Command::SelectConversation(conversation_id.to_owned()));
    }

    /// Switch the storage partition (active school).
    pub fn switch_partition(&self, partition: &str) {
        self.send(Command::SwitchPartition(partition.to_owned()));
    }

    /// Subscribe to UI events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    /// Stop the session: capture off, playback silenced, state persisted.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    fn send(&self, cmd: Command) {
        let _ = self.cmd_tx.send(cmd);
    }
}

struct OrchestratorTask {
    capture: CaptureEngine,
    playback: PlaybackEngine,
    channel: Arc<dyn TurnChannel>,
    store: ConversationStore,
    events: broadcast::Sender<UiEvent>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    capture_events: broadcast::Receiver<CaptureEvent>,
    playback_events: broadcast::Receiver<PlaybackEvent>,
    channel_events: broadcast::Receiver<ChannelEvent>,
    gate: WakeGate,
    gating_enabled: bool,
    partition: String,
    active: Conversation,
    /// Mirror of the backend's authoritative state. Set only from inbound
    /// `assistant_state` frames.
    assistant_state: AssistantState,
    speak_responses: bool,
    /// Reply clip retained while spoken responses are off.
    pending_audio: Option<AudioSource>,
    /// (partition, conversation id) captured when the in-flight turn was
    /// sent, so the reply lands there even after a switch.
    in_flight: Option<(String, String)>,
    /// Duplicate-submission guard.
    last_submission: Option<(String, Instant)>,
    dedupe_window: Duration,
    tool_status_clear: Duration,
    notice_dismiss: Duration,
}

impl OrchestratorTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
                ev = self.capture_events.recv() => {
                    match ev {
                        Ok(ev) => self.handle_capture_event(ev),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("orchestrator lagged {n} capture events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                ev = self.channel_events.recv() => {
                    match ev {
                        Ok(ev) => self.handle_channel_event(ev),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("orchestrator lagged {n} channel events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                ev = self.playback_events.recv() => {
                    match ev {
                        Ok(ev) => self.handle_playback_event(&ev),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("orchestrator lagged {n} playback events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        self.capture.stop();
        self.playback.stop();
        self.persist_active();
    }

    /// Returns `false` when the task should exit.
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Submit { text, source } => self.submit(&text, source),
            Command::SubmitRecorded { text } => self.submit_recorded(&text),
            Command::SetListening(listening) => self.set_listening(listening),
            Command::SetSpeakResponses(speak) => {
                self.speak_responses = speak;
            }
            Command::PlayPendingAudio => {
                if let Some(source) = self.pending_audio.take() {
                    self.spawn_play(source);
                    self.emit(UiEvent::PendingAudio { available: false });
                }
            }
            Command::NewConversation => {
                self.persist_active();
                self.active = Conversation::new();
                self.emit(UiEvent::ActiveConversation {
                    conversation_id: self.active.id.clone(),
                });
            }
            Command::SelectConversation(id) => self.select_conversation(&id),
            Command::SwitchPartition(partition) => self.switch_partition(&partition),
            Command::ClearToolStatus { tool } => {
                self.emit(UiEvent::ToolStatusCleared { tool });
            }
            Command::ClearNotice => {
                self.emit(UiEvent::NoticeCleared);
            }
            Command::Shutdown => return false,
        }
        true
    }

    // ── turn submission ─────────────────────────────────────────────

    fn submit(&mut self, text: &str, source: TurnSource) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        // Duplicate-submission guard: identical text inside the window is
        // dropped (duplicate ASR finals, accidental double taps).
        if let Some((last, at)) = &self.last_submission {
            if last == text && at.elapsed() < self.dedupe_window {
                debug!("dropping duplicate submission inside dedupe window");
                return;
            }
        }
        self.last_submission = Some((text.to_owned(), Instant::now()));

        // Interrupt-before-send. Order is mandatory: silence the speaker,
        // tell the backend to cancel, then send the new turn.
        if self.assistant_state == AssistantState::Speaking
            || self.playback.status() == PlaybackStatus::Playing
        {
            self.playback.stop();
            self.channel.send(ClientFrame::Interrupt);
        }
        self.channel.send(source.frame(text.to_owned()));

        let turn = Turn::user(text);
        self.active.push_turn(turn.clone());
        self.persist_active();
        self.in_flight = Some((self.partition.clone(), self.active.id.clone()));
        self.emit(UiEvent::UserTurn {
            conversation_id: self.active.id.clone(),
            turn,
        });
    }

    fn submit_recorded(&mut self, text: &str) {
        if !self.gating_enabled {
            self.submit(text, TurnSource::PushToTalk);
            return;
        }
        match self.gate.evaluate(text) {
            GateOutcome::Command(command) => self.submit(&command, TurnSource::PushToTalk),
            GateOutcome::BareWake => debug!("recorded bare wake word, nothing to send"),
            GateOutcome::Miss => self.emit(UiEvent::WakeWordMiss {
                heard: text.trim().to_owned(),
            }),
        }
    }

    fn set_listening(&mut self, listening: bool) {
        if listening {
            self.capture.start();
            if self.capture.supported() {
                self.channel.send(ClientFrame::StartListening);
            }
        } else {
            self.capture.stop();
            self.channel.send(ClientFrame::StopListening);
        }
    }

    // ── engine events ───────────────────────────────────────────────

    fn handle_capture_event(&mut self, ev: CaptureEvent) {
        match ev {
            CaptureEvent::Started => self.emit(UiEvent::CaptureActive { active: true }),
            CaptureEvent::Stopped { reason } => {
                self.emit(UiEvent::CaptureActive { active: false });
                if reason == StopReason::PermissionDenied {
                    self.notice(
                        "Microphone access was denied. Re-enable it to talk to Vuddy.",
                        NoticeSeverity::Error,
                        false,
                    );
                }
            }
            CaptureEvent::Command { text } => self.submit(&text, TurnSource::Voice),
            CaptureEvent::Interim { text } => self.emit(UiEvent::InterimTranscript { text }),
            CaptureEvent::WakeWordMiss { heard } => self.emit(UiEvent::WakeWordMiss { heard }),
            CaptureEvent::Error { kind } => {
                if !kind.is_fatal() {
                    self.notice(
                        &format!("Listening hiccup ({kind}); retrying."),
                        NoticeSeverity::Warning,
                        true,
                    );
                }
            }
            CaptureEvent::Unsupported => {
                self.emit(UiEvent::CaptureUnsupported);
                self.notice(
                    "Continuous listening is unavailable here. Press and hold to talk.",
                    NoticeSeverity::Info,
                    false,
                );
            }
        }
    }

    fn handle_channel_event(&mut self, ev: ChannelEvent) {
        match ev {
            ChannelEvent::Open => self.emit(UiEvent::Connectivity { connected: true }),
            ChannelEvent::Closed { .. } => self.emit(UiEvent::Connectivity { connected: false }),
            ChannelEvent::Frame(frame) => self.handle_frame(frame),
        }
    }

    fn handle_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::AssistantState {
                state,
                llm_provider,
                wake_word,
                school,
            } => {
                if let Some(wake_word) = wake_word {
                    self.gate.add_phrase(&wake_word);
                    self.capture.adopt_wake_phrase(&wake_word);
                }
                if let Some(provider) = llm_provider {
                    self.emit(UiEvent::ProviderAnnounced { provider });
                }
                if let Some(school) = school {
                    if school != self.partition {
                        self.switch_partition(&school);
                    }
                }

                // Mutual exclusion: an open microphone while the speaker
                // plays captures the assistant's own voice.
                if state == AssistantState::Speaking
                    && self.capture.state() == CaptureState::Listening
                {
                    info!("assistant speaking; stopping capture");
                    self.capture.stop();
                    self.channel.send(ClientFrame::StopListening);
                }

                self.assistant_state = state;
                self.emit(UiEvent::AssistantState(state));
            }
            ServerFrame::AssistantText { text, tool_results } => {
                self.append_assistant_reply(text, tool_results);
            }
            ServerFrame::AssistantAudioReady {
                audio_url,
                audio_b64,
                format,
            } => {
                let source = if let Some(url) = audio_url {
                    AudioSource::Url { url, format }
                } else if let Some(data_b64) = audio_b64 {
                    AudioSource::Inline {
                        data_b64,
                        format: format.unwrap_or(AudioFormat::Mp3),
                    }
                } else {
                    warn!("audio_ready frame carried no source");
                    return;
                };
                if self.speak_responses {
                    self.spawn_play(source);
                } else {
                    self.pending_audio = Some(source);
                    self.emit(UiEvent::PendingAudio { available: true });
                }
            }
            ServerFrame::ToolStatus { tool, status } => {
                self.emit(UiEvent::ToolStatus {
                    tool: tool.clone(),
                    status,
                });
                if status.is_terminal() {
                    self.schedule(Command::ClearToolStatus { tool }, self.tool_status_clear);
                }
            }
            ServerFrame::Error {
                message,
                recoverable,
            } => {
                let severity = if recoverable {
                    NoticeSeverity::Warning
                } else {
                    NoticeSeverity::Error
                };
                self.notice(&message, severity, recoverable);
            }
        }
    }

    fn handle_playback_event(&mut self, ev: &PlaybackEvent) {
        match ev {
            PlaybackEvent::Blocked => {
                self.notice(
                    "Audio is blocked until you tap to enable sound.",
                    NoticeSeverity::Warning,
                    false,
                );
            }
            PlaybackEvent::Failed { message } => {
                self.notice(
                    &format!("Couldn't play the reply: {message}"),
                    NoticeSeverity::Warning,
                    true,
                );
            }
            _ => {}
        }
    }

    // ── conversation bookkeeping ────────────────────────────────────

    fn append_assistant_reply(&mut self, text: String, tool_results: Vec<ToolResultSummary>) {
        let turn = Turn::assistant(text, tool_results);
        let (partition, conversation_id) = self
            .in_flight
            .take()
            .unwrap_or_else(|| (self.partition.clone(), self.active.id.clone()));

        if partition == self.partition && conversation_id == self.active.id {
            self.active.push_turn(turn.clone());
            self.persist_active();
        } else {
            // The user switched away while the reply was in flight; the
            // reply still belongs to the conversation that asked.
            self.append_to_stored(&partition, &conversation_id, turn.clone());
        }
        self.emit(UiEvent::AssistantTurn {
            conversation_id,
            turn,
        });
    }

    fn append_to_stored(&self, partition: &str, conversation_id: &str, turn: Turn) {
        match self.store.load_all(partition) {
            Ok(conversations) => {
                let Some(mut conversation) = conversations
                    .into_iter()
                    .find(|c| c.id == conversation_id)
                else {
                    warn!("reply targets unknown conversation {conversation_id}");
                    return;
                };
                conversation.push_turn(turn);
                if let Err(e) = self.store.replace(partition, &conversation) {
                    warn!("cannot persist reply: {e}");
                }
            }
            Err(e) => warn!("cannot load partition {partition}: {e}"),
        }
    }

    fn select_conversation(&mut self, id: &str) {
        if id == self.active.id {
            return;
        }
        self.persist_active();
        match self.store.load_all(&self.partition) {
            Ok(conversations) => {
                if let Some(conversation) = conversations.into_iter().find(|c| c.id == id) {
                    self.active = conversation;
                    self.emit(UiEvent::ActiveConversation {
                        conversation_id: self.active.id.clone(),
                    });
                } else {
                    warn!("unknown conversation {id}");
                }
            }
            Err(e) => warn!("cannot load partition {}: {e}", self.partition),
        }
    }

    fn switch_partition(&mut self, partition: &str) {
        if partition == self.partition {
            return;
        }
        self.persist_active();
        self.partition = partition.to_owned();
        self.active = self
            .store
            .load_all(partition)
            .ok()
            .and_then(|mut conversations| conversations.pop())
            .unwrap_or_default();
        self.emit(UiEvent::PartitionSwitched {
            partition: partition.to_owned(),
        });
        self.emit(UiEvent::ActiveConversation {
            conversation_id: self.active.id.clone(),
        });
    }

    fn persist_active(&self) {
        if self.active.turns.is_empty() {
            return;
        }
        if let Err(e) = self.store.replace(&self.partition, &self.active) {
            warn!("cannot persist conversation: {e}");
        }
    }

    // ── helpers ─────────────────────────────────────────────────────

    fn spawn_play(&self, source: AudioSource) {
        let playback = self.playback.clone();
        tokio::spawn(async move {
            if let Err(e) = playback.play(source).await {
                warn!("reply playback failed: {e}");
            }
        });
    }

    fn notice(&self, message: &str, severity: NoticeSeverity, auto_dismiss: bool) {
        self.emit(UiEvent::Notice {
            message: message.to_owned(),
            severity,
            auto_dismiss,
        });
        if auto_dismiss {
            self.schedule(Command::ClearNotice, self.notice_dismiss);
        }
    }

    fn schedule(&self, cmd: Command, after: Duration) {
        let tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(cmd);
        });
    }

    fn emit(&self, event: UiEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::capture::recognizer::{Recognizer, RecognizerEvent};
    use crate::channel::protocol::ToolCallStatus;
    use crate::error::Result as VoiceResult;
    use crate::test_utils::{ScriptedSink, temp_test_root, tiny_wav_source};
    use std::sync::Mutex;

    struct NoopRecognizer;

    impl Recognizer for NoopRecognizer {
        fn begin_session(&mut self) -> VoiceResult<()> {
            Ok(())
        }

        fn abort_session(&mut self) {}
    }

    /// Channel double that records outbound frames.
    struct RecordingChannel {
        frames: Arc<Mutex<Vec<ClientFrame>>>,
    }

    impl TurnChannel for RecordingChannel {
        fn send(&self, frame: ClientFrame) {
            if let Ok(mut frames) = self.frames.lock() {
                frames.push(frame);
            }
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    struct Harness {
        orchestrator: TurnOrchestrator,
        ui: broadcast::Receiver<UiEvent>,
        frames: Arc<Mutex<Vec<ClientFrame>>>,
        server_tx: broadcast::Sender<ChannelEvent>,
        recognizer_tx: mpsc::UnboundedSender<RecognizerEvent>,
        playback: PlaybackEngine,
        root: std::path::PathBuf,
        store: ConversationStore,
    }

    fn harness(name: &str) -> Harness {
        harness_with(name, |_| {})
    }

    fn harness_with(name: &str, tweak: impl FnOnce(&mut VoiceConfig)) -> Harness {
        let root = temp_test_root("orchestrator", name);
        let mut config = VoiceConfig::default();
        config.conversation.root_dir = root.clone();
        config.conversation.partition = "gmu".to_owned();
        config.playback.state_dir = root.join("playback");
        tweak(&mut config);

        let (recognizer_tx, recognizer_rx) = mpsc::unbounded_channel();
        let capture = CaptureEngine::spawn(&config.capture, NoopRecognizer, recognizer_rx);
        let playback = PlaybackEngine::new(Box::new(ScriptedSink::new()), config.playback.clone());

        let frames = Arc::new(Mutex::new(Vec::new()));
        let channel = Arc::new(RecordingChannel {
            frames: Arc::clone(&frames),
        });
        let (server_tx, server_rx) = broadcast::channel(32);

        let orchestrator =
            TurnOrchestrator::spawn(&config, capture, playback.clone(), channel, server_rx);
        let ui = orchestrator.subscribe();
        Harness {
            orchestrator,
            ui,
            frames,
            server_tx,
            recognizer_tx,
            playback,
            store: ConversationStore::new(&root),
            root,
        }
    }

    async fn next_ui(rx: &mut broadcast::Receiver<UiEvent>) -> UiEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for UI event")
            .expect("UI event channel closed")
    }

    async fn wait_for_frames(frames: &Arc<Mutex<Vec<ClientFrame>>>, count: usize) {
        for _ in 0..200 {
            if frames.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "expected {count} frames, saw {:?}",
            frames.lock().unwrap().as_slice()
        );
    }

    #[tokio::test]
    async fn typed_turn_sends_chat_frame_and_persists() {
        let mut h = harness("typed");
        h.orchestrator.submit_text("what's happening tonight?");

        match next_ui(&mut h.ui).await {
            UiEvent::UserTurn { turn, .. } => {
                assert_eq!(turn.text, "what's happening tonight?");
            }
            other => panic!("expected UserTurn, got {other:?}"),
        }
        assert_eq!(
            h.frames.lock().unwrap().as_slice(),
            &[ClientFrame::Chat {
                text: "what's happening tonight?".into()
            }]
        );

        let stored = h.store.load_all("gmu").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, "what's happening tonight?");
        let _ = std::fs::remove_dir_all(&h.root);
    }

    #[tokio::test]
    async fn duplicate_submission_inside_window_is_dropped() {
        let mut h = harness("dedupe");
        h.orchestrator.submit_text("stop");
        h.orchestrator.submit_text("stop");

        let _ = next_ui(&mut h.ui).await; // single UserTurn
        wait_for_frames(&h.frames, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.frames.lock().unwrap().len(), 1);
        let _ = std::fs::remove_dir_all(&h.root);
    }

    #[tokio::test]
    async fn identical_submission_after_window_elapses_sends_again() {
        let mut h = harness_with("dedupe-elapsed", |config| {
            config.conversation.dedupe_window_ms = 40;
        });
        h.orchestrator.submit_text("stop");
        let _ = next_ui(&mut h.ui).await;
        wait_for_frames(&h.frames, 1).await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        h.orchestrator.submit_text("stop");
        wait_for_frames(&h.frames, 2).await;
        assert_eq!(h.frames.lock().unwrap().len(), 2);
        let _ = std::fs::remove_dir_all(&h.root);
    }

    #[tokio::test]
    async fn interrupt_precedes_turn_while_speaking() {
        let mut h = harness("interrupt");
        h.server_tx
            .send(ChannelEvent::Frame(ServerFrame::AssistantState {
                state: AssistantState::Speaking,
                llm_provider: None,
                wake_word: None,
                school: None,
            }))
            .unwrap();
        // Wait for the mirror update.
        loop {
            if let UiEvent::AssistantState(AssistantState::Speaking) = next_ui(&mut h.ui).await {
                break;
            }
        }

        h.orchestrator.submit_text("stop");
        wait_for_frames(&h.frames, 2).await;
        assert_eq!(
            h.frames.lock().unwrap().as_slice(),
            &[
                ClientFrame::Interrupt,
                ClientFrame::Chat {
                    text: "stop".into()
                }
            ]
        );
        let _ = std::fs::remove_dir_all(&h.root);
    }

    #[tokio::test]
    async fn no_interrupt_when_idle() {
        let mut h = harness("no-interrupt");
        h.orchestrator.submit_text("hello");
        let _ = next_ui(&mut h.ui).await;
        wait_for_frames(&h.frames, 1).await;
        assert!(
            !h.frames
                .lock()
                .unwrap()
                .iter()
                .any(|f| *f == ClientFrame::Interrupt)
        );
        let _ = std::fs::remove_dir_all(&h.root);
    }

    #[tokio::test]
    async fn voice_command_sends_transcript_final() {
        let mut h = harness("voice");
        h.orchestrator.set_listening(true);
        wait_for_frames(&h.frames, 1).await; // StartListening

        h.recognizer_tx
            .send(RecognizerEvent::Result {
                text: "hey vuddy what's happening tonight?".into(),
                is_final: true,
            })
            .unwrap();

        wait_for_frames(&h.frames, 2).await;
        assert_eq!(
            h.frames.lock().unwrap().as_slice(),
            &[
                ClientFrame::StartListening,
                ClientFrame::TranscriptFinal {
                    text: "what's happening tonight?".into()
                }
            ]
        );
        // Drain UI events to keep the broadcast healthy.
        while h.ui.try_recv().is_ok() {}
        let _ = std::fs::remove_dir_all(&h.root);
    }

    #[tokio::test]
    async fn speaking_state_stops_capture_and_notifies_backend() {
        let mut h = harness("exclusion");
        h.orchestrator.set_listening(true);
        wait_for_frames(&h.frames, 1).await;
        // Wait for the capture engine to actually be listening.
        loop {
            if let UiEvent::CaptureActive { active: true } = next_ui(&mut h.ui).await {
                break;
            }
        }

        h.server_tx
            .send(ChannelEvent::Frame(ServerFrame::AssistantState {
                state: AssistantState::Speaking,
                llm_provider: None,
                wake_word: None,
                school: None,
            }))
            .unwrap();

        wait_for_frames(&h.frames, 2).await;
        assert_eq!(
            h.frames.lock().unwrap().as_slice(),
            &[ClientFrame::StartListening, ClientFrame::StopListening]
        );
        // Capture reports itself stopped.
        loop {
            if let UiEvent::CaptureActive { active: false } = next_ui(&mut h.ui).await {
                break;
            }
        }
        let _ = std::fs::remove_dir_all(&h.root);
    }

    #[tokio::test]
    async fn reply_lands_in_conversation_active_at_send_time() {
        let mut h = harness("targeting");
        h.orchestrator.submit_text("find me an event");
        let original_id = match next_ui(&mut h.ui).await {
            UiEvent::UserTurn {
                conversation_id, ..
            } => conversation_id,
            other => panic!("expected UserTurn, got {other:?}"),
        };

        // Switch away while the reply is in flight.
        h.orchestrator.new_conversation();
        loop {
            if let UiEvent::ActiveConversation { conversation_id } = next_ui(&mut h.ui).await {
                assert_ne!(conversation_id, original_id);
                break;
            }
        }

        h.server_tx
            .send(ChannelEvent::Frame(ServerFrame::AssistantText {
                text: "Found 3 events".into(),
                tool_results: Vec::new(),
            }))
            .unwrap();

        loop {
            if let UiEvent::AssistantTurn {
                conversation_id,
                turn,
            } = next_ui(&mut h.ui).await
            {
                assert_eq!(conversation_id, original_id);
                assert_eq!(turn.text, "Found 3 events");
                break;
            }
        }

        let stored = h.store.load_all("gmu").unwrap();
        let original = stored.iter().find(|c| c.id == original_id).unwrap();
        assert_eq!(original.turns.len(), 2);
        assert_eq!(original.turns[1].role, crate::orchestrator::conversation::TurnRole::Assistant);
        let _ = std::fs::remove_dir_all(&h.root);
    }

    #[tokio::test]
    async fn audio_ready_with_speak_off_is_retained() {
        let mut h = harness("pending-audio");
        h.orchestrator.set_speak_responses(false);
        tokio::time::sleep(Duration::from_millis(20)).await;

        h.server_tx
            .send(ChannelEvent::Frame(ServerFrame::AssistantAudioReady {
                audio_url: Some("/api/audio/tts/x.mp3".into()),
                audio_b64: None,
                format: Some(AudioFormat::Mp3),
            }))
            .unwrap();

        loop {
            if let UiEvent::PendingAudio { available } = next_ui(&mut h.ui).await {
                assert!(available);
                break;
            }
        }
        let _ = std::fs::remove_dir_all(&h.root);
    }

    #[tokio::test]
    async fn terminal_tool_status_clears_itself() {
        let mut h = harness("tool-status");
        h.server_tx
            .send(ChannelEvent::Frame(ServerFrame::ToolStatus {
                tool: "get_events".into(),
                status: ToolCallStatus::Done,
            }))
            .unwrap();

        loop {
            if let UiEvent::ToolStatus { tool, status } = next_ui(&mut h.ui).await {
                assert_eq!(tool, "get_events");
                assert_eq!(status, ToolCallStatus::Done);
                break;
            }
        }
        // The badge expiry arrives after the configured delay.
        let cleared = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let UiEvent::ToolStatusCleared { tool } = next_ui(&mut h.ui).await {
                    return tool;
                }
            }
        })
        .await
        .expect("badge never cleared");
        assert_eq!(cleared, "get_events");
        let _ = std::fs::remove_dir_all(&h.root);
    }

    #[tokio::test]
    async fn recoverable_error_auto_dismisses() {
        let mut h = harness("recoverable");
        h.server_tx
            .send(ChannelEvent::Frame(ServerFrame::Error {
                message: "LLM timeout".into(),
                recoverable: true,
            }))
            .unwrap();

        loop {
            if let UiEvent::Notice {
                severity,
                auto_dismiss,
                ..
            } = next_ui(&mut h.ui).await
            {
                assert_eq!(severity, NoticeSeverity::Warning);
                assert!(auto_dismiss);
                break;
            }
        }
        let cleared = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if matches!(next_ui(&mut h.ui).await, UiEvent::NoticeCleared) {
                    return true;
                }
            }
        })
        .await
        .expect("notice never cleared");
        assert!(cleared);
        let _ = std::fs::remove_dir_all(&h.root);
    }

    #[tokio::test]
    async fn push_to_talk_is_wake_gated() {
        let mut h = harness("ptt");
        h.orchestrator.submit_recorded("hey vuddy add a reminder");
        wait_for_frames(&h.frames, 1).await;
        assert_eq!(
            h.frames.lock().unwrap().as_slice(),
            &[ClientFrame::TranscriptFinal {
                text: "add a reminder".into()
            }]
        );

        h.orchestrator.submit_recorded("no wake word here");
        loop {
            match next_ui(&mut h.ui).await {
                UiEvent::WakeWordMiss { heard } => {
                    assert_eq!(heard, "no wake word here");
                    break;
                }
                _ => continue,
            }
        }
        assert_eq!(h.frames.lock().unwrap().len(), 1);
        let _ = std::fs::remove_dir_all(&h.root);
    }

    #[tokio::test]
    async fn backend_school_switches_partition() {
        let mut h = harness("school");
        h.server_tx
            .send(ChannelEvent::Frame(ServerFrame::AssistantState {
                state: AssistantState::Idle,
                llm_provider: Some("ollama".into()),
                wake_word: Some("hey vuddy".into()),
                school: Some("vt".into()),
            }))
            .unwrap();

        loop {
            if let UiEvent::PartitionSwitched { partition } = next_ui(&mut h.ui).await {
                assert_eq!(partition, "vt");
                break;
            }
        }

        // Turns submitted after the switch persist under the new partition.
        h.orchestrator.submit_text("hello vt");
        wait_for_frames(&h.frames, 1).await;
        for _ in 0..200 {
            if !h.store.load_all("vt").unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.store.load_all("vt").unwrap().len(), 1);
        let _ = std::fs::remove_dir_all(&h.root);
    }

    #[tokio::test]
    async fn playing_audio_triggers_interrupt_even_when_state_idle() {
        let mut h = harness("playing-interrupt");
        // Hand the playback engine a clip directly (speak path).
        h.server_tx
            .send(ChannelEvent::Frame(ServerFrame::AssistantAudioReady {
                audio_url: None,
                audio_b64: match tiny_wav_source() {
                    AudioSource::Inline { data_b64, .. } => Some(data_b64),
                    AudioSource::Url { .. } => None,
                },
                format: Some(AudioFormat::Wav),
            }))
            .unwrap();

        // Wait until the engine reports playing.
        for _ in 0..200 {
            if h.playback.status() == PlaybackStatus::Playing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.playback.status(), PlaybackStatus::Playing);

        h.orchestrator.submit_text("stop");
        wait_for_frames(&h.frames, 2).await;
        {
            let frames = h.frames.lock().unwrap();
            assert_eq!(frames[0], ClientFrame::Interrupt);
            assert_eq!(
                frames[1],
                ClientFrame::Chat {
                    text: "stop".into()
                }
            );
        }
        // Playback was silenced before the interrupt went out.
        assert_eq!(h.playback.status(), PlaybackStatus::Idle);
        let _ = std::fs::remove_dir_all(&h.root);
    }
}
