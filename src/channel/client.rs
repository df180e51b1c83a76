//! WebSocket channel client with automatic reconnection.
//!
//! The client owns the only socket to the backend. A background task runs
//! the connect/read/write loop; the handle exposes a fire-and-forget `send`,
//! a live connectivity flag, and a broadcast of inbound frames. Teardown is
//! explicit (`close`) and distinguishable from a network-caused drop: it
//! cancels any pending reconnect instead of scheduling one.

use crate::channel::protocol::{ClientFrame, ServerFrame};
use crate::config::ChannelConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Broadcast capacity for channel events.
const EVENT_CHANNEL_SIZE: usize = 64;

/// Session info extracted from the bootstrap frame after connect.
#[derive(Debug, Clone, Default)]
pub struct SessionBootstrap {
    /// Active intelligence provider identifier.
    pub llm_provider: Option<String>,
    /// Wake word the backend expects.
    pub wake_word: Option<String>,
    /// Active school partition.
    pub school: Option<String>,
}

/// Events surfaced by the channel task.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Connection established and usable for sending.
    Open,
    /// Connection lost (or a connect attempt failed). Carries the number of
    /// consecutive failures, which determines the next backoff delay.
    Closed { consecutive_failures: u32 },
    /// A parsed inbound frame.
    Frame(ServerFrame),
}

/// The orchestrator-facing sending surface. Narrow on purpose so tests can
/// substitute a recording channel.
pub trait TurnChannel: Send + Sync + 'static {
    /// Send a frame. No-ops with a warning when the channel is not open:
    /// there is no outbound queue; callers watch the connectivity flag.
    fn send(&self, frame: ClientFrame);

    /// Whether the socket is currently open.
    fn is_connected(&self) -> bool;
}

/// Handle to the background channel task.
pub struct ChannelClient {
    outbound_tx: mpsc::UnboundedSender<ClientFrame>,
    connected: Arc<AtomicBool>,
    bootstrap: Arc<Mutex<Option<SessionBootstrap>>>,
    events: broadcast::Sender<ChannelEvent>,
    shutdown: CancellationToken,
}

impl ChannelClient {
    /// Spawn the connection task. The client starts connecting immediately.
    #[must_use]
    pub fn connect(config: &ChannelConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let connected = Arc::new(AtomicBool::new(false));
        let bootstrap = Arc::new(Mutex::new(None));
        let shutdown = CancellationToken::new();

        let task = ConnectionTask {
            url: config.url.clone(),
            base_delay: Duration::from_millis(config.reconnect_base_ms),
            cap_delay: Duration::from_millis(config.reconnect_cap_ms),
            connected: Arc::clone(&connected),
            bootstrap: Arc::clone(&bootstrap),
            events: events.clone(),
            shutdown: shutdown.clone(),
        };
        tokio::spawn(task.run(outbound_rx));

        Self {
            outbound_tx,
            connected,
            bootstrap,
            events,
            shutdown,
        }
    }

    /// Bootstrap info from the most recent connection, if received yet.
    #[must_use]
    pub fn bootstrap(&self) -> Option<SessionBootstrap> {
        match self.bootstrap.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Subscribe to channel events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// Tear the channel down: cancel any pending reconnect and close the
    /// socket without scheduling another attempt.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl TurnChannel for ChannelClient {
    fn send(&self, frame: ClientFrame) {
        if !self.is_connected() {
            warn!("channel not open; dropping outbound frame {frame:?}");
            return;
        }
        let _ = self.outbound_tx.send(frame);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for ChannelClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Compute the reconnect delay after `consecutive_failures` failures:
/// `min(base · 2^(n-1), cap)`.
#[must_use]
pub(crate) fn backoff_delay(consecutive_failures: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = consecutive_failures.saturating_sub(1).min(31);
    base.saturating_mul(2u32.saturating_pow(exponent)).min(cap)
}

enum SessionEnd {
    Shutdown,
    Dropped(String),
}

struct ConnectionTask {
    url: String,
    base_delay: Duration,
    cap_delay: Duration,
    connected: Arc<AtomicBool>,
    bootstrap: Arc<Mutex<Option<SessionBootstrap>>>,
    events: broadcast::Sender<ChannelEvent>,
    shutdown: CancellationToken,
}

impl ConnectionTask {
    async fn run(self, mut outbound_rx: mpsc::UnboundedReceiver<ClientFrame>) {
        let mut consecutive_failures: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                return;
            }

            let end = self
                .run_session(&mut outbound_rx, &mut consecutive_failures)
                .await;
            self.connected.store(false, Ordering::SeqCst);

            match end {
                SessionEnd::Shutdown => {
                    info!("channel closed by teardown");
                    return;
                }
                SessionEnd::Dropped(reason) => {
                    consecutive_failures += 1;
                    let delay =
                        backoff_delay(consecutive_failures, self.base_delay, self.cap_delay);
                    warn!(
                        "channel dropped ({reason}); reconnect #{consecutive_failures} in {}ms",
                        delay.as_millis()
                    );
                    let _ = self.events.send(ChannelEvent::Closed {
                        consecutive_failures,
                    });
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = self.shutdown.cancelled() => return,
                    }
                }
            }
        }
    }

    /// One connection attempt plus its read/write loop.
    async fn run_session(
        &self,
        outbound_rx: &mut mpsc::UnboundedReceiver<ClientFrame>,
        consecutive_failures: &mut u32,
    ) -> SessionEnd {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::{connect_async, tungstenite::Message};

        let connect = tokio::select! {
            result = connect_async(self.url.as_str()) => result,
            () = self.shutdown.cancelled() => return SessionEnd::Shutdown,
        };
        let (ws_stream, _) = match connect {
            Ok(ok) => ok,
            Err(e) => return SessionEnd::Dropped(format!("connect: {e}")),
        };

        // Usable immediately for sending; every successful open resets the
        // backoff schedule.
        *consecutive_failures = 0;
        self.connected.store(true, Ordering::SeqCst);
        info!("channel open: {}", self.url);
        let _ = self.events.send(ChannelEvent::Open);

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_inbound(&text),
                        Some(Ok(Message::Close(_))) | None => {
                            return SessionEnd::Dropped("closed by server".into());
                        }
                        Some(Err(e)) => {
                            return SessionEnd::Dropped(format!("read error: {e}"));
                        }
                        _ => {} // Binary, Ping/Pong frames handled by tungstenite.
                    }
                }
                Some(frame) = outbound_rx.recv() => {
                    let json = match serde_json::to_string(&frame) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("cannot serialize outbound frame: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(json)).await {
                        return SessionEnd::Dropped(format!("send error: {e}"));
                    }
                }
                () = self.shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    /// Parse and dispatch one inbound payload. Malformed payloads are
    /// logged and dropped.
    fn handle_inbound(&self, text: &str) {
        let frame: ServerFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("ignoring unparseable frame: {e}");
                return;
            }
        };

        if let ServerFrame::AssistantState {
            llm_provider,
            wake_word,
            school,
            ..
        } = &frame
        {
            if llm_provider.is_some() || wake_word.is_some() || school.is_some() {
                let info = SessionBootstrap {
                    llm_provider: llm_provider.clone(),
                    wake_word: wake_word.clone(),
                    school: school.clone(),
                };
                match self.bootstrap.lock() {
                    Ok(mut guard) => *guard = Some(info),
                    Err(poisoned) => *poisoned.into_inner() = Some(info),
                }
            }
        }

        let _ = self.events.send(ChannelEvent::Frame(frame));
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    const BASE: Duration = Duration::from_millis(1_000);
    const CAP: Duration = Duration::from_millis(10_000);

    #[test]
    fn backoff_doubles_from_base() {
        assert_eq!(backoff_delay(1, BASE, CAP), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(2, BASE, CAP), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(3, BASE, CAP), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(4, BASE, CAP), Duration::from_millis(8_000));
    }

    #[test]
    fn backoff_caps_at_ten_seconds() {
        assert_eq!(backoff_delay(5, BASE, CAP), CAP);
        assert_eq!(backoff_delay(20, BASE, CAP), CAP);
        assert_eq!(backoff_delay(u32::MAX, BASE, CAP), CAP);
    }

    #[tokio::test]
    async fn send_is_a_no_op_while_disconnected() {
        let config = ChannelConfig {
            // Port 9 (discard) is never a WebSocket server.
            url: "ws://127.0.0.1:9/ws".to_owned(),
            ..ChannelConfig::default()
        };
        let client = ChannelClient::connect(&config);
        assert!(!client.is_connected());
        // Must not panic or queue.
        client.send(ClientFrame::Interrupt);
        client.close();
    }

    #[tokio::test]
    async fn failed_connect_emits_closed_with_growing_attempts() {
        let config = ChannelConfig {
            url: "ws://127.0.0.1:9/ws".to_owned(),
            reconnect_base_ms: 1,
            reconnect_cap_ms: 4,
            ..ChannelConfig::default()
        };
        let client = ChannelClient::connect(&config);
        let mut events = client.subscribe();

        let mut seen = Vec::new();
        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for Closed event")
                .unwrap();
            if let ChannelEvent::Closed {
                consecutive_failures,
            } = event
            {
                seen.push(consecutive_failures);
            }
        }
        assert_eq!(seen, vec![1, 2, 3]);
        client.close();
    }
}
