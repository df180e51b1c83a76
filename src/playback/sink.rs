//! Audio output sink seam and the cpal implementation.
//!
//! The playback engine owns policy (tokens, ordering, pending sources); a
//! sink only knows how to push decoded samples at the speaker. Keeping the
//! seam narrow lets tests substitute a scripted sink.

use crate::error::{Result, VoiceError};
use crate::playback::decode::DecodedClip;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::RecvTimeoutError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// An in-flight sink session. Dropping a session without calling `stop` is
/// allowed; the engine always stops explicitly.
pub trait SinkSession: Send {
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self);
}

/// Audio output seam.
pub trait AudioSink: Send + Sync + 'static {
    /// Prime the output path so later autonomous playback is permitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the output device rejects even silent output.
    fn unlock(&self) -> Result<()>;

    /// Start playing a decoded clip. `done` fires once if the clip plays to
    /// its natural end; it never fires for stopped sessions.
    ///
    /// # Errors
    ///
    /// Returns an error if the output stream cannot be opened.
    fn start(&self, clip: DecodedClip, done: oneshot::Sender<()>) -> Result<Box<dyn SinkSession>>;
}

/// Poll cadence for the playback thread.
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Silent priming clip length in samples (at 8kHz, ~30ms).
const UNLOCK_SILENCE_SAMPLES: usize = 240;
/// Upper bound on waiting for the priming clip to drain.
const UNLOCK_WAIT: Duration = Duration::from_secs(2);

/// Control commands for a session's playback thread.
enum SinkCommand {
    Pause,
    Resume,
    Stop,
}

/// Speaker output via cpal. Each session runs on its own thread because
/// cpal streams are not `Send`.
pub struct CpalSink {
    output_device: Option<String>,
}

impl CpalSink {
    #[must_use]
    pub fn new(output_device: Option<String>) -> Self {
        Self { output_device }
    }

    fn open_device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        if let Some(name) = &self.output_device {
            host.output_devices()
                .map_err(|e| VoiceError::Playback(format!("cannot enumerate devices: {e}")))?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| VoiceError::Playback(format!("output device '{name}' not found")))
        } else {
            host.default_output_device()
                .ok_or_else(|| VoiceError::Playback("no default output device".into()))
        }
    }
}

impl AudioSink for CpalSink {
    fn unlock(&self) -> Result<()> {
        let device = self.open_device()?;
        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("priming output device: {device_name}");

        let clip = DecodedClip {
            samples: vec![0.0; UNLOCK_SILENCE_SAMPLES],
            sample_rate: 8_000,
        };
        let (done_tx, mut done_rx) = oneshot::channel();
        let session = spawn_session(device, clip, done_tx)?;
        // Let the silent clip run out, but never block on a device that
        // stopped draining; priming is best-effort once the stream opened.
        let deadline = std::time::Instant::now() + UNLOCK_WAIT;
        loop {
            match done_rx.try_recv() {
                Ok(()) | Err(oneshot::error::TryRecvError::Closed) => break,
                Err(oneshot::error::TryRecvError::Empty) => {
                    if std::time::Instant::now() >= deadline {
                        break;
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }
        drop(session);
        Ok(())
    }

    fn start(&self, clip: DecodedClip, done: oneshot::Sender<()>) -> Result<Box<dyn SinkSession>> {
        let device = self.open_device()?;
        let session = spawn_session(device, clip, done)?;
        Ok(Box::new(session))
    }
}

struct CpalSession {
    commands: crossbeam_channel::Sender<SinkCommand>,
}

impl SinkSession for CpalSession {
    fn pause(&mut self) {
        let _ = self.commands.send(SinkCommand::Pause);
    }

    fn resume(&mut self) {
        let _ = self.commands.send(SinkCommand::Resume);
    }

    fn stop(&mut self) {
        let _ = self.commands.send(SinkCommand::Stop);
    }
}

/// Progress shared between the cpal callback and the session thread.
struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}

fn spawn_session(
    device: cpal::Device,
    clip: DecodedClip,
    done: oneshot::Sender<()>,
) -> Result<CpalSession> {
    let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
    // Opening the stream happens on the session thread; report the outcome
    // back so `start` can fail synchronously.
    let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

    std::thread::Builder::new()
        .name("vuddy-playback".into())
        .spawn(move || {
            let stream_config = StreamConfig {
                channels: 1,
                sample_rate: clip.sample_rate,
                buffer_size: cpal::BufferSize::Default,
            };

            let buffer = Arc::new(Mutex::new(PlaybackBuffer {
                samples: clip.samples,
                position: 0,
                finished: false,
            }));
            let buffer_clone = Arc::clone(&buffer);

            let stream = device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    let mut buf = match buffer_clone.lock() {
                        Ok(b) => b,
                        Err(_) => return,
                    };
                    for sample in data.iter_mut() {
                        if buf.position < buf.samples.len() {
                            *sample = buf.samples[buf.position];
                            buf.position += 1;
                        } else {
                            *sample = 0.0;
                            buf.finished = true;
                        }
                    }
                },
                move |err| {
                    error!("audio output stream error: {err}");
                },
                None,
            );
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(VoiceError::Playback(format!(
                        "failed to build output stream: {e}"
                    ))));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(VoiceError::Playback(format!(
                    "failed to start output stream: {e}"
                ))));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            loop {
                match commands_rx.recv_timeout(POLL_INTERVAL) {
                    Ok(SinkCommand::Pause) => {
                        if let Err(e) = stream.pause() {
                            warn!("pause unsupported by output stream: {e}");
                        }
                    }
                    Ok(SinkCommand::Resume) => {
                        if let Err(e) = stream.play() {
                            warn!("resume failed: {e}");
                        }
                    }
                    Ok(SinkCommand::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        let finished = buffer.lock().map(|b| b.finished).unwrap_or(true);
                        if finished {
                            let _ = done.send(());
                            break;
                        }
                    }
                }
            }
            drop(stream);
        })
        .map_err(|e| VoiceError::Playback(format!("cannot spawn playback thread: {e}")))?;

    match ready_rx.recv_timeout(Duration::from_secs(5)) {
        Ok(Ok(())) => Ok(CpalSession {
            commands: commands_tx,
        }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(VoiceError::Playback("playback thread did not start".into())),
    }
}
