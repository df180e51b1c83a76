//! Configuration types for the voice interaction engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the voice client core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Speech capture settings (wake phrases, restart policy).
    pub capture: CaptureConfig,
    /// Audio playback settings (source resolution, unlock state).
    pub playback: PlaybackConfig,
    /// Duplex channel settings (URL, reconnect backoff).
    pub channel: ChannelConfig,
    /// Conversation and turn-taking settings.
    pub conversation: ConversationConfig,
}

/// Speech capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Whether a final transcript must start with a wake phrase to be
    /// dispatched as a command.
    pub wake_word_enabled: bool,
    /// Wake phrases, checked as case-insensitive prefixes. More specific
    /// phrases should come first; the gate re-sorts longest-first anyway.
    pub wake_phrases: Vec<String>,
    /// Delay before restarting recognition after a natural session end, in ms.
    pub restart_after_end_ms: u64,
    /// Delay before restarting recognition after a transient error, in ms.
    pub restart_after_error_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            wake_word_enabled: true,
            wake_phrases: vec!["hey vuddy".to_owned(), "vuddy".to_owned()],
            restart_after_end_ms: 200,
            restart_after_error_ms: 500,
        }
    }
}

/// Audio playback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Explicit backend origin for relative audio paths
    /// (e.g. `http://192.168.1.20:8000`). Tried first when set.
    pub backend_origin: Option<String>,
    /// Origin the UI itself is served from, used for the host-based guess
    /// and the same-origin proxy candidates (e.g. `http://localhost:5173`).
    pub ui_origin: Option<String>,
    /// Port the backend is expected to listen on when guessing from the
    /// UI host.
    pub backend_port: u16,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
    /// Directory holding durable playback state (the unlocked marker).
    pub state_dir: PathBuf,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            backend_origin: None,
            ui_origin: None,
            backend_port: 8000,
            output_device: None,
            state_dir: default_data_root().join("playback"),
        }
    }
}

/// Duplex channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Backend WebSocket URL.
    pub url: String,
    /// First reconnect delay in ms. Doubles on every consecutive failure.
    pub reconnect_base_ms: u64,
    /// Upper bound on the reconnect delay in ms.
    pub reconnect_cap_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws".to_owned(),
            reconnect_base_ms: 1_000,
            reconnect_cap_ms: 10_000,
        }
    }
}

/// Conversation and turn-taking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Root directory for persisted conversations.
    pub root_dir: PathBuf,
    /// Partition key conversations are stored under (the active school).
    pub partition: String,
    /// Whether assistant replies are spoken automatically when audio arrives.
    pub speak_responses: bool,
    /// Window in ms within which an identical submission is dropped.
    pub dedupe_window_ms: u64,
    /// How long a terminal tool status badge stays visible, in ms.
    pub tool_status_clear_ms: u64,
    /// How long a recoverable error notice stays visible, in ms.
    pub notice_dismiss_ms: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            root_dir: default_data_root().join("conversations"),
            partition: "default".to_owned(),
            speak_responses: true,
            dedupe_window_ms: 1_200,
            tool_status_clear_ms: 2_500,
            notice_dismiss_ms: 3_000,
        }
    }
}

/// Returns the default root for durable client data: `~/.vuddy`.
fn default_data_root() -> PathBuf {
    dirs::home_dir().map_or_else(
        || PathBuf::from("/tmp").join(".vuddy"),
        |home| home.join(".vuddy"),
    )
}

impl VoiceConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::VoiceError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::VoiceError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path, e.g. `~/.config/vuddy/voice.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir().map_or_else(
            || PathBuf::from("/tmp/vuddy-config/voice.toml"),
            |config| config.join("vuddy").join("voice.toml"),
        )
    }
}
