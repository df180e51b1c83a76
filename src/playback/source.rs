//! Audio sources and best-effort URL resolution.
//!
//! The backend serves synthesized audio either as inline base64 bytes or as
//! a URL, frequently a relative path like `/api/audio/tts/<file>.mp3`. In
//! real deployments the UI and the media-serving backend often listen on
//! different hosts/ports, so a relative path is resolved through an ordered
//! candidate chain and the first base that serves the bytes wins. This is a
//! deployment-compatibility shim, not a correctness guarantee.

use crate::config::PlaybackConfig;
use crate::error::{Result, VoiceError};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

/// Declared format of an audio clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Wav,
    Ogg,
}

impl AudioFormat {
    /// File extension used as a decode hint.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::Ogg => "ogg",
        }
    }
}

/// One logical audio clip to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Remote clip, absolute URL or backend-relative path.
    Url {
        url: String,
        format: Option<AudioFormat>,
    },
    /// Inline base64-encoded clip.
    Inline {
        data_b64: String,
        format: AudioFormat,
    },
}

impl AudioSource {
    /// The declared format, if any.
    #[must_use]
    pub fn format(&self) -> Option<AudioFormat> {
        match self {
            Self::Url { format, .. } => *format,
            Self::Inline { format, .. } => Some(*format),
        }
    }
}

/// Build the ordered list of absolute URLs to try for `path`.
///
/// Absolute URLs resolve to themselves. Relative paths are expanded against,
/// in order: the configured backend origin, a guess that swaps the UI
/// origin's port for the known backend port, the UI origin itself (a
/// same-origin proxy), and a direct localhost backend fallback. Duplicates
/// are removed preserving order.
#[must_use]
pub fn resolve_candidates(path: &str, config: &PlaybackConfig) -> Vec<String> {
    if let Ok(url) = Url::parse(path) {
        if !url.cannot_be_a_base() {
            return vec![path.to_owned()];
        }
    }

    let path = if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    };

    let mut candidates = Vec::new();
    if let Some(origin) = &config.backend_origin {
        candidates.push(format!("{}{}", origin.trim_end_matches('/'), path));
    }
    if let Some(ui_origin) = &config.ui_origin {
        if let Ok(mut url) = Url::parse(ui_origin) {
            if url.set_port(Some(config.backend_port)).is_ok() {
                let base = url.as_str().trim_end_matches('/').to_owned();
                candidates.push(format!("{base}{path}"));
            }
        }
        candidates.push(format!("{}{}", ui_origin.trim_end_matches('/'), path));
    }
    candidates.push(format!("http://127.0.0.1:{}{}", config.backend_port, path));

    let mut seen = Vec::new();
    candidates.retain(|c| {
        if seen.contains(c) {
            false
        } else {
            seen.push(c.clone());
            true
        }
    });
    candidates
}

/// Load the raw bytes of a source, trying URL candidates in order.
///
/// # Errors
///
/// Returns an error if the base64 payload is invalid or every candidate
/// fails to serve the clip.
pub async fn load_bytes(
    http: &reqwest::Client,
    source: &AudioSource,
    config: &PlaybackConfig,
) -> Result<Bytes> {
    match source {
        AudioSource::Inline { data_b64, .. } => {
            let bytes = BASE64
                .decode(data_b64.as_bytes())
                .map_err(|e| VoiceError::Source(format!("invalid base64 audio: {e}")))?;
            Ok(Bytes::from(bytes))
        }
        AudioSource::Url { url, .. } => {
            let candidates = resolve_candidates(url, config);
            let mut last_error = String::from("no candidates");
            for candidate in &candidates {
                match fetch(http, candidate).await {
                    Ok(bytes) => {
                        debug!("audio source resolved via {candidate}");
                        return Ok(bytes);
                    }
                    Err(e) => {
                        debug!("audio candidate {candidate} failed: {e}");
                        last_error = e;
                    }
                }
            }
            warn!("all {} audio candidates failed for {url}", candidates.len());
            Err(VoiceError::Source(format!(
                "cannot fetch audio {url}: {last_error}"
            )))
        }
    }
}

async fn fetch(http: &reqwest::Client, url: &str) -> std::result::Result<Bytes, String> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| format!("request: {e}"))?;
    if !response.status().is_success() {
        return Err(format!("status {}", response.status()));
    }
    response.bytes().await.map_err(|e| format!("body: {e}"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn config() -> PlaybackConfig {
        PlaybackConfig {
            backend_origin: Some("http://192.168.1.20:8000".to_owned()),
            ui_origin: Some("http://localhost:5173".to_owned()),
            backend_port: 8000,
            ..PlaybackConfig::default()
        }
    }

    #[test]
    fn absolute_url_is_single_candidate() {
        let candidates = resolve_candidates("https://cdn.example.com/a.mp3", &config());
        assert_eq!(candidates, vec!["https://cdn.example.com/a.mp3".to_owned()]);
    }

    #[test]
    fn relative_path_expands_in_declared_order() {
        let candidates = resolve_candidates("/api/audio/tts/x.mp3", &config());
        assert_eq!(
            candidates,
            vec![
                "http://192.168.1.20:8000/api/audio/tts/x.mp3".to_owned(),
                "http://localhost:8000/api/audio/tts/x.mp3".to_owned(),
                "http://localhost:5173/api/audio/tts/x.mp3".to_owned(),
                "http://127.0.0.1:8000/api/audio/tts/x.mp3".to_owned(),
            ]
        );
    }

    #[test]
    fn missing_origins_still_yield_fallback() {
        let config = PlaybackConfig::default();
        let candidates = resolve_candidates("/api/audio/tts/x.mp3", &config);
        assert_eq!(
            candidates,
            vec!["http://127.0.0.1:8000/api/audio/tts/x.mp3".to_owned()]
        );
    }

    #[test]
    fn duplicate_candidates_are_removed() {
        let config = PlaybackConfig {
            backend_origin: Some("http://127.0.0.1:8000".to_owned()),
            ui_origin: None,
            backend_port: 8000,
            ..PlaybackConfig::default()
        };
        let candidates = resolve_candidates("/a.mp3", &config);
        assert_eq!(candidates, vec!["http://127.0.0.1:8000/a.mp3".to_owned()]);
    }

    #[test]
    fn bare_relative_path_gains_leading_slash() {
        let config = PlaybackConfig::default();
        let candidates = resolve_candidates("a.mp3", &config);
        assert_eq!(candidates, vec!["http://127.0.0.1:8000/a.mp3".to_owned()]);
    }

    #[tokio::test]
    async fn inline_base64_decodes() {
        let source = AudioSource::Inline {
            data_b64: BASE64.encode(b"hello"),
            format: AudioFormat::Mp3,
        };
        let bytes = load_bytes(&reqwest::Client::new(), &source, &PlaybackConfig::default())
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn invalid_base64_is_an_error() {
        let source = AudioSource::Inline {
            data_b64: "!!not-base64!!".to_owned(),
            format: AudioFormat::Mp3,
        };
        let result = load_bytes(&reqwest::Client::new(), &source, &PlaybackConfig::default()).await;
        assert!(result.is_err());
    }
}
