//! Wake-word gating for recognized transcripts.
//!
//! A final transcript is accepted as a command only when it starts,
//! case-insensitively, with one of the configured wake phrases. Matching is
//! plain prefix containment, not word-boundary aware: "vuddy" also matches
//! a transcript beginning "vuddybot". That is the shipped policy.

/// Outcome of gating one final transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// A wake phrase matched and left a non-empty command.
    Command(String),
    /// A wake phrase matched but nothing followed it.
    BareWake,
    /// No wake phrase matched.
    Miss,
}

/// Ordered set of wake phrases with prefix matching and stripping.
#[derive(Debug, Clone)]
pub struct WakeGate {
    /// Lowercased phrases, longest first so the most specific phrase wins.
    phrases: Vec<String>,
}

impl WakeGate {
    /// Build a gate from a phrase list. Empty and duplicate phrases are
    /// dropped; the rest are lowercased and ordered longest-first.
    #[must_use]
    pub fn new(phrases: &[String]) -> Self {
        let mut gate = Self {
            phrases: Vec::new(),
        };
        for phrase in phrases {
            gate.add_phrase(phrase);
        }
        gate
    }

    /// Add a phrase (e.g. one supplied by the backend at connect time).
    pub fn add_phrase(&mut self, phrase: &str) {
        let phrase = phrase.trim().to_lowercase();
        if phrase.is_empty() || self.phrases.iter().any(|p| *p == phrase) {
            return;
        }
        self.phrases.push(phrase);
        self.phrases.sort_by(|a, b| b.len().cmp(&a.len()));
    }

    /// Returns the configured phrases, longest first.
    #[must_use]
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    /// Gate one final transcript.
    #[must_use]
    pub fn evaluate(&self, transcript: &str) -> GateOutcome {
        let transcript = transcript.trim();
        for phrase in &self.phrases {
            if let Some(rest) = strip_prefix_ci(transcript, phrase) {
                let command = trim_command(rest);
                if command.is_empty() {
                    return GateOutcome::BareWake;
                }
                return GateOutcome::Command(command.to_owned());
            }
        }
        GateOutcome::Miss
    }
}

/// Case-insensitive prefix strip. Returns the remainder of `text` after
/// `phrase`, or `None` if `text` does not start with it.
fn strip_prefix_ci<'a>(text: &'a str, phrase: &str) -> Option<&'a str> {
    let mut text_chars = text.char_indices();
    let mut phrase_chars = phrase.chars();
    loop {
        let Some(pc) = phrase_chars.next() else {
            return Some(match text_chars.next() {
                Some((i, _)) => &text[i..],
                None => "",
            });
        };
        let (_, tc) = text_chars.next()?;
        if !tc.to_lowercase().eq(pc.to_lowercase()) {
            return None;
        }
    }
}

/// Strip the leading punctuation and whitespace a recognizer leaves behind
/// after the wake phrase ("Hey Vuddy, play something" → "play something").
fn trim_command(rest: &str) -> &str {
    rest.trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | '!' | '?' | ':' | ';'))
        .trim_end()
}
