/// Text wake-word matching
///
/// Secondary detection path for command transcripts: a transcript matches a
/// configured phrase exactly, as a prefix followed by a word boundary, or as
/// a whole-word run anywhere in the text. "orionmeeting" does not match
/// "orion".

use crate::detection::{DetectionEvent, DetectionSource};
use tracing::debug;

/// How a transcript matched a wake phrase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Prefix,
    Contained,
}

impl MatchKind {
    /// Confidence reported for this kind of textual evidence
    pub fn confidence(self) -> f32 {
        match self {
            MatchKind::Exact => 1.0,
            MatchKind::Prefix => 0.95,
            MatchKind::Contained => 0.9,
        }
    }
}

/// A successful phrase match
#[derive(Debug, Clone, PartialEq)]
pub struct PhraseMatch {
    pub phrase: String,
    pub kind: MatchKind,
}

impl PhraseMatch {
    pub fn into_detection(self) -> DetectionEvent {
        DetectionEvent::new(self.kind.confidence(), DetectionSource::Transcript)
    }
}

/// Normalize text for matching: lowercase, punctuation stripped, `-` and `_`
/// treated as spaces, whitespace collapsed.
pub fn normalize(raw: &str) -> String {
    let mut normalized = String::with_capacity(raw.len());
    let mut previous_was_space = true;

    for ch in raw.chars() {
        if ch.is_alphanumeric() {
            normalized.extend(ch.to_lowercase());
            previous_was_space = false;
        } else if (ch.is_whitespace() || matches!(ch, '-' | '_')) && !previous_was_space {
            normalized.push(' ');
            previous_was_space = true;
        }
    }

    normalized.trim_end().to_string()
}

/// Matches transcripts against a set of normalized wake phrases
#[derive(Debug, Clone, Default)]
pub struct PhraseMatcher {
    phrases: Vec<String>,
}

impl PhraseMatcher {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut phrases: Vec<String> = phrases
            .into_iter()
            .map(|p| normalize(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();
        phrases.sort();
        phrases.dedup();

        debug!(phrases = ?phrases, "phrase matcher configured");
        Self { phrases }
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// Strongest match of any phrase against the transcript
    pub fn find(&self, transcript: &str) -> Option<PhraseMatch> {
        let text = normalize(transcript);
        if text.is_empty() {
            return None;
        }

        self.phrases
            .iter()
            .filter_map(|phrase| {
                match_phrase(&text, phrase).map(|kind| PhraseMatch {
                    phrase: phrase.clone(),
                    kind,
                })
            })
            .min_by_key(|m| m.kind as u8)
    }

    pub fn matches(&self, transcript: &str) -> bool {
        self.find(transcript).is_some()
    }
}

fn match_phrase(text: &str, phrase: &str) -> Option<MatchKind> {
    if text == phrase {
        return Some(MatchKind::Exact);
    }

    if text
        .strip_prefix(phrase)
        .is_some_and(|rest| rest.starts_with(' '))
    {
        return Some(MatchKind::Prefix);
    }

    let text_tokens: Vec<&str> = text.split(' ').collect();
    let phrase_tokens: Vec<&str> = phrase.split(' ').collect();
    if phrase_tokens.len() <= text_tokens.len()
        && text_tokens
            .windows(phrase_tokens.len())
            .any(|window| window == phrase_tokens.as_slice())
    {
        return Some(MatchKind::Contained);
    }

    None
}
