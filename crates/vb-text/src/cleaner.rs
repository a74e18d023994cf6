use regex::Regex;

use crate::rules::CleanupRule;

/// Parenthesized emotion keywords recognized in agent output
/// (SPEC_FULL.md §4.B). Matched case-insensitively; the match itself is
/// reported but left in the text (§11 open-question decision: emotion
/// tags are not stripped by default).
pub const EMOTION_KEYWORDS: &[&str] = &[
    "joyful",
    "sad",
    "angry",
    "surprised",
    "scared",
    "disgusted",
    "confused",
    "curious",
    "worried",
    "satisfied",
    "sarcastic",
    "laughing",
    "crying loudly",
    "sighing",
    "whispering",
    "hesitating",
];

/// A chunk of sentence text paired with the emotion it carried, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedText {
    pub text: String,
    pub emotion: Option<String>,
}

/// Extracts an emotion tag and applies TTS cleanup rules to sentence text
/// produced by [`crate::chunker::SentenceChunker`].
#[derive(Debug)]
pub struct TtsCleaner {
    emotion_pattern: Regex,
    bracket_patterns: [Regex; 2],
    rules: Vec<(Regex, String)>,
}

impl TtsCleaner {
    pub fn new(rules: Vec<CleanupRule>) -> Self {
        let alternation = EMOTION_KEYWORDS
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");
        let emotion_pattern = Regex::new(&format!(r"(?i)\(({alternation})\)"))
            .expect("emotion keyword alternation is a valid pattern");

        let compiled = rules
            .into_iter()
            .filter_map(|rule| match Regex::new(&rule.pattern) {
                Ok(re) => Some((re, rule.replacement)),
                Err(err) => {
                    tracing::warn!(pattern = %rule.pattern, error = %err, "skipping invalid TTS rule pattern");
                    None
                }
            })
            .collect::<Vec<_>>();

        Self {
            emotion_pattern,
            bracket_patterns: [
                Regex::new(r"\*[^*]*\*").expect("static pattern is valid"),
                Regex::new(r"\[[^\]]*\]").expect("static pattern is valid"),
            ],
            rules: compiled,
        }
    }

    /// Apply the cleaner to one sentence, returning the cleaned text and any
    /// emotion tag found. Returns an empty `text` for blank input.
    pub fn process(&self, text: &str) -> ProcessedText {
        if text.trim().is_empty() {
            return ProcessedText {
                text: String::new(),
                emotion: None,
            };
        }

        let emotion = self
            .emotion_pattern
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_lowercase());

        let mut cleaned = text.to_string();
        for pattern in &self.bracket_patterns {
            cleaned = pattern.replace_all(&cleaned, "").into_owned();
        }
        for (pattern, replacement) in &self.rules {
            cleaned = pattern.replace_all(&cleaned, replacement.as_str()).into_owned();
        }
        cleaned = collapse_whitespace(&cleaned).trim().to_string();

        ProcessedText {
            text: cleaned,
            emotion,
        }
    }

    /// True if `text` contains at least one alphanumeric character — the
    /// gate used before a chunk is forwarded as a `tts_ready_chunk`
    /// (SPEC_FULL.md §4.B: stage-direction-only output is dropped).
    pub fn has_speakable_content(text: &str) -> bool {
        text.chars().any(|c| c.is_alphanumeric())
    }
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out
}
