use regex::Regex;

const DEFAULT_TERMINATORS: [char; 7] = ['.', '!', '?', '\n', '。', '！', '？'];

fn is_terminator(ch: char) -> bool {
    DEFAULT_TERMINATORS.contains(&ch)
}

/// Converts a lazy sequence of token fragments into a lazy sequence of
/// sentence strings (SPEC_FULL.md §4.A).
///
/// Strips inline `<think>...</think>`-style reasoning spans and embedded
/// tool-call JSON blobs before splitting on sentence terminators. Reasoning
/// tags may straddle token boundaries; this is handled with a small
/// speculative buffer bounded by `max(start_tag, end_tag).len() - 1`, rather
/// than re-scanning the whole accumulated buffer on every token.
#[derive(Debug)]
pub struct SentenceChunker {
    buffer: String,
    reasoning_buffer: String,
    inside_reasoning: bool,
    start_lower: String,
    end_lower: String,
    tool_call_pattern: Regex,
    tool_call_start_pattern: Regex,
}

impl Default for SentenceChunker {
    fn default() -> Self {
        Self::new("<think>", "</think>")
    }
}

impl SentenceChunker {
    pub fn new(reasoning_start_tag: &str, reasoning_end_tag: &str) -> Self {
        Self {
            buffer: String::new(),
            reasoning_buffer: String::new(),
            inside_reasoning: false,
            start_lower: reasoning_start_tag.to_lowercase(),
            end_lower: reasoning_end_tag.to_lowercase(),
            tool_call_pattern: Regex::new(r"\{\s*'type'\s*:\s*'tool_call'[\s\S]*?\}\}")
                .expect("static pattern is valid"),
            tool_call_start_pattern: Regex::new(r"\{\s*'type'\s*:\s*'tool_call'")
                .expect("static pattern is valid"),
        }
    }

    /// Feed one token fragment; returns zero or more completed sentences.
    pub fn process(&mut self, token: &str) -> Vec<String> {
        if token.is_empty() {
            return Vec::new();
        }

        let filtered = self.filter_reasoning(token);
        if filtered.is_empty() {
            return Vec::new();
        }

        self.buffer.push_str(&filtered);
        self.buffer = self.tool_call_pattern.replace_all(&self.buffer, "").into_owned();

        // An opening tool-call marker with no closing `}}` yet is a blob
        // still in flight; hold everything from that marker back so a
        // terminator character inside the raw JSON isn't split out and
        // spoken before the blob is later stripped whole.
        let split_point = self
            .tool_call_start_pattern
            .find(&self.buffer)
            .map(|m| m.start())
            .unwrap_or(self.buffer.len());

        let (sentences, remainder) = split_sentences(&self.buffer[..split_point]);
        self.buffer = remainder + &self.buffer[split_point..];

        sentences
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Return any buffered text that never reached a terminator, clearing state.
    pub fn flush(&mut self) -> Option<String> {
        self.buffer = self
            .tool_call_pattern
            .replace_all(&self.buffer, "")
            .into_owned();
        let remaining = self.buffer.trim().to_string();
        self.reset();
        if remaining.is_empty() {
            None
        } else {
            Some(remaining)
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.reasoning_buffer.clear();
        self.inside_reasoning = false;
    }

    /// Strip reasoning-tag spans, carrying at most one tag-length of
    /// speculative text across calls so a tag split across tokens is still
    /// recognized.
    fn filter_reasoning(&mut self, chunk: &str) -> String {
        self.reasoning_buffer.push_str(chunk);
        let mut out = String::new();

        loop {
            let tag = if self.inside_reasoning {
                &self.end_lower
            } else {
                &self.start_lower
            };
            let lower = self.reasoning_buffer.to_lowercase();
            match lower.find(tag.as_str()) {
                Some(byte_pos) => {
                    if !self.inside_reasoning {
                        out.push_str(&self.reasoning_buffer[..byte_pos]);
                    }
                    self.reasoning_buffer =
                        self.reasoning_buffer[byte_pos + tag.len()..].to_string();
                    self.inside_reasoning = !self.inside_reasoning;
                }
                None => break,
            }
        }

        let tag_len = if self.inside_reasoning {
            self.end_lower.chars().count()
        } else {
            self.start_lower.chars().count()
        };
        let hold = tag_len.saturating_sub(1);
        let total_chars = self.reasoning_buffer.chars().count();
        let release_chars = total_chars.saturating_sub(hold);
        let release_idx = self
            .reasoning_buffer
            .char_indices()
            .nth(release_chars)
            .map(|(i, _)| i)
            .unwrap_or(self.reasoning_buffer.len());

        if !self.inside_reasoning {
            out.push_str(&self.reasoning_buffer[..release_idx]);
        }
        self.reasoning_buffer = self.reasoning_buffer[release_idx..].to_string();

        out
    }
}

/// Split `buffer` into complete sentences (terminator plus trailing
/// whitespace), returning the leftover tail that did not end on a terminator.
fn split_sentences(buffer: &str) -> (Vec<String>, String) {
    let chars: Vec<(usize, char)> = buffer.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let (byte_idx, ch) = chars[i];
        if is_terminator(ch) {
            let mut end = byte_idx + ch.len_utf8();
            let mut j = i + 1;
            while j < chars.len() && chars[j].1.is_whitespace() {
                end = chars[j].0 + chars[j].1.len_utf8();
                j += 1;
            }
            sentences.push(buffer[start..end].to_string());
            start = end;
            i = j;
        } else {
            i += 1;
        }
    }

    (sentences, buffer[start..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_across_token_boundaries() {
        let mut chunker = SentenceChunker::default();
        assert!(chunker.process("Hello").is_empty());
        let sentences = chunker.process(" world. How are");
        assert_eq!(sentences, vec!["Hello world.".to_string()]);
        let sentences = chunker.process(" you?");
        assert_eq!(sentences, vec!["How are you?".to_string()]);
    }

    #[test]
    fn flush_returns_residual_text() {
        let mut chunker = SentenceChunker::default();
        assert!(chunker.process("No terminator here").is_empty());
        assert_eq!(chunker.flush(), Some("No terminator here".to_string()));
        assert_eq!(chunker.flush(), None);
    }

    #[test]
    fn strips_reasoning_tags_spanning_tokens() {
        let mut chunker = SentenceChunker::default();
        let mut out = Vec::new();
        out.extend(chunker.process("I need to perform a search. <think>The user is asking about"));
        out.extend(chunker.process("a complex topic.</think>"));
        out.extend(chunker.process("Okay, the search is complete."));
        out.extend(chunker.flush());
        assert_eq!(
            out,
            vec![
                "I need to perform a search.".to_string(),
                "Okay, the search is complete.".to_string(),
            ]
        );
    }

    #[test]
    fn strips_embedded_tool_call_blobs() {
        let mut chunker = SentenceChunker::default();
        let mut out = Vec::new();
        out.extend(chunker.process("Let me check. "));
        out.extend(chunker.process(
            "{'type': 'tool_call', 'tool_name': 'search', 'args': '{\"q\": \"x\"}'}}",
        ));
        out.extend(chunker.process("Done."));
        assert_eq!(
            out,
            vec!["Let me check.".to_string(), "Done.".to_string()]
        );
    }

    #[test]
    fn tool_call_blob_split_across_tokens_never_leaks_a_mid_blob_sentence() {
        let mut chunker = SentenceChunker::default();
        let mut out = Vec::new();
        out.extend(chunker.process("Let me check. "));
        out.extend(chunker.process(
            "{'type': 'tool_call', 'tool_name': 'search', 'args': 'find a.",
        ));
        out.extend(chunker.process("b'}}"));
        out.extend(chunker.process("Done."));
        assert_eq!(
            out,
            vec!["Let me check.".to_string(), "Done.".to_string()]
        );
    }

    #[test]
    fn recognizes_cjk_terminators() {
        let mut chunker = SentenceChunker::default();
        let sentences = chunker.process("やったー！これで勝てる？");
        assert_eq!(
            sentences,
            vec!["やったー！".to_string(), "これで勝てる？".to_string()]
        );
    }

    #[test]
    fn idempotent_under_flush() {
        let mut a = SentenceChunker::default();
        let mut got_a = a.process("Partial sentence");
        if let Some(rest) = a.flush() {
            got_a.push(rest);
        }

        let mut b = SentenceChunker::default();
        let got_b = b.process("Partial sentence.");

        let trimmed_b: String = got_b
            .concat()
            .trim_end_matches(&DEFAULT_TERMINATORS[..])
            .to_string();
        assert_eq!(got_a.concat(), trimmed_b);
    }

    #[test]
    fn reset_clears_all_state() {
        let mut chunker = SentenceChunker::default();
        chunker.process("<think>buffered reasoning");
        chunker.process("unterminated prefix");
        chunker.reset();
        assert_eq!(chunker.flush(), None);
    }
}
