//! Token-to-speech text pipeline: splits streamed LLM tokens into sentences
//! and cleans each sentence for a TTS engine (SPEC_FULL.md §4.A-B).

pub mod chunker;
pub mod cleaner;
pub mod rules;

pub use chunker::SentenceChunker;
pub use cleaner::{ProcessedText, TtsCleaner};
pub use rules::{load_rules, CleanupRule};
