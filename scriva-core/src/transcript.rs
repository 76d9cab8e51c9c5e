//! Sentence finalization and the append-only committed transcript.
//!
//! Finalization pipeline, in order: custom-vocabulary substitution →
//! auto-capitalization → terminal punctuation. Command scanning runs after
//! polishing (see `engine`), so the committed text never contains trigger
//! phrases.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::TuningConfig;

/// A finalized, never-rewritten sentence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sentence {
    /// Monotonically increasing commit index.
    pub index: u64,
    /// Source utterance id.
    pub utterance_id: u64,
    /// Fully post-processed text.
    pub text: String,
    pub committed_at: DateTime<Utc>,
}

/// Word/sentence counts for UI observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptStats {
    pub characters: usize,
    pub words: usize,
    pub sentences: usize,
}

/// Append-only record of every finalized sentence.
///
/// Single writer (the sentence finalizer); readers take snapshots through
/// the shared `RwLock`.
#[derive(Debug, Default)]
pub struct CommittedTranscript {
    sentences: Vec<Sentence>,
    finalized_ids: HashSet<u64>,
    next_index: u64,
}

impl CommittedTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finalized sentence. Returns `None` when the utterance id was
    /// already finalized (a stray duplicate final, dropped not re-appended).
    pub fn append(&mut self, utterance_id: u64, text: String) -> Option<Sentence> {
        if !self.finalized_ids.insert(utterance_id) {
            debug!(utterance_id, "duplicate final dropped");
            return None;
        }
        let sentence = Sentence {
            index: self.next_index,
            utterance_id,
            text,
            committed_at: Utc::now(),
        };
        self.next_index += 1;
        self.sentences.push(sentence.clone());
        Some(sentence)
    }

    /// Record that an utterance finalized without producing a sentence
    /// (empty text or a pure command), so late duplicates are still dropped.
    pub fn mark_finalized(&mut self, utterance_id: u64) -> bool {
        self.finalized_ids.insert(utterance_id)
    }

    pub fn is_finalized(&self, utterance_id: u64) -> bool {
        self.finalized_ids.contains(&utterance_id)
    }

    pub fn sentences(&self) -> &[Sentence] {
        &self.sentences
    }

    pub fn last(&self) -> Option<&Sentence> {
        self.sentences.last()
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    pub fn stats(&self) -> TranscriptStats {
        let characters = self.sentences.iter().map(|s| s.text.chars().count()).sum();
        let words = self
            .sentences
            .iter()
            .map(|s| s.text.split_whitespace().count())
            .sum();
        TranscriptStats {
            characters,
            words,
            sentences: self.sentences.len(),
        }
    }
}

/// Shared handle to the transcript.
pub type SharedTranscript = Arc<RwLock<CommittedTranscript>>;

pub fn shared_transcript() -> SharedTranscript {
    Arc::new(RwLock::new(CommittedTranscript::new()))
}

/// Applies the text post-processing pipeline and owns the transcript write
/// role.
pub struct SentenceFinalizer {
    transcript: SharedTranscript,
}

impl SentenceFinalizer {
    pub fn new(transcript: SharedTranscript) -> Self {
        Self { transcript }
    }

    /// Post-process raw utterance text: vocabulary → capitalize → punctuate.
    ///
    /// `suppress_period` skips terminal punctuation when the utterance is
    /// itself a recognized command phrase.
    pub fn polish(config: &TuningConfig, text: &str, suppress_period: bool) -> String {
        let mut out = normalize_whitespace(text);
        if out.is_empty() {
            return out;
        }

        // Longest spoken form first so "stack overflow" style multi-word
        // entries are never shadowed by shorter ones.
        let mut entries: Vec<_> = config.vocabulary.iter().collect();
        entries.sort_by_key(|e| std::cmp::Reverse(e.spoken.chars().count()));
        for entry in entries {
            out = replace_word_case_insensitive(&out, &entry.spoken, &entry.written);
        }

        if config.auto_capitalize {
            out = capitalize_first_alphabetic(&out);
        }

        if config.auto_punctuation && !suppress_period && !ends_with_sentence_punctuation(&out) {
            out.push(terminal_punctuation_for(&out));
        }

        out
    }

    /// Commit an utterance's polished text, assigning the next index.
    ///
    /// Idempotent: a second commit for the same utterance id returns `None`.
    pub fn commit(&self, utterance_id: u64, text: String) -> Option<Sentence> {
        let sentence = self.transcript.write().append(utterance_id, text)?;
        info!(
            utterance_id,
            index = sentence.index,
            text = %sentence.text,
            "sentence committed"
        );
        Some(sentence)
    }

    /// Close an utterance that produced no literal text.
    pub fn mark_finalized(&self, utterance_id: u64) {
        self.transcript.write().mark_finalized(utterance_id);
    }

    pub fn is_finalized(&self, utterance_id: u64) -> bool {
        self.transcript.read().is_finalized(utterance_id)
    }

    pub fn transcript(&self) -> SharedTranscript {
        Arc::clone(&self.transcript)
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn capitalize_first_alphabetic(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut done = false;
    for c in text.chars() {
        if !done && c.is_alphabetic() {
            out.extend(c.to_uppercase());
            done = true;
        } else {
            out.push(c);
        }
    }
    out
}

fn ends_with_sentence_punctuation(text: &str) -> bool {
    matches!(text.chars().last(), Some('.' | '!' | '?'))
}

/// Interrogative openers get a question mark instead of a period.
fn terminal_punctuation_for(text: &str) -> char {
    const INTERROGATIVES: [&str; 11] = [
        "what", "where", "when", "why", "how", "who", "which", "is", "are", "can", "could",
    ];
    let first_word = text
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_ascii_lowercase();
    if INTERROGATIVES.contains(&first_word.as_str()) {
        '?'
    } else {
        '.'
    }
}

/// Whole-word, case-insensitive replacement (char-boundary walk).
fn replace_word_case_insensitive(text: &str, needle: &str, replacement: &str) -> String {
    if needle.is_empty() || text.is_empty() {
        return text.to_string();
    }

    let needle_chars: Vec<char> = needle.chars().collect();
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0usize;
    let mut changed = false;

    while i < chars.len() {
        let end = i + needle_chars.len();
        let matches = end <= chars.len()
            && chars[i..end]
                .iter()
                .zip(&needle_chars)
                .all(|(a, b)| {
                    a.to_lowercase().eq(b.to_lowercase())
                });
        if matches {
            let start_ok = i == 0 || !is_word_char(chars[i - 1]);
            let end_ok = end == chars.len() || !is_word_char(chars[end]);
            if start_ok && end_ok {
                out.push_str(replacement);
                i = end;
                changed = true;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }

    if changed {
        out
    } else {
        text.to_string()
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '\''
}
