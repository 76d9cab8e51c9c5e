//! Pause classification: turning silence gaps into boundary decisions.
//!
//! ## Rules (ties break toward finalization)
//!
//! 1. Silence ≥ `mid_sentence_pause` → forced `EndOfSentence` (caps
//!    utterance growth).
//! 2. Prior speech sounded complete and silence ≥ `end_of_sentence_pause`
//!    → `EndOfSentence`.
//! 3. Silence ≥ `unknown_sentence_pause` → `Unknown` (trailing/incomplete;
//!    may trigger a provisional flush, never a commit).
//! 4. Otherwise → `MidSentence` (keep accumulating).
//!
//! Duration-threshold-only detection is the default: callers without a
//! prosody heuristic pass `speech_complete = true`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::TuningConfig;

/// A silence observation from the VAD collaborator.
#[derive(Debug, Clone, Copy)]
pub struct PauseEvent {
    /// Capture-side timestamp in seconds.
    pub timestamp: f64,
    /// Contiguous silence observed so far, in seconds.
    pub silence_secs: f32,
}

/// Classification of a silence gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryDecision {
    /// Short gap inside a sentence — keep accumulating the utterance.
    MidSentence,
    /// Ambiguous trailing gap — do not finalize, may flush provisionally.
    Unknown,
    /// Sentence boundary — finalize the open utterance.
    EndOfSentence,
}

impl BoundaryDecision {
    /// Finality rank: `MidSentence` < `Unknown` < `EndOfSentence`.
    pub fn rank(self) -> u8 {
        match self {
            BoundaryDecision::MidSentence => 0,
            BoundaryDecision::Unknown => 1,
            BoundaryDecision::EndOfSentence => 2,
        }
    }

    pub fn is_end_of_sentence(self) -> bool {
        self == BoundaryDecision::EndOfSentence
    }
}

/// Classifies silence durations against one utterance's threshold snapshot.
///
/// Holds the `Arc<TuningConfig>` captured when the utterance opened, so a
/// config swap never changes decisions mid-utterance.
#[derive(Debug, Clone)]
pub struct PauseClassifier {
    config: Arc<TuningConfig>,
}

impl PauseClassifier {
    pub fn new(config: Arc<TuningConfig>) -> Self {
        Self { config }
    }

    /// Classify a silence gap. `speech_complete` reports whether the prior
    /// speech segment sounded terminal (prosody heuristic); pass `true` for
    /// threshold-only operation.
    pub fn classify(&self, silence_secs: f32, speech_complete: bool) -> BoundaryDecision {
        let cfg = &self.config;

        if silence_secs >= cfg.mid_sentence_pause {
            return BoundaryDecision::EndOfSentence;
        }
        if speech_complete && silence_secs >= cfg.end_of_sentence_pause {
            return BoundaryDecision::EndOfSentence;
        }
        if silence_secs >= cfg.unknown_sentence_pause {
            return BoundaryDecision::Unknown;
        }
        BoundaryDecision::MidSentence
    }

    /// Whether an `Unknown` gap should push the current hypothesis to the
    /// delivery layer without committing it.
    pub fn provisional_flush_enabled(&self) -> bool {
        self.config.early_transcription_on_silence > 0.0
    }
}
