//! Tuning parameters consumed by the reconciliation core.
//!
//! `TuningConfig` is an immutable snapshot: the engine captures one `Arc`
//! per utterance, so swapping the live config through [`ConfigHandle`] never
//! changes boundary decisions mid-utterance.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::command::CommandTrigger;
use crate::error::{Result, ScrivaError};

/// One spoken → written substitution applied during sentence finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocabularyEntry {
    /// Spoken form as the recognizer emits it (matched case-insensitively).
    pub spoken: String,
    /// Written form substituted into the committed sentence.
    pub written: String,
}

impl VocabularyEntry {
    pub fn new(spoken: impl Into<String>, written: impl Into<String>) -> Self {
        Self {
            spoken: spoken.into(),
            written: written.into(),
        }
    }
}

/// Immutable snapshot of all numeric tuning parameters plus the
/// custom-vocabulary and command-trigger tables.
///
/// Fields the core does not act on itself (beam sizes, batch size, VAD
/// sensitivities, `min_gap_between_recordings`) are carried for the acoustic
/// collaborator, which reads them through the same handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TuningConfig {
    /// Silence duration that closes a complete-sounding sentence. Default 0.45 s.
    pub end_of_sentence_pause: f32,
    /// Silence duration after which an incomplete utterance is ambiguous. Default 0.7 s.
    pub unknown_sentence_pause: f32,
    /// Silence budget for a mid-sentence pause; beyond it finalization is forced. Default 2.0 s.
    pub mid_sentence_pause: f32,
    /// Debounce window for coalescing realtime delivery updates. Default 0.02 s.
    pub realtime_processing_pause: f32,
    /// When > 0, an `Unknown` pause triggers a provisional display flush. Default 0.2.
    pub early_transcription_on_silence: f32,
    /// Pause-driven commits shorter than this are skipped (forced stops always commit). Default 0.3 s.
    pub min_utterance_secs: f32,
    /// Minimum idle gap the acoustic collaborator keeps between recordings. Default 0.0 s.
    pub min_gap_between_recordings: f32,
    /// Fraction of displayed text a partial must retract before the shrink
    /// debounce holds it back for one cycle. Default 0.3.
    pub retract_fraction: f32,
    /// Suppression window after a finalization during which redundant
    /// realtime updates are ignored. Default 0.5 s.
    pub finalize_suppress_window: f32,
    /// Largest single backspace burst sent to the output sink. Default 512.
    pub max_backspaces_per_update: usize,
    /// Beam size for the final inference pass. Default 5.
    pub beam_size: u32,
    /// Beam size for the realtime inference pass. Default 3.
    pub beam_size_realtime: u32,
    /// Inference batch size. Default 16.
    pub batch_size: u32,
    /// Silero VAD sensitivity in [0, 1]. Default 0.05.
    pub silero_sensitivity: f32,
    /// WebRTC VAD aggressiveness (0–3). Default 3.
    pub webrtc_sensitivity: u8,
    /// Uppercase the first alphabetic character of each sentence. Default true.
    pub auto_capitalize: bool,
    /// Append a terminal period when a sentence lacks one. Default true.
    pub auto_punctuation: bool,
    /// Spoken → written substitutions, applied longest-match-first.
    pub vocabulary: Vec<VocabularyEntry>,
    /// Voice-command trigger table.
    pub triggers: Vec<CommandTrigger>,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            end_of_sentence_pause: 0.45,
            unknown_sentence_pause: 0.7,
            mid_sentence_pause: 2.0,
            realtime_processing_pause: 0.02,
            early_transcription_on_silence: 0.2,
            min_utterance_secs: 0.3,
            min_gap_between_recordings: 0.0,
            retract_fraction: 0.3,
            finalize_suppress_window: 0.5,
            max_backspaces_per_update: 512,
            beam_size: 5,
            beam_size_realtime: 3,
            batch_size: 16,
            silero_sensitivity: 0.05,
            webrtc_sensitivity: 3,
            auto_capitalize: true,
            auto_punctuation: true,
            vocabulary: default_vocabulary(),
            triggers: CommandTrigger::default_table(),
        }
    }
}

impl TuningConfig {
    /// Reject structurally invalid parameter sets.
    ///
    /// The configuration collaborator validates before handing settings to
    /// this core, but the swap path re-checks so a broken snapshot can never
    /// drive boundary decisions.
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, value: f32) -> Result<()> {
            if value > 0.0 && value.is_finite() {
                Ok(())
            } else {
                Err(ScrivaError::ConfigInvalid(format!(
                    "{name} must be positive, got {value}"
                )))
            }
        }

        positive("end_of_sentence_pause", self.end_of_sentence_pause)?;
        positive("unknown_sentence_pause", self.unknown_sentence_pause)?;
        positive("mid_sentence_pause", self.mid_sentence_pause)?;
        positive("realtime_processing_pause", self.realtime_processing_pause)?;
        positive("min_utterance_secs", self.min_utterance_secs)?;

        if self.end_of_sentence_pause >= self.unknown_sentence_pause {
            return Err(ScrivaError::ConfigInvalid(format!(
                "end_of_sentence_pause ({}) must be below unknown_sentence_pause ({})",
                self.end_of_sentence_pause, self.unknown_sentence_pause
            )));
        }
        if self.unknown_sentence_pause >= self.mid_sentence_pause {
            return Err(ScrivaError::ConfigInvalid(format!(
                "unknown_sentence_pause ({}) must be below mid_sentence_pause ({})",
                self.unknown_sentence_pause, self.mid_sentence_pause
            )));
        }
        if !(0.0..=1.0).contains(&self.retract_fraction) {
            return Err(ScrivaError::ConfigInvalid(format!(
                "retract_fraction must be within [0, 1], got {}",
                self.retract_fraction
            )));
        }
        if self.max_backspaces_per_update == 0 {
            return Err(ScrivaError::ConfigInvalid(
                "max_backspaces_per_update must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Substitutions every installation starts with; the configuration
/// collaborator extends this table with user entries.
fn default_vocabulary() -> Vec<VocabularyEntry> {
    [
        ("github", "GitHub"),
        ("javascript", "JavaScript"),
        ("python", "Python"),
        ("youtube", "YouTube"),
        ("linkedin", "LinkedIn"),
        ("stackoverflow", "Stack Overflow"),
        ("openai", "OpenAI"),
        ("etc", "et cetera"),
        ("asap", "as soon as possible"),
        ("fyi", "for your information"),
    ]
    .into_iter()
    .map(|(spoken, written)| VocabularyEntry::new(spoken, written))
    .collect()
}

/// Atomically swappable handle to the live [`TuningConfig`].
///
/// Readers take cheap `Arc` snapshots; writers replace the whole snapshot.
/// An in-flight utterance keeps the `Arc` it captured at open, so a swap is
/// only observed from the next utterance boundary onward.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<TuningConfig>>>,
}

impl ConfigHandle {
    /// Wrap a validated configuration.
    pub fn new(config: TuningConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        })
    }

    /// Current snapshot. Cheap (one `Arc` clone), never blocks a writer for long.
    pub fn snapshot(&self) -> Arc<TuningConfig> {
        Arc::clone(&self.inner.read())
    }

    /// Replace the live configuration. Takes effect on the next utterance.
    pub fn swap(&self, config: TuningConfig) -> Result<()> {
        config.validate()?;
        *self.inner.write() = Arc::new(config);
        Ok(())
    }
}
