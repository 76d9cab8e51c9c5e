//! # scriva-core
//!
//! Reconciliation and delivery core for continuous speech dictation.
//!
//! ## Architecture
//!
//! ```text
//! Recognizer partials/finals ─► DictationEngine ─► HypothesisStabilizer
//! VAD silence observations ──────────┤                    │
//!                              PauseClassifier      display deltas
//!                                    │                    │
//!                             SentenceFinalizer ─► DeliveryEngine (worker)
//!                                    │                    │
//!                          CommittedTranscript      OutputSink / CommandSurface
//! ```
//!
//! The engine owns no audio and no recognition model; capture-side
//! collaborators feed it text hypotheses and silence durations, and it types
//! reconciled sentences through the host's `OutputSink`. All sink access
//! happens on one delivery worker thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod boundary;
pub mod command;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod events;
pub mod sink;
pub mod stabilize;
pub mod state;
pub mod transcript;

// Convenience re-exports for downstream crates
pub use boundary::{BoundaryDecision, PauseClassifier, PauseEvent};
pub use command::{CommandInterpreter, CommandKind, CommandTrigger, Interpretation};
pub use config::{ConfigHandle, TuningConfig, VocabularyEntry};
pub use delivery::{DeliveryEngine, FinalItem};
pub use engine::DictationEngine;
pub use error::ScrivaError;
pub use events::{CommandEvent, PreviewEvent, SentenceEvent, StateChangedEvent};
pub use sink::{
    BufferSink, CommandSurface, DeliveryOp, Notifier, NullNotifier, OutputSink, RecordingSurface,
    SoundKind,
};
pub use stabilize::{DisplayDelta, HypothesisStabilizer};
pub use state::{RecordingState, StateCoordinator};
pub use transcript::{CommittedTranscript, Sentence, SentenceFinalizer, TranscriptStats};
