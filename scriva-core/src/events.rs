//! Event types broadcast to host subscribers.
//!
//! Every event carries a monotonically increasing `seq` assigned by its
//! sender, so a UI can detect dropped messages on a lagging broadcast
//! receiver. JSON casing is camelCase for fields and lowercase for enums.

use serde::{Deserialize, Serialize};

use crate::command::CommandKind;
use crate::state::RecordingState;
use crate::transcript::Sentence;

/// Emitted whenever the session state machine transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangedEvent {
    pub seq: u64,
    pub state: RecordingState,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Emitted once per committed sentence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentenceEvent {
    pub seq: u64,
    pub sentence: Sentence,
}

/// Emitted when a voice command executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEvent {
    pub seq: u64,
    pub kind: CommandKind,
}

/// Emitted when the live-region preview changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewEvent {
    pub seq: u64,
    pub utterance_id: u64,
    pub text: String,
}
