//! Session state machine.
//!
//! ```text
//! Idle ─► Loading ─► Ready ─► Recording ─► Processing
//!                      ▲          ▲  │          │
//!                      │          │  └──────────┤  (continuous mode)
//!                      └──────────┴─────────────┘  (stop / finish)
//! ```
//!
//! One start request may queue while the model is still loading; it fires as
//! soon as `model_ready()` runs. A second start during loading is rejected
//! rather than queued behind the first.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{Result, ScrivaError};
use crate::events::StateChangedEvent;

/// Broadcast capacity for state events.
const BROADCAST_CAP: usize = 256;

/// Current phase of a dictation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// Engine created; no model loaded.
    Idle,
    /// Model load in progress; at most one start request may queue.
    Loading,
    /// Model loaded, microphone idle.
    Ready,
    /// Capturing speech; partials and silence observations are accepted.
    Recording,
    /// A finalization pass is running; finals still land, partials do not.
    Processing,
}

/// Outcome of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Recording began immediately.
    Started,
    /// Model still loading; recording begins when it is ready.
    Queued,
}

struct Inner {
    state: RecordingState,
    start_queued: bool,
}

/// Owns the session state and broadcasts every transition.
pub struct StateCoordinator {
    inner: Mutex<Inner>,
    events_tx: broadcast::Sender<StateChangedEvent>,
    seq: AtomicU64,
}

impl Default for StateCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCoordinator {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            inner: Mutex::new(Inner {
                state: RecordingState::Idle,
                start_queued: false,
            }),
            events_tx,
            seq: AtomicU64::new(0),
        }
    }

    /// Current state (snapshot).
    pub fn state(&self) -> RecordingState {
        self.inner.lock().state
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChangedEvent> {
        self.events_tx.subscribe()
    }

    /// Partials and silence observations only count while actively recording.
    pub fn accepts_partials(&self) -> bool {
        self.state() == RecordingState::Recording
    }

    /// Finals may arrive during the processing window as well.
    pub fn accepts_finals(&self) -> bool {
        matches!(
            self.state(),
            RecordingState::Recording | RecordingState::Processing
        )
    }

    /// `Idle → Loading`.
    pub fn begin_loading(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != RecordingState::Idle {
            return Err(ScrivaError::EngineUnavailable(format!(
                "cannot load model while {:?}",
                inner.state
            )));
        }
        self.set_state(&mut inner, RecordingState::Loading, None);
        Ok(())
    }

    /// `Loading → Ready`, or straight to `Recording` when a start request
    /// queued during the load. Returns `true` in the latter case.
    pub fn model_ready(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != RecordingState::Loading {
            debug!(state = ?inner.state, "model_ready outside of loading ignored");
            return false;
        }
        if inner.start_queued {
            inner.start_queued = false;
            self.set_state(&mut inner, RecordingState::Recording, None);
            true
        } else {
            self.set_state(&mut inner, RecordingState::Ready, None);
            false
        }
    }

    /// Request recording to begin.
    pub fn request_start(&self) -> Result<StartOutcome> {
        let mut inner = self.inner.lock();
        match inner.state {
            RecordingState::Ready => {
                self.set_state(&mut inner, RecordingState::Recording, None);
                Ok(StartOutcome::Started)
            }
            // Continuous mode: a start during the processing window resumes
            // capture without passing through Ready.
            RecordingState::Processing => {
                self.set_state(&mut inner, RecordingState::Recording, None);
                Ok(StartOutcome::Started)
            }
            RecordingState::Loading => {
                if inner.start_queued {
                    return Err(ScrivaError::EngineUnavailable(
                        "a start request is already queued behind the model load".into(),
                    ));
                }
                inner.start_queued = true;
                info!("start queued until model is ready");
                Ok(StartOutcome::Queued)
            }
            RecordingState::Recording => Err(ScrivaError::AlreadyRecording),
            RecordingState::Idle => Err(ScrivaError::EngineUnavailable(
                "no model loaded".into(),
            )),
        }
    }

    /// `Recording → Processing` while a finalization pass runs.
    pub fn begin_processing(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != RecordingState::Recording {
            return Err(ScrivaError::NotRecording);
        }
        self.set_state(&mut inner, RecordingState::Processing, None);
        Ok(())
    }

    /// `Processing → Recording` (continuous dictation).
    pub fn resume_recording(&self) {
        let mut inner = self.inner.lock();
        if inner.state == RecordingState::Processing {
            self.set_state(&mut inner, RecordingState::Recording, None);
        }
    }

    /// Stop capture. Idempotent: returns `false` when nothing was running.
    pub fn request_stop(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.start_queued = false;
        match inner.state {
            RecordingState::Recording | RecordingState::Processing => {
                self.set_state(&mut inner, RecordingState::Ready, None);
                true
            }
            _ => false,
        }
    }

    /// Drop to `Idle` after an unrecoverable collaborator failure.
    pub fn fail(&self, detail: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.start_queued = false;
        self.set_state(&mut inner, RecordingState::Idle, Some(detail.into()));
    }

    fn set_state(&self, inner: &mut Inner, state: RecordingState, detail: Option<String>) {
        if inner.state == state && detail.is_none() {
            return;
        }
        debug!(from = ?inner.state, to = ?state, "state transition");
        inner.state = state;
        let _ = self.events_tx.send(StateChangedEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            state,
            detail,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_recording() {
        let coord = StateCoordinator::new();
        coord.begin_loading().expect("idle to loading");
        assert!(!coord.model_ready());
        assert_eq!(coord.state(), RecordingState::Ready);
        assert_eq!(
            coord.request_start().expect("start"),
            StartOutcome::Started
        );
        assert!(coord.accepts_partials());
    }

    #[test]
    fn start_during_loading_queues_once() {
        let coord = StateCoordinator::new();
        coord.begin_loading().expect("loading");
        assert_eq!(coord.request_start().expect("queue"), StartOutcome::Queued);
        // Second start cannot queue behind the first.
        assert!(matches!(
            coord.request_start(),
            Err(ScrivaError::EngineUnavailable(_))
        ));
        // The queued start fires when the model lands.
        assert!(coord.model_ready());
        assert_eq!(coord.state(), RecordingState::Recording);
    }

    #[test]
    fn start_before_any_model_is_rejected() {
        let coord = StateCoordinator::new();
        assert!(matches!(
            coord.request_start(),
            Err(ScrivaError::EngineUnavailable(_))
        ));
    }

    #[test]
    fn double_start_while_recording_errors() {
        let coord = StateCoordinator::new();
        coord.begin_loading().expect("loading");
        coord.model_ready();
        coord.request_start().expect("start");
        assert!(matches!(
            coord.request_start(),
            Err(ScrivaError::AlreadyRecording)
        ));
    }

    #[test]
    fn processing_window_accepts_finals_not_partials() {
        let coord = StateCoordinator::new();
        coord.begin_loading().expect("loading");
        coord.model_ready();
        coord.request_start().expect("start");
        coord.begin_processing().expect("processing");
        assert!(!coord.accepts_partials());
        assert!(coord.accepts_finals());
        coord.resume_recording();
        assert!(coord.accepts_partials());
    }

    #[test]
    fn stop_is_idempotent() {
        let coord = StateCoordinator::new();
        coord.begin_loading().expect("loading");
        coord.model_ready();
        coord.request_start().expect("start");
        assert!(coord.request_stop());
        assert!(!coord.request_stop());
        assert_eq!(coord.state(), RecordingState::Ready);
    }

    #[test]
    fn stop_discards_a_queued_start() {
        let coord = StateCoordinator::new();
        coord.begin_loading().expect("loading");
        coord.request_start().expect("queue");
        coord.request_stop();
        assert!(!coord.model_ready());
        assert_eq!(coord.state(), RecordingState::Ready);
    }

    #[test]
    fn failure_resets_to_idle_with_detail() {
        let coord = StateCoordinator::new();
        let mut rx = coord.subscribe();
        coord.begin_loading().expect("loading");
        coord.fail("model file missing");
        assert_eq!(coord.state(), RecordingState::Idle);

        let first = rx.try_recv().expect("loading event");
        assert_eq!(first.state, RecordingState::Loading);
        let second = rx.try_recv().expect("failure event");
        assert_eq!(second.state, RecordingState::Idle);
        assert_eq!(second.detail.as_deref(), Some("model file missing"));
    }

    #[test]
    fn transitions_broadcast_with_increasing_seq() {
        let coord = StateCoordinator::new();
        let mut rx = coord.subscribe();
        coord.begin_loading().expect("loading");
        coord.model_ready();
        coord.request_start().expect("start");

        let mut last_seq = None;
        for _ in 0..3 {
            let event = rx.try_recv().expect("event");
            if let Some(prev) = last_seq {
                assert!(event.seq > prev);
            }
            last_seq = Some(event.seq);
        }
    }
}
