//! `DictationEngine` — top-level reconciliation controller.
//!
//! ## Lifecycle
//!
//! ```text
//! DictationEngine::new()
//!     └─► begin_model_load()    → Loading
//!         └─► on_model_ready()  → Ready (a queued start fires here)
//!             └─► start()       → Recording
//!                 └─► stop()    → open utterance force-finalized, Ready
//! ```
//!
//! ## Concurrency
//!
//! One utterance is open at a time, owned behind a mutex. Every hypothesis
//! update follows the same discipline: snapshot under the lock, compute,
//! then talk to the delivery worker with no lock held. The delivery worker
//! owns the blocking output sink; `settle` is synchronous so `stop()`
//! returns only after the last sentence reached the sink.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    boundary::{BoundaryDecision, PauseClassifier},
    command::{CommandInterpreter, CommandKind, Interpretation, OutputItem},
    config::{ConfigHandle, TuningConfig},
    delivery::{DeliveryEngine, FinalItem},
    error::{Result, ScrivaError},
    events::{CommandEvent, PreviewEvent, SentenceEvent, StateChangedEvent},
    sink::{CommandSurface, Notifier, OutputSink, SoundKind},
    stabilize::{preprocess_partial, HypothesisStabilizer},
    state::{RecordingState, StartOutcome, StateCoordinator},
    transcript::{shared_transcript, SentenceFinalizer, SharedTranscript, TranscriptStats},
};

/// Broadcast channel capacity for sentence/command/preview events.
const BROADCAST_CAP: usize = 256;

/// The in-flight utterance and the per-utterance collaborators that were
/// frozen when it opened.
struct OpenUtterance {
    id: u64,
    opened_at: Instant,
    config: Arc<TuningConfig>,
    stabilizer: HypothesisStabilizer,
    classifier: PauseClassifier,
}

/// The top-level engine handle.
///
/// `DictationEngine` is `Send + Sync`; all fields use interior mutability,
/// so hosts wrap it in an `Arc` and call it from capture callbacks, UI
/// commands and async tasks alike.
pub struct DictationEngine {
    config: ConfigHandle,
    coordinator: StateCoordinator,
    finalizer: SentenceFinalizer,
    delivery: DeliveryEngine,
    notifier: Box<dyn Notifier>,
    interpreter: Mutex<CommandInterpreter>,
    open: Mutex<Option<OpenUtterance>>,
    /// When the last recording stopped; enforces `min_gap_between_recordings`.
    last_stop: Mutex<Option<Instant>>,
    sentence_tx: broadcast::Sender<SentenceEvent>,
    command_tx: broadcast::Sender<CommandEvent>,
    preview_tx: broadcast::Sender<PreviewEvent>,
    seq: AtomicU64,
}

impl DictationEngine {
    /// Create an engine wired to the host's output seams. Does not load a
    /// model — call `begin_model_load()` and feed `on_model_ready()`.
    pub fn new(
        config: TuningConfig,
        sink: Box<dyn OutputSink>,
        surface: Box<dyn CommandSurface>,
        notifier: Box<dyn Notifier>,
    ) -> Result<Self> {
        let config = ConfigHandle::new(config)?;
        let delivery = DeliveryEngine::new(config.clone(), sink, surface);
        let interpreter = CommandInterpreter::new(config.snapshot().triggers.clone());
        let (sentence_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (command_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (preview_tx, _) = broadcast::channel(BROADCAST_CAP);

        Ok(Self {
            config,
            coordinator: StateCoordinator::new(),
            finalizer: SentenceFinalizer::new(shared_transcript()),
            delivery,
            notifier,
            interpreter: Mutex::new(interpreter),
            open: Mutex::new(None),
            last_stop: Mutex::new(None),
            sentence_tx,
            command_tx,
            preview_tx,
            seq: AtomicU64::new(0),
        })
    }

    // ── Model lifecycle ──────────────────────────────────────────────────

    /// Signal that the recognition collaborator started loading its model.
    pub fn begin_model_load(&self) -> Result<()> {
        self.coordinator.begin_loading()?;
        info!("model load started");
        Ok(())
    }

    /// Signal that the model finished loading. Fires a start request that
    /// queued during the load.
    pub fn on_model_ready(&self) {
        if self.coordinator.model_ready() {
            info!("model ready, queued start fired");
            self.notifier.play(SoundKind::Start);
        } else if self.coordinator.state() == RecordingState::Ready {
            info!("model ready");
            self.notifier.play(SoundKind::Ready);
        }
    }

    /// Unrecoverable collaborator failure. Flushes the open utterance, then
    /// drops the session to `Idle`.
    pub fn on_engine_error(&self, kind: &str, message: &str) {
        warn!(kind, message, "engine collaborator failure");
        // Same rule as stop(): close the recording window before flushing
        // so nothing new is accepted while the session winds down.
        let _ = self.coordinator.begin_processing();
        let taken = self.open.lock().take();
        if let Some(utt) = taken {
            if let Err(e) = self.flush_utterance(utt) {
                warn!(error = %e, "flush during failure handling also failed");
            }
        }
        self.coordinator.fail(format!("{kind}: {message}"));
        self.notifier.play(SoundKind::Error);
        self.notifier.notify("Dictation error", message);
    }

    // ── Session control ──────────────────────────────────────────────────

    /// Begin recording. While the model is loading, one request queues and
    /// fires from `on_model_ready()`.
    ///
    /// A restart inside `min_gap_between_recordings` is rejected with
    /// `EngineUnavailable` rather than waited out; no call in this core
    /// blocks longer than the debounce window.
    pub fn start(&self) -> Result<()> {
        let gap = self.config.snapshot().min_gap_between_recordings;
        if gap > 0.0 {
            let last_stop = *self.last_stop.lock();
            if let Some(stopped_at) = last_stop {
                let since = stopped_at.elapsed();
                let gap = Duration::from_secs_f32(gap);
                if since < gap {
                    return Err(ScrivaError::EngineUnavailable(format!(
                        "restart too soon, {:?} of the inter-recording gap remains",
                        gap - since
                    )));
                }
            }
        }
        match self.coordinator.request_start()? {
            StartOutcome::Started => {
                info!("recording started");
                self.notifier.play(SoundKind::Start);
            }
            StartOutcome::Queued => {}
        }
        Ok(())
    }

    /// Stop recording. Idempotent. The open utterance is force-finalized
    /// (bypassing `min_utterance_secs`) and delivery is flushed before this
    /// returns, so no spoken text is lost.
    pub fn stop(&self) -> Result<()> {
        // Enter the processing window before taking the utterance: a partial
        // racing the stop must be rejected, not opened as a fresh utterance
        // that would leak into the next session. Fails harmlessly when the
        // session is already past Recording.
        let _ = self.coordinator.begin_processing();
        let taken = self.open.lock().take();
        if let Some(utt) = taken {
            self.flush_utterance(utt)?;
        }
        if self.coordinator.request_stop() {
            *self.last_stop.lock() = Some(Instant::now());
            info!("recording stopped");
            self.notifier.play(SoundKind::Stop);
        }
        Ok(())
    }

    /// Stop the session and join the delivery worker.
    pub fn shutdown(&self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "stop during shutdown failed");
        }
        self.delivery.shutdown();
    }

    // ── Recognition inbound ──────────────────────────────────────────────

    /// Ingest a revised partial hypothesis for `utterance_id`.
    ///
    /// Dropped while not recording, and dropped for ids that already
    /// finalized (a stale event from a slow producer). A fresh id while an
    /// older utterance is still open closes the older one first.
    pub fn on_partial(&self, text: &str, utterance_id: u64, timestamp: f64) -> Result<()> {
        if !self.coordinator.accepts_partials() {
            debug!(utterance_id, "partial outside recording dropped");
            return Ok(());
        }
        if self.finalizer.is_finalized(utterance_id) {
            debug!(utterance_id, timestamp, "stale partial for closed utterance dropped");
            return Ok(());
        }

        let superseded = {
            let mut open = self.open.lock();
            match open.as_ref() {
                Some(u) if u.id != utterance_id => open.take(),
                _ => None,
            }
        };
        if let Some(utt) = superseded {
            debug!(closed = utt.id, opening = utterance_id, "utterance superseded");
            self.finalize_utterance(utt)?;
        }

        let processed = preprocess_partial(text);
        let (fire_early, preview) = {
            let mut open = self.open.lock();
            let utt = open.get_or_insert_with(|| self.open_utterance(utterance_id));
            let fire_early = self.interpreter.lock().observe_partial(&processed);
            let preview = utt
                .stabilizer
                .update(&processed)
                .map(|_| utt.stabilizer.displayed().to_string());
            (fire_early, preview)
        };

        for kind in fire_early {
            match self.delivery.run_command(kind) {
                Ok(()) => {
                    self.notifier.play(SoundKind::Command);
                    let _ = self.command_tx.send(CommandEvent {
                        seq: self.next_seq(),
                        kind,
                    });
                }
                Err(e) => self.absorb_delivery_fault("early command", e),
            }
        }
        if let Some(text) = preview {
            if let Err(e) = self.delivery.preview(text.clone()) {
                self.absorb_delivery_fault("preview", e);
            } else {
                let _ = self.preview_tx.send(PreviewEvent {
                    seq: self.next_seq(),
                    utterance_id,
                    text,
                });
            }
        }
        Ok(())
    }

    /// Ingest a silence observation, classified with the thresholds frozen
    /// when the open utterance began. Threshold-only operation; prior speech
    /// is assumed complete.
    pub fn on_silence(&self, duration_secs: f32) -> Result<()> {
        self.on_silence_hint(duration_secs, true)
    }

    /// `on_silence` with an explicit completeness hint from a prosody
    /// heuristic, when the capture side has one.
    pub fn on_silence_hint(&self, duration_secs: f32, speech_complete: bool) -> Result<()> {
        if !self.coordinator.accepts_partials() {
            return Ok(());
        }

        let action = {
            let mut open = self.open.lock();
            let Some(utt) = open.as_mut() else {
                return Ok(());
            };
            match utt.classifier.classify(duration_secs, speech_complete) {
                BoundaryDecision::MidSentence => return Ok(()),
                BoundaryDecision::Unknown => {
                    if !utt.classifier.provisional_flush_enabled() {
                        return Ok(());
                    }
                    SilenceAction::Flush(utt.stabilizer.latest_raw().to_string())
                }
                BoundaryDecision::EndOfSentence => {
                    let elapsed = utt.opened_at.elapsed().as_secs_f32();
                    if elapsed < utt.config.min_utterance_secs {
                        debug!(
                            utterance_id = utt.id,
                            elapsed, "pause commit skipped, utterance too short"
                        );
                        return Ok(());
                    }
                    match open.take() {
                        Some(utt) => SilenceAction::Finalize(utt),
                        None => return Ok(()),
                    }
                }
            }
        };

        match action {
            SilenceAction::Flush(text) => {
                if !text.is_empty() {
                    if let Err(e) = self.delivery.preview(text) {
                        self.absorb_delivery_fault("provisional flush", e);
                    }
                }
                Ok(())
            }
            SilenceAction::Finalize(utt) => self.finalize_utterance(utt),
        }
    }

    /// Ingest the recognition model's final text for `utterance_id`.
    ///
    /// A final for a pause-committed id is a benign duplicate and is
    /// dropped. A final for the open utterance supersedes its hypotheses. A
    /// final for an id never seen before still commits (the model can skip
    /// partials on very short speech).
    pub fn on_final(&self, text: &str, utterance_id: u64, timestamp: f64) -> Result<()> {
        if self.finalizer.is_finalized(utterance_id) {
            debug!(utterance_id, timestamp, "duplicate final dropped");
            return Ok(());
        }
        if !self.coordinator.accepts_finals() {
            debug!(utterance_id, "final outside session dropped");
            return Ok(());
        }

        let taken = {
            let mut open = self.open.lock();
            match open.as_ref() {
                Some(u) if u.id == utterance_id => open.take(),
                _ => None,
            }
        };
        let mut utt = match taken {
            Some(utt) => utt,
            None => self.open_utterance(utterance_id),
        };
        utt.stabilizer.update(&preprocess_partial(text));
        self.finalize_utterance(utt)
    }

    // ── Configuration ────────────────────────────────────────────────────

    pub fn config(&self) -> ConfigHandle {
        self.config.clone()
    }

    /// Swap the live configuration. Thresholds apply from the next
    /// utterance; the command-trigger table applies from the next scan.
    pub fn update_config(&self, config: TuningConfig) -> Result<()> {
        self.config.swap(config)?;
        let triggers = self.config.snapshot().triggers.clone();
        *self.interpreter.lock() = CommandInterpreter::new(triggers);
        info!("configuration swapped");
        Ok(())
    }

    // ── Observation ──────────────────────────────────────────────────────

    pub fn state(&self) -> RecordingState {
        self.coordinator.state()
    }

    pub fn transcript(&self) -> SharedTranscript {
        self.finalizer.transcript()
    }

    pub fn transcript_stats(&self) -> TranscriptStats {
        self.finalizer.transcript().read().stats()
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<StateChangedEvent> {
        self.coordinator.subscribe()
    }

    pub fn subscribe_sentences(&self) -> broadcast::Receiver<SentenceEvent> {
        self.sentence_tx.subscribe()
    }

    pub fn subscribe_commands(&self) -> broadcast::Receiver<CommandEvent> {
        self.command_tx.subscribe()
    }

    pub fn subscribe_previews(&self) -> broadcast::Receiver<PreviewEvent> {
        self.preview_tx.subscribe()
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn open_utterance(&self, id: u64) -> OpenUtterance {
        let config = self.config.snapshot();
        info!(utterance_id = id, "utterance opened");
        OpenUtterance {
            id,
            opened_at: Instant::now(),
            stabilizer: HypothesisStabilizer::new(config.retract_fraction),
            classifier: PauseClassifier::new(Arc::clone(&config)),
            config,
        }
    }

    /// Close an utterance from a live recording session: enter the
    /// processing window, flush, then resume capture (continuous mode).
    fn finalize_utterance(&self, utt: OpenUtterance) -> Result<()> {
        let processing = self.coordinator.begin_processing().is_ok();
        let result = self.flush_utterance(utt);
        if processing {
            // Continuous dictation: capture keeps running between sentences.
            self.coordinator.resume_recording();
        }
        result
    }

    /// Polish, excise commands, commit the sentence and settle delivery.
    /// Performs no state transitions; callers own the session window.
    fn flush_utterance(&self, mut utt: OpenUtterance) -> Result<()> {
        let raw = utt.stabilizer.finalize();

        let interp = {
            let mut interpreter = self.interpreter.lock();
            if raw.is_empty() {
                interpreter.reset();
                None
            } else {
                let pure = interpreter.scan(&raw).is_pure_command();
                let polished = SentenceFinalizer::polish(&utt.config, &raw, pure);
                Some(interpreter.commit_final(&polished))
            }
        };

        match interp {
            None => {
                debug!(utterance_id = utt.id, "empty utterance closed");
                self.finalizer.mark_finalized(utt.id);
                Ok(())
            }
            Some(interp) => self.commit_and_deliver(&utt, interp),
        }
    }

    fn commit_and_deliver(&self, utt: &OpenUtterance, interp: Interpretation) -> Result<()> {
        let stop_requested = interp
            .commands
            .iter()
            .any(|m| m.kind == CommandKind::StopDictation);

        // Stop-dictation is a session command, not an editor action; it is
        // excluded from the settlement stream and handled below.
        let items: Vec<FinalItem> = interp
            .interleaved()
            .into_iter()
            .filter_map(|item| match item {
                OutputItem::Text(text) => Some(FinalItem::Text(text.to_string())),
                OutputItem::Command(CommandKind::StopDictation) => None,
                OutputItem::Command(kind) => Some(FinalItem::Command(kind)),
            })
            .collect();

        let literal = interp.literal.trim().to_string();
        if literal.is_empty() {
            self.finalizer.mark_finalized(utt.id);
        } else if let Some(sentence) = self.finalizer.commit(utt.id, literal) {
            let _ = self.sentence_tx.send(SentenceEvent {
                seq: self.next_seq(),
                sentence,
            });
        }

        if let Err(e) = self.delivery.settle(items) {
            // The sentence already lives in the transcript; only the typing
            // surface missed it.
            self.absorb_delivery_fault("settlement", e);
        }
        for m in &interp.commands {
            self.notifier.play(SoundKind::Command);
            let _ = self.command_tx.send(CommandEvent {
                seq: self.next_seq(),
                kind: m.kind,
            });
        }

        if stop_requested {
            self.stop()?;
        }
        Ok(())
    }

    /// Log and surface a delivery fault without returning it: spoken text is
    /// safe in the transcript, and the recognition callbacks that drive this
    /// engine have no way to act on a typing-surface error.
    fn absorb_delivery_fault(&self, stage: &str, error: ScrivaError) {
        warn!(stage, error = %error, "delivery fault absorbed");
        self.notifier.notify("Delivery failed", &error.to_string());
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

enum SilenceAction {
    Flush(String),
    Finalize(OpenUtterance),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{BufferSink, NullNotifier, RecordingSurface};

    fn test_config() -> TuningConfig {
        let mut config = TuningConfig::default();
        config.min_utterance_secs = 0.001;
        config.realtime_processing_pause = 0.005;
        config
    }

    fn engine_with(config: TuningConfig) -> (DictationEngine, BufferSink, RecordingSurface) {
        let sink = BufferSink::new();
        let surface = RecordingSurface::new();
        let engine = DictationEngine::new(
            config,
            Box::new(sink.clone()),
            Box::new(surface.clone()),
            Box::new(NullNotifier),
        )
        .expect("valid config");
        (engine, sink, surface)
    }

    fn recording_engine(config: TuningConfig) -> (DictationEngine, BufferSink, RecordingSurface) {
        let (engine, sink, surface) = engine_with(config);
        engine.begin_model_load().expect("load");
        engine.on_model_ready();
        engine.start().expect("start");
        (engine, sink, surface)
    }

    fn settle_previews(engine: &DictationEngine) {
        // Previews are asynchronous; give the worker time to drain.
        std::thread::sleep(Duration::from_millis(40));
        let _ = engine;
    }

    #[test]
    fn growing_hypothesis_lands_as_one_polished_sentence() {
        let (engine, sink, _surface) = recording_engine(test_config());
        for text in ["he", "hell", "hello wor", "hello world"] {
            engine.on_partial(text, 1, 0.0).expect("partial");
        }
        std::thread::sleep(Duration::from_millis(10));
        engine.on_silence(0.5).expect("silence");

        assert_eq!(sink.text(), "Hello world. ");
        let transcript = engine.transcript();
        let guard = transcript.read();
        assert_eq!(guard.len(), 1);
        assert_eq!(guard.last().map(|s| s.text.as_str()), Some("Hello world."));
        drop(guard);
        // Continuous mode: still recording after the commit.
        assert_eq!(engine.state(), RecordingState::Recording);
    }

    #[test]
    fn late_model_final_after_pause_commit_is_dropped() {
        let (engine, sink, _surface) = recording_engine(test_config());
        engine.on_partial("hello world", 1, 0.0).expect("partial");
        std::thread::sleep(Duration::from_millis(10));
        engine.on_silence(0.5).expect("silence");
        assert_eq!(sink.text(), "Hello world. ");

        engine.on_final("hello world", 1, 1.0).expect("final");
        assert_eq!(sink.text(), "Hello world. ");
        assert_eq!(engine.transcript().read().len(), 1);
    }

    #[test]
    fn forced_stop_commits_a_short_fragment() {
        // Default min_utterance_secs would block a pause commit this early,
        // but a stop must never drop spoken text.
        let (engine, sink, _surface) = recording_engine(TuningConfig::default());
        engine.on_partial("the quick br", 1, 0.0).expect("partial");
        engine.stop().expect("stop");

        assert_eq!(sink.text(), "The quick br. ");
        assert_eq!(engine.state(), RecordingState::Ready);
        assert_eq!(
            engine.transcript().read().last().map(|s| s.text.clone()),
            Some("The quick br.".to_string())
        );
    }

    #[test]
    fn stop_is_idempotent() {
        let (engine, sink, _surface) = recording_engine(test_config());
        engine.on_partial("once", 1, 0.0).expect("partial");
        engine.stop().expect("stop");
        engine.stop().expect("second stop");
        assert_eq!(sink.text(), "Once. ");
        assert_eq!(engine.transcript().read().len(), 1);
    }

    #[test]
    fn pause_commit_respects_minimum_utterance_length() {
        let mut config = test_config();
        config.min_utterance_secs = 30.0;
        let (engine, _sink, _surface) = recording_engine(config);
        engine.on_partial("hello", 1, 0.0).expect("partial");
        engine.on_silence(0.5).expect("silence");
        // Too young for a pause commit; still open.
        assert!(engine.transcript().read().is_empty());
        // A forced stop commits it anyway.
        engine.stop().expect("stop");
        assert_eq!(engine.transcript().read().len(), 1);
    }

    #[test]
    fn embedded_command_is_excised_and_executed_in_order() {
        let (engine, sink, surface) = recording_engine(test_config());
        engine
            .on_partial("turn on the lights new line please", 1, 0.0)
            .expect("partial");
        std::thread::sleep(Duration::from_millis(10));
        engine.on_silence(0.5).expect("silence");

        assert_eq!(sink.text(), "Turn on the lights please. ");
        assert_eq!(surface.executed(), vec![CommandKind::NewLine]);
        assert_eq!(
            engine.transcript().read().last().map(|s| s.text.clone()),
            Some("Turn on the lights please.".to_string())
        );
    }

    #[test]
    fn spoken_stop_command_ends_the_session_without_typing() {
        let (engine, sink, _surface) = recording_engine(test_config());
        engine.on_partial("stop recording", 1, 0.0).expect("partial");
        std::thread::sleep(Duration::from_millis(10));
        engine.on_silence(0.5).expect("silence");

        assert_eq!(engine.state(), RecordingState::Ready);
        assert_eq!(sink.text(), "");
        assert!(engine.transcript().read().is_empty());
    }

    #[test]
    fn config_swap_does_not_change_the_open_utterance() {
        let (engine, _sink, _surface) = recording_engine(test_config());
        engine.on_partial("alpha", 1, 0.0).expect("partial");

        let mut aggressive = test_config();
        aggressive.end_of_sentence_pause = 0.05;
        aggressive.unknown_sentence_pause = 0.06;
        aggressive.mid_sentence_pause = 0.07;
        engine.update_config(aggressive).expect("swap");

        std::thread::sleep(Duration::from_millis(10));
        // Below the snapshot's thresholds, above the new ones.
        engine.on_silence(0.1).expect("silence");
        assert!(engine.transcript().read().is_empty());
    }

    #[test]
    fn stale_partial_for_a_closed_utterance_is_dropped() {
        let (engine, sink, _surface) = recording_engine(test_config());
        engine.on_partial("hello world", 1, 0.0).expect("partial");
        std::thread::sleep(Duration::from_millis(10));
        engine.on_silence(0.5).expect("silence");

        engine.on_partial("zombie text", 1, 2.0).expect("stale partial");
        settle_previews(&engine);
        assert_eq!(sink.text(), "Hello world. ");
    }

    #[test]
    fn new_utterance_id_supersedes_the_open_one() {
        let (engine, sink, _surface) = recording_engine(test_config());
        engine.on_partial("one", 1, 0.0).expect("partial");
        std::thread::sleep(Duration::from_millis(10));
        engine.on_partial("two", 2, 1.0).expect("partial");
        engine.stop().expect("stop");

        assert_eq!(sink.text(), "One. Two. ");
        let transcript = engine.transcript();
        let guard = transcript.read();
        let texts: Vec<&str> = guard.sentences().iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["One.", "Two."]);
    }

    #[test]
    fn partials_before_start_are_ignored() {
        let (engine, sink, _surface) = engine_with(test_config());
        engine.on_partial("too early", 1, 0.0).expect("ignored");
        settle_previews(&engine);
        assert_eq!(sink.text(), "");
        assert!(engine.transcript().read().is_empty());
    }

    #[test]
    fn final_without_prior_partials_still_commits() {
        let (engine, sink, _surface) = recording_engine(test_config());
        engine.on_final("short burst", 3, 0.0).expect("final");
        assert_eq!(sink.text(), "Short burst. ");
        assert_eq!(engine.transcript().read().len(), 1);
    }

    #[test]
    fn queued_start_fires_on_model_ready() {
        let (engine, sink, _surface) = engine_with(test_config());
        engine.begin_model_load().expect("load");
        engine.start().expect("queued start");
        assert_eq!(engine.state(), RecordingState::Loading);
        engine.on_model_ready();
        assert_eq!(engine.state(), RecordingState::Recording);

        engine.on_partial("works", 1, 0.0).expect("partial");
        engine.stop().expect("stop");
        assert_eq!(sink.text(), "Works. ");
    }

    #[test]
    fn engine_error_flushes_and_drops_to_idle() {
        let (engine, sink, _surface) = recording_engine(test_config());
        engine.on_partial("half a thought", 1, 0.0).expect("partial");
        engine.on_engine_error("model", "inference backend crashed");

        assert_eq!(engine.state(), RecordingState::Idle);
        assert_eq!(sink.text(), "Half a thought. ");
    }

    #[test]
    fn sentence_and_command_events_are_broadcast() {
        let (engine, _sink, _surface) = recording_engine(test_config());
        let mut sentences = engine.subscribe_sentences();
        let mut commands = engine.subscribe_commands();

        engine
            .on_partial("alpha new line", 1, 0.0)
            .expect("partial");
        std::thread::sleep(Duration::from_millis(10));
        engine.on_silence(0.5).expect("silence");

        let sentence = sentences.try_recv().expect("sentence event");
        assert_eq!(sentence.sentence.text, "Alpha.");
        let command = commands.try_recv().expect("command event");
        assert_eq!(command.kind, CommandKind::NewLine);
    }

    #[test]
    fn stop_never_reopens_the_recording_window() {
        let (engine, _sink, _surface) = recording_engine(test_config());
        engine.on_partial("half a thought", 1, 0.0).expect("partial");

        // Subscribe after reaching Recording so only the stop's own
        // transitions are observed.
        let mut states = engine.subscribe_state();
        engine.stop().expect("stop");

        let mut seen = Vec::new();
        while let Ok(ev) = states.try_recv() {
            seen.push(ev.state);
        }
        // The flush must run inside the processing window; Recording never
        // reappears between Processing and Ready.
        assert_eq!(
            seen,
            vec![RecordingState::Processing, RecordingState::Ready]
        );
    }

    #[test]
    fn restart_inside_min_gap_is_rejected_not_blocked() {
        let mut config = test_config();
        config.min_gap_between_recordings = 30.0;
        let (engine, _sink, _surface) = recording_engine(config);
        engine.on_partial("first", 1, 0.0).expect("partial");
        engine.stop().expect("stop");

        let begun = Instant::now();
        let outcome = engine.start();
        assert!(
            matches!(outcome, Err(ScrivaError::EngineUnavailable(_))),
            "restart inside the gap must be rejected, got {outcome:?}"
        );
        assert!(
            begun.elapsed() < Duration::from_millis(100),
            "rejection must not wait out the gap"
        );
        assert_eq!(engine.state(), RecordingState::Ready);
    }

    #[derive(Clone)]
    struct FailingSink;

    impl crate::sink::OutputSink for FailingSink {
        fn apply(&mut self, _ops: &[crate::sink::DeliveryOp]) -> Result<()> {
            Err(ScrivaError::DeliveryFailed("surface went away".into()))
        }
    }

    #[test]
    fn sink_failure_never_escapes_the_recognition_handlers() {
        let surface = RecordingSurface::new();
        let engine = DictationEngine::new(
            test_config(),
            Box::new(FailingSink),
            Box::new(surface.clone()),
            Box::new(NullNotifier),
        )
        .expect("valid config");
        engine.begin_model_load().expect("load");
        engine.on_model_ready();
        engine.start().expect("start");

        engine.on_partial("hello world", 1, 0.0).expect("partial");
        std::thread::sleep(Duration::from_millis(10));
        engine.on_silence(0.5).expect("silence");
        engine.on_final("second thought", 2, 1.0).expect("final");
        engine.stop().expect("stop");

        // The typing surface missed everything, but the transcript did not.
        let transcript = engine.transcript();
        let guard = transcript.read();
        let texts: Vec<&str> = guard.sentences().iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["Hello world.", "Second thought."]);
        drop(guard);
        engine.shutdown();
    }

    #[test]
    fn transcript_stats_accumulate() {
        let (engine, _sink, _surface) = recording_engine(test_config());
        engine.on_partial("hello world", 1, 0.0).expect("partial");
        std::thread::sleep(Duration::from_millis(10));
        engine.on_silence(0.5).expect("silence");

        let stats = engine.transcript_stats();
        assert_eq!(stats.sentences, 1);
        assert_eq!(stats.words, 2);
    }
}
