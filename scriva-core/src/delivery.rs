//! Typing delivery: turns hypothesis updates and finalized sentences into
//! minimal edit batches on a dedicated worker thread.
//!
//! ## Threading
//!
//! The `OutputSink` wraps a blocking OS surface (key injection), so all sink
//! access happens on one worker thread fed by a crossbeam channel. Preview
//! updates are coalesced for `realtime_processing_pause` before they reach
//! the sink; settlement is synchronous so `stop()` can flush before
//! returning.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Local;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::command::{insert_timestamp_payload, CommandKind};
use crate::config::ConfigHandle;
use crate::error::{Result, ScrivaError};
use crate::sink::{CommandSurface, DeliveryOp, OutputSink};

/// Channel capacity; previews beyond this apply backpressure to the caller.
const CHANNEL_CAP: usize = 64;

/// Retry backoff after a failed sink batch.
const RETRY_BACKOFF: Duration = Duration::from_millis(5);

/// One element of a settled utterance, in spoken order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalItem {
    /// Literal text, typed into the document.
    Text(String),
    /// Editor command, executed at its position in the stream.
    Command(CommandKind),
}

/// Plans minimal edits between the currently materialized live region and a
/// target text. Owned by the worker thread; never shared.
#[derive(Debug)]
struct Typist {
    /// Text currently on screen for the live region.
    live: String,
    max_backspaces: usize,
}

impl Typist {
    fn new(max_backspaces: usize) -> Self {
        Self {
            live: String::new(),
            max_backspaces,
        }
    }

    /// Ops replacing the live region with `target`: erase back to the common
    /// prefix, then insert the new suffix. Backspaces are chunked so a single
    /// burst never exceeds `max_backspaces`.
    fn plan_replace(&self, target: &str) -> Vec<DeliveryOp> {
        let keep = self
            .live
            .chars()
            .zip(target.chars())
            .take_while(|(a, b)| a == b)
            .count();
        let erase = self.live.chars().count() - keep;
        let append: String = target.chars().skip(keep).collect();

        let mut ops = Vec::new();
        let mut remaining = erase;
        while remaining > 0 {
            let burst = remaining.min(self.max_backspaces);
            ops.push(DeliveryOp::Backspace(burst));
            remaining -= burst;
        }
        if !append.is_empty() {
            ops.push(DeliveryOp::Insert(append));
        }
        ops
    }

    fn plan_clear(&self) -> Vec<DeliveryOp> {
        self.plan_replace("")
    }

    fn commit(&mut self, target: String) {
        self.live = target;
    }
}

enum WorkerMsg {
    Preview(String),
    Settle {
        items: Vec<FinalItem>,
        ack: Sender<Result<()>>,
    },
    Command {
        kind: CommandKind,
        ack: Sender<Result<()>>,
    },
    Shutdown,
}

/// Handle to the delivery worker.
pub struct DeliveryEngine {
    tx: Sender<WorkerMsg>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryEngine {
    pub fn new(
        config: ConfigHandle,
        sink: Box<dyn OutputSink>,
        surface: Box<dyn CommandSurface>,
    ) -> Self {
        let (tx, rx) = bounded(CHANNEL_CAP);
        let handle = thread::Builder::new()
            .name("scriva-delivery".into())
            .spawn(move || Worker::new(config, sink, surface).run(rx))
            .ok();
        Self {
            tx,
            handle: Mutex::new(handle),
        }
    }

    /// Queue a live-region update. Coalesced on the worker; fire-and-forget.
    pub fn preview(&self, text: String) -> Result<()> {
        self.tx
            .send(WorkerMsg::Preview(text))
            .map_err(|_| ScrivaError::DeliveryFailed("delivery worker is gone".into()))
    }

    /// Replace the live region with the settled utterance and execute its
    /// commands in spoken order. Blocks until the sink confirmed the batch.
    pub fn settle(&self, items: Vec<FinalItem>) -> Result<()> {
        let (ack_tx, ack_rx) = bounded(1);
        self.tx
            .send(WorkerMsg::Settle { items, ack: ack_tx })
            .map_err(|_| ScrivaError::DeliveryFailed("delivery worker is gone".into()))?;
        ack_rx
            .recv()
            .map_err(|_| ScrivaError::DeliveryFailed("delivery worker died mid-settle".into()))?
    }

    /// Execute a single command outside a settlement (safe-early path).
    pub fn run_command(&self, kind: CommandKind) -> Result<()> {
        let (ack_tx, ack_rx) = bounded(1);
        self.tx
            .send(WorkerMsg::Command { kind, ack: ack_tx })
            .map_err(|_| ScrivaError::DeliveryFailed("delivery worker is gone".into()))?;
        ack_rx
            .recv()
            .map_err(|_| ScrivaError::DeliveryFailed("delivery worker died mid-command".into()))?
    }

    /// Stop the worker and join it. Further calls fail with `DeliveryFailed`.
    pub fn shutdown(&self) {
        let _ = self.tx.send(WorkerMsg::Shutdown);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeliveryEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    config: ConfigHandle,
    sink: Box<dyn OutputSink>,
    surface: Box<dyn CommandSurface>,
    typist: Typist,
    /// Most recent settlement: when it landed and the literal it typed.
    last_settle: Option<(Instant, String)>,
}

impl Worker {
    fn new(config: ConfigHandle, sink: Box<dyn OutputSink>, surface: Box<dyn CommandSurface>) -> Self {
        let max_backspaces = config.snapshot().max_backspaces_per_update;
        Self {
            config,
            sink,
            surface,
            typist: Typist::new(max_backspaces),
            last_settle: None,
        }
    }

    fn run(mut self, rx: Receiver<WorkerMsg>) {
        let mut pending: Option<WorkerMsg> = None;
        loop {
            let msg = match pending.take() {
                Some(msg) => msg,
                None => match rx.recv() {
                    Ok(msg) => msg,
                    Err(_) => break,
                },
            };

            match msg {
                WorkerMsg::Preview(first) => {
                    let mut latest = first;
                    let debounce =
                        Duration::from_secs_f32(self.config.snapshot().realtime_processing_pause);
                    let deadline = Instant::now() + debounce;
                    // Coalesce the burst; a non-preview message ends it and
                    // is handled right after this update lands.
                    loop {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        match rx.recv_timeout(remaining) {
                            Ok(WorkerMsg::Preview(text)) => latest = text,
                            Ok(other) => {
                                pending = Some(other);
                                break;
                            }
                            Err(RecvTimeoutError::Timeout) => break,
                            Err(RecvTimeoutError::Disconnected) => {
                                pending = Some(WorkerMsg::Shutdown);
                                break;
                            }
                        }
                    }
                    self.apply_preview(&latest);
                }
                WorkerMsg::Settle { items, ack } => {
                    let _ = ack.send(self.apply_settle(items));
                }
                WorkerMsg::Command { kind, ack } => {
                    let _ = ack.send(self.execute_command(kind));
                }
                WorkerMsg::Shutdown => break,
            }
        }
    }

    fn apply_preview(&mut self, target: &str) {
        if target == self.typist.live {
            return;
        }
        if self.is_suppressed(target) {
            debug!("preview suppressed inside post-settle window");
            return;
        }
        let ops = self.typist.plan_replace(target);
        match self.apply_with_retry(&ops) {
            Ok(()) => self.typist.commit(target.to_string()),
            // Screen state is unknown after a failed batch; drop the live
            // region so the next update rebuilds from scratch.
            Err(e) => {
                warn!(error = %e, "preview delivery failed, live region reset");
                self.typist.commit(String::new());
            }
        }
    }

    /// A preview that merely re-states (a prefix of) the just-settled text
    /// within the suppression window is a model echo, not new speech.
    fn is_suppressed(&self, target: &str) -> bool {
        let window = Duration::from_secs_f32(self.config.snapshot().finalize_suppress_window);
        match &self.last_settle {
            Some((at, settled)) if at.elapsed() < window => {
                let t = target.trim();
                t.is_empty() || settled.trim_end().starts_with(t)
            }
            _ => false,
        }
    }

    fn apply_settle(&mut self, items: Vec<FinalItem>) -> Result<()> {
        // Erase the live region first so the settled text replaces it.
        let clear = self.typist.plan_clear();
        self.apply_with_retry(&clear)?;
        self.typist.commit(String::new());

        let mut typed = String::new();
        for item in items {
            match item {
                FinalItem::Text(text) => {
                    if !text.is_empty() {
                        self.apply_with_retry(&[DeliveryOp::Insert(text.clone())])?;
                        typed.push_str(&text);
                    }
                }
                FinalItem::Command(kind) => self.execute_command(kind)?,
            }
        }

        // Trailing separator so the next utterance starts a fresh word.
        if !typed.is_empty() {
            self.apply_with_retry(&[DeliveryOp::Insert(" ".into())])?;
        }

        self.last_settle = Some((Instant::now(), typed));
        Ok(())
    }

    fn execute_command(&mut self, kind: CommandKind) -> Result<()> {
        // Timestamp insertion is plain typing; everything else is an editor
        // action the host surface performs.
        if kind == CommandKind::InsertTimestamp {
            let payload = insert_timestamp_payload(Local::now());
            return self.apply_with_retry(&[DeliveryOp::Insert(payload)]);
        }
        self.surface.execute(kind)
    }

    fn apply_with_retry(&mut self, ops: &[DeliveryOp]) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        if let Err(first) = self.sink.apply(ops) {
            warn!(error = %first, "sink batch failed, retrying once");
            thread::sleep(RETRY_BACKOFF);
            self.sink
                .apply(ops)
                .map_err(|e| ScrivaError::DeliveryFailed(e.to_string()))?;
        }
        Ok(())
    }
}
