//! Output-side seams: text injection, command execution, notifications.
//!
//! The reconciliation core never talks to a keyboard driver or window system
//! directly. It plans [`DeliveryOp`] batches and hands them to whatever
//! `OutputSink` the host wires in; desktop hosts back these traits with
//! platform key injection, tests with in-memory recorders.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::command::CommandKind;
use crate::error::Result;

/// One primitive edit applied to the focused text field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOp {
    /// Delete `n` characters before the caret.
    Backspace(usize),
    /// Type `text` at the caret.
    Insert(String),
}

/// Receives planned edit batches.
///
/// `apply` must be atomic per call from the caller's perspective: either the
/// whole batch lands or the sink reports failure and the caller retries or
/// abandons the update.
pub trait OutputSink: Send {
    fn apply(&mut self, ops: &[DeliveryOp]) -> Result<()>;
}

/// Executes editor-level voice commands (newline, select-all, undo, ...).
pub trait CommandSurface: Send {
    fn execute(&mut self, kind: CommandKind) -> Result<()>;
}

/// Sounds the host may play on lifecycle edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundKind {
    Ready,
    Start,
    Stop,
    Command,
    Error,
    Notification,
}

/// User-facing notifications. All methods are fire-and-forget; a host that
/// cannot notify simply ignores the calls.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
    fn play(&self, sound: SoundKind);
}

/// Notifier that drops everything. Default for headless hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, title: &str, body: &str) {
        debug!(title, body, "notification suppressed");
    }

    fn play(&self, _sound: SoundKind) {}
}

/// In-memory sink that materializes ops into a text buffer.
///
/// Shared-handle design so a test or host UI can observe the buffer while
/// the delivery worker owns the sink itself.
#[derive(Debug, Default, Clone)]
pub struct BufferSink {
    buffer: Arc<Mutex<String>>,
    ops: Arc<Mutex<Vec<DeliveryOp>>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current buffer contents.
    pub fn text(&self) -> String {
        self.buffer.lock().clone()
    }

    /// Every op ever applied, in order.
    pub fn ops(&self) -> Vec<DeliveryOp> {
        self.ops.lock().clone()
    }

    /// Largest single backspace burst observed.
    pub fn max_backspace_burst(&self) -> usize {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                DeliveryOp::Backspace(n) => Some(*n),
                DeliveryOp::Insert(_) => None,
            })
            .max()
            .unwrap_or(0)
    }
}

impl OutputSink for BufferSink {
    fn apply(&mut self, ops: &[DeliveryOp]) -> Result<()> {
        let mut buffer = self.buffer.lock();
        let mut log = self.ops.lock();
        for op in ops {
            match op {
                DeliveryOp::Backspace(n) => {
                    for _ in 0..*n {
                        buffer.pop();
                    }
                }
                DeliveryOp::Insert(text) => buffer.push_str(text),
            }
            log.push(op.clone());
        }
        Ok(())
    }
}

/// Command surface that records executions without side effects.
#[derive(Debug, Default, Clone)]
pub struct RecordingSurface {
    executed: Arc<Mutex<Vec<CommandKind>>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed(&self) -> Vec<CommandKind> {
        self.executed.lock().clone()
    }
}

impl CommandSurface for RecordingSurface {
    fn execute(&mut self, kind: CommandKind) -> Result<()> {
        self.executed.lock().push(kind);
        Ok(())
    }
}
