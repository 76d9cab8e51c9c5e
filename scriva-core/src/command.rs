//! Voice-command interpretation.
//!
//! Scans dictated text for trigger phrases, excises the matched spans from
//! the literal output and reports the commands in spoken order. Matching is
//! case-insensitive, whole-word and longest-trigger-first so "new line" can
//! never be shadowed by a shorter "new" trigger.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Action a matched trigger phrase maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    NewLine,
    NewParagraph,
    SelectAll,
    CopyThat,
    PasteThat,
    UndoThat,
    DeleteThat,
    SaveDocument,
    InsertTimestamp,
    StopDictation,
}

impl CommandKind {
    /// Non-destructive commands may fire on a partial hypothesis before the
    /// utterance is finalized. Everything else waits for the final commit so
    /// a revised partial can revoke it.
    pub fn safe_to_execute_early(self) -> bool {
        matches!(self, CommandKind::InsertTimestamp)
    }
}

/// One trigger phrase → command mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandTrigger {
    pub phrase: String,
    pub kind: CommandKind,
}

impl CommandTrigger {
    pub fn new(phrase: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            phrase: phrase.into(),
            kind,
        }
    }

    /// Built-in trigger table; the configuration collaborator may extend it.
    pub fn default_table() -> Vec<CommandTrigger> {
        use CommandKind::*;
        [
            ("new line", NewLine),
            ("next line", NewLine),
            ("new paragraph", NewParagraph),
            ("select all", SelectAll),
            ("copy that", CopyThat),
            ("copy text", CopyThat),
            ("paste that", PasteThat),
            ("paste text", PasteThat),
            ("undo that", UndoThat),
            ("undo", UndoThat),
            ("delete that", DeleteThat),
            ("delete last", DeleteThat),
            ("save file", SaveDocument),
            ("save document", SaveDocument),
            ("insert time", InsertTimestamp),
            ("current time", InsertTimestamp),
            ("stop recording", StopDictation),
            ("stop dictation", StopDictation),
        ]
        .into_iter()
        .map(|(phrase, kind)| CommandTrigger::new(phrase, kind))
        .collect()
    }
}

/// A command recognized inside dictated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandMatch {
    pub kind: CommandKind,
    /// Byte offset into the excised literal where the command takes effect,
    /// preserving spoken order relative to the surrounding text.
    pub literal_offset: usize,
}

/// Result of scanning one piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpretation {
    /// Input text with all matched trigger spans excised.
    pub literal: String,
    /// Recognized commands in spoken order.
    pub commands: Vec<CommandMatch>,
}

/// One element of the interleaved output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputItem<'a> {
    Text(&'a str),
    Command(CommandKind),
}

impl Interpretation {
    /// The text was nothing but command phrases.
    pub fn is_pure_command(&self) -> bool {
        !self.commands.is_empty() && self.literal.trim().is_empty()
    }

    /// Literal segments and commands interleaved in spoken order.
    pub fn interleaved(&self) -> Vec<OutputItem<'_>> {
        let mut items = Vec::with_capacity(self.commands.len() * 2 + 1);
        let mut cursor = 0usize;
        for m in &self.commands {
            let offset = m.literal_offset.min(self.literal.len());
            if offset > cursor {
                items.push(OutputItem::Text(&self.literal[cursor..offset]));
                cursor = offset;
            }
            items.push(OutputItem::Command(m.kind));
        }
        if cursor < self.literal.len() {
            items.push(OutputItem::Text(&self.literal[cursor..]));
        }
        items
    }
}

/// Scans text for trigger phrases and tracks per-utterance pending commands.
#[derive(Debug)]
pub struct CommandInterpreter {
    /// Triggers sorted longest-first (char count) so longer phrases win.
    triggers: Vec<CommandTrigger>,
    /// Commands seen on partials for the current utterance; side effects
    /// wait for finalization unless the kind is safe to execute early.
    pending: Vec<CommandKind>,
    /// Safe-early commands already fired for the current utterance.
    early_fired: Vec<CommandKind>,
}

impl CommandInterpreter {
    pub fn new(mut triggers: Vec<CommandTrigger>) -> Self {
        triggers.sort_by_key(|t| std::cmp::Reverse(t.phrase.chars().count()));
        Self {
            triggers,
            pending: Vec::new(),
            early_fired: Vec::new(),
        }
    }

    /// Scan `text` for trigger phrases. Stateless with respect to the
    /// pending-command tracking; identical for partials and finals.
    pub fn scan(&self, text: &str) -> Interpretation {
        let chars: Vec<char> = text.chars().collect();
        let mut literal = String::with_capacity(text.len());
        let mut commands = Vec::new();
        let mut i = 0usize;

        while i < chars.len() {
            let start_ok = i == 0 || !is_word_char(chars[i - 1]);
            if start_ok {
                if let Some(trigger) = self.match_at(&chars, i) {
                    let phrase_len = trigger.phrase.chars().count();
                    commands.push(CommandMatch {
                        kind: trigger.kind,
                        literal_offset: literal.len(),
                    });
                    i += phrase_len;
                    // Swallow the seam so excision leaves single spacing.
                    if literal.ends_with(' ') {
                        while i < chars.len() && chars[i] == ' ' {
                            i += 1;
                        }
                        // No dangling space when the command sat directly
                        // before closing punctuation.
                        if i < chars.len() && matches!(chars[i], '.' | ',' | '!' | '?') {
                            literal.pop();
                            if let Some(last) = commands.last_mut() {
                                last.literal_offset = literal.len();
                            }
                        }
                    } else if i < chars.len() && chars[i] == ' ' {
                        i += 1;
                    }
                    continue;
                }
            }
            literal.push(chars[i]);
            i += 1;
        }

        let trimmed = literal.trim_end();
        if trimmed.len() < literal.len() {
            literal.truncate(trimmed.len());
        }

        Interpretation { literal, commands }
    }

    fn match_at<'a>(&'a self, chars: &[char], at: usize) -> Option<&'a CommandTrigger> {
        self.triggers.iter().find(|trigger| {
            let phrase: Vec<char> = trigger.phrase.chars().collect();
            let end = at + phrase.len();
            if end > chars.len() {
                return false;
            }
            let matches = chars[at..end]
                .iter()
                .zip(&phrase)
                .all(|(a, b)| a.eq_ignore_ascii_case(b));
            matches && (end == chars.len() || !is_word_char(chars[end]))
        })
    }

    /// Observe a partial hypothesis: update the pending set (revoking
    /// commands a revision withdrew) and return safe-early commands that
    /// should fire now, each at most once per utterance.
    pub fn observe_partial(&mut self, text: &str) -> Vec<CommandKind> {
        let seen: Vec<CommandKind> = self.scan(text).commands.iter().map(|m| m.kind).collect();

        let before = self.pending.len();
        self.pending.retain(|k| seen.contains(k));
        if self.pending.len() < before {
            debug!("partial revision revoked pending command(s)");
        }

        let mut fire_now = Vec::new();
        for kind in seen {
            if !self.pending.contains(&kind) {
                self.pending.push(kind);
            }
            if kind.safe_to_execute_early() && !self.early_fired.contains(&kind) {
                self.early_fired.push(kind);
                fire_now.push(kind);
            }
        }
        fire_now
    }

    /// Commit the utterance: scan the final text and return its
    /// interpretation, excluding safe-early commands that already fired.
    /// Resets the per-utterance tracking.
    pub fn commit_final(&mut self, text: &str) -> Interpretation {
        let mut interp = self.scan(text);
        let early = std::mem::take(&mut self.early_fired);
        self.pending.clear();

        for kind in early {
            if let Some(pos) = interp.commands.iter().position(|m| m.kind == kind) {
                interp.commands.remove(pos);
            }
        }
        interp
    }

    /// Drop per-utterance tracking without committing (utterance abandoned).
    pub fn reset(&mut self) {
        self.pending.clear();
        self.early_fired.clear();
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '\''
}

/// Text the insert-timestamp command types, e.g. "03:25 PM".
pub fn insert_timestamp_payload(now: DateTime<Local>) -> String {
    now.format("%I:%M %p").to_string()
}
