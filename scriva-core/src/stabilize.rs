//! Hypothesis stabilization for the in-flight utterance.
//!
//! Recognition models mostly revise the trailing few words of a hypothesis.
//! The stabilizer turns each revision into a minimal display delta (keep a
//! common prefix, replace the suffix) and debounces single-frame retractions
//! so low-confidence tail thrash never reaches the delivery sink.

use tracing::debug;

/// Minimal edit transforming the previously displayed text into the new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayDelta {
    /// Characters of the previous display to keep.
    pub keep_chars: usize,
    /// Replacement suffix appended after the kept prefix.
    pub append: String,
}

/// Tracks the in-flight utterance's display text across partial revisions.
///
/// Owns the utterance exclusively until [`HypothesisStabilizer::finalize`]
/// hands the buffered text to the sentence finalizer.
#[derive(Debug)]
pub struct HypothesisStabilizer {
    /// Text currently shown for the live region.
    displayed: String,
    /// Most recent raw hypothesis, even when its display was debounced.
    latest_raw: String,
    /// A large retraction was seen last cycle and is awaiting confirmation.
    shrink_pending: bool,
    /// Fraction of the displayed length a hypothesis must retract before
    /// the debounce holds it back.
    retract_fraction: f32,
    /// Number of partial revisions applied to this utterance.
    revisions: u64,
}

impl HypothesisStabilizer {
    pub fn new(retract_fraction: f32) -> Self {
        Self {
            displayed: String::new(),
            latest_raw: String::new(),
            shrink_pending: false,
            retract_fraction,
            revisions: 0,
        }
    }

    /// Ingest a revised partial hypothesis.
    ///
    /// Returns the delta needed to update the display, or `None` when the
    /// display should not change (identical text, or a retraction held for
    /// one confirmation cycle).
    pub fn update(&mut self, new_partial: &str) -> Option<DisplayDelta> {
        self.revisions += 1;
        self.latest_raw = new_partial.to_string();

        if new_partial == self.displayed {
            self.shrink_pending = false;
            return None;
        }

        let displayed_len = self.displayed.chars().count();
        let new_len = new_partial.chars().count();

        let retracted = new_len < displayed_len
            && (displayed_len - new_len) as f32 > self.retract_fraction * displayed_len as f32;

        if retracted && !self.shrink_pending {
            // Single-frame retraction: keep the longer text one more cycle.
            self.shrink_pending = true;
            debug!(
                displayed = displayed_len,
                proposed = new_len,
                "holding retraction for confirmation"
            );
            return None;
        }
        self.shrink_pending = false;

        let keep_chars = common_prefix_chars(&self.displayed, new_partial);
        let append: String = new_partial.chars().skip(keep_chars).collect();
        self.displayed = new_partial.to_string();

        Some(DisplayDelta { keep_chars, append })
    }

    /// Text currently materialized for the live region.
    pub fn displayed(&self) -> &str {
        &self.displayed
    }

    /// Most recent raw hypothesis, ignoring any held retraction.
    pub fn latest_raw(&self) -> &str {
        &self.latest_raw
    }

    pub fn revisions(&self) -> u64 {
        self.revisions
    }

    /// Flush the buffered utterance text and reset to empty.
    ///
    /// Returns the latest raw hypothesis: a debounced retraction must not
    /// resurrect words the model already withdrew.
    pub fn finalize(&mut self) -> String {
        let text = std::mem::take(&mut self.latest_raw);
        self.displayed.clear();
        self.shrink_pending = false;
        self.revisions = 0;
        text.trim().to_string()
    }
}

/// Number of leading characters shared by `a` and `b`.
fn common_prefix_chars(a: &str, b: &str) -> usize {
    a.chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .count()
}

/// Normalize a raw partial for display: drop leading whitespace and a
/// leading ellipsis, then uppercase the first letter.
pub fn preprocess_partial(text: &str) -> String {
    let mut trimmed = text.trim_start();
    if let Some(rest) = trimmed.strip_prefix("...") {
        trimmed = rest.trim_start();
    } else if let Some(rest) = trimmed.strip_prefix('…') {
        trimmed = rest.trim_start();
    }

    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(displayed: &str, delta: &DisplayDelta) -> String {
        let mut out: String = displayed.chars().take(delta.keep_chars).collect();
        out.push_str(&delta.append);
        out
    }

    #[test]
    fn first_update_types_everything() {
        let mut stab = HypothesisStabilizer::new(0.3);
        let delta = stab.update("hello").expect("delta");
        assert_eq!(delta.keep_chars, 0);
        assert_eq!(delta.append, "hello");
        assert_eq!(stab.displayed(), "hello");
    }

    #[test]
    fn suffix_extension_keeps_whole_prefix() {
        let mut stab = HypothesisStabilizer::new(0.3);
        stab.update("hello");
        let delta = stab.update("hello world").expect("delta");
        assert_eq!(delta.keep_chars, 5);
        assert_eq!(delta.append, " world");
    }

    #[test]
    fn tail_revision_replaces_only_the_divergent_suffix() {
        let mut stab = HypothesisStabilizer::new(0.3);
        stab.update("hell");
        let prev = stab.displayed().to_string();
        let delta = stab.update("hello wor").expect("delta");
        assert_eq!(delta.keep_chars, 4);
        assert_eq!(apply(&prev, &delta), "hello wor");
    }

    #[test]
    fn identical_update_is_a_no_op() {
        let mut stab = HypothesisStabilizer::new(0.3);
        stab.update("same text");
        assert_eq!(stab.update("same text"), None);
    }

    #[test]
    fn single_frame_retraction_is_held() {
        let mut stab = HypothesisStabilizer::new(0.3);
        stab.update("the quick brown fox");
        // Model briefly retracts most of the text.
        assert_eq!(stab.update("the"), None);
        assert_eq!(stab.displayed(), "the quick brown fox");
        // Next update recovers: delta is computed against the kept display.
        let delta = stab.update("the quick brown foxes").expect("delta");
        assert_eq!(delta.keep_chars, "the quick brown fox".chars().count());
        assert_eq!(delta.append, "es");
    }

    #[test]
    fn persistent_retraction_is_applied_on_second_cycle() {
        let mut stab = HypothesisStabilizer::new(0.3);
        stab.update("the quick brown fox");
        assert_eq!(stab.update("the"), None);
        let delta = stab.update("the").expect("confirmed shrink");
        assert_eq!(delta.keep_chars, 3);
        assert_eq!(delta.append, "");
        assert_eq!(stab.displayed(), "the");
    }

    #[test]
    fn small_shrink_bypasses_the_debounce() {
        let mut stab = HypothesisStabilizer::new(0.3);
        stab.update("hello world");
        // Dropping two of eleven chars is below the retract fraction.
        let delta = stab.update("hello wor").expect("delta");
        assert_eq!(delta.keep_chars, 9);
        assert_eq!(stab.displayed(), "hello wor");
    }

    #[test]
    fn finalize_uses_latest_raw_even_while_a_retraction_is_held() {
        let mut stab = HypothesisStabilizer::new(0.3);
        stab.update("the quick brown fox");
        assert_eq!(stab.update("the quick"), None);
        assert_eq!(stab.finalize(), "the quick");
        assert_eq!(stab.displayed(), "");
        assert_eq!(stab.latest_raw(), "");
    }

    #[test]
    fn preprocess_strips_ellipsis_and_capitalizes() {
        assert_eq!(preprocess_partial("  ...and then"), "And then");
        assert_eq!(preprocess_partial("hello"), "Hello");
        assert_eq!(preprocess_partial("   "), "");
    }
}
