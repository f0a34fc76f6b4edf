//! Deterministic parts of the quality rubric.
//!
//! The classifier supplies a base score; everything that turns that score
//! into an accept/reject decision lives here so it can be tested without
//! any network collaborator.
//!
//! # Transcript breakpoints
//!
//! | Sub-score | Delta |
//! |-----------|-------|
//! | `>= 85`   | `+5`  |
//! | `70..=84` | `+3`  |
//! | `50..=69` | `0`   |
//! | `< 50`    | `-3`  |
//!
//! A transcript shorter than [`TRANSCRIPT_MIN_CHARS`] is penalised with `-3`
//! without being classified.

use serde::{Deserialize, Serialize};

/// Transcripts shorter than this are treated as a low-value signal.
pub const TRANSCRIPT_MIN_CHARS: usize = 200;

/// Delta applied when a transcript is present but too short.
pub const SHORT_TRANSCRIPT_DELTA: i32 = -3;

/// The only two outcomes a candidate can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Reject,
}

/// Map a transcript rubric sub-score to its score delta.
pub fn transcript_delta(sub_score: u8) -> i32 {
    match sub_score {
        85.. => 5,
        70..=84 => 3,
        50..=69 => 0,
        _ => -3,
    }
}

/// Combine base score and delta, clamped to `[0, 100]`.
pub fn final_score(base: u8, delta: i32) -> u8 {
    (base as i32 + delta).clamp(0, 100) as u8
}

/// Clamp an arbitrary classifier number into a valid score.
pub fn clamp_score(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}

/// Pure function of final score and threshold.
pub fn decide(final_score: u8, threshold: u8) -> Decision {
    if final_score >= threshold {
        Decision::Accept
    } else {
        Decision::Reject
    }
}

/// Why an assessed candidate was rejected, if it was.
///
/// Checks run in a fixed order so the reported reason is stable.
pub fn rejection_reason(
    is_instructional: bool,
    matches_target: bool,
    final_score: u8,
    threshold: u8,
) -> Option<String> {
    if !is_instructional {
        return Some("not instructional".to_string());
    }
    if !matches_target {
        return Some("does not feature target".to_string());
    }
    match decide(final_score, threshold) {
        Decision::Accept => None,
        Decision::Reject => Some(format!(
            "score {} below threshold {}",
            final_score, threshold
        )),
    }
}
