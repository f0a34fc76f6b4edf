//! Quality assessor: turns one candidate into a [`QualityAssessment`].
//!
//! Steps, in order:
//!
//! 1. **Duration gate.** Below the minimum, reject without any classifier call.
//! 2. **Classification.** A bounded excerpt of title and description goes to
//!    the [`TextClassifier`]. Malformed output yields `is_instructional =
//!    false` with a "parse error" rationale instead of an error.
//! 3. **Transcript.** Only for candidates that passed classification and
//!    have captions. Short transcripts get a fixed penalty without a second
//!    classifier call; longer ones are scored by the rubric and mapped to a
//!    delta by [`rubric::transcript_delta`].
//!
//! Quota errors from any collaborator propagate. Every other collaborator
//! failure is absorbed into the assessment.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::classifier::extract_json_object;
use crate::config::Config;
use crate::error::{CollaboratorError, CollaboratorResult};
use crate::models::{CandidateItem, QualityAssessment, TranscriptSignal};
use crate::rubric;
use crate::traits::{TextClassifier, TranscriptSource};

const CLASSIFY_SYSTEM: &str = "You review Brazilian Jiu-Jitsu videos for an instructional library. \
Given a video's title and description and a target instructor, respond with a JSON object: \
{\"is_instructional\": bool, \"features_target\": bool, \"technique\": string, \
\"technique_type\": string, \"position\": string, \"ruleset\": \"gi\"|\"nogi\"|\"both\"|\"unknown\", \
\"score\": integer 0-100, \"reasoning\": string}. \
is_instructional is true only for teaching content (not match footage, vlogs, or highlights). \
features_target is true only if the target instructor teaches in the video. \
score rates instructional quality: clarity, depth, and production.";

const TRANSCRIPT_SYSTEM: &str = "You grade the transcript of a Brazilian Jiu-Jitsu instructional video. \
Respond with a JSON object {\"score\": integer 0-100, \"reasoning\": string}. \
High scores mean step-by-step technical detail, named grips and positions, and common mistakes covered. \
Low scores mean filler, promotion, or little technical content.";

const TRANSCRIPT_EXCERPT_CHARS: usize = 6000;

/// Tunables that do not vary per run.
#[derive(Debug, Clone)]
pub struct AssessorSettings {
    pub excerpt_chars: usize,
    pub transcript_min_chars: usize,
}

impl Default for AssessorSettings {
    fn default() -> Self {
        Self {
            excerpt_chars: 1200,
            transcript_min_chars: rubric::TRANSCRIPT_MIN_CHARS,
        }
    }
}

impl AssessorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            excerpt_chars: config.classifier.excerpt_chars,
            transcript_min_chars: config.curation.transcript_min_chars,
        }
    }
}

pub struct QualityAssessor {
    classifier: Arc<dyn TextClassifier>,
    transcripts: Arc<dyn TranscriptSource>,
    settings: AssessorSettings,
}

impl QualityAssessor {
    pub fn new(
        classifier: Arc<dyn TextClassifier>,
        transcripts: Arc<dyn TranscriptSource>,
        settings: AssessorSettings,
    ) -> Self {
        Self {
            classifier,
            transcripts,
            settings,
        }
    }

    /// Score one candidate whose duration has already been resolved.
    ///
    /// # Errors
    ///
    /// Only [`CollaboratorError::QuotaExceeded`] is returned.
    pub async fn assess(
        &self,
        candidate: &CandidateItem,
        target_entity: &str,
        duration_secs: u32,
        min_duration_secs: u32,
    ) -> CollaboratorResult<QualityAssessment> {
        if duration_secs < min_duration_secs {
            return Ok(QualityAssessment::rejected(format!(
                "too short: {}s < {}s minimum",
                duration_secs, min_duration_secs
            )));
        }

        let prompt = format!(
            "Target instructor: {}\nChannel: {}\n\n{}",
            target_entity,
            candidate.channel,
            bounded_excerpt(&candidate.title, &candidate.description, self.settings.excerpt_chars)
        );

        let raw = match self.classifier.classify(CLASSIFY_SYSTEM, &prompt).await {
            Ok(raw) => raw,
            Err(e @ CollaboratorError::QuotaExceeded { .. }) => return Err(e),
            Err(CollaboratorError::Transient(msg)) => {
                warn!(external_id = %candidate.external_id, error = %msg, "classification failed");
                return Ok(QualityAssessment::rejected(format!(
                    "classification failed: {}",
                    msg
                )));
            }
        };

        let mut assessment = match parse_classification(&raw) {
            Some(a) => a,
            None => {
                debug!(external_id = %candidate.external_id, "unparseable classifier output");
                return Ok(QualityAssessment::rejected(
                    "parse error: classifier returned no usable JSON",
                ));
            }
        };

        if assessment.is_instructional && assessment.matches_target {
            assessment.transcript = self.transcript_signal(&candidate.external_id).await?;
        }

        let delta = assessment.transcript.as_ref().map(|t| t.delta).unwrap_or(0);
        assessment.final_score = rubric::final_score(assessment.base_score, delta);

        if let Some(t) = &assessment.transcript {
            assessment.reasoning = format!("{} | transcript: {}", assessment.reasoning, t.note);
        }
        if assessment.reasoning.trim().is_empty() {
            assessment.reasoning = format!("score {}", assessment.final_score);
        }

        Ok(assessment)
    }

    async fn transcript_signal(
        &self,
        external_id: &str,
    ) -> CollaboratorResult<Option<TranscriptSignal>> {
        match self.transcripts.has_captions(external_id).await {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(e @ CollaboratorError::QuotaExceeded { .. }) => return Err(e),
            Err(CollaboratorError::Transient(msg)) => {
                debug!(external_id, error = %msg, "caption lookup failed");
                return Ok(None);
            }
        }

        let text = match self.transcripts.fetch_transcript(external_id).await {
            Ok(text) => text,
            Err(e @ CollaboratorError::QuotaExceeded { .. }) => return Err(e),
            Err(CollaboratorError::Transient(msg)) => {
                warn!(external_id, error = %msg, "transcript fetch failed");
                return Ok(None);
            }
        };

        if text.trim().chars().count() < self.settings.transcript_min_chars {
            return Ok(Some(TranscriptSignal {
                sub_score: None,
                delta: rubric::SHORT_TRANSCRIPT_DELTA,
                note: "too short — likely low-value".to_string(),
            }));
        }

        let excerpt = truncate_chars(text.trim(), TRANSCRIPT_EXCERPT_CHARS);
        let raw = match self.classifier.classify(TRANSCRIPT_SYSTEM, excerpt).await {
            Ok(raw) => raw,
            Err(e @ CollaboratorError::QuotaExceeded { .. }) => return Err(e),
            Err(CollaboratorError::Transient(msg)) => {
                warn!(external_id, error = %msg, "transcript scoring failed");
                return Ok(None);
            }
        };

        let parsed = extract_json_object(&raw)
            .and_then(|v| v.get("score").and_then(|s| s.as_f64()))
            .map(rubric::clamp_score);

        Ok(Some(match parsed {
            Some(sub_score) => {
                let delta = rubric::transcript_delta(sub_score);
                TranscriptSignal {
                    sub_score: Some(sub_score),
                    delta,
                    note: format!("sub-score {} ({:+})", sub_score, delta),
                }
            }
            None => TranscriptSignal {
                sub_score: None,
                delta: 0,
                note: "parse error, transcript ignored".to_string(),
            },
        }))
    }
}

/// Build the classifier excerpt, capped at `max_chars` characters.
fn bounded_excerpt(title: &str, description: &str, max_chars: usize) -> String {
    let full = format!("Title: {}\nDescription: {}", title.trim(), description.trim());
    truncate_chars(&full, max_chars).to_string()
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn parse_classification(raw: &str) -> Option<QualityAssessment> {
    let v = extract_json_object(raw)?;
    let is_instructional = as_bool(v.get("is_instructional")?)?;
    let base_score = rubric::clamp_score(v.get("score")?.as_f64()?);
    let matches_target = v
        .get("features_target")
        .or_else(|| v.get("matches_target"))
        .and_then(as_bool)
        .unwrap_or(false);

    let text = |key: &str| {
        v.get(key)
            .and_then(|s| s.as_str())
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };

    let ruleset = match text("ruleset").to_lowercase().as_str() {
        "gi" => "gi",
        "nogi" | "no-gi" | "no gi" => "nogi",
        "both" => "both",
        _ => "unknown",
    }
    .to_string();

    Some(QualityAssessment {
        is_instructional,
        matches_target,
        technique: text("technique"),
        technique_type: text("technique_type"),
        position: text("position"),
        ruleset,
        base_score,
        transcript: None,
        final_score: base_score,
        reasoning: text("reasoning"),
    })
}

fn as_bool(v: &serde_json::Value) -> Option<bool> {
    match v {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}
