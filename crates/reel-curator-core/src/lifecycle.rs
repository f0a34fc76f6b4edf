//! Feedback-driven lifecycle rules for persisted records.
//!
//! Rules are an explicit ordered list. The first matching status rule wins;
//! [`LifecycleRule::RetargetAdvanced`] is the only rule that may fire
//! alongside another one, and never alongside a removal.
//!
//! Evaluation is a pure function of the stored aggregates and thresholds,
//! so re-running it over unchanged data yields the same result.
//!
//! Tie-break: when quality-issue and context-issue counts are equal, neither
//! the quality-removal nor the mis-targeting flag fires.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::{CurationRecord, FeedbackAggregate, RecordStatus, SkillLevel};

/// Thresholds for lifecycle evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleThresholds {
    /// Cold-start guard: no rule fires below this many votes.
    pub min_evidence: u32,
    pub quality_issue_removal_ratio: f64,
    pub low_helpful_removal_ratio: f64,
    pub low_helpful_flag_ratio: f64,
    pub too_advanced_ratio: f64,
    pub top_tier_min_votes: u32,
    pub top_tier_helpful_ratio: f64,
}

impl Default for LifecycleThresholds {
    fn default() -> Self {
        Self {
            min_evidence: 50,
            quality_issue_removal_ratio: 0.25,
            low_helpful_removal_ratio: 0.40,
            low_helpful_flag_ratio: 0.50,
            too_advanced_ratio: 0.40,
            top_tier_min_votes: 100,
            top_tier_helpful_ratio: 0.85,
        }
    }
}

/// Lifecycle rules in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleRule {
    QualityIssueRemoval,
    LowHelpfulRemoval,
    MistargetedFlag,
    RetargetAdvanced,
    TopTierPromotion,
}

impl LifecycleRule {
    /// All rules, in evaluation order.
    pub const ORDER: [LifecycleRule; 5] = [
        LifecycleRule::QualityIssueRemoval,
        LifecycleRule::LowHelpfulRemoval,
        LifecycleRule::MistargetedFlag,
        LifecycleRule::RetargetAdvanced,
        LifecycleRule::TopTierPromotion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleRule::QualityIssueRemoval => "quality_issue_removal",
            LifecycleRule::LowHelpfulRemoval => "low_helpful_removal",
            LifecycleRule::MistargetedFlag => "mistargeted_flag",
            LifecycleRule::RetargetAdvanced => "retarget_advanced",
            LifecycleRule::TopTierPromotion => "top_tier_promotion",
        }
    }

    /// Status this rule assigns, if it is a status rule.
    pub fn status(&self) -> Option<RecordStatus> {
        match self {
            LifecycleRule::QualityIssueRemoval | LifecycleRule::LowHelpfulRemoval => {
                Some(RecordStatus::Removed)
            }
            LifecycleRule::MistargetedFlag => Some(RecordStatus::Flagged),
            LifecycleRule::TopTierPromotion => Some(RecordStatus::TopTier),
            LifecycleRule::RetargetAdvanced => None,
        }
    }

    fn matches(&self, fb: &FeedbackAggregate, t: &LifecycleThresholds) -> bool {
        let helpful = fb.helpful_ratio();
        match self {
            LifecycleRule::QualityIssueRemoval => {
                fb.quality_issue_ratio() > t.quality_issue_removal_ratio
            }
            LifecycleRule::LowHelpfulRemoval => {
                helpful < t.low_helpful_removal_ratio
                    && fb.quality_issue_count > fb.context_issue_count
            }
            LifecycleRule::MistargetedFlag => {
                helpful < t.low_helpful_flag_ratio
                    && fb.context_issue_count > fb.quality_issue_count
            }
            LifecycleRule::RetargetAdvanced => fb.too_advanced_ratio() > t.too_advanced_ratio,
            LifecycleRule::TopTierPromotion => {
                fb.total_votes >= t.top_tier_min_votes && helpful >= t.top_tier_helpful_ratio
            }
        }
    }
}

/// Result of evaluating one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    /// Rules that fired, in order.
    pub fired: Vec<LifecycleRule>,
    /// Status the record should hold, if a status rule fired.
    pub status: Option<RecordStatus>,
    /// Narrowed targeting set, if the retarget rule fired.
    pub skill_levels: Option<BTreeSet<SkillLevel>>,
}

impl Evaluation {
    pub fn is_noop(&self) -> bool {
        self.fired.is_empty()
    }
}

/// Whether a record has enough evidence to be reviewed at all.
pub fn is_eligible(record: &CurationRecord, t: &LifecycleThresholds) -> bool {
    record.status != RecordStatus::Removed && record.feedback.total_votes >= t.min_evidence
}

/// Evaluate the ordered rule list against one record.
pub fn evaluate(record: &CurationRecord, t: &LifecycleThresholds) -> Evaluation {
    let mut eval = Evaluation::default();
    if !is_eligible(record, t) {
        return eval;
    }

    for rule in LifecycleRule::ORDER {
        if !rule.matches(&record.feedback, t) {
            continue;
        }
        match rule.status() {
            Some(RecordStatus::Removed) => {
                // Targeting of a removed record is moot; nothing else applies.
                eval.fired.push(rule);
                eval.status = Some(RecordStatus::Removed);
                return eval;
            }
            Some(status) => {
                if eval.status.is_none() {
                    eval.fired.push(rule);
                    eval.status = Some(status);
                }
            }
            None => {
                eval.fired.push(rule);
                eval.skill_levels = Some(narrow_to_advanced(&record.skill_levels));
            }
        }
    }

    eval
}

/// Intersect the targeting set with the advanced tiers, falling back to all
/// advanced tiers when the intersection would be empty.
pub fn narrow_to_advanced(current: &BTreeSet<SkillLevel>) -> BTreeSet<SkillLevel> {
    let narrowed: BTreeSet<SkillLevel> =
        current.iter().copied().filter(|l| l.is_advanced()).collect();
    if narrowed.is_empty() {
        SkillLevel::advanced()
    } else {
        narrowed
    }
}
