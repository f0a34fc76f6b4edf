//! Core data models used throughout Reel Curator.
//!
//! These types represent the candidates, assessments, persisted curation
//! records, and run progress events that flow through the ingestion and
//! lifecycle pipelines.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A catalog search result that has not been scored or persisted yet.
///
/// Created per search result and discarded once a decision is reached.
/// `duration_secs` is resolved lazily by the pipeline (it costs an extra
/// catalog call) and is `None` until then.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub channel: String,
    pub published_at: Option<DateTime<Utc>>,
    pub thumbnail_url: Option<String>,
    pub duration_secs: Option<u32>,
}

/// Outcome of the optional transcript dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSignal {
    /// Rubric sub-score in `[0, 100]`; `None` when the transcript was too
    /// short to be worth classifying or could not be scored.
    pub sub_score: Option<u8>,
    /// Always one of `{-3, 0, +3, +5}`.
    pub delta: i32,
    pub note: String,
}

/// Quality rubric result for one candidate. Computed once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub is_instructional: bool,
    pub matches_target: bool,
    pub technique: String,
    pub technique_type: String,
    pub position: String,
    /// `gi`, `nogi`, `both`, or `unknown`.
    pub ruleset: String,
    pub base_score: u8,
    pub transcript: Option<TranscriptSignal>,
    /// `clamp(base_score + transcript delta, 0, 100)`.
    pub final_score: u8,
    /// Never empty.
    pub reasoning: String,
}

impl QualityAssessment {
    /// An assessment that rejects without having consulted the classifier.
    pub fn rejected(reasoning: impl Into<String>) -> Self {
        let mut reasoning = reasoning.into();
        if reasoning.trim().is_empty() {
            reasoning = "rejected".to_string();
        }
        Self {
            is_instructional: false,
            matches_target: false,
            technique: String::new(),
            technique_type: String::new(),
            position: String::new(),
            ruleset: "unknown".to_string(),
            base_score: 0,
            transcript: None,
            final_score: 0,
            reasoning,
        }
    }
}

/// Lifecycle status of a persisted record. `Removed` is a tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Active,
    Flagged,
    TopTier,
    Removed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Flagged => "flagged",
            RecordStatus::TopTier => "top_tier",
            RecordStatus::Removed => "removed",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RecordStatus::Active),
            "flagged" => Ok(RecordStatus::Flagged),
            "top_tier" => Ok(RecordStatus::TopTier),
            "removed" => Ok(RecordStatus::Removed),
            other => anyhow::bail!("unknown record status: '{}'", other),
        }
    }
}

/// Belt tiers used for skill-level targeting, ordered from beginner up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillLevel {
    White,
    Blue,
    Purple,
    Brown,
    Black,
}

impl SkillLevel {
    pub const ALL: [SkillLevel; 5] = [
        SkillLevel::White,
        SkillLevel::Blue,
        SkillLevel::Purple,
        SkillLevel::Brown,
        SkillLevel::Black,
    ];

    pub fn is_advanced(&self) -> bool {
        *self >= SkillLevel::Purple
    }

    pub fn all() -> BTreeSet<SkillLevel> {
        Self::ALL.into_iter().collect()
    }

    pub fn advanced() -> BTreeSet<SkillLevel> {
        Self::ALL.into_iter().filter(|l| l.is_advanced()).collect()
    }
}

/// Pre-aggregated feedback for one record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackAggregate {
    pub total_votes: u32,
    pub helpful_votes: u32,
    pub quality_issue_count: u32,
    pub context_issue_count: u32,
    pub too_advanced_count: u32,
}

impl FeedbackAggregate {
    fn ratio(&self, n: u32) -> f64 {
        if self.total_votes == 0 {
            0.0
        } else {
            n as f64 / self.total_votes as f64
        }
    }

    pub fn helpful_ratio(&self) -> f64 {
        self.ratio(self.helpful_votes)
    }

    pub fn quality_issue_ratio(&self) -> f64 {
        self.ratio(self.quality_issue_count)
    }

    pub fn too_advanced_ratio(&self) -> f64 {
        self.ratio(self.too_advanced_count)
    }
}

/// Feedback category attached to a single vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackCategory {
    QualityIssue,
    ContextIssue,
    TooAdvanced,
}

impl FeedbackCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackCategory::QualityIssue => "quality_issue",
            FeedbackCategory::ContextIssue => "context_issue",
            FeedbackCategory::TooAdvanced => "too_advanced",
        }
    }
}

impl FromStr for FeedbackCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quality_issue" => Ok(FeedbackCategory::QualityIssue),
            "context_issue" => Ok(FeedbackCategory::ContextIssue),
            "too_advanced" => Ok(FeedbackCategory::TooAdvanced),
            other => anyhow::bail!(
                "unknown feedback category: '{}'. Must be quality_issue, context_issue, or too_advanced",
                other
            ),
        }
    }
}

/// A persisted, accepted item. The external ID is the global dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurationRecord {
    pub external_id: String,
    pub title: String,
    pub target_entity: String,
    pub technique: String,
    pub technique_type: String,
    pub position: String,
    pub ruleset: String,
    pub quality_score: u8,
    pub duration_secs: u32,
    pub channel: String,
    pub status: RecordStatus,
    pub skill_levels: BTreeSet<SkillLevel>,
    pub feedback: FeedbackAggregate,
    pub created_at: DateTime<Utc>,
}

impl CurationRecord {
    /// Build a fresh `active` record from an accepted candidate.
    pub fn from_accepted(
        candidate: &CandidateItem,
        target_entity: &str,
        assessment: &QualityAssessment,
        duration_secs: u32,
    ) -> Self {
        Self {
            external_id: candidate.external_id.clone(),
            title: candidate.title.clone(),
            target_entity: target_entity.to_string(),
            technique: assessment.technique.clone(),
            technique_type: assessment.technique_type.clone(),
            position: assessment.position.clone(),
            ruleset: assessment.ruleset.clone(),
            quality_score: assessment.final_score,
            duration_secs,
            channel: candidate.channel.clone(),
            status: RecordStatus::Active,
            skill_levels: SkillLevel::all(),
            feedback: FeedbackAggregate::default(),
            created_at: Utc::now(),
        }
    }
}

/// Machine-readable category of a [`ProgressEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Info,
    Success,
    Error,
    Search,
    Analyze,
    Added,
    Skipped,
    /// Terminal event of a completed run; carries the summary.
    Done,
}

impl EventKind {
    pub fn icon(&self) -> &'static str {
        match self {
            EventKind::Info => "ℹ",
            EventKind::Success => "✔",
            EventKind::Error => "✖",
            EventKind::Search => "🔍",
            EventKind::Analyze => "🧠",
            EventKind::Added => "➕",
            EventKind::Skipped => "⏭",
            EventKind::Done => "🏁",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Info => "info",
            EventKind::Success => "success",
            EventKind::Error => "error",
            EventKind::Search => "search",
            EventKind::Analyze => "analyze",
            EventKind::Added => "added",
            EventKind::Skipped => "skipped",
            EventKind::Done => "done",
        }
    }
}

/// One entry of a run's append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Position in the run's log, assigned on append (1-based).
    #[serde(default)]
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub icon: String,
    pub kind: EventKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_entity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
}

impl ProgressEvent {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            seq: 0,
            timestamp: Utc::now(),
            icon: kind.icon().to_string(),
            kind,
            message: message.into(),
            title: None,
            target_entity: None,
            reason: None,
            summary: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target_entity = Some(target.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_summary(mut self, summary: RunSummary) -> Self {
        self.summary = Some(summary);
        self
    }
}

/// A record added during a run, reported in the summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedItem {
    pub external_id: String,
    pub title: String,
    pub target_entity: String,
}

/// Counters accumulated over one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Non-duplicate candidates that reached a decision.
    pub analyzed: u32,
    pub approved: u32,
    pub rejected: u32,
    pub duplicates: u32,
    /// External catalog quota units consumed.
    pub quota_used: u32,
    pub added: Vec<AddedItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Complete,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Complete => "complete",
            RunStatus::Failed => "failed",
        }
    }
}

/// Snapshot of a run as held by the progress channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub target_entity: String,
    pub status: RunStatus,
    pub events: Vec<ProgressEvent>,
    pub summary: Option<RunSummary>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
