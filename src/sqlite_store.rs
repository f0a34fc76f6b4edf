//! SQLite-backed [`RecordStore`] and [`FeedbackAggregateSource`].
//!
//! Also owns the tables that sit outside the core traits: individual
//! feedback votes and the history of finished ingestion runs.

use std::collections::{BTreeSet, HashSet};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{
    CurationRecord, FeedbackAggregate, FeedbackCategory, RecordStatus, RunState, RunSummary,
    SkillLevel,
};
use crate::store::{FeedbackAggregateSource, InsertOutcome, RecordStore};

/// SQLite implementation of the store traits.
pub struct SqliteStore {
    pool: SqlitePool,
}

/// One row of `ingestion_runs`.
#[derive(Debug, Clone, Serialize)]
pub struct RunHistoryEntry {
    pub run_id: String,
    pub target_entity: String,
    pub status: String,
    pub summary: Option<RunSummary>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

const RECORD_COLUMNS: &str = "external_id, title, target_entity, technique, technique_type, \
     position, ruleset, quality_score, duration_secs, channel, status, skill_levels, \
     total_votes, helpful_votes, quality_issue_count, context_issue_count, \
     too_advanced_count, created_at";

fn from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn count(row: &SqliteRow, col: &str) -> u32 {
    row.get::<i64, _>(col).max(0) as u32
}

fn row_to_record(row: &SqliteRow) -> Result<CurationRecord> {
    let status: String = row.get("status");
    let levels: String = row.get("skill_levels");
    let skill_levels: BTreeSet<SkillLevel> = serde_json::from_str(&levels)
        .with_context(|| format!("invalid skill_levels: {}", levels))?;

    Ok(CurationRecord {
        external_id: row.get("external_id"),
        title: row.get("title"),
        target_entity: row.get("target_entity"),
        technique: row.get("technique"),
        technique_type: row.get("technique_type"),
        position: row.get("position"),
        ruleset: row.get("ruleset"),
        quality_score: row.get::<i64, _>("quality_score").clamp(0, 100) as u8,
        duration_secs: count(row, "duration_secs"),
        channel: row.get("channel"),
        status: status.parse()?,
        skill_levels,
        feedback: FeedbackAggregate {
            total_votes: count(row, "total_votes"),
            helpful_votes: count(row, "helpful_votes"),
            quality_issue_count: count(row, "quality_issue_count"),
            context_issue_count: count(row, "context_issue_count"),
            too_advanced_count: count(row, "too_advanced_count"),
        },
        created_at: from_ts(row.get("created_at")),
    })
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Record one vote. Returns `false` if no record has this external ID.
    pub async fn record_vote(
        &self,
        external_id: &str,
        helpful: bool,
        category: Option<FeedbackCategory>,
    ) -> Result<bool> {
        if !self.exists_by_external_id(external_id).await? {
            return Ok(false);
        }
        sqlx::query(
            "INSERT INTO feedback_votes (external_id, helpful, category, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(external_id)
        .bind(helpful)
        .bind(category.map(|c| c.as_str()))
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(true)
    }

    /// Persist a finished run. Re-saving the same run overwrites it.
    pub async fn save_run(&self, state: &RunState) -> Result<()> {
        let summary_json = state
            .summary
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO ingestion_runs (run_id, target_entity, status, summary_json, error,
                                        started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                status = excluded.status,
                summary_json = excluded.summary_json,
                error = excluded.error,
                finished_at = excluded.finished_at
            "#,
        )
        .bind(&state.run_id)
        .bind(&state.target_entity)
        .bind(state.status.as_str())
        .bind(summary_json)
        .bind(&state.error)
        .bind(state.started_at.timestamp())
        .bind(state.finished_at.map(|t| t.timestamp()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent runs first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<RunHistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, target_entity, status, summary_json, error, started_at, finished_at
            FROM ingestion_runs
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let summary_json: Option<String> = row.get("summary_json");
                let summary = summary_json
                    .map(|s| serde_json::from_str::<RunSummary>(&s))
                    .transpose()?;
                Ok(RunHistoryEntry {
                    run_id: row.get("run_id"),
                    target_entity: row.get("target_entity"),
                    status: row.get("status"),
                    summary,
                    error: row.get("error"),
                    started_at: from_ts(row.get("started_at")),
                    finished_at: row.get::<Option<i64>, _>("finished_at").map(from_ts),
                })
            })
            .collect()
    }

    /// Record counts grouped by status.
    pub async fn status_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM curation_records GROUP BY status ORDER BY n DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| (r.get("status"), r.get("n"))).collect())
    }

    /// Non-removed record counts and mean score grouped by target entity.
    pub async fn entity_counts(&self) -> Result<Vec<(String, i64, f64)>> {
        let rows = sqlx::query(
            r#"
            SELECT target_entity, COUNT(*) AS n, AVG(quality_score) AS avg_score
            FROM curation_records
            WHERE status != 'removed'
            GROUP BY target_entity
            ORDER BY n DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| {
                (
                    r.get("target_entity"),
                    r.get("n"),
                    r.get::<Option<f64>, _>("avg_score").unwrap_or(0.0),
                )
            })
            .collect())
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn exists_by_external_id(&self, external_id: &str) -> Result<bool> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM curation_records WHERE external_id = ?")
            .bind(external_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n > 0)
    }

    async fn known_external_ids(&self) -> Result<HashSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT external_id FROM curation_records")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    async fn insert(&self, record: &CurationRecord) -> Result<InsertOutcome> {
        let levels = serde_json::to_string(&record.skill_levels)?;
        let now = Utc::now().timestamp();
        let fb = &record.feedback;

        let result = sqlx::query(
            r#"
            INSERT INTO curation_records (external_id, title, target_entity, technique,
                                          technique_type, position, ruleset, quality_score,
                                          duration_secs, channel, status, skill_levels,
                                          total_votes, helpful_votes, quality_issue_count,
                                          context_issue_count, too_advanced_count,
                                          created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(external_id) DO NOTHING
            "#,
        )
        .bind(&record.external_id)
        .bind(&record.title)
        .bind(&record.target_entity)
        .bind(&record.technique)
        .bind(&record.technique_type)
        .bind(&record.position)
        .bind(&record.ruleset)
        .bind(record.quality_score as i64)
        .bind(record.duration_secs as i64)
        .bind(&record.channel)
        .bind(record.status.as_str())
        .bind(levels)
        .bind(fb.total_votes as i64)
        .bind(fb.helpful_votes as i64)
        .bind(fb.quality_issue_count as i64)
        .bind(fb.context_issue_count as i64)
        .bind(fb.too_advanced_count as i64)
        .bind(record.created_at.timestamp())
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::Duplicate)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    async fn get(&self, external_id: &str) -> Result<Option<CurationRecord>> {
        let sql = format!(
            "SELECT {} FROM curation_records WHERE external_id = ?",
            RECORD_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn query_by_evidence(&self, min_votes: u32) -> Result<Vec<CurationRecord>> {
        let sql = format!(
            "SELECT {} FROM curation_records \
             WHERE status != 'removed' AND total_votes >= ? \
             ORDER BY external_id",
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(min_votes as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn update_status(&self, external_id: &str, status: RecordStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE curation_records SET status = ?, updated_at = ? WHERE external_id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now().timestamp())
        .bind(external_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("record not found: {}", external_id);
        }
        Ok(())
    }

    async fn update_targeting(
        &self,
        external_id: &str,
        skill_levels: &BTreeSet<SkillLevel>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE curation_records SET skill_levels = ?, updated_at = ? WHERE external_id = ?",
        )
        .bind(serde_json::to_string(skill_levels)?)
        .bind(Utc::now().timestamp())
        .bind(external_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("record not found: {}", external_id);
        }
        Ok(())
    }

    async fn update_feedback(
        &self,
        external_id: &str,
        feedback: &FeedbackAggregate,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE curation_records SET
                total_votes = ?, helpful_votes = ?, quality_issue_count = ?,
                context_issue_count = ?, too_advanced_count = ?, updated_at = ?
            WHERE external_id = ?
            "#,
        )
        .bind(feedback.total_votes as i64)
        .bind(feedback.helpful_votes as i64)
        .bind(feedback.quality_issue_count as i64)
        .bind(feedback.context_issue_count as i64)
        .bind(feedback.too_advanced_count as i64)
        .bind(Utc::now().timestamp())
        .bind(external_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl FeedbackAggregateSource for SqliteStore {
    async fn aggregates(&self) -> Result<Vec<(String, FeedbackAggregate)>> {
        let rows = sqlx::query(
            r#"
            SELECT external_id,
                   COUNT(*) AS total_votes,
                   SUM(CASE WHEN helpful THEN 1 ELSE 0 END) AS helpful_votes,
                   SUM(CASE WHEN category = 'quality_issue' THEN 1 ELSE 0 END) AS quality_issue_count,
                   SUM(CASE WHEN category = 'context_issue' THEN 1 ELSE 0 END) AS context_issue_count,
                   SUM(CASE WHEN category = 'too_advanced' THEN 1 ELSE 0 END) AS too_advanced_count
            FROM feedback_votes
            GROUP BY external_id
            ORDER BY external_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get::<String, _>("external_id"),
                    FeedbackAggregate {
                        total_votes: count(row, "total_votes"),
                        helpful_votes: count(row, "helpful_votes"),
                        quality_issue_count: count(row, "quality_issue_count"),
                        context_issue_count: count(row, "context_issue_count"),
                        too_advanced_count: count(row, "too_advanced_count"),
                    },
                )
            })
            .collect())
    }
}
