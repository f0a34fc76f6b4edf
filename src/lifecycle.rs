//! Lifecycle manager: applies feedback-driven rules to persisted records.
//!
//! A review pass refreshes stored feedback aggregates from the
//! [`FeedbackAggregateSource`], selects records with enough evidence and
//! evaluates the ordered rule list from
//! [`reel_curator_core::lifecycle`]. Only differences are written, so a
//! second pass over unchanged feedback reports zero transitions.
//!
//! A failure on one record is logged and counted; the batch continues.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use reel_curator_core::lifecycle::{evaluate, LifecycleThresholds};

use crate::models::RecordStatus;
use crate::store::{FeedbackAggregateSource, RecordStore};

/// Counts from one review pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleReport {
    pub reviewed: u32,
    pub removed: u32,
    pub flagged: u32,
    pub promoted: u32,
    pub retargeted: u32,
    pub failed: u32,
}

pub struct LifecycleManager {
    store: Arc<dyn RecordStore>,
    feedback: Arc<dyn FeedbackAggregateSource>,
    thresholds: LifecycleThresholds,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn RecordStore>,
        feedback: Arc<dyn FeedbackAggregateSource>,
        thresholds: LifecycleThresholds,
    ) -> Self {
        Self {
            store,
            feedback,
            thresholds,
        }
    }

    /// Run one review pass over every record with enough evidence.
    pub async fn review_all(&self) -> Result<LifecycleReport> {
        let mut report = LifecycleReport::default();
        self.refresh_aggregates(&mut report).await?;

        let records = self.store.query_by_evidence(self.thresholds.min_evidence).await?;

        for record in records {
            report.reviewed += 1;
            let eval = evaluate(&record, &self.thresholds);
            if eval.is_noop() {
                continue;
            }

            if let Some(status) = eval.status.filter(|s| *s != record.status) {
                match self.store.update_status(&record.external_id, status).await {
                    Ok(()) => {
                        let rules: Vec<&str> = eval.fired.iter().map(|r| r.as_str()).collect();
                        info!(
                            external_id = %record.external_id,
                            from = %record.status,
                            to = %status,
                            rules = ?rules,
                            "status transition"
                        );
                        match status {
                            RecordStatus::Removed => report.removed += 1,
                            RecordStatus::Flagged => report.flagged += 1,
                            RecordStatus::TopTier => report.promoted += 1,
                            RecordStatus::Active => {}
                        }
                    }
                    Err(e) => {
                        warn!(external_id = %record.external_id, error = %e, "status update failed");
                        report.failed += 1;
                        continue;
                    }
                }
            }

            if let Some(levels) = eval.skill_levels.filter(|l| *l != record.skill_levels) {
                match self.store.update_targeting(&record.external_id, &levels).await {
                    Ok(()) => {
                        debug!(external_id = %record.external_id, levels = ?levels, "retargeted");
                        report.retargeted += 1;
                    }
                    Err(e) => {
                        warn!(external_id = %record.external_id, error = %e, "targeting update failed");
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            reviewed = report.reviewed,
            removed = report.removed,
            flagged = report.flagged,
            promoted = report.promoted,
            retargeted = report.retargeted,
            failed = report.failed,
            "lifecycle review complete"
        );
        Ok(report)
    }

    async fn refresh_aggregates(&self, report: &mut LifecycleReport) -> Result<()> {
        let aggregates = match self.feedback.aggregates().await {
            Ok(a) => a,
            Err(e) => {
                warn!(error = %e, "feedback aggregates unavailable, using stored counts");
                return Ok(());
            }
        };

        let current: HashMap<String, _> = self
            .store
            .query_by_evidence(0)
            .await?
            .into_iter()
            .map(|r| (r.external_id, r.feedback))
            .collect();

        for (external_id, aggregate) in aggregates {
            match current.get(&external_id) {
                Some(stored) if *stored == aggregate => {}
                Some(_) => {
                    if let Err(e) = self.store.update_feedback(&external_id, &aggregate).await {
                        warn!(external_id = %external_id, error = %e, "feedback refresh failed");
                        report.failed += 1;
                    }
                }
                // Removed or unknown record.
                None => {}
            }
        }
        Ok(())
    }

    /// Run [`review_all`](Self::review_all) every `interval`. The first tick
    /// is skipped so startup does not mutate records.
    pub fn spawn_scheduler(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.review_all().await {
                    warn!(error = %e, "scheduled lifecycle review failed");
                }
            }
        })
    }
}
