//! In-memory [`RecordStore`] implementation for tests and embedding.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Votes are kept as running
//! aggregates so the store can double as a [`FeedbackAggregateSource`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{CurationRecord, FeedbackAggregate, FeedbackCategory, RecordStatus, SkillLevel};

use super::{FeedbackAggregateSource, InsertOutcome, RecordStore};

/// In-memory store for testing.
pub struct InMemoryStore {
    records: RwLock<HashMap<String, CurationRecord>>,
    votes: RwLock<HashMap<String, FeedbackAggregate>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            votes: RwLock::new(HashMap::new()),
        }
    }

    /// Record one vote against an external ID.
    pub fn record_vote(&self, external_id: &str, helpful: bool, category: Option<FeedbackCategory>) {
        let mut votes = self.votes.write().unwrap();
        let agg = votes.entry(external_id.to_string()).or_default();
        agg.total_votes += 1;
        if helpful {
            agg.helpful_votes += 1;
        }
        match category {
            Some(FeedbackCategory::QualityIssue) => agg.quality_issue_count += 1,
            Some(FeedbackCategory::ContextIssue) => agg.context_issue_count += 1,
            Some(FeedbackCategory::TooAdvanced) => agg.too_advanced_count += 1,
            None => {}
        }
    }

    /// Overwrite the vote aggregate for an external ID.
    pub fn set_aggregate(&self, external_id: &str, aggregate: FeedbackAggregate) {
        self.votes
            .write()
            .unwrap()
            .insert(external_id.to_string(), aggregate);
    }

    /// All records, sorted by external ID.
    pub fn all(&self) -> Vec<CurationRecord> {
        let mut out: Vec<_> = self.records.read().unwrap().values().cloned().collect();
        out.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        out
    }

    fn with_record<F>(&self, external_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut CurationRecord),
    {
        let mut records = self.records.write().unwrap();
        let record = records
            .get_mut(external_id)
            .ok_or_else(|| anyhow!("record not found: {}", external_id))?;
        f(record);
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn exists_by_external_id(&self, external_id: &str) -> Result<bool> {
        Ok(self.records.read().unwrap().contains_key(external_id))
    }

    async fn known_external_ids(&self) -> Result<HashSet<String>> {
        Ok(self.records.read().unwrap().keys().cloned().collect())
    }

    async fn insert(&self, record: &CurationRecord) -> Result<InsertOutcome> {
        let mut records = self.records.write().unwrap();
        if records.contains_key(&record.external_id) {
            return Ok(InsertOutcome::Duplicate);
        }
        records.insert(record.external_id.clone(), record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, external_id: &str) -> Result<Option<CurationRecord>> {
        Ok(self.records.read().unwrap().get(external_id).cloned())
    }

    async fn query_by_evidence(&self, min_votes: u32) -> Result<Vec<CurationRecord>> {
        let mut out: Vec<_> = self
            .records
            .read()
            .unwrap()
            .values()
            .filter(|r| r.status != RecordStatus::Removed && r.feedback.total_votes >= min_votes)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        Ok(out)
    }

    async fn update_status(&self, external_id: &str, status: RecordStatus) -> Result<()> {
        self.with_record(external_id, |r| r.status = status)
    }

    async fn update_targeting(
        &self,
        external_id: &str,
        skill_levels: &BTreeSet<SkillLevel>,
    ) -> Result<()> {
        self.with_record(external_id, |r| r.skill_levels = skill_levels.clone())
    }

    async fn update_feedback(
        &self,
        external_id: &str,
        feedback: &FeedbackAggregate,
    ) -> Result<()> {
        self.with_record(external_id, |r| r.feedback = *feedback)
    }
}

#[async_trait]
impl FeedbackAggregateSource for InMemoryStore {
    async fn aggregates(&self) -> Result<Vec<(String, FeedbackAggregate)>> {
        let mut out: Vec<_> = self
            .votes
            .read()
            .unwrap()
            .iter()
            .map(|(id, agg)| (id.clone(), *agg))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}
