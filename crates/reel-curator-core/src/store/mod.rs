//! Storage abstraction for Reel Curator.
//!
//! The [`RecordStore`] trait defines every persistence operation the
//! ingestion pipeline and lifecycle manager need, enabling pluggable
//! backends (SQLite, in-memory). [`FeedbackAggregateSource`] supplies the
//! pre-aggregated vote counts the lifecycle rules act on.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::{BTreeSet, HashSet};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{CurationRecord, FeedbackAggregate, RecordStatus, SkillLevel};

/// Result of inserting a record whose external ID must be unique.
///
/// A conflict is an expected race outcome between concurrent runs, not an
/// error, so it is reported as a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Durable record store keyed by external ID.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`exists_by_external_id`](RecordStore::exists_by_external_id) | Point dedup check |
/// | [`known_external_ids`](RecordStore::known_external_ids) | Seed a run's dedup set |
/// | [`insert`](RecordStore::insert) | Insert with unique external ID |
/// | [`query_by_evidence`](RecordStore::query_by_evidence) | Non-removed records with enough votes |
/// | [`update_status`](RecordStore::update_status) | Lifecycle status transition |
/// | [`update_targeting`](RecordStore::update_targeting) | Narrow skill-level targeting |
/// | [`update_feedback`](RecordStore::update_feedback) | Refresh stored aggregates |
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Whether any record (including removed tombstones) uses this ID.
    async fn exists_by_external_id(&self, external_id: &str) -> Result<bool>;

    /// Every external ID in the store, tombstones included.
    async fn known_external_ids(&self) -> Result<HashSet<String>>;

    /// Insert a new record. Unique on `external_id`.
    async fn insert(&self, record: &CurationRecord) -> Result<InsertOutcome>;

    /// Fetch a record by external ID.
    async fn get(&self, external_id: &str) -> Result<Option<CurationRecord>>;

    /// Non-removed records with `total_votes >= min_votes`.
    async fn query_by_evidence(&self, min_votes: u32) -> Result<Vec<CurationRecord>>;

    async fn update_status(&self, external_id: &str, status: RecordStatus) -> Result<()>;

    async fn update_targeting(
        &self,
        external_id: &str,
        skill_levels: &BTreeSet<SkillLevel>,
    ) -> Result<()>;

    async fn update_feedback(&self, external_id: &str, feedback: &FeedbackAggregate)
        -> Result<()>;
}

/// Source of per-record vote aggregates.
#[async_trait]
pub trait FeedbackAggregateSource: Send + Sync {
    /// Aggregates for every record that has received at least one vote.
    async fn aggregates(&self) -> Result<Vec<(String, FeedbackAggregate)>>;
}
