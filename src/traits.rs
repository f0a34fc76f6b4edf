//! Collaborator traits consumed by the curation core.
//!
//! The pipeline never talks to a concrete API directly. It is handed
//! implementations of these traits, so production HTTP clients and test
//! fakes plug in the same way.
//!
//! ```text
//! ┌───────────────┐  ┌────────────────┐  ┌──────────────────┐
//! │ CatalogSearch │  │ TextClassifier │  │ TranscriptSource │
//! │  (YouTube)    │  │   (OpenAI)     │  │  (HTTP endpoint) │
//! └──────┬────────┘  └───────┬────────┘  └────────┬─────────┘
//!        │                   └─────────┬──────────┘
//!        ▼                             ▼
//!  IngestionPipeline ──────────▶ QualityAssessor
//! ```
//!
//! Every method returns [`CollaboratorResult`]: a
//! [`QuotaExceeded`](crate::error::CollaboratorError::QuotaExceeded) error
//! aborts the whole run, a `Transient` one only affects the current
//! candidate.

use async_trait::async_trait;

use crate::error::CollaboratorResult;
use crate::models::CandidateItem;

/// Searchable external catalog.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use reel_curator::error::CollaboratorResult;
/// use reel_curator::models::CandidateItem;
/// use reel_curator::traits::CatalogSearch;
///
/// struct EmptyCatalog;
///
/// #[async_trait]
/// impl CatalogSearch for EmptyCatalog {
///     fn name(&self) -> &str { "empty" }
///
///     async fn search(&self, _query: &str, _max: u32) -> CollaboratorResult<Vec<CandidateItem>> {
///         Ok(vec![])
///     }
///
///     async fn get_duration(&self, _id: &str) -> CollaboratorResult<u32> {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait CatalogSearch: Send + Sync {
    /// Short label used in logs and quota errors.
    fn name(&self) -> &str;

    /// Quota units charged per search call.
    fn search_cost(&self) -> u32 {
        100
    }

    /// Quota units charged per duration lookup.
    fn lookup_cost(&self) -> u32 {
        1
    }

    /// Up to `max_results` candidates, in catalog ranking order.
    async fn search(&self, query: &str, max_results: u32)
        -> CollaboratorResult<Vec<CandidateItem>>;

    /// Duration of an item in seconds.
    async fn get_duration(&self, external_id: &str) -> CollaboratorResult<u32>;
}

/// Language-model text classifier.
///
/// Returns the raw model output. The output is expected to be a JSON
/// object but may be malformed; callers must tolerate that.
#[async_trait]
pub trait TextClassifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, system: &str, prompt: &str) -> CollaboratorResult<String>;
}

/// Caption/transcript provider.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn has_captions(&self, external_id: &str) -> CollaboratorResult<bool>;

    async fn fetch_transcript(&self, external_id: &str) -> CollaboratorResult<String>;
}

/// Transcript source used when no transcript endpoint is configured.
pub struct NoTranscripts;

#[async_trait]
impl TranscriptSource for NoTranscripts {
    async fn has_captions(&self, _external_id: &str) -> CollaboratorResult<bool> {
        Ok(false)
    }

    async fn fetch_transcript(&self, external_id: &str) -> CollaboratorResult<String> {
        Err(crate::error::CollaboratorError::transient(format!(
            "no transcript source configured for {}",
            external_id
        )))
    }
}
