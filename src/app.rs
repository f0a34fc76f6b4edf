//! Wiring: builds the store, collaborators and services from config.
//!
//! [`App::from_config`] picks concrete collaborators by provider name.
//! [`App::with_collaborators`] takes them explicitly so custom binaries and
//! integration tests can plug in their own implementations.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::assess::{AssessorSettings, QualityAssessor};
use crate::catalog_youtube::{DisabledCatalog, YouTubeCatalog};
use crate::classifier::{DisabledClassifier, OpenAiClassifier};
use crate::config::Config;
use crate::db;
use crate::ingest::{IngestionPipeline, IngestionService};
use crate::lifecycle::LifecycleManager;
use crate::migrate;
use crate::progress::RunStore;
use crate::sqlite_store::SqliteStore;
use crate::traits::{CatalogSearch, NoTranscripts, TextClassifier, TranscriptSource};

/// Fully wired application services.
#[derive(Clone)]
pub struct App {
    pub config: Arc<Config>,
    pub store: Arc<SqliteStore>,
    pub runs: Arc<RunStore>,
    pub ingestion: Arc<IngestionService>,
    pub lifecycle: Arc<LifecycleManager>,
}

/// The external collaborators a run needs.
pub struct Collaborators {
    pub catalog: Arc<dyn CatalogSearch>,
    pub classifier: Arc<dyn TextClassifier>,
    pub transcripts: Arc<dyn TranscriptSource>,
}

impl Collaborators {
    /// Build collaborators for the configured providers.
    pub fn from_config(config: &Config) -> Result<Self> {
        let (catalog, transcripts): (Arc<dyn CatalogSearch>, Arc<dyn TranscriptSource>) =
            match config.catalog.provider.as_str() {
                "youtube" => {
                    let yt = Arc::new(YouTubeCatalog::new(&config.catalog)?);
                    let transcripts: Arc<dyn TranscriptSource> =
                        if config.catalog.transcript_endpoint.is_some() {
                            yt.clone()
                        } else {
                            Arc::new(NoTranscripts)
                        };
                    let catalog: Arc<dyn CatalogSearch> = yt;
                    (catalog, transcripts)
                }
                _ => {
                    let catalog: Arc<dyn CatalogSearch> = Arc::new(DisabledCatalog);
                    let transcripts: Arc<dyn TranscriptSource> = Arc::new(NoTranscripts);
                    (catalog, transcripts)
                }
            };

        let classifier: Arc<dyn TextClassifier> = match config.classifier.provider.as_str() {
            "openai" => Arc::new(OpenAiClassifier::new(&config.classifier)?),
            _ => Arc::new(DisabledClassifier),
        };

        Ok(Self {
            catalog,
            classifier,
            transcripts,
        })
    }
}

impl App {
    /// Connect to the database, apply migrations and build configured collaborators.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let collaborators = Collaborators::from_config(config)?;
        Self::with_collaborators(config, collaborators).await
    }

    pub async fn with_collaborators(config: &Config, collaborators: Collaborators) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let store = Arc::new(SqliteStore::new(pool));

        let runs = Arc::new(RunStore::new(Duration::from_secs(
            config.progress.retention_hours * 3600,
        )));

        let assessor = Arc::new(QualityAssessor::new(
            collaborators.classifier,
            collaborators.transcripts,
            AssessorSettings::from_config(config),
        ));
        let pipeline = Arc::new(IngestionPipeline::new(
            collaborators.catalog,
            assessor,
            store.clone(),
            runs.clone(),
            config.catalog.page_size,
        ));
        let ingestion = Arc::new(IngestionService::new(
            pipeline,
            runs.clone(),
            Some(store.clone()),
        ));
        let lifecycle = Arc::new(LifecycleManager::new(
            store.clone(),
            store.clone(),
            config.lifecycle.thresholds(),
        ));

        Ok(Self {
            config: Arc::new(config.clone()),
            store,
            runs,
            ingestion,
            lifecycle,
        })
    }
}
