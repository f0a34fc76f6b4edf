//! Ingestion pipeline and run service.
//!
//! [`IngestionPipeline`] executes one run: for each query in order it
//! searches the catalog, then walks the results in catalog order through
//! dedup → duration → gate → assess → decide → persist, emitting a
//! [`ProgressEvent`] for every step. The dedup set is seeded once from the
//! record store at run start and updated after every accept, so the first
//! occurrence of an external ID wins.
//!
//! [`IngestionService`] launches runs on tokio, tracks a cancellation token
//! per live run, closes out the run state and persists terminal runs.
//!
//! Only quota errors and cancellation end a run early. Everything else is
//! absorbed per candidate.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::assess::QualityAssessor;
use crate::error::{CollaboratorError, RunError};
use crate::models::{AddedItem, CandidateItem, CurationRecord, EventKind, ProgressEvent, RunState, RunSummary};
use crate::progress::{ProgressSink, RunStore};
use crate::rubric;
use crate::sqlite_store::SqliteStore;
use crate::store::{InsertOutcome, RecordStore};
use crate::traits::CatalogSearch;

/// Parameters of one run.
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub target_entity: String,
    pub queries: Vec<String>,
    pub min_quality: u8,
    pub min_duration_secs: u32,
}

impl RunRequest {
    pub fn validate(&self) -> Result<()> {
        if self.target_entity.trim().is_empty() {
            bail!("target_entity must not be empty");
        }
        if self.queries.iter().all(|q| q.trim().is_empty()) {
            bail!("at least one non-empty query is required");
        }
        if self.min_quality > 100 {
            bail!("min_quality must be in [0, 100]");
        }
        Ok(())
    }
}

pub struct IngestionPipeline {
    catalog: Arc<dyn CatalogSearch>,
    assessor: Arc<QualityAssessor>,
    store: Arc<dyn RecordStore>,
    runs: Arc<RunStore>,
    page_size: u32,
}

/// Await `fut` unless the run is cancelled first.
async fn guarded<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Result<T, RunError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RunError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Split a collaborator error into run-fatal and candidate-local.
fn escalate(err: CollaboratorError) -> Result<String, RunError> {
    match RunError::from_collaborator(&err) {
        Some(fatal) => Err(fatal),
        None => Ok(err.to_string()),
    }
}

impl IngestionPipeline {
    pub fn new(
        catalog: Arc<dyn CatalogSearch>,
        assessor: Arc<QualityAssessor>,
        store: Arc<dyn RecordStore>,
        runs: Arc<RunStore>,
        page_size: u32,
    ) -> Self {
        Self {
            catalog,
            assessor,
            store,
            runs,
            page_size,
        }
    }

    fn emit(&self, run_id: &str, event: ProgressEvent) {
        if let Err(e) = self.runs.append(run_id, event) {
            warn!(run_id, error = %e, "failed to append progress event");
        }
    }

    /// Execute a run that has already been registered with the run store,
    /// then close it out as `complete` or `failed`.
    pub async fn execute(
        &self,
        run_id: &str,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, RunError> {
        let mut summary = RunSummary::default();
        let outcome = self.run_ingestion(run_id, request, cancel, &mut summary).await;

        let closed = match &outcome {
            Ok(()) => {
                info!(
                    run_id,
                    analyzed = summary.analyzed,
                    approved = summary.approved,
                    "run complete"
                );
                self.runs.complete(run_id, summary.clone())
            }
            Err(e) => {
                warn!(run_id, error = %e, "run failed");
                self.runs.fail(run_id, &e.to_string(), summary.clone())
            }
        };
        if let Err(e) = closed {
            error!(run_id, error = %e, "failed to close run");
        }

        outcome.map(|()| summary)
    }

    /// The run body. `summary` holds the partial counts if this returns early.
    pub async fn run_ingestion(
        &self,
        run_id: &str,
        request: &RunRequest,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<(), RunError> {
        let target = request.target_entity.as_str();
        let mut seen = guarded(cancel, self.store.known_external_ids())
            .await?
            .map_err(|e| RunError::Store(e.to_string()))?;

        self.emit(
            run_id,
            ProgressEvent::new(
                EventKind::Info,
                format!(
                    "curating {} across {} queries ({} already known)",
                    target,
                    request.queries.len(),
                    seen.len()
                ),
            )
            .with_target(target),
        );

        for query in request.queries.iter().map(|q| q.trim()).filter(|q| !q.is_empty()) {
            if cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }

            self.emit(
                run_id,
                ProgressEvent::new(EventKind::Search, format!("searching '{}'", query))
                    .with_target(target),
            );

            let searched = guarded(cancel, self.catalog.search(query, self.page_size)).await?;
            summary.quota_used += self.catalog.search_cost();
            let results = match searched {
                Ok(results) => results,
                Err(e) => {
                    let msg = escalate(e)?;
                    warn!(run_id, query, error = %msg, "search failed");
                    self.emit(
                        run_id,
                        ProgressEvent::new(EventKind::Error, format!("search '{}' failed", query))
                            .with_reason(msg),
                    );
                    continue;
                }
            };

            debug!(run_id, query, results = results.len(), "search returned");

            for candidate in results {
                if cancel.is_cancelled() {
                    return Err(RunError::Cancelled);
                }
                self.process_candidate(run_id, request, cancel, &candidate, &mut seen, summary)
                    .await?;
            }
        }

        Ok(())
    }

    async fn process_candidate(
        &self,
        run_id: &str,
        request: &RunRequest,
        cancel: &CancellationToken,
        candidate: &CandidateItem,
        seen: &mut HashSet<String>,
        summary: &mut RunSummary,
    ) -> Result<(), RunError> {
        let target = request.target_entity.as_str();
        let skipped = |reason: String| {
            ProgressEvent::new(EventKind::Skipped, format!("skipped '{}'", candidate.title))
                .with_title(&candidate.title)
                .with_target(target)
                .with_reason(reason)
        };

        if seen.contains(&candidate.external_id) {
            summary.duplicates += 1;
            self.emit(run_id, skipped("duplicate".to_string()));
            return Ok(());
        }

        let duration = match candidate.duration_secs {
            Some(d) => d,
            None => {
                let looked_up =
                    guarded(cancel, self.catalog.get_duration(&candidate.external_id)).await?;
                summary.quota_used += self.catalog.lookup_cost();
                match looked_up {
                    Ok(d) => d,
                    Err(e) => {
                        let msg = escalate(e)?;
                        summary.analyzed += 1;
                        summary.rejected += 1;
                        self.emit(run_id, skipped(format!("duration unavailable: {}", msg)));
                        return Ok(());
                    }
                }
            }
        };

        if duration < request.min_duration_secs {
            summary.analyzed += 1;
            summary.rejected += 1;
            self.emit(
                run_id,
                skipped(format!(
                    "too short: {}s < {}s minimum",
                    duration, request.min_duration_secs
                )),
            );
            return Ok(());
        }

        self.emit(
            run_id,
            ProgressEvent::new(EventKind::Analyze, format!("analyzing '{}'", candidate.title))
                .with_title(&candidate.title)
                .with_target(target),
        );

        let assessed = guarded(
            cancel,
            self.assessor
                .assess(candidate, target, duration, request.min_duration_secs),
        )
        .await?;
        let assessment = match assessed {
            Ok(a) => a,
            Err(e) => {
                let msg = escalate(e)?;
                summary.analyzed += 1;
                summary.rejected += 1;
                self.emit(run_id, skipped(format!("assessment failed: {}", msg)));
                return Ok(());
            }
        };

        if let Some(reason) = rubric::rejection_reason(
            assessment.is_instructional,
            assessment.matches_target,
            assessment.final_score,
            request.min_quality,
        ) {
            summary.analyzed += 1;
            summary.rejected += 1;
            debug!(
                run_id,
                external_id = %candidate.external_id,
                score = assessment.final_score,
                reasoning = %assessment.reasoning,
                "rejected"
            );
            // Reason carries the assessment rationale (parse errors included).
            self.emit(run_id, skipped(format!("{}: {}", reason, assessment.reasoning)));
            return Ok(());
        }

        let record = CurationRecord::from_accepted(candidate, target, &assessment, duration);
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        // Never raced against cancellation; a committed insert is always counted.
        match self.store.insert(&record).await {
            Ok(InsertOutcome::Inserted) => {
                seen.insert(candidate.external_id.clone());
                summary.analyzed += 1;
                summary.approved += 1;
                summary.added.push(AddedItem {
                    external_id: candidate.external_id.clone(),
                    title: candidate.title.clone(),
                    target_entity: target.to_string(),
                });
                info!(run_id, external_id = %candidate.external_id, score = assessment.final_score, "added");
                self.emit(
                    run_id,
                    ProgressEvent::new(
                        EventKind::Added,
                        format!("added '{}' ({})", candidate.title, assessment.final_score),
                    )
                    .with_title(&candidate.title)
                    .with_target(target),
                );
            }
            Ok(InsertOutcome::Duplicate) => {
                // Another run inserted it after our seed was taken.
                debug!(run_id, external_id = %candidate.external_id, "insert conflict");
                seen.insert(candidate.external_id.clone());
                summary.duplicates += 1;
                self.emit(run_id, skipped("duplicate".to_string()));
            }
            Err(e) => {
                error!(run_id, external_id = %candidate.external_id, error = %e, "insert failed");
                summary.analyzed += 1;
                summary.rejected += 1;
                self.emit(
                    run_id,
                    ProgressEvent::new(
                        EventKind::Error,
                        format!("could not store '{}'", candidate.title),
                    )
                    .with_title(&candidate.title)
                    .with_reason(e.to_string()),
                );
            }
        }

        Ok(())
    }
}

/// Launches runs in the background and tracks them until they finish.
pub struct IngestionService {
    pipeline: Arc<IngestionPipeline>,
    runs: Arc<RunStore>,
    history: Option<Arc<SqliteStore>>,
    tokens: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl IngestionService {
    pub fn new(
        pipeline: Arc<IngestionPipeline>,
        runs: Arc<RunStore>,
        history: Option<Arc<SqliteStore>>,
    ) -> Self {
        Self {
            pipeline,
            runs,
            history,
            tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn runs(&self) -> &Arc<RunStore> {
        &self.runs
    }

    /// Start a run and return its ID immediately.
    pub fn start_run(&self, request: RunRequest) -> Result<String> {
        let (run_id, _handle) = self.launch(request)?;
        Ok(run_id)
    }

    /// Start a run, optionally attach `sink`, and wait for it to finish.
    pub async fn run_to_completion(
        &self,
        request: RunRequest,
        sink: Option<Arc<dyn ProgressSink>>,
    ) -> Result<RunState> {
        let (run_id, handle) = self.launch(request)?;
        if let Some(sink) = sink {
            self.runs.subscribe(&run_id, sink)?;
        }
        handle.await?;
        self.runs
            .snapshot(&run_id)
            .ok_or_else(|| anyhow::anyhow!("run {} disappeared", run_id))
    }

    /// Trip the cancellation token of a live run. Returns `false` if the run
    /// is unknown or already finished.
    pub fn cancel_run(&self, run_id: &str) -> bool {
        let tokens = self.tokens.lock().unwrap_or_else(|p| p.into_inner());
        match tokens.get(run_id) {
            Some(token) => {
                info!(run_id, "cancelling run");
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn launch(&self, request: RunRequest) -> Result<(String, JoinHandle<()>)> {
        request.validate()?;

        let run_id = Uuid::new_v4().to_string();
        self.runs.start(&run_id, &request.target_entity)?;

        let token = CancellationToken::new();
        self.tokens
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(run_id.clone(), token.clone());

        let pipeline = self.pipeline.clone();
        let runs = self.runs.clone();
        let history = self.history.clone();
        let tokens = self.tokens.clone();
        let id = run_id.clone();

        info!(run_id = %id, target = %request.target_entity, queries = request.queries.len(), "run started");

        let handle = tokio::spawn(async move {
            let _ = pipeline.execute(&id, &request, &token).await;

            tokens
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .remove(&id);

            if let (Some(history), Some(state)) = (history, runs.snapshot(&id)) {
                if let Err(e) = history.save_run(&state).await {
                    warn!(run_id = %id, error = %e, "failed to persist run history");
                }
            }
        });

        Ok((run_id, handle))
    }
}
