//! Ingestion pipeline scenarios driven through fake collaborators.

mod common;

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use common::{candidate, instructional, FakeCatalog, FakeClassifier};
use reel_curator::assess::{AssessorSettings, QualityAssessor};
use reel_curator::ingest::{IngestionPipeline, IngestionService, RunRequest};
use reel_curator::models::{
    CurationRecord, EventKind, FeedbackAggregate, QualityAssessment, RecordStatus, RunState,
    RunStatus, SkillLevel,
};
use reel_curator::progress::RunStore;
use reel_curator::store::memory::InMemoryStore;
use reel_curator::store::{InsertOutcome, RecordStore};
use reel_curator::traits::NoTranscripts;

struct Harness {
    catalog: Arc<FakeCatalog>,
    classifier: Arc<FakeClassifier>,
    service: IngestionService,
}

fn harness(catalog: FakeCatalog, classifier: FakeClassifier, store: Arc<dyn RecordStore>) -> Harness {
    let catalog = Arc::new(catalog);
    let classifier = Arc::new(classifier);
    let runs = Arc::new(RunStore::new(Duration::from_secs(3600)));
    let assessor = Arc::new(QualityAssessor::new(
        classifier.clone(),
        Arc::new(NoTranscripts),
        AssessorSettings::default(),
    ));
    let pipeline = Arc::new(IngestionPipeline::new(
        catalog.clone(),
        assessor,
        store,
        runs.clone(),
        25,
    ));
    Harness {
        catalog,
        classifier,
        service: IngestionService::new(pipeline, runs, None),
    }
}

fn request(queries: &[&str]) -> RunRequest {
    RunRequest {
        target_entity: "John Danaher".to_string(),
        queries: queries.iter().map(|q| q.to_string()).collect(),
        min_quality: 65,
        min_duration_secs: 120,
    }
}

fn kinds(state: &RunState) -> Vec<EventKind> {
    state.events.iter().map(|e| e.kind).collect()
}

fn skip_reasons(state: &RunState) -> Vec<String> {
    state
        .events
        .iter()
        .filter(|e| e.kind == EventKind::Skipped)
        .filter_map(|e| e.reason.clone())
        .collect()
}

async fn wait_for_status(service: &IngestionService, run_id: &str, status: RunStatus) -> RunState {
    for _ in 0..100 {
        if let Some(state) = service.runs().snapshot(run_id) {
            if state.status == status {
                return state;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run {} never reached {:?}", run_id, status);
}

#[tokio::test]
async fn duplicate_across_queries_is_assessed_once() {
    let catalog = FakeCatalog::new()
        .with_page("danaher back", &[("A", "Back take system", 900), ("B", "Body triangle", 600)])
        .with_page("danaher legs", &[("B", "Body triangle", 600)]);
    let store = Arc::new(InMemoryStore::new());
    let h = harness(catalog, FakeClassifier::replying(instructional(80)), store.clone());

    let state = h
        .service
        .run_to_completion(request(&["danaher back", "danaher legs"]), None)
        .await
        .unwrap();

    assert_eq!(state.status, RunStatus::Complete);
    let summary = state.summary.clone().unwrap();
    assert_eq!(summary.approved, 2);
    assert_eq!(summary.analyzed, 2);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.rejected, 0);
    // Two searches at 100 units, two duration lookups at 1 unit.
    assert_eq!(summary.quota_used, 202);
    assert_eq!(h.classifier.call_count(), 2);

    let ids: Vec<_> = summary.added.iter().map(|a| a.external_id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B"]);
    assert_eq!(store.all().len(), 2);
    assert_eq!(skip_reasons(&state), vec!["duplicate".to_string()]);
}

#[tokio::test]
async fn records_already_stored_are_skipped_as_duplicates() {
    let store = Arc::new(InMemoryStore::new());
    let seed = CurationRecord::from_accepted(
        &candidate("A", "Back take system"),
        "John Danaher",
        &QualityAssessment::rejected("seeded"),
        900,
    );
    store.insert(&seed).await.unwrap();
    store.update_status("A", RecordStatus::Removed).await.unwrap();

    let catalog = FakeCatalog::new().with_page("q", &[("A", "Back take system", 900)]);
    let h = harness(catalog, FakeClassifier::replying(instructional(90)), store);

    let state = h.service.run_to_completion(request(&["q"]), None).await.unwrap();
    let summary = state.summary.unwrap();
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.analyzed, 0);
    assert_eq!(h.classifier.call_count(), 0);
    assert_eq!(h.catalog.lookups.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn short_video_is_rejected_without_classification() {
    let catalog = FakeCatalog::new().with_page("q", &[("S", "Quick tip", 90)]);
    let h = harness(
        catalog,
        FakeClassifier::replying(instructional(95)),
        Arc::new(InMemoryStore::new()),
    );

    let state = h.service.run_to_completion(request(&["q"]), None).await.unwrap();
    let summary = state.summary.clone().unwrap();
    assert_eq!(summary.analyzed, 1);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.approved, 0);
    assert_eq!(h.classifier.call_count(), 0);
    assert_eq!(
        skip_reasons(&state),
        vec!["too short: 90s < 120s minimum".to_string()]
    );
}

#[tokio::test]
async fn low_score_and_off_target_are_rejected_with_reasons() {
    let catalog = FakeCatalog::new().with_page("q", &[("L", "Armbar basics", 600)]);
    let h = harness(
        catalog,
        FakeClassifier::replying(instructional(40)),
        Arc::new(InMemoryStore::new()),
    );
    let state = h.service.run_to_completion(request(&["q"]), None).await.unwrap();
    assert_eq!(
        skip_reasons(&state),
        vec!["score 40 below threshold 65: detailed teaching".to_string()]
    );

    let off_target = r#"{"is_instructional": true, "features_target": false, "score": 95,
        "reasoning": "different coach"}"#;
    let catalog = FakeCatalog::new().with_page("q", &[("O", "Armbar basics", 600)]);
    let h = harness(
        catalog,
        FakeClassifier::replying(off_target),
        Arc::new(InMemoryStore::new()),
    );
    let state = h.service.run_to_completion(request(&["q"]), None).await.unwrap();
    assert_eq!(
        skip_reasons(&state),
        vec!["does not feature target: different coach".to_string()]
    );
    assert_eq!(state.summary.unwrap().rejected, 1);
}

#[tokio::test]
async fn malformed_classifier_output_rejects_candidate() {
    let catalog = FakeCatalog::new().with_page("q", &[("M", "Guard retention", 600)]);
    let h = harness(
        catalog,
        FakeClassifier::replying("sure! here's my analysis"),
        Arc::new(InMemoryStore::new()),
    );
    let state = h.service.run_to_completion(request(&["q"]), None).await.unwrap();
    assert_eq!(state.status, RunStatus::Complete);
    let reasons = skip_reasons(&state);
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].starts_with("not instructional"));
    assert!(reasons[0].contains("parse error"), "reason was {:?}", reasons[0]);
    assert_eq!(state.summary.unwrap().rejected, 1);
}

#[tokio::test]
async fn unresolvable_duration_rejects_without_classification() {
    let catalog = FakeCatalog::new()
        .with_page("q", &[("D", "Leg drag passing", 600)])
        .without_duration("D");
    let h = harness(
        catalog,
        FakeClassifier::replying(instructional(90)),
        Arc::new(InMemoryStore::new()),
    );

    let state = h.service.run_to_completion(request(&["q"]), None).await.unwrap();
    assert_eq!(state.status, RunStatus::Complete);
    let summary = state.summary.clone().unwrap();
    assert_eq!(summary.analyzed, 1);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.approved, 0);
    assert_eq!(summary.quota_used, 101);
    assert_eq!(h.catalog.lookup_count(), 1);
    assert_eq!(h.classifier.call_count(), 0);

    let reasons = skip_reasons(&state);
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].starts_with("duration unavailable"), "reason was {:?}", reasons[0]);
    assert!(!kinds(&state).contains(&EventKind::Analyze));
}

#[tokio::test]
async fn failed_search_moves_on_to_next_query() {
    let catalog = FakeCatalog::new()
        .with_page("broken", &[("X", "Never seen", 600)])
        .with_page("working", &[("A", "Back take system", 900)])
        .failing_query("broken");
    let h = harness(
        catalog,
        FakeClassifier::replying(instructional(80)),
        Arc::new(InMemoryStore::new()),
    );

    let state = h
        .service
        .run_to_completion(request(&["broken", "working"]), None)
        .await
        .unwrap();
    assert_eq!(state.status, RunStatus::Complete);
    assert!(state.error.is_none());
    assert_eq!(h.catalog.search_count(), 2);

    let summary = state.summary.clone().unwrap();
    assert_eq!(summary.approved, 1);
    assert_eq!(summary.analyzed, 1);
    assert_eq!(summary.quota_used, 201);

    let search_error = state
        .events
        .iter()
        .find(|e| e.kind == EventKind::Error)
        .expect("search failure should be reported");
    assert!(search_error.message.contains("broken"));
    assert!(search_error.reason.as_deref().unwrap().contains("503"));
}

#[tokio::test]
async fn catalog_quota_aborts_with_partial_summary() {
    let catalog = FakeCatalog::new()
        .with_page("first", &[("A", "Back take system", 900)])
        .with_page("second", &[("B", "Body triangle", 600)])
        .with_page("third", &[("C", "Leg locks", 600)])
        .quota_after(1);
    let h = harness(
        catalog,
        FakeClassifier::replying(instructional(80)),
        Arc::new(InMemoryStore::new()),
    );

    let state = h
        .service
        .run_to_completion(request(&["first", "second", "third"]), None)
        .await
        .unwrap();

    assert_eq!(state.status, RunStatus::Failed);
    assert!(state.error.as_deref().unwrap().contains("quota exceeded"));
    assert_eq!(h.catalog.search_count(), 2);

    let summary = state.summary.clone().unwrap();
    assert_eq!(summary.approved, 1);
    assert_eq!(summary.quota_used, 201);

    let last = state.events.last().unwrap();
    assert_eq!(last.kind, EventKind::Error);
    assert!(last.summary.is_some());
}

#[tokio::test]
async fn classifier_quota_aborts_run() {
    let catalog = FakeCatalog::new().with_page("q", &[("A", "Back take system", 900), ("B", "Body triangle", 600)]);
    let h = harness(catalog, FakeClassifier::out_of_quota(), Arc::new(InMemoryStore::new()));

    let state = h.service.run_to_completion(request(&["q"]), None).await.unwrap();
    assert_eq!(state.status, RunStatus::Failed);
    assert_eq!(h.classifier.call_count(), 1);
    let summary = state.summary.unwrap();
    assert_eq!(summary.analyzed, 0);
    assert_eq!(summary.approved, 0);
}

#[tokio::test]
async fn cancel_ends_run_as_failed() {
    let catalog = FakeCatalog::new().hanging();
    let h = harness(
        catalog,
        FakeClassifier::replying(instructional(80)),
        Arc::new(InMemoryStore::new()),
    );

    let run_id = h.service.start_run(request(&["q"])).unwrap();
    // Wait until the search is in flight.
    for _ in 0..100 {
        if h.catalog.search_count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(h.service.cancel_run(&run_id));
    let state = wait_for_status(&h.service, &run_id, RunStatus::Failed).await;
    assert_eq!(state.error.as_deref(), Some("cancelled"));

    // The token is released once the run has been closed out.
    for _ in 0..100 {
        if !h.service.cancel_run(&run_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("cancel token was never released");
}

#[tokio::test]
async fn cancel_unknown_run_is_false() {
    let h = harness(
        FakeCatalog::new(),
        FakeClassifier::replying(instructional(80)),
        Arc::new(InMemoryStore::new()),
    );
    assert!(!h.service.cancel_run("no-such-run"));
}

#[derive(Clone, Copy, PartialEq)]
enum Seed {
    Real,
    /// Always empty, so a stored ID is only caught by the unique insert.
    Empty,
    /// Never returns.
    Hang,
}

/// In-memory store with a controllable dedup seed and insert latency.
struct WrappedStore {
    inner: InMemoryStore,
    seed: Seed,
    insert_delay: Option<Duration>,
    seeding: AtomicBool,
    inserting: AtomicBool,
}

impl WrappedStore {
    fn new(inner: InMemoryStore, seed: Seed, insert_delay: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            seed,
            insert_delay,
            seeding: AtomicBool::new(false),
            inserting: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl RecordStore for WrappedStore {
    async fn exists_by_external_id(&self, external_id: &str) -> Result<bool> {
        self.inner.exists_by_external_id(external_id).await
    }

    async fn known_external_ids(&self) -> Result<HashSet<String>> {
        self.seeding.store(true, Ordering::SeqCst);
        match self.seed {
            Seed::Real => self.inner.known_external_ids().await,
            Seed::Empty => Ok(HashSet::new()),
            Seed::Hang => std::future::pending().await,
        }
    }

    async fn insert(&self, record: &CurationRecord) -> Result<InsertOutcome> {
        self.inserting.store(true, Ordering::SeqCst);
        if let Some(delay) = self.insert_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.insert(record).await
    }

    async fn get(&self, external_id: &str) -> Result<Option<CurationRecord>> {
        self.inner.get(external_id).await
    }

    async fn query_by_evidence(&self, min_votes: u32) -> Result<Vec<CurationRecord>> {
        self.inner.query_by_evidence(min_votes).await
    }

    async fn update_status(&self, external_id: &str, status: RecordStatus) -> Result<()> {
        self.inner.update_status(external_id, status).await
    }

    async fn update_targeting(
        &self,
        external_id: &str,
        skill_levels: &BTreeSet<SkillLevel>,
    ) -> Result<()> {
        self.inner.update_targeting(external_id, skill_levels).await
    }

    async fn update_feedback(&self, external_id: &str, feedback: &FeedbackAggregate) -> Result<()> {
        self.inner.update_feedback(external_id, feedback).await
    }
}

async fn wait_until(flag: &AtomicBool) {
    for _ in 0..200 {
        if flag.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("flag never set");
}

#[tokio::test]
async fn cancel_interrupts_slow_dedup_seed() {
    let store = WrappedStore::new(InMemoryStore::new(), Seed::Hang, None);
    let catalog = FakeCatalog::new().with_page("q", &[("A", "Back take system", 900)]);
    let h = harness(catalog, FakeClassifier::replying(instructional(80)), store.clone());

    let run_id = h.service.start_run(request(&["q"])).unwrap();
    wait_until(&store.seeding).await;
    assert!(h.service.cancel_run(&run_id));

    let state = wait_for_status(&h.service, &run_id, RunStatus::Failed).await;
    assert_eq!(state.error.as_deref(), Some("cancelled"));
    assert_eq!(h.catalog.search_count(), 0);
}

#[tokio::test]
async fn cancel_during_insert_still_counts_committed_record() {
    let store = WrappedStore::new(
        InMemoryStore::new(),
        Seed::Real,
        Some(Duration::from_millis(200)),
    );
    let catalog = FakeCatalog::new()
        .with_page("first", &[("A", "Back take system", 900)])
        .with_page("second", &[("B", "Body triangle", 600)]);
    let h = harness(catalog, FakeClassifier::replying(instructional(80)), store.clone());

    let run_id = h.service.start_run(request(&["first", "second"])).unwrap();
    wait_until(&store.inserting).await;
    assert!(h.service.cancel_run(&run_id));

    let state = wait_for_status(&h.service, &run_id, RunStatus::Failed).await;
    assert_eq!(state.error.as_deref(), Some("cancelled"));

    let summary = state.summary.unwrap();
    assert_eq!(summary.approved, 1);
    assert_eq!(summary.added[0].external_id, "A");
    assert!(store.inner.exists_by_external_id("A").await.unwrap());
    // Nothing after the cancelled point ran.
    assert_eq!(h.catalog.search_count(), 1);
    assert!(!store.inner.exists_by_external_id("B").await.unwrap());
}

#[tokio::test]
async fn insert_conflict_counts_as_duplicate() {
    let inner = InMemoryStore::new();
    let seed = CurationRecord::from_accepted(
        &candidate("A", "Back take system"),
        "John Danaher",
        &QualityAssessment::rejected("inserted by another run"),
        900,
    );
    inner.insert(&seed).await.unwrap();

    let catalog = FakeCatalog::new().with_page("q", &[("A", "Back take system", 900)]);
    let h = harness(
        catalog,
        FakeClassifier::replying(instructional(80)),
        WrappedStore::new(inner, Seed::Empty, None),
    );

    let state = h.service.run_to_completion(request(&["q"]), None).await.unwrap();
    assert_eq!(state.status, RunStatus::Complete);
    let summary = state.summary.clone().unwrap();
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.approved, 0);
    assert_eq!(summary.analyzed, 0);
    assert!(!kinds(&state).contains(&EventKind::Error));
}

#[tokio::test]
async fn event_trail_is_ordered_and_ends_with_done() {
    let catalog = FakeCatalog::new().with_page("q", &[("A", "Back take system", 900)]);
    let h = harness(
        catalog,
        FakeClassifier::replying(instructional(80)),
        Arc::new(InMemoryStore::new()),
    );

    let state = h.service.run_to_completion(request(&["q"]), None).await.unwrap();
    assert_eq!(
        kinds(&state),
        vec![
            EventKind::Info,
            EventKind::Search,
            EventKind::Analyze,
            EventKind::Added,
            EventKind::Done,
        ]
    );
    let seqs: Vec<u64> = state.events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    assert!(state.finished_at.is_some());

    let done = state.events.last().unwrap();
    assert_eq!(done.summary.as_ref().unwrap().approved, 1);
}

#[tokio::test]
async fn invalid_request_is_refused_before_start() {
    let h = harness(
        FakeCatalog::new(),
        FakeClassifier::replying(instructional(80)),
        Arc::new(InMemoryStore::new()),
    );
    let mut req = request(&["q"]);
    req.target_entity = "  ".to_string();
    assert!(h.service.start_run(req).is_err());
    assert!(h.service.runs().is_empty());
}
