//! Fake collaborators and config helpers shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use reel_curator::config::Config;
use reel_curator::error::{CollaboratorError, CollaboratorResult};
use reel_curator::models::CandidateItem;
use reel_curator::traits::{CatalogSearch, TextClassifier};
use tempfile::TempDir;

// ─── Catalog ────────────────────────────────────────────────────────

/// Catalog with canned result pages keyed by query.
#[derive(Default)]
pub struct FakeCatalog {
    pages: HashMap<String, Vec<CandidateItem>>,
    durations: HashMap<String, u32>,
    failing_queries: HashSet<String>,
    quota_after: Option<usize>,
    hang: bool,
    pub searches: AtomicUsize,
    pub lookups: AtomicUsize,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a result page: `(external_id, title, duration_secs)` in ranking order.
    pub fn with_page(mut self, query: &str, items: &[(&str, &str, u32)]) -> Self {
        let page = items
            .iter()
            .map(|(id, title, duration)| {
                self.durations.insert(id.to_string(), *duration);
                candidate(id, title)
            })
            .collect();
        self.pages.insert(query.to_string(), page);
        self
    }

    /// Forget the duration of an item so its lookup fails transiently.
    pub fn without_duration(mut self, external_id: &str) -> Self {
        self.durations.remove(external_id);
        self
    }

    /// Make searches for `query` fail with a transient error.
    pub fn failing_query(mut self, query: &str) -> Self {
        self.failing_queries.insert(query.to_string());
        self
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Fail every search after the first `n` with a quota error.
    pub fn quota_after(mut self, n: usize) -> Self {
        self.quota_after = Some(n);
        self
    }

    /// Never answer a search.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogSearch for FakeCatalog {
    fn name(&self) -> &str {
        "fake"
    }

    async fn search(&self, query: &str, _max: u32) -> CollaboratorResult<Vec<CandidateItem>> {
        let n = self.searches.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(limit) = self.quota_after {
            if n >= limit {
                return Err(CollaboratorError::quota("fake", "daily limit reached"));
            }
        }
        if self.failing_queries.contains(query) {
            return Err(CollaboratorError::transient("HTTP 503 from catalog"));
        }
        Ok(self.pages.get(query).cloned().unwrap_or_default())
    }

    async fn get_duration(&self, external_id: &str) -> CollaboratorResult<u32> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.durations
            .get(external_id)
            .copied()
            .ok_or_else(|| CollaboratorError::transient("unknown video"))
    }
}

pub fn candidate(id: &str, title: &str) -> CandidateItem {
    CandidateItem {
        external_id: id.to_string(),
        title: title.to_string(),
        description: format!("{} explained step by step", title),
        channel: "Test Academy".to_string(),
        published_at: None,
        thumbnail_url: None,
        duration_secs: None,
    }
}

// ─── Classifier ─────────────────────────────────────────────────────

/// Classifier that returns the same reply (or quota error) on every call.
pub struct FakeClassifier {
    reply: Option<String>,
    pub calls: AtomicUsize,
}

impl FakeClassifier {
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn out_of_quota() -> Self {
        Self {
            reply: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextClassifier for FakeClassifier {
    fn name(&self) -> &str {
        "fake"
    }

    async fn classify(&self, _system: &str, _prompt: &str) -> CollaboratorResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply
            .clone()
            .ok_or_else(|| CollaboratorError::quota("fake-llm", "insufficient_quota"))
    }
}

/// Classifier output for an instructional video featuring the target.
pub fn instructional(score: u8) -> String {
    format!(
        r#"{{"is_instructional": true, "features_target": true, "technique": "back take",
            "technique_type": "transition", "position": "back", "ruleset": "nogi",
            "score": {}, "reasoning": "detailed teaching"}}"#,
        score
    )
}

// ─── Config ─────────────────────────────────────────────────────────

pub fn test_config(tmp: &TempDir, port: u16) -> Config {
    let db_path = tmp.path().join("reel.sqlite");
    let content = format!(
        r#"
[db]
path = "{}"

[server]
bind = "127.0.0.1:{}"
"#,
        db_path.display(),
        port
    );
    toml::from_str(&content).unwrap()
}

pub fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}
