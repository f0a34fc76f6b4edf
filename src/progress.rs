//! Run progress broadcast.
//!
//! [`RunStore`] holds one append-only event log per ingestion run and fans
//! each appended event out to the sinks subscribed to that run. The HTTP
//! SSE endpoint subscribes a [`ChannelSink`]; `reel run` subscribes a
//! stderr sink chosen by [`ProgressMode`].
//!
//! # Ordering
//!
//! Each run has its own lock. `append` assigns the next sequence number,
//! stores the event and delivers it to every sink while holding that lock;
//! `subscribe` replays the stored backlog and attaches the sink under the
//! same lock. A subscriber therefore sees events `1..=N` exactly once, in
//! order, no matter how it races with appends.
//!
//! Delivery is synchronous and must not block. A sink whose delivery fails
//! is detached; the appending caller never sees the failure.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::models::{EventKind, ProgressEvent, RunState, RunStatus, RunSummary};

/// Handle returned by [`RunStore::subscribe`].
pub type SubscriptionId = u64;

/// The observer went away; the sink will be detached.
#[derive(Debug)]
pub struct SinkClosed;

/// Receives events for one run.
pub trait ProgressSink: Send + Sync {
    fn deliver(&self, event: &ProgressEvent) -> std::result::Result<(), SinkClosed>;
}

struct RunEntry {
    state: RunState,
    sinks: Vec<(SubscriptionId, Arc<dyn ProgressSink>)>,
}

impl RunEntry {
    fn push(&mut self, mut event: ProgressEvent) -> u64 {
        let seq = self.state.events.len() as u64 + 1;
        event.seq = seq;
        self.sinks
            .retain(|(id, sink)| match sink.deliver(&event) {
                Ok(()) => true,
                Err(SinkClosed) => {
                    debug!(subscription = id, "dropping closed progress sink");
                    false
                }
            });
        self.state.events.push(event);
        seq
    }
}

/// In-memory owner of all run state.
pub struct RunStore {
    runs: RwLock<HashMap<String, Arc<Mutex<RunEntry>>>>,
    next_subscription: AtomicU64,
    retention: chrono::Duration,
}

fn lock(entry: &Mutex<RunEntry>) -> MutexGuard<'_, RunEntry> {
    entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RunStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::hours(24)),
        }
    }

    fn entry(&self, run_id: &str) -> Option<Arc<Mutex<RunEntry>>> {
        let runs = self.runs.read().unwrap_or_else(|p| p.into_inner());
        runs.get(run_id).cloned()
    }

    /// Register a new run in `running` status.
    pub fn start(&self, run_id: &str, target_entity: &str) -> Result<()> {
        let mut runs = self.runs.write().unwrap_or_else(|p| p.into_inner());
        if runs.contains_key(run_id) {
            bail!("run already exists: {}", run_id);
        }
        let state = RunState {
            run_id: run_id.to_string(),
            target_entity: target_entity.to_string(),
            status: RunStatus::Running,
            events: Vec::new(),
            summary: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        runs.insert(
            run_id.to_string(),
            Arc::new(Mutex::new(RunEntry {
                state,
                sinks: Vec::new(),
            })),
        );
        Ok(())
    }

    /// Append an event to a running run and broadcast it. Returns its sequence number.
    pub fn append(&self, run_id: &str, event: ProgressEvent) -> Result<u64> {
        let Some(entry) = self.entry(run_id) else {
            bail!("unknown run: {}", run_id);
        };
        let mut entry = lock(&entry);
        if entry.state.status.is_terminal() {
            bail!("run {} is already {}", run_id, entry.state.status.as_str());
        }
        Ok(entry.push(event))
    }

    /// Replay the backlog into `sink`, then attach it for live events.
    ///
    /// For a run that has already finished the sink receives the backlog
    /// only and is not attached.
    pub fn subscribe(&self, run_id: &str, sink: Arc<dyn ProgressSink>) -> Result<SubscriptionId> {
        let Some(entry) = self.entry(run_id) else {
            bail!("unknown run: {}", run_id);
        };
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let mut entry = lock(&entry);

        for event in &entry.state.events {
            if sink.deliver(event).is_err() {
                return Ok(id);
            }
        }
        if !entry.state.status.is_terminal() {
            entry.sinks.push((id, sink));
        }
        Ok(id)
    }

    /// Subscribe through an unbounded channel. The receiver yields the
    /// backlog, then live events, and closes once the run finishes.
    pub fn subscribe_channel(
        &self,
        run_id: &str,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<ProgressEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(run_id, Arc::new(ChannelSink(tx)))?;
        Ok((id, rx))
    }

    /// Detach a sink. Returns `false` if it was not attached.
    pub fn unsubscribe(&self, run_id: &str, subscription: SubscriptionId) -> bool {
        let Some(entry) = self.entry(run_id) else {
            return false;
        };
        let mut entry = lock(&entry);
        let before = entry.sinks.len();
        entry.sinks.retain(|(id, _)| *id != subscription);
        entry.sinks.len() != before
    }

    pub fn snapshot(&self, run_id: &str) -> Option<RunState> {
        self.entry(run_id).map(|e| lock(&e).state.clone())
    }

    /// Close a run as `complete` with a final `done` event carrying the summary.
    pub fn complete(&self, run_id: &str, summary: RunSummary) -> Result<()> {
        let message = format!(
            "done: {} analyzed, {} approved, {} rejected, {} duplicates, {} quota used",
            summary.analyzed,
            summary.approved,
            summary.rejected,
            summary.duplicates,
            format_number(summary.quota_used as u64)
        );
        let event = ProgressEvent::new(EventKind::Done, message).with_summary(summary.clone());
        self.finish(run_id, RunStatus::Complete, event, summary, None)
    }

    /// Close a run as `failed`, keeping the partial summary and the error text.
    pub fn fail(&self, run_id: &str, error: &str, summary: RunSummary) -> Result<()> {
        let event = ProgressEvent::new(EventKind::Error, format!("run failed: {}", error))
            .with_reason(error)
            .with_summary(summary.clone());
        self.finish(
            run_id,
            RunStatus::Failed,
            event,
            summary,
            Some(error.to_string()),
        )
    }

    fn finish(
        &self,
        run_id: &str,
        status: RunStatus,
        event: ProgressEvent,
        summary: RunSummary,
        error: Option<String>,
    ) -> Result<()> {
        let Some(entry) = self.entry(run_id) else {
            bail!("unknown run: {}", run_id);
        };
        let mut entry = lock(&entry);
        if entry.state.status.is_terminal() {
            bail!("run {} is already {}", run_id, entry.state.status.as_str());
        }
        entry.push(event);
        entry.state.status = status;
        entry.state.summary = Some(summary);
        entry.state.error = error;
        entry.state.finished_at = Some(Utc::now());
        // No further events can arrive; dropping the sinks closes channel receivers.
        entry.sinks.clear();
        Ok(())
    }

    /// Remove terminal runs that finished more than the retention window before `now`.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let mut runs = self.runs.write().unwrap_or_else(|p| p.into_inner());
        let before = runs.len();
        runs.retain(|_, entry| {
            let entry = lock(entry);
            match (entry.state.status.is_terminal(), entry.state.finished_at) {
                (true, Some(finished)) => finished > cutoff,
                _ => true,
            }
        });
        before - runs.len()
    }

    /// Periodically call [`sweep_expired`](Self::sweep_expired).
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = self.sweep_expired(Utc::now());
                if removed > 0 {
                    info!(removed, "swept expired runs");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.runs.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Forwards events into a tokio channel (used by the SSE endpoint).
pub struct ChannelSink(pub mpsc::UnboundedSender<ProgressEvent>);

impl ProgressSink for ChannelSink {
    fn deliver(&self, event: &ProgressEvent) -> std::result::Result<(), SinkClosed> {
        self.0.send(event.clone()).map_err(|_| SinkClosed)
    }
}

/// Human-friendly progress on stderr: "🔍 search  searching 'knee slice'".
pub struct StderrSink;

impl ProgressSink for StderrSink {
    fn deliver(&self, event: &ProgressEvent) -> std::result::Result<(), SinkClosed> {
        let mut line = format!("{} {:<8} {}", event.icon, event.kind.as_str(), event.message);
        if let Some(reason) = &event.reason {
            if event.kind == EventKind::Skipped {
                line.push_str(&format!("  ({})", reason));
            }
        }
        line.push('\n');
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
        Ok(())
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonSink;

impl ProgressSink for JsonSink {
    fn deliver(&self, event: &ProgressEvent) -> std::result::Result<(), SinkClosed> {
        if let Ok(line) = serde_json::to_string(event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
        Ok(())
    }
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn sink(&self) -> Option<Arc<dyn ProgressSink>> {
        match self {
            ProgressMode::Off => None,
            ProgressMode::Human => Some(Arc::new(StderrSink)),
            ProgressMode::Json => Some(Arc::new(JsonSink)),
        }
    }
}
