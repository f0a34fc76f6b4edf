//! Catalogue overview and run history.
//!
//! Backs `reel stats` (record counts per status and per target entity) and
//! `reel runs` (persisted ingestion run history).

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::progress::format_number;
use crate::sqlite_store::SqliteStore;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());

    let total_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM curation_records")
        .fetch_one(&pool)
        .await?;
    let total_votes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM feedback_votes")
        .fetch_one(&pool)
        .await?;
    let last_run: Option<i64> = sqlx::query_scalar("SELECT MAX(started_at) FROM ingestion_runs")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Reel Curator — Catalogue Stats");
    println!("==============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Records:     {}", format_number(total_records.max(0) as u64));
    println!("  Votes:       {}", format_number(total_votes.max(0) as u64));
    println!(
        "  Last run:    {}",
        last_run
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );

    let by_status = store.status_counts().await?;
    if !by_status.is_empty() {
        println!();
        println!("  By status:");
        for (status, n) in &by_status {
            println!("    {:<10} {:>8}", status, n);
        }
    }

    let by_entity = store.entity_counts().await?;
    if !by_entity.is_empty() {
        println!();
        println!("  By target (excluding removed):");
        println!("  {:<32} {:>8} {:>10}", "TARGET", "RECORDS", "AVG SCORE");
        println!("  {}", "-".repeat(52));
        for (entity, n, avg) in &by_entity {
            println!("  {:<32} {:>8} {:>10.1}", entity, n, avg);
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Print the most recent persisted runs.
pub async fn run_history(config: &Config, limit: u32) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let runs = store.list_runs(limit).await?;

    if runs.is_empty() {
        println!("No runs recorded.");
        pool.close().await;
        return Ok(());
    }

    println!(
        "{:<36}  {:<20} {:<9} {:>8} {:>8} {:>8}  STARTED",
        "RUN", "TARGET", "STATUS", "ANALYZED", "ADDED", "QUOTA"
    );
    for run in &runs {
        let (analyzed, approved, quota) = run
            .summary
            .as_ref()
            .map(|s| (s.analyzed, s.approved, s.quota_used))
            .unwrap_or_default();
        println!(
            "{:<36}  {:<20} {:<9} {:>8} {:>8} {:>8}  {}",
            run.run_id,
            truncate(&run.target_entity, 20),
            run.status,
            analyzed,
            approved,
            format_number(quota as u64),
            format_ts_relative(run.started_at.timestamp())
        );
        if let Some(err) = &run.error {
            println!("    error: {}", err);
        }
    }

    pool.close().await;
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_names() {
        assert_eq!(truncate("Danaher", 20), "Danaher");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }

    #[test]
    fn formats_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
    }
}
