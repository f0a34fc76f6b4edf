use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // external_id is the global dedup key; removed rows stay as tombstones.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS curation_records (
            external_id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            target_entity TEXT NOT NULL,
            technique TEXT NOT NULL DEFAULT '',
            technique_type TEXT NOT NULL DEFAULT '',
            position TEXT NOT NULL DEFAULT '',
            ruleset TEXT NOT NULL DEFAULT 'unknown',
            quality_score INTEGER NOT NULL,
            duration_secs INTEGER NOT NULL,
            channel TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'active',
            skill_levels TEXT NOT NULL DEFAULT '[]',
            total_votes INTEGER NOT NULL DEFAULT 0,
            helpful_votes INTEGER NOT NULL DEFAULT 0,
            quality_issue_count INTEGER NOT NULL DEFAULT 0,
            context_issue_count INTEGER NOT NULL DEFAULT 0,
            too_advanced_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS feedback_votes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT NOT NULL,
            helpful INTEGER NOT NULL,
            category TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (external_id) REFERENCES curation_records(external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_runs (
            run_id TEXT PRIMARY KEY,
            target_entity TEXT NOT NULL,
            status TEXT NOT NULL,
            summary_json TEXT,
            error TEXT,
            started_at INTEGER NOT NULL,
            finished_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_status ON curation_records(status)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_records_total_votes ON curation_records(total_votes)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_feedback_external_id ON feedback_votes(external_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_runs_started_at ON ingestion_runs(started_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
