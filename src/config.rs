//! TOML configuration parsing and validation.
//!
//! Only `[db]` and `[server]` are required; every other section falls back
//! to defaults. API keys are never stored in the file, only the name of the
//! environment variable that holds them.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use reel_curator_core::lifecycle::LifecycleThresholds;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub curation: CurationConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_provider")]
    pub provider: String,
    #[serde(default = "default_youtube_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub transcript_endpoint: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            provider: default_catalog_provider(),
            api_key_env: default_youtube_key_env(),
            page_size: default_page_size(),
            base_url: None,
            transcript_endpoint: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_catalog_provider() -> String {
    "disabled".to_string()
}
fn default_youtube_key_env() -> String {
    "YOUTUBE_API_KEY".to_string()
}
fn default_page_size() -> u32 {
    25
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_classifier_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            provider: default_classifier_provider(),
            model: default_model(),
            api_key_env: default_openai_key_env(),
            base_url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

fn default_classifier_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_excerpt_chars() -> usize {
    1200
}

#[derive(Debug, Deserialize, Clone)]
pub struct CurationConfig {
    #[serde(default = "default_min_quality")]
    pub min_quality: u8,
    #[serde(default = "default_min_duration")]
    pub min_duration_secs: u32,
    #[serde(default = "default_transcript_min_chars")]
    pub transcript_min_chars: usize,
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            min_quality: default_min_quality(),
            min_duration_secs: default_min_duration(),
            transcript_min_chars: default_transcript_min_chars(),
        }
    }
}

fn default_min_quality() -> u8 {
    65
}
fn default_min_duration() -> u32 {
    120
}
fn default_transcript_min_chars() -> usize {
    reel_curator_core::rubric::TRANSCRIPT_MIN_CHARS
}

#[derive(Debug, Deserialize, Clone)]
pub struct LifecycleConfig {
    #[serde(default = "default_min_evidence")]
    pub min_evidence: u32,
    #[serde(default = "default_review_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_top_tier_votes")]
    pub top_tier_min_votes: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            min_evidence: default_min_evidence(),
            interval_secs: default_review_interval(),
            top_tier_min_votes: default_top_tier_votes(),
        }
    }
}

impl LifecycleConfig {
    pub fn thresholds(&self) -> LifecycleThresholds {
        LifecycleThresholds {
            min_evidence: self.min_evidence,
            top_tier_min_votes: self.top_tier_min_votes,
            ..LifecycleThresholds::default()
        }
    }
}

fn default_min_evidence() -> u32 {
    50
}
fn default_review_interval() -> u64 {
    6 * 60 * 60
}
fn default_top_tier_votes() -> u32 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProgressConfig {
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_retention_hours() -> u64 {
    24
}
fn default_sweep_interval() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.curation.min_quality > 100 {
        anyhow::bail!("curation.min_quality must be in [0, 100]");
    }

    if !(1..=50).contains(&config.catalog.page_size) {
        anyhow::bail!("catalog.page_size must be in [1, 50]");
    }

    if config.lifecycle.min_evidence == 0 {
        anyhow::bail!("lifecycle.min_evidence must be > 0");
    }

    if config.lifecycle.interval_secs == 0 {
        anyhow::bail!("lifecycle.interval_secs must be > 0");
    }

    if config.progress.retention_hours == 0 {
        anyhow::bail!("progress.retention_hours must be > 0");
    }

    if config.progress.sweep_interval_secs == 0 {
        anyhow::bail!("progress.sweep_interval_secs must be > 0");
    }

    match config.catalog.provider.as_str() {
        "disabled" | "youtube" => {}
        other => anyhow::bail!(
            "Unknown catalog provider: '{}'. Must be disabled or youtube.",
            other
        ),
    }

    match config.classifier.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown classifier provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.classifier.excerpt_chars == 0 {
        anyhow::bail!("classifier.excerpt_chars must be > 0");
    }

    Ok(())
}
