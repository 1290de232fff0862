//! TOML configuration parsing and validation.
//!
//! Only `[db]` is required; every other section falls back to the
//! defaults of the retrieval engine. See [`load_config`] for the
//! validation rules.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use codetrail_core::context::ContextFormat;
use codetrail_core::hierarchy::HierarchyOptions;
use codetrail_core::ranking::RankingConfig;
use codetrail_core::search::{SearchParams, MAX_CONTEXT_WINDOW, MAX_LIMIT};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ranking: RankingSection,
    #[serde(default)]
    pub search: SearchSection,
    #[serde(default)]
    pub hierarchy: HierarchySection,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RankingSection {
    #[serde(default = "default_latest_version_boost")]
    pub latest_version_boost: f64,
    #[serde(default = "default_recency_decay_factor")]
    pub recency_decay_factor: f64,
    #[serde(default)]
    pub min_score: f64,
}

impl Default for RankingSection {
    fn default() -> Self {
        Self {
            latest_version_boost: default_latest_version_boost(),
            recency_decay_factor: default_recency_decay_factor(),
            min_score: 0.0,
        }
    }
}

impl RankingSection {
    pub fn to_ranking_config(&self) -> RankingConfig {
        RankingConfig {
            latest_version_boost: self.latest_version_boost,
            recency_decay_factor: self.recency_decay_factor,
            min_score: self.min_score,
        }
    }
}

fn default_latest_version_boost() -> f64 {
    0.15
}
fn default_recency_decay_factor() -> f64 {
    0.10
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchSection {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub context_before: i64,
    #[serde(default)]
    pub context_after: i64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            context_before: 0,
            context_after: 0,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl SearchSection {
    pub fn to_search_params(&self) -> SearchParams {
        SearchParams {
            limit: self.limit,
            context_before: self.context_before,
            context_after: self.context_after,
            ..SearchParams::default()
        }
    }
}

fn default_limit() -> i64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct HierarchySection {
    #[serde(default = "default_true")]
    pub include_parent: bool,
    #[serde(default)]
    pub include_children: bool,
    #[serde(default)]
    pub include_ancestors: bool,
    #[serde(default)]
    pub max_depth: usize,
}

impl Default for HierarchySection {
    fn default() -> Self {
        Self {
            include_parent: true,
            include_children: false,
            include_ancestors: false,
            max_depth: 0,
        }
    }
}

impl HierarchySection {
    pub fn to_options(&self) -> HierarchyOptions {
        HierarchyOptions {
            include_parent: self.include_parent,
            include_children: self.include_children,
            include_ancestors: self.include_ancestors,
            max_depth: self.max_depth,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextSection {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            format: default_format(),
        }
    }
}

impl ContextSection {
    pub fn context_format(&self) -> Result<ContextFormat> {
        Ok(self.format.parse::<ContextFormat>()?)
    }
}

fn default_max_tokens() -> usize {
    8000
}
fn default_format() -> String {
    "hierarchical".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Read and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let ranking = &config.ranking;
    if !(0.0..=1.0).contains(&ranking.latest_version_boost) {
        bail!("ranking.latest_version_boost must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&ranking.recency_decay_factor) {
        bail!("ranking.recency_decay_factor must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&ranking.min_score) {
        bail!("ranking.min_score must be in [0.0, 1.0]");
    }

    let search = &config.search;
    if !(1..=MAX_LIMIT).contains(&search.limit) {
        bail!("search.limit must be between 1 and {}", MAX_LIMIT);
    }
    if !(0..=MAX_CONTEXT_WINDOW).contains(&search.context_before)
        || !(0..=MAX_CONTEXT_WINDOW).contains(&search.context_after)
    {
        bail!(
            "search.context_before and search.context_after must be between 0 and {}",
            MAX_CONTEXT_WINDOW
        );
    }
    if search.timeout_secs == 0 {
        bail!("search.timeout_secs must be > 0");
    }

    if config.context.max_tokens == 0 {
        bail!("context.max_tokens must be > 0");
    }
    config.context.context_format()?;

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}
