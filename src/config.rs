use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::write_core::{AtomicWriter, WriteOptions};

/// Overrides `[store] home`.
pub const HOME_ENV: &str = "FEEDFWD_HOME";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub inject: InjectConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    #[serde(default)]
    pub duplicate: DuplicateConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// Knowledge base root. Default: ~/.config/feedfwd
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home: Option<PathBuf>,
}

/// Session-start selection limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectConfig {
    pub min_relevance: f64,
    pub max_cards: usize,
    pub max_total_tokens: usize,
    /// Reserved for the injection header line and bullet markers.
    pub header_tokens: usize,
    /// Per-card cap on injection text; reported, not enforced on read.
    pub max_injection_tokens: usize,
    pub doc_file: String,
    pub doc_char_cap: usize,
    pub history_entries: usize,
}

impl Default for InjectConfig {
    fn default() -> Self {
        Self {
            min_relevance: 0.2,
            max_cards: 3,
            max_total_tokens: 400,
            header_tokens: 25,
            max_injection_tokens: 250,
            doc_file: "CLAUDE.md".into(),
            doc_char_cap: 2000,
            history_entries: 5,
        }
    }
}

/// Session-end implicit feedback deltas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub strong_delta: f64,
    pub moderate_delta: f64,
    pub ignored_delta: f64,
    /// Highest score implicit feedback alone can push a card to.
    pub implicit_cap: f64,
    pub max_untracked_bytes: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            strong_delta: 0.10,
            moderate_delta: 0.05,
            ignored_delta: -0.02,
            implicit_cap: 0.70,
            max_untracked_bytes: 50_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
    pub threshold: f64,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self { threshold: 0.60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub timeout_ms: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub colors: bool,
    pub emoji: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            colors: true,
            emoji: true,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = get_config_path()?;

        let config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.duplicate.threshold)?;
        if !(0.0..=1.0).contains(&self.feedback.implicit_cap) {
            bail!(
                "feedback.implicit_cap must be within [0, 1], got {}",
                self.feedback.implicit_cap
            );
        }
        if !(0.0..1.0).contains(&self.inject.min_relevance) {
            bail!(
                "inject.min_relevance must be within [0, 1), got {}",
                self.inject.min_relevance
            );
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let path = get_config_path()?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        AtomicWriter::new(WriteOptions::durable())
            .write_str(&path, &content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn create_default() -> Result<PathBuf> {
        let config = Config::default();
        config.save()?;
        get_config_path()
    }

    /// Knowledge base root: $FEEDFWD_HOME > [store] home > ~/.config/feedfwd
    pub fn knowledge_home(&self) -> PathBuf {
        if let Ok(p) = std::env::var(HOME_ENV) {
            if !p.trim().is_empty() {
                return PathBuf::from(p);
            }
        }
        if let Some(home) = &self.store.home {
            return home.clone();
        }
        default_knowledge_home()
    }
}

/// Duplicate threshold must be a usable fraction of the proposed keywords.
pub fn validate_threshold(threshold: f64) -> Result<()> {
    if !(threshold > 0.0 && threshold <= 1.0) {
        bail!("duplicate threshold must be within (0, 1], got {threshold}");
    }
    Ok(())
}

fn default_knowledge_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("feedfwd")
}

fn get_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    Ok(config_dir.join("feedfwd").join("config.toml"))
}

pub fn show_config() -> Result<()> {
    let path = get_config_path()?;
    println!("Config: {}", path.display());

    let config = if path.exists() {
        Config::load()?
    } else {
        println!("(default config, file not created)");
        Config::default()
    };
    println!("Knowledge base: {}", config.knowledge_home().display());
    println!();
    println!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}
