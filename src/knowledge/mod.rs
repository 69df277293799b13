//! Knowledge cards: data model, authoritative markdown records, the derived
//! `_index.json` cache, duplicate detection and score bookkeeping.
//!
//! Every card lives at `<home>/knowledge/<category>/<name>.md`. The index is a
//! projection of those records and can always be regenerated with
//! [`CardStore::rebuild`].

pub mod card_file;
pub mod duplicate;
pub mod score;
pub mod session_log;
pub mod store;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::tokenizer::count_tokens;

pub use duplicate::find_duplicate;
pub use score::ScoreEngine;
pub use session_log::SessionLog;
pub use store::{CardIndex, CardStore, IndexEntry};

pub const DEFAULT_SCORE: f64 = 0.50;
pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 1.0;

/// Each becomes a subdirectory under `knowledge/`.
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "prompting",
    "python",
    "workflow",
    "tools",
    "testing",
    "architecture",
    "debugging",
];

/// Categories that pay off in documentation/planning-heavy sessions.
pub const PLANNING_CATEGORIES: &[&str] = &["workflow", "prompting"];

/// Categories that pay off in implementation-heavy sessions.
pub const CODE_CATEGORIES: &[&str] = &["python", "tools", "testing", "debugging", "architecture"];

/// What makes a card relevant to a project or session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Triggers {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub file_patterns: Vec<String>,
    #[serde(default)]
    pub task_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    /// kebab-case, also the record file stem
    pub name: String,
    /// URL, "pasted-text" or "screenshot"
    pub source: String,
    /// ISO date, e.g. "2026-02-12"
    pub captured: String,
    pub category: String,

    pub score: f64,
    pub times_surfaced: u32,
    pub times_useful: u32,

    pub triggers: Triggers,

    /// Cached token count of `injection_text`, refreshed on every write.
    pub injection_tokens: usize,
    /// Human-facing summary, never injected.
    pub insight: String,
    pub injection_text: String,
    pub example: String,
}

impl Card {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: String::new(),
            captured: String::new(),
            category: category.into(),
            score: DEFAULT_SCORE,
            times_surfaced: 0,
            times_useful: 0,
            triggers: Triggers::default(),
            injection_tokens: 0,
            insight: String::new(),
            injection_text: String::new(),
            example: String::new(),
        }
    }

    /// Path relative to the knowledge dir, e.g. `prompting/ultrathink.md`.
    pub fn relative_path(&self) -> String {
        format!("{}/{}.md", self.category, self.name)
    }

    /// "uv-inline-scripts" → "Uv Inline Scripts"
    pub fn display_name(&self) -> String {
        display_name(&self.name)
    }

    pub fn to_index_entry(&self) -> IndexEntry {
        IndexEntry {
            name: self.name.clone(),
            file: self.relative_path(),
            category: self.category.clone(),
            score: round_score(self.score),
            times_surfaced: self.times_surfaced,
            times_useful: self.times_useful,
            injection_tokens: self.injection_tokens,
            keywords: self.triggers.keywords.clone(),
            file_patterns: self.triggers.file_patterns.clone(),
            task_types: self.triggers.task_types.clone(),
        }
    }
}

/// Inputs for [`create_card`]; mirrors the `feedfwd add` flags.
#[derive(Debug, Clone, Default)]
pub struct NewCard {
    pub name: String,
    pub source: String,
    pub category: String,
    pub insight: String,
    pub injection_text: String,
    pub example: String,
    pub keywords: Vec<String>,
    pub file_patterns: Vec<String>,
    pub task_types: Vec<String>,
    pub score: Option<f64>,
}

/// Build a card, stamp today's date, count its injection tokens, and write
/// both the record and the index entry.
pub fn create_card(store: &CardStore, new: NewCard) -> Result<Card> {
    validate_slug("name", &new.name)?;
    validate_slug("category", &new.category)?;

    let mut card = Card::new(new.name.trim(), new.category.trim());
    card.source = new.source;
    card.captured = chrono::Utc::now().format("%Y-%m-%d").to_string();
    card.score = clamp_score(new.score.unwrap_or(DEFAULT_SCORE));
    card.triggers = Triggers {
        keywords: normalize_list(new.keywords),
        file_patterns: normalize_list(new.file_patterns),
        task_types: normalize_list(new.task_types),
    };
    card.injection_tokens = count_tokens(&new.injection_text);
    card.insight = new.insight;
    card.injection_text = new.injection_text;
    card.example = new.example;

    store.upsert(card)
}

pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return DEFAULT_SCORE;
    }
    score.clamp(MIN_SCORE, MAX_SCORE)
}

/// Scores are persisted with two decimals.
pub fn round_score(score: f64) -> f64 {
    (score * 100.0).round() / 100.0
}

pub fn display_name(name: &str) -> String {
    name.split('-')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a comma-separated CLI value into trimmed, non-empty items.
pub fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let item = item.trim().to_string();
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Names and categories become path components.
fn validate_slug(field: &str, value: &str) -> Result<()> {
    let value = value.trim();
    if value.is_empty() {
        bail!("card {field} must not be empty");
    }
    if value.contains(['/', '\\']) || value.starts_with('.') {
        bail!("card {field} must be a plain file name, got '{value}'");
    }
    Ok(())
}
