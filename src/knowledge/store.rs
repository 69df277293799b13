//! Card persistence: authoritative per-card markdown records plus the
//! `_index.json` projection used for fast scans.
//!
//! Writes always go record first, index second. If the index write fails the
//! records are still correct and `rebuild()` restores the index from them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::card_file::{parse_card, render_card};
use super::{clamp_score, round_score, Card};
use crate::tokenizer::count_tokens;
use crate::write_core::{remove_if_exists, AtomicWriter, WriteOptions};

pub const INDEX_VERSION: u32 = 1;
pub const CARDS_DIR: &str = "knowledge";
pub const INDEX_FILE: &str = "_index.json";
pub const SESSION_LOG_FILE: &str = "_session_log.json";

/// A card without its three free-text sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    /// `category/name.md`, relative to the knowledge dir
    pub file: String,
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_entry_score")]
    pub score: f64,
    #[serde(default)]
    pub times_surfaced: u32,
    #[serde(default)]
    pub times_useful: u32,
    #[serde(default)]
    pub injection_tokens: usize,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub file_patterns: Vec<String>,
    #[serde(default)]
    pub task_types: Vec<String>,
}

fn default_entry_score() -> f64 {
    super::DEFAULT_SCORE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardIndex {
    pub version: u32,
    pub last_updated: Option<String>,
    #[serde(default)]
    pub cards: Vec<IndexEntry>,
}

impl Default for CardIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            last_updated: None,
            cards: Vec::new(),
        }
    }
}

impl CardIndex {
    pub fn find(&self, name: &str) -> Option<&IndexEntry> {
        self.cards.iter().find(|e| e.name == name)
    }

    /// Replace an entry with the same name, keeping its position; append otherwise.
    fn upsert(&mut self, entry: IndexEntry) {
        match self.cards.iter_mut().find(|e| e.name == entry.name) {
            Some(slot) => *slot = entry,
            None => self.cards.push(entry),
        }
    }

    fn remove(&mut self, name: &str) -> bool {
        let before = self.cards.len();
        self.cards.retain(|e| e.name != name);
        self.cards.len() < before
    }
}

pub struct CardStore {
    root: PathBuf,
    verbose: u8,
}

impl CardStore {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            verbose: 0,
        }
    }

    pub fn with_verbose(mut self, verbose: u8) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn cards_dir(&self) -> PathBuf {
        self.root.join(CARDS_DIR)
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn session_log_path(&self) -> PathBuf {
        self.root.join(SESSION_LOG_FILE)
    }

    pub fn record_path(&self, category: &str, name: &str) -> PathBuf {
        self.cards_dir().join(category).join(format!("{name}.md"))
    }

    // ── Index ──────────────────────────────────────────────────────────────

    /// Missing or unreadable index reads as empty; `rebuild()` repairs it.
    pub fn load_index(&self) -> CardIndex {
        let path = self.index_path();
        let Ok(raw) = fs::read_to_string(&path) else {
            return CardIndex::default();
        };
        match serde_json::from_str::<CardIndex>(&raw) {
            Ok(index) => index,
            Err(err) => {
                if self.verbose > 0 {
                    eprintln!("feedfwd.index corrupt path={} err={err}", path.display());
                }
                CardIndex::default()
            }
        }
    }

    fn save_index(&self, index: &mut CardIndex) -> Result<()> {
        index.last_updated = Some(chrono::Utc::now().to_rfc3339());
        let json = serde_json::to_string_pretty(index).context("Failed to serialize index")?;
        AtomicWriter::new(WriteOptions::fast())
            .write_str(&self.index_path(), &format!("{json}\n"))
            .with_context(|| {
                format!(
                    "Failed to write {} (run `feedfwd index rebuild` to repair)",
                    self.index_path().display()
                )
            })?;
        Ok(())
    }

    /// Index entries in store order.
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.load_index().cards
    }

    pub fn find_entry(&self, name: &str) -> Option<IndexEntry> {
        self.load_index().find(name).cloned()
    }

    pub fn index_upsert(&self, card: &Card) -> Result<()> {
        let mut index = self.load_index();
        index.upsert(card.to_index_entry());
        self.save_index(&mut index)
    }

    pub fn index_remove(&self, name: &str) -> Result<bool> {
        let mut index = self.load_index();
        if !index.remove(name) {
            return Ok(false);
        }
        self.save_index(&mut index)?;
        Ok(true)
    }

    // ── Records ────────────────────────────────────────────────────────────

    pub fn read_record(&self, path: &Path) -> Result<Card> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read card {}", path.display()))?;
        let fallback_category = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        parse_card(&content, &fallback_category)
            .with_context(|| format!("Failed to parse card {}", path.display()))
    }

    /// Exact, case-sensitive lookup. Uses the index to locate the record and
    /// falls back to scanning category dirs when the index is stale.
    pub fn get(&self, name: &str) -> Result<Option<Card>> {
        let Some(path) = self.locate(name) else {
            return Ok(None);
        };
        let card = self.read_record(&path)?;
        Ok((card.name == name).then_some(card))
    }

    fn locate(&self, name: &str) -> Option<PathBuf> {
        if let Some(entry) = self.find_entry(name) {
            let path = self.cards_dir().join(&entry.file);
            if path.is_file() {
                return Some(path);
            }
        }
        let file_name = format!("{name}.md");
        WalkDir::new(self.cards_dir())
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().is_file() && e.file_name().to_string_lossy() == file_name)
            .map(|e| e.into_path())
    }

    /// Write the record, then the index entry. Refreshes `injection_tokens`
    /// and clamps `score` so the stored card always satisfies both invariants.
    /// Returns the card as persisted.
    pub fn upsert(&self, mut card: Card) -> Result<Card> {
        card.score = round_score(clamp_score(card.score));
        card.injection_tokens = count_tokens(&card.injection_text);

        // A category change moves the record; drop the old file first.
        let path = self.record_path(&card.category, &card.name);
        if let Some(previous) = self.locate(&card.name) {
            if previous != path {
                remove_if_exists(&previous)?;
            }
        }

        let content = render_card(&card)?;
        AtomicWriter::new(WriteOptions::durable())
            .write_str(&path, &content)
            .with_context(|| format!("Failed to write card {}", path.display()))?;

        self.index_upsert(&card)?;
        if self.verbose > 1 {
            eprintln!(
                "feedfwd.store upsert name={} score={:.2} tokens={}",
                card.name, card.score, card.injection_tokens
            );
        }
        Ok(card)
    }

    /// Remove the record and its index entry. `false` when neither existed.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let removed_file = match self.locate(name) {
            Some(path) => remove_if_exists(&path)?,
            None => false,
        };
        let removed_entry = self.index_remove(name)?;
        Ok(removed_file || removed_entry)
    }

    /// All parseable records, authoritative scan order (sorted by path).
    pub fn list(&self) -> Result<Vec<Card>> {
        Ok(self
            .scan_records()
            .into_iter()
            .filter_map(|(_, card)| card.ok())
            .collect())
    }

    fn scan_records(&self) -> Vec<(PathBuf, Result<Card>)> {
        let dir = self.cards_dir();
        if !dir.is_dir() {
            return Vec::new();
        }
        WalkDir::new(&dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "md"))
            .map(|e| {
                let path = e.into_path();
                let card = self.read_record(&path);
                (path, card)
            })
            .collect()
    }

    /// Regenerate `_index.json` from the records alone. Unparsable records are
    /// skipped with a warning; one bad card never aborts the rebuild.
    pub fn rebuild(&self) -> Result<CardIndex> {
        let mut index = CardIndex::default();
        for (path, card) in self.scan_records() {
            match card {
                Ok(card) => index.upsert(card.to_index_entry()),
                Err(err) => eprintln!("Warning: Could not parse {}: {err:#}", path.display()),
            }
        }
        self.save_index(&mut index)?;
        if self.verbose > 0 {
            eprintln!("feedfwd.index rebuild cards={}", index.cards.len());
        }
        Ok(index)
    }
}
