//! Session-start injection: rank cards against the project, admit the best
//! ones under a count and token budget, print them, and remember what was
//! surfaced so the session-end scorer can judge it.

use anyhow::Result;
use glob::Pattern;
use std::path::{Path, PathBuf};

use crate::config::{Config, InjectConfig};
use crate::context::{self, ProjectContext};
use crate::git::{GitCli, VcsProvider};
use crate::knowledge::{clamp_score, Card, CardStore, IndexEntry, ScoreEngine, SessionLog};

pub const INJECTION_HEADER: &str = "📚 FeedFwd — active learnings for this session:";

const KEYWORD_WEIGHT: f64 = 0.7;
const PATTERN_WEIGHT: f64 = 0.3;
const OVERLAP_WEIGHT: f64 = 0.6;
const SCORE_WEIGHT: f64 = 0.4;

#[derive(Debug, Clone, Copy)]
pub struct SelectLimits {
    pub min_relevance: f64,
    pub max_cards: usize,
    pub max_total_tokens: usize,
    pub header_tokens: usize,
}

impl From<&InjectConfig> for SelectLimits {
    fn from(cfg: &InjectConfig) -> Self {
        Self {
            min_relevance: cfg.min_relevance,
            max_cards: cfg.max_cards,
            max_total_tokens: cfg.max_total_tokens,
            header_tokens: cfg.header_tokens,
        }
    }
}

impl Default for SelectLimits {
    fn default() -> Self {
        Self::from(&InjectConfig::default())
    }
}

/// Relevance of one card to a project, in [0, 1].
///
/// Cards with neither keywords nor file patterns can never match, so they
/// rank on their feedback score alone at the same weight it carries below.
pub fn score(entry: &IndexEntry, ctx: &ProjectContext) -> f64 {
    let card_score = clamp_score(entry.score);
    if entry.keywords.is_empty() && entry.file_patterns.is_empty() {
        return card_score * SCORE_WEIGHT;
    }

    let keyword_score = if entry.keywords.is_empty() {
        0.0
    } else {
        let hits = entry
            .keywords
            .iter()
            .filter(|k| ctx.text_context.contains(&k.to_lowercase()))
            .count();
        hits as f64 / entry.keywords.len() as f64
    };

    let pattern_score = if entry.file_patterns.is_empty() {
        0.0
    } else {
        let hits = entry
            .file_patterns
            .iter()
            .filter(|p| pattern_matches(p, ctx))
            .count();
        hits as f64 / entry.file_patterns.len() as f64
    };

    let overlap = keyword_score * KEYWORD_WEIGHT + pattern_score * PATTERN_WEIGHT;
    overlap * OVERLAP_WEIGHT + card_score * SCORE_WEIGHT
}

/// Extensions are tried as `file<ext>` first, then the real file names.
fn pattern_matches(pattern: &str, ctx: &ProjectContext) -> bool {
    let Ok(glob) = Pattern::new(pattern) else {
        // Unparsable glob: literal comparison only.
        return ctx.file_names.contains(pattern);
    };
    ctx.file_extensions
        .iter()
        .any(|ext| glob.matches(&format!("file{ext}")))
        || ctx.file_names.iter().any(|name| glob.matches(name))
}

/// Rank and admit cards. Relevance must be strictly above the floor; ties keep
/// store order. A card that would overflow the token budget is skipped and
/// smaller ones behind it are still tried.
pub fn select<'a>(
    entries: &'a [IndexEntry],
    ctx: &ProjectContext,
    limits: &SelectLimits,
) -> Vec<(&'a IndexEntry, f64)> {
    let mut scored: Vec<(&IndexEntry, f64)> = entries
        .iter()
        .map(|e| (e, score(e, ctx)))
        .filter(|(_, relevance)| *relevance > limits.min_relevance)
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut selected = Vec::new();
    let mut total_tokens = limits.header_tokens;
    for (entry, relevance) in scored {
        if selected.len() >= limits.max_cards {
            break;
        }
        let with_card = total_tokens.saturating_add(entry.injection_tokens);
        if with_card > limits.max_total_tokens {
            continue;
        }
        total_tokens = with_card;
        selected.push((entry, relevance));
    }
    selected
}

/// Read the record behind each selected entry. Cards whose record vanished
/// since indexing are dropped; unparsable ones are dropped with a warning.
pub fn load_selected(store: &CardStore, selected: &[(&IndexEntry, f64)]) -> Vec<(Card, f64)> {
    let mut cards = Vec::with_capacity(selected.len());
    for (entry, relevance) in selected {
        match store.get(&entry.name) {
            Ok(Some(card)) => cards.push((card, *relevance)),
            Ok(None) => {}
            Err(err) => eprintln!("Warning: Could not parse card '{}': {err:#}", entry.name),
        }
    }
    cards
}

/// The block printed to the assistant, one bullet per card; `None` when empty.
pub fn format_injection(cards: &[(Card, f64)]) -> Option<String> {
    if cards.is_empty() {
        return None;
    }
    let mut lines = Vec::with_capacity(cards.len() + 1);
    lines.push(INJECTION_HEADER.to_string());
    for (card, _) in cards {
        lines.push(format!(
            "• [{}] {}",
            card.display_name(),
            card.injection_text.trim()
        ));
    }
    Some(lines.join("\n"))
}

#[derive(Debug, Clone)]
pub struct Injection {
    pub text: String,
    pub selected: Vec<(String, f64)>,
    pub log: SessionLog,
}

/// Select, format and record one session-start injection. `None` (with the
/// session log untouched) when the store is empty or nothing qualifies.
pub fn inject(
    store: &CardStore,
    vcs: &dyn VcsProvider,
    project_dir: &Path,
    config: &InjectConfig,
) -> Result<Option<Injection>> {
    let entries = store.entries();
    if entries.is_empty() {
        return Ok(None);
    }

    let ctx = context::extract(project_dir, vcs, config);
    let selected = select(&entries, &ctx, &SelectLimits::from(config));
    if selected.is_empty() {
        return Ok(None);
    }
    let cards = load_selected(store, &selected);
    let Some(text) = format_injection(&cards) else {
        return Ok(None);
    };

    let log = record_session(store, vcs, project_dir, &cards)?;
    Ok(Some(Injection {
        text,
        selected: cards
            .iter()
            .map(|(card, relevance)| (card.name.clone(), *relevance))
            .collect(),
        log,
    }))
}

/// Persist the pending session log, then bump `times_surfaced` on each card.
fn record_session(
    store: &CardStore,
    vcs: &dyn VcsProvider,
    project_dir: &Path,
    cards: &[(Card, f64)],
) -> Result<SessionLog> {
    let now = chrono::Utc::now();
    let project_dir = absolute(project_dir);
    let log = SessionLog {
        session_id: Some(now.format("%Y%m%d-%H%M%S").to_string()),
        started_at: Some(now.to_rfc3339()),
        git_head_at_start: vcs.head(&project_dir),
        project_dir: Some(project_dir.to_string_lossy().into_owned()),
        injected_cards: cards.iter().map(|(card, _)| card.name.clone()).collect(),
    };
    log.save(&store.session_log_path())?;

    let engine = ScoreEngine::new(store);
    for name in &log.injected_cards {
        engine.increment_surfaced(name)?;
    }
    Ok(log)
}

fn absolute(dir: &Path) -> PathBuf {
    dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf())
}

/// Session-start hook. Stdout carries only the injection block.
pub fn run(store: &CardStore, project_dir: Option<PathBuf>, config: &Config, verbose: u8) -> Result<()> {
    let project_dir = match project_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let git = GitCli::from_millis(config.git.timeout_ms).with_verbose(verbose);

    match inject(store, &git, &project_dir, &config.inject)? {
        Some(injection) => {
            println!("{}", injection.text);
            if verbose > 0 {
                eprintln!(
                    "feedfwd.inject session id={} head={}",
                    injection.log.session_id.as_deref().unwrap_or("-"),
                    injection.log.git_head_at_start.as_deref().unwrap_or("-")
                );
                for (name, relevance) in &injection.selected {
                    eprintln!("feedfwd.inject selected name={name} relevance={relevance:.3}");
                }
            }
        }
        None => {
            if verbose > 0 {
                eprintln!("feedfwd.inject nothing-selected dir={}", project_dir.display());
            }
        }
    }
    Ok(())
}
