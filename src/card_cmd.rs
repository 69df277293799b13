//! Card maintenance and human-facing views.
//!
//! Line-oriented outputs (`DUPLICATE:`, `INDEXED:`, `REBUILT:` ...) are parsed
//! by calling agents and must stay stable. User and lookup errors exit 1.

use anyhow::{Context, Result};
use colored::Colorize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::config::{validate_threshold, Config, DisplayConfig};
use crate::knowledge::{
    create_card, find_duplicate, Card, CardStore, IndexEntry, NewCard, DEFAULT_CATEGORIES,
};
use crate::tokenizer::count_tokens;

/// Cards at or below this score are "low performers".
const ACTIVE_SCORE: f64 = 0.3;
const NAME_WIDTH: usize = 35;

fn fail(msg: impl std::fmt::Display) -> ! {
    eprintln!("Error: {msg}");
    std::process::exit(1);
}

fn icon<'a>(display: &DisplayConfig, emoji: &'a str) -> &'a str {
    if display.emoji {
        emoji
    } else {
        ""
    }
}

fn star(score: f64) -> String {
    let text = format!("★ {score:.2}");
    if score > 0.5 {
        text.green().to_string()
    } else if score > ACTIVE_SCORE {
        text.yellow().to_string()
    } else {
        text.red().to_string()
    }
}

pub fn open_store(config: &Config, verbose: u8) -> CardStore {
    CardStore::open(config.knowledge_home()).with_verbose(verbose)
}

// ── Agent-facing helpers ───────────────────────────────────────────────────

pub fn check_dup(
    store: &CardStore,
    name: Option<&str>,
    keywords: Option<&str>,
    threshold: f64,
) -> Result<()> {
    let name = name.unwrap_or("").trim();
    let keywords = keywords.map(crate::knowledge::split_csv).unwrap_or_default();
    if name.is_empty() && keywords.is_empty() {
        fail("provide --name and/or --keywords");
    }
    if let Err(err) = validate_threshold(threshold) {
        fail(err);
    }

    let entries = store.entries();
    match find_duplicate(&entries, &keywords, name, threshold) {
        Some(dup) => println!("DUPLICATE: {}", dup.name),
        None => println!("NO_DUPLICATE"),
    }
    Ok(())
}

pub fn count(text: &[String], max_injection_tokens: usize) -> Result<()> {
    if text.is_empty() {
        fail("provide text to count");
    }
    let tokens = count_tokens(&text.join(" "));
    println!("{tokens}");
    if tokens > max_injection_tokens {
        eprintln!("Warning: {tokens} tokens exceeds the {max_injection_tokens}-token injection cap");
    }
    Ok(())
}

pub fn add(store: &CardStore, new: NewCard, force: bool, threshold: f64, max_injection_tokens: usize) -> Result<()> {
    if let Err(err) = validate_threshold(threshold) {
        fail(err);
    }
    let entries = store.entries();
    if let Some(dup) = find_duplicate(&entries, &new.keywords, &new.name, threshold) {
        if !force {
            fail(format!(
                "'{}' duplicates existing card '{}' (use --force to write anyway)",
                new.name, dup.name
            ));
        }
    }

    if !DEFAULT_CATEGORIES.contains(&new.category.trim()) {
        eprintln!("Note: '{}' is not a default category; creating it", new.category.trim());
    }
    let card = match create_card(store, new) {
        Ok(card) => card,
        Err(err) => fail(err),
    };
    println!(
        "CREATED: {} → {} ({} tokens)",
        card.name,
        card.relative_path(),
        card.injection_tokens
    );
    warn_over_cap(&card, max_injection_tokens);
    Ok(())
}

fn warn_over_cap(card: &Card, max_injection_tokens: usize) {
    if card.injection_tokens > max_injection_tokens {
        eprintln!(
            "Warning: '{}' injection text is {} tokens (cap {max_injection_tokens})",
            card.name, card.injection_tokens
        );
    }
}

// ── Index maintenance ──────────────────────────────────────────────────────

/// Parse a record file and store it, refreshing its token count and index entry.
pub fn index_add(store: &CardStore, path: &Path, max_injection_tokens: usize) -> Result<()> {
    if !path.is_file() {
        fail(format!("file not found: {}", path.display()));
    }
    let card = match store.read_record(path) {
        Ok(card) => card,
        Err(err) => fail(format!("reading card: {err:#}")),
    };
    let card = store.upsert(card)?;
    println!("INDEXED: {} → {}", card.name, card.relative_path());
    warn_over_cap(&card, max_injection_tokens);
    Ok(())
}

pub fn index_remove(store: &CardStore, name: &str) -> Result<()> {
    if store.index_remove(name)? {
        println!("REMOVED: {name}");
    } else {
        println!("NOT_FOUND: {name}");
    }
    Ok(())
}

pub fn index_rebuild(store: &CardStore) -> Result<()> {
    let index = store.rebuild()?;
    println!("REBUILT: {} cards indexed", index.cards.len());
    Ok(())
}

pub fn index_list(store: &CardStore) -> Result<()> {
    let entries = store.entries();
    if entries.is_empty() {
        println!("(empty, no cards yet)");
        return Ok(());
    }
    for e in &entries {
        println!("  {} → {} (score: {:.2})", e.name, e.file, e.score);
    }
    println!("\nTotal: {} cards", entries.len());
    Ok(())
}

// ── Views ──────────────────────────────────────────────────────────────────

/// Cards grouped by category (alphabetical), best score first within each.
pub fn render_list(entries: &[IndexEntry], display: &DisplayConfig) -> String {
    let mut out = Vec::new();
    out.push(format!(
        "{}FeedFwd Knowledge Base ({} cards)",
        icon(display, "📚 "),
        entries.len()
    ));
    if entries.is_empty() {
        out.push(String::new());
        out.push("  No cards yet. Run `feedfwd add` to capture your first one.".into());
        return out.join("\n");
    }
    out.push(String::new());

    let mut by_category: BTreeMap<&str, Vec<&IndexEntry>> = BTreeMap::new();
    for e in entries {
        by_category.entry(e.category.as_str()).or_default().push(e);
    }
    for (category, mut cards) in by_category {
        cards.sort_by(|a, b| b.score.total_cmp(&a.score));
        out.push(format!("{category}/ ({} cards)", cards.len()).bold().to_string());
        for c in cards {
            let status = if c.times_surfaced == 0 {
                "new, not yet surfaced".to_string()
            } else {
                format!("surfaced {}x, useful {}x", c.times_surfaced, c.times_useful)
            };
            out.push(format!("  {}  {:<NAME_WIDTH$} ({status})", star(c.score), c.name));
        }
        out.push(String::new());
    }
    out.join("\n")
}

/// Index entries, or a scan of the records when the index is missing.
fn view_entries(store: &CardStore) -> Result<Vec<IndexEntry>> {
    let entries = store.entries();
    if !entries.is_empty() {
        return Ok(entries);
    }
    Ok(store.list()?.iter().map(Card::to_index_entry).collect())
}

pub fn list(store: &CardStore, display: &DisplayConfig) -> Result<()> {
    println!("{}", render_list(&view_entries(store)?, display));
    Ok(())
}

/// Metadata (name, category, keywords) first; the record text only when the
/// metadata misses.
pub fn search_entries(store: &CardStore, term: &str) -> Vec<IndexEntry> {
    let term = term.to_lowercase();
    store
        .entries()
        .into_iter()
        .filter(|e| {
            let metadata = format!("{} {} {}", e.name, e.category, e.keywords.join(" ")).to_lowercase();
            if metadata.contains(&term) {
                return true;
            }
            fs::read_to_string(store.cards_dir().join(&e.file))
                .map(|content| content.to_lowercase().contains(&term))
                .unwrap_or(false)
        })
        .collect()
}

pub fn search(store: &CardStore, terms: &[String], display: &DisplayConfig) -> Result<()> {
    let term = terms.join(" ");
    if term.trim().is_empty() {
        fail("provide a search term");
    }
    let matches = search_entries(store, &term);
    if matches.is_empty() {
        println!("No cards matching '{term}'");
        return Ok(());
    }
    println!(
        "{}{} card(s) matching '{term}':",
        icon(display, "🔍 "),
        matches.len()
    );
    println!();
    for e in &matches {
        println!("  {}  {} → {}", star(e.score), e.name, e.file);
    }
    println!();
    Ok(())
}

pub fn render_card(card: &Card, path: &Path, display: &DisplayConfig) -> String {
    let mut out = vec![
        format!("{}{} ({}/)", icon(display, "📄 "), card.name.bold(), card.category),
        format!("   Source: {}", card.source),
        format!("   Captured: {}", card.captured),
        format!(
            "   Score: {:.2} (surfaced {}x, useful {}x)",
            card.score, card.times_surfaced, card.times_useful
        ),
        format!("   Keywords: {}", card.triggers.keywords.join(", ")),
    ];
    if !card.triggers.file_patterns.is_empty() {
        out.push(format!("   File patterns: {}", card.triggers.file_patterns.join(", ")));
    }
    if !card.triggers.task_types.is_empty() {
        out.push(format!("   Task types: {}", card.triggers.task_types.join(", ")));
    }
    out.push(format!("   Injection tokens: {}", card.injection_tokens));
    for (title, body) in [
        ("Insight", &card.insight),
        ("Injection Text", &card.injection_text),
        ("Example", &card.example),
    ] {
        out.push(String::new());
        out.push(format!("── {title} ──"));
        out.push(body.clone());
    }
    out.push(String::new());
    out.push(format!("{}File: {}", icon(display, "📁 "), path.display()));
    out.join("\n")
}

pub fn show(store: &CardStore, name: &str, display: &DisplayConfig) -> Result<()> {
    let Some(card) = store.get(name)? else {
        println!("Card not found: '{name}'");
        let needle = name.to_lowercase();
        let suggestions: Vec<String> = store
            .entries()
            .into_iter()
            .filter(|e| e.name.to_lowercase().contains(&needle))
            .map(|e| e.name)
            .collect();
        if !suggestions.is_empty() {
            println!("Did you mean: {}?", suggestions.join(", "));
        }
        std::process::exit(1);
    };
    let path = store.record_path(&card.category, &card.name);
    println!("{}", render_card(&card, &path, display));
    Ok(())
}

pub fn remove(store: &CardStore, name: &str, display: &DisplayConfig) -> Result<()> {
    let removed = store
        .delete(name)
        .with_context(|| format!("Failed to remove card '{name}'"))?;
    if !removed {
        println!("Card not found: '{name}'");
        std::process::exit(1);
    }
    println!("{}Removed: {name}", icon(display, "🗑️  "));
    Ok(())
}

pub fn render_stats(entries: &[IndexEntry], display: &DisplayConfig) -> String {
    let mut out = vec![format!("{}FeedFwd Stats", icon(display, "📊 "))];
    out.push(format!("Total cards: {}", entries.len()));
    if entries.is_empty() {
        out.push(String::new());
        out.push("No cards yet. Run `feedfwd add` to get started.".into());
        return out.join("\n");
    }

    let active = entries.iter().filter(|e| e.score > ACTIVE_SCORE).count();
    let average = entries.iter().map(|e| e.score).sum::<f64>() / entries.len() as f64;
    out.push(format!("Active (score > {ACTIVE_SCORE}): {active}"));
    out.push(format!("Average score: {average:.2}"));

    let mut ranked: Vec<&IndexEntry> = entries.iter().collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    let row = |e: &IndexEntry| {
        format!(
            "  {}  {:<NAME_WIDTH$} ({} sessions, {} useful)",
            star(e.score),
            e.name,
            e.times_surfaced,
            e.times_useful
        )
    };

    out.push(String::new());
    out.push("Top performers:".into());
    out.extend(ranked.iter().take(3).map(|e| row(e)));

    let low: Vec<&&IndexEntry> = ranked.iter().filter(|e| e.score <= ACTIVE_SCORE).collect();
    if !low.is_empty() {
        out.push(String::new());
        out.push("Low performers (consider removing):".into());
        out.extend(low.iter().take(3).map(|e| row(e)));
    }
    out.join("\n")
}

pub fn stats(store: &CardStore, display: &DisplayConfig) -> Result<()> {
    println!("{}", render_stats(&view_entries(store)?, display));
    Ok(())
}
