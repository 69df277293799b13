//! Card record codec: `---` delimited YAML header followed by `## Insight`,
//! `## Injection Text` and `## Example` sections.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use super::{round_score, Card, Triggers, DEFAULT_SCORE};

#[derive(Debug, Error)]
pub enum CardParseError {
    #[error("missing opening '---' header delimiter")]
    MissingHeader,
    #[error("missing closing '---' header delimiter")]
    UnterminatedHeader,
    #[error("invalid card header: {0}")]
    InvalidHeader(#[from] serde_yaml::Error),
    #[error("card header has an empty name")]
    EmptyName,
}

const SECTION_INSIGHT: &str = "Insight";
const SECTION_INJECTION: &str = "Injection Text";
const SECTION_EXAMPLE: &str = "Example";

/// Header schema. Every field except `name` has a default, so downstream code
/// never has to guess at missing metadata.
#[derive(Debug, Serialize, Deserialize)]
struct CardHeader {
    name: String,
    #[serde(default)]
    source: String,
    #[serde(default, deserialize_with = "string_or_scalar")]
    captured: String,
    #[serde(default)]
    category: String,
    #[serde(default = "default_score")]
    score: f64,
    #[serde(default)]
    times_surfaced: u32,
    #[serde(default)]
    times_useful: u32,
    #[serde(default)]
    triggers: Triggers,
    #[serde(default)]
    injection_tokens: usize,
}

fn default_score() -> f64 {
    DEFAULT_SCORE
}

/// `captured: 2026-02-12` may come back as a plain scalar; keep its text.
fn string_or_scalar<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_yaml::Value::Null => String::new(),
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    })
}

/// `fallback_category` is used when the header omits `category` (the record's
/// parent directory name).
pub fn parse_card(content: &str, fallback_category: &str) -> Result<Card, CardParseError> {
    let (header_text, body) = split_header(content)?;
    let header: CardHeader = serde_yaml::from_str(header_text)?;

    let name = header.name.trim().to_string();
    if name.is_empty() {
        return Err(CardParseError::EmptyName);
    }
    let category = if header.category.trim().is_empty() {
        fallback_category.to_string()
    } else {
        header.category.trim().to_string()
    };

    let mut sections = parse_sections(body);
    let mut take = |key: &str| sections.remove(key).unwrap_or_default().trim().to_string();

    Ok(Card {
        name,
        source: header.source,
        captured: header.captured,
        category,
        score: super::clamp_score(header.score),
        times_surfaced: header.times_surfaced,
        times_useful: header.times_useful,
        triggers: header.triggers,
        injection_tokens: header.injection_tokens,
        insight: take(SECTION_INSIGHT),
        injection_text: take(SECTION_INJECTION),
        example: take(SECTION_EXAMPLE),
    })
}

pub fn render_card(card: &Card) -> anyhow::Result<String> {
    let header = CardHeader {
        name: card.name.clone(),
        source: card.source.clone(),
        captured: card.captured.clone(),
        category: card.category.clone(),
        score: round_score(card.score),
        times_surfaced: card.times_surfaced,
        times_useful: card.times_useful,
        triggers: card.triggers.clone(),
        injection_tokens: card.injection_tokens,
    };
    let yaml = serde_yaml::to_string(&header)
        .with_context(|| format!("Failed to serialize header for card {}", card.name))?;

    let mut body_parts = Vec::new();
    for (heading, text) in [
        (SECTION_INSIGHT, &card.insight),
        (SECTION_INJECTION, &card.injection_text),
        (SECTION_EXAMPLE, &card.example),
    ] {
        if !text.is_empty() {
            body_parts.push(format!("## {heading}\n\n{text}"));
        }
    }

    Ok(format!("---\n{}---\n\n{}\n", yaml, body_parts.join("\n\n")))
}

fn split_header(content: &str) -> Result<(&str, &str), CardParseError> {
    let content = content.trim_start_matches('\u{feff}');
    let mut lines = content.split_inclusive('\n');
    match lines.next() {
        Some(first) if first.trim() == "---" => {}
        _ => return Err(CardParseError::MissingHeader),
    }

    let header_start = content.find('\n').map(|i| i + 1).unwrap_or(content.len());
    let mut offset = header_start;
    for line in lines {
        if line.trim() == "---" {
            let header = &content[header_start..offset];
            let body = &content[offset + line.len()..];
            return Ok((header, body));
        }
        offset += line.len();
    }
    Err(CardParseError::UnterminatedHeader)
}

/// Split a markdown body on `## ` headings; text before the first heading is dropped.
fn parse_sections(body: &str) -> HashMap<String, String> {
    let mut sections = HashMap::new();
    let mut current: Option<String> = None;
    let mut lines: Vec<&str> = Vec::new();

    for line in body.lines() {
        if let Some(heading) = line.strip_prefix("## ") {
            if let Some(prev) = current.take() {
                sections.insert(prev, lines.join("\n"));
            }
            current = Some(heading.trim().to_string());
            lines.clear();
        } else {
            lines.push(line);
        }
    }
    if let Some(prev) = current {
        sections.insert(prev, lines.join("\n"));
    }
    sections
}
