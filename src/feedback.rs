//! Session-end implicit feedback.
//!
//! Consumes the pending session log exactly once: gathers what changed in the
//! project since injection, classifies the session as planning, code or mixed
//! work, nudges every injected card's score from two signals (session type
//! fits the card's category, card keywords appear in the changes), then
//! clears the log.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::config::{Config, FeedbackConfig};
use crate::git::{GitCli, VcsProvider};
use crate::knowledge::{
    display_name, CardStore, ScoreEngine, SessionLog, CODE_CATEGORIES, PLANNING_CATEGORIES,
};

/// Document and text formats.
pub const PLANNING_EXTENSIONS: &[&str] = &[".md", ".txt", ".rst", ".doc", ".adoc"];

/// Programming-language and config formats.
pub const CODE_EXTENSIONS: &[&str] = &[
    ".py", ".js", ".ts", ".tsx", ".jsx", ".go", ".rs", ".java", ".rb", ".php", ".c", ".cpp", ".h",
    ".cs", ".swift", ".kt", ".sh", ".bash", ".zsh", ".sql", ".yaml", ".yml", ".json", ".toml",
    ".cfg", ".ini", ".html", ".css", ".scss",
];

const CODE_CUES: &[&str] = &["def ", "function ", "import "];
const PLANNING_CUES: &[&str] = &["## ", "### "];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionType {
    Planning,
    Code,
    Mixed,
}

impl SessionType {
    fn label(self, emoji: bool) -> String {
        if !emoji {
            return self.to_string();
        }
        let icon = match self {
            SessionType::Planning => "📝",
            SessionType::Code => "💻",
            SessionType::Mixed => "🔀",
        };
        format!("{icon} {self}")
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionType::Planning => "planning",
            SessionType::Code => "code",
            SessionType::Mixed => "mixed",
        };
        f.write_str(name)
    }
}

/// What the session left behind in the project.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionEvidence {
    /// Uncommitted diff, new file contents, committed diff and commit
    /// subjects since the recorded head; lowercased.
    pub diff_text: String,
    /// De-duplicated, first-seen order.
    pub changed_files: Vec<String>,
}

pub fn gather_evidence(vcs: &dyn VcsProvider, log: &SessionLog, max_untracked_bytes: u64) -> SessionEvidence {
    let Some(project_dir) = log.project_dir.as_deref().map(Path::new) else {
        return SessionEvidence::default();
    };
    let head = log.git_head_at_start.as_deref();
    let since = log
        .started_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let untracked: Vec<(String, fs::Metadata)> = vcs
        .untracked_files(project_dir)
        .into_iter()
        .filter_map(|rel| {
            let meta = fs::metadata(project_dir.join(&rel)).ok()?;
            modified_since(&meta, since).then_some((rel, meta))
        })
        .collect();

    let mut parts: Vec<String> = Vec::new();
    parts.extend(vcs.working_diff(project_dir));
    for (rel, meta) in &untracked {
        if meta.len() > max_untracked_bytes {
            continue;
        }
        if let Ok(content) = fs::read_to_string(project_dir.join(rel)) {
            parts.push(content);
        }
    }
    if let Some(head) = head {
        parts.extend(vcs.diff_since(project_dir, head));
        parts.extend(vcs.log_since(project_dir, head));
    }

    let mut changed_files: Vec<String> = Vec::new();
    let since_head = head
        .map(|h| vcs.changed_files_since(project_dir, h))
        .unwrap_or_default();
    let candidates = vcs
        .changed_files(project_dir)
        .into_iter()
        .chain(since_head)
        .chain(untracked.into_iter().map(|(rel, _)| rel));
    for file in candidates {
        if !changed_files.contains(&file) {
            changed_files.push(file);
        }
    }

    SessionEvidence {
        diff_text: parts.join("\n").to_lowercase(),
        changed_files,
    }
}

fn modified_since(meta: &fs::Metadata, since: Option<DateTime<Utc>>) -> bool {
    let Some(since) = since else {
        return true;
    };
    match meta.modified() {
        Ok(mtime) => DateTime::<Utc>::from(mtime) >= since,
        Err(_) => true,
    }
}

/// Ratio of planning files among planning+code files: above 0.6 is planning,
/// below 0.4 is code. Without any recognised file, lexical cues in the diff
/// stand in for one file of each kind.
pub fn classify_session(diff_text: &str, changed_files: &[String]) -> SessionType {
    let mut planning = 0usize;
    let mut code = 0usize;
    for file in changed_files {
        let ext = match Path::new(file).extension() {
            Some(ext) => format!(".{}", ext.to_string_lossy().to_lowercase()),
            None => continue,
        };
        if PLANNING_EXTENSIONS.contains(&ext.as_str()) {
            planning += 1;
        } else if CODE_EXTENSIONS.contains(&ext.as_str()) {
            code += 1;
        }
    }

    if planning == 0 && code == 0 {
        if CODE_CUES.iter().any(|cue| diff_text.contains(cue)) {
            code += 1;
        }
        if PLANNING_CUES.iter().any(|cue| diff_text.contains(cue)) {
            planning += 1;
        }
    }

    let total = planning + code;
    if total == 0 {
        return SessionType::Mixed;
    }
    let planning_ratio = planning as f64 / total as f64;
    if planning_ratio > 0.6 {
        SessionType::Planning
    } else if planning_ratio < 0.4 {
        SessionType::Code
    } else {
        SessionType::Mixed
    }
}

pub fn session_matches(category: &str, session_type: SessionType) -> bool {
    match session_type {
        SessionType::Mixed => true,
        SessionType::Planning => PLANNING_CATEGORIES.contains(&category),
        SessionType::Code => CODE_CATEGORIES.contains(&category),
    }
}

/// At least `min(2, keywords)` keywords appear literally in the diff text.
pub fn keywords_match(keywords: &[String], diff_text: &str) -> bool {
    if diff_text.is_empty() || keywords.is_empty() {
        return false;
    }
    let hits = keywords
        .iter()
        .filter(|k| diff_text.contains(&k.to_lowercase()))
        .count();
    hits >= keywords.len().min(2)
}

/// Both signals: strong. One: moderate. Neither: decay. A positive delta is
/// cut so implicit feedback alone never lifts a score past the cap.
pub fn compute_delta(session_match: bool, keyword_match: bool, current_score: f64, cfg: &FeedbackConfig) -> f64 {
    let delta = match (session_match, keyword_match) {
        (true, true) => cfg.strong_delta,
        (true, false) | (false, true) => cfg.moderate_delta,
        (false, false) => cfg.ignored_delta,
    };
    if delta > 0.0 && current_score + delta > cfg.implicit_cap {
        return (cfg.implicit_cap - current_score).max(0.0);
    }
    delta
}

#[derive(Debug, Clone, PartialEq)]
pub struct CardOutcome {
    pub name: String,
    pub session_match: bool,
    pub keyword_match: bool,
    pub delta: f64,
    pub new_score: f64,
}

impl CardOutcome {
    pub fn contributed(&self) -> bool {
        self.session_match || self.keyword_match
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackReport {
    pub session_type: SessionType,
    pub outcomes: Vec<CardOutcome>,
}

/// Score every card the pending session injected and clear the log.
/// `Ok(None)` when nothing was injected; the log is then left as found.
pub fn score_session(
    store: &CardStore,
    vcs: &dyn VcsProvider,
    cfg: &FeedbackConfig,
) -> Result<Option<FeedbackReport>> {
    let log_path = store.session_log_path();
    let log = SessionLog::load(&log_path);
    if !log.is_pending() {
        return Ok(None);
    }

    let evidence = gather_evidence(vcs, &log, cfg.max_untracked_bytes);
    let session_type = classify_session(&evidence.diff_text, &evidence.changed_files);

    let engine = ScoreEngine::new(store);
    let mut outcomes = Vec::new();
    for name in &log.injected_cards {
        let card = match store.get(name) {
            Ok(Some(card)) => card,
            // Removed since injection.
            Ok(None) => continue,
            Err(err) => {
                eprintln!("Warning: Could not parse card '{name}': {err:#}");
                continue;
            }
        };
        let session_match = session_matches(&card.category, session_type);
        let keyword_match = keywords_match(&card.triggers.keywords, &evidence.diff_text);
        let delta = compute_delta(session_match, keyword_match, card.score, cfg);

        if delta > 0.0 {
            engine.increment_useful(name)?;
        }
        if let Some(new_score) = engine.apply_delta(name, delta)? {
            outcomes.push(CardOutcome {
                name: name.clone(),
                session_match,
                keyword_match,
                delta,
                new_score,
            });
        }
    }

    SessionLog::clear(&log_path)?;
    Ok(Some(FeedbackReport {
        session_type,
        outcomes,
    }))
}

/// Human-readable summary; `None` when no card was processed.
pub fn format_summary(report: &FeedbackReport, emoji: bool) -> Option<String> {
    if report.outcomes.is_empty() {
        return None;
    }

    let mut lines = Vec::with_capacity(report.outcomes.len() + 2);
    let label = report.session_type.label(emoji);
    if emoji {
        lines.push(format!("📊 FeedFwd — session summary ({label}):"));
    } else {
        lines.push(format!("FeedFwd session summary ({label}):"));
    }

    for outcome in &report.outcomes {
        let marker = match (outcome.session_match, outcome.keyword_match) {
            (true, true) => "applied (session + keywords)",
            (true, false) => "relevant session type",
            (false, true) => "keywords detected",
            (false, false) => "not referenced",
        };
        let icon = match (emoji, outcome.contributed()) {
            (false, _) => "",
            (true, true) => "✅ ",
            (true, false) => "💤 ",
        };
        lines.push(format!(
            "   • {} — {icon}{marker} (score: {:.2})",
            display_name(&outcome.name),
            outcome.new_score
        ));
    }

    let applied = report.outcomes.iter().filter(|o| o.contributed()).count();
    if applied > 0 {
        lines.push(format!("   {applied} card(s) contributed to this session."));
    }
    Some(lines.join("\n"))
}

/// Session-end hook.
pub fn run(store: &CardStore, config: &Config, verbose: u8) -> Result<()> {
    let git = GitCli::from_millis(config.git.timeout_ms).with_verbose(verbose);

    let Some(report) = score_session(store, &git, &config.feedback)? else {
        if verbose > 0 {
            eprintln!("feedfwd.feedback no-pending-session");
        }
        return Ok(());
    };

    if verbose > 0 {
        eprintln!(
            "feedfwd.feedback scored session_type={} cards={}",
            report.session_type,
            report.outcomes.len()
        );
        for o in &report.outcomes {
            eprintln!(
                "feedfwd.feedback card name={} session={} keywords={} delta={:+.2} score={:.2}",
                o.name, o.session_match, o.keyword_match, o.delta, o.new_score
            );
        }
    }
    if let Some(summary) = format_summary(&report, config.display.emoji) {
        println!("{summary}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::FakeVcs;
    use crate::knowledge::Card;
    use tempfile::TempDir;

    fn files(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn classify_by_changed_file_ratio() {
        assert_eq!(classify_session("", &files(&["a.md", "b.md", "c.py"])), SessionType::Planning);
        assert_eq!(classify_session("", &files(&["a.py", "b.py", "c.md"])), SessionType::Code);
        assert_eq!(classify_session("", &files(&["a.md", "b.rs"])), SessionType::Mixed);
        assert_eq!(classify_session("", &files(&["NOTES.MD"])), SessionType::Planning);
    }

    #[test]
    fn classify_falls_back_to_lexical_cues() {
        let unknown = files(&["logo.png", "Makefile"]);
        assert_eq!(classify_session("+def main():", &unknown), SessionType::Code);
        assert_eq!(classify_session("+## plan", &unknown), SessionType::Planning);
        assert_eq!(classify_session("+## plan\n+import os", &unknown), SessionType::Mixed);
        assert_eq!(classify_session("", &[]), SessionType::Mixed);
    }

    #[test]
    fn keyword_match_needs_up_to_two_hits() {
        let diff = "+uv run script.py";
        assert!(keywords_match(&files(&["uv"]), diff));
        assert!(!keywords_match(&files(&["uv", "pytest", "inline"]), "+uv only"));
        assert!(keywords_match(&files(&["UV", "script", "inline"]), diff));
        assert!(!keywords_match(&files(&["uv"]), ""));
        assert!(!keywords_match(&[], diff));
    }

    #[test]
    fn session_match_by_category() {
        assert!(session_matches("workflow", SessionType::Planning));
        assert!(!session_matches("python", SessionType::Planning));
        assert!(session_matches("debugging", SessionType::Code));
        assert!(!session_matches("prompting", SessionType::Code));
        assert!(session_matches("anything", SessionType::Mixed));
    }

    #[test]
    fn delta_matrix_and_cap() {
        let cfg = FeedbackConfig::default();
        assert!(approx(compute_delta(true, true, 0.5, &cfg), 0.10));
        assert!(approx(compute_delta(true, false, 0.5, &cfg), 0.05));
        assert!(approx(compute_delta(false, true, 0.5, &cfg), 0.05));
        assert!(approx(compute_delta(false, false, 0.5, &cfg), -0.02));

        assert!(approx(0.65 + compute_delta(true, true, 0.65, &cfg), 0.70));
        assert_eq!(compute_delta(true, true, 0.70, &cfg), 0.0);
        assert_eq!(compute_delta(true, false, 0.95, &cfg), 0.0);
        assert!(approx(compute_delta(false, false, 0.95, &cfg), -0.02));
    }

    fn pending_log(store: &CardStore, project: &Path, cards: &[&str]) {
        SessionLog {
            session_id: Some("20260212-090000".into()),
            started_at: Some("2000-01-01T00:00:00+00:00".into()),
            project_dir: Some(project.to_string_lossy().into_owned()),
            git_head_at_start: Some("abc123".into()),
            injected_cards: files(cards),
        }
        .save(&store.session_log_path())
        .unwrap();
    }

    fn add_card(store: &CardStore, name: &str, category: &str, score: f64, keywords: &[&str]) {
        let mut card = Card::new(name, category);
        card.score = score;
        card.triggers.keywords = files(keywords);
        store.upsert(card).unwrap();
    }

    #[test]
    fn code_session_without_keywords_gives_moderate_boost() {
        let tmp = TempDir::new().unwrap();
        let store = CardStore::open(tmp.path().join("home"));
        add_card(&store, "uv-scripts", "python", 0.50, &["uv", "inline"]);
        pending_log(&store, tmp.path(), &["uv-scripts"]);
        let vcs = FakeVcs {
            working_diff: Some("+print('hello')".into()),
            changed_files: files(&["main.py"]),
            ..FakeVcs::default()
        };

        let report = score_session(&store, &vcs, &FeedbackConfig::default())
            .unwrap()
            .unwrap();

        assert_eq!(report.session_type, SessionType::Code);
        let outcome = &report.outcomes[0];
        assert!(outcome.session_match && !outcome.keyword_match);
        assert_eq!(outcome.new_score, 0.55);

        let card = store.get("uv-scripts").unwrap().unwrap();
        assert_eq!(card.score, 0.55);
        assert_eq!(card.times_useful, 1);
        assert_eq!(store.find_entry("uv-scripts").unwrap().score, 0.55);
        assert!(!SessionLog::load(&store.session_log_path()).is_pending());
    }

    #[test]
    fn strong_signal_stops_at_cap_and_decay_is_not_useful() {
        let tmp = TempDir::new().unwrap();
        let store = CardStore::open(tmp.path().join("home"));
        add_card(&store, "near-cap", "python", 0.65, &["uv"]);
        add_card(&store, "at-cap", "tools", 0.70, &["uv"]);
        add_card(&store, "off-topic", "workflow", 0.40, &["kanban"]);
        pending_log(&store, tmp.path(), &["near-cap", "at-cap", "off-topic"]);
        let vcs = FakeVcs {
            working_diff: Some("+uv run app.py".into()),
            changed_files: files(&["app.py"]),
            ..FakeVcs::default()
        };

        let report = score_session(&store, &vcs, &FeedbackConfig::default())
            .unwrap()
            .unwrap();

        let scores: Vec<f64> = report.outcomes.iter().map(|o| o.new_score).collect();
        assert_eq!(scores, vec![0.70, 0.70, 0.38]);
        assert_eq!(store.get("near-cap").unwrap().unwrap().times_useful, 1);
        assert_eq!(store.get("at-cap").unwrap().unwrap().times_useful, 0);
        assert_eq!(store.get("off-topic").unwrap().unwrap().times_useful, 0);
    }

    #[test]
    fn missing_cards_are_skipped_and_log_still_cleared() {
        let tmp = TempDir::new().unwrap();
        let store = CardStore::open(tmp.path().join("home"));
        pending_log(&store, tmp.path(), &["deleted-card"]);

        let report = score_session(&store, &FakeVcs::default(), &FeedbackConfig::default())
            .unwrap()
            .unwrap();

        assert!(report.outcomes.is_empty());
        assert_eq!(SessionLog::load(&store.session_log_path()), SessionLog::default());
        assert!(format_summary(&report, true).is_none());
    }

    #[test]
    fn unparsable_card_is_skipped_and_rest_still_scored() {
        let tmp = TempDir::new().unwrap();
        let store = CardStore::open(tmp.path().join("home"));
        add_card(&store, "bad", "python", 0.50, &[]);
        add_card(&store, "good", "python", 0.50, &[]);
        fs::write(store.record_path("python", "bad"), "---\nname: [oops\n---\n").unwrap();
        pending_log(&store, tmp.path(), &["bad", "good"]);
        let vcs = FakeVcs {
            changed_files: files(&["a.py"]),
            ..FakeVcs::default()
        };

        let report = score_session(&store, &vcs, &FeedbackConfig::default())
            .unwrap()
            .unwrap();

        let names: Vec<&str> = report.outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["good"]);
        assert_eq!(store.get("good").unwrap().unwrap().score, 0.55);
        assert!(!SessionLog::load(&store.session_log_path()).is_pending());
    }

    #[test]
    fn no_injection_leaves_log_alone() {
        let tmp = TempDir::new().unwrap();
        let store = CardStore::open(tmp.path());
        let idle = SessionLog {
            session_id: Some("20260212-090000".into()),
            ..SessionLog::default()
        };
        idle.save(&store.session_log_path()).unwrap();

        let out = score_session(&store, &FakeVcs::default(), &FeedbackConfig::default()).unwrap();
        assert!(out.is_none());
        assert_eq!(SessionLog::load(&store.session_log_path()), idle);
    }

    #[test]
    fn evidence_merges_sources_and_filters_untracked() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("notes.md"), "Use UV for scripts").unwrap();
        fs::write(tmp.path().join("big.py"), "HUGE ".repeat(20)).unwrap();
        let log = SessionLog {
            started_at: Some("2000-01-01T00:00:00+00:00".into()),
            project_dir: Some(tmp.path().to_string_lossy().into_owned()),
            git_head_at_start: Some("abc123".into()),
            injected_cards: files(&["x"]),
            ..SessionLog::default()
        };
        let vcs = FakeVcs {
            working_diff: Some("+Working".into()),
            diff_since: Some("+Committed".into()),
            log_since: Some("def456 Add Feature".into()),
            changed_files: files(&["a.py"]),
            changed_files_since: files(&["a.py", "b.md"]),
            untracked_files: files(&["notes.md", "big.py", "vanished.txt"]),
            ..FakeVcs::default()
        };

        let ev = gather_evidence(&vcs, &log, 50);

        assert_eq!(ev.changed_files, files(&["a.py", "b.md", "notes.md", "big.py"]));
        assert_eq!(
            ev.diff_text,
            "+working\nuse uv for scripts\n+committed\ndef456 add feature"
        );
    }

    #[test]
    fn untracked_files_older_than_session_are_ignored() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("old.md"), "stale").unwrap();
        let log = SessionLog {
            started_at: Some("2999-01-01T00:00:00+00:00".into()),
            project_dir: Some(tmp.path().to_string_lossy().into_owned()),
            ..SessionLog::default()
        };
        let vcs = FakeVcs {
            untracked_files: files(&["old.md"]),
            diff_since: Some("never asked without a head".into()),
            ..FakeVcs::default()
        };

        let ev = gather_evidence(&vcs, &log, 50_000);
        assert!(ev.changed_files.is_empty());
        assert!(ev.diff_text.is_empty());
    }

    #[test]
    fn summary_lists_markers_and_contributors() {
        let report = FeedbackReport {
            session_type: SessionType::Code,
            outcomes: vec![
                CardOutcome {
                    name: "uv-scripts".into(),
                    session_match: true,
                    keyword_match: true,
                    delta: 0.10,
                    new_score: 0.6,
                },
                CardOutcome {
                    name: "plan-first".into(),
                    session_match: false,
                    keyword_match: false,
                    delta: -0.02,
                    new_score: 0.48,
                },
            ],
        };

        let text = format_summary(&report, true).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "📊 FeedFwd — session summary (💻 code):");
        assert_eq!(lines[1], "   • Uv Scripts — ✅ applied (session + keywords) (score: 0.60)");
        assert_eq!(lines[2], "   • Plan First — 💤 not referenced (score: 0.48)");
        assert_eq!(lines[3], "   1 card(s) contributed to this session.");

        let plain = format_summary(&report, false).unwrap();
        assert!(plain.starts_with("FeedFwd session summary (code):"));
        assert!(plain.contains("Plan First — not referenced"));
    }
}
