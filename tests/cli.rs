use std::fs;
use std::path::Path;
use std::process::{Command, Output};

struct Sandbox {
    tmp: tempfile::TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("home")).expect("home dir");
        fs::create_dir_all(tmp.path().join("project")).expect("project dir");
        Self { tmp }
    }

    fn home(&self) -> std::path::PathBuf {
        self.tmp.path().join("home")
    }

    fn project(&self) -> std::path::PathBuf {
        self.tmp.path().join("project")
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_feedfwd"));
        cmd.env("FEEDFWD_HOME", self.home())
            .env("XDG_CONFIG_HOME", self.tmp.path().join("xdg"))
            .env("GIT_CEILING_DIRECTORIES", self.tmp.path())
            .env("NO_COLOR", "1");
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.cmd().args(args).output().expect("run feedfwd")
    }

    fn add(&self, name: &str, category: &str, keywords: &str, text: &str) -> Output {
        self.run(&[
            "add",
            "--name",
            name,
            "--category",
            category,
            "--keywords",
            keywords,
            "--injection-text",
            text,
        ])
    }
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn assert_ok(out: &Output) {
    assert!(
        out.status.success(),
        "{}",
        String::from_utf8_lossy(&out.stderr)
    );
}

fn session_log(home: &Path) -> serde_json::Value {
    let raw = fs::read_to_string(home.join("_session_log.json")).expect("session log");
    serde_json::from_str(&raw).expect("session log json")
}

#[test]
fn add_writes_record_and_index() {
    let sb = Sandbox::new();
    let out = sb.add("uv-scripts", "python", "uv,script", "Run scripts with `uv run`.");
    assert_ok(&out);
    assert!(stdout(&out).starts_with("CREATED: uv-scripts → python/uv-scripts.md"));

    assert!(sb.home().join("knowledge/python/uv-scripts.md").is_file());
    let index: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(sb.home().join("_index.json")).unwrap()).unwrap();
    assert_eq!(index["version"], 1);
    assert_eq!(index["cards"][0]["name"], "uv-scripts");
    assert_eq!(index["cards"][0]["score"], 0.5);
}

#[test]
fn add_refuses_duplicate_without_force() {
    let sb = Sandbox::new();
    assert_ok(&sb.add("uv-scripts", "python", "uv,script,inline", "Use uv."));

    let dup = sb.add("uv-inline", "python", "uv,inline", "Use uv inline.");
    assert_eq!(dup.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&dup.stderr).contains("duplicates existing card 'uv-scripts'"));

    let forced = sb.run(&[
        "add",
        "--name",
        "uv-inline",
        "--category",
        "python",
        "--keywords",
        "uv,inline",
        "--injection-text",
        "Use uv inline.",
        "--force",
    ]);
    assert_ok(&forced);
}

#[test]
fn check_dup_reports_and_validates() {
    let sb = Sandbox::new();
    assert_ok(&sb.add("existing", "tools", "a,b,c", "Text."));

    let out = sb.run(&["check-dup", "--name", "new", "--keywords", "a,b,c,d,e"]);
    assert_ok(&out);
    assert_eq!(stdout(&out).trim(), "DUPLICATE: existing");

    let out = sb.run(&["check-dup", "--name", "new", "--keywords", "a,x,y,z,w"]);
    assert_eq!(stdout(&out).trim(), "NO_DUPLICATE");

    let out = sb.run(&["check-dup", "--name", "EXISTING"]);
    assert_eq!(stdout(&out).trim(), "DUPLICATE: existing");

    let out = sb.run(&["check-dup"]);
    assert_eq!(out.status.code(), Some(1));

    let out = sb.run(&["check-dup", "--name", "x", "--threshold", "1.5"]);
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn count_tokens_prints_integer() {
    let sb = Sandbox::new();
    let out = sb.run(&["count-tokens", "Use", "uv", "run"]);
    assert_ok(&out);
    let n: usize = stdout(&out).trim().parse().expect("integer output");
    assert!(n > 0);

    let empty = sb.run(&["count-tokens"]);
    assert_eq!(empty.status.code(), Some(1));
}

#[test]
fn show_missing_card_suggests_and_fails() {
    let sb = Sandbox::new();
    assert_ok(&sb.add("uv-scripts", "python", "uv", "Use uv."));

    let out = sb.run(&["show", "uv"]);
    assert_eq!(out.status.code(), Some(1));
    let text = stdout(&out);
    assert!(text.contains("Card not found: 'uv'"));
    assert!(text.contains("Did you mean: uv-scripts?"));

    let found = sb.run(&["show", "uv-scripts"]);
    assert_ok(&found);
    assert!(stdout(&found).contains("── Injection Text ──\nUse uv."));
}

#[test]
fn remove_deletes_record_and_entry() {
    let sb = Sandbox::new();
    assert_ok(&sb.add("gone", "testing", "pytest", "Use fixtures."));

    let out = sb.run(&["remove", "gone"]);
    assert_ok(&out);
    assert!(stdout(&out).contains("Removed: gone"));
    assert!(!sb.home().join("knowledge/testing/gone.md").exists());

    let again = sb.run(&["remove", "gone"]);
    assert_eq!(again.status.code(), Some(1));
}

#[test]
fn index_rebuild_restores_lost_index() {
    let sb = Sandbox::new();
    assert_ok(&sb.add("one", "tools", "x", "One."));
    assert_ok(&sb.add("two", "workflow", "y", "Two."));
    fs::write(sb.home().join("knowledge/tools/broken.md"), "no header").unwrap();
    fs::remove_file(sb.home().join("_index.json")).unwrap();

    let out = sb.run(&["index", "rebuild"]);
    assert_ok(&out);
    assert_eq!(stdout(&out).trim(), "REBUILT: 2 cards indexed");
    assert!(String::from_utf8_lossy(&out.stderr).contains("Warning: Could not parse"));

    let out = sb.run(&["index", "remove", "one"]);
    assert_eq!(stdout(&out).trim(), "REMOVED: one");
    let out = sb.run(&["index", "remove", "one"]);
    assert_eq!(stdout(&out).trim(), "NOT_FOUND: one");
}

#[test]
fn index_add_imports_record_file() {
    let sb = Sandbox::new();
    let record = sb.tmp.path().join("draft.md");
    fs::write(
        &record,
        "---\nname: plan-first\ncategory: workflow\ntriggers:\n  keywords: [plan]\n---\n\n## Injection Text\n\nIterate on the plan before coding.\n",
    )
    .unwrap();

    let out = sb.run(&["index", "add", record.to_str().unwrap()]);
    assert_ok(&out);
    assert_eq!(stdout(&out).trim(), "INDEXED: plan-first → workflow/plan-first.md");
    assert!(sb.home().join("knowledge/workflow/plan-first.md").is_file());

    let listed = sb.run(&["index", "list"]);
    assert!(stdout(&listed).contains("plan-first → workflow/plan-first.md"));
}

#[test]
fn inject_with_empty_store_prints_nothing() {
    let sb = Sandbox::new();
    let out = sb.run(&["inject", sb.project().to_str().unwrap()]);
    assert_ok(&out);
    assert!(stdout(&out).is_empty());
    assert!(!sb.home().join("_session_log.json").exists());
}

#[test]
fn inject_then_feedback_round_trip() {
    let sb = Sandbox::new();
    assert_ok(&sb.add("uv-scripts", "python", "uv", "Run scripts with `uv run`."));
    fs::write(sb.project().join("CLAUDE.md"), "This project uses uv.").unwrap();

    let out = sb.run(&["inject", sb.project().to_str().unwrap()]);
    assert_ok(&out);
    assert_eq!(
        stdout(&out).trim_end(),
        "📚 FeedFwd — active learnings for this session:\n• [Uv Scripts] Run scripts with `uv run`."
    );
    let log = session_log(&sb.home());
    assert_eq!(log["injected_cards"], serde_json::json!(["uv-scripts"]));

    let out = sb.run(&["feedback"]);
    assert_ok(&out);
    let summary = stdout(&out);
    assert!(summary.starts_with("📊 FeedFwd — session summary"));
    assert!(summary.contains("• Uv Scripts — "));

    let log = session_log(&sb.home());
    assert_eq!(log["injected_cards"], serde_json::json!([]));
    assert_eq!(log["session_id"], serde_json::Value::Null);

    // Nothing pending: a second run is a no-op.
    let again = sb.run(&["feedback"]);
    assert_ok(&again);
    assert!(stdout(&again).is_empty());
}

#[test]
fn list_and_stats_views() {
    let sb = Sandbox::new();
    assert_ok(&sb.add("uv-scripts", "python", "uv", "Use uv."));
    assert_ok(&sb.add("plan-first", "workflow", "plan", "Plan first."));

    let out = sb.run(&["list"]);
    assert_ok(&out);
    let text = stdout(&out);
    assert!(text.starts_with("📚 FeedFwd Knowledge Base (2 cards)"));
    assert!(text.contains("python/ (1 cards)"));
    assert!(text.contains("new, not yet surfaced"));

    let out = sb.run(&["stats"]);
    assert_ok(&out);
    let text = stdout(&out);
    assert!(text.contains("Total cards: 2"));
    assert!(text.contains("Average score: 0.50"));

    let out = sb.run(&["search", "PLAN"]);
    assert_ok(&out);
    assert!(stdout(&out).contains("1 card(s) matching 'PLAN'"));
}
