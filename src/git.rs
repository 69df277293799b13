//! Version-control evidence for injection and feedback.
//!
//! Every query is scoped to one project directory and time-bounded. A missing
//! `git`, a non-repository, a non-zero exit or a timeout all read as "no
//! evidence" (`None` / empty list), never as an error.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Log queries are cheap; they never get more than this.
const LOG_TIMEOUT_CAP: Duration = Duration::from_secs(3);

pub trait VcsProvider {
    /// Current HEAD revision.
    fn head(&self, dir: &Path) -> Option<String>;
    /// Uncommitted working-tree diff against HEAD.
    fn working_diff(&self, dir: &Path) -> Option<String>;
    /// Diff between a recorded revision and HEAD.
    fn diff_since(&self, dir: &Path, rev: &str) -> Option<String>;
    /// Tracked files differing from HEAD.
    fn changed_files(&self, dir: &Path) -> Vec<String>;
    /// Files changed between a recorded revision and HEAD.
    fn changed_files_since(&self, dir: &Path, rev: &str) -> Vec<String>;
    /// Untracked, non-ignored files.
    fn untracked_files(&self, dir: &Path) -> Vec<String>;
    /// One-line log entries in `rev..HEAD`.
    fn log_since(&self, dir: &Path, rev: &str) -> Option<String>;
    /// Last `count` one-line log entries.
    fn recent_log(&self, dir: &Path, count: usize) -> Option<String>;
}

/// `git` CLI implementation.
pub struct GitCli {
    timeout: Duration,
    verbose: u8,
}

impl GitCli {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            verbose: 0,
        }
    }

    pub fn from_millis(timeout_ms: u64) -> Self {
        Self::new(Duration::from_millis(timeout_ms))
    }

    pub fn with_verbose(mut self, verbose: u8) -> Self {
        self.verbose = verbose;
        self
    }

    fn log_timeout(&self) -> Duration {
        self.timeout.min(LOG_TIMEOUT_CAP)
    }

    /// Trimmed stdout of a successful, non-empty run.
    fn run(&self, dir: &Path, args: &[&str], timeout: Duration) -> Option<String> {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(dir).args(args);
        let out = run_with_timeout(cmd, timeout);
        if out.is_none() && self.verbose > 1 {
            eprintln!(
                "feedfwd.git no-evidence dir={} args={}",
                dir.display(),
                args.join(" ")
            );
        }
        out.filter(|s| !s.trim().is_empty())
    }

    fn run_lines(&self, dir: &Path, args: &[&str]) -> Vec<String> {
        self.run(dir, args, self.timeout)
            .map(|out| split_lines(&out))
            .unwrap_or_default()
    }
}

impl VcsProvider for GitCli {
    fn head(&self, dir: &Path) -> Option<String> {
        self.run(dir, &["rev-parse", "HEAD"], self.log_timeout())
            .map(|s| s.trim().to_string())
    }

    fn working_diff(&self, dir: &Path) -> Option<String> {
        self.run(dir, &["diff", "HEAD"], self.timeout)
    }

    fn diff_since(&self, dir: &Path, rev: &str) -> Option<String> {
        self.run(dir, &["diff", rev, "HEAD"], self.timeout)
    }

    fn changed_files(&self, dir: &Path) -> Vec<String> {
        self.run_lines(dir, &["diff", "--name-only", "HEAD"])
    }

    fn changed_files_since(&self, dir: &Path, rev: &str) -> Vec<String> {
        self.run_lines(dir, &["diff", "--name-only", rev, "HEAD"])
    }

    fn untracked_files(&self, dir: &Path) -> Vec<String> {
        self.run_lines(dir, &["ls-files", "--others", "--exclude-standard"])
    }

    fn log_since(&self, dir: &Path, rev: &str) -> Option<String> {
        let range = format!("{rev}..HEAD");
        self.run(dir, &["log", "--oneline", &range], self.log_timeout())
    }

    fn recent_log(&self, dir: &Path, count: usize) -> Option<String> {
        let limit = format!("-{count}");
        self.run(
            dir,
            &["log", "--oneline", &limit, "--no-decorate"],
            self.log_timeout(),
        )
        .map(|s| s.trim().to_string())
    }
}

fn split_lines(out: &str) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Run `cmd`, returning stdout on exit status 0. The child is killed once
/// `timeout` elapses without its stdout closing.
fn run_with_timeout(mut cmd: Command, timeout: Duration) -> Option<String> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .ok()?;
    let mut stdout = child.stdout.take()?;

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });

    match rx.recv_timeout(timeout) {
        Ok(buf) => {
            let status = child.wait().ok()?;
            status
                .success()
                .then(|| String::from_utf8_lossy(&buf).into_owned())
        }
        Err(_) => {
            let _ = child.kill();
            let _ = child.wait();
            None
        }
    }
}

/// Scripted provider for tests; every query returns its canned field.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct FakeVcs {
    pub head: Option<String>,
    pub working_diff: Option<String>,
    pub diff_since: Option<String>,
    pub changed_files: Vec<String>,
    pub changed_files_since: Vec<String>,
    pub untracked_files: Vec<String>,
    pub log_since: Option<String>,
    pub recent_log: Option<String>,
}

#[cfg(test)]
impl VcsProvider for FakeVcs {
    fn head(&self, _: &Path) -> Option<String> {
        self.head.clone()
    }
    fn working_diff(&self, _: &Path) -> Option<String> {
        self.working_diff.clone()
    }
    fn diff_since(&self, _: &Path, _: &str) -> Option<String> {
        self.diff_since.clone()
    }
    fn changed_files(&self, _: &Path) -> Vec<String> {
        self.changed_files.clone()
    }
    fn changed_files_since(&self, _: &Path, _: &str) -> Vec<String> {
        self.changed_files_since.clone()
    }
    fn untracked_files(&self, _: &Path) -> Vec<String> {
        self.untracked_files.clone()
    }
    fn log_since(&self, _: &Path, _: &str) -> Option<String> {
        self.log_since.clone()
    }
    fn recent_log(&self, _: &Path, _: usize) -> Option<String> {
        self.recent_log.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn split_lines_drops_blanks() {
        assert_eq!(split_lines("a.md\n\n  b.py \n"), vec!["a.md", "b.py"]);
    }

    #[test]
    fn non_repository_yields_no_evidence() {
        let tmp = TempDir::new().unwrap();
        let git = GitCli::from_millis(3000);
        assert_eq!(git.head(tmp.path()), None);
        assert_eq!(git.working_diff(tmp.path()), None);
        assert!(git.changed_files(tmp.path()).is_empty());
        assert_eq!(git.recent_log(tmp.path(), 5), None);
    }

    #[test]
    fn missing_binary_yields_none() {
        let cmd = Command::new("feedfwd-definitely-not-a-binary");
        assert_eq!(run_with_timeout(cmd, Duration::from_secs(1)), None);
    }

    #[cfg(unix)]
    #[test]
    fn slow_command_is_killed_at_timeout() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5; echo late"]);
        let start = std::time::Instant::now();
        assert_eq!(run_with_timeout(cmd, Duration::from_millis(200)), None);
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_yields_none() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo partial; exit 3"]);
        assert_eq!(run_with_timeout(cmd, Duration::from_secs(2)), None);
    }
}
