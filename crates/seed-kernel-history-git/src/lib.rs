//! [`VersionHistory`] backed by the `git` command line.
//!
//! Every call runs `git -C <document dir>` and addresses the document by file
//! name, so the working tree may live anywhere inside a repository.

use std::ffi::OsStr;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use seed_kernel_core::history::{HistoryError, Revision, VersionHistory};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const FIELD_SEPARATOR: char = '\u{1f}';
const MIN_REVISION_LEN: usize = 7;
const MAX_REVISION_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct GitHistory {
    program: String,
    timeout: Duration,
}

impl Default for GitHistory {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

struct GitOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

impl GitHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a different executable, e.g. an absolute path to `git`.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Whether the configured executable answers `--version`.
    #[must_use]
    pub fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    fn run<I, S>(&self, dir: &Path, args: I) -> Result<GitOutput, HistoryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command
            .arg("-C")
            .arg(dir)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!(command = ?command, "running git");

        let mut child = command.spawn().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                HistoryError::Unavailable(format!("`{}` not found", self.program))
            } else {
                HistoryError::Io(err)
            }
        })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let status = self.wait(&mut child)?;

        Ok(GitOutput {
            status,
            stdout: join_drain(stdout),
            stderr: join_drain(stderr),
        })
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus, HistoryError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                warn!(timeout = ?self.timeout, "git did not finish in time; killing it");
                let _ = child.kill();
                let _ = child.wait();
                return Err(HistoryError::Timeout(self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn run_checked<I, S>(&self, dir: &Path, args: I) -> Result<String, HistoryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.run(dir, args)?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(classify_failure(&output.stderr))
        }
    }
}

type Drain = Option<thread::JoinHandle<String>>;

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Drain {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            String::from_utf8_lossy(&buffer).into_owned()
        })
    })
}

fn join_drain(handle: Drain) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn classify_failure(stderr: &str) -> HistoryError {
    let message = stderr.trim().to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("not a git repository") {
        HistoryError::Unavailable(message)
    } else if lower.contains("invalid object name")
        || lower.contains("does not exist")
        || lower.contains("exists on disk, but not in")
        || lower.contains("bad revision")
        || lower.contains("unknown revision")
    {
        HistoryError::NotFound(message)
    } else {
        HistoryError::Backend(message)
    }
}

/// Split a document path into the directory git runs in and the file name.
fn locate(path: &Path) -> Result<(&Path, &OsStr), HistoryError> {
    let name = path
        .file_name()
        .ok_or_else(|| HistoryError::Backend(format!("{} has no file name", path.display())))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok((dir, name))
}

fn check_revision_id(id: &str) -> Result<(), HistoryError> {
    let well_formed = (MIN_REVISION_LEN..=MAX_REVISION_LEN).contains(&id.len())
        && id.chars().all(|c| c.is_ascii_hexdigit());
    if well_formed {
        Ok(())
    } else {
        Err(HistoryError::InvalidRevision(id.to_string()))
    }
}

fn parse_log_line(line: &str) -> Result<Revision, HistoryError> {
    let mut fields = line.splitn(3, FIELD_SEPARATOR);
    let (Some(id), Some(timestamp)) = (fields.next(), fields.next()) else {
        return Err(HistoryError::Backend(format!("unexpected git log line `{line}`")));
    };
    let timestamp = OffsetDateTime::parse(timestamp, &Rfc3339).map_err(|err| {
        HistoryError::Backend(format!("unparseable commit time `{timestamp}`: {err}"))
    })?;
    Ok(Revision {
        id: id.to_string(),
        timestamp,
        message: fields.next().unwrap_or_default().to_string(),
    })
}

impl VersionHistory for GitHistory {
    fn list_revisions(&self, path: &Path, limit: usize) -> Result<Vec<Revision>, HistoryError> {
        let (dir, name) = locate(path)?;
        let format = format!("--format=%H{FIELD_SEPARATOR}%aI{FIELD_SEPARATOR}%s");
        let limit = format!("--max-count={limit}");
        let output = self.run(
            dir,
            [
                OsStr::new("log"),
                OsStr::new(&limit),
                OsStr::new(&format),
                OsStr::new("--"),
                name,
            ],
        )?;
        if !output.status.success() {
            // A fresh repository has no HEAD yet.
            if output.stderr.contains("does not have any commits") {
                return Ok(Vec::new());
            }
            return Err(classify_failure(&output.stderr));
        }
        output
            .stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_log_line)
            .collect()
    }

    fn read_revision_content(&self, path: &Path, id: &str) -> Result<String, HistoryError> {
        check_revision_id(id)?;
        let (dir, name) = locate(path)?;
        let object = format!("{id}:./{}", name.to_string_lossy());
        self.run_checked(dir, ["show", object.as_str()])
    }

    fn commit(&self, path: &Path, message: &str) -> Result<String, HistoryError> {
        let (dir, name) = locate(path)?;
        self.run_checked(dir, [OsStr::new("add"), OsStr::new("--"), name])?;

        let staged = self.run(
            dir,
            [
                OsStr::new("diff"),
                OsStr::new("--cached"),
                OsStr::new("--quiet"),
                OsStr::new("--"),
                name,
            ],
        )?;
        if staged.status.success() {
            debug!(path = %path.display(), "no staged change; reusing HEAD");
        } else {
            self.run_checked(
                dir,
                [
                    OsStr::new("commit"),
                    OsStr::new("--quiet"),
                    OsStr::new("-m"),
                    OsStr::new(message),
                    OsStr::new("--"),
                    name,
                ],
            )?;
        }

        let head = self.run_checked(dir, ["rev-parse", "HEAD"])?;
        Ok(head.trim().to_string())
    }

    fn revision_patch(&self, path: &Path, id: &str) -> Result<String, HistoryError> {
        check_revision_id(id)?;
        let (dir, name) = locate(path)?;
        self.run_checked(
            dir,
            [
                OsStr::new("show"),
                OsStr::new("--stat"),
                OsStr::new("--patch"),
                OsStr::new("--no-color"),
                OsStr::new(id),
                OsStr::new("--"),
                name,
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::Result;
    use tempfile::TempDir;

    use super::*;

    fn git_available() -> bool {
        GitHistory::new().is_available()
    }

    fn run_git(root: &Path, args: &[&str]) -> Result<()> {
        let status = Command::new("git").arg("-C").arg(root).args(args).status()?;
        anyhow::ensure!(status.success(), "git {args:?} failed");
        Ok(())
    }

    fn init_repo() -> Result<TempDir> {
        let dir = tempfile::tempdir()?;
        run_git(dir.path(), &["init", "--quiet"])?;
        run_git(dir.path(), &["config", "user.name", "Seed Tester"])?;
        run_git(dir.path(), &["config", "user.email", "seed@example.invalid"])?;
        run_git(dir.path(), &["config", "commit.gpgsign", "false"])?;
        Ok(dir)
    }

    // Test IDs: TGIT-001
    #[test]
    fn revision_ids_must_be_hex_and_long_enough() {
        assert!(check_revision_id("a1b2c3d").is_ok());
        assert!(check_revision_id(&"f".repeat(40)).is_ok());
        for bad in ["abc", "HEAD", "a1b2c3d; rm -rf /", "zzzzzzzz", "--all"] {
            assert!(
                matches!(check_revision_id(bad), Err(HistoryError::InvalidRevision(_))),
                "{bad} should be rejected"
            );
        }
    }

    // Test IDs: TGIT-002
    #[test]
    fn parses_log_lines_and_classifies_failures() -> Result<()> {
        let line = format!("abc1234{FIELD_SEPARATOR}2026-02-18T10:00:00+01:00{FIELD_SEPARATOR}fix: a|b");
        let revision = parse_log_line(&line)?;
        assert_eq!(revision.id, "abc1234");
        assert_eq!(revision.message, "fix: a|b");
        assert_eq!(revision.timestamp.offset().whole_hours(), 1);

        assert!(parse_log_line("garbage").is_err());
        assert!(matches!(
            classify_failure("fatal: not a git repository (or any parent)"),
            HistoryError::Unavailable(_)
        ));
        assert!(matches!(
            classify_failure("fatal: path 'SEED.md' does not exist in 'deadbeef'"),
            HistoryError::NotFound(_)
        ));
        assert!(matches!(classify_failure("fatal: boom"), HistoryError::Backend(_)));
        Ok(())
    }

    // Test IDs: TGIT-003
    #[test]
    fn missing_program_is_unavailable() {
        let history = GitHistory::new().with_program("definitely-not-git-4f1c");
        assert!(!history.is_available());
        assert!(matches!(
            history.list_revisions(Path::new("SEED.md"), 5),
            Err(HistoryError::Unavailable(_))
        ));
    }

    // Test IDs: TGIT-004
    #[test]
    fn commits_list_and_read_back() -> Result<()> {
        if !git_available() {
            return Ok(());
        }
        let repo = init_repo()?;
        let seed = repo.path().join("SEED.md");
        let history = GitHistory::new();

        assert!(history.list_revisions(&seed, 10)?.is_empty());

        fs::write(&seed, "first")?;
        let first = history.commit(&seed, "seed: first")?;
        fs::write(&seed, "second")?;
        let second = history.commit(&seed, "seed: second")?;
        assert_ne!(first, second);

        // Unchanged content does not create a commit.
        assert_eq!(history.commit(&seed, "seed: noop")?, second);

        let revisions = history.list_revisions(&seed, 10)?;
        let ids = revisions.iter().map(|revision| revision.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec![second.as_str(), first.as_str()]);
        assert_eq!(revisions[0].message, "seed: second");
        assert_eq!(history.list_revisions(&seed, 1)?.len(), 1);

        assert_eq!(history.read_revision_content(&seed, &first)?, "first");
        assert_eq!(history.read_revision_content(&seed, &second[..12])?, "second");
        assert!(matches!(
            history.read_revision_content(&seed, "0000000000000000000000000000000000000000"),
            Err(HistoryError::NotFound(_))
        ));
        Ok(())
    }

    // Test IDs: TGIT-006
    #[test]
    fn revision_patch_shows_one_commit() -> Result<()> {
        if !git_available() {
            return Ok(());
        }
        let repo = init_repo()?;
        let seed = repo.path().join("SEED.md");
        let history = GitHistory::new();

        fs::write(&seed, "state:calm\n")?;
        history.commit(&seed, "seed: calm")?;
        fs::write(&seed, "state:restless\n")?;
        let second = history.commit(&seed, "seed: restless")?;

        let patch = history.revision_patch(&seed, &second)?;
        assert!(patch.contains("seed: restless"));
        assert!(patch.contains("-state:calm"));
        assert!(patch.contains("+state:restless"));
        assert!(matches!(
            history.revision_patch(&seed, "HEAD~1"),
            Err(HistoryError::InvalidRevision(_))
        ));
        Ok(())
    }

    // Test IDs: TGIT-005
    #[test]
    fn only_touches_the_document() -> Result<()> {
        if !git_available() {
            return Ok(());
        }
        let repo = init_repo()?;
        let seed = repo.path().join("SEED.md");
        let other = repo.path().join("notes.md");
        fs::write(&seed, "seed")?;
        fs::write(&other, "notes")?;
        run_git(repo.path(), &["add", "notes.md"])?;

        GitHistory::new().commit(&seed, "seed: only")?;

        let output = Command::new("git")
            .arg("-C")
            .arg(repo.path())
            .args(["diff", "--cached", "--name-only"])
            .output()?;
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "notes.md");
        Ok(())
    }
}
