use super::thread_io::spawn_read_to_string;
use anyhow::{Context as _, anyhow};
use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use wait_timeout::ChildExt as _;

/// Runs `git` with a hard ceiling on wall-clock time.
#[derive(Clone, Copy, Debug)]
pub(crate) struct GitRunner {
    timeout: Duration,
}

/// Captured result of a git invocation that ran to completion.
#[derive(Debug)]
pub(crate) struct GitOutput {
    pub success: bool,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    /// Stdout and stderr joined, for diagnostics shown to the user.
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => String::new(),
            (false, true) => stdout.to_owned(),
            (true, false) => stderr.to_owned(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }
}

impl GitRunner {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Spawns git and waits for it. A non-zero exit is returned as data; only
    /// spawn failures and timeouts are errors.
    pub(crate) fn output<I, S>(&self, cwd: Option<&Path>, args: I) -> anyhow::Result<GitOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect::<Vec<_>>();
        let command_line = args
            .iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");

        let mut command = Command::new("git");
        command
            .args(&args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let started = Instant::now();
        tracing::debug!(args = %command_line, "git start");
        let mut child = command.spawn().context("failed to spawn git")?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture git stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("failed to capture git stderr"))?;
        let stdout_handle = spawn_read_to_string(stdout);
        let stderr_handle = spawn_read_to_string(stderr);

        let status = match child.wait_timeout(self.timeout).context("failed to wait for git")? {
            Some(status) => status,
            None => {
                tracing::warn!(
                    args = %command_line,
                    timeout_secs = self.timeout.as_secs(),
                    "git timed out, killing"
                );
                child.kill().context("failed to kill git")?;
                let _ = child.wait();
                // Transport helpers can outlive git and hold the pipes open.
                drop(stdout_handle);
                drop(stderr_handle);
                return Err(anyhow!(
                    "git {command_line} timed out after {}s",
                    self.timeout.as_secs()
                ));
            }
        };

        let stdout = stdout_handle.join().unwrap_or_default();
        let stderr = stderr_handle.join().unwrap_or_default();
        tracing::debug!(
            args = %command_line,
            status = %status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "git end"
        );

        Ok(GitOutput {
            success: status.success(),
            status: status.to_string(),
            stdout,
            stderr,
        })
    }

    /// Like [`GitRunner::output`] but a non-zero exit is an error carrying
    /// git's diagnostics. Returns trimmed stdout.
    pub(crate) fn run<I, S>(&self, cwd: Option<&Path>, args: I) -> anyhow::Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.output(cwd, args)?;
        if !output.success {
            return Err(anyhow!(
                "git failed ({}):\nstdout:\n{}\nstderr:\n{}",
                output.status,
                output.stdout.trim(),
                output.stderr.trim()
            ));
        }
        Ok(output.stdout.trim().to_owned())
    }

    pub(crate) fn current_branch_and_commit(&self, dir: &Path) -> anyhow::Result<(String, String)> {
        let branch = self
            .run(Some(dir), ["rev-parse", "--abbrev-ref", "HEAD"])
            .context("failed to read current branch")?;
        let commit = self
            .run(Some(dir), ["rev-parse", "HEAD"])
            .context("failed to read head commit")?;
        Ok((branch, commit))
    }

    pub(crate) fn head_short(&self, dir: &Path) -> anyhow::Result<String> {
        self.run(Some(dir), ["rev-parse", "--short=7", "HEAD"])
            .context("failed to read head commit")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::git_fixture;

    #[test]
    fn run_reports_failure_with_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitRunner::new(Duration::from_secs(30));
        let err = git
            .run(Some(dir.path()), ["rev-parse", "HEAD"])
            .expect_err("not a repository");
        let message = format!("{err:#}");
        assert!(message.contains("git failed"), "{message}");
        assert!(message.to_ascii_lowercase().contains("not a git repository"), "{message}");
    }

    #[test]
    fn output_returns_non_zero_exit_as_data() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitRunner::new(Duration::from_secs(30));
        let output = git
            .output(Some(dir.path()), ["rev-parse", "HEAD"])
            .expect("spawned");
        assert!(!output.success);
        assert!(!output.combined().is_empty());
    }

    #[test]
    fn branch_commit_and_short_head_are_read_from_git() {
        let dir = tempfile::tempdir().unwrap();
        let bare = git_fixture::bare_remote(dir.path(), "acme", "widgets", "main");
        let checkout = dir.path().join("checkout");
        git_fixture::git(
            dir.path(),
            &[
                "clone",
                "-q",
                bare.to_str().unwrap(),
                checkout.to_str().unwrap(),
            ],
        );

        let git = GitRunner::new(Duration::from_secs(30));
        let (branch, commit) = git.current_branch_and_commit(&checkout).unwrap();
        assert_eq!(branch, "main");
        assert_eq!(commit.len(), 40);
        assert_eq!(git.head_short(&checkout).unwrap(), commit[..7]);
    }

    #[test]
    fn combined_joins_streams() {
        let output = GitOutput {
            success: false,
            status: "exit status: 128".to_owned(),
            stdout: "out\n".to_owned(),
            stderr: "fatal: nope\n".to_owned(),
        };
        assert_eq!(output.combined(), "out\nfatal: nope");
    }
}
