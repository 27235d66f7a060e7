use std::ffi::{OsStr, OsString};
use std::sync::{Mutex, MutexGuard, OnceLock};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Serializes tests that touch process-wide environment variables.
pub(crate) fn lock_env() -> MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) struct EnvVarGuard {
    key: &'static str,
    prev: Option<OsString>,
}

impl EnvVarGuard {
    pub(crate) fn set(key: &'static str, value: impl AsRef<OsStr>) -> Self {
        let prev = std::env::var_os(key);
        unsafe {
            std::env::set_var(key, value);
        }
        Self { key, prev }
    }

    pub(crate) fn remove(key: &'static str) -> Self {
        let prev = std::env::var_os(key);
        unsafe {
            std::env::remove_var(key);
        }
        Self { key, prev }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        if let Some(prev) = self.prev.take() {
            unsafe {
                std::env::set_var(self.key, prev);
            }
        } else {
            unsafe {
                std::env::remove_var(self.key);
            }
        }
    }
}

/// Helpers that build throwaway git remotes with the real `git` binary.
pub(crate) mod git_fixture {
    use std::path::{Path, PathBuf};
    use std::process::Command;

    pub(crate) fn git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "trybook")
            .env("GIT_AUTHOR_EMAIL", "trybook@example.invalid")
            .env("GIT_COMMITTER_NAME", "trybook")
            .env("GIT_COMMITTER_EMAIL", "trybook@example.invalid")
            .output()
            .expect("spawn git");
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).trim().to_owned()
    }

    /// Creates `<remote_base>/<org>/<repo>.git` as a bare repository with one
    /// commit on `branch`, and returns its path.
    pub(crate) fn bare_remote(remote_base: &Path, org: &str, repo: &str, branch: &str) -> PathBuf {
        let seed = remote_base.join(format!(".seed-{org}-{repo}"));
        std::fs::create_dir_all(&seed).expect("create seed dir");
        git(&seed, &["init", "-q"]);
        git(&seed, &["checkout", "-q", "-b", branch]);
        std::fs::write(seed.join("README.md"), format!("# {repo}\n")).expect("write readme");
        git(&seed, &["add", "README.md"]);
        git(&seed, &["commit", "-q", "-m", "initial"]);

        let bare = remote_base.join(org).join(format!("{repo}.git"));
        std::fs::create_dir_all(bare.parent().expect("bare parent")).expect("create org dir");
        git(
            remote_base,
            &[
                "clone",
                "-q",
                "--bare",
                seed.to_str().expect("utf8 seed path"),
                bare.to_str().expect("utf8 bare path"),
            ],
        );
        bare
    }

    pub(crate) fn file_url(path: &Path) -> String {
        format!("file://{}", path.display())
    }
}
