use super::git::GitRunner;
use anyhow::{Context as _, anyhow};
use std::ffi::OsStr;
use std::path::Path;
use trybook_domain::paths;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnsureOutcome {
    Cloned,
    AlreadyPresent,
}

const CLONE_BRANCHES: [Option<&str>; 3] = [Some("main"), Some("master"), None];

/// Makes sure `<root>/clone/<org>/<repo>` holds a git checkout.
///
/// A checkout whose `HEAD` resolves is reused and nothing is fetched.
/// Anything else at the path is treated as debris from an interrupted clone
/// and replaced.
pub(crate) fn ensure_cloned(
    git: &GitRunner,
    root: &Path,
    remote_base: &str,
    org: &str,
    repo: &str,
) -> anyhow::Result<EnsureOutcome> {
    let dest = paths::clone_dir(root, org, repo);
    if dest.join(".git").exists() && has_head(git, &dest) {
        tracing::debug!(org = %org, repo = %repo, "clone already present");
        return Ok(EnsureOutcome::AlreadyPresent);
    }
    if dest.exists() {
        tracing::warn!(path = %dest.display(), "removing incomplete clone");
        remove_path(&dest)?;
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let url = paths::remote_url(remote_base, org, repo);
    let dest_arg = dest.to_string_lossy().to_string();
    let mut last_output = String::new();

    for branch in CLONE_BRANCHES {
        let mut args = vec!["clone", "--depth", "1", "--single-branch"];
        if let Some(branch) = branch {
            args.extend(["--branch", branch]);
        }
        args.extend([url.as_str(), dest_arg.as_str()]);

        let output = match git.output(None, &args) {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!(
                    org = %org,
                    repo = %repo,
                    branch = branch.unwrap_or("<default>"),
                    error = %format!("{err:#}"),
                    "clone attempt aborted"
                );
                last_output = format!("{err:#}");
                if dest.exists() {
                    remove_path(&dest)?;
                }
                continue;
            }
        };
        if output.success {
            tracing::info!(
                org = %org,
                repo = %repo,
                branch = branch.unwrap_or("<default>"),
                "cloned repository"
            );
            return Ok(EnsureOutcome::Cloned);
        }

        tracing::debug!(
            org = %org,
            repo = %repo,
            branch = branch.unwrap_or("<default>"),
            status = %output.status,
            "clone attempt failed"
        );
        last_output = output.combined();
        if dest.exists() {
            remove_path(&dest)?;
        }
    }

    Err(anyhow!("git clone failed for {org}/{repo}:\n{last_output}"))
}

fn has_head(git: &GitRunner, dest: &Path) -> bool {
    let git_dir = dest.join(".git");
    let args = [
        OsStr::new("--git-dir"),
        git_dir.as_os_str(),
        OsStr::new("rev-parse"),
        OsStr::new("--verify"),
        OsStr::new("--quiet"),
        OsStr::new("HEAD"),
    ];
    match git.output(None, args) {
        Ok(output) => output.success,
        Err(err) => {
            tracing::warn!(path = %dest.display(), error = %format!("{err:#}"), "failed to verify clone");
            false
        }
    }
}

fn remove_path(path: &Path) -> anyhow::Result<()> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    result.with_context(|| format!("failed to remove {}", path.display()))
}
