use super::git::GitRunner;
use anyhow::{Context as _, anyhow};
use rand::{Rng as _, rngs::OsRng};
use std::path::Path;
use trybook_domain::{AllocatedWorktree, paths};

pub(crate) fn generate_worktree_id() -> String {
    let bytes: [u8; 6] = OsRng.r#gen();
    let hex = bytes.iter().map(|b| format!("{b:02x}")).collect::<String>();
    format!("nb-{hex}")
}

/// Creates a fresh worktree on a new branch named after the worktree id.
/// Branch and commit are read back from git rather than assumed.
pub(crate) fn allocate(
    git: &GitRunner,
    root: &Path,
    org: &str,
    repo: &str,
) -> anyhow::Result<AllocatedWorktree> {
    let clone = paths::clone_dir(root, org, repo);
    if !clone.join(".git").exists() {
        return Err(anyhow!("no clone for {org}/{repo} at {}", clone.display()));
    }

    let worktree_id = generate_worktree_id();
    let path = paths::worktree_dir(root, org, repo, &worktree_id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let path_arg = path.to_string_lossy().to_string();
    let output = git.output(
        Some(clone.as_path()),
        ["worktree", "add", "-b", worktree_id.as_str(), path_arg.as_str()],
    )?;
    if !output.success {
        return Err(anyhow!(
            "git worktree add failed for {org}/{repo} ({}):\n{}",
            output.status,
            output.combined()
        ));
    }

    let (branch, commit_sha) = git
        .current_branch_and_commit(&path)
        .with_context(|| format!("failed to inspect worktree {}", path.display()))?;

    tracing::info!(
        org = %org,
        repo = %repo,
        worktree = %worktree_id,
        commit = %trybook_domain::short_commit(&commit_sha),
        "allocated worktree"
    );

    Ok(AllocatedWorktree {
        worktree_id,
        branch,
        commit_sha,
        path,
    })
}
