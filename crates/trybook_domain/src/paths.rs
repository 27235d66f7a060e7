use std::path::{Path, PathBuf};

pub const TRYBOOK_ROOT_ENV: &str = "TRYBOOK_ROOT";
pub const TRYBOOK_REMOTE_BASE_ENV: &str = "TRYBOOK_REMOTE_BASE";
pub const TRYBOOK_GIT_TIMEOUT_SECS_ENV: &str = "TRYBOOK_GIT_TIMEOUT_SECS";

pub const DEFAULT_REMOTE_BASE: &str = "https://github.com";
pub const DEFAULT_ROOT_DIR_NAME: &str = ".trybook";

pub fn clones_root(root: &Path) -> PathBuf {
    root.join("clone")
}

pub fn worktrees_root(root: &Path) -> PathBuf {
    root.join("worktree")
}

pub fn sqlite_path(root: &Path) -> PathBuf {
    root.join("trybook.db")
}

pub fn clone_dir(root: &Path, org: &str, repo: &str) -> PathBuf {
    clones_root(root).join(org).join(repo)
}

pub fn worktree_dir(root: &Path, org: &str, repo: &str, worktree_id: &str) -> PathBuf {
    worktrees_root(root).join(org).join(repo).join(worktree_id)
}

pub fn remote_url(remote_base: &str, org: &str, repo: &str) -> String {
    format!("{}/{org}/{repo}.git", remote_base.trim_end_matches('/'))
}
