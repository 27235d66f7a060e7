use super::{AgentRegistry, ServiceOptions, TrybookService};
use crate::test_support::git_fixture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A service rooted in a scratch directory whose remote base points at
/// local bare repositories.
pub(super) struct Harness {
    pub service: Arc<TrybookService>,
    root: PathBuf,
    dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_agents(|_| AgentRegistry::default())
    }

    pub fn with_agents(agents: impl FnOnce(&Path) -> AgentRegistry) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let bin = dir.path().join("bin");
        let remotes = dir.path().join("remotes");
        std::fs::create_dir_all(&bin).expect("create bin dir");
        std::fs::create_dir_all(&remotes).expect("create remotes dir");

        let root = dir.path().join("root");
        let options = ServiceOptions {
            root: root.clone(),
            remote_base: git_fixture::file_url(&remotes),
            git_timeout: Duration::from_secs(60),
            agents: agents(&bin),
        };
        let service = TrybookService::new_with_options(options).expect("service");
        Self { service, root, dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn remote(&self, org: &str, repo: &str) -> PathBuf {
        let remotes = self.dir.path().join("remotes");
        let existing = remotes.join(org).join(format!("{repo}.git"));
        if existing.exists() {
            return existing;
        }
        git_fixture::bare_remote(&remotes, org, repo, "main")
    }

    /// Opens a notebook on a freshly seeded remote and returns its id.
    pub fn notebook(&self, org: &str, repo: &str) -> String {
        self.remote(org, repo);
        self.service
            .open_notebook(&format!("{org}/{repo}"))
            .expect("open notebook")
            .id
    }
}

#[cfg(unix)]
pub(super) fn fake_agent(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt as _;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake agent");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod fake agent");
    path
}
