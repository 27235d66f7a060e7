use anyhow::Context as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use trybook_domain::{
    AgentModel, CloneRecord, InputError, NotebookEntry, NotebookMeta, NotebookSummary, paths,
    parse_repo_input, short_commit, validate_notebook_id, validate_prompt,
};

use crate::sqlite_store::SqliteStore;

mod agent_process;
mod agents;
mod cancel_killer;
mod clone;
mod dispatch;
mod git;
mod roots;
mod thread_io;
mod worktree;

pub use agents::AgentRegistry;
pub use clone::EnsureOutcome;
pub use dispatch::{PreparedRun, RunOutcome, RunSink};
use git::GitRunner;

/// Failure kinds callers need to tell apart.
#[derive(Debug)]
pub enum ServiceError {
    Input(InputError),
    NotFound,
    UnknownEntry,
    Git(anyhow::Error),
    Store(anyhow::Error),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Input(err) => write!(f, "{err}"),
            ServiceError::NotFound => write!(f, "notebook not found"),
            ServiceError::UnknownEntry => write!(f, "unknown notebook entry"),
            ServiceError::Git(err) => write!(f, "{err:#}"),
            ServiceError::Store(err) => write!(f, "store error: {err:#}"),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::Input(err) => Some(err),
            ServiceError::Git(err) | ServiceError::Store(err) => Some(&**err),
            ServiceError::NotFound | ServiceError::UnknownEntry => None,
        }
    }
}

impl From<InputError> for ServiceError {
    fn from(err: InputError) -> Self {
        ServiceError::Input(err)
    }
}

#[derive(Clone, Debug)]
pub struct ServiceOptions {
    pub root: PathBuf,
    pub remote_base: String,
    pub git_timeout: Duration,
    pub agents: AgentRegistry,
}

impl ServiceOptions {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            root: roots::resolve_trybook_root()?,
            remote_base: roots::resolve_remote_base()?,
            git_timeout: roots::resolve_git_timeout()?,
            agents: AgentRegistry::from_env()?,
        })
    }

    /// Defaults for everything except the data directory; nothing is read
    /// from the environment.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            remote_base: paths::DEFAULT_REMOTE_BASE.to_owned(),
            git_timeout: roots::DEFAULT_GIT_TIMEOUT,
            agents: AgentRegistry::default(),
        }
    }
}

/// Notebook lifecycle: repository cache, worktrees, entries and agent runs.
pub struct TrybookService {
    root: PathBuf,
    remote_base: String,
    git: GitRunner,
    agents: AgentRegistry,
    sqlite: SqliteStore,
}

impl TrybookService {
    pub fn new() -> anyhow::Result<Arc<Self>> {
        Self::new_with_options(ServiceOptions::from_env()?)
    }

    pub fn new_with_options(options: ServiceOptions) -> anyhow::Result<Arc<Self>> {
        let root = options.root;
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create {}", root.display()))?;
        for dir in [paths::clones_root(&root), paths::worktrees_root(&root)] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let sqlite =
            SqliteStore::new(paths::sqlite_path(&root)).context("failed to init sqlite store")?;

        tracing::info!(
            root = %root.display(),
            remote_base = %options.remote_base,
            git_timeout_secs = options.git_timeout.as_secs(),
            "trybook service ready"
        );

        Ok(Arc::new(Self {
            root,
            remote_base: options.remote_base,
            git: GitRunner::new(options.git_timeout),
            agents: options.agents,
            sqlite,
        }))
    }

    pub fn ensure_cloned(&self, org: &str, repo: &str) -> Result<EnsureOutcome, ServiceError> {
        clone::ensure_cloned(&self.git, &self.root, &self.remote_base, org, repo)
            .map_err(ServiceError::Git)
    }

    /// Upserts the clone row from the checkout's current branch and head.
    pub fn record_clone(&self, org: &str, repo: &str) -> anyhow::Result<()> {
        let dir = paths::clone_dir(&self.root, org, repo);
        let (branch, commit) = self.git.current_branch_and_commit(&dir)?;
        self.sqlite
            .upsert_clone(org.to_owned(), repo.to_owned(), branch, commit)
    }

    pub fn clone_record(
        &self,
        org: &str,
        repo: &str,
    ) -> Result<Option<CloneRecord>, ServiceError> {
        self.sqlite
            .get_clone(org.to_owned(), repo.to_owned())
            .map_err(ServiceError::Store)
    }

    /// Clone if needed, allocate a fresh worktree and record a notebook for it.
    pub fn open_notebook(&self, input: &str) -> Result<NotebookSummary, ServiceError> {
        let (org, repo) = parse_repo_input(input)?;

        let outcome = self.ensure_cloned(&org, &repo)?;
        tracing::info!(org = %org, repo = %repo, outcome = ?outcome, "repository cache ready");

        if let Err(err) = self.record_clone(&org, &repo) {
            tracing::warn!(
                org = %org,
                repo = %repo,
                error = %format!("{err:#}"),
                "failed to record clone"
            );
        }

        let allocated =
            worktree::allocate(&self.git, &self.root, &org, &repo).map_err(ServiceError::Git)?;

        let id = self
            .sqlite
            .create_notebook(
                org.clone(),
                repo.clone(),
                allocated.branch.clone(),
                allocated.worktree_id.clone(),
                allocated.commit_sha.clone(),
            )
            .map_err(ServiceError::Store)?;
        tracing::info!(notebook = %id, worktree = %allocated.worktree_id, "notebook created");

        let created_at = self
            .sqlite
            .load_notebook_meta(id.clone())
            .map_err(ServiceError::Store)?
            .map(|meta| meta.created_at)
            .unwrap_or_default();

        Ok(NotebookSummary {
            id,
            org,
            repo,
            branch: allocated.branch,
            commit_short: short_commit(&allocated.commit_sha),
            created_at,
        })
    }

    pub fn list_notebooks(&self, limit: usize) -> Result<Vec<NotebookSummary>, ServiceError> {
        self.sqlite.list_notebooks(limit).map_err(ServiceError::Store)
    }

    pub fn load_notebook(
        &self,
        id: &str,
    ) -> Result<(NotebookMeta, Vec<NotebookEntry>), ServiceError> {
        let id = validate_notebook_id(id)?;
        self.sqlite
            .load_notebook(id.to_owned())
            .map_err(ServiceError::Store)?
            .ok_or(ServiceError::NotFound)
    }

    fn notebook_meta(&self, id: &str) -> Result<NotebookMeta, ServiceError> {
        let id = validate_notebook_id(id)?;
        self.sqlite
            .load_notebook_meta(id.to_owned())
            .map_err(ServiceError::Store)?
            .ok_or(ServiceError::NotFound)
    }

    /// Appends a prompt and returns its zero-based index.
    pub fn append_entry(&self, notebook_id: &str, prompt: &str) -> Result<u32, ServiceError> {
        let prompt = validate_prompt(prompt)?;
        let meta = self.notebook_meta(notebook_id)?;
        self.sqlite
            .append_entry(meta.id, prompt.to_owned())
            .map_err(ServiceError::Store)
    }

    /// Resolves the worktree and prompt for a run without starting anything.
    pub fn prepare_run(
        &self,
        notebook_id: &str,
        index: u32,
        model: AgentModel,
    ) -> Result<PreparedRun, ServiceError> {
        let meta = self.notebook_meta(notebook_id)?;
        let prompt = self
            .sqlite
            .load_entry_prompt(meta.id.clone(), index)
            .map_err(ServiceError::Store)?
            .ok_or(ServiceError::UnknownEntry)?;

        let cwd = paths::worktree_dir(&self.root, &meta.org, &meta.repo, &meta.worktree);
        let invocation = self.agents.invocation(model, &prompt, &cwd);
        Ok(PreparedRun {
            notebook_id: meta.id,
            index,
            model,
            invocation,
        })
    }

    /// Blocks until the agent finishes or `cancel` is raised.
    pub fn execute_run(
        &self,
        run: PreparedRun,
        cancel: Arc<AtomicBool>,
        sink: &mut dyn RunSink,
    ) -> RunOutcome {
        dispatch::execute(&self.sqlite, run, cancel, sink)
    }

    /// Short head commit of the notebook's worktree.
    pub fn head_short(&self, notebook_id: &str) -> Result<String, ServiceError> {
        let meta = self.notebook_meta(notebook_id)?;
        let dir = paths::worktree_dir(&self.root, &meta.org, &meta.repo, &meta.worktree);
        self.git.head_short(&dir).map_err(ServiceError::Git)
    }
}

#[cfg(test)]
mod test_support;
