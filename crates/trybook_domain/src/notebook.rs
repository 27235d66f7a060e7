use crate::intent::Intent;
use crate::models::AgentModel;
use std::path::PathBuf;

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct CloneRecord {
    pub org: String,
    pub repo: String,
    pub branch: String,
    pub commit_sha: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Ground truth read back from git after `worktree add`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AllocatedWorktree {
    pub worktree_id: String,
    pub branch: String,
    pub commit_sha: String,
    pub path: PathBuf,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct NotebookSummary {
    pub id: String,
    pub org: String,
    pub repo: String,
    pub branch: String,
    pub commit_short: String,
    pub created_at: String,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct NotebookMeta {
    pub id: String,
    pub org: String,
    pub repo: String,
    pub branch: String,
    pub worktree: String,
    pub commit_sha: String,
    pub created_at: String,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct NotebookEntry {
    pub index: u32,
    pub prompt: String,
    pub output: String,
    pub output_claude: String,
    pub intent: Intent,
    pub created_at: String,
    pub updated_at: String,
}

impl NotebookEntry {
    /// Agents a client should dispatch for this entry given its intent.
    pub fn next_agents(&self) -> &'static [AgentModel] {
        self.intent.agents()
    }
}

/// Entry of the ephemeral per-session notebook; never persisted.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize)]
pub struct SessionEntry {
    pub prompt: String,
    pub output: String,
}

pub fn short_commit(sha: &str) -> String {
    sha.chars().take(7).collect()
}
