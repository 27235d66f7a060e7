mod intent;
pub use intent::{Intent, ROUTER_MODEL_ID, classify_router_output, router_prompt};

mod models;
pub use models::{AgentModel, AgentProfile, OutputSlot, PromptDelivery, parse_agent_model};

mod notebook;
pub use notebook::{
    AllocatedWorktree, CloneRecord, NotebookEntry, NotebookMeta, NotebookSummary, SessionEntry,
    short_commit,
};

pub mod paths;

mod validate;
pub use validate::{
    InputError, is_safe_token, parse_repo_input, validate_notebook_id, validate_prompt,
};

pub const NOTEBOOK_LIST_LIMIT: usize = 100;
