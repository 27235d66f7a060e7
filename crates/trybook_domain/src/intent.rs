use crate::models::AgentModel;

pub const ROUTER_MODEL_ID: &str = "gpt-5-nano";

const ROUTER_INSTRUCTION: &str = "Is the following prompt asking an informational question or requesting edits to the code? Please respond 'question' or 'edit' and nothing else: ";

pub fn router_prompt(prompt: &str) -> String {
    format!("{ROUTER_INSTRUCTION}{prompt}")
}

/// Router classification of an entry. `Unset` is stored as the empty string.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum Intent {
    #[default]
    Unset,
    Edit,
    Question,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Unset => "",
            Intent::Edit => "edit",
            Intent::Question => "question",
        }
    }

    /// Exact match after trim + lowercase; anything else is `Unset`.
    pub fn normalize(raw: &str) -> Intent {
        match raw.trim().to_ascii_lowercase().as_str() {
            "edit" => Intent::Edit,
            "question" => Intent::Question,
            _ => Intent::Unset,
        }
    }

    /// Agents to dispatch after classification. Anything that is not an
    /// edit fans out to both explanation agents.
    pub fn agents(self) -> &'static [AgentModel] {
        match self {
            Intent::Edit => &[AgentModel::Aider],
            Intent::Question | Intent::Unset => &[AgentModel::Claude, AgentModel::Gemini],
        }
    }
}

impl serde::Serialize for Intent {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Prefix match on the router's complete output, case-insensitive.
pub fn classify_router_output(output: &str) -> Intent {
    let s = output.trim().to_ascii_lowercase();
    if s.starts_with("edit") {
        return Intent::Edit;
    }
    if s.starts_with("question") {
        return Intent::Question;
    }
    Intent::Unset
}
