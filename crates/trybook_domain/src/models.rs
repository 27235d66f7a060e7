use crate::intent::router_prompt;

/// External agents a run can be dispatched to. `Router` is the lightweight
/// classifier that decides between the other three.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentModel {
    Gemini,
    Claude,
    Aider,
    Router,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PromptDelivery {
    Argument,
    Stdin,
}

/// Output columns of a notebook entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputSlot {
    Primary,
    Claude,
}

impl OutputSlot {
    pub fn column(self) -> &'static str {
        match self {
            OutputSlot::Primary => "output",
            OutputSlot::Claude => "output_claude",
        }
    }
}

/// Static invocation record for one model.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AgentProfile {
    pub executable: &'static str,
    pub bin_env: &'static str,
    pub base_args: &'static [&'static str],
    pub delivery: PromptDelivery,
    pub credential_env: &'static str,
}

const GEMINI_PROFILE: AgentProfile = AgentProfile {
    executable: "gemini",
    bin_env: "TRYBOOK_GEMINI_BIN",
    base_args: &["--prompt"],
    delivery: PromptDelivery::Argument,
    credential_env: "GEMINI_API_KEY",
};

const CLAUDE_PROFILE: AgentProfile = AgentProfile {
    executable: "claude",
    bin_env: "TRYBOOK_CLAUDE_BIN",
    base_args: &["--print"],
    delivery: PromptDelivery::Stdin,
    credential_env: "ANTHROPIC_API_KEY",
};

const AIDER_PROFILE: AgentProfile = AgentProfile {
    executable: "aider",
    bin_env: "TRYBOOK_AIDER_BIN",
    base_args: &[
        "--model",
        "openai/gpt-5",
        "--architect",
        "--yes-always",
        "--auto-commit",
        "--auto-accept-architect",
        "--message",
    ],
    delivery: PromptDelivery::Argument,
    credential_env: "OPENAI_API_KEY",
};

const ROUTER_PROFILE: AgentProfile = AgentProfile {
    executable: "llm",
    bin_env: "TRYBOOK_ROUTER_BIN",
    base_args: &["--model", crate::intent::ROUTER_MODEL_ID],
    delivery: PromptDelivery::Argument,
    credential_env: "OPENAI_API_KEY",
};

impl AgentModel {
    pub const ALL: [AgentModel; 4] = [
        AgentModel::Gemini,
        AgentModel::Claude,
        AgentModel::Aider,
        AgentModel::Router,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentModel::Gemini => "gemini",
            AgentModel::Claude => "claude",
            AgentModel::Aider => "aider",
            AgentModel::Router => "router",
        }
    }

    pub fn profile(self) -> &'static AgentProfile {
        match self {
            AgentModel::Gemini => &GEMINI_PROFILE,
            AgentModel::Claude => &CLAUDE_PROFILE,
            AgentModel::Aider => &AIDER_PROFILE,
            AgentModel::Router => &ROUTER_PROFILE,
        }
    }

    /// `None` for the router: its only product is the entry's intent.
    pub fn output_slot(self) -> Option<OutputSlot> {
        match self {
            AgentModel::Gemini | AgentModel::Aider => Some(OutputSlot::Primary),
            AgentModel::Claude => Some(OutputSlot::Claude),
            AgentModel::Router => None,
        }
    }

    /// Text handed to the agent for a stored prompt.
    pub fn prompt_text(self, prompt: &str) -> String {
        match self {
            AgentModel::Router => router_prompt(prompt),
            _ => prompt.to_owned(),
        }
    }

    /// Full argument list; the prompt is appended only for argument delivery.
    pub fn args(self, prompt: &str) -> Vec<String> {
        let profile = self.profile();
        let mut args = profile
            .base_args
            .iter()
            .map(|s| (*s).to_owned())
            .collect::<Vec<_>>();
        if profile.delivery == PromptDelivery::Argument {
            args.push(self.prompt_text(prompt));
        }
        args
    }

    /// Bytes piped to stdin, for stdin delivery.
    pub fn stdin_payload(self, prompt: &str) -> Option<String> {
        match self.profile().delivery {
            PromptDelivery::Stdin => Some(self.prompt_text(prompt)),
            PromptDelivery::Argument => None,
        }
    }
}

/// An empty name selects `gemini`; unknown names are rejected.
pub fn parse_agent_model(value: &str) -> Option<AgentModel> {
    let value = value.trim();
    if value.is_empty() {
        return Some(AgentModel::Gemini);
    }
    AgentModel::ALL
        .into_iter()
        .find(|model| value.eq_ignore_ascii_case(model.as_str()))
}
