use crate::env::optional_trimmed_path_from_env;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use trybook_domain::AgentModel;

/// Resolved executables for every agent model.
#[derive(Clone, Debug)]
pub struct AgentRegistry {
    executables: HashMap<AgentModel, PathBuf>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        let executables = AgentModel::ALL
            .into_iter()
            .map(|model| (model, PathBuf::from(model.profile().executable)))
            .collect();
        Self { executables }
    }
}

impl AgentRegistry {
    /// Applies `TRYBOOK_<MODEL>_BIN` overrides on top of the default names,
    /// which are looked up on `PATH`.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut registry = Self::default();
        for model in AgentModel::ALL {
            if let Some(path) = optional_trimmed_path_from_env(model.profile().bin_env)? {
                registry.executables.insert(model, path);
            }
        }
        Ok(registry)
    }

    pub fn with_executable(mut self, model: AgentModel, path: impl Into<PathBuf>) -> Self {
        self.executables.insert(model, path.into());
        self
    }

    pub fn executable(&self, model: AgentModel) -> PathBuf {
        self.executables
            .get(&model)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(model.profile().executable))
    }

    pub(crate) fn invocation(
        &self,
        model: AgentModel,
        prompt: &str,
        cwd: &Path,
    ) -> AgentInvocation {
        let profile = model.profile();
        let has_credential = std::env::var_os(profile.credential_env)
            .is_some_and(|value| !value.to_string_lossy().trim().is_empty());
        if !has_credential {
            tracing::warn!(
                model = model.as_str(),
                env = profile.credential_env,
                "credential not set; starting agent anyway"
            );
        }

        AgentInvocation {
            model,
            program: self.executable(model),
            args: model.args(prompt),
            stdin: model.stdin_payload(prompt),
            cwd: cwd.to_path_buf(),
        }
    }
}

/// Fully resolved command line for one agent run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct AgentInvocation {
    pub model: AgentModel,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub cwd: PathBuf,
}
