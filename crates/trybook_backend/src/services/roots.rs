use crate::env::{
    home_dir, optional_secs_from_env, optional_trimmed_path_from_env,
    optional_trimmed_string_from_env,
};
use std::path::PathBuf;
use std::time::Duration;
use trybook_domain::paths;

pub(super) const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(120);

pub(super) fn resolve_trybook_root() -> anyhow::Result<PathBuf> {
    if let Some(root) = optional_trimmed_path_from_env(paths::TRYBOOK_ROOT_ENV)? {
        return Ok(root);
    }
    Ok(home_dir()?.join(paths::DEFAULT_ROOT_DIR_NAME))
}

pub(super) fn resolve_remote_base() -> anyhow::Result<String> {
    Ok(optional_trimmed_string_from_env(paths::TRYBOOK_REMOTE_BASE_ENV)?
        .unwrap_or_else(|| paths::DEFAULT_REMOTE_BASE.to_owned()))
}

pub(super) fn resolve_git_timeout() -> anyhow::Result<Duration> {
    Ok(optional_secs_from_env(paths::TRYBOOK_GIT_TIMEOUT_SECS_ENV)?
        .unwrap_or(DEFAULT_GIT_TIMEOUT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{EnvVarGuard, lock_env};

    #[test]
    fn root_prefers_env_then_home() {
        let _lock = lock_env();
        {
            let _root = EnvVarGuard::set(paths::TRYBOOK_ROOT_ENV, "/srv/trybook");
            assert_eq!(resolve_trybook_root().unwrap(), PathBuf::from("/srv/trybook"));
        }
        let _root = EnvVarGuard::remove(paths::TRYBOOK_ROOT_ENV);
        let _home = EnvVarGuard::set("HOME", "/home/tester");
        assert_eq!(
            resolve_trybook_root().unwrap(),
            PathBuf::from("/home/tester").join(".trybook")
        );
    }

    #[test]
    fn remote_base_and_timeout_have_defaults() {
        let _lock = lock_env();
        let _base = EnvVarGuard::remove(paths::TRYBOOK_REMOTE_BASE_ENV);
        let _timeout = EnvVarGuard::remove(paths::TRYBOOK_GIT_TIMEOUT_SECS_ENV);
        assert_eq!(resolve_remote_base().unwrap(), "https://github.com");
        assert_eq!(resolve_git_timeout().unwrap(), Duration::from_secs(120));
    }
}
