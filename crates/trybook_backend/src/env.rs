use anyhow::{Context as _, anyhow};
use std::path::PathBuf;
use std::time::Duration;

pub(crate) fn home_dir() -> anyhow::Result<PathBuf> {
    for name in ["HOME", "USERPROFILE"] {
        if let Some(path) = std::env::var_os(name)
            && !path.is_empty()
        {
            return Ok(PathBuf::from(path));
        }
    }
    Err(anyhow!("cannot resolve home directory: HOME is not set"))
}

pub(crate) fn optional_trimmed_path_from_env(name: &str) -> anyhow::Result<Option<PathBuf>> {
    Ok(optional_trimmed_string_from_env(name)?.map(PathBuf::from))
}

pub(crate) fn optional_trimmed_string_from_env(name: &str) -> anyhow::Result<Option<String>> {
    let value = match std::env::var_os(name) {
        Some(value) => value,
        None => return Ok(None),
    };

    let value = value.to_string_lossy();
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("{name} is set but empty"));
    }

    Ok(Some(trimmed.to_owned()))
}

pub(crate) fn optional_secs_from_env(name: &str) -> anyhow::Result<Option<Duration>> {
    let Some(raw) = optional_trimmed_string_from_env(name)? else {
        return Ok(None);
    };
    let secs = raw
        .parse::<u64>()
        .with_context(|| format!("{name} must be a whole number of seconds, got {raw:?}"))?;
    if secs == 0 {
        return Err(anyhow!("{name} must be greater than zero"));
    }
    Ok(Some(Duration::from_secs(secs)))
}
