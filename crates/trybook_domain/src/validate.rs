#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InputError {
    EmptyInput,
    InvalidUrl,
    UnsupportedHost,
    UrlMissingRepo,
    WrongShape,
    InvalidOrgOrRepo,
    InvalidNotebookId,
    EmptyPrompt,
}

impl std::fmt::Display for InputError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputError::EmptyInput => write!(f, "empty input"),
            InputError::InvalidUrl => write!(f, "invalid URL"),
            InputError::UnsupportedHost => write!(f, "only github.com is supported"),
            InputError::UrlMissingRepo => {
                write!(f, "URL must be like https://github.com/org/repo")
            }
            InputError::WrongShape => {
                write!(f, "input must be org/repo or a full GitHub URL")
            }
            InputError::InvalidOrgOrRepo => write!(f, "invalid org or repo"),
            InputError::InvalidNotebookId => write!(f, "invalid notebook id"),
            InputError::EmptyPrompt => write!(f, "please enter a prompt"),
        }
    }
}

impl std::error::Error for InputError {}

/// Accepts `[A-Za-z0-9._-]+`. The bare `.` and `..` are rejected because
/// tokens are joined into filesystem paths.
pub fn is_safe_token(s: &str) -> bool {
    if s.is_empty() || s == "." || s == ".." {
        return false;
    }
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Parses `org/repo` or a `https://github.com/org/repo` URL into `(org, repo)`.
pub fn parse_repo_input(input: &str) -> Result<(String, String), InputError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(InputError::EmptyInput);
    }

    if let Some(rest) = strip_http_scheme(input) {
        return parse_github_url_rest(rest);
    }

    let parts = input.split('/').collect::<Vec<_>>();
    if parts.len() != 2 {
        return Err(InputError::WrongShape);
    }
    let org = parts[0].trim();
    let repo = parts[1].trim();
    if !is_safe_token(org) || !is_safe_token(repo) {
        return Err(InputError::InvalidOrgOrRepo);
    }
    Ok((org.to_owned(), repo.to_owned()))
}

fn strip_http_scheme(input: &str) -> Option<&str> {
    let lower = input.get(..8).map(str::to_ascii_lowercase);
    if lower.as_deref() == Some("https://") {
        return Some(&input[8..]);
    }
    let lower = input.get(..7).map(str::to_ascii_lowercase);
    if lower.as_deref() == Some("http://") {
        return Some(&input[7..]);
    }
    None
}

fn parse_github_url_rest(rest: &str) -> Result<(String, String), InputError> {
    let rest = rest
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let (authority, path) = match rest.split_once('/') {
        Some((authority, path)) => (authority, path),
        None => (rest, ""),
    };
    if authority.is_empty() || authority.contains(char::is_whitespace) {
        return Err(InputError::InvalidUrl);
    }

    let host = authority
        .rsplit('@')
        .next()
        .unwrap_or(authority)
        .split(':')
        .next()
        .unwrap_or_default();
    if !host.eq_ignore_ascii_case("github.com") {
        return Err(InputError::UnsupportedHost);
    }

    let parts = path.trim_matches('/').split('/').collect::<Vec<_>>();
    if parts.len() < 2 {
        return Err(InputError::UrlMissingRepo);
    }
    let org = parts[0];
    let repo = parts[1].strip_suffix(".git").unwrap_or(parts[1]);
    if !is_safe_token(org) || !is_safe_token(repo) {
        return Err(InputError::InvalidOrgOrRepo);
    }
    Ok((org.to_owned(), repo.to_owned()))
}

pub fn validate_notebook_id(raw: &str) -> Result<&str, InputError> {
    let id = raw.trim();
    if !is_safe_token(id) {
        return Err(InputError::InvalidNotebookId);
    }
    Ok(id)
}

pub fn validate_prompt(raw: &str) -> Result<&str, InputError> {
    let prompt = raw.trim();
    if prompt.is_empty() {
        return Err(InputError::EmptyPrompt);
    }
    Ok(prompt)
}
