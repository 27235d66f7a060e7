use axum::http::HeaderMap;
use axum::http::header::COOKIE;
use rand::{Rng as _, rngs::OsRng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use trybook_domain::SessionEntry;

pub(crate) const SESSION_COOKIE_NAME: &str = "tb";
const SESSION_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;

type RepoNotes = HashMap<String, Vec<SessionEntry>>;

/// Scratch notebooks keyed by browser session and `org/repo`. Lives only as
/// long as the server process.
#[derive(Clone, Default)]
pub(crate) struct SessionNotebooks {
    inner: Arc<Mutex<HashMap<String, RepoNotes>>>,
}

fn repo_key(org: &str, repo: &str) -> String {
    format!("{org}/{repo}")
}

impl SessionNotebooks {
    pub(crate) fn entries(&self, session: &str, org: &str, repo: &str) -> Vec<SessionEntry> {
        let Ok(notes) = self.inner.lock() else {
            return Vec::new();
        };
        notes
            .get(session)
            .and_then(|repos| repos.get(&repo_key(org, repo)))
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn append(&self, session: &str, org: &str, repo: &str, prompt: &str) -> usize {
        let mut notes = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entries = notes
            .entry(session.to_owned())
            .or_default()
            .entry(repo_key(org, repo))
            .or_default();
        entries.push(SessionEntry {
            prompt: prompt.to_owned(),
            ..SessionEntry::default()
        });
        entries.len() - 1
    }

    /// Returns `false` when there is no such entry; nothing is created.
    pub(crate) fn set_output(
        &self,
        session: &str,
        org: &str,
        repo: &str,
        index: usize,
        output: &str,
    ) -> bool {
        let mut notes = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(entry) = notes
            .get_mut(session)
            .and_then(|repos| repos.get_mut(&repo_key(org, repo)))
            .and_then(|entries| entries.get_mut(index))
        else {
            return false;
        };
        entry.output = output.to_owned();
        true
    }
}

pub(crate) fn cookie_value<'a>(cookie_header: &'a str, name: &str) -> Option<&'a str> {
    for part in cookie_header.split(';') {
        let trimmed = part.trim();
        let Some((k, v)) = trimmed.split_once('=') else {
            continue;
        };
        if k.trim() == name {
            return Some(v.trim());
        }
    }
    None
}

/// 32 lowercase hex chars from the OS RNG.
pub(crate) fn random_token() -> String {
    let bytes: [u8; 16] = OsRng.r#gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Session id from the `tb` cookie. The second value is a `Set-Cookie`
/// header to send when a new id had to be minted.
pub(crate) fn session_id(headers: &HeaderMap) -> (String, Option<String>) {
    let existing = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|header| cookie_value(header, SESSION_COOKIE_NAME))
        .filter(|value| !value.is_empty());
    if let Some(id) = existing {
        return (id.to_owned(), None);
    }

    let id = random_token();
    let cookie = format!(
        "{SESSION_COOKIE_NAME}={id}; Path=/; Max-Age={SESSION_MAX_AGE_SECS}; HttpOnly; SameSite=Lax"
    );
    (id, Some(cookie))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn entries_are_scoped_by_session_and_repo() {
        let notes = SessionNotebooks::default();
        assert_eq!(notes.append("s1", "acme", "widgets", "first"), 0);
        assert_eq!(notes.append("s1", "acme", "widgets", "second"), 1);
        assert_eq!(notes.append("s1", "acme", "gadgets", "other"), 0);
        assert_eq!(notes.append("s2", "acme", "widgets", "mine"), 0);

        let s1 = notes.entries("s1", "acme", "widgets");
        assert_eq!(
            s1.iter().map(|e| e.prompt.as_str()).collect::<Vec<_>>(),
            vec!["first", "second"]
        );
        assert_eq!(notes.entries("s2", "acme", "widgets").len(), 1);
        assert!(notes.entries("s3", "acme", "widgets").is_empty());
    }

    #[test]
    fn set_output_ignores_out_of_range() {
        let notes = SessionNotebooks::default();
        notes.append("s1", "acme", "widgets", "explain");

        assert!(notes.set_output("s1", "acme", "widgets", 0, "because"));
        assert!(!notes.set_output("s1", "acme", "widgets", 5, "nope"));
        assert!(!notes.set_output("nobody", "acme", "widgets", 0, "nope"));

        let entries = notes.entries("s1", "acme", "widgets");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].output, "because");
        assert!(notes.entries("nobody", "acme", "widgets").is_empty());
    }

    #[test]
    fn returned_entries_are_copies() {
        let notes = SessionNotebooks::default();
        notes.append("s1", "acme", "widgets", "explain");
        let mut copy = notes.entries("s1", "acme", "widgets");
        copy[0].output = "changed".to_owned();
        assert_eq!(notes.entries("s1", "acme", "widgets")[0].output, "");
    }

    #[test]
    fn session_id_reuses_cookie_or_mints_one() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("other=1; tb=abc123"));
        assert_eq!(session_id(&headers), ("abc123".to_owned(), None));

        let (id, cookie) = session_id(&HeaderMap::new());
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        let cookie = cookie.expect("set-cookie");
        assert!(cookie.starts_with(&format!("tb={id};")));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Max-Age=604800"));
    }
}
