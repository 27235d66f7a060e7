use crate::session::{cookie_value, random_token};
use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::{Router, routing::get};
use std::sync::{Arc, Mutex};

const AUTH_COOKIE_NAME: &str = "trybook_session";

enum Gate {
    /// No session issued yet; `None` means no bootstrap token was configured.
    Waiting { bootstrap: Option<String> },
    /// The bootstrap token was traded for `session`. Presenting it again
    /// hands back the same cookie.
    Open { bootstrap: String, session: String },
}

/// Single-user gate. Disabled mode lets everything through.
#[derive(Clone)]
pub(crate) struct AuthState {
    gate: Option<Arc<Mutex<Gate>>>,
}

impl AuthState {
    pub(crate) fn new(config: crate::AuthConfig) -> Self {
        let gate = match config.mode {
            crate::AuthMode::Disabled => None,
            crate::AuthMode::SingleUser => Some(Arc::new(Mutex::new(Gate::Waiting {
                bootstrap: config.bootstrap_token,
            }))),
        };
        Self { gate }
    }

    fn is_authorized(&self, headers: &HeaderMap) -> bool {
        let Some(gate) = &self.gate else {
            return true;
        };
        let presented = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .find_map(|h| cookie_value(h, AUTH_COOKIE_NAME));
        let Some(presented) = presented else {
            return false;
        };
        let Ok(gate) = gate.lock() else {
            return false;
        };
        matches!(&*gate, Gate::Open { session, .. } if session == presented)
    }

    /// Returns the session cookie value for a valid bootstrap token.
    fn exchange(&self, token: &str) -> Option<String> {
        let gate = self.gate.as_ref()?;
        let mut gate = gate.lock().ok()?;
        match &*gate {
            Gate::Open { bootstrap, session } => (bootstrap == token).then(|| session.clone()),
            Gate::Waiting { bootstrap } => {
                if bootstrap.as_deref() != Some(token) {
                    return None;
                }
                let session = random_token();
                *gate = Gate::Open {
                    bootstrap: token.to_owned(),
                    session: session.clone(),
                };
                Some(session)
            }
        }
    }
}

pub(crate) async fn require_session(
    State(state): State<crate::server::AppStateHolder>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    if state.auth.is_authorized(req.headers()) {
        return next.run(req).await;
    }
    tracing::debug!(path = %req.uri().path(), "rejected unauthenticated request");
    (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
}

#[derive(serde::Deserialize)]
struct BootstrapQuery {
    token: String,
}

async fn bootstrap(
    State(state): State<crate::server::AppStateHolder>,
    Query(query): Query<BootstrapQuery>,
) -> Response {
    if state.auth.gate.is_none() {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    }
    let Some(session) = state.auth.exchange(query.token.trim()) else {
        tracing::warn!("auth bootstrap rejected");
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    };

    let cookie = format!("{AUTH_COOKIE_NAME}={session}; Path=/; HttpOnly; SameSite=Lax");
    let mut resp = (StatusCode::OK, [(CACHE_CONTROL, "no-store")], "ok").into_response();
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        resp.headers_mut().append(SET_COOKIE, value);
    }
    resp
}

pub(crate) fn router() -> Router<crate::server::AppStateHolder> {
    Router::new().route("/auth", get(bootstrap))
}
