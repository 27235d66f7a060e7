use crate::auth::AuthState;
use crate::session::{SessionNotebooks, session_id};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header::SET_COOKIE},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use trybook_backend::{ServiceError, TrybookService};
use trybook_domain::{
    AgentModel, NOTEBOOK_LIST_LIMIT, NotebookEntry, NotebookMeta, SessionEntry, is_safe_token,
    validate_prompt,
};

#[derive(Clone)]
pub(crate) struct AppStateHolder {
    pub(crate) service: Arc<TrybookService>,
    pub(crate) sessions: SessionNotebooks,
    pub(crate) auth: AuthState,
    /// Flips to `true` when the server starts shutting down.
    pub(crate) stopping: watch::Receiver<bool>,
}

pub async fn router(
    config: crate::ServerConfig,
    stopping: watch::Receiver<bool>,
) -> anyhow::Result<Router> {
    let service = tokio::task::spawn_blocking(move || {
        TrybookService::new_with_options(config.service)
    })
    .await??;

    let state = AppStateHolder {
        service,
        sessions: SessionNotebooks::default(),
        auth: AuthState::new(config.auth),
        stopping,
    };

    let api = Router::new()
        .route("/notebooks", get(list_notebooks).post(create_notebook))
        .route("/notebooks/{id}", get(get_notebook))
        .route("/notebooks/{id}/entries", post(append_entry))
        .route("/run", post(crate::run::run))
        .route("/head", get(get_head))
        .route("/r/{org}/{repo}", get(get_session_notebook))
        .route("/r/{org}/{repo}/entries", post(append_session_entry))
        .route("/r/{org}/{repo}/entries/{idx}", put(set_session_output))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_session,
        ));

    Ok(Router::new()
        .route("/healthz", get(health))
        .nest("/api", api)
        .merge(crate::auth::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// Resolves once shutdown has started, or the server is gone.
pub(crate) async fn stopped(mut stopping: watch::Receiver<bool>) {
    let _ = stopping.wait_for(|stop| *stop).await;
}

async fn health() -> &'static str {
    "ok"
}

/// Maps service failures to status codes. Store details stay in the log.
pub(crate) fn service_error_response(err: ServiceError) -> Response {
    match err {
        ServiceError::Input(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
        ServiceError::NotFound => (StatusCode::NOT_FOUND, "notebook not found").into_response(),
        ServiceError::UnknownEntry => (StatusCode::BAD_REQUEST, "bad request").into_response(),
        ServiceError::Git(err) => {
            tracing::warn!(error = %format!("{err:#}"), "git operation failed");
            (StatusCode::BAD_GATEWAY, format!("{err:#}")).into_response()
        }
        ServiceError::Store(err) => {
            tracing::error!(error = %format!("{err:#}"), "store operation failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(service_error_response(err)),
        Err(err) => {
            tracing::error!(error = %err, "blocking task failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response())
        }
    }
}

async fn list_notebooks(State(state): State<AppStateHolder>) -> Response {
    let service = state.service.clone();
    match blocking(move || service.list_notebooks(NOTEBOOK_LIST_LIMIT)).await {
        Ok(notebooks) => Json(notebooks).into_response(),
        Err(resp) => resp,
    }
}

#[derive(serde::Deserialize)]
struct CreateNotebookRequest {
    input: String,
}

async fn create_notebook(
    State(state): State<AppStateHolder>,
    Json(req): Json<CreateNotebookRequest>,
) -> Response {
    tracing::info!(input = %req.input.trim(), "creating notebook");
    let service = state.service.clone();
    match blocking(move || service.open_notebook(&req.input)).await {
        Ok(summary) => (StatusCode::CREATED, Json(summary)).into_response(),
        Err(resp) => resp,
    }
}

#[derive(serde::Serialize)]
struct EntryView {
    #[serde(flatten)]
    entry: NotebookEntry,
    next_agents: Vec<AgentModel>,
}

#[derive(serde::Serialize)]
struct NotebookView {
    notebook: NotebookMeta,
    entries: Vec<EntryView>,
}

async fn get_notebook(State(state): State<AppStateHolder>, Path(id): Path<String>) -> Response {
    let service = state.service.clone();
    match blocking(move || service.load_notebook(&id)).await {
        Ok((notebook, entries)) => {
            let entries = entries
                .into_iter()
                .map(|entry| EntryView {
                    next_agents: entry.next_agents().to_vec(),
                    entry,
                })
                .collect();
            Json(NotebookView { notebook, entries }).into_response()
        }
        Err(resp) => resp,
    }
}

#[derive(serde::Deserialize)]
struct PromptRequest {
    prompt: String,
}

#[derive(serde::Serialize)]
struct AppendedEntry {
    index: usize,
}

async fn append_entry(
    State(state): State<AppStateHolder>,
    Path(id): Path<String>,
    Json(req): Json<PromptRequest>,
) -> Response {
    let service = state.service.clone();
    match blocking(move || service.append_entry(&id, &req.prompt)).await {
        Ok(index) => Json(AppendedEntry {
            index: index as usize,
        })
        .into_response(),
        Err(resp) => resp,
    }
}

#[derive(serde::Deserialize)]
struct HeadQuery {
    nb: String,
}

async fn get_head(
    State(state): State<AppStateHolder>,
    Query(query): Query<HeadQuery>,
) -> Response {
    let service = state.service.clone();
    match blocking(move || service.head_short(&query.nb)).await {
        Ok(head) => head.into_response(),
        Err(resp) => resp,
    }
}

fn session_repo(org: &str, repo: &str) -> Result<(), Response> {
    if is_safe_token(org) && is_safe_token(repo) {
        return Ok(());
    }
    Err((StatusCode::BAD_REQUEST, "invalid org or repo").into_response())
}

fn with_session_cookie(mut resp: Response, cookie: Option<String>) -> Response {
    if let Some(cookie) = cookie
        && let Ok(value) = HeaderValue::from_str(&cookie)
    {
        resp.headers_mut().append(SET_COOKIE, value);
    }
    resp
}

#[derive(serde::Serialize)]
struct SessionNotebookView {
    org: String,
    repo: String,
    entries: Vec<SessionEntry>,
}

async fn get_session_notebook(
    State(state): State<AppStateHolder>,
    Path((org, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = session_repo(&org, &repo) {
        return resp;
    }
    let (session, cookie) = session_id(&headers);
    let entries = state.sessions.entries(&session, &org, &repo);
    with_session_cookie(
        Json(SessionNotebookView {
            org,
            repo,
            entries,
        })
        .into_response(),
        cookie,
    )
}

async fn append_session_entry(
    State(state): State<AppStateHolder>,
    Path((org, repo)): Path<(String, String)>,
    headers: HeaderMap,
    Json(req): Json<PromptRequest>,
) -> Response {
    if let Err(resp) = session_repo(&org, &repo) {
        return resp;
    }
    let prompt = match validate_prompt(&req.prompt) {
        Ok(prompt) => prompt,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    let (session, cookie) = session_id(&headers);
    let index = state.sessions.append(&session, &org, &repo, prompt);
    with_session_cookie(Json(AppendedEntry { index }).into_response(), cookie)
}

#[derive(serde::Deserialize)]
struct OutputRequest {
    output: String,
}

async fn set_session_output(
    State(state): State<AppStateHolder>,
    Path((org, repo, idx)): Path<(String, String, usize)>,
    headers: HeaderMap,
    Json(req): Json<OutputRequest>,
) -> Response {
    if let Err(resp) = session_repo(&org, &repo) {
        return resp;
    }
    let (session, cookie) = session_id(&headers);
    if !state
        .sessions
        .set_output(&session, &org, &repo, idx, &req.output)
    {
        tracing::debug!(org = %org, repo = %repo, idx, "session entry out of range");
    }
    with_session_cookie(StatusCode::NO_CONTENT.into_response(), cookie)
}
