use crate::server::{AppStateHolder, service_error_response, stopped};
use axum::Form;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, HeaderName, X_CONTENT_TYPE_OPTIONS};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot, watch};
use trybook_backend::{PreparedRun, RunSink, TrybookService};
use trybook_domain::parse_agent_model;

const STREAM_BUFFER: usize = 64;

#[derive(Debug, serde::Deserialize)]
pub(crate) struct RunForm {
    nb: String,
    idx: String,
    #[serde(default)]
    model: String,
}

/// Feeds the HTTP body from the blocking dispatcher thread.
struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl RunSink for ChannelSink {
    fn send(&mut self, chunk: &[u8]) -> bool {
        self.tx.blocking_send(Bytes::copy_from_slice(chunk)).is_ok()
    }
}

pub(crate) async fn run(
    State(state): State<AppStateHolder>,
    Form(form): Form<RunForm>,
) -> Response {
    let Ok(index) = form.idx.trim().parse::<u32>() else {
        return (StatusCode::BAD_REQUEST, "bad request").into_response();
    };
    let Some(model) = parse_agent_model(&form.model) else {
        return (StatusCode::BAD_REQUEST, "unknown model").into_response();
    };

    let service = state.service.clone();
    let nb = form.nb;
    let prepared =
        tokio::task::spawn_blocking(move || service.prepare_run(&nb, index, model)).await;
    let prepared = match prepared {
        Ok(Ok(prepared)) => prepared,
        Ok(Err(err)) => return service_error_response(err),
        Err(err) => {
            tracing::error!(error = %err, "prepare run task failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response();
        }
    };

    stream_run(state.service.clone(), prepared, state.stopping.clone())
}

/// Starts the dispatcher and returns a response whose body carries its
/// output. Dropping the body (client went away) or server shutdown cancels
/// the run.
fn stream_run(
    service: Arc<TrybookService>,
    prepared: PreparedRun,
    stopping: watch::Receiver<bool>,
) -> Response {
    let (tx, rx) = mpsc::channel::<Bytes>(STREAM_BUFFER);
    let (done_tx, done_rx) = oneshot::channel::<()>();
    let cancel = Arc::new(AtomicBool::new(false));

    let watcher_tx = tx.clone();
    let watcher_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = watcher_tx.closed() => {
                watcher_cancel.store(true, Ordering::SeqCst);
            }
            _ = stopped(stopping) => {
                tracing::info!("server stopping, cancelling run");
                watcher_cancel.store(true, Ordering::SeqCst);
            }
            _ = done_rx => {}
        }
    });

    let notebook = prepared.notebook_id.clone();
    let index = prepared.index;
    let model = prepared.model;
    tokio::task::spawn_blocking(move || {
        let mut sink = ChannelSink { tx };
        let outcome = service.execute_run(prepared, cancel, &mut sink);
        tracing::info!(
            notebook = %notebook,
            index,
            model = model.as_str(),
            outcome = ?outcome,
            "run finished"
        );
        let _ = done_tx.send(());
    });

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok::<_, Infallible>(chunk), rx))
    });

    let mut resp = Response::new(Body::from_stream(stream));
    let headers = resp.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    resp
}
