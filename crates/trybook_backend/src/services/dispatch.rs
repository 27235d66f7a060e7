use super::agent_process::{ProcessExit, run_agent};
use super::agents::AgentInvocation;
use crate::sqlite_store::SqliteStore;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use trybook_domain::{AgentModel, classify_router_output};

/// Transport side of a run. `send` returns `false` once nobody is listening.
pub trait RunSink: Send {
    fn send(&mut self, chunk: &[u8]) -> bool;
}

impl RunSink for Vec<u8> {
    fn send(&mut self, chunk: &[u8]) -> bool {
        self.extend_from_slice(chunk);
        true
    }
}

/// A run whose notebook, entry and command line have been resolved.
#[derive(Clone, Debug)]
pub struct PreparedRun {
    pub notebook_id: String,
    pub index: u32,
    pub model: AgentModel,
    pub(crate) invocation: AgentInvocation,
}

/// Terminal state of one dispatch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RunOutcome {
    Completed,
    Failed { status: String },
    Cancelled,
    StartFailed { error: String },
}

/// Copies every chunk into the accumulation buffer and forwards it to the
/// sink in the same call. A sink that has gone away raises `cancel`.
struct TeeWriter<'a, S: RunSink + ?Sized> {
    buffer: Vec<u8>,
    sink: &'a mut S,
    cancel: &'a AtomicBool,
}

impl<'a, S: RunSink + ?Sized> TeeWriter<'a, S> {
    fn new(sink: &'a mut S, cancel: &'a AtomicBool) -> Self {
        Self {
            buffer: Vec::new(),
            sink,
            cancel,
        }
    }

    fn into_text(self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }
}

impl<S: RunSink + ?Sized> Write for TeeWriter<'_, S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        if !self.sink.send(buf) {
            self.cancel.store(true, Ordering::SeqCst);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub(crate) fn start_marker(model: AgentModel) -> String {
    format!("Starting {}...\n\n", model.as_str())
}

pub(crate) const DONE_MARKER: &str = "\n[done]\n";

pub(crate) fn failure_marker(model: AgentModel, status: &str) -> String {
    format!("\n[{} exited with error: {status}]\n", model.as_str())
}

pub(crate) fn start_failure_marker(model: AgentModel, error: &str) -> String {
    format!("error: failed to start {}: {error}\n", model.as_str())
}

/// Runs a prepared dispatch to its terminal state, streaming into `sink`
/// and persisting the captured output.
pub(crate) fn execute(
    store: &SqliteStore,
    run: PreparedRun,
    cancel: Arc<AtomicBool>,
    sink: &mut dyn RunSink,
) -> RunOutcome {
    let model = run.model;
    if !sink.send(start_marker(model).as_bytes()) {
        cancel.store(true, Ordering::SeqCst);
    }
    if cancel.load(Ordering::SeqCst) {
        tracing::info!(notebook = %run.notebook_id, index = run.index, "run cancelled before start");
        return RunOutcome::Cancelled;
    }

    let mut tee = TeeWriter::new(&mut *sink, &cancel);
    let exit = run_agent(&run.invocation, cancel.clone(), |chunk| {
        let _ = tee.write_all(chunk);
    });
    let output = tee.into_text();

    match exit {
        Err(err) => {
            let error = format!("{err:#}");
            tracing::warn!(model = model.as_str(), error = %error, "agent failed to start");
            sink.send(start_failure_marker(model, &error).as_bytes());
            RunOutcome::StartFailed { error }
        }
        Ok(ProcessExit::Cancelled) => RunOutcome::Cancelled,
        Ok(ProcessExit::Exited {
            success: true, ..
        }) => {
            persist_success(store, &run, output);
            sink.send(DONE_MARKER.as_bytes());
            RunOutcome::Completed
        }
        Ok(ProcessExit::Exited {
            success: false,
            status,
        }) => {
            tracing::warn!(model = model.as_str(), status = %status, "agent exited with error");
            persist_output(store, &run, output);
            sink.send(failure_marker(model, &status).as_bytes());
            RunOutcome::Failed { status }
        }
    }
}

fn persist_success(store: &SqliteStore, run: &PreparedRun, output: String) {
    if run.model != AgentModel::Router {
        persist_output(store, run, output);
        return;
    }
    let intent = classify_router_output(&output);
    tracing::info!(
        notebook = %run.notebook_id,
        index = run.index,
        intent = intent.as_str(),
        "router classified entry"
    );
    if let Err(err) = store.set_entry_intent(run.notebook_id.clone(), run.index, intent) {
        tracing::error!(error = %format!("{err:#}"), "failed to store entry intent");
    }
}

fn persist_output(store: &SqliteStore, run: &PreparedRun, output: String) {
    let Some(slot) = run.model.output_slot() else {
        return;
    };
    if let Err(err) = store.set_entry_output(run.notebook_id.clone(), run.index, slot, output) {
        tracing::error!(
            notebook = %run.notebook_id,
            index = run.index,
            error = %format!("{err:#}"),
            "failed to store entry output"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ClosedSink;

    impl RunSink for ClosedSink {
        fn send(&mut self, _chunk: &[u8]) -> bool {
            false
        }
    }

    #[test]
    fn tee_writer_buffers_and_forwards() {
        let cancel = AtomicBool::new(false);
        let mut sink = Vec::new();
        let mut tee = TeeWriter::new(&mut sink, &cancel);
        tee.write_all(b"hello ").unwrap();
        tee.write_all(b"world").unwrap();
        assert_eq!(tee.into_text(), "hello world");
        assert_eq!(sink, b"hello world");
        assert!(!cancel.load(Ordering::SeqCst));
    }

    #[test]
    fn tee_writer_raises_cancel_when_sink_closes() {
        let cancel = AtomicBool::new(false);
        let mut sink = ClosedSink;
        let mut tee = TeeWriter::new(&mut sink, &cancel);
        tee.write_all(b"lost").unwrap();
        assert_eq!(tee.into_text(), "lost");
        assert!(cancel.load(Ordering::SeqCst));
    }

    #[test]
    fn markers_match_stream_protocol() {
        assert_eq!(start_marker(AgentModel::Gemini), "Starting gemini...\n\n");
        assert_eq!(
            failure_marker(AgentModel::Aider, "exit status 2"),
            "\n[aider exited with error: exit status 2]\n"
        );
        assert_eq!(
            start_failure_marker(AgentModel::Claude, "boom"),
            "error: failed to start claude: boom\n"
        );
        assert_eq!(DONE_MARKER, "\n[done]\n");
    }
}
