use super::agents::AgentInvocation;
use super::cancel_killer::spawn_cancel_killer;
use super::thread_io::spawn_forward_chunks;
use anyhow::{Context as _, anyhow};
use std::io::Write as _;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum ProcessExit {
    Exited { success: bool, status: String },
    Cancelled,
}

/// Renders an exit status the way users see it in the stream,
/// e.g. `exit status 1` or `signal: 9`.
pub(crate) fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit status {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt as _;
        if let Some(signal) = status.signal() {
            return format!("signal: {signal}");
        }
    }
    status.to_string()
}

/// Runs one agent to completion, handing every stdout/stderr chunk to
/// `on_chunk` in arrival order. Returns `Err` only when the process could
/// not be started.
pub(crate) fn run_agent(
    invocation: &AgentInvocation,
    cancel: Arc<AtomicBool>,
    mut on_chunk: impl FnMut(&[u8]),
) -> anyhow::Result<ProcessExit> {
    let model = invocation.model.as_str();
    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .current_dir(&invocation.cwd)
        .stdin(if invocation.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let started = Instant::now();
    tracing::info!(
        model,
        program = %invocation.program.display(),
        cwd = %invocation.cwd.display(),
        "agent start"
    );
    let mut child = command.spawn().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            anyhow!(
                "missing {model} executable ({}): install it or set {}",
                invocation.program.display(),
                invocation.model.profile().bin_env
            )
        } else {
            anyhow!(err).context(format!("failed to spawn {model}"))
        }
    })?;

    let stdin_writer = match (child.stdin.take(), invocation.stdin.clone()) {
        (Some(mut stdin), Some(payload)) => Some(std::thread::spawn(move || {
            let _ = stdin.write_all(payload.as_bytes());
        })),
        _ => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("failed to capture {model} stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("failed to capture {model} stderr"))?;

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    let stdout_reader = spawn_forward_chunks(stdout, tx.clone());
    let stderr_reader = spawn_forward_chunks(stderr, tx);

    let child = Arc::new(Mutex::new(child));
    let finished = Arc::new(AtomicBool::new(false));
    let killer = spawn_cancel_killer(child.clone(), cancel.clone(), finished.clone());

    loop {
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(chunk) => {
                if !cancel.load(Ordering::SeqCst) {
                    on_chunk(&chunk);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if cancel.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    let status = wait_for_exit(&child, &finished)?;
    let killed = killer.join().unwrap_or(false);
    // Readers may outlive a killed agent if a grandchild still holds the pipes.
    if !killed {
        let _ = stdout_reader.join();
        let _ = stderr_reader.join();
        if let Some(writer) = stdin_writer {
            let _ = writer.join();
        }
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    if killed {
        tracing::info!(model, elapsed_ms, "agent cancelled");
        return Ok(ProcessExit::Cancelled);
    }

    let described = describe_exit(&status);
    tracing::info!(model, status = %described, elapsed_ms, "agent end");
    Ok(ProcessExit::Exited {
        success: status.success(),
        status: described,
    })
}

fn wait_for_exit(
    child: &Mutex<std::process::Child>,
    finished: &AtomicBool,
) -> anyhow::Result<ExitStatus> {
    loop {
        {
            let mut child = child
                .lock()
                .map_err(|_| anyhow!("agent process lock poisoned"))?;
            if let Some(status) = child.try_wait().context("failed to wait for agent")? {
                finished.store(true, Ordering::SeqCst);
                return Ok(status);
            }
        }
        std::thread::sleep(Duration::from_millis(25));
    }
}
