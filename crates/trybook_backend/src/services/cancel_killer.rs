use std::process::Child;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Kills `child` once `cancel` is raised, unless the waiter has already
/// observed its exit. `finished` must be set while holding the child lock.
/// The handle yields whether a kill was issued.
pub(super) fn spawn_cancel_killer(
    child: Arc<std::sync::Mutex<Child>>,
    cancel: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
) -> JoinHandle<bool> {
    thread::spawn(move || {
        while !finished.load(Ordering::SeqCst) && !cancel.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(25));
        }
        if !cancel.load(Ordering::SeqCst) {
            return false;
        }
        let Ok(mut child) = child.lock() else {
            return false;
        };
        if finished.load(Ordering::SeqCst) {
            return false;
        }
        tracing::info!(pid = child.id(), "killing agent process after cancellation");
        let _ = child.kill();
        true
    })
}
