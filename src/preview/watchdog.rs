use crate::preview::entry::EntryRegistry;
use anyhow::{Context, Result};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const WATCHDOG_THREAD_NAME: &str = "watchpoint-watchdog";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimReason {
    /// The render thread is gone but never removed its entry.
    ThreadExited,
    /// A close was requested longer ago than the deadline.
    CloseDeadlineExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reclaimed {
    pub entry_id: u64,
    pub reason: ReclaimReason,
}

/// One pass over the registry. Reclaiming only forgets the entry; the thread
/// is never joined here.
pub(crate) fn sweep(registry: &EntryRegistry, now: Instant, close_deadline: Duration) -> Option<Reclaimed> {
    let mut slot = registry.lock();
    let entry = slot.as_ref()?;
    let reason = if entry.thread_finished() {
        ReclaimReason::ThreadExited
    } else if entry.close_overdue(now, close_deadline) {
        ReclaimReason::CloseDeadlineExceeded
    } else {
        return None;
    };

    let entry = slot.take()?;
    drop(slot);
    entry.mark_stopped();
    tracing::warn!(entry = entry.id(), ?reason, "watchdog reclaimed preview entry");
    Some(Reclaimed {
        entry_id: entry.id(),
        reason,
    })
}

pub(crate) struct WatchdogHandle {
    stop_tx: Sender<()>,
    thread: JoinHandle<()>,
}

impl WatchdogHandle {
    pub(crate) fn is_alive(&self) -> bool {
        !self.thread.is_finished()
    }

    /// Signals the loop to stop and waits up to `wait` for it to exit.
    pub(crate) fn stop(self, wait: Duration) -> bool {
        let _ = self.stop_tx.send(());
        let deadline = Instant::now() + wait;
        while !self.thread.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!("watchdog did not stop in time; detaching");
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        if self.thread.join().is_err() {
            tracing::error!("watchdog thread panicked");
        }
        true
    }
}

pub(crate) fn spawn_watchdog(
    registry: Arc<EntryRegistry>,
    interval: Duration,
    close_deadline: Duration,
) -> Result<WatchdogHandle> {
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let thread = thread::Builder::new()
        .name(WATCHDOG_THREAD_NAME.to_string())
        .spawn(move || {
            tracing::debug!(?interval, "watchdog started");
            loop {
                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        let swept = panic::catch_unwind(AssertUnwindSafe(|| {
                            sweep(&registry, Instant::now(), close_deadline)
                        }));
                        if swept.is_err() {
                            tracing::error!("watchdog sweep panicked");
                        }
                    }
                }
            }
            tracing::debug!("watchdog stopped");
        })
        .context("spawn watchdog thread")?;
    Ok(WatchdogHandle { stop_tx, thread })
}
