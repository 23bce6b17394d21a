use crate::logging::{DiagnosticLog, DumpContext};
use crate::preview::display::{available_displays, monitor_selector_labels, DisplayEnumerator, SystemDisplays};
use crate::preview::entry::{EntryRegistry, WindowEntry};
use crate::preview::frame::PreviewFrame;
use crate::preview::render_loop::{run_render_thread, FailureHook, RenderContext, RenderTiming};
use crate::preview::state::PreviewLifecycle;
use crate::preview::toolkit::WindowToolkit;
use crate::preview::watchdog::{self, Reclaimed, WatchdogHandle, WATCHDOG_THREAD_NAME};
use crate::settings::SettingsStore;
use crate::shutdown::Cleanup;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// How long `dismiss` waits for the render thread before forcing cleanup.
    pub join_timeout: Duration,
    pub watchdog_interval: Duration,
    /// Closing entries older than this are reclaimed by the watchdog.
    pub close_deadline: Duration,
    pub poll_interval: Duration,
    pub teardown_attempts: u32,
    pub teardown_backoff: Duration,
    pub watchdog_shutdown_wait: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(3),
            watchdog_interval: Duration::from_secs(1),
            close_deadline: Duration::from_secs(5),
            poll_interval: Duration::from_millis(33),
            teardown_attempts: 3,
            teardown_backoff: Duration::from_millis(50),
            watchdog_shutdown_wait: Duration::from_secs(2),
        }
    }
}

/// Collaborators handed to [`WindowSupervisor::start`].
pub struct SupervisorParts {
    pub config: SupervisorConfig,
    pub settings: Arc<SettingsStore>,
    pub toolkit: Arc<dyn WindowToolkit>,
    pub displays: Arc<dyn DisplayEnumerator>,
    pub diagnostics: Option<Arc<DiagnosticLog>>,
}

impl SupervisorParts {
    pub fn new(settings: Arc<SettingsStore>, toolkit: Arc<dyn WindowToolkit>) -> Self {
        Self {
            config: SupervisorConfig::default(),
            settings,
            toolkit,
            displays: Arc::new(SystemDisplays),
            diagnostics: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// A new entry and render thread were started.
    Created,
    /// The live window's mailbox was updated.
    Updated,
    /// Nothing was shown: the supervisor is shut down or the thread could not
    /// be spawned.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStats {
    pub entries_created_total: u64,
    pub active_windows: usize,
    pub closing_windows: usize,
    pub minimized_windows: usize,
    pub threads_alive: usize,
    pub watchdog_running: bool,
    pub shutdown_requested: bool,
    pub lifecycle: PreviewLifecycle,
    pub toolkit: String,
    pub uptime_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowThreadInfo {
    pub entry_id: u64,
    pub thread_name: String,
    pub thread_id: Option<String>,
    /// `None` once the handle has been handed to a join.
    pub alive: Option<bool>,
    pub display_index: usize,
    pub running: bool,
    pub minimized: bool,
    pub closing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchdogInfo {
    pub name: String,
    pub alive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadCensus {
    pub window_threads: Vec<WindowThreadInfo>,
    pub watchdog: WatchdogInfo,
}

struct SupervisorInner {
    config: SupervisorConfig,
    settings: Arc<SettingsStore>,
    toolkit: Arc<dyn WindowToolkit>,
    displays: Arc<dyn DisplayEnumerator>,
    diagnostics: Option<Arc<DiagnosticLog>>,
    registry: Arc<EntryRegistry>,
    watchdog: Mutex<Option<WatchdogHandle>>,
    failure_hook: FailureHook,
    next_entry_id: AtomicU64,
    entries_created: AtomicU64,
    shutdown_requested: AtomicBool,
    started_at: Instant,
}

/// Owns the single preview window slot. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct WindowSupervisor {
    inner: Arc<SupervisorInner>,
}

impl WindowSupervisor {
    pub fn start(parts: SupervisorParts) -> Self {
        let registry = Arc::new(EntryRegistry::default());
        let watchdog = match watchdog::spawn_watchdog(
            registry.clone(),
            parts.config.watchdog_interval,
            parts.config.close_deadline,
        ) {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::error!(?err, "preview watchdog unavailable; stale windows will not be reclaimed");
                None
            }
        };

        let inner = Arc::new_cyclic(|weak: &Weak<SupervisorInner>| {
            let weak = weak.clone();
            let failure_hook: FailureHook = Arc::new(move |source: &str| {
                if let Some(inner) = weak.upgrade() {
                    inner.capture_dump(source);
                }
            });
            SupervisorInner {
                config: parts.config,
                settings: parts.settings,
                toolkit: parts.toolkit,
                displays: parts.displays,
                diagnostics: parts.diagnostics,
                registry,
                watchdog: Mutex::new(watchdog),
                failure_hook,
                next_entry_id: AtomicU64::new(0),
                entries_created: AtomicU64::new(0),
                shutdown_requested: AtomicBool::new(false),
                started_at: Instant::now(),
            }
        });
        tracing::info!(toolkit = inner.toolkit.name(), "preview supervisor started");
        Self { inner }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.inner.settings
    }

    /// Shows `frame` in the preview window, creating it if needed. Returns
    /// without waiting for the window to appear.
    pub fn present(&self, display_index: usize, frame: PreviewFrame, text: Option<&str>) -> PresentOutcome {
        if self.inner.shutdown_requested.load(Ordering::SeqCst) {
            tracing::debug!("present ignored after shutdown");
            return PresentOutcome::Unavailable;
        }
        let text = text.filter(|t| !t.is_empty()).map(str::to_string);

        let mut slot = self.inner.registry.lock();
        if let Some(entry) = slot.as_ref() {
            if entry.is_running() && !entry.thread_finished() {
                entry.stage_frame(frame, text);
                if entry.display_index() != display_index {
                    entry.set_display_index(display_index);
                    if let Some(controller) = entry.controller() {
                        controller.request_relocation(display_index);
                    }
                }
                return PresentOutcome::Updated;
            }
            tracing::warn!(entry = entry.id(), "preview entry is defunct; reclaiming before reopening");
            if let Some(stale) = slot.take() {
                stale.mark_stopped();
            }
        }

        match self.inner.spawn_entry(&mut slot, display_index, frame, text) {
            Ok(id) => {
                tracing::info!(entry = id, display_index, "preview window requested");
                PresentOutcome::Created
            }
            Err(err) => {
                tracing::error!(?err, "failed to start preview window");
                PresentOutcome::Unavailable
            }
        }
    }

    /// Asks the window to close and waits up to the join timeout. A thread
    /// that does not exit in time is abandoned and its entry forgotten. If
    /// another caller already holds the thread handle, that caller does the
    /// join and the removal.
    pub fn dismiss(&self) {
        let Some(entry) = self.inner.registry.current() else {
            tracing::debug!("dismiss with no preview window");
            return;
        };
        entry.request_close(Instant::now());

        let joined = match entry.take_thread() {
            Some(handle) if handle.thread().id() == thread::current().id() => {
                tracing::debug!("dismiss called from the render thread; not joining");
                entry.attach_thread(handle);
                false
            }
            Some(handle) => join_with_timeout(handle, self.inner.config.join_timeout, "dismiss"),
            None => {
                tracing::debug!(entry = entry.id(), "another dismiss is already joining the preview thread");
                return;
            }
        };

        if self.inner.registry.remove_if(entry.id()) && !joined {
            tracing::warn!(entry = entry.id(), "preview thread did not exit in time; entry force-removed");
        }
    }

    /// Forwards `text` to the live window. Returns whether it was delivered.
    pub fn broadcast_text(&self, text: &str) -> bool {
        let Some(entry) = self.inner.registry.current() else {
            return false;
        };
        if !entry.is_running() {
            return false;
        }
        match entry.controller() {
            Some(controller) => {
                controller.update_signal_text(text);
                true
            }
            None => {
                tracing::debug!("broadcast before window controller is ready; dropped");
                false
            }
        }
    }

    /// Un-minimizes the window. Returns whether a restore was requested.
    pub fn restore_window(&self) -> bool {
        let Some(entry) = self.inner.registry.current() else {
            return false;
        };
        if !entry.is_running() || !entry.is_minimized() {
            return false;
        }
        match entry.controller() {
            Some(controller) => {
                controller.request_restore();
                true
            }
            None => false,
        }
    }

    pub fn entry_count(&self) -> usize {
        usize::from(self.inner.registry.current().is_some())
    }

    pub fn current_entry(&self) -> Option<Arc<WindowEntry>> {
        self.inner.registry.current()
    }

    pub fn lifecycle(&self) -> PreviewLifecycle {
        self.inner
            .registry
            .current()
            .map(|entry| entry.lifecycle())
            .unwrap_or(PreviewLifecycle::Absent)
    }

    pub fn monitor_labels(&self) -> Vec<String> {
        monitor_selector_labels(&available_displays(self.inner.displays.as_ref()))
    }

    pub fn health_stats(&self) -> HealthStats {
        self.inner.health_stats()
    }

    pub fn thread_census(&self) -> ThreadCensus {
        self.inner.thread_census()
    }

    /// Writes a debug dump with current health and thread state. `None` when
    /// debug mode is off or no diagnostics log is attached.
    pub fn save_debug_dump(&self) -> Option<PathBuf> {
        self.inner.capture_dump("manual")
    }

    pub fn diagnostics(&self) -> Option<&Arc<DiagnosticLog>> {
        self.inner.diagnostics.as_ref()
    }

    /// Runs one watchdog pass immediately.
    pub fn sweep_now(&self, now: Instant) -> Option<Reclaimed> {
        watchdog::sweep(&self.inner.registry, now, self.inner.config.close_deadline)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Stops the watchdog and dismisses the window. Safe to call repeatedly.
    pub fn shutdown(&self) {
        if self.inner.shutdown_requested.swap(true, Ordering::SeqCst) {
            tracing::debug!("preview supervisor already shut down");
            return;
        }
        tracing::info!("preview supervisor shutting down");
        let watchdog = self.inner.lock_watchdog().take();
        self.dismiss();
        if let Some(watchdog) = watchdog {
            watchdog.stop(self.inner.config.watchdog_shutdown_wait);
        }
    }
}

impl Cleanup for WindowSupervisor {
    fn cleanup_name(&self) -> &str {
        "preview supervisor"
    }

    fn cleanup(&self) -> Result<()> {
        self.shutdown();
        Ok(())
    }
}

impl SupervisorInner {
    fn spawn_entry(
        &self,
        slot: &mut Option<Arc<WindowEntry>>,
        display_index: usize,
        frame: PreviewFrame,
        text: Option<String>,
    ) -> Result<u64> {
        let id = self.next_entry_id.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = Arc::new(WindowEntry::new(id, display_index, frame, text));
        let ctx = RenderContext {
            entry: entry.clone(),
            registry: self.registry.clone(),
            toolkit: self.toolkit.clone(),
            displays: self.displays.clone(),
            settings: self.settings.clone(),
            timing: RenderTiming {
                poll_interval: self.config.poll_interval,
                teardown_attempts: self.config.teardown_attempts,
                teardown_backoff: self.config.teardown_backoff,
            },
            on_failure: Some(self.failure_hook.clone()),
        };

        *slot = Some(entry.clone());
        let spawned = thread::Builder::new()
            .name(entry.thread_name().to_string())
            .spawn(move || run_render_thread(ctx));
        match spawned {
            Ok(handle) => {
                entry.attach_thread(handle);
                self.entries_created.fetch_add(1, Ordering::SeqCst);
                Ok(id)
            }
            Err(err) => {
                slot.take();
                Err(err).context("spawn preview render thread")
            }
        }
    }

    fn lock_watchdog(&self) -> MutexGuard<'_, Option<WatchdogHandle>> {
        self.watchdog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn health_stats(&self) -> HealthStats {
        let entry = self.registry.current();
        let live = entry.as_ref().filter(|e| e.is_running());
        HealthStats {
            entries_created_total: self.entries_created.load(Ordering::SeqCst),
            active_windows: usize::from(live.is_some()),
            closing_windows: usize::from(entry.as_ref().is_some_and(|e| e.is_closing())),
            minimized_windows: usize::from(live.is_some_and(|e| e.is_minimized())),
            threads_alive: usize::from(entry.as_ref().is_some_and(|e| e.thread_alive() == Some(true))),
            watchdog_running: self.lock_watchdog().as_ref().is_some_and(|w| w.is_alive()),
            shutdown_requested: self.shutdown_requested.load(Ordering::SeqCst),
            lifecycle: entry
                .as_ref()
                .map(|e| e.lifecycle())
                .unwrap_or(PreviewLifecycle::Absent),
            toolkit: self.toolkit.name().to_string(),
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }

    fn thread_census(&self) -> ThreadCensus {
        let window_threads = self
            .registry
            .current()
            .map(|entry| WindowThreadInfo {
                entry_id: entry.id(),
                thread_name: entry.thread_name().to_string(),
                thread_id: entry.owner_thread().map(|id| format!("{id:?}")),
                alive: entry.thread_alive(),
                display_index: entry.display_index(),
                running: entry.is_running(),
                minimized: entry.is_minimized(),
                closing: entry.is_closing(),
            })
            .into_iter()
            .collect();
        ThreadCensus {
            window_threads,
            watchdog: WatchdogInfo {
                name: WATCHDOG_THREAD_NAME.to_string(),
                alive: self.lock_watchdog().as_ref().is_some_and(|w| w.is_alive()),
            },
        }
    }

    fn capture_dump(&self, source: &str) -> Option<PathBuf> {
        let diagnostics = self.diagnostics.as_ref()?;
        if !diagnostics.debug_mode() {
            return None;
        }
        tracing::debug!(source, "capturing preview debug dump");
        diagnostics.save_debug_dump(DumpContext {
            health: serde_json::to_value(self.health_stats()).ok(),
            threads: serde_json::to_value(self.thread_census()).ok(),
        })
    }
}

fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, source: &str) -> bool {
    let (done_tx, done_rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("watchpoint-join".to_string())
        .spawn(move || {
            let join_result = handle.join();
            let _ = done_tx.send(join_result);
        });
    if let Err(err) = spawned {
        tracing::error!(?err, "could not wait for preview thread during {source}");
        return false;
    }

    match done_rx.recv_timeout(timeout) {
        Ok(Ok(())) => true,
        Ok(Err(_)) => {
            tracing::error!("preview thread panicked while joining during {source}");
            true
        }
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!("preview thread join timed out during {source}");
            false
        }
        Err(RecvTimeoutError::Disconnected) => {
            tracing::error!("preview thread join channel disconnected during {source}");
            false
        }
    }
}
