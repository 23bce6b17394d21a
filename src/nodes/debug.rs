use crate::logging::DiagnosticLog;
use crate::preview::supervisor::WindowSupervisor;
use anyhow::anyhow;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugAction {
    EnableDebug,
    DisableDebug,
    SaveDump,
    GetStats,
    GetThreads,
}

impl FromStr for DebugAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "enable_debug" => Ok(DebugAction::EnableDebug),
            "disable_debug" => Ok(DebugAction::DisableDebug),
            "save_dump" => Ok(DebugAction::SaveDump),
            "get_stats" => Ok(DebugAction::GetStats),
            "get_threads" => Ok(DebugAction::GetThreads),
            other => Err(anyhow!("unknown debug action {other:?}")),
        }
    }
}

/// Diagnostic actions over the supervisor and log, answered as text.
#[derive(Clone)]
pub struct DebugNode {
    supervisor: WindowSupervisor,
    diagnostics: Arc<DiagnosticLog>,
}

impl DebugNode {
    pub fn new(supervisor: WindowSupervisor, diagnostics: Arc<DiagnosticLog>) -> Self {
        Self {
            supervisor,
            diagnostics,
        }
    }

    pub fn run(&self, action: DebugAction) -> String {
        match action {
            DebugAction::EnableDebug => match self.diagnostics.set_debug_mode(true) {
                Ok(()) => "Debug mode enabled".to_string(),
                Err(err) => {
                    tracing::error!(?err, "failed to enable debug mode");
                    format!("Debug mode enabled for this session only: {err:#}")
                }
            },
            DebugAction::DisableDebug => match self.diagnostics.set_debug_mode(false) {
                Ok(()) => "Debug mode disabled".to_string(),
                Err(err) => {
                    tracing::error!(?err, "failed to disable debug mode");
                    format!("Debug mode disabled for this session only: {err:#}")
                }
            },
            DebugAction::SaveDump => match self.supervisor.save_debug_dump() {
                Some(path) => format!("Dump saved: {}", path.display()),
                None if !self.diagnostics.debug_mode() => "Enable debug mode to save dumps".to_string(),
                None => "Dump could not be saved".to_string(),
            },
            DebugAction::GetStats => pretty(&self.supervisor.health_stats()),
            DebugAction::GetThreads => {
                let census = self.supervisor.thread_census();
                tracing::info!(
                    window_threads = census.window_threads.len(),
                    watchdog_alive = census.watchdog.alive,
                    "thread census requested"
                );
                pretty(&census)
            }
        }
    }
}

fn pretty<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|err| format!("unavailable: {err}"))
}

/// Switches persistent debug mode on or off.
#[derive(Clone)]
pub struct DebugToggleNode {
    diagnostics: Arc<DiagnosticLog>,
}

impl DebugToggleNode {
    pub fn new(diagnostics: Arc<DiagnosticLog>) -> Self {
        Self { diagnostics }
    }

    pub fn toggle(&self, enabled: bool) -> String {
        if let Err(err) = self.diagnostics.set_debug_mode(enabled) {
            tracing::error!(?err, "failed to persist debug mode");
        }
        if enabled {
            "Persistent debug ON\nA dump is saved on every watch run".to_string()
        } else {
            "Persistent debug OFF\nDumps are saved on request only".to_string()
        }
    }
}

/// Brings a minimized preview window back.
#[derive(Clone)]
pub struct RestoreWindowNode {
    supervisor: WindowSupervisor,
}

impl RestoreWindowNode {
    pub fn new(supervisor: WindowSupervisor) -> Self {
        Self { supervisor }
    }

    /// There is a single preview window; `display_index` only labels the
    /// reply.
    pub fn restore(&self, display_index: usize) -> String {
        if self.supervisor.restore_window() {
            format!("Window {display_index} restored")
        } else {
            format!("Window {display_index} could not be restored; it must exist and be minimized")
        }
    }
}
