use anyhow::{Context as _, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_CAPACITY: usize = 100;
pub const DUMP_LOG_TAIL: usize = 50;
pub const DEBUG_CONFIG_FILE_NAME: &str = "watchpoint_debug.json";
pub const DUMP_DIR_NAME: &str = "debug_logs";

const SESSION_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Initialise logging. When `debug` is set the default level is `debug` and
/// `RUST_LOG` may override it; otherwise `info` is forced.
///
/// `log_file` adds a non-blocking plain-text file sink; keep the returned
/// guard alive for as long as file output is wanted. `diagnostics` receives
/// every event that passes the filter.
pub fn init(
    debug: bool,
    log_file: Option<&Path>,
    diagnostics: Option<Arc<DiagnosticLog>>,
) -> Option<WorkerGuard> {
    // A verbose RUST_LOG left in the environment must not leak into
    // non-debug sessions.
    let level = if debug { "debug" } else { "info" };
    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };

    let mut guard = None;
    let file_layer = log_file.and_then(|path| {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty())?;
        let name = path.file_name()?;
        if let Err(err) = std::fs::create_dir_all(dir) {
            eprintln!("watch_point: cannot create log directory {}: {err}", dir.display());
            return None;
        }
        let (writer, worker) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
        guard = Some(worker);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        )
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .with(diagnostics.map(DiagnosticLayer::new))
        .try_init();
    guard
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => LogLevel::Error,
            tracing::Level::WARN => LogLevel::Warning,
            tracing::Level::INFO => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
}

/// Extra sections written into a debug dump.
#[derive(Debug, Clone, Default)]
pub struct DumpContext {
    pub health: Option<serde_json::Value>,
    pub threads: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DebugConfig {
    debug_mode: bool,
    timestamp: String,
}

#[derive(Debug, Default)]
struct DebugState {
    enabled: bool,
    session_id: Option<String>,
}

/// Bounded in-memory log with persistent debug mode and on-demand dumps.
///
/// Never logs through `tracing` while holding its own locks: the
/// [`DiagnosticLayer`] feeds events straight back into [`DiagnosticLog::record`].
#[derive(Debug)]
pub struct DiagnosticLog {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    min_level: Mutex<LogLevel>,
    debug: Mutex<DebugState>,
    config_path: Option<PathBuf>,
    dump_dir: PathBuf,
    saving_dump: AtomicBool,
}

impl DiagnosticLog {
    /// A log with no persisted debug configuration. Dumps go to `dump_dir`.
    pub fn new(capacity: usize, dump_dir: impl Into<PathBuf>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            min_level: Mutex::new(LogLevel::Info),
            debug: Mutex::new(DebugState::default()),
            config_path: None,
            dump_dir: dump_dir.into(),
            saving_dump: AtomicBool::new(false),
        }
    }

    /// Loads debug mode from `config_path`; a missing or unreadable file
    /// means debug mode is off.
    pub fn with_debug_config(capacity: usize, config_path: impl Into<PathBuf>, dump_dir: impl Into<PathBuf>) -> Self {
        let mut log = Self::new(capacity, dump_dir);
        let config_path = config_path.into();
        let enabled = std::fs::read_to_string(&config_path)
            .ok()
            .and_then(|content| serde_json::from_str::<DebugConfig>(&content).ok())
            .is_some_and(|config| config.debug_mode);
        log.config_path = Some(config_path);
        if enabled {
            let mut debug = log.lock_debug();
            debug.enabled = true;
            debug.session_id = Some(new_session_id());
        }
        log
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dump_dir(&self) -> &Path {
        &self.dump_dir
    }

    pub fn set_min_level(&self, level: LogLevel) {
        *lock(&self.min_level) = level;
    }

    pub fn min_level(&self) -> LogLevel {
        *lock(&self.min_level)
    }

    pub fn record(&self, level: LogLevel, component: impl Into<String>, message: impl Into<String>) {
        if level < self.min_level() {
            return;
        }
        let entry = LogEntry {
            timestamp: Local::now().to_rfc3339(),
            level,
            component: component.into(),
            message: message.into(),
        };
        let mut entries = lock(&self.entries);
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Entries at or above `level`, optionally restricted to one component.
    pub fn entries(&self, level: Option<LogLevel>, component: Option<&str>) -> Vec<LogEntry> {
        lock(&self.entries)
            .iter()
            .filter(|e| level.map_or(true, |min| e.level >= min))
            .filter(|e| component.map_or(true, |c| e.component == c))
            .cloned()
            .collect()
    }

    pub fn recent(&self, count: usize) -> Vec<LogEntry> {
        let entries = lock(&self.entries);
        let skip = entries.len().saturating_sub(count);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    pub fn debug_mode(&self) -> bool {
        self.lock_debug().enabled
    }

    pub fn session_id(&self) -> Option<String> {
        self.lock_debug().session_id.clone()
    }

    /// Switches debug mode and persists the choice. Enabling starts a new
    /// session and creates the dump directory.
    pub fn set_debug_mode(&self, enabled: bool) -> Result<()> {
        let session = {
            let mut debug = self.lock_debug();
            debug.enabled = enabled;
            if enabled {
                debug.session_id = Some(new_session_id());
            }
            debug.session_id.clone()
        };
        if enabled {
            std::fs::create_dir_all(&self.dump_dir)
                .with_context(|| format!("create dump directory {}", self.dump_dir.display()))?;
            tracing::info!(session = ?session, "debug mode enabled");
        } else {
            tracing::info!("debug mode disabled");
        }
        self.persist_debug_mode(enabled)
    }

    fn persist_debug_mode(&self, enabled: bool) -> Result<()> {
        let Some(path) = &self.config_path else {
            return Ok(());
        };
        let config = DebugConfig {
            debug_mode: enabled,
            timestamp: Local::now().to_rfc3339(),
        };
        let json = serde_json::to_string_pretty(&config).context("serialize debug config")?;
        std::fs::write(path, json).with_context(|| format!("write debug config {}", path.display()))
    }

    /// Writes a pretty JSON dump when debug mode is on. Returns the file
    /// written; `None` when off, re-entered, or on failure.
    pub fn save_debug_dump(&self, context: DumpContext) -> Option<PathBuf> {
        if !self.debug_mode() {
            return None;
        }
        if self.saving_dump.swap(true, Ordering::SeqCst) {
            return None;
        }
        let result = self.write_dump(context);
        self.saving_dump.store(false, Ordering::SeqCst);
        match result {
            Ok(path) => {
                tracing::info!(path = %path.display(), "debug dump saved");
                Some(path)
            }
            Err(err) => {
                tracing::error!(?err, "failed to save debug dump");
                None
            }
        }
    }

    fn write_dump(&self, context: DumpContext) -> Result<PathBuf> {
        let session = self.session_id().unwrap_or_else(new_session_id);
        let now = Local::now();
        let path = self.dump_dir.join(format!(
            "debug_dump_{session}_{}.log",
            now.format("%Y%m%d_%H%M%S%.3f")
        ));
        let dump = serde_json::json!({
            "timestamp": now.to_rfc3339(),
            "session_id": session,
            "system_info": {
                "os": std::env::consts::OS,
                "arch": std::env::consts::ARCH,
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "health_stats": context.health,
            "thread_info": context.threads,
            "recent_logs": self.recent(DUMP_LOG_TAIL),
        });
        std::fs::create_dir_all(&self.dump_dir)
            .with_context(|| format!("create dump directory {}", self.dump_dir.display()))?;
        let json = serde_json::to_string_pretty(&dump).context("serialize debug dump")?;
        std::fs::write(&path, json).with_context(|| format!("write debug dump {}", path.display()))?;
        Ok(path)
    }

    fn lock_debug(&self) -> MutexGuard<'_, DebugState> {
        lock(&self.debug)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn new_session_id() -> String {
    Local::now().format(SESSION_FORMAT).to_string()
}

/// Last `::` segment of a tracing target, e.g. `watch_point::preview::supervisor`
/// becomes `supervisor`.
pub fn component_from_target(target: &str) -> &str {
    target.rsplit("::").next().unwrap_or(target)
}

/// Bridges tracing events into a [`DiagnosticLog`].
pub struct DiagnosticLayer {
    log: Arc<DiagnosticLog>,
}

impl DiagnosticLayer {
    pub fn new(log: Arc<DiagnosticLog>) -> Self {
        Self { log }
    }
}

impl<S: Subscriber> Layer<S> for DiagnosticLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = LogLevel::from(metadata.level());
        if level < self.log.min_level() {
            return;
        }
        let mut visitor = EntryVisitor::default();
        event.record(&mut visitor);
        let component = visitor
            .component
            .take()
            .unwrap_or_else(|| component_from_target(metadata.target()).to_string());
        self.log.record(level, component, visitor.into_message());
    }
}

#[derive(Default)]
struct EntryVisitor {
    message: Option<String>,
    component: Option<String>,
    fields: Vec<String>,
}

impl EntryVisitor {
    fn into_message(self) -> String {
        let mut message = self.message.unwrap_or_default();
        for field in self.fields {
            if !message.is_empty() {
                message.push(' ');
            }
            message.push_str(&field);
        }
        message
    }
}

impl Visit for EntryVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "component" => self.component = Some(value.to_string()),
            name => self.fields.push(format!("{name}={value}")),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = Some(format!("{value:?}")),
            "component" => self.component = Some(format!("{value:?}").trim_matches('"').to_string()),
            name => self.fields.push(format!("{name}={value:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn ring_buffer_drops_oldest() {
        let log = DiagnosticLog::new(3, "unused");
        for i in 0..5 {
            log.record(LogLevel::Info, "test", format!("m{i}"));
        }
        let messages: Vec<_> = log.entries(None, None).into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn entries_below_minimum_level_are_ignored_and_filters_apply() {
        let log = DiagnosticLog::new(10, "unused");
        log.record(LogLevel::Debug, "a", "hidden");
        log.record(LogLevel::Info, "a", "info");
        log.record(LogLevel::Error, "b", "boom");
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries(Some(LogLevel::Warning), None).len(), 1);
        assert_eq!(log.entries(None, Some("a"))[0].message, "info");

        log.set_min_level(LogLevel::Debug);
        log.record(LogLevel::Debug, "a", "visible");
        assert_eq!(log.len(), 3);
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn layer_captures_component_and_fields() {
        let log = Arc::new(DiagnosticLog::new(10, "unused"));
        let subscriber = tracing_subscriber::registry().with(DiagnosticLayer::new(log.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(component = "watchdog", entry = 4, "reclaimed");
            tracing::info!(target: "watch_point::preview::supervisor", "started");
            tracing::debug!("filtered out");
        });

        let entries = log.entries(None, None);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].component, "watchdog");
        assert_eq!(entries[0].level, LogLevel::Warning);
        assert_eq!(entries[0].message, "reclaimed entry=4");
        assert_eq!(entries[1].component, "supervisor");
    }

    #[test]
    fn debug_mode_persists_and_gates_dumps() {
        let dir = tempfile::tempdir().expect("temp dir");
        let config = dir.path().join(DEBUG_CONFIG_FILE_NAME);
        let dumps = dir.path().join(DUMP_DIR_NAME);

        let log = DiagnosticLog::with_debug_config(10, &config, &dumps);
        assert!(!log.debug_mode());
        assert!(log.save_debug_dump(DumpContext::default()).is_none());

        log.set_debug_mode(true).expect("enable");
        assert!(log.session_id().is_some());
        log.record(LogLevel::Info, "test", "before dump");
        let path = log
            .save_debug_dump(DumpContext {
                health: Some(serde_json::json!({"active_windows": 1})),
                threads: None,
            })
            .expect("dump");
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert!(name.starts_with("debug_dump_"));
        let dump: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(dump["health_stats"]["active_windows"], 1);
        assert_eq!(dump["recent_logs"][0]["message"], "before dump");

        let reloaded = DiagnosticLog::with_debug_config(10, &config, &dumps);
        assert!(reloaded.debug_mode());
        reloaded.set_debug_mode(false).expect("disable");
        assert!(!DiagnosticLog::with_debug_config(10, &config, &dumps).debug_mode());
    }

    #[test]
    fn component_is_last_target_segment() {
        assert_eq!(component_from_target("watch_point::preview::watchdog"), "watchdog");
        assert_eq!(component_from_target("plain"), "plain");
    }
}
