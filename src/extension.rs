use crate::cycler::{ListCycler, LIST_STATE_FILE_NAME};
use crate::logging::{self, DiagnosticLog, DEBUG_CONFIG_FILE_NAME, DEFAULT_CAPACITY, DUMP_DIR_NAME};
use crate::nodes::{DebugNode, DebugToggleNode, ListCyclerNode, RestoreWindowNode, SignalScout, WatchNode};
use crate::preview::display::{DisplayEnumerator, SystemDisplays};
use crate::preview::supervisor::{SupervisorConfig, SupervisorParts, WindowSupervisor};
use crate::preview::toolkit::WindowToolkit;
use crate::scratch::ScratchWriter;
use crate::settings::{SettingsStore, SETTINGS_FILE_NAME};
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Debug, Clone)]
pub struct ExtensionConfig {
    pub settings_path: PathBuf,
    pub debug_config_path: PathBuf,
    pub dump_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub list_state_path: PathBuf,
    pub log_file: Option<PathBuf>,
    pub log_capacity: usize,
    /// Install the global tracing subscriber. Hosts with their own
    /// subscriber leave this off.
    pub init_logging: bool,
    pub supervisor: SupervisorConfig,
}

impl ExtensionConfig {
    /// Every file lives under `dir`.
    pub fn in_directory(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            settings_path: dir.join(SETTINGS_FILE_NAME),
            debug_config_path: dir.join(DEBUG_CONFIG_FILE_NAME),
            dump_dir: dir.join(DUMP_DIR_NAME),
            scratch_dir: dir.join("temp"),
            list_state_path: dir.join("data").join(LIST_STATE_FILE_NAME),
            log_file: None,
            log_capacity: DEFAULT_CAPACITY,
            init_logging: false,
            supervisor: SupervisorConfig::default(),
        }
    }

    /// Files next to the running executable.
    pub fn beside_executable() -> Result<Self> {
        let exe = std::env::current_exe()?;
        let dir = exe
            .parent()
            .ok_or_else(|| anyhow!("executable path has no parent: {}", exe.display()))?;
        Ok(Self::in_directory(dir))
    }
}

/// Service root created by the host's load hook and torn down by its unload
/// hook. Nodes are built from it rather than from globals.
pub struct WatchPointExtension {
    settings: Arc<SettingsStore>,
    diagnostics: Arc<DiagnosticLog>,
    supervisor: WindowSupervisor,
    coordinator: Arc<ShutdownCoordinator>,
    scratch: Arc<ScratchWriter>,
    cycler: Arc<ListCycler>,
    _log_guard: Option<WorkerGuard>,
}

impl WatchPointExtension {
    pub fn init(config: ExtensionConfig) -> Self {
        Self::init_with(config, crate::preview::default_toolkit(), Arc::new(SystemDisplays))
    }

    pub fn init_with(
        config: ExtensionConfig,
        toolkit: Arc<dyn WindowToolkit>,
        displays: Arc<dyn DisplayEnumerator>,
    ) -> Self {
        let diagnostics = Arc::new(DiagnosticLog::with_debug_config(
            config.log_capacity,
            &config.debug_config_path,
            &config.dump_dir,
        ));
        let log_guard = if config.init_logging {
            logging::init(
                diagnostics.debug_mode(),
                config.log_file.as_deref(),
                Some(diagnostics.clone()),
            )
        } else {
            None
        };

        let settings = Arc::new(SettingsStore::load(&config.settings_path));
        let supervisor = WindowSupervisor::start(SupervisorParts {
            config: config.supervisor.clone(),
            settings: settings.clone(),
            toolkit,
            displays,
            diagnostics: Some(diagnostics.clone()),
        });
        let coordinator = Arc::new(ShutdownCoordinator::new());
        coordinator.register(Arc::new(supervisor.clone()));

        tracing::info!(
            settings = %config.settings_path.display(),
            debug = diagnostics.debug_mode(),
            "watch point extension loaded"
        );
        Self {
            settings,
            diagnostics,
            supervisor,
            coordinator,
            scratch: Arc::new(ScratchWriter::new(config.scratch_dir)),
            cycler: Arc::new(ListCycler::new(config.list_state_path)),
            _log_guard: log_guard,
        }
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn diagnostics(&self) -> &Arc<DiagnosticLog> {
        &self.diagnostics
    }

    pub fn supervisor(&self) -> &WindowSupervisor {
        &self.supervisor
    }

    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.coordinator
    }

    pub fn watch_node(&self) -> Arc<WatchNode> {
        WatchNode::new(
            self.supervisor.clone(),
            self.scratch.clone(),
            Some(self.diagnostics.clone()),
            &self.coordinator,
        )
    }

    pub fn signal_scout(&self) -> SignalScout {
        SignalScout::new(self.supervisor.clone())
    }

    pub fn debug_node(&self) -> DebugNode {
        DebugNode::new(self.supervisor.clone(), self.diagnostics.clone())
    }

    pub fn debug_toggle_node(&self) -> DebugToggleNode {
        DebugToggleNode::new(self.diagnostics.clone())
    }

    pub fn restore_window_node(&self) -> RestoreWindowNode {
        RestoreWindowNode::new(self.supervisor.clone())
    }

    pub fn list_cycler_node(&self) -> ListCyclerNode {
        ListCyclerNode::new(self.cycler.clone())
    }

    /// Runs the shutdown sweep. Later calls do nothing.
    pub fn unload(&self) -> ShutdownReport {
        let report = self.coordinator.shutdown_all();
        if !report.already_shut_down {
            tracing::info!(cleaned = report.cleaned, failed = report.failed, "watch point extension unloaded");
        }
        report
    }
}
