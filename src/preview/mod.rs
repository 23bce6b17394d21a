pub mod controller;
pub mod display;
pub mod entry;
pub mod frame;
pub mod headless;
pub mod placement;
pub mod render_loop;
pub mod state;
pub mod supervisor;
pub mod toolkit;
pub mod watchdog;
#[cfg(windows)]
pub mod win32;

pub use controller::{ControllerHandle, WindowController, PLACEHOLDER_SIGNAL_TEXT};
pub use display::{DisplayEnumerator, DisplayInfo, FixedDisplays, SystemDisplays};
pub use entry::WindowEntry;
pub use frame::{HostImage, PreviewFrame};
pub use headless::{HeadlessRecorder, HeadlessToolkit};
pub use placement::SizeMode;
pub use state::PreviewLifecycle;
pub use supervisor::{
    HealthStats, PresentOutcome, SupervisorConfig, SupervisorParts, ThreadCensus, WindowSupervisor,
};
pub use toolkit::{NativeWindow, WindowEvent, WindowPlacement, WindowSpec, WindowToolkit};
pub use watchdog::{ReclaimReason, Reclaimed};

use std::sync::Arc;

/// The toolkit used when the host does not supply one: native on Windows,
/// headless (a dark preview) elsewhere.
pub fn default_toolkit() -> Arc<dyn WindowToolkit> {
    #[cfg(windows)]
    {
        Arc::new(win32::Win32Toolkit::new())
    }

    #[cfg(not(windows))]
    {
        tracing::warn!("no native preview backend on this platform; preview window stays dark");
        Arc::new(HeadlessToolkit::new())
    }
}
