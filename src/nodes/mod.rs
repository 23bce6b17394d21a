//! Entry points the host graph calls. Each node holds the services it needs;
//! none of them reach for process-wide state.

pub mod debug;
pub mod list_cycler;
pub mod signal_scout;
pub mod watch;

pub use debug::{DebugAction, DebugNode, DebugToggleNode, RestoreWindowNode};
pub use list_cycler::{ListCyclerNode, ResetStatus};
pub use signal_scout::SignalScout;
pub use watch::{WatchNode, WatchOutput};
