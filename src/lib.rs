pub mod cycler;
pub mod extension;
pub mod logging;
pub mod nodes;
pub mod preview;
pub mod scratch;
pub mod settings;
pub mod shutdown;

pub use extension::{ExtensionConfig, WatchPointExtension};
pub use preview::{PresentOutcome, PreviewFrame, WindowSupervisor};
