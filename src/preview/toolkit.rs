//! Seam between the window lifecycle machinery and a concrete GUI toolkit.
//!
//! A [`WindowToolkit`] is shared across threads and only knows how to open a
//! window. The [`NativeWindow`] it returns is deliberately not `Send`: it is
//! created, pumped and destroyed on the render thread that opened it.

use crate::preview::frame::PreviewFrame;
use crate::preview::placement::SizeMode;
use crate::settings::SettingsDialogValues;
use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_WINDOW_TITLE: &str = "Watch Point";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct WindowPlacement {
    pub width: u32,
    pub height: u32,
    pub position: Option<(i32, i32)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSpec {
    pub title: String,
    pub display_index: usize,
    pub placement: WindowPlacement,
    pub show_toolbar: bool,
}

/// User-originated events drained from the native event queue.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowEvent {
    CloseRequested,
    Minimized,
    Restored,
    Moved { x: i32, y: i32 },
    ToggleToolbar,
    SizeModeSelected(SizeMode),
    SaveImageRequested(PathBuf),
    SettingsDialogSaved(SettingsDialogValues),
}

pub trait NativeWindow {
    /// Waits up to `wait` for native events and returns everything queued.
    fn pump_events(&mut self, wait: Duration) -> Result<Vec<WindowEvent>>;
    fn render(&mut self, frame: &PreviewFrame) -> Result<()>;
    fn set_signal_text(&mut self, text: &str) -> Result<()>;
    fn set_title(&mut self, title: &str) -> Result<()>;
    fn apply_placement(&mut self, placement: &WindowPlacement) -> Result<()>;
    fn set_toolbar_visible(&mut self, visible: bool) -> Result<()>;
    fn minimize(&mut self) -> Result<()>;
    /// Fallback for toolkits that cannot iconify.
    fn hide(&mut self) -> Result<()>;
    fn restore(&mut self) -> Result<()>;
    fn position(&self) -> Option<(i32, i32)>;
    /// Drops image handles and clears the drawing surface.
    fn release_resources(&mut self) -> Result<()>;
    fn destroy(&mut self) -> Result<()>;
}

pub trait WindowToolkit: Send + Sync {
    fn name(&self) -> &'static str;
    /// Called on the render thread; the returned window never leaves it.
    fn open(&self, spec: &WindowSpec) -> Result<Box<dyn NativeWindow>>;
}
