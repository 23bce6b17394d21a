use crate::preview::display::{available_displays, DisplayEnumerator, SYNTHETIC_DISPLAY};
use crate::preview::entry::WindowEntry;
use crate::preview::frame::PreviewFrame;
use crate::preview::placement::{resolve_placement, SizeMode};
use crate::preview::toolkit::{NativeWindow, WindowEvent, WindowPlacement, DEFAULT_WINDOW_TITLE};
use crate::settings::{SaveFormat, SettingsStore};
use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, ImageFormat};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

pub const PLACEHOLDER_SIGNAL_TEXT: &str = "Waiting for prompt...";

/// Requests posted from producer threads, drained by the render thread on
/// each poll tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ControllerInbox {
    pub text: Option<String>,
    pub relocate_to: Option<usize>,
    pub restore: bool,
}

/// Send-able side of the window controller.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    inbox: Arc<Mutex<ControllerInbox>>,
    owner: ThreadId,
}

impl ControllerHandle {
    fn new(owner: ThreadId) -> Self {
        Self {
            inbox: Arc::new(Mutex::new(ControllerInbox::default())),
            owner,
        }
    }

    /// A handle nothing drains; only useful for exercising the mailbox.
    #[doc(hidden)]
    pub fn detached() -> Self {
        Self::new(thread::current().id())
    }

    pub fn owner_thread(&self) -> ThreadId {
        self.owner
    }

    pub fn update_signal_text(&self, text: impl Into<String>) {
        self.lock().text = Some(text.into());
    }

    pub fn request_relocation(&self, display_index: usize) {
        self.lock().relocate_to = Some(display_index);
    }

    pub fn request_restore(&self) {
        self.lock().restore = true;
    }

    pub fn drain(&self) -> ControllerInbox {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, ControllerInbox> {
        self.inbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn window_title(display_index: usize) -> String {
    format!("{DEFAULT_WINDOW_TITLE} (Monitor {display_index})")
}

/// Render-thread owner of the native window: applies text, geometry and
/// toolbar changes and handles user events.
pub struct WindowController {
    window: Box<dyn NativeWindow>,
    handle: ControllerHandle,
    settings: Arc<SettingsStore>,
    displays: Arc<dyn DisplayEnumerator>,
    display_index: usize,
    size_mode: SizeMode,
    toolbar_visible: bool,
    position: Option<(i32, i32)>,
    signal_text: String,
    current_frame: Option<PreviewFrame>,
}

impl WindowController {
    pub fn new(
        window: Box<dyn NativeWindow>,
        settings: Arc<SettingsStore>,
        displays: Arc<dyn DisplayEnumerator>,
        display_index: usize,
    ) -> Self {
        let snapshot = settings.snapshot();
        let position = window.position();
        Self {
            window,
            handle: ControllerHandle::new(thread::current().id()),
            settings,
            displays,
            display_index,
            size_mode: snapshot.window_size_mode,
            toolbar_visible: snapshot.show_toolbar,
            position,
            signal_text: String::new(),
            current_frame: None,
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    pub fn signal_text(&self) -> &str {
        &self.signal_text
    }

    pub fn display_index(&self) -> usize {
        self.display_index
    }

    pub(crate) fn window_mut(&mut self) -> &mut dyn NativeWindow {
        self.window.as_mut()
    }

    /// Shows the text staged before the controller existed, or the
    /// placeholder when nothing was staged.
    pub fn initialize(&mut self, staged_text: Option<String>) {
        let text = staged_text.unwrap_or_else(|| PLACEHOLDER_SIGNAL_TEXT.to_string());
        self.apply_signal_text(text);
        if let Err(err) = self.window.set_toolbar_visible(self.toolbar_visible) {
            tracing::debug!(?err, "failed to apply initial toolbar visibility");
        }
    }

    pub fn apply_signal_text(&mut self, text: String) {
        if let Err(err) = self.window.set_signal_text(&text) {
            tracing::warn!(?err, "failed to update signal text");
            return;
        }
        self.signal_text = text;
    }

    pub fn show_frame(&mut self, frame: &PreviewFrame) {
        match self.window.render(frame) {
            Ok(()) => self.current_frame = Some(frame.clone()),
            Err(err) => tracing::warn!(?err, "failed to render preview frame; keeping previous"),
        }
    }

    pub fn process_inbox(&mut self, entry: &WindowEntry) {
        let inbox = self.handle.drain();
        if let Some(text) = inbox.text {
            self.apply_signal_text(text);
        }
        if let Some(index) = inbox.relocate_to {
            self.relocate(index);
        }
        if inbox.restore {
            match self.window.restore() {
                Ok(()) => entry.mark_restored(),
                Err(err) => tracing::warn!(?err, "failed to restore preview window"),
            }
        }
    }

    /// Moves the window onto `display_index` and retitles it.
    pub fn relocate(&mut self, display_index: usize) {
        let displays = available_displays(self.displays.as_ref());
        let placement = resolve_placement(&self.settings.snapshot(), &displays, display_index);
        if let Err(err) = self.window.apply_placement(&placement) {
            tracing::warn!(?err, display_index, "failed to move preview window");
            return;
        }
        if let Err(err) = self.window.set_title(&window_title(display_index)) {
            tracing::debug!(?err, "failed to retitle preview window");
        }
        if placement.position.is_some() {
            self.position = placement.position;
        }
        tracing::info!(from = self.display_index, to = display_index, "preview window moved");
        self.display_index = display_index;
    }

    pub fn handle_event(&mut self, event: WindowEvent, entry: &WindowEntry) {
        match event {
            WindowEvent::CloseRequested => self.minimize_instead_of_close(entry),
            WindowEvent::Minimized => entry.mark_minimized(),
            WindowEvent::Restored => entry.mark_restored(),
            WindowEvent::Moved { x, y } => self.position = Some((x, y)),
            WindowEvent::ToggleToolbar => {
                let visible = !self.toolbar_visible;
                match self.window.set_toolbar_visible(visible) {
                    Ok(()) => self.toolbar_visible = visible,
                    Err(err) => tracing::warn!(?err, "failed to toggle toolbar"),
                }
            }
            WindowEvent::SizeModeSelected(mode) => self.apply_size_mode(mode),
            WindowEvent::SaveImageRequested(path) => match self.save_current_frame(&path) {
                Ok(saved) => tracing::info!(path = %saved.display(), "preview image saved"),
                Err(err) => tracing::error!(?err, "failed to save preview image"),
            },
            WindowEvent::SettingsDialogSaved(values) => {
                self.settings.update(|s| s.apply_dialog_values(values));
                if let Err(err) = self.settings.save() {
                    tracing::error!(?err, "failed to save preview settings");
                }
            }
        }
    }

    fn minimize_instead_of_close(&mut self, entry: &WindowEntry) {
        if let Err(err) = self.window.minimize() {
            tracing::debug!(?err, "minimize unsupported; hiding preview window");
            if let Err(err) = self.window.hide() {
                tracing::warn!(?err, "failed to hide preview window");
                return;
            }
        }
        entry.mark_minimized();
        tracing::info!("close requested; preview window minimized instead");
    }

    fn apply_size_mode(&mut self, mode: SizeMode) {
        let snapshot = self.settings.snapshot();
        let displays = available_displays(self.displays.as_ref());
        let screen = displays
            .get(self.display_index)
            .or_else(|| displays.first())
            .copied()
            .unwrap_or(SYNTHETIC_DISPLAY);
        let (width, height) = mode.size_for(&screen, snapshot.window_width, snapshot.window_height);
        let placement = WindowPlacement {
            width,
            height,
            position: None,
        };
        match self.window.apply_placement(&placement) {
            Ok(()) => self.size_mode = mode,
            Err(err) => tracing::warn!(?err, mode = %mode.label(), "failed to resize preview window"),
        }
    }

    /// Writes the frame on screen using the configured format. A path without
    /// an extension gets the format's extension appended.
    pub fn save_current_frame(&self, path: &Path) -> Result<PathBuf> {
        let frame = self
            .current_frame
            .as_ref()
            .ok_or_else(|| anyhow!("no frame has been rendered yet"))?;
        let settings = self.settings.snapshot();
        let path = with_default_extension(path, settings.save_format);
        save_frame(frame, &path, settings.save_format, settings.jpeg_quality)?;
        Ok(path)
    }

    /// Records geometry and toolbar state into the settings store and saves
    /// it. Called from teardown.
    pub fn persist_geometry(&mut self) {
        if let Some(position) = self.window.position() {
            self.position = Some(position);
        }
        let position = self.position;
        let size_mode = self.size_mode;
        let toolbar_visible = self.toolbar_visible;
        self.settings.update(|s| {
            s.window_size_mode = size_mode;
            s.show_toolbar = toolbar_visible;
            if let SizeMode::Exact { width, height } = size_mode {
                s.window_width = width;
                s.window_height = height;
            }
            if let Some((x, y)) = position {
                s.window_x = Some(x);
                s.window_y = Some(y);
            }
        });
        if let Err(err) = self.settings.save() {
            tracing::warn!(?err, "failed to persist preview geometry");
        }
    }

    pub(crate) fn release_and_destroy(&mut self) -> Result<()> {
        self.current_frame = None;
        self.window
            .release_resources()
            .context("release preview window resources")?;
        self.window.destroy().context("destroy preview window")
    }
}

fn with_default_extension(path: &Path, format: SaveFormat) -> PathBuf {
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension(format.extension())
    }
}

pub fn save_frame(frame: &PreviewFrame, path: &Path, format: SaveFormat, jpeg_quality: u32) -> Result<()> {
    match format {
        SaveFormat::Png => frame
            .image()
            .save_with_format(path, ImageFormat::Png)
            .with_context(|| format!("write png {}", path.display())),
        SaveFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(frame.image().clone()).to_rgb8();
            let file = std::fs::File::create(path)
                .with_context(|| format!("create jpeg {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            let quality = jpeg_quality.clamp(1, 100) as u8;
            JpegEncoder::new_with_quality(&mut writer, quality)
                .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
                .with_context(|| format!("encode jpeg {}", path.display()))
        }
    }
}
