use crate::logging::DiagnosticLog;
use crate::preview::display::parse_monitor_selector;
use crate::preview::frame::{HostImage, PreviewFrame};
use crate::preview::supervisor::WindowSupervisor;
use crate::scratch::{ScratchImageRef, ScratchWriter};
use crate::shutdown::{Cleanup, ShutdownCoordinator};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const NO_DISPLAY: usize = usize::MAX;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WatchOutput {
    /// Scratch images for the host's floating preview.
    pub ui_images: Vec<ScratchImageRef>,
}

/// The image-producing node: shows the first image of each batch in the
/// preview window and optionally writes the batch to scratch files.
pub struct WatchNode {
    supervisor: WindowSupervisor,
    scratch: Arc<ScratchWriter>,
    diagnostics: Option<Arc<DiagnosticLog>>,
    last_display_index: AtomicUsize,
}

impl WatchNode {
    /// Creates the node and registers it for cleanup at unload.
    pub fn new(
        supervisor: WindowSupervisor,
        scratch: Arc<ScratchWriter>,
        diagnostics: Option<Arc<DiagnosticLog>>,
        coordinator: &ShutdownCoordinator,
    ) -> Arc<Self> {
        let node = Arc::new(Self {
            supervisor,
            scratch,
            diagnostics,
            last_display_index: AtomicUsize::new(NO_DISPLAY),
        });
        coordinator.register(node.clone());
        node
    }

    pub fn last_display_index(&self) -> Option<usize> {
        match self.last_display_index.load(Ordering::SeqCst) {
            NO_DISPLAY => None,
            index => Some(index),
        }
    }

    pub fn watch(
        &self,
        images: &[HostImage],
        floating_preview: bool,
        monitor_preview: bool,
        monitor: &str,
        signal_text: Option<&str>,
    ) -> WatchOutput {
        let display_index = parse_monitor_selector(monitor);
        self.last_display_index.store(display_index, Ordering::SeqCst);

        if monitor_preview {
            match images.first().map(HostImage::to_frame) {
                Some(Ok(frame)) => {
                    tracing::debug!(display_index, "showing preview");
                    self.supervisor.present(display_index, frame, signal_text);
                }
                Some(Err(err)) => tracing::warn!(?err, "cannot convert image for preview"),
                None => tracing::debug!("empty image batch; nothing to preview"),
            }
        } else {
            tracing::debug!(display_index, "monitor preview off; dismissing window");
            self.supervisor.dismiss();
        }

        let ui_images = if floating_preview {
            self.floating_preview(images)
        } else {
            Vec::new()
        };

        if self.diagnostics.as_ref().is_some_and(|d| d.debug_mode()) {
            tracing::info!("saving automatic dump after watch");
            self.supervisor.save_debug_dump();
        }

        WatchOutput { ui_images }
    }

    fn floating_preview(&self, images: &[HostImage]) -> Vec<ScratchImageRef> {
        let frames: Vec<PreviewFrame> = images
            .iter()
            .filter_map(|image| match image.to_frame() {
                Ok(frame) => Some(frame),
                Err(err) => {
                    tracing::warn!(?err, "skipping image in floating preview");
                    None
                }
            })
            .collect();
        match self.scratch.write_batch(&frames) {
            Ok(refs) => refs,
            Err(err) => {
                tracing::error!(?err, "failed to write floating preview images");
                Vec::new()
            }
        }
    }
}

impl Cleanup for WatchNode {
    fn cleanup_name(&self) -> &str {
        "watch node"
    }

    fn cleanup(&self) -> anyhow::Result<()> {
        self.supervisor.shutdown();
        Ok(())
    }
}
