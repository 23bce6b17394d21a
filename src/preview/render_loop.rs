use crate::preview::controller::{window_title, WindowController};
use crate::preview::display::{available_displays, DisplayEnumerator};
use crate::preview::entry::{EntryRegistry, WindowEntry};
use crate::preview::frame::PreviewFrame;
use crate::preview::placement::resolve_placement;
use crate::preview::toolkit::{WindowSpec, WindowToolkit};
use crate::settings::SettingsStore;
use anyhow::{Context, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

pub(crate) type FailureHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RenderTiming {
    pub(crate) poll_interval: Duration,
    pub(crate) teardown_attempts: u32,
    pub(crate) teardown_backoff: Duration,
}

/// Everything the render thread needs, moved onto it at spawn time.
pub(crate) struct RenderContext {
    pub(crate) entry: Arc<WindowEntry>,
    pub(crate) registry: Arc<EntryRegistry>,
    pub(crate) toolkit: Arc<dyn WindowToolkit>,
    pub(crate) displays: Arc<dyn DisplayEnumerator>,
    pub(crate) settings: Arc<SettingsStore>,
    pub(crate) timing: RenderTiming,
    pub(crate) on_failure: Option<FailureHook>,
}

/// Thread entrypoint. Owns the native window from creation to destruction;
/// always ends by removing its own entry from the registry.
pub(crate) fn run_render_thread(ctx: RenderContext) {
    let owner = thread::current().id();
    ctx.entry.bind_owner(owner);
    tracing::debug!(entry = ctx.entry.id(), toolkit = ctx.toolkit.name(), "preview render thread started");

    let mut controller: Option<WindowController> = None;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_event_loop(&ctx, &mut controller)));
    match outcome {
        Ok(Ok(())) => tracing::debug!(entry = ctx.entry.id(), "preview event loop exited"),
        Ok(Err(err)) => {
            tracing::error!(?err, entry = ctx.entry.id(), "preview render thread failed");
            ctx.report_failure("render thread failure");
        }
        Err(payload) => {
            let panic_message = if let Some(message) = payload.downcast_ref::<&str>() {
                (*message).to_string()
            } else if let Some(message) = payload.downcast_ref::<String>() {
                message.clone()
            } else {
                "unknown panic payload".to_string()
            };
            tracing::error!(panic_message, entry = ctx.entry.id(), "preview render thread panicked");
            ctx.report_failure("render thread panic");
        }
    }

    ctx.entry.mark_stopped();
    if let Some(mut controller) = controller.take() {
        controller.persist_geometry();
        teardown_native(&mut controller, owner, ctx.timing);
    }
    if ctx.registry.remove_if(ctx.entry.id()) {
        tracing::debug!(entry = ctx.entry.id(), "preview entry removed by render thread");
    } else {
        tracing::debug!(entry = ctx.entry.id(), "preview entry already reclaimed");
    }
}

impl RenderContext {
    fn report_failure(&self, source: &str) {
        if let Some(hook) = &self.on_failure {
            hook(source);
        }
    }

    fn window_spec(&self) -> WindowSpec {
        let display_index = self.entry.display_index();
        let settings = self.settings.snapshot();
        let displays = available_displays(self.displays.as_ref());
        WindowSpec {
            title: window_title(display_index),
            display_index,
            placement: resolve_placement(&settings, &displays, display_index),
            show_toolbar: settings.show_toolbar,
        }
    }
}

fn run_event_loop(ctx: &RenderContext, slot: &mut Option<WindowController>) -> Result<()> {
    let spec = ctx.window_spec();
    let window = ctx
        .toolkit
        .open(&spec)
        .with_context(|| format!("open preview window on monitor {}", spec.display_index))?;
    let controller = slot.insert(WindowController::new(
        window,
        ctx.settings.clone(),
        ctx.displays.clone(),
        spec.display_index,
    ));

    let staged = ctx.entry.register_controller(controller.handle());
    controller.initialize(staged);
    if ctx.entry.display_index() != spec.display_index {
        controller.relocate(ctx.entry.display_index());
    }
    tracing::info!(entry = ctx.entry.id(), display = spec.display_index, "preview window opened");

    let mut last_frame: Option<PreviewFrame> = None;
    while ctx.entry.is_running() {
        let events = controller
            .window_mut()
            .pump_events(ctx.timing.poll_interval)
            .context("pump preview window events")?;
        for event in events {
            controller.handle_event(event, &ctx.entry);
        }
        if !ctx.entry.is_running() {
            break;
        }
        controller.process_inbox(&ctx.entry);
        if let Some(frame) = ctx.entry.frame_if_changed(last_frame.as_ref()) {
            controller.show_frame(&frame);
            last_frame = Some(frame);
        }
    }
    Ok(())
}

/// Releases and destroys the native window with bounded retries. Skipped
/// entirely when not running on `owner`.
pub(crate) fn teardown_native(controller: &mut WindowController, owner: ThreadId, timing: RenderTiming) -> bool {
    if thread::current().id() != owner {
        tracing::warn!(
            current = ?thread::current().id(),
            ?owner,
            "skipping native teardown off the owning thread"
        );
        return false;
    }

    let attempts = timing.teardown_attempts.max(1);
    for attempt in 1..=attempts {
        match controller.release_and_destroy() {
            Ok(()) => return true,
            Err(err) if attempt == attempts => {
                tracing::error!(?err, attempt, "preview window teardown failed; giving up");
            }
            Err(err) => {
                tracing::debug!(?err, attempt, "preview window teardown failed; retrying");
                thread::sleep(timing.teardown_backoff);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::display::FixedDisplays;
    use crate::preview::headless::HeadlessToolkit;
    use crate::settings::PreviewSettings;

    const TIMING: RenderTiming = RenderTiming {
        poll_interval: Duration::from_millis(5),
        teardown_attempts: 3,
        teardown_backoff: Duration::from_millis(1),
    };

    fn open_controller(toolkit: &HeadlessToolkit) -> WindowController {
        let ctx_spec = WindowSpec {
            title: window_title(0),
            display_index: 0,
            placement: crate::preview::toolkit::WindowPlacement {
                width: 10,
                height: 10,
                position: None,
            },
            show_toolbar: true,
        };
        let window = toolkit.open(&ctx_spec).expect("open");
        WindowController::new(
            window,
            Arc::new(SettingsStore::in_memory(PreviewSettings::default())),
            Arc::new(FixedDisplays::default()),
            0,
        )
    }

    #[test]
    fn teardown_retries_then_succeeds() {
        let toolkit = HeadlessToolkit::recording();
        let recorder = toolkit.recorder();
        let mut controller = open_controller(&toolkit);
        recorder.fail_next_destroys(2);

        assert!(teardown_native(&mut controller, thread::current().id(), TIMING));
        assert_eq!(recorder.destroyed_count(), 1);
        assert_eq!(recorder.released_count(), 3);
    }

    #[test]
    fn teardown_gives_up_after_bounded_attempts() {
        let toolkit = HeadlessToolkit::recording();
        let recorder = toolkit.recorder();
        let mut controller = open_controller(&toolkit);
        recorder.fail_next_destroys(10);

        assert!(!teardown_native(&mut controller, thread::current().id(), TIMING));
        assert_eq!(recorder.destroyed_count(), 0);
        assert_eq!(recorder.released_count(), 3);
    }

    #[test]
    fn teardown_is_skipped_off_the_owning_thread() {
        let toolkit = HeadlessToolkit::recording();
        let recorder = toolkit.recorder();
        let mut controller = open_controller(&toolkit);
        let other = thread::spawn(|| thread::current().id())
            .join()
            .expect("join");

        assert!(!teardown_native(&mut controller, other, TIMING));
        assert_eq!(recorder.released_count(), 0);
        assert_eq!(recorder.destroyed_count(), 0);
    }
}
