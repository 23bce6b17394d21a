mod common;

use common::*;
use std::sync::Arc;
use tempfile::tempdir;
use watch_point::cycler::CycleMode;
use watch_point::nodes::{DebugAction, ResetStatus};
use watch_point::preview::display::FixedDisplays;
use watch_point::preview::{HeadlessToolkit, HostImage, PresentOutcome};
use watch_point::{ExtensionConfig, WatchPointExtension};

fn extension(dir: &std::path::Path, toolkit: &HeadlessToolkit) -> WatchPointExtension {
    let mut config = ExtensionConfig::in_directory(dir);
    config.supervisor = fast_config();
    WatchPointExtension::init_with(config, Arc::new(toolkit.clone()), Arc::new(FixedDisplays(two_monitors())))
}

fn gray(value: f32) -> HostImage {
    HostImage::new(2, 2, 1, vec![value; 4])
}

#[test]
fn watch_shows_first_image_and_writes_scratch_batch() {
    let dir = tempdir().unwrap();
    let toolkit = HeadlessToolkit::recording();
    let recorder = toolkit.recorder();
    let ext = extension(dir.path(), &toolkit);
    let node = ext.watch_node();

    let out = node.watch(&[gray(1.0), gray(0.0)], true, true, "Monitor 1 (1920x1080)", Some("t0"));
    assert_eq!(out.ui_images.len(), 2);
    for image in &out.ui_images {
        assert_eq!(image.kind, "temp");
        assert!(dir.path().join("temp").join(&image.filename).exists());
    }
    assert_eq!(node.last_display_index(), Some(1));

    assert!(wait_until(|| recorder.last_frame().is_some_and(|f| color_of(&f) == WHITE)));
    assert_eq!(recorder.last_text().as_deref(), Some("t0"));

    let again = node.watch(&[gray(1.0)], true, true, "Monitor 1 (1920x1080)", None);
    assert_ne!(again.ui_images[0].filename, out.ui_images[0].filename);
    ext.unload();
}

#[test]
fn watch_with_monitor_preview_off_closes_the_window() {
    let dir = tempdir().unwrap();
    let toolkit = HeadlessToolkit::recording();
    let recorder = toolkit.recorder();
    let ext = extension(dir.path(), &toolkit);
    let node = ext.watch_node();

    node.watch(&[gray(0.5)], false, true, "Monitor 0", None);
    assert!(wait_until(|| ext.supervisor().current_entry().is_some_and(|e| e.has_controller())));

    let out = node.watch(&[gray(0.5)], false, false, "Monitor 0", None);
    assert!(out.ui_images.is_empty());
    assert_eq!(ext.supervisor().entry_count(), 0);
    assert_eq!(recorder.destroyed_count(), 1);
    ext.unload();
}

#[test]
fn signal_scout_passes_text_through() {
    let dir = tempdir().unwrap();
    let toolkit = HeadlessToolkit::recording();
    let recorder = toolkit.recorder();
    let ext = extension(dir.path(), &toolkit);

    assert_eq!(ext.signal_scout().scout_signal("no window"), "no window");
    ext.supervisor().present(0, solid(BLACK), None);
    assert!(wait_until(|| ext.supervisor().current_entry().is_some_and(|e| e.has_controller())));
    assert_eq!(ext.signal_scout().scout_signal("a lighthouse"), "a lighthouse");
    assert!(wait_until(|| recorder.last_text().as_deref() == Some("a lighthouse")));
    ext.unload();
}

#[test]
fn unload_is_idempotent_and_stops_presenting() {
    let dir = tempdir().unwrap();
    let toolkit = HeadlessToolkit::recording();
    let recorder = toolkit.recorder();
    let ext = extension(dir.path(), &toolkit);
    let _node = ext.watch_node();

    ext.supervisor().present(0, solid(BLACK), None);
    assert!(wait_until(|| recorder.opened_count() == 1));

    let first = ext.unload();
    assert!(!first.already_shut_down);
    assert_eq!(first.cleaned, 2);
    assert_eq!(first.failed, 0);
    assert_eq!(recorder.destroyed_count(), 1);

    let second = ext.unload();
    assert!(second.already_shut_down);
    assert_eq!(ext.supervisor().present(0, solid(WHITE), None), PresentOutcome::Unavailable);
    assert_eq!(recorder.opened_count(), 1);
}

#[test]
fn debug_node_reports_stats_and_saves_dumps() {
    let dir = tempdir().unwrap();
    let toolkit = HeadlessToolkit::recording();
    let ext = extension(dir.path(), &toolkit);
    let debug = ext.debug_node();

    assert_eq!(debug.run(DebugAction::SaveDump), "Enable debug mode to save dumps");
    assert_eq!(debug.run(DebugAction::EnableDebug), "Debug mode enabled");
    assert!(dir.path().join("watchpoint_debug.json").exists());

    let saved = debug.run(DebugAction::SaveDump);
    assert!(saved.starts_with("Dump saved: "), "{saved}");
    let dumps: Vec<_> = std::fs::read_dir(dir.path().join("debug_logs")).unwrap().collect();
    assert_eq!(dumps.len(), 1);

    let stats: serde_json::Value = serde_json::from_str(&debug.run(DebugAction::GetStats)).unwrap();
    assert_eq!(stats["toolkit"], "headless");
    assert_eq!(stats["active_windows"], 0);
    let threads: serde_json::Value = serde_json::from_str(&debug.run(DebugAction::GetThreads)).unwrap();
    assert_eq!(threads["watchdog"]["alive"], true);

    assert_eq!(debug.run(DebugAction::DisableDebug), "Debug mode disabled");
    assert!(!ext.diagnostics().debug_mode());
    ext.unload();
}

#[test]
fn debug_mode_survives_reload() {
    let dir = tempdir().unwrap();
    let toolkit = HeadlessToolkit::recording();
    {
        let ext = extension(dir.path(), &toolkit);
        assert!(ext.debug_toggle_node().toggle(true).starts_with("Persistent debug ON"));
        ext.unload();
    }
    let ext = extension(dir.path(), &toolkit);
    assert!(ext.diagnostics().debug_mode());
    ext.unload();
}

#[test]
fn restore_node_reports_outcome() {
    let dir = tempdir().unwrap();
    let toolkit = HeadlessToolkit::recording();
    let recorder = toolkit.recorder();
    let ext = extension(dir.path(), &toolkit);
    let restore = ext.restore_window_node();

    assert!(restore.restore(0).contains("could not be restored"));
    ext.supervisor().present(0, solid(BLACK), None);
    assert!(wait_until(|| ext.supervisor().current_entry().is_some_and(|e| e.has_controller())));
    recorder.push_event(watch_point::preview::WindowEvent::CloseRequested);
    assert!(wait_until(|| ext.supervisor().current_entry().is_some_and(|e| e.is_minimized())));
    assert_eq!(restore.restore(0), "Window 0 restored");
    assert!(wait_until(|| recorder.restore_count() == 1));
    ext.unload();
}

#[test]
fn list_cycler_node_cycles_and_resets() {
    let dir = tempdir().unwrap();
    let toolkit = HeadlessToolkit::recording();
    let ext = extension(dir.path(), &toolkit);
    let cycler = ext.list_cycler_node();

    let values: Vec<i64> = (0..4)
        .map(|_| cycler.get_next_value("n1", "10, 20, 30", CycleMode::IncrementWrap, 0, 0).0)
        .collect();
    assert_eq!(values, vec![10, 20, 30, 10]);
    assert_eq!(
        cycler.get_next_value("n2", "7,8,9", CycleMode::Fixed, 4, 0),
        (8, "8".to_string())
    );
    assert!(dir.path().join("data").join("list_state.json").exists());

    assert_eq!(cycler.reset("n1"), ResetStatus::Success);
    assert_eq!(cycler.reset("n1"), ResetStatus::NotFound);
    assert_eq!(cycler.get_next_value("n1", "10, 20, 30", CycleMode::IncrementWrap, 0, 0).0, 10);
    ext.unload();
}

#[test]
fn settings_written_by_a_window_are_reloaded() {
    let dir = tempdir().unwrap();
    let toolkit = HeadlessToolkit::recording();
    {
        let ext = extension(dir.path(), &toolkit);
        ext.supervisor().present(1, solid(BLACK), None);
        assert!(wait_until(|| ext.supervisor().current_entry().is_some_and(|e| e.has_controller())));
        ext.unload();
    }
    let ext = extension(dir.path(), &toolkit);
    assert_eq!(ext.settings().snapshot().last_position(), Some((1970, 50)));
    ext.unload();
}
