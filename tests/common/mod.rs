#![allow(dead_code)]

use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};
use watch_point::preview::display::{DisplayInfo, FixedDisplays};
use watch_point::preview::{HeadlessToolkit, PreviewFrame, SupervisorConfig, SupervisorParts, WindowSupervisor};
use watch_point::settings::{PreviewSettings, SettingsStore};

pub const BLACK: [u8; 4] = [0, 0, 0, 255];
pub const WHITE: [u8; 4] = [255, 255, 255, 255];

pub fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        join_timeout: Duration::from_secs(2),
        watchdog_interval: Duration::from_millis(20),
        close_deadline: Duration::from_millis(500),
        poll_interval: Duration::from_millis(5),
        teardown_attempts: 3,
        teardown_backoff: Duration::from_millis(1),
        watchdog_shutdown_wait: Duration::from_millis(500),
    }
}

pub fn two_monitors() -> Vec<DisplayInfo> {
    vec![
        DisplayInfo {
            index: 0,
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
        },
        DisplayInfo {
            index: 1,
            x: 1920,
            y: 0,
            width: 1920,
            height: 1080,
        },
    ]
}

pub fn supervisor_with(toolkit: &HeadlessToolkit, config: SupervisorConfig) -> WindowSupervisor {
    WindowSupervisor::start(SupervisorParts {
        config,
        settings: Arc::new(SettingsStore::in_memory(PreviewSettings::default())),
        toolkit: Arc::new(toolkit.clone()),
        displays: Arc::new(FixedDisplays(two_monitors())),
        diagnostics: None,
    })
}

pub fn supervisor(toolkit: &HeadlessToolkit) -> WindowSupervisor {
    supervisor_with(toolkit, fast_config())
}

pub fn solid(rgba: [u8; 4]) -> PreviewFrame {
    PreviewFrame::solid(4, 4, rgba)
}

pub fn color_of(frame: &PreviewFrame) -> [u8; 4] {
    frame.image().get_pixel(0, 0).0
}

/// Polls `check` until it holds or five seconds pass.
pub fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(5));
    }
    check()
}

pub fn wait_for_controller(sup: &WindowSupervisor) {
    assert!(
        wait_until(|| sup.current_entry().is_some_and(|e| e.has_controller())),
        "preview window never became ready"
    );
}
