use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct DisplayInfo {
    pub index: usize,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Stand-in screen used for proportional sizing when nothing can be
/// enumerated.
pub const SYNTHETIC_DISPLAY: DisplayInfo = DisplayInfo {
    index: 0,
    x: 0,
    y: 0,
    width: 1920,
    height: 1080,
};

const SYNTHETIC_SELECTOR_LABEL: &str = "Monitor 0 (Default)";

pub trait DisplayEnumerator: Send + Sync {
    fn displays(&self) -> Result<Vec<DisplayInfo>>;
}

/// Monitors reported by the operating system. Platforms without an
/// enumeration backend report none.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDisplays;

impl DisplayEnumerator for SystemDisplays {
    fn displays(&self) -> Result<Vec<DisplayInfo>> {
        #[cfg(windows)]
        {
            Ok(platform::enumerate_monitors())
        }

        #[cfg(not(windows))]
        {
            Ok(Vec::new())
        }
    }
}

/// A fixed monitor layout, for hosts that enumerate displays themselves.
#[derive(Debug, Clone, Default)]
pub struct FixedDisplays(pub Vec<DisplayInfo>);

impl DisplayEnumerator for FixedDisplays {
    fn displays(&self) -> Result<Vec<DisplayInfo>> {
        Ok(self.0.clone())
    }
}

/// Enumerates displays, treating failures as "no displays known".
pub fn available_displays(enumerator: &dyn DisplayEnumerator) -> Vec<DisplayInfo> {
    match enumerator.displays() {
        Ok(displays) => displays,
        Err(err) => {
            tracing::warn!(?err, "display enumeration failed; using default placement");
            Vec::new()
        }
    }
}

/// Labels offered to the host for its monitor drop-down.
pub fn monitor_selector_labels(displays: &[DisplayInfo]) -> Vec<String> {
    if displays.is_empty() {
        return vec![SYNTHETIC_SELECTOR_LABEL.to_string()];
    }
    displays
        .iter()
        .map(|d| format!("Monitor {} ({}x{})", d.index, d.width, d.height))
        .collect()
}

/// Parses `"Monitor <index> (<w>x<h>)"`; anything unparseable selects 0.
pub fn parse_monitor_selector(selector: &str) -> usize {
    selector
        .split_whitespace()
        .nth(1)
        .and_then(|token| token.parse::<usize>().ok())
        .unwrap_or(0)
}

#[cfg(windows)]
mod platform {
    use super::DisplayInfo;
    use std::mem;
    use windows::Win32::Foundation::{BOOL, LPARAM, RECT};
    use windows::Win32::Graphics::Gdi::{
        EnumDisplayMonitors, GetMonitorInfoW, HDC, HMONITOR, MONITORINFOEXW,
    };

    pub(super) fn enumerate_monitors() -> Vec<DisplayInfo> {
        unsafe extern "system" fn monitor_enum_proc(
            monitor: HMONITOR,
            _hdc: HDC,
            _rc_clip: *mut RECT,
            data: LPARAM,
        ) -> BOOL {
            let monitors = unsafe { &mut *(data.0 as *mut Vec<DisplayInfo>) };
            let mut info = MONITORINFOEXW::default();
            info.monitorInfo.cbSize = mem::size_of::<MONITORINFOEXW>() as u32;
            if unsafe { GetMonitorInfoW(monitor, &mut info.monitorInfo as *mut _ as *mut _) }
                .as_bool()
            {
                let rc = info.monitorInfo.rcMonitor;
                monitors.push(DisplayInfo {
                    index: monitors.len(),
                    x: rc.left,
                    y: rc.top,
                    width: rc.right - rc.left,
                    height: rc.bottom - rc.top,
                });
            }
            BOOL(1)
        }

        let mut monitors = Vec::new();
        unsafe {
            let _ = EnumDisplayMonitors(
                HDC::default(),
                None,
                Some(monitor_enum_proc),
                LPARAM(&mut monitors as *mut Vec<DisplayInfo> as isize),
            );
        }
        monitors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_parsing_takes_the_numeric_token() {
        assert_eq!(parse_monitor_selector("Monitor 2 (2560x1440)"), 2);
        assert_eq!(parse_monitor_selector("Monitor 0 (Default)"), 0);
        assert_eq!(parse_monitor_selector("Monitor x (1x1)"), 0);
        assert_eq!(parse_monitor_selector(""), 0);
        assert_eq!(parse_monitor_selector("Monitor"), 0);
    }

    #[test]
    fn labels_fall_back_to_a_single_default_entry() {
        assert_eq!(monitor_selector_labels(&[]), vec!["Monitor 0 (Default)"]);

        let displays = [
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
                width: 2560,
                height: 1440,
            },
        ];
        let labels = monitor_selector_labels(&displays);
        assert_eq!(labels[1], "Monitor 1 (2560x1440)");
        assert_eq!(parse_monitor_selector(&labels[1]), 1);
    }

    struct FailingDisplays;

    impl DisplayEnumerator for FailingDisplays {
        fn displays(&self) -> Result<Vec<DisplayInfo>> {
            anyhow::bail!("no display server")
        }
    }

    #[test]
    fn enumeration_errors_degrade_to_empty_list() {
        assert!(available_displays(&FailingDisplays).is_empty());
    }
}
