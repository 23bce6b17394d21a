use crate::preview::display::{DisplayInfo, SYNTHETIC_DISPLAY};
use crate::preview::toolkit::WindowPlacement;
use crate::settings::PreviewSettings;
use serde::{Deserialize, Serialize};

const MONITOR_INSET: i32 = 50;

/// How the window size is derived. Serialized as the labels shown in the
/// toolbar's size menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SizeMode {
    /// Use the persisted `window_width` x `window_height`.
    #[default]
    Fixed,
    Exact {
        width: u32,
        height: u32,
    },
    HalfVertical,
    HalfHorizontal,
    Quarter,
}

impl SizeMode {
    pub const MENU_PRESETS: [SizeMode; 6] = [
        SizeMode::Exact {
            width: 800,
            height: 600,
        },
        SizeMode::Exact {
            width: 1024,
            height: 768,
        },
        SizeMode::Exact {
            width: 1920,
            height: 1080,
        },
        SizeMode::HalfVertical,
        SizeMode::HalfHorizontal,
        SizeMode::Quarter,
    ];

    pub fn label(self) -> String {
        match self {
            SizeMode::Fixed => "fixed".to_string(),
            SizeMode::Exact { width, height } => format!("{width}x{height}"),
            SizeMode::HalfVertical => "Half Vertical".to_string(),
            SizeMode::HalfHorizontal => "Half Horizontal".to_string(),
            SizeMode::Quarter => "Quarter".to_string(),
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        match label.trim() {
            "fixed" => Some(SizeMode::Fixed),
            "Half Vertical" => Some(SizeMode::HalfVertical),
            "Half Horizontal" => Some(SizeMode::HalfHorizontal),
            "Quarter" => Some(SizeMode::Quarter),
            other => {
                let (w, h) = other.split_once('x')?;
                Some(SizeMode::Exact {
                    width: w.trim().parse().ok()?,
                    height: h.trim().parse().ok()?,
                })
            }
        }
    }

    pub fn size_for(self, screen: &DisplayInfo, fixed_width: u32, fixed_height: u32) -> (u32, u32) {
        let sw = screen.width.max(1) as u32;
        let sh = screen.height.max(1) as u32;
        let (w, h) = match self {
            SizeMode::Fixed => (fixed_width, fixed_height),
            SizeMode::Exact { width, height } => (width, height),
            SizeMode::HalfVertical => (sw / 2, sh.saturating_sub(100)),
            SizeMode::HalfHorizontal => (sw, (sh / 2).saturating_sub(50)),
            SizeMode::Quarter => (sw / 2, sh / 2),
        };
        (w.max(1), h.max(1))
    }
}

impl From<String> for SizeMode {
    fn from(label: String) -> Self {
        SizeMode::parse(&label).unwrap_or_else(|| {
            tracing::warn!(label = %label, "unknown window size mode; using fixed size");
            SizeMode::Fixed
        })
    }
}

impl From<SizeMode> for String {
    fn from(mode: SizeMode) -> Self {
        mode.label()
    }
}

/// Initial size and position for the preview window on `display_index`.
///
/// Position preference: the requested monitor's origin (inset), then the last
/// saved position when enabled, then the toolkit default. An out-of-range
/// index never fails placement.
pub fn resolve_placement(
    settings: &PreviewSettings,
    displays: &[DisplayInfo],
    display_index: usize,
) -> WindowPlacement {
    let monitor = displays.get(display_index);
    if monitor.is_none() && !displays.is_empty() {
        tracing::debug!(
            display_index,
            available = displays.len(),
            "monitor index out of range; falling back"
        );
    }

    let screen = monitor
        .or_else(|| displays.first())
        .copied()
        .unwrap_or(SYNTHETIC_DISPLAY);
    let (width, height) =
        settings
            .window_size_mode
            .size_for(&screen, settings.window_width, settings.window_height);

    let position = match monitor {
        Some(m) => Some((m.x + MONITOR_INSET, m.y + MONITOR_INSET)),
        None if settings.use_last_known_position => settings.last_position(),
        None => None,
    };

    WindowPlacement {
        width,
        height,
        position,
    }
}
