#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewLifecycle {
    Absent,
    Starting,
    Running,
    Minimized,
    Closing,
}

impl PreviewLifecycle {
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Minimized)
    }
}

pub fn can_transition(from: PreviewLifecycle, to: PreviewLifecycle) -> bool {
    matches!(
        (from, to),
        (PreviewLifecycle::Absent, PreviewLifecycle::Starting)
            | (PreviewLifecycle::Starting, PreviewLifecycle::Running)
            | (PreviewLifecycle::Starting, PreviewLifecycle::Closing)
            | (PreviewLifecycle::Running, PreviewLifecycle::Minimized)
            | (PreviewLifecycle::Minimized, PreviewLifecycle::Running)
            | (PreviewLifecycle::Running, PreviewLifecycle::Closing)
            | (PreviewLifecycle::Minimized, PreviewLifecycle::Closing)
            | (PreviewLifecycle::Closing, PreviewLifecycle::Absent)
    ) || from == to
}
