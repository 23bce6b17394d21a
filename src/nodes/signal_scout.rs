use crate::preview::supervisor::WindowSupervisor;

/// Mirrors a text value into whatever preview window is open, passing the
/// value through unchanged.
#[derive(Clone)]
pub struct SignalScout {
    supervisor: WindowSupervisor,
}

impl SignalScout {
    pub fn new(supervisor: WindowSupervisor) -> Self {
        Self { supervisor }
    }

    pub fn scout_signal(&self, text: &str) -> String {
        if !self.supervisor.broadcast_text(text) {
            tracing::debug!("no preview window to receive signal text");
        }
        text.to_string()
    }
}
