use crate::cycler::{CycleMode, ListCycler};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetStatus {
    Success,
    NotFound,
}

#[derive(Clone)]
pub struct ListCyclerNode {
    cycler: Arc<ListCycler>,
}

impl ListCyclerNode {
    pub fn new(cycler: Arc<ListCycler>) -> Self {
        Self { cycler }
    }

    /// Returns the chosen value and its string form.
    pub fn get_next_value(
        &self,
        node_id: &str,
        list: &str,
        mode: CycleMode,
        fixed_index: usize,
        seed: u64,
    ) -> (i64, String) {
        let value = self.cycler.next_value(node_id, list, mode, fixed_index, seed);
        (value, value.to_string())
    }

    pub fn reset(&self, node_id: &str) -> ResetStatus {
        if self.cycler.reset(node_id) {
            ResetStatus::Success
        } else {
            ResetStatus::NotFound
        }
    }
}
