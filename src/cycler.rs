use anyhow::{anyhow, Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

pub const LIST_STATE_FILE_NAME: &str = "list_state.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CycleMode {
    IncrementWrap,
    RandomShuffled,
    Fixed,
}

impl FromStr for CycleMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "increment-wrap" => Ok(CycleMode::IncrementWrap),
            "random-shuffled" => Ok(CycleMode::RandomShuffled),
            "fixed" => Ok(CycleMode::Fixed),
            other => Err(anyhow!("unknown cycle mode {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCycleState {
    #[serde(default = "no_index")]
    pub last_idx: i64,
    #[serde(default)]
    pub shuffled_list: Vec<usize>,
    /// Number of bags drawn so far; mixed into the seed so each bag differs.
    #[serde(default)]
    pub generation: u64,
}

fn no_index() -> i64 {
    -1
}

impl Default for NodeCycleState {
    fn default() -> Self {
        Self {
            last_idx: no_index(),
            shuffled_list: Vec::new(),
            generation: 0,
        }
    }
}

/// Picks the next value from a comma separated list, remembering per-node
/// position across runs in a JSON file.
#[derive(Debug)]
pub struct ListCycler {
    path: PathBuf,
    io: Mutex<()>,
}

impl ListCycler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn next_value(&self, node_id: &str, list: &str, mode: CycleMode, fixed_index: usize, seed: u64) -> i64 {
        let _io = self.io.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let items = parse_items(list);
        let mut states = load_states(&self.path);
        let state = states.entry(node_id.to_string()).or_default();

        let idx = match mode {
            CycleMode::Fixed => fixed_index % items.len(),
            CycleMode::IncrementWrap => {
                let next = state.last_idx.saturating_add(1).max(0) as usize;
                next % items.len()
            }
            CycleMode::RandomShuffled => {
                let stale = state.shuffled_list.iter().any(|&i| i >= items.len());
                if state.shuffled_list.is_empty() || stale {
                    let mut bag: Vec<usize> = (0..items.len()).collect();
                    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(state.generation));
                    bag.shuffle(&mut rng);
                    state.generation = state.generation.wrapping_add(1);
                    tracing::debug!(node_id, ?bag, "list cycler reshuffled");
                    state.shuffled_list = bag;
                }
                state.shuffled_list.remove(0)
            }
        };
        state.last_idx = idx as i64;
        let value = items[idx];

        if let Err(err) = save_states(&self.path, &states) {
            tracing::warn!(?err, "failed to persist list cycler state");
        }
        tracing::debug!(node_id, ?mode, value, "list cycler produced value");
        value
    }

    pub fn state_of(&self, node_id: &str) -> Option<NodeCycleState> {
        let _io = self.io.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        load_states(&self.path).remove(node_id)
    }

    /// Forgets `node_id`'s position. Returns false if it had none.
    pub fn reset(&self, node_id: &str) -> bool {
        let _io = self.io.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut states = load_states(&self.path);
        if states.remove(node_id).is_none() {
            return false;
        }
        if let Err(err) = save_states(&self.path, &states) {
            tracing::warn!(?err, "failed to persist list cycler reset");
        }
        true
    }
}

/// Integers from `"0, 1,2"`. Tokens that are not integers are skipped; an
/// empty result becomes `[0]`.
pub fn parse_items(list: &str) -> Vec<i64> {
    let items: Vec<i64> = list
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| match token.parse::<i64>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(token, "skipping non-integer list item");
                None
            }
        })
        .collect();
    if items.is_empty() {
        vec![0]
    } else {
        items
    }
}

fn load_states(path: &Path) -> BTreeMap<String, NodeCycleState> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return BTreeMap::new(),
    };
    serde_json::from_str(&content).unwrap_or_else(|err| {
        tracing::warn!(?err, path = %path.display(), "list cycler state unreadable; starting fresh");
        BTreeMap::new()
    })
}

fn save_states(path: &Path, states: &BTreeMap<String, NodeCycleState>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create list state folder {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(states).context("serialize list cycler state")?;
    std::fs::write(path, json).with_context(|| format!("write list state {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycler() -> (tempfile::TempDir, ListCycler) {
        let dir = tempfile::tempdir().expect("temp dir");
        let cycler = ListCycler::new(dir.path().join("data").join(LIST_STATE_FILE_NAME));
        (dir, cycler)
    }

    #[test]
    fn parsing_skips_bad_tokens_and_defaults_to_zero() {
        assert_eq!(parse_items("3, 1,,x, -2"), vec![3, 1, -2]);
        assert_eq!(parse_items(" , nope"), vec![0]);
        assert_eq!(parse_items(""), vec![0]);
    }

    #[test]
    fn increment_wraps_and_persists() {
        let (_dir, cycler) = cycler();
        let values: Vec<i64> = (0..4)
            .map(|_| cycler.next_value("7", "10,20,30", CycleMode::IncrementWrap, 0, 0))
            .collect();
        assert_eq!(values, vec![10, 20, 30, 10]);

        let reopened = ListCycler::new(cycler.path());
        assert_eq!(reopened.next_value("7", "10,20,30", CycleMode::IncrementWrap, 0, 0), 20);
    }

    #[test]
    fn fixed_index_wraps_around_list_length() {
        let (_dir, cycler) = cycler();
        assert_eq!(cycler.next_value("n", "5,6,7", CycleMode::Fixed, 4, 0), 6);
        assert_eq!(cycler.state_of("n").map(|s| s.last_idx), Some(1));
    }

    #[test]
    fn shuffled_bag_visits_every_item_once_per_round() {
        let (_dir, cycler) = cycler();
        let mut round: Vec<i64> = (0..5)
            .map(|_| cycler.next_value("s", "0,1,2,3,4", CycleMode::RandomShuffled, 0, 42))
            .collect();
        round.sort_unstable();
        assert_eq!(round, vec![0, 1, 2, 3, 4]);
        assert_eq!(cycler.state_of("s").map(|s| s.generation), Some(1));
    }

    #[test]
    fn same_seed_reproduces_the_same_order() {
        let (_a, first) = cycler();
        let (_b, second) = cycler();
        let draw = |c: &ListCycler| -> Vec<i64> {
            (0..6)
                .map(|_| c.next_value("s", "0,1,2,3,4,5", CycleMode::RandomShuffled, 0, 9))
                .collect()
        };
        assert_eq!(draw(&first), draw(&second));
    }

    #[test]
    fn shrinking_the_list_regenerates_the_bag() {
        let (_dir, cycler) = cycler();
        cycler.next_value("s", "0,1,2,3,4,5,6,7", CycleMode::RandomShuffled, 0, 1);
        for _ in 0..4 {
            let value = cycler.next_value("s", "0,1", CycleMode::RandomShuffled, 0, 1);
            assert!(value == 0 || value == 1);
        }
    }

    #[test]
    fn reset_reports_whether_state_existed() {
        let (_dir, cycler) = cycler();
        assert!(!cycler.reset("missing"));
        cycler.next_value("n", "1,2", CycleMode::IncrementWrap, 0, 0);
        assert!(cycler.reset("n"));
        assert_eq!(cycler.state_of("n"), None);
        assert_eq!(cycler.next_value("n", "1,2", CycleMode::IncrementWrap, 0, 0), 1);
    }

    #[test]
    fn modes_parse_from_host_labels() {
        assert_eq!("random-shuffled".parse::<CycleMode>().ok(), Some(CycleMode::RandomShuffled));
        assert!("sideways".parse::<CycleMode>().is_err());
    }
}
