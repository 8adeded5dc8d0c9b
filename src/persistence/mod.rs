//! Embedded persistence for History and Budget, so an operator restart
//! doesn't lose the audit trail. Backed by `sled`; mirrors the in-memory
//! ring rather than acting as a separate source of truth.

use crate::error::Result;
use crate::models::{BudgetState, HistoryEntry};
use std::path::Path;

const BUDGET_KEY: &[u8] = b"budget";

pub struct SledStateStore {
    history: sled::Tree,
    budget: sled::Tree,
}

impl SledStateStore {
    pub fn open(project_path: &Path) -> Result<Self> {
        let dir = project_path.join(crate::constants::STATE_STORE_DIR);
        std::fs::create_dir_all(&dir)?;
        let db = sled::open(dir.join("state.sled"))?;
        let history = db.open_tree("history")?;
        let budget = db.open_tree("budget")?;
        Ok(Self { history, budget })
    }

    #[cfg(test)]
    pub fn open_temp() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        let history = db.open_tree("history")?;
        let budget = db.open_tree("budget")?;
        Ok(Self { history, budget })
    }

    /// Append a history entry keyed by a monotonically increasing sequence
    /// number, trimming the oldest once the cap is exceeded.
    pub fn append_history(&self, entry: &HistoryEntry, cap: usize) -> Result<()> {
        let seq = self.history.generate_id()?;
        let key = seq.to_be_bytes();
        let value = serde_json::to_vec(entry)?;
        self.history.insert(key, value)?;

        while self.history.len() > cap {
            if let Some((oldest_key, _)) = self.history.iter().next().transpose()? {
                self.history.remove(oldest_key)?;
            } else {
                break;
            }
        }
        Ok(())
    }

    pub fn load_history(&self) -> Result<Vec<HistoryEntry>> {
        let mut out = Vec::new();
        for item in self.history.iter() {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    pub fn save_budget(&self, state: &BudgetState) -> Result<()> {
        let value = serde_json::to_vec(state)?;
        self.budget.insert(BUDGET_KEY, value)?;
        Ok(())
    }

    pub fn load_budget(&self) -> Result<Option<BudgetState>> {
        match self.budget.get(BUDGET_KEY)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentKind, AgentStatus};

    fn sample_entry(agent_id: &str) -> HistoryEntry {
        HistoryEntry {
            agent_id: agent_id.to_string(),
            kind: AgentKind::Executor,
            issue_identifier: "ENG-1".to_string(),
            issue_uuid: Some("uuid-1".to_string()),
            title: "fix bug".to_string(),
            status: AgentStatus::Completed,
            duration_ms: 1000,
            cost_usd: 0.1,
            num_turns: 2,
            error: None,
            terminated_at_ms: 1,
        }
    }

    #[test]
    fn round_trips_history() {
        let store = SledStateStore::open_temp().unwrap();
        store.append_history(&sample_entry("a"), 200).unwrap();
        store.append_history(&sample_entry("b"), 200).unwrap();
        let loaded = store.load_history().unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn caps_history_length() {
        let store = SledStateStore::open_temp().unwrap();
        for i in 0..10 {
            store
                .append_history(&sample_entry(&format!("agent-{i}")), 5)
                .unwrap();
        }
        let loaded = store.load_history().unwrap();
        assert!(loaded.len() <= 5);
    }

    #[test]
    fn round_trips_budget() {
        let store = SledStateStore::open_temp().unwrap();
        assert!(store.load_budget().unwrap().is_none());
        let state = BudgetState {
            daily_spend_usd: 4.5,
            monthly_spend_usd: 10.0,
            daily_window_start_ms: 0,
            monthly_window_start_ms: 0,
        };
        store.save_budget(&state).unwrap();
        let loaded = store.load_budget().unwrap().unwrap();
        assert_eq!(loaded.daily_spend_usd, 4.5);
    }
}
