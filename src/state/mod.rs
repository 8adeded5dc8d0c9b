//! `AppState`: the single in-process source of truth for running agents,
//! history, the queue snapshot, planner status, pause flag, and budget
//! spend. All mutators serialize on one lock; readers return defensive
//! copies.

use crate::constants::{ACTIVITY_RING_CAPACITY, HISTORY_CAPACITY};
use crate::error::{AutopilotError, Result};
use crate::models::{
    Agent, AgentKind, AgentStatus, BudgetSnapshot, BudgetState, HistoryEntry, PlannerResult,
    PlannerStatus, QueueSnapshot,
};
use crate::persistence::SledStateStore;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Outcome fields for `complete_agent`, mirroring the AgentRunner's result.
pub struct CompletionOutcome {
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub num_turns: u32,
    pub error: Option<String>,
}

struct Inner {
    running: HashMap<String, Agent>,
    cancel_handles: HashMap<String, CancellationToken>,
    history: Vec<HistoryEntry>,
    queue: QueueSnapshot,
    planner: PlannerStatus,
    paused: bool,
    budget: BudgetState,
    fixer_attempts: HashMap<String, (u32, i64)>,
    handled_review_ids: HashSet<String>,
}

/// Process-wide shared state. Cheap to clone (wraps an `Arc`).
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Mutex<Inner>>,
    store: Option<Arc<SledStateStore>>,
}

impl AppState {
    pub fn new(store: Option<Arc<SledStateStore>>) -> Self {
        let (history, budget) = if let Some(store) = &store {
            let history = store.load_history().unwrap_or_default();
            let budget = store.load_budget().unwrap_or_default().unwrap_or_default();
            (history, budget)
        } else {
            (Vec::new(), BudgetState::default())
        };

        Self {
            inner: Arc::new(Mutex::new(Inner {
                running: HashMap::new(),
                cancel_handles: HashMap::new(),
                history,
                queue: QueueSnapshot::default(),
                planner: PlannerStatus::default(),
                paused: false,
                budget,
                fixer_attempts: HashMap::new(),
                handled_review_ids: HashSet::new(),
            })),
            store,
        }
    }

    /// Register a new running agent. Fails if the agentId already exists.
    pub async fn add_agent(
        &self,
        agent_id: String,
        kind: AgentKind,
        issue_identifier: String,
        issue_uuid: Option<String>,
        title: String,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.running.contains_key(&agent_id) {
            return Err(AutopilotError::DuplicateAgentId(agent_id));
        }
        let started_at_ms = Utc::now().timestamp_millis();
        inner.running.insert(
            agent_id.clone(),
            Agent::new(agent_id, kind, issue_identifier, issue_uuid, title, started_at_ms),
        );
        Ok(())
    }

    /// Attach a cancellation handle to an agent; last call wins.
    pub async fn register_cancel(&self, agent_id: &str, handle: CancellationToken) {
        let mut inner = self.inner.lock().await;
        inner.cancel_handles.insert(agent_id.to_string(), handle);
    }

    /// Append an activity entry. No-op if the agent has already terminated.
    pub async fn add_activity(&self, agent_id: &str, entry: crate::models::ActivityEntry) {
        let mut inner = self.inner.lock().await;
        if let Some(agent) = inner.running.get_mut(agent_id) {
            agent.push_activity(entry);
        }
    }

    /// Move an agent from running to history, release its cancel handle,
    /// and record spend. Idempotent: a second call for the same id is a
    /// no-op.
    pub async fn complete_agent(
        &self,
        agent_id: &str,
        status: AgentStatus,
        outcome: CompletionOutcome,
    ) {
        let entry = {
            let mut inner = self.inner.lock().await;
            let Some(mut agent) = inner.running.remove(agent_id) else {
                return;
            };
            inner.cancel_handles.remove(agent_id);
            agent.status = status;

            if outcome.cost_usd > 0.0 {
                inner.budget.daily_spend_usd += outcome.cost_usd;
                inner.budget.monthly_spend_usd += outcome.cost_usd;
            }

            let entry = HistoryEntry {
                agent_id: agent.agent_id.clone(),
                kind: agent.kind,
                issue_identifier: agent.issue_identifier.clone(),
                issue_uuid: agent.issue_uuid.clone(),
                title: agent.title.clone(),
                status,
                duration_ms: outcome.duration_ms,
                cost_usd: outcome.cost_usd,
                num_turns: outcome.num_turns,
                error: outcome.error,
                terminated_at_ms: Utc::now().timestamp_millis(),
            };
            inner.history.push(entry.clone());
            if inner.history.len() > HISTORY_CAPACITY {
                inner.history.remove(0);
            }
            entry
        };

        if let Some(store) = self.store.clone() {
            let budget = self.get_budget_state().await;
            tokio::spawn(async move {
                if let Err(e) = store.append_history(&entry, HISTORY_CAPACITY) {
                    tracing::warn!("failed to persist history entry: {e}");
                }
                if let Err(e) = store.save_budget(&budget) {
                    tracing::warn!("failed to persist budget state: {e}");
                }
            });
        }
    }

    /// Fire an agent's cancel handle, if one is registered. Returns whether
    /// a handle existed; does not itself mutate agent status.
    pub async fn cancel_agent(&self, agent_id: &str) -> bool {
        let inner = self.inner.lock().await;
        match inner.cancel_handles.get(agent_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn is_paused(&self) -> bool {
        self.inner.lock().await.paused
    }

    pub async fn toggle_pause(&self) -> bool {
        let mut inner = self.inner.lock().await;
        inner.paused = !inner.paused;
        inner.paused
    }

    pub async fn set_paused(&self, paused: bool) {
        self.inner.lock().await.paused = paused;
    }

    pub async fn get_running_count(&self) -> usize {
        self.inner.lock().await.running.len()
    }

    pub async fn get_running_agents(&self) -> Vec<Agent> {
        self.inner.lock().await.running.values().cloned().collect()
    }

    pub async fn get_agent(&self, agent_id: &str) -> Option<Agent> {
        self.inner.lock().await.running.get(agent_id).cloned()
    }

    pub async fn has_running_issue(&self, issue_uuid: &str) -> bool {
        self.inner
            .lock()
            .await
            .running
            .values()
            .any(|a| a.issue_uuid.as_deref() == Some(issue_uuid))
    }

    /// Active fixers for a given issue, derived from the running set rather
    /// than tracked separately — a fixer agent's own presence *is* the dedup
    /// guard.
    pub async fn has_active_fixer(&self, issue_uuid: &str) -> bool {
        self.inner.lock().await.running.values().any(|a| {
            a.kind == AgentKind::Fixer && a.issue_uuid.as_deref() == Some(issue_uuid)
        })
    }

    pub async fn get_history(&self) -> Vec<HistoryEntry> {
        self.inner.lock().await.history.clone()
    }

    pub async fn get_queue_snapshot(&self) -> QueueSnapshot {
        self.inner.lock().await.queue
    }

    pub async fn update_queue(&self, ready_count: u32, triage_count: u32, threshold: u32) {
        let mut inner = self.inner.lock().await;
        inner.queue = QueueSnapshot {
            ready_count,
            triage_count,
            threshold,
            last_checked_ms: Utc::now().timestamp_millis(),
        };
    }

    pub async fn get_planner_status(&self) -> PlannerStatus {
        self.inner.lock().await.planner
    }

    pub async fn set_planner_running(&self, running: bool, threshold: u32) {
        let mut inner = self.inner.lock().await;
        inner.planner.running = running;
        inner.planner.threshold = threshold;
    }

    pub async fn set_planner_result(&self, result: PlannerResult, ready_count: u32) {
        let mut inner = self.inner.lock().await;
        inner.planner.running = false;
        inner.planner.last_run_at_ms = Some(Utc::now().timestamp_millis());
        inner.planner.last_result = Some(result);
        inner.planner.last_ready_count = ready_count;
    }

    async fn get_budget_state(&self) -> BudgetState {
        self.inner.lock().await.budget
    }

    pub async fn get_budget_snapshot(&self, config: &crate::config::BudgetConfig) -> BudgetSnapshot {
        let budget = self.inner.lock().await.budget;
        let exhausted = (config.daily_limit_usd > 0.0 && budget.daily_spend_usd >= config.daily_limit_usd)
            || (config.monthly_limit_usd > 0.0 && budget.monthly_spend_usd >= config.monthly_limit_usd);
        BudgetSnapshot {
            daily_spend_usd: budget.daily_spend_usd,
            monthly_spend_usd: budget.monthly_spend_usd,
            daily_limit_usd: config.daily_limit_usd,
            monthly_limit_usd: config.monthly_limit_usd,
            per_agent_limit_usd: config.per_agent_limit_usd,
            warn_pct: config.warn_at_percent,
            exhausted,
        }
    }

    pub async fn is_budget_exhausted(&self, config: &crate::config::BudgetConfig) -> bool {
        self.get_budget_snapshot(config).await.exhausted
    }

    /// Per-issue fixer dedup/retry bookkeeping: returns the attempt count
    /// for `issue_uuid` *before* incrementing, and marks the issue as seen
    /// this tick.
    pub async fn fixer_attempt_count(&self, issue_uuid: &str) -> u32 {
        let inner = self.inner.lock().await;
        inner.fixer_attempts.get(issue_uuid).map(|(c, _)| *c).unwrap_or(0)
    }

    pub async fn record_fixer_attempt(&self, issue_uuid: &str) {
        let mut inner = self.inner.lock().await;
        let now = Utc::now().timestamp_millis();
        inner
            .fixer_attempts
            .entry(issue_uuid.to_string())
            .and_modify(|(c, seen)| {
                *c += 1;
                *seen = now;
            })
            .or_insert((1, now));
    }

    pub async fn mark_issue_seen_in_review(&self, issue_uuid: &str) {
        let mut inner = self.inner.lock().await;
        let now = Utc::now().timestamp_millis();
        if let Some(entry) = inner.fixer_attempts.get_mut(issue_uuid) {
            entry.1 = now;
        }
    }

    /// Prune fixer attempt counters for issues not observed in InReview this
    /// tick — a one-tick absence resets the counter entirely.
    pub async fn prune_fixer_attempts(&self, seen_issue_uuids: &HashSet<String>) {
        let mut inner = self.inner.lock().await;
        inner
            .fixer_attempts
            .retain(|issue_uuid, _| seen_issue_uuids.contains(issue_uuid));
    }

    pub async fn is_review_handled(&self, review_id: &str) -> bool {
        self.inner.lock().await.handled_review_ids.contains(review_id)
    }

    pub async fn mark_review_handled(&self, review_id: &str) {
        self.inner
            .lock()
            .await
            .handled_review_ids
            .insert(review_id.to_string());
    }

    /// Snapshot of running agents plus their cancel handles, used by
    /// shutdown to fire every handle and await drain.
    pub async fn snapshot_for_shutdown(&self) -> Vec<(Agent, Option<CancellationToken>)> {
        let inner = self.inner.lock().await;
        inner
            .running
            .values()
            .map(|a| (a.clone(), inner.cancel_handles.get(&a.agent_id).cloned()))
            .collect()
    }
}

#[allow(dead_code)]
const _ASSERT_RING_CAP: usize = ACTIVITY_RING_CAPACITY;

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        AppState::new(None)
    }

    #[tokio::test]
    async fn add_agent_rejects_duplicates() {
        let state = state();
        state
            .add_agent("a1".into(), AgentKind::Executor, "ENG-1".into(), Some("u1".into()), "t".into())
            .await
            .unwrap();
        let err = state
            .add_agent("a1".into(), AgentKind::Executor, "ENG-1".into(), Some("u1".into()), "t".into())
            .await
            .unwrap_err();
        assert!(matches!(err, AutopilotError::DuplicateAgentId(_)));
    }

    #[tokio::test]
    async fn complete_agent_is_idempotent() {
        let state = state();
        state
            .add_agent("a1".into(), AgentKind::Executor, "ENG-1".into(), Some("u1".into()), "t".into())
            .await
            .unwrap();
        state
            .complete_agent(
                "a1",
                AgentStatus::Completed,
                CompletionOutcome {
                    cost_usd: 1.0,
                    duration_ms: 10,
                    num_turns: 1,
                    error: None,
                },
            )
            .await;
        assert_eq!(state.get_history().await.len(), 1);
        state
            .complete_agent(
                "a1",
                AgentStatus::Completed,
                CompletionOutcome {
                    cost_usd: 1.0,
                    duration_ms: 10,
                    num_turns: 1,
                    error: None,
                },
            )
            .await;
        assert_eq!(state.get_history().await.len(), 1);
    }

    #[tokio::test]
    async fn pause_toggle_is_idempotent_over_two_calls() {
        let state = state();
        let original = state.is_paused().await;
        state.toggle_pause().await;
        state.toggle_pause().await;
        assert_eq!(state.is_paused().await, original);
    }

    #[tokio::test]
    async fn per_issue_singleton_detected_via_has_running_issue() {
        let state = state();
        state
            .add_agent("a1".into(), AgentKind::Executor, "ENG-1".into(), Some("u1".into()), "t".into())
            .await
            .unwrap();
        assert!(state.has_running_issue("u1").await);
        assert!(!state.has_running_issue("u2").await);
    }

    #[tokio::test]
    async fn fixer_attempt_counter_resets_on_absence() {
        let state = state();
        state.record_fixer_attempt("u1").await;
        state.record_fixer_attempt("u1").await;
        assert_eq!(state.fixer_attempt_count("u1").await, 2);

        state.prune_fixer_attempts(&HashSet::new()).await;
        assert_eq!(state.fixer_attempt_count("u1").await, 0);
    }

    #[tokio::test]
    async fn budget_exhausted_when_spend_meets_limit() {
        let state = state();
        state
            .add_agent("a1".into(), AgentKind::Executor, "ENG-1".into(), None, "t".into())
            .await
            .unwrap();
        state
            .complete_agent(
                "a1",
                AgentStatus::Completed,
                CompletionOutcome {
                    cost_usd: 10.0,
                    duration_ms: 10,
                    num_turns: 1,
                    error: None,
                },
            )
            .await;
        let config = crate::config::BudgetConfig {
            daily_limit_usd: 5.0,
            monthly_limit_usd: 0.0,
            per_agent_limit_usd: 0.0,
            warn_at_percent: 80.0,
        };
        assert!(state.is_budget_exhausted(&config).await);
    }
}
