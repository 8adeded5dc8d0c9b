//! Core data model: issues as seen from the Tracker, in-flight agents, their
//! activity streams, and the aggregate snapshots the dashboard reads.

use crate::constants::ACTIVITY_RING_CAPACITY;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Lifecycle state of an issue as tracked externally. Mirrors the Tracker's
/// own state machine; the `linear.states.*` config keys map human state
/// names onto these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueState {
    Triage,
    Ready,
    InProgress,
    InReview,
    Done,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    None,
    Low,
    Medium,
    High,
    Urgent,
}

/// An issue as fetched from the Tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Stable Tracker-internal identifier (UUID-shaped, opaque).
    pub uuid: String,
    /// Human-facing identifier, e.g. "ENG-123".
    pub identifier: String,
    pub title: String,
    pub state: IssueState,
    pub priority: Priority,
    /// URL of an attached pull request, once the executor has pushed one.
    pub pr_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// The kind of work an in-flight agent is performing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentKind {
    Executor,
    Fixer,
    ReviewResponder,
    Planner,
    Auditor,
}

/// Terminal status an agent can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    Running,
    Completed,
    Failed,
    TimedOut,
}

/// Kind of a single activity-stream entry emitted by a running agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    ToolUse,
    Text,
    Result,
    Error,
    Status,
    Subagent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: ActivityKind,
    pub summary: String,
    pub detail: Option<String>,
}

/// An in-flight (or just-terminated) agent, owned exclusively by `AppState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub kind: AgentKind,
    /// Empty for planner agents, which are not tied to a single issue.
    pub issue_identifier: String,
    pub issue_uuid: Option<String>,
    pub title: String,
    pub started_at_ms: i64,
    pub status: AgentStatus,
    /// Bounded, drop-oldest ring of activity entries.
    pub activity: VecDeque<ActivityEntry>,
}

impl Agent {
    pub fn new(
        agent_id: String,
        kind: AgentKind,
        issue_identifier: String,
        issue_uuid: Option<String>,
        title: String,
        started_at_ms: i64,
    ) -> Self {
        Self {
            agent_id,
            kind,
            issue_identifier,
            issue_uuid,
            title,
            started_at_ms,
            status: AgentStatus::Running,
            activity: VecDeque::with_capacity(ACTIVITY_RING_CAPACITY.min(64)),
        }
    }

    /// Append an activity entry, evicting the oldest if the ring is full.
    /// O(1) amortized; this is the hot path during streaming.
    pub fn push_activity(&mut self, entry: ActivityEntry) {
        if self.activity.len() >= ACTIVITY_RING_CAPACITY {
            self.activity.pop_front();
        }
        self.activity.push_back(entry);
    }
}

/// Snapshot of a terminated agent, captured at the moment it completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub agent_id: String,
    pub kind: AgentKind,
    pub issue_identifier: String,
    pub issue_uuid: Option<String>,
    pub title: String,
    pub status: AgentStatus,
    pub duration_ms: u64,
    pub cost_usd: f64,
    pub num_turns: u32,
    pub error: Option<String>,
    pub terminated_at_ms: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub ready_count: u32,
    pub triage_count: u32,
    pub threshold: u32,
    pub last_checked_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlannerResult {
    Completed,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PlannerStatus {
    pub running: bool,
    pub last_run_at_ms: Option<i64>,
    pub last_result: Option<PlannerResult>,
    pub last_ready_count: u32,
    pub threshold: u32,
}

/// Rolling spend windows plus the configured limits needed to derive
/// `exhausted` and the dashboard's percentage-used display.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BudgetState {
    pub daily_spend_usd: f64,
    pub monthly_spend_usd: f64,
    pub daily_window_start_ms: i64,
    pub monthly_window_start_ms: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub daily_spend_usd: f64,
    pub monthly_spend_usd: f64,
    pub daily_limit_usd: f64,
    pub monthly_limit_usd: f64,
    pub per_agent_limit_usd: f64,
    pub warn_pct: f64,
    pub exhausted: bool,
}

/// Per-issue fixer dedup/retry bookkeeping. Reset when the issue is
/// observed absent from `InReview` for one full tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixerAttempt {
    pub attempts: u32,
    pub last_seen_in_review_ms: i64,
}

/// What the Monitor decided to do about an `InReview` issue, per the
/// first-match classification rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewClassification {
    CiFailure,
    MergeConflict,
    ReviewResponse,
    NoAction,
}

/// Derived CI status for a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiStatus {
    Success,
    Failure,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRun {
    pub name: String,
    pub completed: bool,
    pub conclusion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Review {
    pub id: String,
    pub state: String,
}

/// PR status as reported by the Host.
#[derive(Debug, Clone)]
pub struct PrStatus {
    pub merged: bool,
    pub mergeable: Option<bool>,
    pub check_runs: Vec<CheckRun>,
    pub reviews: Vec<Review>,
    pub branch: String,
    pub head_sha: String,
}
