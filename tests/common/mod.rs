//! Shared test doubles for the end-to-end scenarios: an in-memory Tracker,
//! a Host that should never be called in the executor-only scenarios, and
//! an AgentRunner whose completion timing the test controls directly.

use async_trait::async_trait;
use autopilot_core::error::{AutopilotError, Result};
use autopilot_core::host::Host;
use autopilot_core::models::{ActivityEntry, Issue, IssueState, PrStatus, Priority};
use autopilot_core::tracker::{Attachment, Tracker};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

pub struct FakeIssue {
    pub uuid: String,
    pub identifier: String,
    pub title: String,
    pub state: String,
}

impl FakeIssue {
    pub fn new(uuid: &str, identifier: &str, state: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            identifier: identifier.to_string(),
            title: format!("fix {identifier}"),
            state: state.to_string(),
        }
    }
}

fn parse_state(s: &str) -> IssueState {
    match s {
        "Triage" => IssueState::Triage,
        "Ready" => IssueState::Ready,
        "In Progress" => IssueState::InProgress,
        "In Review" => IssueState::InReview,
        "Done" => IssueState::Done,
        "Blocked" => IssueState::Blocked,
        _ => IssueState::Ready,
    }
}

/// An in-memory Tracker double. Transitions mutate the stored issue state
/// and are recorded for assertions.
pub struct FakeTracker {
    issues: Mutex<HashMap<String, FakeIssue>>,
    pub transitions: Mutex<Vec<(String, String, String)>>,
}

impl FakeTracker {
    pub fn new(issues: Vec<FakeIssue>) -> Self {
        let map = issues.into_iter().map(|i| (i.uuid.clone(), i)).collect();
        Self {
            issues: Mutex::new(map),
            transitions: Mutex::new(Vec::new()),
        }
    }

    pub fn state_of(&self, uuid: &str) -> Option<String> {
        self.issues.lock().unwrap().get(uuid).map(|i| i.state.clone())
    }
}

#[async_trait]
impl Tracker for FakeTracker {
    async fn list_issues(&self, _team: &str, state: &str, _limit: u32) -> Result<Vec<Issue>> {
        let issues = self.issues.lock().unwrap();
        Ok(issues
            .values()
            .filter(|i| i.state == state)
            .map(|i| Issue {
                uuid: i.uuid.clone(),
                identifier: i.identifier.clone(),
                title: i.title.clone(),
                state: parse_state(&i.state),
                priority: Priority::None,
                pr_url: None,
                updated_at: Utc::now(),
            })
            .collect())
    }

    async fn transition(&self, issue_uuid: &str, from: &str, to: &str) -> Result<()> {
        let mut issues = self.issues.lock().unwrap();
        if let Some(issue) = issues.get_mut(issue_uuid) {
            issue.state = to.to_string();
        }
        self.transitions
            .lock()
            .unwrap()
            .push((issue_uuid.to_string(), from.to_string(), to.to_string()));
        Ok(())
    }

    async fn attachments(&self, _issue_uuid: &str) -> Result<Vec<Attachment>> {
        Ok(vec![])
    }
}

pub struct NoopHost;

#[async_trait]
impl Host for NoopHost {
    async fn pr_status(&self, _owner: &str, _repo: &str, _number: u64) -> Result<PrStatus> {
        Err(AutopilotError::Host("unexpected pr_status call in this scenario".to_string()))
    }
}

/// An AgentRunner double. When `block_until_cancel` is set, `run` waits for
/// the request's cancellation token before returning, simulating a
/// still-working agent that only stops on shutdown.
pub struct FakeRunner {
    pub block_until_cancel: bool,
}

#[async_trait]
impl autopilot_core::agent_runner::AgentRunner for FakeRunner {
    async fn run(
        &self,
        request: autopilot_core::agent_runner::RunRequest,
        _on_activity: Box<dyn Fn(ActivityEntry) + Send + Sync>,
    ) -> Result<autopilot_core::agent_runner::RunResult> {
        if self.block_until_cancel {
            request.parent_cancel.cancelled().await;
            return Ok(autopilot_core::agent_runner::RunResult {
                timed_out: true,
                ..Default::default()
            });
        }
        Ok(autopilot_core::agent_runner::RunResult::default())
    }
}
