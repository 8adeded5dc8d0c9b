//! Monitor: for each InReview issue, fetches PR status, classifies it, and
//! spawns at most one fixer per issue with bounded attempts.

use crate::agent_runner::{AgentRunner, RunRequest, RunResult};
use crate::config::Config;
use crate::error::Result;
use crate::host::{ci_status, parse_pr_url, Host};
use crate::models::{AgentKind, AgentStatus, ReviewClassification};
use crate::state::{AppState, CompletionOutcome};
use crate::tracker::{find_pr_url, Tracker};
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct MonitorContext {
    pub config: Arc<Config>,
    pub tracker: Arc<dyn Tracker>,
    pub host: Arc<dyn Host>,
    pub runner: Arc<dyn AgentRunner>,
    pub state: AppState,
    pub project_path: PathBuf,
    pub shutdown: CancellationToken,
}

pub async fn check_open_prs(ctx: &MonitorContext) -> Result<Vec<JoinHandle<()>>> {
    if ctx.state.is_budget_exhausted(&ctx.config.budget).await {
        ctx.state.set_paused(true).await;
        return Ok(Vec::new());
    }

    let states = &ctx.config.linear.states;
    let in_review = ctx
        .tracker
        .list_issues(
            &ctx.config.linear.team,
            &states.in_review,
            crate::constants::TRACKER_PAGE_SIZE,
        )
        .await?;

    let mut seen_uuids = HashSet::new();
    let mut handles = Vec::new();

    for issue in &in_review {
        seen_uuids.insert(issue.uuid.clone());
        ctx.state.mark_issue_seen_in_review(&issue.uuid).await;

        let attachments = match ctx.tracker.attachments(&issue.uuid).await {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(issue = %issue.identifier, error = %e, "failed to fetch attachments, skipping");
                continue;
            }
        };

        let Some(pr_url) = find_pr_url(&attachments) else {
            continue;
        };
        let Some((owner, repo, number)) = parse_pr_url(pr_url) else {
            tracing::warn!(issue = %issue.identifier, pr_url, "could not parse PR url, skipping");
            continue;
        };

        let pr_status = match ctx.host.pr_status(&owner, &repo, number).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(issue = %issue.identifier, error = %e, "failed to fetch PR status, skipping");
                continue;
            }
        };

        let ci = ci_status(&pr_status.check_runs);
        let (classification, review_id) = classify(ctx, &ci, &pr_status, &issue.uuid).await;

        if classification == ReviewClassification::NoAction {
            continue;
        }

        if ctx.state.has_active_fixer(&issue.uuid).await {
            continue;
        }
        if ctx.state.fixer_attempt_count(&issue.uuid).await >= ctx.config.executor.max_fixer_attempts {
            continue;
        }
        let running_count = ctx.state.get_running_count().await;
        if running_count >= ctx.config.executor.parallel as usize {
            continue;
        }

        let agent_id = format!("fixer-{}-{}", issue.identifier, Utc::now().timestamp_millis());
        ctx.state
            .add_agent(
                agent_id.clone(),
                AgentKind::Fixer,
                issue.identifier.clone(),
                Some(issue.uuid.clone()),
                issue.title.clone(),
            )
            .await?;
        ctx.state.record_fixer_attempt(&issue.uuid).await;
        if let Some(review_id) = &review_id {
            ctx.state.mark_review_handled(review_id).await;
        }

        handles.push(spawn_fixer_agent(ctx, agent_id, issue.clone(), classification));
    }

    ctx.state.prune_fixer_attempts(&seen_uuids).await;
    Ok(handles)
}

/// Classifies the PR. The review id is only returned alongside
/// `ReviewResponse`, so the caller can defer `mark_review_handled` until it
/// actually commits to spawning a fixer for it.
async fn classify(
    ctx: &MonitorContext,
    ci: &crate::models::CiStatus,
    pr: &crate::models::PrStatus,
    issue_uuid: &str,
) -> (ReviewClassification, Option<String>) {
    use crate::models::CiStatus;

    if *ci == CiStatus::Failure {
        return (ReviewClassification::CiFailure, None);
    }
    if pr.mergeable == Some(false) {
        return (ReviewClassification::MergeConflict, None);
    }
    if ctx.config.monitor.respond_to_reviews && *ci == CiStatus::Success && pr.mergeable != Some(false) {
        for review in &pr.reviews {
            if review.state == "CHANGES_REQUESTED" && !ctx.state.is_review_handled(&review.id).await {
                let _ = issue_uuid;
                return (ReviewClassification::ReviewResponse, Some(review.id.clone()));
            }
        }
    }
    (ReviewClassification::NoAction, None)
}

fn spawn_fixer_agent(
    ctx: &MonitorContext,
    agent_id: String,
    issue: crate::models::Issue,
    classification: ReviewClassification,
) -> JoinHandle<()> {
    let runner = ctx.runner.clone();
    let state = ctx.state.clone();
    let cwd = ctx.project_path.clone();
    let timeout_ms = (ctx.config.executor.fixer_timeout_minutes * 60_000.0) as u64;
    let inactivity_ms = (ctx.config.executor.inactivity_timeout_minutes * 60_000.0) as u64;
    let shutdown = ctx.shutdown.clone();

    tokio::spawn(async move {
        let cancel = CancellationToken::new();
        state.register_cancel(&agent_id, cancel.clone()).await;

        let agent_id_for_cb = agent_id.clone();
        let state_for_cb = state.clone();
        let on_activity = Box::new(move |entry| {
            let state = state_for_cb.clone();
            let agent_id = agent_id_for_cb.clone();
            tokio::spawn(async move {
                state.add_activity(&agent_id, entry).await;
            });
        });

        let prompt = match classification {
            ReviewClassification::CiFailure => {
                format!("Fix the failing CI on issue {}: {}", issue.identifier, issue.title)
            }
            ReviewClassification::MergeConflict => {
                format!("Resolve merge conflicts for issue {}: {}", issue.identifier, issue.title)
            }
            ReviewClassification::ReviewResponse => {
                format!("Address reviewer feedback for issue {}: {}", issue.identifier, issue.title)
            }
            ReviewClassification::NoAction => unreachable!("no-action classification never spawns"),
        };

        let request = RunRequest {
            prompt,
            cwd,
            label: issue.identifier.clone(),
            model: "claude-executor".to_string(),
            timeout_ms,
            inactivity_ms,
            parent_cancel: {
                let linked = shutdown.child_token();
                let out = CancellationToken::new();
                let c2 = cancel.clone();
                let out2 = out.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = c2.cancelled() => out2.cancel(),
                        _ = linked.cancelled() => out2.cancel(),
                    }
                });
                out
            },
        };

        let result: std::result::Result<RunResult, crate::error::AutopilotError> = runner.run(request, on_activity).await;

        let (status, outcome) = match result {
            Ok(r) => {
                let status = if r.inactivity_timed_out || r.timed_out {
                    AgentStatus::TimedOut
                } else if r.error.is_some() {
                    AgentStatus::Failed
                } else {
                    AgentStatus::Completed
                };
                let outcome = CompletionOutcome {
                    cost_usd: r.cost_usd.unwrap_or(0.0),
                    duration_ms: r.duration_ms,
                    num_turns: r.num_turns,
                    error: r.error,
                };
                (status, outcome)
            }
            Err(e) => (
                AgentStatus::Failed,
                CompletionOutcome {
                    cost_usd: 0.0,
                    duration_ms: 0,
                    num_turns: 0,
                    error: Some(e.to_string()),
                },
            ),
        };

        // Fixers and planners never revert Tracker state on failure; the
        // monitor re-evaluates next tick.
        state.complete_agent(&agent_id, status, outcome).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CheckRun, CiStatus, PrStatus};

    fn pr(mergeable: Option<bool>, reviews: Vec<crate::models::Review>) -> PrStatus {
        PrStatus {
            merged: false,
            mergeable,
            check_runs: vec![CheckRun {
                name: "ci".to_string(),
                completed: true,
                conclusion: Some("success".to_string()),
            }],
            reviews,
            branch: "feature".to_string(),
            head_sha: "abc".to_string(),
        }
    }

    #[test]
    fn ci_status_matches_expectations() {
        let failing = vec![CheckRun {
            name: "ci".to_string(),
            completed: true,
            conclusion: Some("failure".to_string()),
        }];
        assert_eq!(ci_status(&failing), CiStatus::Failure);
    }

    #[tokio::test]
    async fn merge_conflict_beats_review_response() {
        let config = Arc::new(Config::default());
        let state = AppState::new(None);
        struct NoopTracker;
        #[async_trait::async_trait]
        impl Tracker for NoopTracker {
            async fn list_issues(&self, _: &str, _: &str, _: u32) -> Result<Vec<crate::models::Issue>> {
                Ok(vec![])
            }
            async fn transition(&self, _: &str, _: &str, _: &str) -> Result<()> {
                Ok(())
            }
            async fn attachments(&self, _: &str) -> Result<Vec<crate::tracker::Attachment>> {
                Ok(vec![])
            }
        }
        struct NoopHost;
        #[async_trait::async_trait]
        impl crate::host::Host for NoopHost {
            async fn pr_status(&self, _: &str, _: &str, _: u64) -> Result<PrStatus> {
                unreachable!()
            }
        }
        struct NoopRunner;
        #[async_trait::async_trait]
        impl AgentRunner for NoopRunner {
            async fn run(
                &self,
                _req: RunRequest,
                _cb: Box<dyn Fn(crate::models::ActivityEntry) + Send + Sync>,
            ) -> Result<RunResult> {
                Ok(RunResult::default())
            }
        }

        let mut cfg = (*config).clone();
        cfg.monitor.respond_to_reviews = true;
        let ctx = MonitorContext {
            config: Arc::new(cfg),
            tracker: Arc::new(NoopTracker),
            host: Arc::new(NoopHost),
            runner: Arc::new(NoopRunner),
            state,
            project_path: PathBuf::from("."),
            shutdown: CancellationToken::new(),
        };

        let status = pr(
            Some(false),
            vec![crate::models::Review {
                id: "r1".to_string(),
                state: "CHANGES_REQUESTED".to_string(),
            }],
        );
        let (classification, review_id) = classify(&ctx, &CiStatus::Success, &status, "u1").await;
        assert_eq!(classification, ReviewClassification::MergeConflict);
        assert_eq!(review_id, None);
    }
}
