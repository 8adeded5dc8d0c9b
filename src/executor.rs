//! Executor: claims Ready issues, transitions them to InProgress, launches
//! executor agents, and routes their completion back to `AppState` and the
//! Tracker.

use crate::agent_runner::{AgentRunner, RunRequest, RunResult};
use crate::config::Config;
use crate::error::Result;
use crate::models::{AgentKind, AgentStatus, Issue, IssueState};
use crate::state::{AppState, CompletionOutcome};
use crate::tracker::Tracker;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct ExecutorContext {
    pub config: Arc<Config>,
    pub tracker: Arc<dyn Tracker>,
    pub runner: Arc<dyn AgentRunner>,
    pub state: AppState,
    pub project_path: PathBuf,
    pub shutdown: CancellationToken,
}

/// Fill free executor slots with Ready issues, launching one agent task per
/// claimed issue. Returns the launched task handles so the caller can await
/// them alongside the next tick timer.
pub async fn fill_slots(ctx: &ExecutorContext) -> Result<Vec<JoinHandle<()>>> {
    recover_stale_issues(ctx).await?;

    let team = &ctx.config.linear.team;
    let states = &ctx.config.linear.states;

    let ready = ctx
        .tracker
        .list_issues(team, &states.ready, crate::constants::TRACKER_PAGE_SIZE)
        .await?;
    let triage = ctx
        .tracker
        .list_issues(team, &states.triage, crate::constants::TRACKER_PAGE_SIZE)
        .await?;

    ctx.state
        .update_queue(
            ready.len() as u32,
            triage.len() as u32,
            ctx.config.planner.min_ready_threshold,
        )
        .await;

    let running_count = ctx.state.get_running_count().await;
    let free_slots = ctx.config.executor.parallel as usize;
    if running_count >= free_slots {
        return Ok(Vec::new());
    }
    let free = free_slots - running_count;

    let mut ordered = ready;
    ordered.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.identifier.cmp(&b.identifier)));
    ordered.truncate(free);

    let mut handles = Vec::new();
    for issue in ordered {
        if ctx.state.has_running_issue(&issue.uuid).await {
            continue;
        }

        if let Err(e) = ctx
            .tracker
            .transition(&issue.uuid, &states.ready, &states.in_progress)
            .await
        {
            tracing::warn!(issue = %issue.identifier, error = %e, "skipping issue, transition conflict");
            continue;
        }

        let agent_id = format!("exec-{}-{}", issue.identifier, Utc::now().timestamp_millis());
        ctx.state
            .add_agent(
                agent_id.clone(),
                AgentKind::Executor,
                issue.identifier.clone(),
                Some(issue.uuid.clone()),
                issue.title.clone(),
            )
            .await?;

        handles.push(spawn_executor_agent(ctx, agent_id, issue));
    }

    Ok(handles)
}

fn spawn_executor_agent(ctx: &ExecutorContext, agent_id: String, issue: Issue) -> JoinHandle<()> {
    let tracker = ctx.tracker.clone();
    let runner = ctx.runner.clone();
    let state = ctx.state.clone();
    let cwd = ctx.project_path.clone();
    let model = "claude-executor".to_string();
    let timeout_ms = (ctx.config.executor.timeout_minutes * 60_000.0) as u64;
    let inactivity_ms = (ctx.config.executor.inactivity_timeout_minutes * 60_000.0) as u64;
    let states = ctx.config.linear.states.clone();
    let shutdown = ctx.shutdown.clone();

    tokio::spawn(async move {
        let cancel = CancellationToken::new();
        state.register_cancel(&agent_id, cancel.clone()).await;
        let linked = shutdown.child_token();

        let agent_id_for_cb = agent_id.clone();
        let state_for_cb = state.clone();
        let on_activity = Box::new(move |entry| {
            let state = state_for_cb.clone();
            let agent_id = agent_id_for_cb.clone();
            tokio::spawn(async move {
                state.add_activity(&agent_id, entry).await;
            });
        });

        let request = RunRequest {
            prompt: format!("Implement issue {}: {}", issue.identifier, issue.title),
            cwd,
            label: issue.identifier.clone(),
            model,
            timeout_ms,
            inactivity_ms,
            parent_cancel: combined_cancel(cancel.clone(), linked),
        };

        let result = runner.run(request, on_activity).await;

        let (status, reverts) = match &result {
            Ok(r) => classify(r),
            Err(e) => {
                tracing::error!(issue = %issue.identifier, error = %e, "executor agent failed to run");
                (AgentStatus::Failed, true)
            }
        };

        let outcome = match result {
            Ok(r) => CompletionOutcome {
                cost_usd: r.cost_usd.unwrap_or(0.0),
                duration_ms: r.duration_ms,
                num_turns: r.num_turns,
                error: r.error,
            },
            Err(e) => CompletionOutcome {
                cost_usd: 0.0,
                duration_ms: 0,
                num_turns: 0,
                error: Some(e.to_string()),
            },
        };

        state.complete_agent(&agent_id, status, outcome).await;

        if reverts {
            if let Err(e) = tracker
                .transition(&issue.uuid, &states.in_progress, &states.ready)
                .await
            {
                tracing::warn!(issue = %issue.identifier, error = %e, "failed to revert issue to ready");
            }
        }
    })
}

/// Terminal status mapping per the design's classification table.
fn classify(result: &RunResult) -> (AgentStatus, bool) {
    if result.inactivity_timed_out || result.timed_out {
        (AgentStatus::TimedOut, true)
    } else if result.error.is_some() {
        (AgentStatus::Failed, true)
    } else {
        (AgentStatus::Completed, false)
    }
}

/// A cancellation token that fires when either of two tokens fires.
fn combined_cancel(a: CancellationToken, b: CancellationToken) -> CancellationToken {
    let combined = CancellationToken::new();
    let out = combined.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = a.cancelled() => out.cancel(),
            _ = b.cancelled() => out.cancel(),
        }
    });
    combined
}

/// Revert InProgress issues with no running agent whose last update is
/// older than `2 * executor.timeout_minutes` back to Ready.
async fn recover_stale_issues(ctx: &ExecutorContext) -> Result<()> {
    let states = &ctx.config.linear.states;
    let in_progress = ctx
        .tracker
        .list_issues(
            &ctx.config.linear.team,
            &states.in_progress,
            crate::constants::TRACKER_PAGE_SIZE,
        )
        .await?;

    let threshold_ms = (ctx.config.executor.timeout_minutes
        * crate::constants::STALE_RECOVERY_TIMEOUT_MULTIPLIER
        * 60_000.0) as i64;
    let now = Utc::now().timestamp_millis();

    for issue in in_progress {
        if matches!(issue.state, IssueState::InProgress) && !ctx.state.has_running_issue(&issue.uuid).await {
            let age_ms = now - issue.updated_at.timestamp_millis();
            if age_ms > threshold_ms {
                tracing::warn!(issue = %issue.identifier, "reverting stale in-progress issue to ready");
                if let Err(e) = ctx
                    .tracker
                    .transition(&issue.uuid, &states.in_progress, &states.ready)
                    .await
                {
                    tracing::warn!(issue = %issue.identifier, error = %e, "failed to revert stale issue");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_runner::RunResult;

    #[test]
    fn classifies_completion_correctly() {
        let ok = RunResult {
            result_text: "done".to_string(),
            ..Default::default()
        };
        assert_eq!(classify(&ok), (AgentStatus::Completed, false));

        let timed_out = RunResult {
            timed_out: true,
            ..Default::default()
        };
        assert_eq!(classify(&timed_out), (AgentStatus::TimedOut, true));

        let inactivity = RunResult {
            inactivity_timed_out: true,
            ..Default::default()
        };
        assert_eq!(classify(&inactivity), (AgentStatus::TimedOut, true));

        let failed = RunResult {
            error: Some("boom".to_string()),
            ..Default::default()
        };
        assert_eq!(classify(&failed), (AgentStatus::Failed, true));
    }
}
