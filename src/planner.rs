//! Planner gate and launch: replenishes the backlog when it runs low.
//! Exactly one planner instance runs at a time.

use crate::agent_runner::{AgentRunner, RunRequest};
use crate::config::{Config, PlannerSchedule};
use crate::error::Result;
use crate::models::{AgentKind, AgentStatus, PlannerResult};
use crate::state::{AppState, CompletionOutcome};
use crate::tracker::Tracker;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct PlannerContext {
    pub config: Arc<Config>,
    pub tracker: Arc<dyn Tracker>,
    pub runner: Arc<dyn AgentRunner>,
    pub state: AppState,
    pub project_path: PathBuf,
    pub shutdown: CancellationToken,
}

/// `shouldRun`: schedule → min-interval → backlog threshold, short-circuiting
/// on the first false so a `manual` schedule or an interval still in
/// cooldown never triggers a Tracker call.
pub async fn should_run(ctx: &PlannerContext) -> Result<bool> {
    if ctx.config.planner.schedule == PlannerSchedule::Manual {
        return Ok(false);
    }

    let planner_status = ctx.state.get_planner_status().await;
    if let Some(last_run_at_ms) = planner_status.last_run_at_ms {
        let elapsed_minutes = (Utc::now().timestamp_millis() - last_run_at_ms) as f64 / 60_000.0;
        if elapsed_minutes < ctx.config.planner.min_interval_minutes {
            return Ok(false);
        }
    }

    let states = &ctx.config.linear.states;
    let ready = ctx
        .tracker
        .list_issues(&ctx.config.linear.team, &states.ready, crate::constants::TRACKER_PAGE_SIZE)
        .await?;
    let triage = ctx
        .tracker
        .list_issues(&ctx.config.linear.team, &states.triage, crate::constants::TRACKER_PAGE_SIZE)
        .await?;

    let backlog = ready.len() as u32 + triage.len() as u32;
    ctx.state
        .update_queue(ready.len() as u32, triage.len() as u32, ctx.config.planner.min_ready_threshold)
        .await;

    Ok(backlog < ctx.config.planner.min_ready_threshold)
}

/// Launch the planner agent as a background task and return its handle.
/// Caller must ensure no other planner is running. Mirrors the synchronous
/// claim-then-spawn shape of `executor::fill_slots` / `spawn_executor_agent`
/// so a long planner run never blocks the main loop's tick.
pub async fn run(ctx: &PlannerContext) -> Result<JoinHandle<()>> {
    let agent_id = format!("planner-{}", Utc::now().timestamp_millis());
    ctx.state
        .add_agent(agent_id.clone(), AgentKind::Planner, String::new(), None, "backlog planning".to_string())
        .await?;
    ctx.state
        .set_planner_running(true, ctx.config.planner.min_ready_threshold)
        .await;

    let runner = ctx.runner.clone();
    let state = ctx.state.clone();
    let cwd = ctx.project_path.clone();
    let timeout_ms = (ctx.config.planner.timeout_minutes * 60_000.0) as u64;
    let max_issues = ctx.config.planner.max_issues_per_run;
    let shutdown = ctx.shutdown.clone();

    Ok(tokio::spawn(async move {
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

        let linked = shutdown.child_token();
        let parent_cancel = CancellationToken::new();
        let c2 = cancel.clone();
        let out2 = parent_cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = c2.cancelled() => out2.cancel(),
                _ = linked.cancelled() => out2.cancel(),
            }
        });

        let request = RunRequest {
            prompt: format!("Triage and groom up to {max_issues} backlog issues."),
            cwd,
            label: "planner".to_string(),
            model: "claude-planner".to_string(),
            timeout_ms,
            inactivity_ms: timeout_ms,
            parent_cancel,
        };

        let result = runner.run(request, on_activity).await;

        let (status, planner_result, outcome) = match result {
            Ok(r) => {
                let (status, planner_result) = if r.inactivity_timed_out || r.timed_out {
                    (AgentStatus::TimedOut, PlannerResult::TimedOut)
                } else if r.error.is_some() {
                    (AgentStatus::Failed, PlannerResult::Failed)
                } else {
                    (AgentStatus::Completed, PlannerResult::Completed)
                };
                let outcome = CompletionOutcome {
                    cost_usd: r.cost_usd.unwrap_or(0.0),
                    duration_ms: r.duration_ms,
                    num_turns: r.num_turns,
                    error: r.error,
                };
                (status, planner_result, outcome)
            }
            Err(e) => (
                AgentStatus::Failed,
                PlannerResult::Failed,
                CompletionOutcome {
                    cost_usd: 0.0,
                    duration_ms: 0,
                    num_turns: 0,
                    error: Some(e.to_string()),
                },
            ),
        };

        state.complete_agent(&agent_id, status, outcome).await;
        let ready_count = state.get_queue_snapshot().await.ready_count;
        state.set_planner_result(planner_result, ready_count).await;
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_schedule_never_runs() {
        let mut config = Config::default();
        config.planner.schedule = PlannerSchedule::Manual;

        struct EmptyTracker;
        #[async_trait::async_trait]
        impl Tracker for EmptyTracker {
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
        struct NoopRunner;
        #[async_trait::async_trait]
        impl AgentRunner for NoopRunner {
            async fn run(
                &self,
                _req: RunRequest,
                _cb: Box<dyn Fn(crate::models::ActivityEntry) + Send + Sync>,
            ) -> Result<crate::agent_runner::RunResult> {
                Ok(crate::agent_runner::RunResult::default())
            }
        }

        let ctx = PlannerContext {
            config: Arc::new(config),
            tracker: Arc::new(EmptyTracker),
            runner: Arc::new(NoopRunner),
            state: AppState::new(None),
            project_path: PathBuf::from("."),
            shutdown: CancellationToken::new(),
        };

        assert!(!should_run(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn respects_min_interval_even_with_empty_backlog() {
        let config = Config::default();
        struct EmptyTracker;
        #[async_trait::async_trait]
        impl Tracker for EmptyTracker {
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
        struct NoopRunner;
        #[async_trait::async_trait]
        impl AgentRunner for NoopRunner {
            async fn run(
                &self,
                _req: RunRequest,
                _cb: Box<dyn Fn(crate::models::ActivityEntry) + Send + Sync>,
            ) -> Result<crate::agent_runner::RunResult> {
                Ok(crate::agent_runner::RunResult::default())
            }
        }

        let state = AppState::new(None);
        state.set_planner_result(PlannerResult::Completed, 0).await;

        let ctx = PlannerContext {
            config: Arc::new(config),
            tracker: Arc::new(EmptyTracker),
            runner: Arc::new(NoopRunner),
            state,
            project_path: PathBuf::from("."),
            shutdown: CancellationToken::new(),
        };

        assert!(!should_run(&ctx).await.unwrap());
    }
}
