//! Main Loop: drives Monitor, Executor, and Planner each tick; enforces
//! pause and budget; classifies errors into backoff or fatal exit; handles
//! graceful shutdown.

use crate::config::Config;
use crate::error::{AutopilotError, ErrorKind};
use crate::executor::{self, ExecutorContext};
use crate::monitor::{self, MonitorContext};
use crate::planner::{self, PlannerContext};
use crate::state::AppState;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct MainLoop {
    pub config: Arc<Config>,
    pub state: AppState,
    pub executor_ctx: ExecutorContext,
    pub monitor_ctx: MonitorContext,
    pub planner_ctx: PlannerContext,
    pub shutdown: CancellationToken,
}

impl MainLoop {
    /// Drive ticks until shutdown is requested or a fatal/5-consecutive-
    /// failure condition exits the loop.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut consecutive_failures: u32 = 0;
        let mut in_flight: FuturesUnordered<JoinHandle<()>> = FuturesUnordered::new();

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            if self.state.is_paused().await {
                let poll = Duration::from_secs_f64(self.config.executor.poll_interval_minutes * 60.0);
                tokio::select! {
                    _ = tokio::time::sleep(poll) => continue,
                    _ = self.shutdown.cancelled() => break,
                }
            }

            if self
                .state
                .is_budget_exhausted(&self.config.budget)
                .await
            {
                tracing::warn!("budget exhausted, auto-pausing");
                self.state.set_paused(true).await;
                continue;
            }

            match self.tick().await {
                Ok(tick_handles) => {
                    consecutive_failures = 0;
                    for h in tick_handles {
                        in_flight.push(h);
                    }
                }
                Err(e) => {
                    match e.kind() {
                        ErrorKind::Fatal => {
                            tracing::error!(error = %e, "fatal error, exiting main loop");
                            return Err(e.into());
                        }
                        ErrorKind::RateLimit => {
                            if let AutopilotError::RateLimit { retry_after_secs } = &e {
                                let capped = (*retry_after_secs)
                                    .min(crate::constants::RATE_LIMIT_CAP_MS / 1000);
                                tracing::warn!(seconds = capped, "rate limited, sleeping");
                                tokio::time::sleep(Duration::from_secs(capped)).await;
                            }
                        }
                        _ => {
                            consecutive_failures += 1;
                            let backoff_ms = (crate::constants::BACKOFF_BASE_MS
                                * 2u64.saturating_pow(consecutive_failures.saturating_sub(1)))
                            .min(crate::constants::BACKOFF_CAP_MS);
                            tracing::warn!(
                                error = %e,
                                consecutive_failures,
                                backoff_ms,
                                "tick failed, backing off"
                            );
                            if consecutive_failures >= crate::constants::MAX_CONSECUTIVE_FAILURES {
                                tracing::error!("too many consecutive failures, exiting main loop");
                                return Err(e.into());
                            }
                            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                        }
                    }
                    continue;
                }
            }

            let poll = Duration::from_secs_f64(self.config.executor.poll_interval_minutes * 60.0);
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = self.shutdown.cancelled() => break,
                _ = in_flight.next(), if !in_flight.is_empty() => {}
            }
        }

        self.drain(in_flight).await;
        Ok(())
    }

    /// One tick: Executor and Monitor run concurrently (with independent
    /// error capture), then the Planner gate is evaluated if idle.
    async fn tick(&self) -> crate::error::Result<Vec<JoinHandle<()>>> {
        let (executor_result, monitor_result) = tokio::join!(
            executor::fill_slots(&self.executor_ctx),
            monitor::check_open_prs(&self.monitor_ctx),
        );

        let mut handles = Vec::new();
        let mut first_err = None;

        match executor_result {
            Ok(mut h) => handles.append(&mut h),
            Err(e) => {
                tracing::warn!(error = %e, "executor tick failed");
                first_err.get_or_insert(e);
            }
        }
        match monitor_result {
            Ok(mut h) => handles.append(&mut h),
            Err(e) => {
                tracing::warn!(error = %e, "monitor tick failed");
                first_err.get_or_insert(e);
            }
        }

        let planner_status = self.state.get_planner_status().await;
        let running = self.state.get_running_count().await;
        if !planner_status.running && running < self.config.executor.parallel as usize {
            match planner::should_run(&self.planner_ctx).await {
                Ok(true) => match planner::run(&self.planner_ctx).await {
                    Ok(handle) => handles.push(handle),
                    Err(e) => tracing::warn!(error = %e, "planner launch failed"),
                },
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "planner gate check failed");
                }
            }
        }

        if let Some(e) = first_err {
            if e.kind() == ErrorKind::Fatal || e.kind() == ErrorKind::RateLimit {
                return Err(e);
            }
        }

        Ok(handles)
    }

    /// Shutdown: capture running agents synchronously, cancel every handle,
    /// drain up to `DRAIN_TIMEOUT_SECS` (floor `DRAIN_MIN_FLOOR_SECS`),
    /// revert their Tracker issues back to Ready.
    async fn drain(&self, mut in_flight: FuturesUnordered<JoinHandle<()>>) {
        let snapshot = self.state.snapshot_for_shutdown().await;
        for (_, handle) in &snapshot {
            if let Some(handle) = handle {
                handle.cancel();
            }
        }

        let drain_timeout = Duration::from_secs(crate::constants::DRAIN_TIMEOUT_SECS)
            .max(Duration::from_secs(crate::constants::DRAIN_MIN_FLOOR_SECS));

        let drain_fut = async {
            while in_flight.next().await.is_some() {}
        };
        let _ = tokio::time::timeout(drain_timeout, drain_fut).await;

        let states = &self.config.linear.states;
        for (agent, _) in &snapshot {
            if agent.kind == crate::models::AgentKind::Executor {
                if let Some(issue_uuid) = &agent.issue_uuid {
                    if let Err(e) = self
                        .executor_ctx
                        .tracker
                        .transition(issue_uuid, &states.in_progress, &states.ready)
                        .await
                    {
                        tracing::warn!(issue = %agent.issue_identifier, error = %e, "failed to revert issue during shutdown");
                    }
                }
            }
        }
    }
}
