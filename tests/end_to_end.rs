mod common;

use autopilot_core::config::Config;
use autopilot_core::executor::{self, ExecutorContext};
use autopilot_core::main_loop::MainLoop;
use autopilot_core::monitor::MonitorContext;
use autopilot_core::planner::PlannerContext;
use autopilot_core::state::AppState;
use common::{FakeIssue, FakeRunner, FakeTracker, NoopHost};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Scenario 1: fresh start with 3 Ready issues and parallel=3 claims all
/// three in one pass and moves them Ready -> InProgress.
#[tokio::test]
async fn fresh_start_claims_all_ready_issues_up_to_parallelism() {
    let mut config = Config::default();
    config.executor.parallel = 3;

    let tracker = Arc::new(FakeTracker::new(vec![
        FakeIssue::new("u1", "ENG-1", "Ready"),
        FakeIssue::new("u2", "ENG-2", "Ready"),
        FakeIssue::new("u3", "ENG-3", "Ready"),
    ]));
    let runner = Arc::new(FakeRunner { block_until_cancel: false });
    let state = AppState::new(None);

    let ctx = ExecutorContext {
        config: Arc::new(config),
        tracker: tracker.clone(),
        runner,
        state: state.clone(),
        project_path: PathBuf::from("."),
        shutdown: CancellationToken::new(),
    };

    let handles = executor::fill_slots(&ctx).await.unwrap();
    assert_eq!(handles.len(), 3);
    // fill_slots registers every agent synchronously before spawning its
    // run future, so this holds even before the spawned tasks get polled.
    assert_eq!(state.get_running_count().await, 3);
    assert_eq!(state.get_queue_snapshot().await.ready_count, 3);

    futures::future::join_all(handles).await;

    assert_eq!(state.get_running_count().await, 0);
    assert_eq!(state.get_history().await.len(), 3);
    for uuid in ["u1", "u2", "u3"] {
        assert_eq!(tracker.state_of(uuid).as_deref(), Some("In Progress"));
    }
}

/// Scenario 5: shutdown with 2 executor agents in flight cancels both,
/// drains within the timeout, and reverts both issues back to Ready.
#[tokio::test]
async fn shutdown_drains_in_flight_agents_and_reverts_issues() {
    let mut config = Config::default();
    config.executor.parallel = 2;

    let tracker = Arc::new(FakeTracker::new(vec![
        FakeIssue::new("u1", "ENG-1", "Ready"),
        FakeIssue::new("u2", "ENG-2", "Ready"),
    ]));
    let host = Arc::new(NoopHost);
    let runner = Arc::new(FakeRunner { block_until_cancel: true });
    let state = AppState::new(None);
    let shutdown = CancellationToken::new();
    let config = Arc::new(config);

    let executor_ctx = ExecutorContext {
        config: config.clone(),
        tracker: tracker.clone(),
        runner: runner.clone(),
        state: state.clone(),
        project_path: PathBuf::from("."),
        shutdown: shutdown.clone(),
    };
    let monitor_ctx = MonitorContext {
        config: config.clone(),
        tracker: tracker.clone(),
        host,
        runner: runner.clone(),
        state: state.clone(),
        project_path: PathBuf::from("."),
        shutdown: shutdown.clone(),
    };
    let planner_ctx = PlannerContext {
        config: config.clone(),
        tracker: tracker.clone(),
        runner,
        state: state.clone(),
        project_path: PathBuf::from("."),
        shutdown: shutdown.clone(),
    };

    let main_loop = MainLoop {
        config,
        state: state.clone(),
        executor_ctx,
        monitor_ctx,
        planner_ctx,
        shutdown: shutdown.clone(),
    };

    let run_handle = tokio::spawn(async move { main_loop.run().await });

    // Wait for the executor to claim both issues before triggering shutdown.
    tokio::time::timeout(Duration::from_secs(2), async {
        while state.get_running_count().await < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("executor never claimed both issues");

    shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(5), run_handle)
        .await
        .expect("main loop did not exit after shutdown")
        .expect("main loop task panicked")
        .expect("main loop returned an error");

    assert_eq!(tracker.state_of("u1").as_deref(), Some("Ready"));
    assert_eq!(tracker.state_of("u2").as_deref(), Some("Ready"));
}
