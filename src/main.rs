use anyhow::{bail, Context, Result};
use autopilot_core::agent_runner::ClaudeAgentRunner;
use autopilot_core::api::{DashboardServer, DashboardState};
use autopilot_core::config::Config;
use autopilot_core::executor::ExecutorContext;
use autopilot_core::host::GitHubHostClient;
use autopilot_core::main_loop::MainLoop;
use autopilot_core::monitor::MonitorContext;
use autopilot_core::persistence::SledStateStore;
use autopilot_core::planner::PlannerContext;
use autopilot_core::state::AppState;
use autopilot_core::tracker::LinearTrackerClient;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "autopilot", about = "Autonomous software-engineering orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator loop and dashboard for a project directory.
    Start {
        /// Path to the project's git checkout.
        project_path: PathBuf,
        #[arg(long, default_value_t = autopilot_core::constants::DEFAULT_DASHBOARD_PORT)]
        port: u16,
        #[arg(long, default_value = autopilot_core::constants::DEFAULT_DASHBOARD_HOST)]
        host: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Start { project_path, port, host } => start(project_path, host, port).await,
    }
}

async fn start(project_path: PathBuf, host: String, port: u16) -> Result<()> {
    info!("starting autopilot for {}", project_path.display());

    let linear_api_key = std::env::var("LINEAR_API_KEY").context("LINEAR_API_KEY is not set")?;
    let github_token = std::env::var("GITHUB_TOKEN").context("GITHUB_TOKEN is not set")?;
    let dashboard_token = std::env::var("AUTOPILOT_DASHBOARD_TOKEN").ok();

    if host != "127.0.0.1" && host != "localhost" && dashboard_token.is_none() {
        bail!("refusing to bind dashboard to non-loopback host {host} without AUTOPILOT_DASHBOARD_TOKEN set");
    }

    let config = Arc::new(Config::load(&project_path)?);

    let tracker: Arc<dyn autopilot_core::tracker::Tracker> =
        Arc::new(LinearTrackerClient::new(linear_api_key));
    let host_client: Arc<dyn autopilot_core::host::Host> =
        Arc::new(GitHubHostClient::new(github_token));
    let runner: Arc<dyn autopilot_core::agent_runner::AgentRunner> =
        Arc::new(ClaudeAgentRunner::new("claude".to_string(), "acceptEdits".to_string()));

    let store = Arc::new(SledStateStore::open(&project_path)?);
    let state = AppState::new(Some(store));
    let shutdown = CancellationToken::new();

    let executor_ctx = ExecutorContext {
        config: config.clone(),
        tracker: tracker.clone(),
        runner: runner.clone(),
        state: state.clone(),
        project_path: project_path.clone(),
        shutdown: shutdown.clone(),
    };
    let monitor_ctx = MonitorContext {
        config: config.clone(),
        tracker: tracker.clone(),
        host: host_client,
        runner: runner.clone(),
        state: state.clone(),
        project_path: project_path.clone(),
        shutdown: shutdown.clone(),
    };
    let planner_ctx = Arc::new(PlannerContext {
        config: config.clone(),
        tracker: tracker.clone(),
        runner,
        state: state.clone(),
        project_path,
        shutdown: shutdown.clone(),
    });

    let main_loop = MainLoop {
        config: config.clone(),
        state: state.clone(),
        executor_ctx,
        monitor_ctx,
        planner_ctx: (*planner_ctx).clone(),
        shutdown: shutdown.clone(),
    };

    let dashboard_state = DashboardState {
        app_state: state,
        config,
        tracker,
        planner_ctx,
        started_at_ms: chrono::Utc::now().timestamp_millis(),
    };
    let dashboard = DashboardServer::new(dashboard_state, dashboard_token, host, port);

    let shutdown_on_signal = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        shutdown_on_signal.cancel();
    });

    tokio::select! {
        result = main_loop.run() => {
            if let Err(e) = result {
                tracing::error!("main loop exited: {e}");
            }
        }
        result = dashboard.run() => {
            if let Err(e) = result {
                tracing::error!("dashboard server exited: {e}");
            }
        }
    }

    Ok(())
}

/// Waits for SIGINT or, on unix, SIGTERM — the signal `docker stop`/k8s/systemd
/// send — so the drain/revert shutdown path in `MainLoop::run` always runs.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
