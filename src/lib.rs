//! # Autopilot Core
//!
//! Autopilot is an autonomous software-engineering orchestrator: it pulls
//! ready-to-work issues from a tracker, spawns bounded-parallel coding
//! agents against them, watches the pull requests they open, and repairs
//! CI failures, merge conflicts, and review feedback without a human in
//! the loop for the common case.
//!
//! ## Architecture
//!
//! - **Tracker / Host clients** — narrow traits over a Linear-flavored issue
//!   tracker and a GitHub-flavored pull request host.
//! - **Agent runner** — spawns and supervises the underlying coding agent
//!   subprocess, streaming its JSONL activity and enforcing timeouts.
//! - **Executor / Monitor / Planner** — the three schedulers driven each
//!   tick by the main loop: claim and run ready issues, watch open PRs and
//!   dispatch fixers, and replenish the backlog when it runs low.
//! - **Dashboard API** — a small read/write HTTP surface for operators.

/// In-process agent subprocess supervision
pub mod agent_runner;
/// HTTP API server and endpoints
pub mod api;
/// Authentication and authorization
pub mod auth;
/// System configuration
pub mod config;
/// System-wide constants
pub mod constants;
/// Error types and handling
pub mod error;
/// Executor scheduler: claims ready issues and runs them
pub mod executor;
/// Pull request host client (GitHub-flavored)
pub mod host;
/// Main loop: ticks Executor, Monitor, and Planner
pub mod main_loop;
/// Core data models
pub mod models;
/// Monitor scheduler: watches open PRs and dispatches fixers
pub mod monitor;
/// Embedded persistence for history and budget state
pub mod persistence;
/// Planner scheduler: replenishes the backlog
pub mod planner;
/// Rate limiting functionality
pub mod rate_limit;
/// Secret redaction utilities
pub mod security;
/// Session management for dashboard auth
pub mod session;
/// Shared in-process application state
pub mod state;
/// Issue tracker client (Linear-flavored)
pub mod tracker;

pub use error::{AutopilotError, Result};
