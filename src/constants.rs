//! System-wide defaults and bounds for the orchestrator.
//! Values here back the YAML config defaults in `config::Defaults` and the
//! hard caps that are never operator-configurable (ring/history sizes).

// ── Activity & history ring buffers ──────────────────────────────────────
/// Per-agent activity ring capacity. 500 entries covers a long-running
/// coding session's tool-call stream without unbounded growth; eviction is
/// drop-oldest per spec.
pub const ACTIVITY_RING_CAPACITY: usize = 500;

/// History entries retained across all terminated agents before the oldest
/// is evicted.
pub const HISTORY_CAPACITY: usize = 200;

// ── Main loop timing ──────────────────────────────────────────────────────
/// Fallback tick interval when no `executor.poll_interval_minutes` applies
/// (e.g. before config is loaded).
pub const DEFAULT_POLL_INTERVAL_MINUTES: f64 = 5.0;

/// Consecutive transient-failure count past which the main loop exits.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Base backoff for consecutive loop failures: `min(base * 2^(n-1), cap)`.
pub const BACKOFF_BASE_MS: u64 = 1_000;
pub const BACKOFF_CAP_MS: u64 = 300_000;

/// Cap applied to a rate-limit `Retry-After` header.
pub const RATE_LIMIT_CAP_MS: u64 = 300_000;

/// Tracker/Host retry attempts for transient (5xx/timeout) errors.
pub const TRANSIENT_RETRY_ATTEMPTS: u32 = 3;
pub const TRANSIENT_RETRY_BASE_MS: u64 = 500;

// ── Shutdown / drain ───────────────────────────────────────────────────────
/// Upper bound on the drain phase during shutdown.
pub const DRAIN_TIMEOUT_SECS: u64 = 60;
/// Lower bound, to give SIGTERM→SIGKILL escalation room to act.
pub const DRAIN_MIN_FLOOR_SECS: u64 = 6;

// ── Monitor / stale recovery ────────────────────────────────────────────────
/// Multiplier applied to `executor.timeout_minutes` to decide whether an
/// `InProgress` issue with no running agent is stale and should revert.
pub const STALE_RECOVERY_TIMEOUT_MULTIPLIER: f64 = 2.0;

/// Page size used when querying the Tracker for issues in a given state.
pub const TRACKER_PAGE_SIZE: u32 = 50;

// ── Dashboard ───────────────────────────────────────────────────────────────
pub const DEFAULT_DASHBOARD_PORT: u16 = 7890;
pub const DEFAULT_DASHBOARD_HOST: &str = "127.0.0.1";

/// Queue-age thresholds for `/health`, in seconds.
pub const QUEUE_AGE_WARN_SECS: i64 = 5 * 60;
pub const QUEUE_AGE_FAIL_SECS: i64 = 10 * 60;

/// Config file name, relative to the project path.
pub const CONFIG_FILE_NAME: &str = ".claude-autopilot.yml";

/// Directory (under the project path) holding the embedded state store.
pub const STATE_STORE_DIR: &str = ".claude-autopilot";
