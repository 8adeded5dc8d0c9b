use thiserror::Error;

/// Convenience alias for Results with [`AutopilotError`]
pub type Result<T> = std::result::Result<T, AutopilotError>;

/// Main error type for the autopilot orchestrator.
///
/// Variants line up with the error kinds from the design: fatal errors
/// abort the process, rate-limit and transient errors drive backoff,
/// per-issue errors are logged and skipped, and budget errors trigger
/// an auto-pause rather than a failure.
#[derive(Error, Debug)]
pub enum AutopilotError {
    #[error("Tracker API error: {0}")]
    TrackerApi(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Agent error: {message}")]
    Agent { message: String },

    #[error("Duplicate agent id: {0}")]
    DuplicateAgentId(String),

    #[error("Task execution error: {issue} - {message}")]
    TaskExecution { issue: String, message: String },

    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("Host error: {0}")]
    Host(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timeout: {message}")]
    Timeout { message: String },

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimit { retry_after_secs: u64 },

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Budget exhausted")]
    BudgetExhausted,

    #[error("Queue is full")]
    QueueFull,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad classification the main loop uses to decide whether an error
/// should exit the process, trigger backoff, or just be logged and skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Fatal,
    RateLimit,
    Transient,
    PerIssue,
    Budget,
}

impl AutopilotError {
    /// Classify this error per the recovery-scope rules: fatal errors exit
    /// the process, rate-limit and transient errors drive backoff, per-issue
    /// errors never abort a tick.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AutopilotError::Authentication(_) | AutopilotError::Unauthorized => ErrorKind::Fatal,
            AutopilotError::Config(_) | AutopilotError::ConfigParse(_) => ErrorKind::Fatal,
            AutopilotError::RateLimit { .. } => ErrorKind::RateLimit,
            AutopilotError::BudgetExhausted => ErrorKind::Budget,
            AutopilotError::TrackerApi(_) | AutopilotError::Host(_) | AutopilotError::Io(_) => {
                ErrorKind::Transient
            }
            // An unknown tracker team/state means the deployment's `linear.*`
            // config doesn't match reality; retrying every tick can't fix
            // that, so it exits the process instead of looping forever.
            AutopilotError::Tracker(_) => ErrorKind::Fatal,
            AutopilotError::NotFound(_) | AutopilotError::Validation(_) => ErrorKind::PerIssue,
            _ => ErrorKind::Transient,
        }
    }
}
