//! Agent runner: spawns a coding-agent subprocess, streams structured
//! activity events back to the caller, and enforces wall-clock/inactivity
//! timeouts plus cooperative cancellation.

pub mod circuit_breaker;

use crate::error::{AutopilotError, Result};
use crate::models::{ActivityEntry, ActivityKind};
use crate::security::redact;
use async_trait::async_trait;
use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Parameters for a single agent invocation.
pub struct RunRequest {
    pub prompt: String,
    pub cwd: PathBuf,
    pub label: String,
    pub model: String,
    pub timeout_ms: u64,
    pub inactivity_ms: u64,
    pub parent_cancel: CancellationToken,
}

/// Terminal outcome of a `run` call. Exactly one of the three terminal
/// flags is meaningful: `timed_out`, `inactivity_timed_out`, or `error`
/// being `Some`; anything else is a clean completion.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub timed_out: bool,
    pub inactivity_timed_out: bool,
    pub error: Option<String>,
    pub cost_usd: Option<f64>,
    pub duration_ms: u64,
    pub num_turns: u32,
    pub session_id: Option<String>,
    pub result_text: String,
}

#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run an agent to completion (or termination). `on_activity` is invoked
    /// synchronously, in order, for every activity event before `run`
    /// resolves.
    async fn run(
        &self,
        request: RunRequest,
        on_activity: Box<dyn Fn(ActivityEntry) + Send + Sync>,
    ) -> Result<RunResult>;
}

/// JSONL event shapes emitted by `claude --output-format stream-json`.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AgentEvent {
    ToolUse {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        input: Option<serde_json::Value>,
    },
    Text {
        #[serde(default)]
        text: Option<String>,
    },
    Subagent {
        #[serde(default)]
        summary: Option<String>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    Result {
        #[serde(default)]
        cost_usd: Option<f64>,
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        num_turns: Option<u32>,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Unknown,
}

pub struct ClaudeAgentRunner {
    binary: String,
    permission_mode: String,
    circuit_breaker: CircuitBreaker,
}

impl ClaudeAgentRunner {
    pub fn new(binary: String, permission_mode: String) -> Self {
        Self {
            binary,
            permission_mode,
            circuit_breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
        }
    }
}

#[async_trait]
impl AgentRunner for ClaudeAgentRunner {
    async fn run(
        &self,
        request: RunRequest,
        on_activity: Box<dyn Fn(ActivityEntry) + Send + Sync>,
    ) -> Result<RunResult> {
        if !self.circuit_breaker.should_allow_request().await {
            return Err(AutopilotError::Agent {
                message: format!("circuit open for agent runner ({})", self.binary),
            });
        }

        let started = std::time::Instant::now();

        let mut child = match Command::new(&self.binary)
            .arg("--print")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--permission-mode")
            .arg(&self.permission_mode)
            .arg("--model")
            .arg(&request.model)
            .current_dir(&request.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.circuit_breaker.record_failure().await;
                return Err(AutopilotError::Agent {
                    message: format!("failed to spawn {}: {e}", self.binary),
                });
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(request.prompt.as_bytes()).await {
                return Err(AutopilotError::Agent {
                    message: format!("failed to write prompt: {e}"),
                });
            }
            drop(stdin);
        }

        let stdout = child.stdout.take().expect("piped stdout");
        let mut lines = BufReader::new(stdout).lines();

        let mut result = RunResult::default();
        let inactivity = tokio::time::sleep(Duration::from_millis(request.inactivity_ms));
        tokio::pin!(inactivity);
        let wall_clock = tokio::time::sleep(Duration::from_millis(request.timeout_ms));
        tokio::pin!(wall_clock);

        loop {
            tokio::select! {
                biased;

                _ = request.parent_cancel.cancelled() => {
                    terminate(&mut child).await;
                    result.error = Some("cancelled".to_string());
                    break;
                }
                _ = &mut wall_clock => {
                    terminate(&mut child).await;
                    result.timed_out = true;
                    break;
                }
                _ = &mut inactivity => {
                    terminate(&mut child).await;
                    result.inactivity_timed_out = true;
                    break;
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(raw)) => {
                            inactivity.as_mut().reset(
                                tokio::time::Instant::now() + Duration::from_millis(request.inactivity_ms),
                            );
                            if let Some(entry) = parse_event(&raw, &mut result) {
                                on_activity(entry);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            result.error = Some(format!("stdout read error: {e}"));
                            break;
                        }
                    }
                }
            }
        }

        let _ = child.wait().await;
        result.duration_ms = started.elapsed().as_millis() as u64;

        if result.error.is_some() && !result.timed_out && !result.inactivity_timed_out {
            self.circuit_breaker.record_failure().await;
        } else {
            self.circuit_breaker.record_success().await;
        }

        Ok(result)
    }
}

async fn terminate(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        tokio::select! {
            _ = child.wait() => return,
            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
        }
        let _ = child.kill().await;
    } else {
        let _ = child.kill().await;
    }
}

fn parse_event(raw: &str, result: &mut RunResult) -> Option<ActivityEntry> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let event: AgentEvent = match serde_json::from_str(trimmed) {
        Ok(e) => e,
        Err(_) => {
            return Some(ActivityEntry {
                timestamp: chrono::Utc::now(),
                kind: ActivityKind::Text,
                summary: redact(trimmed),
                detail: None,
            })
        }
    };

    match event {
        AgentEvent::ToolUse { name, input } => Some(ActivityEntry {
            timestamp: chrono::Utc::now(),
            kind: ActivityKind::ToolUse,
            summary: name.unwrap_or_else(|| "tool".to_string()),
            detail: input.map(|v| redact(&v.to_string())),
        }),
        AgentEvent::Text { text } => Some(ActivityEntry {
            timestamp: chrono::Utc::now(),
            kind: ActivityKind::Text,
            summary: "text".to_string(),
            detail: text.map(|t| redact(&t)),
        }),
        AgentEvent::Subagent { summary } => Some(ActivityEntry {
            timestamp: chrono::Utc::now(),
            kind: ActivityKind::Subagent,
            summary: summary.unwrap_or_else(|| "subagent".to_string()),
            detail: None,
        }),
        AgentEvent::Error { message } => {
            let msg = message.unwrap_or_else(|| "agent error".to_string());
            result.error = Some(redact(&msg));
            Some(ActivityEntry {
                timestamp: chrono::Utc::now(),
                kind: ActivityKind::Error,
                summary: redact(&msg),
                detail: None,
            })
        }
        AgentEvent::Result {
            cost_usd,
            duration_ms,
            num_turns,
            session_id,
            result: result_text,
            is_error,
        } => {
            result.cost_usd = cost_usd;
            if let Some(d) = duration_ms {
                result.duration_ms = d;
            }
            result.num_turns = num_turns.unwrap_or(0);
            result.session_id = session_id;
            if let Some(text) = &result_text {
                result.result_text = redact(text);
            }
            if is_error && result.error.is_none() {
                result.error = Some("agent reported failure".to_string());
            }
            Some(ActivityEntry {
                timestamp: chrono::Utc::now(),
                kind: ActivityKind::Result,
                summary: "result".to_string(),
                detail: result_text.map(|t| redact(&t)),
            })
        }
        AgentEvent::Unknown => None,
    }
}
