//! Tracker client: a Linear-flavored issue tracker behind a narrow trait so
//! the scheduler never depends on the concrete HTTP client directly.

use crate::error::{AutopilotError, Result};
use crate::models::{Issue, IssueState, Priority};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;

/// A PR attachment discovered on an issue.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub url: String,
}

#[async_trait]
pub trait Tracker: Send + Sync {
    async fn list_issues(&self, team: &str, state: &str, limit: u32) -> Result<Vec<Issue>>;
    async fn transition(&self, issue_uuid: &str, from: &str, to: &str) -> Result<()>;
    async fn attachments(&self, issue_uuid: &str) -> Result<Vec<Attachment>>;
}

/// Retry shape for transient errors: exponential backoff, base 500ms, capped
/// at 3 attempts, matching the circuit breaker's own timing conventions.
const RETRY_ATTEMPTS: u32 = crate::constants::TRANSIENT_RETRY_ATTEMPTS;
const RETRY_BASE_MS: u64 = crate::constants::TRANSIENT_RETRY_BASE_MS;

pub struct LinearTrackerClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl LinearTrackerClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            endpoint: "https://api.linear.app/graphql".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_endpoint(api_key: String, endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            endpoint,
        }
    }

    async fn graphql<T: for<'de> Deserialize<'de>>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = self
                .client
                .post(&self.endpoint)
                .header("Authorization", self.api_key.clone())
                .json(&serde_json::json!({ "query": query, "variables": variables }))
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.as_u16() == 401 || status.as_u16() == 403 {
                        return Err(AutopilotError::Authentication(format!(
                            "linear rejected credentials: {status}"
                        )));
                    }
                    if status.as_u16() == 429 {
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        return Err(AutopilotError::RateLimit {
                            retry_after_secs: retry_after
                                .min(crate::constants::RATE_LIMIT_CAP_MS / 1000),
                        });
                    }
                    if status.is_server_error() && attempt < RETRY_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(
                            RETRY_BASE_MS * 2u64.pow(attempt - 1),
                        ))
                        .await;
                        continue;
                    }
                    if !status.is_success() {
                        return Err(AutopilotError::Tracker(format!(
                            "linear returned {status}"
                        )));
                    }
                    return resp.json::<T>().await.map_err(AutopilotError::TrackerApi);
                }
                Err(e) if attempt < RETRY_ATTEMPTS && (e.is_timeout() || e.is_connect()) => {
                    tokio::time::sleep(Duration::from_millis(
                        RETRY_BASE_MS * 2u64.pow(attempt - 1),
                    ))
                    .await;
                    continue;
                }
                Err(e) => return Err(AutopilotError::TrackerApi(e)),
            }
        }
    }
}

#[derive(Deserialize)]
struct IssueNode {
    id: String,
    identifier: String,
    title: String,
    #[serde(rename = "priority")]
    priority: Option<f64>,
    #[serde(rename = "updatedAt")]
    updated_at: chrono::DateTime<Utc>,
}

fn priority_from_linear(p: Option<f64>) -> Priority {
    match p.map(|v| v as i64) {
        Some(1) => Priority::Urgent,
        Some(2) => Priority::High,
        Some(3) => Priority::Medium,
        Some(4) => Priority::Low,
        _ => Priority::None,
    }
}

#[async_trait]
impl Tracker for LinearTrackerClient {
    async fn list_issues(&self, team: &str, state: &str, limit: u32) -> Result<Vec<Issue>> {
        let query = r#"
            query Issues($team: String!, $state: String!, $first: Int!) {
                issues(filter: { team: { key: { eq: $team } }, state: { name: { eq: $state } } }, first: $first) {
                    nodes { id identifier title priority updatedAt }
                }
            }
        "#;
        let variables = serde_json::json!({ "team": team, "state": state, "first": limit });

        #[derive(Deserialize)]
        struct Data {
            issues: Nodes,
        }
        #[derive(Deserialize)]
        struct Nodes {
            nodes: Vec<IssueNode>,
        }
        #[derive(Deserialize)]
        struct Envelope {
            data: Data,
        }

        let envelope: Envelope = self.graphql(query, variables).await?;

        let issue_state = match state {
            s if s.eq_ignore_ascii_case("triage") => IssueState::Triage,
            s if s.eq_ignore_ascii_case("ready") => IssueState::Ready,
            s if s.eq_ignore_ascii_case("in progress") => IssueState::InProgress,
            s if s.eq_ignore_ascii_case("in review") => IssueState::InReview,
            s if s.eq_ignore_ascii_case("done") => IssueState::Done,
            s if s.eq_ignore_ascii_case("blocked") => IssueState::Blocked,
            other => {
                return Err(AutopilotError::Tracker(format!(
                    "unknown tracker state: {other}"
                )))
            }
        };

        Ok(envelope
            .data
            .issues
            .nodes
            .into_iter()
            .map(|n| Issue {
                uuid: n.id,
                identifier: n.identifier,
                title: n.title,
                state: issue_state,
                priority: priority_from_linear(n.priority),
                pr_url: None,
                updated_at: n.updated_at,
            })
            .collect())
    }

    async fn transition(&self, issue_uuid: &str, from: &str, to: &str) -> Result<()> {
        let mutation = r#"
            mutation Transition($id: String!, $stateId: String!) {
                issueUpdate(id: $id, input: { stateId: $stateId }) { success }
            }
        "#;
        tracing::debug!(issue_uuid, from, to, "transitioning tracker issue");
        let variables = serde_json::json!({ "id": issue_uuid, "stateId": to });

        #[derive(Deserialize)]
        struct Payload {
            success: bool,
        }
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "issueUpdate")]
            issue_update: Payload,
        }
        #[derive(Deserialize)]
        struct Envelope {
            data: Data,
        }

        let envelope: Envelope = self.graphql(mutation, variables).await?;
        if !envelope.data.issue_update.success {
            return Err(AutopilotError::Tracker(format!(
                "transition conflict on {issue_uuid} ({from} -> {to})"
            )));
        }
        Ok(())
    }

    async fn attachments(&self, issue_uuid: &str) -> Result<Vec<Attachment>> {
        let query = r#"
            query Attachments($id: String!) {
                issue(id: $id) { attachments { nodes { url } } }
            }
        "#;
        let variables = serde_json::json!({ "id": issue_uuid });

        #[derive(Deserialize)]
        struct AttachmentNode {
            url: String,
        }
        #[derive(Deserialize)]
        struct AttachmentNodes {
            nodes: Vec<AttachmentNode>,
        }
        #[derive(Deserialize)]
        struct IssueData {
            attachments: AttachmentNodes,
        }
        #[derive(Deserialize)]
        struct Data {
            issue: IssueData,
        }
        #[derive(Deserialize)]
        struct Envelope {
            data: Data,
        }

        let envelope: Envelope = self.graphql(query, variables).await?;
        Ok(envelope
            .data
            .issue
            .attachments
            .nodes
            .into_iter()
            .map(|n| Attachment { url: n.url })
            .collect())
    }
}

/// Locate a GitHub PR URL (`/pull/(\d+)`) among an issue's attachments.
pub fn find_pr_url(attachments: &[Attachment]) -> Option<&str> {
    let re = regex::Regex::new(r"/pull/\d+").ok()?;
    attachments
        .iter()
        .find(|a| re.is_match(&a.url))
        .map(|a| a.url.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_pull_request_url() {
        let attachments = vec![
            Attachment {
                url: "https://example.com/doc".to_string(),
            },
            Attachment {
                url: "https://github.com/acme/widgets/pull/42".to_string(),
            },
        ];
        assert_eq!(
            find_pr_url(&attachments),
            Some("https://github.com/acme/widgets/pull/42")
        );
    }

    #[test]
    fn no_pull_request_url_returns_none() {
        let attachments = vec![Attachment {
            url: "https://example.com/doc".to_string(),
        }];
        assert_eq!(find_pr_url(&attachments), None);
    }

    #[test]
    fn maps_linear_priority_levels() {
        assert_eq!(priority_from_linear(Some(1.0)), Priority::Urgent);
        assert_eq!(priority_from_linear(Some(4.0)), Priority::Low);
        assert_eq!(priority_from_linear(None), Priority::None);
    }
}
