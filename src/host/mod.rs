//! Host client: a GitHub-flavored code host behind a narrow trait covering
//! only what the Monitor needs — PR status, check runs, reviews.

use crate::error::{AutopilotError, Result};
use crate::models::{CheckRun, PrStatus, Review};
use async_trait::async_trait;
use serde::Deserialize;

#[async_trait]
pub trait Host: Send + Sync {
    async fn pr_status(&self, owner: &str, repo: &str, number: u64) -> Result<PrStatus>;
}

pub struct GitHubHostClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl GitHubHostClient {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            base_url: "https://api.github.com".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(token: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            base_url,
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header("User-Agent", "autopilot")
            .send()
            .await
            .map_err(AutopilotError::TrackerApi)?;

        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AutopilotError::Authentication(format!(
                "github rejected credentials: {status}"
            )));
        }
        if !status.is_success() {
            return Err(AutopilotError::Host(format!(
                "github returned {status} for {path}"
            )));
        }
        resp.json::<T>().await.map_err(AutopilotError::TrackerApi)
    }
}

#[derive(Deserialize)]
struct PullRequestResponse {
    merged: bool,
    mergeable: Option<bool>,
    head: HeadRef,
}

#[derive(Deserialize)]
struct HeadRef {
    #[serde(rename = "ref")]
    branch: String,
    sha: String,
}

#[derive(Deserialize)]
struct CheckRunsResponse {
    check_runs: Vec<CheckRunResponse>,
}

#[derive(Deserialize)]
struct CheckRunResponse {
    name: String,
    status: String,
    conclusion: Option<String>,
}

#[derive(Deserialize)]
struct ReviewResponse {
    id: u64,
    state: String,
}

#[async_trait]
impl Host for GitHubHostClient {
    async fn pr_status(&self, owner: &str, repo: &str, number: u64) -> Result<PrStatus> {
        let pr: PullRequestResponse = self
            .get_json(&format!("/repos/{owner}/{repo}/pulls/{number}"))
            .await?;

        let check_runs_resp: CheckRunsResponse = self
            .get_json(&format!(
                "/repos/{owner}/{repo}/commits/{}/check-runs",
                pr.head.sha
            ))
            .await?;

        let reviews_resp: Vec<ReviewResponse> = self
            .get_json(&format!("/repos/{owner}/{repo}/pulls/{number}/reviews"))
            .await?;

        Ok(PrStatus {
            merged: pr.merged,
            mergeable: pr.mergeable,
            check_runs: check_runs_resp
                .check_runs
                .into_iter()
                .map(|c| CheckRun {
                    name: c.name,
                    completed: c.status == "completed",
                    conclusion: c.conclusion,
                })
                .collect(),
            reviews: reviews_resp
                .into_iter()
                .map(|r| Review {
                    id: r.id.to_string(),
                    state: r.state,
                })
                .collect(),
            branch: pr.head.branch,
            head_sha: pr.head.sha,
        })
    }
}

/// Parse an `owner/repo/number` triple out of a GitHub PR URL, e.g.
/// `https://github.com/acme/widgets/pull/42`.
pub fn parse_pr_url(url: &str) -> Option<(String, String, u64)> {
    let re = regex::Regex::new(r"github\.com/([^/]+)/([^/]+)/pull/(\d+)").ok()?;
    let caps = re.captures(url)?;
    let owner = caps.get(1)?.as_str().to_string();
    let repo = caps.get(2)?.as_str().to_string();
    let number: u64 = caps.get(3)?.as_str().parse().ok()?;
    Some((owner, repo, number))
}

/// Derive overall CI status from check runs, per the classification rule:
/// success if every completed check succeeded, failure if any completed
/// check failed, pending otherwise.
pub fn ci_status(check_runs: &[CheckRun]) -> crate::models::CiStatus {
    use crate::models::CiStatus;

    let completed: Vec<&CheckRun> = check_runs.iter().filter(|c| c.completed).collect();

    if completed
        .iter()
        .any(|c| c.conclusion.as_deref() == Some("failure"))
    {
        return CiStatus::Failure;
    }
    if !completed.is_empty()
        && completed.len() == check_runs.len()
        && completed
            .iter()
            .all(|c| c.conclusion.as_deref() == Some("success"))
    {
        return CiStatus::Success;
    }
    CiStatus::Pending
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(name: &str, completed: bool, conclusion: Option<&str>) -> CheckRun {
        CheckRun {
            name: name.to_string(),
            completed,
            conclusion: conclusion.map(|s| s.to_string()),
        }
    }

    #[test]
    fn all_success_is_success() {
        let runs = vec![check("a", true, Some("success")), check("b", true, Some("success"))];
        assert_eq!(ci_status(&runs), crate::models::CiStatus::Success);
    }

    #[test]
    fn any_failure_is_failure() {
        let runs = vec![check("a", true, Some("success")), check("b", true, Some("failure"))];
        assert_eq!(ci_status(&runs), crate::models::CiStatus::Failure);
    }

    #[test]
    fn incomplete_is_pending() {
        let runs = vec![check("a", true, Some("success")), check("b", false, None)];
        assert_eq!(ci_status(&runs), crate::models::CiStatus::Pending);
    }

    #[test]
    fn parses_pull_url() {
        let (owner, repo, number) =
            parse_pr_url("https://github.com/acme/widgets/pull/42").unwrap();
        assert_eq!(owner, "acme");
        assert_eq!(repo, "widgets");
        assert_eq!(number, 42);
    }
}
