//! GitHub REST API client for opening pull requests.

use serde::Deserialize;
use tracing::info;

use super::git::github_slug;
use super::{PullRequest, PullRequests};
use crate::config::GithubSection;
use crate::error::{CovboostError, Result};

const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "covboost";

/// Repository coordinates and credentials for the GitHub API.
pub struct GithubClient {
    api_url: String,
    repo: String,
    base_branch: String,
    token: String,
}

impl std::fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubClient")
            .field("api_url", &self.api_url)
            .field("repo", &self.repo)
            .field("base_branch", &self.base_branch)
            .finish_non_exhaustive()
    }
}

impl GithubClient {
    pub fn new(
        api_url: impl Into<String>,
        repo: impl Into<String>,
        base_branch: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            repo: repo.into(),
            base_branch: base_branch.into(),
            token: token.into(),
        }
    }

    /// Resolve the repository from configuration, falling back to the clone
    /// URL, and read the token from the configured environment variable.
    pub fn from_config(config: &GithubSection, repo_url: Option<&str>) -> Result<Self> {
        let repo = config
            .repository
            .clone()
            .or_else(|| repo_url.and_then(github_slug))
            .ok_or_else(|| {
                CovboostError::Config(
                    "github.repository is not set and cannot be derived from the repository URL"
                        .to_string(),
                )
            })?;
        let token = std::env::var(&config.token_env).map_err(|_| {
            CovboostError::Config(format!(
                "{} environment variable is required to open pull requests",
                config.token_env
            ))
        })?;
        Ok(Self::new(&config.api_url, repo, &config.base_branch, token))
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }
}

#[derive(Deserialize)]
struct CreatedPull {
    number: u64,
    html_url: String,
}

impl PullRequests for GithubClient {
    fn open_pull_request(&self, title: &str, body: &str, head_branch: &str) -> Result<PullRequest> {
        let url = format!("{}/repos/{}/pulls", self.api_url, self.repo);
        let resp = ureq::post(&url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Accept", "application/vnd.github+json")
            .set("User-Agent", USER_AGENT)
            .set("X-GitHub-Api-Version", API_VERSION)
            .send_json(serde_json::json!({
                "title": title,
                "body": body,
                "head": head_branch,
                "base": self.base_branch,
            }));

        let resp = match resp {
            Ok(resp) => resp,
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                return Err(CovboostError::tool(
                    "github",
                    format!("API error creating pull request (HTTP {code}): {body}"),
                ));
            }
            Err(e) => {
                return Err(CovboostError::tool(
                    "github",
                    format!("failed to create pull request: {e}"),
                ))
            }
        };

        let created: CreatedPull = resp.into_json().map_err(|e| {
            CovboostError::tool("github", format!("unreadable pull request response: {e}"))
        })?;
        info!(repo = %self.repo, number = created.number, url = %created.html_url, "pull request opened");
        Ok(PullRequest {
            number: created.number,
            url: created.html_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_from_clone_url() {
        std::env::set_var("COVBOOST_TEST_TOKEN_A", "t0k3n");
        let config = GithubSection {
            token_env: "COVBOOST_TEST_TOKEN_A".into(),
            ..Default::default()
        };
        let client =
            GithubClient::from_config(&config, Some("https://github.com/acme/widgets.git")).unwrap();
        assert_eq!(client.repo(), "acme/widgets");
        assert!(!format!("{client:?}").contains("t0k3n"));
    }

    #[test]
    fn test_explicit_repository_wins() {
        std::env::set_var("COVBOOST_TEST_TOKEN_B", "x");
        let config = GithubSection {
            repository: Some("other/repo".into()),
            token_env: "COVBOOST_TEST_TOKEN_B".into(),
            ..Default::default()
        };
        let client =
            GithubClient::from_config(&config, Some("https://github.com/acme/widgets")).unwrap();
        assert_eq!(client.repo(), "other/repo");
    }

    #[test]
    fn test_missing_token() {
        let config = GithubSection {
            repository: Some("a/b".into()),
            token_env: "COVBOOST_TEST_TOKEN_UNSET".into(),
            ..Default::default()
        };
        let err = GithubClient::from_config(&config, None).unwrap_err();
        assert!(err.to_string().contains("COVBOOST_TEST_TOKEN_UNSET"));
    }

    #[test]
    fn test_unknown_repository() {
        let config = GithubSection::default();
        let err = GithubClient::from_config(&config, Some("/local/path")).unwrap_err();
        assert!(matches!(err, CovboostError::Config(_)));
    }
}
