//! Input reporting repository statistics from the GitHub API.
//!
//! Every tick fans out one task per configured repository (bounded by
//! `concurrency`). A task fetches the repository record, then any
//! additional fields, and pushes `github_<field>` samples tagged with the
//! repository's owner, name, language and license. One repository failing
//! never affects the others.

pub mod client;

use crate::error::{CollectorError, Result as CollectorResult};
use crate::fanout::fan_out;
use crate::plugin::{parse_config, InputPlugin};
use crate::Instance;
use anyhow::Result;
use async_trait::async_trait;
use client::{obfuscate_token, GithubClient, Repository, RepositoryApi};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tally_common::types::{merge_labels, Labels};
use tally_common::SampleList;
use tokio::sync::OnceCell;

const INPUT_NAME: &str = "github";

/// Additional field fetching pull-request counts per state.
pub const PULL_REQUESTS_FIELD: &str = "pull-requests";

const PULL_REQUEST_CLASSES: [&str; 2] = ["open", "closed"];

#[derive(Debug, Clone, Deserialize)]
pub struct GithubConfig {
    /// Repositories as `owner/repository`.
    #[serde(default)]
    pub repositories: Vec<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub additional_fields: Vec<String>,
    #[serde(default)]
    pub enterprise_base_url: Option<String>,
    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

fn default_response_timeout_secs() -> u64 {
    5
}

fn default_concurrency() -> usize {
    5
}

pub struct GithubPlugin;

impl InputPlugin for GithubPlugin {
    fn name(&self) -> &str {
        INPUT_NAME
    }

    fn description(&self) -> &str {
        "gather repository information from GitHub hosted repositories"
    }

    fn create_instance(&self, config: toml::Value) -> Result<Box<dyn Instance>> {
        let config: GithubConfig = parse_config(INPUT_NAME, config)?;
        if config.repositories.is_empty() {
            return Err(CollectorError::InvalidConfig("github: repositories must not be empty".into()).into());
        }
        Ok(Box::new(GithubInstance::new(config)))
    }
}

pub struct GithubInstance {
    config: Arc<GithubConfig>,
    api: OnceCell<Arc<dyn RepositoryApi>>,
}

impl GithubInstance {
    pub fn new(config: GithubConfig) -> Self {
        Self {
            config: Arc::new(config),
            api: OnceCell::new(),
        }
    }

    /// Builds an instance around an existing API handle instead of a lazily
    /// created HTTP client.
    pub fn with_api(config: GithubConfig, api: Arc<dyn RepositoryApi>) -> Self {
        Self {
            config: Arc::new(config),
            api: OnceCell::new_with(Some(api)),
        }
    }

    /// Returns the shared API handle, creating the HTTP client on first use.
    async fn api(&self) -> CollectorResult<Arc<dyn RepositoryApi>> {
        let api = self
            .api
            .get_or_try_init(|| async {
                let config = &self.config;
                let client = GithubClient::new(
                    config.access_token.as_deref(),
                    config.enterprise_base_url.as_deref(),
                    Duration::from_secs(config.response_timeout_secs),
                )?;
                tracing::info!(
                    base_url = %client.base_url(),
                    token = %obfuscate_token(config.access_token.as_deref()),
                    "GitHub client created"
                );
                Ok::<_, CollectorError>(Arc::new(client) as Arc<dyn RepositoryApi>)
            })
            .await?;
        Ok(Arc::clone(api))
    }
}

#[async_trait]
impl Instance for GithubInstance {
    fn plugin(&self) -> &str {
        INPUT_NAME
    }

    fn interval(&self) -> Option<Duration> {
        self.config.interval_secs.map(Duration::from_secs)
    }

    fn init(&mut self) -> Result<()> {
        for field in &self.config.additional_fields {
            if field != PULL_REQUESTS_FIELD {
                tracing::warn!(field = %field, "Unknown GitHub additional field, it will be skipped");
            }
        }
        Ok(())
    }

    async fn gather(&self, slist: &SampleList) {
        let api = match self.api().await {
            Ok(api) => api,
            Err(e) => {
                tracing::error!(error = %e, "Failed to create GitHub client");
                return;
            }
        };

        let config = Arc::clone(&self.config);
        let sink = slist.clone();
        let completed = fan_out(self.config.repositories.clone(), self.config.concurrency, move |identifier| {
            let api = Arc::clone(&api);
            let config = Arc::clone(&config);
            let sink = sink.clone();
            async move {
                match collect_repository(api.as_ref(), &identifier, &config.additional_fields).await {
                    Ok(report) => {
                        let labels = merge_labels(&[&config.labels, &report.tags]);
                        sink.push_samples(
                            INPUT_NAME,
                            report.fields.iter().map(|(k, v)| (k.as_str(), *v)),
                            &labels,
                        );
                    }
                    Err(e) => {
                        tracing::warn!(repository = %identifier, error = %e, "Failed to gather repository");
                    }
                }
            }
        })
        .await;

        tracing::debug!(
            repositories = self.config.repositories.len(),
            completed,
            "GitHub gather finished"
        );
    }

    fn shutdown(&mut self) {
        self.api = OnceCell::new();
    }
}

/// Tags and numeric fields gathered for one repository, fields in report
/// order.
#[derive(Debug, Clone, Default)]
pub struct RepositoryReport {
    pub tags: Labels,
    pub fields: Vec<(String, f64)>,
}

/// Splits `owner/repository` at the first `/`.
///
/// # Examples
///
/// ```
/// use tally_collector::github::split_repository_name;
///
/// assert_eq!(split_repository_name("octocat/Hello-World").unwrap(), ("octocat", "Hello-World"));
/// assert!(split_repository_name("badid").is_err());
/// ```
pub fn split_repository_name(identifier: &str) -> CollectorResult<(&str, &str)> {
    identifier
        .split_once('/')
        .ok_or_else(|| CollectorError::MalformedIdentifier(identifier.to_string()))
}

/// Fetches and transforms one repository.
///
/// Additional-field failures are logged and leave that field out; only a
/// malformed identifier or a failed primary fetch is an error.
pub async fn collect_repository(
    api: &dyn RepositoryApi,
    identifier: &str,
    additional_fields: &[String],
) -> CollectorResult<RepositoryReport> {
    let (owner, repo) = split_repository_name(identifier)?;
    let repository = api.get_repository(owner, repo).await?;

    let mut report = RepositoryReport {
        tags: repository_tags(&repository),
        fields: repository_fields(&repository),
    };

    for field in additional_fields {
        match field.as_str() {
            PULL_REQUESTS_FIELD => match pull_request_fields(api, owner, repo).await {
                Ok(fields) => report.fields.extend(fields),
                Err(e) => {
                    tracing::warn!(repository = %identifier, error = %e, "Failed to get pull request fields");
                }
            },
            other => {
                tracing::warn!(repository = %identifier, field = %other, "Unknown additional field");
            }
        }
    }

    Ok(report)
}

/// One search per class, in order; the first failure stops the rest.
async fn pull_request_fields(api: &dyn RepositoryApi, owner: &str, repo: &str) -> CollectorResult<Vec<(String, f64)>> {
    let mut fields = Vec::with_capacity(PULL_REQUEST_CLASSES.len());
    for class in PULL_REQUEST_CLASSES {
        let query = format!("repo:{owner}/{repo} is:pr is:{class}");
        let total = api.search_issue_count(&query).await?;
        fields.push((format!("{class}_pull_requests"), total as f64));
    }
    Ok(fields)
}

fn repository_tags(repository: &Repository) -> Labels {
    let license = repository
        .license
        .as_ref()
        .and_then(|l| l.name.clone())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "None".to_string());

    let mut tags = Labels::with_capacity(4);
    tags.insert("owner".to_string(), repository.owner.login.clone());
    tags.insert("name".to_string(), repository.name.clone());
    tags.insert("language".to_string(), repository.language.clone().unwrap_or_default());
    tags.insert("license".to_string(), license);
    tags
}

fn repository_fields(repository: &Repository) -> Vec<(String, f64)> {
    [
        ("stars", repository.stargazers_count),
        ("subscribers", repository.subscribers_count),
        ("watchers", repository.watchers_count),
        ("networks", repository.network_count),
        ("forks", repository.forks_count),
        ("open_issues", repository.open_issues_count),
        ("size", repository.size),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value as f64))
    .collect()
}
