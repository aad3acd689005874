use crate::error::{CollectorError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.github.com/";
const USER_AGENT: &str = concat!("tally-agent/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Owner {
    #[serde(default)]
    pub login: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct License {
    #[serde(default)]
    pub name: Option<String>,
}

/// The subset of the repository resource the input reports.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Repository {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner: Owner,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub license: Option<License>,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub subscribers_count: u64,
    #[serde(default)]
    pub watchers_count: u64,
    #[serde(default)]
    pub network_count: u64,
    #[serde(default)]
    pub forks_count: u64,
    #[serde(default)]
    pub open_issues_count: u64,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    total_count: u64,
}

/// Calls the input makes against the source-control hosting API.
#[async_trait]
pub trait RepositoryApi: Send + Sync {
    async fn get_repository(&self, owner: &str, repo: &str) -> Result<Repository>;

    /// Number of issues matching an issue-search query.
    async fn search_issue_count(&self, query: &str) -> Result<u64>;
}

/// `reqwest`-backed client for the public API or an enterprise install.
pub struct GithubClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(token: Option<&str>, enterprise_base_url: Option<&str>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        let base = match enterprise_base_url {
            Some(url) if !url.trim().is_empty() => enterprise_api_url(url.trim()),
            _ => DEFAULT_BASE_URL.to_string(),
        };
        let base_url = Url::parse(&base)
            .map_err(|e| CollectorError::InvalidConfig(format!("github: invalid base url {base:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(CollectorError::InvalidConfig(format!(
                "github: base url {base:?} cannot carry a path"
            )));
        }

        Ok(Self {
            http,
            base_url,
            token: token.filter(|t| !t.is_empty()).map(str::to_string),
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Appends `segments` to the base URL, percent-encoding each one, so an
    /// owner or repository name can never add path, query or fragment parts.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, url: Url) -> RequestBuilder {
        let builder = self
            .http
            .get(url)
            .header("Accept", "application/vnd.github+json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(CollectorError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl RepositoryApi for GithubClient {
    async fn get_repository(&self, owner: &str, repo: &str) -> Result<Repository> {
        self.send(self.request(self.endpoint(&["repos", owner, repo]))).await
    }

    async fn search_issue_count(&self, query: &str) -> Result<u64> {
        let builder = self
            .request(self.endpoint(&["search", "issues"]))
            .query(&[("q", query), ("per_page", "100"), ("page", "1")]);
        let result: SearchResult = self.send(builder).await?;
        Ok(result.total_count)
    }
}

/// Normalizes an enterprise server URL to its REST root (`.../api/v3/`).
///
/// # Examples
///
/// ```
/// use tally_collector::github::client::enterprise_api_url;
///
/// assert_eq!(enterprise_api_url("https://git.corp"), "https://git.corp/api/v3/");
/// assert_eq!(enterprise_api_url("https://git.corp/api/v3/"), "https://git.corp/api/v3/");
/// ```
pub fn enterprise_api_url(url: &str) -> String {
    let mut base = url.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    if !base.ends_with("/api/v3/") {
        base.push_str("api/v3/");
    }
    base
}

/// Token form that is safe to log.
///
/// # Examples
///
/// ```
/// use tally_collector::github::client::obfuscate_token;
///
/// assert_eq!(obfuscate_token(None), "Unauthenticated");
/// assert_eq!(obfuscate_token(Some("ghp_abcdefgh1234")), "ghp_...234");
/// ```
pub fn obfuscate_token(token: Option<&str>) -> String {
    match token {
        None | Some("") => "Unauthenticated".to_string(),
        Some(t) => {
            let chars: Vec<char> = t.chars().collect();
            if chars.len() < 8 {
                return "***".to_string();
            }
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[chars.len() - 3..].iter().collect();
            format!("{head}...{tail}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, token: Option<&str>) -> GithubClient {
        let mut client = GithubClient::new(token, None, Duration::from_secs(2)).unwrap();
        client.base_url = Url::parse(&format!("{}/", server.uri())).unwrap();
        client
    }

    #[tokio::test]
    async fn fetches_repository() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/Hello-World"))
            .and(header("Authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "Hello-World",
                "owner": {"login": "octocat"},
                "language": null,
                "license": {"name": "MIT License"},
                "stargazers_count": 80,
                "subscribers_count": 42,
                "watchers_count": 80,
                "network_count": 9,
                "forks_count": 9,
                "open_issues_count": 0,
                "size": 108
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Some("secret-token"));
        let repo = client.get_repository("octocat", "Hello-World").await.unwrap();
        assert_eq!(repo.name, "Hello-World");
        assert_eq!(repo.owner.login, "octocat");
        assert_eq!(repo.language, None);
        assert_eq!(repo.stargazers_count, 80);
        assert_eq!(repo.size, 108);
    }

    #[tokio::test]
    async fn search_returns_total_count() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/issues"))
            .and(query_param("q", "repo:octocat/Hello-World is:pr is:open"))
            .and(query_param("per_page", "100"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"total_count": 17, "items": []})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        let count = client
            .search_issue_count("repo:octocat/Hello-World is:pr is:open")
            .await
            .unwrap();
        assert_eq!(count, 17);
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string(r#"{"message":"Not Found"}"#))
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        let err = client.get_repository("octocat", "missing").await.unwrap_err();
        assert!(matches!(err, CollectorError::Api { status: 404, .. }));
    }

    #[test]
    fn base_url_selection() {
        let public = GithubClient::new(None, None, Duration::from_secs(1)).unwrap();
        assert_eq!(public.base_url(), "https://api.github.com/");

        let enterprise = GithubClient::new(None, Some("https://git.corp/"), Duration::from_secs(1)).unwrap();
        assert_eq!(enterprise.base_url(), "https://git.corp/api/v3/");
    }

    #[tokio::test]
    async fn path_segments_are_percent_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/octocat/what%3Fnot%23frag"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "what?not#frag",
                "owner": {"login": "octocat"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        let repo = client.get_repository("octocat", "what?not#frag").await.unwrap();
        assert_eq!(repo.name, "what?not#frag");
    }

    #[test]
    fn endpoint_keeps_the_enterprise_prefix() {
        let client = GithubClient::new(None, Some("https://git.corp"), Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.endpoint(&["repos", "team", "a/b"]).as_str(),
            "https://git.corp/api/v3/repos/team/a%2Fb"
        );
        assert_eq!(
            client.endpoint(&["search", "issues"]).as_str(),
            "https://git.corp/api/v3/search/issues"
        );
    }

    #[test]
    fn invalid_enterprise_url_is_a_config_error() {
        let err = GithubClient::new(None, Some("not a url"), Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, CollectorError::InvalidConfig(_)));
    }

    #[test]
    fn short_tokens_are_fully_masked() {
        assert_eq!(obfuscate_token(Some("abc")), "***");
        assert_eq!(obfuscate_token(Some("")), "Unauthenticated");
    }
}
