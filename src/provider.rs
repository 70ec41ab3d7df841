//! Remote content API client for GitHub and Forgejo/Gitea.
//!
//! Both providers expose the same repository contents API with small
//! differences in authentication, the verb used to create a file, and the
//! shape of error bodies. Those differences live in [`Dialect`], chosen
//! once from configuration; everything above this module is dialect-agnostic.
//!
//! HTTP goes through the [`Transport`] trait so the client can be driven
//! by an in-memory remote in tests.

use std::future::Future;
use std::time::Duration;

use base64::Engine;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::GitConfig;
use crate::error::{NoteSyncError, NoteSyncResult};
use crate::models::RemoteFile;

/// Request timeout for a single API call
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// GitHub REST API version header value
pub const GITHUB_API_VERSION: &str = "2022-11-28";

/// Supported remote API dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    GitHub,
    #[serde(alias = "gitea")]
    Forgejo,
}

impl Dialect {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "github" => Some(Dialect::GitHub),
            "forgejo" | "gitea" => Some(Dialect::Forgejo),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::GitHub => "github",
            Dialect::Forgejo => "forgejo",
        }
    }

    /// API base used when none is configured
    pub fn default_api_base(&self) -> &'static str {
        match self {
            Dialect::GitHub => "https://api.github.com",
            // Forgejo instances are usually self-hosted
            Dialect::Forgejo => "http://localhost:3000/api/v1",
        }
    }

    /// Authentication and content negotiation headers
    pub fn auth_headers(&self, token: &str) -> Vec<(&'static str, String)> {
        match self {
            Dialect::GitHub => vec![
                ("Authorization", format!("Bearer {}", token)),
                ("Accept", "application/vnd.github.v3+json".to_string()),
                ("X-GitHub-Api-Version", GITHUB_API_VERSION.to_string()),
            ],
            Dialect::Forgejo => vec![
                ("Authorization", format!("token {}", token)),
                ("Accept", "application/json".to_string()),
            ],
        }
    }

    /// Verb for creating a file that does not exist yet
    pub fn create_method(&self) -> Method {
        match self {
            Dialect::GitHub => Method::PUT,
            Dialect::Forgejo => Method::POST,
        }
    }

    /// Verb for replacing an existing file (always sent with its sha)
    pub fn update_method(&self) -> Method {
        Method::PUT
    }

    /// Whether the connection test should probe `/user` first
    pub fn probes_user(&self) -> bool {
        matches!(self, Dialect::Forgejo)
    }

    /// Extract a message from an error body.
    pub fn error_message(&self, status: u16, body: &str) -> String {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let field = |name: &str| {
            parsed
                .as_ref()
                .and_then(|v| v.get(name))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        let message = match self {
            Dialect::GitHub => field("message"),
            // Forgejo puts the useful text in `error` on some endpoints
            Dialect::Forgejo => field("error").or_else(|| field("message")),
        };

        message
            .or_else(|| parsed.as_ref().and_then(|v| v.as_str()).map(str::to_string))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("HTTP error: {}", status))
    }
}

/// One HTTP request to the provider
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<Value>,
}

/// Raw HTTP response from the provider
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

/// HTTP transport used by [`ProviderClient`].
pub trait Transport: Send + Sync {
    /// Send one request. Only transport failures are errors; HTTP error
    /// statuses come back as a normal response.
    fn send(&self, request: ApiRequest) -> impl Future<Output = NoteSyncResult<ApiResponse>> + Send;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> NoteSyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("notesync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NoteSyncError::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> NoteSyncResult<ApiResponse> {
        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| NoteSyncError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| NoteSyncError::Network(e.to_string()))?;

        Ok(ApiResponse { status, body })
    }
}

/// Name and email recorded as the commit author
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committer {
    pub name: String,
    pub email: String,
}

/// Decoded file fetched from the contents API
#[derive(Debug, Clone)]
pub struct RemoteContent {
    pub content: Vec<u8>,
    pub sha: String,
}

/// Repository details returned by the connectivity probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoInfo {
    pub id: i64,
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default = "default_branch_name")]
    pub default_branch: String,
}

fn default_branch_name() -> String {
    "main".to_string()
}

/// Authenticated user returned by the auth probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub login: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<RemoteFile>,
}

/// Percent-encode each path segment, keeping `/` separators
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Client for one repository and branch
pub struct ProviderClient<T = HttpTransport> {
    transport: T,
    dialect: Dialect,
    api_base: String,
    repo: String,
    branch: String,
    token: String,
    committer: Committer,
}

impl ProviderClient<HttpTransport> {
    /// Build a client over HTTP from configuration
    pub fn from_config(git: &GitConfig) -> NoteSyncResult<Self> {
        Ok(Self::with_transport(git, HttpTransport::new()?))
    }
}

impl<T: Transport> ProviderClient<T> {
    /// Build a client over the given transport
    pub fn with_transport(git: &GitConfig, transport: T) -> Self {
        Self {
            transport,
            dialect: git.provider,
            api_base: git.api_base(),
            repo: git.repo.trim().to_string(),
            branch: git.branch.trim().to_string(),
            token: git.token.trim().to_string(),
            committer: Committer {
                name: git.author_name.clone(),
                email: git.author_email.clone(),
            },
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn committer(&self) -> &Committer {
        &self.committer
    }

    fn contents_endpoint(&self, path: &str) -> String {
        format!("/repos/{}/contents/{}", self.repo, encode_path(path))
    }

    fn ref_query(&self) -> String {
        format!("?ref={}", urlencoding::encode(&self.branch))
    }

    async fn request(&self, method: Method, endpoint: &str, body: Option<Value>) -> NoteSyncResult<Value> {
        let url = format!("{}/{}", self.api_base, endpoint.trim_start_matches('/'));
        let mut headers = self.dialect.auth_headers(&self.token);
        if body.is_some() {
            headers.push(("Content-Type", "application/json".to_string()));
        }

        tracing::debug!(method = %method, url = %url, "Provider request");

        let response = self
            .transport
            .send(ApiRequest {
                method,
                url,
                headers,
                body,
            })
            .await?;

        if response.status >= 400 {
            let message = self.dialect.error_message(response.status, &response.body);
            return Err(NoteSyncError::from_status(response.status, message));
        }

        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&response.body)
            .map_err(|e| NoteSyncError::Decode(format!("Invalid JSON from provider: {}", e)))
    }

    /// List every entry of the branch in one recursive call.
    pub async fn get_tree(&self) -> NoteSyncResult<Vec<RemoteFile>> {
        let endpoint = format!(
            "/repos/{}/git/trees/{}?recursive=1",
            self.repo,
            encode_path(&self.branch)
        );
        let value = self.request(Method::GET, &endpoint, None).await?;
        let tree: TreeResponse = serde_json::from_value(value)?;
        Ok(tree.tree)
    }

    /// Download and decode one file.
    pub async fn get_file_content(&self, path: &str) -> NoteSyncResult<RemoteContent> {
        let endpoint = format!("{}{}", self.contents_endpoint(path), self.ref_query());
        let value = self.request(Method::GET, &endpoint, None).await?;

        let encoded = value
            .get("content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| NoteSyncError::Decode(format!("No content returned for {}", path)))?;
        let sha = value
            .get("sha")
            .and_then(|s| s.as_str())
            .unwrap_or_default()
            .to_string();

        // The API wraps base64 at 60 columns
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let content = base64::engine::general_purpose::STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| NoteSyncError::Decode(format!("Invalid base64 for {}: {}", path, e)))?;

        Ok(RemoteContent { content, sha })
    }

    /// Current blob sha of a file, or `None` if it does not exist.
    pub async fn get_file_sha(&self, path: &str) -> NoteSyncResult<Option<String>> {
        let endpoint = format!("{}{}", self.contents_endpoint(path), self.ref_query());
        match self.request(Method::GET, &endpoint, None).await {
            Ok(value) => Ok(value.get("sha").and_then(|s| s.as_str()).map(str::to_string)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create or replace a file. With `known_sha` the provider checks that
    /// the file still has that sha before replacing it.
    ///
    /// Returns the sha reported by the provider.
    pub async fn create_or_update_file(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
        known_sha: Option<&str>,
    ) -> NoteSyncResult<String> {
        let mut body = json!({
            "message": message,
            "content": base64::engine::general_purpose::STANDARD.encode(content),
            "branch": self.branch,
            "committer": {
                "name": self.committer.name,
                "email": self.committer.email,
            },
        });

        let method = match known_sha {
            Some(sha) => {
                body["sha"] = Value::String(sha.to_string());
                self.dialect.update_method()
            }
            None => self.dialect.create_method(),
        };

        let value = self
            .request(method, &self.contents_endpoint(path), Some(body))
            .await?;

        value
            .pointer("/content/sha")
            .or_else(|| value.pointer("/commit/sha"))
            .and_then(|s| s.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                NoteSyncError::Decode(format!("Provider did not return a sha after writing {}", path))
            })
    }

    /// Delete a file. Fetches its current sha first; a change between the
    /// two calls surfaces as a conflict and is not retried.
    pub async fn delete_file(&self, path: &str, message: &str) -> NoteSyncResult<()> {
        let sha = self.get_file_sha(path).await?.ok_or_else(|| NoteSyncError::NotFound {
            status: 404,
            message: format!("File not found or unable to get sha: {}", path),
        })?;

        let body = json!({
            "message": message,
            "sha": sha,
            "branch": self.branch,
            "committer": {
                "name": self.committer.name,
                "email": self.committer.email,
            },
        });

        let value = self
            .request(Method::DELETE, &self.contents_endpoint(path), Some(body))
            .await?;

        if value.get("commit").is_some() {
            Ok(())
        } else {
            Err(NoteSyncError::Decode(format!(
                "Provider did not confirm deletion of {}",
                path
            )))
        }
    }

    /// Connectivity probe against the repository
    pub async fn probe_repo(&self) -> NoteSyncResult<RepoInfo> {
        let value = self
            .request(Method::GET, &format!("/repos/{}", self.repo), None)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Authentication probe
    pub async fn probe_user(&self) -> NoteSyncResult<UserInfo> {
        let value = self.request(Method::GET, "/user", None).await?;
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_remote::FakeRemote;

    #[test]
    fn test_encode_path_keeps_separators() {
        assert_eq!(encode_path("attachments/my file#1.png"), "attachments/my%20file%231.png");
        assert_eq!(encode_path("entries/12.md"), "entries/12.md");
        assert_eq!(encode_path("a?b/c&d"), "a%3Fb/c%26d");
    }

    #[test]
    fn test_dialect_headers_and_verbs() {
        let gh = Dialect::GitHub.auth_headers("t");
        assert!(gh.contains(&("Authorization", "Bearer t".to_string())));
        assert!(gh.iter().any(|(k, v)| *k == "Accept" && v.contains("vnd.github")));
        assert_eq!(Dialect::GitHub.create_method(), Method::PUT);

        let fj = Dialect::Forgejo.auth_headers("t");
        assert!(fj.contains(&("Authorization", "token t".to_string())));
        assert!(fj.contains(&("Accept", "application/json".to_string())));
        assert_eq!(Dialect::Forgejo.create_method(), Method::POST);
        assert_eq!(Dialect::Forgejo.update_method(), Method::PUT);
    }

    #[test]
    fn test_error_envelopes() {
        assert_eq!(
            Dialect::GitHub.error_message(404, r#"{"message":"Not Found","documentation_url":"x"}"#),
            "Not Found"
        );
        assert_eq!(
            Dialect::Forgejo.error_message(422, r#"{"message":"","error":"sha does not match"}"#),
            "sha does not match"
        );
        assert_eq!(Dialect::Forgejo.error_message(500, "<html>"), "HTTP error: 500");
    }

    #[test]
    fn test_dialect_parse_and_serde() {
        assert_eq!(Dialect::parse("Gitea"), Some(Dialect::Forgejo));
        assert_eq!(Dialect::parse("gitlab"), None);
        let d: Dialect = serde_json::from_str("\"gitea\"").unwrap();
        assert_eq!(d, Dialect::Forgejo);
        assert_eq!(serde_json::to_string(&Dialect::GitHub).unwrap(), "\"github\"");
    }

    #[tokio::test]
    async fn test_file_round_trip_through_contents_api() {
        let remote = FakeRemote::new(Dialect::Forgejo);
        let client = ProviderClient::with_transport(&remote.git_config(), remote.clone());

        let sha = client
            .create_or_update_file("attachments/a b.txt", b"payload", "add", None)
            .await
            .unwrap();
        assert_eq!(sha, crate::hasher::git_blob_sha(b"payload"));

        let fetched = client.get_file_content("attachments/a b.txt").await.unwrap();
        assert_eq!(fetched.content, b"payload");
        assert_eq!(fetched.sha, sha);

        let tree = client.get_tree().await.unwrap();
        assert!(tree.iter().any(|f| f.path == "attachments/a b.txt" && f.is_blob()));

        client.delete_file("attachments/a b.txt", "remove").await.unwrap();
        assert!(client.get_file_sha("attachments/a b.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_sends_known_sha() {
        let remote = FakeRemote::new(Dialect::GitHub);
        remote.put_file("entries/1.md", b"old");
        let client = ProviderClient::with_transport(&remote.git_config(), remote.clone());

        let old_sha = crate::hasher::git_blob_sha(b"old");
        client
            .create_or_update_file("entries/1.md", b"new", "update", Some(&old_sha))
            .await
            .unwrap();

        let writes = remote.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].method, Method::PUT);
        assert!(writes[0].has_sha);
        assert_eq!(remote.file("entries/1.md").unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_stale_sha_is_conflict() {
        let remote = FakeRemote::new(Dialect::GitHub);
        remote.put_file("entries/1.md", b"current");
        let client = ProviderClient::with_transport(&remote.git_config(), remote);

        let err = client
            .create_or_update_file("entries/1.md", b"new", "update", Some("0000"))
            .await
            .unwrap_err();
        assert!(matches!(err, NoteSyncError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_wrong_auth_scheme_is_rejected() {
        // A Forgejo server does not accept GitHub-style bearer auth here
        let remote = FakeRemote::new(Dialect::Forgejo);
        let git = GitConfig {
            provider: Dialect::GitHub,
            ..remote.git_config()
        };
        let client = ProviderClient::with_transport(&git, remote);

        let err = client.probe_user().await.unwrap_err();
        assert!(matches!(err, NoteSyncError::Auth { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_probe_repo() {
        let remote = FakeRemote::new(Dialect::GitHub);
        let client = ProviderClient::with_transport(&remote.git_config(), remote.clone());

        let info = client.probe_repo().await.unwrap();
        assert_eq!(info.full_name, remote.repo());
        assert_eq!(info.default_branch, "main");
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_not_found() {
        let remote = FakeRemote::new(Dialect::GitHub);
        let client = ProviderClient::with_transport(&remote.git_config(), remote);

        let err = client.delete_file("entries/9.md", "rm").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
