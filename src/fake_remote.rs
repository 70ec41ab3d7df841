//! In-memory repository that speaks the contents API of either dialect.
//!
//! Used by tests in place of a real provider. Records every request so
//! tests can assert on verbs, paths and whether a sha was sent.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine;
use reqwest::Method;
use serde_json::{json, Value};

use crate::config::GitConfig;
use crate::error::NoteSyncResult;
use crate::hasher::git_blob_sha;
use crate::provider::{ApiRequest, ApiResponse, Dialect, Transport};

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    /// Decoded repository path for contents calls, endpoint otherwise
    pub path: String,
    pub has_sha: bool,
    pub authorization: Option<String>,
}

#[derive(Default)]
struct State {
    files: BTreeMap<String, Vec<u8>>,
    requests: Vec<RecordedRequest>,
    failing_writes: HashSet<String>,
    failing_reads: HashSet<String>,
    tree_unavailable: bool,
}

static NEXT_REPO: AtomicUsize = AtomicUsize::new(1);

#[derive(Clone)]
pub struct FakeRemote {
    dialect: Dialect,
    repo: String,
    state: Arc<Mutex<State>>,
}

impl FakeRemote {
    pub const API_BASE: &'static str = "https://git.fake/api";
    pub const TOKEN: &'static str = "test-token";

    /// A fresh empty repository with a name unique to this process, so
    /// tests running in parallel never share a repository lock
    pub fn new(dialect: Dialect) -> Self {
        let n = NEXT_REPO.fetch_add(1, Ordering::SeqCst);
        Self {
            dialect,
            repo: format!("alice/notes-{}", n),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Git configuration pointing at this remote
    pub fn git_config(&self) -> GitConfig {
        GitConfig {
            enabled: true,
            provider: self.dialect,
            token: Self::TOKEN.to_string(),
            repo: self.repo.clone(),
            api_base: Some(Self::API_BASE.to_string()),
            ..Default::default()
        }
    }

    pub fn put_file(&self, path: &str, content: &[u8]) {
        self.state.lock().unwrap().files.insert(path.to_string(), content.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn file_string(&self, path: &str) -> Option<String> {
        self.file(path).map(|b| String::from_utf8_lossy(&b).to_string())
    }

    pub fn paths(&self) -> Vec<String> {
        self.state.lock().unwrap().files.keys().cloned().collect()
    }

    /// Make writes to `path` fail with a 500
    pub fn fail_writes_to(&self, path: &str) {
        self.state.lock().unwrap().failing_writes.insert(path.to_string());
    }

    /// Make downloads of `path` fail with a 500
    pub fn fail_reads_of(&self, path: &str) {
        self.state.lock().unwrap().failing_reads.insert(path.to_string());
    }

    pub fn set_tree_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().tree_unavailable = unavailable;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Requests that mutate the repository
    pub fn writes(&self) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method != Method::GET)
            .collect()
    }

    pub fn clear_requests(&self) {
        self.state.lock().unwrap().requests.clear();
    }

    fn expected_auth(&self) -> String {
        match self.dialect {
            Dialect::GitHub => format!("Bearer {}", Self::TOKEN),
            Dialect::Forgejo => format!("token {}", Self::TOKEN),
        }
    }

    fn handle(&self, request: ApiRequest) -> ApiResponse {
        let authorization = request
            .headers
            .iter()
            .find(|(k, _)| *k == "Authorization")
            .map(|(_, v)| v.clone());

        let rest = request.url.strip_prefix(Self::API_BASE).unwrap_or(&request.url);
        let endpoint = rest.split('?').next().unwrap_or_default().to_string();
        let repo_prefix = format!("/repos/{}", self.repo);

        let contents_path = endpoint
            .strip_prefix(&format!("{}/contents/", repo_prefix))
            .map(|encoded| {
                encoded
                    .split('/')
                    .map(|s| urlencoding::decode(s).map(|c| c.into_owned()).unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join("/")
            });

        let body = request.body.clone().unwrap_or(Value::Null);
        let sent_sha = body.get("sha").and_then(|s| s.as_str()).map(str::to_string);

        let mut state = self.state.lock().unwrap();
        state.requests.push(RecordedRequest {
            method: request.method.clone(),
            path: contents_path.clone().unwrap_or_else(|| endpoint.clone()),
            has_sha: sent_sha.is_some(),
            authorization: authorization.clone(),
        });

        if authorization.as_deref() != Some(self.expected_auth().as_str()) {
            return error(401, "Bad credentials");
        }

        if endpoint == "/user" {
            return ok(json!({ "login": "alice" }));
        }
        if endpoint == repo_prefix {
            return ok(json!({
                "id": 1,
                "full_name": self.repo,
                "private": true,
                "default_branch": "main",
            }));
        }
        if endpoint.starts_with(&format!("{}/git/trees/", repo_prefix)) {
            if state.tree_unavailable {
                return error(500, "tree unavailable");
            }
            if state.files.is_empty() && self.dialect == Dialect::GitHub {
                return error(409, "Git Repository is empty.");
            }
            let mut dirs = BTreeSet::new();
            let mut tree = Vec::new();
            for (path, content) in &state.files {
                let mut parent = path.as_str();
                while let Some(idx) = parent.rfind('/') {
                    parent = &parent[..idx];
                    dirs.insert(parent.to_string());
                }
                tree.push(json!({ "path": path, "type": "blob", "sha": git_blob_sha(content) }));
            }
            for dir in dirs {
                tree.push(json!({ "path": dir, "type": "tree", "sha": "0".repeat(40) }));
            }
            return ok(json!({ "sha": "root", "tree": tree, "truncated": false }));
        }

        let Some(path) = contents_path else {
            return error(404, "Not Found");
        };
        let current_sha = state.files.get(&path).map(|c| git_blob_sha(c));

        match request.method {
            Method::GET => {
                if state.failing_reads.contains(&path) {
                    return error(500, "read failed");
                }
                match state.files.get(&path) {
                    Some(content) => {
                        let encoded = base64::engine::general_purpose::STANDARD.encode(content);
                        // Wrapped like the real API
                        let wrapped = encoded
                            .as_bytes()
                            .chunks(60)
                            .map(|c| String::from_utf8_lossy(c).to_string())
                            .collect::<Vec<_>>()
                            .join("\n");
                        ok(json!({
                            "path": path,
                            "sha": git_blob_sha(content),
                            "encoding": "base64",
                            "content": wrapped,
                        }))
                    }
                    None => error(404, "Not Found"),
                }
            }
            Method::PUT | Method::POST => {
                if request.method == Method::POST && self.dialect == Dialect::GitHub {
                    return error(404, "Not Found");
                }
                if state.failing_writes.contains(&path) {
                    return error(500, "write failed");
                }
                match (&current_sha, &sent_sha) {
                    (Some(_), None) => return error(422, "sha wasn't supplied"),
                    (Some(cur), Some(sent)) if cur != sent => {
                        return error(409, "sha does not match")
                    }
                    (None, Some(_)) => return error(404, "Not Found"),
                    _ => {}
                }
                if self.dialect == Dialect::Forgejo {
                    // Forgejo: POST creates, PUT updates
                    let creating = current_sha.is_none();
                    if creating != (request.method == Method::POST) {
                        return error(422, "wrong method for file state");
                    }
                }
                let encoded = body.get("content").and_then(|c| c.as_str()).unwrap_or_default();
                let content = match base64::engine::general_purpose::STANDARD.decode(encoded) {
                    Ok(c) => c,
                    Err(_) => return error(400, "bad base64"),
                };
                let sha = git_blob_sha(&content);
                state.files.insert(path.clone(), content);
                ok(json!({ "content": { "path": path, "sha": sha }, "commit": { "sha": "c0ffee" } }))
            }
            Method::DELETE => match (&current_sha, &sent_sha) {
                (Some(cur), Some(sent)) if cur == sent => {
                    state.files.remove(&path);
                    ok(json!({ "content": null, "commit": { "sha": "c0ffee" } }))
                }
                (Some(_), _) => error(409, "sha does not match"),
                (None, _) => error(404, "Not Found"),
            },
            _ => error(405, "Method Not Allowed"),
        }
    }
}

fn ok(body: Value) -> ApiResponse {
    ApiResponse {
        status: 200,
        body: body.to_string(),
    }
}

fn error(status: u16, message: &str) -> ApiResponse {
    ApiResponse {
        status,
        body: json!({ "message": message }).to_string(),
    }
}

impl Transport for FakeRemote {
    async fn send(&self, request: ApiRequest) -> NoteSyncResult<ApiResponse> {
        Ok(self.handle(request))
    }
}
