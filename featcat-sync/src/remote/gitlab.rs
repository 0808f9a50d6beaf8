//! Blocking GitLab v4 REST client.
//!
//! Authentication uses a personal/project access token in the `PRIVATE-TOKEN`
//! header. Each request's timeout is the configured request timeout, clamped
//! to whatever time the caller's [`CancelToken`] has left.

use std::time::Duration;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::cancel::CancelToken;
use crate::error::RemoteError;

use super::{
    AccessLevel, FileCommit, GitRemote, MergeRequest, MrFileDiff, NewMergeRequest, RemoteUser,
    TreeEntry, TreePage,
};

const USER_AGENT: &str = concat!("featcat/", env!("CARGO_PKG_VERSION"));
const PER_PAGE: &str = "100";

pub struct GitLabClient {
    agent: ureq::Agent,
    api: String,
    project: String,
    token: Option<String>,
    timeout: Duration,
}

#[derive(Deserialize)]
struct FileBody {
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Deserialize)]
struct MemberBody {
    access_level: u32,
}

impl GitLabClient {
    /// `base_url` is the instance root (`https://gitlab.example.com`); the
    /// `/api/v4` suffix is added when missing. `project` is a numeric id or a
    /// `group/name` path.
    pub fn new(base_url: &str, project: &str, token: Option<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        GitLabClient {
            agent,
            api: api_root(base_url),
            project: urlencoding::encode(project).into_owned(),
            token,
            timeout,
        }
    }

    pub fn api_root(&self) -> &str {
        &self.api
    }

    fn project_url(&self, rest: &str) -> String {
        format!("{}/projects/{}{}", self.api, self.project, rest)
    }

    fn file_url(&self, path: &str) -> String {
        self.project_url(&format!("/repository/files/{}", urlencoding::encode(path)))
    }

    fn request(
        &self,
        method: &str,
        url: &str,
        cancel: &CancelToken,
    ) -> Result<ureq::Request, RemoteError> {
        cancel.check()?;
        let timeout = match cancel.remaining() {
            Some(left) if left.is_zero() => return Err(RemoteError::Cancelled),
            Some(left) => left.min(self.timeout),
            None => self.timeout,
        };
        let mut req = self
            .agent
            .request(method, url)
            .timeout(timeout)
            .set("User-Agent", USER_AGENT);
        if let Some(token) = &self.token {
            req = req.set("PRIVATE-TOKEN", token);
        }
        Ok(req)
    }

    fn send(req: ureq::Request, body: Option<serde_json::Value>) -> Result<ureq::Response, RemoteError> {
        tracing::debug!(method = req.method(), url = req.url(), "gitlab request");
        let result = match body {
            Some(body) => req.send_json(body),
            None => req.call(),
        };
        result.map_err(map_ureq_error)
    }

    fn decode<T: serde::de::DeserializeOwned>(resp: ureq::Response) -> Result<T, RemoteError> {
        resp.into_json::<T>()
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    fn commit_body(commit: &FileCommit) -> serde_json::Value {
        let mut body = json!({
            "branch": commit.branch,
            "commit_message": commit.message,
        });
        if let Some(content) = &commit.content {
            body["content"] = json!(content);
        }
        body
    }
}

impl GitRemote for GitLabClient {
    fn list_tree(
        &self,
        path: &str,
        git_ref: &str,
        page: u32,
        cancel: &CancelToken,
    ) -> Result<TreePage, RemoteError> {
        let url = self.project_url("/repository/tree");
        let req = self
            .request("GET", &url, cancel)?
            .query("path", path)
            .query("ref", git_ref)
            .query("per_page", PER_PAGE)
            .query("page", &page.max(1).to_string());
        let resp = Self::send(req, None)?;
        let next_page = next_page(resp.header("X-Next-Page"));
        let entries: Vec<TreeEntry> = Self::decode(resp)?;
        Ok(TreePage { entries, next_page })
    }

    fn get_file(
        &self,
        path: &str,
        git_ref: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, RemoteError> {
        let req = self
            .request("GET", &self.file_url(path), cancel)?
            .query("ref", git_ref);
        let body: FileBody = Self::decode(Self::send(req, None)?)?;
        decode_content(&body.content, &body.encoding)
    }

    fn create_file(&self, commit: &FileCommit, cancel: &CancelToken) -> Result<(), RemoteError> {
        let req = self.request("POST", &self.file_url(&commit.path), cancel)?;
        Self::send(req, Some(Self::commit_body(commit))).map(|_| ())
    }

    fn update_file(&self, commit: &FileCommit, cancel: &CancelToken) -> Result<(), RemoteError> {
        let req = self.request("PUT", &self.file_url(&commit.path), cancel)?;
        Self::send(req, Some(Self::commit_body(commit))).map(|_| ())
    }

    fn delete_file(&self, commit: &FileCommit, cancel: &CancelToken) -> Result<(), RemoteError> {
        let req = self.request("DELETE", &self.file_url(&commit.path), cancel)?;
        Self::send(req, Some(Self::commit_body(commit))).map(|_| ())
    }

    fn create_branch(
        &self,
        branch: &str,
        from_ref: &str,
        cancel: &CancelToken,
    ) -> Result<(), RemoteError> {
        let req = self
            .request("POST", &self.project_url("/repository/branches"), cancel)?
            .query("branch", branch)
            .query("ref", from_ref);
        Self::send(req, None).map(|_| ())
    }

    fn delete_branch(&self, branch: &str, cancel: &CancelToken) -> Result<(), RemoteError> {
        let url = self.project_url(&format!(
            "/repository/branches/{}",
            urlencoding::encode(branch)
        ));
        Self::send(self.request("DELETE", &url, cancel)?, None).map(|_| ())
    }

    fn create_merge_request(
        &self,
        request: &NewMergeRequest,
        cancel: &CancelToken,
    ) -> Result<MergeRequest, RemoteError> {
        let mut body = json!({
            "source_branch": request.source_branch,
            "target_branch": request.target_branch,
            "title": request.title,
            "description": request.description,
            "remove_source_branch": request.remove_source_branch,
        });
        if !request.labels.is_empty() {
            body["labels"] = json!(request.labels.join(","));
        }
        if let Some(id) = request.assignee_id {
            body["assignee_id"] = json!(id);
        }
        let req = self.request("POST", &self.project_url("/merge_requests"), cancel)?;
        Self::decode(Self::send(req, Some(body))?)
    }

    fn get_merge_request(
        &self,
        iid: u64,
        cancel: &CancelToken,
    ) -> Result<MergeRequest, RemoteError> {
        let url = self.project_url(&format!("/merge_requests/{iid}"));
        Self::decode(Self::send(self.request("GET", &url, cancel)?, None)?)
    }

    fn merge_request_diffs(
        &self,
        iid: u64,
        cancel: &CancelToken,
    ) -> Result<Vec<MrFileDiff>, RemoteError> {
        let url = self.project_url(&format!("/merge_requests/{iid}/diffs"));
        let mut all = Vec::new();
        let mut page = 1u32;
        loop {
            let req = self
                .request("GET", &url, cancel)?
                .query("per_page", PER_PAGE)
                .query("page", &page.to_string());
            let resp = Self::send(req, None)?;
            let next = next_page(resp.header("X-Next-Page"));
            let mut diffs: Vec<MrFileDiff> = Self::decode(resp)?;
            all.append(&mut diffs);
            match next {
                Some(n) if n > page => page = n,
                _ => return Ok(all),
            }
        }
    }

    fn find_user(
        &self,
        username: &str,
        cancel: &CancelToken,
    ) -> Result<Option<RemoteUser>, RemoteError> {
        let req = self
            .request("GET", &format!("{}/users", self.api), cancel)?
            .query("username", username);
        let users: Vec<RemoteUser> = Self::decode(Self::send(req, None)?)?;
        Ok(users.into_iter().next())
    }

    fn current_user(&self, cancel: &CancelToken) -> Result<RemoteUser, RemoteError> {
        let req = self.request("GET", &format!("{}/user", self.api), cancel)?;
        Self::decode(Self::send(req, None)?)
    }

    fn member_access(
        &self,
        user_id: u64,
        cancel: &CancelToken,
    ) -> Result<AccessLevel, RemoteError> {
        let url = self.project_url(&format!("/members/all/{user_id}"));
        match Self::send(self.request("GET", &url, cancel)?, None) {
            Ok(resp) => {
                let member: MemberBody = Self::decode(resp)?;
                Ok(AccessLevel::from_level(member.access_level))
            }
            Err(err) if err.is_not_found() => Ok(AccessLevel::None),
            Err(err) => Err(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn api_root(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/api/v4") {
        base.to_string()
    } else {
        format!("{base}/api/v4")
    }
}

fn next_page(header: Option<&str>) -> Option<u32> {
    header.and_then(|v| v.trim().parse().ok())
}

fn decode_content(content: &str, encoding: &str) -> Result<Vec<u8>, RemoteError> {
    if encoding.is_empty() || encoding.eq_ignore_ascii_case("text") {
        return Ok(content.as_bytes().to_vec());
    }
    // GitLab wraps long base64 payloads.
    let compact: String = content.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| RemoteError::Decode(format!("invalid base64 file content: {e}")))
}

/// `Retry-After` as delta-seconds or an HTTP date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&Utc) - Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// GitLab error bodies look like `{"message": "..."}` where the message is a
/// string or a field → errors object.
fn error_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|v| v.get("message").or_else(|| v.get("error")));
    match message {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => body.trim().to_string(),
    }
}

fn map_ureq_error(err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(status, resp) => {
            let retry_after = resp.header("Retry-After").and_then(parse_retry_after);
            let message = resp
                .into_string()
                .map(|body| error_message(&body))
                .unwrap_or_default();
            RemoteError::Status {
                status,
                message,
                retry_after,
            }
        }
        ureq::Error::Transport(t) => RemoteError::Transport(t.to_string()),
    }
}
