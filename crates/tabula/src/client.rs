use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use serde_json::Value;

use crate::config::{DATA_DIR_NAME, DEFAULT_PORT};
use crate::error::{ErrorResponse, TabulaError};
use crate::types::{IssueUpdate, ListFilters, NewIssue, NewUser};

const SESSION_FILE: &str = "session";

/// `./.tabula/session`, where `tb login` leaves its token.
pub fn session_path() -> PathBuf {
    Path::new(DATA_DIR_NAME).join(SESSION_FILE)
}

pub fn save_session(token: &str) -> Result<(), TabulaError> {
    let path = session_path();
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| {
            TabulaError::Internal(format!("failed to create {}: {e}", dir.display()))
        })?;
    }
    fs::write(&path, token)
        .map_err(|e| TabulaError::Internal(format!("failed to write {}: {e}", path.display())))
}

pub fn clear_session() -> Result<(), TabulaError> {
    match fs::remove_file(session_path()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TabulaError::Internal(format!(
            "failed to remove session file: {e}"
        ))),
    }
}

fn stored_token() -> Option<String> {
    if let Ok(token) = std::env::var("TB_TOKEN")
        && !token.trim().is_empty()
    {
        return Some(token.trim().to_string());
    }
    fs::read_to_string(session_path())
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub struct Client {
    http: HttpClient,
    base_url: String,
    token: Option<String>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        let base_url = std::env::var("TB_DAEMON")
            .unwrap_or_else(|_| format!("http://localhost:{DEFAULT_PORT}"));
        Client {
            http: HttpClient::new(),
            base_url,
            token: stored_token(),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn check_reachable(&self) -> Result<(), String> {
        match self.http.get(self.url("/status")).send() {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(format!("daemon returned status {}", resp.status())),
            Err(e) => Err(format!("cannot reach daemon at {}: {}", self.base_url, e)),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn parse_error(resp: Response) -> TabulaError {
        let status = resp.status();
        match resp.json::<ErrorResponse>() {
            Ok(body) => TabulaError::from_response(body),
            Err(_) => TabulaError::Internal(format!("unexpected response from daemon ({status})")),
        }
    }

    fn send(&self, req: RequestBuilder) -> Result<Response, TabulaError> {
        let resp = self
            .authed(req)
            .send()
            .map_err(|e| TabulaError::Internal(e.to_string()))?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(Self::parse_error(resp))
        }
    }

    fn send_json(&self, req: RequestBuilder) -> Result<Value, TabulaError> {
        self.send(req)?
            .json()
            .map_err(|e| TabulaError::Internal(e.to_string()))
    }

    pub fn status(&self) -> Result<Value, TabulaError> {
        self.send_json(self.http.get(self.url("/status")))
    }

    // --- auth ---

    pub fn signup(&self, new: &NewUser) -> Result<Value, TabulaError> {
        self.send_json(self.http.post(self.url("/auth/signup")).json(new))
    }

    pub fn login(&self, email: &str, password: &str) -> Result<Value, TabulaError> {
        let body = serde_json::json!({ "email": email, "password": password });
        self.send_json(self.http.post(self.url("/auth/login")).json(&body))
    }

    pub fn logout(&self) -> Result<(), TabulaError> {
        self.send(self.http.post(self.url("/auth/logout")))?;
        Ok(())
    }

    pub fn me(&self) -> Result<Value, TabulaError> {
        self.send_json(self.http.get(self.url("/auth/me")))
    }

    // --- users ---

    pub fn list_users(&self) -> Result<Value, TabulaError> {
        self.send_json(self.http.get(self.url("/users")))
    }

    pub fn get_user(&self, id: &str) -> Result<Value, TabulaError> {
        self.send_json(self.http.get(self.url(&format!("/users/{id}"))))
    }

    // --- issues ---

    pub fn create_issue(&self, new: &NewIssue) -> Result<Value, TabulaError> {
        self.send_json(self.http.post(self.url("/issues")).json(new))
    }

    pub fn get_issue(&self, id: &str) -> Result<Value, TabulaError> {
        self.send_json(self.http.get(self.url(&format!("/issues/{id}"))))
    }

    pub fn update_issue(&self, id: &str, update: &IssueUpdate) -> Result<Value, TabulaError> {
        self.send_json(
            self.http
                .patch(self.url(&format!("/issues/{id}")))
                .json(update),
        )
    }

    pub fn delete_issue(&self, id: &str) -> Result<(), TabulaError> {
        self.send(self.http.delete(self.url(&format!("/issues/{id}"))))?;
        Ok(())
    }

    pub fn assign_issue(&self, id: &str, user_id: &str) -> Result<Value, TabulaError> {
        let body = serde_json::json!({ "user_id": user_id });
        self.send_json(
            self.http
                .post(self.url(&format!("/issues/{id}/assign")))
                .json(&body),
        )
    }

    pub fn complete_issue(&self, id: &str) -> Result<Value, TabulaError> {
        self.send_json(self.http.post(self.url(&format!("/issues/{id}/complete"))))
    }

    pub fn issue_activity(&self, id: &str) -> Result<Value, TabulaError> {
        self.send_json(self.http.get(self.url(&format!("/issues/{id}/activity"))))
    }

    pub fn list_issues(&self, filters: &ListFilters) -> Result<Value, TabulaError> {
        self.send_json(
            self.http
                .get(self.url("/issues"))
                .query(&filter_params(filters)),
        )
    }

    pub fn board(&self, filters: &ListFilters) -> Result<Value, TabulaError> {
        self.send_json(
            self.http
                .get(self.url("/issues/board"))
                .query(&filter_params(filters)),
        )
    }

    pub fn search_issues(&self, query: &str) -> Result<Value, TabulaError> {
        self.send_json(
            self.http
                .get(self.url("/issues/search"))
                .query(&[("q", query)]),
        )
    }

    /// Blocks until the daemon reports a revision after `since`, or `timeout_secs` pass.
    pub fn watch(&self, since: u64, timeout_secs: u64) -> Result<Value, TabulaError> {
        self.send_json(
            self.http
                .get(self.url("/issues/watch"))
                .query(&[
                    ("since", since.to_string()),
                    ("timeout_secs", timeout_secs.to_string()),
                ])
                .timeout(Duration::from_secs(timeout_secs + 10)),
        )
    }
}

fn filter_params(filters: &ListFilters) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if let Some(q) = &filters.search {
        params.push(("q", q.clone()));
    }
    if !filters.states.is_empty() {
        let states: Vec<&str> = filters.states.iter().map(|s| s.as_str()).collect();
        params.push(("state", states.join(",")));
    }
    if !filters.assignees.is_empty() {
        params.push(("assignee", filters.assignees.join(",")));
    }
    if filters.mine_only {
        params.push(("mine", "true".to_string()));
    }
    if filters.restricted {
        params.push(("restricted", "true".to_string()));
    }
    params
}
