//! ClearML REST client
//!
//! Unauthenticated until [`ClearMlClient::auth`] succeeds; every other call
//! fails with `AuthRequired` before touching the network when no token is
//! held. Tokens are never refreshed: an expired token surfaces as
//! `Authentication` on the call that hit it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::models::{
    ApiResponse, AuthResponse, Project, ProjectsData, Task, TaskFilter, TaskLogData, TaskLogRequest,
    TasksData,
};
use crate::config::AuthConfig;
use crate::error::{Result, SessionError};

/// How `auth.login` receives the credential pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStyle {
    /// HTTP Basic (access key as user, secret key as password)
    #[default]
    Basic,
    /// `?access_key=..&secret_key=..`
    Query,
}

/// What to do when several projects share the requested name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectMatch {
    /// Take the first project the server lists
    #[default]
    First,
    /// Fail with `AmbiguousProject`
    Unique,
}

pub struct ClearMlClient {
    /// HTTP client
    http: reqwest::Client,
    config: AuthConfig,
    auth_style: AuthStyle,
    /// Bearer token, set by `auth()`
    token: Option<String>,
}

impl ClearMlClient {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            auth_style: AuthStyle::default(),
            token: None,
        }
    }

    pub fn with_auth_style(mut self, style: AuthStyle) -> Self {
        self.auth_style = style;
        self
    }

    pub fn is_authed(&self) -> bool {
        self.token.is_some()
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.config.api_server.trim_end_matches('/'), name)
    }

    fn token(&self, operation: &'static str) -> Result<&str> {
        self.token
            .as_deref()
            .ok_or(SessionError::AuthRequired { operation })
    }

    /// Log in and keep the returned bearer token
    #[instrument(skip(self), fields(api_server = %self.config.api_server))]
    pub async fn auth(&mut self) -> Result<()> {
        let url = self.endpoint("auth.login");
        debug!(style = ?self.auth_style, "Authenticating");

        let request = match self.auth_style {
            AuthStyle::Basic => self
                .http
                .get(&url)
                .basic_auth(&self.config.access_key, Some(&self.config.secret_key)),
            AuthStyle::Query => self.http.get(&url).query(&[
                ("access_key", self.config.access_key.as_str()),
                ("secret_key", self.config.secret_key.as_str()),
            ]),
        };

        let response = request.send().await.map_err(|source| SessionError::Transport {
            endpoint: "auth.login".into(),
            source,
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|source| SessionError::Transport {
            endpoint: "auth.login".into(),
            source,
        })?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SessionError::Authentication {
                reason: format!(
                    "server rejected credentials (HTTP {}): {}",
                    status.as_u16(),
                    String::from_utf8_lossy(&body).trim()
                ),
            });
        }
        if !status.is_success() {
            let body = String::from_utf8_lossy(&body).trim().to_string();
            warn!(status = %status, body = %body, "auth.login failed");
            return Err(SessionError::Http {
                endpoint: "auth.login".into(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: AuthResponse = serde_json::from_slice(&body).unwrap_or_default();
        let token = parsed
            .data
            .and_then(|d| d.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SessionError::Authentication {
                reason: "response has no data.token".into(),
            })?;

        self.token = Some(token);
        debug!("Authenticated");
        Ok(())
    }

    /// Projects whose name is exactly `name`, in server order
    #[instrument(skip(self))]
    pub async fn get_projects_by_name(&self, name: &str) -> Result<Vec<Project>> {
        #[derive(Serialize)]
        struct Body<'a> {
            name: &'a str,
        }

        let data: ProjectsData = self
            .post("projects.get_all", "get_projects_by_name", &Body { name })
            .await?;

        // The server matches `name` as a pattern; keep exact matches only
        Ok(data.projects.into_iter().filter(|p| p.name == name).collect())
    }

    /// Id of the first project named `name`
    pub async fn get_project_id_by_name(&self, name: &str) -> Result<String> {
        self.find_project_id(name, ProjectMatch::First).await
    }

    /// Id of the project named `name` under an explicit duplicate-name policy
    pub async fn find_project_id(&self, name: &str, policy: ProjectMatch) -> Result<String> {
        let projects = self.get_projects_by_name(name).await?;
        select_project(projects, name, policy)
    }

    /// `tasks.get_all_ex` with optional conjunctive filters; server order is kept
    #[instrument(skip(self))]
    pub async fn get_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let data: TasksData = self.post("tasks.get_all_ex", "get_tasks", filter).await?;
        debug!(count = data.tasks.len(), "Tasks received");
        Ok(data.tasks)
    }

    /// Console log events for one task
    #[instrument(skip(self), fields(task = %request.task))]
    pub async fn get_task_logs(&self, request: &TaskLogRequest) -> Result<TaskLogData> {
        let data: TaskLogData = self
            .post("events.get_task_log", "get_task_logs", request)
            .await?;
        debug!(events = data.events.len(), total = ?data.total, "Task log received");
        Ok(data)
    }

    async fn post<B, T>(&self, endpoint: &str, operation: &'static str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let token = self.token(operation)?;
        let url = self.endpoint(endpoint);
        debug!(endpoint, "POST");

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|source| SessionError::Transport {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|source| SessionError::Transport {
            endpoint: endpoint.to_string(),
            source,
        })?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SessionError::Authentication {
                reason: format!("{} rejected the token (HTTP {})", endpoint, status.as_u16()),
            });
        }
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes).trim().to_string();
            warn!(endpoint, status = %status, body = %body, "ClearML API error");
            return Err(SessionError::Http {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let envelope: ApiResponse<T> = serde_json::from_slice(&bytes)?;
        Ok(envelope.data)
    }
}

/// Apply the duplicate-name policy to the exact-name matches
pub fn select_project(projects: Vec<Project>, name: &str, policy: ProjectMatch) -> Result<String> {
    let count = projects.len();
    let first = projects.into_iter().next().ok_or_else(|| SessionError::NotFound {
        what: format!("Project '{}'", name),
    })?;

    if count > 1 {
        match policy {
            ProjectMatch::First => {
                warn!(project = name, count, chosen = %first.id, "Several projects share this name; using the first");
            }
            ProjectMatch::Unique => {
                return Err(SessionError::AmbiguousProject {
                    name: name.to_string(),
                    count,
                })
            }
        }
    }
    Ok(first.id)
}
