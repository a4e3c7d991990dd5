//! Session discovery
//!
//! Resolves the sessions project by name, then lists the tasks in it named
//! like an interactive session and in an active state. The project id is
//! looked up on every call; nothing is cached between refreshes.

use tracing::{info, instrument};

use crate::api::{ClearMlClient, Task, TaskFilter};
use crate::config::ClearMlConfig;
use crate::error::{Result, SessionError};
use crate::hocon::create_parser;
use crate::python::resolve_interpreter;
use crate::settings::{
    Settings, SettingsProvider, DEFAULT_PROJECT_NAME, DEFAULT_SESSION_NAME, DEFAULT_STATUSES,
};

pub use crate::api::ProjectMatch;

/// Length of a full ClearML task id
pub const TASK_ID_LEN: usize = 32;

/// Which tasks count as interactive sessions
#[derive(Debug, Clone, PartialEq)]
pub struct SessionQuery {
    pub project_name: String,
    pub session_name: String,
    pub statuses: Vec<String>,
    pub project_match: ProjectMatch,
}

impl Default for SessionQuery {
    fn default() -> Self {
        Self {
            project_name: DEFAULT_PROJECT_NAME.to_string(),
            session_name: DEFAULT_SESSION_NAME.to_string(),
            statuses: DEFAULT_STATUSES.iter().map(|s| s.to_string()).collect(),
            project_match: ProjectMatch::First,
        }
    }
}

impl From<&Settings> for SessionQuery {
    fn from(settings: &Settings) -> Self {
        Self {
            project_name: settings.project_name.clone(),
            session_name: settings.session_name.clone(),
            statuses: settings.statuses.clone(),
            project_match: settings.project_match,
        }
    }
}

impl SessionQuery {
    /// Project lookup, then task listing filtered by that project
    #[instrument(skip(self, client), fields(project = %self.project_name))]
    pub async fn list_sessions(&self, client: &ClearMlClient) -> Result<Vec<Task>> {
        let project_id = client
            .find_project_id(&self.project_name, self.project_match)
            .await?;

        let filter = TaskFilter::new()
            .with_project_ids([project_id])
            .with_name(self.session_name.clone())
            .with_statuses(self.statuses.iter().cloned());

        let sessions = client.get_tasks(&filter).await?;
        info!(count = sessions.len(), "Sessions discovered");
        Ok(sessions)
    }
}

/// An authenticated client plus what was read to build it
pub struct Connection {
    pub client: ClearMlClient,
    pub config: ClearMlConfig,
    pub settings: Settings,
}

/// Load settings and `clearml.conf`, then log in
pub async fn connect(provider: &dyn SettingsProvider) -> Result<Connection> {
    let settings = provider.settings()?;
    let interpreter = resolve_interpreter(&settings.interpreter);
    let parser = create_parser(settings.hocon_parser, interpreter.as_ref())?;

    let path = settings.clearml_config_file.as_path();
    let config = ClearMlConfig::load(path, parser.as_ref()).await?;
    let mut client = ClearMlClient::new(config.auth_config(path)?).with_auth_style(settings.auth_style);
    client.auth().await?;

    Ok(Connection {
        client,
        config,
        settings,
    })
}

/// Full refresh: settings → config → auth → discovery
pub async fn fetch_sessions(provider: &dyn SettingsProvider) -> Result<Vec<Task>> {
    let conn = connect(provider).await?;
    SessionQuery::from(&conn.settings)
        .list_sessions(&conn.client)
        .await
}

/// Find a session by full id or unique id prefix
pub fn find_session<'a>(sessions: &'a [Task], id_or_prefix: &str) -> Result<&'a Task> {
    if let Some(exact) = sessions.iter().find(|t| t.id == id_or_prefix) {
        return Ok(exact);
    }
    let mut matches = sessions.iter().filter(|t| t.id.starts_with(id_or_prefix));
    match (matches.next(), matches.next()) {
        (Some(task), None) if !id_or_prefix.is_empty() => Ok(task),
        (Some(_), Some(_)) => Err(SessionError::NotFound {
            what: format!("Unique session for prefix '{}' (several match)", id_or_prefix),
        }),
        _ => Err(SessionError::NotFound {
            what: format!("Session '{}'", id_or_prefix),
        }),
    }
}

/// Whether `id` looks like a complete task id rather than a prefix
pub fn is_full_task_id(id: &str) -> bool {
    id.len() == TASK_ID_LEN && id.chars().all(|c| c.is_ascii_hexdigit())
}
