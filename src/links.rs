//! Web UI links

use crate::api::Task;

/// Experiment table columns shown when a session is opened in the web UI
const EXPERIMENT_COLUMNS: [&str; 11] = [
    "selected",
    "type",
    "name",
    "tags",
    "status",
    "project.name",
    "users",
    "started",
    "last_update",
    "last_iteration",
    "parent.name",
];

/// `<web_server>/projects/<project>/experiments/<task>/execution?...`
pub fn task_web_url(web_server: &str, project_id: &str, task_id: &str) -> String {
    let columns = EXPERIMENT_COLUMNS
        .iter()
        .map(|c| format!("columns={}", c))
        .collect::<Vec<_>>()
        .join("&");
    format!(
        "{}/projects/{}/experiments/{}/execution?{}&order=-last_update&filter=",
        web_server.trim_end_matches('/'),
        project_id,
        task_id,
        columns
    )
}

/// Web URL for a task, when it carries a project reference
pub fn session_web_url(web_server: &str, task: &Task) -> Option<String> {
    task.project_id()
        .map(|project| task_web_url(web_server, project, &task.id))
}
