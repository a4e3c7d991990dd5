//! # ClearML API
//!
//! Typed access to the four endpoints the session manager uses:
//!
//! | Endpoint | Method | Client call |
//! |----------|--------|-------------|
//! | `auth.login` | GET (Basic or query) | [`ClearMlClient::auth`] |
//! | `projects.get_all` | POST | [`ClearMlClient::get_project_id_by_name`] |
//! | `tasks.get_all_ex` | POST | [`ClearMlClient::get_tasks`] |
//! | `events.get_task_log` | POST | [`ClearMlClient::get_task_logs`] |

mod client;
mod models;

pub use client::{select_project, AuthStyle, ClearMlClient, ProjectMatch};
pub use models::{
    Execution, IdRef, LogEvent, LogOrder, ParamItem, Project, Task, TaskFilter, TaskLogData,
    TaskLogRequest,
};
