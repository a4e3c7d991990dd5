//! ClearML Session Manager - browse ClearML interactive sessions and SSH into them

pub mod api;
pub mod attach;
pub mod config;
pub mod connect;
pub mod discovery;
pub mod error;
pub mod hocon;
pub mod links;
pub mod python;
pub mod settings;
pub mod ssh;

pub use api::{ClearMlClient, Task, TaskFilter, TaskLogRequest};
pub use config::{AuthConfig, ClearMlConfig};
pub use discovery::{fetch_sessions, SessionQuery};
pub use error::{FixSuggestion, SessionError};
pub use settings::{FileSettings, Settings, SettingsProvider};
pub use ssh::{parse_ssh_details, LogPatternExtractor, SshDetails, SshDetailsExtractor};
