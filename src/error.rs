//! Error types with fix suggestions

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ─────────────────────────────────────────────────────────────
    // API client errors (CSM-010 to CSM-015)
    // ─────────────────────────────────────────────────────────────

    #[error("CSM-010: Not authenticated. Call auth() before '{operation}'")]
    AuthRequired { operation: &'static str },

    #[error("CSM-011: Authentication failed: {reason}")]
    Authentication { reason: String },

    #[error("CSM-012: {what} not found")]
    NotFound { what: String },

    #[error("CSM-013: {count} projects are named '{name}'")]
    AmbiguousProject { name: String, count: usize },

    #[error("CSM-014: {endpoint} returned HTTP {status}: {body}")]
    Http {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("CSM-015: Request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    // ─────────────────────────────────────────────────────────────
    // Configuration errors (CSM-020 to CSM-022)
    // ─────────────────────────────────────────────────────────────

    #[error("CSM-020: Cannot read ClearML config '{path}': {reason}")]
    ConfigParse { path: String, reason: String },

    #[error("CSM-021: Invalid settings: {reason}")]
    Settings { reason: String },

    #[error("CSM-022: No Python interpreter configured")]
    PythonNotConfigured,

    // ─────────────────────────────────────────────────────────────
    // Session errors (CSM-030 to CSM-032)
    // ─────────────────────────────────────────────────────────────

    #[error("CSM-030: Invalid SSH port '{port}'")]
    InvalidPort { port: String },

    #[error("CSM-031: '{command}' failed: {reason}")]
    Subprocess { command: String, reason: String },

    #[error("CSM-032: No SSH details in the logs of session {task_id} yet")]
    SshDetailsUnavailable { task_id: String },
}

impl SessionError {
    pub(crate) fn config_parse(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        Self::ConfigParse {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl FixSuggestion for SessionError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            SessionError::Io(_) => Some("Check file path and permissions"),
            SessionError::Json(_) => Some("The server answered with unexpected JSON; check api_server"),
            SessionError::Yaml(_) => Some("Check settings YAML syntax: indentation and quoting"),
            SessionError::AuthRequired { .. } => None,
            SessionError::Authentication { .. } => {
                Some("Verify access_key/secret_key in clearml.conf (regenerate them in the web UI)")
            }
            SessionError::NotFound { .. } => {
                Some("Run `clearml-sessions list` to see the sessions that are currently active")
            }
            SessionError::AmbiguousProject { .. } => {
                Some("Rename the duplicate projects or set project_match: first")
            }
            SessionError::Http { .. } => Some("Check that api_server points at a ClearML API server"),
            SessionError::Transport { .. } => Some("Check network connectivity to the ClearML server"),
            SessionError::ConfigParse { .. } => {
                Some("Run `clearml-init` or set clearml_config_file in settings")
            }
            SessionError::Settings { .. } => Some("Fix the settings file or the command-line flag"),
            SessionError::PythonNotConfigured => {
                Some("Activate a virtualenv or set `interpreter` in settings")
            }
            SessionError::InvalidPort { .. } => {
                Some("The session logs are incomplete; wait and retry ssh-details")
            }
            SessionError::Subprocess { .. } => {
                Some("Run `clearml-sessions install-deps --install` to install clearml-session")
            }
            SessionError::SshDetailsUnavailable { .. } => {
                Some("The session may still be starting; retry with --wait")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_code() {
        let err = SessionError::AuthRequired { operation: "get_tasks" };
        assert!(err.to_string().starts_with("CSM-010"));
        assert!(err.to_string().contains("get_tasks"));

        let err = SessionError::NotFound {
            what: "Project 'DevOps'".into(),
        };
        assert_eq!(err.to_string(), "CSM-012: Project 'DevOps' not found");
    }

    #[test]
    fn config_parse_records_path() {
        let err = SessionError::config_parse("/tmp/clearml.conf", "missing api.api_server");
        assert!(err.to_string().contains("/tmp/clearml.conf"));
        assert!(err.fix_suggestion().unwrap().contains("clearml-init"));
    }

    #[test]
    fn missing_ssh_details_suggest_waiting() {
        let err = SessionError::SshDetailsUnavailable {
            task_id: "8a3c".into(),
        };
        assert!(err.to_string().starts_with("CSM-032"));
        assert!(err.fix_suggestion().unwrap().contains("--wait"));
    }
}
