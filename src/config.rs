//! ClearML configuration (`clearml.conf`)
//!
//! Only the `api` section matters here: server URLs and the credential pair
//! used for `auth.login`. The file is read once per operation and never
//! written.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::{Result, SessionError};
use crate::hocon::HoconParser;

/// The `api` section of `clearml.conf`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ApiSection {
    pub api_server: Option<String>,
    pub web_server: Option<String>,
    pub files_server: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

/// Parsed `clearml.conf`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClearMlConfig {
    pub api: ApiSection,
}

/// What the API client needs to log in
#[derive(Clone, PartialEq)]
pub struct AuthConfig {
    pub api_server: String,
    pub access_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("api_server", &self.api_server)
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .finish()
    }
}

impl ClearMlConfig {
    /// Parse `path` with `parser` and extract the `api` section
    pub async fn load(path: &Path, parser: &dyn HoconParser) -> Result<Self> {
        debug!(path = %path.display(), parser = parser.name(), "Loading clearml.conf");
        if !path.exists() {
            return Err(SessionError::config_parse(path, "file does not exist"));
        }
        let doc = parser.parse_file(path).await?;
        Ok(Self::from_value(&doc))
    }

    /// Extract from an already-parsed document
    pub fn from_value(doc: &Value) -> Self {
        let api = &doc["api"];
        let credentials = &api["credentials"];
        Self {
            api: ApiSection {
                api_server: server_url(&api["api_server"]),
                web_server: server_url(&api["web_server"]),
                files_server: server_url(&api["files_server"]),
                access_key: scalar_string(&credentials["access_key"]),
                secret_key: scalar_string(&credentials["secret_key"]),
            },
        }
    }

    /// Credentials for the API client; every field is required
    pub fn auth_config(&self, path: &Path) -> Result<AuthConfig> {
        let api_server = required(path, "api.api_server", &self.api.api_server)?;
        Url::parse(&api_server)
            .map_err(|e| SessionError::config_parse(path, format!("api.api_server '{}': {}", api_server, e)))?;

        Ok(AuthConfig {
            api_server,
            access_key: required(path, "api.credentials.access_key", &self.api.access_key)?,
            secret_key: required(path, "api.credentials.secret_key", &self.api.secret_key)?,
        })
    }

    /// Web UI base URL
    pub fn web_server(&self, path: &Path) -> Result<String> {
        required(path, "api.web_server", &self.api.web_server)
    }
}

fn required(path: &Path, key: &str, value: &Option<String>) -> Result<String> {
    value
        .clone()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SessionError::config_parse(path, format!("missing {}", key)))
}

/// Strings as-is; numbers and booleans in their display form
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn server_url(value: &Value) -> Option<String> {
    scalar_string(value).map(|s| s.trim_end_matches('/').to_string())
}

/// Mask a secret for display
///
/// Shows first N chars + asterisks, e.g. "2Q1Z***"
pub fn mask_secret(secret: &str, visible_chars: usize) -> String {
    if secret.is_empty() {
        return String::new();
    }
    let visible: String = secret.chars().take(visible_chars).collect();
    format!("{}***", visible)
}
