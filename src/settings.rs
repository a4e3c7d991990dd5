//! Settings resolution
//!
//! Settings are layered, lowest to highest precedence:
//!
//! 1. Built-in defaults
//! 2. Global file (`<config_dir>/clearml-session-manager/settings.yaml`)
//! 3. Workspace file (`<workspace>/.clearml-session-manager.yaml`)
//! 4. `CLEARML_CONFIG_FILE` environment variable
//! 5. Command-line overrides
//!
//! Path-like values support `${userHome}`, `~`, `${workspaceFolder}`,
//! `${workspaceFolder:<name>}` and `${cwd}` placeholders.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::AuthStyle;
use crate::discovery::ProjectMatch;
use crate::error::{Result, SessionError};
use crate::hocon::HoconParserKind;

/// Directory name under the platform config dir
pub const SETTINGS_NAMESPACE: &str = "clearml-session-manager";

/// Workspace-local settings file name
pub const WORKSPACE_SETTINGS_FILE: &str = ".clearml-session-manager.yaml";

/// Environment variable ClearML itself uses to locate `clearml.conf`
pub const CLEARML_CONFIG_FILE_ENV: &str = "CLEARML_CONFIG_FILE";

pub const DEFAULT_PROJECT_NAME: &str = "DevOps";
pub const DEFAULT_SESSION_NAME: &str = "Interactive Session";
pub const DEFAULT_STATUSES: [&str; 2] = ["in_progress", "queued"];
const DEFAULT_CONFIG_FILE: &str = "${userHome}/clearml.conf";

/// One settings source. Every key is optional so layers can be merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsLayer {
    pub clearml_config_file: Option<String>,
    pub interpreter: Option<Vec<String>>,
    pub project_name: Option<String>,
    pub session_name: Option<String>,
    pub statuses: Option<Vec<String>>,
    pub project_match: Option<ProjectMatch>,
    pub hocon_parser: Option<HoconParserKind>,
    pub auth_style: Option<AuthStyle>,
}

impl SettingsLayer {
    /// Read a layer from a YAML file. A missing file is an empty layer.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|e| SessionError::Settings {
            reason: format!("{}: {}", path.display(), e),
        })
    }

    /// Overlay `other` on top of `self`; keys present in `other` win.
    pub fn merge(self, other: SettingsLayer) -> SettingsLayer {
        SettingsLayer {
            clearml_config_file: other.clearml_config_file.or(self.clearml_config_file),
            interpreter: other.interpreter.or(self.interpreter),
            project_name: other.project_name.or(self.project_name),
            session_name: other.session_name.or(self.session_name),
            statuses: other.statuses.or(self.statuses),
            project_match: other.project_match.or(self.project_match),
            hocon_parser: other.hocon_parser.or(self.hocon_parser),
            auth_style: other.auth_style.or(self.auth_style),
        }
    }
}

/// Fully resolved settings
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Settings {
    pub clearml_config_file: PathBuf,
    pub interpreter: Vec<String>,
    pub project_name: String,
    pub session_name: String,
    pub statuses: Vec<String>,
    pub project_match: ProjectMatch,
    pub hocon_parser: HoconParserKind,
    pub auth_style: AuthStyle,
}

impl Settings {
    /// Apply defaults and placeholder substitution to a merged layer
    pub fn resolve(layer: SettingsLayer, placeholders: &Placeholders) -> Self {
        let config_file = layer
            .clearml_config_file
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

        Self {
            clearml_config_file: PathBuf::from(placeholders.substitute(&config_file)),
            interpreter: layer
                .interpreter
                .unwrap_or_default()
                .iter()
                .map(|part| placeholders.substitute(part))
                .collect(),
            project_name: layer
                .project_name
                .unwrap_or_else(|| DEFAULT_PROJECT_NAME.to_string()),
            session_name: layer
                .session_name
                .unwrap_or_else(|| DEFAULT_SESSION_NAME.to_string()),
            statuses: layer
                .statuses
                .unwrap_or_else(|| DEFAULT_STATUSES.iter().map(|s| s.to_string()).collect()),
            project_match: layer.project_match.unwrap_or_default(),
            hocon_parser: layer.hocon_parser.unwrap_or_default(),
            auth_style: layer.auth_style.unwrap_or_default(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::resolve(SettingsLayer::default(), &Placeholders::from_env(None))
    }
}

/// Values substituted into `${...}` placeholders
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    pub home: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    pub workspace: Option<PathBuf>,
}

impl Placeholders {
    pub fn from_env(workspace: Option<&Path>) -> Self {
        Self {
            home: dirs::home_dir(),
            cwd: std::env::current_dir().ok(),
            workspace: workspace.map(Path::to_path_buf),
        }
    }

    /// Substitute every known placeholder in `value`
    pub fn substitute(&self, value: &str) -> String {
        let mut out = value.to_string();

        if let Some(home) = &self.home {
            let home = home.to_string_lossy();
            out = out.replace("${userHome}", &home);
            if out == "~" {
                out = home.to_string();
            } else if let Some(rest) = out.strip_prefix("~/") {
                out = format!("{}/{}", home, rest);
            }
        }

        if let Some(ws) = &self.workspace {
            let ws_str = ws.to_string_lossy();
            if let Some(name) = ws.file_name() {
                let named = format!("${{workspaceFolder:{}}}", name.to_string_lossy());
                out = out.replace(&named, &ws_str);
            }
            out = out.replace("${workspaceFolder}", &ws_str);
        }

        if let Some(cwd) = &self.cwd {
            out = out.replace("${cwd}", &cwd.to_string_lossy());
        }

        out
    }
}

/// Injected settings capability
pub trait SettingsProvider {
    fn settings(&self) -> Result<Settings>;
}

impl SettingsProvider for Settings {
    fn settings(&self) -> Result<Settings> {
        Ok(self.clone())
    }
}

/// Settings read from the global and workspace YAML files
#[derive(Debug, Clone, Default)]
pub struct FileSettings {
    global_path: Option<PathBuf>,
    workspace: Option<PathBuf>,
    overrides: SettingsLayer,
    read_env: bool,
}

impl FileSettings {
    pub fn new(workspace: Option<PathBuf>) -> Self {
        Self {
            global_path: Self::global_path(),
            workspace,
            overrides: SettingsLayer::default(),
            read_env: true,
        }
    }

    /// `<config_dir>/clearml-session-manager/settings.yaml`
    pub fn global_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(SETTINGS_NAMESPACE).join("settings.yaml"))
    }

    pub fn with_global_path(mut self, path: Option<PathBuf>) -> Self {
        self.global_path = path;
        self
    }

    pub fn with_overrides(mut self, overrides: SettingsLayer) -> Self {
        self.overrides = overrides;
        self
    }

    /// Ignore `CLEARML_CONFIG_FILE`
    pub fn without_env(mut self) -> Self {
        self.read_env = false;
        self
    }

    pub fn workspace_path(&self) -> Option<PathBuf> {
        self.workspace.as_ref().map(|w| w.join(WORKSPACE_SETTINGS_FILE))
    }

    fn env_layer(&self) -> SettingsLayer {
        if !self.read_env {
            return SettingsLayer::default();
        }
        SettingsLayer {
            clearml_config_file: std::env::var(CLEARML_CONFIG_FILE_ENV)
                .ok()
                .filter(|v| !v.is_empty()),
            ..Default::default()
        }
    }
}

impl SettingsProvider for FileSettings {
    fn settings(&self) -> Result<Settings> {
        let mut layer = SettingsLayer::default();

        if let Some(path) = &self.global_path {
            debug!(path = %path.display(), "Reading global settings");
            layer = layer.merge(SettingsLayer::load(path)?);
        }
        if let Some(path) = self.workspace_path() {
            debug!(path = %path.display(), "Reading workspace settings");
            layer = layer.merge(SettingsLayer::load(&path)?);
        }
        layer = layer.merge(self.env_layer()).merge(self.overrides.clone());

        let placeholders = Placeholders::from_env(self.workspace.as_deref());
        Ok(Settings::resolve(layer, &placeholders))
    }
}
