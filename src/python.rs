//! Python interpreter discovery and package checks
//!
//! pyhocon parsing and `clearml-session --attach` both need a Python
//! environment with the ClearML packages installed. The interpreter comes
//! from the `interpreter` setting, then from an activated virtualenv.
//! Nothing else is guessed: when neither is present the caller gets `None`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, SessionError};

/// Packages the session workflow relies on
pub const REQUIRED_PACKAGES: [&str; 3] = ["clearml", "clearml-session", "pyhocon"];

/// Timeout for `pip show` (pip startup is slow on cold caches)
const PIP_SHOW_TIMEOUT: Duration = Duration::from_secs(60);

/// A Python command: program plus leading arguments (e.g. `["conda", "run", "python"]`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonInterpreter {
    program: String,
    args: Vec<String>,
}

impl PythonInterpreter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Build from a command vector; empty vectors yield `None`
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        if program.trim().is_empty() {
            return None;
        }
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    /// `python` inside a virtualenv root
    pub fn from_virtualenv(root: &Path) -> Self {
        let python: PathBuf = if cfg!(windows) {
            root.join("Scripts").join("python.exe")
        } else {
            root.join("bin").join("python")
        };
        Self::new(python.to_string_lossy())
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// A command ready for module-specific arguments
    pub fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for PythonInterpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Resolve the interpreter from settings, then `$VIRTUAL_ENV`
pub fn resolve_interpreter(setting: &[String]) -> Option<PythonInterpreter> {
    let virtual_env = std::env::var_os("VIRTUAL_ENV").map(PathBuf::from);
    resolve_interpreter_with(setting, virtual_env.as_deref())
}

pub fn resolve_interpreter_with(
    setting: &[String],
    virtual_env: Option<&Path>,
) -> Option<PythonInterpreter> {
    if let Some(interp) = PythonInterpreter::from_command(setting) {
        debug!(interpreter = %interp, "Interpreter from settings");
        return Some(interp);
    }
    let interp = virtual_env.map(PythonInterpreter::from_virtualenv);
    if let Some(interp) = &interp {
        debug!(interpreter = %interp, "Interpreter from VIRTUAL_ENV");
    }
    interp
}

/// Return the subset of `packages` that `pip show` cannot find
pub async fn missing_packages(
    interpreter: &PythonInterpreter,
    packages: &[&str],
) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for &package in packages {
        let status = tokio::time::timeout(
            PIP_SHOW_TIMEOUT,
            interpreter
                .command()
                .args(["-m", "pip", "show", "--quiet", package])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status(),
        )
        .await
        .map_err(|_| SessionError::Subprocess {
            command: format!("{} -m pip show {}", interpreter, package),
            reason: format!("timed out after {}s", PIP_SHOW_TIMEOUT.as_secs()),
        })?
        .map_err(|e| SessionError::Subprocess {
            command: format!("{} -m pip show {}", interpreter, package),
            reason: e.to_string(),
        })?;

        if !status.success() {
            missing.push(package.to_string());
        }
    }
    Ok(missing)
}

/// `pip install` the given packages into the interpreter's environment
pub async fn install_packages(interpreter: &PythonInterpreter, packages: &[String]) -> Result<()> {
    if packages.is_empty() {
        return Ok(());
    }
    info!(interpreter = %interpreter, packages = ?packages, "Installing Python packages");

    let output = interpreter
        .command()
        .args(["-m", "pip", "install"])
        .args(packages)
        .output()
        .await
        .map_err(|e| SessionError::Subprocess {
            command: format!("{} -m pip install", interpreter),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(SessionError::Subprocess {
            command: format!("{} -m pip install {}", interpreter, packages.join(" ")),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}
