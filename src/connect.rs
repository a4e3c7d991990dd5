//! Session connectors
//!
//! Hand extracted [`SshDetails`] to something that opens the connection.
//!
//! | Connector | Effect |
//! |-----------|--------|
//! | `ssh` | runs `ssh -p <port> <user>@<ip>` in the current terminal |
//! | `vscode` | opens a VS Code Remote-SSH window on the session |
//! | `print` | writes the command and password, connects nothing |

use std::io::Write;
use std::process::Stdio;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::ssh::SshDetails;

/// Opens a connection to a session
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Returns the connector name (e.g., "ssh", "vscode")
    fn name(&self) -> &str;

    /// Connect using the given details; returns when the connection is handed off or closed
    async fn connect(&self, details: &SshDetails) -> Result<()>;
}

/// Build a connector by name
pub fn create_connector(name: &str) -> Result<Box<dyn SessionConnector>> {
    match name.to_lowercase().as_str() {
        "ssh" => Ok(Box::new(OpenSshConnector::new())),
        "vscode" | "code" => Ok(Box::new(VsCodeRemoteConnector::new())),
        "print" => Ok(Box::new(PrintConnector::stdout())),
        other => bail!("Unknown connector: {}. Available: ssh, vscode, print", other),
    }
}

/// Arguments for `ssh` (without the program)
pub fn ssh_args(details: &SshDetails) -> Result<Vec<String>> {
    let port = details.port_number()?;
    Ok(vec![
        "-p".to_string(),
        port.to_string(),
        details.destination(),
    ])
}

/// VS Code remote authority, e.g. `ssh-remote+root@10.0.0.7:10022`
pub fn remote_authority(details: &SshDetails) -> Result<String> {
    let port = details.port_number()?;
    Ok(format!("ssh-remote+{}:{}", details.destination(), port))
}

/// Interactive OpenSSH session with inherited stdio
pub struct OpenSshConnector {
    program: String,
}

impl OpenSshConnector {
    pub fn new() -> Self {
        Self {
            program: "ssh".to_string(),
        }
    }

    /// Set a custom ssh binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl Default for OpenSshConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionConnector for OpenSshConnector {
    fn name(&self) -> &str {
        "ssh"
    }

    async fn connect(&self, details: &SshDetails) -> Result<()> {
        let args = ssh_args(details)?;
        info!(program = %self.program, destination = %details.destination(), "Starting ssh");

        let status = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .with_context(|| format!("Failed to run {}", self.program))?;

        // 255 is ssh's own failure code; other codes come from the remote shell
        if status.code() == Some(255) {
            bail!("{} could not connect to {}", self.program, details.destination());
        }
        Ok(())
    }
}

/// Opens a VS Code window attached to the session over Remote-SSH
pub struct VsCodeRemoteConnector {
    program: String,
    folder: String,
}

impl VsCodeRemoteConnector {
    pub fn new() -> Self {
        Self {
            program: "code".to_string(),
            folder: "/root".to_string(),
        }
    }
}

impl Default for VsCodeRemoteConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionConnector for VsCodeRemoteConnector {
    fn name(&self) -> &str {
        "vscode"
    }

    async fn connect(&self, details: &SshDetails) -> Result<()> {
        let authority = remote_authority(details)?;
        debug!(authority = %authority, "Opening VS Code remote window");

        let output = tokio::process::Command::new(&self.program)
            .arg("--remote")
            .arg(&authority)
            .arg(&self.folder)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.program))?;

        if !output.status.success() {
            bail!(
                "{} --remote {} failed: {}",
                self.program,
                authority,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Writes the ssh command and password instead of connecting
pub struct PrintConnector {
    out: Mutex<Box<dyn Write + Send>>,
}

impl PrintConnector {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

#[async_trait]
impl SessionConnector for PrintConnector {
    fn name(&self) -> &str {
        "print"
    }

    async fn connect(&self, details: &SshDetails) -> Result<()> {
        let args = ssh_args(details)?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow::anyhow!("output writer poisoned"))?;
        writeln!(out, "ssh {}", args.join(" "))?;
        writeln!(out, "password: {}", details.password)?;
        out.flush()?;
        Ok(())
    }
}
