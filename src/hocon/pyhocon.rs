//! pyhocon-backed parser
//!
//! Runs `<python> -m pyhocon.tool --compact --format json --input <file>`
//! and reads the JSON it prints.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use super::HoconParser;
use crate::error::{Result, SessionError};
use crate::python::PythonInterpreter;

/// Default timeout for the pyhocon subprocess
const PYHOCON_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PyHoconParser {
    interpreter: PythonInterpreter,
    timeout: Duration,
}

impl PyHoconParser {
    pub fn new(interpreter: PythonInterpreter) -> Self {
        Self {
            interpreter,
            timeout: PYHOCON_TIMEOUT,
        }
    }

    /// Set subprocess timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl HoconParser for PyHoconParser {
    fn name(&self) -> &str {
        "pyhocon"
    }

    #[instrument(skip(self), fields(interpreter = %self.interpreter))]
    async fn parse_file(&self, path: &Path) -> Result<Value> {
        debug!("Parsing HOCON with pyhocon");

        let output = tokio::time::timeout(
            self.timeout,
            self.interpreter
                .command()
                .args(["-m", "pyhocon.tool", "--compact", "--format", "json", "--input"])
                .arg(path)
                .output(),
        )
        .await
        .map_err(|_| {
            SessionError::config_parse(
                path,
                format!("pyhocon timed out after {}s", self.timeout.as_secs()),
            )
        })?
        .map_err(|e| SessionError::config_parse(path, format!("failed to run pyhocon: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SessionError::config_parse(
                path,
                format!("pyhocon exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| SessionError::config_parse(path, format!("pyhocon output is not JSON: {}", e)))
    }
}
