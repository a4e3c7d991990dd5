//! # HOCON parsing
//!
//! ClearML writes `clearml.conf` in a HOCON dialect with unquoted string
//! values (`api_server: http://localhost:8008`). Two parsers read it:
//!
//! - [`PyHoconParser`] - shells out to `python -m pyhocon.tool`, the parser
//!   the ClearML SDK itself uses
//! - [`BuiltinHoconParser`] - native parser for the subset ClearML emits
//!
//! Both return the document as a `serde_json::Value`. With `auto`,
//! [`FallbackHoconParser`] tries pyhocon and reads the file natively when
//! pyhocon cannot run.

mod builtin;
mod pyhocon;

pub use builtin::{parse_str, BuiltinHoconParser, HoconSyntaxError};
pub use pyhocon::PyHoconParser;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{Result, SessionError};
use crate::python::PythonInterpreter;

/// A HOCON document reader
#[async_trait]
pub trait HoconParser: Send + Sync {
    /// Returns the parser name (e.g., "builtin", "pyhocon")
    fn name(&self) -> &str;

    /// Parse a file into a JSON value, failing with `ConfigParse`
    async fn parse_file(&self, path: &Path) -> Result<Value>;
}

/// Parser selection from settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoconParserKind {
    /// pyhocon when an interpreter is configured (builtin if it fails), builtin otherwise
    #[default]
    Auto,
    Builtin,
    #[serde(rename = "pyhocon")]
    PyHocon,
}

/// Instantiate the parser for `kind`
pub fn create_parser(
    kind: HoconParserKind,
    interpreter: Option<&PythonInterpreter>,
) -> Result<Box<dyn HoconParser>> {
    match (kind, interpreter) {
        (HoconParserKind::Builtin, _) | (HoconParserKind::Auto, None) => {
            Ok(Box::new(BuiltinHoconParser))
        }
        (HoconParserKind::PyHocon, None) => Err(SessionError::PythonNotConfigured),
        (HoconParserKind::PyHocon, Some(interp)) => Ok(Box::new(PyHoconParser::new(interp.clone()))),
        (HoconParserKind::Auto, Some(interp)) => Ok(Box::new(FallbackHoconParser::new(
            PyHoconParser::new(interp.clone()),
        ))),
    }
}

/// pyhocon first, the builtin parser when pyhocon fails
pub struct FallbackHoconParser {
    primary: PyHoconParser,
    fallback: BuiltinHoconParser,
}

impl FallbackHoconParser {
    pub fn new(primary: PyHoconParser) -> Self {
        Self {
            primary,
            fallback: BuiltinHoconParser,
        }
    }
}

#[async_trait]
impl HoconParser for FallbackHoconParser {
    fn name(&self) -> &str {
        "auto"
    }

    async fn parse_file(&self, path: &Path) -> Result<Value> {
        match self.primary.parse_file(path).await {
            Ok(doc) => Ok(doc),
            Err(e) => {
                warn!(error = %e, "pyhocon unavailable; using the builtin parser");
                self.fallback.parse_file(path).await
            }
        }
    }
}
