//! SSH details from session logs
//!
//! clearml-session prints its SSH server banner into the task console log:
//!
//! ```text
//! SSH Server running on <hostname> [<ipv4>] port <port>
//! LOGIN u:<username> p:<password>
//! ```
//!
//! The log is scraped with regular expressions behind [`SshDetailsExtractor`]
//! so a structured source can replace it later without touching callers.
//! No match is not an error: the session may still be booting.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::api::{ClearMlClient, TaskLogRequest};
use crate::error::{Result, SessionError};

/// Log events fetched per lookup
pub const LOG_BATCH_SIZE: u32 = 10_000;

/// `SSH Server running on <host> [<ip>] port <port> ... LOGIN u:<user> p:<password>`
///
/// The password runs to the next whitespace.
static SSH_SERVER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)SSH Server running on .+?\[(\d+\.\d+\.\d+\.\d+)\]\s*port\s*(\d+).*?LOGIN u:(\w+) p:(\S+)")
        .unwrap()
});

/// `Starting SSH tunnel to root@<ip>, port <port> ... retrying in <n> seconds`
static SSH_RETRY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Starting SSH tunnel to root@(\d+\.\d+\.\d+\.\d+), port (\d+).*retrying in (\d+) seconds")
        .unwrap()
});

/// `SSH: ssh <user>@localhost -p <port> [password: <password>]`
static LOCAL_TUNNEL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"SSH: ssh (\w+)@localhost -p (\d+) \[password: (\w+)\]").unwrap()
});

/// Connection parameters for a session's SSH server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshDetails {
    pub ip_address: String,
    /// Verbatim from the log; see [`SshDetails::port_number`]
    pub port: String,
    pub username: String,
    pub password: String,
}

impl SshDetails {
    /// The port as a usable number (rejects 0 and non-numeric text)
    pub fn port_number(&self) -> Result<u16> {
        self.port
            .parse::<u16>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| SessionError::InvalidPort {
                port: self.port.clone(),
            })
    }

    /// `user@ip`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.ip_address)
    }
}

/// Strategy for recovering SSH details from a session's log text
pub trait SshDetailsExtractor: Send + Sync {
    fn extract(&self, logs: &str) -> Option<SshDetails>;
}

/// Regex scraper for the clearml-session banner
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPatternExtractor;

impl SshDetailsExtractor for LogPatternExtractor {
    fn extract(&self, logs: &str) -> Option<SshDetails> {
        parse_ssh_details(logs)
    }
}

/// Extract SSH details from concatenated log text
pub fn parse_ssh_details(logs: &str) -> Option<SshDetails> {
    let caps = SSH_SERVER_PATTERN.captures(logs)?;
    Some(SshDetails {
        ip_address: caps[1].to_string(),
        port: caps[2].to_string(),
        username: caps[3].to_string(),
        password: caps[4].to_string(),
    })
}

/// A tunnel retry announced by clearml-session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshRetryNotice {
    pub target_ip_address: String,
    pub target_ssh_port: u16,
    pub retry_wait_seconds: u64,
}

pub fn parse_retry_notice(message: &str) -> Option<SshRetryNotice> {
    let caps = SSH_RETRY_PATTERN.captures(message)?;
    Some(SshRetryNotice {
        target_ip_address: caps[1].to_string(),
        target_ssh_port: caps[2].parse().ok()?,
        retry_wait_seconds: caps[3].parse().ok()?,
    })
}

/// The local tunnel endpoint once clearml-session has connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelDetails {
    pub username: String,
    pub local_port: u16,
    pub password: String,
}

pub fn parse_tunnel_details(message: &str) -> Option<TunnelDetails> {
    let caps = LOCAL_TUNNEL_PATTERN.captures(message)?;
    Some(TunnelDetails {
        username: caps[1].to_string(),
        local_port: caps[2].parse().ok()?,
        password: caps[3].to_string(),
    })
}

/// Fetch a session's logs and extract SSH details
#[instrument(skip(client, extractor))]
pub async fn query_ssh_details(
    client: &ClearMlClient,
    task_id: &str,
    extractor: &dyn SshDetailsExtractor,
) -> Result<Option<SshDetails>> {
    let logs = client
        .get_task_logs(&TaskLogRequest::new(task_id).with_batch_size(LOG_BATCH_SIZE))
        .await?;
    let details = extractor.extract(&logs.concatenated());
    debug!(found = details.is_some(), events = logs.events.len(), "SSH details lookup");
    Ok(details)
}

/// Poll until the banner appears or `attempts` lookups came back empty
pub async fn wait_for_ssh_details(
    client: &ClearMlClient,
    task_id: &str,
    extractor: &dyn SshDetailsExtractor,
    attempts: u32,
    interval: Duration,
) -> Result<Option<SshDetails>> {
    for attempt in 1..=attempts.max(1) {
        if let Some(details) = query_ssh_details(client, task_id, extractor).await? {
            return Ok(Some(details));
        }
        if attempt < attempts {
            debug!(attempt, attempts, "SSH server not up yet; waiting");
            tokio::time::sleep(interval).await;
        }
    }
    Ok(None)
}
