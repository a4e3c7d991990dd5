//! Attach to a running session through the `clearml-session` CLI
//!
//! Spawns `<python> -m clearml_session --attach <task_id>`, which opens a
//! local tunnel to the session container. Its output is scanned line by line
//! for the tunnel banner and for retry notices; everything is forwarded as
//! [`AttachEvent`]s over a channel.

use std::process::Stdio;

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::python::PythonInterpreter;
use crate::ssh::{parse_retry_notice, parse_tunnel_details, SshRetryNotice, TunnelDetails};

/// Buffered events before the reader waits on the consumer
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachEvent {
    /// A raw output line
    Output { line: String, stderr: bool },
    /// The local tunnel is up
    Connected(TunnelDetails),
    /// clearml-session will retry the tunnel
    Retry { notice: SshRetryNotice, count: u32 },
    /// The subprocess ended (`None` when killed by a signal)
    Exited { code: Option<i32> },
}

/// A running attach subprocess
pub struct AttachHandle {
    pub events: mpsc::Receiver<AttachEvent>,
    kill: Option<tokio::sync::oneshot::Sender<()>>,
}

impl AttachHandle {
    /// Kill the subprocess; an `Exited` event still follows
    pub fn abort(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

/// Start `clearml_session --attach` for `task_id`
pub fn attach_to_session(interpreter: &PythonInterpreter, task_id: &str) -> Result<AttachHandle> {
    let mut cmd = interpreter.command();
    cmd.args(["-m", "clearml_session", "--attach", task_id]);
    spawn_attach(cmd, &format!("{} -m clearml_session --attach {}", interpreter, task_id))
}

/// Spawn any attach-like command and stream its events
pub fn spawn_attach(mut cmd: tokio::process::Command, command_line: &str) -> Result<AttachHandle> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SessionError::Subprocess {
            command: command_line.to_string(),
            reason: e.to_string(),
        })?;

    info!(pid = ?child.id(), command = %command_line, "Attach subprocess started");

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let (kill_tx, kill_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(pump(child_streams(&mut child), child, tx, kill_rx));

    Ok(AttachHandle {
        events: rx,
        kill: Some(kill_tx),
    })
}

type LineStream = futures::stream::BoxStream<'static, (bool, std::io::Result<String>)>;

fn child_streams(child: &mut Child) -> LineStream {
    let stdout = child.stdout.take().map(|out| {
        LinesStream::new(BufReader::new(out).lines())
            .map(|line| (false, line))
            .boxed()
    });
    let stderr = child.stderr.take().map(|err| {
        LinesStream::new(BufReader::new(err).lines())
            .map(|line| (true, line))
            .boxed()
    });
    let empty = || futures::stream::empty().boxed();
    futures::stream::select(stdout.unwrap_or_else(empty), stderr.unwrap_or_else(empty)).boxed()
}

async fn pump(
    mut lines: LineStream,
    mut child: Child,
    tx: mpsc::Sender<AttachEvent>,
    mut kill_rx: tokio::sync::oneshot::Receiver<()>,
) {
    let mut scanner = OutputScanner::default();
    let mut kill_armed = true;
    loop {
        tokio::select! {
            next = lines.next() => match next {
                Some((stderr, Ok(line))) => {
                    for event in scanner.scan(&line, stderr) {
                        if tx.send(event).await.is_err() {
                            debug!("Attach consumer gone; stopping subprocess");
                            let _ = child.kill().await;
                            return;
                        }
                    }
                }
                Some((_, Err(e))) => warn!(error = %e, "Failed to read attach output"),
                None => break,
            },
            requested = &mut kill_rx, if kill_armed => {
                kill_armed = false;
                // A dropped handle is not an abort request
                if requested.is_ok() {
                    debug!("Abort requested");
                    let _ = child.kill().await;
                }
            }
        }
    }

    let code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(error = %e, "Failed to wait for attach subprocess");
            None
        }
    };
    if code != Some(0) {
        warn!(code = ?code, "Attach subprocess exited abnormally");
    }
    let _ = tx.send(AttachEvent::Exited { code }).await;
}

/// Turns output lines into events, counting retries
#[derive(Debug, Default)]
pub struct OutputScanner {
    retries: u32,
}

impl OutputScanner {
    pub fn scan(&mut self, line: &str, stderr: bool) -> Vec<AttachEvent> {
        let mut events = vec![AttachEvent::Output {
            line: line.to_string(),
            stderr,
        }];
        if let Some(tunnel) = parse_tunnel_details(line) {
            events.push(AttachEvent::Connected(tunnel));
        }
        if let Some(notice) = parse_retry_notice(line) {
            self.retries += 1;
            events.push(AttachEvent::Retry {
                notice,
                count: self.retries,
            });
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanner_emits_connected() {
        let mut scanner = OutputScanner::default();
        let events = scanner.scan("SSH: ssh root@localhost -p 8022 [password: pass]", false);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], AttachEvent::Connected(t) if t.local_port == 8022));
    }

    #[test]
    fn scanner_counts_retries() {
        let mut scanner = OutputScanner::default();
        let line = "Starting SSH tunnel to root@10.0.0.7, port 10022 failed, retrying in 3 seconds";
        scanner.scan(line, true);
        let events = scanner.scan(line, true);
        assert!(matches!(&events[1], AttachEvent::Retry { count: 2, notice } if notice.retry_wait_seconds == 3));
    }

    #[test]
    fn scanner_passes_plain_output() {
        let mut scanner = OutputScanner::default();
        let events = scanner.scan("Verifying credentials", false);
        assert_eq!(
            events,
            vec![AttachEvent::Output {
                line: "Verifying credentials".into(),
                stderr: false
            }]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_subprocess_output() {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg("echo 'SSH: ssh root@localhost -p 8022 [password: pass]'; echo oops >&2; exit 3");
        let mut handle = spawn_attach(cmd, "sh").unwrap();

        let mut events = Vec::new();
        while let Some(event) = handle.events.recv().await {
            events.push(event);
        }

        assert!(events.iter().any(|e| matches!(e, AttachEvent::Connected(_))));
        assert!(events
            .iter()
            .any(|e| matches!(e, AttachEvent::Output { stderr: true, line } if line == "oops")));
        assert_eq!(events.last(), Some(&AttachEvent::Exited { code: Some(3) }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn abort_kills_subprocess() {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg("echo started; exec sleep 30");
        let mut handle = spawn_attach(cmd, "sh").unwrap();

        let first = handle.events.recv().await.unwrap();
        assert!(matches!(first, AttachEvent::Output { .. }));
        handle.abort();

        let mut last = None;
        while let Some(event) = handle.events.recv().await {
            last = Some(event);
        }
        assert_eq!(last, Some(AttachEvent::Exited { code: None }));
    }

    #[tokio::test]
    async fn missing_interpreter_fails_to_spawn() {
        let interp = PythonInterpreter::new("/does/not/exist/python");
        assert!(matches!(
            attach_to_session(&interp, "abc"),
            Err(SessionError::Subprocess { .. })
        ));
    }
}
