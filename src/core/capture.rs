//! Observation capture pipeline.
//!
//! An external capture process prints one line per observed connection
//! attempt, e.g.
//!
//! ```text
//! 12:00:00.000001 IP 10.0.0.5.51234 > 10.0.0.1.8080: Flags [S], seq 1
//! ```
//!
//! A reader task pushes raw lines onto a bounded queue and a parser task
//! drains it into the [`SourceLedger`]. Malformed lines are dropped. Read
//! errors and end of input outside shutdown are reported to the event sink,
//! since both mean the capture process is no longer feeding observations.

use std::process::Stdio;
use std::sync::Arc;

use log::{debug, error, info};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::core::events::{emit, EventSink, FirewallEvent};
use crate::core::ledger::SourceLedger;

/// Reported when the capture output ends while the service is still running
pub const CAPTURE_CLOSED: &str = "capture input closed";

/// Errors that can occur while starting the capture process
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture command is empty")]
    EmptyCommand,
    #[error("Failed to spawn capture command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Capture command has no stdout")]
    MissingStdout,
}

/// Extract the source address from one capture line.
///
/// The third whitespace-separated token holds `<address>.<port>`; everything
/// before the last `.` is the address.
pub fn parse_source(line: &str) -> Option<&str> {
    let mut tokens = line.split_whitespace();
    let _timestamp = tokens.next()?;
    if tokens.next()? != "IP" {
        return None;
    }
    let endpoint = tokens.next()?;
    match endpoint.rfind('.') {
        Some(idx) if idx > 0 => Some(&endpoint[..idx]),
        _ => None,
    }
}

/// Spawn the capture process described by a whitespace-separated command line
pub fn spawn_command(command_line: &str) -> Result<(Child, ChildStdout), CaptureError> {
    let mut argv = command_line.split_whitespace();
    let program = argv.next().ok_or(CaptureError::EmptyCommand)?;

    let mut child = Command::new(program)
        .args(argv)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| CaptureError::Spawn {
            command: command_line.to_string(),
            source,
        })?;
    let stdout = child.stdout.take().ok_or(CaptureError::MissingStdout)?;
    Ok((child, stdout))
}

/// Running reader and parser tasks
pub struct CapturePipeline {
    reader: JoinHandle<()>,
    parser: JoinHandle<u64>,
}

impl CapturePipeline {
    /// Start reading observation lines from `input` into `ledger`.
    ///
    /// The reader blocks once `queue_capacity` lines are waiting to be parsed.
    /// Both tasks stop when `shutdown` flips to `true`; end of input lets the
    /// parser drain what is queued and stop, and is reported to `sink` unless
    /// shutdown is already under way.
    pub fn start<R>(
        input: R,
        ledger: Arc<SourceLedger>,
        sink: Arc<dyn EventSink>,
        queue_capacity: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let reader = tokio::spawn(read_lines(input, tx, sink, shutdown.clone()));
        let parser = tokio::spawn(parse_lines(rx, ledger, shutdown));
        Self { reader, parser }
    }

    /// Wait for both tasks, returning how many lines were recorded as attempts
    pub async fn join(self) -> u64 {
        if let Err(e) = self.reader.await {
            error!("Capture reader task failed: {}", e);
        }
        match self.parser.await {
            Ok(recorded) => recorded,
            Err(e) => {
                error!("Capture parser task failed: {}", e);
                0
            }
        }
    }
}

async fn read_lines<R>(
    input: R,
    tx: mpsc::Sender<String>,
    sink: Arc<dyn EventSink>,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    loop {
        tokio::select! {
            next = lines.next_line() => match next {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    info!("Capture input closed");
                    // The capture process exited or closed its output on its own
                    if !*shutdown.borrow() {
                        emit(
                            sink.as_ref(),
                            &FirewallEvent::CaptureFailure { reason: CAPTURE_CLOSED.to_string() },
                        );
                    }
                    break;
                }
                Err(e) => {
                    error!("Capture input failed: {}", e);
                    emit(sink.as_ref(), &FirewallEvent::CaptureFailure { reason: e.to_string() });
                    break;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn parse_lines(
    mut rx: mpsc::Receiver<String>,
    ledger: Arc<SourceLedger>,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let mut recorded = 0;
    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(line) => match parse_source(&line) {
                    Some(source) => {
                        ledger.record_attempt(source);
                        recorded += 1;
                    }
                    None => debug!("Dropping unparseable capture line: {}", line),
                },
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    recorded
}
