//! ---
//! rscan_section: "04-supervisor"
//! rscan_subsection: "module"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Decoding engine process supervision."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use r_scan_common::ENGINE_OUTPUT_TARGET;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Bounded ring of captured engine output lines.
#[derive(Debug)]
pub struct OutputLog {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
    echo: AtomicBool,
}

impl OutputLog {
    /// Create a ring retaining at most `capacity` lines.
    pub fn new(capacity: usize, echo: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            echo: AtomicBool::new(echo),
        }
    }

    /// Append one line, evicting the oldest when full.
    pub fn push(&self, stream: &'static str, line: String) {
        if self.echo.load(Ordering::Relaxed) {
            info!(target: ENGINE_OUTPUT_TARGET, stream, "{}", line);
        }
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The most recent `count` lines, oldest first.
    pub fn tail(&self, count: usize) -> Vec<String> {
        let lines = self.lines.lock();
        let skip = lines.len().saturating_sub(count);
        lines.iter().skip(skip).cloned().collect()
    }

    /// Drop every captured line.
    pub fn clear(&self) {
        self.lines.lock().clear();
    }

    /// Toggle forwarding of captured lines into the tracing stream.
    pub fn set_echo(&self, enabled: bool) {
        self.echo.store(enabled, Ordering::Relaxed);
    }

    /// Whether captured lines are also logged.
    pub fn echo_enabled(&self) -> bool {
        self.echo.load(Ordering::Relaxed)
    }

    /// Drain `reader` line by line into the ring until EOF.
    pub fn attach<R>(self: &Arc<Self>, reader: R, stream: &'static str) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let log = Arc::clone(self);
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => log.push(stream, line),
                    Ok(None) => break,
                    Err(err) => {
                        debug!(stream, error = %err, "engine output stream closed with error");
                        break;
                    }
                }
            }
        })
    }
}
