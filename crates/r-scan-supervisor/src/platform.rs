//! ---
//! rscan_section: "04-supervisor"
//! rscan_subsection: "module"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Decoding engine process supervision."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
//! Operating-system process access.
//!
//! The supervisor only needs four primitives: list processes matching the
//! engine signature, check liveness, deliver a termination signal and read
//! resource usage. [`ProcFsTable`] implements them with `/proc` and `libc`.
use std::io;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use r_scan_common::EngineConfig;

/// Substrings identifying an engine process by name or command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSignature {
    patterns: Vec<String>,
}

impl EngineSignature {
    /// Build a signature from patterns; blank patterns are ignored.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.trim().is_empty())
                .collect(),
        }
    }

    /// Signature from the configured patterns.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.signature.iter().cloned())
    }

    /// True when any pattern occurs in the process name or command line.
    pub fn matches(&self, name: &str, cmdline: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| name.contains(pattern.as_str()) || cmdline.contains(pattern.as_str()))
    }

    /// Configured match patterns.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

/// A process found in the system table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    /// Process id.
    pub pid: u32,
    /// Short executable name.
    pub name: String,
    /// Space-joined argument vector.
    pub cmdline: String,
}

/// Resource usage sampled for one process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessStats {
    /// CPU usage averaged over the process lifetime, in percent of one core.
    pub cpu_percent: f64,
    /// Resident set size in MiB.
    pub rss_mib: f64,
    /// Wall-clock start time, when the table can tell.
    pub started_at: Option<DateTime<Utc>>,
    /// Time since the process started.
    pub uptime: Duration,
}

/// Recipient of a termination signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTarget {
    /// A single process.
    Process(u32),
    /// Every member of a process group.
    Group(u32),
}

/// Termination strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermSignal {
    /// Ask the process to exit (`SIGTERM`).
    Graceful,
    /// Kill unconditionally (`SIGKILL`).
    Forceful,
}

impl TermSignal {
    /// Signal name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TermSignal::Graceful => "SIGTERM",
            TermSignal::Forceful => "SIGKILL",
        }
    }
}

/// Platform process primitives used by the supervisor.
///
/// `signal` reports a target that no longer exists as
/// [`io::ErrorKind::NotFound`].
pub trait ProcessTable: Send + Sync + 'static {
    /// Every live process matching `signature`, excluding the caller.
    fn scan(&self, signature: &EngineSignature) -> Vec<ProcessEntry>;
    /// Whether `pid` exists and has not exited.
    fn is_alive(&self, pid: u32) -> bool;
    /// Deliver `signal` to `target`.
    fn signal(&self, target: SignalTarget, signal: TermSignal) -> io::Result<()>;
    /// Resource usage for `pid`, when readable.
    fn stats(&self, pid: u32) -> Option<ProcessStats>;
}

/// `/proc` backed process table.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcFsTable;

impl ProcFsTable {
    /// Table backed by `/proc`.
    pub fn new() -> Self {
        Self
    }
}

impl ProcessTable for ProcFsTable {
    fn scan(&self, signature: &EngineSignature) -> Vec<ProcessEntry> {
        sys::scan(signature)
    }

    fn is_alive(&self, pid: u32) -> bool {
        sys::is_alive(pid)
    }

    fn signal(&self, target: SignalTarget, signal: TermSignal) -> io::Result<()> {
        send_signal(target, signal)
    }

    fn stats(&self, pid: u32) -> Option<ProcessStats> {
        sys::stats(pid)
    }
}

#[cfg(unix)]
fn send_signal(target: SignalTarget, signal: TermSignal) -> io::Result<()> {
    let signo = match signal {
        TermSignal::Graceful => libc::SIGTERM,
        TermSignal::Forceful => libc::SIGKILL,
    };
    let rc = match target {
        // SAFETY: plain syscalls on a pid/pgid value; no memory is shared.
        SignalTarget::Process(pid) => unsafe { libc::kill(pid as libc::pid_t, signo) },
        SignalTarget::Group(pgid) => unsafe { libc::killpg(pgid as libc::pid_t, signo) },
    };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Err(io::Error::new(io::ErrorKind::NotFound, err))
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn send_signal(_target: SignalTarget, _signal: TermSignal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process signalling is only available on unix",
    ))
}

/// Fields of `/proc/[pid]/stat` the supervisor cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StatFields {
    pub state: char,
    pub utime: u64,
    pub stime: u64,
    pub starttime: u64,
}

/// Parse a `/proc/[pid]/stat` line. The command name may contain spaces and
/// parentheses, so fields are counted from the last `)`.
pub(crate) fn parse_stat(raw: &str) -> Option<StatFields> {
    let rest = &raw[raw.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    Some(StatFields {
        state: fields.first()?.chars().next()?,
        utime: fields.get(11)?.parse().ok()?,
        stime: fields.get(12)?.parse().ok()?,
        starttime: fields.get(19)?.parse().ok()?,
    })
}

#[cfg(target_os = "linux")]
mod sys {
    use std::path::Path;

    use super::*;

    fn read_trimmed(path: &Path) -> Option<String> {
        let raw = std::fs::read_to_string(path).ok()?;
        let v = raw.trim();
        if v.is_empty() {
            None
        } else {
            Some(v.to_string())
        }
    }

    fn read_cmdline(pid: u32) -> Option<String> {
        let raw = std::fs::read(format!("/proc/{}/cmdline", pid)).ok()?;
        let args: Vec<String> = raw
            .split(|b| *b == 0)
            .filter(|arg| !arg.is_empty())
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect();
        Some(args.join(" "))
    }

    fn read_stat(pid: u32) -> Option<StatFields> {
        parse_stat(&std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?)
    }

    fn clk_tck() -> f64 {
        // SAFETY: `sysconf` is thread-safe for this query and has no side effects.
        let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if hz > 0 {
            hz as f64
        } else {
            100.0
        }
    }

    fn page_size() -> u64 {
        // SAFETY: as above.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as u64
        } else {
            4096
        }
    }

    fn boot_time() -> Option<i64> {
        std::fs::read_to_string("/proc/stat")
            .ok()?
            .lines()
            .find_map(|line| line.strip_prefix("btime "))
            .and_then(|v| v.trim().parse().ok())
    }

    fn system_uptime() -> Option<f64> {
        std::fs::read_to_string("/proc/uptime")
            .ok()
            .and_then(|s| s.split_whitespace().next().and_then(|v| v.parse().ok()))
    }

    pub(super) fn scan(signature: &EngineSignature) -> Vec<ProcessEntry> {
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return Vec::new();
        };
        let own = std::process::id();

        let mut found: Vec<ProcessEntry> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .filter(|pid| *pid != own)
            .filter_map(|pid| {
                let name = read_trimmed(Path::new(&format!("/proc/{}/comm", pid)))
                    .unwrap_or_default();
                let cmdline = read_cmdline(pid).unwrap_or_default();
                if !signature.matches(&name, &cmdline) || !is_alive(pid) {
                    return None;
                }
                Some(ProcessEntry { pid, name, cmdline })
            })
            .collect();
        found.sort_by_key(|entry| entry.pid);
        found
    }

    pub(super) fn is_alive(pid: u32) -> bool {
        matches!(read_stat(pid), Some(stat) if stat.state != 'Z' && stat.state != 'X')
    }

    pub(super) fn stats(pid: u32) -> Option<ProcessStats> {
        let stat = read_stat(pid)?;
        let hz = clk_tck();
        let resident_pages: u64 = std::fs::read_to_string(format!("/proc/{}/statm", pid))
            .ok()?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()?;

        let started_secs = stat.starttime as f64 / hz;
        let age = system_uptime()
            .map(|up| (up - started_secs).max(0.0))
            .unwrap_or(0.0);
        let cpu_secs = (stat.utime + stat.stime) as f64 / hz;
        let cpu_percent = if age > 0.0 { cpu_secs / age * 100.0 } else { 0.0 };
        let started_at = boot_time().and_then(|btime| {
            let millis = btime * 1000 + (started_secs * 1000.0) as i64;
            Utc.timestamp_millis_opt(millis).single()
        });

        Some(ProcessStats {
            cpu_percent,
            rss_mib: (resident_pages * page_size()) as f64 / (1024.0 * 1024.0),
            started_at,
            uptime: Duration::from_secs_f64(age),
        })
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use super::*;

    pub(super) fn scan(_signature: &EngineSignature) -> Vec<ProcessEntry> {
        Vec::new()
    }

    #[cfg(unix)]
    pub(super) fn is_alive(pid: u32) -> bool {
        // SAFETY: signal 0 only checks that the pid exists.
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    #[cfg(not(unix))]
    pub(super) fn is_alive(_pid: u32) -> bool {
        false
    }

    pub(super) fn stats(_pid: u32) -> Option<ProcessStats> {
        None
    }
}
