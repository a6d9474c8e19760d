//! Domain-to-process correlation.
//!
//! Every cycle the collector captures one process listing and maps each
//! domain UUID to the pid of its backing process: the hypervisor launcher
//! records the UUID as a `-uuid` command-line argument, so a single scan
//! over the listing resolves the whole host. Resolution is repeated fresh
//! each cycle because a VM restart changes the pid.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::error::FatalError;
use crate::tool::{self, ToolError};

/// Process listing tool; its absence at startup is fatal.
pub const PROCESS_LIST_TOOL: &str = "ps";

/// Captures one process listing as lines of `<pid> <command...>`.
pub trait ProcessLister {
    fn capture(&self) -> Result<String, ToolError>;
}

/// `ps -ewwo pid,command` backed lister.
///
/// `-ww` disables command-line truncation; the UUID argument sits deep in
/// the launcher invocation and must not be cut off.
pub struct PsProcessLister {
    timeout: Duration,
}

impl PsProcessLister {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ProcessLister for PsProcessLister {
    fn capture(&self) -> Result<String, ToolError> {
        let output = tool::run(PROCESS_LIST_TOOL, &["-ewwo", "pid,command"], self.timeout)?;

        if !output.stderr.is_empty() {
            return Err(ToolError::Stderr {
                tool: PROCESS_LIST_TOOL,
                stderr: output.stderr.trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

fn uuid_arg_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"-uuid ([a-z0-9]{8}-[a-z0-9]{4}-[a-z0-9]{4}-[a-z0-9]{4}-[a-z0-9]{12})",
        )
        .expect("valid regex")
    })
}

/// Build the UUID-to-pid map from one process listing capture.
///
/// Lines without an embedded UUID are ignored. A matching line whose
/// leading token does not parse as a pid means the listing itself is
/// broken, which is fatal rather than domain-scoped.
pub fn correlate(listing: &str) -> Result<HashMap<String, u32>, FatalError> {
    let mut pids = HashMap::new();

    for line in listing.lines() {
        let line = line.trim();

        let Some(caps) = uuid_arg_re().captures(line) else {
            continue;
        };
        let uuid = caps[1].to_string();

        let token = line.split_whitespace().next().unwrap_or_default();
        let pid = token.parse::<u32>().map_err(|_| FatalError::InvalidPid {
            token: token.to_string(),
        })?;

        pids.insert(uuid, pid);
    }

    Ok(pids)
}

/// Whether `pid` still exists.
#[cfg(target_os = "linux")]
pub fn pid_exists(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
pub fn pid_exists(_pid: u32) -> bool {
    false
}

/// Cumulative cpu time (user + system) of `pid` in seconds.
#[cfg(target_os = "linux")]
pub fn read_cpu_time_seconds(pid: u32) -> Option<f64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let (utime, stime) = parse_stat_cpu_ticks(&stat)?;

    // SAFETY: sysconf is a read-only libc call, always safe.
    let ticks_per_sec = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks_per_sec <= 0 {
        return None;
    }

    Some((utime + stime) as f64 / ticks_per_sec as f64)
}

#[cfg(not(target_os = "linux"))]
pub fn read_cpu_time_seconds(_pid: u32) -> Option<f64> {
    None
}

/// Extract the utime and stime tick counters from `/proc/<pid>/stat`.
///
/// The comm field (2) may contain spaces and parentheses, so parsing must
/// resume after the last `)`; utime and stime are then fields 14 and 15 of
/// the full line, i.e. fields 12 and 13 of the remainder.
fn parse_stat_cpu_ticks(stat: &str) -> Option<(u64, u64)> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();

    let utime = fields.nth(11)?.parse().ok()?;
    let stime = fields.next()?.parse().ok()?;

    Some((utime, stime))
}
