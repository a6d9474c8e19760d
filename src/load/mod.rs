//! Bulk CPU-load sampling via the batch `top` report.
//!
//! One `top -b -n 2 -d <wait> -p <pid,pid,...>` invocation serves a whole
//! batch: top performs its own double sampling internally, and the second
//! pass of the report carries real per-process load percentages. Every
//! report row is matched back to a domain by re-extracting the pid from
//! that row's own PID column — row position is never trusted, because a
//! mismatch between assumed and actual row order would silently attribute
//! load to the wrong VM.

use std::collections::HashMap;
use std::time::Duration;

use crate::tool::{self, ToolError};

/// Bulk load tool; its absence at startup is fatal.
pub const LOAD_TOOL: &str = "top";

/// `top -p` rejects more pids than this per invocation; the batcher sizes
/// batches accordingly.
pub const MAX_PIDS_PER_CALL: usize = 20;

/// Samples CPU-load percentages for a batch of pids in one invocation.
pub trait LoadSampler {
    /// `pids` must already be sorted by the caller; the invocation passes
    /// them in exactly that order.
    fn sample(&self, pids: &[u32]) -> Result<HashMap<u32, f64>, ToolError>;
}

/// `top` batch-mode backed sampler.
pub struct TopLoadSampler {
    /// Delay between top's two passes; reuses the snapshot wait.
    delay: Duration,
    timeout: Duration,
}

impl TopLoadSampler {
    pub fn new(delay: Duration, timeout: Duration) -> Self {
        Self { delay, timeout }
    }
}

impl LoadSampler for TopLoadSampler {
    fn sample(&self, pids: &[u32]) -> Result<HashMap<u32, f64>, ToolError> {
        if pids.is_empty() {
            return Ok(HashMap::new());
        }

        let pid_list = pids
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let delay = format!("{:.1}", self.delay.as_secs_f64());

        let output = tool::run(
            LOAD_TOOL,
            &["-b", "-n", "2", "-d", &delay, "-p", &pid_list],
            self.timeout,
        )?;

        if !output.stderr.is_empty() {
            return Err(ToolError::Stderr {
                tool: LOAD_TOOL,
                stderr: output.stderr.trim().to_string(),
            });
        }

        parse_report(&output.stdout)
    }
}

/// Extract per-pid `%CPU` values from a batch-mode top report.
///
/// The report contains two process tables (one per pass); only the last
/// one reflects load over the sampling delay, the first being a
/// since-boot average. The last header row containing both `PID` and
/// `%CPU` anchors the column layout.
pub fn parse_report(report: &str) -> Result<HashMap<u32, f64>, ToolError> {
    let lines: Vec<&str> = report.lines().collect();

    let header_idx = lines
        .iter()
        .rposition(|l| {
            let tokens: Vec<&str> = l.split_whitespace().collect();
            tokens.contains(&"PID") && tokens.contains(&"%CPU")
        })
        .ok_or_else(|| ToolError::Unparsable {
            tool: LOAD_TOOL,
            reason: "no PID/%CPU header row in report".to_string(),
        })?;

    let header: Vec<&str> = lines[header_idx].split_whitespace().collect();
    // Both positions exist; rposition found them above.
    let pid_col = header.iter().position(|t| *t == "PID").unwrap_or(0);
    let cpu_col = header.iter().position(|t| *t == "%CPU").unwrap_or(0);

    let mut loads = HashMap::new();

    for line in &lines[header_idx + 1..] {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }

        let Some(pid) = tokens.get(pid_col).and_then(|t| t.parse::<u32>().ok()) else {
            continue;
        };

        let raw = tokens.get(cpu_col).ok_or_else(|| ToolError::Unparsable {
            tool: LOAD_TOOL,
            reason: format!("row for pid {pid} has no %CPU column"),
        })?;

        // Some locales print "12,5" instead of "12.5".
        let load = raw
            .replace(',', ".")
            .parse::<f64>()
            .map_err(|_| ToolError::Unparsable {
                tool: LOAD_TOOL,
                reason: format!("bad %CPU value `{raw}` for pid {pid}"),
            })?;

        loads.insert(pid, load);
    }

    Ok(loads)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two-pass batch report, trimmed to the shape top actually emits.
    const REPORT: &str = "\
top - 12:00:00 up 10 days,  3:02,  1 user,  load average: 0.42, 0.40, 0.38
Tasks:   3 total,   1 running,   2 sleeping,   0 stopped,   0 zombie
%Cpu(s):  4.2 us,  1.0 sy,  0.0 ni, 94.5 id,  0.2 wa,  0.0 hi,  0.1 si,  0.0 st
MiB Mem :  64205.4 total,   1024.0 free,  48120.2 used,  15061.2 buff/cache

    PID USER      PR  NI    VIRT    RES    SHR S  %CPU  %MEM     TIME+ COMMAND
    997 libvirt+  20   0 4920640 2.1g   21212 S   0.0   3.3  50:21.06 qemu-system-x86
   1044 libvirt+  20   0 6531072 4.0g   21804 S   0.0   6.4 101:02.88 qemu-system-x86
   1107 libvirt+  20   0 2310400 1.0g   20996 S   0.0   1.6  12:44.51 qemu-system-x86

top - 12:00:00 up 10 days,  3:02,  1 user,  load average: 0.42, 0.40, 0.38
Tasks:   3 total,   1 running,   2 sleeping,   0 stopped,   0 zombie
%Cpu(s):  6.1 us,  1.4 sy,  0.0 ni, 92.3 id,  0.1 wa,  0.0 hi,  0.1 si,  0.0 st
MiB Mem :  64205.4 total,   1024.0 free,  48120.2 used,  15061.2 buff/cache

    PID USER      PR  NI    VIRT    RES    SHR S  %CPU  %MEM     TIME+ COMMAND
    997 libvirt+  20   0 4920640 2.1g   21212 S  12.5   3.3  50:21.09 qemu-system-x86
   1044 libvirt+  20   0 6531072 4.0g   21804 R 103.0   6.4 101:03.21 qemu-system-x86
   1107 libvirt+  20   0 2310400 1.0g   20996 S   0.3   1.6  12:44.51 qemu-system-x86
";

    #[test]
    fn test_parse_uses_second_pass() {
        let loads = parse_report(REPORT).expect("parses");
        assert_eq!(loads.len(), 3);
        // First-pass values (all 0.0) must not win.
        assert_eq!(loads[&997], 12.5);
        assert_eq!(loads[&1044], 103.0);
        assert_eq!(loads[&1107], 0.3);
    }

    #[test]
    fn test_parse_matches_rows_by_pid_not_position() {
        // Rows deliberately permuted relative to sorted pid order.
        let report = "\
    PID USER      PR  NI    VIRT    RES    SHR S  %CPU  %MEM     TIME+ COMMAND
   1107 libvirt+  20   0 2310400 1.0g   20996 S   0.3   1.6  12:44.51 qemu-system-x86
    997 libvirt+  20   0 4920640 2.1g   21212 S  12.5   3.3  50:21.09 qemu-system-x86
   1044 libvirt+  20   0 6531072 4.0g   21804 R 103.0   6.4 101:03.21 qemu-system-x86
";
        let loads = parse_report(report).expect("parses");
        assert_eq!(loads[&997], 12.5);
        assert_eq!(loads[&1044], 103.0);
        assert_eq!(loads[&1107], 0.3);
    }

    #[test]
    fn test_parse_locale_comma_decimal() {
        let report = "\
    PID USER      PR  NI    VIRT    RES    SHR S  %CPU  %MEM     TIME+ COMMAND
    997 libvirt+  20   0 4920640 2.1g   21212 S  12,5   3,3  50:21.09 qemu-system-x86
";
        let loads = parse_report(report).expect("parses");
        assert_eq!(loads[&997], 12.5);
    }

    #[test]
    fn test_parse_missing_header_is_unparsable() {
        let err = parse_report("top - 12:00:00 up 10 days\nTasks: 3 total\n").unwrap_err();
        assert!(matches!(err, ToolError::Unparsable { tool: "top", .. }));
    }

    #[test]
    fn test_parse_empty_report_is_unparsable() {
        assert!(matches!(
            parse_report("").unwrap_err(),
            ToolError::Unparsable { .. }
        ));
    }

    #[test]
    fn test_parse_bad_cpu_value_is_unparsable() {
        let report = "\
    PID USER      PR  NI    VIRT    RES    SHR S  %CPU  %MEM     TIME+ COMMAND
    997 libvirt+  20   0 4920640 2.1g   21212 S  x.y   3.3  50:21.09 qemu-system-x86
";
        let err = parse_report(report).unwrap_err();
        assert!(matches!(err, ToolError::Unparsable { .. }));
    }

    #[test]
    fn test_parse_truncated_row_is_unparsable() {
        let report = "\
    PID USER      PR  NI    VIRT    RES    SHR S  %CPU  %MEM     TIME+ COMMAND
    997 libvirt+  20   0
";
        let err = parse_report(report).unwrap_err();
        assert!(matches!(err, ToolError::Unparsable { .. }));
    }

    #[test]
    fn test_parse_skips_non_process_lines() {
        let report = "\
    PID USER      PR  NI    VIRT    RES    SHR S  %CPU  %MEM     TIME+ COMMAND
    997 libvirt+  20   0 4920640 2.1g   21212 S   1.0   3.3  50:21.09 qemu-system-x86

some trailing noise without a pid
";
        let loads = parse_report(report).expect("parses");
        assert_eq!(loads.len(), 1);
    }
}
