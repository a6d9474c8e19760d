//! Metric line emission.
//!
//! Records are rendered in the tcollector/OpenTSDB put format:
//! `<metric> <unix-ts> <value> deploy_id=<name> type=<virt-type>`, one
//! line per metric, all of a domain's lines sharing one timestamp and tag
//! pair. The writer is buffered and flushed exactly once per completed
//! cycle so a downstream reader observes each cycle as one batch of lines.

use std::io::{self, Write};

use crate::metric::{DomainRecord, Metric, TAG_DEPLOY_ID, TAG_TYPE};

/// Buffered line-protocol emitter over any writer.
pub struct LineEmitter<W: Write> {
    out: W,
}

impl<W: Write> LineEmitter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Emit every metric of one domain record with a shared timestamp.
    pub fn emit_record(&mut self, record: &DomainRecord, timestamp: u64) -> io::Result<()> {
        for (metric, value) in &record.metrics {
            writeln!(
                self.out,
                "{} {} {} {}={} {}={}",
                metric.as_str(),
                timestamp,
                value,
                TAG_DEPLOY_ID,
                record.tags.deploy_id,
                TAG_TYPE,
                record.tags.domain_type,
            )?;
        }

        Ok(())
    }

    /// Emit the untagged per-cycle VM count.
    pub fn emit_count(&mut self, count: usize, timestamp: u64) -> io::Result<()> {
        writeln!(self.out, "{} {} {}", Metric::Count.as_str(), timestamp, count)
    }

    /// Flush the cycle's output to the underlying writer.
    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    /// Consume the emitter, returning the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}
