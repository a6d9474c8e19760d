//! Typed metric names, values, and per-domain records.
//!
//! The emitter never sees free-form metric name strings: every series this
//! collector can produce is a [`Metric`] variant, and a domain's cycle
//! output is a [`DomainRecord`] pairing the fixed tag set with a
//! name-to-value map.

use std::collections::BTreeMap;
use std::fmt;

/// Tag key for the domain name.
pub const TAG_DEPLOY_ID: &str = "deploy_id";

/// Tag key for the virtualization type.
pub const TAG_TYPE: &str = "type";

/// Every time series emitted by this collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    /// Number of successfully sampled VMs this cycle (untagged).
    Count,
    CpuLoad,
    CpuTime,
    Memory,
    MaxMemory,
    MaxVcpus,
    NetworkRx,
    NetworkTx,
    NetworkCurrentRx,
    NetworkCurrentTx,
    DiskReadRequests,
    DiskReadBytes,
    DiskWriteRequests,
    DiskWriteBytes,
    DiskTotalRequests,
    DiskTotalBytes,
    DiskCurrentReadRequests,
    DiskCurrentReadBytes,
    DiskCurrentWriteRequests,
    DiskCurrentWriteBytes,
    DiskCurrentTotalRequests,
    DiskCurrentTotalBytes,
}

impl Metric {
    /// Full OpenTSDB series name.
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Count => "libvirt.vm.count",
            Metric::CpuLoad => "libvirt.vm.cpu.load",
            Metric::CpuTime => "libvirt.vm.cpu.time",
            Metric::Memory => "libvirt.vm.memory",
            Metric::MaxMemory => "libvirt.vm.max.memory",
            Metric::MaxVcpus => "libvirt.vm.max.vcpus",
            Metric::NetworkRx => "libvirt.vm.network.rx",
            Metric::NetworkTx => "libvirt.vm.network.tx",
            Metric::NetworkCurrentRx => "libvirt.vm.network.current.rx",
            Metric::NetworkCurrentTx => "libvirt.vm.network.current.tx",
            Metric::DiskReadRequests => "libvirt.vm.disk.read.requests",
            Metric::DiskReadBytes => "libvirt.vm.disk.read.bytes",
            Metric::DiskWriteRequests => "libvirt.vm.disk.write.requests",
            Metric::DiskWriteBytes => "libvirt.vm.disk.write.bytes",
            Metric::DiskTotalRequests => "libvirt.vm.disk.total.requests",
            Metric::DiskTotalBytes => "libvirt.vm.disk.total.bytes",
            Metric::DiskCurrentReadRequests => "libvirt.vm.disk.current.read.requests",
            Metric::DiskCurrentReadBytes => "libvirt.vm.disk.current.read.bytes",
            Metric::DiskCurrentWriteRequests => "libvirt.vm.disk.current.write.requests",
            Metric::DiskCurrentWriteBytes => "libvirt.vm.disk.current.write.bytes",
            Metric::DiskCurrentTotalRequests => "libvirt.vm.disk.current.total.requests",
            Metric::DiskCurrentTotalBytes => "libvirt.vm.disk.current.total.bytes",
        }
    }
}

impl Metric {
    /// All variants, in emission (ordering) order.
    pub fn all() -> &'static [Metric] {
        &[
            Metric::Count,
            Metric::CpuLoad,
            Metric::CpuTime,
            Metric::Memory,
            Metric::MaxMemory,
            Metric::MaxVcpus,
            Metric::NetworkRx,
            Metric::NetworkTx,
            Metric::NetworkCurrentRx,
            Metric::NetworkCurrentTx,
            Metric::DiskReadRequests,
            Metric::DiskReadBytes,
            Metric::DiskWriteRequests,
            Metric::DiskWriteBytes,
            Metric::DiskTotalRequests,
            Metric::DiskTotalBytes,
            Metric::DiskCurrentReadRequests,
            Metric::DiskCurrentReadBytes,
            Metric::DiskCurrentWriteRequests,
            Metric::DiskCurrentWriteBytes,
            Metric::DiskCurrentTotalRequests,
            Metric::DiskCurrentTotalBytes,
        ]
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical list of all series names emitted by this collector.
pub const ALL_METRIC_NAMES: &[&str] = &[
    "libvirt.vm.count",
    "libvirt.vm.cpu.load",
    "libvirt.vm.cpu.time",
    "libvirt.vm.memory",
    "libvirt.vm.max.memory",
    "libvirt.vm.max.vcpus",
    "libvirt.vm.network.rx",
    "libvirt.vm.network.tx",
    "libvirt.vm.network.current.rx",
    "libvirt.vm.network.current.tx",
    "libvirt.vm.disk.read.requests",
    "libvirt.vm.disk.read.bytes",
    "libvirt.vm.disk.write.requests",
    "libvirt.vm.disk.write.bytes",
    "libvirt.vm.disk.total.requests",
    "libvirt.vm.disk.total.bytes",
    "libvirt.vm.disk.current.read.requests",
    "libvirt.vm.disk.current.read.bytes",
    "libvirt.vm.disk.current.write.requests",
    "libvirt.vm.disk.current.write.bytes",
    "libvirt.vm.disk.current.total.requests",
    "libvirt.vm.disk.current.total.bytes",
];

/// A metric sample value. Cumulative counters and capacities are unsigned;
/// rates and cpu figures are floats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Unsigned(u64),
    Float(f64),
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Unsigned(v) => write!(f, "{v}"),
            MetricValue::Float(v) => write!(f, "{v}"),
        }
    }
}

/// The tag set attached to every per-domain line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainTags {
    /// Domain name, emitted as `deploy_id`.
    pub deploy_id: String,
    /// Virtualization type from the descriptor, emitted as `type`.
    pub domain_type: String,
}

/// One domain's complete output for a cycle.
///
/// The map is ordered so emission is deterministic.
#[derive(Debug, Clone)]
pub struct DomainRecord {
    pub tags: DomainTags,
    /// OS process backing this domain, resolved this cycle.
    pub pid: u32,
    pub metrics: BTreeMap<Metric, MetricValue>,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_metric_names() {
        assert_eq!(Metric::Count.as_str(), "libvirt.vm.count");
        assert_eq!(Metric::NetworkCurrentRx.as_str(), "libvirt.vm.network.current.rx");
        assert_eq!(
            Metric::DiskCurrentTotalBytes.as_str(),
            "libvirt.vm.disk.current.total.bytes"
        );
        assert_eq!(Metric::MaxVcpus.as_str(), "libvirt.vm.max.vcpus");
    }

    #[test]
    fn test_all_metric_names_unique_and_prefixed() {
        let unique: HashSet<&str> = ALL_METRIC_NAMES.iter().copied().collect();
        assert_eq!(unique.len(), ALL_METRIC_NAMES.len());
        assert!(ALL_METRIC_NAMES.iter().all(|n| n.starts_with("libvirt.vm.")));
    }

    #[test]
    fn test_all_covers_every_name() {
        let names: Vec<&str> = Metric::all().iter().map(|m| m.as_str()).collect();
        assert_eq!(names, ALL_METRIC_NAMES);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(MetricValue::Unsigned(325).to_string(), "325");
        assert_eq!(MetricValue::Float(100.0).to_string(), "100");
        assert_eq!(MetricValue::Float(12.5).to_string(), "12.5");
    }
}
