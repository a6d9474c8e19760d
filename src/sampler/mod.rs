//! Per-domain counter snapshots and rate derivation.
//!
//! The sampling contract is two snapshots per domain per cycle: snapshot A,
//! a fixed wait W, snapshot B. "total" metrics report B's cumulative
//! values; "current" metrics report `(B − A) / W`. Nothing here persists
//! across cycles — rates never span cycle boundaries.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::hypervisor::descriptor::DomainDescriptor;
use crate::hypervisor::{DomainHandle, HypervisorError, MemoryStats};
use crate::metric::{DomainRecord, DomainTags, Metric, MetricValue};

/// Point-in-time cumulative counters for one domain, summed across all of
/// its descriptor interfaces and disks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub net_rx_bytes: u64,
    pub net_tx_bytes: u64,
    pub disk_read_requests: u64,
    pub disk_write_requests: u64,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
}

/// Per-second deltas between two snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CounterRates {
    pub net_rx_bytes: f64,
    pub net_tx_bytes: f64,
    pub disk_read_requests: f64,
    pub disk_write_requests: f64,
    pub disk_read_bytes: f64,
    pub disk_write_bytes: f64,
}

/// Read one snapshot of every cumulative counter the descriptor names.
pub fn snapshot_counters<D: DomainHandle>(
    domain: &D,
    descriptor: &DomainDescriptor,
) -> Result<CounterSnapshot, HypervisorError> {
    let mut snapshot = CounterSnapshot::default();

    for device in &descriptor.interfaces {
        let stats = domain.interface_stats(device)?;
        snapshot.net_rx_bytes += stats.rx_bytes;
        snapshot.net_tx_bytes += stats.tx_bytes;
    }

    for device in &descriptor.disks {
        let stats = domain.block_stats(device)?;
        snapshot.disk_read_requests += stats.read_requests;
        snapshot.disk_write_requests += stats.write_requests;
        snapshot.disk_read_bytes += stats.read_bytes;
        snapshot.disk_write_bytes += stats.write_bytes;
    }

    Ok(snapshot)
}

/// Derive per-second rates from two time-separated snapshots.
///
/// The denominator is the configured wait, not measured elapsed time (an
/// accepted approximation). Deltas saturate so a counter reset between
/// snapshots yields a zero rate, never a negative one.
pub fn compute_rates(
    first: &CounterSnapshot,
    second: &CounterSnapshot,
    wait: Duration,
) -> CounterRates {
    let secs = wait.as_secs_f64();
    let per_sec = |a: u64, b: u64| b.saturating_sub(a) as f64 / secs;

    CounterRates {
        net_rx_bytes: per_sec(first.net_rx_bytes, second.net_rx_bytes),
        net_tx_bytes: per_sec(first.net_tx_bytes, second.net_tx_bytes),
        disk_read_requests: per_sec(first.disk_read_requests, second.disk_read_requests),
        disk_write_requests: per_sec(first.disk_write_requests, second.disk_write_requests),
        disk_read_bytes: per_sec(first.disk_read_bytes, second.disk_read_bytes),
        disk_write_bytes: per_sec(first.disk_write_bytes, second.disk_write_bytes),
    }
}

/// Best-effort single memory figure: the larger of the balloon ("actual")
/// and resident-set readings, which routinely disagree.
pub fn memory_kb(stats: &MemoryStats) -> u64 {
    stats.actual_kb.max(stats.rss_kb)
}

/// Assemble a domain's complete metric record for the cycle.
///
/// CPU load is deliberately absent here; it arrives from the bulk load
/// sampler and is merged in at the batch level.
pub fn build_record(
    tags: DomainTags,
    pid: u32,
    descriptor: &DomainDescriptor,
    second: &CounterSnapshot,
    rates: &CounterRates,
    memory_kb: u64,
    cpu_time_seconds: f64,
) -> DomainRecord {
    let mut metrics = BTreeMap::new();

    metrics.insert(Metric::CpuTime, MetricValue::Float(cpu_time_seconds));
    metrics.insert(Metric::Memory, MetricValue::Unsigned(memory_kb));
    metrics.insert(
        Metric::MaxMemory,
        MetricValue::Unsigned(descriptor.max_memory_kb),
    );
    metrics.insert(Metric::MaxVcpus, MetricValue::Unsigned(descriptor.max_vcpus));

    metrics.insert(Metric::NetworkRx, MetricValue::Unsigned(second.net_rx_bytes));
    metrics.insert(Metric::NetworkTx, MetricValue::Unsigned(second.net_tx_bytes));
    metrics.insert(
        Metric::NetworkCurrentRx,
        MetricValue::Float(rates.net_rx_bytes),
    );
    metrics.insert(
        Metric::NetworkCurrentTx,
        MetricValue::Float(rates.net_tx_bytes),
    );

    metrics.insert(
        Metric::DiskReadRequests,
        MetricValue::Unsigned(second.disk_read_requests),
    );
    metrics.insert(
        Metric::DiskWriteRequests,
        MetricValue::Unsigned(second.disk_write_requests),
    );
    metrics.insert(
        Metric::DiskTotalRequests,
        MetricValue::Unsigned(second.disk_read_requests + second.disk_write_requests),
    );
    metrics.insert(
        Metric::DiskReadBytes,
        MetricValue::Unsigned(second.disk_read_bytes),
    );
    metrics.insert(
        Metric::DiskWriteBytes,
        MetricValue::Unsigned(second.disk_write_bytes),
    );
    metrics.insert(
        Metric::DiskTotalBytes,
        MetricValue::Unsigned(second.disk_read_bytes + second.disk_write_bytes),
    );

    metrics.insert(
        Metric::DiskCurrentReadRequests,
        MetricValue::Float(rates.disk_read_requests),
    );
    metrics.insert(
        Metric::DiskCurrentWriteRequests,
        MetricValue::Float(rates.disk_write_requests),
    );
    metrics.insert(
        Metric::DiskCurrentTotalRequests,
        MetricValue::Float(rates.disk_read_requests + rates.disk_write_requests),
    );
    metrics.insert(
        Metric::DiskCurrentReadBytes,
        MetricValue::Float(rates.disk_read_bytes),
    );
    metrics.insert(
        Metric::DiskCurrentWriteBytes,
        MetricValue::Float(rates.disk_write_bytes),
    );
    metrics.insert(
        Metric::DiskCurrentTotalBytes,
        MetricValue::Float(rates.disk_read_bytes + rates.disk_write_bytes),
    );

    DomainRecord { tags, pid, metrics }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypervisor::{BlockStats, InterfaceStats};
    use std::collections::HashMap;

    struct FakeDomain {
        interfaces: HashMap<String, InterfaceStats>,
        disks: HashMap<String, BlockStats>,
    }

    impl DomainHandle for FakeDomain {
        fn name(&self) -> String {
            "fake".to_string()
        }

        fn uuid(&self) -> String {
            "0e3e1639-e8d4-4d0c-9cf1-a14c4a4b2f54".to_string()
        }

        fn is_active(&self) -> Result<bool, HypervisorError> {
            Ok(true)
        }

        fn xml_desc(&self) -> Result<String, HypervisorError> {
            Ok(String::new())
        }

        fn memory_stats(&self) -> Result<MemoryStats, HypervisorError> {
            Ok(MemoryStats::default())
        }

        fn interface_stats(&self, device: &str) -> Result<InterfaceStats, HypervisorError> {
            self.interfaces
                .get(device)
                .copied()
                .ok_or(HypervisorError::DomainCall {
                    call: "interfaceStats",
                    domain: self.name(),
                    reason: "no such device".to_string(),
                })
        }

        fn block_stats(&self, device: &str) -> Result<BlockStats, HypervisorError> {
            self.disks
                .get(device)
                .copied()
                .ok_or(HypervisorError::DomainCall {
                    call: "blockStats",
                    domain: self.name(),
                    reason: "no such device".to_string(),
                })
        }
    }

    fn descriptor(interfaces: &[&str], disks: &[&str]) -> DomainDescriptor {
        DomainDescriptor {
            domain_type: "kvm".to_string(),
            max_memory_kb: 2_097_152,
            max_vcpus: 2,
            interfaces: interfaces.iter().map(|s| s.to_string()).collect(),
            disks: disks.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_snapshot_sums_across_devices() {
        let domain = FakeDomain {
            interfaces: HashMap::from([
                (
                    "vnet0".to_string(),
                    InterfaceStats {
                        rx_bytes: 100,
                        tx_bytes: 10,
                    },
                ),
                (
                    "vnet1".to_string(),
                    InterfaceStats {
                        rx_bytes: 200,
                        tx_bytes: 20,
                    },
                ),
            ]),
            disks: HashMap::from([
                (
                    "vda".to_string(),
                    BlockStats {
                        read_requests: 5,
                        write_requests: 7,
                        read_bytes: 4096,
                        write_bytes: 8192,
                    },
                ),
                (
                    "vdb".to_string(),
                    BlockStats {
                        read_requests: 1,
                        write_requests: 2,
                        read_bytes: 512,
                        write_bytes: 1024,
                    },
                ),
            ]),
        };

        let snap = snapshot_counters(&domain, &descriptor(&["vnet0", "vnet1"], &["vda", "vdb"]))
            .expect("snapshots");
        assert_eq!(snap.net_rx_bytes, 300);
        assert_eq!(snap.net_tx_bytes, 30);
        assert_eq!(snap.disk_read_requests, 6);
        assert_eq!(snap.disk_write_requests, 9);
        assert_eq!(snap.disk_read_bytes, 4608);
        assert_eq!(snap.disk_write_bytes, 9216);
    }

    #[test]
    fn test_snapshot_unknown_device_fails() {
        let domain = FakeDomain {
            interfaces: HashMap::new(),
            disks: HashMap::new(),
        };
        let err = snapshot_counters(&domain, &descriptor(&["vnet9"], &[])).unwrap_err();
        assert!(matches!(
            err,
            HypervisorError::DomainCall {
                call: "interfaceStats",
                ..
            }
        ));
    }

    #[test]
    fn test_rates_are_delta_over_wait() {
        // Scenario from the sampling contract: two interfaces with
        // rx=(100,200), tx=(10,20) at t0; rx=(110,215), tx=(12,25) at t0+W.
        let first = CounterSnapshot {
            net_rx_bytes: 300,
            net_tx_bytes: 30,
            ..Default::default()
        };
        let second = CounterSnapshot {
            net_rx_bytes: 325,
            net_tx_bytes: 37,
            ..Default::default()
        };

        let rates = compute_rates(&first, &second, Duration::from_millis(125));
        assert_eq!(rates.net_rx_bytes, (325.0 - 300.0) / 0.125);
        assert_eq!(rates.net_rx_bytes, 200.0);
        assert_eq!(rates.net_tx_bytes, 56.0);
        assert_eq!(rates.disk_read_bytes, 0.0);
    }

    #[test]
    fn test_rates_saturate_on_counter_reset() {
        let first = CounterSnapshot {
            net_rx_bytes: 1000,
            ..Default::default()
        };
        let second = CounterSnapshot {
            net_rx_bytes: 10,
            ..Default::default()
        };

        let rates = compute_rates(&first, &second, Duration::from_secs(1));
        assert_eq!(rates.net_rx_bytes, 0.0);
    }

    #[test]
    fn test_memory_takes_larger_reading() {
        assert_eq!(
            memory_kb(&MemoryStats {
                actual_kb: 2048,
                rss_kb: 1500,
            }),
            2048
        );
        assert_eq!(
            memory_kb(&MemoryStats {
                actual_kb: 1024,
                rss_kb: 1900,
            }),
            1900
        );
    }

    #[test]
    fn test_build_record_totals_and_currents() {
        let desc = descriptor(&["vnet0"], &["vda"]);
        let second = CounterSnapshot {
            net_rx_bytes: 325,
            net_tx_bytes: 37,
            disk_read_requests: 10,
            disk_write_requests: 4,
            disk_read_bytes: 4096,
            disk_write_bytes: 2048,
        };
        let rates = CounterRates {
            net_rx_bytes: 200.0,
            net_tx_bytes: 56.0,
            disk_read_requests: 8.0,
            disk_write_requests: 2.0,
            disk_read_bytes: 1024.0,
            disk_write_bytes: 512.0,
        };

        let record = build_record(
            DomainTags {
                deploy_id: "one-42".to_string(),
                domain_type: "kvm".to_string(),
            },
            997,
            &desc,
            &second,
            &rates,
            2100,
            1234.56,
        );

        assert_eq!(record.pid, 997);
        assert_eq!(
            record.metrics[&Metric::NetworkRx],
            MetricValue::Unsigned(325)
        );
        assert_eq!(
            record.metrics[&Metric::NetworkCurrentRx],
            MetricValue::Float(200.0)
        );
        assert_eq!(
            record.metrics[&Metric::DiskTotalRequests],
            MetricValue::Unsigned(14)
        );
        assert_eq!(
            record.metrics[&Metric::DiskTotalBytes],
            MetricValue::Unsigned(6144)
        );
        assert_eq!(
            record.metrics[&Metric::DiskCurrentTotalRequests],
            MetricValue::Float(10.0)
        );
        assert_eq!(
            record.metrics[&Metric::DiskCurrentTotalBytes],
            MetricValue::Float(1536.0)
        );
        assert_eq!(record.metrics[&Metric::Memory], MetricValue::Unsigned(2100));
        assert_eq!(
            record.metrics[&Metric::MaxMemory],
            MetricValue::Unsigned(2_097_152)
        );
        assert_eq!(record.metrics[&Metric::MaxVcpus], MetricValue::Unsigned(2));
        assert_eq!(
            record.metrics[&Metric::CpuTime],
            MetricValue::Float(1234.56)
        );
        // Cpu load is merged later by the batch step.
        assert!(!record.metrics.contains_key(&Metric::CpuLoad));
        // 20 per-domain metrics before cpu.load arrives.
        assert_eq!(record.metrics.len(), 20);
    }
}
