//! Hypervisor connection seam.
//!
//! The pipeline talks to the hypervisor through the [`Hypervisor`] and
//! [`DomainHandle`] traits so the whole cycle can run against in-memory
//! fakes. The libvirt-backed implementation lives in [`libvirt`] behind
//! the `libvirt` cargo feature; without it, [`connect`] reports a distinct
//! unsupported error that the caller treats as fatal.

pub mod descriptor;

#[cfg(feature = "libvirt")]
pub mod libvirt;

use thiserror::Error;

/// Failures talking to the hypervisor.
#[derive(Error, Debug)]
pub enum HypervisorError {
    #[error("connecting to {uri}: {reason}")]
    Connect { uri: String, reason: String },

    #[error("listing domains: {reason}")]
    List { reason: String },

    #[error("{call} failed for domain {domain}: {reason}")]
    DomainCall {
        call: &'static str,
        domain: String,
        reason: String,
    },

    #[error("built without libvirt support; rebuild with `--features libvirt`")]
    Unsupported,
}

/// Balloon and resident memory readings for a domain, in kB.
///
/// `actual` is the hypervisor-reported balloon size, `rss` the resident set
/// the OS reports for the backing process; the two routinely disagree and
/// callers take the larger as a best-effort single figure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub actual_kb: u64,
    pub rss_kb: u64,
}

/// Cumulative byte counters for one network interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Cumulative request and byte counters for one block device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockStats {
    pub read_requests: u64,
    pub write_requests: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// One domain as exposed by the hypervisor. Handles are fetched fresh each
/// cycle and never cached across cycles.
pub trait DomainHandle {
    /// Stable human-readable domain name.
    fn name(&self) -> String;

    /// Domain UUID in canonical lowercase hex form.
    fn uuid(&self) -> String;

    fn is_active(&self) -> Result<bool, HypervisorError>;

    /// Raw XML descriptor document.
    fn xml_desc(&self) -> Result<String, HypervisorError>;

    fn memory_stats(&self) -> Result<MemoryStats, HypervisorError>;

    /// Cumulative counters for one interface target device.
    fn interface_stats(&self, device: &str) -> Result<InterfaceStats, HypervisorError>;

    /// Cumulative counters for one disk target device.
    fn block_stats(&self, device: &str) -> Result<BlockStats, HypervisorError>;
}

/// Read-only hypervisor connection held for the process lifetime.
pub trait Hypervisor {
    type Domain: DomainHandle;

    /// All domains known to the connection, active or not.
    fn list_domains(&self) -> Result<Vec<Self::Domain>, HypervisorError>;
}

/// Open a read-only connection to the hypervisor at `uri`.
#[cfg(feature = "libvirt")]
pub fn connect(uri: &str) -> Result<libvirt::LibvirtHypervisor, HypervisorError> {
    libvirt::LibvirtHypervisor::open(uri)
}

/// Stub used when built without the `libvirt` feature; always fails with
/// [`HypervisorError::Unsupported`].
#[cfg(not(feature = "libvirt"))]
pub fn connect(_uri: &str) -> Result<UnsupportedHypervisor, HypervisorError> {
    Err(HypervisorError::Unsupported)
}

/// Placeholder connection type for builds without a hypervisor backend.
#[cfg(not(feature = "libvirt"))]
#[derive(Debug)]
pub struct UnsupportedHypervisor;

/// Uninhabited domain type for [`UnsupportedHypervisor`].
#[cfg(not(feature = "libvirt"))]
pub enum NoDomain {}

#[cfg(not(feature = "libvirt"))]
impl DomainHandle for NoDomain {
    fn name(&self) -> String {
        match *self {}
    }

    fn uuid(&self) -> String {
        match *self {}
    }

    fn is_active(&self) -> Result<bool, HypervisorError> {
        match *self {}
    }

    fn xml_desc(&self) -> Result<String, HypervisorError> {
        match *self {}
    }

    fn memory_stats(&self) -> Result<MemoryStats, HypervisorError> {
        match *self {}
    }

    fn interface_stats(&self, _device: &str) -> Result<InterfaceStats, HypervisorError> {
        match *self {}
    }

    fn block_stats(&self, _device: &str) -> Result<BlockStats, HypervisorError> {
        match *self {}
    }
}

#[cfg(not(feature = "libvirt"))]
impl Hypervisor for UnsupportedHypervisor {
    type Domain = NoDomain;

    fn list_domains(&self) -> Result<Vec<Self::Domain>, HypervisorError> {
        Err(HypervisorError::Unsupported)
    }
}
