//! Libvirt-backed [`Hypervisor`] implementation (`libvirt` feature).

use virt::connect::Connect;
use virt::domain::Domain;

use super::{BlockStats, DomainHandle, Hypervisor, HypervisorError, InterfaceStats, MemoryStats};

/// `VIR_DOMAIN_MEMORY_STAT_ACTUAL_BALLOON`.
const MEMORY_STAT_ACTUAL_BALLOON: i32 = 6;

/// `VIR_DOMAIN_MEMORY_STAT_RSS`.
const MEMORY_STAT_RSS: i32 = 7;

/// Read-only libvirt connection held for the process lifetime.
pub struct LibvirtHypervisor {
    conn: Connect,
}

impl LibvirtHypervisor {
    /// Open a read-only connection to `uri`.
    pub fn open(uri: &str) -> Result<Self, HypervisorError> {
        let conn = Connect::open_read_only(Some(uri)).map_err(|e| HypervisorError::Connect {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self { conn })
    }
}

impl Hypervisor for LibvirtHypervisor {
    type Domain = LibvirtDomain;

    fn list_domains(&self) -> Result<Vec<Self::Domain>, HypervisorError> {
        let domains = self
            .conn
            .list_all_domains(0)
            .map_err(|e| HypervisorError::List {
                reason: e.to_string(),
            })?;

        Ok(domains.into_iter().map(LibvirtDomain::new).collect())
    }
}

/// One libvirt domain handle, valid for the current cycle only.
pub struct LibvirtDomain {
    domain: Domain,
    name: String,
    uuid: String,
}

impl LibvirtDomain {
    fn new(domain: Domain) -> Self {
        // Name and UUID identify the domain in every log line and error, so
        // resolve them once up front; libvirt only fails these calls for a
        // domain that vanished, in which case the placeholders still let the
        // cycle report something meaningful.
        let name = domain.get_name().unwrap_or_else(|_| "<unknown>".to_string());
        let uuid = domain
            .get_uuid_string()
            .unwrap_or_else(|_| "<unknown>".to_string());

        Self { domain, name, uuid }
    }

    fn call_err(&self, call: &'static str, err: virt::error::Error) -> HypervisorError {
        HypervisorError::DomainCall {
            call,
            domain: self.name.clone(),
            reason: err.to_string(),
        }
    }
}

impl DomainHandle for LibvirtDomain {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn uuid(&self) -> String {
        self.uuid.clone()
    }

    fn is_active(&self) -> Result<bool, HypervisorError> {
        self.domain
            .is_active()
            .map_err(|e| self.call_err("isActive", e))
    }

    fn xml_desc(&self) -> Result<String, HypervisorError> {
        self.domain
            .get_xml_desc(0)
            .map_err(|e| self.call_err("getXMLDesc", e))
    }

    fn memory_stats(&self) -> Result<MemoryStats, HypervisorError> {
        let stats = self
            .domain
            .memory_stats(0)
            .map_err(|e| self.call_err("memoryStats", e))?;

        let mut memory = MemoryStats::default();
        for stat in stats {
            if stat.tag == MEMORY_STAT_ACTUAL_BALLOON {
                memory.actual_kb = stat.val;
            } else if stat.tag == MEMORY_STAT_RSS {
                memory.rss_kb = stat.val;
            }
        }

        Ok(memory)
    }

    fn interface_stats(&self, device: &str) -> Result<InterfaceStats, HypervisorError> {
        let stats = self
            .domain
            .interface_stats(device)
            .map_err(|e| self.call_err("interfaceStats", e))?;

        Ok(InterfaceStats {
            rx_bytes: stats.rx_bytes.max(0) as u64,
            tx_bytes: stats.tx_bytes.max(0) as u64,
        })
    }

    fn block_stats(&self, device: &str) -> Result<BlockStats, HypervisorError> {
        let stats = self
            .domain
            .get_block_stats(device)
            .map_err(|e| self.call_err("blockStats", e))?;

        Ok(BlockStats {
            read_requests: stats.rd_req.max(0) as u64,
            write_requests: stats.wr_req.max(0) as u64,
            read_bytes: stats.rd_bytes.max(0) as u64,
            write_bytes: stats.wr_bytes.max(0) as u64,
        })
    }
}
