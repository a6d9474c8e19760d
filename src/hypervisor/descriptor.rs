//! Validated view of a domain's XML descriptor.
//!
//! The sampler needs five things from the descriptor: the virtualization
//! type, the static memory and vcpu capacity, and the target device names
//! of every interface and disk. [`DomainDescriptor::parse`] extracts all
//! of them in one pass and fails with a structured error if any required
//! field is absent, so downstream code never probes the document again.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// A required descriptor field is missing or malformed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("descriptor has no domain type")]
    MissingDomainType,

    #[error("descriptor has no static memory value")]
    MissingMemory,

    #[error("descriptor has no vcpu count")]
    MissingVcpus,

    #[error("interface {index} has no target device name")]
    MissingInterfaceDevice { index: usize },

    #[error("disk {index} has no target device name")]
    MissingDiskDevice { index: usize },
}

/// Complete, validated descriptor contents for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainDescriptor {
    /// Virtualization type (`kvm`, `qemu`, ...), emitted as the `type` tag.
    pub domain_type: String,
    /// Static memory capacity in kB.
    pub max_memory_kb: u64,
    /// Static vcpu capacity.
    pub max_vcpus: u64,
    /// Interface target device names, in document order.
    pub interfaces: Vec<String>,
    /// Disk target device names, in document order.
    pub disks: Vec<String>,
}

fn domain_type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<domain\s[^>]*\btype=['"]([^'"]+)['"]"#).expect("valid regex"))
}

fn memory_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<memory[^>]*>\s*(\d+)\s*</memory>").expect("valid regex"))
}

fn vcpu_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<vcpu[^>]*>\s*(\d+)\s*</vcpu>").expect("valid regex"))
}

fn target_dev_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<target\s[^>]*\bdev=['"]([^'"]+)['"]"#).expect("valid regex"))
}

impl DomainDescriptor {
    /// Parse and validate a raw descriptor document.
    pub fn parse(xml: &str) -> Result<Self, DescriptorError> {
        let domain_type = domain_type_re()
            .captures(xml)
            .map(|c| c[1].to_string())
            .ok_or(DescriptorError::MissingDomainType)?;

        let max_memory_kb = memory_re()
            .captures(xml)
            .and_then(|c| c[1].parse().ok())
            .ok_or(DescriptorError::MissingMemory)?;

        let max_vcpus = vcpu_re()
            .captures(xml)
            .and_then(|c| c[1].parse().ok())
            .ok_or(DescriptorError::MissingVcpus)?;

        let interfaces = target_devices(xml, "interface", |index| {
            DescriptorError::MissingInterfaceDevice { index }
        })?;

        let disks = target_devices(xml, "disk", |index| DescriptorError::MissingDiskDevice {
            index,
        })?;

        Ok(Self {
            domain_type,
            max_memory_kb,
            max_vcpus,
            interfaces,
            disks,
        })
    }
}

/// Extract the `<target dev=...>` name from every `<tag>` element.
///
/// A present element with no target device is an error; a descriptor with
/// no such elements at all yields an empty list (a diskless or isolated
/// domain is legal).
fn target_devices(
    xml: &str,
    tag: &str,
    missing: impl Fn(usize) -> DescriptorError,
) -> Result<Vec<String>, DescriptorError> {
    let mut devices = Vec::new();

    for (index, block) in element_blocks(xml, tag).into_iter().enumerate() {
        let dev = target_dev_re()
            .captures(block)
            .map(|c| c[1].to_string())
            .ok_or_else(|| missing(index))?;
        devices.push(dev);
    }

    Ok(devices)
}

/// Slice out the body of each `<tag ...>...</tag>` element.
///
/// Plain string scanning is enough here: libvirt descriptors never nest an
/// element inside another of the same name, and a block is bounded by its
/// closing tag or the next opening one.
fn element_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");

    let mut blocks = Vec::new();
    let mut rest = xml;

    while let Some(pos) = rest.find(&open) {
        let after = &rest[pos + open.len()..];

        // Reject prefix matches like `<diskette` for tag `disk`.
        if !after.starts_with([' ', '\t', '\n', '>', '/']) {
            rest = after;
            continue;
        }

        let end = match (after.find(&close), after.find(&open)) {
            (Some(c), Some(o)) => c.min(o),
            (Some(c), None) => c,
            (None, Some(o)) => o,
            (None, None) => after.len(),
        };
        blocks.push(&after[..end]);
        rest = &after[end..];
    }

    blocks
}
