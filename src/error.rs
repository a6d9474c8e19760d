//! Error taxonomy for the collection pipeline.
//!
//! Failures come in two kinds and both are carried as explicit results,
//! never as implicit unwinding: a [`FatalError`] terminates the collector
//! with the "do not restart" exit code, while a [`DomainError`] is caught
//! at the batch boundary, logged, and costs only that domain's record for
//! the current cycle.

use std::io;

use thiserror::Error;

use crate::hypervisor::descriptor::DescriptorError;
use crate::hypervisor::HypervisorError;
use crate::tool::ToolError;

/// Exit code signaling the supervising harness not to restart the
/// collector (tcollector convention).
pub const EXIT_DONT_RETRY: u8 = 13;

/// Permanent failure: the supervisor must not restart the collector.
#[derive(Error, Debug)]
pub enum FatalError {
    #[error("failed to open hypervisor connection to {uri}: {source}")]
    Connect {
        uri: String,
        #[source]
        source: HypervisorError,
    },

    #[error("required external tool `{tool}` is not available")]
    MissingTool { tool: &'static str },

    #[error("process listing failed: {0}")]
    ProcessListing(#[source] ToolError),

    #[error("process listing contains invalid pid token `{token}`")]
    InvalidPid { token: String },

    #[error("cpu load sampling failed: {0}")]
    LoadSampling(#[source] ToolError),
}

/// Domain-scoped failure: the domain is skipped for this cycle and the
/// rest of the batch continues.
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("no pid found for uuid {uuid}")]
    UnresolvedPid { uuid: String },

    #[error("pid {pid} no longer exists")]
    PidGone { pid: u32 },

    #[error("cannot read cpu time for pid {pid}")]
    CpuTimeUnavailable { pid: u32 },

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Hypervisor(#[from] HypervisorError),
}

/// Top-level outcome of the collection loop.
///
/// Only the `Fatal` variant maps to [`EXIT_DONT_RETRY`]; the others are
/// left to the supervising harness to retry.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Fatal(#[from] FatalError),

    #[error("enumerating domains: {0}")]
    Hypervisor(#[from] HypervisorError),

    #[error("writing metrics: {0}")]
    Io(#[from] io::Error),
}

impl RunError {
    /// True when the supervisor must not restart the collector.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RunError::Fatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_maps_to_dont_retry() {
        let err = RunError::Fatal(FatalError::MissingTool { tool: "top" });
        assert!(err.is_fatal());
        assert_eq!(EXIT_DONT_RETRY, 13);
    }

    #[test]
    fn test_transient_errors_are_not_fatal() {
        let err = RunError::Hypervisor(HypervisorError::List {
            reason: "connection reset".to_string(),
        });
        assert!(!err.is_fatal());

        let err = RunError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = FatalError::InvalidPid {
            token: "12x4".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "process listing contains invalid pid token `12x4`"
        );

        let err = DomainError::UnresolvedPid {
            uuid: "0e3e1639-e8d4-4d0c-9cf1-a14c4a4b2f54".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "no pid found for uuid 0e3e1639-e8d4-4d0c-9cf1-a14c4a4b2f54"
        );
    }
}
