//! Machine driver
//!
//! Provision/wait/destroy against the VM control plane, plus the
//! dependency-image cache that keeps bundled runs from re-installing the
//! world on every machine.

pub mod api;
pub mod images;

pub use api::{ControlPlaneClient, Machine, MachineSize, MachineState, ProvisionRequest};
pub use images::ImageResolver;

use thiserror::Error;

/// Machine driver errors
#[derive(Error, Debug)]
pub enum MachineError {
    #[error("control plane error: {0}")]
    Api(String),

    #[error("machine wait timed out after {0}s")]
    WaitTimeout(u64),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] voiceci_persistence::PersistenceError),
}

impl From<reqwest::Error> for MachineError {
    fn from(err: reqwest::Error) -> Self {
        MachineError::Api(err.to_string())
    }
}

/// Machine size for a run, from its test count: small runs share cores,
/// bigger ones get dedicated performance CPUs.
pub fn size_for_test_count(test_count: usize) -> MachineSize {
    if test_count <= 6 {
        MachineSize {
            cpu_kind: "shared",
            cpus: 1,
            memory_mb: 1024,
        }
    } else if test_count <= 12 {
        MachineSize {
            cpu_kind: "performance",
            cpus: 2,
            memory_mb: 2048,
        }
    } else {
        MachineSize {
            cpu_kind: "performance",
            cpus: 4,
            memory_mb: 4096,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizing_tiers() {
        assert_eq!(size_for_test_count(1).cpu_kind, "shared");
        assert_eq!(size_for_test_count(6).memory_mb, 1024);
        assert_eq!(size_for_test_count(7).cpus, 2);
        assert_eq!(size_for_test_count(12).memory_mb, 2048);
        assert_eq!(size_for_test_count(13).cpus, 4);
        assert_eq!(size_for_test_count(40).memory_mb, 4096);
    }
}
