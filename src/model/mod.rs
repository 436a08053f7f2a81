//! Desired-state model
//!
//! Agent parameters parsed and validated into the topology the reconcilers
//! converge the kernel towards. Nothing in here touches the control tree.

pub mod backstore;
pub mod portal;
pub mod target;

use std::collections::BTreeMap;
use thiserror::Error;

pub use backstore::{AluaPortGroup, BackingDevice, BackstoreDescriptor, FileioDevice};
pub use portal::{expand_portals, PortalSpec, DEFAULT_PORT};
pub use target::{BackstoreRef, TargetTopology};

/// Parameter validation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("missing required parameter: {0}")]
    Missing(String),

    #[error("invalid {param}: {reason}")]
    Invalid { param: String, reason: String },

    #[error("alua_hosts does not include {host}")]
    HostNotInAluaHosts { host: String },
}

impl ModelError {
    pub fn invalid(param: &str, reason: impl Into<String>) -> Self {
        ModelError::Invalid {
            param: param.to_string(),
            reason: reason.into(),
        }
    }
}

/// Agent parameters by name, as handed over by the cluster manager
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters(BTreeMap<String, String>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.0.insert(name.to_string(), value.to_string());
    }

    /// A parameter's value; blank values count as unset
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn require(&self, name: &str) -> Result<&str, ModelError> {
        self.get(name)
            .ok_or_else(|| ModelError::Missing(name.to_string()))
    }
}

impl FromIterator<(String, String)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Parameters(iter.into_iter().collect())
    }
}
