//! The agent's invocation environment

use super::metadata::ParameterSpec;
use super::Action;
use crate::model::{ModelError, Parameters};
use std::collections::BTreeMap;
use std::path::PathBuf;

const RESKEY_PREFIX: &str = "OCF_RESKEY_";
const META_PREFIX: &str = "CRM_meta_";

/// Default lock directory when `HA_RSCTMP` is unset
pub const DEFAULT_RSCTMP: &str = "/run/resource-agents";

/// Parameters, cluster meta attributes and agent-level variables
#[derive(Debug, Clone, Default)]
pub struct OcfEnv {
    reskeys: BTreeMap<String, String>,
    meta: BTreeMap<String, String>,
    pub rsctmp: PathBuf,
    pub resource_type: String,
    pub resource_instance: Option<String>,
    /// `HA_debug=1`
    pub debug: bool,
}

impl OcfEnv {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut env = OcfEnv {
            rsctmp: PathBuf::from(DEFAULT_RSCTMP),
            ..Default::default()
        };

        for (key, value) in vars {
            if let Some(name) = key.strip_prefix(RESKEY_PREFIX) {
                match name.strip_prefix(META_PREFIX) {
                    Some(meta) => env.meta.insert(meta.to_string(), value),
                    None => env.reskeys.insert(name.to_string(), value),
                };
                continue;
            }

            match key.as_str() {
                "HA_RSCTMP" if !value.is_empty() => env.rsctmp = PathBuf::from(value),
                "OCF_RESOURCE_TYPE" => env.resource_type = value,
                "OCF_RESOURCE_INSTANCE" => env.resource_instance = Some(value),
                "HA_debug" => env.debug = value == "1",
                _ => {}
            }
        }

        env
    }

    /// Declared parameters with defaults applied and required ones enforced.
    /// Undeclared variables are ignored.
    pub fn parameters(&self, specs: &[ParameterSpec]) -> Result<Parameters, ModelError> {
        let mut params = Parameters::new();

        for spec in specs {
            let value = self
                .reskeys
                .get(spec.name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty());

            match (value, spec.default) {
                (Some(value), _) => params.insert(spec.name, value),
                (None, Some(default)) => params.insert(spec.name, default),
                (None, None) if spec.required => {
                    return Err(ModelError::Missing(spec.name.to_string()))
                }
                (None, None) => {}
            }
        }

        Ok(params)
    }

    /// A cluster meta attribute, e.g. `clone_max`
    pub fn meta(&self, name: &str) -> Option<&str> {
        self.meta.get(name).map(String::as_str)
    }

    pub fn meta_u32(&self, name: &str) -> Option<u32> {
        self.meta(name).and_then(|v| v.trim().parse().ok())
    }

    /// Running as a clone (multistate resources are clones too)
    pub fn is_clone(&self) -> bool {
        self.meta("clone_max").is_some()
    }

    /// Running as a promotable (master/slave) clone
    pub fn is_ms(&self) -> bool {
        self.meta("master_max").is_some()
            || self.meta("promoted_max").is_some()
            || self
                .meta("promotable")
                .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "yes" | "1"))
    }

    /// A one-shot monitor run by the cluster manager to discover state
    pub fn is_probe(&self, action: Action) -> bool {
        action == Action::Monitor && self.meta("interval").is_some_and(|v| v.trim() == "0")
    }
}
