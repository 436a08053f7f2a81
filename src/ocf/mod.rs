//! OCF resource agent harness
//!
//! Status codes, the action set, and the dispatcher that turns an agent's
//! `anyhow` results into the exit status the cluster manager expects.

pub mod env;
pub mod metadata;

use crate::config::ConfigError;
use crate::model::ModelError;
use crate::system::SetupError;
use std::fmt;
use std::io::Write;

pub use env::OcfEnv;
pub use metadata::{ActionSpec, AgentMetadata, ParameterSpec};

/// OCF return codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcfStatus {
    Success,
    GenericError,
    ArgsError,
    Unimplemented,
    NotInstalled,
    ConfiguredError,
    NotRunning,
    RunningMaster,
    FailedMaster,
}

impl OcfStatus {
    /// Process exit code
    pub fn code(self) -> i32 {
        match self {
            OcfStatus::Success => 0,
            OcfStatus::GenericError => 1,
            OcfStatus::ArgsError => 2,
            OcfStatus::Unimplemented => 3,
            OcfStatus::NotInstalled => 5,
            OcfStatus::ConfiguredError => 6,
            OcfStatus::NotRunning => 7,
            OcfStatus::RunningMaster => 8,
            OcfStatus::FailedMaster => 9,
        }
    }
}

impl fmt::Display for OcfStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OcfStatus::Success => "OCF_SUCCESS",
            OcfStatus::GenericError => "OCF_ERR_GENERIC",
            OcfStatus::ArgsError => "OCF_ERR_ARGS",
            OcfStatus::Unimplemented => "OCF_ERR_UNIMPLEMENTED",
            OcfStatus::NotInstalled => "OCF_ERR_INSTALLED",
            OcfStatus::ConfiguredError => "OCF_ERR_CONFIGURED",
            OcfStatus::NotRunning => "OCF_NOT_RUNNING",
            OcfStatus::RunningMaster => "OCF_RUNNING_MASTER",
            OcfStatus::FailedMaster => "OCF_FAILED_MASTER",
        };
        f.write_str(name)
    }
}

/// Actions an agent can be invoked with
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Action {
    Start,
    Stop,
    Monitor,
    Promote,
    Demote,
    Notify,
    ValidateAll,
    MetaData,
    Usage,
}

/// One resource agent
///
/// Every action returns a status or an error; errors are classified by
/// `status_for_error`.
pub trait ResourceAgent {
    fn metadata(&self) -> &AgentMetadata;

    fn start(&self) -> anyhow::Result<OcfStatus>;

    fn stop(&self) -> anyhow::Result<OcfStatus>;

    fn monitor(&self) -> anyhow::Result<OcfStatus>;

    fn validate_all(&self) -> anyhow::Result<OcfStatus>;

    fn promote(&self) -> anyhow::Result<OcfStatus> {
        Ok(OcfStatus::Unimplemented)
    }

    fn demote(&self) -> anyhow::Result<OcfStatus> {
        Ok(OcfStatus::Unimplemented)
    }

    fn notify(&self) -> anyhow::Result<OcfStatus> {
        Ok(OcfStatus::Success)
    }
}

/// Map an action failure to a status: parameter and settings problems are
/// configuration errors, bootstrap problems mean the stack is not installed,
/// anything else is generic.
pub fn status_for_error(err: &anyhow::Error) -> OcfStatus {
    if err.downcast_ref::<ModelError>().is_some() || err.downcast_ref::<ConfigError>().is_some() {
        OcfStatus::ConfiguredError
    } else if err.downcast_ref::<SetupError>().is_some() {
        OcfStatus::NotInstalled
    } else {
        OcfStatus::GenericError
    }
}

/// Run one action and return its status
pub fn dispatch(agent: &dyn ResourceAgent, action: Action, out: &mut dyn Write) -> OcfStatus {
    let result = match action {
        Action::Start => agent.start(),
        Action::Stop => agent.stop(),
        Action::Monitor => agent.monitor(),
        Action::Promote => agent.promote(),
        Action::Demote => agent.demote(),
        Action::Notify => agent.notify(),
        Action::ValidateAll => agent.validate_all(),
        Action::MetaData => print(out, &agent.metadata().to_xml()),
        Action::Usage => print(out, &agent.metadata().usage()),
    };

    match result {
        Ok(status) => {
            log::debug!("{:?} finished: {}", action, status);
            status
        }
        Err(e) => {
            let status = status_for_error(&e);
            log::error!("{:?} failed ({}): {:#}", action, status, e);
            status
        }
    }
}

fn print(out: &mut dyn Write, text: &str) -> anyhow::Result<OcfStatus> {
    out.write_all(text.as_bytes())?;
    out.flush()?;
    Ok(OcfStatus::Success)
}
