//! Master score handoff to the cluster manager

use super::{CommandRunner, SystemRunner};

pub const CRM_MASTER: &str = "crm_master";

/// Master eligibility of this node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterScore {
    /// Not eligible for promotion at all
    Withdraw,
    Preference(u32),
}

/// Somewhere to send master scores
pub trait ScoreSink: Send + Sync {
    /// Fire and forget; failures are logged by the implementation
    fn push(&self, score: MasterScore);
}

/// Pushes scores with `crm_master`, scoped to the node's lifetime
pub struct CrmMaster<R = SystemRunner> {
    command: String,
    runner: R,
}

impl CrmMaster<SystemRunner> {
    pub fn new(command: &str) -> Self {
        CrmMaster::with_runner(command, SystemRunner)
    }
}

impl<R: CommandRunner> CrmMaster<R> {
    pub fn with_runner(command: &str, runner: R) -> Self {
        CrmMaster {
            command: command.to_string(),
            runner,
        }
    }

    fn args(score: MasterScore) -> Vec<String> {
        let mut args = vec!["-Q".to_string(), "-l".to_string(), "reboot".to_string()];
        match score {
            MasterScore::Withdraw => args.push("-D".to_string()),
            MasterScore::Preference(value) => {
                args.push("-v".to_string());
                args.push(value.to_string());
            }
        }
        args
    }
}

impl<R: CommandRunner> ScoreSink for CrmMaster<R> {
    fn push(&self, score: MasterScore) {
        let args = Self::args(score);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        log::debug!("Setting master score: {:?}", score);
        if let Err(e) = self.runner.run(&self.command, &args) {
            log::warn!("Failed to update master score ({:?}): {}", score, e);
        }
    }
}
