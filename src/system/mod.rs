//! Host integration: external commands, host facts, bootstrap, locking and
//! the cluster manager's master score.

pub mod crm;
pub mod host;
pub mod lock;
pub mod setup;

use std::fmt;
use std::process::{Command, ExitStatus, Output};

pub use crm::{CrmMaster, MasterScore, ScoreSink};
pub use host::{DeviceKind, Host, LinuxHost};
pub use lock::AgentLock;
pub use setup::{Bootstrap, SetupError};

pub const MODPROBE: &str = "modprobe";
pub const MOUNT: &str = "mount";

#[derive(Debug)]
pub struct CommandFailureInfo {
    command: String,
    status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandFailureInfo {
    pub fn new(command: String, status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> Self {
        CommandFailureInfo {
            command,
            status,
            stdout: String::from_utf8_lossy(stdout).to_string(),
            stderr: String::from_utf8_lossy(stderr).to_string(),
        }
    }
}

impl fmt::Display for CommandFailureInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Command [{}] executed and failed with status: {}",
            self.command, self.status
        )?;
        write!(f, "  stdout: {}", self.stdout.trim_end())?;
        write!(f, "  stderr: {}", self.stderr.trim_end())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to start execution of [{command}]: {err}")]
    ExecutionStart {
        command: String,
        err: std::io::Error,
    },

    #[error("{0}")]
    CommandFailure(Box<CommandFailureInfo>),
}

impl ExecutionError {
    /// Exit code of a command that ran and failed
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutionError::CommandFailure(info) => info.status.code(),
            ExecutionError::ExecutionStart { .. } => None,
        }
    }
}

fn command_to_string(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|s| s.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run a command to completion, failing on a non-zero exit
pub fn execute(command: &mut Command) -> Result<Output, ExecutionError> {
    let command_str = command_to_string(command);
    log::debug!("Running [{}]", command_str);

    let output = command
        .output()
        .map_err(|err| ExecutionError::ExecutionStart {
            command: command_str.clone(),
            err,
        })?;

    if !output.status.success() {
        return Err(ExecutionError::CommandFailure(Box::new(
            CommandFailureInfo::new(command_str, output.status, &output.stdout, &output.stderr),
        )));
    }

    Ok(output)
}

/// Runs external programs on behalf of the agents
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> Result<(), ExecutionError>;
}

/// Runs programs for real
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<(), ExecutionError> {
        execute(Command::new(program).args(args)).map(|_| ())
    }
}
