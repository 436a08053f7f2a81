//! Test doubles for the host, the cluster manager and the clock

use crate::agent::alua::Pacer;
use crate::system::{
    CommandFailureInfo, CommandRunner, DeviceKind, ExecutionError, Host, MasterScore, ScoreSink,
};
use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A node with a fixed name, addresses and devices
#[derive(Debug, Clone)]
pub struct FakeHost {
    hostname: String,
    addresses: Vec<IpAddr>,
    devices: HashMap<PathBuf, DeviceKind>,
}

impl FakeHost {
    pub fn new(hostname: &str) -> Self {
        FakeHost {
            hostname: hostname.to_string(),
            addresses: Vec::new(),
            devices: HashMap::new(),
        }
    }

    pub fn with_addresses(mut self, addresses: &[&str]) -> Self {
        self.addresses = addresses
            .iter()
            .map(|a| a.parse().expect("valid test address"))
            .collect();
        self
    }

    pub fn with_device(mut self, path: &str, kind: DeviceKind) -> Self {
        self.devices.insert(PathBuf::from(path), kind);
        self
    }
}

impl Host for FakeHost {
    fn hostname(&self) -> io::Result<String> {
        Ok(self.hostname.clone())
    }

    fn local_addresses(&self) -> io::Result<Vec<IpAddr>> {
        Ok(self.addresses.clone())
    }

    fn device_kind(&self, path: &Path) -> DeviceKind {
        self.devices
            .get(path)
            .copied()
            .unwrap_or(DeviceKind::Missing)
    }
}

/// Keeps every pushed master score
#[derive(Debug, Clone, Default)]
pub struct RecordingScores {
    scores: Arc<Mutex<Vec<MasterScore>>>,
}

impl RecordingScores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scores(&self) -> Vec<MasterScore> {
        self.scores.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<MasterScore> {
        self.scores.lock().unwrap().last().copied()
    }
}

impl ScoreSink for RecordingScores {
    fn push(&self, score: MasterScore) {
        self.scores.lock().unwrap().push(score);
    }
}

/// Records requested sleeps instead of sleeping
#[derive(Debug, Clone, Default)]
pub struct RecordingPacer {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingPacer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Pacer for RecordingPacer {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Records command lines; programs succeed unless told otherwise
#[derive(Debug, Clone, Default)]
pub struct RecordingRunner {
    calls: Arc<Mutex<Vec<String>>>,
    failures: Arc<Mutex<HashMap<String, i32>>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every run of `program` exit with `code`
    pub fn fail_with(self, program: &str, code: i32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(program.to_string(), code);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<(), ExecutionError> {
        let command = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().unwrap().push(command.clone());

        match self.failures.lock().unwrap().get(program) {
            Some(code) => Err(ExecutionError::CommandFailure(Box::new(
                CommandFailureInfo::new(command, ExitStatus::from_raw(code << 8), b"", b""),
            ))),
            None => Ok(()),
        }
    }
}
