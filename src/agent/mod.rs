//! The two resource agents and what they share

pub mod alua;
pub mod backstore;
pub mod iscsi;

use crate::config::Config;
use crate::configfs::{ConfigFs, ConfigTree};
use crate::system::{CommandRunner, CrmMaster, Host, LinuxHost, ScoreSink, SystemRunner};
use alua::{Pacer, ThreadPacer};

pub use backstore::BackstoreAgent;
pub use iscsi::IscsiAgent;

/// Everything an agent touches outside its own process
pub struct Services {
    pub tree: Box<dyn ConfigTree>,
    pub host: Box<dyn Host>,
    pub runner: Box<dyn CommandRunner>,
    pub scores: Box<dyn ScoreSink>,
    pub pacer: Box<dyn Pacer>,
}

impl Services {
    /// The real system, as described by `config`
    pub fn system(config: &Config) -> Self {
        Services {
            tree: Box::new(ConfigFs::new(&config.configfs.root)),
            host: Box::new(LinuxHost::default()),
            runner: Box::new(SystemRunner),
            scores: Box::new(CrmMaster::new(&config.cluster.crm_master)),
            pacer: Box::new(ThreadPacer),
        }
    }
}
