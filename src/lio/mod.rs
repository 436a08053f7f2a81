//! Linux-IO target objects
//!
//! Typed, non-owning views over the LIO parts of the control tree. Every
//! lookup walks the tree again; nothing here outlives a single call.

pub mod backstore;
pub mod iscsi;

use crate::configfs::NodePath;
use std::fmt;
use std::str::FromStr;

pub use backstore::{AluaGroup, Backstore, StorageObject};
pub use iscsi::Tpg;

/// Backstore (HBA) container
pub const CORE_DIR: &str = "target/core";

/// iSCSI fabric container
pub const ISCSI_DIR: &str = "target/iscsi";

/// Name of the ALUA port group every storage object starts with
pub const DEFAULT_TG_PT_GP: &str = "default_tg_pt_gp";

/// Backing store types these agents can manage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HbaType {
    Iblock,
    Fileio,
}

impl HbaType {
    pub const ALL: [HbaType; 2] = [HbaType::Iblock, HbaType::Fileio];

    /// Kernel plugin name, also the HBA directory prefix
    pub fn plugin(self) -> &'static str {
        match self {
            HbaType::Iblock => "iblock",
            HbaType::Fileio => "fileio",
        }
    }
}

impl fmt::Display for HbaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plugin())
    }
}

impl FromStr for HbaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HbaType::ALL
            .into_iter()
            .find(|t| t.plugin() == s)
            .ok_or_else(|| format!("unknown hba_type: {}", s))
    }
}

/// ALUA target port group access state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessState {
    ActiveOptimized,
    Standby,
    /// Any state these agents never set (non-optimized, unavailable, ...)
    Other(u8),
}

impl AccessState {
    pub fn code(self) -> u8 {
        match self {
            AccessState::ActiveOptimized => 0,
            AccessState::Standby => 2,
            AccessState::Other(code) => code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => AccessState::ActiveOptimized,
            2 => AccessState::Standby,
            other => AccessState::Other(other),
        }
    }

    /// The `preferred` flag that goes with this state
    pub fn preferred(self) -> bool {
        self == AccessState::ActiveOptimized
    }
}

pub(crate) fn core_path() -> NodePath {
    NodePath::parse(CORE_DIR)
}

pub(crate) fn iscsi_path() -> NodePath {
    NodePath::parse(ISCSI_DIR)
}
