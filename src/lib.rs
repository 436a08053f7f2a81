//! Pacemaker resource agents for the Linux-IO (LIO) SCSI target
//!
//! Two agents share this crate. `lio-backstore` manages a single storage
//! object (iblock or fileio) and, as a promotable clone, the ALUA state of
//! the local path to it. `lio-iscsi` exports existing storage objects
//! through an iSCSI target portal group and watches it for drift.
//!
//! Both talk to the kernel through the configfs control tree, abstracted as
//! [`configfs::ConfigTree`] so the reconcilers can run against an in-memory
//! tree in tests.

pub mod agent;
pub mod config;
pub mod configfs;
pub mod lio;
pub mod model;
pub mod ocf;
pub mod system;

#[cfg(test)]
pub mod fakes;

pub use config::Config;
pub use ocf::{Action, OcfStatus};
