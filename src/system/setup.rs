//! Bootstrap of the kernel target subsystem
//!
//! Both agents make sure their part of the control tree is reachable before
//! doing anything else: the backstore agent mounts configfs, the iSCSI agent
//! loads the iSCSI fabric module.

use super::{CommandRunner, ExecutionError, MODPROBE, MOUNT};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// ALUA and persistent reservation state is kept below here
pub const TARGET_STATE_DIR: &str = "/var/target";

pub const PROC_MODULES: &str = "/proc/modules";

pub const CONFIGFS_MODULE: &str = "configfs";
pub const ISCSI_TARGET_MODULE: &str = "iscsi_target_mod";

/// mount(8) exit status when the filesystem is already mounted
pub const MOUNT_ALREADY_MOUNTED: i32 = 32;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to create {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to load kernel module {module}: {source}")]
    Modprobe {
        module: String,
        #[source]
        source: ExecutionError,
    },

    #[error("failed to mount configfs on {path}: {source}")]
    Mount {
        path: PathBuf,
        #[source]
        source: ExecutionError,
    },

    #[error("{0} does not exist; is the target core loaded?")]
    TargetCoreMissing(PathBuf),
}

/// Locations touched while bootstrapping
#[derive(Debug, Clone)]
pub struct Bootstrap {
    pub state_dir: PathBuf,
    pub configfs_root: PathBuf,
    pub proc_modules: PathBuf,
}

impl Bootstrap {
    pub fn new<P: AsRef<Path>>(configfs_root: P) -> Self {
        Bootstrap {
            state_dir: PathBuf::from(TARGET_STATE_DIR),
            configfs_root: configfs_root.as_ref().to_path_buf(),
            proc_modules: PathBuf::from(PROC_MODULES),
        }
    }

    /// Backstore agent setup: state directories, configfs loaded and mounted
    pub fn backstore(&self, runner: &dyn CommandRunner) -> Result<(), SetupError> {
        for sub in ["alua", "pr"] {
            let path = self.state_dir.join(sub);
            if !path.is_dir() {
                log::info!("Creating {}", path.display());
                std::fs::create_dir_all(&path)
                    .map_err(|source| SetupError::CreateDir { path, source })?;
            }
        }

        if !self.configfs_root.is_dir() {
            runner
                .run(MODPROBE, &[CONFIGFS_MODULE])
                .map_err(|source| SetupError::Modprobe {
                    module: CONFIGFS_MODULE.to_string(),
                    source,
                })?;
        }

        let root = self.configfs_root.to_string_lossy();
        match runner.run(MOUNT, &["-t", "configfs", "configfs", &root]) {
            Ok(()) => Ok(()),
            Err(e) if e.exit_code() == Some(MOUNT_ALREADY_MOUNTED) => Ok(()),
            Err(source) => Err(SetupError::Mount {
                path: self.configfs_root.clone(),
                source,
            }),
        }
    }

    /// iSCSI agent setup: target core present, iSCSI fabric module loaded
    pub fn iscsi(&self, runner: &dyn CommandRunner) -> Result<(), SetupError> {
        let target = self.configfs_root.join("target");
        if !target.is_dir() {
            return Err(SetupError::TargetCoreMissing(target));
        }

        let iscsi = target.join("iscsi");
        if iscsi.is_dir() {
            return Ok(());
        }

        if !self.module_loaded(ISCSI_TARGET_MODULE)? {
            log::info!("Loading {}", ISCSI_TARGET_MODULE);
            runner
                .run(MODPROBE, &[ISCSI_TARGET_MODULE])
                .map_err(|source| SetupError::Modprobe {
                    module: ISCSI_TARGET_MODULE.to_string(),
                    source,
                })?;
        }

        // Loading the module may already have registered the fabric
        if !iscsi.is_dir() {
            std::fs::create_dir(&iscsi).map_err(|source| SetupError::CreateDir {
                path: iscsi.clone(),
                source,
            })?;
        }

        Ok(())
    }

    fn module_loaded(&self, module: &str) -> Result<bool, SetupError> {
        let modules =
            std::fs::read_to_string(&self.proc_modules).map_err(|source| SetupError::Read {
                path: self.proc_modules.clone(),
                source,
            })?;

        Ok(modules
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .any(|name| name == module))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingRunner;
    use tempfile::TempDir;

    fn bootstrap(dir: &TempDir) -> Bootstrap {
        Bootstrap {
            state_dir: dir.path().join("var/target"),
            configfs_root: dir.path().join("config"),
            proc_modules: dir.path().join("modules"),
        }
    }

    #[test]
    fn test_backstore_setup_mounts_configfs() {
        let dir = TempDir::new().unwrap();
        let bootstrap = bootstrap(&dir);
        std::fs::create_dir(&bootstrap.configfs_root).unwrap();

        let runner = RecordingRunner::new();
        bootstrap.backstore(&runner).unwrap();

        assert!(bootstrap.state_dir.join("alua").is_dir());
        assert!(bootstrap.state_dir.join("pr").is_dir());

        let root = bootstrap.configfs_root.display();
        assert_eq!(
            runner.calls(),
            vec![format!("mount -t configfs configfs {}", root)]
        );
    }

    #[test]
    fn test_backstore_setup_loads_configfs_and_tolerates_mounted() {
        let dir = TempDir::new().unwrap();
        let bootstrap = bootstrap(&dir);

        let runner = RecordingRunner::new().fail_with("mount", MOUNT_ALREADY_MOUNTED);
        bootstrap.backstore(&runner).unwrap();
        assert_eq!(runner.calls()[0], "modprobe configfs");
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn test_backstore_setup_mount_failure() {
        let dir = TempDir::new().unwrap();
        let bootstrap = bootstrap(&dir);
        std::fs::create_dir(&bootstrap.configfs_root).unwrap();

        let runner = RecordingRunner::new().fail_with("mount", 1);
        assert!(matches!(
            bootstrap.backstore(&runner),
            Err(SetupError::Mount { .. })
        ));
    }

    #[test]
    fn test_iscsi_setup_requires_target_core() {
        let dir = TempDir::new().unwrap();
        let bootstrap = bootstrap(&dir);
        std::fs::create_dir(&bootstrap.configfs_root).unwrap();

        assert!(matches!(
            bootstrap.iscsi(&RecordingRunner::new()),
            Err(SetupError::TargetCoreMissing(_))
        ));
    }

    #[test]
    fn test_iscsi_setup_loads_module_once() {
        let dir = TempDir::new().unwrap();
        let bootstrap = bootstrap(&dir);
        std::fs::create_dir_all(bootstrap.configfs_root.join("target")).unwrap();
        std::fs::write(&bootstrap.proc_modules, "target_core_mod 368640 1 - Live 0x0\n").unwrap();

        let runner = RecordingRunner::new();
        bootstrap.iscsi(&runner).unwrap();
        assert_eq!(runner.calls(), vec!["modprobe iscsi_target_mod"]);
        assert!(bootstrap.configfs_root.join("target/iscsi").is_dir());

        // Present now, nothing else to do
        bootstrap.iscsi(&runner).unwrap();
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn test_iscsi_setup_skips_loaded_module() {
        let dir = TempDir::new().unwrap();
        let bootstrap = bootstrap(&dir);
        std::fs::create_dir_all(bootstrap.configfs_root.join("target")).unwrap();
        std::fs::write(
            &bootstrap.proc_modules,
            "iscsi_target_mod 311296 0 - Live 0x0\ntarget_core_mod 368640 1 iscsi_target_mod, Live 0x0\n",
        )
        .unwrap();

        let runner = RecordingRunner::new();
        bootstrap.iscsi(&runner).unwrap();
        assert!(runner.calls().is_empty());
    }
}
