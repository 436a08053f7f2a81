//! Per-resource-type lock serialising HBA index allocation

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Exclusive lock held for as long as the guard lives
#[derive(Debug)]
pub struct AgentLock {
    file: File,
    path: PathBuf,
}

impl AgentLock {
    /// `<rsctmp>/<resource type>.lock`
    pub fn path_for(rsctmp: &Path, resource_type: &str) -> PathBuf {
        rsctmp.join(format!("{}.lock", resource_type))
    }

    /// Block until the lock at `path` is ours
    pub fn acquire(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        loop {
            // SAFETY: `file` owns the descriptor and outlives the call
            if unsafe { libc::lockf(file.as_raw_fd(), libc::F_LOCK, 0) } == 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }

        log::debug!("Acquired {}", path.display());
        Ok(AgentLock {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for AgentLock {
    fn drop(&mut self) {
        // SAFETY: the descriptor is still open; `self.file` closes it after this
        unsafe { libc::lockf(self.file.as_raw_fd(), libc::F_ULOCK, 0) };
        log::debug!("Released {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_path() {
        let path = AgentLock::path_for(Path::new("/run/resource-agents"), "lio-backstore");
        assert_eq!(path, Path::new("/run/resource-agents/lio-backstore.lock"));
    }

    #[test]
    fn test_acquire_creates_directory_and_relocks() {
        let dir = TempDir::new().unwrap();
        let path = AgentLock::path_for(&dir.path().join("rsctmp"), "lio-backstore");

        {
            let lock = AgentLock::acquire(&path).unwrap();
            assert_eq!(lock.path(), path);
            assert!(path.exists());
        }

        // Released on drop, so a second acquisition does not block
        let _again = AgentLock::acquire(&path).unwrap();
    }

    #[test]
    fn test_acquire_fails_on_directory() {
        let dir = TempDir::new().unwrap();
        let err = AgentLock::acquire(dir.path()).unwrap_err();
        assert_ne!(err.kind(), io::ErrorKind::Interrupted);
        assert!(dir.path().is_dir());
    }
}
