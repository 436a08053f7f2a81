//! Facts about the local node

use std::ffi::CStr;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

/// SCSI peripheral device type of a direct-access block device
pub const TYPE_DISK: u8 = 0;

/// What a device path refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Missing,
    /// Exists but is not a block device
    NotBlock,
    /// A block device of SCSI type 0, or one without a SCSI type
    Disk,
    /// A block device of another SCSI type (tape, cdrom, ...)
    Scsi(u8),
}

/// Local node facts the agents depend on
pub trait Host: Send + Sync {
    /// The node name
    fn hostname(&self) -> io::Result<String>;

    /// Addresses configured on local interfaces
    fn local_addresses(&self) -> io::Result<Vec<IpAddr>>;

    fn device_kind(&self, path: &Path) -> DeviceKind;
}

/// The running Linux system
#[derive(Debug, Clone)]
pub struct LinuxHost {
    sysfs: PathBuf,
}

impl Default for LinuxHost {
    fn default() -> Self {
        LinuxHost::new("/sys")
    }
}

impl LinuxHost {
    pub fn new<P: AsRef<Path>>(sysfs: P) -> Self {
        LinuxHost {
            sysfs: sysfs.as_ref().to_path_buf(),
        }
    }

    fn scsi_type(&self, rdev: u64) -> Option<u8> {
        let (major, minor) = split_dev(rdev);
        let path = self
            .sysfs
            .join(format!("dev/block/{}:{}/device/type", major, minor));
        let raw = std::fs::read_to_string(path).ok()?;
        raw.trim().parse().ok()
    }
}

/// Split a device number into major and minor (glibc encoding)
fn split_dev(dev: u64) -> (u64, u64) {
    let major = ((dev >> 32) & 0xffff_f000) | ((dev >> 8) & 0x0000_0fff);
    let minor = ((dev >> 12) & 0xffff_ff00) | (dev & 0x0000_00ff);
    (major, minor)
}

impl Host for LinuxHost {
    fn hostname(&self) -> io::Result<String> {
        let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
        if unsafe { libc::uname(&mut uts) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let nodename = unsafe { CStr::from_ptr(uts.nodename.as_ptr()) };
        Ok(nodename.to_string_lossy().into_owned())
    }

    fn local_addresses(&self) -> io::Result<Vec<IpAddr>> {
        let mut ifap: *mut libc::ifaddrs = std::ptr::null_mut();
        if unsafe { libc::getifaddrs(&mut ifap) } != 0 {
            return Err(io::Error::last_os_error());
        }

        let mut addresses = Vec::new();
        let mut cursor = ifap;
        while !cursor.is_null() {
            let ifa = unsafe { &*cursor };
            cursor = ifa.ifa_next;

            if ifa.ifa_addr.is_null() {
                continue;
            }

            match i32::from(unsafe { (*ifa.ifa_addr).sa_family }) {
                libc::AF_INET => {
                    let sin = unsafe { &*(ifa.ifa_addr as *const libc::sockaddr_in) };
                    addresses.push(IpAddr::V4(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr))));
                }
                libc::AF_INET6 => {
                    let sin6 = unsafe { &*(ifa.ifa_addr as *const libc::sockaddr_in6) };
                    addresses.push(IpAddr::V6(Ipv6Addr::from(sin6.sin6_addr.s6_addr)));
                }
                _ => {}
            }
        }

        unsafe { libc::freeifaddrs(ifap) };

        addresses.sort();
        addresses.dedup();
        Ok(addresses)
    }

    fn device_kind(&self, path: &Path) -> DeviceKind {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(_) => return DeviceKind::Missing,
        };

        if !metadata.file_type().is_block_device() {
            return DeviceKind::NotBlock;
        }

        match self.scsi_type(metadata.rdev()) {
            None | Some(TYPE_DISK) => DeviceKind::Disk,
            Some(other) => DeviceKind::Scsi(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_split_dev() {
        // 8:16 is /dev/sdb
        assert_eq!(split_dev(0x0810), (8, 16));
        // 259:3 (nvme partition) with the extended minor encoding
        assert_eq!(split_dev((259 << 8) | 3), (259, 3));
        assert_eq!(split_dev((1 << 20) | (1 << 8) | 0x12), (1, 0x100 | 0x12));
    }

    #[test]
    fn test_device_kind_of_plain_paths() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("disk.img");
        std::fs::write(&file, b"").unwrap();

        let host = LinuxHost::new(dir.path());
        assert_eq!(host.device_kind(&file), DeviceKind::NotBlock);
        assert_eq!(host.device_kind(&dir.path().join("absent")), DeviceKind::Missing);
    }

    #[test]
    fn test_hostname_and_addresses() {
        let host = LinuxHost::default();
        assert!(!host.hostname().unwrap().is_empty());
        assert!(host.local_addresses().is_ok());
    }
}
