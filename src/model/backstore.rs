//! Backstore agent desired state

use super::{ModelError, Parameters};
use crate::lio::backstore::StorageObjectSetup;
use crate::lio::HbaType;
use std::path::PathBuf;

/// ALUA port group ids are assigned from here upwards
pub const FIRST_ALUA_GROUP_ID: u16 = 16;

/// A fileio `device` string: `fd_dev_name=..[,fd_dev_size=..][,fd_buffered_io=1]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileioDevice {
    pub dev_name: PathBuf,
    /// Size as written by the user, e.g. `100M`
    pub size: Option<String>,
    pub buffered: bool,
}

impl FileioDevice {
    pub fn parse(device: &str) -> Result<Self, ModelError> {
        let mut dev_name = None;
        let mut size = None;
        let mut buffered = false;

        for entry in device.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| ModelError::invalid("device", format!("expected key=value, got {:?}", entry)))?;

            match key {
                "fd_dev_name" => dev_name = Some(PathBuf::from(value)),
                "fd_dev_size" => {
                    if parse_size(value).is_none() {
                        return Err(ModelError::invalid(
                            "device",
                            format!("fd_dev_size {:?} is not a size", value),
                        ));
                    }
                    size = Some(value.to_string());
                }
                "fd_buffered_io" => {
                    if value != "1" {
                        return Err(ModelError::invalid(
                            "device",
                            "fd_buffered_io must be '1' or not set",
                        ));
                    }
                    buffered = true;
                }
                other => {
                    return Err(ModelError::invalid(
                        "device",
                        format!("unknown fileio option {:?}", other),
                    ))
                }
            }
        }

        let dev_name =
            dev_name.ok_or_else(|| ModelError::invalid("device", "fd_dev_name is required"))?;

        Ok(FileioDevice {
            dev_name,
            size,
            buffered,
        })
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_deref().and_then(parse_size)
    }

    /// The kernel `control` string for this device
    pub fn control(&self) -> String {
        let mut control = format!("fd_dev_name={}", self.dev_name.display());
        if let Some(bytes) = self.size_bytes() {
            control.push_str(&format!(",fd_dev_size={}", bytes));
        }
        if self.buffered {
            control.push_str(",fd_buffered_io=1");
        }
        control
    }
}

/// Parse a human readable size (`4096`, `100M`, `2GB`, powers of 1024)
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim().to_ascii_lowercase();
    let s = match s.strip_suffix('b') {
        Some(rest) if rest.ends_with(['k', 'm', 'g', 't']) => rest.to_string(),
        _ => s,
    };

    let (digits, shift) = match s.chars().last()? {
        'k' => (&s[..s.len() - 1], 10),
        'm' => (&s[..s.len() - 1], 20),
        'g' => (&s[..s.len() - 1], 30),
        't' => (&s[..s.len() - 1], 40),
        _ => (s.as_str(), 0),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok()?.checked_mul(1u64 << shift)
}

/// Where a storage object's data lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackingDevice {
    /// iblock: a block device path
    Block(PathBuf),
    /// fileio: a file (or block device) plus options
    File(FileioDevice),
}

impl BackingDevice {
    pub fn parse(hba_type: HbaType, device: &str) -> Result<Self, ModelError> {
        match hba_type {
            HbaType::Iblock => Ok(BackingDevice::Block(PathBuf::from(device))),
            HbaType::Fileio => FileioDevice::parse(device).map(BackingDevice::File),
        }
    }
}

/// Parse the space separated `key=value` list of the `attrib` parameter
pub fn parse_attributes(attrib: &str) -> Result<Vec<(String, String)>, ModelError> {
    attrib
        .split_whitespace()
        .map(|entry| {
            entry
                .split_once('=')
                .filter(|(key, _)| !key.is_empty())
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .ok_or_else(|| ModelError::invalid("attrib", format!("expected key=value, got {:?}", entry)))
        })
        .collect()
}

/// Everything needed to create one storage object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackstoreDescriptor {
    pub hba_type: HbaType,
    pub name: String,
    pub device: BackingDevice,
    pub unit_serial: String,
    /// Backing-store attributes, applied in the order given
    pub attributes: Vec<(String, String)>,
}

impl BackstoreDescriptor {
    pub fn from_params(params: &Parameters) -> Result<Self, ModelError> {
        let hba_type = params
            .require("hba_type")?
            .parse::<HbaType>()
            .map_err(|reason| ModelError::invalid("hba_type", reason))?;

        let name = params.require("name")?.to_string();
        if name.contains('/') {
            return Err(ModelError::invalid("name", "must not contain '/'"));
        }

        let device = BackingDevice::parse(hba_type, params.require("device")?)?;

        let unit_serial = params.require("unit_serial")?;
        let unit_serial = uuid::Uuid::parse_str(unit_serial)
            .map_err(|e| ModelError::invalid("unit_serial", e.to_string()))?
            .hyphenated()
            .to_string();

        let attributes = parse_attributes(params.get("attrib").unwrap_or_default())?;

        Ok(BackstoreDescriptor {
            hba_type,
            name,
            device,
            unit_serial,
            attributes,
        })
    }

    /// Kernel-side setup for the storage object
    pub fn setup(&self) -> StorageObjectSetup {
        let (control, udev_path) = match &self.device {
            BackingDevice::Block(path) => {
                let path = path.display().to_string();
                (format!("udev_path={}", path), path)
            }
            BackingDevice::File(file) => (file.control(), file.dev_name.display().to_string()),
        };

        StorageObjectSetup {
            control,
            udev_path,
            unit_serial: self.unit_serial.clone(),
        }
    }
}

/// This node's ALUA port group in multistate mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AluaPortGroup {
    /// Named after the local host
    pub name: String,
    pub id: u16,
}

impl AluaPortGroup {
    /// The id is the host's position in `alua_hosts`, offset by 16
    pub fn derive(hostname: &str, alua_hosts: &str) -> Result<Self, ModelError> {
        let position = alua_hosts
            .split_whitespace()
            .position(|host| host == hostname)
            .ok_or_else(|| ModelError::HostNotInAluaHosts {
                host: hostname.to_string(),
            })?;

        let id = u16::try_from(position)
            .ok()
            .and_then(|p| p.checked_add(FIRST_ALUA_GROUP_ID))
            .ok_or_else(|| ModelError::invalid("alua_hosts", "too many hosts"))?;

        Ok(AluaPortGroup {
            name: hostname.to_string(),
            id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERIAL: &str = "5b1c0b0e-2b39-4e2a-9a57-5a3c3e6c2f10";

    #[test]
    fn test_fileio_device_parse() {
        let dev = FileioDevice::parse("fd_dev_name=/tmp/x,fd_dev_size=100M").unwrap();
        assert_eq!(
            dev,
            FileioDevice {
                dev_name: PathBuf::from("/tmp/x"),
                size: Some("100M".to_string()),
                buffered: false,
            }
        );
        assert_eq!(dev.control(), "fd_dev_name=/tmp/x,fd_dev_size=104857600");

        let dev = FileioDevice::parse("fd_dev_name=/dev/sdc,fd_buffered_io=1").unwrap();
        assert!(dev.buffered);
        assert_eq!(dev.size, None);
        assert_eq!(dev.control(), "fd_dev_name=/dev/sdc,fd_buffered_io=1");
    }

    #[test]
    fn test_fileio_device_errors() {
        assert!(FileioDevice::parse("fd_dev_name=/tmp/x,fd_buffered_io=2").is_err());
        assert!(FileioDevice::parse("fd_dev_size=1G").is_err());
        assert!(FileioDevice::parse("fd_dev_name=/tmp/x,bogus=1").is_err());
        assert!(FileioDevice::parse("fd_dev_name").is_err());
        assert!(FileioDevice::parse("fd_dev_name=/tmp/x,fd_dev_size=lots").is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096"), Some(4096));
        assert_eq!(parse_size("100M"), Some(100 << 20));
        assert_eq!(parse_size("2gb"), Some(2 << 30));
        assert_eq!(parse_size("1T"), Some(1 << 40));
        assert_eq!(parse_size("M"), None);
        assert_eq!(parse_size("-1"), None);
        assert_eq!(parse_size("99999999999999999999T"), None);
    }

    #[test]
    fn test_parse_attributes() {
        let attrs = parse_attributes("emulate_tpu=1  block_size=4096").unwrap();
        assert_eq!(
            attrs,
            vec![
                ("emulate_tpu".to_string(), "1".to_string()),
                ("block_size".to_string(), "4096".to_string()),
            ]
        );
        assert!(parse_attributes("").unwrap().is_empty());
        assert!(parse_attributes("emulate_tpu").is_err());
        assert!(parse_attributes("=1").is_err());
    }

    #[test]
    fn test_descriptor_from_params() {
        let params = Parameters::new()
            .with("hba_type", "iblock")
            .with("name", "disk0")
            .with("device", "/dev/sdb")
            .with("unit_serial", &SERIAL.to_uppercase())
            .with("attrib", "emulate_tpu=1");

        let desc = BackstoreDescriptor::from_params(&params).unwrap();
        assert_eq!(desc.hba_type, HbaType::Iblock);
        assert_eq!(desc.unit_serial, SERIAL);
        assert_eq!(desc.attributes.len(), 1);

        let setup = desc.setup();
        assert_eq!(setup.control, "udev_path=/dev/sdb");
        assert_eq!(setup.udev_path, "/dev/sdb");
    }

    #[test]
    fn test_descriptor_rejects_bad_params() {
        let base = Parameters::new()
            .with("hba_type", "fileio")
            .with("name", "disk0")
            .with("device", "fd_dev_name=/tmp/x,fd_dev_size=1G")
            .with("unit_serial", SERIAL);
        assert!(BackstoreDescriptor::from_params(&base).is_ok());

        let pscsi = base.clone().with("hba_type", "pscsi");
        assert!(matches!(
            BackstoreDescriptor::from_params(&pscsi),
            Err(ModelError::Invalid { .. })
        ));

        let serial = base.clone().with("unit_serial", "not-a-uuid");
        assert!(BackstoreDescriptor::from_params(&serial).is_err());

        let missing = base.with("device", "");
        assert_eq!(
            BackstoreDescriptor::from_params(&missing),
            Err(ModelError::Missing("device".to_string()))
        );
    }

    #[test]
    fn test_alua_group_id_derivation() {
        let group = AluaPortGroup::derive("nodeB", "nodeA nodeB nodeC").unwrap();
        assert_eq!(group.id, 17);
        assert_eq!(group.name, "nodeB");

        assert_eq!(AluaPortGroup::derive("nodeA", "nodeA nodeB").unwrap().id, 16);
        assert_eq!(
            AluaPortGroup::derive("nodeD", "nodeA nodeB nodeC"),
            Err(ModelError::HostNotInAluaHosts {
                host: "nodeD".to_string()
            })
        );
    }
}
