//! Backstore resource agent
//!
//! Manages one storage object and the backstore (HBA) holding it. When run
//! as a promotable clone it also owns this node's ALUA port group on the
//! object and reports master eligibility to the cluster manager.

use super::alua::{self, Direction};
use super::Services;
use crate::config::Config;
use crate::configfs::ConfigTree;
use crate::lio::backstore::next_free_hba_index;
use crate::lio::{AccessState, Backstore, StorageObject, DEFAULT_TG_PT_GP};
use crate::model::{AluaPortGroup, BackingDevice, BackstoreDescriptor, ModelError, Parameters};
use crate::ocf::metadata::{META_DATA_ACTION, VALIDATE_ALL_ACTION};
use crate::ocf::{ActionSpec, AgentMetadata, OcfEnv, OcfStatus, ParameterSpec, ResourceAgent};
use crate::system::{AgentLock, Bootstrap, DeviceKind, MasterScore};
use anyhow::{anyhow, Context};

pub const AGENT_NAME: &str = "lio-backstore";

/// `alua_access_type` values
const ALUA_DISABLED: u8 = 0;
const ALUA_EXPLICIT: u8 = 1;

pub const PARAMETERS: &[ParameterSpec] = &[
    ParameterSpec {
        name: "hba_type",
        required: true,
        unique: false,
        default: None,
        shortdesc: "Backing store type",
        longdesc: "The backing store HBA type: 'iblock' or 'fileio'.",
    },
    ParameterSpec {
        name: "name",
        required: true,
        unique: false,
        default: None,
        shortdesc: "LUN name",
        longdesc: "The name of the storage object. Used when exporting the LUN \
                   via a transport, and may be exposed to the initiator.",
    },
    ParameterSpec {
        name: "device",
        required: true,
        unique: true,
        default: None,
        shortdesc: "Backing device or file",
        longdesc: "For iblock, a TYPE_DISK block device. For fileio, comma \
                   separated options: fd_dev_name=<path> (required), \
                   fd_dev_size=<size> (required unless the path is a block \
                   device) and fd_buffered_io=1.",
    },
    ParameterSpec {
        name: "unit_serial",
        required: true,
        unique: true,
        default: None,
        shortdesc: "Unit serial number",
        longdesc: "The T10 unit serial number of the LUN, a UUID. Exposed to \
                   the initiator and used to generate the NAA WWN.",
    },
    ParameterSpec {
        name: "attrib",
        required: false,
        unique: false,
        default: None,
        shortdesc: "Backing store attributes",
        longdesc: "Backing store attributes to set, in key=value form, \
                   separated by spaces. Unlisted attributes keep the kernel \
                   defaults.",
    },
    ParameterSpec {
        name: "alua_hosts",
        required: false,
        unique: false,
        default: None,
        shortdesc: "Hosts this resource may run on",
        longdesc: "Required in multistate mode, ignored otherwise. Space \
                   separated host names; the position of the local host \
                   determines its ALUA port group id.",
    },
];

pub const ACTIONS: &[ActionSpec] = &[
    ActionSpec::new("start", 40),
    ActionSpec::new("stop", 120),
    ActionSpec::monitor(20, 10, None),
    ActionSpec::new("promote", 90),
    ActionSpec::new("demote", 90),
    ActionSpec::new("notify", 90),
    VALIDATE_ALL_ACTION,
    META_DATA_ACTION,
];

pub static METADATA: AgentMetadata = AgentMetadata {
    name: AGENT_NAME,
    shortdesc: "Manages a Linux SCSI target backing device (LUN)",
    longdesc: "Manages a Linux-IO (LIO) backing store and storage object, \
               which can then be exported to initiators through iSCSI or \
               another fabric. Runs as a primitive, or as a promotable clone \
               that manages the ALUA state of the local path.",
    parameters: PARAMETERS,
    actions: ACTIONS,
};

pub struct BackstoreAgent {
    env: OcfEnv,
    config: Config,
    bootstrap: Bootstrap,
    services: Services,
}

impl BackstoreAgent {
    pub fn new(env: OcfEnv, config: Config, services: Services) -> Self {
        let bootstrap = Bootstrap::new(&config.configfs.root);
        BackstoreAgent {
            env,
            config,
            bootstrap,
            services,
        }
    }

    pub fn with_bootstrap(mut self, bootstrap: Bootstrap) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    fn tree(&self) -> &dyn ConfigTree {
        self.services.tree.as_ref()
    }

    fn params(&self) -> Result<Parameters, ModelError> {
        self.env.parameters(PARAMETERS)
    }

    fn descriptor(&self) -> Result<BackstoreDescriptor, ModelError> {
        BackstoreDescriptor::from_params(&self.params()?)
    }

    /// The local node's ALUA port group
    fn port_group(&self) -> anyhow::Result<AluaPortGroup> {
        let params = self.params()?;
        let hosts = params
            .get("alua_hosts")
            .ok_or_else(|| ModelError::invalid("alua_hosts", "required for multistate resources"))?;
        let hostname = self.services.host.hostname().context("reading host name")?;
        Ok(AluaPortGroup::derive(&hostname, hosts)?)
    }

    fn storage_object(&self, desc: &BackstoreDescriptor) -> anyhow::Result<Option<StorageObject>> {
        StorageObject::find(self.tree(), desc.hba_type, &desc.name)
            .with_context(|| format!("looking up storage object {}/{}", desc.hba_type, desc.name))
    }

    fn lock_name(&self) -> &str {
        if self.env.resource_type.is_empty() {
            AGENT_NAME
        } else {
            &self.env.resource_type
        }
    }

    /// Multistate resources must be a single promotable pair
    fn check_clone_contract(&self) -> Result<(), ModelError> {
        if !self.env.is_clone() {
            return Ok(());
        }
        if !self.env.is_ms() {
            return Err(ModelError::invalid(
                "meta attributes",
                "may only run as a primitive or a promotable clone, not a plain clone",
            ));
        }

        let expected: [(&[&str], u32); 4] = [
            (&["clone_max"], 2),
            (&["clone_node_max"], 1),
            (&["master_node_max", "promoted_node_max"], 1),
            (&["master_max", "promoted_max"], 1),
        ];
        for (names, want) in expected {
            if names.iter().find_map(|name| self.env.meta_u32(name)) != Some(want) {
                return Err(ModelError::invalid(
                    "meta attributes",
                    "clone options misconfigured (expect clone_max=2, clone_node_max=1, \
                     master_node_max=1, master_max=1)",
                ));
            }
        }
        Ok(())
    }

    fn check_device(&self, desc: &BackstoreDescriptor) -> Result<(), ModelError> {
        let host = &self.services.host;
        match &desc.device {
            BackingDevice::Block(path) => match host.device_kind(path) {
                DeviceKind::Disk => Ok(()),
                kind => Err(ModelError::invalid(
                    "device",
                    format!("{} is not a TYPE_DISK block device ({:?})", path.display(), kind),
                )),
            },
            BackingDevice::File(file) => {
                if file.size.is_none() && host.device_kind(&file.dev_name) != DeviceKind::Disk {
                    return Err(ModelError::invalid(
                        "device",
                        "fd_dev_size must be given unless fd_dev_name is a block device",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Parameter and environment checks, without touching the tree
    fn validate(&self) -> anyhow::Result<BackstoreDescriptor> {
        let desc = self.descriptor()?;
        self.check_clone_contract()?;
        if self.env.is_ms() {
            let group = self.port_group()?;
            log::debug!("Multistate resource, ALUA port group {} (id {})", group.name, group.id);
        }
        self.check_device(&desc)?;
        Ok(desc)
    }

    /// Current state of the storage object and, in multistate mode, of the
    /// local ALUA port group
    pub fn probe(&self) -> anyhow::Result<OcfStatus> {
        let tree = self.tree();
        let desc = self.descriptor()?;

        let Some(so) = self.storage_object(&desc)? else {
            return Ok(OcfStatus::NotRunning);
        };

        if !so.is_configured(tree)? {
            log::error!("Storage object {} is not fully configured", so.path);
            return Ok(OcfStatus::GenericError);
        }

        if !self.env.is_ms() {
            return Ok(OcfStatus::Success);
        }

        let group = so.alua_group(&self.port_group()?.name);
        if !group.exists(tree) {
            log::error!("ALUA port group {} is missing", group.path);
            return Ok(OcfStatus::FailedMaster);
        }

        let state = group.access_state(tree)?;
        let preferred = group.preferred(tree)?;
        Ok(match (state, preferred) {
            (AccessState::ActiveOptimized, true) => OcfStatus::RunningMaster,
            (AccessState::Standby, false) => OcfStatus::Success,
            _ => {
                log::error!(
                    "Inconsistent ALUA state on {}: {:?}, preferred={}",
                    group.path,
                    state,
                    preferred
                );
                OcfStatus::FailedMaster
            }
        })
    }

    /// Create the backstore and storage object unless they already exist
    pub fn ensure_running(&self) -> anyhow::Result<OcfStatus> {
        let tree = self.tree();
        let desc = self.descriptor()?;
        let port_group = if self.env.is_ms() {
            Some(self.port_group()?)
        } else {
            None
        };

        if let Some(so) = self.storage_object(&desc)? {
            return match self.probe()? {
                OcfStatus::Success | OcfStatus::RunningMaster => {
                    log::info!("Storage object {} is already running", so.path);
                    Ok(OcfStatus::Success)
                }
                status => Err(anyhow!(
                    "storage object {} exists but is not healthy ({})",
                    so.path,
                    status
                )),
            };
        }

        let so = {
            let lock_path = AgentLock::path_for(&self.env.rsctmp, self.lock_name());
            let _lock = AgentLock::acquire(&lock_path)
                .with_context(|| format!("locking {}", lock_path.display()))?;
            self.create_storage_object(&desc)?
        };

        match port_group {
            Some(port_group) => {
                let group = so.alua_group(&port_group.name);
                group
                    .create(tree, port_group.id)
                    .and_then(|()| group.set_access_type(tree, ALUA_EXPLICIT))
                    .and_then(|()| group.set_access_state(tree, AccessState::Standby))
                    .and_then(|()| group.set_preferred(tree, false))
                    .with_context(|| format!("setting up ALUA port group {}", group.path))?;
            }
            None => so
                .alua_group(DEFAULT_TG_PT_GP)
                .set_access_type(tree, ALUA_DISABLED)
                .context("disabling ALUA")?,
        }

        for (name, value) in &desc.attributes {
            so.set_attribute(tree, name, value)
                .with_context(|| format!("setting attribute {}={}", name, value))?;
        }

        Ok(OcfStatus::Success)
    }

    /// Two stages; a failed storage object takes its fresh backstore with it
    fn create_storage_object(&self, desc: &BackstoreDescriptor) -> anyhow::Result<StorageObject> {
        let tree = self.tree();
        let index = next_free_hba_index(tree, desc.hba_type)
            .context("enumerating backstores")?
            .ok_or_else(|| anyhow!("no free {} backstore index", desc.hba_type))?;

        let backstore = Backstore::create(tree, desc.hba_type, index)
            .with_context(|| format!("creating {} backstore {}", desc.hba_type, index))?;

        match StorageObject::create(tree, &backstore, &desc.name, &desc.setup()) {
            Ok(so) => Ok(so),
            Err(e) => {
                if let Err(cleanup) = backstore.delete(tree) {
                    log::error!("Failed to remove backstore {}: {}", backstore.path, cleanup);
                }
                Err(e).with_context(|| format!("creating storage object {}", desc.name))
            }
        }
    }

    /// Remove the storage object, its ALUA port groups and its backstore
    pub fn ensure_stopped(&self) -> anyhow::Result<OcfStatus> {
        let tree = self.tree();
        let desc = self.descriptor()?;

        let Some(so) = self.storage_object(&desc)? else {
            log::info!("Storage object {}/{} is not present", desc.hba_type, desc.name);
            return Ok(OcfStatus::Success);
        };

        for group in so.alua_groups(tree)? {
            if !group.is_default() {
                group
                    .delete(tree)
                    .with_context(|| format!("deleting ALUA port group {}", group.path))?;
            }
        }

        so.delete(tree)
            .with_context(|| format!("deleting storage object {}", so.path))?;
        so.backstore
            .delete(tree)
            .with_context(|| format!("deleting backstore {}", so.backstore.path))?;

        Ok(OcfStatus::Success)
    }

    /// Push master eligibility for the given probe result
    pub fn update_master_score(&self, status: OcfStatus) {
        let score = match status {
            OcfStatus::Success | OcfStatus::RunningMaster => match self.member_count() {
                Ok(members) => MasterScore::Preference(
                    members.saturating_mul(self.config.cluster.score_per_member),
                ),
                Err(e) => {
                    log::warn!("Cannot count ALUA port group members: {:#}", e);
                    MasterScore::Withdraw
                }
            },
            _ => MasterScore::Withdraw,
        };

        self.services.scores.push(score);
    }

    fn member_count(&self) -> anyhow::Result<u32> {
        let desc = self.descriptor()?;
        let so = self
            .storage_object(&desc)?
            .ok_or_else(|| anyhow!("storage object {} is gone", desc.name))?;
        let members = so.alua_group(&self.port_group()?.name).members(self.tree())?;
        Ok(u32::try_from(members.len()).unwrap_or(u32::MAX))
    }

    fn transition(&self, direction: Direction) -> anyhow::Result<OcfStatus> {
        if !self.env.is_ms() {
            return Err(ModelError::invalid(
                "meta attributes",
                "promote and demote need a promotable clone",
            )
            .into());
        }

        let tree = self.tree();
        let desc = self.descriptor()?;
        let group_name = self.port_group()?.name;

        let status = alua::drive(
            direction,
            &self.config.promotion,
            self.services.pacer.as_ref(),
            || self.probe(),
            |state| {
                let so = self
                    .storage_object(&desc)?
                    .ok_or_else(|| anyhow!("storage object {} is gone", desc.name))?;
                let group = so.alua_group(&group_name);
                group.set_access_state(tree, state)?;
                group.set_preferred(tree, state.preferred())?;
                Ok(())
            },
        )?;

        if status == OcfStatus::Success {
            self.update_master_score(direction.goal());
        }
        Ok(status)
    }
}

impl ResourceAgent for BackstoreAgent {
    fn metadata(&self) -> &AgentMetadata {
        &METADATA
    }

    fn start(&self) -> anyhow::Result<OcfStatus> {
        self.validate()?;
        self.bootstrap.backstore(self.services.runner.as_ref())?;

        let status = self.ensure_running()?;
        if self.env.is_ms() {
            self.update_master_score(self.probe()?);
        }
        Ok(status)
    }

    fn stop(&self) -> anyhow::Result<OcfStatus> {
        let status = self.ensure_stopped()?;
        if self.env.is_ms() {
            self.services.scores.push(MasterScore::Withdraw);
        }
        Ok(status)
    }

    fn monitor(&self) -> anyhow::Result<OcfStatus> {
        let status = self.probe()?;
        if self.env.is_ms() {
            self.update_master_score(status);
        }
        Ok(status)
    }

    fn validate_all(&self) -> anyhow::Result<OcfStatus> {
        self.validate()?;
        self.bootstrap.backstore(self.services.runner.as_ref())?;
        Ok(OcfStatus::Success)
    }

    fn promote(&self) -> anyhow::Result<OcfStatus> {
        self.transition(Direction::Promote)
    }

    fn demote(&self) -> anyhow::Result<OcfStatus> {
        self.transition(Direction::Demote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configfs::{MemoryTree, NodePath};
    use crate::fakes::{FakeHost, RecordingPacer, RecordingRunner, RecordingScores};
    use crate::configfs::NodeKind;
    use crate::ocf::{dispatch, Action};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;

    const SERIAL: &str = "5b1c0b0e-2b39-4e2a-9a57-5a3c3e6c2f10";

    const MULTISTATE: &[(&str, &str)] = &[
        ("OCF_RESKEY_CRM_meta_clone_max", "2"),
        ("OCF_RESKEY_CRM_meta_clone_node_max", "1"),
        ("OCF_RESKEY_CRM_meta_master_max", "1"),
        ("OCF_RESKEY_CRM_meta_master_node_max", "1"),
        ("OCF_RESKEY_alua_hosts", "nodeA nodeB nodeC"),
    ];

    struct Fixture {
        dir: TempDir,
        tree: MemoryTree,
        scores: RecordingScores,
        pacer: RecordingPacer,
        runner: RecordingRunner,
        host: FakeHost,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::create_dir(dir.path().join("config")).unwrap();
            Fixture {
                dir,
                tree: MemoryTree::lio(),
                scores: RecordingScores::new(),
                pacer: RecordingPacer::new(),
                runner: RecordingRunner::new(),
                host: FakeHost::new("nodeB")
                    .with_device("/dev/sdb", DeviceKind::Disk)
                    .with_device("/dev/sr0", DeviceKind::Scsi(5))
                    .with_device("/srv/lun.img", DeviceKind::NotBlock),
            }
        }

        fn agent(&self, extra: &[(&str, &str)]) -> BackstoreAgent {
            let rsctmp = self.dir.path().join("rsctmp").display().to_string();
            // Later entries override earlier ones
            let vars: BTreeMap<String, String> = [
                ("OCF_RESKEY_hba_type", "iblock"),
                ("OCF_RESKEY_name", "disk0"),
                ("OCF_RESKEY_device", "/dev/sdb"),
                ("OCF_RESKEY_unit_serial", SERIAL),
                ("OCF_RESKEY_attrib", "emulate_tpu=1"),
                ("OCF_RESOURCE_TYPE", AGENT_NAME),
                ("HA_RSCTMP", rsctmp.as_str()),
            ]
            .iter()
            .chain(extra)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

            let services = Services {
                tree: Box::new(self.tree.clone()),
                host: Box::new(self.host.clone()),
                runner: Box::new(self.runner.clone()),
                scores: Box::new(self.scores.clone()),
                pacer: Box::new(self.pacer.clone()),
            };
            let bootstrap = Bootstrap {
                state_dir: self.dir.path().join("var/target"),
                configfs_root: self.dir.path().join("config"),
                proc_modules: self.dir.path().join("modules"),
            };

            BackstoreAgent::new(OcfEnv::from_vars(vars), Config::default(), services)
                .with_bootstrap(bootstrap)
        }

        fn run(&self, extra: &[(&str, &str)], action: Action) -> OcfStatus {
            dispatch(&self.agent(extra), action, &mut Vec::new())
        }

        fn attr(&self, path: &str, name: &str) -> String {
            self.tree.read_attr(&NodePath::parse(path), name).unwrap()
        }
    }

    const SO: &str = "target/core/iblock_0/disk0";
    const GROUP: &str = "target/core/iblock_0/disk0/alua/nodeB";

    #[test]
    fn test_start_creates_storage_object() {
        let fx = Fixture::new();
        assert_eq!(fx.run(&[], Action::Start), OcfStatus::Success);

        assert_eq!(fx.attr(SO, "enable"), "1");
        assert_eq!(fx.attr(SO, "control"), "udev_path=/dev/sdb");
        assert_eq!(fx.attr(SO, "udev_path"), "/dev/sdb");
        assert_eq!(fx.attr(&format!("{}/wwn", SO), "vpd_unit_serial"), SERIAL);
        assert_eq!(fx.attr(&format!("{}/attrib", SO), "emulate_tpu"), "1");
        assert_eq!(
            fx.attr(&format!("{}/alua/default_tg_pt_gp", SO), "alua_access_type"),
            "0"
        );

        assert!(fx.dir.path().join("rsctmp/lio-backstore.lock").exists());
        assert!(fx.dir.path().join("var/target/alua").is_dir());
        assert_eq!(fx.run(&[], Action::Monitor), OcfStatus::Success);
        // Not multistate: no master score traffic
        assert!(fx.scores.scores().is_empty());
    }

    #[test]
    fn test_start_is_idempotent() {
        let fx = Fixture::new();
        assert_eq!(fx.run(&[], Action::Start), OcfStatus::Success);
        fx.tree.clear_journal();

        assert_eq!(fx.run(&[], Action::Start), OcfStatus::Success);
        assert!(fx.tree.journal().is_empty());
        assert_eq!(
            fx.tree.list_children(&NodePath::parse("target/core")).unwrap(),
            vec!["alua", "iblock_0"]
        );
    }

    #[test]
    fn test_stop_is_idempotent() {
        let fx = Fixture::new();
        assert_eq!(fx.run(&[], Action::Start), OcfStatus::Success);
        assert_eq!(fx.run(&[], Action::Stop), OcfStatus::Success);
        assert!(!fx.tree.exists(&NodePath::parse("target/core/iblock_0")));

        fx.tree.clear_journal();
        assert_eq!(fx.run(&[], Action::Stop), OcfStatus::Success);
        assert!(fx.tree.journal().is_empty());
        assert_eq!(fx.run(&[], Action::Monitor), OcfStatus::NotRunning);
    }

    #[test]
    fn test_start_uses_next_free_index() {
        let fx = Fixture::new();
        fx.tree
            .create(&NodePath::parse("target/core/iblock_0"), NodeKind::Group)
            .unwrap();
        fx.tree
            .create(&NodePath::parse("target/core/fileio_1"), NodeKind::Group)
            .unwrap();

        assert_eq!(fx.run(&[], Action::Start), OcfStatus::Success);
        assert!(fx.tree.exists(&NodePath::parse("target/core/iblock_1/disk0")));
    }

    #[test]
    fn test_failed_storage_object_removes_backstore() {
        let fx = Fixture::new();
        fx.tree.reject_writes("control");

        assert_eq!(fx.run(&[], Action::Start), OcfStatus::GenericError);
        assert!(!fx.tree.exists(&NodePath::parse("target/core/iblock_0")));
    }

    #[test]
    fn test_monitor_reports_unconfigured_object() {
        let fx = Fixture::new();
        assert_eq!(fx.run(&[], Action::Monitor), OcfStatus::NotRunning);
        assert_eq!(fx.run(&[], Action::Start), OcfStatus::Success);

        fx.tree.write_attr(&NodePath::parse(SO), "enable", "0").unwrap();
        assert_eq!(fx.run(&[], Action::Monitor), OcfStatus::GenericError);
        // start refuses to paper over it
        assert_eq!(fx.run(&[], Action::Start), OcfStatus::GenericError);
    }

    #[test]
    fn test_fileio_start() {
        let fx = Fixture::new();
        let fileio = [
            ("OCF_RESKEY_hba_type", "fileio"),
            ("OCF_RESKEY_device", "fd_dev_name=/srv/lun.img,fd_dev_size=1G,fd_buffered_io=1"),
        ];
        assert_eq!(fx.run(&fileio, Action::Start), OcfStatus::Success);
        assert_eq!(
            fx.attr("target/core/fileio_0/disk0", "control"),
            "fd_dev_name=/srv/lun.img,fd_dev_size=1073741824,fd_buffered_io=1"
        );
    }

    #[test]
    fn test_validate_device_checks() {
        let fx = Fixture::new();
        assert_eq!(fx.run(&[], Action::ValidateAll), OcfStatus::Success);

        let cdrom = [("OCF_RESKEY_device", "/dev/sr0")];
        assert_eq!(fx.run(&cdrom, Action::ValidateAll), OcfStatus::ConfiguredError);

        let missing = [("OCF_RESKEY_device", "/dev/sdz")];
        assert_eq!(fx.run(&missing, Action::Start), OcfStatus::ConfiguredError);
        assert!(fx.tree.journal().is_empty());

        let unsized_file = [
            ("OCF_RESKEY_hba_type", "fileio"),
            ("OCF_RESKEY_device", "fd_dev_name=/srv/lun.img"),
        ];
        assert_eq!(fx.run(&unsized_file, Action::ValidateAll), OcfStatus::ConfiguredError);

        let bad_buffering = [
            ("OCF_RESKEY_hba_type", "fileio"),
            ("OCF_RESKEY_device", "fd_dev_name=/srv/lun.img,fd_dev_size=1G,fd_buffered_io=2"),
        ];
        assert_eq!(fx.run(&bad_buffering, Action::ValidateAll), OcfStatus::ConfiguredError);
    }

    #[test]
    fn test_validate_clone_contract() {
        let fx = Fixture::new();
        assert_eq!(fx.run(MULTISTATE, Action::ValidateAll), OcfStatus::Success);

        let plain_clone = [("OCF_RESKEY_CRM_meta_clone_max", "2")];
        assert_eq!(fx.run(&plain_clone, Action::ValidateAll), OcfStatus::ConfiguredError);

        let mut three = MULTISTATE.to_vec();
        three.push(("OCF_RESKEY_CRM_meta_clone_max", "3"));
        assert_eq!(fx.run(&three, Action::ValidateAll), OcfStatus::ConfiguredError);

        let mut no_hosts = MULTISTATE.to_vec();
        no_hosts.push(("OCF_RESKEY_alua_hosts", ""));
        assert_eq!(fx.run(&no_hosts, Action::ValidateAll), OcfStatus::ConfiguredError);

        let mut elsewhere = MULTISTATE.to_vec();
        elsewhere.push(("OCF_RESKEY_alua_hosts", "nodeA nodeC"));
        assert_eq!(fx.run(&elsewhere, Action::ValidateAll), OcfStatus::ConfiguredError);
    }

    #[test]
    fn test_multistate_start_creates_standby_group() {
        let fx = Fixture::new();
        assert_eq!(fx.run(MULTISTATE, Action::Start), OcfStatus::Success);

        assert_eq!(fx.attr(GROUP, "tg_pt_gp_id"), "17");
        assert_eq!(fx.attr(GROUP, "alua_access_type"), "1");
        assert_eq!(fx.attr(GROUP, "alua_access_state"), "2");
        assert_eq!(fx.attr(GROUP, "preferred"), "0");
        assert_eq!(fx.run(MULTISTATE, Action::Monitor), OcfStatus::Success);

        // Stop removes the non-default group along with the object
        assert_eq!(fx.run(MULTISTATE, Action::Stop), OcfStatus::Success);
        assert!(!fx.tree.exists(&NodePath::parse("target/core/iblock_0")));
        assert_eq!(fx.scores.last(), Some(MasterScore::Withdraw));
    }

    #[test]
    fn test_promote_and_demote() {
        let fx = Fixture::new();
        assert_eq!(fx.run(MULTISTATE, Action::Start), OcfStatus::Success);

        assert_eq!(fx.run(MULTISTATE, Action::Promote), OcfStatus::Success);
        assert_eq!(fx.attr(GROUP, "alua_access_state"), "0");
        assert_eq!(fx.attr(GROUP, "preferred"), "1");
        assert_eq!(fx.run(MULTISTATE, Action::Monitor), OcfStatus::RunningMaster);
        // One write, one poll to confirm it
        assert_eq!(fx.pacer.sleeps(), vec![Duration::from_secs(1)]);

        assert_eq!(fx.run(MULTISTATE, Action::Demote), OcfStatus::Success);
        assert_eq!(fx.attr(GROUP, "alua_access_state"), "2");
        assert_eq!(fx.attr(GROUP, "preferred"), "0");
        assert_eq!(fx.run(MULTISTATE, Action::Monitor), OcfStatus::Success);
    }

    #[test]
    fn test_promote_not_running_fails_immediately() {
        let fx = Fixture::new();
        assert_eq!(fx.run(MULTISTATE, Action::Promote), OcfStatus::GenericError);
        // Only the failure penalty, no polling
        assert_eq!(fx.pacer.sleeps(), vec![Duration::from_secs(15)]);
        assert!(fx.tree.journal().is_empty());
    }

    #[test]
    fn test_promote_repairs_inconsistent_state() {
        let fx = Fixture::new();
        assert_eq!(fx.run(MULTISTATE, Action::Start), OcfStatus::Success);

        fx.tree
            .write_attr(&NodePath::parse(GROUP), "alua_access_state", "0")
            .unwrap();
        assert_eq!(fx.run(MULTISTATE, Action::Monitor), OcfStatus::FailedMaster);

        assert_eq!(fx.run(MULTISTATE, Action::Promote), OcfStatus::Success);
        assert_eq!(fx.attr(GROUP, "preferred"), "1");
    }

    #[test]
    fn test_promote_requires_multistate() {
        let fx = Fixture::new();
        assert_eq!(fx.run(&[], Action::Promote), OcfStatus::ConfiguredError);
    }

    #[test]
    fn test_master_score_follows_members() {
        let fx = Fixture::new();
        assert_eq!(fx.run(MULTISTATE, Action::Start), OcfStatus::Success);
        assert_eq!(fx.scores.last(), Some(MasterScore::Preference(0)));

        assert_eq!(fx.run(MULTISTATE, Action::Promote), OcfStatus::Success);
        fx.tree
            .write_attr(
                &NodePath::parse(GROUP),
                "members",
                "iSCSI/iqn.2003-01.org.example:t1/tpgt_1/lun_0\n\
                 iSCSI/iqn.2003-01.org.example:t2/tpgt_1/lun_0\n\
                 \n\
                 iSCSI/iqn.2003-01.org.example:t3/tpgt_1/lun_0\n",
            )
            .unwrap();

        assert_eq!(fx.run(MULTISTATE, Action::Monitor), OcfStatus::RunningMaster);
        assert_eq!(fx.scores.last(), Some(MasterScore::Preference(3000)));

        fx.tree.write_attr(&NodePath::parse(GROUP), "members", "").unwrap();
        assert_eq!(fx.run(MULTISTATE, Action::Monitor), OcfStatus::RunningMaster);
        assert_eq!(fx.scores.last(), Some(MasterScore::Preference(0)));

        assert_eq!(fx.run(MULTISTATE, Action::Stop), OcfStatus::Success);
        assert_eq!(fx.run(MULTISTATE, Action::Monitor), OcfStatus::NotRunning);
        assert_eq!(fx.scores.last(), Some(MasterScore::Withdraw));
    }

    #[test]
    fn test_metadata_declares_parameters() {
        let mut out = Vec::new();
        let fx = Fixture::new();
        assert_eq!(dispatch(&fx.agent(&[]), Action::MetaData, &mut out), OcfStatus::Success);
        let xml = String::from_utf8(out).unwrap();
        assert!(xml.contains("<parameter name=\"unit_serial\" required=\"1\" unique=\"1\">"));
        assert!(xml.contains("<action name=\"stop\" timeout=\"120s\" />"));
    }
}
