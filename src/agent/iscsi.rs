//! iSCSI target resource agent
//!
//! Maintains one target portal group: its LUNs, node ACLs with a full mesh
//! of mapped LUNs, and network portals. `monitor` compares the live group
//! against the parameters and reports any drift as a failure; only `start`
//! and `stop` change the tree.

use super::Services;
use crate::config::Config;
use crate::configfs::ConfigTree;
use crate::lio::iscsi::delete_target_if_empty;
use crate::lio::{StorageObject, Tpg, DEFAULT_TG_PT_GP};
use crate::model::portal::DEFAULT_PORTALS;
use crate::model::{expand_portals, BackstoreRef, ModelError, TargetTopology};
use crate::ocf::metadata::{META_DATA_ACTION, VALIDATE_ALL_ACTION};
use crate::ocf::{
    Action, ActionSpec, AgentMetadata, OcfEnv, OcfStatus, ParameterSpec, ResourceAgent,
};
use crate::system::Bootstrap;
use anyhow::{anyhow, Context};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;

pub const AGENT_NAME: &str = "lio-iscsi";

pub const PARAMETERS: &[ParameterSpec] = &[
    ParameterSpec {
        name: "iqn",
        required: true,
        unique: true,
        default: None,
        shortdesc: "iSCSI target IQN",
        longdesc: "The target iSCSI Qualified Name, e.g. \
                   iqn.2003-01.org.example:storage.disk1.",
    },
    ParameterSpec {
        name: "initiators",
        required: true,
        unique: false,
        default: None,
        shortdesc: "Allowed initiators",
        longdesc: "Space separated initiator names allowed to log in. Every \
                   initiator is given access to every LUN.",
    },
    ParameterSpec {
        name: "luns",
        required: true,
        unique: false,
        default: None,
        shortdesc: "Exported LUNs",
        longdesc: "Space separated LUN definitions of the form \
                   lun:hba_type/name, e.g. '0:iblock/disk0 1:fileio/disk1'. \
                   The backstores must already exist.",
    },
    ParameterSpec {
        name: "portals",
        required: false,
        unique: false,
        default: Some(DEFAULT_PORTALS),
        shortdesc: "Network portals",
        longdesc: "Space separated portals in ip[/mask][:port] form. IPv6 \
                   addresses go in brackets. A network with a mask expands \
                   to every local address inside it. The port defaults to \
                   3260.",
    },
    ParameterSpec {
        name: "alua_tpg",
        required: false,
        unique: false,
        default: Some(DEFAULT_TG_PT_GP),
        shortdesc: "ALUA port group",
        longdesc: "ALUA target port group assigned to every LUN. The string \
                   @hostname@ is replaced by the local node name.",
    },
];

pub const ACTIONS: &[ActionSpec] = &[
    ActionSpec::new("start", 40),
    ActionSpec::new("stop", 60),
    ActionSpec::monitor(10, 10, None),
    VALIDATE_ALL_ACTION,
    META_DATA_ACTION,
];

pub static METADATA: AgentMetadata = AgentMetadata {
    name: AGENT_NAME,
    shortdesc: "Manages a Linux-IO iSCSI target",
    longdesc: "Manages an iSCSI target on the Linux-IO (LIO) SCSI target, \
               exporting existing backstores as LUNs to a fixed set of \
               initiators.",
    parameters: PARAMETERS,
    actions: ACTIONS,
};

pub struct IscsiAgent {
    env: OcfEnv,
    bootstrap: Bootstrap,
    services: Services,
}

impl IscsiAgent {
    pub fn new(env: OcfEnv, config: &Config, services: Services) -> Self {
        IscsiAgent {
            env,
            bootstrap: Bootstrap::new(&config.configfs.root),
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

    fn topology(&self) -> anyhow::Result<TargetTopology> {
        let params = self.env.parameters(PARAMETERS)?;
        let hostname = self.services.host.hostname().context("reading host name")?;
        Ok(TargetTopology::from_params(&params, &hostname)?)
    }

    /// Find every storage object the topology exports, keyed by LUN
    fn resolve(
        &self,
        topology: &TargetTopology,
    ) -> anyhow::Result<Result<BTreeMap<u32, StorageObject>, BackstoreRef>> {
        let mut resolved = BTreeMap::new();
        for (&lun, backstore) in &topology.luns {
            match StorageObject::find(self.tree(), backstore.hba_type, &backstore.name)? {
                Some(so) => {
                    resolved.insert(lun, so);
                }
                None => return Ok(Err(backstore.clone())),
            }
        }
        Ok(Ok(resolved))
    }

    fn desired_portals(&self, topology: &TargetTopology) -> anyhow::Result<BTreeSet<SocketAddr>> {
        let local = self
            .services
            .host
            .local_addresses()
            .context("listing local addresses")?;
        Ok(expand_portals(&topology.portals, &local))
    }

    /// Compare the live target portal group with the topology
    pub fn probe(&self) -> anyhow::Result<OcfStatus> {
        let topology = self.topology()?;
        self.probe_topology(&topology)
    }

    fn probe_topology(&self, topology: &TargetTopology) -> anyhow::Result<OcfStatus> {
        let tree = self.tree();
        let tpg = Tpg::new(&topology.iqn);

        if !tpg.exists(tree) {
            return Ok(OcfStatus::NotRunning);
        }
        if !tpg.is_enabled(tree)? {
            log::error!("TPG {} is disabled", tpg.path);
            return Ok(OcfStatus::GenericError);
        }

        let storage = match self.resolve(topology)? {
            Ok(storage) => storage,
            Err(backstore) => {
                log::error!("Backstore {} does not exist", backstore);
                return Ok(OcfStatus::GenericError);
            }
        };

        let drift = self.lun_drift(&tpg, &storage)?
            || self.acl_drift(&tpg, topology)?
            || self.portal_drift(&tpg, topology)?;

        Ok(if drift {
            OcfStatus::GenericError
        } else {
            OcfStatus::Success
        })
    }

    fn lun_drift(&self, tpg: &Tpg, storage: &BTreeMap<u32, StorageObject>) -> anyhow::Result<bool> {
        let mut seen = BTreeSet::new();

        for lun in tpg.luns(self.tree())? {
            let Some(so) = storage.get(&lun.index) else {
                log::error!("Spurious LUN {} in {}", lun.index, tpg.path);
                return Ok(true);
            };
            if lun.storage_object.as_ref() != Some(&so.path) {
                log::error!(
                    "LUN {} in {} exports {:?}, expected {}",
                    lun.index,
                    tpg.path,
                    lun.storage_object,
                    so.path
                );
                return Ok(true);
            }
            seen.insert(lun.index);
        }

        if let Some(missing) = storage.keys().find(|index| !seen.contains(index)) {
            log::error!("Missing LUN {} in {}", missing, tpg.path);
            return Ok(true);
        }
        Ok(false)
    }

    fn acl_drift(&self, tpg: &Tpg, topology: &TargetTopology) -> anyhow::Result<bool> {
        let tree = self.tree();
        let expected = topology.mapped_luns();
        let mut seen = BTreeSet::new();

        for initiator in tpg.acls(tree)? {
            let Some(indexes) = expected.get(initiator.as_str()) else {
                log::error!("Spurious ACL {} in {}", initiator, tpg.path);
                return Ok(true);
            };

            let mut mapped = BTreeSet::new();
            for lun in tpg.mapped_luns(tree, &initiator)? {
                if !indexes.contains(&lun.index) {
                    log::error!("Spurious mapped LUN {} for {}", lun.index, initiator);
                    return Ok(true);
                }
                if lun.tpg_lun != Some(tpg.lun_path(lun.index)) {
                    log::error!(
                        "Mapped LUN {} for {} points at {:?}",
                        lun.index,
                        initiator,
                        lun.tpg_lun
                    );
                    return Ok(true);
                }
                mapped.insert(lun.index);
            }

            if let Some(missing) = indexes.difference(&mapped).next() {
                log::error!("Missing mapped LUN {} for {}", missing, initiator);
                return Ok(true);
            }
            seen.insert(initiator);
        }

        if let Some(missing) = topology.initiators.difference(&seen).next() {
            log::error!("Missing ACL {} in {}", missing, tpg.path);
            return Ok(true);
        }
        Ok(false)
    }

    fn portal_drift(&self, tpg: &Tpg, topology: &TargetTopology) -> anyhow::Result<bool> {
        let desired = self.desired_portals(topology)?;
        let mut live = BTreeSet::new();

        for name in tpg.portals(self.tree())? {
            match name.parse::<SocketAddr>() {
                Ok(addr) => {
                    live.insert(addr);
                }
                Err(_) => {
                    log::error!("Unrecognised portal {} in {}", name, tpg.path);
                    return Ok(true);
                }
            }
        }

        if let Some(spurious) = live.difference(&desired).next() {
            log::error!("Spurious portal {} in {}", spurious, tpg.path);
            return Ok(true);
        }
        if let Some(missing) = desired.difference(&live).next() {
            log::error!("Missing portal {} in {}", missing, tpg.path);
            return Ok(true);
        }
        Ok(false)
    }

    /// Create whatever the topology needs and is not there yet
    pub fn ensure_running(&self) -> anyhow::Result<OcfStatus> {
        let tree = self.tree();
        let topology = self.topology()?;

        if self.probe_topology(&topology)? == OcfStatus::Success {
            log::info!("Target {} is already running", topology.iqn);
            return Ok(OcfStatus::Success);
        }

        let storage = self
            .resolve(&topology)?
            .map_err(|backstore| anyhow!("backstore {} does not exist", backstore))?;

        // A disabled TPG cannot be deleted, so enable it before anything
        // else can fail
        let tpg = Tpg::new(&topology.iqn);
        if !tpg.exists(tree) {
            tpg.create(tree)
                .with_context(|| format!("creating TPG {}", tpg.path))?;
        }
        if !tpg.is_enabled(tree)? {
            tpg.set_enabled(tree, true)?;
        }

        for (&index, so) in &storage {
            if !tree.exists(&tpg.lun_path(index)) {
                tpg.create_lun(tree, index, so, &topology.alua_tpg)
                    .with_context(|| format!("creating LUN {} for {}", index, so.path))?;
            }
        }

        for (initiator, indexes) in topology.mapped_luns() {
            if !tree.exists(&tpg.acl_path(initiator)) {
                tpg.create_acl(tree, initiator)
                    .with_context(|| format!("creating ACL {}", initiator))?;
            }
            for &index in indexes.iter() {
                if !tree.exists(&tpg.mapped_lun_path(initiator, index)) {
                    tpg.map_lun(tree, initiator, index)
                        .with_context(|| format!("mapping LUN {} for {}", index, initiator))?;
                }
            }
        }

        tpg.disable_authentication(tree)
            .context("disabling authentication")?;

        // Portals last: nobody logs in before LUNs and ACLs are in place
        for addr in self.desired_portals(&topology)? {
            if !tree.exists(&tpg.portal_path(&addr)) {
                tpg.create_portal(tree, &addr)
                    .with_context(|| format!("creating portal {}", addr))?;
            }
        }

        match self.probe_topology(&topology)? {
            OcfStatus::Success => Ok(OcfStatus::Success),
            status => {
                log::error!("Target {} still differs after start ({})", topology.iqn, status);
                Ok(OcfStatus::GenericError)
            }
        }
    }

    /// Remove the target portal group, and the target once it is empty
    pub fn ensure_stopped(&self) -> anyhow::Result<OcfStatus> {
        let tree = self.tree();
        let topology = self.topology()?;
        let tpg = Tpg::new(&topology.iqn);

        if !tpg.exists(tree) {
            log::info!("Target {} is not present", topology.iqn);
            return Ok(OcfStatus::Success);
        }

        // The kernel only deletes enabled TPGs
        if !tpg.is_enabled(tree)? {
            tpg.set_enabled(tree, true)?;
        }
        tpg.delete(tree)
            .with_context(|| format!("deleting TPG {}", tpg.path))?;
        delete_target_if_empty(tree, &topology.iqn)
            .with_context(|| format!("deleting target {}", topology.iqn))?;

        Ok(OcfStatus::Success)
    }

    fn validate(&self) -> anyhow::Result<TargetTopology> {
        let topology = self.topology()?;
        if let Err(backstore) = self.resolve(&topology)? {
            return Err(ModelError::invalid(
                "luns",
                format!("backstore {} does not exist", backstore),
            )
            .into());
        }
        Ok(topology)
    }
}

impl ResourceAgent for IscsiAgent {
    fn metadata(&self) -> &AgentMetadata {
        &METADATA
    }

    fn start(&self) -> anyhow::Result<OcfStatus> {
        self.bootstrap.iscsi(self.services.runner.as_ref())?;
        self.validate()?;
        self.ensure_running()
    }

    fn stop(&self) -> anyhow::Result<OcfStatus> {
        self.ensure_stopped()
    }

    fn monitor(&self) -> anyhow::Result<OcfStatus> {
        if let Err(e) = self.bootstrap.iscsi(self.services.runner.as_ref()) {
            if self.env.is_probe(Action::Monitor) {
                log::info!("iSCSI target support unavailable during probe: {}", e);
                return Ok(OcfStatus::NotRunning);
            }
            return Err(e.into());
        }
        self.probe()
    }

    fn validate_all(&self) -> anyhow::Result<OcfStatus> {
        self.bootstrap.iscsi(self.services.runner.as_ref())?;
        self.validate()?;
        Ok(OcfStatus::Success)
    }
}
