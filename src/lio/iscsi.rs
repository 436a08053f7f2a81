//! iSCSI targets and their target portal group
//!
//! Layout under `target/iscsi`:
//!
//! ```text
//! <iqn>/
//!     tpgt_1/                       enable
//!         attrib/authentication
//!         param/AuthMethod
//!         lun/lun_<n>/<link>        -> target/core/<hba>/<name>, alua_tg_pt_gp
//!         acls/<initiator>/lun_<m>/<link> -> tpgt_1/lun/lun_<n>
//!         np/<ip>:<port>
//! ```

use super::{iscsi_path, StorageObject};
use crate::configfs::{list_children_opt, ConfigTree, NodeKind, NodePath, TreeResult};
use std::net::SocketAddr;

/// The only portal group tag these agents manage
pub const TPG_TAG: u16 = 1;

/// Path of the target named `iqn`
pub fn target_path(iqn: &str) -> NodePath {
    iscsi_path().join(iqn)
}

/// Remove a target if it has no portal groups left
pub fn delete_target_if_empty(tree: &dyn ConfigTree, iqn: &str) -> TreeResult<bool> {
    let path = target_path(iqn);
    let has_tpgs = list_children_opt(tree, &path)?
        .iter()
        .any(|child| child.starts_with("tpgt_"));
    if has_tpgs {
        return Ok(false);
    }

    tree.delete(&path)?;
    log::info!("Deleted target {}", path);
    Ok(true)
}

/// Directory name of a network portal
pub fn portal_name(addr: &SocketAddr) -> String {
    // SocketAddr formats IPv6 as [addr]:port, matching the kernel
    addr.to_string()
}

/// A live LUN: its index and the storage object its link points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveLun {
    pub index: u32,
    pub storage_object: Option<NodePath>,
}

/// A live mapped LUN under an ACL: its index and the TPG LUN it points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveMappedLun {
    pub index: u32,
    pub tpg_lun: Option<NodePath>,
}

/// Handle to `tpgt_1` of one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tpg {
    pub iqn: String,
    pub path: NodePath,
}

impl Tpg {
    pub fn new(iqn: &str) -> Self {
        Tpg {
            iqn: iqn.to_string(),
            path: target_path(iqn).join(&format!("tpgt_{}", TPG_TAG)),
        }
    }

    pub fn exists(&self, tree: &dyn ConfigTree) -> bool {
        tree.exists(&self.path)
    }

    /// Create the target (if needed) and the TPG
    pub fn create(&self, tree: &dyn ConfigTree) -> TreeResult<()> {
        let target = target_path(&self.iqn);
        if !tree.exists(&target) {
            tree.create(&target, NodeKind::Group)?;
            log::info!("Created target {}", target);
        }
        tree.create(&self.path, NodeKind::Group)?;
        log::info!("Created TPG {}", self.path);
        Ok(())
    }

    pub fn is_enabled(&self, tree: &dyn ConfigTree) -> TreeResult<bool> {
        Ok(tree.read_attr(&self.path, "enable")?.trim() == "1")
    }

    pub fn set_enabled(&self, tree: &dyn ConfigTree, enabled: bool) -> TreeResult<()> {
        tree.write_attr(&self.path, "enable", if enabled { "1" } else { "0" })?;
        log::info!("{} TPG {}", if enabled { "Enabled" } else { "Disabled" }, self.path);
        Ok(())
    }

    /// Turn off CHAP; there is no credential model
    pub fn disable_authentication(&self, tree: &dyn ConfigTree) -> TreeResult<()> {
        tree.write_attr(&self.path.join("attrib"), "authentication", "0")?;
        tree.write_attr(&self.path.join("param"), "AuthMethod", "None")
    }

    pub fn lun_path(&self, index: u32) -> NodePath {
        self.path.join("lun").join(&format!("lun_{}", index))
    }

    pub fn acl_path(&self, initiator: &str) -> NodePath {
        self.path.join("acls").join(initiator)
    }

    pub fn mapped_lun_path(&self, initiator: &str, index: u32) -> NodePath {
        self.acl_path(initiator).join(&format!("lun_{}", index))
    }

    pub fn portal_path(&self, addr: &SocketAddr) -> NodePath {
        self.path.join("np").join(&portal_name(addr))
    }

    /// Bind `so` as LUN `index` and put it in the ALUA group `alua_group`
    pub fn create_lun(
        &self,
        tree: &dyn ConfigTree,
        index: u32,
        so: &StorageObject,
        alua_group: &str,
    ) -> TreeResult<()> {
        let lun = self.lun_path(index);
        tree.create(&lun, NodeKind::Group)?;
        tree.create(&lun.join(&so.name), NodeKind::Link(so.path.clone()))?;
        tree.write_attr(&lun, "alua_tg_pt_gp", alua_group)?;
        log::info!("Created LUN {} -> {} (ALUA group {})", lun, so.path, alua_group);
        Ok(())
    }

    pub fn create_acl(&self, tree: &dyn ConfigTree, initiator: &str) -> TreeResult<()> {
        let acl = self.acl_path(initiator);
        tree.create(&acl, NodeKind::Group)?;
        log::info!("Created node ACL {}", acl);
        Ok(())
    }

    /// Map TPG LUN `index` to the same index for `initiator`
    pub fn map_lun(&self, tree: &dyn ConfigTree, initiator: &str, index: u32) -> TreeResult<()> {
        let mapped = self.mapped_lun_path(initiator, index);
        tree.create(&mapped, NodeKind::Group)?;
        tree.create(&mapped.join("tpg_lun"), NodeKind::Link(self.lun_path(index)))?;
        log::info!("Mapped LUN {} for {}", index, initiator);
        Ok(())
    }

    pub fn create_portal(&self, tree: &dyn ConfigTree, addr: &SocketAddr) -> TreeResult<()> {
        let portal = self.portal_path(addr);
        tree.create(&portal, NodeKind::Group)?;
        log::info!("Created network portal {}", portal);
        Ok(())
    }

    pub fn luns(&self, tree: &dyn ConfigTree) -> TreeResult<Vec<LiveLun>> {
        let mut luns = Vec::new();
        for name in list_children_opt(tree, &self.path.join("lun"))? {
            let Some(index) = parse_lun_name(&name) else {
                continue;
            };
            luns.push(LiveLun {
                index,
                storage_object: first_link_target(tree, &self.lun_path(index))?,
            });
        }
        Ok(luns)
    }

    pub fn acls(&self, tree: &dyn ConfigTree) -> TreeResult<Vec<String>> {
        list_children_opt(tree, &self.path.join("acls"))
    }

    pub fn mapped_luns(&self, tree: &dyn ConfigTree, initiator: &str) -> TreeResult<Vec<LiveMappedLun>> {
        let mut mapped = Vec::new();
        for name in list_children_opt(tree, &self.acl_path(initiator))? {
            let Some(index) = parse_lun_name(&name) else {
                continue;
            };
            mapped.push(LiveMappedLun {
                index,
                tpg_lun: first_link_target(tree, &self.mapped_lun_path(initiator, index))?,
            });
        }
        Ok(mapped)
    }

    /// Live portal directory names
    pub fn portals(&self, tree: &dyn ConfigTree) -> TreeResult<Vec<String>> {
        list_children_opt(tree, &self.path.join("np"))
    }

    /// Delete the TPG and everything attached to it.
    ///
    /// Mapped LUNs go before the LUNs they point at; the TPG itself last.
    pub fn delete(&self, tree: &dyn ConfigTree) -> TreeResult<()> {
        for initiator in self.acls(tree)? {
            let acl = self.acl_path(&initiator);
            for mapped in self.mapped_luns(tree, &initiator)? {
                remove_with_links(tree, &self.mapped_lun_path(&initiator, mapped.index))?;
            }
            tree.delete(&acl)?;
        }

        for lun in self.luns(tree)? {
            remove_with_links(tree, &self.lun_path(lun.index))?;
        }

        for portal in self.portals(tree)? {
            tree.delete(&self.path.join("np").join(&portal))?;
        }

        tree.delete(&self.path)?;
        log::info!("Deleted TPG {}", self.path);
        Ok(())
    }
}

fn parse_lun_name(name: &str) -> Option<u32> {
    name.strip_prefix("lun_")?.parse().ok()
}

/// Resolve the first link below `path`, if any
fn first_link_target(tree: &dyn ConfigTree, path: &NodePath) -> TreeResult<Option<NodePath>> {
    for child in list_children_opt(tree, path)? {
        match tree.read_link(&path.join(&child)) {
            Ok(target) => return Ok(Some(target)),
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

/// Unlink every child link of `path`, then remove `path`
fn remove_with_links(tree: &dyn ConfigTree, path: &NodePath) -> TreeResult<()> {
    for child in list_children_opt(tree, path)? {
        let child = path.join(&child);
        if tree.read_link(&child).is_ok() {
            tree.delete(&child)?;
        }
    }
    tree.delete(path)
}
