//! Backstores, storage objects and ALUA port groups
//!
//! Layout under `target/core`:
//!
//! ```text
//! <plugin>_<index>/                 backstore (HBA), attribute hba_info
//!     <name>/                       storage object: control, udev_path, enable
//!         wwn/vpd_unit_serial
//!         attrib/<key>
//!         alua/<group>/             tg_pt_gp_id, alua_access_type,
//!                                   alua_access_state, preferred, members
//! ```

use super::{core_path, AccessState, HbaType, DEFAULT_TG_PT_GP};
use crate::configfs::{
    list_children_opt, read_attr_retrying, ConfigTree, NodeKind, NodePath, TreeError,
    TreeResult, FLAKY_READ_ATTEMPTS,
};

/// Exclusive upper bound for HBA indexes
pub const MAX_HBA_INDEX: u32 = 1 << 20;

/// A backstore (HBA) as currently present in the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backstore {
    pub index: u32,
    pub plugin: String,
    pub path: NodePath,
}

impl Backstore {
    /// Enumerate backstores.
    ///
    /// A backstore whose `hba_info` never becomes readable is skipped, as if
    /// it did not exist yet. Fails if `target/core` cannot be listed.
    pub fn list(tree: &dyn ConfigTree) -> TreeResult<Vec<Backstore>> {
        let core = core_path();
        let mut backstores = Vec::new();

        for child in tree.list_children(&core)? {
            let Some(index) = child
                .rsplit_once('_')
                .and_then(|(_, index)| index.parse::<u32>().ok())
            else {
                continue;
            };

            let path = core.join(&child);
            let Some(info) = read_attr_retrying(tree, &path, "hba_info", FLAKY_READ_ATTEMPTS)?
            else {
                log::debug!("Skipping {}: hba_info never appeared", path);
                continue;
            };

            match parse_plugin(&info) {
                Some(plugin) => backstores.push(Backstore {
                    index,
                    plugin: plugin.to_string(),
                    path,
                }),
                None => log::warn!("Skipping {}: unrecognised hba_info {:?}", path, info),
            }
        }

        Ok(backstores)
    }

    /// Create the backstore for `hba_type` at `index`
    pub fn create(tree: &dyn ConfigTree, hba_type: HbaType, index: u32) -> TreeResult<Backstore> {
        let path = core_path().join(&format!("{}_{}", hba_type.plugin(), index));
        tree.create(&path, NodeKind::Group)?;
        log::info!("Created backstore {}", path);

        Ok(Backstore {
            index,
            plugin: hba_type.plugin().to_string(),
            path,
        })
    }

    pub fn delete(&self, tree: &dyn ConfigTree) -> TreeResult<()> {
        tree.delete(&self.path)?;
        log::info!("Deleted backstore {}", self.path);
        Ok(())
    }

    /// Storage objects on this backstore
    pub fn storage_objects(&self, tree: &dyn ConfigTree) -> TreeResult<Vec<StorageObject>> {
        Ok(list_children_opt(tree, &self.path)?
            .into_iter()
            .map(|name| StorageObject {
                path: self.path.join(&name),
                backstore: self.clone(),
                name,
            })
            .collect())
    }
}

/// Extract the plugin name from `HBA Index: N plugin: P version: V`
fn parse_plugin(info: &str) -> Option<&str> {
    let mut tokens = info.split_whitespace();
    tokens.find(|t| *t == "plugin:")?;
    tokens.next()
}

/// First index in `[0, MAX_HBA_INDEX)` not used by a backstore of the same
/// type. `Ok(None)` means every index is taken.
pub fn next_free_hba_index(tree: &dyn ConfigTree, hba_type: HbaType) -> TreeResult<Option<u32>> {
    let used: std::collections::HashSet<u32> = Backstore::list(tree)?
        .into_iter()
        .filter(|bs| bs.plugin == hba_type.plugin())
        .map(|bs| bs.index)
        .collect();

    Ok((0..MAX_HBA_INDEX).find(|index| !used.contains(index)))
}

/// A storage object (the LUN-level object on top of a backstore)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageObject {
    pub backstore: Backstore,
    pub name: String,
    pub path: NodePath,
}

/// What the kernel needs to bring a storage object up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageObjectSetup {
    /// Written to the `control` attribute
    pub control: String,
    pub udev_path: String,
    pub unit_serial: String,
}

impl StorageObject {
    /// Look a storage object up by type and name.
    ///
    /// A target core that is not loaded at all reads as "no such object".
    pub fn find(
        tree: &dyn ConfigTree,
        hba_type: HbaType,
        name: &str,
    ) -> TreeResult<Option<StorageObject>> {
        let backstores = match Backstore::list(tree) {
            Ok(backstores) => backstores,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        for backstore in backstores {
            if backstore.plugin != hba_type.plugin() {
                continue;
            }
            if let Some(so) = backstore
                .storage_objects(tree)?
                .into_iter()
                .find(|so| so.name == name)
            {
                return Ok(Some(so));
            }
        }

        Ok(None)
    }

    /// Create and enable a storage object on `backstore`.
    ///
    /// If any step after the object's own creation fails, the object is
    /// removed again before the error is returned.
    pub fn create(
        tree: &dyn ConfigTree,
        backstore: &Backstore,
        name: &str,
        setup: &StorageObjectSetup,
    ) -> TreeResult<StorageObject> {
        let so = StorageObject {
            backstore: backstore.clone(),
            name: name.to_string(),
            path: backstore.path.join(name),
        };
        tree.create(&so.path, NodeKind::Group)?;

        if let Err(e) = so.configure(tree, setup) {
            if let Err(cleanup) = tree.delete(&so.path) {
                log::warn!("Failed to remove half-created {}: {}", so.path, cleanup);
            }
            return Err(e);
        }

        log::info!("Created storage object {}", so.path);
        Ok(so)
    }

    fn configure(&self, tree: &dyn ConfigTree, setup: &StorageObjectSetup) -> TreeResult<()> {
        tree.write_attr(&self.path, "control", &setup.control)?;
        tree.write_attr(&self.path, "udev_path", &setup.udev_path)?;
        tree.write_attr(&self.path.join("wwn"), "vpd_unit_serial", &setup.unit_serial)?;
        tree.write_attr(&self.path, "enable", "1")
    }

    pub fn delete(&self, tree: &dyn ConfigTree) -> TreeResult<()> {
        tree.delete(&self.path)?;
        log::info!("Deleted storage object {}", self.path);
        Ok(())
    }

    /// Whether the kernel reports the object as fully set up
    pub fn is_configured(&self, tree: &dyn ConfigTree) -> TreeResult<bool> {
        match tree.read_attr(&self.path, "enable") {
            Ok(value) => Ok(value.trim() == "1"),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn set_attribute(&self, tree: &dyn ConfigTree, name: &str, value: &str) -> TreeResult<()> {
        tree.write_attr(&self.path.join("attrib"), name, value)?;
        log::info!("Set {}/attrib/{}={}", self.path, name, value);
        Ok(())
    }

    /// Handle to the named ALUA port group (which may not exist)
    pub fn alua_group(&self, name: &str) -> AluaGroup {
        AluaGroup {
            name: name.to_string(),
            path: self.path.join("alua").join(name),
        }
    }

    /// ALUA port groups currently defined on this object, default included
    pub fn alua_groups(&self, tree: &dyn ConfigTree) -> TreeResult<Vec<AluaGroup>> {
        Ok(list_children_opt(tree, &self.path.join("alua"))?
            .into_iter()
            .map(|name| self.alua_group(&name))
            .collect())
    }
}

/// An ALUA target port group below a storage object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AluaGroup {
    pub name: String,
    pub path: NodePath,
}

impl AluaGroup {
    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_TG_PT_GP
    }

    pub fn exists(&self, tree: &dyn ConfigTree) -> bool {
        tree.exists(&self.path)
    }

    /// Create the group with the given port group id
    pub fn create(&self, tree: &dyn ConfigTree, id: u16) -> TreeResult<()> {
        tree.create(&self.path, NodeKind::Group)?;
        tree.write_attr(&self.path, "tg_pt_gp_id", &id.to_string())?;
        log::info!("Created ALUA port group {} (id {})", self.path, id);
        Ok(())
    }

    pub fn delete(&self, tree: &dyn ConfigTree) -> TreeResult<()> {
        tree.delete(&self.path)?;
        log::info!("Deleted ALUA port group {}", self.path);
        Ok(())
    }

    /// 0 disables ALUA, 1 means explicit ALUA driven by the target
    pub fn set_access_type(&self, tree: &dyn ConfigTree, access_type: u8) -> TreeResult<()> {
        tree.write_attr(&self.path, "alua_access_type", &access_type.to_string())
    }

    pub fn access_state(&self, tree: &dyn ConfigTree) -> TreeResult<AccessState> {
        let value = tree.read_attr(&self.path, "alua_access_state")?;
        value
            .trim()
            .parse::<u8>()
            .map(AccessState::from_code)
            .map_err(|_| TreeError::malformed(&self.path, "alua_access_state", &value))
    }

    pub fn set_access_state(&self, tree: &dyn ConfigTree, state: AccessState) -> TreeResult<()> {
        tree.write_attr(&self.path, "alua_access_state", &state.code().to_string())
    }

    pub fn preferred(&self, tree: &dyn ConfigTree) -> TreeResult<bool> {
        let value = tree.read_attr(&self.path, "preferred")?;
        match value.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(TreeError::malformed(&self.path, "preferred", &value)),
        }
    }

    pub fn set_preferred(&self, tree: &dyn ConfigTree, preferred: bool) -> TreeResult<()> {
        tree.write_attr(&self.path, "preferred", if preferred { "1" } else { "0" })
    }

    /// Fabric ports currently using this group, one per non-empty line
    pub fn members(&self, tree: &dyn ConfigTree) -> TreeResult<Vec<String>> {
        Ok(tree
            .read_attr(&self.path, "members")?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}
