//! Directory-backed control tree
//!
//! Maps the ConfigTree operations onto a mounted configfs: groups are
//! directories, links are symlinks and attributes are files.

use super::{ConfigTree, NodeKind, NodePath, TreeError, TreeResult};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Component, Path, PathBuf};

/// Default configfs mount point
pub const DEFAULT_CONFIGFS_ROOT: &str = "/sys/kernel/config";

/// Control tree rooted at a directory on the host
#[derive(Debug, Clone)]
pub struct ConfigFs {
    root: PathBuf,
}

impl ConfigFs {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, path: &NodePath) -> PathBuf {
        let mut host = self.root.clone();
        for component in path.components() {
            host.push(component);
        }
        host
    }

    /// Convert an absolute host path back into a tree path
    fn tree_path(&self, host: &Path) -> Option<NodePath> {
        let relative = host.strip_prefix(normalize(&self.root)).ok().or_else(|| {
            let root = fs::canonicalize(&self.root).ok()?;
            host.strip_prefix(root).ok()
        })?;
        Some(NodePath::parse(&relative.to_string_lossy()))
    }
}

/// Resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

impl ConfigTree for ConfigFs {
    fn create(&self, path: &NodePath, kind: NodeKind) -> TreeResult<()> {
        let host = self.host_path(path);
        let result = match kind {
            NodeKind::Group => fs::create_dir(&host),
            NodeKind::Link(target) => symlink(self.host_path(&target), &host),
        };
        result.map_err(|e| TreeError::from_io(path, e))
    }

    fn delete(&self, path: &NodePath) -> TreeResult<()> {
        let host = self.host_path(path);
        let metadata = fs::symlink_metadata(&host).map_err(|e| TreeError::from_io(path, e))?;
        let result = if metadata.file_type().is_symlink() {
            fs::remove_file(&host)
        } else {
            fs::remove_dir(&host)
        };
        result.map_err(|e| TreeError::from_io(path, e))
    }

    fn list_children(&self, path: &NodePath) -> TreeResult<Vec<String>> {
        let host = self.host_path(path);
        let entries = fs::read_dir(&host).map_err(|e| TreeError::from_io(path, e))?;

        let mut children = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TreeError::from_io(path, e))?;
            let file_type = entry.file_type().map_err(|e| TreeError::from_io(path, e))?;
            if file_type.is_dir() || file_type.is_symlink() {
                children.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        children.sort();
        Ok(children)
    }

    fn read_attr(&self, path: &NodePath, name: &str) -> TreeResult<String> {
        let attr = path.join(name);
        let content =
            fs::read_to_string(self.host_path(&attr)).map_err(|e| TreeError::from_io(&attr, e))?;
        Ok(content.trim_end_matches('\n').to_string())
    }

    fn write_attr(&self, path: &NodePath, name: &str, value: &str) -> TreeResult<()> {
        let attr = path.join(name);
        let host = self.host_path(&attr);
        if !host.is_file() {
            // configfs only accepts writes to attributes the kernel exposes
            return Err(TreeError::NotFound(attr));
        }
        fs::write(&host, format!("{}\n", value)).map_err(|e| TreeError::from_io(&attr, e))
    }

    fn read_link(&self, path: &NodePath) -> TreeResult<NodePath> {
        let host = self.host_path(path);
        let metadata = fs::symlink_metadata(&host).map_err(|e| TreeError::from_io(path, e))?;
        // Default groups such as `statistics` sit next to links
        if !metadata.file_type().is_symlink() {
            return Err(TreeError::NotFound(path.clone()));
        }

        let target = fs::read_link(&host).map_err(|e| TreeError::from_io(path, e))?;
        let target = match host.parent() {
            Some(parent) if target.is_relative() => normalize(&parent.join(target)),
            _ => normalize(&target),
        };
        if fs::symlink_metadata(&target).is_err() {
            return Err(TreeError::NotFound(path.clone()));
        }

        self.tree_path(&target)
            .ok_or_else(|| TreeError::NotFound(path.clone()))
    }

    fn exists(&self, path: &NodePath) -> bool {
        fs::symlink_metadata(self.host_path(path)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> (tempfile::TempDir, ConfigFs) {
        let dir = tempfile::tempdir().unwrap();
        let tree = ConfigFs::new(dir.path());
        (dir, tree)
    }

    #[test]
    fn test_create_list_delete() {
        let (_dir, tree) = tree();
        let core = NodePath::parse("target/core");
        tree.create(&NodePath::parse("target"), NodeKind::Group).unwrap();
        tree.create(&core, NodeKind::Group).unwrap();
        tree.create(&core.join("iblock_0"), NodeKind::Group).unwrap();

        assert!(matches!(
            tree.create(&core.join("iblock_0"), NodeKind::Group),
            Err(TreeError::AlreadyExists(_))
        ));

        // Attribute files are not children
        fs::write(tree.root().join("target/core/iblock_0/hba_info"), "x\n").unwrap();
        assert_eq!(tree.list_children(&core).unwrap(), vec!["iblock_0".to_string()]);
        assert!(tree.list_children(&core.join("iblock_0")).unwrap().is_empty());

        fs::remove_file(tree.root().join("target/core/iblock_0/hba_info")).unwrap();
        tree.delete(&core.join("iblock_0")).unwrap();
        assert!(!tree.exists(&core.join("iblock_0")));
        assert!(tree.delete(&core.join("iblock_0")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_attributes() {
        let (_dir, tree) = tree();
        let so = NodePath::parse("so");
        tree.create(&so, NodeKind::Group).unwrap();

        // Attributes must already exist, like kernel-provided files
        assert!(tree.write_attr(&so, "enable", "1").unwrap_err().is_not_found());

        fs::write(tree.root().join("so/enable"), "0\n").unwrap();
        tree.write_attr(&so, "enable", "1").unwrap();
        assert_eq!(tree.read_attr(&so, "enable").unwrap(), "1");
        assert!(tree.read_attr(&so, "missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_links_resolve_to_tree_paths() {
        let (_dir, tree) = tree();
        let so = NodePath::parse("core/iblock_0/disk");
        tree.create(&NodePath::parse("core"), NodeKind::Group).unwrap();
        tree.create(&NodePath::parse("core/iblock_0"), NodeKind::Group).unwrap();
        tree.create(&so, NodeKind::Group).unwrap();
        tree.create(&NodePath::parse("lun_0"), NodeKind::Group).unwrap();

        let link = NodePath::parse("lun_0/disk");
        tree.create(&link, NodeKind::Link(so.clone())).unwrap();
        assert_eq!(tree.list_children(&NodePath::parse("lun_0")).unwrap(), vec!["disk"]);
        assert_eq!(tree.read_link(&link).unwrap(), so);

        tree.delete(&link).unwrap();
        assert!(tree.exists(&so));
    }

    #[test]
    fn test_read_link_ignores_groups() {
        let (dir, tree) = tree();
        for group in ["core", "core/disk", "lun_0", "lun_0/statistics"] {
            tree.create(&NodePath::parse(group), NodeKind::Group).unwrap();
        }
        let statistics = NodePath::parse("lun_0/statistics");
        assert!(tree.read_link(&statistics).unwrap_err().is_not_found());

        // The kernel writes relative link targets
        symlink("../core/disk", dir.path().join("lun_0/disk")).unwrap();
        assert_eq!(
            tree.read_link(&NodePath::parse("lun_0/disk")).unwrap(),
            NodePath::parse("core/disk")
        );

        symlink("../core/gone", dir.path().join("lun_0/dangling")).unwrap();
        assert!(tree
            .read_link(&NodePath::parse("lun_0/dangling"))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_mapped_lun_next_to_statistics() {
        let (_dir, tree) = tree();
        let tpg = crate::lio::Tpg::new("iqn.2003-01.org.example:t");
        let initiator = "iqn.2003-01.org.example:i";
        let mapped = tpg.mapped_lun_path(initiator, 0);
        for group in [
            NodePath::parse("target"),
            NodePath::parse("target/iscsi"),
            tpg.path.parent().unwrap(),
            tpg.path.clone(),
            tpg.path.join("lun"),
            tpg.lun_path(0),
            tpg.lun_path(0).join("statistics"),
            tpg.path.join("acls"),
            tpg.acl_path(initiator),
            mapped.clone(),
            mapped.join("statistics"),
        ] {
            tree.create(&group, NodeKind::Group).unwrap();
        }
        tree.create(&mapped.join("tpg_lun"), NodeKind::Link(tpg.lun_path(0)))
            .unwrap();

        let luns = tpg.mapped_luns(&tree, initiator).unwrap();
        assert_eq!(luns.len(), 1);
        assert_eq!(luns[0].tpg_lun, Some(tpg.lun_path(0)));
    }
}
