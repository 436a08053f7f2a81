//! In-memory control tree
//!
//! A ConfigTree that never touches the host. `MemoryTree::lio()` also mimics
//! the parts of the kernel target core the agents depend on: default groups
//! appearing under newly created objects, the `hba_info` attribute, and the
//! refusal to delete a TPG that is not enabled.

use super::{ConfigTree, NodeKind, NodePath, TreeError, TreeResult};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
enum Node {
    Group(Group),
    Link(NodePath),
}

#[derive(Debug, Clone, Default)]
struct Group {
    /// Created by the tree itself rather than by a caller
    implicit: bool,
    attrs: BTreeMap<String, String>,
    children: BTreeMap<String, Node>,
}

impl Group {
    fn implicit() -> Self {
        Group {
            implicit: true,
            ..Default::default()
        }
    }

    /// Whether any caller-created node lives below this group
    fn holds_user_nodes(&self) -> bool {
        self.children.values().any(|child| match child {
            Node::Link(_) => true,
            Node::Group(group) => !group.implicit || group.holds_user_nodes(),
        })
    }
}

#[derive(Debug, Default)]
struct Inner {
    root: Group,
    lio: bool,
    /// Pending not-found failures keyed by attribute path
    failing_reads: HashMap<NodePath, usize>,
    /// Attribute names whose writes are refused
    rejected_writes: HashSet<String>,
    /// Every mutation, in order, for assertions in tests
    journal: Vec<String>,
}

impl Inner {
    fn group(&self, path: &NodePath) -> Option<&Group> {
        let mut group = &self.root;
        for component in path.components() {
            match group.children.get(component) {
                Some(Node::Group(child)) => group = child,
                _ => return None,
            }
        }
        Some(group)
    }

    fn group_mut(&mut self, path: &NodePath) -> Option<&mut Group> {
        let mut group = &mut self.root;
        for component in path.components() {
            match group.children.get_mut(component) {
                Some(Node::Group(child)) => group = child,
                _ => return None,
            }
        }
        Some(group)
    }

    fn node(&self, path: &NodePath) -> Option<&Node> {
        let parent = self.group(&path.parent()?)?;
        parent.children.get(path.name()?)
    }
}

/// Shared in-memory tree. Clones are handles onto the same tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryTree {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTree {
    /// An empty tree with no kernel behaviour
    pub fn new() -> Self {
        Self::default()
    }

    /// A tree that behaves like a loaded LIO target core with the iSCSI
    /// fabric registered
    pub fn lio() -> Self {
        let tree = Self::default();
        tree.lock().lio = true;
        tree.seed_group(&NodePath::parse("target/core/alua/lu_gps/default_lu_gp"));
        tree.seed_group(&NodePath::parse("target/iscsi"));
        tree
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not poison the other handles
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a group and any missing ancestors, as the kernel would
    pub fn seed_group(&self, path: &NodePath) {
        let mut inner = self.lock();
        let mut group = &mut inner.root;
        for component in path.components() {
            let child = group
                .children
                .entry(component.clone())
                .or_insert_with(|| Node::Group(Group::implicit()));
            group = match child {
                Node::Group(g) => g,
                Node::Link(_) => return,
            };
        }
    }

    /// Make the next `count` reads of `path/name` fail with not-found
    pub fn fail_reads(&self, path: &NodePath, name: &str, count: usize) {
        self.lock().failing_reads.insert(path.join(name), count);
    }

    /// Refuse every write to attributes called `name`, as the kernel does
    /// for values it does not accept
    pub fn reject_writes(&self, name: &str) {
        self.lock().rejected_writes.insert(name.to_string());
    }

    /// Mutations performed so far, formatted as `op path[=value]`
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    /// Kernel default groups and attributes for a freshly created group
    fn kernel_defaults(path: &NodePath) -> Group {
        let mut group = Group::default();
        let c: Vec<&str> = path.components().iter().map(String::as_str).collect();

        let attrs: &[(&str, &str)] = match c.as_slice() {
            ["target", "core", hba] => {
                let (plugin, index) = hba.rsplit_once('_').unwrap_or((*hba, "0"));
                group.attrs.insert(
                    "hba_info".to_string(),
                    format!("HBA Index: {} plugin: {} version: v5.0", index, plugin),
                );
                &[("hba_mode", "0")]
            }
            ["target", "core", _, _] => {
                let mut alua = Group::implicit();
                alua.children.insert(
                    "default_tg_pt_gp".to_string(),
                    Node::Group(alua_group("0", "1")),
                );
                group.children.insert("alua".to_string(), Node::Group(alua));
                group.children.insert("attrib".to_string(), Node::Group(Group::implicit()));
                let mut wwn = Group::implicit();
                wwn.attrs.insert("vpd_unit_serial".to_string(), String::new());
                group.children.insert("wwn".to_string(), Node::Group(wwn));
                &[("enable", "0"), ("control", ""), ("udev_path", "")]
            }
            ["target", "core", _, _, "alua", _] => {
                group = alua_group("0", "0");
                &[]
            }
            ["target", "iscsi", _, tpg] if tpg.starts_with("tpgt_") => {
                for name in ["acls", "lun", "np", "auth"] {
                    group.children.insert(name.to_string(), Node::Group(Group::implicit()));
                }
                let mut attrib = Group::implicit();
                attrib.attrs.insert("authentication".to_string(), "1".to_string());
                group.children.insert("attrib".to_string(), Node::Group(attrib));
                let mut param = Group::implicit();
                param.attrs.insert("AuthMethod".to_string(), "CHAP,None".to_string());
                group.children.insert("param".to_string(), Node::Group(param));
                &[("enable", "0")]
            }
            ["target", "iscsi", _, _, "lun", _] => {
                group.children.insert("statistics".to_string(), Node::Group(Group::implicit()));
                &[("alua_tg_pt_gp", "default_tg_pt_gp")]
            }
            ["target", "iscsi", _, _, "acls", _] => {
                for name in ["attrib", "auth", "param"] {
                    group.children.insert(name.to_string(), Node::Group(Group::implicit()));
                }
                &[]
            }
            ["target", "iscsi", _, _, "acls", _, _] => {
                group.children.insert("statistics".to_string(), Node::Group(Group::implicit()));
                &[("write_protect", "0")]
            }
            _ => &[],
        };

        for (name, value) in attrs {
            group.attrs.insert(name.to_string(), value.to_string());
        }
        group
    }
}

fn alua_group(state: &str, id: &str) -> Group {
    let mut group = Group::implicit();
    for (name, value) in [
        ("alua_access_state", state),
        ("alua_access_type", "3"),
        ("preferred", "0"),
        ("tg_pt_gp_id", id),
        ("members", ""),
    ] {
        group.attrs.insert(name.to_string(), value.to_string());
    }
    group
}

impl ConfigTree for MemoryTree {
    fn create(&self, path: &NodePath, kind: NodeKind) -> TreeResult<()> {
        let parent_path = path.parent().ok_or_else(|| TreeError::AlreadyExists(path.clone()))?;
        let name = path.name().unwrap_or_default().to_string();

        let mut inner = self.lock();
        let lio = inner.lio;
        if let NodeKind::Link(target) = &kind {
            if inner.node(target).is_none() {
                return Err(TreeError::NotFound(target.clone()));
            }
        }

        let parent = inner
            .group_mut(&parent_path)
            .ok_or_else(|| TreeError::NotFound(parent_path.clone()))?;
        if parent.children.contains_key(&name) {
            return Err(TreeError::AlreadyExists(path.clone()));
        }

        let (node, entry) = match kind {
            NodeKind::Group => {
                let mut group = if lio {
                    Self::kernel_defaults(path)
                } else {
                    Group::default()
                };
                group.implicit = false;
                (Node::Group(group), format!("create {}", path))
            }
            NodeKind::Link(target) => {
                let entry = format!("link {} -> {}", path, target);
                (Node::Link(target), entry)
            }
        };
        parent.children.insert(name, node);
        inner.journal.push(entry);
        Ok(())
    }

    fn delete(&self, path: &NodePath) -> TreeResult<()> {
        let parent_path = path.parent().ok_or_else(|| TreeError::PermissionDenied(path.clone()))?;
        let name = path.name().unwrap_or_default().to_string();

        let mut inner = self.lock();
        let lio = inner.lio;
        match inner.node(path) {
            None => return Err(TreeError::NotFound(path.clone())),
            Some(Node::Group(group)) => {
                if group.implicit {
                    return Err(TreeError::PermissionDenied(path.clone()));
                }
                if group.holds_user_nodes() {
                    return Err(TreeError::NotEmpty(path.clone()));
                }
                let is_tpg = name.starts_with("tpgt_");
                if lio && is_tpg && group.attrs.get("enable").map(String::as_str) != Some("1") {
                    return Err(TreeError::PermissionDenied(path.clone()));
                }
            }
            Some(Node::Link(_)) => {}
        }

        if let Some(parent) = inner.group_mut(&parent_path) {
            parent.children.remove(&name);
        }
        inner.journal.push(format!("delete {}", path));
        Ok(())
    }

    fn list_children(&self, path: &NodePath) -> TreeResult<Vec<String>> {
        let inner = self.lock();
        let group = inner
            .group(path)
            .ok_or_else(|| TreeError::NotFound(path.clone()))?;
        Ok(group.children.keys().cloned().collect())
    }

    fn read_attr(&self, path: &NodePath, name: &str) -> TreeResult<String> {
        let attr = path.join(name);
        let mut inner = self.lock();
        if let Some(remaining) = inner.failing_reads.get_mut(&attr) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TreeError::NotFound(attr));
            }
        }

        inner
            .group(path)
            .and_then(|group| group.attrs.get(name))
            .cloned()
            .ok_or(TreeError::NotFound(attr))
    }

    fn write_attr(&self, path: &NodePath, name: &str, value: &str) -> TreeResult<()> {
        let mut inner = self.lock();
        if inner.rejected_writes.contains(name) {
            return Err(TreeError::PermissionDenied(path.join(name)));
        }
        let group = inner
            .group_mut(path)
            .ok_or_else(|| TreeError::NotFound(path.clone()))?;
        group.attrs.insert(name.to_string(), value.to_string());
        inner.journal.push(format!("write {}={}", path.join(name), value));
        Ok(())
    }

    fn read_link(&self, path: &NodePath) -> TreeResult<NodePath> {
        let inner = self.lock();
        match inner.node(path) {
            Some(Node::Link(target)) if inner.node(target).is_some() => Ok(target.clone()),
            _ => Err(TreeError::NotFound(path.clone())),
        }
    }

    fn exists(&self, path: &NodePath) -> bool {
        path.is_root() || self.lock().node(path).is_some()
    }
}
