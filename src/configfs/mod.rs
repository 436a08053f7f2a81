//! Control tree access
//!
//! This module defines the ConfigTree trait over the kernel's hierarchical
//! configuration filesystem, plus a directory-backed and an in-memory
//! implementation.

pub mod fs;
pub mod memory;

use std::fmt;
use std::io;
use thiserror::Error;

pub use fs::ConfigFs;
pub use memory::MemoryTree;

/// Attempts made when reading an attribute that may briefly vanish after
/// its parent node was created.
pub const FLAKY_READ_ATTEMPTS: usize = 9;

/// Control tree errors
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("not found: {0}")]
    NotFound(NodePath),

    #[error("already exists: {0}")]
    AlreadyExists(NodePath),

    #[error("permission denied: {0}")]
    PermissionDenied(NodePath),

    #[error("not empty: {0}")]
    NotEmpty(NodePath),

    #[error("unexpected value {value:?} in {path}")]
    Malformed { path: NodePath, value: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: NodePath,
        #[source]
        source: io::Error,
    },
}

impl TreeError {
    /// Whether this error means the node or attribute does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, TreeError::NotFound(_))
    }

    pub fn malformed(path: &NodePath, name: &str, value: &str) -> Self {
        TreeError::Malformed {
            path: path.join(name),
            value: value.to_string(),
        }
    }

    /// Classify an I/O error raised while touching `path`
    pub fn from_io(path: &NodePath, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => TreeError::NotFound(path.clone()),
            io::ErrorKind::AlreadyExists => TreeError::AlreadyExists(path.clone()),
            io::ErrorKind::PermissionDenied => TreeError::PermissionDenied(path.clone()),
            io::ErrorKind::DirectoryNotEmpty => TreeError::NotEmpty(path.clone()),
            _ => TreeError::Io {
                path: path.clone(),
                source: err,
            },
        }
    }
}

/// Result type for control tree operations
pub type TreeResult<T> = Result<T, TreeError>;

/// Location of a node, relative to the root of the control tree
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodePath(Vec<String>);

impl NodePath {
    /// The tree root
    pub fn root() -> Self {
        NodePath(Vec::new())
    }

    /// Build a path from a slash separated string, ignoring empty components
    pub fn parse(s: &str) -> Self {
        NodePath(
            s.split('/')
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Append one or more slash separated components
    pub fn join(&self, child: &str) -> Self {
        let mut components = self.0.clone();
        components.extend(
            child
                .split('/')
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        );
        NodePath(components)
    }

    /// Parent path, or None at the root
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(NodePath(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Last component
    pub fn name(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// All components, root first
    pub fn components(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl fmt::Debug for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodePath({})", self)
    }
}

/// Kind of node to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// A directory-like group that can hold attributes and children
    Group,
    /// A link to another node in the same tree
    Link(NodePath),
}

/// Hierarchical key/attribute store - the kernel target control tree.
///
/// Handles are plain paths: nothing is cached, every call walks the tree
/// as it is right now.
pub trait ConfigTree: Send + Sync {
    /// Create a group or link. The parent must exist.
    fn create(&self, path: &NodePath, kind: NodeKind) -> TreeResult<()>;

    /// Delete a single group or link. Fails on groups that still hold
    /// children the caller created.
    fn delete(&self, path: &NodePath) -> TreeResult<()>;

    /// Names of child groups and links (attributes are not listed)
    fn list_children(&self, path: &NodePath) -> TreeResult<Vec<String>>;

    /// Read an attribute, without its trailing newline
    fn read_attr(&self, path: &NodePath, name: &str) -> TreeResult<String>;

    fn write_attr(&self, path: &NodePath, name: &str, value: &str) -> TreeResult<()>;

    /// Resolve a link to the node it points at
    fn read_link(&self, path: &NodePath) -> TreeResult<NodePath>;

    /// Whether a group or link exists at `path`
    fn exists(&self, path: &NodePath) -> bool;
}

/// Read an attribute that may be transiently missing.
///
/// Not-found results are retried immediately up to `attempts` times; if the
/// attribute never shows up the result is `Ok(None)` and the caller treats
/// the parent as absent. Other errors are returned as-is.
pub fn read_attr_retrying(
    tree: &dyn ConfigTree,
    path: &NodePath,
    name: &str,
    attempts: usize,
) -> TreeResult<Option<String>> {
    for attempt in 1..=attempts {
        match tree.read_attr(path, name) {
            Ok(value) => return Ok(Some(value)),
            Err(e) if e.is_not_found() => {
                log::debug!(
                    "{}/{} not readable yet (attempt {}/{})",
                    path,
                    name,
                    attempt,
                    attempts
                );
            }
            Err(e) => return Err(e),
        }
    }

    Ok(None)
}

/// List children, mapping a missing parent to an empty list
pub fn list_children_opt(tree: &dyn ConfigTree, path: &NodePath) -> TreeResult<Vec<String>> {
    match tree.list_children(path) {
        Ok(children) => Ok(children),
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_path_parse_and_join() {
        let path = NodePath::parse("/target/core//iblock_0/");
        assert_eq!(path.to_string(), "target/core/iblock_0");
        assert_eq!(path.name(), Some("iblock_0"));

        let child = path.join("disk/alua");
        assert_eq!(child.components().len(), 5);
        assert_eq!(child.parent().unwrap().to_string(), "target/core/iblock_0/disk");
        assert!(NodePath::root().parent().is_none());
    }

    #[test]
    fn test_retrying_read_tolerates_transient_absence() {
        let tree = MemoryTree::new();
        let hba = NodePath::parse("target/core/iblock_0");
        tree.seed_group(&hba);
        tree.write_attr(&hba, "hba_info", "HBA Index: 0 plugin: iblock").unwrap();
        tree.fail_reads(&hba, "hba_info", FLAKY_READ_ATTEMPTS - 1);

        let value = read_attr_retrying(&tree, &hba, "hba_info", FLAKY_READ_ATTEMPTS).unwrap();
        assert_eq!(value.as_deref(), Some("HBA Index: 0 plugin: iblock"));
    }

    #[test]
    fn test_retrying_read_gives_up() {
        let tree = MemoryTree::new();
        let hba = NodePath::parse("target/core/iblock_0");
        tree.seed_group(&hba);
        tree.write_attr(&hba, "hba_info", "HBA Index: 0 plugin: iblock").unwrap();
        tree.fail_reads(&hba, "hba_info", FLAKY_READ_ATTEMPTS);

        let value = read_attr_retrying(&tree, &hba, "hba_info", FLAKY_READ_ATTEMPTS).unwrap();
        assert!(value.is_none());

        // The next read succeeds again
        assert!(tree.read_attr(&hba, "hba_info").is_ok());
    }

    #[test]
    fn test_list_children_opt() {
        let tree = MemoryTree::new();
        let missing = NodePath::parse("target/iscsi");
        assert!(list_children_opt(&tree, &missing).unwrap().is_empty());
    }
}
