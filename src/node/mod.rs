//! # Typed Node Tree
//!
//! This module provides the typed-node document tree of an E57 container.
//! A [`Node`] is a cheap clone handle over shared state; the node kind is a
//! tagged variant rather than a class hierarchy, and the tree operations
//! (`write_xml`, `is_type_equivalent`, `set_attached_recursive`) dispatch on
//! the tag.
//!
//! ## Ownership
//!
//! ```text
//! ImageFile ──strong──> root Structure ──strong──> children
//!     ▲                        │
//!     └────────weak────────────┘  (every node holds a weak container ref)
//!
//! CompressedVector ──strong──> prototype tree (root, not parented)
//!                  ──strong──> codecs tree    (root, not parented)
//! ```
//!
//! Children hold weak references to their parent and to their destination
//! container; strong ownership goes container→tree and compressed
//! vector→prototype/codecs. This breaks every cycle without reference
//! counting hacks.
//!
//! ## Attachment
//!
//! Nodes are created unattached and parentless. Insertion under an attached
//! parent marks the subtree attached; a compressed vector additionally marks
//! its prototype and codecs trees. Only attached vectors may open reader or
//! writer sessions.
//!
//! ## Values
//!
//! Outside a binary section the tree is pure schema: numeric nodes carry
//! bounds, scale, and offset but no value. `String` nodes carry a UTF-8
//! value so that codec entries can name prototype paths and metadata
//! strings survive an XML round trip.

mod parse;
pub(crate) mod xml;

pub(crate) use parse::parse_xml_tree;
pub(crate) use xml::tree_to_xml;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::imagefile::ImageFileInner;

/// Tag identifying the kind of a [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Structure,
    Vector,
    CompressedVector,
    Integer,
    ScaledInteger,
    Float,
    String,
    Blob,
}

impl NodeType {
    pub fn name(&self) -> &'static str {
        match self {
            NodeType::Structure => "Structure",
            NodeType::Vector => "Vector",
            NodeType::CompressedVector => "CompressedVector",
            NodeType::Integer => "Integer",
            NodeType::ScaledInteger => "ScaledInteger",
            NodeType::Float => "Float",
            NodeType::String => "String",
            NodeType::Blob => "Blob",
        }
    }
}

/// IEEE-754 width of a float field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatPrecision {
    Single,
    Double,
}

pub(crate) struct CvState {
    pub prototype: Option<Node>,
    pub codecs: Option<Node>,
    pub record_count: u64,
    pub binary_section_logical_start: u64,
}

pub(crate) enum NodeKind {
    Integer {
        min: i64,
        max: i64,
    },
    ScaledInteger {
        min: i64,
        max: i64,
        scale: f64,
        offset: f64,
    },
    Float {
        precision: FloatPrecision,
        min: f64,
        max: f64,
    },
    String {
        value: String,
    },
    Vector {
        homogeneous: bool,
        children: RwLock<Vec<Node>>,
    },
    Structure {
        children: RwLock<Vec<Node>>,
    },
    CompressedVector {
        state: Mutex<CvState>,
    },
    Blob {
        length: u64,
    },
}

pub(crate) struct NodeInner {
    element_name: RwLock<String>,
    parent: RwLock<Weak<NodeInner>>,
    attached: AtomicBool,
    dest: Weak<ImageFileInner>,
    pub(crate) kind: NodeKind,
}

/// Handle to one node of the typed tree. Cloning is cheap and clones refer
/// to the same underlying node.
#[derive(Clone)]
pub struct Node {
    pub(crate) inner: Arc<NodeInner>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("type", &self.node_type().name())
            .field("path", &self.path_name())
            .field("attached", &self.is_attached())
            .finish()
    }
}

fn well_formed_element_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl Node {
    pub(crate) fn from_kind(dest: Weak<ImageFileInner>, kind: NodeKind) -> Node {
        Node {
            inner: Arc::new(NodeInner {
                element_name: RwLock::new(String::new()),
                parent: RwLock::new(Weak::new()),
                attached: AtomicBool::new(false),
                dest,
                kind,
            }),
        }
    }

    pub fn node_type(&self) -> NodeType {
        match &self.inner.kind {
            NodeKind::Integer { .. } => NodeType::Integer,
            NodeKind::ScaledInteger { .. } => NodeType::ScaledInteger,
            NodeKind::Float { .. } => NodeType::Float,
            NodeKind::String { .. } => NodeType::String,
            NodeKind::Vector { .. } => NodeType::Vector,
            NodeKind::Structure { .. } => NodeType::Structure,
            NodeKind::CompressedVector { .. } => NodeType::CompressedVector,
            NodeKind::Blob { .. } => NodeType::Blob,
        }
    }

    pub fn element_name(&self) -> String {
        self.inner.element_name.read().clone()
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.read().upgrade().is_none()
    }

    pub fn is_attached(&self) -> bool {
        self.inner.attached.load(Ordering::Relaxed)
    }

    /// Absolute path within the document tree, `/` for a root node.
    pub fn path_name(&self) -> String {
        let mut segments = Vec::new();
        let mut current = self.inner.clone();
        loop {
            let parent = current.parent.read().upgrade();
            match parent {
                Some(p) => {
                    segments.push(current.element_name.read().clone());
                    current = p;
                }
                None => break,
            }
        }
        if segments.is_empty() {
            return "/".to_string();
        }
        let mut path = String::new();
        for seg in segments.iter().rev() {
            path.push('/');
            path.push_str(seg);
        }
        path
    }

    pub(crate) fn dest_upgraded(&self) -> Result<Arc<ImageFileInner>> {
        match self.inner.dest.upgrade() {
            Some(imf) => Ok(imf),
            None => e57_bail!(ImageFileNotOpen, "pathName={}", self.path_name()),
        }
    }

    pub(crate) fn same_dest(&self, other: &Node) -> bool {
        Weak::ptr_eq(&self.inner.dest, &other.inner.dest)
    }

    pub(crate) fn check_image_file_open(&self) -> Result<()> {
        let imf = self.dest_upgraded()?;
        e57_ensure!(
            imf.is_open(),
            ImageFileNotOpen,
            "fileName={} pathName={}",
            imf.file_name(),
            self.path_name()
        );
        Ok(())
    }

    /// Marks this node and every node reachable from it as attached. A
    /// compressed vector also marks its referenced prototype and codecs
    /// trees.
    pub fn set_attached_recursive(&self) {
        self.inner.attached.store(true, Ordering::Relaxed);
        match &self.inner.kind {
            NodeKind::Structure { children } | NodeKind::Vector { children, .. } => {
                for child in children.read().iter() {
                    child.set_attached_recursive();
                }
            }
            NodeKind::CompressedVector { state } => {
                let state = state.lock();
                if let Some(proto) = &state.prototype {
                    proto.set_attached_recursive();
                }
                if let Some(codecs) = &state.codecs {
                    codecs.set_attached_recursive();
                }
            }
            _ => {}
        }
    }

    /// Number of children for container nodes; the record count for a
    /// compressed vector; 0 for leaves.
    pub fn child_count(&self) -> Result<u64> {
        self.check_image_file_open()?;
        Ok(match &self.inner.kind {
            NodeKind::Structure { children } | NodeKind::Vector { children, .. } => {
                children.read().len() as u64
            }
            NodeKind::CompressedVector { state } => state.lock().record_count,
            _ => 0,
        })
    }

    /// Child at `index` of a structure or vector.
    pub fn child(&self, index: usize) -> Result<Node> {
        self.check_image_file_open()?;
        match &self.inner.kind {
            NodeKind::Structure { children } | NodeKind::Vector { children, .. } => {
                let children = children.read();
                match children.get(index) {
                    Some(child) => Ok(child.clone()),
                    None => e57_bail!(
                        ChildIndexOutOfBounds,
                        "pathName={} index={} childCount={}",
                        self.path_name(),
                        index,
                        children.len()
                    ),
                }
            }
            _ => e57_bail!(
                BadNodeDowncast,
                "pathName={} type={}",
                self.path_name(),
                self.node_type().name()
            ),
        }
    }

    /// Named child of a structure.
    pub fn get(&self, name: &str) -> Result<Node> {
        self.check_image_file_open()?;
        match &self.inner.kind {
            NodeKind::Structure { children } => {
                let children = children.read();
                for child in children.iter() {
                    if child.element_name() == name {
                        return Ok(child.clone());
                    }
                }
                e57_bail!(PathUndefined, "pathName={} name={}", self.path_name(), name)
            }
            _ => e57_bail!(
                BadNodeDowncast,
                "pathName={} type={}",
                self.path_name(),
                self.node_type().name()
            ),
        }
    }

    /// Whether a named child exists. A compressed vector exposes no
    /// per-field addressing at the node level.
    pub fn is_defined(&self, name: &str) -> Result<bool> {
        match &self.inner.kind {
            NodeKind::Structure { children } => Ok(children
                .read()
                .iter()
                .any(|child| child.element_name() == name)),
            NodeKind::CompressedVector { .. } => e57_bail!(
                NotImplemented,
                "pathName={} name={}",
                self.path_name(),
                name
            ),
            _ => Ok(false),
        }
    }

    fn check_insertable(&self, child: &Node) -> Result<()> {
        let imf = self.dest_upgraded()?;
        e57_ensure!(
            imf.is_open(),
            ImageFileNotOpen,
            "fileName={}",
            imf.file_name()
        );
        e57_ensure!(imf.is_writer(), FileReadOnly, "fileName={}", imf.file_name());
        e57_ensure!(
            child.is_root(),
            AlreadyHasParent,
            "pathName={} childPathName={}",
            self.path_name(),
            child.path_name()
        );
        e57_ensure!(
            self.same_dest(child),
            DifferentDestImageFile,
            "pathName={}",
            self.path_name()
        );
        Ok(())
    }

    fn link_child(&self, child: &Node, name: String) {
        *child.inner.element_name.write() = name;
        *child.inner.parent.write() = Arc::downgrade(&self.inner);
        if self.is_attached() {
            child.set_attached_recursive();
        }
    }

    /// Adds a named child to a structure. A name can be set once.
    pub fn set_child(&self, name: &str, child: &Node) -> Result<()> {
        self.check_insertable(child)?;
        e57_ensure!(
            well_formed_element_name(name),
            BadPathName,
            "pathName={} name={}",
            self.path_name(),
            name
        );
        match &self.inner.kind {
            NodeKind::Structure { children } => {
                let mut children = children.write();
                e57_ensure!(
                    !children.iter().any(|c| c.element_name() == name),
                    SetTwice,
                    "pathName={} name={}",
                    self.path_name(),
                    name
                );
                self.link_child(child, name.to_string());
                children.push(child.clone());
                Ok(())
            }
            _ => e57_bail!(
                BadNodeDowncast,
                "pathName={} type={}",
                self.path_name(),
                self.node_type().name()
            ),
        }
    }

    /// Appends a child to a vector. A homogeneous vector rejects children
    /// whose type differs from the existing ones.
    pub fn append(&self, child: &Node) -> Result<()> {
        self.check_insertable(child)?;
        match &self.inner.kind {
            NodeKind::Vector {
                homogeneous,
                children,
            } => {
                let mut children = children.write();
                if *homogeneous {
                    if let Some(first) = children.first() {
                        e57_ensure!(
                            first.is_type_equivalent(child),
                            HomogeneousViolation,
                            "pathName={} childType={}",
                            self.path_name(),
                            child.node_type().name()
                        );
                    }
                }
                let index = children.len();
                self.link_child(child, format!("{}", index));
                children.push(child.clone());
                Ok(())
            }
            _ => e57_bail!(
                BadNodeDowncast,
                "pathName={} type={}",
                self.path_name(),
                self.node_type().name()
            ),
        }
    }

    /// Structural equivalence: same type, same bounds/parameters, and
    /// recursively equivalent children. String values do not participate.
    pub fn is_type_equivalent(&self, other: &Node) -> bool {
        match (&self.inner.kind, &other.inner.kind) {
            (
                NodeKind::Integer { min, max },
                NodeKind::Integer {
                    min: omin,
                    max: omax,
                },
            ) => min == omin && max == omax,
            (
                NodeKind::ScaledInteger {
                    min,
                    max,
                    scale,
                    offset,
                },
                NodeKind::ScaledInteger {
                    min: omin,
                    max: omax,
                    scale: oscale,
                    offset: ooffset,
                },
            ) => min == omin && max == omax && scale == oscale && offset == ooffset,
            (
                NodeKind::Float {
                    precision,
                    min,
                    max,
                },
                NodeKind::Float {
                    precision: oprecision,
                    min: omin,
                    max: omax,
                },
            ) => precision == oprecision && min == omin && max == omax,
            (NodeKind::String { .. }, NodeKind::String { .. }) => true,
            (NodeKind::Blob { length }, NodeKind::Blob { length: olength }) => length == olength,
            (
                NodeKind::Vector {
                    homogeneous,
                    children,
                },
                NodeKind::Vector {
                    homogeneous: ohomogeneous,
                    children: ochildren,
                },
            ) => {
                if homogeneous != ohomogeneous {
                    return false;
                }
                let a = children.read();
                let b = ochildren.read();
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.is_type_equivalent(y))
            }
            (
                NodeKind::Structure { children },
                NodeKind::Structure {
                    children: ochildren,
                },
            ) => {
                let a = children.read();
                let b = ochildren.read();
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| {
                        x.element_name() == y.element_name() && x.is_type_equivalent(y)
                    })
            }
            (
                NodeKind::CompressedVector { state },
                NodeKind::CompressedVector { state: ostate },
            ) => {
                let a = state.lock();
                let b = ostate.lock();
                if a.record_count != b.record_count {
                    return false;
                }
                let protos_match = match (&a.prototype, &b.prototype) {
                    (Some(x), Some(y)) => x.is_type_equivalent(y),
                    (None, None) => true,
                    _ => false,
                };
                let codecs_match = match (&a.codecs, &b.codecs) {
                    (Some(x), Some(y)) => x.is_type_equivalent(y),
                    (None, None) => true,
                    _ => false,
                };
                protos_match && codecs_match
            }
            _ => false,
        }
    }

    /// Verifies that every leaf of this subtree appears in `paths`
    /// (record-relative dotted names). Called on a prototype during writer
    /// construction; a compressed vector may not itself appear inside a
    /// prototype.
    pub(crate) fn check_leaves_in_set(
        &self,
        prefix: &str,
        paths: &hashbrown::HashSet<String>,
    ) -> Result<()> {
        match &self.inner.kind {
            NodeKind::Structure { children } | NodeKind::Vector { children, .. } => {
                for child in children.read().iter() {
                    let name = child.element_name();
                    let child_path = if prefix.is_empty() {
                        name
                    } else {
                        format!("{}.{}", prefix, name)
                    };
                    child.check_leaves_in_set(&child_path, paths)?;
                }
                Ok(())
            }
            NodeKind::CompressedVector { .. } => {
                e57_bail!(Internal, "pathName={}", self.path_name())
            }
            _ => {
                e57_ensure!(
                    paths.contains(prefix),
                    NoBufferForElement,
                    "fieldPath={}",
                    prefix
                );
                Ok(())
            }
        }
    }

    // -- typed parameter accessors ------------------------------------------

    pub fn integer_bounds(&self) -> Result<(i64, i64)> {
        match &self.inner.kind {
            NodeKind::Integer { min, max } => Ok((*min, *max)),
            _ => e57_bail!(
                BadNodeDowncast,
                "pathName={} type={}",
                self.path_name(),
                self.node_type().name()
            ),
        }
    }

    pub fn scaled_integer_params(&self) -> Result<(i64, i64, f64, f64)> {
        match &self.inner.kind {
            NodeKind::ScaledInteger {
                min,
                max,
                scale,
                offset,
            } => Ok((*min, *max, *scale, *offset)),
            _ => e57_bail!(
                BadNodeDowncast,
                "pathName={} type={}",
                self.path_name(),
                self.node_type().name()
            ),
        }
    }

    pub fn float_params(&self) -> Result<(FloatPrecision, f64, f64)> {
        match &self.inner.kind {
            NodeKind::Float {
                precision,
                min,
                max,
            } => Ok((*precision, *min, *max)),
            _ => e57_bail!(
                BadNodeDowncast,
                "pathName={} type={}",
                self.path_name(),
                self.node_type().name()
            ),
        }
    }

    pub fn string_value(&self) -> Result<String> {
        match &self.inner.kind {
            NodeKind::String { value } => Ok(value.clone()),
            _ => e57_bail!(
                BadNodeDowncast,
                "pathName={} type={}",
                self.path_name(),
                self.node_type().name()
            ),
        }
    }

    pub fn blob_length(&self) -> Result<u64> {
        match &self.inner.kind {
            NodeKind::Blob { length } => Ok(*length),
            _ => e57_bail!(
                BadNodeDowncast,
                "pathName={} type={}",
                self.path_name(),
                self.node_type().name()
            ),
        }
    }

    /// Children snapshot of a structure or vector, empty for other kinds.
    pub fn children(&self) -> Vec<Node> {
        match &self.inner.kind {
            NodeKind::Structure { children } | NodeKind::Vector { children, .. } => {
                children.read().clone()
            }
            _ => Vec::new(),
        }
    }
}
