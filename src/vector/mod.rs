//! # Compressed Vector Node Operations
//!
//! This module implements the bulk-record surface of a compressed vector
//! node: attaching the prototype and codecs trees, and opening streaming
//! reader/writer sessions against the bound container.
//!
//! ## Attachment model
//!
//! The prototype and codecs trees are *referenced*, never parented: both
//! stay root nodes, owned strongly by the vector, and inherit the vector's
//! attached flag. Each can be set exactly once, must be root at that
//! moment, and must share the vector's destination container.
//!
//! ## Session rules
//!
//! A destination container admits at most one open writer XOR one open
//! reader, across *all* of its compressed vectors. `writer()` additionally
//! requires a writable container and a set prototype; `reader()` works on
//! read- or write-mode containers. Both take the full set of buffers up
//! front and bind them to prototype leaves by dotted record path.

pub mod buffer;
mod reader;
mod writer;

pub use reader::CompressedVectorReader;
pub use writer::CompressedVectorWriter;

use crate::error::Result;
use crate::node::{CvState, Node, NodeKind, NodeType};
use buffer::SourceDestBuffer;

impl Node {
    pub(crate) fn with_cv_state<R>(&self, f: impl FnOnce(&mut CvState) -> R) -> Result<R> {
        match &self.inner.kind {
            NodeKind::CompressedVector { state } => Ok(f(&mut state.lock())),
            _ => e57_bail!(
                BadNodeDowncast,
                "pathName={} type={}",
                self.path_name(),
                self.node_type().name()
            ),
        }
    }

    /// Sets the record schema. One-shot; the prototype must be a root node
    /// destined for the same container.
    pub fn set_prototype(&self, prototype: &Node) -> Result<()> {
        e57_ensure!(
            !self.with_cv_state(|state| state.prototype.is_some())?,
            SetTwice,
            "pathName={}",
            self.path_name()
        );
        e57_ensure!(
            prototype.is_root(),
            AlreadyHasParent,
            "pathName={} prototypePathName={}",
            self.path_name(),
            prototype.path_name()
        );
        e57_ensure!(
            self.same_dest(prototype),
            DifferentDestImageFile,
            "pathName={}",
            self.path_name()
        );
        self.with_cv_state(|state| state.prototype = Some(prototype.clone()))?;
        if self.is_attached() {
            prototype.set_attached_recursive();
        }
        Ok(())
    }

    /// Sets the per-field codec overrides. One-shot; the codecs node must
    /// be a root vector destined for the same container.
    pub fn set_codecs(&self, codecs: &Node) -> Result<()> {
        e57_ensure!(
            !self.with_cv_state(|state| state.codecs.is_some())?,
            SetTwice,
            "pathName={}",
            self.path_name()
        );
        e57_ensure!(
            codecs.node_type() == NodeType::Vector,
            BadCodecs,
            "pathName={} codecsType={}",
            self.path_name(),
            codecs.node_type().name()
        );
        e57_ensure!(
            codecs.is_root(),
            AlreadyHasParent,
            "pathName={} codecsPathName={}",
            self.path_name(),
            codecs.path_name()
        );
        e57_ensure!(
            self.same_dest(codecs),
            DifferentDestImageFile,
            "pathName={}",
            self.path_name()
        );
        self.with_cv_state(|state| state.codecs = Some(codecs.clone()))?;
        if self.is_attached() {
            codecs.set_attached_recursive();
        }
        Ok(())
    }

    /// The record schema, if set.
    pub fn prototype(&self) -> Result<Option<Node>> {
        self.check_image_file_open()?;
        self.with_cv_state(|state| state.prototype.clone())
    }

    /// The codec overrides, if set.
    pub fn codecs(&self) -> Result<Option<Node>> {
        self.check_image_file_open()?;
        self.with_cv_state(|state| state.codecs.clone())
    }

    /// Opens a streaming write session, binding `sbufs` to the prototype
    /// leaves. Exactly one buffer per leaf, all with the same capacity.
    pub fn writer(&self, sbufs: Vec<SourceDestBuffer>) -> Result<CompressedVectorWriter> {
        self.with_cv_state(|_| ())?; // downcast check
        self.check_image_file_open()?;
        let imf = self.dest_upgraded()?;

        imf.check_no_sessions()?;
        e57_ensure!(
            !sbufs.is_empty(),
            BadApiArgument,
            "fileName={} no source buffers",
            imf.file_name()
        );
        e57_ensure!(imf.is_writer(), FileReadOnly, "fileName={}", imf.file_name());
        e57_ensure!(
            self.is_attached(),
            NodeUnattached,
            "fileName={} pathName={}",
            imf.file_name(),
            self.path_name()
        );

        CompressedVectorWriter::open(self.clone(), imf, sbufs)
    }

    /// Opens a streaming read session, binding `dbufs` to prototype leaves.
    /// A subset of leaves may be bound; unbound fields are decoded and
    /// dropped.
    pub fn reader(&self, dbufs: Vec<SourceDestBuffer>) -> Result<CompressedVectorReader> {
        self.with_cv_state(|_| ())?; // downcast check
        self.check_image_file_open()?;
        let imf = self.dest_upgraded()?;

        imf.check_no_sessions()?;
        e57_ensure!(
            !dbufs.is_empty(),
            BadApiArgument,
            "fileName={} no destination buffers",
            imf.file_name()
        );
        e57_ensure!(
            self.is_attached(),
            NodeUnattached,
            "fileName={} pathName={}",
            imf.file_name(),
            self.path_name()
        );

        CompressedVectorReader::open(self.clone(), imf, dbufs)
    }
}
