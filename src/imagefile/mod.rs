//! # Image File Container
//!
//! An [`ImageFile`] is one open E57 container: it owns the checked paged
//! file, the typed-node document tree, and the writer/reader session slots.
//!
//! ## Lifecycle
//!
//! ```text
//! create(path)          open(path)
//!     │                     │
//!     ▼                     ▼
//!  write mode           read mode
//!  header placeholder   header verified (signature, version, length)
//!  empty root tree      XML section parsed into the tree
//!     │                     │
//!  build tree,          reader sessions
//!  writer sessions          │
//!     │                     ▼
//!     ▼                  close()
//!  close(): XML section appended, header patched, pages flushed
//! ```
//!
//! ## Session slots
//!
//! A container allows at most one open writer XOR one open reader across
//! all of its compressed vectors. The slot counters live behind one lock so
//! the check and the increment are a single step; violations surface as
//! `TooManyWriters`/`TooManyReaders` at session open.
//!
//! ## Quick Start
//!
//! ```ignore
//! let imf = ImageFile::create("scan.e57")?;
//! let points = imf.new_compressed_vector();
//! let proto = imf.new_structure();
//! proto.set_child("x", &imf.new_integer(0, 1000))?;
//! points.set_prototype(&proto)?;
//! imf.root().set_child("points", &points)?;
//!
//! let mut writer = points.writer(vec![
//!     SourceDestBuffer::i64_values("x", vec![1, 2, 3]),
//! ])?;
//! writer.write(3)?;
//! writer.close()?;
//! imf.close()?;
//! ```

use std::path::Path;
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::config::FILE_HEADER_SIZE;
use crate::error::Result;
use crate::node::{parse_xml_tree, tree_to_xml, FloatPrecision, Node, NodeKind};
use crate::storage::{logical_to_physical, physical_to_logical, CheckedFile, FileHeader};

use zerocopy::IntoBytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Write,
    Read,
}

struct FileState {
    open: bool,
    writer_count: usize,
    reader_count: usize,
}

pub(crate) struct ImageFileInner {
    file_name: String,
    mode: Mode,
    cf: Mutex<CheckedFile>,
    state: Mutex<FileState>,
    root: OnceLock<Node>,
}

impl ImageFileInner {
    pub(crate) fn file_name(&self) -> &str {
        &self.file_name
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub(crate) fn is_writer(&self) -> bool {
        self.mode == Mode::Write
    }

    pub(crate) fn writer_count(&self) -> usize {
        self.state.lock().writer_count
    }

    pub(crate) fn reader_count(&self) -> usize {
        self.state.lock().reader_count
    }

    pub(crate) fn cf(&self) -> MutexGuard<'_, CheckedFile> {
        self.cf.lock()
    }

    /// Fails if any session is open on this container.
    pub(crate) fn check_no_sessions(&self) -> Result<()> {
        let state = self.state.lock();
        e57_ensure!(
            state.writer_count == 0,
            TooManyWriters,
            "fileName={} writerCount={} readerCount={}",
            self.file_name,
            state.writer_count,
            state.reader_count
        );
        e57_ensure!(
            state.reader_count == 0,
            TooManyReaders,
            "fileName={} writerCount={} readerCount={}",
            self.file_name,
            state.writer_count,
            state.reader_count
        );
        Ok(())
    }

    /// Check-and-increment in one step: the writer slot.
    pub(crate) fn acquire_writer(&self) -> Result<()> {
        let mut state = self.state.lock();
        e57_ensure!(
            state.writer_count == 0,
            TooManyWriters,
            "fileName={} writerCount={} readerCount={}",
            self.file_name,
            state.writer_count,
            state.reader_count
        );
        e57_ensure!(
            state.reader_count == 0,
            TooManyReaders,
            "fileName={} writerCount={} readerCount={}",
            self.file_name,
            state.writer_count,
            state.reader_count
        );
        state.writer_count += 1;
        Ok(())
    }

    pub(crate) fn release_writer(&self) {
        let mut state = self.state.lock();
        state.writer_count = state.writer_count.saturating_sub(1);
    }

    /// Check-and-increment in one step: the reader slot.
    pub(crate) fn acquire_reader(&self) -> Result<()> {
        let mut state = self.state.lock();
        e57_ensure!(
            state.writer_count == 0,
            TooManyWriters,
            "fileName={} writerCount={} readerCount={}",
            self.file_name,
            state.writer_count,
            state.reader_count
        );
        e57_ensure!(
            state.reader_count == 0,
            TooManyReaders,
            "fileName={} writerCount={} readerCount={}",
            self.file_name,
            state.writer_count,
            state.reader_count
        );
        state.reader_count += 1;
        Ok(())
    }

    pub(crate) fn release_reader(&self) {
        let mut state = self.state.lock();
        state.reader_count = state.reader_count.saturating_sub(1);
    }
}

/// One open E57 container.
pub struct ImageFile {
    inner: Arc<ImageFileInner>,
}

impl std::fmt::Debug for ImageFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageFile")
            .field("file_name", &self.file_name())
            .finish()
    }
}

impl ImageFile {
    /// Creates (truncating) a container for writing. The document tree
    /// starts as an empty attached root structure.
    pub fn create(path: impl AsRef<Path>) -> Result<ImageFile> {
        let path = path.as_ref();
        let mut cf = CheckedFile::create(path)?;
        cf.write(0, FileHeader::new().as_bytes())?;

        let inner = Arc::new(ImageFileInner {
            file_name: path.display().to_string(),
            mode: Mode::Write,
            cf: Mutex::new(cf),
            state: Mutex::new(FileState {
                open: true,
                writer_count: 0,
                reader_count: 0,
            }),
            root: OnceLock::new(),
        });

        let root = Node::from_kind(
            Arc::downgrade(&inner),
            NodeKind::Structure {
                children: parking_lot::RwLock::new(Vec::new()),
            },
        );
        root.set_attached_recursive();
        let _ = inner.root.set(root);

        debug!(file = %inner.file_name, "created image file");
        Ok(ImageFile { inner })
    }

    /// Opens an existing container read-only: verifies the header and
    /// parses the XML section into the document tree.
    pub fn open(path: impl AsRef<Path>) -> Result<ImageFile> {
        let path = path.as_ref();
        let mut cf = CheckedFile::open(path)?;
        let file_name = path.display().to_string();

        e57_ensure!(
            cf.logical_length() >= FILE_HEADER_SIZE as u64,
            BadFileLength,
            "fileName={} logicalLength={}",
            file_name,
            cf.logical_length()
        );
        let mut header_bytes = [0u8; FILE_HEADER_SIZE];
        cf.read(0, &mut header_bytes)?;
        let header = FileHeader::from_bytes(&header_bytes, &file_name)?;
        e57_ensure!(
            header.file_physical_length() == cf.physical_length(),
            BadFileLength,
            "fileName={} headerLength={} observedLength={}",
            file_name,
            header.file_physical_length(),
            cf.physical_length()
        );

        let xml_logical = physical_to_logical(header.xml_physical_offset());
        let mut xml = vec![0u8; header.xml_logical_length() as usize];
        cf.read(xml_logical, &mut xml)?;

        let inner = Arc::new(ImageFileInner {
            file_name,
            mode: Mode::Read,
            cf: Mutex::new(cf),
            state: Mutex::new(FileState {
                open: true,
                writer_count: 0,
                reader_count: 0,
            }),
            root: OnceLock::new(),
        });

        let root = parse_xml_tree(&xml, Arc::downgrade(&inner))?;
        root.set_attached_recursive();
        let _ = inner.root.set(root);

        debug!(file = %inner.file_name, "opened image file");
        Ok(ImageFile { inner })
    }

    /// The attached root structure of the document tree.
    pub fn root(&self) -> Node {
        self.inner
            .root
            .get()
            .cloned()
            .expect("root is installed before the handle escapes") // INVARIANT: set in create/open
    }

    pub fn file_name(&self) -> &str {
        self.inner.file_name()
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    pub fn is_writer(&self) -> bool {
        self.inner.is_writer()
    }

    pub fn writer_count(&self) -> usize {
        self.inner.writer_count()
    }

    pub fn reader_count(&self) -> usize {
        self.inner.reader_count()
    }

    /// Finalizes the container. A write-mode container serializes the XML
    /// section after the last binary section and patches the file header.
    pub fn close(&self) -> Result<()> {
        {
            let state = self.inner.state.lock();
            e57_ensure!(state.open, ImageFileNotOpen, "fileName={}", self.file_name());
            e57_ensure!(
                state.writer_count == 0 && state.reader_count == 0,
                CloseFailed,
                "fileName={} writerCount={} readerCount={}",
                self.file_name(),
                state.writer_count,
                state.reader_count
            );
        }

        if self.inner.is_writer() {
            let xml = tree_to_xml(&self.root());
            let mut cf = self.inner.cf();
            let xml_logical_offset = cf.logical_length();
            cf.write(xml_logical_offset, xml.as_bytes())?;

            let mut header = FileHeader::new();
            header.set_xml_physical_offset(logical_to_physical(xml_logical_offset));
            header.set_xml_logical_length(xml.len() as u64);
            header.set_file_physical_length(cf.physical_length());
            cf.write(0, header.as_bytes())?;
            cf.flush()?;
            debug!(
                file = %self.file_name(),
                xml_bytes = xml.len(),
                "closed image file"
            );
        }

        self.inner.state.lock().open = false;
        Ok(())
    }

    // -- node factories ------------------------------------------------------

    pub fn new_integer(&self, min: i64, max: i64) -> Node {
        Node::from_kind(
            Arc::downgrade(&self.inner),
            NodeKind::Integer { min, max },
        )
    }

    pub fn new_scaled_integer(&self, min: i64, max: i64, scale: f64, offset: f64) -> Node {
        Node::from_kind(
            Arc::downgrade(&self.inner),
            NodeKind::ScaledInteger {
                min,
                max,
                scale,
                offset,
            },
        )
    }

    pub fn new_float(&self, precision: FloatPrecision, min: f64, max: f64) -> Node {
        Node::from_kind(
            Arc::downgrade(&self.inner),
            NodeKind::Float {
                precision,
                min,
                max,
            },
        )
    }

    /// Full-range 32-bit float field.
    pub fn new_float_single(&self) -> Node {
        self.new_float(
            FloatPrecision::Single,
            -f32::MAX as f64,
            f32::MAX as f64,
        )
    }

    /// Full-range 64-bit float field.
    pub fn new_float_double(&self) -> Node {
        self.new_float(FloatPrecision::Double, -f64::MAX, f64::MAX)
    }

    pub fn new_string_value(&self, value: impl Into<String>) -> Node {
        Node::from_kind(
            Arc::downgrade(&self.inner),
            NodeKind::String {
                value: value.into(),
            },
        )
    }

    pub fn new_structure(&self) -> Node {
        Node::from_kind(
            Arc::downgrade(&self.inner),
            NodeKind::Structure {
                children: parking_lot::RwLock::new(Vec::new()),
            },
        )
    }

    pub fn new_vector(&self, homogeneous: bool) -> Node {
        Node::from_kind(
            Arc::downgrade(&self.inner),
            NodeKind::Vector {
                homogeneous,
                children: parking_lot::RwLock::new(Vec::new()),
            },
        )
    }

    pub fn new_compressed_vector(&self) -> Node {
        Node::from_kind(
            Arc::downgrade(&self.inner),
            NodeKind::CompressedVector {
                state: Mutex::new(crate::node::CvState {
                    prototype: None,
                    codecs: None,
                    record_count: 0,
                    binary_section_logical_start: 0,
                }),
            },
        )
    }

    pub fn new_blob(&self, length: u64) -> Node {
        Node::from_kind(Arc::downgrade(&self.inner), NodeKind::Blob { length })
    }
}

impl Drop for ImageFile {
    fn drop(&mut self) {
        if self.inner.is_open() && self.inner.is_writer() {
            warn!(
                file = %self.file_name(),
                "image file dropped without close; XML section not written"
            );
        }
    }
}
