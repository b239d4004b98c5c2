//! # Checked Paged File I/O
//!
//! This module provides [`CheckedFile`], the foundation of every file
//! access: a paged view of the backing file where each 1024-byte physical
//! page ends with a CRC-32C checksum over its 1020 payload bytes.
//!
//! ## Logical vs physical addressing
//!
//! The *logical* address space is the concatenation of page payloads; the
//! *physical* address space is the raw file, checksums included. The
//! translation is pure arithmetic, never table-based:
//!
//! ```text
//! physical = logical / 1020 * 1024 + logical % 1020
//! logical  = physical / 1024 * 1020 + physical % 1024   (payload bytes only)
//!
//! physical page:  +------------- 1020 payload -------------+--CRC32C--+
//! logical view:   +------------- 1020 payload -------------+
//! ```
//!
//! ## Page cache
//!
//! An arena-style dirty-page cache sits over the backing file: a map from
//! page number to a boxed page with a dirty bit. Checksums are recomputed
//! lazily at page flush and verified on every page faulted in from disk, so
//! a torn or corrupted page surfaces as `BadChecksum` at the first read
//! that touches it.
//!
//! ## Failure modes
//!
//! - `BadChecksum`: a spanned page's stored CRC does not match its payload
//! - `ReadFailed` / `WriteFailed` / `SeekFailed`: the underlying I/O call
//!   failed; the OS error text is preserved in the context
//!
//! The cache grows with the working set of a session; writer sessions flush
//! eagerly at packet granularity so the resident set stays small.

mod header;

pub(crate) use header::{FileHeader, SectionHeader};

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crc::{Crc, CRC_32_ISCSI};
use hashbrown::HashMap;
use tracing::trace;

use crate::config::{LOGICAL_PAGE_SIZE, PHYSICAL_PAGE_SIZE};
use crate::error::Result;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Translates a logical offset (checksums excluded) to the physical file
/// offset.
#[inline]
pub fn logical_to_physical(logical: u64) -> u64 {
    let page = logical / LOGICAL_PAGE_SIZE as u64;
    let within = logical % LOGICAL_PAGE_SIZE as u64;
    page * PHYSICAL_PAGE_SIZE as u64 + within
}

/// Translates a physical file offset back to its logical offset. The
/// physical offset must not point into a checksum slot.
#[inline]
pub fn physical_to_logical(physical: u64) -> u64 {
    let page = physical / PHYSICAL_PAGE_SIZE as u64;
    let within = physical % PHYSICAL_PAGE_SIZE as u64;
    page * LOGICAL_PAGE_SIZE as u64 + within.min(LOGICAL_PAGE_SIZE as u64 - 1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpenMode {
    Write,
    Read,
}

struct Page {
    data: Box<[u8; PHYSICAL_PAGE_SIZE]>,
    dirty: bool,
}

/// Paged block I/O with a per-page CRC-32C, exposing a contiguous logical
/// byte stream.
pub(crate) struct CheckedFile {
    file: File,
    file_name: String,
    mode: OpenMode,
    pages: HashMap<u64, Page>,
    /// One past the highest logical byte written or present on disk.
    logical_length: u64,
    /// Number of whole physical pages on disk.
    disk_pages: u64,
}

impl CheckedFile {
    /// Creates (truncating) a file for writing.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| {
                crate::error::Error::io(
                    crate::error::ErrorCode::OpenFailed,
                    format!("fileName={}", path.display()),
                    e,
                )
            })?;
        Ok(Self {
            file,
            file_name: path.display().to_string(),
            mode: OpenMode::Write,
            pages: HashMap::new(),
            logical_length: 0,
            disk_pages: 0,
        })
    }

    /// Opens an existing file read-only. The physical length must be a
    /// whole number of pages; the caller validates it against the header.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path).map_err(|e| {
            crate::error::Error::io(
                crate::error::ErrorCode::OpenFailed,
                format!("fileName={}", path.display()),
                e,
            )
        })?;
        let physical_length = file
            .metadata()
            .map_err(|e| {
                crate::error::Error::io(
                    crate::error::ErrorCode::OpenFailed,
                    format!("fileName={}", path.display()),
                    e,
                )
            })?
            .len();
        e57_ensure!(
            physical_length % PHYSICAL_PAGE_SIZE as u64 == 0,
            BadFileLength,
            "fileName={} physicalLength={}",
            path.display(),
            physical_length
        );
        let disk_pages = physical_length / PHYSICAL_PAGE_SIZE as u64;
        Ok(Self {
            file,
            file_name: path.display().to_string(),
            mode: OpenMode::Read,
            pages: HashMap::new(),
            logical_length: disk_pages * LOGICAL_PAGE_SIZE as u64,
            disk_pages,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// One past the highest logical byte available.
    pub fn logical_length(&self) -> u64 {
        self.logical_length
    }

    /// Physical length the file will have once flushed.
    pub fn physical_length(&self) -> u64 {
        let pages = self
            .logical_length
            .div_ceil(LOGICAL_PAGE_SIZE as u64)
            .max(self.disk_pages);
        pages * PHYSICAL_PAGE_SIZE as u64
    }

    fn page(&mut self, page_no: u64) -> Result<&mut Page> {
        if !self.pages.contains_key(&page_no) {
            let mut data = Box::new([0u8; PHYSICAL_PAGE_SIZE]);
            if page_no < self.disk_pages {
                self.file
                    .seek(SeekFrom::Start(page_no * PHYSICAL_PAGE_SIZE as u64))
                    .map_err(|e| {
                        crate::error::Error::io(
                            crate::error::ErrorCode::SeekFailed,
                            format!("fileName={} page={}", self.file_name, page_no),
                            e,
                        )
                    })?;
                self.file.read_exact(&mut data[..]).map_err(|e| {
                    crate::error::Error::io(
                        crate::error::ErrorCode::ReadFailed,
                        format!("fileName={} page={}", self.file_name, page_no),
                        e,
                    )
                })?;
                let stored = u32::from_le_bytes(data[LOGICAL_PAGE_SIZE..].try_into().unwrap());
                let computed = CRC32.checksum(&data[..LOGICAL_PAGE_SIZE]);
                e57_ensure!(
                    stored == computed,
                    BadChecksum,
                    "fileName={} page={} stored={:08x} computed={:08x}",
                    self.file_name,
                    page_no,
                    stored,
                    computed
                );
            }
            self.pages.insert(page_no, Page { data, dirty: false });
        }
        Ok(self.pages.get_mut(&page_no).unwrap()) // INVARIANT: inserted above
    }

    /// Reads `buf.len()` bytes starting at `logical_offset`.
    pub fn read(&mut self, logical_offset: u64, buf: &mut [u8]) -> Result<()> {
        let end = logical_offset + buf.len() as u64;
        e57_ensure!(
            end <= self.logical_length,
            ReadFailed,
            "fileName={} read past end: offset={} length={} logicalLength={}",
            self.file_name,
            logical_offset,
            buf.len(),
            self.logical_length
        );

        let mut filled = 0usize;
        let mut cursor = logical_offset;
        while filled < buf.len() {
            let page_no = cursor / LOGICAL_PAGE_SIZE as u64;
            let within = (cursor % LOGICAL_PAGE_SIZE as u64) as usize;
            let take = (LOGICAL_PAGE_SIZE - within).min(buf.len() - filled);
            let page = self.page(page_no)?;
            buf[filled..filled + take].copy_from_slice(&page.data[within..within + take]);
            filled += take;
            cursor += take as u64;
        }
        Ok(())
    }

    /// Writes `bytes` starting at `logical_offset`, extending the logical
    /// length as needed. Checksums are recomputed at flush.
    pub fn write(&mut self, logical_offset: u64, bytes: &[u8]) -> Result<()> {
        e57_ensure!(
            self.mode == OpenMode::Write,
            FileReadOnly,
            "fileName={}",
            self.file_name
        );

        let mut written = 0usize;
        let mut cursor = logical_offset;
        while written < bytes.len() {
            let page_no = cursor / LOGICAL_PAGE_SIZE as u64;
            let within = (cursor % LOGICAL_PAGE_SIZE as u64) as usize;
            let take = (LOGICAL_PAGE_SIZE - within).min(bytes.len() - written);
            let page = self.page(page_no)?;
            page.data[within..within + take].copy_from_slice(&bytes[written..written + take]);
            page.dirty = true;
            written += take;
            cursor += take as u64;
        }
        self.logical_length = self.logical_length.max(cursor);
        Ok(())
    }

    // -- little-endian typed helpers ----------------------------------------

    pub fn read_u16(&mut self, offset: u64) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read(offset, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&mut self, offset: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read(offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64(&mut self, offset: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read(offset, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_f32(&mut self, offset: u64) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32(offset)?))
    }

    pub fn read_f64(&mut self, offset: u64) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64(offset)?))
    }

    pub fn write_u16(&mut self, offset: u64, value: u16) -> Result<()> {
        self.write(offset, &value.to_le_bytes())
    }

    pub fn write_u32(&mut self, offset: u64, value: u32) -> Result<()> {
        self.write(offset, &value.to_le_bytes())
    }

    pub fn write_u64(&mut self, offset: u64, value: u64) -> Result<()> {
        self.write(offset, &value.to_le_bytes())
    }

    pub fn write_f32(&mut self, offset: u64, value: f32) -> Result<()> {
        self.write_u32(offset, value.to_bits())
    }

    pub fn write_f64(&mut self, offset: u64, value: f64) -> Result<()> {
        self.write_u64(offset, value.to_bits())
    }

    /// Flushes dirty pages (stamping checksums) and syncs the file.
    pub fn flush(&mut self) -> Result<()> {
        if self.mode == OpenMode::Read {
            return Ok(());
        }
        let mut dirty: Vec<u64> = self
            .pages
            .iter()
            .filter(|(_, p)| p.dirty)
            .map(|(&n, _)| n)
            .collect();
        dirty.sort_unstable();
        trace!(file = %self.file_name, pages = dirty.len(), "flushing dirty pages");

        for page_no in dirty {
            let page = self.pages.get_mut(&page_no).unwrap(); // INVARIANT: key from the map above
            let checksum = CRC32.checksum(&page.data[..LOGICAL_PAGE_SIZE]);
            page.data[LOGICAL_PAGE_SIZE..].copy_from_slice(&checksum.to_le_bytes());
            self.file
                .seek(SeekFrom::Start(page_no * PHYSICAL_PAGE_SIZE as u64))
                .map_err(|e| {
                    crate::error::Error::io(
                        crate::error::ErrorCode::SeekFailed,
                        format!("fileName={} page={}", self.file_name, page_no),
                        e,
                    )
                })?;
            self.file.write_all(&page.data[..]).map_err(|e| {
                crate::error::Error::io(
                    crate::error::ErrorCode::WriteFailed,
                    format!("fileName={} page={}", self.file_name, page_no),
                    e,
                )
            })?;
            page.dirty = false;
            self.disk_pages = self.disk_pages.max(page_no + 1);
        }

        self.file.sync_all().map_err(|e| {
            crate::error::Error::io(
                crate::error::ErrorCode::WriteFailed,
                format!("fileName={}", self.file_name),
                e,
            )
        })?;
        Ok(())
    }
}
