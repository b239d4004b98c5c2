//! # On-Disk Header Definitions
//!
//! Type-safe, zerocopy-based header structs for the container. Each struct
//! maps one persisted layout exactly; all multi-byte fields are
//! little-endian via the zerocopy wrapper types, so reading a header is a
//! validated reinterpret of the bytes, never a field-by-field parse.
//!
//! ## File header (48 bytes, physical offset 0)
//!
//! ```text
//! Offset  Size  Field                 Description
//! ------  ----  --------------------  --------------------------------
//! 0       8     signature             "ASTM-E57"
//! 8       4     major                 format major version (1)
//! 12      4     minor                 format minor version (0)
//! 16      8     file_physical_length  must equal the observed length
//! 24      8     xml_physical_offset   physical start of the XML section
//! 32      8     xml_logical_length    logical byte count of the XML
//! 40      8     page_size             physical page size (1024)
//! ```
//!
//! ## Binary section header (32 bytes, at the section's logical start)
//!
//! ```text
//! Offset  Size  Field                   Description
//! ------  ----  ----------------------  ------------------------------
//! 0       1     section_id              1 = compressed-vector section
//! 1       7     reserved                zero
//! 8       8     section_logical_length  header + packets
//! 16      8     data_physical_offset    first data packet
//! 24      8     index_physical_offset   index packet, 0 if absent
//! ```

use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{
    COMPRESSED_VECTOR_SECTION_ID, FILE_HEADER_SIZE, FILE_SIGNATURE, PHYSICAL_PAGE_SIZE,
    SECTION_HEADER_SIZE, VERSION_MAJOR, VERSION_MINOR,
};
use crate::error::Result;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub(crate) struct FileHeader {
    signature: [u8; 8],
    major: U32,
    minor: U32,
    file_physical_length: U64,
    xml_physical_offset: U64,
    xml_logical_length: U64,
    page_size: U64,
}

const _: () = assert!(std::mem::size_of::<FileHeader>() == FILE_HEADER_SIZE);

impl FileHeader {
    pub fn new() -> Self {
        Self {
            signature: *FILE_SIGNATURE,
            major: U32::new(VERSION_MAJOR),
            minor: U32::new(VERSION_MINOR),
            file_physical_length: U64::new(0),
            xml_physical_offset: U64::new(0),
            xml_logical_length: U64::new(0),
            page_size: U64::new(PHYSICAL_PAGE_SIZE as u64),
        }
    }

    /// Reinterprets and validates header bytes read from a file.
    pub fn from_bytes(bytes: &[u8], file_name: &str) -> Result<Self> {
        e57_ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            BadFileLength,
            "fileName={} headerBytes={}",
            file_name,
            bytes.len()
        );
        let header = Self::read_from_bytes(&bytes[..FILE_HEADER_SIZE])
            .map_err(|_| crate::error::Error::new(crate::error::ErrorCode::Internal, "file header reinterpret"))?;

        e57_ensure!(
            &header.signature == FILE_SIGNATURE,
            BadFileSignature,
            "fileName={} signature={:?}",
            file_name,
            &header.signature
        );
        e57_ensure!(
            header.major.get() == VERSION_MAJOR && header.minor.get() == VERSION_MINOR,
            UnknownFileVersion,
            "fileName={} version={}.{}",
            file_name,
            header.major.get(),
            header.minor.get()
        );
        e57_ensure!(
            header.page_size.get() == PHYSICAL_PAGE_SIZE as u64,
            UnknownFileVersion,
            "fileName={} pageSize={}",
            file_name,
            header.page_size.get()
        );
        Ok(header)
    }

    zerocopy_accessors! {
        major: u32,
        minor: u32,
        file_physical_length: u64,
        xml_physical_offset: u64,
        xml_logical_length: u64,
        page_size: u64,
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub(crate) struct SectionHeader {
    section_id: u8,
    reserved: [u8; 7],
    section_logical_length: U64,
    data_physical_offset: U64,
    index_physical_offset: U64,
}

const _: () = assert!(std::mem::size_of::<SectionHeader>() == SECTION_HEADER_SIZE);

impl SectionHeader {
    pub fn new() -> Self {
        Self {
            section_id: COMPRESSED_VECTOR_SECTION_ID,
            reserved: [0u8; 7],
            section_logical_length: U64::new(0),
            data_physical_offset: U64::new(0),
            index_physical_offset: U64::new(0),
        }
    }

    pub fn from_bytes(bytes: &[u8], context: &str) -> Result<Self> {
        e57_ensure!(
            bytes.len() >= SECTION_HEADER_SIZE,
            BadCvHeader,
            "{} headerBytes={}",
            context,
            bytes.len()
        );
        let header = Self::read_from_bytes(&bytes[..SECTION_HEADER_SIZE])
            .map_err(|_| crate::error::Error::new(crate::error::ErrorCode::Internal, "section header reinterpret"))?;
        e57_ensure!(
            header.section_id == COMPRESSED_VECTOR_SECTION_ID,
            BadCvHeader,
            "{} sectionId={}",
            context,
            header.section_id
        );
        e57_ensure!(
            header.section_logical_length.get() >= SECTION_HEADER_SIZE as u64,
            BadCvHeader,
            "{} sectionLogicalLength={}",
            context,
            header.section_logical_length.get()
        );
        Ok(header)
    }

    zerocopy_accessors! {
        section_logical_length: u64,
        data_physical_offset: u64,
        index_physical_offset: u64,
    }
}
