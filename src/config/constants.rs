//! # Configuration Constants
//!
//! This module centralizes the file-geometry and packet-layout constants,
//! grouping interdependent values together and documenting their
//! relationships. Constants that depend on each other are co-located to
//! prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! PHYSICAL_PAGE_SIZE (1024 bytes)
//!       │
//!       ├─> PAGE_CHECKSUM_SIZE (4 bytes, CRC-32C at the end of each page)
//!       │
//!       └─> LOGICAL_PAGE_SIZE (derived: PHYSICAL_PAGE_SIZE - PAGE_CHECKSUM_SIZE)
//!             The logical address space is the concatenation of the
//!             1020-byte page payloads; offset translation is arithmetic
//!             on these two sizes.
//!
//! DATA_PACKET_MAX (64 KiB)
//!       │
//!       ├─> packet_logical_length is stored minus one in a u16, so a
//!       │   packet can never exceed 65536 bytes
//!       │
//!       └─> PACKET_RECORD_ALIGN (8)
//!             Non-final packets hold a multiple of 8 records so every
//!             bit-packed stream ends exactly on a byte boundary and the
//!             reader can recover the packet's record count without a
//!             count field in the header.
//!
//! INDEX_PACKET_INTERVAL (8)
//!       │
//!       └─> one index entry is collected per this many data packets
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `LOGICAL_PAGE_SIZE == PHYSICAL_PAGE_SIZE - PAGE_CHECKSUM_SIZE`
//! 2. `DATA_PACKET_MAX <= 65536` (length-minus-one must fit a u16)
//! 3. `PACKET_RECORD_ALIGN` is a multiple of 8

// ============================================================================
// PAGE GEOMETRY
// The checksummed-page layer is the foundation of every file access
// ============================================================================

/// Size of each physical page in bytes.
/// The fundamental unit of checksumming and I/O.
pub const PHYSICAL_PAGE_SIZE: usize = 1024;

/// Bytes of CRC-32C checksum at the end of each physical page.
pub const PAGE_CHECKSUM_SIZE: usize = 4;

/// Payload bytes per page; the logical address space is the concatenation
/// of these payloads.
pub const LOGICAL_PAGE_SIZE: usize = PHYSICAL_PAGE_SIZE - PAGE_CHECKSUM_SIZE;

const _: () = assert!(
    LOGICAL_PAGE_SIZE == PHYSICAL_PAGE_SIZE - PAGE_CHECKSUM_SIZE,
    "LOGICAL_PAGE_SIZE derivation mismatch"
);

// ============================================================================
// FILE HEADER
// ============================================================================

/// Size of the file header at physical offset 0.
pub const FILE_HEADER_SIZE: usize = 48;

/// File signature; a mismatch fails with BadFileSignature.
pub const FILE_SIGNATURE: &[u8; 8] = b"ASTM-E57";

/// Accepted format version.
pub const VERSION_MAJOR: u32 = 1;
pub const VERSION_MINOR: u32 = 0;

// ============================================================================
// BINARY SECTION / PACKETS
// ============================================================================

/// Size of the compressed-vector binary section header.
pub const SECTION_HEADER_SIZE: usize = 32;

/// Section identifier byte for a compressed-vector binary section.
pub const COMPRESSED_VECTOR_SECTION_ID: u8 = 1;

/// Packet type bytes.
pub const DATA_PACKET_TYPE: u8 = 1;
pub const INDEX_PACKET_TYPE: u8 = 2;

/// Maximum logical length of one packet, header included.
/// The header stores length-minus-one in a u16.
pub const DATA_PACKET_MAX: usize = 64 * 1024;

/// Flag bit marking the final data packet of a section.
pub const DATA_PACKET_FLAG_LAST: u8 = 0x01;

/// Projected packet size at which the writer flushes. The gap below
/// DATA_PACKET_MAX absorbs one more aligned group of records, so a flush
/// decision made every 8 records still cannot overshoot the hard limit for
/// reasonably sized records.
pub const DATA_PACKET_FLUSH_TARGET: usize = 56 * 1024;

/// Non-final packets hold a multiple of this many records.
/// With bits-per-record packing, 8 records always end on a byte boundary,
/// so non-final packets carry no padding bits and the reader can derive
/// the record count from payload sizes alone.
pub const PACKET_RECORD_ALIGN: usize = 8;

/// One index entry is collected per this many data packets.
pub const INDEX_PACKET_INTERVAL: usize = 8;

const _: () = assert!(
    DATA_PACKET_MAX <= 65536,
    "packet logical length minus one must fit a u16"
);

const _: () = assert!(
    DATA_PACKET_FLUSH_TARGET < DATA_PACKET_MAX,
    "flush target must leave headroom below the packet limit"
);

const _: () = assert!(
    PACKET_RECORD_ALIGN % 8 == 0,
    "PACKET_RECORD_ALIGN must keep bit-packed streams byte-aligned"
);
