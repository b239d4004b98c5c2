//! # e57rs - ASTM E57 Point-Cloud Container Library
//!
//! e57rs reads and writes files in the ASTM E57 container format: a hybrid
//! file combining a structured typed-tree document (serialized as XML) with
//! binary sections storing large arrays of packed, codec-encoded numeric
//! records. The public value is a node-level tree API plus a streaming
//! reader/writer for bulk record vectors.
//!
//! ## Quick Start
//!
//! ```ignore
//! use e57rs::{ImageFile, SourceDestBuffer};
//!
//! // write
//! let imf = ImageFile::create("scan.e57")?;
//! let points = imf.new_compressed_vector();
//! let proto = imf.new_structure();
//! proto.set_child("cartesianX", &imf.new_scaled_integer(-500_000, 500_000, 0.001, 0.0))?;
//! proto.set_child("intensity", &imf.new_integer(0, 255))?;
//! points.set_prototype(&proto)?;
//! imf.root().set_child("points", &points)?;
//!
//! let mut writer = points.writer(vec![
//!     SourceDestBuffer::f64_values("cartesianX", xs).with_scaling(),
//!     SourceDestBuffer::i64_values("intensity", intensities).with_conversion(),
//! ])?;
//! writer.write(n)?;
//! writer.close()?;
//! imf.close()?;
//!
//! // read
//! let imf = ImageFile::open("scan.e57")?;
//! let points = imf.root().get("points")?;
//! let mut reader = points.reader(buffers)?;
//! while reader.read()? > 0 { /* drain buffers */ }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │        Public API (ImageFile, Node)       │
//! ├──────────────────────────────────────────┤
//! │  CompressedVector writer/reader sessions  │
//! ├───────────────────┬──────────────────────┤
//! │  Field codecs     │  Source/dest buffers │
//! │  (bit packing)    │  (conversion policy) │
//! ├───────────────────┴──────────────────────┤
//! │        Packet assembly / disassembly      │
//! ├──────────────────────────────────────────┤
//! │   CheckedFile (paged CRC-32C block I/O)   │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! scan.e57
//! ├── file header (48 bytes)        signature, version, XML location
//! ├── binary section per vector     section header + data/index packets
//! └── XML section                   typed tree, written at close
//! ```
//!
//! Every 1024-byte physical page ends with a CRC-32C over its 1020 payload
//! bytes; the logical address space used throughout the library excludes
//! those checksum slots.
//!
//! ## Module Overview
//!
//! - [`imagefile`]: container lifecycle, session slots, node factories
//! - `node`: typed-node tree, XML serialization and parsing
//! - `vector`: compressed-vector node ops, writer/reader sessions, buffers
//! - `codec`: schema-driven field codecs, bit packing, string streams
//! - `packet`: data/index packet layout
//! - [`storage`]: checked paged file I/O, on-disk headers
//! - [`error`]: the numeric error-code surface

#[macro_use]
mod macros;

mod codec;
pub mod config;
pub mod error;
pub mod imagefile;
mod node;
mod packet;
pub mod storage;
mod vector;

pub use error::{Error, ErrorCode, Result};
pub use imagefile::ImageFile;
pub use node::{FloatPrecision, Node, NodeType};
pub use storage::{logical_to_physical, physical_to_logical};
pub use vector::buffer::{MemoryRepresentation, SourceDestBuffer};
pub use vector::{CompressedVectorReader, CompressedVectorWriter};
