//! # Packet Model
//!
//! A compressed-vector binary section is a sequence of packets after its
//! 32-byte section header. Two packet kinds share the leading type byte:
//! data packets (type 1) and index packets (type 2).
//!
//! ## Data packet layout
//!
//! ```text
//! Offset  Size  Field                          Description
//! ------  ----  -----------------------------  -------------------------
//! 0       1     packet_type                    1
//! 1       1     packet_flags                   bit0 = last packet
//! 2       2     packet_logical_length_minus_1  whole packet, minus one
//! 4       2     bytestream_count               = prototype leaf count
//! 6       2*n   bytestream_buffer_length[i]    per-stream payload bytes
//! 6+2n    ...   stream payloads, concatenated  i-th is length[i] bytes
//! ```
//!
//! Every stream of a packet decodes to the same number of fully formed
//! records; the multiple-of-8 rule for non-final packets keeps bit-packed
//! payloads free of padding so that count is recoverable from the payload
//! sizes alone.
//!
//! ## Index packet layout
//!
//! ```text
//! Offset  Size  Field                          Description
//! ------  ----  -----------------------------  -------------------------
//! 0       1     packet_type                    2
//! 1       1     flags                          zero
//! 2       2     packet_logical_length_minus_1
//! 4       2     entry_count
//! 6       2     reserved                       zero
//! 8       16*n  entries                        record_number (u64),
//!                                              packet_physical_offset (u64)
//! ```
//!
//! One index packet is emitted after the final data packet; its entries are
//! sorted by record number and enable `seek` without a full linear scan.

use zerocopy::little_endian::{U16, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::{
    DATA_PACKET_FLAG_LAST, DATA_PACKET_MAX, DATA_PACKET_TYPE, INDEX_PACKET_TYPE,
};
use crate::error::Result;
use crate::storage::CheckedFile;

pub(crate) const DATA_PACKET_HEADER_SIZE: usize = 6;
pub(crate) const INDEX_PACKET_HEADER_SIZE: usize = 8;
pub(crate) const INDEX_ENTRY_SIZE: usize = 16;

/// Entries a single index packet can hold without exceeding the packet
/// size limit.
pub(crate) const INDEX_PACKET_MAX_ENTRIES: usize =
    (DATA_PACKET_MAX - INDEX_PACKET_HEADER_SIZE) / INDEX_ENTRY_SIZE;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct DataPacketHeader {
    packet_type: u8,
    packet_flags: u8,
    packet_logical_length_minus_1: U16,
    bytestream_count: U16,
}

const _: () = assert!(std::mem::size_of::<DataPacketHeader>() == DATA_PACKET_HEADER_SIZE);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
struct IndexPacketHeader {
    packet_type: u8,
    flags: u8,
    packet_logical_length_minus_1: U16,
    entry_count: U16,
    reserved: U16,
}

const _: () = assert!(std::mem::size_of::<IndexPacketHeader>() == INDEX_PACKET_HEADER_SIZE);

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub(crate) struct IndexEntry {
    pub record_number: U64,
    pub packet_physical_offset: U64,
}

const _: () = assert!(std::mem::size_of::<IndexEntry>() == INDEX_ENTRY_SIZE);

/// A decoded data packet: per-stream payload regions in bytestream order.
#[derive(Debug)]
pub(crate) struct DataPacket {
    pub last: bool,
    pub streams: Vec<Vec<u8>>,
    /// Whole packet size, header included.
    pub logical_length: usize,
}

/// Size a data packet would occupy for the given per-stream payload sizes.
pub(crate) fn data_packet_size(stream_sizes: impl Iterator<Item = usize>) -> usize {
    let mut total = DATA_PACKET_HEADER_SIZE;
    for size in stream_sizes {
        total += 2 + size;
    }
    total
}

/// Assembles a data packet from per-stream payloads.
pub(crate) fn encode_data_packet(streams: &[Vec<u8>], last: bool) -> Result<Vec<u8>> {
    let total = data_packet_size(streams.iter().map(|s| s.len()));
    e57_ensure!(
        total <= DATA_PACKET_MAX,
        Internal,
        "data packet overflow: {} > {}",
        total,
        DATA_PACKET_MAX
    );
    for stream in streams {
        e57_ensure!(
            stream.len() <= u16::MAX as usize,
            Internal,
            "bytestream buffer overflow: {}",
            stream.len()
        );
    }

    let header = DataPacketHeader {
        packet_type: DATA_PACKET_TYPE,
        packet_flags: if last { DATA_PACKET_FLAG_LAST } else { 0 },
        packet_logical_length_minus_1: U16::new((total - 1) as u16),
        bytestream_count: U16::new(streams.len() as u16),
    };

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(header.as_bytes());
    for stream in streams {
        out.extend_from_slice(&(stream.len() as u16).to_le_bytes());
    }
    for stream in streams {
        out.extend_from_slice(stream);
    }
    debug_assert_eq!(out.len(), total);
    Ok(out)
}

/// Reads the packet type byte at `logical_offset` without consuming it.
pub(crate) fn peek_packet_type(cf: &mut CheckedFile, logical_offset: u64) -> Result<u8> {
    let mut byte = [0u8; 1];
    cf.read(logical_offset, &mut byte)?;
    Ok(byte[0])
}

/// Reads the whole-packet logical length of the packet at `logical_offset`.
pub(crate) fn packet_logical_length(cf: &mut CheckedFile, logical_offset: u64) -> Result<u64> {
    Ok(cf.read_u16(logical_offset + 2)? as u64 + 1)
}

/// Reads and validates one data packet.
pub(crate) fn read_data_packet(
    cf: &mut CheckedFile,
    logical_offset: u64,
    expected_streams: usize,
) -> Result<DataPacket> {
    let mut header_bytes = [0u8; DATA_PACKET_HEADER_SIZE];
    cf.read(logical_offset, &mut header_bytes)?;
    let header = DataPacketHeader::read_from_bytes(&header_bytes)
        .map_err(|_| crate::error::Error::new(crate::error::ErrorCode::Internal, "data packet header reinterpret"))?;

    e57_ensure!(
        header.packet_type == DATA_PACKET_TYPE,
        BadCvPacket,
        "offset={} packetType={}",
        logical_offset,
        header.packet_type
    );
    e57_ensure!(
        header.packet_flags & !DATA_PACKET_FLAG_LAST == 0,
        BadCvPacket,
        "offset={} packetFlags={:02x}",
        logical_offset,
        header.packet_flags
    );
    let stream_count = header.bytestream_count.get() as usize;
    e57_ensure!(
        stream_count == expected_streams,
        BadCvPacket,
        "offset={} bytestreamCount={} expected={}",
        logical_offset,
        stream_count,
        expected_streams
    );

    let total = header.packet_logical_length_minus_1.get() as usize + 1;
    let lengths_size = 2 * stream_count;
    e57_ensure!(
        total >= DATA_PACKET_HEADER_SIZE + lengths_size,
        BadCvPacket,
        "offset={} packetLogicalLength={}",
        logical_offset,
        total
    );

    let mut body = vec![0u8; total - DATA_PACKET_HEADER_SIZE];
    cf.read(logical_offset + DATA_PACKET_HEADER_SIZE as u64, &mut body)?;

    let mut stream_lengths = Vec::with_capacity(stream_count);
    for i in 0..stream_count {
        let bytes: [u8; 2] = body[i * 2..i * 2 + 2].try_into().unwrap();
        stream_lengths.push(u16::from_le_bytes(bytes) as usize);
    }
    let payload_total: usize = stream_lengths.iter().sum();
    e57_ensure!(
        DATA_PACKET_HEADER_SIZE + lengths_size + payload_total == total,
        BadCvPacket,
        "offset={} payloadBytes={} packetLogicalLength={}",
        logical_offset,
        payload_total,
        total
    );

    let mut streams = Vec::with_capacity(stream_count);
    let mut cursor = lengths_size;
    for length in stream_lengths {
        streams.push(body[cursor..cursor + length].to_vec());
        cursor += length;
    }

    Ok(DataPacket {
        last: header.packet_flags & DATA_PACKET_FLAG_LAST != 0,
        streams,
        logical_length: total,
    })
}

/// Assembles an index packet from sorted entries.
pub(crate) fn encode_index_packet(entries: &[IndexEntry]) -> Result<Vec<u8>> {
    e57_ensure!(
        entries.len() <= INDEX_PACKET_MAX_ENTRIES,
        Internal,
        "index packet overflow: {} entries",
        entries.len()
    );
    let total = INDEX_PACKET_HEADER_SIZE + entries.len() * INDEX_ENTRY_SIZE;
    let header = IndexPacketHeader {
        packet_type: INDEX_PACKET_TYPE,
        flags: 0,
        packet_logical_length_minus_1: U16::new((total - 1) as u16),
        entry_count: U16::new(entries.len() as u16),
        reserved: U16::new(0),
    };
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(header.as_bytes());
    for entry in entries {
        out.extend_from_slice(entry.as_bytes());
    }
    Ok(out)
}

/// Reads and validates one index packet.
pub(crate) fn read_index_packet(
    cf: &mut CheckedFile,
    logical_offset: u64,
) -> Result<Vec<IndexEntry>> {
    let mut header_bytes = [0u8; INDEX_PACKET_HEADER_SIZE];
    cf.read(logical_offset, &mut header_bytes)?;
    let header = IndexPacketHeader::read_from_bytes(&header_bytes)
        .map_err(|_| crate::error::Error::new(crate::error::ErrorCode::Internal, "index packet header reinterpret"))?;

    e57_ensure!(
        header.packet_type == INDEX_PACKET_TYPE,
        BadCvPacket,
        "offset={} packetType={}",
        logical_offset,
        header.packet_type
    );
    let count = header.entry_count.get() as usize;
    let total = header.packet_logical_length_minus_1.get() as usize + 1;
    e57_ensure!(
        total == INDEX_PACKET_HEADER_SIZE + count * INDEX_ENTRY_SIZE,
        BadCvPacket,
        "offset={} entryCount={} packetLogicalLength={}",
        logical_offset,
        count,
        total
    );

    let mut body = vec![0u8; count * INDEX_ENTRY_SIZE];
    cf.read(logical_offset + INDEX_PACKET_HEADER_SIZE as u64, &mut body)?;

    let mut entries = Vec::with_capacity(count);
    for chunk in body.chunks_exact(INDEX_ENTRY_SIZE) {
        let entry = IndexEntry::read_from_bytes(chunk)
            .map_err(|_| crate::error::Error::new(crate::error::ErrorCode::Internal, "index entry reinterpret"))?;
        entries.push(entry);
    }
    Ok(entries)
}
