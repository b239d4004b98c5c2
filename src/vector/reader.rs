//! # Compressed Vector Reader
//!
//! A streaming read session over one compressed vector. Reads are
//! forward-only from the current cursor; `seek` repositions the cursor via
//! the section's index packet when one exists, else by a linear scan over
//! the packet stream.
//!
//! ## Decode protocol
//!
//! 1. Fetch the next packet; index packets encountered mid-stream are
//!    skipped
//! 2. Derive the packet's record count: string streams and byte-aligned
//!    numeric streams yield exact counts, sub-byte streams a floor bound,
//!    and the total record count clamps the final packet
//! 3. Decode every stream of the packet into columnar staging (bound or
//!    not; unbound fields are decoded and dropped)
//! 4. Hand records out of the staging into the destination buffers until
//!    they fill or the vector is exhausted
//!
//! A packet whose streams disagree on the record slice, whose header is
//! inconsistent, or whose section ends before `record_count` records were
//! produced fails `BadCvPacket`; page-level corruption surfaces from the
//! checked file as `BadChecksum`.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::codec::bitpack::BitReader;
use crate::codec::{
    prototype_plans, validate_codecs, FieldPlan, FieldType, StringStreamDecoder,
};
use crate::config::{DATA_PACKET_TYPE, INDEX_PACKET_TYPE, SECTION_HEADER_SIZE};
use crate::error::{Error, ErrorCode, Result};
use crate::imagefile::ImageFileInner;
use crate::node::Node;
use crate::packet::{
    packet_logical_length, peek_packet_type, read_data_packet, read_index_packet,
};
use crate::storage::{logical_to_physical, physical_to_logical, SectionHeader};
use crate::vector::buffer::{check_binding, SourceDestBuffer};

enum DecodedColumn {
    /// Bit-packed raw values, one per record: `value - minimum` for
    /// integer fields, IEEE bits for float fields.
    Raw(Vec<u64>),
    Strings(StringStreamDecoder),
    /// Zero-width field (minimum == maximum); every record is the minimum.
    Constant,
}

struct PacketState {
    columns: Vec<DecodedColumn>,
    count: usize,
    consumed: usize,
    last: bool,
}

/// Streaming read session for one compressed vector.
pub struct CompressedVectorReader {
    imf: Arc<ImageFileInner>,
    plans: Vec<FieldPlan>,
    buffers: Vec<Option<SourceDestBuffer>>,
    capacity: usize,
    record_count: u64,
    data_start: u64,
    section_end: u64,
    index_logical: Option<u64>,
    cursor: u64,
    record_cursor: u64,
    pending_skip: u64,
    current: Option<PacketState>,
    open: bool,
}

impl std::fmt::Debug for CompressedVectorReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedVectorReader")
            .field("record_count", &self.record_count)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl CompressedVectorReader {
    pub(crate) fn open(
        node: Node,
        imf: Arc<ImageFileInner>,
        dbufs: Vec<SourceDestBuffer>,
    ) -> Result<Self> {
        let prototype = node.with_cv_state(|s| s.prototype.clone())?;
        let prototype = match prototype {
            Some(p) => p,
            None => e57_bail!(BadPrototype, "pathName={} prototype not set", node.path_name()),
        };
        let plans = prototype_plans(&prototype)?;
        if let Some(codecs) = node.with_cv_state(|s| s.codecs.clone())? {
            validate_codecs(&codecs, &plans)?;
        }

        let mut paths = hashbrown::HashSet::new();
        for dbuf in &dbufs {
            e57_ensure!(
                paths.insert(dbuf.path_name().to_string()),
                BufferDuplicatePathName,
                "fileName={} pathName={}",
                imf.file_name(),
                dbuf.path_name()
            );
        }
        let capacity = dbufs[0].capacity();
        for dbuf in &dbufs {
            e57_ensure!(
                dbuf.capacity() == capacity,
                BufferSizeMismatch,
                "fileName={} pathName={} capacity={} expected={}",
                imf.file_name(),
                dbuf.path_name(),
                dbuf.capacity(),
                capacity
            );
        }

        let mut buffers: Vec<Option<SourceDestBuffer>> = vec![None; plans.len()];
        for dbuf in dbufs {
            let position = plans.iter().position(|p| p.path == dbuf.path_name());
            match position {
                Some(i) => buffers[i] = Some(dbuf),
                None => e57_bail!(
                    BadPathName,
                    "fileName={} pathName={}",
                    imf.file_name(),
                    dbuf.path_name()
                ),
            }
        }
        for (plan, buffer) in plans.iter().zip(&buffers) {
            if let Some(buffer) = buffer {
                check_binding(buffer, &plan.field)?;
            }
        }

        let (record_count, section_start) =
            node.with_cv_state(|s| (s.record_count, s.binary_section_logical_start))?;

        imf.acquire_reader()?;

        let mut data_start = 0;
        let mut section_end = 0;
        let mut index_logical = None;
        if record_count > 0 {
            let header = {
                let mut cf = imf.cf();
                let mut bytes = [0u8; SECTION_HEADER_SIZE];
                match cf.read(section_start, &mut bytes) {
                    Ok(()) => {}
                    Err(e) => {
                        drop(cf);
                        imf.release_reader();
                        return Err(e);
                    }
                }
                match SectionHeader::from_bytes(
                    &bytes,
                    &format!("fileName={} sectionStart={}", imf.file_name(), section_start),
                ) {
                    Ok(h) => h,
                    Err(e) => {
                        drop(cf);
                        imf.release_reader();
                        return Err(e);
                    }
                }
            };
            data_start = section_start + SECTION_HEADER_SIZE as u64;
            section_end = section_start + header.section_logical_length();
            if header.data_physical_offset() != logical_to_physical(data_start) {
                imf.release_reader();
                e57_bail!(
                    BadCvHeader,
                    "fileName={} dataPhysicalOffset={} expected={}",
                    imf.file_name(),
                    header.data_physical_offset(),
                    logical_to_physical(data_start)
                );
            }
            if header.index_physical_offset() != 0 {
                index_logical = Some(physical_to_logical(header.index_physical_offset()));
            }
        }

        debug!(
            file = %imf.file_name(),
            path = %node.path_name(),
            records = record_count,
            "opened compressed vector reader"
        );

        Ok(Self {
            imf,
            plans,
            buffers,
            capacity,
            record_count,
            data_start,
            section_end,
            index_logical,
            cursor: data_start,
            record_cursor: 0,
            pending_skip: 0,
            current: None,
            open: true,
        })
    }

    /// Fills the bound buffers from the cursor, returning the number of
    /// records produced; 0 at the end of the vector.
    pub fn read(&mut self) -> Result<usize> {
        e57_ensure!(self.open, ReaderNotOpen, "fileName={}", self.imf.file_name());

        let mut produced = 0usize;
        while produced < self.capacity && self.record_cursor < self.record_count {
            if self.current.as_ref().map_or(true, |p| p.consumed == p.count) {
                self.fetch_next_packet()?;
            }
            let state = self.current.as_mut().unwrap(); // INVARIANT: fetched above

            while state.consumed < state.count
                && self.record_cursor < self.record_count
                && (self.pending_skip > 0 || produced < self.capacity)
            {
                let record = state.consumed;
                if self.pending_skip > 0 {
                    self.pending_skip -= 1;
                } else {
                    deliver_record(&self.plans, &self.buffers, &state.columns, record, produced)?;
                    produced += 1;
                }
                state.consumed += 1;
                self.record_cursor += 1;
            }

            if produced >= self.capacity {
                break;
            }
        }
        trace!(produced, cursor = self.record_cursor, "reader filled buffers");
        Ok(produced)
    }

    fn fetch_next_packet(&mut self) -> Result<()> {
        if let Some(state) = &self.current {
            e57_ensure!(
                !state.last,
                BadCvPacket,
                "fileName={} section ended after {} of {} records",
                self.imf.file_name(),
                self.record_cursor,
                self.record_count
            );
        }
        let mut cf = self.imf.cf();
        loop {
            e57_ensure!(
                self.cursor < self.section_end,
                BadCvPacket,
                "fileName={} packet cursor {} past section end {}",
                self.imf.file_name(),
                self.cursor,
                self.section_end
            );
            match peek_packet_type(&mut cf, self.cursor)? {
                INDEX_PACKET_TYPE => {
                    self.cursor += packet_logical_length(&mut cf, self.cursor)?;
                }
                DATA_PACKET_TYPE => {
                    let packet = read_data_packet(&mut cf, self.cursor, self.plans.len())?;
                    self.cursor += packet.logical_length as u64;
                    drop(cf);
                    let remaining = self.record_count - self.record_cursor;
                    self.current = Some(decode_packet(
                        &self.plans,
                        packet.streams,
                        packet.last,
                        remaining,
                        self.imf.file_name(),
                    )?);
                    return Ok(());
                }
                other => e57_bail!(
                    BadCvPacket,
                    "fileName={} offset={} packetType={}",
                    self.imf.file_name(),
                    self.cursor,
                    other
                ),
            }
        }
    }

    /// Repositions the cursor to `record_number`, using the index packet
    /// when present.
    pub fn seek(&mut self, record_number: u64) -> Result<()> {
        e57_ensure!(self.open, ReaderNotOpen, "fileName={}", self.imf.file_name());
        e57_ensure!(
            record_number <= self.record_count,
            BadApiArgument,
            "fileName={} recordNumber={} recordCount={}",
            self.imf.file_name(),
            record_number,
            self.record_count
        );

        self.current = None;
        self.cursor = self.data_start;
        self.record_cursor = 0;

        if let Some(index_logical) = self.index_logical {
            let entries = read_index_packet(&mut self.imf.cf(), index_logical)?;
            let position = entries.partition_point(|e| e.record_number.get() <= record_number);
            if position > 0 {
                let entry = &entries[position - 1];
                self.cursor = physical_to_logical(entry.packet_physical_offset.get());
                self.record_cursor = entry.record_number.get();
            }
        }

        self.pending_skip = record_number - self.record_cursor;
        trace!(
            record_number,
            start = self.record_cursor,
            skip = self.pending_skip,
            "reader seek"
        );
        Ok(())
    }

    /// Releases the session; the vector and its buffers stay usable.
    pub fn close(&mut self) -> Result<()> {
        e57_ensure!(self.open, ReaderNotOpen, "fileName={}", self.imf.file_name());
        self.open = false;
        self.current = None;
        self.imf.release_reader();
        Ok(())
    }
}

impl Drop for CompressedVectorReader {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            self.imf.release_reader();
        }
    }
}

/// Derives the packet's record count and decodes every stream into
/// columnar staging.
fn decode_packet(
    plans: &[FieldPlan],
    streams: Vec<Vec<u8>>,
    last: bool,
    remaining: u64,
    file_name: &str,
) -> Result<PacketState> {
    let mut string_decoders: Vec<Option<StringStreamDecoder>> = Vec::with_capacity(plans.len());
    let mut count = remaining.min(usize::MAX as u64) as usize;
    let mut count_known = false;

    for (plan, payload) in plans.iter().zip(&streams) {
        match &plan.field {
            FieldType::String => {
                let decoder = StringStreamDecoder::parse(payload)?;
                count = count.min(decoder.record_count());
                count_known = true;
                string_decoders.push(Some(decoder));
            }
            field => {
                if let Some(bits) = field.bits_per_record() {
                    if bits > 0 {
                        let available = payload.len() * 8 / bits as usize;
                        count = count.min(available);
                        count_known = true;
                    }
                }
                string_decoders.push(None);
            }
        }
    }
    if !count_known {
        // every field is zero-width; the slice is whatever remains
        count = remaining.min(usize::MAX as u64) as usize;
    }

    let mut columns = Vec::with_capacity(plans.len());
    for ((plan, payload), decoder) in plans.iter().zip(streams).zip(string_decoders) {
        match &plan.field {
            FieldType::String => {
                let decoder = decoder.unwrap(); // INVARIANT: parsed above
                e57_ensure!(
                    decoder.record_count() == count,
                    BadCvPacket,
                    "fileName={} string stream {} holds {} records, packet holds {}",
                    file_name,
                    plan.path,
                    decoder.record_count(),
                    count
                );
                columns.push(DecodedColumn::Strings(decoder));
            }
            field => {
                let bits = field.bits_per_record().unwrap(); // INVARIANT: non-string
                if bits == 0 {
                    columns.push(DecodedColumn::Constant);
                    continue;
                }
                let expected_bytes = (count * bits as usize).div_ceil(8);
                e57_ensure!(
                    payload.len() == expected_bytes,
                    BadCvPacket,
                    "fileName={} stream {} holds {} bytes, {} records need {}",
                    file_name,
                    plan.path,
                    payload.len(),
                    count,
                    expected_bytes
                );
                let mut reader = BitReader::new(&payload);
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(reader.read(bits)?);
                }
                columns.push(DecodedColumn::Raw(values));
            }
        }
    }

    Ok(PacketState {
        columns,
        count,
        consumed: 0,
        last,
    })
}

/// Converts one record out of columnar staging into the bound buffers.
fn deliver_record(
    plans: &[FieldPlan],
    buffers: &[Option<SourceDestBuffer>],
    columns: &[DecodedColumn],
    record: usize,
    out_index: usize,
) -> Result<()> {
    for ((plan, buffer), column) in plans.iter().zip(buffers).zip(columns) {
        let Some(buffer) = buffer else {
            continue;
        };
        match (&plan.field, column) {
            (FieldType::Integer { min, max, .. }, column) => {
                let raw = raw_value(column, record);
                let value = *min as i128 + raw as i128;
                e57_ensure!(
                    value <= *max as i128,
                    BadCvPacket,
                    "pathName={} decoded value {} above maximum {}",
                    plan.path,
                    value,
                    max
                );
                buffer.put_integer(out_index, value as i64)?;
            }
            (
                FieldType::ScaledInteger {
                    min,
                    max,
                    scale,
                    offset,
                    ..
                },
                column,
            ) => {
                let raw = raw_value(column, record);
                let value = *min as i128 + raw as i128;
                e57_ensure!(
                    value <= *max as i128,
                    BadCvPacket,
                    "pathName={} decoded value {} above maximum {}",
                    plan.path,
                    value,
                    max
                );
                let raw_int = value as i64;
                if buffer.do_scaling() {
                    buffer.put_real(out_index, raw_int as f64 * scale + offset, false)?;
                } else {
                    buffer.put_integer(out_index, raw_int)?;
                }
            }
            (FieldType::FloatSingle, column) => {
                let value = f32::from_bits(raw_value(column, record) as u32);
                buffer.put_real(out_index, value as f64, true)?;
            }
            (FieldType::FloatDouble, column) => {
                let value = f64::from_bits(raw_value(column, record));
                buffer.put_real(out_index, value, false)?;
            }
            (FieldType::String, DecodedColumn::Strings(decoder)) => {
                buffer.put_string(out_index, decoder.get(record))?;
            }
            (FieldType::String, _) => {
                return Err(Error::new(
                    ErrorCode::Internal,
                    format!("pathName={} string field without string column", plan.path),
                ));
            }
        }
    }
    Ok(())
}

fn raw_value(column: &DecodedColumn, record: usize) -> u64 {
    match column {
        DecodedColumn::Raw(values) => values[record],
        _ => 0,
    }
}
