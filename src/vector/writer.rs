//! # Compressed Vector Writer
//!
//! A streaming write session over one compressed vector. The session pulls
//! record values from the bound source buffers, validates and converts them
//! per field, packs them into per-stream accumulators, and flushes data
//! packets to the checked file as they fill.
//!
//! ## Write protocol
//!
//! 1. Stage every field of a record (validation happens here; a failing
//!    record is dropped whole, nothing of it reaches the accumulators)
//! 2. Commit the staged values to the per-stream accumulators
//! 3. At every 8-record boundary, flush a data packet if the projected
//!    size has reached the flush target
//! 4. `close()` flushes the final packet (flagged last), emits the index
//!    packet, patches the section header, and publishes `record_count`
//!    on the node
//!
//! ## Session termination
//!
//! Validation failures (`ValueOutOfBounds`, `ConversionRequired`, …) leave
//! the session open; the failing record is simply not committed. An I/O
//! failure terminates the session: the writer transitions to closed, the
//! container slot is released, and further calls fail `WriterNotOpen`.
//! Dropping an unclosed writer abandons the section and releases the slot.

use std::sync::Arc;

use smallvec::SmallVec;
use tracing::{debug, trace, warn};
use zerocopy::little_endian::U64;
use zerocopy::IntoBytes;

use crate::codec::bitpack::BitWriter;
use crate::codec::{
    prototype_plans, validate_codecs, FieldPlan, FieldType, StringStreamEncoder,
};
use crate::config::{
    DATA_PACKET_FLUSH_TARGET, DATA_PACKET_MAX, INDEX_PACKET_INTERVAL, PACKET_RECORD_ALIGN,
    SECTION_HEADER_SIZE,
};
use crate::error::{Error, ErrorCode, Result};
use crate::imagefile::ImageFileInner;
use crate::node::Node;
use crate::packet::{
    data_packet_size, encode_data_packet, encode_index_packet, IndexEntry,
    INDEX_PACKET_MAX_ENTRIES,
};
use crate::storage::{logical_to_physical, SectionHeader};
use crate::vector::buffer::{check_binding, Numeric, SourceDestBuffer};

enum Staged {
    Bits { value: u64, bits: u32 },
    Str(String),
}

/// Streaming write session for one compressed vector.
pub struct CompressedVectorWriter {
    node: Node,
    imf: Arc<ImageFileInner>,
    plans: Vec<FieldPlan>,
    buffers: Vec<SourceDestBuffer>,
    bit_streams: Vec<BitWriter>,
    string_streams: Vec<StringStreamEncoder>,
    section_start: u64,
    packet_cursor: u64,
    records_total: u64,
    records_in_packet: usize,
    data_packets_emitted: u64,
    index_entries: Vec<IndexEntry>,
    index_interval: u64,
    open: bool,
}

impl std::fmt::Debug for CompressedVectorWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedVectorWriter")
            .field("records_total", &self.records_total)
            .field("packet_cursor", &self.packet_cursor)
            .finish()
    }
}

impl CompressedVectorWriter {
    pub(crate) fn open(
        node: Node,
        imf: Arc<ImageFileInner>,
        sbufs: Vec<SourceDestBuffer>,
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
        for sbuf in &sbufs {
            e57_ensure!(
                paths.insert(sbuf.path_name().to_string()),
                BufferDuplicatePathName,
                "fileName={} pathName={}",
                imf.file_name(),
                sbuf.path_name()
            );
        }
        let capacity = sbufs[0].capacity();
        for sbuf in &sbufs {
            e57_ensure!(
                sbuf.capacity() == capacity,
                BufferSizeMismatch,
                "fileName={} pathName={} capacity={} expected={}",
                imf.file_name(),
                sbuf.path_name(),
                sbuf.capacity(),
                capacity
            );
        }

        let mut buffers: Vec<Option<SourceDestBuffer>> = vec![None; plans.len()];
        for sbuf in sbufs {
            let position = plans.iter().position(|p| p.path == sbuf.path_name());
            match position {
                Some(i) => buffers[i] = Some(sbuf),
                None => e57_bail!(
                    BadPathName,
                    "fileName={} pathName={}",
                    imf.file_name(),
                    sbuf.path_name()
                ),
            }
        }
        prototype.check_leaves_in_set("", &paths)?;
        let buffers: Vec<SourceDestBuffer> = buffers
            .into_iter()
            .map(|b| b.unwrap()) // INVARIANT: full coverage checked above
            .collect();
        for (plan, buffer) in plans.iter().zip(&buffers) {
            check_binding(buffer, &plan.field)?;
        }

        imf.acquire_writer()?;

        let (section_start, packet_cursor) = {
            let mut cf = imf.cf();
            let start = cf.logical_length();
            match cf.write(start, SectionHeader::new().as_bytes()) {
                Ok(()) => {}
                Err(e) => {
                    drop(cf);
                    imf.release_writer();
                    return Err(e);
                }
            }
            (start, start + SECTION_HEADER_SIZE as u64)
        };

        debug!(
            file = %imf.file_name(),
            path = %node.path_name(),
            fields = plans.len(),
            "opened compressed vector writer"
        );

        let stream_count = plans.len();
        Ok(Self {
            node,
            imf,
            plans,
            buffers,
            bit_streams: (0..stream_count).map(|_| BitWriter::new()).collect(),
            string_streams: (0..stream_count).map(|_| StringStreamEncoder::new()).collect(),
            section_start,
            packet_cursor,
            records_total: 0,
            records_in_packet: 0,
            data_packets_emitted: 0,
            index_entries: Vec::new(),
            index_interval: INDEX_PACKET_INTERVAL as u64,
            open: true,
        })
    }

    /// Consumes the first `n` records from every bound buffer.
    pub fn write(&mut self, n: usize) -> Result<()> {
        e57_ensure!(self.open, WriterNotOpen, "fileName={}", self.imf.file_name());
        for buffer in &self.buffers {
            e57_ensure!(
                n <= buffer.capacity(),
                BadApiArgument,
                "fileName={} pathName={} requested={} capacity={}",
                self.imf.file_name(),
                buffer.path_name(),
                n,
                buffer.capacity()
            );
        }

        match self.write_records(n) {
            Ok(()) => Ok(()),
            Err(e) => {
                if matches!(
                    e.code(),
                    ErrorCode::WriteFailed | ErrorCode::ReadFailed | ErrorCode::SeekFailed
                ) {
                    self.release_session();
                }
                Err(e)
            }
        }
    }

    fn write_records(&mut self, n: usize) -> Result<()> {
        for record in 0..n {
            let mut staging: SmallVec<[Staged; 8]> = SmallVec::new();
            for (plan, buffer) in self.plans.iter().zip(&self.buffers) {
                staging.push(stage_field(plan, buffer, record)?);
            }

            // keep the packet under its hard size limit; flushing is only
            // legal on an aligned record boundary
            if self.records_in_packet > 0 && self.records_in_packet % PACKET_RECORD_ALIGN == 0 {
                let growth: usize = staging
                    .iter()
                    .enumerate()
                    .map(|(i, staged)| match staged {
                        Staged::Bits { bits, .. } => (*bits as usize + 7) / 8 + 1,
                        Staged::Str(s) => self.string_streams[i].projected_growth(s),
                    })
                    .sum();
                if self.projected_packet_size() + growth > DATA_PACKET_MAX {
                    self.flush_data_packet(false)?;
                }
            }

            for (i, staged) in staging.into_iter().enumerate() {
                match staged {
                    Staged::Bits { value, bits } => self.bit_streams[i].push(value, bits),
                    Staged::Str(s) => self.string_streams[i].push(&s),
                }
            }
            self.records_total += 1;
            self.records_in_packet += 1;

            if self.records_in_packet % PACKET_RECORD_ALIGN == 0
                && self.projected_packet_size() >= DATA_PACKET_FLUSH_TARGET
            {
                self.flush_data_packet(false)?;
            }
        }
        Ok(())
    }

    fn projected_packet_size(&self) -> usize {
        data_packet_size(self.plans.iter().enumerate().map(|(i, plan)| {
            if plan.field.is_string() {
                self.string_streams[i].byte_len()
            } else {
                self.bit_streams[i].byte_len()
            }
        }))
    }

    fn flush_data_packet(&mut self, last: bool) -> Result<()> {
        let first_record = self.records_total - self.records_in_packet as u64;
        let payloads: Vec<Vec<u8>> = self
            .plans
            .iter()
            .enumerate()
            .map(|(i, plan)| {
                if plan.field.is_string() {
                    self.string_streams[i].take()
                } else {
                    self.bit_streams[i].take()
                }
            })
            .collect();

        let total = data_packet_size(payloads.iter().map(|p| p.len()));
        if total > DATA_PACKET_MAX {
            self.release_session();
            return Err(Error::new(
                ErrorCode::ValueNotRepresentable,
                format!(
                    "fileName={} record slice of {} records needs {} bytes, packet limit is {}",
                    self.imf.file_name(),
                    self.records_in_packet,
                    total,
                    DATA_PACKET_MAX
                ),
            ));
        }

        if self.data_packets_emitted % self.index_interval == 0 {
            self.index_entries.push(IndexEntry {
                record_number: U64::new(first_record),
                packet_physical_offset: U64::new(logical_to_physical(self.packet_cursor)),
            });
            if self.index_entries.len() > INDEX_PACKET_MAX_ENTRIES {
                let mut keep = false;
                self.index_entries.retain(|_| {
                    keep = !keep;
                    keep
                });
                self.index_interval *= 2;
            }
        }

        let bytes = encode_data_packet(&payloads, last)?;
        self.imf.cf().write(self.packet_cursor, &bytes)?;
        trace!(
            offset = self.packet_cursor,
            bytes = bytes.len(),
            records = self.records_in_packet,
            last,
            "flushed data packet"
        );
        self.packet_cursor += bytes.len() as u64;
        self.data_packets_emitted += 1;
        self.records_in_packet = 0;
        Ok(())
    }

    /// Flushes the final packet, patches the section header, and publishes
    /// the record count on the vector node.
    pub fn close(&mut self) -> Result<()> {
        e57_ensure!(self.open, WriterNotOpen, "fileName={}", self.imf.file_name());
        let result = self.finish();
        self.release_session();
        result
    }

    fn finish(&mut self) -> Result<()> {
        self.flush_data_packet(true)?;

        let index_physical = if self.index_entries.is_empty() {
            0
        } else {
            let physical = logical_to_physical(self.packet_cursor);
            let bytes = encode_index_packet(&self.index_entries)?;
            self.imf.cf().write(self.packet_cursor, &bytes)?;
            self.packet_cursor += bytes.len() as u64;
            physical
        };

        let mut header = SectionHeader::new();
        header.set_section_logical_length(self.packet_cursor - self.section_start);
        header.set_data_physical_offset(logical_to_physical(
            self.section_start + SECTION_HEADER_SIZE as u64,
        ));
        header.set_index_physical_offset(index_physical);
        {
            let mut cf = self.imf.cf();
            cf.write(self.section_start, header.as_bytes())?;
            cf.flush()?;
        }

        let section_start = self.section_start;
        let records_total = self.records_total;
        self.node.with_cv_state(|s| {
            s.record_count = records_total;
            s.binary_section_logical_start = section_start;
        })?;

        debug!(
            file = %self.imf.file_name(),
            records = self.records_total,
            packets = self.data_packets_emitted,
            section_bytes = self.packet_cursor - self.section_start,
            "closed compressed vector writer"
        );
        Ok(())
    }

    fn release_session(&mut self) {
        if self.open {
            self.open = false;
            self.imf.release_writer();
        }
    }
}

impl Drop for CompressedVectorWriter {
    fn drop(&mut self) {
        if self.open {
            warn!(
                file = %self.imf.file_name(),
                records = self.records_total,
                "compressed vector writer dropped without close; section abandoned"
            );
            self.release_session();
        }
    }
}

fn to_i64(numeric: Numeric, path: &str) -> Result<i64> {
    match numeric {
        Numeric::I64(v) => Ok(v),
        Numeric::F64 { value, .. } => {
            let rounded = value.round();
            e57_ensure!(
                rounded.is_finite() && rounded >= i64::MIN as f64 && rounded <= i64::MAX as f64,
                ValueNotRepresentable,
                "pathName={} value={}",
                path,
                value
            );
            Ok(rounded as i64)
        }
    }
}

fn to_f64(numeric: Numeric) -> (f64, bool) {
    match numeric {
        Numeric::I64(v) => (v as f64, false),
        Numeric::F64 { value, from_single } => (value, from_single),
    }
}

fn stage_field(plan: &FieldPlan, buffer: &SourceDestBuffer, record: usize) -> Result<Staged> {
    match &plan.field {
        FieldType::Integer { min, max, bits } => {
            let value = to_i64(buffer.numeric_at(record)?, &plan.path)?;
            e57_ensure!(
                value >= *min && value <= *max,
                ValueOutOfBounds,
                "pathName={} value={} minimum={} maximum={}",
                plan.path,
                value,
                min,
                max
            );
            Ok(Staged::Bits {
                value: (value as i128 - *min as i128) as u64,
                bits: *bits,
            })
        }
        FieldType::ScaledInteger {
            min,
            max,
            scale,
            offset,
            bits,
        } => {
            let raw = if buffer.do_scaling() {
                let (scaled, _) = to_f64(buffer.numeric_at(record)?);
                let raw = ((scaled - offset) / scale).round();
                e57_ensure!(
                    raw.is_finite() && raw >= *min as f64 && raw <= *max as f64,
                    ScaledValueNotRepresentable,
                    "pathName={} value={} minimum={} maximum={}",
                    plan.path,
                    scaled,
                    min,
                    max
                );
                raw as i64
            } else {
                let raw = to_i64(buffer.numeric_at(record)?, &plan.path)?;
                e57_ensure!(
                    raw >= *min && raw <= *max,
                    ValueOutOfBounds,
                    "pathName={} value={} minimum={} maximum={}",
                    plan.path,
                    raw,
                    min,
                    max
                );
                raw
            };
            Ok(Staged::Bits {
                value: (raw as i128 - *min as i128) as u64,
                bits: *bits,
            })
        }
        FieldType::FloatSingle => {
            let value = match buffer.numeric_at(record)? {
                Numeric::I64(v) => v as f32,
                Numeric::F64 { value, from_single } => {
                    e57_ensure!(
                        from_single || !value.is_finite() || value.abs() <= f32::MAX as f64,
                        Real64TooLarge,
                        "pathName={} value={}",
                        plan.path,
                        value
                    );
                    value as f32
                }
            };
            Ok(Staged::Bits {
                value: value.to_bits() as u64,
                bits: 32,
            })
        }
        FieldType::FloatDouble => {
            let (value, _) = to_f64(buffer.numeric_at(record)?);
            Ok(Staged::Bits {
                value: value.to_bits(),
                bits: 64,
            })
        }
        FieldType::String => Ok(Staged::Str(buffer.string_at(record)?)),
    }
}
