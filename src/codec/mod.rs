//! # Schema-Driven Field Codecs
//!
//! This module turns a prototype subtree into a flat vector of per-field
//! codec plans, one per leaf in depth-first pre-order. The plan index IS the
//! bytestream index inside every data packet, so the hot encode/decode loops
//! never look types up at runtime.
//!
//! ## Field plans
//!
//! | Leaf type | bits per record | payload |
//! |-----------|-----------------|---------|
//! | Integer(min,max) | `ceil(log2(max-min+1))`, 0 when min==max | `value - min`, LSB-first |
//! | ScaledInteger(min,max,scale,offset) | same, on the raw domain | `raw - min`, LSB-first |
//! | Float(Single) | 32 | IEEE-754 bits, little-endian |
//! | Float(Double) | 64 | IEEE-754 bits, little-endian |
//! | String | n/a | per-packet string table + one varint index per record |
//!
//! ## String streams
//!
//! A string stream payload within one packet is:
//!
//! ```text
//! +--------------+----------------------------+----------------------+
//! | table_length | table                      | indices              |
//! | (u32 LE)     | varint len + UTF-8, dedup'd| one varint per record|
//! +--------------+----------------------------+----------------------+
//! ```
//!
//! The table deduplicates within its packet and is self-contained: a record
//! never splits across packets, so decoding needs no carried state.

pub(crate) mod bitpack;
pub(crate) mod varint;

use hashbrown::HashMap;

use crate::error::Result;
use crate::node::{FloatPrecision, Node, NodeType};
use varint::{decode_varint, encode_varint, varint_len};

/// Resolved encoding of one prototype leaf.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FieldType {
    Integer {
        min: i64,
        max: i64,
        bits: u32,
    },
    ScaledInteger {
        min: i64,
        max: i64,
        scale: f64,
        offset: f64,
        bits: u32,
    },
    FloatSingle,
    FloatDouble,
    String,
}

impl FieldType {
    /// Fixed bit width per record, `None` for string streams.
    pub fn bits_per_record(&self) -> Option<u32> {
        match self {
            FieldType::Integer { bits, .. } | FieldType::ScaledInteger { bits, .. } => Some(*bits),
            FieldType::FloatSingle => Some(32),
            FieldType::FloatDouble => Some(64),
            FieldType::String => None,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, FieldType::String)
    }
}

/// One prototype leaf: its dotted record path and resolved encoding. The
/// position within the plan vector is the field's bytestream index.
#[derive(Debug, Clone)]
pub(crate) struct FieldPlan {
    pub path: String,
    pub field: FieldType,
}

fn bits_for_range(min: i64, max: i64) -> u32 {
    let range = (max as i128 - min as i128) as u128;
    (128 - range.leading_zeros()) as u32
}

fn collect_leaves(node: &Node, prefix: &str, plans: &mut Vec<FieldPlan>) -> Result<()> {
    match node.node_type() {
        NodeType::Structure | NodeType::Vector => {
            for child in node.children() {
                let name = child.element_name();
                let path = if prefix.is_empty() {
                    name
                } else {
                    format!("{}.{}", prefix, name)
                };
                collect_leaves(&child, &path, plans)?;
            }
            Ok(())
        }
        NodeType::Integer => {
            let (min, max) = node.integer_bounds()?;
            e57_ensure!(min <= max, BadPrototype, "fieldPath={} minimum={} maximum={}", prefix, min, max);
            plans.push(FieldPlan {
                path: prefix.to_string(),
                field: FieldType::Integer {
                    min,
                    max,
                    bits: bits_for_range(min, max),
                },
            });
            Ok(())
        }
        NodeType::ScaledInteger => {
            let (min, max, scale, offset) = node.scaled_integer_params()?;
            e57_ensure!(min <= max, BadPrototype, "fieldPath={} minimum={} maximum={}", prefix, min, max);
            e57_ensure!(
                scale != 0.0 && scale.is_finite() && offset.is_finite(),
                BadPrototype,
                "fieldPath={} scale={} offset={}",
                prefix,
                scale,
                offset
            );
            plans.push(FieldPlan {
                path: prefix.to_string(),
                field: FieldType::ScaledInteger {
                    min,
                    max,
                    scale,
                    offset,
                    bits: bits_for_range(min, max),
                },
            });
            Ok(())
        }
        NodeType::Float => {
            let (precision, _min, _max) = node.float_params()?;
            plans.push(FieldPlan {
                path: prefix.to_string(),
                field: match precision {
                    FloatPrecision::Single => FieldType::FloatSingle,
                    FloatPrecision::Double => FieldType::FloatDouble,
                },
            });
            Ok(())
        }
        NodeType::String => {
            plans.push(FieldPlan {
                path: prefix.to_string(),
                field: FieldType::String,
            });
            Ok(())
        }
        NodeType::CompressedVector | NodeType::Blob => {
            e57_bail!(
                BadPrototype,
                "fieldPath={} type={}",
                prefix,
                node.node_type().name()
            )
        }
    }
}

/// Walks a prototype and produces the per-leaf codec plans in bytestream
/// order. Fails `BadPrototype` on an empty prototype, inverted bounds, or a
/// `CompressedVector`/`Blob` descendant.
pub(crate) fn prototype_plans(prototype: &Node) -> Result<Vec<FieldPlan>> {
    let mut plans = Vec::new();
    collect_leaves(prototype, "", &mut plans)?;
    e57_ensure!(!plans.is_empty(), BadPrototype, "prototype has no leaf fields");
    Ok(plans)
}

/// Validates a codecs vector against the prototype plans. Each entry must be
/// a structure holding an `inputs` vector of strings naming distinct
/// prototype leaf paths plus a `codec` structure. Codec entries bind by path
/// and may only add, never remove, streams.
pub(crate) fn validate_codecs(codecs: &Node, plans: &[FieldPlan]) -> Result<()> {
    e57_ensure!(
        codecs.node_type() == NodeType::Vector,
        BadCodecs,
        "codecs type={}",
        codecs.node_type().name()
    );

    let mut bound: hashbrown::HashSet<String> = hashbrown::HashSet::new();
    for entry in codecs.children() {
        e57_ensure!(
            entry.node_type() == NodeType::Structure,
            BadCodecs,
            "codec entry type={}",
            entry.node_type().name()
        );
        let mut inputs = None;
        let mut codec = None;
        for child in entry.children() {
            match child.element_name().as_str() {
                "inputs" => inputs = Some(child),
                "codec" => codec = Some(child),
                other => e57_bail!(BadCodecs, "unexpected codec entry child {}", other),
            }
        }
        let inputs = match inputs {
            Some(n) if n.node_type() == NodeType::Vector => n,
            _ => e57_bail!(BadCodecs, "codec entry missing inputs vector"),
        };
        match codec {
            Some(n) if n.node_type() == NodeType::Structure => {}
            _ => e57_bail!(BadCodecs, "codec entry missing codec structure"),
        }
        for input in inputs.children() {
            let path = input.string_value().map_err(|_| {
                crate::error::Error::new(
                    crate::error::ErrorCode::BadCodecs,
                    format!("codec input type={}", input.node_type().name()),
                )
            })?;
            e57_ensure!(
                plans.iter().any(|p| p.path == path),
                BadCodecs,
                "codec input path {} not in prototype",
                path
            );
            e57_ensure!(
                bound.insert(path.clone()),
                BadCodecs,
                "codec input path {} bound twice",
                path
            );
        }
    }
    Ok(())
}

/// Per-packet string-stream encoder: deduplicating table plus per-record
/// indices.
#[derive(Debug, Default)]
pub(crate) struct StringStreamEncoder {
    table: Vec<String>,
    index_of: HashMap<String, u64>,
    indices: Vec<u64>,
    table_bytes: usize,
    index_bytes: usize,
}

impl StringStreamEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one record's string, returning nothing; the payload grows by
    /// at most `varint_len(index) + varint_len(len) + len` bytes.
    pub fn push(&mut self, value: &str) {
        let index = match self.index_of.get(value) {
            Some(&i) => i,
            None => {
                let i = self.table.len() as u64;
                self.table.push(value.to_string());
                self.index_of.insert(value.to_string(), i);
                self.table_bytes += varint_len(value.len() as u64) + value.len();
                i
            }
        };
        self.index_bytes += varint_len(index);
        self.indices.push(index);
    }

    /// Payload size if flushed now.
    pub fn byte_len(&self) -> usize {
        if self.indices.is_empty() {
            0
        } else {
            4 + self.table_bytes + self.index_bytes
        }
    }

    /// Upper bound on the payload growth from appending `value`.
    pub fn projected_growth(&self, value: &str) -> usize {
        let base = if self.indices.is_empty() { 4 } else { 0 };
        let table = if self.index_of.contains_key(value) {
            0
        } else {
            varint_len(value.len() as u64) + value.len()
        };
        base + table + varint_len(self.table.len() as u64)
    }

    pub fn record_count(&self) -> usize {
        self.indices.len()
    }

    /// Serializes and resets the per-packet state.
    pub fn take(&mut self) -> Vec<u8> {
        if self.indices.is_empty() {
            self.clear();
            return Vec::new();
        }
        let mut out = Vec::with_capacity(self.byte_len());
        out.extend_from_slice(&(self.table_bytes as u32).to_le_bytes());
        for entry in &self.table {
            encode_varint(entry.len() as u64, &mut out);
            out.extend_from_slice(entry.as_bytes());
        }
        for &index in &self.indices {
            encode_varint(index, &mut out);
        }
        self.clear();
        out
    }

    fn clear(&mut self) {
        self.table.clear();
        self.index_of.clear();
        self.indices.clear();
        self.table_bytes = 0;
        self.index_bytes = 0;
    }
}

/// Parsed per-packet string stream.
#[derive(Debug)]
pub(crate) struct StringStreamDecoder {
    table: Vec<String>,
    indices: Vec<u64>,
}

impl StringStreamDecoder {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            return Ok(Self {
                table: Vec::new(),
                indices: Vec::new(),
            });
        }
        e57_ensure!(payload.len() >= 4, BadCvPacket, "string stream shorter than its table length");
        let table_bytes = u32::from_le_bytes(payload[..4].try_into().unwrap()) as usize;
        e57_ensure!(
            payload.len() >= 4 + table_bytes,
            BadCvPacket,
            "string table length {} exceeds payload {}",
            table_bytes,
            payload.len()
        );

        let mut table = Vec::new();
        let mut cursor = 4;
        let table_end = 4 + table_bytes;
        while cursor < table_end {
            let (len, read) = decode_varint(&payload[cursor..table_end])?;
            cursor += read;
            let len = len as usize;
            e57_ensure!(
                cursor + len <= table_end,
                BadCvPacket,
                "string table entry overruns table region"
            );
            let entry = std::str::from_utf8(&payload[cursor..cursor + len])
                .map_err(|e| {
                    crate::error::Error::new(
                        crate::error::ErrorCode::BadCvPacket,
                        format!("string table entry not UTF-8: {}", e),
                    )
                })?
                .to_string();
            table.push(entry);
            cursor += len;
        }

        let mut indices = Vec::new();
        while cursor < payload.len() {
            let (index, read) = decode_varint(&payload[cursor..])?;
            e57_ensure!(
                (index as usize) < table.len(),
                BadCvPacket,
                "string index {} out of table (len {})",
                index,
                table.len()
            );
            indices.push(index);
            cursor += read;
        }

        Ok(Self { table, indices })
    }

    pub fn record_count(&self) -> usize {
        self.indices.len()
    }

    pub fn get(&self, record: usize) -> &str {
        &self.table[self.indices[record] as usize]
    }
}
