//! # Source/Destination Buffers
//!
//! A [`SourceDestBuffer`] binds one user-supplied typed array to a prototype
//! field by its dotted record path. The same type serves both directions: a
//! writer pulls record values out of it, a reader deposits decoded values
//! into it.
//!
//! ## Ownership
//!
//! The typed storage lives behind `Arc<Mutex<…>>`. The caller keeps a clone
//! of the buffer handle to refill it between `write` calls or drain it
//! after `read` calls; the lock enforces that the storage is not mutated
//! while a session call is in flight.
//!
//! ## Conversion policy
//!
//! Every prototype field has one *natural* memory representation:
//!
//! | Field | natural representation |
//! |-------|------------------------|
//! | Integer | `Int64` |
//! | ScaledInteger, `do_scaling=false` | `Int64` (raw domain) |
//! | ScaledInteger, `do_scaling=true` | `Real64` (scaled domain) |
//! | Float(Single) | `Real32` |
//! | Float(Double) | `Real64` |
//! | String | `UString` |
//!
//! Binding any other representation requires `do_conversion=true`, else the
//! session fails `ConversionRequired` at open. String/numeric class
//! mismatches fail `ExpectingNumeric`/`ExpectingUString` regardless of the
//! conversion flag. Conversions themselves are checked per value: integer
//! narrowing overflow fails `ValueNotRepresentable`, storing an
//! out-of-range double into a 32-bit float fails `Real64TooLarge`.
//!
//! ## Stride
//!
//! `stride` is measured in elements of the flat storage; record `i` lives at
//! flat index `i * stride`. The capacity in records is derived from the
//! storage length and the stride.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::codec::FieldType;
use crate::error::Result;

/// Element type of a user buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRepresentation {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    Real32,
    Real64,
    UString,
}

impl MemoryRepresentation {
    pub fn is_string(&self) -> bool {
        matches!(self, MemoryRepresentation::UString)
    }

    pub fn name(&self) -> &'static str {
        match self {
            MemoryRepresentation::Int8 => "Int8",
            MemoryRepresentation::UInt8 => "UInt8",
            MemoryRepresentation::Int16 => "Int16",
            MemoryRepresentation::UInt16 => "UInt16",
            MemoryRepresentation::Int32 => "Int32",
            MemoryRepresentation::UInt32 => "UInt32",
            MemoryRepresentation::Int64 => "Int64",
            MemoryRepresentation::Real32 => "Real32",
            MemoryRepresentation::Real64 => "Real64",
            MemoryRepresentation::UString => "UString",
        }
    }
}

#[derive(Debug)]
enum BufferData {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    Str(Vec<String>),
}

impl BufferData {
    fn len(&self) -> usize {
        match self {
            BufferData::I8(v) => v.len(),
            BufferData::U8(v) => v.len(),
            BufferData::I16(v) => v.len(),
            BufferData::U16(v) => v.len(),
            BufferData::I32(v) => v.len(),
            BufferData::U32(v) => v.len(),
            BufferData::I64(v) => v.len(),
            BufferData::F32(v) => v.len(),
            BufferData::F64(v) => v.len(),
            BufferData::Str(v) => v.len(),
        }
    }

    fn repr(&self) -> MemoryRepresentation {
        match self {
            BufferData::I8(_) => MemoryRepresentation::Int8,
            BufferData::U8(_) => MemoryRepresentation::UInt8,
            BufferData::I16(_) => MemoryRepresentation::Int16,
            BufferData::U16(_) => MemoryRepresentation::UInt16,
            BufferData::I32(_) => MemoryRepresentation::Int32,
            BufferData::U32(_) => MemoryRepresentation::UInt32,
            BufferData::I64(_) => MemoryRepresentation::Int64,
            BufferData::F32(_) => MemoryRepresentation::Real32,
            BufferData::F64(_) => MemoryRepresentation::Real64,
            BufferData::Str(_) => MemoryRepresentation::UString,
        }
    }

    fn zeroed(repr: MemoryRepresentation, len: usize) -> Self {
        match repr {
            MemoryRepresentation::Int8 => BufferData::I8(vec![0; len]),
            MemoryRepresentation::UInt8 => BufferData::U8(vec![0; len]),
            MemoryRepresentation::Int16 => BufferData::I16(vec![0; len]),
            MemoryRepresentation::UInt16 => BufferData::U16(vec![0; len]),
            MemoryRepresentation::Int32 => BufferData::I32(vec![0; len]),
            MemoryRepresentation::UInt32 => BufferData::U32(vec![0; len]),
            MemoryRepresentation::Int64 => BufferData::I64(vec![0; len]),
            MemoryRepresentation::Real32 => BufferData::F32(vec![0.0; len]),
            MemoryRepresentation::Real64 => BufferData::F64(vec![0.0; len]),
            MemoryRepresentation::UString => BufferData::Str(vec![String::new(); len]),
        }
    }
}

/// A numeric value pulled from a user buffer, widened losslessly.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Numeric {
    I64(i64),
    F64 {
        value: f64,
        /// The source element was a 32-bit float; narrowing back to f32
        /// can then never overflow.
        from_single: bool,
    },
}

/// User-supplied typed array bound to a prototype field by dotted path.
///
/// Clones share the same storage; keep one clone to refill or drain the
/// data between session calls.
#[derive(Debug, Clone)]
pub struct SourceDestBuffer {
    path_name: String,
    stride: usize,
    do_conversion: bool,
    do_scaling: bool,
    data: Arc<Mutex<BufferData>>,
}

macro_rules! buffer_constructors {
    ($($ctor:ident, $setter:ident, $getter:ident, $elem:ty, $variant:ident);* $(;)?) => {
        $(
            #[doc = concat!("Creates a buffer over `Vec<", stringify!($elem), ">` storage.")]
            pub fn $ctor(path_name: impl Into<String>, values: Vec<$elem>) -> Self {
                Self::from_data(path_name.into(), BufferData::$variant(values))
            }

            #[doc = concat!("Replaces the `", stringify!($elem), "` storage contents.")]
            pub fn $setter(&self, values: Vec<$elem>) -> Result<()> {
                let mut data = self.data.lock();
                match &mut *data {
                    BufferData::$variant(v) => {
                        *v = values;
                        Ok(())
                    }
                    other => e57_bail!(
                        BadBuffer,
                        "pathName={} elementType={}",
                        self.path_name,
                        other.repr().name()
                    ),
                }
            }

            #[doc = concat!("Snapshot of the `", stringify!($elem), "` storage.")]
            pub fn $getter(&self) -> Result<Vec<$elem>> {
                let data = self.data.lock();
                match &*data {
                    BufferData::$variant(v) => Ok(v.clone()),
                    other => e57_bail!(
                        BadBuffer,
                        "pathName={} elementType={}",
                        self.path_name,
                        other.repr().name()
                    ),
                }
            }
        )*
    };
}

impl SourceDestBuffer {
    fn from_data(path_name: String, data: BufferData) -> Self {
        Self {
            path_name,
            stride: 1,
            do_conversion: false,
            do_scaling: false,
            data: Arc::new(Mutex::new(data)),
        }
    }

    buffer_constructors! {
        i8_values, set_i8_values, i8_data, i8, I8;
        u8_values, set_u8_values, u8_data, u8, U8;
        i16_values, set_i16_values, i16_data, i16, I16;
        u16_values, set_u16_values, u16_data, u16, U16;
        i32_values, set_i32_values, i32_data, i32, I32;
        u32_values, set_u32_values, u32_data, u32, U32;
        i64_values, set_i64_values, i64_data, i64, I64;
        f32_values, set_f32_values, f32_data, f32, F32;
        f64_values, set_f64_values, f64_data, f64, F64;
        string_values, set_string_values, string_data, String, Str;
    }

    /// Creates a zero-filled destination buffer for a read session.
    pub fn destination(
        path_name: impl Into<String>,
        repr: MemoryRepresentation,
        capacity: usize,
    ) -> Self {
        Self::from_data(path_name.into(), BufferData::zeroed(repr, capacity))
    }

    /// Requests on-the-fly conversion between the buffer element type and
    /// the field's natural representation.
    pub fn with_conversion(mut self) -> Self {
        self.do_conversion = true;
        self
    }

    /// For scaled-integer fields, operate in the scaled (floating) domain
    /// instead of the raw integer domain.
    pub fn with_scaling(mut self) -> Self {
        self.do_scaling = true;
        self
    }

    /// Element stride of the flat storage; record `i` lives at `i * stride`.
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn path_name(&self) -> &str {
        &self.path_name
    }

    pub fn do_conversion(&self) -> bool {
        self.do_conversion
    }

    pub fn do_scaling(&self) -> bool {
        self.do_scaling
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn memory_representation(&self) -> MemoryRepresentation {
        self.data.lock().repr()
    }

    /// Records addressable through this buffer.
    pub fn capacity(&self) -> usize {
        let len = self.data.lock().len();
        if len == 0 || self.stride == 0 {
            0
        } else {
            (len - 1) / self.stride + 1
        }
    }

    /// Checks that hold independent of any field binding.
    pub(crate) fn validate(&self) -> Result<()> {
        e57_ensure!(
            self.stride > 0,
            BadBuffer,
            "pathName={} stride=0",
            self.path_name
        );
        e57_ensure!(
            self.capacity() > 0,
            BadBuffer,
            "pathName={} capacity=0",
            self.path_name
        );
        Ok(())
    }

    fn flat_index(&self, record: usize) -> usize {
        record * self.stride
    }

    pub(crate) fn numeric_at(&self, record: usize) -> Result<Numeric> {
        let data = self.data.lock();
        let index = self.flat_index(record);
        Ok(match &*data {
            BufferData::I8(v) => Numeric::I64(v[index] as i64),
            BufferData::U8(v) => Numeric::I64(v[index] as i64),
            BufferData::I16(v) => Numeric::I64(v[index] as i64),
            BufferData::U16(v) => Numeric::I64(v[index] as i64),
            BufferData::I32(v) => Numeric::I64(v[index] as i64),
            BufferData::U32(v) => Numeric::I64(v[index] as i64),
            BufferData::I64(v) => Numeric::I64(v[index]),
            BufferData::F32(v) => Numeric::F64 {
                value: v[index] as f64,
                from_single: true,
            },
            BufferData::F64(v) => Numeric::F64 {
                value: v[index],
                from_single: false,
            },
            BufferData::Str(_) => e57_bail!(
                ExpectingNumeric,
                "pathName={} elementType=UString",
                self.path_name
            ),
        })
    }

    pub(crate) fn string_at(&self, record: usize) -> Result<String> {
        let data = self.data.lock();
        let index = self.flat_index(record);
        match &*data {
            BufferData::Str(v) => Ok(v[index].clone()),
            other => e57_bail!(
                ExpectingUString,
                "pathName={} elementType={}",
                self.path_name,
                other.repr().name()
            ),
        }
    }

    /// Stores a decoded integer, narrowing with representability checks.
    pub(crate) fn put_integer(&self, record: usize, value: i64) -> Result<()> {
        let mut data = self.data.lock();
        let index = self.flat_index(record);
        let repr = data.repr();
        macro_rules! narrow {
            ($v:expr, $target:ty) => {{
                match <$target>::try_from(value) {
                    Ok(narrowed) => $v[index] = narrowed,
                    Err(_) => e57_bail!(
                        ValueNotRepresentable,
                        "pathName={} value={} elementType={}",
                        self.path_name,
                        value,
                        repr.name()
                    ),
                }
            }};
        }
        match &mut *data {
            BufferData::I8(v) => narrow!(v, i8),
            BufferData::U8(v) => narrow!(v, u8),
            BufferData::I16(v) => narrow!(v, i16),
            BufferData::U16(v) => narrow!(v, u16),
            BufferData::I32(v) => narrow!(v, i32),
            BufferData::U32(v) => narrow!(v, u32),
            BufferData::I64(v) => v[index] = value,
            BufferData::F32(v) => v[index] = value as f32,
            BufferData::F64(v) => v[index] = value as f64,
            BufferData::Str(_) => e57_bail!(
                ExpectingNumeric,
                "pathName={} elementType=UString",
                self.path_name
            ),
        }
        Ok(())
    }

    /// Stores a decoded float. `from_single` marks a value decoded from a
    /// 32-bit stream, which can always narrow back to f32.
    pub(crate) fn put_real(&self, record: usize, value: f64, from_single: bool) -> Result<()> {
        let mut data = self.data.lock();
        let index = self.flat_index(record);
        let repr = data.repr();
        macro_rules! round_into {
            ($v:expr, $target:ty) => {{
                let rounded = value.round();
                if !rounded.is_finite()
                    || rounded < <$target>::MIN as f64
                    || rounded > <$target>::MAX as f64
                {
                    e57_bail!(
                        ValueNotRepresentable,
                        "pathName={} value={} elementType={}",
                        self.path_name,
                        value,
                        repr.name()
                    );
                }
                $v[index] = rounded as $target;
            }};
        }
        match &mut *data {
            BufferData::I8(v) => round_into!(v, i8),
            BufferData::U8(v) => round_into!(v, u8),
            BufferData::I16(v) => round_into!(v, i16),
            BufferData::U16(v) => round_into!(v, u16),
            BufferData::I32(v) => round_into!(v, i32),
            BufferData::U32(v) => round_into!(v, u32),
            BufferData::I64(v) => round_into!(v, i64),
            BufferData::F32(v) => {
                if !from_single && value.is_finite() && value.abs() > f32::MAX as f64 {
                    e57_bail!(
                        Real64TooLarge,
                        "pathName={} value={}",
                        self.path_name,
                        value
                    );
                }
                v[index] = value as f32;
            }
            BufferData::F64(v) => v[index] = value,
            BufferData::Str(_) => e57_bail!(
                ExpectingNumeric,
                "pathName={} elementType=UString",
                self.path_name
            ),
        }
        Ok(())
    }

    pub(crate) fn put_string(&self, record: usize, value: &str) -> Result<()> {
        let mut data = self.data.lock();
        let index = self.flat_index(record);
        match &mut *data {
            BufferData::Str(v) => {
                v[index] = value.to_string();
                Ok(())
            }
            other => e57_bail!(
                ExpectingUString,
                "pathName={} elementType={}",
                self.path_name,
                other.repr().name()
            ),
        }
    }
}

/// The representation a field exchanges without conversion.
pub(crate) fn natural_representation(
    field: &FieldType,
    do_scaling: bool,
) -> MemoryRepresentation {
    match field {
        FieldType::Integer { .. } => MemoryRepresentation::Int64,
        FieldType::ScaledInteger { .. } => {
            if do_scaling {
                MemoryRepresentation::Real64
            } else {
                MemoryRepresentation::Int64
            }
        }
        FieldType::FloatSingle => MemoryRepresentation::Real32,
        FieldType::FloatDouble => MemoryRepresentation::Real64,
        FieldType::String => MemoryRepresentation::UString,
    }
}

/// Open-time compatibility check between one buffer and its bound field.
pub(crate) fn check_binding(buffer: &SourceDestBuffer, field: &FieldType) -> Result<()> {
    buffer.validate()?;
    let repr = buffer.memory_representation();
    if field.is_string() {
        e57_ensure!(
            repr.is_string(),
            ExpectingUString,
            "pathName={} elementType={}",
            buffer.path_name(),
            repr.name()
        );
        return Ok(());
    }
    e57_ensure!(
        !repr.is_string(),
        ExpectingNumeric,
        "pathName={} elementType=UString",
        buffer.path_name()
    );
    let natural = natural_representation(field, buffer.do_scaling());
    e57_ensure!(
        repr == natural || buffer.do_conversion(),
        ConversionRequired,
        "pathName={} elementType={} expected={}",
        buffer.path_name(),
        repr.name(),
        natural.name()
    );
    Ok(())
}
