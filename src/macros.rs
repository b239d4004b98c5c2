//! # Internal Macros
//!
//! This module provides internal macros for reducing boilerplate.
//!
//! ## zerocopy_accessors!
//!
//! Generates getter and setter methods for zerocopy struct fields that use
//! little-endian wrapper types (U16, U32, U64). Used by the on-disk header
//! structs in `storage` and `packet`.
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::little_endian::{U32, U64};
//!
//! #[repr(C)]
//! struct Header {
//!     record_count: U64,
//!     page_size: U32,
//! }
//!
//! impl Header {
//!     zerocopy_accessors! {
//!         record_count: u64,
//!         page_size: u32,
//!     }
//! }
//! ```
//!
//! ## e57_bail! / e57_ensure!
//!
//! Early-return an [`Error`](crate::Error) with a code and a formatted
//! context string:
//!
//! ```ignore
//! e57_ensure!(!sbufs.is_empty(), BadApiArgument, "fileName={}", file_name);
//! e57_bail!(SetTwice, "this->pathName={}", self.path_name());
//! ```

/// Generates getter and setter methods for zerocopy little-endian fields.
macro_rules! zerocopy_accessors {
    (@impl $field:ident, u16) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u16 {
                self.$field.get()
            }

            #[inline]
            #[allow(dead_code)]
            pub fn [<set_ $field>](&mut self, val: u16) {
                self.$field = ::zerocopy::little_endian::U16::new(val);
            }
        }
    };
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            #[allow(dead_code)]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::little_endian::U32::new(val);
            }
        }
    };
    (@impl $field:ident, u64) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u64 {
                self.$field.get()
            }

            #[inline]
            #[allow(dead_code)]
            pub fn [<set_ $field>](&mut self, val: u64) {
                self.$field = ::zerocopy::little_endian::U64::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            zerocopy_accessors!(@impl $field, $ty);
        )*
    };
}

/// Returns `Err(Error::new(ErrorCode::$code, format!(...)))` from the
/// enclosing function.
macro_rules! e57_bail {
    ($code:ident, $($arg:tt)*) => {
        return Err($crate::error::Error::new(
            $crate::error::ErrorCode::$code,
            format!($($arg)*),
        ))
    };
}

/// Like `assert!` but fails with a typed [`Error`](crate::Error) instead of
/// panicking.
macro_rules! e57_ensure {
    ($cond:expr, $code:ident, $($arg:tt)*) => {
        if !$cond {
            e57_bail!($code, $($arg)*);
        }
    };
}
