//! # Error Surface
//!
//! This module defines the error type for the whole crate. Every failure is
//! an [`Error`] pairing a numeric [`ErrorCode`] with a context string (path
//! name, file name, counters) assembled at the failure site.
//!
//! ## Error Handling Strategy
//!
//! - **Argument validation**: `BadApiArgument`, `BadBuffer`,
//!   `BufferSizeMismatch`, `BufferDuplicatePathName`, `NoBufferForElement`
//! - **State**: `SetTwice`, `AlreadyHasParent`, `NodeUnattached`,
//!   `DifferentDestImageFile`, `ImageFileNotOpen`, `WriterNotOpen`,
//!   `ReaderNotOpen`, `TooManyWriters`, `TooManyReaders`, `FileReadOnly`
//! - **Data**: `ValueOutOfBounds`, `ValueNotRepresentable`,
//!   `ScaledValueNotRepresentable`, `Real64TooLarge`, `ConversionRequired`,
//!   `ExpectingNumeric`, `ExpectingUString`, `BadPrototype`, `BadCodecs`
//! - **Format**: `BadFileSignature`, `UnknownFileVersion`, `BadFileLength`,
//!   `BadChecksum`, `BadCvHeader`, `BadCvPacket`, `BadXmlFormat`, `XmlParser`
//! - **I/O**: `OpenFailed`, `CloseFailed`, `ReadFailed`, `WriteFailed`,
//!   `SeekFailed`
//!
//! Errors surface synchronously at the call site that triggered the
//! violation; nothing is swallowed and nothing is retried.
//!
//! ## Example
//!
//! ```ignore
//! match cv.set_prototype(&proto) {
//!     Err(e) if e.code() == ErrorCode::SetTwice => { /* already configured */ }
//!     other => other?,
//! }
//! ```

use thiserror::Error;

/// Convenience alias used by every fallible operation in the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error identifiers of the E57 error space.
///
/// The discriminants are part of the on-the-wire API contract and are stable
/// across releases.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    /// A compressed-vector binary section header was bad.
    BadCvHeader = 1,
    /// A compressed-vector binary packet was bad.
    BadCvPacket = 2,
    /// A numerical index identifying a child was out of bounds.
    ChildIndexOutOfBounds = 3,
    /// Attempted to set an existing child element to a new value.
    SetTwice = 4,
    /// An element would have made the children of a homogeneous vector differ.
    HomogeneousViolation = 5,
    /// A value could not be represented in the requested type.
    ValueNotRepresentable = 6,
    /// After scaling, the result could not be represented in the requested type.
    ScaledValueNotRepresentable = 7,
    /// A 64-bit IEEE float was too large to store in a 32-bit IEEE float.
    Real64TooLarge = 8,
    /// Expecting numeric representation in user's buffer, found string.
    ExpectingNumeric = 9,
    /// Expecting string representation in user's buffer, found numeric.
    ExpectingUString = 10,
    /// An unrecoverable inconsistent internal state was detected.
    Internal = 11,
    /// An E57 primitive was not encoded in XML correctly.
    BadXmlFormat = 12,
    /// XML was not well formed.
    XmlParser = 13,
    /// Bad API function argument provided by user.
    BadApiArgument = 14,
    /// Can't modify a read-only file.
    FileReadOnly = 15,
    /// Checksum mismatch; the file is corrupted.
    BadChecksum = 16,
    /// open() failed.
    OpenFailed = 17,
    /// close() failed.
    CloseFailed = 18,
    /// read() failed.
    ReadFailed = 19,
    /// write() failed.
    WriteFailed = 20,
    /// seek() failed.
    SeekFailed = 21,
    /// Element path well formed but not defined.
    PathUndefined = 22,
    /// Bad source/destination buffer.
    BadBuffer = 23,
    /// No buffer specified for an element during write.
    NoBufferForElement = 24,
    /// Source/destination buffers not all the same size.
    BufferSizeMismatch = 25,
    /// Duplicate path name among source/destination buffers.
    BufferDuplicatePathName = 26,
    /// File signature is not "ASTM-E57".
    BadFileSignature = 27,
    /// Incompatible file version.
    UnknownFileVersion = 28,
    /// Size in file header does not match the actual file length.
    BadFileLength = 29,
    /// XML parser failed to initialize.
    XmlParserInit = 30,
    /// Namespace prefix already defined.
    DuplicateNamespacePrefix = 31,
    /// Namespace URI already defined.
    DuplicateNamespaceUri = 32,
    /// Bad prototype in a compressed vector.
    BadPrototype = 33,
    /// Bad codecs in a compressed vector.
    BadCodecs = 34,
    /// Element value out of min/max bounds.
    ValueOutOfBounds = 35,
    /// Conversion required to assign element value, but not requested.
    ConversionRequired = 36,
    /// Path name is not well formed.
    BadPathName = 37,
    /// Functionality not implemented.
    NotImplemented = 38,
    /// Bad downcast from generic node to a specific node type.
    BadNodeDowncast = 39,
    /// The compressed-vector writer is no longer open.
    WriterNotOpen = 40,
    /// The compressed-vector reader is no longer open.
    ReaderNotOpen = 41,
    /// Node is not yet attached to the tree of an image file.
    NodeUnattached = 42,
    /// Node already has a parent.
    AlreadyHasParent = 43,
    /// Nodes were constructed with different destination image files.
    DifferentDestImageFile = 44,
    /// Destination image file is no longer open.
    ImageFileNotOpen = 45,
    /// Buffers not compatible with previously given ones.
    BuffersNotCompatible = 46,
    /// Too many open writers on an image file.
    TooManyWriters = 47,
    /// Too many open readers on an image file.
    TooManyReaders = 48,
    /// Bad configuration string.
    BadConfiguration = 49,
    /// Class invariance constraint violation.
    InvarianceViolation = 50,
}

impl ErrorCode {
    /// Human-readable name matching the variant identifier.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::BadCvHeader => "BadCvHeader",
            ErrorCode::BadCvPacket => "BadCvPacket",
            ErrorCode::ChildIndexOutOfBounds => "ChildIndexOutOfBounds",
            ErrorCode::SetTwice => "SetTwice",
            ErrorCode::HomogeneousViolation => "HomogeneousViolation",
            ErrorCode::ValueNotRepresentable => "ValueNotRepresentable",
            ErrorCode::ScaledValueNotRepresentable => "ScaledValueNotRepresentable",
            ErrorCode::Real64TooLarge => "Real64TooLarge",
            ErrorCode::ExpectingNumeric => "ExpectingNumeric",
            ErrorCode::ExpectingUString => "ExpectingUString",
            ErrorCode::Internal => "Internal",
            ErrorCode::BadXmlFormat => "BadXmlFormat",
            ErrorCode::XmlParser => "XmlParser",
            ErrorCode::BadApiArgument => "BadApiArgument",
            ErrorCode::FileReadOnly => "FileReadOnly",
            ErrorCode::BadChecksum => "BadChecksum",
            ErrorCode::OpenFailed => "OpenFailed",
            ErrorCode::CloseFailed => "CloseFailed",
            ErrorCode::ReadFailed => "ReadFailed",
            ErrorCode::WriteFailed => "WriteFailed",
            ErrorCode::SeekFailed => "SeekFailed",
            ErrorCode::PathUndefined => "PathUndefined",
            ErrorCode::BadBuffer => "BadBuffer",
            ErrorCode::NoBufferForElement => "NoBufferForElement",
            ErrorCode::BufferSizeMismatch => "BufferSizeMismatch",
            ErrorCode::BufferDuplicatePathName => "BufferDuplicatePathName",
            ErrorCode::BadFileSignature => "BadFileSignature",
            ErrorCode::UnknownFileVersion => "UnknownFileVersion",
            ErrorCode::BadFileLength => "BadFileLength",
            ErrorCode::XmlParserInit => "XmlParserInit",
            ErrorCode::DuplicateNamespacePrefix => "DuplicateNamespacePrefix",
            ErrorCode::DuplicateNamespaceUri => "DuplicateNamespaceUri",
            ErrorCode::BadPrototype => "BadPrototype",
            ErrorCode::BadCodecs => "BadCodecs",
            ErrorCode::ValueOutOfBounds => "ValueOutOfBounds",
            ErrorCode::ConversionRequired => "ConversionRequired",
            ErrorCode::BadPathName => "BadPathName",
            ErrorCode::NotImplemented => "NotImplemented",
            ErrorCode::BadNodeDowncast => "BadNodeDowncast",
            ErrorCode::WriterNotOpen => "WriterNotOpen",
            ErrorCode::ReaderNotOpen => "ReaderNotOpen",
            ErrorCode::NodeUnattached => "NodeUnattached",
            ErrorCode::AlreadyHasParent => "AlreadyHasParent",
            ErrorCode::DifferentDestImageFile => "DifferentDestImageFile",
            ErrorCode::ImageFileNotOpen => "ImageFileNotOpen",
            ErrorCode::BuffersNotCompatible => "BuffersNotCompatible",
            ErrorCode::TooManyWriters => "TooManyWriters",
            ErrorCode::TooManyReaders => "TooManyReaders",
            ErrorCode::BadConfiguration => "BadConfiguration",
            ErrorCode::InvarianceViolation => "InvarianceViolation",
        }
    }

    /// Numeric identifier, stable across releases.
    pub fn value(&self) -> i32 {
        *self as i32
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.value())
    }
}

/// The crate-wide error: a numeric code plus a context string.
#[derive(Debug, Clone, Error)]
#[error("{code}: {context}")]
pub struct Error {
    code: ErrorCode,
    context: String,
}

impl Error {
    pub fn new(code: ErrorCode, context: impl Into<String>) -> Self {
        Self {
            code,
            context: context.into(),
        }
    }

    /// Wraps an I/O failure, keeping the OS error text in the context.
    pub fn io(code: ErrorCode, context: impl Into<String>, source: std::io::Error) -> Self {
        Self {
            code,
            context: format!("{}: {}", context.into(), source),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_values_are_stable() {
        assert_eq!(ErrorCode::BadCvHeader.value(), 1);
        assert_eq!(ErrorCode::SetTwice.value(), 4);
        assert_eq!(ErrorCode::BadChecksum.value(), 16);
        assert_eq!(ErrorCode::BufferDuplicatePathName.value(), 26);
        assert_eq!(ErrorCode::TooManyWriters.value(), 47);
        assert_eq!(ErrorCode::InvarianceViolation.value(), 50);
    }

    #[test]
    fn error_display_includes_code_and_context() {
        let err = Error::new(ErrorCode::TooManyReaders, "fileName=scan.e57 readerCount=1");
        let text = err.to_string();
        assert!(text.contains("TooManyReaders"));
        assert!(text.contains("48"));
        assert!(text.contains("scan.e57"));
    }

    #[test]
    fn error_code_name_matches_variant() {
        assert_eq!(ErrorCode::ScaledValueNotRepresentable.name(), "ScaledValueNotRepresentable");
        assert_eq!(ErrorCode::ExpectingUString.name(), "ExpectingUString");
    }
}
