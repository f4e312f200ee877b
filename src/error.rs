//! Error types for jpeg-archive.
//!
//! Every failure inside the crate is an [`Error`] value carrying the details
//! that produced it. Callers that only need the coarse status used by the C
//! interface (`Ok`, `NotJpeg`, `NotSuitable`, ...) can ask for
//! [`Error::code`] or [`ErrorCode::of`].

use std::collections::TryReserveError;

use thiserror::Error;

use crate::types::ColorSpace;

/// Result type for jpeg-archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which side of the codec a contained libjpeg failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecStage {
    /// Reading headers or scanlines.
    Decode,
    /// Writing scanlines or finishing the stream.
    Encode,
}

impl std::fmt::Display for CodecStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecStage::Decode => f.write_str("decode"),
            CodecStage::Encode => f.write_str("encode"),
        }
    }
}

/// Error type for jpeg-archive operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Input buffer was empty
    #[error("Empty input buffer")]
    EmptyInput,
    /// Parameter that could not be parsed or is out of range
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),
    /// Quality bound outside 1-100
    #[error("Invalid quality value: {0} (must be 1-100)")]
    InvalidQuality(u8),
    /// Quality bounds contradict each other
    #[error("Invalid quality range: min {min} is greater than max {max}")]
    InvalidQualityRange {
        /// Lower bound
        min: u8,
        /// Upper bound
        max: u8,
    },
    /// Search loop budget of zero
    #[error("Invalid loop count: must be at least 1")]
    InvalidLoopCount,
    /// Similarity target that is negative or not a number
    #[error("Invalid similarity target: {0}")]
    InvalidTarget(String),
    /// Pixel buffer does not cover the declared dimensions
    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch {
        /// Expected buffer size in bytes
        expected: usize,
        /// Actual buffer size in bytes
        actual: usize,
    },
    /// Zero width or height
    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidDimensions {
        /// Image width
        width: usize,
        /// Image height
        height: usize,
    },
    /// Missing SOI magic bytes
    #[error("Not a JPEG file")]
    NotJpeg,
    /// Source color space cannot be converted to the requested one
    #[error("Unsupported color space: {source_space:?} cannot be converted to {target:?}")]
    UnsupportedColorSpace {
        /// Color space stored in the file
        source_space: ColorSpace,
        /// Color space that was requested
        target: ColorSpace,
    },
    /// Two images that must match in size do not
    #[error("Image dimensions differ: {0}x{1} vs {2}x{3}")]
    DimensionMismatch(usize, usize, usize, usize),
    /// Image has no complete SSIM window after downscaling
    #[error("Image {width}x{height} is smaller than the {window}x{window} SSIM window")]
    ImageTooSmall {
        /// Width after downscaling
        width: usize,
        /// Height after downscaling
        height: usize,
        /// Window side length
        window: usize,
    },
    /// Input already carries the jpeg-recompress comment
    #[error("File already processed by jpeg-recompress")]
    AlreadyProcessed,
    /// Recompression did not make the file smaller
    #[error("Output file would be larger than input ({recompressed} >= {original} bytes)")]
    NotSmaller {
        /// Size of the input in bytes
        original: usize,
        /// Size of the best recompressed stream in bytes
        recompressed: usize,
    },
    /// Memory allocation failed
    #[error("Memory allocation failed")]
    AllocationFailed,
    /// libjpeg reported a fatal error, contained at the adapter boundary
    #[error("JPEG {stage} failed (libjpeg message code {code})")]
    Codec {
        /// Which direction failed
        stage: CodecStage,
        /// libjpeg `msg_code`
        code: i32,
    },
    /// A marker segment runs past the end of the buffer
    #[error("Truncated JPEG segment at offset {offset}")]
    Truncated {
        /// Byte offset at which more data was needed
        offset: usize,
    },
    /// A marker segment declares a length too small to hold its own length field
    #[error("Malformed segment 0xFF{marker:02X} at offset {offset}")]
    MalformedSegment {
        /// Marker code
        marker: u8,
        /// Byte offset of the marker
        offset: usize,
    },
    /// SOI is not followed by an APP0 segment
    #[error("Invalid JPEG structure: missing APP0 segment after SOI")]
    MissingApp0,
    /// Internal invariant violated
    #[error("Internal error: {0}")]
    Internal(&'static str),
}

/// Coarse status shared by `recompress` and `compare`.
///
/// The discriminants are the integer status codes of the C interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Success
    Ok = 0,
    /// Empty or contradictory parameters
    InvalidInput = 1,
    /// Magic bytes are not SOI
    NotJpeg = 2,
    /// CMYK/YCCK source or mismatched dimensions
    Unsupported = 3,
    /// Already processed, or no size gain
    NotSuitable = 4,
    /// Allocation failure
    MemoryError = 5,
    /// Codec failure or broken internal invariant
    UnknownError = 6,
}

impl ErrorCode {
    /// Status of an operation result.
    pub fn of<T>(result: &Result<T>) -> ErrorCode {
        match result {
            Ok(_) => ErrorCode::Ok,
            Err(e) => e.code(),
        }
    }
}

impl Error {
    /// Maps this error onto the shared taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::EmptyInput
            | Error::InvalidInput(_)
            | Error::InvalidQuality(_)
            | Error::InvalidQualityRange { .. }
            | Error::InvalidLoopCount
            | Error::InvalidTarget(_)
            | Error::BufferSizeMismatch { .. }
            | Error::InvalidDimensions { .. } => ErrorCode::InvalidInput,
            Error::NotJpeg => ErrorCode::NotJpeg,
            Error::UnsupportedColorSpace { .. }
            | Error::DimensionMismatch(..)
            | Error::ImageTooSmall { .. } => ErrorCode::Unsupported,
            Error::AlreadyProcessed | Error::NotSmaller { .. } => ErrorCode::NotSuitable,
            Error::AllocationFailed => ErrorCode::MemoryError,
            Error::Codec { .. }
            | Error::Truncated { .. }
            | Error::MalformedSegment { .. }
            | Error::MissingApp0
            | Error::Internal(_) => ErrorCode::UnknownError,
        }
    }

    /// True for outcomes that are expected rather than defects.
    pub fn is_not_suitable(&self) -> bool {
        self.code() == ErrorCode::NotSuitable
    }
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Error::AllocationFailed
    }
}
