//! # jpeg-archive
//!
//! Recompresses JPEGs to the smallest size that still meets a perceptual
//! similarity target, using C mozjpeg for the codec work.
//!
//! - **Quality search** - Binary search over encoder quality, measuring each
//!   probe with SSIM against the original
//! - **Fast SSIM** - Pairwise SSIM plus a reference model that reuses the
//!   original's statistics across probes
//! - **Metadata preservation** - EXIF/ICC/XMP and comments are copied
//!   verbatim into the output
//! - **Idempotence** - Output carries a comment marker; marked files are
//!   refused instead of being recompressed again
//! - **Contained failures** - libjpeg fatal errors become [`Error`] values
//!   instead of aborting the process
//!
//! ## Quick Start
//!
//! ```no_run
//! use jpeg_archive::{QualityPreset, Recompressor};
//!
//! # fn main() -> Result<(), jpeg_archive::Error> {
//! let original = std::fs::read("photo.jpg").map_err(|_| jpeg_archive::Error::EmptyInput)?;
//!
//! let result = Recompressor::new(QualityPreset::Medium).recompress(&original)?;
//! println!(
//!     "{} -> {} bytes at quality {:?}",
//!     original.len(),
//!     result.jpeg.len(),
//!     result.quality()
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Quality Presets
//!
//! | Preset | SSIM target |
//! |--------|-------------|
//! | [`QualityPreset::Low`] | 0.999 |
//! | [`QualityPreset::Medium`] | 0.9999 (default) |
//! | [`QualityPreset::High`] | 0.99995 |
//! | [`QualityPreset::VeryHigh`] | 0.99999 |
//!
//! ## Batch Processing
//!
//! Calls share no state, so independent files can be processed from
//! separate threads:
//!
//! ```no_run
//! use jpeg_archive::{ErrorCode, QualityPreset, Recompressor};
//!
//! # fn example(files: Vec<Vec<u8>>) {
//! let settings = Recompressor::new(QualityPreset::High).keep_unsuitable(true);
//! std::thread::scope(|s| {
//!     for file in &files {
//!         let settings = &settings;
//!         s.spawn(move || match settings.recompress(file) {
//!             Ok(out) => println!("{:?}: {} bytes", out.outcome, out.jpeg.len()),
//!             Err(e) => eprintln!("{:?}: {}", e.code(), e),
//!         });
//!     }
//! });
//! # let _ = ErrorCode::Ok;
//! # }
//! ```
//!
//! ## Comparing Files
//!
//! ```no_run
//! use jpeg_archive::{compare, Method};
//!
//! # fn main() -> Result<(), jpeg_archive::Error> {
//! # let (a, b): (Vec<u8>, Vec<u8>) = (vec![], vec![]);
//! let cmp = compare(&a, &b, Method::Ssim)?;
//! println!("{}x{} ssim {:.5}", cmp.width, cmp.height, cmp.metric);
//! # Ok(())
//! # }
//! ```

// Only the codec layer talks to C.
#![deny(unsafe_code)]
#![warn(missing_docs)]

// ============================================================================
// Building blocks
// ============================================================================

/// C mozjpeg decode/encode with contained failures.
pub mod codec;

/// Output assembly: APP0, sentinel comment, preserved metadata, scan data.
pub mod container;

/// JPEG segment walking and metadata extraction.
pub mod marker;

/// Quality binary search.
pub mod search;

/// Structural similarity.
pub mod ssim;

mod error;
mod recompress;
mod types;

// ============================================================================
// Test support modules - hidden from public API
// ============================================================================

/// Corpus utilities for locating test images.
#[doc(hidden)]
pub mod corpus;

// ============================================================================
// Public API
// ============================================================================

pub use error::{CodecStage, Error, ErrorCode, Result};

pub use recompress::{compare, recompress, Comparison, Outcome, Recompressed, Recompressor};

pub use types::{
    ColorSpace, Method, PixelLayout, QualityPreset, QualityRange, RasterImage, SubsamplingMode,
    SubsamplingRequest,
};

pub use marker::{detect_subsampling, SENTINEL};
