//! Core type definitions for jpeg-archive.
//!
//! Pixel buffers, subsampling modes, and the enumerations callers use to
//! configure a recompression.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

// =============================================================================
// Color Spaces
// =============================================================================

/// JPEG color space, as stored in a file or requested from the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    /// Unknown/unspecified color space
    #[default]
    Unknown,
    /// Grayscale (1 component)
    Grayscale,
    /// RGB (3 components)
    Rgb,
    /// YCbCr (3 components)
    YCbCr,
    /// CMYK (4 components)
    Cmyk,
    /// YCCK (4 components, Y/Cb/Cr/K)
    Ycck,
}

impl ColorSpace {
    /// Returns true if the decoder can produce RGB or grayscale from this space.
    pub const fn is_convertible(self) -> bool {
        matches!(
            self,
            ColorSpace::Grayscale | ColorSpace::Rgb | ColorSpace::YCbCr
        )
    }
}

/// Pixel layout of a [`RasterImage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// 3 bytes per pixel, R G B
    Rgb,
    /// 1 byte per pixel, luma
    Gray,
}

impl PixelLayout {
    /// Bytes per pixel.
    pub const fn channels(self) -> usize {
        match self {
            PixelLayout::Rgb => 3,
            PixelLayout::Gray => 1,
        }
    }

    /// Color space the decoder is asked for to produce this layout.
    pub const fn color_space(self) -> ColorSpace {
        match self {
            PixelLayout::Rgb => ColorSpace::Rgb,
            PixelLayout::Gray => ColorSpace::Grayscale,
        }
    }
}

// =============================================================================
// Raster images
// =============================================================================

/// Owned, tightly packed pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pixels: Vec<u8>,
    width: usize,
    height: usize,
    layout: PixelLayout,
}

impl RasterImage {
    /// Wraps an existing buffer, checking that it covers `width * height` pixels.
    pub fn new(pixels: Vec<u8>, width: usize, height: usize, layout: PixelLayout) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidDimensions { width, height });
        }
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(layout.channels()))
            .ok_or(Error::InvalidDimensions { width, height })?;
        if pixels.len() != expected {
            return Err(Error::BufferSizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            pixels,
            width,
            height,
            layout,
        })
    }

    /// Image width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Image height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Pixel layout.
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// Raw pixel bytes, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width * self.layout.channels()
    }

    /// Consumes the image, returning its buffer.
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Converts to single-channel luma.
    ///
    /// Uses the BT.601 weights with round-half-up; grayscale images are
    /// returned unchanged.
    pub fn to_gray(&self) -> Result<RasterImage> {
        match self.layout {
            PixelLayout::Gray => Ok(self.clone_buffer()?),
            PixelLayout::Rgb => {
                let mut gray = Vec::new();
                gray.try_reserve_exact(self.width * self.height)?;
                let rgb: &[[u8; 3]] = bytemuck::cast_slice(&self.pixels);
                gray.extend(rgb.iter().map(|&[r, g, b]| {
                    (r as f32 * 0.299 + g as f32 * 0.587 + b as f32 * 0.114 + 0.5) as u8
                }));
                Ok(RasterImage {
                    pixels: gray,
                    width: self.width,
                    height: self.height,
                    layout: PixelLayout::Gray,
                })
            }
        }
    }

    fn clone_buffer(&self) -> Result<RasterImage> {
        let mut pixels = Vec::new();
        pixels.try_reserve_exact(self.pixels.len())?;
        pixels.extend_from_slice(&self.pixels);
        Ok(RasterImage {
            pixels,
            width: self.width,
            height: self.height,
            layout: self.layout,
        })
    }
}

// =============================================================================
// Subsampling
// =============================================================================

/// Chroma subsampling applied by the encoder.
///
/// 4:1:1 has no variant of its own; it is always normalized to
/// [`SubsamplingMode::Default420`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SubsamplingMode {
    /// 4:2:0, the codec's default sampling factors
    #[default]
    Default420,
    /// 4:2:2 (horizontal only)
    Horizontal422,
    /// 4:4:4 (no subsampling)
    Full444,
}

impl SubsamplingMode {
    /// Classifies a luma/chroma sampling factor triple.
    ///
    /// Never fails; anything that is not exactly 4:4:4 or 4:2:2 is 4:2:0.
    pub fn from_factors(factors: [(u8, u8); 3]) -> Self {
        match factors {
            [(1, 1), (1, 1), (1, 1)] => SubsamplingMode::Full444,
            [(2, 1), (1, 1), (1, 1)] => SubsamplingMode::Horizontal422,
            // (2,2) is 4:2:0 and (4,1) is 4:1:1, both encoded as 4:2:0
            _ => SubsamplingMode::Default420,
        }
    }

    /// Luma (h, v) sampling factor; chroma is always (1, 1).
    ///
    /// `None` leaves the codec defaults in place.
    pub const fn luma_factors(self) -> Option<(i32, i32)> {
        match self {
            SubsamplingMode::Default420 => None,
            SubsamplingMode::Horizontal422 => Some((2, 1)),
            SubsamplingMode::Full444 => Some((1, 1)),
        }
    }
}

/// What the caller asks for: force a mode, or reuse the source's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SubsamplingRequest {
    /// Always encode 4:2:0
    #[default]
    Force420,
    /// Detect the source's sampling factors and reuse them
    Keep,
    /// Always encode 4:4:4
    Force444,
}

impl SubsamplingRequest {
    /// Maps the integer used by the C interface; unknown values become 4:2:0.
    pub fn from_raw(value: i32) -> Self {
        match value {
            1 => SubsamplingRequest::Keep,
            2 => SubsamplingRequest::Force444,
            _ => SubsamplingRequest::Force420,
        }
    }
}

impl FromStr for SubsamplingRequest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "420" | "default" => Ok(SubsamplingRequest::Force420),
            "keep" => Ok(SubsamplingRequest::Keep),
            "444" | "disable" => Ok(SubsamplingRequest::Force444),
            _ => Err(Error::InvalidInput("unknown subsampling mode")),
        }
    }
}

// =============================================================================
// Quality presets and methods
// =============================================================================

/// Named similarity targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum QualityPreset {
    /// SSIM 0.999
    Low,
    /// SSIM 0.9999
    #[default]
    Medium,
    /// SSIM 0.99995
    High,
    /// SSIM 0.99999
    VeryHigh,
}

impl QualityPreset {
    /// All presets, lowest first.
    pub const ALL: [QualityPreset; 4] = [
        QualityPreset::Low,
        QualityPreset::Medium,
        QualityPreset::High,
        QualityPreset::VeryHigh,
    ];

    /// SSIM threshold the search aims for.
    pub const fn ssim_target(self) -> f32 {
        match self {
            QualityPreset::Low => 0.999,
            QualityPreset::Medium => 0.9999,
            QualityPreset::High => 0.99995,
            QualityPreset::VeryHigh => 0.99999,
        }
    }

    /// Maps the integer used by the C interface; unknown values become Medium.
    pub fn from_raw(value: i32) -> Self {
        match value {
            0 => QualityPreset::Low,
            2 => QualityPreset::High,
            3 => QualityPreset::VeryHigh,
            _ => QualityPreset::Medium,
        }
    }
}

impl FromStr for QualityPreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(QualityPreset::Low),
            "medium" => Ok(QualityPreset::Medium),
            "high" => Ok(QualityPreset::High),
            "veryhigh" => Ok(QualityPreset::VeryHigh),
            _ => Err(Error::InvalidInput("unknown quality preset")),
        }
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QualityPreset::Low => "low",
            QualityPreset::Medium => "medium",
            QualityPreset::High => "high",
            QualityPreset::VeryHigh => "veryhigh",
        };
        f.write_str(name)
    }
}

/// Similarity metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    /// Structural similarity, 8x8 uniform window
    #[default]
    Ssim,
}

impl Method {
    /// Maps the integer used by the C interface. SSIM (0) is the only
    /// method; any other value is [`Error::InvalidInput`].
    pub fn from_raw(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Method::Ssim),
            _ => Err(Error::InvalidInput("unknown comparison method")),
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ssim" => Ok(Method::Ssim),
            _ => Err(Error::InvalidInput("unknown comparison method")),
        }
    }
}

// =============================================================================
// Quality range
// =============================================================================

/// Inclusive encoder quality bounds for the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityRange {
    /// Lowest quality tried
    pub min: u8,
    /// Highest quality tried
    pub max: u8,
}

impl Default for QualityRange {
    fn default() -> Self {
        Self { min: 40, max: 95 }
    }
}

impl QualityRange {
    /// Validated range: both bounds in 1-100 and `min <= max`.
    pub fn new(min: u8, max: u8) -> Result<Self> {
        for q in [min, max] {
            if !(1..=100).contains(&q) {
                return Err(Error::InvalidQuality(q));
            }
        }
        if min > max {
            return Err(Error::InvalidQualityRange { min, max });
        }
        Ok(Self { min, max })
    }
}
