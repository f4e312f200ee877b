//! Public recompress and compare operations.
//!
//! [`Recompressor::recompress`] runs the whole pipeline:
//!
//! 1. validate parameters (nothing is allocated before this passes)
//! 2. check the SOI magic and walk the header segments; a stream already
//!    carrying the sentinel comment is refused before any decode
//! 3. decode to RGB, derive luma and build an [`SsimModel`] of it
//! 4. [`search`] for the lowest quality meeting the target
//! 5. splice APP0, the sentinel and the original metadata into the result
//!
//! [`compare`] decodes two JPEGs to grayscale and reports their SSIM.

use crate::codec::{decode, encode, EncodeSettings};
use crate::container::assemble;
use crate::error::{Error, Result};
use crate::marker::{has_jpeg_magic, JpegMarkers};
use crate::search::{search, SearchParams};
use crate::ssim::{ssim, GrayImage, SsimArgs, SsimModel, Window};
use crate::types::{
    Method, PixelLayout, QualityPreset, QualityRange, SubsamplingMode, SubsamplingRequest,
};

/// What happened to a recompressed file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    /// New stream, smaller than the input
    Recompressed {
        /// Encoder quality chosen by the search
        quality: u8,
        /// SSIM of the chosen encode
        metric: f32,
    },
    /// Input already carried the sentinel; returned unchanged
    AlreadyProcessed,
    /// Best encode was not smaller; input returned unchanged
    NotSmaller {
        /// Quality of the rejected encode
        quality: u8,
        /// SSIM of the rejected encode
        metric: f32,
        /// Size of the rejected output in bytes
        size: usize,
    },
}

/// Output of [`Recompressor::recompress`].
#[derive(Debug, Clone, PartialEq)]
pub struct Recompressed {
    /// Output stream; the input bytes for pass-through outcomes
    pub jpeg: Vec<u8>,
    /// How `jpeg` was produced
    pub outcome: Outcome,
}

impl Recompressed {
    /// Quality of the returned stream, if it was re-encoded.
    pub fn quality(&self) -> Option<u8> {
        match self.outcome {
            Outcome::Recompressed { quality, .. } => Some(quality),
            _ => None,
        }
    }

    /// SSIM of the returned stream against the input, if it was re-encoded.
    pub fn metric(&self) -> Option<f32> {
        match self.outcome {
            Outcome::Recompressed { metric, .. } => Some(metric),
            _ => None,
        }
    }

    /// True unless the input was passed through.
    pub fn is_recompressed(&self) -> bool {
        matches!(self.outcome, Outcome::Recompressed { .. })
    }
}

/// Recompression settings.
///
/// ```no_run
/// use jpeg_archive::{QualityPreset, Recompressor, SubsamplingRequest};
///
/// # fn main() -> Result<(), jpeg_archive::Error> {
/// # let input: Vec<u8> = vec![];
/// let result = Recompressor::new(QualityPreset::High)
///     .min_quality(50)
///     .subsampling(SubsamplingRequest::Keep)
///     .recompress(&input)?;
/// println!("q={:?} ssim={:?}", result.quality(), result.metric());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Recompressor {
    preset: QualityPreset,
    min_quality: u8,
    max_quality: u8,
    loops: u32,
    target: f32,
    subsampling: SubsamplingRequest,
    method: Method,
    strip_metadata: bool,
    accurate: bool,
    keep_unsuitable: bool,
}

impl Default for Recompressor {
    fn default() -> Self {
        Self::new(QualityPreset::default())
    }
}

impl Recompressor {
    /// Settings aiming for `preset`, with quality bounds 40-95 and six probes.
    pub fn new(preset: QualityPreset) -> Self {
        let range = QualityRange::default();
        Self {
            preset,
            min_quality: range.min,
            max_quality: range.max,
            loops: 6,
            target: 0.0,
            subsampling: SubsamplingRequest::default(),
            method: Method::default(),
            strip_metadata: false,
            accurate: false,
            keep_unsuitable: false,
        }
    }

    /// Lowest quality the search may pick (1-100).
    pub fn min_quality(mut self, quality: u8) -> Self {
        self.min_quality = quality;
        self
    }

    /// Highest quality the search may pick (1-100).
    pub fn max_quality(mut self, quality: u8) -> Self {
        self.max_quality = quality;
        self
    }

    /// Number of encode/measure probes.
    pub fn loops(mut self, loops: u32) -> Self {
        self.loops = loops;
        self
    }

    /// Explicit similarity target; 0 uses the preset's.
    pub fn target(mut self, target: f32) -> Self {
        self.target = target;
        self
    }

    /// Chroma subsampling of the output.
    pub fn subsampling(mut self, request: SubsamplingRequest) -> Self {
        self.subsampling = request;
        self
    }

    /// Similarity metric.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Drops APPn/COM metadata from the output.
    pub fn strip_metadata(mut self, strip: bool) -> Self {
        self.strip_metadata = strip;
        self
    }

    /// Runs every probe with full optimization. Slower, and the measured
    /// quality matches the final encode more closely.
    pub fn accurate(mut self, accurate: bool) -> Self {
        self.accurate = accurate;
        self
    }

    /// Returns unsuitable inputs unchanged instead of failing.
    pub fn keep_unsuitable(mut self, keep: bool) -> Self {
        self.keep_unsuitable = keep;
        self
    }

    /// Similarity the search must reach.
    pub fn effective_target(&self) -> f32 {
        if self.target != 0.0 {
            return self.target;
        }
        match self.method {
            Method::Ssim => self.preset.ssim_target(),
        }
    }

    fn search_params(&self) -> Result<SearchParams> {
        let range = QualityRange::new(self.min_quality, self.max_quality)?;
        if self.loops == 0 {
            return Err(Error::InvalidLoopCount);
        }
        let target = self.effective_target();
        if !target.is_finite() || target < 0.0 {
            return Err(Error::InvalidTarget(self.target.to_string()));
        }
        Ok(SearchParams {
            range,
            loops: self.loops,
            target,
            accurate: self.accurate,
            subsampling: SubsamplingMode::Default420,
        })
    }

    /// Recompresses `jpeg` to the smallest size that meets the target.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyInput`], [`Error::InvalidQuality`],
    ///   [`Error::InvalidQualityRange`], [`Error::InvalidLoopCount`],
    ///   [`Error::InvalidTarget`] for bad parameters
    /// - [`Error::NotJpeg`] without the SOI magic
    /// - [`Error::UnsupportedColorSpace`] for CMYK/YCCK input
    /// - [`Error::AlreadyProcessed`], [`Error::NotSmaller`] unless
    ///   [`keep_unsuitable`](Self::keep_unsuitable) is set
    /// - [`Error::Codec`] if libjpeg rejects the input or an intermediate
    pub fn recompress(&self, jpeg: &[u8]) -> Result<Recompressed> {
        if jpeg.is_empty() {
            return Err(Error::EmptyInput);
        }
        let mut params = self.search_params()?;
        if !has_jpeg_magic(jpeg) {
            return Err(Error::NotJpeg);
        }

        let markers = JpegMarkers::scan(jpeg)?;
        if markers.already_processed {
            return self.unsuitable(jpeg, Error::AlreadyProcessed, Outcome::AlreadyProcessed);
        }
        params.subsampling = match self.subsampling {
            SubsamplingRequest::Force420 => SubsamplingMode::Default420,
            SubsamplingRequest::Keep => markers.subsampling(),
            SubsamplingRequest::Force444 => SubsamplingMode::Full444,
        };

        let original = decode(jpeg, PixelLayout::Rgb)?;
        let luma = original.to_gray()?;
        let model = match self.method {
            Method::Ssim => SsimModel::new(
                GrayImage::try_from(&luma)?,
                Window::Square,
                &SsimArgs::default(),
            )?,
        };
        drop(luma);
        tracing::debug!(
            "recompressing {}x{} ({} bytes), target {} {:?}",
            original.width(),
            original.height(),
            jpeg.len(),
            params.target,
            params.subsampling
        );

        let mut probe = |settings: &EncodeSettings| -> Result<(Vec<u8>, f32)> {
            let encoded = encode(&original, &settings.jfif(markers.jfif))?;
            let decoded = decode(&encoded, PixelLayout::Gray)?;
            let metric = model.compare(GrayImage::try_from(&decoded)?)?;
            Ok((encoded, metric))
        };
        let best = search(&mut probe, &params)?;

        let output = assemble(&best.jpeg, &markers.metadata, self.strip_metadata)?;
        if output.len() >= jpeg.len() {
            let outcome = Outcome::NotSmaller {
                quality: best.quality,
                metric: best.metric,
                size: output.len(),
            };
            let err = Error::NotSmaller {
                original: jpeg.len(),
                recompressed: output.len(),
            };
            return self.unsuitable(jpeg, err, outcome);
        }

        tracing::debug!(
            "quality {} ssim {:.6}: {} -> {} bytes",
            best.quality,
            best.metric,
            jpeg.len(),
            output.len()
        );
        Ok(Recompressed {
            jpeg: output,
            outcome: Outcome::Recompressed {
                quality: best.quality,
                metric: best.metric,
            },
        })
    }

    fn unsuitable(&self, jpeg: &[u8], err: Error, outcome: Outcome) -> Result<Recompressed> {
        if !self.keep_unsuitable {
            tracing::debug!("{}", err);
            return Err(err);
        }
        tracing::debug!("{}; keeping input", err);
        let mut copy = Vec::new();
        copy.try_reserve_exact(jpeg.len())?;
        copy.extend_from_slice(jpeg);
        Ok(Recompressed { jpeg: copy, outcome })
    }
}

/// Recompresses with default settings for `preset`.
pub fn recompress(jpeg: &[u8], preset: QualityPreset) -> Result<Recompressed> {
    Recompressor::new(preset).recompress(jpeg)
}

/// Result of [`compare`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    /// Similarity of the second image to the first
    pub metric: f32,
    /// Shared width
    pub width: usize,
    /// Shared height
    pub height: usize,
}

/// Similarity between two JPEGs of the same size.
///
/// # Errors
///
/// - [`Error::EmptyInput`] if either buffer is empty
/// - [`Error::NotJpeg`] if either lacks the SOI magic
/// - [`Error::DimensionMismatch`] if the decoded sizes differ
/// - [`Error::UnsupportedColorSpace`] for CMYK/YCCK input
pub fn compare(first: &[u8], second: &[u8], method: Method) -> Result<Comparison> {
    if first.is_empty() || second.is_empty() {
        return Err(Error::EmptyInput);
    }
    if !has_jpeg_magic(first) || !has_jpeg_magic(second) {
        return Err(Error::NotJpeg);
    }
    let a = decode(first, PixelLayout::Gray)?;
    let b = decode(second, PixelLayout::Gray)?;
    if (a.width(), a.height()) != (b.width(), b.height()) {
        return Err(Error::DimensionMismatch(
            a.width(),
            a.height(),
            b.width(),
            b.height(),
        ));
    }
    let metric = match method {
        Method::Ssim => ssim(
            GrayImage::try_from(&a)?,
            GrayImage::try_from(&b)?,
            Window::Square,
            &SsimArgs::default(),
        )?,
    };
    tracing::debug!("compared {}x{}: ssim {:.6}", a.width(), a.height(), metric);
    Ok(Comparison {
        metric,
        width: a.width(),
        height: a.height(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::marker::SENTINEL;
    use crate::types::RasterImage;

    /// Textured RGB test image encoded at high quality.
    fn sample_jpeg(width: usize, height: usize, quality: u8) -> Vec<u8> {
        let mut pixels = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            for x in 0..width {
                let n = ((x * 7 + y * 13) ^ (x * y)) % 23;
                pixels.push(((x * 255 / width) as u8).wrapping_add(n as u8));
                pixels.push(((y * 255 / height) as u8).wrapping_sub(n as u8));
                pixels.push(((x + y) * 2 % 256) as u8);
            }
        }
        let image = RasterImage::new(pixels, width, height, PixelLayout::Rgb).unwrap();
        encode(&image, &EncodeSettings::new(quality).subsampling(SubsamplingMode::Full444)).unwrap()
    }

    #[test]
    fn test_parameters_rejected_before_decode() {
        // invalid parameters win over a malformed buffer
        let garbage = b"definitely not a jpeg";
        let cases = [
            (Recompressor::default().min_quality(0), Error::InvalidQuality(0)),
            (Recompressor::default().max_quality(101), Error::InvalidQuality(101)),
            (
                Recompressor::default().min_quality(90).max_quality(40),
                Error::InvalidQualityRange { min: 90, max: 40 },
            ),
            (Recompressor::default().loops(0), Error::InvalidLoopCount),
        ];
        for (settings, expected) in cases {
            assert_eq!(settings.recompress(garbage), Err(expected));
        }
        assert!(matches!(
            Recompressor::default().target(-1.0).recompress(garbage),
            Err(Error::InvalidTarget(_))
        ));
        assert_eq!(
            Recompressor::default().recompress(&[]),
            Err(Error::EmptyInput)
        );
        assert_eq!(
            Recompressor::default().recompress(garbage),
            Err(Error::NotJpeg)
        );
    }

    #[test]
    fn test_effective_target() {
        assert_eq!(Recompressor::default().effective_target(), 0.9999);
        assert_eq!(
            Recompressor::new(QualityPreset::Low).effective_target(),
            0.999
        );
        assert_eq!(
            Recompressor::new(QualityPreset::Low)
                .target(0.95)
                .effective_target(),
            0.95
        );
    }

    #[test]
    fn test_recompress_shrinks_and_marks() {
        let input = sample_jpeg(128, 96, 98);
        let out = Recompressor::new(QualityPreset::Low)
            .recompress(&input)
            .unwrap();
        assert!(out.is_recompressed());
        assert!(out.jpeg.len() < input.len());
        let quality = out.quality().unwrap();
        assert!((40..=95).contains(&quality), "{quality}");
        assert!(JpegMarkers::scan(&out.jpeg).unwrap().already_processed);

        let again = Recompressor::new(QualityPreset::Low).recompress(&out.jpeg);
        assert_eq!(again, Err(Error::AlreadyProcessed));
        assert_eq!(ErrorCode::of(&again), ErrorCode::NotSuitable);
    }

    #[test]
    fn test_keep_unsuitable_passes_input_through() {
        let input = sample_jpeg(64, 64, 95);
        let first = Recompressor::new(QualityPreset::Low)
            .recompress(&input)
            .unwrap();
        let kept = Recompressor::new(QualityPreset::Low)
            .keep_unsuitable(true)
            .recompress(&first.jpeg)
            .unwrap();
        assert_eq!(kept.outcome, Outcome::AlreadyProcessed);
        assert_eq!(kept.jpeg, first.jpeg);
        assert_eq!(kept.quality(), None);
    }

    #[test]
    fn test_not_smaller() {
        // a low-quality source cannot shrink at quality 100
        let input = sample_jpeg(64, 64, 30);
        let settings = Recompressor::default()
            .min_quality(100)
            .max_quality(100)
            .target(0.5);
        assert!(matches!(
            settings.recompress(&input),
            Err(Error::NotSmaller { .. })
        ));
        let kept = settings.keep_unsuitable(true).recompress(&input).unwrap();
        assert!(matches!(
            kept.outcome,
            Outcome::NotSmaller { quality: 100, .. }
        ));
        assert_eq!(kept.jpeg, input);
    }

    #[test]
    fn test_compare_self_and_distorted() {
        let input = sample_jpeg(96, 64, 95);
        let same = compare(&input, &input, Method::Ssim).unwrap();
        assert!((same.metric - 1.0).abs() < 1e-4);
        assert_eq!((same.width, same.height), (96, 64));

        let image = decode(&input, PixelLayout::Rgb).unwrap();
        let worse = encode(&image, &EncodeSettings::new(10)).unwrap();
        let cmp = compare(&input, &worse, Method::Ssim).unwrap();
        assert!(cmp.metric < same.metric);
    }

    #[test]
    fn test_compare_errors() {
        let a = sample_jpeg(64, 64, 90);
        let b = sample_jpeg(64, 48, 90);
        assert_eq!(
            compare(&a, &b, Method::Ssim),
            Err(Error::DimensionMismatch(64, 64, 64, 48))
        );
        assert_eq!(
            ErrorCode::of(&compare(&a, &b, Method::Ssim)),
            ErrorCode::Unsupported
        );
        assert_eq!(compare(&a, b"nope", Method::Ssim), Err(Error::NotJpeg));
        assert_eq!(compare(&[], &a, Method::Ssim), Err(Error::EmptyInput));
    }

    #[test]
    fn test_sentinel_constant() {
        assert_eq!(SENTINEL, "Compressed by jpeg-recompress");
    }
}
