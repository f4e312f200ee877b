//! Structural similarity (SSIM) between grayscale images.
//!
//! Two entry points compute the same number:
//!
//! - [`ssim`] compares a pair of images in one shot.
//! - [`SsimModel`] precomputes the reference side (downscaled plane, windowed
//!   mean and variance) once, then [`SsimModel::compare`] only convolves the
//!   candidate and the cross term. Useful when one original is checked
//!   against many re-encodes.
//!
//! Both downscale by `max(1, round(min(w, h) / 256))` before windowing (unless
//! [`SsimArgs::factor`] overrides it), use the 8x8 uniform or 11x11 Gaussian
//! [`Window`], and return the mean SSIM over all window positions.
//!
//! ```no_run
//! use jpeg_archive::ssim::{ssim, GrayImage, SsimArgs, SsimModel, Window};
//!
//! # fn main() -> Result<(), jpeg_archive::Error> {
//! # let (a, b) = (vec![0u8; 64 * 64], vec![0u8; 64 * 64]);
//! let reference = GrayImage::new(&a, 64, 64)?;
//! let candidate = GrayImage::new(&b, 64, 64)?;
//!
//! let direct = ssim(reference, candidate, Window::Square, &SsimArgs::default())?;
//! let model = SsimModel::new(reference, Window::Square, &SsimArgs::default())?;
//! assert!((model.compare(candidate)? - direct).abs() < 1e-4);
//! # Ok(())
//! # }
//! ```

mod kernel;
mod model;

pub use model::SsimModel;

use kernel::{convolve, decimate, Kernel, Plane, GAUSSIAN_LEN, SQUARE_LEN};

use crate::error::{Error, Result};
use crate::types::{PixelLayout, RasterImage};

// =============================================================================
// Inputs
// =============================================================================

/// Borrowed 8-bit grayscale image, possibly with row padding.
#[derive(Debug, Clone, Copy)]
pub struct GrayImage<'a> {
    pixels: &'a [u8],
    width: usize,
    height: usize,
    stride: usize,
}

impl<'a> GrayImage<'a> {
    /// Tightly packed image.
    pub fn new(pixels: &'a [u8], width: usize, height: usize) -> Result<Self> {
        Self::with_stride(pixels, width, height, width)
    }

    /// Image whose rows start `stride` bytes apart.
    pub fn with_stride(pixels: &'a [u8], width: usize, height: usize, stride: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidDimensions { width, height });
        }
        if stride < width {
            return Err(Error::InvalidInput("stride is smaller than width"));
        }
        let expected = stride
            .checked_mul(height - 1)
            .and_then(|n| n.checked_add(width))
            .ok_or(Error::InvalidDimensions { width, height })?;
        if pixels.len() < expected {
            return Err(Error::BufferSizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            pixels,
            width,
            height,
            stride,
        })
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    fn to_plane(self) -> Result<Plane> {
        let mut plane = Plane::zeroed(self.width, self.height)?;
        for (dst, src) in plane
            .data
            .chunks_exact_mut(self.width)
            .zip(self.pixels.chunks(self.stride))
        {
            for (d, &s) in dst.iter_mut().zip(src) {
                *d = s as f32;
            }
        }
        Ok(plane)
    }
}

impl<'a> TryFrom<&'a RasterImage> for GrayImage<'a> {
    type Error = Error;

    fn try_from(image: &'a RasterImage) -> Result<Self> {
        if image.layout() != PixelLayout::Gray {
            return Err(Error::InvalidInput("SSIM needs a grayscale raster"));
        }
        GrayImage::new(image.pixels(), image.width(), image.height())
    }
}

/// SSIM window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Window {
    /// 8x8 uniform weights
    #[default]
    Square,
    /// 11x11 Gaussian, σ = 1.5
    Gaussian,
}

impl Window {
    fn kernel(self) -> Kernel {
        match self {
            Window::Square => Kernel::uniform(SQUARE_LEN),
            Window::Gaussian => Kernel::gaussian(),
        }
    }

    /// Side length in pixels.
    pub fn size(self) -> usize {
        match self {
            Window::Square => SQUARE_LEN,
            Window::Gaussian => GAUSSIAN_LEN,
        }
    }
}

/// Tuning knobs for SSIM.
///
/// The defaults reproduce the standard index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SsimArgs {
    /// Luminance exponent
    pub alpha: f32,
    /// Contrast exponent
    pub beta: f32,
    /// Structure exponent
    pub gamma: f32,
    /// Dynamic range of pixel values
    pub l: i32,
    /// Luminance stabilizer
    pub k1: f32,
    /// Contrast stabilizer
    pub k2: f32,
    /// Downscale factor; `None` (or 0) picks one from the image size
    pub factor: Option<usize>,
}

impl Default for SsimArgs {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            gamma: 1.0,
            l: 255,
            k1: 0.01,
            k2: 0.03,
            factor: None,
        }
    }
}

impl SsimArgs {
    fn is_standard(&self) -> bool {
        self.alpha == 1.0 && self.beta == 1.0 && self.gamma == 1.0
    }

    /// Downscale factor for a `width x height` image.
    pub fn scale_for(&self, width: usize, height: usize) -> usize {
        match self.factor {
            Some(f) if f > 0 => f,
            _ => ((width.min(height) as f32 / 256.0).round() as usize).max(1),
        }
    }
}

/// Stabilizing constants, kept in `f32`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Constants {
    c1: f32,
    c2: f32,
    c3: f32,
}

impl Constants {
    fn new(args: &SsimArgs) -> Self {
        let l = args.l as f32;
        let c1 = (args.k1 * l) * (args.k1 * l);
        let c2 = (args.k2 * l) * (args.k2 * l);
        Self {
            c1,
            c2,
            c3: c2 / 2.0,
        }
    }
}

// =============================================================================
// Shared steps
// =============================================================================

/// Converts to float and downsamples by `scale` if needed.
fn prepare(image: GrayImage<'_>, scale: usize) -> Result<Plane> {
    let plane = image.to_plane()?;
    if scale > 1 {
        decimate(&plane, scale, &Kernel::uniform(scale))
    } else {
        Ok(plane)
    }
}

fn check_window(plane: &Plane, window: Window) -> Result<()> {
    let size = window.size();
    if plane.width < size || plane.height < size {
        return Err(Error::ImageTooSmall {
            width: plane.width,
            height: plane.height,
            window: size,
        });
    }
    Ok(())
}

/// Windowed mean and variance of one image.
fn moments(plane: &Plane, kernel: &Kernel) -> Result<(Plane, Plane)> {
    let mu = convolve(plane, kernel)?;
    let mut sigma_sqd = convolve(&plane.squared()?, kernel)?;
    for (s, m) in sigma_sqd.data.iter_mut().zip(&mu.data) {
        *s -= m * m;
    }
    Ok((mu, sigma_sqd))
}

/// Windowed covariance, given both windowed means.
fn covariance(a: &Plane, b: &Plane, mu_a: &Plane, mu_b: &Plane, kernel: &Kernel) -> Result<Plane> {
    let mut sigma_both = convolve(&a.product(b)?, kernel)?;
    for ((s, ma), mb) in sigma_both.data.iter_mut().zip(&mu_a.data).zip(&mu_b.data) {
        *s -= ma * mb;
    }
    Ok(sigma_both)
}

/// Per-window statistics of a reference/candidate pair.
struct WindowStats<'s> {
    mu1: &'s [f32],
    mu2: &'s [f32],
    sigma1_sqd: &'s [f32],
    sigma2_sqd: &'s [f32],
    sigma12: &'s [f32],
}

/// Sign-preserving power.
fn signed_pow(value: f64, exponent: f32) -> f64 {
    if exponent == 1.0 {
        value
    } else {
        let sign = if value < 0.0 { -1.0 } else { 1.0 };
        sign * value.abs().powf(exponent as f64)
    }
}

/// Mean SSIM over all windows.
fn mean_ssim(stats: &WindowStats<'_>, consts: Constants, args: &SsimArgs) -> Result<f32> {
    let Constants { c1, c2, c3 } = consts;
    let count = stats.mu1.len();
    let mut sum = 0.0f64;

    if args.is_standard() {
        for i in 0..count {
            let (m1, m2) = (stats.mu1[i], stats.mu2[i]);
            let numerator =
                (2.0 * m1 as f64 * m2 as f64 + c1 as f64) * (2.0 * stats.sigma12[i] as f64 + c2 as f64);
            let denominator =
                (m1 * m1 + m2 * m2 + c1) * (stats.sigma1_sqd[i] + stats.sigma2_sqd[i] + c2);
            sum += numerator / denominator as f64;
        }
    } else {
        for i in 0..count {
            let (m1, m2) = (stats.mu1[i], stats.mu2[i]);
            // separable convolution can leave tiny negative variances
            let s1 = stats.sigma1_sqd[i].max(0.0);
            let s2 = stats.sigma2_sqd[i].max(0.0);
            let sigma_root = ((s1 * s2) as f64).sqrt();

            let luminance = if c1 == 0.0 && m1 * m1 == 0.0 && m2 * m2 == 0.0 {
                1.0
            } else {
                let r = (2.0 * m1 as f64 * m2 as f64 + c1 as f64) / (m1 * m1 + m2 * m2 + c1) as f64;
                signed_pow(r, args.alpha)
            };
            let contrast = if c2 == 0.0 && s1 + s2 == 0.0 {
                1.0
            } else {
                let r = (2.0 * sigma_root + c2 as f64) / (s1 + s2 + c2) as f64;
                signed_pow(r, args.beta)
            };
            let structure = if c3 == 0.0 && sigma_root == 0.0 {
                1.0
            } else {
                let r = (stats.sigma12[i] + c3) as f64 / (sigma_root + c3 as f64);
                signed_pow(r, args.gamma)
            };
            sum += luminance * contrast * structure;
        }
    }

    let mean = (sum / count as f64) as f32;
    if !mean.is_finite() {
        return Err(Error::InvalidInput("SSIM constants produced a non-finite score"));
    }
    Ok(mean)
}

// =============================================================================
// Pairwise
// =============================================================================

/// Mean SSIM between two equally sized images.
///
/// # Errors
///
/// - [`Error::DimensionMismatch`] if the images differ in size
/// - [`Error::ImageTooSmall`] if no full window fits after downscaling
/// - [`Error::AllocationFailed`] if a working plane cannot be allocated
pub fn ssim(
    reference: GrayImage<'_>,
    candidate: GrayImage<'_>,
    window: Window,
    args: &SsimArgs,
) -> Result<f32> {
    if (reference.width, reference.height) != (candidate.width, candidate.height) {
        return Err(Error::DimensionMismatch(
            reference.width,
            reference.height,
            candidate.width,
            candidate.height,
        ));
    }
    let scale = args.scale_for(reference.width, reference.height);
    let ref_f = prepare(reference, scale)?;
    check_window(&ref_f, window)?;
    let cmp_f = prepare(candidate, scale)?;

    let kernel = window.kernel();
    let (ref_mu, ref_sigma_sqd) = moments(&ref_f, &kernel)?;
    let (cmp_mu, cmp_sigma_sqd) = moments(&cmp_f, &kernel)?;
    let sigma_both = covariance(&ref_f, &cmp_f, &ref_mu, &cmp_mu, &kernel)?;

    mean_ssim(
        &WindowStats {
            mu1: &ref_mu.data,
            mu2: &cmp_mu.data,
            sigma1_sqd: &ref_sigma_sqd.data,
            sigma2_sqd: &cmp_sigma_sqd.data,
            sigma12: &sigma_both.data,
        },
        Constants::new(args),
        args,
    )
}
