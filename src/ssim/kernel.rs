//! Float planes, window kernels, convolution and decimation.
//!
//! Convolution keeps only the "valid" region (no border handling), so a
//! `w x h` plane convolved with a `kw x kh` window yields
//! `(w - kw + 1) x (h - kh + 1)` values. Decimation samples a box filter
//! every `factor` pixels and reflects symmetrically at the borders.
//!
//! Products are formed in `f32` and accumulated in `f64`; each output value
//! is stored back as `f32`.

use multiversion::multiversion;

use crate::error::Result;

/// Side of the uniform window.
pub(crate) const SQUARE_LEN: usize = 8;
/// Side of the Gaussian window.
pub(crate) const GAUSSIAN_LEN: usize = 11;
const GAUSSIAN_SIGMA: f64 = 1.5;

/// Zero-filled buffer, reporting allocation failure instead of aborting.
pub(crate) fn try_zeroed(len: usize) -> Result<Vec<f32>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)?;
    v.resize(len, 0.0);
    Ok(v)
}

/// Row-major `f32` image without padding.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Plane {
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
}

impl Plane {
    pub fn zeroed(width: usize, height: usize) -> Result<Self> {
        Ok(Self {
            data: try_zeroed(width * height)?,
            width,
            height,
        })
    }

    /// Elementwise product of two same-sized planes.
    pub fn product(&self, other: &Plane) -> Result<Plane> {
        debug_assert_eq!((self.width, self.height), (other.width, other.height));
        let mut out = Plane::zeroed(self.width, self.height)?;
        for ((o, a), b) in out.data.iter_mut().zip(&self.data).zip(&other.data) {
            *o = a * b;
        }
        Ok(out)
    }

    /// Elementwise square.
    pub fn squared(&self) -> Result<Plane> {
        self.product(self)
    }
}

/// Normalized 2-D weights, row-major.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Kernel {
    pub weights: Vec<f32>,
    pub width: usize,
    pub height: usize,
}

impl Kernel {
    /// `n x n` box with every weight `1 / n²`.
    pub fn uniform(n: usize) -> Self {
        let w = 1.0f32 / (n * n) as f32;
        Self {
            weights: vec![w; n * n],
            width: n,
            height: n,
        }
    }

    /// 11x11 circularly-symmetric Gaussian, σ = 1.5, summing to 1.
    pub fn gaussian() -> Self {
        let n = GAUSSIAN_LEN;
        let c = (n / 2) as f64;
        let raw: Vec<f64> = (0..n * n)
            .map(|i| {
                let dy = (i / n) as f64 - c;
                let dx = (i % n) as f64 - c;
                (-(dx * dx + dy * dy) / (2.0 * GAUSSIAN_SIGMA * GAUSSIAN_SIGMA)).exp()
            })
            .collect();
        let total: f64 = raw.iter().sum();
        Self {
            weights: raw.iter().map(|v| (v / total) as f32).collect(),
            width: n,
            height: n,
        }
    }
}

/// Symmetric reflection: -1 maps to 0, `n` maps to `n - 1`.
fn reflect(i: isize, n: usize) -> usize {
    let n = n as isize;
    let r = if i < 0 {
        -1 - i
    } else if i >= n {
        n - (i - n) - 1
    } else {
        i
    };
    r.clamp(0, n - 1) as usize
}

/// Filters one pixel centred at (x, y), reflecting out-of-range taps.
///
/// For even kernel sizes the extra tap falls on the negative side.
fn filter_pixel(img: &Plane, x: usize, y: usize, k: &Kernel) -> f32 {
    let (hw, hh) = ((k.width / 2) as isize, (k.height / 2) as isize);
    let w_even = (k.width % 2 == 0) as isize;
    let h_even = (k.height % 2 == 0) as isize;
    let (x, y) = (x as isize, y as isize);

    let mut sum = 0.0f64;
    let mut k_offset = 0;
    for v in -hh..=hh - h_even {
        let row = reflect(y + v, img.height) * img.width;
        for u in -hw..=hw - w_even {
            let px = img.data[row + reflect(x + u, img.width)];
            sum += (px * k.weights[k_offset]) as f64;
            k_offset += 1;
        }
    }
    sum as f32
}

/// Downsamples by `factor` with the box filter `k`.
///
/// The output is `w / factor + (w & 1)` wide and `h / factor + (h & 1)` tall.
pub(crate) fn decimate(img: &Plane, factor: usize, k: &Kernel) -> Result<Plane> {
    let sw = img.width / factor + (img.width & 1);
    let sh = img.height / factor + (img.height & 1);
    let mut out = Plane::zeroed(sw, sh)?;
    for y in 0..sh {
        for x in 0..sw {
            out.data[y * sw + x] = filter_pixel(img, x * factor, y * factor, k);
        }
    }
    Ok(out)
}

/// Valid-region convolution of `img` with `k`.
pub(crate) fn convolve(img: &Plane, k: &Kernel) -> Result<Plane> {
    debug_assert!(img.width >= k.width && img.height >= k.height);
    let dst_w = img.width - k.width + 1;
    let dst_h = img.height - k.height + 1;
    let mut out = Plane::zeroed(dst_w, dst_h)?;
    convolve_valid(
        &img.data,
        img.width,
        &k.weights,
        k.width,
        k.height,
        &mut out.data,
        dst_w,
    );
    Ok(out)
}

#[multiversion(targets(
    "x86_64+avx2",
    "x86_64+sse4.1",
    "x86+avx2",
    "x86+sse4.1",
    "aarch64+neon",
))]
fn convolve_valid(
    src: &[f32],
    src_w: usize,
    kernel: &[f32],
    kw: usize,
    kh: usize,
    dst: &mut [f32],
    dst_w: usize,
) {
    for (y, dst_row) in dst.chunks_exact_mut(dst_w).enumerate() {
        for (x, out) in dst_row.iter_mut().enumerate() {
            let mut sum = 0.0f64;
            for (v, k_row) in kernel.chunks_exact(kw).take(kh).enumerate() {
                let start = (y + v) * src_w + x;
                for (px, weight) in src[start..start + kw].iter().zip(k_row) {
                    sum += (px * weight) as f64;
                }
            }
            *out = sum as f32;
        }
    }
}
