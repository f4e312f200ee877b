//! Reference-side SSIM precomputation.

use super::kernel::{Kernel, Plane};
use super::{
    check_window, covariance, mean_ssim, moments, prepare, Constants, GrayImage, SsimArgs,
    Window, WindowStats,
};
use crate::error::{Error, Result};

/// Precomputed statistics of one reference image.
///
/// Holds the downscaled reference plane plus its windowed mean and variance,
/// so each [`compare`](SsimModel::compare) convolves only the candidate and
/// the cross term: three convolutions instead of five. The model is
/// immutable after construction and can be shared between threads for
/// concurrent comparisons.
#[derive(Debug, Clone)]
pub struct SsimModel {
    width: usize,
    height: usize,
    scale: usize,
    args: SsimArgs,
    constants: Constants,
    kernel: Kernel,
    reference: Plane,
    mu: Plane,
    sigma_sqd: Plane,
}

impl SsimModel {
    /// Builds the model for `reference`.
    ///
    /// # Errors
    ///
    /// - [`Error::ImageTooSmall`] if no full window fits after downscaling
    /// - [`Error::AllocationFailed`] if a working plane cannot be allocated
    pub fn new(reference: GrayImage<'_>, window: Window, args: &SsimArgs) -> Result<Self> {
        let (width, height) = (reference.width(), reference.height());
        let scale = args.scale_for(width, height);
        let plane = prepare(reference, scale)?;
        check_window(&plane, window)?;

        let kernel = window.kernel();
        let (mu, sigma_sqd) = moments(&plane, &kernel)?;
        tracing::trace!(
            "SSIM model {}x{} scale {} -> {}x{} windows",
            width,
            height,
            scale,
            mu.width,
            mu.height
        );
        Ok(Self {
            width,
            height,
            scale,
            args: *args,
            constants: Constants::new(args),
            kernel,
            reference: plane,
            mu,
            sigma_sqd,
        })
    }

    /// Mean SSIM of `candidate` against the reference.
    ///
    /// Agrees with [`ssim`](super::ssim) on the same pair.
    pub fn compare(&self, candidate: GrayImage<'_>) -> Result<f32> {
        if (candidate.width(), candidate.height()) != (self.width, self.height) {
            return Err(Error::DimensionMismatch(
                self.width,
                self.height,
                candidate.width(),
                candidate.height(),
            ));
        }
        let cmp = prepare(candidate, self.scale)?;
        let (cmp_mu, cmp_sigma_sqd) = moments(&cmp, &self.kernel)?;
        let sigma_both = covariance(&self.reference, &cmp, &self.mu, &cmp_mu, &self.kernel)?;

        mean_ssim(
            &WindowStats {
                mu1: &self.mu.data,
                mu2: &cmp_mu.data,
                sigma1_sqd: &self.sigma_sqd.data,
                sigma2_sqd: &cmp_sigma_sqd.data,
                sigma12: &sigma_both.data,
            },
            self.constants,
            &self.args,
        )
    }

    /// Reference width before downscaling.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Reference height before downscaling.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Downscale factor in use.
    pub fn scale(&self) -> usize {
        self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::super::ssim;
    use super::super::tests::{pattern, perturb};
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_model_matches_pairwise() {
        let (w, h) = (96, 80);
        let reference = pattern(w, h, 11);
        let ref_img = GrayImage::new(&reference, w, h).unwrap();
        for window in [Window::Square, Window::Gaussian] {
            let model = SsimModel::new(ref_img, window, &SsimArgs::default()).unwrap();
            for amount in [0, 3, 25] {
                let candidate = perturb(&reference, amount);
                let cmp_img = GrayImage::new(&candidate, w, h).unwrap();
                let direct = ssim(ref_img, cmp_img, window, &SsimArgs::default()).unwrap();
                let fast = model.compare(cmp_img).unwrap();
                assert!((direct - fast).abs() < 1e-4, "{window:?} {amount}: {direct} vs {fast}");
            }
        }
    }

    #[test]
    fn test_model_with_downscale() {
        // 600 / 256 rounds to 2
        let (w, h) = (700, 600);
        let reference = pattern(w, h, 2);
        let candidate = perturb(&reference, 4);
        let ref_img = GrayImage::new(&reference, w, h).unwrap();
        let cmp_img = GrayImage::new(&candidate, w, h).unwrap();
        let model = SsimModel::new(ref_img, Window::Square, &SsimArgs::default()).unwrap();
        assert_eq!(model.scale(), 2);
        let direct = ssim(ref_img, cmp_img, Window::Square, &SsimArgs::default()).unwrap();
        assert!((model.compare(cmp_img).unwrap() - direct).abs() < 1e-4);
    }

    #[test]
    fn test_model_rejects_other_dimensions() {
        let reference = pattern(32, 32, 1);
        let model = SsimModel::new(
            GrayImage::new(&reference, 32, 32).unwrap(),
            Window::Square,
            &SsimArgs::default(),
        )
        .unwrap();
        let other = pattern(32, 33, 1);
        assert_eq!(
            model.compare(GrayImage::new(&other, 32, 33).unwrap()),
            Err(Error::DimensionMismatch(32, 32, 32, 33))
        );
        assert_eq!((model.width(), model.height()), (32, 32));
    }

    #[test]
    fn test_model_too_small() {
        let tiny = pattern(6, 40, 1);
        assert!(matches!(
            SsimModel::new(
                GrayImage::new(&tiny, 6, 40).unwrap(),
                Window::Square,
                &SsimArgs::default()
            ),
            Err(Error::ImageTooSmall { window: 8, .. })
        ));
    }

    proptest! {
        #[test]
        fn model_agrees_with_pairwise(
            seed in 0u32..500,
            amount in 0u8..50,
            gaussian in any::<bool>(),
            gamma in prop_oneof![Just(1.0f32), 0.5f32..2.0],
        ) {
            let (w, h) = (36, 28);
            let reference = pattern(w, h, seed);
            let candidate = perturb(&reference, amount);
            let window = if gaussian { Window::Gaussian } else { Window::Square };
            let args = SsimArgs { gamma, ..SsimArgs::default() };
            let ref_img = GrayImage::new(&reference, w, h).unwrap();
            let cmp_img = GrayImage::new(&candidate, w, h).unwrap();
            let model = SsimModel::new(ref_img, window, &args).unwrap();
            let direct = ssim(ref_img, cmp_img, window, &args).unwrap();
            prop_assert!((model.compare(cmp_img).unwrap() - direct).abs() < 1e-4);
        }
    }
}
