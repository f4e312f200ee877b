//! Binary search for the lowest encoder quality meeting a similarity target.
//!
//! Each iteration encodes at the midpoint of `[min, max]`, decodes the result,
//! measures it against the original and narrows the bounds. Only the last
//! iteration encodes progressively with full optimization, so earlier probes
//! stay cheap. The last iteration's bytes are the answer, even when it landed
//! below the target.
//!
//! The encode/measure step is behind the [`Probe`] trait so the state machine
//! can be driven without a codec.

use crate::codec::EncodeSettings;
use crate::error::{Error, Result};
use crate::types::{QualityRange, SubsamplingMode};

/// One encode + measure step.
pub trait Probe {
    /// Encodes at `settings` and returns the stream with its similarity to
    /// the original.
    fn probe(&mut self, settings: &EncodeSettings) -> Result<(Vec<u8>, f32)>;
}

impl<F> Probe for F
where
    F: FnMut(&EncodeSettings) -> Result<(Vec<u8>, f32)>,
{
    fn probe(&mut self, settings: &EncodeSettings) -> Result<(Vec<u8>, f32)> {
        self(settings)
    }
}

/// Search parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    /// Quality bounds
    pub range: QualityRange,
    /// Iteration budget
    pub loops: u32,
    /// Similarity the result must reach
    pub target: f32,
    /// Optimize every probe, not just the last
    pub accurate: bool,
    /// Chroma subsampling for every probe
    pub subsampling: SubsamplingMode,
}

impl SearchParams {
    /// Default bounds and budget for `target`.
    pub fn new(target: f32) -> Self {
        Self {
            range: QualityRange::default(),
            loops: 6,
            target,
            accurate: false,
            subsampling: SubsamplingMode::Default420,
        }
    }
}

/// Bounds and last measurement of a running search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchState {
    /// Current lower bound
    pub min: u8,
    /// Current upper bound
    pub max: u8,
    /// Quality of the last probe
    pub quality: u8,
    /// Similarity of the last probe
    pub metric: f32,
    /// Probes left after the current one
    pub iterations_remaining: u32,
}

impl SearchState {
    /// Fresh state over `range` with `loops` probes.
    pub fn new(range: QualityRange, loops: u32) -> Result<Self> {
        if loops == 0 {
            return Err(Error::InvalidLoopCount);
        }
        let range = QualityRange::new(range.min, range.max)?;
        Ok(Self {
            min: range.min,
            max: range.max,
            quality: range.min,
            metric: 0.0,
            iterations_remaining: loops,
        })
    }

    /// Floor-biased midpoint of the bounds.
    pub fn midpoint(&self) -> u8 {
        self.min + (self.max - self.min) / 2
    }

    /// Starts the next probe, returning its quality and whether it is the
    /// last one. `None` once the budget is spent.
    pub fn begin(&mut self) -> Option<(u8, bool)> {
        let attempt = self.iterations_remaining.checked_sub(1)?;
        let last = attempt == 0 || self.min == self.max;
        self.iterations_remaining = if last { 0 } else { attempt };
        self.quality = self.midpoint();
        Some((self.quality, last))
    }

    /// Records a measurement and narrows the bounds around it.
    pub fn record(&mut self, metric: f32, target: f32) {
        self.metric = metric;
        if metric < target {
            self.min = (self.quality + 1).min(self.max);
        } else {
            self.max = self.quality.saturating_sub(1).max(self.min);
        }
    }
}

/// Result of a finished search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    /// Quality of the last probe
    pub quality: u8,
    /// Similarity of the last probe
    pub metric: f32,
    /// Stream encoded by the last probe
    pub jpeg: Vec<u8>,
}

/// Runs the search, stopping at the first probe error.
pub fn search<P: Probe + ?Sized>(probe: &mut P, params: &SearchParams) -> Result<SearchOutcome> {
    if !params.target.is_finite() || params.target < 0.0 {
        return Err(Error::InvalidTarget(params.target.to_string()));
    }
    let mut state = SearchState::new(params.range, params.loops)?;
    let mut jpeg = Vec::new();

    while let Some((quality, last)) = state.begin() {
        let settings = EncodeSettings::new(quality)
            .progressive(last)
            .optimize(params.accurate || last)
            .subsampling(params.subsampling);
        let (encoded, metric) = probe.probe(&settings)?;
        let (min, max) = (state.min, state.max);
        state.record(metric, params.target);
        tracing::debug!(
            "quality {} [{}..={}] ssim {:.6} size {} -> [{}..={}]",
            quality,
            min,
            max,
            metric,
            encoded.len(),
            state.min,
            state.max
        );
        // earlier probes are dropped as soon as a newer one exists
        jpeg = encoded;
    }

    tracing::debug!("final quality {} ssim {:.6}", state.quality, state.metric);
    Ok(SearchOutcome {
        quality: state.quality,
        metric: state.metric,
        jpeg,
    })
}
