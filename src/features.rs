//! Feature extraction strategy applied to every closed epoch.

use serde::{Deserialize, Serialize};

use crate::sample::StreamKind;
use crate::spectrum::{Analyzer, Spectrum};
use crate::summary;

/// Features derived from one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Features {
    pub spectrum: Spectrum,
    pub rms: f64,
    pub dominant_freq: f64,
}

/// Computes features from the scalar values of a closed epoch. Runs on the blocking pool, so
/// it may take its time, but it must not fail: any panic is a logic error.
pub trait FeatureExtractor: Send + Sync + 'static {
    fn extract(&self, values: &[f64], sampling_rate: f64) -> Features;
}

/// Spectrum followed by RMS and dominant frequency.
#[derive(Debug, Clone, Copy)]
pub struct SpectralFeatures {
    pub analyzer: Analyzer,
}

impl SpectralFeatures {
    pub fn new(analyzer: Analyzer) -> SpectralFeatures {
        SpectralFeatures { analyzer }
    }

    pub fn for_kind(kind: StreamKind) -> SpectralFeatures {
        match kind {
            StreamKind::Motion => SpectralFeatures::new(Analyzer::motion()),
            StreamKind::Audio => SpectralFeatures::new(Analyzer::audio()),
        }
    }
}

impl FeatureExtractor for SpectralFeatures {
    fn extract(&self, values: &[f64], sampling_rate: f64) -> Features {
        let spectrum = self.analyzer.analyze(values, sampling_rate);
        let s = summary::summarize(values, &spectrum);

        Features {
            spectrum,
            rms: s.rms,
            dominant_freq: s.dominant_freq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn empty_epoch() {
        let f = SpectralFeatures::for_kind(StreamKind::Audio).extract(&[], 22050.);
        assert!(f.spectrum.is_empty());
        assert_eq!(f.rms, 0.);
        assert_eq!(f.dominant_freq, 0.);
    }

    #[test]
    fn constant_motion() {
        let f = SpectralFeatures::for_kind(StreamKind::Motion).extract(&[9.81; 200], 40.);
        assert_relative_eq!(f.rms, 9.81, epsilon = 1e-9);
        assert_eq!(f.spectrum.len(), 76);
    }
}
