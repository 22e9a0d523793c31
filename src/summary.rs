//! Scalar summaries of an epoch.

use serde::{Deserialize, Serialize};

use crate::spectrum::Spectrum;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Summary {
    pub rms: f64,
    pub dominant_freq: f64,
}

/// Root-mean-square of the raw buffer (mean not removed). Zero for an empty buffer.
pub fn rms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.;
    }

    let sum_sq = samples.iter().fold(0.0, |a, s| a + s * s);
    (sum_sq / samples.len() as f64).sqrt()
}

/// Frequency of the strongest bin, zero for an empty spectrum.
pub fn dominant_frequency(spectrum: &Spectrum) -> f64 {
    spectrum.peak().map(|b| b.freq).unwrap_or(0.)
}

/// An empty buffer summarizes to zero regardless of the spectrum passed along with it.
pub fn summarize(samples: &[f64], spectrum: &Spectrum) -> Summary {
    if samples.is_empty() {
        return Summary::default();
    }

    Summary {
        rms: rms(samples),
        dominant_freq: dominant_frequency(spectrum),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::{Bin, Scale};
    use approx::assert_relative_eq;

    #[test]
    fn rms_constant() {
        assert_relative_eq!(rms(&[3.; 100]), 3.);
        assert_relative_eq!(rms(&[-3.; 7]), 3.);
    }

    #[test]
    fn rms_not_mean_adjusted() {
        assert_relative_eq!(rms(&[1., -1., 1., -1.]), 1.);
        assert_relative_eq!(rms(&[3., 4.]), (12.5f64).sqrt());
    }

    #[test]
    fn empty() {
        let spec = Spectrum {
            scale: Scale::Magnitude,
            bins: vec![Bin { freq: 10., value: 1. }],
        };

        assert_eq!(summarize(&[], &spec), Summary::default());
        assert_eq!(rms(&[]), 0.);
        assert_eq!(dominant_frequency(&Spectrum::empty(Scale::Power)), 0.);
    }

    #[test]
    fn dominant() {
        let spec = Spectrum {
            scale: Scale::Power,
            bins: vec![
                Bin { freq: 0., value: 0.1 },
                Bin { freq: 1.5, value: 4. },
                Bin { freq: 3., value: 2. },
            ],
        };

        let s = summarize(&[1., 2.], &spec);
        assert_eq!(s.dominant_freq, 1.5);
    }
}
