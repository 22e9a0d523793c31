//! Spectral analysis of a closed epoch.
//!
//! The transform is sized exactly to the epoch (no padding to a power of two), and only the
//! positive-frequency bins `0 .. n / 2` are kept.

use num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

/// Highest frequency kept for gait spectra.
pub const MOTION_MAX_FREQ: f64 = 15.0; // Hz

/// How bin index is mapped to frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrequencyAxis {
    /// `(i / (n / 2)) * (fs / 2)`, bin index normalized to the Nyquist frequency.
    NormalizedNyquist,

    /// `i * fs / n`, bin index times bin width.
    BinWidth,
}

impl FrequencyAxis {
    pub fn frequency(&self, i: usize, n: usize, sampling_rate: f64) -> f64 {
        match self {
            FrequencyAxis::NormalizedNyquist => {
                (i as f64 / (n / 2) as f64) * (sampling_rate / 2.)
            }
            FrequencyAxis::BinWidth => i as f64 * sampling_rate / n as f64,
        }
    }
}

/// What the value of each bin holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    Magnitude,
    Power,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    /// Frequency in Hz.
    pub freq: f64,
    pub value: f64,
}

/// One-sided spectrum of an epoch. Never modified after it has been computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub scale: Scale,
    pub bins: Vec<Bin>,
}

impl Spectrum {
    pub fn empty(scale: Scale) -> Spectrum {
        Spectrum {
            scale,
            bins: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bin> {
        self.bins.iter()
    }

    /// The bin with the largest value. The first one wins on ties.
    pub fn peak(&self) -> Option<&Bin> {
        self.bins.iter().fold(None, |peak: Option<&Bin>, b| match peak {
            Some(p) if p.value >= b.value => Some(p),
            _ => Some(b),
        })
    }
}

/// Configuration of the transform for one kind of stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Analyzer {
    /// Subtract the arithmetic mean before the transform.
    pub remove_mean: bool,
    pub axis: FrequencyAxis,
    pub scale: Scale,

    /// Stop at the first bin above this frequency. Bins beyond are left out, not zeroed.
    pub max_freq: Option<f64>,
}

impl Analyzer {
    /// Gait: DC removed, power spectrum up to 15 Hz.
    pub const fn motion() -> Analyzer {
        Analyzer {
            remove_mean: true,
            axis: FrequencyAxis::NormalizedNyquist,
            scale: Scale::Power,
            max_freq: Some(MOTION_MAX_FREQ),
        }
    }

    /// Voice: raw magnitude spectrum up to Nyquist.
    pub const fn audio() -> Analyzer {
        Analyzer {
            remove_mean: false,
            axis: FrequencyAxis::BinWidth,
            scale: Scale::Magnitude,
            max_freq: None,
        }
    }

    pub fn analyze(&self, samples: &[f64], sampling_rate: f64) -> Spectrum {
        let n = samples.len();
        let half = n / 2;

        if half == 0 {
            return Spectrum::empty(self.scale);
        }

        let mean = if self.remove_mean {
            samples.iter().sum::<f64>() / n as f64
        } else {
            0.
        };

        let mut buf: Vec<Complex<f64>> = samples
            .iter()
            .map(|s| Complex::new(s - mean, 0.))
            .collect();

        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(n);
        fft.process(&mut buf);

        let mut bins = Vec::with_capacity(half);

        for (i, c) in buf.iter().take(half).enumerate() {
            let freq = self.axis.frequency(i, n, sampling_rate);

            if let Some(max) = self.max_freq {
                if freq > max {
                    break;
                }
            }

            let magnitude = (c.re * c.re + c.im * c.im).sqrt();
            let value = match self.scale {
                Scale::Magnitude => magnitude,
                Scale::Power => magnitude * magnitude,
            };

            bins.push(Bin { freq, value });
        }

        trace!(
            "analyzed {} samples at {} Hz: {} bins",
            n,
            sampling_rate,
            bins.len()
        );

        Spectrum {
            scale: self.scale,
            bins,
        }
    }
}

pub fn analyze_motion(samples: &[f64], sampling_rate: f64) -> Spectrum {
    Analyzer::motion().analyze(samples, sampling_rate)
}

pub fn analyze_audio(samples: &[f64], sampling_rate: f64) -> Spectrum {
    Analyzer::audio().analyze(samples, sampling_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn sine(f: f64, fs: f64, n: usize, amp: f64, offset: f64) -> Vec<f64> {
        (0..n)
            .map(|i| offset + amp * (2. * PI * f * i as f64 / fs).sin())
            .collect()
    }

    #[test]
    fn empty() {
        assert!(analyze_motion(&[], 40.).is_empty());
        assert!(analyze_audio(&[], 22050.).is_empty());
        assert!(analyze_audio(&[1.], 22050.).is_empty());
    }

    #[test]
    fn half_length() {
        let unbounded = Analyzer {
            max_freq: None,
            ..Analyzer::motion()
        };

        for n in [2, 3, 10, 99, 200, 257, 1000] {
            let s = sine(3., 40., n, 1., 0.);
            assert_eq!(unbounded.analyze(&s, 40.).len(), n / 2);
            assert_eq!(analyze_audio(&s, 40.).len(), n / 2);
        }
    }

    #[test]
    fn idempotent() {
        let s = sine(440., 22050., 4411, 1000., 10.);
        let a = analyze_audio(&s, 22050.);
        let b = analyze_audio(&s, 22050.);
        assert_eq!(a, b);
    }

    #[test]
    fn audio_sine_peak() {
        let fs = 22050.;
        let n = 11025; // not a power of two
        let s = sine(440., fs, n, 8000., 0.);

        let spec = analyze_audio(&s, fs);
        let peak = spec.peak().unwrap();
        println!("peak: {:?}", peak);

        assert!((peak.freq - 440.).abs() <= fs / n as f64);
        assert_eq!(spec.scale, Scale::Magnitude);
    }

    #[test]
    fn motion_sine_peak() {
        // 5 s of gait at 40 Hz, 9.81 m/s^2 of gravity on top.
        let fs = 40.;
        let n = 200;
        let s = sine(2., fs, n, 1.5, 9.81);

        let spec = analyze_motion(&s, fs);
        let peak = spec.peak().unwrap();

        assert!((peak.freq - 2.).abs() <= fs / n as f64);
        assert_eq!(spec.scale, Scale::Power);
    }

    #[test]
    fn motion_removes_mean() {
        let s = sine(2., 40., 200, 1., 9.81);
        let spec = analyze_motion(&s, 40.);

        assert_abs_diff_eq!(spec.bins[0].value, 0., epsilon = 1e-9);
    }

    #[test]
    fn motion_truncated_at_15hz() {
        let s = sine(2., 40., 200, 1., 0.);
        let spec = analyze_motion(&s, 40.);

        assert!(spec.iter().all(|b| b.freq <= MOTION_MAX_FREQ));
        // 0, 0.2, .., 15.0 Hz
        assert_eq!(spec.len(), 76);
        assert_abs_diff_eq!(spec.bins.last().unwrap().freq, 15., epsilon = 1e-9);
    }

    #[test]
    fn frequency_axes() {
        let nn = FrequencyAxis::NormalizedNyquist;
        let bw = FrequencyAxis::BinWidth;

        assert_eq!(nn.frequency(50, 200, 40.), 10.);
        assert_eq!(bw.frequency(50, 200, 40.), 10.);

        // The axes only disagree on odd lengths.
        assert_abs_diff_eq!(nn.frequency(1, 201, 40.), 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(bw.frequency(1, 201, 40.), 40. / 201., epsilon = 1e-12);
    }

    #[test]
    fn peak_first_on_tie() {
        let spec = Spectrum {
            scale: Scale::Power,
            bins: vec![
                Bin { freq: 1., value: 2. },
                Bin { freq: 2., value: 5. },
                Bin { freq: 3., value: 5. },
            ],
        };

        assert_eq!(spec.peak().unwrap().freq, 2.);
        assert!(Spectrum::empty(Scale::Power).peak().is_none());
    }
}
