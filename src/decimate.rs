//! Reduce a buffer to a bounded number of points for plotting.
//!
//! Decimation here is plain fixed-stride subsampling without an anti-aliasing filter: the
//! output is only used to draw the shape of the signal, never for analysis.

use serde::{Deserialize, Serialize};

/// A plottable point, `x` is the index of the sample in the original buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decimator {
    /// Buffers of at most this length are passed through without striding.
    pub max_points: usize,

    /// Keep every `stride`'th sample of longer buffers.
    pub stride: usize,
}

impl Decimator {
    pub fn new(max_points: usize, stride: usize) -> Decimator {
        Decimator {
            max_points,
            stride: stride.max(1),
        }
    }

    /// Always stride, regardless of length.
    pub fn strided(stride: usize) -> Decimator {
        Decimator::new(0, stride)
    }

    /// Non-finite values are dropped, never replaced: the x-position of the remaining points
    /// stays the original index.
    pub fn apply(&self, buf: &[f64]) -> Vec<Point> {
        let stride = if buf.len() <= self.max_points {
            1
        } else {
            self.stride.max(1)
        };

        buf.iter()
            .enumerate()
            .step_by(stride)
            .filter(|(_, y)| y.is_finite())
            .map(|(i, y)| Point { x: i as f64, y: *y })
            .collect()
    }
}

pub fn decimate(buf: &[f64], max_points: usize, stride: usize) -> Vec<Point> {
    Decimator::new(max_points, stride).apply(buf)
}
