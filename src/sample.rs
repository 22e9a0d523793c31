//! Sample types delivered by the upstream drivers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two kinds of streams a session can be run for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Motion,
    Audio,
}

impl StreamKind {
    /// Directory name used when storing epochs of this kind.
    pub fn dir(&self) -> &'static str {
        match self {
            StreamKind::Motion => "motion",
            StreamKind::Audio => "voice",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Motion => write!(f, "motion"),
            StreamKind::Audio => write!(f, "audio"),
        }
    }
}

impl FromStr for StreamKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "motion" | "gait" => Ok(StreamKind::Motion),
            "audio" | "voice" => Ok(StreamKind::Audio),
            s => Err(format!("unknown stream kind: {}", s)),
        }
    }
}

/// A sample as delivered by a driver. The raw sample is kept as-is for storage, the scalar
/// `value` is what goes into spectral analysis.
pub trait Sample: Copy + Send + Sync + fmt::Debug + Serialize + 'static {
    const KIND: StreamKind;

    fn value(&self) -> f64;
}

/// One accelerometer reading in m/s^2.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Accel {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Accel {
    pub fn new(x: f32, y: f32, z: f32) -> Accel {
        Accel { x, y, z }
    }

    /// Length of the acceleration vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

impl Sample for Accel {
    const KIND: StreamKind = StreamKind::Motion;

    fn value(&self) -> f64 {
        self.magnitude() as f64
    }
}

/// 16-bit signed PCM.
impl Sample for i16 {
    const KIND: StreamKind = StreamKind::Audio;

    fn value(&self) -> f64 {
        *self as f64
    }
}

/// Scalar values of a buffer, in order.
pub fn values<S: Sample>(samples: &[S]) -> Vec<f64> {
    samples.iter().map(Sample::value).collect()
}
