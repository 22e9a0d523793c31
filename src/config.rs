use serde::{Deserialize, Serialize};
use static_assertions as sa;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use crate::sample::StreamKind;

pub const EPOCH_COUNT: u32 = 4;
pub const EPOCH_DURATION_MS: u64 = 5000;
pub const POLL_INTERVAL_MS: u64 = 100;

pub const MOTION_SAMPLING_RATE: f64 = 40.;
pub const AUDIO_SAMPLING_RATE: f64 = 22050.;

pub const MAX_DISPLAY_POINTS: usize = 2000;
pub const DISPLAY_STRIDE: usize = 10;

sa::const_assert!(POLL_INTERVAL_MS > 0);
sa::const_assert!(POLL_INTERVAL_MS <= EPOCH_DURATION_MS);
sa::const_assert!(DISPLAY_STRIDE > 0);

/// Fixed parameters of one stream type.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StreamConfig {
    pub epoch_count: u32,
    pub epoch_duration_ms: u64,

    /// Upper bound on how long a stop request goes unnoticed.
    pub poll_interval_ms: u64,

    /// Nominal sampling rate of the stream in Hz.
    pub sampling_rate: f64,

    pub max_display_points: usize,
    pub display_stride: usize,

    /// Number of pushed sample batches the queue from the driver can hold.
    pub queue_capacity: usize,
}

impl StreamConfig {
    pub fn motion() -> StreamConfig {
        StreamConfig {
            epoch_count: EPOCH_COUNT,
            epoch_duration_ms: EPOCH_DURATION_MS,
            poll_interval_ms: POLL_INTERVAL_MS,
            sampling_rate: MOTION_SAMPLING_RATE,
            max_display_points: MAX_DISPLAY_POINTS,
            display_stride: DISPLAY_STRIDE,
            queue_capacity: 256,
        }
    }

    pub fn audio() -> StreamConfig {
        StreamConfig {
            epoch_count: EPOCH_COUNT,
            epoch_duration_ms: EPOCH_DURATION_MS,
            poll_interval_ms: POLL_INTERVAL_MS,
            sampling_rate: AUDIO_SAMPLING_RATE,
            max_display_points: MAX_DISPLAY_POINTS,
            display_stride: DISPLAY_STRIDE,
            queue_capacity: 1024,
        }
    }

    pub fn for_kind(kind: StreamKind) -> StreamConfig {
        match kind {
            StreamKind::Motion => StreamConfig::motion(),
            StreamKind::Audio => StreamConfig::audio(),
        }
    }

    pub fn epoch_duration(&self) -> Duration {
        Duration::from_millis(self.epoch_duration_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn validate(&self) -> eyre::Result<()> {
        ensure!(self.epoch_count > 0, "epoch_count must be at least 1");
        ensure!(self.epoch_duration_ms > 0, "epoch_duration_ms must be positive");
        ensure!(self.poll_interval_ms > 0, "poll_interval_ms must be positive");
        ensure!(
            self.sampling_rate.is_finite() && self.sampling_rate > 0.,
            "sampling_rate must be positive"
        );
        ensure!(self.display_stride > 0, "display_stride must be positive");
        ensure!(self.queue_capacity > 0, "queue_capacity must be positive");

        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    pub user_id: String,

    #[serde(default)]
    pub share_motion: bool,
    #[serde(default)]
    pub share_voice: bool,

    /// Root directory for stored epochs.
    pub output: Option<PathBuf>,

    #[serde(default = "StreamConfig::motion")]
    pub motion: StreamConfig,

    #[serde(default = "StreamConfig::audio")]
    pub audio: StreamConfig,
}

impl Config {
    pub fn default() -> Config {
        Config {
            user_id: "glw_anon".into(),
            share_motion: false,
            share_voice: false,
            output: None,
            motion: StreamConfig::motion(),
            audio: StreamConfig::audio(),
        }
    }

    #[cfg(test)]
    pub fn test_config() -> Config {
        Config {
            user_id: "glw_test".into(),
            share_motion: true,
            share_voice: true,
            output: None,
            motion: StreamConfig::motion(),
            audio: StreamConfig::audio(),
        }
    }

    pub fn from_path<P: AsRef<Path>>(p: P) -> eyre::Result<Config> {
        let p = p.as_ref();
        debug!("loading config from: {:?}", p);

        let f = fs::read_to_string(p)
            .map_err(|e| eyre!("could not read config file {:?}: {}", p, e))?;
        let c: Config = toml::from_str(&f)?;

        c.motion.validate()?;
        c.audio.validate()?;

        Ok(c)
    }

    pub fn stream(&self, kind: StreamKind) -> &StreamConfig {
        match kind {
            StreamKind::Motion => &self.motion,
            StreamKind::Audio => &self.audio,
        }
    }

    /// Consent to share the stream of this kind.
    pub fn share(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Motion => self.share_motion,
            StreamKind::Audio => self.share_voice,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_default_conf() {
        let c = Config::from_path("gloveworks.toml").unwrap();
        println!("{:#?}", c);

        assert_eq!(c.motion, StreamConfig::motion());
        assert_eq!(c.audio.sampling_rate, AUDIO_SAMPLING_RATE);
    }

    #[test]
    fn load_test_conf() {
        let c = Config::test_config();
        assert!(c.share(StreamKind::Audio));
        assert_eq!(c.stream(StreamKind::Motion).sampling_rate, 40.);
    }

    #[test]
    fn missing_streams_use_defaults() {
        let c: Config = toml::from_str(r#"user_id = "glw_abc_def20010417""#).unwrap();

        assert_eq!(c.motion, StreamConfig::motion());
        assert_eq!(c.audio, StreamConfig::audio());
        assert!(!c.share_motion);
    }

    #[test]
    fn invalid_stream() {
        let mut s = StreamConfig::motion();
        s.epoch_count = 0;
        assert!(s.validate().is_err());

        let mut s = StreamConfig::audio();
        s.sampling_rate = f64::NAN;
        assert!(s.validate().is_err());

        assert!(StreamConfig::audio().validate().is_ok());
    }
}
