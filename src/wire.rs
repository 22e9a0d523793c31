//! Transport encoding of epochs.
//!
//! Audio is packed as 16-bit little-endian PCM, motion as a JSON array of `{x, y, z}` objects.
//! [EpochNote] is a self-contained record of one epoch: metadata plus the base64 encoded raw
//! payload.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::acquisition::EpochResult;
use crate::sample::{Accel, Sample, StreamKind};
use crate::session::SessionContext;
use crate::spectrum::Spectrum;

pub trait Wire: Sample + Sized {
    const CONTENT_TYPE: &'static str;
    const EXTENSION: &'static str;

    fn encode(samples: &[Self]) -> eyre::Result<Vec<u8>>;
    fn decode(bytes: &[u8]) -> eyre::Result<Vec<Self>>;
}

impl Wire for i16 {
    const CONTENT_TYPE: &'static str = "audio/pcm";
    const EXTENSION: &'static str = "pcm";

    fn encode(samples: &[i16]) -> eyre::Result<Vec<u8>> {
        #[cfg(target_endian = "big")]
        compile_error!("serialized samples are assumed to be in little endian, target platform is big endian and no conversion is implemented.");

        Ok(bytemuck::cast_slice(samples).to_vec())
    }

    fn decode(bytes: &[u8]) -> eyre::Result<Vec<i16>> {
        ensure!(
            bytes.len() % 2 == 0,
            "odd number of bytes ({}) in 16-bit PCM",
            bytes.len()
        );

        Ok(bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect())
    }
}

impl Wire for Accel {
    const CONTENT_TYPE: &'static str = "application/json";
    const EXTENSION: &'static str = "json";

    fn encode(samples: &[Accel]) -> eyre::Result<Vec<u8>> {
        Ok(serde_json::to_vec(samples)?)
    }

    fn decode(bytes: &[u8]) -> eyre::Result<Vec<Accel>> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Everything about an epoch except the raw samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMeta {
    pub epoch: u32,

    /// Milliseconds since the Unix epoch when the record was made.
    pub timestamp: i64,
    pub user_id: String,
    pub session_id: String,
    pub kind: StreamKind,
    pub content_type: String,
    pub sampling_rate: f64,
    pub samples: usize,
    pub rms: f64,
    pub dominant_freq: f64,
    pub spectrum: Spectrum,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl EpochMeta {
    pub fn new<S: Wire>(ctx: &SessionContext, r: &EpochResult<S>) -> EpochMeta {
        EpochMeta {
            epoch: r.epoch,
            timestamp: Utc::now().timestamp_millis(),
            user_id: ctx.user_id.clone(),
            session_id: ctx.session_id.clone(),
            kind: S::KIND,
            content_type: S::CONTENT_TYPE.into(),
            sampling_rate: r.sampling_rate,
            samples: r.raw.len(),
            rms: r.rms,
            dominant_freq: r.dominant_freq,
            spectrum: r.spectrum.clone(),
            metadata: ctx.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochNote {
    pub body: EpochMeta,

    /// Base64 of the encoded raw samples.
    pub payload: String,
}

impl EpochNote {
    pub fn new<S: Wire>(ctx: &SessionContext, r: &EpochResult<S>) -> eyre::Result<EpochNote> {
        let bytes = S::encode(&r.raw)?;

        Ok(EpochNote {
            body: EpochMeta::new(ctx, r),
            payload: base64::encode(bytes),
        })
    }

    pub fn samples<S: Wire>(&self) -> eyre::Result<Vec<S>> {
        ensure!(
            self.body.kind == S::KIND,
            "note holds {} samples, not {}",
            self.body.kind,
            S::KIND
        );

        let bytes = base64::decode(&self.payload)?;
        S::decode(&bytes)
    }
}
