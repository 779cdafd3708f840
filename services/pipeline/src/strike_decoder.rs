//! Frame → validated strike, composing the decoder, extractor and validator.

use crate::extractor::{ExtractionError, FieldExtractor};
use crate::frame_decoder::FrameDecoder;
use crate::record::NewStrike;
use crate::validator::{validate, ValidationError};
use thiserror::Error;
use tracing::{debug, warn};

/// Why a frame did not become a strike. Never fatal to the stream.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameRejection {
    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Counters for one decoder instance.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecoderStats {
    pub frames: u64,
    pub decoded: u64,
    pub rejected: u64,
}

impl DecoderStats {
    /// Percentage of frames that decoded, `0.0` before the first frame.
    pub fn success_rate(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.decoded as f64 / self.frames as f64 * 100.0
        }
    }
}

/// Full decoding pipeline for one feed session.
#[derive(Debug, Clone, Default)]
pub struct StrikeDecoder {
    frames: FrameDecoder,
    fields: FieldExtractor,
    stats: DecoderStats,
}

impl StrikeDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Decode, extract and validate one raw frame.
    pub fn decode(&mut self, frame: &[u8]) -> Result<NewStrike, FrameRejection> {
        self.stats.frames += 1;

        let result = self.decode_frame(frame);
        match &result {
            Ok(_) => self.stats.decoded += 1,
            Err(_) => self.stats.rejected += 1,
        }
        result
    }

    fn decode_frame(&self, frame: &[u8]) -> Result<NewStrike, FrameRejection> {
        let text = self.frames.decode(frame);

        let candidate = self.fields.extract(&text).map_err(|e| {
            debug!(error = %e, bytes = frame.len(), "Frame yielded no record");
            e
        })?;

        validate(&candidate).map_err(|e| {
            warn!(lat = candidate.lat, lon = candidate.lon, "Invalid coordinates");
            e
        })?;

        Ok(candidate)
    }
}
