//! Channel audio conversion
//!
//! Voice-channel packets arrive as interleaved stereo i16 at 48 kHz.
//! The pipeline wants mono f32 at 16 kHz, so packets are downmixed and
//! run through a fixed-chunk FFT resampler, buffering the remainder
//! between packets.

use rubato::{FftFixedIn, Resampler};

use super::SAMPLE_RATE;
use crate::{Error, Result};

/// Sample rate voice channels deliver audio at
pub const CHANNEL_SAMPLE_RATE: u32 = 48000;

/// Input chunk fed to the resampler per pass
const CHUNK_SIZE: usize = 1024;

/// Converts 48 kHz stereo channel packets to 16 kHz mono pipeline samples
pub struct ChannelDownmixer {
    resampler: FftFixedIn<f64>,
    pending: Vec<f64>,
}

impl ChannelDownmixer {
    /// Create a downmixer
    ///
    /// # Errors
    ///
    /// Returns error if the resampler cannot be constructed
    pub fn new() -> Result<Self> {
        let resampler = FftFixedIn::<f64>::new(
            CHANNEL_SAMPLE_RATE as usize,
            SAMPLE_RATE as usize,
            CHUNK_SIZE,
            2,
            1,
        )
        .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

        Ok(Self {
            resampler,
            pending: Vec::new(),
        })
    }

    /// Feed an interleaved stereo packet; returns the mono 16 kHz samples
    /// that became available
    ///
    /// Input shorter than an internal chunk is buffered until enough has
    /// accumulated, so small packets may return nothing.
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    #[allow(clippy::cast_possible_truncation)]
    pub fn push(&mut self, packet: &[i16]) -> Result<Vec<f32>> {
        self.pending.extend(packet.chunks(2).map(|pair| {
            let left = f64::from(pair[0]) / 32768.0;
            let right = f64::from(pair.get(1).copied().unwrap_or(pair[0])) / 32768.0;
            f64::midpoint(left, right)
        }));

        let mut out = Vec::new();
        while self.pending.len() >= CHUNK_SIZE {
            let chunk: Vec<f64> = self.pending.drain(..CHUNK_SIZE).collect();
            let result = self
                .resampler
                .process(&[chunk], None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            out.extend(result[0].iter().map(|&s| s as f32));
        }

        Ok(out)
    }

    /// Samples buffered awaiting a full resampler chunk
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmixes_at_a_third_of_the_rate() {
        let mut mixer = ChannelDownmixer::new().unwrap();

        // 100ms of stereo 48kHz: 4800 sample pairs
        let packet: Vec<i16> = (0..9600).map(|i| if i % 2 == 0 { 8000 } else { -8000 }).collect();
        let out = mixer.push(&packet).unwrap();

        // 4800 mono samples in, minus up to one buffered chunk, at 1/3 rate
        assert!(!out.is_empty());
        assert!(out.len() <= 4800 / 3);

        // Perfectly opposed channels cancel to silence
        assert!(out.iter().all(|s| s.abs() < 0.05));
    }

    #[test]
    fn short_packets_are_buffered() {
        let mut mixer = ChannelDownmixer::new().unwrap();
        let out = mixer.push(&[100i16; 64]).unwrap();
        assert!(out.is_empty());
        assert_eq!(mixer.pending_len(), 32);
    }
}
