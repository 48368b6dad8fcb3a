//! Timestamped PCM frames

use std::time::Instant;

/// Where a frame was captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameSource {
    /// Local microphone
    Microphone,
    /// Remote voice channel, tagged with the sending user
    Channel {
        /// Opaque per-user tag assigned by the channel link
        user: u32,
    },
}

impl std::fmt::Display for FrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Microphone => write!(f, "mic"),
            Self::Channel { user } => write!(f, "channel/{user}"),
        }
    }
}

/// A fixed-size chunk of mono f32 PCM with capture metadata
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono samples at the pipeline sample rate
    pub samples: Vec<f32>,
    /// Capture origin
    pub source: FrameSource,
    /// When the chunk was taken off the device
    pub captured_at: Instant,
    /// RMS energy of the samples
    pub rms: f32,
}

impl AudioFrame {
    /// Build a frame, computing its energy
    #[must_use]
    pub fn new(samples: Vec<f32>, source: FrameSource) -> Self {
        let rms = rms_energy(&samples);
        Self {
            samples,
            source,
            captured_at: Instant::now(),
            rms,
        }
    }

    /// Convenience constructor for microphone frames
    #[must_use]
    pub fn microphone(samples: Vec<f32>) -> Self {
        Self::new(samples, FrameSource::Microphone)
    }

    /// Whether the frame's energy is above the given speech threshold
    #[must_use]
    pub fn is_speech(&self, energy_threshold: f32) -> bool {
        self.rms > energy_threshold
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
