//! Audio capture, framing, segmentation and playback
//!
//! Everything upstream of transcription works on mono f32 PCM at 16 kHz.
//! Microphone input is captured with cpal and chunked into fixed frames;
//! voice-channel packets arrive as 48 kHz stereo and are downmixed and
//! resampled before framing.

pub mod capture;
pub mod frame;
pub mod playback;
pub mod resample;
pub mod segmenter;

pub use capture::{AudioCapture, MicSource};
pub use frame::{AudioFrame, FrameSource};
pub use resample::ChannelDownmixer;
pub use segmenter::{CloseReason, SegmenterConfig, Utterance, UtteranceSegmenter};

use crate::{Error, Result};

/// Sample rate for the capture side of the pipeline (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per pipeline frame (100ms at 16kHz)
pub const FRAME_SAMPLES: usize = 1600;

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
