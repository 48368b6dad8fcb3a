//! Audio playback to speakers
//!
//! Playback streams are built and driven entirely inside a blocking task,
//! since cpal streams are not `Send`. Callers await completion.

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};

use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Decode MP3 bytes and play them on the default output device
///
/// # Errors
///
/// Returns error if decoding or playback fails
pub async fn play_mp3(mp3_data: Vec<u8>) -> Result<()> {
    let samples = decode_mp3(&mp3_data)?;
    play_samples(samples).await
}

/// Play f32 samples on the default output device
///
/// # Errors
///
/// Returns error if the output device cannot be opened or playback fails
pub async fn play_samples(samples: Vec<f32>) -> Result<()> {
    tokio::task::spawn_blocking(move || play_samples_blocking(&samples))
        .await
        .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
}

/// Probe the default output device for a usable config
fn output_config() -> Result<(Device, StreamConfig)> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = PLAYBACK_SAMPLE_RATE,
        channels = config.channels,
        "audio playback initialized"
    );

    Ok((device, config))
}

/// Play samples to completion on the calling thread
fn play_samples_blocking(samples: &[f32]) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let (device, config) = output_config()?;
    let channels = config.channels as usize;

    let samples = Arc::new(Mutex::new(samples.to_vec()));
    let position = Arc::new(Mutex::new(0usize));
    let finished = Arc::new(Mutex::new(false));
    let finished_clone = Arc::clone(&finished);

    let samples_clone = Arc::clone(&samples);
    let position_clone = Arc::clone(&position);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let samples = samples_clone.lock().unwrap();
                let mut pos = position_clone.lock().unwrap();

                for frame in data.chunks_mut(channels) {
                    let sample = if *pos < samples.len() {
                        samples[*pos]
                    } else {
                        *finished_clone.lock().unwrap() = true;
                        0.0
                    };

                    for out in frame.iter_mut() {
                        *out = sample;
                    }

                    if *pos < samples.len() {
                        *pos += 1;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    // Wait for playback to finish
    let sample_count = samples.lock().unwrap().len();
    let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);

    // Poll for completion with timeout
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_millis(duration_ms + 500);

    while !*finished.lock().unwrap() {
        if start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    // Small delay to ensure audio finishes
    std::thread::sleep(std::time::Duration::from_millis(100));

    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");

    Ok(())
}

/// Decode MP3 bytes to f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                // Downmix stereo to mono, normalize i16 to f32
                let frame_samples: Vec<f32> = if frame.channels == 2 {
                    frame
                        .data
                        .chunks(2)
                        .map(|chunk| {
                            f32::midpoint(f32::from(chunk[0]), f32::from(chunk[1])) / 32768.0
                        })
                        .collect()
                } else {
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect()
                };

                samples.extend(frame_samples);
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}
