//! Microphone capture
//!
//! cpal streams are not `Send`, so the capture object lives on a dedicated
//! OS thread that pumps fixed-size frames into the pipeline over a bounded
//! channel. When the pipeline is saturated, frames are dropped there rather
//! than ever blocking the device callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::{AudioFrame, FRAME_SAMPLES, SAMPLE_RATE};
use crate::{Error, Result};

/// How often the pump thread drains the device buffer
const PUMP_INTERVAL: Duration = Duration::from_millis(100);

/// Captures audio from the default input device
pub struct AudioCapture {
    #[allow(dead_code)]
    device: Device,
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// Prefers a mono 16 kHz input config; falls back to stereo with
    /// downmix in the callback.
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Capture("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Capture(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .or_else(|| {
                device.supported_input_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Capture("no suitable input config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns error if the input stream cannot be built or started
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Capture("no input device".to_string()))?;

        let config = self.config.clone();
        let stereo = config.channels == 2;

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        if stereo {
                            buf.extend(data.chunks(2).map(|pair| {
                                f32::midpoint(pair[0], pair.get(1).copied().unwrap_or(pair[0]))
                            }));
                        } else {
                            buf.extend_from_slice(data);
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Capture(e.to_string()))?;

        stream.play().map_err(|e| Error::Capture(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Get captured audio buffer and clear it
    #[must_use]
    pub fn take_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    /// Get captured audio buffer without clearing
    #[must_use]
    pub fn peek_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default()
    }

    /// Clear the audio buffer
    pub fn clear_buffer(&self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// Pumps microphone audio into the pipeline as [`AudioFrame`]s
///
/// Owns the capture thread; dropping (or [`MicSource::stop`]) ends capture.
pub struct MicSource {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl MicSource {
    /// Open the default input device and start pumping frames into `tx`
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened or the stream fails
    /// to start; the error surfaces synchronously so joining can fail fast.
    pub fn spawn(tx: mpsc::Sender<AudioFrame>) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<()>>();

        let thread = std::thread::Builder::new()
            .name("lantern-mic".to_string())
            .spawn(move || {
                let mut capture = match AudioCapture::new()
                    .and_then(|mut c| c.start().map(|()| c))
                {
                    Ok(c) => {
                        let _ = init_tx.send(Ok(()));
                        c
                    }
                    Err(e) => {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };

                let mut pending: Vec<f32> = Vec::new();
                let mut dropped: u64 = 0;

                while !stop_flag.load(Ordering::Relaxed) {
                    std::thread::sleep(PUMP_INTERVAL);
                    pending.extend(capture.take_buffer());

                    while pending.len() >= FRAME_SAMPLES {
                        let chunk: Vec<f32> = pending.drain(..FRAME_SAMPLES).collect();
                        match tx.try_send(AudioFrame::microphone(chunk)) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                dropped += 1;
                                if dropped % 50 == 1 {
                                    tracing::warn!(
                                        dropped,
                                        "frame queue saturated, dropping microphone audio"
                                    );
                                }
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                tracing::debug!("frame queue closed, stopping capture");
                                capture.stop();
                                return;
                            }
                        }
                    }
                }

                capture.stop();
            })
            .map_err(|e| Error::Capture(format!("failed to spawn capture thread: {e}")))?;

        match init_rx.recv_timeout(Duration::from_secs(3)) {
            Ok(Ok(())) => Ok(Self {
                stop,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(Error::Capture(
                "timed out opening input device".to_string(),
            )),
        }
    }

    /// Stop capturing and join the pump thread
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for MicSource {
    fn drop(&mut self) {
        self.stop();
    }
}
