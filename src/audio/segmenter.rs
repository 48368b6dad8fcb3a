//! Silence-bounded utterance segmentation
//!
//! Frames stream in from capture; the segmenter accumulates speech and closes
//! an utterance once enough trailing silence piles up. Pure state-machine
//! work: no awaits, no locks, safe to call from the ingest loop per frame.

use std::time::{Duration, Instant};

use crate::audio::{AudioFrame, FrameSource, SAMPLE_RATE};

/// Tunables for utterance segmentation
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// RMS energy above which a frame counts as speech
    pub energy_threshold: f32,

    /// Cumulative trailing silence that closes an utterance
    pub silence_hold: Duration,

    /// Hard cap on utterance length
    pub max_utterance: Duration,

    /// Utterances with less speech than this are discarded
    pub min_utterance: Duration,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.01,
            silence_hold: Duration::from_millis(800),
            max_utterance: Duration::from_secs(15),
            min_utterance: Duration::from_millis(200),
        }
    }
}

/// Why an utterance was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Trailing silence reached the hold threshold
    Silence,
    /// Hard length cap reached mid-speech
    MaxDuration,
    /// Source ended with speech still buffered
    Flush,
}

/// A silence-bounded run of speech ready for transcription
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Mono samples at the pipeline sample rate, trailing silence included
    pub samples: Vec<f32>,

    /// Where the speech came from
    pub source: FrameSource,

    /// When the opening frame was captured
    pub started_at: Instant,

    /// Why the segmenter closed this utterance
    pub close_reason: CloseReason,
}

impl Utterance {
    /// Total captured length
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(SAMPLE_RATE))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Capturing,
}

/// Accumulates audio frames into silence-bounded utterances
#[derive(Debug)]
pub struct UtteranceSegmenter {
    config: SegmenterConfig,
    state: State,
    buffer: Vec<f32>,
    silence_samples: usize,
    source: FrameSource,
    started_at: Instant,
    suppressed: bool,

    // Thresholds precomputed in samples
    silence_hold_samples: usize,
    max_samples: usize,
    min_samples: usize,
}

impl UtteranceSegmenter {
    #[must_use]
    pub fn new(config: SegmenterConfig) -> Self {
        let silence_hold_samples = samples_for(config.silence_hold);
        let max_samples = samples_for(config.max_utterance);
        let min_samples = samples_for(config.min_utterance);

        Self {
            config,
            state: State::Idle,
            buffer: Vec::new(),
            silence_samples: 0,
            source: FrameSource::Microphone,
            started_at: Instant::now(),
            suppressed: false,
            silence_hold_samples,
            max_samples,
            min_samples,
        }
    }

    /// Feed one frame; returns a closed utterance when one completes
    ///
    /// Silence before any speech never opens an utterance. Any speech frame
    /// resets the trailing-silence counter to zero.
    pub fn push_frame(&mut self, frame: &AudioFrame) -> Option<Utterance> {
        if self.suppressed {
            if self.state == State::Capturing {
                tracing::debug!("discarding partial utterance while suppressed");
                self.reset();
            }
            return None;
        }

        let is_speech = frame.is_speech(self.config.energy_threshold);

        match self.state {
            State::Idle => {
                if is_speech {
                    self.state = State::Capturing;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(&frame.samples);
                    self.silence_samples = 0;
                    self.source = frame.source;
                    self.started_at = frame.captured_at;
                }
                None
            }
            State::Capturing => {
                self.buffer.extend_from_slice(&frame.samples);

                if is_speech {
                    self.silence_samples = 0;
                } else {
                    self.silence_samples += frame.samples.len();
                }

                if self.silence_samples >= self.silence_hold_samples {
                    return self.close(CloseReason::Silence);
                }

                if self.buffer.len() >= self.max_samples {
                    return self.close(CloseReason::MaxDuration);
                }

                None
            }
        }
    }

    /// Close any pending speech (source ended, session teardown)
    pub fn flush(&mut self) -> Option<Utterance> {
        if self.state == State::Capturing {
            self.close(CloseReason::Flush)
        } else {
            None
        }
    }

    /// Pause segmentation while the companion's own speech is audible
    ///
    /// Suppression drops the partial utterance: whatever was buffered is
    /// about to be contaminated by playback bleed anyway.
    pub fn set_suppressed(&mut self, suppressed: bool) {
        if suppressed && self.state == State::Capturing {
            tracing::debug!("dropping partial utterance, playback started");
            self.reset();
        }
        self.suppressed = suppressed;
    }

    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.state == State::Capturing
    }

    /// Close the current utterance, discarding it if the speech portion
    /// (buffered minus trailing silence) is below the minimum
    fn close(&mut self, reason: CloseReason) -> Option<Utterance> {
        let speech_samples = self.buffer.len().saturating_sub(self.silence_samples);

        let utterance = if speech_samples < self.min_samples {
            tracing::debug!(
                speech_samples,
                reason = ?reason,
                "discarding short utterance"
            );
            None
        } else {
            Some(Utterance {
                samples: std::mem::take(&mut self.buffer),
                source: self.source,
                started_at: self.started_at,
                close_reason: reason,
            })
        };

        self.reset();
        utterance
    }

    fn reset(&mut self) {
        self.state = State::Idle;
        self.buffer.clear();
        self.silence_samples = 0;
    }
}

/// Convert a duration to a sample count at the pipeline rate
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn samples_for(duration: Duration) -> usize {
    (duration.as_secs_f64() * f64::from(SAMPLE_RATE)) as usize
}
