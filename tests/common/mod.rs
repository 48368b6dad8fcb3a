//! Shared test utilities: audio generators and scripted backends

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use lantern_companion::audio::{AudioFrame, FrameSource, SAMPLE_RATE, SegmenterConfig};
use lantern_companion::backends::{ChatModel, SpeechToText, TextToSpeech, VoiceLink};
use lantern_companion::config::{ApiKeys, ChatConfig, Config, VoiceConfig};
use lantern_companion::persona::{Identity, Persona, ReplyLines, WakeNames};
use lantern_companion::{Error, Result};

/// Generate one frame of sine-wave speech from the given channel user
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn speech_frame(user: u32) -> AudioFrame {
    let samples: Vec<f32> = (0..lantern_companion::audio::FRAME_SAMPLES)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect();
    AudioFrame::new(samples, FrameSource::Channel { user })
}

/// Generate one frame of silence from the given channel user
#[must_use]
pub fn silence_frame(user: u32) -> AudioFrame {
    AudioFrame::new(
        vec![0.0; lantern_companion::audio::FRAME_SAMPLES],
        FrameSource::Channel { user },
    )
}

/// Push one spoken phrase: enough speech to pass the minimum length,
/// then enough silence to close the utterance under the test config
pub async fn push_phrase(tx: &mpsc::Sender<AudioFrame>, user: u32) {
    for _ in 0..3 {
        tx.send(speech_frame(user))
            .await
            .expect("frame channel open");
    }
    for _ in 0..2 {
        tx.send(silence_frame(user))
            .await
            .expect("frame channel open");
    }
}

/// Poll until `cond` holds or the deadline passes
pub async fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

/// Persona used across pipeline tests: answers to "sri" (or "seri"),
/// no greeting, one known fallback line
#[must_use]
pub fn test_persona() -> Persona {
    Persona {
        identity: Identity {
            id: "sri".to_string(),
            name: "Sri".to_string(),
            tagline: None,
            description: None,
        },
        wake: WakeNames {
            primary: "sri".to_string(),
            variants: vec!["seri".to_string()],
        },
        replies: ReplyLines {
            fallback: vec!["Maaf ya, lagi ada gangguan.".to_string()],
            unintelligible: Some("Hmm, maksudnya gimana?".to_string()),
            greeting: None,
        },
        ..Persona::default()
    }
}

/// Config tuned for fast tests: short silence hold, no dedup window,
/// short rate-limit backoff
#[must_use]
pub fn test_config(persona: Persona) -> Config {
    Config {
        persona,
        main_user: Some("Kak Budi".to_string()),
        segmenter: SegmenterConfig {
            silence_hold: Duration::from_millis(200),
            ..SegmenterConfig::default()
        },
        voice: VoiceConfig {
            dedup_window: Duration::ZERO,
            ..VoiceConfig::default()
        },
        chat: ChatConfig {
            rate_limit_backoff: Duration::from_millis(100),
            ..ChatConfig::default()
        },
        api_keys: ApiKeys::default(),
    }
}

/// Scripted speech-to-text backend
pub struct MockStt {
    script: Mutex<VecDeque<Result<String>>>,
    calls: AtomicUsize,
}

impl MockStt {
    #[must_use]
    pub fn with_script(script: Vec<Result<String>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl SpeechToText for MockStt {
    async fn transcribe_wav(&self, _wav: &[u8], _language_hint: Option<&str>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

/// Scripted chat backend with an optional per-call delay
pub struct MockChat {
    script: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
    delay: Duration,
}

impl MockChat {
    #[must_use]
    pub fn scripted(script: Vec<Result<String>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for MockChat {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("oke siap".to_string()))
    }
}

/// Recording text-to-speech backend that can fail its first calls
pub struct MockTts {
    texts: Mutex<Vec<String>>,
    fail_first: AtomicUsize,
}

impl MockTts {
    #[must_use]
    pub fn new() -> Self {
        Self {
            texts: Mutex::new(Vec::new()),
            fail_first: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn failing_first(calls: usize) -> Self {
        Self {
            texts: Mutex::new(Vec::new()),
            fail_first: AtomicUsize::new(calls),
        }
    }

    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    #[must_use]
    pub fn spoken(&self) -> usize {
        self.texts.lock().unwrap().len()
    }
}

impl Default for MockTts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextToSpeech for MockTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let remaining = self.fail_first.load(Ordering::Acquire);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::Release);
            return Err(Error::Synthesis("scripted failure".to_string()));
        }
        self.texts.lock().unwrap().push(text.to_string());
        Ok(vec![0x49, 0x44, 0x33, 0x04])
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

/// Voice channel link backed by in-memory channels
pub struct MockLink {
    id: String,
    frames: Mutex<Option<mpsc::Sender<AudioFrame>>>,
    played: Mutex<Vec<Vec<u8>>>,
}

impl MockLink {
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            frames: Mutex::new(None),
            played: Mutex::new(Vec::new()),
        }
    }

    /// Sender half of the frame stream; available after `join`
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<AudioFrame> {
        self.frames
            .lock()
            .unwrap()
            .clone()
            .expect("link not joined")
    }

    #[must_use]
    pub fn played(&self) -> usize {
        self.played.lock().unwrap().len()
    }
}

#[async_trait]
impl VoiceLink for MockLink {
    async fn join(&self) -> Result<mpsc::Receiver<AudioFrame>> {
        let (tx, rx) = mpsc::channel(32);
        *self.frames.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn leave(&self) -> Result<()> {
        self.frames.lock().unwrap().take();
        Ok(())
    }

    async fn send_audio(&self, mp3: &[u8]) -> Result<()> {
        self.played.lock().unwrap().push(mp3.to_vec());
        Ok(())
    }

    fn channel_id(&self) -> &str {
        &self.id
    }
}
