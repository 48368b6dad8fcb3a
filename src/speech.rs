//! Speech synthesis and playback
//!
//! A single worker per session turns reply text into audio and plays it,
//! strictly FIFO with one active playback. The session drives exactly one
//! sink: the local speakers or the voice channel, never both.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::audio::playback;
use crate::backends::{TextToSpeech, VoiceLink};
use crate::{Error, Result};

/// Queue depth for pending speech requests
const SPEAK_QUEUE_DEPTH: usize = 8;

/// Where synthesized audio goes
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Play MP3 audio to completion
    async fn play(&self, mp3: Vec<u8>) -> Result<()>;

    /// Short sink label for logs
    fn name(&self) -> &'static str;
}

/// Plays MP3 audio on the local speakers
pub struct LocalSpeaker;

#[async_trait]
impl PlaybackSink for LocalSpeaker {
    async fn play(&self, mp3: Vec<u8>) -> Result<()> {
        playback::play_mp3(mp3).await
    }

    fn name(&self) -> &'static str {
        "speaker"
    }
}

/// Sends MP3 audio into a remote voice channel
pub struct ChannelSink {
    link: Arc<dyn VoiceLink>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(link: Arc<dyn VoiceLink>) -> Self {
        Self { link }
    }
}

#[async_trait]
impl PlaybackSink for ChannelSink {
    async fn play(&self, mp3: Vec<u8>) -> Result<()> {
        self.link.send_audio(&mp3).await
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

/// Ordered TTS backends: primary first, fallbacks after
#[derive(Clone)]
pub struct SynthesisChain {
    backends: Vec<Arc<dyn TextToSpeech>>,
}

impl SynthesisChain {
    #[must_use]
    pub fn new(primary: Arc<dyn TextToSpeech>) -> Self {
        Self {
            backends: vec![primary],
        }
    }

    #[must_use]
    pub fn with_fallback(mut self, backend: Arc<dyn TextToSpeech>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Synthesize through the chain, falling through on failure
    ///
    /// # Errors
    ///
    /// Returns the last backend's error once every backend has failed
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let mut last_err = None;

        for backend in &self.backends {
            match backend.synthesize(text).await {
                Ok(mp3) => return Ok(mp3),
                Err(e) => {
                    tracing::warn!(
                        provider = backend.provider_name(),
                        error = %e,
                        "TTS backend failed, trying next"
                    );
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::Synthesis("no TTS backends configured".to_string())))
    }
}

struct SpeakRequest {
    text: String,
}

/// FIFO speech worker for one session
pub struct SpeechOutput {
    tx: mpsc::Sender<SpeakRequest>,
    speaking: Arc<AtomicBool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SpeechOutput {
    /// Spawn the worker
    ///
    /// Requests play back in submission order with one active playback.
    /// Identical text resubmitted inside `dedup_window` is dropped; replies
    /// that fail every synthesis backend are logged as text and skipped,
    /// and the turn still completes.
    #[must_use]
    pub fn spawn(
        chain: SynthesisChain,
        sink: Arc<dyn PlaybackSink>,
        dedup_window: Duration,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<SpeakRequest>(SPEAK_QUEUE_DEPTH);
        let speaking = Arc::new(AtomicBool::new(false));
        let speaking_task = Arc::clone(&speaking);

        let handle = tokio::spawn(async move {
            let mut last: Option<(String, Instant)> = None;

            while let Some(request) = rx.recv().await {
                let duplicate = last
                    .as_ref()
                    .is_some_and(|(text, at)| *text == request.text && at.elapsed() < dedup_window);
                if duplicate {
                    tracing::debug!(text = %request.text, "suppressing duplicate line");
                    continue;
                }
                last = Some((request.text.clone(), Instant::now()));

                let mp3 = match chain.synthesize(&request.text).await {
                    Ok(mp3) => mp3,
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            reply = %request.text,
                            "all synthesis failed, reply delivered as text only"
                        );
                        continue;
                    }
                };

                speaking_task.store(true, Ordering::Release);
                if let Err(e) = sink.play(mp3).await {
                    tracing::error!(error = %e, sink = sink.name(), "playback failed");
                }
                speaking_task.store(false, Ordering::Release);
            }

            tracing::debug!("speech worker stopped");
        });

        Self {
            tx,
            speaking,
            handle: std::sync::Mutex::new(Some(handle)),
        }
    }

    /// Enqueue a line for synthesis and playback
    ///
    /// # Errors
    ///
    /// Returns error if the worker has stopped
    pub async fn speak(&self, text: &str) -> Result<()> {
        self.tx
            .send(SpeakRequest {
                text: text.to_string(),
            })
            .await
            .map_err(|_| Error::Channel("speech worker not running".to_string()))
    }

    /// Whether playback is audible right now
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Acquire)
    }

    /// Shared flag for the ingest side's self-echo suppression
    #[must_use]
    pub fn speaking_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.speaking)
    }

    /// Abort the worker, dropping queued requests
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
            tracing::debug!("speech worker aborted");
        }
        self.speaking.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct ScriptedTts {
        label: &'static str,
        fail: bool,
        calls: AtomicUsize,
    }

    impl ScriptedTts {
        fn ok(label: &'static str) -> Arc<Self> {
            Arc::new(Self {
                label,
                fail: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(label: &'static str) -> Arc<Self> {
            Arc::new(Self {
                label,
                fail: true,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextToSpeech for ScriptedTts {
        async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::Synthesis("scripted failure".to_string()))
            } else {
                Ok(text.as_bytes().to_vec())
            }
        }

        fn provider_name(&self) -> &'static str {
            self.label
        }
    }

    struct RecordingSink {
        played: Mutex<Vec<Vec<u8>>>,
        in_play: AtomicBool,
        hold: Duration,
    }

    impl RecordingSink {
        fn new(hold: Duration) -> Arc<Self> {
            Arc::new(Self {
                played: Mutex::new(Vec::new()),
                in_play: AtomicBool::new(false),
                hold,
            })
        }

        fn played(&self) -> Vec<Vec<u8>> {
            self.played.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PlaybackSink for RecordingSink {
        async fn play(&self, mp3: Vec<u8>) -> Result<()> {
            assert!(
                !self.in_play.swap(true, Ordering::SeqCst),
                "overlapping playback"
            );
            tokio::time::sleep(self.hold).await;
            self.played.lock().unwrap().push(mp3);
            self.in_play.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn playback_is_fifo_without_overlap() {
        let sink = RecordingSink::new(Duration::from_millis(20));
        let output = SpeechOutput::spawn(
            SynthesisChain::new(ScriptedTts::ok("primary")),
            Arc::clone(&sink) as Arc<dyn PlaybackSink>,
            Duration::from_secs(3),
        );

        output.speak("satu").await.unwrap();
        output.speak("dua").await.unwrap();
        output.speak("tiga").await.unwrap();
        settle().await;

        let played = sink.played();
        assert_eq!(played.len(), 3);
        assert_eq!(played[0], b"satu");
        assert_eq!(played[1], b"dua");
        assert_eq!(played[2], b"tiga");
    }

    #[tokio::test]
    async fn duplicate_line_inside_window_is_suppressed() {
        let sink = RecordingSink::new(Duration::ZERO);
        let output = SpeechOutput::spawn(
            SynthesisChain::new(ScriptedTts::ok("primary")),
            Arc::clone(&sink) as Arc<dyn PlaybackSink>,
            Duration::from_secs(3),
        );

        output.speak("halo").await.unwrap();
        output.speak("halo").await.unwrap();
        output.speak("berbeda").await.unwrap();
        settle().await;

        let played = sink.played();
        assert_eq!(played.len(), 2);
        assert_eq!(played[0], b"halo");
        assert_eq!(played[1], b"berbeda");
    }

    #[tokio::test]
    async fn fallback_backend_engages_when_primary_fails() {
        let primary = ScriptedTts::failing("primary");
        let fallback = ScriptedTts::ok("fallback");
        let sink = RecordingSink::new(Duration::ZERO);

        let chain = SynthesisChain::new(Arc::clone(&primary) as Arc<dyn TextToSpeech>)
            .with_fallback(Arc::clone(&fallback) as Arc<dyn TextToSpeech>);
        let output = SpeechOutput::spawn(
            chain,
            Arc::clone(&sink) as Arc<dyn PlaybackSink>,
            Duration::ZERO,
        );

        output.speak("halo kak").await.unwrap();
        settle().await;

        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
        assert_eq!(sink.played().len(), 1);
    }

    #[tokio::test]
    async fn total_synthesis_failure_skips_playback_but_worker_survives() {
        let sink = RecordingSink::new(Duration::ZERO);
        let chain = SynthesisChain::new(ScriptedTts::failing("primary") as Arc<dyn TextToSpeech>)
            .with_fallback(ScriptedTts::failing("fallback") as Arc<dyn TextToSpeech>);
        let output =
            SpeechOutput::spawn(chain, Arc::clone(&sink) as Arc<dyn PlaybackSink>, Duration::ZERO);

        output.speak("gagal").await.unwrap();
        settle().await;
        assert!(sink.played().is_empty());

        // Worker still accepts requests
        assert!(output.speak("lagi").await.is_ok());
    }

    #[tokio::test]
    async fn speaking_flag_tracks_playback() {
        let sink = RecordingSink::new(Duration::from_millis(150));
        let output = SpeechOutput::spawn(
            SynthesisChain::new(ScriptedTts::ok("primary")),
            Arc::clone(&sink) as Arc<dyn PlaybackSink>,
            Duration::from_secs(3),
        );

        assert!(!output.is_speaking());
        output.speak("panjang").await.unwrap();

        let mut saw_speaking = false;
        for _ in 0..50 {
            if output.is_speaking() {
                saw_speaking = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(saw_speaking, "speaking flag never went up");

        settle().await;
        assert!(!output.is_speaking());
    }

    #[tokio::test]
    async fn stop_aborts_the_worker() {
        let sink = RecordingSink::new(Duration::ZERO);
        let output = SpeechOutput::spawn(
            SynthesisChain::new(ScriptedTts::ok("primary")),
            Arc::clone(&sink) as Arc<dyn PlaybackSink>,
            Duration::ZERO,
        );

        output.stop();
        settle().await;
        assert!(output.speak("terlambat").await.is_err());
        assert!(!output.is_speaking());
    }
}
