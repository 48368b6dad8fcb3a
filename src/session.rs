//! Session lifecycle and pipeline wiring
//!
//! A session binds one audio source (the local microphone or a remote voice
//! channel) to the full listen-transcribe-reply-speak pipeline. The
//! [`SessionController`] owns every session and funnels all lifecycle
//! changes through a single worker task, so two joins can never race for
//! the same device.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audio::{
    AudioFrame, FrameSource, MicSource, SegmenterConfig, Utterance, UtteranceSegmenter,
};
use crate::backends::{
    ChatModel, ElevenLabsStt, ElevenLabsTts, GeminiChat, OpenAiTts, SpeechToText, TextToSpeech,
    VoiceLink, VoiceTuning, WhisperStt, create_limiter,
};
use crate::config::Config;
use crate::reply::{ReplyCoordinator, TurnRequest};
use crate::speech::{ChannelSink, LocalSpeaker, PlaybackSink, SpeechOutput, SynthesisChain};
use crate::transcribe::{Transcriber, Transcript};
use crate::wake::{WakeGate, WakePolicy};
use crate::{Error, Persona, Result};

/// Frame buffer between the audio source and the segmenter
const FRAME_CHANNEL_DEPTH: usize = 32;

/// Utterances awaiting transcription; overflow drops, never blocks
const UTTERANCE_CHANNEL_DEPTH: usize = 4;

/// Controller command queue depth
const COMMAND_CHANNEL_DEPTH: usize = 8;

/// How long teardown waits for the ingest task to drain after the source stops
const SOURCE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// OpenAI voice used when ElevenLabs synthesis needs a fallback
const FALLBACK_TTS_VOICE: &str = "nova";

/// OpenAI model used for fallback synthesis
const FALLBACK_TTS_MODEL: &str = "tts-1";

/// Backend clients shared by every session
#[derive(Clone)]
pub struct BackendSet {
    /// Speech-to-text client
    pub stt: Arc<dyn SpeechToText>,

    /// Chat completion client
    pub chat: Arc<dyn ChatModel>,

    /// Synthesis chain, primary first
    pub tts: SynthesisChain,
}

impl fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSet").finish_non_exhaustive()
    }
}

impl BackendSet {
    /// Build backend clients from configuration
    ///
    /// The STT and primary TTS providers follow the configured provider
    /// names; an OpenAI fallback voice is chained behind ElevenLabs TTS
    /// whenever an OpenAI key is present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a selected provider's API key is
    /// missing.
    pub fn from_config(config: &Config) -> Result<Self> {
        let elevenlabs_key = config.api_keys.elevenlabs.clone().unwrap_or_default();
        let openai_key = config.api_keys.openai.clone().unwrap_or_default();
        let gemini_key = config.api_keys.gemini.clone().unwrap_or_default();

        let stt: Arc<dyn SpeechToText> = if config.voice.stt_provider == "whisper" {
            Arc::new(WhisperStt::new(
                openai_key.clone(),
                config.voice.stt_model.clone(),
            )?)
        } else {
            Arc::new(ElevenLabsStt::new(
                elevenlabs_key.clone(),
                config.voice.stt_model.clone(),
            )?)
        };

        let defaults = VoiceTuning::default();
        let tuning = match config.persona.tts_profile() {
            Some(profile) => VoiceTuning {
                stability: profile.stability.unwrap_or(defaults.stability),
                similarity_boost: profile.similarity_boost.unwrap_or(defaults.similarity_boost),
                style: profile.style.unwrap_or(defaults.style),
            },
            None => defaults,
        };

        let primary: Arc<dyn TextToSpeech> = if config.voice.tts_provider == "openai" {
            Arc::new(OpenAiTts::new(
                openai_key.clone(),
                config.voice.tts_voice.clone(),
                config.voice.tts_speed,
                config.voice.tts_model.clone(),
            )?)
        } else {
            Arc::new(ElevenLabsTts::new(
                elevenlabs_key,
                config.voice.tts_voice.clone(),
                config.voice.tts_model.clone(),
                tuning,
                config.voice.daily_char_budget,
            )?)
        };

        let mut tts = SynthesisChain::new(primary);
        if config.voice.tts_provider != "openai" && !openai_key.is_empty() {
            let fallback = OpenAiTts::new(
                openai_key,
                FALLBACK_TTS_VOICE.to_string(),
                config.voice.tts_speed,
                FALLBACK_TTS_MODEL.to_string(),
            )?;
            tts = tts.with_fallback(Arc::new(fallback));
        }

        let limiter = create_limiter(config.chat.requests_per_minute);
        let chat: Arc<dyn ChatModel> =
            Arc::new(GeminiChat::new(gemini_key, limiter)?.with_model(config.chat.model.clone()));

        Ok(Self { stt, chat, tts })
    }
}

/// Where a session's audio comes from and goes to
pub enum JoinTarget {
    /// Local microphone in, local speaker out
    Microphone,

    /// A remote voice channel reached through the given link
    Channel(Arc<dyn VoiceLink>),
}

impl JoinTarget {
    fn device_key(&self) -> DeviceKey {
        match self {
            Self::Microphone => DeviceKey::Microphone,
            Self::Channel(link) => DeviceKey::Channel(link.channel_id().to_string()),
        }
    }
}

/// Identifies the device or channel a session occupies
///
/// At most one session may hold a given key at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceKey {
    /// The local microphone and speaker pair
    Microphone,

    /// A remote voice channel, by channel id
    Channel(String),
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Microphone => f.write_str("microphone"),
            Self::Channel(id) => write!(f, "channel/{id}"),
        }
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session holds the device
    Stopped,

    /// Audio and backends are being brought up
    Joining,

    /// The full pipeline is running
    Active,

    /// Teardown in progress
    Leaving,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Joining => "joining",
            Self::Active => "active",
            Self::Leaving => "leaving",
        };
        f.write_str(s)
    }
}

/// One running pipeline bound to a device or channel
struct Session {
    id: Uuid,
    state: SessionState,
    source: SourceHandle,
    ingest: JoinHandle<()>,
    transcriber: JoinHandle<()>,
    gate: JoinHandle<()>,
    coordinator: Arc<ReplyCoordinator>,
    speech: Arc<SpeechOutput>,
}

enum SourceHandle {
    Microphone(MicSource),
    Channel(Arc<dyn VoiceLink>),
}

enum SessionCommand {
    Join {
        target: JoinTarget,
        policy: WakePolicy,
        reply: oneshot::Sender<Result<Uuid>>,
    },
    Leave {
        key: DeviceKey,
        reply: oneshot::Sender<Result<()>>,
    },
    Status {
        reply: oneshot::Sender<Vec<(DeviceKey, SessionState)>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Owns every session and serializes lifecycle changes
pub struct SessionController {
    commands: mpsc::Sender<SessionCommand>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    /// Start the controller worker
    #[must_use]
    pub fn spawn(config: Config, backends: BackendSet) -> Self {
        let (commands, commands_rx) = mpsc::channel(COMMAND_CHANNEL_DEPTH);

        let worker = ControllerWorker {
            persona: Arc::new(config.persona.clone()),
            config,
            backends,
            sessions: HashMap::new(),
        };
        let handle = tokio::spawn(worker.run(commands_rx));

        Self {
            commands,
            handle: std::sync::Mutex::new(Some(handle)),
        }
    }

    /// Join the target and start a session on it
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceConflict`] when the device already has a
    /// session, or whatever capture or link error kept it from starting.
    pub async fn join(&self, target: JoinTarget, policy: WakePolicy) -> Result<Uuid> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionCommand::Join {
                target,
                policy,
                reply,
            })
            .await
            .map_err(|_| controller_stopped())?;
        response.await.map_err(|_| controller_stopped())?
    }

    /// Tear down the session on the given device
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] when no session holds the key.
    pub async fn leave(&self, key: DeviceKey) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionCommand::Leave { key, reply })
            .await
            .map_err(|_| controller_stopped())?;
        response.await.map_err(|_| controller_stopped())?
    }

    /// Lifecycle states of all live sessions
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] when the controller has shut down.
    pub async fn status(&self) -> Result<Vec<(DeviceKey, SessionState)>> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionCommand::Status { reply })
            .await
            .map_err(|_| controller_stopped())?;
        response.await.map_err(|_| controller_stopped())
    }

    /// Stop every session, then the controller itself
    pub async fn shutdown(&self) {
        let (reply, response) = oneshot::channel();
        if self
            .commands
            .send(SessionCommand::Shutdown { reply })
            .await
            .is_ok()
        {
            let _ = response.await;
        }

        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

fn controller_stopped() -> Error {
    Error::Session("session controller not running".to_string())
}

struct ControllerWorker {
    config: Config,
    persona: Arc<Persona>,
    backends: BackendSet,
    sessions: HashMap<DeviceKey, Session>,
}

impl ControllerWorker {
    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                SessionCommand::Join {
                    target,
                    policy,
                    reply,
                } => {
                    let _ = reply.send(self.join(target, policy).await);
                }
                SessionCommand::Leave { key, reply } => {
                    let _ = reply.send(self.leave(key).await);
                }
                SessionCommand::Status { reply } => {
                    let states = self
                        .sessions
                        .iter()
                        .map(|(key, session)| (key.clone(), session.state))
                        .collect();
                    let _ = reply.send(states);
                }
                SessionCommand::Shutdown { reply } => {
                    // Sessions tear down concurrently; each drain can hold
                    // its full timeout otherwise.
                    let stops = self
                        .sessions
                        .drain()
                        .map(|(key, session)| async move { stop_session(&key, session).await });
                    futures::future::join_all(stops).await;
                    let _ = reply.send(());
                    break;
                }
            }
        }
        tracing::debug!("session controller stopped");
    }

    async fn join(&mut self, target: JoinTarget, policy: WakePolicy) -> Result<Uuid> {
        let key = target.device_key();
        if self.sessions.contains_key(&key) {
            return Err(Error::ResourceConflict(format!(
                "session already active on {key}"
            )));
        }

        tracing::info!(%key, state = %SessionState::Joining, "joining");
        match self.start_session(target, policy).await {
            Ok(session) => {
                let id = session.id;
                tracing::info!(%key, session = %id, state = %session.state, "session started");
                self.sessions.insert(key, session);
                Ok(id)
            }
            Err(e) => {
                tracing::error!(%key, error = %e, "join failed");
                Err(e)
            }
        }
    }

    async fn leave(&mut self, key: DeviceKey) -> Result<()> {
        let Some(session) = self.sessions.remove(&key) else {
            return Err(Error::Session(format!("no session on {key}")));
        };
        stop_session(&key, session).await;
        Ok(())
    }

    async fn start_session(&self, target: JoinTarget, policy: WakePolicy) -> Result<Session> {
        let id = Uuid::new_v4();

        let (frames, source) = match target {
            JoinTarget::Microphone => {
                let (tx, rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
                let mic = MicSource::spawn(tx)?;
                (rx, SourceHandle::Microphone(mic))
            }
            JoinTarget::Channel(link) => {
                let rx = link.join().await?;
                (rx, SourceHandle::Channel(link))
            }
        };

        let sink: Arc<dyn PlaybackSink> = match &source {
            SourceHandle::Microphone(_) => Arc::new(LocalSpeaker),
            SourceHandle::Channel(link) => Arc::new(ChannelSink::new(Arc::clone(link))),
        };
        let speech = Arc::new(SpeechOutput::spawn(
            self.backends.tts.clone(),
            sink,
            self.config.voice.dedup_window,
        ));

        // Self-echo suppression only applies to the microphone; a channel
        // link never hears the companion's own playback.
        let speaking = matches!(source, SourceHandle::Microphone(_)).then(|| speech.speaking_flag());
        let (utterance_tx, utterance_rx) = mpsc::channel(UTTERANCE_CHANNEL_DEPTH);
        let ingest = spawn_ingest(
            frames,
            utterance_tx,
            self.config.segmenter.clone(),
            speaking,
        );

        let language_hint = self.persona.stt_language().map(ToString::to_string);
        let (transcriber, transcripts) = Transcriber::spawn(
            Arc::clone(&self.backends.stt),
            language_hint,
            id,
            utterance_rx,
        );

        let coordinator = Arc::new(ReplyCoordinator::spawn(
            id,
            Arc::clone(&self.backends.chat),
            Arc::clone(&self.persona),
            Arc::clone(&speech),
            self.config.main_user.clone(),
            self.config.chat.rate_limit_backoff,
        ));

        let wake_names: Vec<String> = self
            .persona
            .wake_names()
            .iter()
            .map(ToString::to_string)
            .collect();
        let gate = spawn_gate_loop(
            transcripts,
            WakeGate::new(&wake_names, policy),
            Arc::clone(&coordinator),
            self.config.main_user.clone(),
        );

        if let Some(greeting) = self.persona.greeting() {
            if let Err(e) = speech.speak(greeting).await {
                tracing::warn!(error = %e, "greeting not queued");
            }
        }

        Ok(Session {
            id,
            state: SessionState::Active,
            source,
            ingest,
            transcriber,
            gate,
            coordinator,
            speech,
        })
    }
}

/// Pump frames through the segmenter and queue closed utterances
///
/// `speaking` carries the playback flag when self-echo suppression
/// applies. A full transcription queue drops the utterance rather than
/// stalling frame intake.
fn spawn_ingest(
    mut frames: mpsc::Receiver<AudioFrame>,
    utterances: mpsc::Sender<Utterance>,
    config: SegmenterConfig,
    speaking: Option<Arc<AtomicBool>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut segmenter = UtteranceSegmenter::new(config);

        while let Some(frame) = frames.recv().await {
            if let Some(flag) = &speaking {
                segmenter.set_suppressed(flag.load(Ordering::Acquire));
            }
            if let Some(utterance) = segmenter.push_frame(&frame) {
                forward_utterance(&utterances, utterance);
            }
        }

        // Source ended; whatever is still buffered gets transcribed too.
        if let Some(utterance) = segmenter.flush() {
            forward_utterance(&utterances, utterance);
        }
        tracing::debug!("audio ingest stopped");
    })
}

fn forward_utterance(utterances: &mpsc::Sender<Utterance>, utterance: Utterance) {
    match utterances.try_send(utterance) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(_)) => {
            tracing::warn!("transcription queue full, dropping utterance");
        }
    }
}

/// Run transcripts through the wake gate and submit addressed ones
///
/// Microphone speech is attributed to the main user; channel speech stays
/// anonymous until the link can name speakers.
fn spawn_gate_loop(
    mut transcripts: mpsc::Receiver<Transcript>,
    gate: WakeGate,
    coordinator: Arc<ReplyCoordinator>,
    main_user: Option<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(transcript) = transcripts.recv().await {
            let decision = gate.evaluate(&transcript.text);
            if !decision.addressed {
                if decision.matched_variant.is_some() {
                    tracing::debug!(text = %transcript.text, "wake name heard with no request");
                } else {
                    tracing::debug!(text = %transcript.text, "not addressed");
                }
                continue;
            }

            let speaker = match transcript.source {
                FrameSource::Microphone => main_user.clone(),
                FrameSource::Channel { .. } => None,
            };
            tracing::info!(
                text = %decision.stripped_text,
                variant = decision.matched_variant.as_deref().unwrap_or("any"),
                "addressed"
            );

            let request = TurnRequest {
                text: decision.stripped_text,
                speaker,
            };
            if coordinator.submit(request).await.is_err() {
                break;
            }
        }
        tracing::debug!("wake gate loop stopped");
    })
}

/// Tear down a session front to back
///
/// The source stops first so no new frames arrive, the ingest task drains,
/// and in-flight transcription and chat work is cancelled rather than
/// awaited.
async fn stop_session(key: &DeviceKey, mut session: Session) {
    session.state = SessionState::Leaving;
    tracing::info!(%key, session = %session.id, state = %session.state, "leaving");

    match &mut session.source {
        SourceHandle::Microphone(mic) => mic.stop(),
        SourceHandle::Channel(link) => {
            if let Err(e) = link.leave().await {
                tracing::warn!(%key, error = %e, "channel leave failed");
            }
        }
    }

    // Ingest exits once the frame channel closes; a misbehaving link must
    // not hold teardown hostage.
    if tokio::time::timeout(SOURCE_DRAIN_TIMEOUT, &mut session.ingest)
        .await
        .is_err()
    {
        session.ingest.abort();
    }
    session.transcriber.abort();
    session.gate.abort();

    session.coordinator.shutdown().await;
    session.speech.stop();

    tracing::info!(%key, session = %session.id, "session stopped");
}
