//! Lantern - Voice companion for live gaming sessions
//!
//! This library implements the full listen-and-reply loop:
//! - Audio capture and utterance segmentation
//! - Speech-to-text, chat, and text-to-speech backends
//! - Wake-name gating and reply coordination
//! - Session lifecycle over the microphone or remote voice channels
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Audio sources                       │
//! │       Microphone   │   Voice channel links           │
//! └────────────────────┬────────────────────────────────┘
//!                      │ 100 ms frames
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Lantern pipeline                     │
//! │  Segmenter │ Transcriber │ Wake gate │ Reply │ TTS  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                Hosted backends                       │
//! │      Gemini   │   ElevenLabs   │   OpenAI           │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod backends;
pub mod config;
pub mod context;
pub mod error;
pub mod persona;
pub mod reply;
pub mod session;
pub mod setup;
pub mod speech;
pub mod transcribe;
pub mod wake;

pub use config::Config;
pub use context::ConversationLog;
pub use error::{Error, Result};
pub use persona::Persona;
pub use reply::{ReplyCoordinator, TurnRequest};
pub use session::{BackendSet, DeviceKey, JoinTarget, SessionController, SessionState};
pub use speech::{SpeechOutput, SynthesisChain};
pub use transcribe::{Transcriber, Transcript};
pub use wake::{WakeDecision, WakeGate, WakePolicy};
