//! Utterance transcription
//!
//! A single worker per session pulls utterances off a bounded queue, so STT
//! requests never overlap and transcripts come back in arrival order. A
//! failed utterance is dropped with a warning; it never ends the session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audio::{FrameSource, SAMPLE_RATE, Utterance, samples_to_wav};
use crate::backends::SpeechToText;
use crate::{Error, Result};

/// Backoff schedule for transient STT failures
const RETRY_BACKOFF: [Duration; 2] = [Duration::from_millis(500), Duration::from_millis(1500)];

/// Queue depth for finished transcripts
const TRANSCRIPT_CHANNEL_DEPTH: usize = 8;

/// A transcribed utterance ready for wake gating
#[derive(Debug, Clone)]
pub struct Transcript {
    /// Transcribed text, whitespace-trimmed and non-empty
    pub text: String,

    /// Where the speech came from
    pub source: FrameSource,

    /// Owning session
    pub session: Uuid,

    /// Arrival-order index within the session
    pub seq: u64,
}

/// FIFO transcription worker
pub struct Transcriber;

impl Transcriber {
    /// Spawn the worker; transcripts arrive on the returned receiver
    ///
    /// The worker runs until the utterance channel closes or the receiver
    /// is dropped.
    pub fn spawn(
        stt: Arc<dyn SpeechToText>,
        language_hint: Option<String>,
        session: Uuid,
        mut utterances: mpsc::Receiver<Utterance>,
    ) -> (JoinHandle<()>, mpsc::Receiver<Transcript>) {
        let (tx, rx) = mpsc::channel(TRANSCRIPT_CHANNEL_DEPTH);

        let handle = tokio::spawn(async move {
            let mut seq: u64 = 0;

            while let Some(utterance) = utterances.recv().await {
                tracing::debug!(
                    source = %utterance.source,
                    duration = ?utterance.duration(),
                    reason = ?utterance.close_reason,
                    "transcribing utterance"
                );

                let text = match transcribe_with_retry(
                    stt.as_ref(),
                    &utterance,
                    language_hint.as_deref(),
                )
                .await
                {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "transcription failed, dropping utterance");
                        continue;
                    }
                };

                let trimmed = text.trim();
                if trimmed.is_empty() {
                    tracing::debug!(source = %utterance.source, "empty transcript, dropping");
                    continue;
                }

                let transcript = Transcript {
                    text: trimmed.to_string(),
                    source: utterance.source,
                    session,
                    seq,
                };
                seq += 1;

                if tx.send(transcript).await.is_err() {
                    break;
                }
            }

            tracing::debug!(session = %session, "transcription worker stopped");
        });

        (handle, rx)
    }
}

/// One STT call with the fixed retry schedule for transient failures
async fn transcribe_with_retry(
    stt: &dyn SpeechToText,
    utterance: &Utterance,
    language_hint: Option<&str>,
) -> Result<String> {
    let wav = samples_to_wav(&utterance.samples, SAMPLE_RATE)?;

    let mut attempt = 0;
    loop {
        match stt.transcribe_wav(&wav, language_hint).await {
            Ok(text) => return Ok(text),
            Err(e @ Error::SttUnavailable(_)) if attempt < RETRY_BACKOFF.len() => {
                let backoff = RETRY_BACKOFF[attempt];
                attempt += 1;
                tracing::warn!(
                    error = %e,
                    attempt,
                    backoff = ?backoff,
                    "STT unavailable, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Instant;

    use async_trait::async_trait;

    use super::*;
    use crate::audio::CloseReason;

    struct ScriptedStt {
        script: Mutex<VecDeque<Result<String>>>,
    }

    impl ScriptedStt {
        fn new(script: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
            })
        }
    }

    #[async_trait]
    impl SpeechToText for ScriptedStt {
        async fn transcribe_wav(&self, _wav: &[u8], _hint: Option<&str>) -> Result<String> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    fn utterance() -> Utterance {
        Utterance {
            samples: vec![0.1; 1600],
            source: FrameSource::Microphone,
            started_at: Instant::now(),
            close_reason: CloseReason::Silence,
        }
    }

    #[tokio::test]
    async fn transcripts_arrive_in_order_with_sequence_numbers() {
        let stt = ScriptedStt::new(vec![
            Ok("pertama".to_string()),
            Ok("kedua".to_string()),
            Ok("ketiga".to_string()),
        ]);

        let (utterance_tx, utterance_rx) = mpsc::channel(4);
        let (handle, mut transcripts) =
            Transcriber::spawn(stt, None, Uuid::new_v4(), utterance_rx);

        for _ in 0..3 {
            utterance_tx.send(utterance()).await.unwrap();
        }
        drop(utterance_tx);

        let first = transcripts.recv().await.unwrap();
        let second = transcripts.recv().await.unwrap();
        let third = transcripts.recv().await.unwrap();

        assert_eq!(first.text, "pertama");
        assert_eq!(second.text, "kedua");
        assert_eq!(third.text, "ketiga");
        assert_eq!((first.seq, second.seq, third.seq), (0, 1, 2));

        assert!(transcripts.recv().await.is_none());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn empty_transcripts_are_dropped_without_a_sequence_gap() {
        let stt = ScriptedStt::new(vec![
            Ok("   ".to_string()),
            Ok("halo".to_string()),
        ]);

        let (utterance_tx, utterance_rx) = mpsc::channel(4);
        let (handle, mut transcripts) =
            Transcriber::spawn(stt, None, Uuid::new_v4(), utterance_rx);

        utterance_tx.send(utterance()).await.unwrap();
        utterance_tx.send(utterance()).await.unwrap();
        drop(utterance_tx);

        let only = transcripts.recv().await.unwrap();
        assert_eq!(only.text, "halo");
        assert_eq!(only.seq, 0);

        assert!(transcripts.recv().await.is_none());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn transient_failure_retries_then_succeeds() {
        let stt = ScriptedStt::new(vec![
            Err(Error::SttUnavailable("timeout".to_string())),
            Ok("akhirnya".to_string()),
        ]);

        let (utterance_tx, utterance_rx) = mpsc::channel(4);
        let (handle, mut transcripts) =
            Transcriber::spawn(stt, None, Uuid::new_v4(), utterance_rx);

        utterance_tx.send(utterance()).await.unwrap();
        drop(utterance_tx);

        let transcript = transcripts.recv().await.unwrap();
        assert_eq!(transcript.text, "akhirnya");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn terminal_failure_drops_the_utterance() {
        let stt = ScriptedStt::new(vec![
            Err(Error::Transcription("rejected".to_string())),
            Ok("berikutnya".to_string()),
        ]);

        let (utterance_tx, utterance_rx) = mpsc::channel(4);
        let (handle, mut transcripts) =
            Transcriber::spawn(stt, None, Uuid::new_v4(), utterance_rx);

        utterance_tx.send(utterance()).await.unwrap();
        utterance_tx.send(utterance()).await.unwrap();
        drop(utterance_tx);

        let transcript = transcripts.recv().await.unwrap();
        assert_eq!(transcript.text, "berikutnya");
        assert!(transcripts.recv().await.is_none());
        handle.await.unwrap();
    }
}
