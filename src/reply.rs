//! Reply coordination and turn-taking
//!
//! One coordinator per session enforces single-flight against the chat
//! backend: at most one request in flight, at most one prompt queued behind
//! it, newest queued prompt wins. Completions are tagged with the turn that
//! produced them; anything stale is discarded so a superseded or cancelled
//! turn can never reach the speakers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backends::ChatModel;
use crate::context::ConversationLog;
use crate::persona::Persona;
use crate::speech::SpeechOutput;
use crate::{Error, Result};

/// Queue depth for coordinator commands
const COMMAND_CHANNEL_DEPTH: usize = 16;

/// One accepted prompt heading for the chat backend
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// User text with the wake name already stripped
    pub text: String,

    /// Speaker display name, if attributable
    pub speaker: Option<String>,
}

/// Identity of one spawned backend request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TurnTag {
    session: Uuid,
    turn: u64,
}

/// Result of a spawned backend request
struct TurnCompletion {
    tag: TurnTag,
    result: Result<String>,
}

enum Command {
    Submit(TurnRequest),
    Shutdown,
}

struct InFlight {
    tag: TurnTag,
    request: TurnRequest,
    handle: JoinHandle<()>,
}

/// Line spoken when a turn fails for good
///
/// A reply the backend garbled gets the persona's "didn't catch that" line;
/// throttling and outages get a random fallback apology.
fn failure_line<'a>(persona: &'a Persona, error: &Error) -> &'a str {
    match error {
        Error::Malformed(_) => persona.unintelligible_line(),
        _ => persona.fallback_line(),
    }
}

/// Per-session turn state machine
pub struct ReplyCoordinator {
    commands: mpsc::Sender<Command>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReplyCoordinator {
    /// Spawn the coordinator worker for a session
    #[must_use]
    pub fn spawn(
        session: Uuid,
        chat: Arc<dyn ChatModel>,
        persona: Arc<Persona>,
        speech: Arc<SpeechOutput>,
        main_user: Option<String>,
        rate_limit_backoff: Duration,
    ) -> Self {
        let (commands, commands_rx) = mpsc::channel(COMMAND_CHANNEL_DEPTH);

        let worker = Worker {
            session,
            chat,
            persona,
            speech,
            log: ConversationLog::new(main_user),
            rate_limit_backoff,
        };
        let handle = tokio::spawn(worker.run(commands_rx));

        Self {
            commands,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Hand a prompt to the coordinator
    ///
    /// # Errors
    ///
    /// Returns error if the coordinator has shut down
    pub async fn submit(&self, request: TurnRequest) -> Result<()> {
        self.commands
            .send(Command::Submit(request))
            .await
            .map_err(|_| Error::Session("reply coordinator not running".to_string()))
    }

    /// Cancel any in-flight turn and stop the worker
    ///
    /// Terminal: the coordinator accepts no further prompts.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;

        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

struct Worker {
    session: Uuid,
    chat: Arc<dyn ChatModel>,
    persona: Arc<Persona>,
    speech: Arc<SpeechOutput>,
    log: ConversationLog,
    rate_limit_backoff: Duration,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let (completion_tx, mut completions) = mpsc::channel::<TurnCompletion>(4);

        // None = idle; holding Some while a backend request runs
        let mut in_flight: Option<InFlight> = None;
        let mut pending: Option<TurnRequest> = None;
        let mut next_turn: u64 = 0;

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Submit(request)) => {
                        if in_flight.is_none() {
                            in_flight = Some(self.start_turn(request, &mut next_turn, &completion_tx));
                        } else if let Some(discarded) = pending.replace(request) {
                            tracing::info!(
                                discarded = %discarded.text,
                                "newer prompt arrived, replacing pending turn"
                            );
                        } else {
                            tracing::debug!("turn in flight, prompt queued");
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        if let Some(turn) = in_flight.take() {
                            turn.handle.abort();
                            tracing::debug!(turn = turn.tag.turn, "in-flight turn cancelled");
                        }
                        if let Some(dropped) = pending.take() {
                            tracing::debug!(text = %dropped.text, "pending turn dropped at shutdown");
                        }
                        break;
                    }
                },
                Some(completion) = completions.recv() => {
                    match in_flight.take() {
                        Some(turn) if turn.tag == completion.tag => {
                            self.finish_turn(&turn.request, completion.result).await;
                            if let Some(request) = pending.take() {
                                in_flight = Some(self.start_turn(
                                    request,
                                    &mut next_turn,
                                    &completion_tx,
                                ));
                            }
                        }
                        other => {
                            in_flight = other;
                            tracing::debug!(
                                turn = completion.tag.turn,
                                "stale completion discarded"
                            );
                        }
                    }
                }
            }
        }

        tracing::debug!(session = %self.session, "reply coordinator stopped");
    }

    /// Build the prompt and spawn the tagged backend request
    fn start_turn(
        &mut self,
        request: TurnRequest,
        next_turn: &mut u64,
        completion_tx: &mpsc::Sender<TurnCompletion>,
    ) -> InFlight {
        let tag = TurnTag {
            session: self.session,
            turn: *next_turn,
        };
        *next_turn += 1;

        self.log.observe(&request.text);
        let prompt = self.log.build_prompt(
            self.persona.system_prompt(),
            self.persona.name(),
            request.speaker.as_deref(),
            &request.text,
        );

        tracing::debug!(turn = tag.turn, text = %request.text, "turn started");

        let chat = Arc::clone(&self.chat);
        let backoff = self.rate_limit_backoff;
        let completion_tx = completion_tx.clone();

        let handle = tokio::spawn(async move {
            let mut result = chat.complete(&prompt).await;

            // One retry for throttling, then the failure becomes final
            if matches!(result, Err(ref e) if e.is_retryable_turn()) {
                tracing::warn!(
                    turn = tag.turn,
                    backoff = ?backoff,
                    "chat backend throttled, retrying once"
                );
                tokio::time::sleep(backoff).await;
                result = chat.complete(&prompt).await;
            }

            let _ = completion_tx.send(TurnCompletion { tag, result }).await;
        });

        InFlight {
            tag,
            request,
            handle,
        }
    }

    /// Speak the reply, or the persona's failure line
    ///
    /// Only real replies enter the history; apology lines would poison the
    /// prompt context.
    async fn finish_turn(&mut self, request: &TurnRequest, result: Result<String>) {
        let line = match result {
            Ok(reply) => {
                self.log
                    .record(request.speaker.as_deref(), &request.text, &reply);
                reply
            }
            Err(e) => {
                tracing::warn!(error = %e, text = %request.text, "turn failed, speaking fallback");
                failure_line(&self.persona, &e).to_string()
            }
        };

        if let Err(e) = self.speech.speak(&line).await {
            tracing::warn!(error = %e, "reply could not reach the speech worker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_reply_gets_the_unintelligible_line() {
        let persona = Persona::default();
        let line = failure_line(&persona, &Error::Malformed("no candidates".to_string()));
        assert_eq!(line, persona.unintelligible_line());
    }

    #[test]
    fn outages_get_a_fallback_line() {
        let persona = Persona::default();

        let line = failure_line(
            &persona,
            &Error::BackendUnavailable("connection refused".to_string()),
        );
        assert!(
            persona.replies.fallback.iter().any(|f| f.as_str() == line)
                || line == "Maaf, lagi ada gangguan."
        );

        let line = failure_line(&persona, &Error::RateLimited("quota".to_string()));
        assert!(!line.is_empty());
    }
}
