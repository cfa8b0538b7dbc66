//! Ordered speech output.
//!
//! Callers [`enqueue`](SpeechQueue::enqueue) text and move on; a single
//! worker task speaks utterances one at a time in arrival order.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SpeechConfig;
use crate::error::{CollaboratorError, Result};

/// Something that can say a sentence out loud.
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Speak `text`, returning once it has been said.
    async fn speak(&self, text: &str) -> Result<()>;
}

/// Runs an external TTS program per utterance, e.g. `espeak-ng -v es <text>`.
#[derive(Debug, Clone)]
pub struct CommandSpeaker {
    program: String,
    args: Vec<String>,
}

impl CommandSpeaker {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl Speaker for CommandSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| CollaboratorError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(CollaboratorError::CommandFailed {
                program: self.program.clone(),
                status,
            })
        }
    }
}

/// Logs utterances instead of speaking them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSpeaker;

#[async_trait]
impl Speaker for LogSpeaker {
    async fn speak(&self, text: &str) -> Result<()> {
        info!(text, "Speak");
        Ok(())
    }
}

/// Speaker selected by `[speech]`.
pub fn speaker_from_config(config: &SpeechConfig) -> Arc<dyn Speaker> {
    if config.enabled {
        Arc::new(CommandSpeaker::new(&config.program, config.args.clone()))
    } else {
        Arc::new(LogSpeaker)
    }
}

/// Fire-and-forget handle to the speech worker.
///
/// The worker exits once every clone of the queue is dropped and the
/// remaining utterances have been spoken.
#[derive(Debug, Clone)]
pub struct SpeechQueue {
    tx: mpsc::UnboundedSender<String>,
}

impl SpeechQueue {
    /// Spawn the worker on the current runtime.
    pub fn spawn(speaker: Arc<dyn Speaker>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let worker = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                debug!(%text, "Speaking");
                if let Err(e) = speaker.speak(&text).await {
                    warn!(error = %e, %text, "Failed to speak");
                }
            }
            debug!("Speech queue drained");
        });
        (Self { tx }, worker)
    }

    /// Queue `text`. Blank text is ignored.
    pub fn enqueue(&self, text: impl Into<String>) {
        let text = text.into();
        if text.trim().is_empty() {
            return;
        }
        if self.tx.send(text).is_err() {
            warn!("Speech worker has stopped, dropping utterance");
        }
    }
}
