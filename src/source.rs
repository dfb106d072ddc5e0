//! Decoded message sources.
//!
//! Packet capture and protocol decoding live outside this crate; anything
//! that can yield [`DecodedMessage`]s plugs in through [`MessageSource`].
//! [`ReplaySource`] replays captures stored as newline-delimited JSON.

use crate::event::DecodedMessage;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, info};

/// Source errors
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("input file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed message on line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Yields decoded messages in capture order.
#[async_trait]
pub trait MessageSource: Send {
    /// Next message, or `None` once the source is exhausted.
    async fn next_message(&mut self) -> Result<Option<DecodedMessage>, SourceError>;
}

/// Replays a JSONL capture file, one message per non-blank line.
///
/// Missing `method_id`, `message_type` and `data` fields fall back to `0`,
/// `"mock"` and `{}`.
pub struct ReplaySource {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl ReplaySource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                SourceError::NotFound(path.clone())
            } else {
                SourceError::Read {
                    path: path.clone(),
                    source,
                }
            }
        })?;

        info!(path = %path.display(), "Replaying capture");

        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MessageSource for ReplaySource {
    async fn next_message(&mut self) -> Result<Option<DecodedMessage>, SourceError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|source| SourceError::Read {
                    path: self.path.clone(),
                    source,
                })?;

            let Some(line) = line else {
                debug!(lines = self.line_no, "Capture exhausted");
                return Ok(None);
            };
            self.line_no += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let message = serde_json::from_str(line).map_err(|source| SourceError::Malformed {
                line: self.line_no,
                source,
            })?;
            return Ok(Some(message));
        }
    }
}

/// In-memory source, mostly for embedding and tests.
#[derive(Debug, Default)]
pub struct VecSource {
    messages: VecDeque<DecodedMessage>,
}

impl VecSource {
    pub fn new(messages: impl IntoIterator<Item = DecodedMessage>) -> Self {
        Self {
            messages: messages.into_iter().collect(),
        }
    }
}

#[async_trait]
impl MessageSource for VecSource {
    async fn next_message(&mut self) -> Result<Option<DecodedMessage>, SourceError> {
        Ok(self.messages.pop_front())
    }
}
