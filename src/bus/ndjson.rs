//! Newline-delimited JSON publisher over any async writer.

use super::{MessagePublisher, PublishError};
use crate::domain::OutboundMessage;
use async_trait::async_trait;
use std::fmt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Writes one JSON object per line and flushes after each message.
pub struct NdjsonPublisher<W> {
    writer: Mutex<W>,
}

impl NdjsonPublisher<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        NdjsonPublisher::new(tokio::io::stdout())
    }
}

impl<W> NdjsonPublisher<W> {
    pub fn new(writer: W) -> Self {
        NdjsonPublisher {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W> fmt::Debug for NdjsonPublisher<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NdjsonPublisher").finish_non_exhaustive()
    }
}

#[async_trait]
impl<W> MessagePublisher for NdjsonPublisher<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        let mut line =
            serde_json::to_vec(&message).map_err(|e| PublishError::Encode(e.to_string()))?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))
    }
}
