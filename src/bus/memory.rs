//! In-memory publisher for tests.

use super::{MessagePublisher, PublishError};
use crate::domain::OutboundMessage;
use async_trait::async_trait;
use std::sync::Mutex;

/// Publisher that keeps every message it is given.
#[derive(Debug, Default)]
pub struct InMemoryPublisher {
    messages: Mutex<Vec<OutboundMessage>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far.
    pub fn messages(&self) -> Vec<OutboundMessage> {
        match self.messages.lock() {
            Ok(messages) => messages.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Drain published messages.
    pub fn take(&self) -> Vec<OutboundMessage> {
        match self.messages.lock() {
            Ok(mut messages) => std::mem::take(&mut *messages),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl MessagePublisher for InMemoryPublisher {
    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        let mut messages = self
            .messages
            .lock()
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        messages.push(message);
        Ok(())
    }
}
