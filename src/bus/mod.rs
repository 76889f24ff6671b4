//! Outbound message bus.
//!
//! The state machine publishes every notification and position message
//! through [`MessagePublisher`]; the binary writes them as NDJSON to stdout
//! and tests collect them in memory.

use crate::domain::OutboundMessage;
use async_trait::async_trait;
use std::fmt;

pub mod memory;
pub mod ndjson;

pub use memory::InMemoryPublisher;
pub use ndjson::NdjsonPublisher;

#[async_trait]
pub trait MessagePublisher: Send + Sync + fmt::Debug {
    /// Publish one message. Delivery order is call order.
    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError>;
}

/// Error type for publish operations.
#[derive(Debug, Clone)]
pub enum PublishError {
    /// Message could not be encoded
    Encode(String),
    /// Underlying transport failed
    Transport(String),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::Encode(msg) => write!(f, "Encode error: {}", msg),
            PublishError::Transport(msg) => write!(f, "Transport error: {}", msg),
        }
    }
}

impl std::error::Error for PublishError {}
