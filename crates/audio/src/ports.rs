//! Transport seams between the practice controller and the platform audio stack.
//!
//! Ports are owned by exactly one controller at a time; implementations are
//! moved into it and released when the session finishes or closes.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::buffer::{AudioBuffer, CaptureFormat};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("failed to open {0}")]
    Open(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("port is closed")]
    Closed,
}

impl PortError {
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport(message.into())
    }
}

/// Receives captured buffers. Implementations must never block the caller,
/// which is usually a realtime audio thread.
pub trait BufferSink: Send + Sync {
    fn push(&self, buffer: AudioBuffer);
}

#[async_trait]
pub trait PlaybackPort: Send {
    async fn open(&mut self, source: &str) -> Result<(), PortError>;
    async fn seek(&mut self, position_ms: u64) -> Result<(), PortError>;
    async fn play(&mut self) -> Result<(), PortError>;
    async fn pause(&mut self) -> Result<(), PortError>;
    async fn stop(&mut self) -> Result<(), PortError>;
    /// Reported play position in milliseconds.
    fn position(&self) -> watch::Receiver<u64>;
    fn playing(&self) -> watch::Receiver<bool>;
}

#[async_trait]
pub trait RecordPort: Send {
    fn format(&self) -> CaptureFormat;
    async fn start(&mut self, sink: Arc<dyn BufferSink>) -> Result<(), PortError>;
    async fn stop(&mut self) -> Result<(), PortError>;
}
