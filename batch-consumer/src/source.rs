use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SourceError;
use crate::message::RawMessage;

/// A sequential, closeable stream of messages for one partition assignment.
///
/// `next_message` resolves to `None` once the stream is closed. The
/// consumption loop drops the pending future whenever its deadline or
/// cancellation fires first, so implementations must not lose a message
/// when that happens.
#[async_trait]
pub trait MessageSource: Send {
    async fn next_message(&mut self) -> Option<Result<RawMessage, SourceError>>;
}

#[async_trait]
impl MessageSource for mpsc::Receiver<Result<RawMessage, SourceError>> {
    async fn next_message(&mut self) -> Option<Result<RawMessage, SourceError>> {
        self.recv().await
    }
}

#[async_trait]
impl MessageSource for mpsc::UnboundedReceiver<Result<RawMessage, SourceError>> {
    async fn next_message(&mut self) -> Option<Result<RawMessage, SourceError>> {
        self.recv().await
    }
}
