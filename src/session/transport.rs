use async_trait::async_trait;

use crate::error::AppResult;

/// Message-oriented text channel to the catalogue.
///
/// Implementations report every failure as `AppError::Transport` (or `Tls`); the
/// session treats any error from these calls as the end of the connection.
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: String) -> AppResult<()>;

    /// Wait for the next complete text message.
    async fn recv_text(&mut self) -> AppResult<String>;

    async fn close(&mut self) -> AppResult<()>;
}
