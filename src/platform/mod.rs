pub mod telegram;

use async_trait::async_trait;

use crate::error::Result;

/// A direct message delivered by the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub message_id: i32,
    /// Sender's platform user ID, when the update carries one.
    pub sender_id: Option<i64>,
    /// Message body. `None` for service messages; empty for media without a caption.
    pub text: Option<String>,
    /// True when the account itself sent this message.
    pub outgoing: bool,
}

/// Resolved sender of a message.
#[derive(Debug, Clone, PartialEq)]
pub struct Sender {
    pub id: i64,
    pub display_name: String,
}

/// The logged-in account.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: i64,
    pub first_name: String,
    pub username: Option<String>,
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.username {
            Some(username) => write!(f, "{} (@{})", self.first_name, username),
            None => write!(f, "{}", self.first_name),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ChatEvent {
    NewMessage(IncomingMessage),
    MessageEdited(IncomingMessage),
}

/// Operations the reply pipeline needs from a chat platform.
///
/// The client must tolerate concurrent calls from several in-flight message
/// handlers. A flood-control refusal is reported as `BotError::RateLimited`.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn resolve_sender(&self, msg: &IncomingMessage) -> Result<Option<Sender>>;

    async fn reply(&self, msg: &IncomingMessage, text: &str) -> Result<()>;

    async fn send_reaction(&self, msg: &IncomingMessage, emoji: &str) -> Result<()>;

    async fn mark_read(&self, msg: &IncomingMessage) -> Result<()>;

    async fn get_me(&self) -> Result<Identity>;

    fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> Result<()>;
}
