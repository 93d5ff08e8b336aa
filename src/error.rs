/// Error kinds surfaced by the bot.
///
/// Platform adapters map their library errors into this type so the message
/// pipeline can tell a recoverable rate limit apart from a hard delivery failure.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited, retry after {seconds}s")]
    RateLimited { seconds: u64 },

    #[error("response generation failed: {0}")]
    ResponseGeneration(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("platform error: {0}")]
    Platform(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl BotError {
    /// Short name of the error kind, shown in the diagnostic reply.
    pub fn kind(&self) -> &'static str {
        match self {
            BotError::Configuration(_) => "ConfigurationError",
            BotError::Authentication(_) => "AuthenticationError",
            BotError::RateLimited { .. } => "RateLimitError",
            BotError::ResponseGeneration(_) => "ResponseGenerationError",
            BotError::Delivery(_) => "DeliveryError",
            BotError::Platform(_) => "PlatformError",
            BotError::Io(_) => "IoError",
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
