use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Telegram(#[from] teloxide::RequestError),

    #[error("building telegram http client: {0}")]
    Client(String),

    #[error("telegram bot token is not configured")]
    MissingToken,

    #[error("inbound channel closed")]
    ChannelClosed,
}

impl Error {
    /// Another process is polling with the same token.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::Telegram(teloxide::RequestError::Api(
                teloxide::ApiError::TerminatedByOtherGetUpdates
            ))
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
