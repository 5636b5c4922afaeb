#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid flow policy: {reason}")]
    InvalidPolicy { reason: String },

    #[error("{0} is shut down")]
    Closed(&'static str),
}

impl Error {
    #[must_use]
    pub fn invalid_policy(reason: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
