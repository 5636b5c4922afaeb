use thiserror::Error;

/// Failure reported by a [`ReplySink`](crate::ReplySink).
#[derive(Error, Debug)]
pub enum Error {
    /// The transport refused the reply outright.
    #[error("reply rejected: {0}")]
    Rejected(String),

    #[error("{context}: {source}")]
    Delivery {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    #[must_use]
    pub fn delivery(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Delivery {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Rejected(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── with_context ────────────────────────────────────────────────────────────

/// Crate errors that can carry a bare description.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Adds `.with_context(|| ..)` to `Result` and `Option` in the invoking
/// module, which must define `Error: FromMessage` and a matching `Result`.
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|source| {
                    let context = f().into();
                    <Error as $crate::FromMessage>::from_message(format!("{context}: {source}"))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    mod local {
        use super::super::Error;

        pub type Result<T> = std::result::Result<T, Error>;

        crate::impl_context!();

        pub fn chat_id(raw: &str) -> Result<i64> {
            raw.parse::<i64>().with_context(|| format!("chat id {raw:?}"))
        }

        pub fn first_chunk(chunks: &[&str]) -> Result<String> {
            chunks
                .first()
                .map(|c| c.to_string())
                .with_context(|| "empty reply")
        }
    }

    #[test]
    fn result_context_prefixes_source_message() {
        let text = local::chat_id("abc").unwrap_err().to_string();
        assert!(text.starts_with("reply rejected: chat id \"abc\": "), "{text}");
        assert_eq!(local::chat_id("42").unwrap(), 42);
    }

    #[test]
    fn option_context_uses_description() {
        let err = local::first_chunk(&[]).unwrap_err();
        assert_eq!(err.to_string(), "reply rejected: empty reply");
        assert_eq!(local::first_chunk(&["hi"]).unwrap(), "hi");
    }

    #[test]
    fn delivery_keeps_context_and_source() {
        let io = std::io::Error::other("connection reset");
        let err = Error::delivery("sending reply", io);
        assert_eq!(err.to_string(), "sending reply: connection reset");
        assert!(std::error::Error::source(&err).is_some());
    }
}
