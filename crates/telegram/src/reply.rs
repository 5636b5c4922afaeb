use std::future::Future;

use {
    async_trait::async_trait,
    switchboard_common::{ReplyPayload, ReplySink},
    teloxide::{
        RequestError,
        prelude::*,
        types::{MessageId, ReplyParameters},
    },
    tracing::{debug, info, warn},
};

use crate::error::Result;

/// Telegram's limit on a single message.
pub const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

const RETRY_AFTER_MAX_RETRIES: usize = 3;

/// Sends replies through the Bot API.
#[derive(Clone)]
pub struct TelegramReplier {
    bot: Bot,
}

impl TelegramReplier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Send `text` to `chat_id`, split into chunks that fit one message.
    ///
    /// Only the first chunk quotes `reply_to`. Returns the number of messages
    /// sent.
    pub async fn send_text(&self, chat_id: i64, text: &str, reply_to: Option<i32>) -> Result<usize> {
        let chunks = chunk_message(text, TELEGRAM_MAX_MESSAGE_LEN);
        if chunks.is_empty() {
            debug!(chat_id, "skipping empty reply");
            return Ok(0);
        }

        let mut reply_params = reply_to.map(|id| {
            ReplyParameters::new(MessageId(id)).allow_sending_without_reply()
        });
        for chunk in &chunks {
            let params = reply_params.take();
            self.with_retry(chat_id, || {
                let mut req = self.bot.send_message(ChatId(chat_id), chunk.as_str());
                if let Some(rp) = &params {
                    req = req.reply_parameters(rp.clone());
                }
                req.send()
            })
            .await?;
        }

        info!(chat_id, chunk_count = chunks.len(), "telegram reply sent");
        Ok(chunks.len())
    }

    async fn with_retry<T, F, Fut>(&self, chat_id: i64, mut request: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, RequestError>>,
    {
        let mut retries = 0usize;
        loop {
            match request().await {
                Ok(value) => return Ok(value),
                Err(RequestError::RetryAfter(wait)) if retries < RETRY_AFTER_MAX_RETRIES => {
                    retries += 1;
                    warn!(
                        chat_id,
                        retries,
                        retry_after_secs = wait.duration().as_secs(),
                        "telegram rate limited, waiting before retry"
                    );
                    tokio::time::sleep(wait.duration()).await;
                },
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl ReplySink for TelegramReplier {
    async fn send_reply(&self, reply: ReplyPayload) -> switchboard_common::Result<()> {
        self.send_text(reply.chat_id, &reply.text, reply.reply_to_id)
            .await
            .map(|_| ())
            .map_err(|e| switchboard_common::Error::delivery("telegram reply failed", e))
    }
}

/// Split `text` into pieces of at most `max_len` bytes.
///
/// Prefers to cut at the last newline, then the last space, inside the
/// window; the separator it cuts at is dropped. Never splits a character.
pub fn chunk_message(text: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 || text.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > max_len {
        let window = char_boundary_at_most(rest, max_len);
        let slice = &rest[..window];
        let cut = slice
            .rfind('\n')
            .or_else(|| slice.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(window);
        chunks.push(rest[..cut].to_string());
        let tail = &rest[cut..];
        rest = tail
            .strip_prefix('\n')
            .or_else(|| tail.strip_prefix(' '))
            .unwrap_or(tail);
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

fn char_boundary_at_most(s: &str, max: usize) -> usize {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    if end == 0 {
        // A single character wider than the limit still has to go somewhere.
        s.chars().next().map_or(s.len(), char::len_utf8)
    } else {
        end
    }
}
