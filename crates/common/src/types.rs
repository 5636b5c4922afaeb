use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

/// A raw inbound chat message as produced by a transport source, before it is
/// normalized into a pipeline envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Transport that produced the message (e.g. "telegram").
    pub channel: String,
    /// Sender handle; empty when the transport has none.
    pub username: String,
    pub text: String,
    pub chat_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i32>,
}

impl InboundMessage {
    pub fn new(channel: impl Into<String>, username: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            username: username.into(),
            text: text.into(),
            chat_id: 0,
            message_id: None,
        }
    }

    #[must_use]
    pub fn with_chat(mut self, chat_id: i64, message_id: Option<i32>) -> Self {
        self.chat_id = chat_id;
        self.message_id = message_id;
        self
    }

    /// First whitespace-separated word of the text, if any.
    pub fn command_word(&self) -> Option<&str> {
        self.text.split_whitespace().next()
    }
}

/// A reply a route wants delivered back to the chat the message came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub chat_id: i64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<i32>,
}

impl ReplyPayload {
    pub fn new(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            reply_to_id: None,
        }
    }

    #[must_use]
    pub fn in_reply_to(mut self, message_id: Option<i32>) -> Self {
        self.reply_to_id = message_id;
        self
    }
}

/// Delivers replies back through the transport a message arrived on.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send_reply(&self, reply: ReplyPayload) -> crate::Result<()>;
}
