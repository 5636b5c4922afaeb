use {
    serde_json::{Map, Value},
    switchboard_common::types::InboundMessage,
};

use crate::error::DispatchError;

/// Text prefix that marks a message as a command.
pub const DEFAULT_COMMAND_PREFIX: &str = ".";

/// The mutable unit of work threaded through every stage of a dispatch.
///
/// `correlation_id` is fixed at creation. `failed` and `errors` are only
/// written by the dispatcher; the error list is append-only. Stages are free
/// to add or overwrite entries in the value map.
#[derive(Debug, Clone)]
pub struct Envelope {
    correlation_id: String,
    pub username: String,
    pub message_text: String,
    pub is_command: bool,
    pub is_admin: bool,
    failed: bool,
    errors: Vec<DispatchError>,
    values: Map<String, Value>,
}

impl Envelope {
    pub fn new(username: impl Into<String>, message_text: impl Into<String>) -> Self {
        Self::with_command_prefix(username, message_text, DEFAULT_COMMAND_PREFIX)
    }

    pub fn with_command_prefix(
        username: impl Into<String>,
        message_text: impl Into<String>,
        prefix: &str,
    ) -> Self {
        let message_text = message_text.into();
        let is_command = !prefix.is_empty() && message_text.starts_with(prefix);
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            username: username.into(),
            message_text,
            is_command,
            is_admin: false,
            failed: false,
            errors: Vec::new(),
            values: Map::new(),
        }
    }

    /// Normalize a transport message, keeping its routing coordinates as values.
    pub fn from_inbound(msg: &InboundMessage, prefix: &str) -> Self {
        let mut envelope = Self::with_command_prefix(&msg.username, &msg.text, prefix);
        envelope.insert("channel", Value::from(msg.channel.as_str()));
        envelope.insert("chat_id", Value::from(msg.chat_id));
        if let Some(id) = msg.message_id {
            envelope.insert("message_id", Value::from(id));
        }
        envelope
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn errors(&self) -> &[DispatchError] {
        &self.errors
    }

    /// Mark the envelope failed and append `error`.
    pub(crate) fn record_error(&mut self, error: DispatchError) {
        self.failed = true;
        self.errors.push(error);
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Words of the message after the command word.
    pub fn arguments(&self) -> impl Iterator<Item = &str> {
        self.message_text.split_whitespace().skip(1)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::error::Stage, crate::slug::Slug};

    #[test]
    fn command_flag_follows_prefix() {
        assert!(Envelope::new("alice", ".dl https://example.com").is_command);
        assert!(!Envelope::new("alice", "hello").is_command);
        assert!(Envelope::with_command_prefix("a", "/start", "/").is_command);
        assert!(!Envelope::with_command_prefix("a", "/start", "").is_command);
    }

    #[test]
    fn correlation_ids_are_unique() {
        let a = Envelope::new("u", "x");
        let b = Envelope::new("u", "x");
        assert_ne!(a.correlation_id(), b.correlation_id());
        assert!(!a.correlation_id().is_empty());
    }

    #[test]
    fn correlation_id_survives_value_overwrite() {
        let mut env = Envelope::new("u", "x");
        let id = env.correlation_id().to_string();
        env.insert("correlation_id", "spoofed");
        assert_eq!(env.correlation_id(), id);
        assert_eq!(env.get_str("correlation_id"), Some("spoofed"));
    }

    #[test]
    fn from_inbound_keeps_chat_coordinates() {
        let msg = InboundMessage::new("telegram", "bob", ".dl url").with_chat(99, Some(7));
        let env = Envelope::from_inbound(&msg, DEFAULT_COMMAND_PREFIX);
        assert_eq!(env.username, "bob");
        assert!(env.is_command);
        assert_eq!(env.get_i64("chat_id"), Some(99));
        assert_eq!(env.get_i64("message_id"), Some(7));
        assert_eq!(env.get_str("channel"), Some("telegram"));
        assert_eq!(env.arguments().collect::<Vec<_>>(), vec!["url"]);
    }

    #[test]
    fn record_error_sets_failed_and_appends() {
        let mut env = Envelope::new("u", "x");
        assert!(!env.failed());
        env.record_error(DispatchError::DoubleContinuation {
            stage: Stage::Handler {
                route: Slug::parse("v1.x").unwrap(),
            },
        });
        assert!(env.failed());
        assert_eq!(env.errors().len(), 1);
    }
}
