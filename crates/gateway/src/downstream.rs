use std::sync::Arc;

use {
    async_trait::async_trait,
    switchboard_common::{ReplyPayload, ReplySink},
    switchboard_flow::Downstream,
    switchboard_pipeline::Envelope,
    tracing::{debug, info},
};

/// Envelope key a route sets to have text sent back to the chat.
pub const REPLY_KEY: &str = "reply";

/// Final stage after flow control: delivers the envelope's reply, if any.
pub struct ReplyDownstream {
    sink: Arc<dyn ReplySink>,
}

impl ReplyDownstream {
    pub fn new(sink: Arc<dyn ReplySink>) -> Self {
        Self { sink }
    }
}

/// The reply an envelope asks for, addressed to the chat it came from.
pub fn reply_for(envelope: &Envelope) -> Option<ReplyPayload> {
    let text = envelope.get_str(REPLY_KEY)?;
    let chat_id = envelope.get_i64("chat_id")?;
    let message_id = envelope
        .get_i64("message_id")
        .and_then(|id| i32::try_from(id).ok());
    Some(ReplyPayload::new(chat_id, text).in_reply_to(message_id))
}

#[async_trait]
impl Downstream<Envelope> for ReplyDownstream {
    async fn deliver(&self, identity: &str, envelope: Envelope) -> anyhow::Result<()> {
        let Some(reply) = reply_for(&envelope) else {
            info!(
                identity,
                correlation_id = envelope.correlation_id(),
                "message processed"
            );
            return Ok(());
        };
        debug!(
            identity,
            correlation_id = envelope.correlation_id(),
            chat_id = reply.chat_id,
            "delivering reply"
        );
        self.sink.send_reply(reply).await?;
        Ok(())
    }
}
