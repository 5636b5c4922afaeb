use std::time::Duration;

use {
    secrecy::ExposeSecret,
    switchboard_common::InboundMessage,
    switchboard_config::TelegramConfig,
    teloxide::{
        prelude::*,
        types::{AllowedUpdate, UpdateKind},
    },
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::error::{Error, Result};

/// Channel name stamped on every inbound message.
pub const CHANNEL: &str = "telegram";

/// Extra HTTP time allowed on top of the long-poll timeout so the client
/// does not abort before Telegram answers.
const CLIENT_TIMEOUT_MARGIN_SECS: u64 = 15;

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Long-polling source of inbound Telegram messages.
pub struct TelegramSource {
    bot: Bot,
    poll_timeout_secs: u32,
    offset: i32,
}

impl TelegramSource {
    /// Build a bot client from config. Fails when no token is set.
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        if !config.has_token() {
            return Err(Error::MissingToken);
        }
        let client = teloxide::net::default_reqwest_settings()
            .timeout(Duration::from_secs(
                u64::from(config.poll_timeout_secs) + CLIENT_TIMEOUT_MARGIN_SECS,
            ))
            .build()
            .map_err(|e| Error::Client(e.to_string()))?;
        let bot = Bot::with_client(config.token.expose_secret(), client);
        Ok(Self::with_bot(bot, config.poll_timeout_secs))
    }

    pub fn with_bot(bot: Bot, poll_timeout_secs: u32) -> Self {
        Self {
            bot,
            poll_timeout_secs,
            offset: 0,
        }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Verify credentials and clear any webhook so long polling works.
    ///
    /// Returns the bot's username.
    pub async fn connect(&self) -> Result<Option<String>> {
        let me = self.bot.get_me().await?;
        self.bot.delete_webhook().send().await?;
        info!(username = ?me.username, "telegram bot connected (webhook cleared)");
        Ok(me.username.clone())
    }

    /// Fetch one batch of updates and forward every text message.
    ///
    /// Returns the number of messages forwarded.
    pub async fn poll_once(&mut self, tx: &mpsc::Sender<InboundMessage>) -> Result<usize> {
        let updates = self
            .bot
            .get_updates()
            .offset(self.offset)
            .timeout(self.poll_timeout_secs)
            .allowed_updates(vec![AllowedUpdate::Message])
            .await?;
        debug!(count = updates.len(), "got telegram updates");

        let mut forwarded = 0;
        for update in updates {
            self.offset = update.id.as_offset();
            let UpdateKind::Message(msg) = update.kind else {
                debug!("ignoring non-message update");
                continue;
            };
            let Some(inbound) = inbound_from_message(&msg) else {
                debug!(chat_id = msg.chat.id.0, "ignoring message without text");
                continue;
            };
            debug!(
                chat_id = inbound.chat_id,
                username = %inbound.username,
                "received telegram message"
            );
            tx.send(inbound).await.map_err(|_| Error::ChannelClosed)?;
            forwarded += 1;
        }

        #[cfg(feature = "metrics")]
        metrics::counter!("switchboard_telegram_messages_total").increment(forwarded as u64);

        Ok(forwarded)
    }

    /// Poll until `cancel` fires or the receiving side of `tx` is dropped.
    ///
    /// Transient errors are retried after a pause. A conflicting poller
    /// (another process using the same token) cancels `cancel` and ends the
    /// loop with that error.
    pub async fn run(
        mut self,
        tx: mpsc::Sender<InboundMessage>,
        cancel: CancellationToken,
    ) -> Result<()> {
        info!("starting telegram polling loop");
        loop {
            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                polled = self.poll_once(&tx) => polled,
            };
            match polled {
                Ok(_) => {},
                Err(Error::ChannelClosed) => {
                    info!("inbound channel closed");
                    break;
                },
                Err(e) if e.is_conflict() => {
                    warn!("telegram polling disabled: another instance is already running with this token");
                    cancel.cancel();
                    return Err(e);
                },
                Err(e) => {
                    warn!(error = %e, "telegram getUpdates failed");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(RETRY_DELAY) => {},
                    }
                },
            }
        }
        info!("telegram polling stopped");
        Ok(())
    }
}

/// Map a Telegram message to an inbound message.
///
/// Uses the text, or the caption for media messages. Messages with neither
/// are skipped. Senders without a username get an empty one.
pub fn inbound_from_message(msg: &Message) -> Option<InboundMessage> {
    let text = msg.text().or_else(|| msg.caption())?;
    let username = msg
        .from
        .as_ref()
        .and_then(|u| u.username.clone())
        .unwrap_or_default();
    Some(InboundMessage::new(CHANNEL, username, text).with_chat(msg.chat.id.0, Some(msg.id.0)))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    use crate::mock_api::{MockTelegramApi, message_json, text_update};

    fn message(content: serde_json::Value, username: Option<&str>) -> Message {
        serde_json::from_value(message_json(5, content, username)).expect("deserialize message")
    }

    #[test]
    fn text_message_maps_to_inbound() {
        let msg = message(json!({ "text": ".dl https://x.test/v" }), Some("alice"));
        let inbound = inbound_from_message(&msg).unwrap();
        assert_eq!(inbound.channel, "telegram");
        assert_eq!(inbound.username, "alice");
        assert_eq!(inbound.text, ".dl https://x.test/v");
        assert_eq!(inbound.chat_id, 42);
        assert_eq!(inbound.message_id, Some(5));
    }

    #[test]
    fn caption_is_used_for_media_messages() {
        let msg = message(
            json!({
                "photo": [{
                    "file_id": "photo-id",
                    "file_unique_id": "photo-unique",
                    "width": 10,
                    "height": 10
                }],
                "caption": "look"
            }),
            Some("alice"),
        );
        assert_eq!(inbound_from_message(&msg).unwrap().text, "look");
    }

    #[test]
    fn sender_without_username_is_empty() {
        let msg = message(json!({ "text": "hi" }), None);
        assert_eq!(inbound_from_message(&msg).unwrap().username, "");
    }

    #[test]
    fn message_without_text_is_skipped() {
        let msg = message(
            json!({ "location": { "latitude": 1.5, "longitude": 2.5 } }),
            Some("alice"),
        );
        assert!(inbound_from_message(&msg).is_none());
    }

    #[test]
    fn missing_token_is_rejected() {
        let err = TelegramSource::new(&TelegramConfig::default()).err().unwrap();
        assert!(matches!(err, Error::MissingToken));
    }

    #[test]
    fn configured_token_builds_client() {
        let config = TelegramConfig {
            token: secrecy::Secret::new("123:abc".into()),
            poll_timeout_secs: 5,
        };
        let source = TelegramSource::new(&config).unwrap();
        assert_eq!(source.poll_timeout_secs, 5);
        assert_eq!(source.bot().token(), "123:abc");
    }

    #[tokio::test]
    async fn connect_returns_bot_username() {
        let api = MockTelegramApi::start().await;
        let source = TelegramSource::with_bot(api.bot.clone(), 1);
        assert_eq!(source.connect().await.unwrap().as_deref(), Some("switchboard_bot"));
        assert_eq!(api.requests("deleteWebhook").len(), 1);
        api.stop().await;
    }

    #[tokio::test]
    async fn poll_once_forwards_text_and_advances_offset() {
        let api = MockTelegramApi::start().await;
        api.push_updates(vec![
            text_update(10, 1, "hello", Some("alice")),
            json!({
                "update_id": 11,
                "message": message_json(2, json!({ "location": { "latitude": 1.5, "longitude": 2.5 } }), Some("bob"))
            }),
            text_update(12, 3, ".dl https://x.test/v", Some("carol")),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        let mut source = TelegramSource::with_bot(api.bot.clone(), 1);

        assert_eq!(source.poll_once(&tx).await.unwrap(), 2);
        assert_eq!(rx.recv().await.unwrap().username, "alice");
        assert_eq!(rx.recv().await.unwrap().text, ".dl https://x.test/v");

        source.poll_once(&tx).await.unwrap();
        let polls = api.requests("getUpdates");
        assert_eq!(polls.len(), 2);
        assert_eq!(polls[0]["offset"], 0);
        assert_eq!(polls[1]["offset"], 13);
        assert_eq!(polls[1]["timeout"], 1);
        api.stop().await;
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let api = MockTelegramApi::start().await;
        api.push_updates(vec![text_update(1, 1, "one", Some("alice"))]);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(TelegramSource::with_bot(api.bot.clone(), 1).run(tx, cancel.clone()));

        assert_eq!(rx.recv().await.unwrap().text, "one");
        cancel.cancel();
        task.await.unwrap().unwrap();
        api.stop().await;
    }

    #[tokio::test]
    async fn run_stops_when_receiver_is_dropped() {
        let api = MockTelegramApi::start().await;
        api.push_updates(vec![text_update(1, 1, "one", Some("alice"))]);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        TelegramSource::with_bot(api.bot.clone(), 1)
            .run(tx, CancellationToken::new())
            .await
            .unwrap();
        api.stop().await;
    }

    #[tokio::test]
    async fn conflicting_poller_cancels_and_errors() {
        let api = MockTelegramApi::start().await;
        api.push_response(
            "getUpdates",
            json!({
                "ok": false,
                "error_code": 409,
                "description": "Conflict: terminated by other getUpdates request; make sure that only one bot instance is running"
            }),
        );
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let err = TelegramSource::with_bot(api.bot.clone(), 1)
            .run(tx, cancel.clone())
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "{err}");
        assert!(cancel.is_cancelled());
        api.stop().await;
    }
}
