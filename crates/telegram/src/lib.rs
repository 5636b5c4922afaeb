//! Telegram transport for switchboard.
//!
//! [`TelegramSource`] long-polls the Bot API and turns text messages into
//! [`InboundMessage`](switchboard_common::InboundMessage)s on an mpsc channel.
//! [`TelegramReplier`] sends replies back to the originating chat.

pub mod bot;
pub mod error;
pub mod reply;

#[cfg(test)]
mod mock_api;

pub use {
    bot::{TelegramSource, inbound_from_message},
    error::{Error, Result},
    reply::{TELEGRAM_MAX_MESSAGE_LEN, TelegramReplier, chunk_message},
};
