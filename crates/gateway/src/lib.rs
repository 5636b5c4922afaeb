//! Pipeline host.
//!
//! Takes inbound chat messages in order, normalizes each into an
//! [`Envelope`](switchboard_pipeline::Envelope), dispatches it to the route its
//! command word selects, records the outcome with the error-rate tracker and
//! hands envelopes that did not fail to adaptive flow control. Envelopes that
//! survive their delay reach the [`ReplyDownstream`].

pub mod access;
pub mod commands;
pub mod downstream;
pub mod error;
pub mod server;

pub use {
    access::AdminList,
    commands::CommandTable,
    downstream::{REPLY_KEY, ReplyDownstream, reply_for},
    error::{Error, Result},
    server::{Gateway, Processed},
};
