//! Mail transport: fetch unread mail, submit replies, wait for activity.
//!
//! `ImapTransport` is the production implementation: async-imap for reading,
//! drafts and IDLE, lettre SMTP for sending.

pub mod imap;
pub mod message;
pub mod smtp;

pub use imap::ImapTransport;
pub use message::InboundEmail;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;

/// Whether a reply is staged for review or transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    Draft,
    Send,
}

impl ReplyMode {
    pub fn from_auto_send(auto_send: bool) -> Self {
        if auto_send { ReplyMode::Send } else { ReplyMode::Draft }
    }

    pub fn label(self) -> &'static str {
        match self {
            ReplyMode::Draft => "draft created",
            ReplyMode::Send => "sent",
        }
    }
}

/// A generated reply ready to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingReply {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Message-ID of the mail being answered, for threading.
    pub in_reply_to: Option<String>,
}

/// Outcome of a blocking wait for new mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Detected,
    TimedOut,
    /// The server cannot push notifications; fall back to polling.
    Unsupported,
}

/// Mailbox access for one tenant.
///
/// The transport is connected before fetch/submit and disconnected after
/// every cycle. `fetch_unread` and `submit_reply` swallow their failures
/// (empty list, `false`); only `connect` and `wait_for_activity` report them.
#[async_trait]
pub trait MailTransport: Send {
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Release the connection. Safe to call when not connected.
    async fn disconnect(&mut self);

    /// At most `max` unread messages, in no guaranteed order.
    async fn fetch_unread(&mut self, max: usize) -> Vec<InboundEmail>;

    /// Create one draft or send one message. `true` on success.
    async fn submit_reply(&mut self, reply: &OutgoingReply, mode: ReplyMode) -> bool;

    /// Flag a handled message as read so later fetches move past it.
    /// `message_id` is the id of a message returned by the last fetch.
    async fn mark_seen(&mut self, _message_id: &str) -> bool {
        true
    }

    /// Block until new mail arrives or `timeout` elapses.
    async fn wait_for_activity(&mut self, _timeout: Duration) -> Result<Activity, TransportError> {
        Ok(Activity::Unsupported)
    }
}
