//! IMAP transport on async-imap, over tokio-rustls TLS or plain TCP.
//!
//! Mail is read with `BODY.PEEK[]` and flagged `\Seen` only once the cycle
//! has handled it, so a reply that fails to submit is picked up again while
//! answered mail stops crowding the newest-N window. IDLE runs on its own
//! short-lived session.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_imap::error::Error as ImapError;
use async_imap::extensions::idle::IdleResponse;
use async_imap::imap_proto::{MailboxDatum, Response};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use secrecy::ExposeSecret;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::message::{build_reply, parse_email};
use super::{Activity, InboundEmail, MailTransport, OutgoingReply, ReplyMode, smtp};
use crate::auth::{Credential, XOAuth2};
use crate::config::MailServerConfig;
use crate::error::TransportError;

/// Bound on connecting, logging in and logging out.
const IO_TIMEOUT: Duration = Duration::from_secs(30);

trait ImapIo: AsyncRead + AsyncWrite + Unpin + Send + Sync + Debug {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync + Debug> ImapIo for T {}

type ImapSession = async_imap::Session<Box<dyn ImapIo>>;

fn connect_failed(host: &str, reason: impl ToString) -> TransportError {
    TransportError::ConnectFailed {
        host: host.to_string(),
        reason: reason.to_string(),
    }
}

async fn open_stream(config: &MailServerConfig) -> Result<Box<dyn ImapIo>, TransportError> {
    let host = config.imap_host.as_str();
    let tcp = TcpStream::connect((host, config.imap_port))
        .await
        .map_err(|e| connect_failed(host, e))?;
    if !config.imap_use_ssl {
        return Ok(Box::new(tcp));
    }

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let server_name = rustls_pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| connect_failed(host, format!("Invalid server name: {e}")))?;
    let tls = tokio_rustls::TlsConnector::from(Arc::new(tls_config))
        .connect(server_name, tcp)
        .await
        .map_err(|e| connect_failed(host, format!("TLS handshake failed: {e}")))?;
    Ok(Box::new(tls))
}

/// Connect, consume the greeting and authenticate.
async fn open_session(
    config: &MailServerConfig,
    credential: &Credential,
) -> Result<ImapSession, TransportError> {
    let stream = open_stream(config).await?;
    let mut client = async_imap::Client::new(stream);
    client
        .read_response()
        .await
        .map_err(|e| connect_failed(&config.imap_host, e))?
        .ok_or_else(|| TransportError::Protocol("connection closed before greeting".into()))?;

    let user = config.username.as_str();
    let session = match credential {
        Credential::Password(password) => client.login(user, password.expose_secret()).await,
        Credential::Bearer(token) => {
            client
                .authenticate("XOAUTH2", XOAuth2::new(user, token))
                .await
        }
    };
    session.map_err(|(e, _client)| TransportError::AuthFailed {
        user: user.to_string(),
        reason: e.to_string(),
    })
}

/// Fresh authenticated session, bounded by [`IO_TIMEOUT`].
async fn new_session(config: &MailServerConfig) -> Result<ImapSession, TransportError> {
    let credential = config.auth.credential().await?;
    tokio::time::timeout(IO_TIMEOUT, open_session(config, &credential))
        .await
        .map_err(|_| connect_failed(&config.imap_host, "timed out"))?
}

async fn logout(mut session: ImapSession) {
    match tokio::time::timeout(IO_TIMEOUT, session.logout()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "IMAP logout failed"),
        Err(_) => debug!("IMAP logout timed out"),
    }
}

/// The newest `max` uids; servers assign them in ascending order.
fn newest(uids: HashSet<u32>, max: usize) -> Vec<u32> {
    let mut uids: Vec<u32> = uids.into_iter().collect();
    uids.sort_unstable();
    if uids.len() > max {
        uids.drain(..uids.len() - max);
    }
    uids
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Untagged IDLE notification that signals new mail.
fn is_new_mail(response: &Response<'_>) -> bool {
    matches!(
        response,
        Response::MailboxData(MailboxDatum::Exists(_) | MailboxDatum::Recent(_))
    )
}

/// A rejected command leaves the session usable; anything else drops it.
fn keeps_session(e: &ImapError) -> bool {
    matches!(e, ImapError::No(_) | ImapError::Bad(_))
}

/// Raw bodies of the newest `max` unseen messages, peeked.
async fn fetch_batch(
    session: &mut ImapSession,
    inbox: &str,
    max: usize,
) -> Result<Vec<(u32, Vec<u8>)>, ImapError> {
    session.select(inbox).await?;
    let uids = newest(session.uid_search("UNSEEN").await?, max);
    if uids.is_empty() {
        return Ok(Vec::new());
    }

    let mut batch = Vec::with_capacity(uids.len());
    {
        let mut fetches = session
            .uid_fetch(uid_set(&uids), "(UID BODY.PEEK[])")
            .await?;
        while let Some(fetch) = fetches.next().await {
            match fetch {
                Ok(fetch) => match (fetch.uid, fetch.body()) {
                    (Some(uid), Some(body)) => batch.push((uid, body.to_vec())),
                    _ => warn!(seq = fetch.message, "FETCH returned no uid or body"),
                },
                Err(e) => warn!(error = %e, "Failed to fetch message"),
            }
        }
    }

    // Nothing reads unsolicited responses on a polling session.
    while session.unsolicited_responses.try_recv().is_ok() {}
    Ok(batch)
}

async fn store_seen(session: &mut ImapSession, uid: u32) -> Result<(), ImapError> {
    let updates = session
        .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
        .await?;
    updates.try_collect::<Vec<_>>().await?;
    Ok(())
}

/// Select `inbox` and IDLE until new mail or `timeout`.
async fn idle_until(
    mut session: ImapSession,
    inbox: &str,
    timeout: Duration,
) -> Result<(Activity, ImapSession), ImapError> {
    if !session.capabilities().await?.has_str("IDLE") {
        return Ok((Activity::Unsupported, session));
    }
    session.select(inbox).await?;

    let mut idle = session.idle();
    idle.init().await?;
    debug!("IDLE mode active, waiting for new emails");

    let deadline = Instant::now() + timeout;
    let mut outcome = Activity::TimedOut;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let (wait, _interrupt) = idle.wait_with_timeout(remaining);
        match wait.await? {
            IdleResponse::NewData(data) if is_new_mail(data.parsed()) => {
                debug!(response = ?data.parsed(), "IDLE notification");
                outcome = Activity::Detected;
                break;
            }
            IdleResponse::NewData(_) => {}
            IdleResponse::Timeout | IdleResponse::ManualInterrupt => break,
        }
    }

    let session = idle.done().await?;
    Ok((outcome, session))
}

// ── Transport ───────────────────────────────────────────────────────

/// IMAP/SMTP transport for one mailbox.
pub struct ImapTransport {
    config: MailServerConfig,
    from_address: String,
    session: Option<ImapSession>,
    /// Message-ID to UID for the last fetched batch.
    uids: HashMap<String, u32>,
}

impl ImapTransport {
    /// `from_address` is the sender on replies; the username when empty.
    pub fn new(config: MailServerConfig, from_address: impl Into<String>) -> Self {
        let from_address = from_address.into();
        let from_address = if from_address.trim().is_empty() {
            config.username.clone()
        } else {
            from_address
        };
        Self {
            config,
            from_address,
            session: None,
            uids: HashMap::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    async fn ensure_connected(&mut self) -> Result<&mut ImapSession, TransportError> {
        if self.session.is_none() {
            self.connect().await?;
        }
        self.session.as_mut().ok_or(TransportError::NotConnected)
    }

    /// Drop the session after a failure that may have desynchronized it.
    fn release_on(&mut self, e: &ImapError) {
        if !keeps_session(e) {
            self.session = None;
        }
    }

    async fn save_draft(&mut self, message: lettre::Message) -> Result<(), TransportError> {
        let folder = self.config.drafts_folder.clone();
        let session = self.ensure_connected().await?;
        let result = session
            .append(&folder, Some("(\\Draft)"), None, message.formatted())
            .await;
        if let Err(e) = &result {
            self.release_on(e);
        }
        Ok(result?)
    }

    async fn send(&mut self, message: lettre::Message) -> Result<(), TransportError> {
        let credential = self.config.auth.credential().await?;
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || smtp::send(&config, &credential, &message))
            .await
            .map_err(|e| TransportError::TaskFailed(e.to_string()))?
    }
}

#[async_trait]
impl MailTransport for ImapTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.session.is_some() {
            return Ok(());
        }
        let session = new_session(&self.config).await?;
        info!(host = %self.config.imap_host, "Connected to IMAP");
        self.session = Some(session);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.uids.clear();
        if let Some(session) = self.session.take() {
            logout(session).await;
            info!(host = %self.config.imap_host, "Disconnected from IMAP");
        }
    }

    async fn fetch_unread(&mut self, max: usize) -> Vec<InboundEmail> {
        let inbox = self.config.inbox_folder.clone();
        let session = match self.ensure_connected().await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "IMAP connection failed");
                return Vec::new();
            }
        };

        match fetch_batch(session, &inbox, max).await {
            Ok(batch) => {
                self.uids.clear();
                let mut messages = Vec::with_capacity(batch.len());
                for (uid, raw) in batch {
                    match parse_email(&raw) {
                        Some(email) => {
                            self.uids.insert(email.id.clone(), uid);
                            messages.push(email);
                        }
                        None => warn!(uid, "Skipping unparseable message"),
                    }
                }
                debug!(count = messages.len(), "Retrieved unread messages");
                messages
            }
            Err(e) => {
                error!(error = %e, "Failed to get unread messages");
                self.release_on(&e);
                Vec::new()
            }
        }
    }

    async fn submit_reply(&mut self, reply: &OutgoingReply, mode: ReplyMode) -> bool {
        let message = match build_reply(
            &self.from_address,
            &reply.to,
            &reply.subject,
            &reply.body,
            reply.in_reply_to.as_deref(),
        ) {
            Ok(m) => m,
            Err(e) => {
                error!(to = %reply.to, error = %e, "Failed to build reply");
                return false;
            }
        };

        let result = match mode {
            ReplyMode::Draft => self.save_draft(message).await,
            ReplyMode::Send => self.send(message).await,
        };
        match result {
            Ok(()) => {
                info!(to = %reply.to, action = mode.label(), "Reply submitted");
                true
            }
            Err(e) => {
                error!(to = %reply.to, action = mode.label(), error = %e, "Failed to submit reply");
                false
            }
        }
    }

    async fn mark_seen(&mut self, message_id: &str) -> bool {
        let Some(&uid) = self.uids.get(message_id) else {
            warn!(id = %message_id, "No UID recorded for message, cannot flag as seen");
            return false;
        };
        let inbox = self.config.inbox_folder.clone();
        let session = match self.ensure_connected().await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "IMAP connection failed");
                return false;
            }
        };

        // Reselect: the session may have been reopened since the fetch.
        let result = match session.select(&inbox).await {
            Ok(_) => store_seen(session, uid).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                debug!(uid, id = %message_id, "Flagged message as seen");
                true
            }
            Err(e) => {
                error!(uid, id = %message_id, error = %e, "Failed to flag message as seen");
                self.release_on(&e);
                false
            }
        }
    }

    async fn wait_for_activity(&mut self, timeout: Duration) -> Result<Activity, TransportError> {
        let session = new_session(&self.config).await?;
        let (activity, session) = idle_until(session, &self.config.inbox_folder, timeout).await?;
        logout(session).await;
        Ok(activity)
    }
}
