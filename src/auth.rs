//! Mail credentials: passwords and OAuth2 bearer tokens.
//!
//! Token refresh happens outside this process; the bot only reads the
//! current access token and refuses to use one that is about to expire.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::error::TransportError;

/// How a tenant authenticates against IMAP and SMTP.
#[derive(Debug, Clone)]
pub enum MailAuth {
    Password(SecretString),
    OAuth2 {
        provider: String,
        access_token: SecretString,
        expires_at: Option<DateTime<Utc>>,
    },
}

/// Resolved credential for one connection attempt.
#[derive(Debug, Clone)]
pub enum Credential {
    Password(SecretString),
    Bearer(SecretString),
}

/// Source of OAuth2 access tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<SecretString, TransportError>;
}

/// Serves the token stored in the tenant configuration.
pub struct StoredTokenProvider {
    token: SecretString,
    expires_at: Option<DateTime<Utc>>,
}

/// Tokens closer than this to expiry are treated as expired.
const EXPIRY_BUFFER_MINUTES: i64 = 5;

impl StoredTokenProvider {
    pub fn new(token: SecretString, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { token, expires_at }
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(exp) => exp > now + ChronoDuration::minutes(EXPIRY_BUFFER_MINUTES),
            None => true,
        }
    }
}

#[async_trait]
impl TokenProvider for StoredTokenProvider {
    async fn access_token(&self) -> Result<SecretString, TransportError> {
        if self.is_fresh(Utc::now()) {
            Ok(self.token.clone())
        } else {
            Err(TransportError::Token(
                "stored access token is expired or about to expire".into(),
            ))
        }
    }
}

impl MailAuth {
    /// Resolve the credential to present on the next connection.
    pub async fn credential(&self) -> Result<Credential, TransportError> {
        match self {
            MailAuth::Password(p) => Ok(Credential::Password(p.clone())),
            MailAuth::OAuth2 {
                access_token,
                expires_at,
                ..
            } => {
                let provider = StoredTokenProvider::new(access_token.clone(), *expires_at);
                Ok(Credential::Bearer(provider.access_token().await?))
            }
        }
    }
}

/// SASL XOAUTH2 initial response, before base64 encoding.
pub fn xoauth2_payload(user: &str, token: &SecretString) -> String {
    format!("user={user}\x01auth=Bearer {}\x01\x01", token.expose_secret())
}

/// IMAP `AUTHENTICATE XOAUTH2` responder.
///
/// The payload is sent once; a second challenge (the server's error
/// details) gets an empty response so the exchange can finish.
pub struct XOAuth2 {
    payload: String,
}

impl XOAuth2 {
    pub fn new(user: &str, token: &SecretString) -> Self {
        Self {
            payload: xoauth2_payload(user, token),
        }
    }
}

impl async_imap::Authenticator for XOAuth2 {
    type Response = String;

    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        std::mem::take(&mut self.payload)
    }
}
