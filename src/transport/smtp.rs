//! Outbound mail via lettre SMTP (blocking, run in `spawn_blocking`).

use lettre::transport::smtp::SmtpTransportBuilder;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::auth::Credential;
use crate::config::MailServerConfig;
use crate::error::TransportError;

/// Implicit-TLS submission port; everything else uses STARTTLS.
const SMTPS_PORT: u16 = 465;

fn transport_builder(config: &MailServerConfig) -> Result<SmtpTransportBuilder, TransportError> {
    let host = config.smtp_host.as_str();
    let builder = if !config.smtp_use_tls {
        SmtpTransport::builder_dangerous(host)
    } else if config.smtp_port == SMTPS_PORT {
        SmtpTransport::relay(host).map_err(|e| TransportError::ConnectFailed {
            host: host.to_string(),
            reason: format!("SMTP relay error: {e}"),
        })?
    } else {
        SmtpTransport::starttls_relay(host).map_err(|e| TransportError::ConnectFailed {
            host: host.to_string(),
            reason: format!("SMTP STARTTLS error: {e}"),
        })?
    };
    Ok(builder.port(config.smtp_port))
}

/// Send `message` through the tenant's SMTP server.
pub fn send(
    config: &MailServerConfig,
    credential: &Credential,
    message: &lettre::Message,
) -> Result<(), TransportError> {
    let builder = transport_builder(config)?;
    let builder = match credential {
        Credential::Password(p) => builder.credentials(Credentials::new(
            config.username.clone(),
            p.expose_secret().to_string(),
        )),
        Credential::Bearer(token) => builder
            .credentials(Credentials::new(
                config.username.clone(),
                token.expose_secret().to_string(),
            ))
            .authentication(vec![Mechanism::Xoauth2]),
    };

    builder
        .build()
        .send(message)
        .map_err(|e| TransportError::SendFailed(e.to_string()))?;
    Ok(())
}
