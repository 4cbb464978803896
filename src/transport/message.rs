//! Parsing fetched mail and building reply messages.

use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use mail_parser::{MessageParser, MimeHeaders};

use crate::dedup::sha256_hex;
use crate::error::TransportError;

/// Length of the body preview handed to the reply generator.
pub const SNIPPET_CHARS: usize = 200;

/// One fetched unread email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEmail {
    /// Message-ID header in its angle-bracketed form, `<local@domain>`.
    pub id: String,
    /// In-Reply-To (bracketed) when present, otherwise the message's own id.
    pub thread_id: String,
    pub from_address: String,
    pub subject: String,
    pub snippet: String,
    pub body: String,
}

/// Parse a raw RFC 5322 message.
///
/// A message without a Message-ID gets a stable id derived from its bytes,
/// so it dedups across cycles.
pub fn parse_email(raw: &[u8]) -> Option<InboundEmail> {
    let parsed = MessageParser::default().parse(raw)?;

    let id = parsed
        .message_id()
        .map(angle_bracketed)
        .unwrap_or_else(|| format!("gen-{}", &sha256_hex(&String::from_utf8_lossy(raw))[..32]));
    let thread_id = parsed
        .in_reply_to()
        .as_text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(angle_bracketed)
        .unwrap_or_else(|| id.clone());

    let body = extract_text(&parsed);
    Some(InboundEmail {
        id,
        thread_id,
        from_address: extract_sender(&parsed),
        subject: parsed.subject().unwrap_or_default().to_string(),
        snippet: snippet(&body),
        body,
    })
}

/// First [`SNIPPET_CHARS`] characters of the body.
pub fn snippet(body: &str) -> String {
    body.chars().take(SNIPPET_CHARS).collect()
}

fn extract_sender(parsed: &mail_parser::Message) -> String {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_default()
}

/// Plain-text body; HTML is stripped when no text part exists.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.trim().to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && MimeHeaders::attachment_name(part).is_none()
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.trim().to_string();
        }
    }
    String::new()
}

/// Strip HTML tags and collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn angle_bracketed(id: &str) -> String {
    let id = id.trim();
    if id.starts_with('<') {
        id.to_string()
    } else {
        format!("<{id}>")
    }
}

/// Build the reply as a MIME message, threaded onto `in_reply_to`.
pub fn build_reply(
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
    in_reply_to: Option<&str>,
) -> Result<lettre::Message, TransportError> {
    let from: Mailbox = from
        .parse()
        .map_err(|e| TransportError::Build(format!("Invalid from address: {e}")))?;
    let to: Mailbox = to
        .parse()
        .map_err(|e| TransportError::Build(format!("Invalid to address: {e}")))?;

    let mut builder = lettre::Message::builder().from(from).to(to).subject(subject);
    if let Some(id) = in_reply_to.filter(|s| !s.trim().is_empty()) {
        let id = angle_bracketed(id);
        builder = builder.in_reply_to(id.clone()).references(id);
    }

    builder
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| TransportError::Build(e.to_string()))
}
