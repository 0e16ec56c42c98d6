//! Outgoing mail over SMTP.

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::{
        authentication::{Credentials, Mechanism},
        client::{Tls, TlsParameters},
    },
};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::config::EmailConfig;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP transport error: {0}")]
    Transport(String),

    #[error("Failed to send: {0}")]
    Send(String),
}

/// A plain-text message for one or more recipients.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    /// Message-ID this mail replies to, with or without angle brackets.
    pub in_reply_to: Option<String>,
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

const IMPLICIT_TLS_PORT: u16 = 465;

impl SmtpMailer {
    /// STARTTLS when `smtp_use_tls` is set (implicit TLS on port 465), plaintext otherwise.
    /// PLAIN authentication when `smtp_auth` is set and a username is configured.
    pub fn new(config: &EmailConfig) -> Result<Self, MailError> {
        let from = parse_mailbox(Some(&config.smtp_from_name), &config.smtp_from_email)?;
        let host = config.smtp_host.as_str();

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(config.smtp_port);

        if config.smtp_use_tls {
            let tls = TlsParameters::builder(host.to_string())
                .dangerous_accept_invalid_certs(config.smtp_insecure)
                .dangerous_accept_invalid_hostnames(config.smtp_insecure)
                .build()
                .map_err(|e| MailError::Transport(e.to_string()))?;
            builder = builder.tls(if config.smtp_port == IMPLICIT_TLS_PORT {
                Tls::Wrapper(tls)
            } else {
                Tls::Required(tls)
            });
        }

        if config.smtp_auth && !config.smtp_username.is_empty() {
            builder = builder
                .credentials(Credentials::new(
                    config.smtp_username.clone(),
                    config.smtp_password.clone(),
                ))
                .authentication(vec![Mechanism::Plain]);
        }

        info!(
            host = %config.smtp_host,
            port = config.smtp_port,
            tls = config.smtp_use_tls,
            insecure = config.smtp_insecure,
            "Created SMTP client"
        );

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl MailSender for SmtpMailer {
    #[instrument(skip(self, email), fields(to = ?email.to, subject = %email.subject))]
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let message = build_message(&self.from, email)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Send(e.to_string()))?;

        debug!("Email sent");
        Ok(())
    }
}

fn parse_mailbox(name: Option<&str>, address: &str) -> Result<Mailbox, MailError> {
    let addr = address
        .trim()
        .parse()
        .map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
    let name = name.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string);
    Ok(Mailbox::new(name, addr))
}

/// Wrap a bare Message-ID in angle brackets.
#[must_use]
pub fn bracket_message_id(id: &str) -> String {
    let id = id.trim().trim_start_matches('<').trim_end_matches('>');
    format!("<{id}>")
}

pub(crate) fn build_message(from: &Mailbox, email: &OutgoingEmail) -> Result<Message, MailError> {
    if email.to.is_empty() {
        return Err(MailError::Build("no recipients".to_string()));
    }

    let mut builder = Message::builder()
        .from(from.clone())
        .subject(email.subject.clone())
        .header(ContentType::TEXT_PLAIN);

    for to in &email.to {
        builder = builder.to(parse_mailbox(None, to)?);
    }

    if let Some(reply_to) = email.in_reply_to.as_deref().filter(|id| !id.trim().is_empty()) {
        let id = bracket_message_id(reply_to);
        builder = builder.in_reply_to(id.clone()).references(id);
    }

    builder
        .body(email.body.clone())
        .map_err(|e| MailError::Build(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from() -> Mailbox {
        parse_mailbox(Some("JATS"), "jats@example.com").unwrap()
    }

    #[test]
    fn message_carries_threading_headers() {
        let email = OutgoingEmail {
            to: vec!["alice@example.com".to_string()],
            subject: "New Task: Fix login".to_string(),
            body: "Task: Fix login".to_string(),
            in_reply_to: Some("abc@mail.example.com".to_string()),
        };

        let raw = String::from_utf8(build_message(&from(), &email).unwrap().formatted()).unwrap();
        assert!(raw.contains("From: JATS <jats@example.com>"));
        assert!(raw.contains("To: alice@example.com"));
        assert!(raw.contains("Subject: New Task: Fix login"));
        assert!(raw.contains("In-Reply-To: <abc@mail.example.com>"));
        assert!(raw.contains("References: <abc@mail.example.com>"));
        assert!(raw.contains("Content-Type: text/plain; charset=utf-8"));
    }

    #[test]
    fn no_threading_headers_without_origin() {
        let email = OutgoingEmail {
            to: vec!["alice@example.com".to_string()],
            subject: "s".to_string(),
            body: "b".to_string(),
            in_reply_to: Some(String::new()),
        };

        let raw = String::from_utf8(build_message(&from(), &email).unwrap().formatted()).unwrap();
        assert!(!raw.contains("In-Reply-To"));
    }

    #[test]
    fn bad_recipient_is_rejected() {
        let email = OutgoingEmail {
            to: vec!["not an address".to_string()],
            ..OutgoingEmail::default()
        };
        assert!(matches!(
            build_message(&from(), &email),
            Err(MailError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn bracket_message_id_is_idempotent() {
        assert_eq!(bracket_message_id("a@b"), "<a@b>");
        assert_eq!(bracket_message_id("<a@b>"), "<a@b>");
    }
}
