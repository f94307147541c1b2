// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SMTP delivery via lettre.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MimeAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use super::MailConfig;
use super::mailer::{MailError, Mailer, OutgoingMail};

/// Sends mail through an SMTP relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl SmtpMailer {
    /// Build the transport from mail settings.
    ///
    /// `use_ssl` selects implicit TLS, `use_tls` STARTTLS; with neither the
    /// connection is plain. Credentials are sent only when both user and
    /// password are configured.
    pub fn new(config: &MailConfig) -> Result<Self, MailError> {
        let builder = if config.use_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| MailError::Transport(e.to_string()))?
        } else if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| MailError::Transport(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let builder = builder.port(config.port);
        let builder = match (&config.user, &config.password) {
            (Some(user), Some(password)) => {
                builder.credentials(Credentials::new(user.clone(), password.clone()))
            }
            _ => builder,
        };

        Ok(Self {
            transport: builder.build(),
            host: config.host.clone(),
        })
    }
}

fn mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse().map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

/// Convert to a MIME message: plain text, or multipart/mixed when files are attached.
pub(crate) fn build_message(mail: OutgoingMail) -> Result<Message, MailError> {
    let mut builder = Message::builder()
        .from(mailbox(&mail.from)?)
        .subject(mail.subject);
    for to in &mail.to {
        builder = builder.to(mailbox(to)?);
    }

    if mail.attachments.is_empty() {
        return builder
            .header(ContentType::TEXT_PLAIN)
            .body(mail.body)
            .map_err(|e| MailError::Build(e.to_string()));
    }

    let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(mail.body));
    for attachment in mail.attachments {
        let content_type = ContentType::parse(&attachment.content_type)
            .map_err(|e| MailError::Build(format!("{}: {e}", attachment.content_type)))?;
        parts = parts.singlepart(
            MimeAttachment::new(attachment.filename).body(attachment.bytes, content_type),
        );
    }
    builder
        .multipart(parts)
        .map_err(|e| MailError::Build(e.to_string()))
}

#[async_trait]
impl Mailer for SmtpMailer {
    fn backend(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        let subject = mail.subject.clone();
        let message = build_message(mail)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        debug!(host = %self.host, subject = %subject, "Mail delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::mailer::Attachment;

    fn mail(attachments: Vec<Attachment>) -> OutgoingMail {
        OutgoingMail {
            from: "leeway@example.org".to_string(),
            to: vec!["user@example.org".to_string()],
            subject: "Leeway Drift Simulation Result".to_string(),
            body: "Find the image attached.".to_string(),
            attachments,
        }
    }

    #[test]
    fn test_plain_message() {
        let message = build_message(mail(vec![])).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Leeway Drift Simulation Result"));
        assert!(raw.contains("To: user@example.org"));
        assert!(raw.contains("Find the image attached."));
        assert!(!raw.contains("multipart/mixed"));
    }

    #[test]
    fn test_message_with_attachment() {
        let message = build_message(mail(vec![Attachment {
            filename: "abc.png".to_string(),
            content_type: "image/png".to_string(),
            bytes: b"\x89PNG\r\n\x1a\n".to_vec(),
        }]))
        .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("image/png"));
        assert!(raw.contains("abc.png"));
    }

    #[test]
    fn test_invalid_recipient() {
        let mut bad = mail(vec![]);
        bad.to = vec!["not an address".to_string()];
        assert!(matches!(
            build_message(bad),
            Err(MailError::InvalidAddress { .. })
        ));
    }

    #[tokio::test]
    async fn test_transport_builds_for_every_mode() {
        for (use_tls, use_ssl) in [(true, false), (false, true), (false, false)] {
            let config = MailConfig {
                use_tls,
                use_ssl,
                user: Some("leeway".to_string()),
                password: Some("secret".to_string()),
                ..MailConfig::default()
            };
            let mailer = SmtpMailer::new(&config).unwrap();
            assert_eq!(mailer.backend(), "smtp");
        }
    }
}
