// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outgoing mail abstraction and the in-process backends.

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// Errors from building or delivering a mail.
#[derive(Debug, Error)]
pub enum MailError {
    /// An address could not be parsed.
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress {
        /// Offending address.
        address: String,
        /// Parser message.
        reason: String,
    },

    /// The message could not be assembled.
    #[error("Failed to build message: {0}")]
    Build(String),

    /// The transport rejected the message.
    #[error("Failed to deliver message: {0}")]
    Transport(String),
}

/// A file attached to a mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name shown to the recipient.
    pub filename: String,
    /// MIME type, e.g. `image/png`.
    pub content_type: String,
    /// File content.
    pub bytes: Vec<u8>,
}

/// A mail ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    /// Sender address.
    pub from: String,
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// Attached files.
    pub attachments: Vec<Attachment>,
}

/// Delivers mails.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Backend name for logging.
    fn backend(&self) -> &'static str;

    /// Deliver one mail.
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError>;
}

/// Writes mails to the log instead of sending them.
#[derive(Debug, Default)]
pub struct ConsoleMailer;

#[async_trait]
impl Mailer for ConsoleMailer {
    fn backend(&self) -> &'static str {
        "console"
    }

    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        let attachments: Vec<&str> = mail.attachments.iter().map(|a| a.filename.as_str()).collect();
        info!(
            from = %mail.from,
            to = %mail.to.join(", "),
            subject = %mail.subject,
            attachments = ?attachments,
            body = %mail.body,
            "Outgoing mail"
        );
        Ok(())
    }
}

/// Keeps sent mails in memory.
#[derive(Debug, Default)]
pub struct MemoryMailer {
    outbox: Mutex<Vec<OutgoingMail>>,
    fail: bool,
}

impl MemoryMailer {
    /// Empty outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer whose every send fails with [`MailError::Transport`].
    pub fn failing() -> Self {
        Self {
            outbox: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Mails sent so far.
    pub fn outbox(&self) -> Vec<OutgoingMail> {
        self.outbox
            .lock()
            .map(|outbox| outbox.clone())
            .unwrap_or_default()
    }

    /// Mails sent so far with the given subject.
    pub fn with_subject(&self, subject: &str) -> Vec<OutgoingMail> {
        self.outbox()
            .into_iter()
            .filter(|m| m.subject == subject)
            .collect()
    }

    /// Drop all recorded mails.
    pub fn clear(&self) {
        if let Ok(mut outbox) = self.outbox.lock() {
            outbox.clear();
        }
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        if self.fail {
            return Err(MailError::Transport("memory mailer configured to fail".to_string()));
        }
        self.outbox
            .lock()
            .map_err(|e| MailError::Transport(e.to_string()))?
            .push(mail);
        Ok(())
    }
}
