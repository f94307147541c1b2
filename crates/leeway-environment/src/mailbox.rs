// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that turns unseen e-mails into requests.
//!
//! Every poll opens a fresh IMAP session over implicit TLS, fetches all
//! unseen messages from the configured mailbox (which marks them as seen)
//! and hands each one to [`Intake::submit_email`]. Connection errors are
//! logged and the next attempt happens at the next tick. One bad message
//! does not stop the others, and a message that was fetched is always
//! handed on, even if the session fails afterwards.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, Vars};
use crate::error::{Error, Result};
use crate::intake::{EmailIntakeOutcome, Intake};
use crate::notifier::MailConfig;

/// Source of raw inbound messages.
#[async_trait]
pub trait MailboxSource: Send + Sync {
    /// Fetch all unseen messages as raw RFC 822 bytes and mark them as seen.
    async fn fetch_unseen(&self) -> Result<Vec<Vec<u8>>>;
}

/// IMAP account settings.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    /// IMAP host.
    pub host: String,
    /// IMAP port (implicit TLS).
    pub port: u16,
    /// Login name.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Mailbox to read.
    pub mailbox: String,
}

impl ImapConfig {
    /// Derive IMAP settings from the mail account.
    ///
    /// Returns `None` when no password is configured. The host defaults to
    /// the SMTP host and the user to the SMTP user.
    ///
    /// - `LEEWAY_IMAP_HOST` (default: `LEEWAY_EMAIL_HOST`)
    /// - `LEEWAY_IMAP_PORT` (default: 993)
    /// - `LEEWAY_IMAP_USER` (default: SMTP user)
    /// - `LEEWAY_IMAP_MAILBOX` (default: `INBOX`)
    pub fn from_vars(vars: &Vars, mail: &MailConfig) -> std::result::Result<Option<Self>, ConfigError> {
        let Some(password) = mail.password.clone() else {
            return Ok(None);
        };
        let user = vars
            .get("IMAP_USER")
            .map(str::to_string)
            .or_else(|| mail.user.clone())
            .unwrap_or_else(|| mail.from_address().to_string());

        Ok(Some(Self {
            host: vars.string("IMAP_HOST", &mail.host),
            port: vars.parse("IMAP_PORT", 993)?,
            user,
            password,
            mailbox: vars.string("IMAP_MAILBOX", "INBOX"),
        }))
    }
}

/// Reads a mailbox over IMAPS.
pub struct ImapMailbox {
    config: ImapConfig,
}

impl ImapMailbox {
    /// Create a mailbox reader.
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

fn imap_error(stage: &str, e: impl std::fmt::Display) -> Error {
    Error::Mailbox(format!("{stage}: {e}"))
}

fn fetch_blocking(config: &ImapConfig) -> Result<Vec<Vec<u8>>> {
    let tls = native_tls::TlsConnector::builder()
        .build()
        .map_err(|e| imap_error("tls", e))?;
    let client = imap::connect((config.host.as_str(), config.port), config.host.as_str(), &tls)
        .map_err(|e| imap_error("connect", e))?;
    let mut session = client
        .login(&config.user, &config.password)
        .map_err(|(e, _)| imap_error("login", e))?;

    session
        .select(&config.mailbox)
        .map_err(|e| imap_error("select", e))?;
    let mut unseen: Vec<u32> = session
        .search("UNSEEN")
        .map_err(|e| imap_error("search", e))?
        .into_iter()
        .collect();
    unseen.sort_unstable();

    // Fetching marks a message as seen, so whatever was fetched is returned
    // even when later steps fail.
    let messages = collect_messages(unseen, |seq| {
        session
            .fetch(seq.to_string(), "RFC822")
            .map(|fetched| {
                fetched
                    .iter()
                    .filter_map(|m| m.body())
                    .map(<[u8]>::to_vec)
                    .collect()
            })
            .map_err(|e| e.to_string())
    });

    if let Err(e) = session.close() {
        warn!(error = %e, "Failed to close IMAP mailbox");
    }
    if let Err(e) = session.logout() {
        warn!(error = %e, "Failed to log out of IMAP session");
    }
    Ok(messages)
}

/// Fetch each sequence number in turn; a failing fetch is logged and skipped.
fn collect_messages<F>(unseen: Vec<u32>, mut fetch: F) -> Vec<Vec<u8>>
where
    F: FnMut(u32) -> std::result::Result<Vec<Vec<u8>>, String>,
{
    let mut messages = Vec::with_capacity(unseen.len());
    for seq in unseen {
        match fetch(seq) {
            Ok(fetched) => messages.extend(fetched),
            Err(e) => warn!(seq, error = %e, "Failed to fetch message, skipping"),
        }
    }
    messages
}

#[async_trait]
impl MailboxSource for ImapMailbox {
    async fn fetch_unseen(&self) -> Result<Vec<Vec<u8>>> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || fetch_blocking(&config))
            .await
            .map_err(|e| Error::Mailbox(format!("mailbox task failed: {e}")))?
    }
}

/// In-memory mailbox for tests and local runs.
#[derive(Default)]
pub struct MemoryMailbox {
    unseen: Mutex<Vec<Vec<u8>>>,
}

impl MemoryMailbox {
    /// Empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a message.
    pub fn push(&self, raw: impl Into<Vec<u8>>) {
        if let Ok(mut unseen) = self.unseen.lock() {
            unseen.push(raw.into());
        }
    }
}

#[async_trait]
impl MailboxSource for MemoryMailbox {
    async fn fetch_unseen(&self) -> Result<Vec<Vec<u8>>> {
        let mut unseen = self
            .unseen
            .lock()
            .map_err(|e| Error::Mailbox(e.to_string()))?;
        Ok(std::mem::take(&mut *unseen))
    }
}

/// Configuration for the mailbox poller.
#[derive(Debug, Clone)]
pub struct MailboxPollerConfig {
    /// Whether polling runs at all.
    pub enabled: bool,
    /// Time between polls.
    pub poll_interval: Duration,
}

impl Default for MailboxPollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(60),
        }
    }
}

impl MailboxPollerConfig {
    /// Load from `LEEWAY_MAILBOX_POLL_ENABLED` and `LEEWAY_MAILBOX_POLL_INTERVAL_SECS`.
    pub fn from_vars(vars: &Vars) -> std::result::Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            enabled: vars.bool("MAILBOX_POLL_ENABLED", defaults.enabled)?,
            poll_interval: vars.secs(
                "MAILBOX_POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )?,
        })
    }
}

/// Counts from one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Messages fetched.
    pub fetched: usize,
    /// Requests created.
    pub submitted: usize,
    /// Messages answered with a rejection.
    pub rejected: usize,
    /// Messages ignored.
    pub dropped: usize,
    /// Messages that hit an error.
    pub failed: usize,
}

/// Periodic mailbox reader.
pub struct MailboxPoller {
    source: Arc<dyn MailboxSource>,
    intake: Intake,
    config: MailboxPollerConfig,
    shutdown: Arc<Notify>,
}

impl MailboxPoller {
    /// Create a poller.
    pub fn new(source: Arc<dyn MailboxSource>, intake: Intake, config: MailboxPollerConfig) -> Self {
        Self {
            source,
            intake,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the polling loop until shutdown.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Mailbox poller started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Mailbox poller received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.poll_once().await {
                        error!(error = %e, "Failed to poll mailbox");
                    }
                }
            }
        }

        info!("Mailbox poller stopped");
    }

    /// Fetch and process unseen messages once.
    pub async fn poll_once(&self) -> Result<PollReport> {
        let messages = self.source.fetch_unseen().await?;
        let mut report = PollReport {
            fetched: messages.len(),
            ..Default::default()
        };
        if messages.is_empty() {
            debug!("No unseen messages");
            return Ok(report);
        }

        for raw in messages {
            match self.intake.submit_email(&raw).await {
                Ok(EmailIntakeOutcome::Submitted(uuid)) => {
                    debug!(uuid = %uuid, "E-mailed request submitted");
                    report.submitted += 1;
                }
                Ok(EmailIntakeOutcome::Rejected { .. }) => report.rejected += 1,
                Ok(EmailIntakeOutcome::Dropped { .. }) => report.dropped += 1,
                Err(e) => {
                    warn!(error = %e, "Failed to process e-mail");
                    report.failed += 1;
                }
            }
        }

        info!(
            fetched = report.fetched,
            submitted = report.submitted,
            rejected = report.rejected,
            dropped = report.dropped,
            failed = report.failed,
            "Mailbox poll complete"
        );
        Ok(report)
    }
}
