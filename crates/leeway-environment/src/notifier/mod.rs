// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! User notifications.
//!
//! Three mails are sent by the service:
//!
//! | Mail | Subject | When |
//! |------|---------|------|
//! | Confirmation | `Leeway Drift Simulation Order received` | a request was accepted |
//! | Result | `Leeway Drift Simulation Result` | a run finished, successful or not |
//! | Rejection | `Leeway Drift Simulation Request rejected` | an e-mailed request had invalid parameters |
//!
//! The [`Notifier`] only renders texts and picks attachments; delivery goes
//! through a [`Mailer`] backend.

pub mod mailer;
pub mod smtp;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use leeway_core::params::SIMULATION_ARGUMENTS;
use leeway_core::{SimulationRequest, ValidationErrors};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ConfigError, Vars};

pub use mailer::{Attachment, ConsoleMailer, MailError, Mailer, MemoryMailer, OutgoingMail};
pub use smtp::SmtpMailer;

/// Subject of the confirmation mail.
pub const CONFIRMATION_SUBJECT: &str = "Leeway Drift Simulation Order received";
/// Subject of the result mail.
pub const RESULT_SUBJECT: &str = "Leeway Drift Simulation Result";
/// Subject of the rejection mail.
pub const REJECTION_SUBJECT: &str = "Leeway Drift Simulation Request rejected";

const DEFAULT_FROM: &str = "webmaster@localhost";

/// Which mail backend to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailBackend {
    /// Deliver through SMTP.
    Smtp,
    /// Log mails instead of sending them.
    Console,
}

impl FromStr for MailBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Dotted paths such as `mail.backends.smtp.EmailBackend` name the backend in one segment.
        let name = s.trim().to_ascii_lowercase();
        let backend = name
            .split('.')
            .rev()
            .find(|part| matches!(*part, "smtp" | "console"))
            .unwrap_or(name.as_str());
        match backend {
            "smtp" => Ok(Self::Smtp),
            "console" => Ok(Self::Console),
            other => Err(format!("unknown mail backend '{other}'")),
        }
    }
}

/// Outbound mail settings.
#[derive(Debug, Clone)]
pub struct MailConfig {
    /// Backend used for delivery.
    pub backend: MailBackend,
    /// Sender address; also the default SMTP and IMAP user.
    pub server_email: Option<String>,
    /// SMTP host.
    pub host: String,
    /// SMTP port.
    pub port: u16,
    /// SMTP user.
    pub user: Option<String>,
    /// SMTP password.
    pub password: Option<String>,
    /// Use STARTTLS.
    pub use_tls: bool,
    /// Use implicit TLS.
    pub use_ssl: bool,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            backend: MailBackend::Smtp,
            server_email: None,
            host: "localhost".to_string(),
            port: 587,
            user: None,
            password: None,
            use_tls: true,
            use_ssl: false,
        }
    }
}

impl MailConfig {
    /// Load from `LEEWAY_EMAIL_*` and `LEEWAY_SERVER_EMAIL`.
    ///
    /// The backend defaults to console in debug mode.
    pub fn from_vars(vars: &Vars, debug: bool) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let default_backend = if debug {
            MailBackend::Console
        } else {
            MailBackend::Smtp
        };

        let server_email = vars.get("SERVER_EMAIL").map(str::to_string);
        let password = vars.get("EMAIL_HOST_PASSWORD").map(str::to_string);
        if password.is_some() && server_email.is_none() {
            return Err(ConfigError::PasswordWithoutSender);
        }

        Ok(Self {
            backend: vars.parse("EMAIL_BACKEND", default_backend)?,
            user: vars
                .get("EMAIL_HOST_USER")
                .map(str::to_string)
                .or_else(|| server_email.clone()),
            host: vars.string("EMAIL_HOST", &defaults.host),
            port: vars.parse("EMAIL_PORT", defaults.port)?,
            use_tls: vars.bool("EMAIL_USE_TLS", defaults.use_tls)?,
            use_ssl: vars.bool("EMAIL_USE_SSL", defaults.use_ssl)?,
            server_email,
            password,
        })
    }

    /// Sender address for outgoing mail.
    pub fn from_address(&self) -> &str {
        self.server_email.as_deref().unwrap_or(DEFAULT_FROM)
    }

    /// Build the configured backend.
    pub fn build_mailer(&self) -> Result<Arc<dyn Mailer>, MailError> {
        Ok(match self.backend {
            MailBackend::Smtp => Arc::new(SmtpMailer::new(self)?),
            MailBackend::Console => Arc::new(ConsoleMailer),
        })
    }
}

/// Renders and sends the service's mails.
#[derive(Clone)]
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    from: String,
    output_dir: PathBuf,
}

impl Notifier {
    /// `output_dir` is where stored image references are resolved.
    pub fn new(mailer: Arc<dyn Mailer>, from: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            mailer,
            from: from.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Confirm that a request was saved.
    pub async fn send_confirmation(&self, email: &str, uuid: Uuid) -> Result<(), MailError> {
        self.deliver(email, CONFIRMATION_SUBJECT, confirmation_text(email, uuid), vec![])
            .await
    }

    /// Report the outcome of a run, attaching the image when there is one.
    ///
    /// An image that cannot be read is left out and the body says so; the
    /// mail is sent either way.
    pub async fn send_result(&self, email: &str, sim: &SimulationRequest) -> Result<(), MailError> {
        let Some(img) = sim.img.as_deref() else {
            return self
                .deliver(email, RESULT_SUBJECT, result_text(sim), vec![])
                .await;
        };

        let path = self.output_dir.join(img);
        let (body, attachments) = match tokio::fs::read(&path).await {
            Ok(bytes) => (
                result_text(sim),
                vec![Attachment {
                    filename: img.to_string(),
                    content_type: "image/png".to_string(),
                    bytes,
                }],
            ),
            Err(e) => {
                warn!(uuid = %sim.uuid, file = %path.display(), error = %e, "Result image could not be read, sending without it");
                (unattached_result_text(sim), vec![])
            }
        };
        self.deliver(email, RESULT_SUBJECT, body, attachments).await
    }

    /// Tell the sender of an e-mailed request what was wrong with it.
    pub async fn send_rejection(&self, email: &str, errors: &ValidationErrors) -> Result<(), MailError> {
        self.deliver(email, REJECTION_SUBJECT, rejection_text(errors), vec![])
            .await
    }

    async fn deliver(
        &self,
        to: &str,
        subject: &str,
        body: String,
        attachments: Vec<Attachment>,
    ) -> Result<(), MailError> {
        self.mailer
            .send(OutgoingMail {
                from: self.from.clone(),
                to: vec![to.to_string()],
                subject: subject.to_string(),
                body,
                attachments,
            })
            .await?;
        info!(to = %to, subject = %subject, backend = self.mailer.backend(), "Mail sent");
        Ok(())
    }
}

/// Body of the confirmation mail.
pub fn confirmation_text(email: &str, uuid: Uuid) -> String {
    format!(
        "Request saved. You will receive an e-mail to {email} when the simulation is finished. \
         Your request ID is {uuid}."
    )
}

/// Body of the result mail.
pub fn result_text(sim: &SimulationRequest) -> String {
    if sim.img.is_some() {
        render_result(sim, "Find the image attached.", false)
    } else {
        let outcome = format!("The simulation failed:\n\n{}", sim.error().unwrap_or_default());
        render_result(sim, &outcome, sim.traceback.lines().count() > 1)
    }
}

/// Body of the result mail when the stored image could not be read.
pub fn unattached_result_text(sim: &SimulationRequest) -> String {
    let outcome = match sim.error() {
        Some(error) => format!("The image could not be attached. The simulation reported:\n\n{error}"),
        None => "The image could not be attached.".to_string(),
    };
    render_result(sim, &outcome, sim.traceback.lines().count() > 1)
}

fn render_result(sim: &SimulationRequest, outcome: &str, full_trace: bool) -> String {
    let mut text = format!(
        "Your request with ID {uuid} has been processed. {outcome}\n\n\
         Simulation parameters:\n\
         - Longitude: {longitude}\n\
         - Latitude: {latitude}\n\
         - Radius: {radius}\n\
         - Start time: {start_time}\n\
         - Duration: {duration}\n\
         - Object type: {object_type}\n",
        uuid = sim.uuid,
        longitude = sim.longitude,
        latitude = sim.latitude,
        radius = sim.radius,
        start_time = sim.start_time.format("%Y-%m-%d %H:%M:%S%:z"),
        duration = sim.duration,
        object_type = sim.object_type,
    );

    if full_trace {
        text.push_str("\nFull trace:\n\n");
        text.push_str(&sim.traceback);
        text.push('\n');
    }
    text
}

/// Body of the rejection mail.
pub fn rejection_text(errors: &ValidationErrors) -> String {
    let mut text = String::from(
        "Your simulation request could not be started. \
         Please correct the following parameters and send it again.\n\n",
    );
    for (field, messages) in errors.iter() {
        for message in messages {
            text.push_str(&format!("- {field}: {message}\n"));
        }
    }
    text.push_str(&format!(
        "\nRecognized parameters: {}\n",
        SIMULATION_ARGUMENTS.join(", ")
    ));
    text
}
