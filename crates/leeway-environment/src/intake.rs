// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request intake shared by the web form, the REST API and inbound e-mail.

use std::sync::Arc;

use chrono::Utc;
use leeway_core::params::merge_mail_arguments;
use leeway_core::{SimulationForm, SimulationParams, SimulationRequest, SimulationStore, User, ValidationErrors};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::email::parse_email;
use crate::error::{Error, Result};
use crate::notifier::Notifier;
use crate::queue::{JobQueue, SimulationJob};

/// What happened to an inbound e-mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailIntakeOutcome {
    /// A request was created and queued.
    Submitted(Uuid),
    /// The sender is known but the parameters were invalid; a rejection mail was sent.
    Rejected {
        /// Sender address.
        sender: String,
        /// Field errors.
        errors: ValidationErrors,
    },
    /// Ignored without a record or a reply.
    Dropped {
        /// Why the message was ignored.
        reason: String,
    },
}

/// Validates, stores and queues new requests.
#[derive(Clone)]
pub struct Intake {
    store: Arc<dyn SimulationStore>,
    queue: Arc<dyn JobQueue>,
    notifier: Notifier,
}

impl Intake {
    /// Create an intake.
    pub fn new(store: Arc<dyn SimulationStore>, queue: Arc<dyn JobQueue>, notifier: Notifier) -> Self {
        Self {
            store,
            queue,
            notifier,
        }
    }

    /// Validate and store a request for `user`, queue it and confirm by mail.
    ///
    /// Invalid parameters return [`Error::Validation`] and nothing is stored.
    /// When the job cannot be queued the stored record is removed again.
    /// A failed confirmation mail is logged; the request stands.
    pub async fn submit(&self, user: &User, form: &SimulationForm) -> Result<SimulationRequest> {
        let params = SimulationParams::from_form(form, Utc::now())?;
        let sim = self
            .store
            .insert_simulation(params.into_new_simulation(user.id))
            .await?;
        info!(
            uuid = %sim.uuid,
            user = %user.username,
            longitude = sim.longitude,
            latitude = sim.latitude,
            "Simulation request saved"
        );

        if let Err(e) = self.queue.submit(SimulationJob::new(sim.uuid)) {
            error!(uuid = %sim.uuid, error = %e, "Failed to enqueue simulation");
            // Nothing will ever run it.
            if let Err(delete_err) = self.store.delete_simulation(sim.uuid).await {
                error!(uuid = %sim.uuid, error = %delete_err, "Failed to remove unqueued simulation");
            }
            return Err(e.into());
        }

        if let Err(e) = self.notifier.send_confirmation(&user.email, sim.uuid).await {
            warn!(uuid = %sim.uuid, error = %e, "Failed to send confirmation mail");
        }
        Ok(sim)
    }

    /// Turn a raw RFC 822 message into a request.
    ///
    /// Messages from unknown or inactive senders are dropped silently.
    pub async fn submit_email(&self, raw: &[u8]) -> Result<EmailIntakeOutcome> {
        let email = match parse_email(raw) {
            Ok(email) => email,
            Err(e) => {
                warn!(error = %e, "Dropping unreadable e-mail");
                return Ok(EmailIntakeOutcome::Dropped {
                    reason: e.to_string(),
                });
            }
        };

        let user = match self.store.find_user_by_email(&email.from).await? {
            Some(user) if user.is_active => user,
            _ => {
                debug!(sender = %email.from, "Dropping e-mail from unknown sender");
                return Ok(EmailIntakeOutcome::Dropped {
                    reason: format!("unknown sender {}", email.from),
                });
            }
        };

        let form = merge_mail_arguments(&email.subject, &email.body);
        match self.submit(&user, &form).await {
            Ok(sim) => Ok(EmailIntakeOutcome::Submitted(sim.uuid)),
            Err(Error::Validation(errors)) => {
                info!(sender = %user.email, errors = %errors, "Rejecting e-mailed request");
                if let Err(e) = self.notifier.send_rejection(&user.email, &errors).await {
                    warn!(sender = %user.email, error = %e, "Failed to send rejection mail");
                }
                Ok(EmailIntakeOutcome::Rejected {
                    sender: user.email,
                    errors,
                })
            }
            Err(e) => Err(e),
        }
    }
}
