// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Leeway Environment - drift simulation web service
//!
//! An HTTP server responsible for:
//! - Simulation intake (web form, REST API, e-mail)
//! - Running the OpenDrift leeway model in a container
//! - Mailing results back to the requester
//! - Purging expired requests and their artifacts

use std::sync::Arc;
use tracing::{info, warn};

use leeway_core::SqliteStore;
use leeway_environment::config::Config;
use leeway_environment::mailbox::{ImapMailbox, MailboxSource};
use leeway_environment::runner::{ContainerRunner, Runner};
use leeway_environment::runtime::LeewayRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leeway_environment=info,leeway_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        simulation_root = %config.simulation.root.display(),
        debug = config.debug,
        "Starting Leeway Environment"
    );

    // Connect to database and apply migrations
    let store = Arc::new(SqliteStore::from_url(&config.database_url).await?);
    info!("Database ready");

    let runner = Arc::new(ContainerRunner::new(config.simulation.container_config()));
    info!(runner_type = runner.runner_type(), "Runner initialized");

    let mailer = config.mail.build_mailer()?;
    info!(backend = mailer.backend(), "Mailer initialized");

    let mut builder = LeewayRuntime::builder()
        .config(&config)
        .store(store)
        .runner(runner)
        .mailer(mailer);

    if let Some(imap) = &config.imap {
        info!(host = %imap.host, user = %imap.user, "Mailbox intake enabled");
        let mailbox: Arc<dyn MailboxSource> = Arc::new(ImapMailbox::new(imap.clone()));
        builder = builder.mailbox(mailbox);
    }

    // Start the runtime
    let runtime = builder.build()?.start().await?;

    info!(addr = %runtime.local_addr(), "Leeway server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Graceful shutdown
    runtime.shutdown().await?;

    info!("Leeway Environment shut down");

    Ok(())
}
