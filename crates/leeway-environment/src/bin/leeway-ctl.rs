// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Administrative command line for the leeway service.
//!
//! Works directly on the database and the configured runner and mailer, so
//! it can be used while the server is stopped.

use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use leeway_core::persistence::generate_api_token;
use leeway_core::{NewUser, SimulationStore, SqliteStore};
use leeway_environment::config::Config;
use leeway_environment::intake::Intake;
use leeway_environment::mailbox::{ImapMailbox, MailboxPoller};
use leeway_environment::notifier::Notifier;
use leeway_environment::queue::TaskQueue;
use leeway_environment::retention::RetentionSweeper;
use leeway_environment::runner::ContainerRunner;
use leeway_environment::tasks::SimulationTask;

#[derive(Parser)]
#[command(name = "leeway-ctl")]
#[command(about = "Leeway drift simulation service administration", long_about = None)]
struct Cli {
    /// Database URL (overrides LEEWAY_DATABASE_URL)
    #[arg(long, env = "LEEWAY_DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a user and print its API token
    CreateUser {
        /// Login name
        #[arg(long)]
        username: String,
        /// E-mail address results are sent to
        #[arg(long)]
        email: String,
        /// Use this token instead of generating one
        #[arg(long)]
        token: Option<String>,
    },
    /// List users
    ListUsers,
    /// List the most recent simulation requests
    List {
        /// Maximum number of requests
        #[arg(short, long, default_value_t = 20)]
        limit: i64,
    },
    /// Run a pending simulation in the foreground
    Run {
        /// Request identifier
        uuid: Uuid,
    },
    /// Delete expired requests and their artifacts once
    Sweep,
    /// Poll the mailbox once and run the submitted simulations
    CheckMailbox,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leeway_environment=info,leeway_core=warn".into()),
        )
        .init();

    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    let store = Arc::new(
        SqliteStore::from_url(&config.database_url)
            .await
            .with_context(|| format!("opening {}", config.database_url))?,
    );

    match cli.command {
        Commands::CreateUser {
            username,
            email,
            token,
        } => {
            let api_token = token.unwrap_or_else(generate_api_token);
            let user = store
                .create_user(NewUser {
                    username,
                    email,
                    api_token: api_token.clone(),
                })
                .await?;
            println!("Created user {} <{}> (id {})", user.username, user.email, user.id);
            println!("API token: {api_token}");
        }
        Commands::ListUsers => {
            for user in store.list_users().await? {
                println!(
                    "{:>4}  {:<20} {:<32} {}",
                    user.id,
                    user.username,
                    user.email,
                    if user.is_active { "active" } else { "inactive" }
                );
            }
        }
        Commands::List { limit } => {
            for sim in store.list_simulations(limit).await? {
                println!(
                    "{}  {:<8}  {:>9.5} {:>10.5}  {}  {}",
                    sim.uuid,
                    sim.status().as_str(),
                    sim.latitude,
                    sim.longitude,
                    sim.created_at.format("%Y-%m-%d %H:%M"),
                    sim.error().unwrap_or_default()
                );
            }
        }
        Commands::Run { uuid } => {
            let task = simulation_task(&config, store.clone())?;
            let outcome = task.run_simulation(uuid).await?;
            println!(
                "{} {} (image: {}, mailed: {})",
                outcome.uuid,
                outcome.status,
                outcome.image.as_deref().unwrap_or("none"),
                outcome.notified
            );
        }
        Commands::Sweep => {
            let sweeper = RetentionSweeper::new(
                store.clone(),
                config.simulation.output_dir(),
                config.retention.clone(),
            );
            let report = sweeper.sweep().await?;
            println!(
                "expired {}, deleted {}, files removed {}, errors {}",
                report.expired,
                report.deleted,
                report.files_removed,
                report.file_errors + report.record_errors
            );
        }
        Commands::CheckMailbox => {
            let Some(imap) = config.imap.clone() else {
                bail!("no mailbox configured (LEEWAY_EMAIL_HOST_PASSWORD is not set)");
            };
            let task = simulation_task(&config, store.clone())?;
            let (queue, dispatcher) = TaskQueue::new(config.queue.clone(), Arc::new(task));
            let running = tokio::spawn(dispatcher.run());

            let intake = Intake::new(store.clone(), Arc::new(queue), notifier(&config)?);
            let poller = MailboxPoller::new(
                Arc::new(ImapMailbox::new(imap)),
                intake,
                config.mailbox.clone(),
            );
            let report = poller.poll_once().await?;
            println!(
                "fetched {}, submitted {}, rejected {}, dropped {}, failed {}",
                report.fetched, report.submitted, report.rejected, report.dropped, report.failed
            );

            // Dropping the intake closes the queue; wait for the runs.
            drop(poller);
            running.await?;
        }
    }

    Ok(())
}

fn notifier(config: &Config) -> anyhow::Result<Notifier> {
    Ok(Notifier::new(
        config.mail.build_mailer()?,
        config.mail.from_address(),
        config.simulation.output_dir(),
    ))
}

fn simulation_task(config: &Config, store: Arc<SqliteStore>) -> anyhow::Result<SimulationTask> {
    std::fs::create_dir_all(config.simulation.output_dir())?;
    Ok(SimulationTask::new(
        store,
        Arc::new(ContainerRunner::new(config.simulation.container_config())),
        notifier(config)?,
        config.simulation.clone(),
    ))
}
