// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for leeway-environment.
//!
//! [`LeewayRuntime`] wires the store, runner and mailer into the task queue,
//! the background workers and the HTTP server, so the service can run inside
//! an existing tokio application as well as from the bundled binary.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use leeway_core::SqliteStore;
//! use leeway_environment::notifier::ConsoleMailer;
//! use leeway_environment::runner::{ContainerRunner, ContainerRunnerConfig};
//! use leeway_environment::runtime::LeewayRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteStore::from_url("sqlite:leeway.db?mode=rwc").await?);
//!     let runner = Arc::new(ContainerRunner::new(ContainerRunnerConfig::default()));
//!
//!     let runtime = LeewayRuntime::builder()
//!         .store(store)
//!         .runner(runner)
//!         .mailer(Arc::new(ConsoleMailer))
//!         .bind_addr("127.0.0.1:8000".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use leeway_core::SimulationStore;
use tokio::net::TcpListener;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::intake::Intake;
use crate::mailbox::{MailboxPoller, MailboxPollerConfig, MailboxSource};
use crate::notifier::{Mailer, Notifier};
use crate::queue::{TaskQueue, TaskQueueConfig};
use crate::retention::{RetentionSweeper, RetentionSweeperConfig};
use crate::runner::Runner;
use crate::server::{self, AppState, ServerConfig};
use crate::tasks::{SimulationConfig, SimulationTask};

/// Builder for creating a [`LeewayRuntime`].
pub struct LeewayRuntimeBuilder {
    store: Option<Arc<dyn SimulationStore>>,
    runner: Option<Arc<dyn Runner>>,
    mailer: Option<Arc<dyn Mailer>>,
    mailbox: Option<Arc<dyn MailboxSource>>,
    bind_addr: SocketAddr,
    from_address: String,
    simulation: SimulationConfig,
    queue: TaskQueueConfig,
    retention: RetentionSweeperConfig,
    mailbox_poller: MailboxPollerConfig,
    server: Option<ServerConfig>,
}

impl Default for LeewayRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            runner: None,
            mailer: None,
            mailbox: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            from_address: "webmaster@localhost".to_string(),
            simulation: SimulationConfig::default(),
            queue: TaskQueueConfig::default(),
            retention: RetentionSweeperConfig::default(),
            mailbox_poller: MailboxPollerConfig::default(),
            server: None,
        }
    }
}

impl LeewayRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every setting from a loaded [`Config`].
    ///
    /// Store, runner, mailer and mailbox still have to be provided.
    pub fn config(mut self, config: &Config) -> Self {
        self.bind_addr = config.http_addr;
        self.from_address = config.mail.from_address().to_string();
        self.simulation = config.simulation.clone();
        self.queue = config.queue.clone();
        self.retention = config.retention.clone();
        self.mailbox_poller = config.mailbox.clone();
        self.server = Some(config.server.clone());
        self
    }

    /// Set the record store (required).
    pub fn store(mut self, store: Arc<dyn SimulationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the simulation runner (required).
    pub fn runner(mut self, runner: Arc<dyn Runner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Set the mail backend (required).
    pub fn mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    /// Set the inbound mailbox. Without one, no mailbox poller runs.
    pub fn mailbox(mut self, mailbox: Arc<dyn MailboxSource>) -> Self {
        self.mailbox = Some(mailbox);
        self
    }

    /// Set the HTTP bind address. Port 0 picks a free port.
    ///
    /// Default: `0.0.0.0:8000`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the sender address of outgoing mail.
    ///
    /// Default: `webmaster@localhost`
    pub fn from_address(mut self, address: impl Into<String>) -> Self {
        self.from_address = address.into();
        self
    }

    /// Set the simulation settings.
    pub fn simulation_config(mut self, config: SimulationConfig) -> Self {
        self.simulation = config;
        self
    }

    /// Set the task queue settings.
    pub fn queue_config(mut self, config: TaskQueueConfig) -> Self {
        self.queue = config;
        self
    }

    /// Set the retention sweeper settings.
    pub fn retention_config(mut self, config: RetentionSweeperConfig) -> Self {
        self.retention = config;
        self
    }

    /// Set the mailbox poller settings.
    pub fn mailbox_config(mut self, config: MailboxPollerConfig) -> Self {
        self.mailbox_poller = config;
        self
    }

    /// Set the HTTP settings.
    ///
    /// Default: default allowed hosts, artifacts served from the simulation output directory.
    pub fn server_config(mut self, config: ServerConfig) -> Self {
        self.server = Some(config);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<LeewayRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let runner = self
            .runner
            .ok_or_else(|| anyhow::anyhow!("runner is required"))?;
        let mailer = self
            .mailer
            .ok_or_else(|| anyhow::anyhow!("mailer is required"))?;

        let server = match self.server {
            Some(server) => server,
            None => ServerConfig::from_vars(&Default::default(), self.simulation.output_dir())?,
        };

        Ok(LeewayRuntimeConfig {
            store,
            runner,
            mailer,
            mailbox: self.mailbox,
            bind_addr: self.bind_addr,
            from_address: self.from_address,
            simulation: self.simulation,
            queue: self.queue,
            retention: self.retention,
            mailbox_poller: self.mailbox_poller,
            server,
        })
    }
}

/// Configuration for a [`LeewayRuntime`].
pub struct LeewayRuntimeConfig {
    store: Arc<dyn SimulationStore>,
    runner: Arc<dyn Runner>,
    mailer: Arc<dyn Mailer>,
    mailbox: Option<Arc<dyn MailboxSource>>,
    bind_addr: SocketAddr,
    from_address: String,
    simulation: SimulationConfig,
    queue: TaskQueueConfig,
    retention: RetentionSweeperConfig,
    mailbox_poller: MailboxPollerConfig,
    server: ServerConfig,
}

impl LeewayRuntimeConfig {
    /// Start the runtime: task dispatcher, background workers and HTTP server.
    pub async fn start(self) -> Result<LeewayRuntime> {
        let output_dir = self.simulation.output_dir();
        tokio::fs::create_dir_all(&output_dir).await?;

        let notifier = Notifier::new(self.mailer.clone(), self.from_address.clone(), &output_dir);

        // Task queue and dispatcher
        let task = SimulationTask::new(
            self.store.clone(),
            self.runner.clone(),
            notifier.clone(),
            self.simulation.clone(),
        );
        let (queue, dispatcher) = TaskQueue::new(self.queue.clone(), Arc::new(task));
        let dispatcher_shutdown = dispatcher.shutdown_handle();
        let dispatcher_handle = tokio::spawn(dispatcher.run());

        let intake = Intake::new(self.store.clone(), Arc::new(queue.clone()), notifier);

        // Mailbox poller
        let mailbox = match self.mailbox {
            Some(source) if self.mailbox_poller.enabled => {
                let poller = MailboxPoller::new(source, intake.clone(), self.mailbox_poller.clone());
                let shutdown = poller.shutdown_handle();
                let handle = tokio::spawn(async move {
                    poller.run().await;
                });
                Some((handle, shutdown))
            }
            _ => {
                debug!("No mailbox configured; e-mail intake disabled");
                None
            }
        };

        // Retention sweeper
        let sweeper = RetentionSweeper::new(self.store.clone(), &output_dir, self.retention.clone());
        let sweeper_shutdown = sweeper.shutdown_handle();
        let sweeper_handle = tokio::spawn(async move {
            sweeper.run().await;
        });

        // HTTP server
        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let state = AppState::new(self.store.clone(), intake.clone(), self.server);
        let (server_shutdown_tx, mut server_shutdown_rx) = watch::channel(false);
        let server_handle = tokio::spawn(server::serve(listener, state, async move {
            let _ = server_shutdown_rx.changed().await;
        }));

        info!(
            bind_addr = %local_addr,
            runner = self.runner.runner_type(),
            mailer = self.mailer.backend(),
            mailbox = mailbox.is_some(),
            "LeewayRuntime started"
        );

        Ok(LeewayRuntime {
            server_handle,
            dispatcher_handle,
            sweeper_handle,
            mailbox,
            server_shutdown_tx,
            dispatcher_shutdown,
            sweeper_shutdown,
            queue,
            intake,
            local_addr,
        })
    }
}

/// A running leeway service.
///
/// The runtime manages:
/// - HTTP server (REST API, web form, artifact files)
/// - Task dispatcher executing queued simulations
/// - Retention sweeper purging expired requests
/// - Mailbox poller (optional, when a mailbox is configured)
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct LeewayRuntime {
    server_handle: JoinHandle<std::io::Result<()>>,
    dispatcher_handle: JoinHandle<()>,
    sweeper_handle: JoinHandle<()>,
    mailbox: Option<(JoinHandle<()>, Arc<Notify>)>,
    server_shutdown_tx: watch::Sender<bool>,
    dispatcher_shutdown: Arc<Notify>,
    sweeper_shutdown: Arc<Notify>,
    queue: TaskQueue,
    intake: Intake,
    local_addr: SocketAddr,
}

impl LeewayRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> LeewayRuntimeBuilder {
        LeewayRuntimeBuilder::new()
    }

    /// Address the HTTP server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The task queue.
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// The request intake.
    pub fn intake(&self) -> &Intake {
        &self.intake
    }

    /// Gracefully shut down the runtime.
    ///
    /// Signals the HTTP server, the dispatcher (running simulations are
    /// aborted), the retention sweeper and the mailbox poller, then waits
    /// for them to complete.
    pub async fn shutdown(self) -> Result<()> {
        info!("LeewayRuntime shutting down...");

        let _ = self.server_shutdown_tx.send(true);
        self.dispatcher_shutdown.notify_one();
        self.sweeper_shutdown.notify_one();
        if let Some((_, shutdown)) = &self.mailbox {
            shutdown.notify_one();
        }

        if let Err(e) = self.dispatcher_handle.await {
            error!(error = %e, "Task dispatcher panicked");
        }
        if let Err(e) = self.sweeper_handle.await {
            error!(error = %e, "Retention sweeper panicked");
        }
        if let Some((handle, _)) = self.mailbox
            && let Err(e) = handle.await
        {
            error!(error = %e, "Mailbox poller panicked");
        }

        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("LeewayRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "HTTP server error during shutdown");
                Err(e.into())
            }
            Err(e) => {
                error!(error = %e, "HTTP server task panicked");
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        let mailbox_running = self
            .mailbox
            .as_ref()
            .is_none_or(|(handle, _)| !handle.is_finished());

        !self.server_handle.is_finished()
            && !self.dispatcher_handle.is_finished()
            && !self.sweeper_handle.is_finished()
            && mailbox_running
    }
}
