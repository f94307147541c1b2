// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for leeway-environment integration tests.
//!
//! Provides TestContext wiring an in-memory store, a mock runner, a memory
//! mailer, a live task queue and the HTTP router.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use uuid::Uuid;

use leeway_core::{NewUser, SimulationRequest, SimulationStore, SqliteStore, User};
use leeway_environment::config::Vars;
use leeway_environment::intake::Intake;
use leeway_environment::notifier::{MemoryMailer, Notifier, OutgoingMail};
use leeway_environment::queue::{TaskQueue, TaskQueueConfig};
use leeway_environment::runner::MockRunner;
use leeway_environment::server::{self, AppState, ServerConfig};
use leeway_environment::tasks::{SimulationConfig, SimulationTask};

pub const TOKEN: &str = "skipper-token";
pub const EMAIL: &str = "skipper@example.org";
pub const FROM: &str = "leeway@example.org";

/// Everything a request needs, from intake to the result mail.
pub struct TestContext {
    pub store: Arc<SqliteStore>,
    pub user: User,
    pub mailer: Arc<MemoryMailer>,
    pub runner: Arc<MockRunner>,
    pub queue: TaskQueue,
    pub intake: Intake,
    pub router: Router,
    pub simulation: SimulationConfig,
    pub output_dir: PathBuf,
    dispatcher: JoinHandle<()>,
    dispatcher_shutdown: Arc<Notify>,
    _temp_dir: tempfile::TempDir,
}

impl TestContext {
    /// Context whose runs succeed and write both artifacts.
    pub async fn new() -> Self {
        Self::with_runner(|dir| MockRunner::new(dir)).await
    }

    /// Context with a custom mock runner, built for the output directory.
    pub async fn with_runner(make_runner: impl FnOnce(PathBuf) -> MockRunner) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let simulation = SimulationConfig {
            root: temp_dir.path().to_path_buf(),
            run_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let output_dir = simulation.output_dir();
        std::fs::create_dir_all(&output_dir).expect("Failed to create output dir");

        let store = Arc::new(
            SqliteStore::in_memory()
                .await
                .expect("Failed to create in-memory store"),
        );
        let user = store
            .create_user(NewUser {
                username: "skipper".to_string(),
                email: EMAIL.to_string(),
                api_token: TOKEN.to_string(),
            })
            .await
            .expect("Failed to create user");

        let mailer = Arc::new(MemoryMailer::new());
        let runner = Arc::new(make_runner(output_dir.clone()));
        let notifier = Notifier::new(mailer.clone(), FROM, &output_dir);

        let task = SimulationTask::new(
            store.clone(),
            runner.clone(),
            notifier.clone(),
            simulation.clone(),
        );
        let (queue, dispatcher) = TaskQueue::new(
            TaskQueueConfig {
                concurrency: 2,
                time_limit: Duration::from_secs(10),
            },
            Arc::new(task),
        );
        let dispatcher_shutdown = dispatcher.shutdown_handle();
        let dispatcher = tokio::spawn(dispatcher.run());

        let intake = Intake::new(store.clone(), Arc::new(queue.clone()), notifier);
        let server_config = ServerConfig::from_vars(&Vars::default(), output_dir.clone())
            .expect("Failed to build server config");
        let router = server::router(AppState::new(store.clone(), intake.clone(), server_config));

        Self {
            store,
            user,
            mailer,
            runner,
            queue,
            intake,
            router,
            simulation,
            output_dir,
            dispatcher,
            dispatcher_shutdown,
            _temp_dir: temp_dir,
        }
    }

    /// Register another active user.
    pub async fn other_user(&self, name: &str) -> User {
        self.store
            .create_user(NewUser {
                username: name.to_string(),
                email: format!("{name}@example.org"),
                api_token: format!("{name}-token"),
            })
            .await
            .expect("Failed to create user")
    }

    /// Send a request through the router and collect the response.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Router failed");
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes()
            .to_vec();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Poll until the request has a finished timestamp.
    pub async fn wait_for_finished(&self, uuid: Uuid) -> SimulationRequest {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(sim) = self.store.get_simulation(uuid).await.expect("get_simulation")
                && sim.simulation_finished.is_some()
            {
                return sim;
            }
            assert!(Instant::now() < deadline, "Simulation {uuid} did not finish");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until `count` mails with `subject` were sent.
    pub async fn wait_for_mails(&self, subject: &str, count: usize) -> Vec<OutgoingMail> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let mails = self.mailer.with_subject(subject);
            if mails.len() >= count {
                return mails;
            }
            assert!(
                Instant::now() < deadline,
                "Expected {count} mails with subject '{subject}', got {}",
                mails.len()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Write an artifact into the output directory.
    pub fn write_artifact(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.output_dir.join(name);
        std::fs::write(&path, bytes).expect("Failed to write artifact");
        path
    }

    /// Stop the dispatcher and wait for it.
    pub async fn shutdown(self) {
        self.dispatcher_shutdown.notify_one();
        self.dispatcher.await.expect("Dispatcher panicked");
    }
}

/// A collected response.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("Response is not JSON")
    }

    pub fn header(&self, name: header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// GET with the Host header set and an optional token.
pub fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    builder("GET", uri, token)
        .body(Body::empty())
        .expect("Failed to build request")
}

/// POST an url-encoded form.
pub fn post_form(uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
    builder("POST", uri, token)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .expect("Failed to build request")
}

/// POST a JSON document.
pub fn post_json(uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
    builder("POST", uri, token)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("Failed to build request")
}

fn builder(method: &str, uri: &str, token: Option<&str>) -> axum::http::request::Builder {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::HOST, "localhost");
    match token {
        Some(token) => builder.header(header::AUTHORIZATION, format!("Token {token}")),
        None => builder,
    }
}

/// Minimal RFC 822 message.
pub fn raw_email(from: &str, subject: &str, body: &str) -> Vec<u8> {
    format!(
        "From: {from}\r\n\
         To: {FROM}\r\n\
         Subject: {subject}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {body}\r\n"
    )
    .into_bytes()
}

/// Request ID from the form submission reply.
pub fn request_id(text: &str) -> Uuid {
    let id = text
        .rsplit("Your request ID is ")
        .next()
        .expect("No request ID in reply")
        .trim()
        .trim_end_matches('.');
    Uuid::parse_str(id).expect("Request ID is not a UUID")
}
