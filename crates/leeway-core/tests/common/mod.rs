// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for leeway-core integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use leeway_core::{NewUser, SimulationStore, SqliteStore, User};

/// In-memory store with one registered user.
pub struct TestContext {
    pub store: Arc<SqliteStore>,
    pub user: User,
}

impl TestContext {
    pub async fn new() -> Self {
        let store = Arc::new(
            SqliteStore::in_memory()
                .await
                .expect("Failed to create in-memory store"),
        );
        let user = store
            .create_user(NewUser {
                username: "skipper".to_string(),
                email: "skipper@example.org".to_string(),
                api_token: "skipper-token".to_string(),
            })
            .await
            .expect("Failed to create user");
        Self { store, user }
    }

    /// Register another user.
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
}
