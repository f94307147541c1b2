// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interface and the SQLite backend.
//!
//! Every component receives an `Arc<dyn SimulationStore>`; nothing looks
//! records up through global state.

pub mod sqlite;

pub use self::sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{FinishedUpdate, NewSimulation, NewUser, SimulationRequest, User};

/// Which timestamp the retention window is measured from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionAnchor {
    /// Submission time.
    #[default]
    Submitted,
    /// Finished time, falling back to submission for requests that never finished.
    Finished,
}

impl std::str::FromStr for RetentionAnchor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "submitted" | "created" => Ok(Self::Submitted),
            "finished" => Ok(Self::Finished),
            other => Err(format!("unknown retention anchor '{other}'")),
        }
    }
}

/// Storage for users and simulation requests.
#[async_trait]
pub trait SimulationStore: Send + Sync {
    /// Create a user; the token is stored hashed.
    async fn create_user(&self, user: NewUser) -> Result<User, CoreError>;

    /// Load a user by id.
    async fn get_user(&self, id: i64) -> Result<Option<User>, CoreError>;

    /// Case-insensitive e-mail lookup.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, CoreError>;

    /// Resolve a plain API token to its active user.
    async fn find_user_by_token(&self, token: &str) -> Result<Option<User>, CoreError>;

    /// All users, ordered by id.
    async fn list_users(&self) -> Result<Vec<User>, CoreError>;

    /// Store a new pending request with a fresh UUID.
    async fn insert_simulation(&self, sim: NewSimulation) -> Result<SimulationRequest, CoreError>;

    /// Load a request by UUID.
    async fn get_simulation(&self, uuid: Uuid) -> Result<Option<SimulationRequest>, CoreError>;

    /// A user's requests, newest first.
    async fn list_simulations_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<SimulationRequest>, CoreError>;

    /// Most recent requests across all users.
    async fn list_simulations(&self, limit: i64) -> Result<Vec<SimulationRequest>, CoreError>;

    /// Set the started timestamp. Returns false if the request is unknown or
    /// already started.
    async fn mark_started(&self, uuid: Uuid, at: DateTime<Utc>) -> Result<bool, CoreError>;

    /// Write finished timestamp, trace and artifacts in one update.
    ///
    /// Applies only to a started, unfinished request; returns false otherwise.
    /// A finished timestamp earlier than the started one is clamped.
    async fn mark_finished(&self, uuid: Uuid, update: FinishedUpdate) -> Result<bool, CoreError>;

    /// Requests whose anchor timestamp is older than `cutoff`, oldest first.
    async fn list_expired(
        &self,
        cutoff: DateTime<Utc>,
        anchor: RetentionAnchor,
        limit: i64,
    ) -> Result<Vec<SimulationRequest>, CoreError>;

    /// Delete a request. Returns false if it did not exist.
    async fn delete_simulation(&self, uuid: Uuid) -> Result<bool, CoreError>;

    /// Check database connectivity.
    async fn health_check(&self) -> Result<bool, CoreError>;
}

/// SHA-256 hex digest of an API token.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// A fresh random API token (64 hex characters).
pub fn generate_api_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_token_is_stable_hex() {
        let h = hash_token("secret");
        assert_eq!(h.len(), 64);
        assert_eq!(h, hash_token("secret"));
        assert_ne!(h, hash_token("Secret"));
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        let a = generate_api_token();
        let b = generate_api_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_retention_anchor_parse() {
        assert_eq!("submitted".parse(), Ok(RetentionAnchor::Submitted));
        assert_eq!(" Finished ".parse(), Ok(RetentionAnchor::Finished));
        assert!("started".parse::<RetentionAnchor>().is_err());
    }
}
