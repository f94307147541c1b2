// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed simulation store.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::CoreError;
use crate::migrations;
use crate::model::{FinishedUpdate, NewSimulation, NewUser, SimulationRequest, User};

use super::{RetentionAnchor, SimulationStore, hash_token};

const SIMULATION_COLUMNS: &str = "uuid, user_id, longitude, latitude, start_time, duration, \
     object_type, radius, created_at, simulation_started, simulation_finished, img, netcdf, traceback";

const USER_COLUMNS: &str = "id, username, email, is_active, created_at";

#[derive(Debug, sqlx::FromRow)]
struct SimulationRow {
    uuid: String,
    user_id: i64,
    longitude: f64,
    latitude: f64,
    start_time: DateTime<Utc>,
    duration: i64,
    object_type: i64,
    radius: i64,
    created_at: DateTime<Utc>,
    simulation_started: Option<DateTime<Utc>>,
    simulation_finished: Option<DateTime<Utc>>,
    img: Option<String>,
    netcdf: Option<String>,
    traceback: String,
}

impl TryFrom<SimulationRow> for SimulationRequest {
    type Error = CoreError;

    fn try_from(row: SimulationRow) -> Result<Self, Self::Error> {
        let uuid = Uuid::parse_str(&row.uuid).map_err(|e| CoreError::CorruptRecord {
            table: "simulations",
            details: format!("uuid '{}': {}", row.uuid, e),
        })?;
        Ok(Self {
            uuid,
            user_id: row.user_id,
            longitude: row.longitude,
            latitude: row.latitude,
            start_time: row.start_time,
            duration: row.duration,
            object_type: row.object_type,
            radius: row.radius,
            created_at: row.created_at,
            simulation_started: row.simulation_started,
            simulation_finished: row.simulation_finished,
            img: row.img,
            netcdf: row.netcdf,
            traceback: row.traceback,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

fn into_requests(rows: Vec<SimulationRow>) -> Result<Vec<SimulationRequest>, CoreError> {
    rows.into_iter().map(SimulationRequest::try_from).collect()
}

/// SQLite-backed [`SimulationStore`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing, already migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a database URL (e.g. `sqlite:leeway.db?mode=rwc`) and run migrations.
    pub async fn from_url(url: &str) -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| CoreError::database("connect", format!("{url}: {e}")))?;
        Self::migrated(pool).await
    }

    /// Open (creating if needed) a database file and run migrations.
    ///
    /// Parent directories are created as well.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                CoreError::database("create_dir", format!("{}: {}", parent.display(), e))
            })?;
        }

        Self::from_url(&format!("sqlite:{}?mode=rwc", path.to_string_lossy())).await
    }

    /// Private in-memory database, used by tests and the mock runtime.
    ///
    /// A single connection keeps every query on the same memory database.
    pub async fn in_memory() -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CoreError::database("connect", e))?;
        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self, CoreError> {
        migrations::run_sqlite(&pool)
            .await
            .map_err(|e| CoreError::database("migrate", e))?;
        debug!("SQLite migrations applied");
        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl SimulationStore for SqliteStore {
    async fn create_user(&self, user: NewUser) -> Result<User, CoreError> {
        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO users (username, email, token_hash, is_active, created_at)
            VALUES (?, ?, ?, 1, ?)
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(hash_token(&user.api_token))
        .bind(created_at)
        .execute(&self.pool)
        .await;

        let result = match result {
            Ok(r) => r,
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                let (entity, value) = if db.message().contains("users.email") {
                    ("email", user.email)
                } else if db.message().contains("users.token_hash") {
                    ("api token", "<redacted>".to_string())
                } else {
                    ("username", user.username)
                };
                return Err(CoreError::AlreadyExists { entity, value });
            }
            Err(e) => return Err(e.into()),
        };

        info!(username = %user.username, "User created");
        Ok(User {
            id: result.last_insert_rowid(),
            username: user.username,
            email: user.email,
            is_active: true,
            created_at,
        })
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, CoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, CoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ? COLLATE NOCASE"
        ))
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn find_user_by_token(&self, token: &str) -> Result<Option<User>, CoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE token_hash = ? AND is_active = 1"
        ))
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn list_users(&self) -> Result<Vec<User>, CoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn insert_simulation(&self, sim: NewSimulation) -> Result<SimulationRequest, CoreError> {
        let uuid = Uuid::new_v4();
        let created_at = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO simulations
                (uuid, user_id, longitude, latitude, start_time, duration, object_type, radius,
                 created_at, traceback)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, '')
            "#,
        )
        .bind(uuid.to_string())
        .bind(sim.user_id)
        .bind(sim.longitude)
        .bind(sim.latitude)
        .bind(sim.start_time)
        .bind(sim.duration)
        .bind(sim.object_type)
        .bind(sim.radius)
        .bind(created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                return Err(CoreError::UserNotFound {
                    user: sim.user_id.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        Ok(SimulationRequest {
            uuid,
            user_id: sim.user_id,
            longitude: sim.longitude,
            latitude: sim.latitude,
            start_time: sim.start_time,
            duration: sim.duration,
            object_type: sim.object_type,
            radius: sim.radius,
            created_at,
            simulation_started: None,
            simulation_finished: None,
            img: None,
            netcdf: None,
            traceback: String::new(),
        })
    }

    async fn get_simulation(&self, uuid: Uuid) -> Result<Option<SimulationRequest>, CoreError> {
        let row = sqlx::query_as::<_, SimulationRow>(&format!(
            "SELECT {SIMULATION_COLUMNS} FROM simulations WHERE uuid = ?"
        ))
        .bind(uuid.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SimulationRequest::try_from).transpose()
    }

    async fn list_simulations_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<SimulationRequest>, CoreError> {
        let rows = sqlx::query_as::<_, SimulationRow>(&format!(
            "SELECT {SIMULATION_COLUMNS} FROM simulations WHERE user_id = ? \
             ORDER BY julianday(created_at) DESC, rowid DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        into_requests(rows)
    }

    async fn list_simulations(&self, limit: i64) -> Result<Vec<SimulationRequest>, CoreError> {
        let rows = sqlx::query_as::<_, SimulationRow>(&format!(
            "SELECT {SIMULATION_COLUMNS} FROM simulations \
             ORDER BY julianday(created_at) DESC, rowid DESC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        into_requests(rows)
    }

    async fn mark_started(&self, uuid: Uuid, at: DateTime<Utc>) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE simulations
            SET simulation_started = ?
            WHERE uuid = ? AND simulation_started IS NULL
            "#,
        )
        .bind(at)
        .bind(uuid.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_finished(&self, uuid: Uuid, update: FinishedUpdate) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE simulations
            SET simulation_finished = CASE
                    WHEN julianday(?) < julianday(simulation_started) THEN simulation_started
                    ELSE ?
                END,
                traceback = ?,
                img = ?,
                netcdf = ?
            WHERE uuid = ?
              AND simulation_started IS NOT NULL
              AND simulation_finished IS NULL
            "#,
        )
        .bind(update.finished_at)
        .bind(update.finished_at)
        .bind(&update.traceback)
        .bind(&update.img)
        .bind(&update.netcdf)
        .bind(uuid.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_expired(
        &self,
        cutoff: DateTime<Utc>,
        anchor: RetentionAnchor,
        limit: i64,
    ) -> Result<Vec<SimulationRequest>, CoreError> {
        let anchor_column = match anchor {
            RetentionAnchor::Submitted => "created_at",
            RetentionAnchor::Finished => "COALESCE(simulation_finished, created_at)",
        };
        let rows = sqlx::query_as::<_, SimulationRow>(&format!(
            "SELECT {SIMULATION_COLUMNS} FROM simulations \
             WHERE julianday({anchor_column}) < julianday(?) \
             ORDER BY julianday({anchor_column}) ASC LIMIT ?"
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        into_requests(rows)
    }

    async fn delete_simulation(&self, uuid: Uuid) -> Result<bool, CoreError> {
        let result = sqlx::query("DELETE FROM simulations WHERE uuid = ?")
            .bind(uuid.to_string())
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            debug!(uuid = %uuid, "Simulation record deleted");
        }
        Ok(deleted)
    }

    async fn health_check(&self) -> Result<bool, CoreError> {
        let (one,): (i64,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn store() -> SqliteStore {
        SqliteStore::in_memory()
            .await
            .expect("Failed to create in-memory store")
    }

    async fn user(store: &SqliteStore, name: &str) -> User {
        store
            .create_user(NewUser {
                username: name.to_string(),
                email: format!("{name}@example.org"),
                api_token: format!("token-{name}"),
            })
            .await
            .expect("Failed to create user")
    }

    fn new_sim(user_id: i64) -> NewSimulation {
        NewSimulation {
            user_id,
            longitude: 13.1,
            latitude: 54.2,
            start_time: Utc::now(),
            duration: 12,
            object_type: 27,
            radius: 1000,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_simulation() {
        let store = store().await;
        let alice = user(&store, "alice").await;

        let sim = store.insert_simulation(new_sim(alice.id)).await.unwrap();
        let loaded = store
            .get_simulation(sim.uuid)
            .await
            .unwrap()
            .expect("simulation should exist");

        assert_eq!(loaded.uuid, sim.uuid);
        assert_eq!(loaded.user_id, alice.id);
        assert_eq!(loaded.latitude, 54.2);
        assert_eq!(loaded.traceback, "");
        assert!(loaded.simulation_started.is_none());
    }

    #[tokio::test]
    async fn test_insert_for_unknown_user_fails() {
        let store = store().await;
        let err = store.insert_simulation(new_sim(999)).await.unwrap_err();
        assert!(matches!(err, CoreError::UserNotFound { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_user_lookup_by_email_and_token() {
        let store = store().await;
        let alice = user(&store, "alice").await;

        let by_email = store
            .find_user_by_email("ALICE@Example.org")
            .await
            .unwrap()
            .expect("case-insensitive match");
        assert_eq!(by_email.id, alice.id);

        let by_token = store.find_user_by_token("token-alice").await.unwrap();
        assert_eq!(by_token.map(|u| u.id), Some(alice.id));
        assert!(store.find_user_by_token("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = store().await;
        user(&store, "alice").await;
        let err = store
            .create_user(NewUser {
                username: "alice2".to_string(),
                email: "Alice@example.org".to_string(),
                api_token: "other".to_string(),
            })
            .await
            .unwrap_err();
        assert!(
            matches!(err, CoreError::AlreadyExists { entity: "email", .. }),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn test_finished_requires_started() {
        let store = store().await;
        let alice = user(&store, "alice").await;
        let sim = store.insert_simulation(new_sim(alice.id)).await.unwrap();

        let applied = store
            .mark_finished(
                sim.uuid,
                FinishedUpdate {
                    finished_at: Utc::now(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!applied);
        let loaded = store.get_simulation(sim.uuid).await.unwrap().unwrap();
        assert!(loaded.simulation_finished.is_none());
    }

    #[tokio::test]
    async fn test_finished_clamped_to_started() {
        let store = store().await;
        let alice = user(&store, "alice").await;
        let sim = store.insert_simulation(new_sim(alice.id)).await.unwrap();

        let started = Utc::now();
        assert!(store.mark_started(sim.uuid, started).await.unwrap());
        assert!(!store.mark_started(sim.uuid, started).await.unwrap());

        let applied = store
            .mark_finished(
                sim.uuid,
                FinishedUpdate {
                    finished_at: started - Duration::minutes(5),
                    traceback: "boom".to_string(),
                    img: None,
                    netcdf: None,
                },
            )
            .await
            .unwrap();
        assert!(applied);

        let loaded = store.get_simulation(sim.uuid).await.unwrap().unwrap();
        let started_at = loaded.simulation_started.unwrap();
        let finished_at = loaded.simulation_finished.unwrap();
        assert!(finished_at >= started_at);
        assert_eq!(loaded.error(), Some("boom"));

        // A second finish is ignored.
        let again = store
            .mark_finished(
                sim.uuid,
                FinishedUpdate {
                    finished_at: Utc::now(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!again);
    }

    #[tokio::test]
    async fn test_list_for_user_is_scoped_and_newest_first() {
        let store = store().await;
        let alice = user(&store, "alice").await;
        let bob = user(&store, "bob").await;

        let first = store.insert_simulation(new_sim(alice.id)).await.unwrap();
        let second = store.insert_simulation(new_sim(alice.id)).await.unwrap();
        store.insert_simulation(new_sim(bob.id)).await.unwrap();

        let list = store.list_simulations_for_user(alice.id).await.unwrap();
        let ids: Vec<_> = list.iter().map(|s| s.uuid).collect();
        assert_eq!(ids, vec![second.uuid, first.uuid]);
    }

    #[tokio::test]
    async fn test_list_expired_by_anchor() {
        let store = store().await;
        let alice = user(&store, "alice").await;
        let sim = store.insert_simulation(new_sim(alice.id)).await.unwrap();

        let past = Utc::now() - Duration::days(10);
        sqlx::query("UPDATE simulations SET created_at = ? WHERE uuid = ?")
            .bind(past)
            .bind(sim.uuid.to_string())
            .execute(store.pool())
            .await
            .unwrap();
        store.mark_started(sim.uuid, Utc::now()).await.unwrap();
        store
            .mark_finished(
                sim.uuid,
                FinishedUpdate {
                    finished_at: Utc::now(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let cutoff = Utc::now() - Duration::days(7);
        let submitted = store
            .list_expired(cutoff, RetentionAnchor::Submitted, 100)
            .await
            .unwrap();
        assert_eq!(submitted.len(), 1);

        let finished = store
            .list_expired(cutoff, RetentionAnchor::Finished, 100)
            .await
            .unwrap();
        assert!(finished.is_empty());

        assert!(store.delete_simulation(sim.uuid).await.unwrap());
        assert!(!store.delete_simulation(sim.uuid).await.unwrap());
    }

    #[tokio::test]
    async fn test_from_path_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/leeway.db");
        let store = SqliteStore::from_path(&path).await.unwrap();
        assert!(store.health_check().await.unwrap());
        assert!(path.exists());
    }
}
