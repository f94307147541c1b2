// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for leeway-core.

use thiserror::Error;

/// Errors raised by the domain and persistence layer.
#[derive(Debug, Error)]
pub enum CoreError {
    /// User does not exist.
    #[error("User '{user}' not found")]
    UserNotFound {
        /// Identifier or e-mail used for the lookup.
        user: String,
    },

    /// A unique column (username, email, uuid) already holds the value.
    #[error("{entity} '{value}' already exists")]
    AlreadyExists {
        /// What kind of record collided.
        entity: &'static str,
        /// The colliding value.
        value: String,
    },

    /// A coordinate could not be read as DMS or decimal degrees.
    #[error("Invalid coordinate '{input}': {reason}")]
    InvalidCoordinate {
        /// Raw input.
        input: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A stored row could not be turned back into a domain value.
    #[error("Corrupt record in '{table}': {details}")]
    CorruptRecord {
        /// Table the row came from.
        table: &'static str,
        /// Decoding failure.
        details: String,
    },

    /// Underlying database failure.
    #[error("Database error during '{operation}': {details}")]
    DatabaseError {
        /// Operation that failed (query, connect, migrate, ...).
        operation: String,
        /// Driver message.
        details: String,
    },
}

impl CoreError {
    /// Helper for connect/migrate style failures.
    pub fn database(operation: &str, err: impl std::fmt::Display) -> Self {
        Self::DatabaseError {
            operation: operation.to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_display() {
        let err = CoreError::UserNotFound {
            user: "skipper@example.org".to_string(),
        };
        assert_eq!(err.to_string(), "User 'skipper@example.org' not found");

        let err = CoreError::AlreadyExists {
            entity: "email",
            value: "a@b.c".to_string(),
        };
        assert_eq!(err.to_string(), "email 'a@b.c' already exists");

        let err = CoreError::InvalidCoordinate {
            input: "91°".to_string(),
            reason: "out of range".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid coordinate '91°': out of range");

        let err = CoreError::database("insert", "connection refused");
        assert_eq!(
            err.to_string(),
            "Database error during 'insert': connection refused"
        );
    }

    #[test]
    fn test_sqlx_error_is_a_query_failure() {
        let err: CoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(
            err,
            CoreError::DatabaseError { ref operation, .. } if operation == "query"
        ));
    }
}
