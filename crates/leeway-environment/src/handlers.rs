// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP request handlers.
//!
//! Handlers stay thin: authentication is an extractor, validation and
//! queueing live in [`Intake`](crate::intake::Intake), and every error maps
//! to a status code through [`ApiError`].

use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use chrono::{DateTime, Utc};
use leeway_core::{OBJECT_TYPES, SimulationForm, SimulationRequest, SimulationStatus, User, ValidationErrors};
use serde::Serialize;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::error::Error;
use crate::server::{AppState, ServerConfig};

/// Message shown when a form submission is invalid.
pub const FORM_ERROR_MESSAGE: &str = "An error occurred. Simulation could not be started.";

/// Errors returned by handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or unknown token.
    Unauthorized(&'static str),
    /// Authenticated, but not the owner.
    Forbidden,
    /// Nothing at this URL for the caller.
    NotFound,
    /// Invalid request parameters.
    Validation(ValidationErrors),
    /// Anything else.
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::Validation(errors) => Self::Validation(errors),
            Error::SimulationNotFound(_) => Self::NotFound,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<leeway_core::CoreError> for ApiError {
    fn from(e: leeway_core::CoreError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized(detail) => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Token")],
                Json(json!({ "detail": detail })),
            )
                .into_response(),
            Self::Forbidden => (
                StatusCode::FORBIDDEN,
                Json(json!({ "detail": "You do not have permission to perform this action." })),
            )
                .into_response(),
            Self::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({ "detail": "Not found." }))).into_response()
            }
            Self::Validation(errors) => (StatusCode::BAD_REQUEST, Json(errors)).into_response(),
            Self::Internal(message) => {
                error!(error = %message, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": "Internal server error." })),
                )
                    .into_response()
            }
        }
    }
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized(
                "Authentication credentials were not provided.",
            ))?;

        let token = value
            .split_once(' ')
            .filter(|(scheme, _)| {
                scheme.eq_ignore_ascii_case("token") || scheme.eq_ignore_ascii_case("bearer")
            })
            .map(|(_, token)| token.trim())
            .filter(|token| !token.is_empty())
            .ok_or(ApiError::Unauthorized("Invalid token header."))?;

        match state.store.find_user_by_token(token).await? {
            Some(user) if user.is_active => Ok(Self(user)),
            _ => Err(ApiError::Unauthorized("Invalid token.")),
        }
    }
}

/// API representation of a request.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationResponse {
    /// Request identifier.
    pub uuid: Uuid,
    /// Owner's login name.
    pub username: String,
    /// Decimal degrees.
    pub latitude: f64,
    /// Decimal degrees.
    pub longitude: f64,
    /// Simulation start.
    pub start_time: DateTime<Utc>,
    /// Hours.
    pub duration: i64,
    /// Catalog code.
    pub object_type: i64,
    /// Meters.
    pub radius: i64,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Image URL.
    pub img: Option<String>,
    /// NetCDF URL.
    pub netcdf: Option<String>,
    /// Diagnostic trace.
    pub traceback: String,
    /// Last trace line.
    pub error: Option<String>,
    /// Start of the run.
    pub simulation_started: Option<DateTime<Utc>>,
    /// End of the run.
    pub simulation_finished: Option<DateTime<Utc>>,
    /// True once finished.
    pub completed: bool,
    /// Lifecycle state.
    pub status: SimulationStatus,
}

impl SimulationResponse {
    /// Render a record owned by `user`.
    pub fn new(sim: SimulationRequest, user: &User, config: &ServerConfig) -> Self {
        Self {
            uuid: sim.uuid,
            username: user.username.clone(),
            latitude: sim.latitude,
            longitude: sim.longitude,
            start_time: sim.start_time,
            duration: sim.duration,
            object_type: sim.object_type,
            radius: sim.radius,
            created_at: sim.created_at,
            img: sim.img.as_deref().map(|name| config.file_url(name)),
            netcdf: sim.netcdf.as_deref().map(|name| config.file_url(name)),
            error: sim.error().map(str::to_string),
            simulation_started: sim.simulation_started,
            simulation_finished: sim.simulation_finished,
            completed: sim.completed(),
            status: sim.status(),
            traceback: sim.traceback,
        }
    }
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Response {
    let database = state.store.health_check().await.unwrap_or(false);
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if database { "ok" } else { "degraded" },
            "database": database,
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": state.started_at.elapsed().as_secs(),
        })),
    )
        .into_response()
}

/// `GET /object-types`
pub async fn object_types() -> Response {
    Json(OBJECT_TYPES).into_response()
}

/// `POST /simulations/new`: url-encoded web form.
pub async fn submit_form(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Form(form): Form<SimulationForm>,
) -> Result<Response, ApiError> {
    match state.intake.submit(&user, &form).await {
        Ok(sim) => Ok((
            StatusCode::CREATED,
            format!(
                "Request saved. You will receive an e-mail to {} when the simulation is finished.\n\
                 Your request ID is {}.",
                user.email, sim.uuid
            ),
        )
            .into_response()),
        Err(Error::Validation(errors)) => Ok((
            StatusCode::BAD_REQUEST,
            format!("{FORM_ERROR_MESSAGE}\n\n{errors}"),
        )
            .into_response()),
        Err(e) => Err(e.into()),
    }
}

/// `GET /api/v1/simulations`
pub async fn list_simulations(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<SimulationResponse>>, ApiError> {
    let sims = state.store.list_simulations_for_user(user.id).await?;
    Ok(Json(
        sims.into_iter()
            .map(|sim| SimulationResponse::new(sim, &user, &state.config))
            .collect(),
    ))
}

/// `POST /api/v1/simulations`
pub async fn create_simulation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(form): Json<SimulationForm>,
) -> Result<(StatusCode, Json<SimulationResponse>), ApiError> {
    let sim = state.intake.submit(&user, &form).await?;
    Ok((
        StatusCode::CREATED,
        Json(SimulationResponse::new(sim, &user, &state.config)),
    ))
}

/// `GET /api/v1/simulations/{uuid}`: other users' requests are not found.
pub async fn get_simulation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(uuid): Path<String>,
) -> Result<Json<SimulationResponse>, ApiError> {
    let uuid = Uuid::parse_str(&uuid).map_err(|_| ApiError::NotFound)?;
    match state.store.get_simulation(uuid).await? {
        Some(sim) if sim.user_id == user.id => {
            Ok(Json(SimulationResponse::new(sim, &user, &state.config)))
        }
        _ => Err(ApiError::NotFound),
    }
}

/// `GET /simulations/files/{filename}`
///
/// Names with a path separator are not found; a name whose stem is not one
/// of the caller's requests is forbidden; a missing file is not found.
pub async fn simulation_file(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    if filename.contains('/') || filename.contains('\\') || filename.starts_with('.') {
        return Err(ApiError::NotFound);
    }

    let stem = filename
        .split_once('.')
        .map_or(filename.as_str(), |(stem, _)| stem);
    let uuid = Uuid::parse_str(stem).map_err(|_| ApiError::Forbidden)?;
    match state.store.get_simulation(uuid).await? {
        Some(sim) if sim.user_id == user.id => {}
        _ => return Err(ApiError::Forbidden),
    }

    let path = state.config.output_dir.join(&filename);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ApiError::NotFound),
        Err(e) => return Err(ApiError::Internal(format!("{}: {e}", path.display()))),
    };

    let content_type = match filename.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "nc" => "application/x-netcdf",
        _ => "application/octet-stream",
    };
    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
