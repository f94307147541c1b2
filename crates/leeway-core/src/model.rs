// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain types: simulation requests, users and the leeway object catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default simulated duration in hours.
pub const DEFAULT_DURATION_HOURS: i64 = 12;

/// Default search radius in meters.
pub const DEFAULT_RADIUS_METERS: i64 = 1000;

/// Default object type (life-raft, no ballast, no canopy, no drogue).
pub const DEFAULT_OBJECT_TYPE: i64 = 27;

/// Derived lifecycle state of a [`SimulationRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    /// Stored, not yet picked up by a worker.
    Pending,
    /// Runner has begun; no finished timestamp yet.
    Started,
    /// Finished with an empty trace.
    Finished,
    /// Finished with a trace, even if artifacts exist.
    Failed,
}

impl SimulationStatus {
    /// Lowercase name used in API payloads and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SimulationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user-submitted drift simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRequest {
    /// Unique request identifier, also the stem of every artifact name.
    pub uuid: Uuid,
    /// Owning user.
    pub user_id: i64,
    /// Decimal degrees.
    pub longitude: f64,
    /// Decimal degrees.
    pub latitude: f64,
    /// Simulation start (UTC).
    pub start_time: DateTime<Utc>,
    /// Hours.
    pub duration: i64,
    /// Object catalog code.
    pub object_type: i64,
    /// Meters.
    pub radius: i64,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Set when the runner begins.
    pub simulation_started: Option<DateTime<Utc>>,
    /// Set when the runner completes, success or failure.
    pub simulation_finished: Option<DateTime<Utc>>,
    /// Image artifact file name inside the output directory.
    pub img: Option<String>,
    /// NetCDF artifact file name inside the output directory.
    pub netcdf: Option<String>,
    /// Stripped error stream of the simulation process.
    pub traceback: String,
}

impl SimulationRequest {
    /// Current lifecycle state.
    pub fn status(&self) -> SimulationStatus {
        match (self.simulation_started, self.simulation_finished) {
            (_, Some(_)) if self.traceback.is_empty() => SimulationStatus::Finished,
            (_, Some(_)) => SimulationStatus::Failed,
            (Some(_), None) => SimulationStatus::Started,
            (None, None) => SimulationStatus::Pending,
        }
    }

    /// True once the finished timestamp is set.
    pub fn completed(&self) -> bool {
        self.simulation_finished.is_some()
    }

    /// Last line of the trace, usually the error message.
    pub fn error(&self) -> Option<&str> {
        if self.traceback.is_empty() {
            return None;
        }
        self.traceback.lines().last()
    }

    /// File names of every artifact this request references.
    pub fn artifacts(&self) -> impl Iterator<Item = &str> {
        self.img.as_deref().into_iter().chain(self.netcdf.as_deref())
    }

    /// Expected image file name for this request.
    pub fn image_file_name(&self) -> String {
        format!("{}.png", self.uuid)
    }

    /// Expected NetCDF file name for this request.
    pub fn netcdf_file_name(&self) -> String {
        format!("{}.nc", self.uuid)
    }
}

/// Validated parameters for a new request.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSimulation {
    /// Owning user.
    pub user_id: i64,
    /// Decimal degrees.
    pub longitude: f64,
    /// Decimal degrees.
    pub latitude: f64,
    /// Simulation start (UTC).
    pub start_time: DateTime<Utc>,
    /// Hours.
    pub duration: i64,
    /// Object catalog code.
    pub object_type: i64,
    /// Meters.
    pub radius: i64,
}

/// Final state written by the runner in a single update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinishedUpdate {
    /// Completion time; clamped to the started timestamp if earlier.
    pub finished_at: DateTime<Utc>,
    /// Error stream, empty on a clean run.
    pub traceback: String,
    /// Image file name, only when the process exited 0.
    pub img: Option<String>,
    /// NetCDF file name, only when the process exited 0.
    pub netcdf: Option<String>,
}

/// A requesting identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Database id.
    pub id: i64,
    /// Unique login name.
    pub username: String,
    /// Unique e-mail address; results are mailed here.
    pub email: String,
    /// Inactive users cannot authenticate or submit by mail.
    pub is_active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Input for creating a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Unique login name.
    pub username: String,
    /// Unique e-mail address.
    pub email: String,
    /// Plain API token; only its SHA-256 digest is stored.
    pub api_token: String,
}

/// One entry of the leeway object catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ObjectType {
    /// Catalog code passed to the simulation as `--object-type`.
    pub code: i64,
    /// Description; leading `>` marks a sub-category.
    pub description: &'static str,
}

/// Look up an object type by code.
pub fn object_type(code: i64) -> Option<&'static ObjectType> {
    usize::try_from(code)
        .ok()
        .and_then(|c| c.checked_sub(1))
        .and_then(|idx| OBJECT_TYPES.get(idx))
        .filter(|ot| ot.code == code)
}

macro_rules! object_types {
    ($($code:literal => $desc:literal,)*) => {
        /// The OpenDrift leeway object categories (OBJECTPROP.DAT), ordered by code.
        pub static OBJECT_TYPES: &[ObjectType] = &[
            $(ObjectType { code: $code, description: $desc },)*
        ];
    };
}

object_types! {
    1 => "Person-in-water (PIW), unknown state (mean values)",
    2 => ">PIW, vertical PFD type III conscious",
    3 => ">PIW, sitting, PFD type I or II",
    4 => ">PIW, survival suit (face up)",
    5 => ">PIW, scuba suit (face up)",
    6 => ">PIW, deceased (face down)",
    7 => "Life raft, deep ballast (DB) system, general, unknown capacity and loading (mean values)",
    8 => ">4-14 person capacity, deep ballast system, canopy (average)",
    9 => ">>4-14 person capacity, deep ballast system, no drogue",
    10 => ">>>4-14 person capacity, deep ballast system, canopy, no drogue, light loading",
    11 => ">>>4-14 person capacity, deep ballast system, no drogue, heavy loading",
    12 => ">>4-14 person capacity, deep ballast system, canopy, with drogue (average)",
    13 => ">>>4-14 person capacity, deep ballast system, canopy, with drogue, light loading",
    14 => ">>>4-14 person capacity, deep ballast system, canopy, with drogue, heavy loading",
    15 => ">15-50 person capacity, deep ballast system, canopy, general (mean values)",
    16 => ">>15-50 person capacity, deep ballast system, canopy, no drogue, light loading",
    17 => ">>15-50 person capacity, deep ballast system, canopy, with drogue, heavy loading",
    18 => "Deep ballast system, general (mean values), capsized",
    19 => "Deep ballast system, general (mean values), swamped",
    20 => "Life-raft, shallow ballast (SB) system AND canopy, general (mean values)",
    21 => ">Life-raft, shallow ballast system, canopy, no drogue",
    22 => ">Life-raft, shallow ballast system AND canopy, with drogue",
    23 => "Life-raft, shallow ballast system AND canopy, capsized",
    24 => "Life Raft - Shallow ballast, canopy, Navy Sub Escape (SEIE) 1-man raft, NO drogue",
    25 => "Life Raft - Shallow ballast, canopy, Navy Sub Escape (SEIE) 1-man raft, with drogue",
    26 => "Life-raft, no ballast (NB) system, general (mean values)",
    27 => ">Life-raft, no ballast system, no canopy, no drogue",
    28 => ">Life-raft, no ballast system, no canopy, with drogue",
    29 => ">Life-raft, no ballast system, with canopy, no drogue",
    30 => ">Life-raft, no ballast system, with canopy, with drogue",
    31 => "Survival Craft - USCG Sea Rescue Kit - 3 ballasted life rafts and 300 meter of line",
    32 => "Life-raft, 4-6 person capacity, no ballast, with canopy, no drogue",
    33 => "Evacuation slide with life-raft, 46 person capacity",
    34 => "Survival Craft - SOLAS Hard Shell Life Capsule, 22 man",
    35 => "Survival Craft - Ovatek Hard Shell Life Raft, 4 and 7-man, lightly loaded, no drogue (average)",
    36 => ">Survival Craft - Ovatek Hard Shell Life Raft, 4 man, lightly loaded, no drogue",
    37 => ">Survival Craft - Ovatek Hard Shell Life Raft, 7 man, lightly loaded, no drogue",
    38 => "Survival Craft - Ovatek Hard Shell Life Raft, 4 and 7-man, fully loaded, drogued (average)",
    39 => ">Survival Craft - Ovatek Hard Shell Life Raft, 4 man, fully loaded, drogued",
    40 => ">Survival Craft - Ovatek Hard Shell Life Raft, 7 man, fully loaded, drogued",
    41 => "Sea Kayak with person on aft deck",
    42 => "Surf board with person",
    43 => "Windsurfer with mast and sail in water",
    44 => "Skiff - modified-v, cathedral-hull, runabout outboard powerboat",
    45 => "Skiff, V-hull",
    46 => "Skiffs, swamped and capsized",
    47 => "Skiff - v-hull bow to stern (aluminum, Norway)",
    48 => "Sport boat, no canvas (*1), modified V-hull",
    49 => "Sport fisher, center console (*2), open cockpit",
    50 => "Fishing vessel, general (mean values)",
    51 => "Fishing vessel, Hawaiian Sampan (*3)",
    52 => ">Fishing vessel, Japanese side-stern trawler",
    53 => ">Fishing vessel, Japanese Longliner (*3)",
    54 => ">Fishing vessel, Korean fishing vessel (*4)",
    55 => ">Fishing vessel, Gill-netter with rear reel (*3)",
    56 => "Coastal freighter. (*5)",
    57 => "Sailboat Mono-hull (Average)",
    58 => ">Sailboat Mono-hull (Dismasted, Average)",
    59 => ">>Sailboat Mono-hull (Dismasted - rudder amidships)",
    60 => ">>Sailboat Mono-hull (Dismasted - rudder missing)",
    61 => ">Sailboat Mono-hull (Bare-masted,  Average)",
    62 => ">>Sailboat Mono-hull (Bare-masted, rudder amidships)",
    63 => ">>Sailboat Mono-hull (Bare-masted, rudder hove-to)",
    64 => "Sailboat Mono-hull, fin keel, shallow draft (was SAILBOAT-2)",
    65 => "Sunfish sailing dingy  -  Bare-masted, rudder missing",
    66 => "Fishing vessel debris",
    67 => "Self-locating datum marker buoy - no windage",
    68 => "Navy Submarine EPIRB (SEPIRB)",
    69 => "Bait/wharf box, holds a cubic metre of ice, mean values (*6)",
    70 => "Bait/wharf box, holds a cubic metre of ice, lightly loaded",
    71 => ">Bait/wharf box, holds a cubic metre of ice, full loaded",
    72 => "55-gallon (220 l) Oil Drum",
    73 => "Scaled down (1:3) 40-ft Container (70% submerged)",
    74 => "20-ft Container (80% submerged)",
    75 => "WII L-MK2 mine ",
    76 => "Immigration vessel, Cuban refugee-raft, no sail (*7)",
    77 => "Immigration vessel, Cuban refugee-raft, with sail (*7)",
}
