// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Input validation shared by every intake channel.
//!
//! The web form, the REST API and inbound e-mail all produce a
//! [`SimulationForm`] of raw text values. [`SimulationParams::from_form`]
//! turns it into validated, typed parameters or a [`ValidationErrors`] map.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::coords::normalize_dms2dec;
use crate::model::{
    DEFAULT_DURATION_HOURS, DEFAULT_OBJECT_TYPE, DEFAULT_RADIUS_METERS, NewSimulation, object_type,
};

/// Keys recognized in e-mail subjects and bodies.
pub const SIMULATION_ARGUMENTS: [&str; 6] = [
    "latitude",
    "longitude",
    "duration",
    "radius",
    "object_type",
    "start_time",
];

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

/// Raw, unvalidated request fields.
///
/// Deserializes from url-encoded forms as well as JSON, where numeric
/// fields may be given as numbers or strings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationForm {
    /// Decimal or DMS latitude.
    #[serde(default, deserialize_with = "text_or_number")]
    pub latitude: Option<String>,
    /// Decimal or DMS longitude.
    #[serde(default, deserialize_with = "text_or_number")]
    pub longitude: Option<String>,
    /// Catalog code.
    #[serde(default, deserialize_with = "text_or_number")]
    pub object_type: Option<String>,
    /// Start time; blank means now.
    #[serde(default, deserialize_with = "text_or_number")]
    pub start_time: Option<String>,
    /// Hours.
    #[serde(default, deserialize_with = "text_or_number")]
    pub duration: Option<String>,
    /// Meters.
    #[serde(default, deserialize_with = "text_or_number")]
    pub radius: Option<String>,
}

fn text_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Int(i) => i.to_string(),
        Raw::Float(f) => f.to_string(),
    }))
}

impl SimulationForm {
    /// Build a form from `key -> value` pairs, ignoring unknown keys.
    pub fn from_arguments(arguments: &BTreeMap<String, String>) -> Self {
        let get = |key: &str| arguments.get(key).cloned();
        Self {
            latitude: get("latitude"),
            longitude: get("longitude"),
            object_type: get("object_type"),
            start_time: get("start_time"),
            duration: get("duration"),
            radius: get("radius"),
        }
    }
}

/// Field name to error messages. Empty means valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    /// Record a message for a field.
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    /// True when no field failed.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Messages for one field.
    pub fn field(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or_default()
    }

    /// Iterate `(field, messages)` in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in self.iter() {
            for message in messages {
                if !first {
                    f.write_str("\n")?;
                }
                first = false;
                write!(f, "{field}: {message}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Validated simulation parameters, not yet bound to a user.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationParams {
    /// Decimal degrees in [-180, 180].
    pub longitude: f64,
    /// Decimal degrees in [-90, 90].
    pub latitude: f64,
    /// UTC start.
    pub start_time: DateTime<Utc>,
    /// Hours, positive.
    pub duration: i64,
    /// Catalog code.
    pub object_type: i64,
    /// Meters, positive.
    pub radius: i64,
}

impl SimulationParams {
    /// Validate a form. `now` fills a blank start time.
    pub fn from_form(form: &SimulationForm, now: DateTime<Utc>) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        let latitude = coordinate(&mut errors, "latitude", form.latitude.as_deref(), 90.0);
        let longitude = coordinate(&mut errors, "longitude", form.longitude.as_deref(), 180.0);
        let duration = integer(
            &mut errors,
            "duration",
            form.duration.as_deref(),
            DEFAULT_DURATION_HOURS,
        );
        let radius = integer(
            &mut errors,
            "radius",
            form.radius.as_deref(),
            DEFAULT_RADIUS_METERS,
        );
        let object_type_code = integer(
            &mut errors,
            "object_type",
            form.object_type.as_deref(),
            DEFAULT_OBJECT_TYPE,
        );
        let start_time = match non_blank(form.start_time.as_deref()) {
            None => Some(now),
            Some(raw) => match parse_start_time(raw) {
                Some(t) => Some(t),
                None => {
                    errors.add("start_time", "Enter a valid date/time.");
                    None
                }
            },
        };

        if let Some(d) = duration
            && d <= 0
        {
            errors.add("duration", "Ensure this value is greater than 0.");
        }
        if let Some(r) = radius
            && r <= 0
        {
            errors.add("radius", "Ensure this value is greater than 0.");
        }
        if let Some(code) = object_type_code
            && object_type(code).is_none()
        {
            errors.add(
                "object_type",
                format!("Select a valid choice. {code} is not one of the available choices."),
            );
        }

        match (latitude, longitude, start_time, duration, radius, object_type_code) {
            (Some(latitude), Some(longitude), Some(start_time), Some(duration), Some(radius), Some(object_type))
                if errors.is_empty() =>
            {
                Ok(Self {
                    longitude,
                    latitude,
                    start_time,
                    duration,
                    object_type,
                    radius,
                })
            }
            _ => Err(errors),
        }
    }

    /// Bind the parameters to their owner.
    pub fn into_new_simulation(self, user_id: i64) -> NewSimulation {
        NewSimulation {
            user_id,
            longitude: self.longitude,
            latitude: self.latitude,
            start_time: self.start_time,
            duration: self.duration,
            object_type: self.object_type,
            radius: self.radius,
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn coordinate(errors: &mut ValidationErrors, field: &str, raw: Option<&str>, limit: f64) -> Option<f64> {
    let Some(raw) = non_blank(raw) else {
        errors.add(field, "This field is required.");
        return None;
    };
    let normalized = match normalize_dms2dec(raw) {
        Ok(n) => n,
        Err(e) => {
            errors.add(field, e.to_string());
            return None;
        }
    };
    match normalized.parse::<f64>() {
        Ok(v) if !v.is_finite() => {
            errors.add(field, "Enter a number.");
            None
        }
        Ok(v) if v.abs() > limit => {
            errors.add(field, format!("Ensure this value is between -{limit} and {limit}."));
            None
        }
        Ok(v) => Some(v),
        Err(_) => {
            errors.add(field, "Enter a number.");
            None
        }
    }
}

fn integer(errors: &mut ValidationErrors, field: &str, raw: Option<&str>, default: i64) -> Option<i64> {
    match non_blank(raw) {
        None => Some(default),
        Some(raw) => match raw.parse::<i64>() {
            Ok(v) => Some(v),
            Err(_) => {
                errors.add(field, "Enter a whole number.");
                None
            }
        },
    }
}

/// Parse a start time. Values without an offset are taken as UTC.
pub fn parse_start_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Parse `key=value` pairs separated by `delimiter`.
///
/// Only [`SIMULATION_ARGUMENTS`] keys are kept; keys and values are trimmed.
/// Later duplicates override earlier ones.
pub fn parse_mail_arguments(text: &str, delimiter: char) -> BTreeMap<String, String> {
    text.split(delimiter)
        .filter_map(|part| part.trim().split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(key, _)| SIMULATION_ARGUMENTS.contains(key))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Combine subject (`;`-separated) and body (line-separated) arguments.
/// Body values win.
pub fn merge_mail_arguments(subject: &str, body: &str) -> SimulationForm {
    let mut arguments = parse_mail_arguments(subject, ';');
    arguments.extend(parse_mail_arguments(body, '\n'));
    SimulationForm::from_arguments(&arguments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn form(lat: &str, lon: &str) -> SimulationForm {
        SimulationForm {
            latitude: Some(lat.to_string()),
            longitude: Some(lon.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_applied() {
        let params = SimulationParams::from_form(&form("54.2", "13.1"), now()).unwrap();
        assert_eq!(params.duration, 12);
        assert_eq!(params.radius, 1000);
        assert_eq!(params.object_type, 27);
        assert_eq!(params.start_time, now());
        assert_eq!(params.latitude, 54.2);
        assert_eq!(params.longitude, 13.1);
    }

    #[test]
    fn test_dms_normalized() {
        let params = SimulationParams::from_form(&form("54°30'N", "13°15'W"), now()).unwrap();
        assert_eq!(params.latitude, 54.5);
        assert_eq!(params.longitude, -13.25);
    }

    #[test]
    fn test_missing_coordinates() {
        let err = SimulationParams::from_form(&SimulationForm::default(), now()).unwrap_err();
        assert_eq!(err.field("latitude"), ["This field is required."]);
        assert_eq!(err.field("longitude"), ["This field is required."]);
    }

    #[test]
    fn test_out_of_range_and_garbage() {
        let mut f = form("91", "abc");
        f.object_type = Some("78".to_string());
        f.duration = Some("0".to_string());
        f.radius = Some("1.5".to_string());
        f.start_time = Some("yesterday".to_string());
        let err = SimulationParams::from_form(&f, now()).unwrap_err();
        for field in ["latitude", "longitude", "object_type", "duration", "radius", "start_time"] {
            assert!(!err.field(field).is_empty(), "expected error for {field}");
        }
    }

    #[test]
    fn test_start_time_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 6, 2, 8, 30, 0).unwrap();
        for raw in [
            "2024-06-02 08:30",
            "2024-06-02 08:30:00",
            "2024-06-02T08:30",
            "2024-06-02T08:30:00",
            "2024-06-02T10:30:00+02:00",
        ] {
            assert_eq!(parse_start_time(raw), Some(expected), "{raw}");
        }
        assert_eq!(parse_start_time("02.06.2024"), None);
    }

    #[test]
    fn test_parse_mail_arguments_filters_keys() {
        let args = parse_mail_arguments("latitude=54.1; longitude = 13.2 ;foo=bar; junk", ';');
        assert_eq!(args.len(), 2);
        assert_eq!(args["latitude"], "54.1");
        assert_eq!(args["longitude"], "13.2");
    }

    #[test]
    fn test_merge_body_overrides_subject() {
        let form = merge_mail_arguments(
            "latitude=1;longitude=2;radius=500",
            "radius=2000\r\nduration=6\n",
        );
        assert_eq!(form.latitude.as_deref(), Some("1"));
        assert_eq!(form.longitude.as_deref(), Some("2"));
        assert_eq!(form.radius.as_deref(), Some("2000"));
        assert_eq!(form.duration.as_deref(), Some("6"));
        assert_eq!(form.object_type, None);
    }

    #[test]
    fn test_form_accepts_json_numbers() {
        let form: SimulationForm =
            serde_json::from_str(r#"{"latitude": 54.5, "longitude": "13.1", "radius": 250}"#).unwrap();
        assert_eq!(form.latitude.as_deref(), Some("54.5"));
        assert_eq!(form.radius.as_deref(), Some("250"));
        assert_eq!(form.duration, None);
    }

    #[test]
    fn test_validation_errors_display() {
        let mut errors = ValidationErrors::default();
        errors.add("radius", "Enter a whole number.");
        errors.add("latitude", "This field is required.");
        assert_eq!(
            errors.to_string(),
            "latitude: This field is required.\nradius: Enter a whole number."
        );
    }
}
