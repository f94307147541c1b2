// Copyright (C) 2025 The opendrift-leeway-webgui contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Degrees-minutes-seconds coordinate handling.
//!
//! Users paste coordinates straight from charts and GPS units, so intake
//! accepts both `54.1833` and `54°11'0"N`. Anything containing a degree sign
//! is converted to decimal degrees; everything else passes through as-is and
//! is parsed later by [`crate::params`].

use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;

const DEGREE_SIGN: char = '°';

const DMS_PATTERN: &str = r#"(?x)
    ^\s*
    (?P<pre>[NSEWnsew])?\s*
    (?P<sign>[-+])?\s*
    (?P<deg>\d+(?:\.\d+)?)\s*°\s*
    (?:(?P<min>\d+(?:\.\d+)?)\s*['′]\s*)?
    (?:(?P<sec>\d+(?:\.\d+)?)\s*(?:"|″|''|′′)\s*)?
    (?P<post>[NSEWnsew])?
    \s*$
"#;

static DMS: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| Regex::new(DMS_PATTERN));

fn invalid(input: &str, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidCoordinate {
        input: input.to_string(),
        reason: reason.into(),
    }
}

/// Convert a DMS coordinate such as `54°11'0"N` or `-13° 30.5'` to decimal degrees.
///
/// South and west hemispheres, as well as a leading `-`, yield negative values.
pub fn dms_to_decimal(text: &str) -> Result<f64, CoreError> {
    let re = DMS
        .as_ref()
        .map_err(|e| invalid(text, format!("pattern unavailable: {e}")))?;
    let caps = re
        .captures(text)
        .ok_or_else(|| invalid(text, "not a degrees-minutes-seconds value"))?;

    let number = |name: &str| -> Result<f64, CoreError> {
        caps.name(name)
            .map(|m| m.as_str().parse::<f64>())
            .transpose()
            .map(|v| v.unwrap_or(0.0))
            .map_err(|e| invalid(text, format!("bad {name}: {e}")))
    };

    let degrees = number("deg")?;
    let minutes = number("min")?;
    let seconds = number("sec")?;
    if minutes >= 60.0 {
        return Err(invalid(text, "minutes must be below 60"));
    }
    if seconds >= 60.0 {
        return Err(invalid(text, "seconds must be below 60"));
    }

    let hemisphere = match (caps.name("pre"), caps.name("post")) {
        (Some(_), Some(_)) => return Err(invalid(text, "hemisphere given twice")),
        (Some(h), None) | (None, Some(h)) => h.as_str().chars().next(),
        (None, None) => None,
    };
    let negative = caps.name("sign").is_some_and(|s| s.as_str() == "-")
        || matches!(hemisphere, Some('S' | 's' | 'W' | 'w'));

    let value = degrees + minutes / 60.0 + seconds / 3600.0;
    Ok(if negative { -value } else { value })
}

/// Convert to decimal when the text carries a degree sign, otherwise return it trimmed.
pub fn normalize_dms2dec(text: &str) -> Result<String, CoreError> {
    if text.contains(DEGREE_SIGN) {
        dms_to_decimal(text).map(|v| v.to_string())
    } else {
        Ok(text.trim().to_string())
    }
}
