// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire format for timestamps
//!
//! Every persisted timestamp is UTC, truncated to microsecond precision, and
//! rendered RFC3339 with trailing fractional zeros trimmed and a `Z` suffix
//! (`2026-01-02T03:04:05.25Z`). Checksums hash this exact string, so the
//! formatting here is part of the wire contract.

use chrono::{DateTime, Timelike, Utc};

/// Truncate a timestamp to microsecond precision.
pub fn truncate_us(t: DateTime<Utc>) -> DateTime<Utc> {
    let ns = t.nanosecond();
    t.with_nanosecond(ns / 1_000 * 1_000).unwrap_or(t)
}

/// Format a timestamp in the wire form.
///
/// The fractional second is omitted entirely when zero, otherwise printed
/// with trailing zeros removed.
pub fn format_rfc3339_nano(t: DateTime<Utc>) -> String {
    let t = truncate_us(t);
    let mut out = t.format("%Y-%m-%dT%H:%M:%S").to_string();
    let ns = t.nanosecond();
    if ns > 0 {
        let frac = format!("{ns:09}");
        out.push('.');
        out.push_str(frac.trim_end_matches('0'));
    }
    out.push('Z');
    out
}

/// Serde adapter for `Meta` and journal `t` fields.
pub mod rfc3339 {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(t: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_rfc3339_nano(*t))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "timefmt_tests.rs"]
mod tests;
