//! Signal collection: raw booking telemetry to normalized [`RiskSignals`].
//!
//! The booking workflow posts telemetry as loosely typed strings. Collection
//! never fails: absent or malformed fields become `None` and are reported as
//! [`SignalError`]s so scoring proceeds with reduced confidence.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SignalError;
use crate::types::{BookingId, GeoPoint, NetworkClass, RiskSignals};

/// Fingerprint values that browsers and SDKs emit when fingerprinting fails.
const PLACEHOLDER_FINGERPRINTS: &[&str] = &["null", "undefined", "unknown", "none", "n/a"];

/// Raw telemetry as received from the booking workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawTelemetry {
    pub email: Option<String>,
    pub email_verified: bool,
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub phone_verified: bool,
    pub device_fingerprint: Option<String>,
    pub automation_markers: Vec<String>,
    pub ip_address: Option<String>,
    pub ip_network: Option<String>,
    pub ip_city: Option<String>,
    pub ip_country: Option<String>,
    pub ip_lat: Option<f64>,
    pub ip_lon: Option<f64>,
    pub pickup_city: Option<String>,
    pub pickup_lat: Option<f64>,
    pub pickup_lon: Option<f64>,
    pub session_duration_secs: Option<f64>,
    pub max_idle_gap_secs: Option<f64>,
    /// `YYYY-MM-DD`.
    pub date_of_birth: Option<String>,
}

/// Result of collecting one booking's telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct Collected {
    pub signals: RiskSignals,
    pub problems: Vec<SignalError>,
}

/// Normalize `raw` into [`RiskSignals`] captured at `captured_at`.
pub fn collect(booking_id: BookingId, raw: &RawTelemetry, captured_at: DateTime<Utc>) -> Collected {
    let mut problems = Vec::new();
    let mut signals = RiskSignals::empty(booking_id, captured_at);

    match text(&raw.email) {
        None => problems.push(SignalError::Missing("email")),
        Some(email) => {
            let email = email.to_lowercase();
            match email.rsplit_once('@') {
                Some((local, domain)) if !local.is_empty() && domain.contains('.') => {
                    signals.email_domain = Some(domain.to_string());
                    signals.email = Some(email);
                }
                _ => problems.push(SignalError::Malformed { field: "email", value: email }),
            }
        }
    }
    signals.email_verified = raw.email_verified && signals.email.is_some();
    signals.display_name = text(&raw.display_name);

    match text(&raw.phone) {
        None => problems.push(SignalError::Missing("phone")),
        Some(phone) => match normalize_phone(&phone) {
            Some(p) => signals.phone = Some(p),
            None => problems.push(SignalError::Malformed { field: "phone", value: phone }),
        },
    }
    signals.phone_verified = raw.phone_verified && signals.phone.is_some();

    match text(&raw.device_fingerprint) {
        Some(fp) if !is_placeholder_fingerprint(&fp) => signals.device_fingerprint = Some(fp),
        _ => problems.push(SignalError::Missing("device fingerprint")),
    }

    let mut markers: Vec<String> = raw
        .automation_markers
        .iter()
        .map(|m| m.trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty())
        .collect();
    markers.sort();
    markers.dedup();
    signals.automation_markers = markers;

    match text(&raw.ip_address) {
        None => problems.push(SignalError::Missing("ip address")),
        Some(ip) => match ip.parse() {
            Ok(addr) => signals.ip_address = Some(addr),
            Err(_) => problems.push(SignalError::Malformed { field: "ip address", value: ip }),
        },
    }
    if let Some(class) = text(&raw.ip_network) {
        match class.parse::<NetworkClass>() {
            Ok(c) => signals.ip_network = Some(c),
            Err(_) => problems.push(SignalError::Malformed { field: "ip network", value: class }),
        }
    }
    signals.ip_city = text(&raw.ip_city);
    signals.ip_country = text(&raw.ip_country).map(|c| c.to_ascii_uppercase());
    signals.ip_location = geo(raw.ip_lat, raw.ip_lon, "ip location", &mut problems);
    signals.pickup_city = text(&raw.pickup_city);
    signals.pickup_location = geo(raw.pickup_lat, raw.pickup_lon, "pickup location", &mut problems);

    signals.session_duration_secs = seconds(raw.session_duration_secs, "session duration", &mut problems);
    if signals.session_duration_secs.is_none() && raw.session_duration_secs.is_none() {
        problems.push(SignalError::Missing("session duration"));
    }
    signals.max_idle_gap_secs = seconds(raw.max_idle_gap_secs, "idle gap", &mut problems);

    match text(&raw.date_of_birth) {
        None => problems.push(SignalError::Missing("date of birth")),
        Some(dob) => match NaiveDate::parse_from_str(&dob, "%Y-%m-%d") {
            Ok(d) => signals.date_of_birth = Some(d),
            Err(_) => problems.push(SignalError::Malformed { field: "date of birth", value: dob }),
        },
    }

    for problem in &problems {
        debug!(booking = %signals.booking_id, %problem, "signals: degraded telemetry");
    }

    Collected { signals, problems }
}

/// Trimmed, non-empty, control-character-free text.
fn text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(|s| s.chars().filter(|c| !c.is_control()).collect::<String>())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn is_placeholder_fingerprint(fp: &str) -> bool {
    let lower = fp.to_ascii_lowercase();
    PLACEHOLDER_FINGERPRINTS.contains(&lower.as_str()) || fp.chars().all(|c| c == '0' || c == '-')
}

/// Keep a leading `+` and the digits; require at least 7 digits.
fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 7 {
        return None;
    }
    if raw.trim_start().starts_with('+') {
        Some(format!("+{digits}"))
    } else {
        Some(digits)
    }
}

fn geo(lat: Option<f64>, lon: Option<f64>, field: &'static str, problems: &mut Vec<SignalError>) -> Option<GeoPoint> {
    match (lat, lon) {
        (Some(lat), Some(lon)) => {
            let point = GeoPoint::new(lat, lon);
            if point.is_valid() {
                Some(point)
            } else {
                problems.push(SignalError::Malformed { field, value: format!("{lat},{lon}") });
                None
            }
        }
        (None, None) => None,
        (lat, lon) => {
            problems.push(SignalError::Malformed { field, value: format!("{lat:?},{lon:?}") });
            None
        }
    }
}

fn seconds(value: Option<f64>, field: &'static str, problems: &mut Vec<SignalError>) -> Option<u64> {
    let v = value?;
    if v.is_finite() && v >= 0.0 {
        Some(v.floor() as u64)
    } else {
        problems.push(SignalError::Malformed { field, value: v.to_string() });
        None
    }
}
