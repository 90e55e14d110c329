//! Data model: signals, category scores, assessments, and dispositions.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RiskBoundaries;
use crate::constants::EARTH_RADIUS_KM;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Booking identifier assigned by the booking workflow.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(pub String);

impl BookingId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Usable as a storage key: non-empty and free of NUL bytes.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && !self.0.contains('\0')
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BookingId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Whether the coordinates lie within the valid degree ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Great-circle distance in kilometres (haversine).
    ///
    /// ```
    /// use riskgate_core::types::GeoPoint;
    /// let berlin = GeoPoint::new(52.52, 13.405);
    /// let paris = GeoPoint::new(48.8566, 2.3522);
    /// let d = berlin.distance_km(&paris);
    /// assert!((870.0..890.0).contains(&d));
    /// ```
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// Network classification reported by the IP geolocation collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkClass {
    Residential,
    Mobile,
    Business,
    Datacenter,
    Proxy,
    Vpn,
    Tor,
}

impl NetworkClass {
    /// Anonymizing proxies and hosting ranges.
    pub fn is_high_risk(&self) -> bool {
        matches!(self, Self::Datacenter | Self::Proxy | Self::Vpn | Self::Tor)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Residential => "residential",
            Self::Mobile => "mobile",
            Self::Business => "business",
            Self::Datacenter => "datacenter",
            Self::Proxy => "proxy",
            Self::Vpn => "vpn",
            Self::Tor => "tor",
        }
    }
}

impl FromStr for NetworkClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "residential" | "isp" => Ok(Self::Residential),
            "mobile" | "cellular" => Ok(Self::Mobile),
            "business" => Ok(Self::Business),
            "datacenter" | "hosting" => Ok(Self::Datacenter),
            "proxy" => Ok(Self::Proxy),
            "vpn" => Ok(Self::Vpn),
            "tor" => Ok(Self::Tor),
            other => Err(other.to_string()),
        }
    }
}

/// Normalized booking-time telemetry. Captured once per booking, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSignals {
    pub booking_id: BookingId,
    /// Lower-cased, trimmed email address.
    pub email: Option<String>,
    /// Domain part of `email`.
    pub email_domain: Option<String>,
    pub email_verified: bool,
    pub display_name: Option<String>,
    /// `+` and digits only.
    pub phone: Option<String>,
    pub phone_verified: bool,
    /// Opaque device fingerprint. `None` when blocked or spoofed.
    pub device_fingerprint: Option<String>,
    /// Emulator/automation signatures, lower-cased and sorted.
    pub automation_markers: Vec<String>,
    pub ip_address: Option<IpAddr>,
    pub ip_network: Option<NetworkClass>,
    pub ip_city: Option<String>,
    pub ip_country: Option<String>,
    pub ip_location: Option<GeoPoint>,
    pub pickup_city: Option<String>,
    pub pickup_location: Option<GeoPoint>,
    pub session_duration_secs: Option<u64>,
    pub max_idle_gap_secs: Option<u64>,
    pub date_of_birth: Option<NaiveDate>,
    pub captured_at: DateTime<Utc>,
}

impl RiskSignals {
    /// Empty signals for a booking; every optional field absent.
    pub fn empty(booking_id: BookingId, captured_at: DateTime<Utc>) -> Self {
        Self {
            booking_id,
            email: None,
            email_domain: None,
            email_verified: false,
            display_name: None,
            phone: None,
            phone_verified: false,
            device_fingerprint: None,
            automation_markers: Vec::new(),
            ip_address: None,
            ip_network: None,
            ip_city: None,
            ip_country: None,
            ip_location: None,
            pickup_city: None,
            pickup_location: None,
            session_duration_secs: None,
            max_idle_gap_secs: None,
            date_of_birth: None,
            captured_at,
        }
    }

    /// Strong identity signals usable as cluster join keys.
    ///
    /// Absent or empty values never produce a key, and neither do loopback
    /// or unspecified addresses.
    pub fn link_keys(&self) -> Vec<LinkKey> {
        let mut keys = Vec::with_capacity(3);
        if let Some(fp) = self.device_fingerprint.as_deref().filter(|s| !s.is_empty()) {
            keys.push(LinkKey::Device(fp.to_string()));
        }
        if let Some(ip) = self.ip_address.filter(|ip| !ip.is_loopback() && !ip.is_unspecified()) {
            keys.push(LinkKey::Ip(ip));
        }
        if let Some(email) = self.email.as_deref().filter(|s| !s.is_empty()) {
            keys.push(LinkKey::Email(email.to_string()));
        }
        keys
    }
}

/// Signal type through which two bookings are related.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Device,
    Ip,
    Email,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Ip => "ip",
            Self::Email => "email",
        }
    }
}

/// A concrete join key value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKey {
    Device(String),
    Ip(IpAddr),
    Email(String),
}

impl LinkKey {
    pub fn kind(&self) -> LinkKind {
        match self {
            Self::Device(_) => LinkKind::Device,
            Self::Ip(_) => LinkKind::Ip,
            Self::Email(_) => LinkKind::Email,
        }
    }

    /// Unambiguous byte encoding: `tag || len (u32 BE) || value`.
    pub fn index_bytes(&self) -> Vec<u8> {
        let (tag, value) = match self {
            Self::Device(s) => (0u8, s.as_bytes().to_vec()),
            Self::Ip(IpAddr::V4(v4)) => (1u8, v4.octets().to_vec()),
            Self::Ip(IpAddr::V6(v6)) => (1u8, v6.octets().to_vec()),
            Self::Email(s) => (2u8, s.as_bytes().to_vec()),
        };
        let mut out = Vec::with_capacity(5 + value.len());
        out.push(tag);
        out.extend_from_slice(&(value.len() as u32).to_be_bytes());
        out.extend_from_slice(&value);
        out
    }
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

/// Scoring dimension. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Email,
    Session,
    Device,
    Location,
    Velocity,
}

impl Category {
    /// All categories in assessment order.
    pub const ALL: [Category; 5] = [
        Category::Email,
        Category::Session,
        Category::Device,
        Category::Location,
        Category::Velocity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Session => "session",
            Self::Device => "device",
            Self::Location => "location",
            Self::Velocity => "velocity",
        }
    }

    /// Position in [`Category::ALL`].
    pub fn index(&self) -> usize {
        match self {
            Self::Email => 0,
            Self::Session => 1,
            Self::Device => 2,
            Self::Location => 3,
            Self::Velocity => 4,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prefix of the factor added when a scorer could not produce a score.
pub const SCORER_UNAVAILABLE: &str = "scorer unavailable";

/// One category's contribution, with the factors that explain it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: Category,
    /// Score in `0..=100`.
    pub score: u8,
    pub factors: Vec<String>,
}

impl CategoryScore {
    /// Zero contribution with an explicit unavailability factor.
    pub fn unavailable(category: Category, reason: impl fmt::Display) -> Self {
        Self {
            category,
            score: 0,
            factors: vec![format!("{SCORER_UNAVAILABLE}: {reason}")],
        }
    }

    /// Whether the score came from a failed scorer rather than clean signals.
    pub fn is_unavailable(&self) -> bool {
        self.factors.iter().any(|f| f.starts_with(SCORER_UNAVAILABLE))
    }
}

/// Risk level derived from the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Level of `score` against the configured boundaries.
    ///
    /// ```
    /// use riskgate_core::config::RiskBoundaries;
    /// use riskgate_core::types::RiskLevel;
    /// let b = RiskBoundaries::default();
    /// assert_eq!(RiskLevel::from_score(29, &b), RiskLevel::Low);
    /// assert_eq!(RiskLevel::from_score(30, &b), RiskLevel::Medium);
    /// assert_eq!(RiskLevel::from_score(60, &b), RiskLevel::High);
    /// assert_eq!(RiskLevel::from_score(85, &b), RiskLevel::Critical);
    /// ```
    pub fn from_score(score: u8, boundaries: &RiskBoundaries) -> Self {
        if score >= boundaries.critical {
            Self::Critical
        } else if score >= boundaries.high {
            Self::High
        } else if score >= boundaries.medium {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Another booking in the same relationship cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedBooking {
    pub booking_id: BookingId,
    /// Overall score of its current assessment, if assessed.
    pub score: Option<u8>,
    /// Its active disposition, if any.
    pub state: Option<DispositionState>,
    /// Signal types through which it joined the cluster.
    pub links: Vec<LinkKind>,
}

/// Append-only assessment record. Recomputation adds a new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub booking_id: BookingId,
    /// Per-booking sequence, assigned by the store starting at 1.
    pub sequence: u64,
    pub overall_score: u8,
    pub risk_level: RiskLevel,
    /// One score per category in [`Category::ALL`] order.
    pub category_scores: Vec<CategoryScore>,
    pub related: Vec<RelatedBooking>,
    pub cluster_truncated: bool,
    pub computed_at: DateTime<Utc>,
}

impl RiskAssessment {
    pub fn category(&self, category: Category) -> Option<&CategoryScore> {
        self.category_scores.iter().find(|s| s.category == category)
    }

    /// Whether any scorer failed for this assessment.
    pub fn is_degraded(&self) -> bool {
        self.category_scores.iter().any(CategoryScore::is_unavailable)
    }

    /// First related booking already rejected or marked fraudulent.
    pub fn corroborating_booking(&self) -> Option<&RelatedBooking> {
        self.related
            .iter()
            .find(|r| r.state.is_some_and(|s| s.is_adverse()))
    }
}

// ---------------------------------------------------------------------------
// Dispositions
// ---------------------------------------------------------------------------

/// Moderation state of a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispositionState {
    PendingReview,
    Approved,
    Rejected,
    FlaggedForReview,
    Fraudulent,
    OverrideCleared,
}

impl DispositionState {
    /// Terminal unless cleared by an explicit override.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Fraudulent)
    }

    /// Counts as corroborating evidence for related bookings.
    pub fn is_adverse(&self) -> bool {
        self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::FlaggedForReview => "flagged_for_review",
            Self::Fraudulent => "fraudulent",
            Self::OverrideCleared => "override_cleared",
        }
    }
}

impl fmt::Display for DispositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A moderation decision. The latest one per booking is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disposition {
    pub booking_id: BookingId,
    /// Per-booking sequence, assigned by the store starting at 1.
    pub sequence: u64,
    pub state: DispositionState,
    /// Sequence of the assessment that triggered this disposition.
    pub assessment_ref: u64,
    /// Human actor; `None` for automatic decisions.
    pub actor: Option<String>,
    pub reason: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl Disposition {
    pub fn is_automatic(&self) -> bool {
        self.actor.is_none()
    }
}

/// Action an administrator can take on a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanAction {
    Approve,
    Reject,
    Override,
}

impl FromStr for HumanAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject),
            "override" | "override_fraud_flag" => Ok(Self::Override),
            other => Err(format!("unknown action: {other}")),
        }
    }
}
