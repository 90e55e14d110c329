//! Engine constants. Scores are integers in `0..=100`; weights are basis points.

/// Upper bound of every score (category and overall).
pub const MAX_SCORE: u8 = 100;

/// Basis-point denominator for category weights (10 000 BPS = 1.0).
pub const BPS_PRECISION: u32 = 10_000;

/// Tolerance when checking that configured weights sum to 1.0.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Policy defaults
// ---------------------------------------------------------------------------

/// Default lookback window for relationship clustering, in days.
pub const DEFAULT_LOOKBACK_WINDOW_DAYS: u32 = 90;

/// Default per-scorer timeout, in milliseconds.
pub const DEFAULT_SCORER_TIMEOUT_MS: u64 = 2_000;

/// Default score below which a booking is approved without human review.
pub const DEFAULT_AUTO_APPROVE_THRESHOLD: u8 = 30;

/// Default lower bound of the `medium` risk level.
pub const DEFAULT_MEDIUM_BOUNDARY: u8 = 30;

/// Default lower bound of the `high` risk level.
pub const DEFAULT_HIGH_BOUNDARY: u8 = 60;

/// Default lower bound of the `critical` risk level.
pub const DEFAULT_CRITICAL_BOUNDARY: u8 = 85;

/// Default number of attempts for an optimistic disposition transition.
pub const DEFAULT_MAX_TRANSITION_RETRIES: u32 = 3;

/// Default upper bound on relationship cluster size.
pub const DEFAULT_MAX_CLUSTER_SIZE: usize = 500;

pub const DEFAULT_WEIGHT_EMAIL: f64 = 0.20;
pub const DEFAULT_WEIGHT_SESSION: f64 = 0.15;
pub const DEFAULT_WEIGHT_DEVICE: f64 = 0.20;
pub const DEFAULT_WEIGHT_LOCATION: f64 = 0.15;
pub const DEFAULT_WEIGHT_VELOCITY: f64 = 0.30;

// ---------------------------------------------------------------------------
// Scorer defaults
// ---------------------------------------------------------------------------

/// Sessions shorter than this are faster than a human can fill the form.
pub const DEFAULT_MIN_SESSION_SECS: u64 = 30;

/// Idle gaps longer than this suggest a scripted replay.
pub const DEFAULT_MAX_IDLE_GAP_SECS: u64 = 1_800;

/// Maximum tolerated distance between IP geolocation and pickup location.
pub const DEFAULT_MAX_PICKUP_DISTANCE_KM: u32 = 500;

/// Number of distinct other emails on one fingerprint that marks reuse.
pub const DEFAULT_FINGERPRINT_EMAIL_THRESHOLD: usize = 3;

// ---------------------------------------------------------------------------
// Factor weights
// ---------------------------------------------------------------------------

/// Penalty for a required signal that was not captured.
pub const WEIGHT_EMAIL_MISSING: u32 = 40;
pub const WEIGHT_DISPOSABLE_DOMAIN: u32 = 60;
pub const WEIGHT_FREE_MAIL_DOMAIN: u32 = 10;
pub const WEIGHT_EMAIL_UNVERIFIED: u32 = 25;
pub const WEIGHT_SUSPICIOUS_LOCAL_PART: u32 = 15;
pub const WEIGHT_NAME_MISMATCH: u32 = 10;
pub const WEIGHT_PHONE_MISSING: u32 = 10;
pub const WEIGHT_PHONE_UNVERIFIED: u32 = 10;
pub const WEIGHT_DOB_MISSING: u32 = 5;
pub const WEIGHT_DOB_IMPLAUSIBLE: u32 = 15;

/// Missing fingerprint: fingerprinting was blocked or spoofed.
pub const WEIGHT_FINGERPRINT_MISSING: u32 = 90;
pub const WEIGHT_AUTOMATION_MARKER: u32 = 50;
pub const WEIGHT_EMULATOR_MARKER: u32 = 35;
pub const WEIGHT_FINGERPRINT_REUSE: u32 = 35;
/// Added per distinct email beyond the reuse threshold.
pub const WEIGHT_FINGERPRINT_REUSE_STEP: u32 = 5;
pub const WEIGHT_FINGERPRINT_REUSE_CAP: u32 = 50;

pub const WEIGHT_SESSION_MISSING: u32 = 30;
/// Base penalty for a session below the minimum duration.
pub const WEIGHT_SHORT_SESSION_BASE: u32 = 70;
/// Extra penalty scaled by how far below the minimum the session was.
pub const WEIGHT_SHORT_SESSION_SCALE: u32 = 30;
pub const WEIGHT_IDLE_GAP: u32 = 30;

pub const WEIGHT_IP_MISSING: u32 = 30;
pub const WEIGHT_HIGH_RISK_NETWORK: u32 = 70;
pub const WEIGHT_PICKUP_DISTANCE: u32 = 35;
pub const WEIGHT_CITY_MISMATCH: u32 = 15;

/// Velocity points per related booking in the cluster.
pub const VELOCITY_PER_RELATED: u32 = 20;
pub const VELOCITY_VOLUME_CAP: u32 = 40;
/// Contagion points when every related booking was rejected or fraudulent.
pub const VELOCITY_CONTAGION_MAX: u32 = 60;
/// Contagion ceiling when exactly one related booking was rejected or fraudulent.
pub const VELOCITY_SINGLE_CONTAGION_CAP: u32 = 50;

// ---------------------------------------------------------------------------
// Identity plausibility
// ---------------------------------------------------------------------------

pub const MIN_RENTER_AGE_YEARS: i32 = 18;
pub const MAX_PLAUSIBLE_AGE_YEARS: i32 = 110;

/// Mean Earth radius used by the haversine distance.
pub const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Reason recorded when a booking is cancelled before its review finished.
pub const CANCELLED_BEFORE_REVIEW: &str = "booking cancelled before review";
