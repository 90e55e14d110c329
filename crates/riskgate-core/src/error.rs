//! Error types for the Riskgate engine.
use thiserror::Error;

use crate::types::{BookingId, Category, DispositionState};

/// Telemetry problems found while collecting signals. Always recovered:
/// the affected field is treated as absent and scoring proceeds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("signal missing: {0}")] Missing(&'static str),
    #[error("malformed {field}: {value:?}")] Malformed { field: &'static str, value: String },
}

/// Scorer failures. Always recovered as a zero contribution with a factor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScorerError {
    #[error("{category} scorer timed out after {timeout_ms} ms")] Timeout { category: Category, timeout_ms: u64 },
    #[error("{category} scorer failed: {reason}")] Failed { category: Category, reason: String },
}

impl ScorerError {
    /// Category of the failed scorer.
    pub fn category(&self) -> Category {
        match self {
            Self::Timeout { category, .. } | Self::Failed { category, .. } => *category,
        }
    }
}

/// Rejected policy configuration. Fatal: the policy is never applied.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("category weights must sum to 1.0, got {0}")] WeightSum(f64),
    #[error("weight for {category} out of range [0, 1]: {value}")] WeightRange { category: Category, value: f64 },
    #[error("risk boundaries must be strictly increasing and <= 100: medium={medium}, high={high}, critical={critical}")] NonMonotonicBoundaries { medium: u8, high: u8, critical: u8 },
    #[error("invalid {field}: {reason}")] InvalidValue { field: &'static str, reason: String },
    #[error("invalid network {0:?}")] InvalidNetwork(String),
    #[error("load: {0}")] Load(String),
}

/// Disposition state machine failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("transition {from} -> {to} not allowed")] InvalidTransition { from: DispositionState, to: DispositionState },
    #[error("human decision requires an actor")] MissingActor,
    #[error("human decision requires a reason")] MissingReason,
    #[error("booking {0} has not been assessed yet")] NotAssessed(BookingId),
    #[error("concurrent transition on {booking} after {attempts} attempts")] Conflict { booking: BookingId, attempts: u32 },
}

#[derive(Error, Debug)]
pub enum RiskError {
    #[error(transparent)] Config(#[from] ConfigError),
    #[error(transparent)] Transition(#[from] TransitionError),
    #[error("unknown booking: {0}")] UnknownBooking(BookingId),
    #[error("signals already captured for booking {0}")] DuplicateBooking(BookingId),
    #[error("invalid booking id: {0:?}")] InvalidBookingId(String),
    #[error("storage: {0}")] Storage(String),
    #[error("corruption: {0}")] Corruption(String),
}

impl RiskError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transition(TransitionError::Conflict { .. }))
    }

    /// Whether this is a not-found result rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UnknownBooking(_))
    }
}
