//! Disposition state machine rules.
//!
//! Pure computation: given the active disposition and an assessment (or a
//! human action), decide the next state. Persisting the result, and the
//! per-booking check-and-set around it, is the store's and engine's job.
//!
//! Automatic edges only move toward stricter states:
//!
//! | From | To (automatic) |
//! |---|---|
//! | `pending_review` | `approved`, `flagged_for_review`, `fraudulent`, `rejected` (cancelled) |
//! | `flagged_for_review` | `fraudulent`, `rejected` (cancelled) |
//! | `approved` (automatic) | `flagged_for_review`, `fraudulent` |
//!
//! Human edges:
//!
//! | Action | From |
//! |---|---|
//! | approve | `pending_review`, `flagged_for_review`, `fraudulent`, `override_cleared` |
//! | reject | `pending_review`, `flagged_for_review`, `fraudulent`, `override_cleared`, `approved` |
//! | override | `fraudulent`, `rejected` |

use chrono::{DateTime, Utc};

use crate::config::Policy;
use crate::constants::CANCELLED_BEFORE_REVIEW;
use crate::error::TransitionError;
use crate::types::{BookingId, Disposition, DispositionState, HumanAction, RiskAssessment, RiskLevel};

/// A state change ready to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub booking_id: BookingId,
    /// `None` only for the initial `pending_review` disposition.
    pub from: Option<DispositionState>,
    pub to: DispositionState,
    pub actor: Option<String>,
    pub reason: Option<String>,
    pub assessment_ref: u64,
    pub at: DateTime<Utc>,
}

impl Transition {
    /// The initial `pending_review` disposition for a newly assessed booking.
    pub fn initial(assessment: &RiskAssessment, at: DateTime<Utc>) -> Self {
        Self {
            booking_id: assessment.booking_id.clone(),
            from: None,
            to: DispositionState::PendingReview,
            actor: None,
            reason: Some("awaiting evaluation".to_string()),
            assessment_ref: assessment.sequence,
            at,
        }
    }
}

/// Where a fresh `pending_review` booking goes on its own.
pub fn automatic_target(assessment: &RiskAssessment, policy: &Policy) -> (DispositionState, String) {
    let level = assessment.risk_level;
    if level == RiskLevel::Critical {
        if let Some(related) = assessment.corroborating_booking() {
            let state = related.state.map(|s| s.as_str()).unwrap_or("unknown");
            return (
                DispositionState::Fraudulent,
                format!("critical score {} corroborated by related booking {} ({state})", assessment.overall_score, related.booking_id),
            );
        }
    }
    if level >= RiskLevel::High {
        return (DispositionState::FlaggedForReview, format!("{level} risk score {}", assessment.overall_score));
    }

    let threshold = policy.config().auto_approve_threshold;
    let critical = policy.boundaries().critical;
    let critical_category = assessment.category_scores.iter().find(|s| s.score >= critical);
    match critical_category {
        None if assessment.overall_score < threshold => (
            DispositionState::Approved,
            format!("score {} below auto-approve threshold {threshold}", assessment.overall_score),
        ),
        Some(c) => (
            DispositionState::PendingReview,
            format!("{} category score {} requires review", c.category, c.score),
        ),
        None => (
            DispositionState::PendingReview,
            format!("score {} requires review", assessment.overall_score),
        ),
    }
}

/// Whether an automatic move `from -> to` is permitted.
///
/// `from_automatic` is false when the active disposition was set by a human;
/// human decisions are never revised automatically except by cancellation.
pub fn automatic_allowed(from: DispositionState, from_automatic: bool, to: DispositionState) -> bool {
    use DispositionState::*;
    match (from, to) {
        (PendingReview, Approved | FlaggedForReview | Fraudulent) => true,
        (FlaggedForReview, Fraudulent) => from_automatic,
        (Approved, FlaggedForReview | Fraudulent) => from_automatic,
        _ => false,
    }
}

/// Next automatic transition for `current`, if any.
pub fn automatic_transition(
    current: &Disposition,
    assessment: &RiskAssessment,
    policy: &Policy,
    cancelled: bool,
    at: DateTime<Utc>,
) -> Option<Transition> {
    let (to, reason) = if cancelled {
        match current.state {
            DispositionState::PendingReview | DispositionState::FlaggedForReview => {
                (DispositionState::Rejected, CANCELLED_BEFORE_REVIEW.to_string())
            }
            _ => return None,
        }
    } else {
        let (to, reason) = automatic_target(assessment, policy);
        if !automatic_allowed(current.state, current.is_automatic(), to) {
            return None;
        }
        (to, reason)
    };

    Some(Transition {
        booking_id: current.booking_id.clone(),
        from: Some(current.state),
        to,
        actor: None,
        reason: Some(reason),
        assessment_ref: assessment.sequence,
        at,
    })
}

/// Target state of a human `action` taken on `from`.
pub fn human_target(from: DispositionState, action: HumanAction) -> Result<DispositionState, TransitionError> {
    use DispositionState::*;
    let to = match action {
        HumanAction::Approve => Approved,
        HumanAction::Reject => Rejected,
        HumanAction::Override => OverrideCleared,
    };
    let allowed = match action {
        HumanAction::Approve => matches!(from, PendingReview | FlaggedForReview | Fraudulent | OverrideCleared),
        HumanAction::Reject => matches!(from, PendingReview | FlaggedForReview | Fraudulent | OverrideCleared | Approved),
        HumanAction::Override => matches!(from, Fraudulent | Rejected),
    };
    if allowed {
        Ok(to)
    } else {
        Err(TransitionError::InvalidTransition { from, to })
    }
}

/// Build a human transition, requiring a non-blank actor and reason.
pub fn human_transition(
    current: &Disposition,
    action: HumanAction,
    actor: &str,
    reason: &str,
    assessment_ref: u64,
    at: DateTime<Utc>,
) -> Result<Transition, TransitionError> {
    let actor = actor.trim();
    let reason = reason.trim();
    if actor.is_empty() {
        return Err(TransitionError::MissingActor);
    }
    if reason.is_empty() {
        return Err(TransitionError::MissingReason);
    }
    let to = human_target(current.state, action)?;
    Ok(Transition {
        booking_id: current.booking_id.clone(),
        from: Some(current.state),
        to,
        actor: Some(actor.to_string()),
        reason: Some(reason.to_string()),
        assessment_ref,
        at,
    })
}
