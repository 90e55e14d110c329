//! Trait interfaces between the engine and its collaborators.
//!
//! - [`SignalHistory`]: read-only view over historical signals, assessments
//!   and dispositions (the clusterer's query interface)
//! - [`DispositionListener`]: booking workflow hooks fired after a
//!   disposition is recorded

use tracing::info;

use crate::error::RiskError;
use crate::types::{BookingId, Disposition, DispositionState, LinkKey, RiskAssessment, RiskSignals};

/// Read-only view of recorded booking history.
///
/// Implemented by every store. The clusterer only ever sees this trait, so
/// it can be pointed at a snapshot without knowing the backing engine.
pub trait SignalHistory {
    /// Captured signals for a booking, if any.
    fn signals(&self, booking: &BookingId) -> Result<Option<RiskSignals>, RiskError>;

    /// Every booking whose signals carry `key`, sorted by id.
    fn bookings_with_key(&self, key: &LinkKey) -> Result<Vec<BookingId>, RiskError>;

    /// The current (latest) assessment for a booking.
    fn latest_assessment(&self, booking: &BookingId) -> Result<Option<RiskAssessment>, RiskError>;

    /// The active (latest) disposition for a booking.
    fn current_disposition(&self, booking: &BookingId) -> Result<Option<Disposition>, RiskError>;

    /// Last known overall score.
    ///
    /// Default implementation delegates to [`latest_assessment`](Self::latest_assessment).
    fn latest_score(&self, booking: &BookingId) -> Result<Option<u8>, RiskError> {
        Ok(self.latest_assessment(booking)?.map(|a| a.overall_score))
    }

    /// Active disposition state.
    ///
    /// Default implementation delegates to [`current_disposition`](Self::current_disposition).
    fn current_state(&self, booking: &BookingId) -> Result<Option<DispositionState>, RiskError> {
        Ok(self.current_disposition(booking)?.map(|d| d.state))
    }
}

/// Hooks into the booking workflow. All methods default to no-ops.
///
/// Called after the disposition is durable; failures inside a listener are
/// the listener's own concern and never roll back the decision.
pub trait DispositionListener: Send + Sync {
    /// The booking may proceed to confirmation.
    fn booking_approved(&self, _disposition: &Disposition) {}

    /// The booking was rejected or marked fraudulent: send the cancellation
    /// notice and release any held payment authorization.
    fn booking_blocked(&self, _disposition: &Disposition) {}

    /// The booking needs a human reviewer.
    fn review_requested(&self, _disposition: &Disposition) {}

    /// A prior block was cleared by an administrator.
    fn override_cleared(&self, _disposition: &Disposition) {}
}

/// Dispatch `disposition` to the matching listener hook.
pub fn notify(listener: &dyn DispositionListener, disposition: &Disposition) {
    match disposition.state {
        DispositionState::Approved => listener.booking_approved(disposition),
        DispositionState::Rejected | DispositionState::Fraudulent => listener.booking_blocked(disposition),
        DispositionState::FlaggedForReview => listener.review_requested(disposition),
        DispositionState::OverrideCleared => listener.override_cleared(disposition),
        DispositionState::PendingReview => {}
    }
}

/// Listener that only logs. Used when no workflow is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl DispositionListener for TracingListener {
    fn booking_approved(&self, d: &Disposition) {
        info!(booking = %d.booking_id, sequence = d.sequence, "booking approved, unblocking workflow");
    }

    fn booking_blocked(&self, d: &Disposition) {
        info!(booking = %d.booking_id, state = %d.state, "booking blocked, cancellation notice and authorization release");
    }

    fn review_requested(&self, d: &Disposition) {
        info!(booking = %d.booking_id, "booking queued for review");
    }

    fn override_cleared(&self, d: &Disposition) {
        info!(booking = %d.booking_id, actor = d.actor.as_deref().unwrap_or("-"), "block cleared by override");
    }
}
