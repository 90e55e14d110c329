//! Persistent booking history: signals, assessments, dispositions, ledger.
//!
//! [`RiskStore`] is append-only. Signals are written once per booking;
//! assessments and dispositions get a per-booking sequence starting at 1;
//! every disposition is paired with a sealed [`LedgerEntry`].
//!
//! [`MemoryRiskStore`] backs tests; the node crate provides a RocksDB store.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::decision::Transition;
use crate::error::{RiskError, TransitionError};
use crate::ledger::{GENESIS_PREV_HASH, LedgerEntry};
use crate::traits::SignalHistory;
use crate::types::{BookingId, Disposition, LinkKey, RiskAssessment, RiskSignals};

/// Mutable booking history.
pub trait RiskStore: SignalHistory + Send + Sync {
    /// Record the signals captured for a new booking and index its join keys.
    ///
    /// # Errors
    ///
    /// - [`RiskError::InvalidBookingId`] if the id is empty or contains NUL
    /// - [`RiskError::DuplicateBooking`] if signals were already captured
    fn append_signals(&mut self, signals: RiskSignals) -> Result<(), RiskError>;

    /// Append an assessment, assigning the next sequence number.
    ///
    /// Returns the stored record. Fails with [`RiskError::UnknownBooking`]
    /// if the booking has no signals.
    fn append_assessment(&mut self, assessment: RiskAssessment) -> Result<RiskAssessment, RiskError>;

    /// Every assessment for a booking, in sequence order.
    fn assessments(&self, booking: &BookingId) -> Result<Vec<RiskAssessment>, RiskError>;

    /// Check-and-set a disposition transition.
    ///
    /// `expected_sequence` is the sequence of the active disposition the
    /// caller read (`None` if it saw none). If another writer got there
    /// first, or `transition.from` no longer matches, the write is refused
    /// with [`TransitionError::Conflict`]. The disposition and its ledger
    /// entry are written together or not at all.
    fn record_decision(&mut self, transition: &Transition, expected_sequence: Option<u64>) -> Result<Disposition, RiskError>;

    /// Every disposition for a booking, in sequence order.
    fn dispositions(&self, booking: &BookingId) -> Result<Vec<Disposition>, RiskError>;

    /// The booking's ledger chain, in sequence order.
    fn ledger(&self, booking: &BookingId) -> Result<Vec<LedgerEntry>, RiskError>;

    /// Number of bookings with captured signals.
    fn booking_count(&self) -> Result<usize, RiskError>;

    /// Record that the workflow cancelled `booking`.
    ///
    /// The booking need not have signals yet. A repeated cancellation keeps
    /// the first time.
    fn record_cancellation(&mut self, booking: &BookingId, at: DateTime<Utc>) -> Result<(), RiskError>;

    /// When `booking` was cancelled, if it was.
    fn cancelled_at(&self, booking: &BookingId) -> Result<Option<DateTime<Utc>>, RiskError>;
}

/// Validate a check-and-set against the active disposition and return the
/// sequence the new disposition will take.
pub fn check_transition(
    current: Option<&Disposition>,
    transition: &Transition,
    expected_sequence: Option<u64>,
) -> Result<u64, RiskError> {
    let current_seq = current.map(|d| d.sequence);
    let current_state = current.map(|d| d.state);
    if current_seq != expected_sequence || current_state != transition.from {
        return Err(TransitionError::Conflict { booking: transition.booking_id.clone(), attempts: 1 }.into());
    }
    Ok(current_seq.unwrap_or(0) + 1)
}

/// The disposition record produced by `transition` at `sequence`.
pub fn disposition_for(transition: &Transition, sequence: u64) -> Disposition {
    Disposition {
        booking_id: transition.booking_id.clone(),
        sequence,
        state: transition.to,
        assessment_ref: transition.assessment_ref,
        actor: transition.actor.clone(),
        reason: transition.reason.clone(),
        decided_at: transition.at,
    }
}

/// In-memory booking history for testing.
///
/// Everything lives in `HashMap`s with no persistence.
#[derive(Debug, Default)]
pub struct MemoryRiskStore {
    signals: HashMap<BookingId, RiskSignals>,
    /// Join key → bookings carrying it.
    link_index: HashMap<LinkKey, BTreeSet<BookingId>>,
    assessments: HashMap<BookingId, Vec<RiskAssessment>>,
    dispositions: HashMap<BookingId, Vec<Disposition>>,
    ledger: HashMap<BookingId, Vec<LedgerEntry>>,
    cancellations: HashMap<BookingId, DateTime<Utc>>,
}

impl MemoryRiskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn require_booking(&self, booking: &BookingId) -> Result<(), RiskError> {
        if self.signals.contains_key(booking) {
            Ok(())
        } else {
            Err(RiskError::UnknownBooking(booking.clone()))
        }
    }
}

impl SignalHistory for MemoryRiskStore {
    fn signals(&self, booking: &BookingId) -> Result<Option<RiskSignals>, RiskError> {
        Ok(self.signals.get(booking).cloned())
    }

    fn bookings_with_key(&self, key: &LinkKey) -> Result<Vec<BookingId>, RiskError> {
        Ok(self
            .link_index
            .get(key)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn latest_assessment(&self, booking: &BookingId) -> Result<Option<RiskAssessment>, RiskError> {
        Ok(self.assessments.get(booking).and_then(|v| v.last().cloned()))
    }

    fn current_disposition(&self, booking: &BookingId) -> Result<Option<Disposition>, RiskError> {
        Ok(self.dispositions.get(booking).and_then(|v| v.last().cloned()))
    }
}

impl RiskStore for MemoryRiskStore {
    fn append_signals(&mut self, signals: RiskSignals) -> Result<(), RiskError> {
        let id = signals.booking_id.clone();
        if !id.is_valid() {
            return Err(RiskError::InvalidBookingId(id.0));
        }
        if self.signals.contains_key(&id) {
            return Err(RiskError::DuplicateBooking(id));
        }
        for key in signals.link_keys() {
            self.link_index.entry(key).or_default().insert(id.clone());
        }
        self.signals.insert(id, signals);
        Ok(())
    }

    fn append_assessment(&mut self, mut assessment: RiskAssessment) -> Result<RiskAssessment, RiskError> {
        self.require_booking(&assessment.booking_id)?;
        let history = self.assessments.entry(assessment.booking_id.clone()).or_default();
        assessment.sequence = history.len() as u64 + 1;
        history.push(assessment.clone());
        Ok(assessment)
    }

    fn assessments(&self, booking: &BookingId) -> Result<Vec<RiskAssessment>, RiskError> {
        Ok(self.assessments.get(booking).cloned().unwrap_or_default())
    }

    fn record_decision(&mut self, transition: &Transition, expected_sequence: Option<u64>) -> Result<Disposition, RiskError> {
        let id = &transition.booking_id;
        self.require_booking(id)?;
        if !self.assessments.contains_key(id) {
            return Err(TransitionError::NotAssessed(id.clone()).into());
        }

        let current = self.dispositions.get(id).and_then(|v| v.last());
        let sequence = check_transition(current, transition, expected_sequence)?;
        let prev_hash = self
            .ledger
            .get(id)
            .and_then(|v| v.last())
            .map(|e| e.entry_hash)
            .unwrap_or(GENESIS_PREV_HASH);
        let entry = LedgerEntry::seal(transition, sequence, prev_hash)?;
        let disposition = disposition_for(transition, sequence);

        self.dispositions.entry(id.clone()).or_default().push(disposition.clone());
        self.ledger.entry(id.clone()).or_default().push(entry);
        Ok(disposition)
    }

    fn dispositions(&self, booking: &BookingId) -> Result<Vec<Disposition>, RiskError> {
        Ok(self.dispositions.get(booking).cloned().unwrap_or_default())
    }

    fn ledger(&self, booking: &BookingId) -> Result<Vec<LedgerEntry>, RiskError> {
        Ok(self.ledger.get(booking).cloned().unwrap_or_default())
    }

    fn booking_count(&self) -> Result<usize, RiskError> {
        Ok(self.signals.len())
    }

    fn record_cancellation(&mut self, booking: &BookingId, at: DateTime<Utc>) -> Result<(), RiskError> {
        if !booking.is_valid() {
            return Err(RiskError::InvalidBookingId(booking.0.clone()));
        }
        self.cancellations.entry(booking.clone()).or_insert(at);
        Ok(())
    }

    fn cancelled_at(&self, booking: &BookingId) -> Result<Option<DateTime<Utc>>, RiskError> {
        Ok(self.cancellations.get(booking).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::verify_chain;
    use crate::types::{DispositionState, RiskLevel};

    fn ts() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn signals(id: &str, fp: Option<&str>) -> RiskSignals {
        let mut s = RiskSignals::empty(BookingId::new(id), ts());
        s.device_fingerprint = fp.map(String::from);
        s
    }

    fn assessment(id: &str) -> RiskAssessment {
        RiskAssessment {
            booking_id: BookingId::new(id),
            sequence: 0,
            overall_score: 10,
            risk_level: RiskLevel::Low,
            category_scores: vec![],
            related: vec![],
            cluster_truncated: false,
            computed_at: ts(),
        }
    }

    fn transition(id: &str, from: Option<DispositionState>, to: DispositionState) -> Transition {
        Transition {
            booking_id: BookingId::new(id),
            from,
            to,
            actor: None,
            reason: Some("test".into()),
            assessment_ref: 1,
            at: ts(),
        }
    }

    fn assessed_store(id: &str) -> MemoryRiskStore {
        let mut store = MemoryRiskStore::new();
        store.append_signals(signals(id, Some("fp"))).unwrap();
        store.append_assessment(assessment(id)).unwrap();
        store
    }

    #[test]
    fn duplicate_and_invalid_signals_rejected() {
        let mut store = MemoryRiskStore::new();
        store.append_signals(signals("a", None)).unwrap();
        assert!(matches!(store.append_signals(signals("a", None)), Err(RiskError::DuplicateBooking(_))));
        assert!(matches!(store.append_signals(signals("", None)), Err(RiskError::InvalidBookingId(_))));
        assert_eq!(store.booking_count().unwrap(), 1);
    }

    #[test]
    fn link_index_returns_sorted_members() {
        let mut store = MemoryRiskStore::new();
        store.append_signals(signals("c", Some("fp"))).unwrap();
        store.append_signals(signals("a", Some("fp"))).unwrap();
        store.append_signals(signals("b", None)).unwrap();
        let ids = store.bookings_with_key(&LinkKey::Device("fp".into())).unwrap();
        assert_eq!(ids, vec![BookingId::new("a"), BookingId::new("c")]);
        assert!(store.bookings_with_key(&LinkKey::Device("other".into())).unwrap().is_empty());
    }

    #[test]
    fn assessments_are_sequenced() {
        let mut store = assessed_store("a");
        let second = store.append_assessment(assessment("a")).unwrap();
        assert_eq!(second.sequence, 2);
        let seqs: Vec<u64> = store.assessments(&BookingId::new("a")).unwrap().iter().map(|a| a.sequence).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(store.latest_score(&BookingId::new("a")).unwrap(), Some(10));
    }

    #[test]
    fn assessment_for_unknown_booking_fails() {
        let mut store = MemoryRiskStore::new();
        assert!(matches!(store.append_assessment(assessment("zz")), Err(RiskError::UnknownBooking(_))));
    }

    #[test]
    fn decision_requires_assessment() {
        let mut store = MemoryRiskStore::new();
        store.append_signals(signals("a", None)).unwrap();
        let err = store.record_decision(&transition("a", None, DispositionState::PendingReview), None).unwrap_err();
        assert!(matches!(err, RiskError::Transition(TransitionError::NotAssessed(_))));
    }

    #[test]
    fn check_and_set_refuses_stale_writers() {
        let mut store = assessed_store("a");
        let first = store.record_decision(&transition("a", None, DispositionState::PendingReview), None).unwrap();
        assert_eq!(first.sequence, 1);

        // Second initial write sees stale state.
        let err = store.record_decision(&transition("a", None, DispositionState::PendingReview), None).unwrap_err();
        assert!(err.is_retryable());

        // Wrong from-state with the right sequence is also a conflict.
        let err = store
            .record_decision(&transition("a", Some(DispositionState::Approved), DispositionState::Rejected), Some(1))
            .unwrap_err();
        assert!(err.is_retryable());

        let second = store
            .record_decision(&transition("a", Some(DispositionState::PendingReview), DispositionState::Approved), Some(1))
            .unwrap();
        assert_eq!(second.sequence, 2);
        assert_eq!(store.current_state(&BookingId::new("a")).unwrap(), Some(DispositionState::Approved));
    }

    #[test]
    fn cancellation_keeps_first_time() {
        let mut store = MemoryRiskStore::new();
        let id = BookingId::new("later");
        assert_eq!(store.cancelled_at(&id).unwrap(), None);
        store.record_cancellation(&id, ts()).unwrap();
        store.record_cancellation(&id, ts() + chrono::Duration::hours(1)).unwrap();
        assert_eq!(store.cancelled_at(&id).unwrap(), Some(ts()));
        assert!(matches!(
            store.record_cancellation(&BookingId::new(""), ts()),
            Err(RiskError::InvalidBookingId(_))
        ));
    }

    #[test]
    fn ledger_tracks_dispositions() {
        let mut store = assessed_store("a");
        store.record_decision(&transition("a", None, DispositionState::PendingReview), None).unwrap();
        store
            .record_decision(&transition("a", Some(DispositionState::PendingReview), DispositionState::FlaggedForReview), Some(1))
            .unwrap();
        let ledger = store.ledger(&BookingId::new("a")).unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[1].from_state, Some(DispositionState::PendingReview));
        assert!(verify_chain(&ledger).is_ok());
        assert_eq!(store.dispositions(&BookingId::new("a")).unwrap().len(), 2);
    }
}
