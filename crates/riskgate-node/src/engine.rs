//! Risk engine orchestration.
//!
//! [`RiskEngine`] wires the collector, scorers, clusterer, aggregator and
//! disposition rules around a [`RiskStore`] behind a `RwLock`:
//!
//! 1. signals are appended (write lock, append-only)
//! 2. a [`ScoringContext`] snapshot is taken under one read lock
//! 3. scorers run concurrently with no lock held
//! 4. the assessment is appended, then dispositions are advanced with an
//!    optimistic check-and-set, retried on conflict
//!
//! Lock guards are never held across an `.await`.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use riskgate_core::config::{EngineConfig, Policy};
use riskgate_core::decision::{Transition, automatic_transition, human_transition};
use riskgate_core::error::{RiskError, TransitionError};
use riskgate_core::ledger::verify_chain;
use riskgate_core::signals::{RawTelemetry, collect};
use riskgate_core::store::RiskStore;
use riskgate_core::traits::{DispositionListener, SignalHistory, TracingListener, notify};
use riskgate_core::types::{BookingId, Disposition, HumanAction, RelatedBooking, RiskAssessment, RiskSignals};
use riskgate_scoring::aggregate::assess;
use riskgate_scoring::cluster::build_cluster;
use riskgate_scoring::runner::score_all;
use riskgate_scoring::scorer::ScoringContext;

/// Result of a ledger verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReport {
    pub booking_id: BookingId,
    pub entries: usize,
    /// Hex hash of the last entry.
    pub tip_hash: String,
}

/// The booking risk engine.
pub struct RiskEngine<S: RiskStore> {
    store: Arc<RwLock<S>>,
    policy: RwLock<Arc<Policy>>,
    listeners: Vec<Arc<dyn DispositionListener>>,
}

impl<S: RiskStore + 'static> RiskEngine<S> {
    /// Create an engine over `store`.
    ///
    /// Fails with [`RiskError::Config`] if `config` is invalid; nothing is
    /// applied in that case. A [`TracingListener`] is attached by default.
    pub fn new(store: S, config: EngineConfig) -> Result<Self, RiskError> {
        let policy = config.into_policy()?;
        Ok(Self {
            store: Arc::new(RwLock::new(store)),
            policy: RwLock::new(Arc::new(policy)),
            listeners: vec![Arc::new(TracingListener)],
        })
    }

    /// Attach a workflow listener.
    pub fn with_listener(mut self, listener: Arc<dyn DispositionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Shared handle to the underlying store.
    pub fn store(&self) -> &Arc<RwLock<S>> {
        &self.store
    }

    /// The policy in force.
    pub fn policy(&self) -> Arc<Policy> {
        Arc::clone(&self.policy.read())
    }

    /// Validate and atomically swap in a new policy.
    ///
    /// Assessments already running finish under the policy they started with.
    pub fn reconfigure(&self, config: EngineConfig) -> Result<(), RiskError> {
        let policy = config.into_policy()?;
        *self.policy.write() = Arc::new(policy);
        info!("policy reconfigured");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Ingest
    // ------------------------------------------------------------------

    /// Normalize raw telemetry and submit it.
    pub async fn submit_telemetry(&self, booking_id: BookingId, raw: &RawTelemetry) -> Result<RiskAssessment, RiskError> {
        let collected = collect(booking_id, raw, Utc::now());
        if !collected.problems.is_empty() {
            debug!(
                booking = %collected.signals.booking_id,
                problems = collected.problems.len(),
                "telemetry collected with gaps"
            );
        }
        self.submit_signals(collected.signals).await
    }

    /// Record a new booking's signals, assess it, and apply any automatic
    /// disposition.
    pub async fn submit_signals(&self, signals: RiskSignals) -> Result<RiskAssessment, RiskError> {
        self.store.write().append_signals(signals.clone())?;
        debug!(booking = %signals.booking_id, "signals captured");
        self.evaluate(signals).await
    }

    /// Recompute the assessment against the current history.
    ///
    /// Adds a new assessment record; earlier ones are kept.
    pub async fn reevaluate(&self, booking: &BookingId) -> Result<RiskAssessment, RiskError> {
        let signals = self
            .store
            .read()
            .signals(booking)?
            .ok_or_else(|| RiskError::UnknownBooking(booking.clone()))?;
        self.evaluate(signals).await
    }

    async fn evaluate(&self, signals: RiskSignals) -> Result<RiskAssessment, RiskError> {
        let policy = self.policy();
        let ctx = {
            let store = self.store.read();
            ScoringContext::snapshot(&*store, signals, Arc::clone(&policy))?
        };
        let ctx = Arc::new(ctx);

        let scores = score_all(Arc::clone(&ctx), policy.scorer_timeout()).await;
        let assessment = assess(scores, &ctx.cluster, &policy, Utc::now());
        let stored = self.store.write().append_assessment(assessment)?;

        if stored.is_degraded() {
            warn!(booking = %stored.booking_id, sequence = stored.sequence, "assessment computed with unavailable scorers");
        }
        info!(
            booking = %stored.booking_id,
            sequence = stored.sequence,
            score = stored.overall_score,
            level = %stored.risk_level,
            related = stored.related.len(),
            "assessment recorded"
        );

        self.advance(&stored, &policy)?;
        Ok(stored)
    }

    // ------------------------------------------------------------------
    // Dispositions
    // ------------------------------------------------------------------

    /// Check-and-set `build(current)` until it lands or retries run out.
    ///
    /// `build` returns `Ok(None)` when there is nothing to record.
    fn transition_with_retry<F>(&self, booking: &BookingId, mut build: F) -> Result<Option<Disposition>, RiskError>
    where
        F: FnMut(Option<&Disposition>) -> Result<Option<Transition>, RiskError>,
    {
        let attempts = self.policy().config().max_transition_retries;
        for attempt in 1..=attempts {
            let current = self.store.read().current_disposition(booking)?;
            let Some(transition) = build(current.as_ref())? else {
                return Ok(None);
            };
            let expected = current.as_ref().map(|d| d.sequence);
            // Listeners may read the store, so the write guard ends here.
            let recorded = self.store.write().record_decision(&transition, expected);
            match recorded {
                Ok(disposition) => {
                    info!(
                        booking = %booking,
                        from = transition.from.map(|s| s.as_str()).unwrap_or("-"),
                        state = %disposition.state,
                        actor = disposition.actor.as_deref().unwrap_or("auto"),
                        sequence = disposition.sequence,
                        "disposition recorded"
                    );
                    for listener in &self.listeners {
                        notify(listener.as_ref(), &disposition);
                    }
                    return Ok(Some(disposition));
                }
                Err(e) if e.is_retryable() => {
                    debug!(booking = %booking, attempt, "transition conflict, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        warn!(booking = %booking, attempts, "transition conflict not resolved");
        Err(TransitionError::Conflict { booking: booking.clone(), attempts }.into())
    }

    /// Create the initial disposition if needed, then apply the automatic
    /// transition the assessment calls for.
    fn advance(&self, assessment: &RiskAssessment, policy: &Policy) -> Result<(), RiskError> {
        let booking = &assessment.booking_id;

        self.transition_with_retry(booking, |current| {
            Ok(match current {
                None => Some(Transition::initial(assessment, Utc::now())),
                Some(_) => None,
            })
        })?;

        self.transition_with_retry(booking, |current| {
            let Some(current) = current else {
                return Ok(None);
            };
            let cancelled = self.store.read().cancelled_at(booking)?.is_some();
            Ok(automatic_transition(current, assessment, policy, cancelled, Utc::now()))
        })?;
        Ok(())
    }

    /// Record an administrator's decision.
    ///
    /// `actor` and `reason` are mandatory; the actor is always passed in
    /// explicitly rather than read from request context.
    pub fn record_human_decision(
        &self,
        booking: &BookingId,
        action: HumanAction,
        actor: &str,
        reason: &str,
    ) -> Result<Disposition, RiskError> {
        Self::require_known(&*self.store.read(), booking)?;

        // The assessment is re-read on every attempt so a decision never
        // points behind a re-evaluation that committed first.
        let recorded = self.transition_with_retry(booking, |current| {
            let current = current.ok_or_else(|| TransitionError::NotAssessed(booking.clone()))?;
            let assessment_ref = self
                .store
                .read()
                .latest_assessment(booking)?
                .map(|a| a.sequence)
                .ok_or_else(|| TransitionError::NotAssessed(booking.clone()))?;
            Ok(Some(human_transition(current, action, actor, reason, assessment_ref, Utc::now())?))
        })?;
        recorded.ok_or_else(|| TransitionError::NotAssessed(booking.clone()).into())
    }

    /// Mark a booking cancelled by the workflow.
    ///
    /// The cancellation is persisted with the booking's history. An assessed
    /// booking still awaiting review is rejected at once. A booking not yet
    /// assessed is rejected as soon as its assessment is recorded, even
    /// across a restart. Returns the active disposition, if any.
    pub fn cancel_booking(&self, booking: &BookingId) -> Result<Option<Disposition>, RiskError> {
        if !booking.is_valid() {
            return Err(RiskError::InvalidBookingId(booking.0.clone()));
        }
        self.store.write().record_cancellation(booking, Utc::now())?;
        info!(booking = %booking, "booking cancelled");

        let assessment = self.store.read().latest_assessment(booking)?;
        let Some(assessment) = assessment else {
            return Ok(None);
        };
        let policy = self.policy();
        let recorded = self.transition_with_retry(booking, |current| {
            Ok(current.and_then(|c| automatic_transition(c, &assessment, &policy, true, Utc::now())))
        })?;
        match recorded {
            Some(d) => Ok(Some(d)),
            None => self.current_disposition(booking),
        }
    }

    /// Whether the workflow cancelled this booking.
    pub fn is_cancelled(&self, booking: &BookingId) -> Result<bool, RiskError> {
        Ok(self.store.read().cancelled_at(booking)?.is_some())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Current assessment, or `None` for an unknown or unassessed booking.
    pub fn get_assessment(&self, booking: &BookingId) -> Result<Option<RiskAssessment>, RiskError> {
        self.store.read().latest_assessment(booking)
    }

    /// Every assessment in sequence order.
    pub fn get_assessment_history(&self, booking: &BookingId) -> Result<Vec<RiskAssessment>, RiskError> {
        let store = self.store.read();
        Self::require_known(&*store, booking)?;
        store.assessments(booking)
    }

    /// Every disposition in sequence order. The list only ever grows.
    pub fn get_disposition_history(&self, booking: &BookingId) -> Result<Vec<Disposition>, RiskError> {
        let store = self.store.read();
        Self::require_known(&*store, booking)?;
        store.dispositions(booking)
    }

    /// Active disposition, if any.
    pub fn current_disposition(&self, booking: &BookingId) -> Result<Option<Disposition>, RiskError> {
        self.store.read().current_disposition(booking)
    }

    /// The booking's cluster, recomputed against the current history.
    pub fn get_related_bookings(&self, booking: &BookingId) -> Result<Vec<RelatedBooking>, RiskError> {
        let policy = self.policy();
        let store = self.store.read();
        let signals = store
            .signals(booking)?
            .ok_or_else(|| RiskError::UnknownBooking(booking.clone()))?;
        let cluster = build_cluster(&*store, &signals, policy.lookback(), policy.config().max_cluster_size)?;
        Ok(cluster.related())
    }

    /// Verify the booking's ledger chain and that it matches the recorded
    /// dispositions one for one.
    pub fn verify_ledger(&self, booking: &BookingId) -> Result<LedgerReport, RiskError> {
        let (ledger, dispositions) = {
            let store = self.store.read();
            Self::require_known(&*store, booking)?;
            (store.ledger(booking)?, store.dispositions(booking)?)
        };

        let tip = verify_chain(&ledger)?;
        if ledger.len() != dispositions.len() {
            return Err(RiskError::Corruption(format!(
                "ledger for {booking} has {} entries for {} dispositions",
                ledger.len(),
                dispositions.len()
            )));
        }
        for (entry, disposition) in ledger.iter().zip(&dispositions) {
            if entry.sequence != disposition.sequence
                || entry.to_state != disposition.state
                || entry.actor != disposition.actor
                || entry.assessment_ref != disposition.assessment_ref
            {
                return Err(RiskError::Corruption(format!(
                    "ledger entry {} for {booking} does not match its disposition",
                    entry.sequence
                )));
            }
        }
        Ok(LedgerReport { booking_id: booking.clone(), entries: ledger.len(), tip_hash: hex::encode(tip) })
    }

    /// Number of bookings with captured signals.
    pub fn booking_count(&self) -> Result<usize, RiskError> {
        self.store.read().booking_count()
    }

    fn require_known(store: &S, booking: &BookingId) -> Result<(), RiskError> {
        match store.signals(booking)? {
            Some(_) => Ok(()),
            None => Err(RiskError::UnknownBooking(booking.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskgate_core::store::MemoryRiskStore;
    use riskgate_core::types::{Category, DispositionState, NetworkClass};
    use std::sync::Mutex;

    fn engine() -> RiskEngine<MemoryRiskStore> {
        RiskEngine::new(MemoryRiskStore::new(), EngineConfig::default()).unwrap()
    }

    fn clean(id: &str) -> RiskSignals {
        let mut s = RiskSignals::empty(BookingId::new(id), Utc::now());
        s.email = Some(format!("jane.doe.{id}@gmail.com"));
        s.email_domain = Some("gmail.com".into());
        s.email_verified = true;
        s.display_name = Some("Jane Doe".into());
        s.phone = Some("+15551234567".into());
        s.phone_verified = true;
        s.device_fingerprint = Some(format!("fp-{id}"));
        s.ip_address = Some("203.0.113.10".parse().unwrap());
        s.ip_network = Some(NetworkClass::Residential);
        s.session_duration_secs = Some(240);
        s.max_idle_gap_secs = Some(20);
        s.date_of_birth = chrono::NaiveDate::from_ymd_opt(1990, 5, 17);
        s
    }

    fn risky(id: &str) -> RiskSignals {
        let mut s = RiskSignals::empty(BookingId::new(id), Utc::now());
        s.email = Some("x@tempmail.com".into());
        s.email_domain = Some("tempmail.com".into());
        s.session_duration_secs = Some(12);
        s.ip_address = Some("198.51.100.23".parse().unwrap());
        s.ip_network = Some(NetworkClass::Datacenter);
        s
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<DispositionState>>);

    impl DispositionListener for Recorder {
        fn booking_approved(&self, d: &Disposition) {
            self.0.lock().unwrap().push(d.state);
        }
        fn booking_blocked(&self, d: &Disposition) {
            self.0.lock().unwrap().push(d.state);
        }
        fn review_requested(&self, d: &Disposition) {
            self.0.lock().unwrap().push(d.state);
        }
    }

    /// Checks from inside each hook whether the store is free to read.
    struct StoreReader {
        store: Arc<RwLock<MemoryRiskStore>>,
        readable: Mutex<Vec<bool>>,
    }

    impl StoreReader {
        fn check(&self, d: &Disposition) {
            let seen = self
                .store
                .try_read()
                .and_then(|store| store.current_disposition(&d.booking_id).ok().flatten())
                .is_some_and(|current| current.sequence == d.sequence);
            self.readable.lock().unwrap().push(seen);
        }
    }

    impl DispositionListener for StoreReader {
        fn booking_approved(&self, d: &Disposition) {
            self.check(d);
        }
        fn booking_blocked(&self, d: &Disposition) {
            self.check(d);
        }
        fn review_requested(&self, d: &Disposition) {
            self.check(d);
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.weights.email = 0.5;
        assert!(matches!(RiskEngine::new(MemoryRiskStore::new(), config), Err(RiskError::Config(_))));
    }

    #[tokio::test]
    async fn clean_booking_auto_approves() {
        let engine = engine();
        let a = engine.submit_signals(clean("bk-1")).await.unwrap();
        assert_eq!(a.sequence, 1);
        assert_eq!(a.overall_score, 2);

        let history = engine.get_disposition_history(&BookingId::new("bk-1")).unwrap();
        let states: Vec<DispositionState> = history.iter().map(|d| d.state).collect();
        assert_eq!(states, vec![DispositionState::PendingReview, DispositionState::Approved]);
        assert!(history.iter().all(|d| d.actor.is_none()));
    }

    #[tokio::test]
    async fn risky_booking_is_flagged() {
        let recorder = Arc::new(Recorder::default());
        let engine = engine().with_listener(recorder.clone());
        let a = engine.submit_signals(risky("bk-1")).await.unwrap();
        assert_eq!(a.overall_score, 62);
        let current = engine.current_disposition(&BookingId::new("bk-1")).unwrap().unwrap();
        assert_eq!(current.state, DispositionState::FlaggedForReview);
        assert_eq!(*recorder.0.lock().unwrap(), vec![DispositionState::FlaggedForReview]);
    }

    #[tokio::test]
    async fn listeners_run_after_the_store_lock_is_released() {
        let engine = engine();
        let reader = Arc::new(StoreReader { store: Arc::clone(engine.store()), readable: Mutex::new(Vec::new()) });
        let engine = engine.with_listener(reader.clone());

        engine.submit_signals(clean("bk-1")).await.unwrap();
        engine.submit_signals(risky("bk-2")).await.unwrap();
        engine
            .record_human_decision(&BookingId::new("bk-2"), HumanAction::Reject, "admin", "stolen card")
            .unwrap();

        assert_eq!(*reader.readable.lock().unwrap(), vec![true, true, true]);
    }

    #[tokio::test]
    async fn duplicate_submission_is_rejected() {
        let engine = engine();
        engine.submit_signals(clean("bk-1")).await.unwrap();
        assert!(matches!(engine.submit_signals(clean("bk-1")).await, Err(RiskError::DuplicateBooking(_))));
    }

    #[tokio::test]
    async fn unknown_booking_queries() {
        let engine = engine();
        let id = BookingId::new("nope");
        assert!(engine.get_assessment(&id).unwrap().is_none());
        assert!(engine.get_disposition_history(&id).unwrap_err().is_not_found());
        assert!(engine.get_related_bookings(&id).unwrap_err().is_not_found());
        assert!(engine.reevaluate(&id).await.unwrap_err().is_not_found());
        assert!(engine.verify_ledger(&id).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn reevaluation_appends_history() {
        let engine = engine();
        let id = BookingId::new("bk-1");
        engine.submit_signals(clean("bk-1")).await.unwrap();
        let second = engine.reevaluate(&id).await.unwrap();
        assert_eq!(second.sequence, 2);
        assert_eq!(engine.get_assessment_history(&id).unwrap().len(), 2);
        // Already approved: no new disposition.
        assert_eq!(engine.get_disposition_history(&id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn human_decisions_require_actor_and_reason() {
        let engine = engine();
        let id = BookingId::new("bk-1");
        engine.submit_signals(risky("bk-1")).await.unwrap();
        let err = engine.record_human_decision(&id, HumanAction::Approve, "", "ok").unwrap_err();
        assert!(matches!(err, RiskError::Transition(TransitionError::MissingActor)));
        let d = engine
            .record_human_decision(&id, HumanAction::Approve, "admin-7", "licence verified by phone")
            .unwrap();
        assert_eq!(d.state, DispositionState::Approved);
        assert_eq!(d.actor.as_deref(), Some("admin-7"));
        assert_eq!(d.assessment_ref, 1);
    }

    #[tokio::test]
    async fn human_decision_references_latest_assessment() {
        let engine = engine();
        let id = BookingId::new("bk-1");
        engine.submit_signals(risky("bk-1")).await.unwrap();
        engine.reevaluate(&id).await.unwrap();
        let latest = engine.reevaluate(&id).await.unwrap();
        assert_eq!(latest.sequence, 3);

        let d = engine.record_human_decision(&id, HumanAction::Reject, "admin", "stolen card").unwrap();
        assert_eq!(d.assessment_ref, 3);
        let ledger = engine.store().read().ledger(&id).unwrap();
        assert_eq!(ledger.last().map(|e| e.assessment_ref), Some(3));
        engine.verify_ledger(&id).unwrap();
    }

    #[tokio::test]
    async fn invalid_human_transition_is_refused() {
        let engine = engine();
        let id = BookingId::new("bk-1");
        engine.submit_signals(clean("bk-1")).await.unwrap();
        let err = engine.record_human_decision(&id, HumanAction::Override, "admin", "why").unwrap_err();
        assert!(matches!(err, RiskError::Transition(TransitionError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn cancelling_flagged_booking_rejects_it() {
        let engine = engine();
        let id = BookingId::new("bk-1");
        engine.submit_signals(risky("bk-1")).await.unwrap();
        let d = engine.cancel_booking(&id).unwrap().unwrap();
        assert_eq!(d.state, DispositionState::Rejected);
        assert_eq!(d.reason.as_deref(), Some(riskgate_core::constants::CANCELLED_BEFORE_REVIEW));
        assert!(engine.is_cancelled(&id).unwrap());
    }

    #[tokio::test]
    async fn cancellation_before_scoring_short_circuits() {
        let engine = engine();
        let id = BookingId::new("bk-1");
        assert!(engine.cancel_booking(&id).unwrap().is_none());
        assert!(engine.store().read().cancelled_at(&id).unwrap().is_some());
        let a = engine.submit_signals(clean("bk-1")).await.unwrap();
        assert_eq!(a.sequence, 1);
        let current = engine.current_disposition(&id).unwrap().unwrap();
        assert_eq!(current.state, DispositionState::Rejected);
        assert_eq!(engine.get_assessment_history(&id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelling_approved_booking_keeps_approval() {
        let engine = engine();
        let id = BookingId::new("bk-1");
        engine.submit_signals(clean("bk-1")).await.unwrap();
        let d = engine.cancel_booking(&id).unwrap().unwrap();
        assert_eq!(d.state, DispositionState::Approved);
    }

    #[tokio::test]
    async fn reconfigure_swaps_policy_atomically() {
        let engine = engine();
        let mut bad = EngineConfig::default();
        bad.risk_boundaries.high = 20;
        assert!(engine.reconfigure(bad).is_err());
        assert_eq!(engine.policy().config().auto_approve_threshold, 30);

        let good = EngineConfig { auto_approve_threshold: 1, ..EngineConfig::default() };
        engine.reconfigure(good).unwrap();
        engine.submit_signals(clean("bk-1")).await.unwrap();
        let current = engine.current_disposition(&BookingId::new("bk-1")).unwrap().unwrap();
        assert_eq!(current.state, DispositionState::PendingReview);
    }

    #[tokio::test]
    async fn ledger_verifies_after_decisions() {
        let engine = engine();
        let id = BookingId::new("bk-1");
        engine.submit_signals(risky("bk-1")).await.unwrap();
        engine.record_human_decision(&id, HumanAction::Reject, "admin", "stolen card").unwrap();
        engine.record_human_decision(&id, HumanAction::Override, "lead", "customer verified").unwrap();
        let report = engine.verify_ledger(&id).unwrap();
        assert_eq!(report.entries, 4);
        assert_eq!(report.tip_hash.len(), 64);
    }

    #[tokio::test]
    async fn telemetry_is_normalized_before_scoring() {
        let engine = engine();
        let raw = RawTelemetry {
            email: Some("  X@TempMail.com ".into()),
            session_duration_secs: Some(12.7),
            ip_address: Some("198.51.100.23".into()),
            ip_network: Some("hosting".into()),
            ..RawTelemetry::default()
        };
        let a = engine.submit_telemetry(BookingId::new("bk-1"), &raw).await.unwrap();
        let email = a.category(Category::Email).unwrap();
        assert!(email.factors.iter().any(|f| f == "disposable email domain: tempmail.com"));
        let signals = engine.store().read().signals(&BookingId::new("bk-1")).unwrap().unwrap();
        assert_eq!(signals.email.as_deref(), Some("x@tempmail.com"));
        assert_eq!(signals.session_duration_secs, Some(12));
    }
}
