//! JSON-RPC server for the Riskgate engine.
//!
//! Uses jsonrpsee 0.24. Booking identifiers travel as plain strings; every
//! engine error is mapped onto a stable error code so callers can tell a
//! missing booking from a retryable conflict from a refused decision.

use std::sync::Arc;

use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};

use riskgate_core::config::EngineConfig;
use riskgate_core::error::{RiskError, TransitionError};
use riskgate_core::signals::RawTelemetry;
use riskgate_core::store::RiskStore;
use riskgate_core::types::{BookingId, Disposition, HumanAction, RelatedBooking, RiskAssessment, RiskSignals};

use crate::engine::{LedgerReport, RiskEngine};

/// Booking, assessment or disposition not found.
pub const ERR_NOT_FOUND: i32 = -5;
/// Invalid parameter or a decision the state machine refuses.
pub const ERR_INVALID_PARAMS: i32 = -8;
/// Concurrent transition; the same request may be retried.
pub const ERR_CONFLICT: i32 = -32001;
/// Storage or integrity failure.
pub const ERR_INTERNAL: i32 = -32603;

/// Booking count and the policy in force.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineInfoJson {
    /// Bookings with captured signals.
    pub bookings: usize,
    pub policy: EngineConfig,
}

fn rpc_error(code: i32, msg: &str) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, msg.to_string(), None::<()>)
}

/// Map an engine error to its JSON-RPC error object.
pub fn map_risk_error(err: RiskError) -> ErrorObjectOwned {
    let code = match &err {
        e if e.is_not_found() => ERR_NOT_FOUND,
        e if e.is_retryable() => ERR_CONFLICT,
        RiskError::Transition(TransitionError::NotAssessed(_)) => ERR_NOT_FOUND,
        RiskError::Transition(_)
        | RiskError::Config(_)
        | RiskError::DuplicateBooking(_)
        | RiskError::InvalidBookingId(_) => ERR_INVALID_PARAMS,
        _ => ERR_INTERNAL,
    };
    rpc_error(code, &err.to_string())
}

/// Parse and validate a booking identifier.
pub fn parse_booking_id(raw: &str) -> Result<BookingId, ErrorObjectOwned> {
    let id = BookingId::new(raw.trim());
    if !id.is_valid() {
        return Err(rpc_error(ERR_INVALID_PARAMS, "booking id must be non-empty and free of NUL bytes"));
    }
    Ok(id)
}

fn parse_action(raw: &str) -> Result<HumanAction, ErrorObjectOwned> {
    raw.parse().map_err(|e: String| rpc_error(ERR_INVALID_PARAMS, &e))
}

/// Riskgate JSON-RPC interface.
#[rpc(server)]
pub trait RiskgateRpc {
    /// Submit normalized signals for a new booking. Returns its first assessment.
    #[method(name = "submitsignals")]
    async fn submit_signals(&self, signals: RiskSignals) -> Result<RiskAssessment, ErrorObjectOwned>;

    /// Submit raw telemetry for a new booking. Returns its first assessment.
    #[method(name = "submittelemetry")]
    async fn submit_telemetry(
        &self,
        booking_id: String,
        telemetry: RawTelemetry,
    ) -> Result<RiskAssessment, ErrorObjectOwned>;

    /// Recompute a booking's assessment against current history.
    #[method(name = "reevaluate")]
    async fn reevaluate(&self, booking_id: String) -> Result<RiskAssessment, ErrorObjectOwned>;

    /// Record an administrator decision: approve, reject or override.
    #[method(name = "recorddecision")]
    async fn record_decision(
        &self,
        booking_id: String,
        action: String,
        actor: String,
        reason: String,
    ) -> Result<Disposition, ErrorObjectOwned>;

    /// Mark a booking cancelled by the workflow.
    #[method(name = "cancelbooking")]
    async fn cancel_booking(&self, booking_id: String) -> Result<Option<Disposition>, ErrorObjectOwned>;

    /// Current assessment, or null.
    #[method(name = "getassessment")]
    async fn get_assessment(&self, booking_id: String) -> Result<Option<RiskAssessment>, ErrorObjectOwned>;

    #[method(name = "getassessmenthistory")]
    async fn get_assessment_history(&self, booking_id: String) -> Result<Vec<RiskAssessment>, ErrorObjectOwned>;

    #[method(name = "getdispositionhistory")]
    async fn get_disposition_history(&self, booking_id: String) -> Result<Vec<Disposition>, ErrorObjectOwned>;

    /// Active disposition, or null.
    #[method(name = "getcurrentdisposition")]
    async fn get_current_disposition(&self, booking_id: String) -> Result<Option<Disposition>, ErrorObjectOwned>;

    /// The booking's cluster as of now.
    #[method(name = "getrelatedbookings")]
    async fn get_related_bookings(&self, booking_id: String) -> Result<Vec<RelatedBooking>, ErrorObjectOwned>;

    /// Verify the booking's disposition ledger.
    #[method(name = "verifyledger")]
    async fn verify_ledger(&self, booking_id: String) -> Result<LedgerReport, ErrorObjectOwned>;

    /// Booking count and the policy in force.
    #[method(name = "getpolicy")]
    async fn get_policy(&self) -> Result<EngineInfoJson, ErrorObjectOwned>;
}

/// Implementation of the Riskgate JSON-RPC server.
pub struct RpcServerImpl<S: RiskStore> {
    engine: Arc<RiskEngine<S>>,
}

impl<S: RiskStore + 'static> RpcServerImpl<S> {
    /// Create a new RPC server implementation wrapping the given engine.
    pub fn new(engine: Arc<RiskEngine<S>>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl<S: RiskStore + 'static> RiskgateRpcServer for RpcServerImpl<S> {
    async fn submit_signals(&self, signals: RiskSignals) -> Result<RiskAssessment, ErrorObjectOwned> {
        self.engine.submit_signals(signals).await.map_err(map_risk_error)
    }

    async fn submit_telemetry(
        &self,
        booking_id: String,
        telemetry: RawTelemetry,
    ) -> Result<RiskAssessment, ErrorObjectOwned> {
        let id = parse_booking_id(&booking_id)?;
        self.engine.submit_telemetry(id, &telemetry).await.map_err(map_risk_error)
    }

    async fn reevaluate(&self, booking_id: String) -> Result<RiskAssessment, ErrorObjectOwned> {
        let id = parse_booking_id(&booking_id)?;
        self.engine.reevaluate(&id).await.map_err(map_risk_error)
    }

    async fn record_decision(
        &self,
        booking_id: String,
        action: String,
        actor: String,
        reason: String,
    ) -> Result<Disposition, ErrorObjectOwned> {
        let id = parse_booking_id(&booking_id)?;
        let action = parse_action(&action)?;
        self.engine
            .record_human_decision(&id, action, &actor, &reason)
            .map_err(map_risk_error)
    }

    async fn cancel_booking(&self, booking_id: String) -> Result<Option<Disposition>, ErrorObjectOwned> {
        let id = parse_booking_id(&booking_id)?;
        self.engine.cancel_booking(&id).map_err(map_risk_error)
    }

    async fn get_assessment(&self, booking_id: String) -> Result<Option<RiskAssessment>, ErrorObjectOwned> {
        let id = parse_booking_id(&booking_id)?;
        self.engine.get_assessment(&id).map_err(map_risk_error)
    }

    async fn get_assessment_history(&self, booking_id: String) -> Result<Vec<RiskAssessment>, ErrorObjectOwned> {
        let id = parse_booking_id(&booking_id)?;
        self.engine.get_assessment_history(&id).map_err(map_risk_error)
    }

    async fn get_disposition_history(&self, booking_id: String) -> Result<Vec<Disposition>, ErrorObjectOwned> {
        let id = parse_booking_id(&booking_id)?;
        self.engine.get_disposition_history(&id).map_err(map_risk_error)
    }

    async fn get_current_disposition(&self, booking_id: String) -> Result<Option<Disposition>, ErrorObjectOwned> {
        let id = parse_booking_id(&booking_id)?;
        self.engine.current_disposition(&id).map_err(map_risk_error)
    }

    async fn get_related_bookings(&self, booking_id: String) -> Result<Vec<RelatedBooking>, ErrorObjectOwned> {
        let id = parse_booking_id(&booking_id)?;
        self.engine.get_related_bookings(&id).map_err(map_risk_error)
    }

    async fn verify_ledger(&self, booking_id: String) -> Result<LedgerReport, ErrorObjectOwned> {
        let id = parse_booking_id(&booking_id)?;
        self.engine.verify_ledger(&id).map_err(map_risk_error)
    }

    async fn get_policy(&self) -> Result<EngineInfoJson, ErrorObjectOwned> {
        let bookings = self.engine.booking_count().map_err(map_risk_error)?;
        Ok(EngineInfoJson { bookings, policy: self.engine.policy().config().clone() })
    }
}

/// Start the JSON-RPC server on the given address.
///
/// Returns a [`ServerHandle`] that can be used to stop the server.
pub async fn start_rpc_server<S: RiskStore + 'static>(
    addr: &str,
    engine: Arc<RiskEngine<S>>,
) -> Result<ServerHandle, RiskError> {
    let server = Server::builder()
        .build(addr)
        .await
        .map_err(|e| RiskError::Storage(format!("RPC server error: {e}")))?;

    let rpc_impl = RpcServerImpl::new(engine);
    let handle = server.start(rpc_impl.into_rpc());

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskgate_core::types::DispositionState;

    #[test]
    fn parse_booking_id_trims() {
        assert_eq!(parse_booking_id("  bk-1 ").unwrap(), BookingId::new("bk-1"));
    }

    #[test]
    fn parse_booking_id_rejects_empty() {
        let err = parse_booking_id("   ").unwrap_err();
        assert_eq!(err.code(), ERR_INVALID_PARAMS);
    }

    #[test]
    fn parse_action_accepts_known_actions() {
        assert_eq!(parse_action("reject").unwrap(), HumanAction::Reject);
        let err = parse_action("delete").unwrap_err();
        assert!(err.message().contains("unknown action"));
    }

    #[test]
    fn unknown_booking_maps_to_not_found() {
        let err = map_risk_error(RiskError::UnknownBooking(BookingId::new("x")));
        assert_eq!(err.code(), ERR_NOT_FOUND);
        assert!(err.message().contains("unknown booking: x"));
    }

    #[test]
    fn conflict_maps_to_retryable_code() {
        let err = map_risk_error(
            TransitionError::Conflict { booking: BookingId::new("x"), attempts: 3 }.into(),
        );
        assert_eq!(err.code(), ERR_CONFLICT);
    }

    #[test]
    fn refused_transition_maps_to_invalid_params() {
        let err = map_risk_error(
            TransitionError::InvalidTransition {
                from: DispositionState::Approved,
                to: DispositionState::OverrideCleared,
            }
            .into(),
        );
        assert_eq!(err.code(), ERR_INVALID_PARAMS);
        assert_eq!(map_risk_error(TransitionError::MissingReason.into()).code(), ERR_INVALID_PARAMS);
    }

    #[test]
    fn corruption_maps_to_internal() {
        let err = map_risk_error(RiskError::Corruption("hash mismatch".into()));
        assert_eq!(err.code(), ERR_INTERNAL);
    }

    #[test]
    fn engine_info_serializes_policy() {
        let info = EngineInfoJson { bookings: 3, policy: EngineConfig::default() };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["bookings"], 3);
        assert_eq!(json["policy"]["auto_approve_threshold"], 30);
    }
}
