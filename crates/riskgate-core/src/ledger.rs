//! Hash-chained audit ledger of disposition transitions.
//!
//! Each booking has its own chain. An entry commits to the previous entry's
//! hash, so any edit, reordering, or deletion inside a chain is detected by
//! [`verify_chain`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decision::Transition;
use crate::error::RiskError;
use crate::types::{BookingId, DispositionState};

/// Hash linking the first entry of every chain.
pub const GENESIS_PREV_HASH: [u8; 32] = [0u8; 32];

/// One recorded transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub booking_id: BookingId,
    /// Same as the sequence of the disposition this entry records.
    pub sequence: u64,
    pub from_state: Option<DispositionState>,
    pub to_state: DispositionState,
    pub actor: Option<String>,
    pub reason: Option<String>,
    pub assessment_ref: u64,
    pub recorded_at: DateTime<Utc>,
    pub prev_hash: [u8; 32],
    pub entry_hash: [u8; 32],
}

/// Hashed portion of an entry.
#[derive(Serialize)]
struct EntryBody<'a> {
    booking_id: &'a BookingId,
    sequence: u64,
    from_state: Option<DispositionState>,
    to_state: DispositionState,
    actor: Option<&'a str>,
    reason: Option<&'a str>,
    assessment_ref: u64,
    recorded_at: i64,
    recorded_at_nanos: u32,
}

impl LedgerEntry {
    /// Build and hash the entry recording `transition` at `sequence`.
    pub fn seal(transition: &Transition, sequence: u64, prev_hash: [u8; 32]) -> Result<Self, RiskError> {
        let mut entry = Self {
            booking_id: transition.booking_id.clone(),
            sequence,
            from_state: transition.from,
            to_state: transition.to,
            actor: transition.actor.clone(),
            reason: transition.reason.clone(),
            assessment_ref: transition.assessment_ref,
            recorded_at: transition.at,
            prev_hash,
            entry_hash: [0u8; 32],
        };
        entry.entry_hash = entry.compute_hash()?;
        Ok(entry)
    }

    /// `blake3(prev_hash || body)`.
    pub fn compute_hash(&self) -> Result<[u8; 32], RiskError> {
        let body = EntryBody {
            booking_id: &self.booking_id,
            sequence: self.sequence,
            from_state: self.from_state,
            to_state: self.to_state,
            actor: self.actor.as_deref(),
            reason: self.reason.as_deref(),
            assessment_ref: self.assessment_ref,
            recorded_at: self.recorded_at.timestamp(),
            recorded_at_nanos: self.recorded_at.timestamp_subsec_nanos(),
        };
        let bytes = bincode::serde::encode_to_vec(&body, bincode::config::standard())
            .map_err(|e| RiskError::Storage(e.to_string()))?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.prev_hash);
        hasher.update(&bytes);
        Ok(*hasher.finalize().as_bytes())
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.entry_hash)
    }
}

/// Check one booking's chain: sequences contiguous from 1, each entry
/// linked to its predecessor, and every hash recomputes.
///
/// Returns the tip hash (or [`GENESIS_PREV_HASH`] for an empty chain).
pub fn verify_chain(entries: &[LedgerEntry]) -> Result<[u8; 32], RiskError> {
    let mut prev = GENESIS_PREV_HASH;
    for (i, entry) in entries.iter().enumerate() {
        let expected_seq = i as u64 + 1;
        if entry.sequence != expected_seq {
            return Err(RiskError::Corruption(format!(
                "ledger for {}: expected sequence {expected_seq}, found {}",
                entry.booking_id, entry.sequence
            )));
        }
        if entry.prev_hash != prev {
            return Err(RiskError::Corruption(format!(
                "ledger for {}: entry {} does not link to its predecessor",
                entry.booking_id, entry.sequence
            )));
        }
        if entry.compute_hash()? != entry.entry_hash {
            return Err(RiskError::Corruption(format!(
                "ledger for {}: entry {} hash mismatch",
                entry.booking_id, entry.sequence
            )));
        }
        prev = entry.entry_hash;
    }
    Ok(prev)
}
