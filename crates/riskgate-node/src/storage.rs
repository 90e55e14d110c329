//! RocksDB-backed persistent booking history.
//!
//! Implements [`RiskStore`] using column families for signals, assessments,
//! dispositions, ledger entries, the join-key index, and metadata. A
//! disposition and its ledger entry are written in one [`WriteBatch`].
//! Cancellations live in the metadata family under `cancelled/`.
//!
//! Per-booking collections are keyed `booking_id || 0x00 || seq (u64 BE)`,
//! so a forward scan from the booking prefix yields history in sequence
//! order and a reverse seek finds the latest record.

use std::path::Path;

use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;

use riskgate_core::decision::Transition;
use riskgate_core::error::{RiskError, TransitionError};
use riskgate_core::ledger::{GENESIS_PREV_HASH, LedgerEntry};
use riskgate_core::store::{RiskStore, check_transition, disposition_for};
use riskgate_core::traits::SignalHistory;
use riskgate_core::types::{BookingId, Disposition, LinkKey, RiskAssessment, RiskSignals};

// --- Column family names ---

const CF_SIGNALS: &str = "signals";
const CF_ASSESSMENTS: &str = "assessments";
const CF_DISPOSITIONS: &str = "dispositions";
const CF_LEDGER: &str = "ledger";
const CF_LINK_INDEX: &str = "link_index";
const CF_METADATA: &str = "metadata";

/// All column family names.
const ALL_CFS: &[&str] = &[CF_SIGNALS, CF_ASSESSMENTS, CF_DISPOSITIONS, CF_LEDGER, CF_LINK_INDEX, CF_METADATA];

// --- Metadata keys ---

const META_BOOKING_COUNT: &[u8] = b"booking_count";
const META_CANCELLED_PREFIX: &[u8] = b"cancelled/";

fn storage_err(e: impl std::fmt::Display) -> RiskError {
    RiskError::Storage(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, RiskError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(storage_err)
}

/// Stored bytes that no longer decode are corruption, not a transient failure.
fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RiskError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| RiskError::Corruption(e.to_string()))?;
    Ok(value)
}

/// `booking_id || 0x00`.
fn booking_prefix(booking: &BookingId) -> Vec<u8> {
    let mut key = Vec::with_capacity(booking.as_str().len() + 1);
    key.extend_from_slice(booking.as_str().as_bytes());
    key.push(0);
    key
}

/// `booking_id || 0x00 || seq (u64 BE)`.
fn seq_key(booking: &BookingId, seq: u64) -> Vec<u8> {
    let mut key = booking_prefix(booking);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// `index_bytes(key) || booking_id`.
fn link_key(key: &LinkKey, booking: &BookingId) -> Vec<u8> {
    let mut out = key.index_bytes();
    out.extend_from_slice(booking.as_str().as_bytes());
    out
}

/// `cancelled/ || booking_id`.
fn cancel_key(booking: &BookingId) -> Vec<u8> {
    let mut key = META_CANCELLED_PREFIX.to_vec();
    key.extend_from_slice(booking.as_str().as_bytes());
    key
}

/// RocksDB-backed persistent booking history.
pub struct RocksRiskStore {
    db: DB,
}

impl RocksRiskStore {
    /// Open or create a database at the given path, creating any missing
    /// column families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RiskError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors).map_err(storage_err)?;
        Ok(Self { db })
    }

    /// Get a column family handle.
    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, RiskError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| RiskError::Storage(format!("missing column family: {name}")))
    }

    fn get_meta_u64(&self, key: &[u8]) -> Result<u64, RiskError> {
        let cf = self.cf_handle(CF_METADATA)?;
        match self.db.get_cf(cf, key).map_err(storage_err)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| RiskError::Corruption("invalid metadata value length".into()))?;
                Ok(u64::from_le_bytes(raw))
            }
            None => Ok(0),
        }
    }

    fn has_signals(&self, booking: &BookingId) -> Result<bool, RiskError> {
        let cf = self.cf_handle(CF_SIGNALS)?;
        Ok(self.db.get_cf(cf, booking.as_str().as_bytes()).map_err(storage_err)?.is_some())
    }

    /// Latest record of a per-booking collection, with its sequence.
    fn last_in<T: DeserializeOwned>(&self, cf_name: &str, booking: &BookingId) -> Result<Option<(u64, T)>, RiskError> {
        let cf = self.cf_handle(cf_name)?;
        let prefix = booking_prefix(booking);
        let upper = seq_key(booking, u64::MAX);
        let mut iter = self.db.iterator_cf(cf, IteratorMode::From(&upper, Direction::Reverse));
        match iter.next() {
            Some(item) => {
                let (key, value) = item.map_err(storage_err)?;
                if key.len() != prefix.len() + 8 || !key.starts_with(&prefix) {
                    return Ok(None);
                }
                let seq = u64::from_be_bytes(
                    key[prefix.len()..]
                        .try_into()
                        .map_err(|_| RiskError::Corruption(format!("bad sequence key in {cf_name}")))?,
                );
                Ok(Some((seq, decode(&value)?)))
            }
            None => Ok(None),
        }
    }

    /// Every record of a per-booking collection, in sequence order.
    fn all_in<T: DeserializeOwned>(&self, cf_name: &str, booking: &BookingId) -> Result<Vec<T>, RiskError> {
        let cf = self.cf_handle(cf_name)?;
        let prefix = booking_prefix(booking);
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward)) {
            let (key, value) = item.map_err(storage_err)?;
            // Iteration runs past the booking's records.
            if !key.starts_with(&prefix) {
                break;
            }
            if key.len() != prefix.len() + 8 {
                continue;
            }
            out.push(decode(&value)?);
        }
        Ok(out)
    }
}

impl SignalHistory for RocksRiskStore {
    fn signals(&self, booking: &BookingId) -> Result<Option<RiskSignals>, RiskError> {
        let cf = self.cf_handle(CF_SIGNALS)?;
        match self.db.get_cf(cf, booking.as_str().as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn bookings_with_key(&self, key: &LinkKey) -> Result<Vec<BookingId>, RiskError> {
        let cf = self.cf_handle(CF_LINK_INDEX)?;
        let prefix = key.index_bytes();
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward)) {
            let (k, _) = item.map_err(storage_err)?;
            if !k.starts_with(&prefix) {
                break;
            }
            let id = std::str::from_utf8(&k[prefix.len()..])
                .map_err(|e| RiskError::Corruption(format!("link index key: {e}")))?;
            out.push(BookingId::new(id));
        }
        Ok(out)
    }

    fn latest_assessment(&self, booking: &BookingId) -> Result<Option<RiskAssessment>, RiskError> {
        Ok(self.last_in(CF_ASSESSMENTS, booking)?.map(|(_, a)| a))
    }

    fn current_disposition(&self, booking: &BookingId) -> Result<Option<Disposition>, RiskError> {
        Ok(self.last_in(CF_DISPOSITIONS, booking)?.map(|(_, d)| d))
    }
}

impl RiskStore for RocksRiskStore {
    fn append_signals(&mut self, signals: RiskSignals) -> Result<(), RiskError> {
        let id = signals.booking_id.clone();
        if !id.is_valid() {
            return Err(RiskError::InvalidBookingId(id.0));
        }
        if self.has_signals(&id)? {
            return Err(RiskError::DuplicateBooking(id));
        }

        let cf_signals = self.cf_handle(CF_SIGNALS)?;
        let cf_links = self.cf_handle(CF_LINK_INDEX)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;
        let count = self.get_meta_u64(META_BOOKING_COUNT)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_signals, id.as_str().as_bytes(), encode(&signals)?);
        for key in signals.link_keys() {
            batch.put_cf(cf_links, link_key(&key, &id), b"");
        }
        batch.put_cf(cf_meta, META_BOOKING_COUNT, (count + 1).to_le_bytes());
        self.db.write(batch).map_err(storage_err)
    }

    fn append_assessment(&mut self, mut assessment: RiskAssessment) -> Result<RiskAssessment, RiskError> {
        let id = assessment.booking_id.clone();
        if !self.has_signals(&id)? {
            return Err(RiskError::UnknownBooking(id));
        }
        let last = self.last_in::<RiskAssessment>(CF_ASSESSMENTS, &id)?.map(|(seq, _)| seq).unwrap_or(0);
        assessment.sequence = last + 1;
        let cf = self.cf_handle(CF_ASSESSMENTS)?;
        self.db
            .put_cf(cf, seq_key(&id, assessment.sequence), encode(&assessment)?)
            .map_err(storage_err)?;
        Ok(assessment)
    }

    fn assessments(&self, booking: &BookingId) -> Result<Vec<RiskAssessment>, RiskError> {
        self.all_in(CF_ASSESSMENTS, booking)
    }

    fn record_decision(&mut self, transition: &Transition, expected_sequence: Option<u64>) -> Result<Disposition, RiskError> {
        let id = &transition.booking_id;
        if !self.has_signals(id)? {
            return Err(RiskError::UnknownBooking(id.clone()));
        }
        if self.last_in::<RiskAssessment>(CF_ASSESSMENTS, id)?.is_none() {
            return Err(TransitionError::NotAssessed(id.clone()).into());
        }

        let current = self.current_disposition(id)?;
        let sequence = check_transition(current.as_ref(), transition, expected_sequence)?;
        let prev_hash = self
            .last_in::<LedgerEntry>(CF_LEDGER, id)?
            .map(|(_, e)| e.entry_hash)
            .unwrap_or(GENESIS_PREV_HASH);
        let entry = LedgerEntry::seal(transition, sequence, prev_hash)?;
        let disposition = disposition_for(transition, sequence);

        let cf_disp = self.cf_handle(CF_DISPOSITIONS)?;
        let cf_ledger = self.cf_handle(CF_LEDGER)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf_disp, seq_key(id, sequence), encode(&disposition)?);
        batch.put_cf(cf_ledger, seq_key(id, sequence), encode(&entry)?);
        self.db.write(batch).map_err(storage_err)?;
        Ok(disposition)
    }

    fn dispositions(&self, booking: &BookingId) -> Result<Vec<Disposition>, RiskError> {
        self.all_in(CF_DISPOSITIONS, booking)
    }

    fn ledger(&self, booking: &BookingId) -> Result<Vec<LedgerEntry>, RiskError> {
        self.all_in(CF_LEDGER, booking)
    }

    fn booking_count(&self) -> Result<usize, RiskError> {
        Ok(self.get_meta_u64(META_BOOKING_COUNT)? as usize)
    }

    fn record_cancellation(&mut self, booking: &BookingId, at: DateTime<Utc>) -> Result<(), RiskError> {
        if !booking.is_valid() {
            return Err(RiskError::InvalidBookingId(booking.0.clone()));
        }
        if self.cancelled_at(booking)?.is_some() {
            return Ok(());
        }
        let cf = self.cf_handle(CF_METADATA)?;
        self.db.put_cf(cf, cancel_key(booking), encode(&at)?).map_err(storage_err)
    }

    fn cancelled_at(&self, booking: &BookingId) -> Result<Option<DateTime<Utc>>, RiskError> {
        let cf = self.cf_handle(CF_METADATA)?;
        match self.db.get_cf(cf, cancel_key(booking)).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_keys_sort_numerically() {
        let id = BookingId::new("bk");
        assert!(seq_key(&id, 2) < seq_key(&id, 10));
        assert!(seq_key(&id, 255) < seq_key(&id, 256));
        assert!(seq_key(&id, 1).starts_with(&booking_prefix(&id)));
    }

    #[test]
    fn booking_prefixes_do_not_overlap() {
        let a = booking_prefix(&BookingId::new("ab"));
        let b = seq_key(&BookingId::new("abc"), 1);
        assert!(!b.starts_with(&a));
    }

    #[test]
    fn cancel_keys_stay_clear_of_counters() {
        let k = cancel_key(&BookingId::new("booking_count"));
        assert_ne!(k.as_slice(), META_BOOKING_COUNT);
        assert!(k.starts_with(META_CANCELLED_PREFIX));
    }

    #[test]
    fn link_keys_carry_booking_suffix() {
        let key = LinkKey::Email("e@x.com".into());
        let k = link_key(&key, &BookingId::new("bk-1"));
        assert!(k.starts_with(&key.index_bytes()));
        assert!(k.ends_with(b"bk-1"));
    }
}
