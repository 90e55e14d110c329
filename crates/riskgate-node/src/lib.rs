//! # riskgate-node — Risk service: RocksDB, RPC, orchestration.
//!
//! Composes the Riskgate subsystems into a running service:
//! - [`storage::RocksRiskStore`] — persistent risk history backed by RocksDB
//! - [`engine::RiskEngine`] — ingest, scoring, and disposition workflow
//! - [`rpc`] — JSON-RPC server for the booking workflow and administrators
//! - [`config::NodeConfig`] — service configuration

pub mod config;
pub mod engine;
pub mod rpc;
pub mod storage;

pub use config::NodeConfig;
pub use engine::{LedgerReport, RiskEngine};
pub use rpc::start_rpc_server;
pub use storage::RocksRiskStore;
