//! # riskgate-core
//! Foundation types, policy, and decision rules for the Riskgate engine.

pub mod config;
pub mod constants;
pub mod decision;
pub mod error;
pub mod ledger;
pub mod signals;
pub mod store;
pub mod traits;
pub mod types;
