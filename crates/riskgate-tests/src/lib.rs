//! Cross-crate test suite for Riskgate.
//!
//! Drives the full pipeline (collector, scorers, clusterer, aggregator,
//! decision engine, ledger) through [`riskgate_node_lib::RiskEngine`] and
//! checks the end-to-end guarantees under realistic and adversarial input.

pub mod helpers;
