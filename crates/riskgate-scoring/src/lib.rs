//! # riskgate-scoring — Category scorers and relationship clustering.
//!
//! All scoring is integer arithmetic over owned snapshots, so identical
//! signals and history always produce identical scores.
//!
//! - **Scorers**: five pure functions, one per [`Category`](riskgate_core::types::Category),
//!   dispatched through the closed [`Scorer`] enum.
//! - **Clustering**: bookings sharing a device fingerprint, IP, or email
//!   within the lookback window are related; a booking's cluster is found
//!   breadth-first, whole batches are partitioned with union-find.
//! - **Aggregation**: basis-point weighted sum of the category scores.
//! - **Runner**: scorers execute concurrently under one shared deadline; a
//!   scorer that times out or panics contributes zero with a visible factor.

pub mod aggregate;
pub mod cluster;
pub mod device;
pub mod email;
pub mod location;
pub mod runner;
pub mod scorer;
pub mod session;
pub mod velocity;

pub use aggregate::{Aggregate, aggregate};
pub use cluster::{Cluster, ClusterMember, build_cluster};
pub use runner::run_scorers;
pub use scorer::{Scorer, ScoringContext};
