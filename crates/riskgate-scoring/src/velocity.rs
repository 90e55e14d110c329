//! Velocity scorer: cross-booking pattern evidence from the cluster.
//!
//! Two parts:
//! - **Volume**: grows with the number of related bookings, capped.
//! - **Contagion**: grows with the fraction of related bookings already
//!   rejected or fraudulent. A single adverse relative is capped lower so
//!   one historical false positive cannot on its own push a booking to
//!   `critical`.

use riskgate_core::constants::{
    MAX_SCORE, VELOCITY_CONTAGION_MAX, VELOCITY_PER_RELATED, VELOCITY_SINGLE_CONTAGION_CAP, VELOCITY_VOLUME_CAP,
};
use riskgate_core::types::{Category, CategoryScore};

use crate::cluster::Cluster;
use crate::scorer::Tally;

/// Contagion points for `adverse` of `total` related bookings, rounded half up.
pub fn contagion_points(adverse: usize, total: usize) -> u32 {
    if adverse == 0 || total == 0 {
        return 0;
    }
    let (adverse, total) = (adverse as u64, total as u64);
    let max = u64::from(VELOCITY_CONTAGION_MAX);
    let points = (2 * max * adverse + total) / (2 * total);
    let cap = if adverse == 1 { VELOCITY_SINGLE_CONTAGION_CAP } else { VELOCITY_CONTAGION_MAX };
    (points as u32).min(cap)
}

pub fn score(cluster: &Cluster) -> CategoryScore {
    let mut tally = Tally::new(Category::Velocity);

    let total = cluster.len();
    if total == 0 {
        tally.note("no related bookings in lookback window");
        return tally.finish();
    }

    let volume = (total as u32).saturating_mul(VELOCITY_PER_RELATED).min(VELOCITY_VOLUME_CAP);
    tally.add(volume, format!("{total} related bookings in lookback window"));

    let adverse = cluster.adverse_count();
    let contagion = contagion_points(adverse, total);
    if contagion > 0 {
        tally.add(contagion, format!("{adverse} of {total} related bookings rejected or fraudulent"));
    }

    if cluster.truncated {
        tally.note(format!("cluster truncated at {total} members"));
    }

    let scored = tally.finish();
    debug_assert!(scored.score <= MAX_SCORE);
    scored
}
