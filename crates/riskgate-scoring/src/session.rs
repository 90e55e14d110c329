//! Session timing scorer.

use riskgate_core::config::ScorerConfig;
use riskgate_core::constants::{WEIGHT_IDLE_GAP, WEIGHT_SESSION_MISSING, WEIGHT_SHORT_SESSION_BASE, WEIGHT_SHORT_SESSION_SCALE};
use riskgate_core::types::{Category, CategoryScore, RiskSignals};

use crate::scorer::Tally;

/// Score session timing.
///
/// A session shorter than `min_session_secs` costs a base penalty plus a
/// share that grows linearly as the duration approaches zero:
///
/// ```
/// use chrono::Utc;
/// use riskgate_core::config::ScorerConfig;
/// use riskgate_core::types::{BookingId, RiskSignals};
/// use riskgate_scoring::session;
///
/// let mut s = RiskSignals::empty(BookingId::new("b"), Utc::now());
/// s.session_duration_secs = Some(12);
/// assert_eq!(session::score(&s, &ScorerConfig::default()).score, 88);
/// ```
pub fn score(signals: &RiskSignals, config: &ScorerConfig) -> CategoryScore {
    let mut tally = Tally::new(Category::Session);
    let min = config.min_session_secs;

    match signals.session_duration_secs {
        None => tally.add(WEIGHT_SESSION_MISSING, "signal missing: session duration"),
        Some(secs) if min > 0 && secs < min => {
            let shortfall = (min - secs) * u64::from(WEIGHT_SHORT_SESSION_SCALE) / min;
            tally.add(
                WEIGHT_SHORT_SESSION_BASE + shortfall as u32,
                format!("session completed in {secs}s, below {min}s minimum"),
            );
        }
        Some(_) => {}
    }

    if let Some(gap) = signals.max_idle_gap_secs {
        if gap > config.max_idle_gap_secs {
            tally.add(WEIGHT_IDLE_GAP, format!("idle gap of {gap}s exceeds {}s", config.max_idle_gap_secs));
        }
    }

    tally.finish()
}
