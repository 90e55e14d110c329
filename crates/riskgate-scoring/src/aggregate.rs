//! Weighted combination of category scores into an assessment.

use chrono::{DateTime, Utc};

use riskgate_core::config::Policy;
use riskgate_core::constants::{BPS_PRECISION, MAX_SCORE};
use riskgate_core::types::{Category, CategoryScore, RiskAssessment, RiskLevel};

use crate::cluster::Cluster;

/// Overall score and the level it falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregate {
    pub overall_score: u8,
    pub risk_level: RiskLevel,
}

/// `overall = Σ score × weight_bps / 10 000`, rounded half up, capped at 100.
///
/// A category absent from `scores` contributes zero.
pub fn aggregate(scores: &[CategoryScore], policy: &Policy) -> Aggregate {
    let weighted: u64 = Category::ALL
        .iter()
        .filter_map(|c| scores.iter().find(|s| s.category == *c))
        .map(|s| u64::from(s.score.min(MAX_SCORE)) * u64::from(policy.weight_bps(s.category)))
        .sum();
    let precision = u64::from(BPS_PRECISION);
    let overall = ((weighted + precision / 2) / precision).min(u64::from(MAX_SCORE)) as u8;
    Aggregate { overall_score: overall, risk_level: RiskLevel::from_score(overall, policy.boundaries()) }
}

/// Assemble the assessment record. The store assigns the sequence.
pub fn assess(scores: Vec<CategoryScore>, cluster: &Cluster, policy: &Policy, computed_at: DateTime<Utc>) -> RiskAssessment {
    let mut scores = scores;
    scores.sort_by_key(|s| s.category.index());
    let agg = aggregate(&scores, policy);
    RiskAssessment {
        booking_id: cluster.anchor.clone(),
        sequence: 0,
        overall_score: agg.overall_score,
        risk_level: agg.risk_level,
        category_scores: scores,
        related: cluster.related(),
        cluster_truncated: cluster.truncated,
        computed_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use riskgate_core::config::{CategoryWeights, EngineConfig};
    use riskgate_core::types::BookingId;

    fn scores(values: [u8; 5]) -> Vec<CategoryScore> {
        Category::ALL
            .iter()
            .zip(values)
            .map(|(c, score)| CategoryScore { category: *c, score, factors: vec![] })
            .collect()
    }

    #[test]
    fn default_weights() {
        let agg = aggregate(&scores([100, 88, 90, 70, 0]), &Policy::default());
        assert_eq!(agg.overall_score, 62);
        assert_eq!(agg.risk_level, RiskLevel::High);
    }

    #[test]
    fn rounds_half_up() {
        // 5 × 0.30 = 1.5
        assert_eq!(aggregate(&scores([0, 0, 0, 0, 5]), &Policy::default()).overall_score, 2);
        // 2 × 0.15 = 0.3
        assert_eq!(aggregate(&scores([0, 2, 0, 0, 0]), &Policy::default()).overall_score, 0);
    }

    #[test]
    fn custom_weights_apply() {
        let config = EngineConfig {
            weights: CategoryWeights { email: 1.0, session: 0.0, device: 0.0, location: 0.0, velocity: 0.0 },
            ..EngineConfig::default()
        };
        let policy = config.into_policy().unwrap();
        assert_eq!(aggregate(&scores([42, 100, 100, 100, 100]), &policy).overall_score, 42);
    }

    #[test]
    fn assess_orders_categories_and_copies_cluster() {
        let mut shuffled = scores([10, 20, 30, 40, 50]);
        shuffled.reverse();
        let cluster = Cluster::empty(BookingId::new("bk"));
        let a = assess(shuffled, &cluster, &Policy::default(), Utc::now());
        let order: Vec<Category> = a.category_scores.iter().map(|s| s.category).collect();
        assert_eq!(order, Category::ALL.to_vec());
        assert_eq!(a.booking_id, BookingId::new("bk"));
        assert!(a.related.is_empty());
    }

    proptest! {
        #[test]
        fn overall_is_bounded_and_level_is_pure(values in prop::array::uniform5(0u8..=255)) {
            let policy = Policy::default();
            let agg = aggregate(&scores(values), &policy);
            prop_assert!(agg.overall_score <= 100);
            prop_assert_eq!(agg.risk_level, RiskLevel::from_score(agg.overall_score, policy.boundaries()));
        }

        #[test]
        fn order_independent(values in prop::array::uniform5(0u8..=100)) {
            let forward = scores(values);
            let mut backward = forward.clone();
            backward.reverse();
            let policy = Policy::default();
            prop_assert_eq!(aggregate(&forward, &policy), aggregate(&backward, &policy));
        }
    }
}
