//! Property tests over the scoring pipeline and clustering.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use chrono::{DateTime, Duration};
use proptest::prelude::*;

use riskgate_core::config::{CategoryWeights, EngineConfig, Policy};
use riskgate_core::store::{MemoryRiskStore, RiskStore};
use riskgate_core::types::{BookingId, Category, CategoryScore, NetworkClass, RiskLevel, RiskSignals};
use riskgate_scoring::aggregate::aggregate;
use riskgate_scoring::cluster::{Cluster, build_cluster, partition};
use riskgate_scoring::scorer::{Scorer, ScoringContext};

const LOOKBACK_DAYS: i64 = 90;

fn arb_network() -> impl Strategy<Value = Option<NetworkClass>> {
    prop_oneof![
        Just(None),
        Just(Some(NetworkClass::Residential)),
        Just(Some(NetworkClass::Mobile)),
        Just(Some(NetworkClass::Datacenter)),
        Just(Some(NetworkClass::Vpn)),
        Just(Some(NetworkClass::Tor)),
    ]
}

prop_compose! {
    fn arb_booking(index: usize)(
        day in 0i64..200,
        fp in proptest::option::of(0u8..4),
        ip in proptest::option::of(0u8..4),
        email in proptest::option::of(0u8..4),
        disposable in any::<bool>(),
        verified in any::<bool>(),
        session in proptest::option::of(0u64..900),
        idle in proptest::option::of(0u64..4_000),
        network in arb_network(),
        markers in proptest::collection::vec(prop_oneof![Just("webdriver"), Just("emulator"), Just("chrome")], 0..3),
    ) -> RiskSignals {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::days(day);
        let mut s = RiskSignals::empty(BookingId::new(format!("bk-{index:03}")), at);
        s.device_fingerprint = fp.map(|n| format!("fp-{n}"));
        s.ip_address = ip.map(|n| IpAddr::V4(Ipv4Addr::new(198, 51, 100, n + 1)));
        let domain = if disposable { "mailinator.com" } else { "example.org" };
        s.email = email.map(|n| format!("person.{n}@{domain}"));
        s.email_domain = s.email.as_ref().map(|_| domain.to_string());
        s.email_verified = verified && s.email.is_some();
        s.session_duration_secs = session;
        s.max_idle_gap_secs = idle;
        s.ip_network = network;
        s.automation_markers = markers.into_iter().map(String::from).collect();
        s
    }
}

fn arb_history() -> impl Strategy<Value = Vec<RiskSignals>> {
    (1usize..14).prop_flat_map(|n| (0..n).map(arb_booking).collect::<Vec<_>>())
}

fn store_with(all: &[RiskSignals]) -> MemoryRiskStore {
    let mut store = MemoryRiskStore::new();
    for s in all {
        store.append_signals(s.clone()).unwrap();
    }
    store
}

fn score_with(store: &MemoryRiskStore, signals: &RiskSignals, policy: &Arc<Policy>) -> Vec<CategoryScore> {
    let ctx = ScoringContext::snapshot(store, signals.clone(), Arc::clone(policy)).unwrap();
    Scorer::ALL.iter().map(|s| s.score(&ctx)).collect()
}

fn clusters(store: &MemoryRiskStore, all: &[RiskSignals]) -> Vec<Cluster> {
    all.iter()
        .map(|s| build_cluster(store, s, Duration::days(LOOKBACK_DAYS), 500).unwrap())
        .collect()
}

fn normalized(mut groups: Vec<Vec<BookingId>>) -> Vec<Vec<BookingId>> {
    for g in &mut groups {
        g.sort();
    }
    groups.sort();
    groups
}

prop_compose! {
    /// Five weights in basis points summing to exactly 10 000.
    fn arb_weights()(a in 0u32..=2_500, b in 0u32..=2_500, c in 0u32..=2_500, d in 0u32..=2_500) -> CategoryWeights {
        let e = 10_000 - a - b - c - d;
        let w = |bps: u32| f64::from(bps) / 10_000.0;
        CategoryWeights { email: w(a), session: w(b), device: w(c), location: w(d), velocity: w(e) }
    }
}

proptest! {
    #[test]
    fn identical_context_gives_identical_scores(all in arb_history()) {
        let policy = Arc::new(Policy::default());
        let left = store_with(&all);
        let right = store_with(&all);
        for s in &all {
            let a = score_with(&left, s, &policy);
            let b = score_with(&right, s, &policy);
            let c = score_with(&left, s, &policy);
            prop_assert_eq!(aggregate(&a, &policy), aggregate(&b, &policy));
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(&a, &c);
        }
    }

    #[test]
    fn scores_stay_in_bounds(all in arb_history()) {
        let policy = Arc::new(Policy::default());
        let store = store_with(&all);
        for s in &all {
            let scores = score_with(&store, s, &policy);
            prop_assert_eq!(scores.len(), Category::ALL.len());
            prop_assert!(scores.iter().all(|c| c.score <= 100));
            // A non-zero score always carries an explanation.
            prop_assert!(scores.iter().all(|c| c.score == 0 || !c.factors.is_empty()));
            let agg = aggregate(&scores, &policy);
            prop_assert!(agg.overall_score <= 100);
        }
    }

    #[test]
    fn level_is_a_function_of_overall_score(
        weights in arb_weights(),
        values in proptest::array::uniform5(0u8..=100),
    ) {
        let config = EngineConfig { weights, ..EngineConfig::default() };
        let policy = config.into_policy().unwrap();
        let scores: Vec<CategoryScore> = Category::ALL
            .iter()
            .zip(values)
            .map(|(c, score)| CategoryScore { category: *c, score, factors: vec![] })
            .collect();
        let agg = aggregate(&scores, &policy);
        prop_assert!(agg.overall_score <= 100);
        prop_assert_eq!(agg.risk_level, RiskLevel::from_score(agg.overall_score, policy.boundaries()));

        // Raising any single category never lowers the overall score.
        for i in 0..scores.len() {
            let mut raised = scores.clone();
            raised[i].score = 100;
            prop_assert!(aggregate(&raised, &policy).overall_score >= agg.overall_score);
        }
    }

    #[test]
    fn clustering_is_symmetric_and_transitive(all in arb_history()) {
        let store = store_with(&all);
        let clusters = clusters(&store, &all);
        let find = |id: &BookingId| clusters.iter().find(|c| &c.anchor == id).unwrap();
        let captured = |id: &BookingId| all.iter().find(|s| &s.booking_id == id).unwrap().captured_at;
        let lookback = Duration::days(LOOKBACK_DAYS);

        for a in &clusters {
            let a_at = captured(&a.anchor);
            for b in &a.members {
                prop_assert!((b.captured_at - a_at).abs() <= lookback);
                let b_cluster = find(&b.booking_id);
                prop_assert!(b_cluster.contains(&a.anchor));
                // Transitive among bookings inside the anchor's window.
                for c in &b_cluster.members {
                    if c.booking_id != a.anchor && (c.captured_at - a_at).abs() <= lookback {
                        prop_assert!(a.contains(&c.booking_id));
                    }
                }
            }
        }
    }

    #[test]
    fn partition_ignores_input_order(all in arb_history(), seed in any::<u64>()) {
        let mut shuffled = all.clone();
        // Deterministic rotation and reversal from the seed.
        let len = shuffled.len();
        shuffled.rotate_left((seed as usize) % len);
        if seed % 2 == 0 {
            shuffled.reverse();
        }
        let lookback = Duration::days(LOOKBACK_DAYS);
        prop_assert_eq!(normalized(partition(&all, lookback)), normalized(partition(&shuffled, lookback)));
    }

    #[test]
    fn insertion_order_does_not_change_clusters(all in arb_history()) {
        let forward = store_with(&all);
        let mut reversed_input = all.clone();
        reversed_input.reverse();
        let backward = store_with(&reversed_input);
        prop_assert_eq!(clusters(&forward, &all), clusters(&backward, &all));
    }
}
