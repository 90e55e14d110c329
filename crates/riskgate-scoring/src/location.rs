//! Location scorer: network reputation and distance from pickup.

use riskgate_core::config::Policy;
use riskgate_core::constants::{WEIGHT_CITY_MISMATCH, WEIGHT_HIGH_RISK_NETWORK, WEIGHT_IP_MISSING, WEIGHT_PICKUP_DISTANCE};
use riskgate_core::types::{Category, CategoryScore, RiskSignals};

use crate::scorer::Tally;

pub fn score(signals: &RiskSignals, policy: &Policy) -> CategoryScore {
    let mut tally = Tally::new(Category::Location);

    match signals.ip_address {
        None => tally.add(WEIGHT_IP_MISSING, "signal missing: ip address"),
        Some(ip) => {
            if let Some(class) = signals.ip_network.filter(|c| c.is_high_risk()) {
                tally.add(WEIGHT_HIGH_RISK_NETWORK, format!("high-risk network: {}", class.as_str()));
            } else if let Some(net) = policy.high_risk_network(&ip) {
                tally.add(WEIGHT_HIGH_RISK_NETWORK, format!("ip {ip} in high-risk range {net}"));
            }
        }
    }

    let max_km = policy.scorers().max_pickup_distance_km;
    match (signals.ip_location, signals.pickup_location) {
        (Some(ip_loc), Some(pickup)) => {
            let km = ip_loc.distance_km(&pickup);
            if km > f64::from(max_km) {
                tally.add(WEIGHT_PICKUP_DISTANCE, format!("ip location {km:.0} km from pickup, above {max_km} km"));
            }
        }
        _ => {
            if let (Some(ip_city), Some(pickup_city)) = (&signals.ip_city, &signals.pickup_city) {
                if !ip_city.eq_ignore_ascii_case(pickup_city) {
                    tally.add(WEIGHT_CITY_MISMATCH, format!("ip city {ip_city} differs from pickup city {pickup_city}"));
                }
            }
        }
    }

    tally.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use riskgate_core::config::EngineConfig;
    use riskgate_core::types::{BookingId, GeoPoint, NetworkClass};

    fn signals(ip: Option<&str>, network: Option<NetworkClass>) -> RiskSignals {
        let mut s = RiskSignals::empty(BookingId::new("b"), DateTime::from_timestamp(0, 0).unwrap());
        s.ip_address = ip.map(|ip| ip.parse().unwrap());
        s.ip_network = network;
        s
    }

    #[test]
    fn residential_ip_near_pickup_is_clean() {
        let mut s = signals(Some("203.0.113.10"), Some(NetworkClass::Residential));
        s.ip_location = Some(GeoPoint::new(52.52, 13.40));
        s.pickup_location = Some(GeoPoint::new(52.40, 13.05));
        assert_eq!(score(&s, &Policy::default()).score, 0);
    }

    #[test]
    fn datacenter_ip_is_high_risk() {
        let s = score(&signals(Some("203.0.113.10"), Some(NetworkClass::Datacenter)), &Policy::default());
        assert_eq!(s.score, 70);
        assert_eq!(s.factors, vec!["high-risk network: datacenter"]);
    }

    #[test]
    fn configured_range_is_high_risk() {
        let mut config = EngineConfig::default();
        config.scorers.high_risk_networks = vec!["198.51.100.0/24".into()];
        let policy = config.into_policy().unwrap();
        let s = score(&signals(Some("198.51.100.77"), None), &policy);
        assert_eq!(s.score, 70);
        assert!(s.factors[0].contains("198.51.100.0/24"));
    }

    #[test]
    fn distant_pickup_adds_penalty() {
        let mut s = signals(Some("203.0.113.10"), Some(NetworkClass::Vpn));
        s.ip_location = Some(GeoPoint::new(52.52, 13.405));
        s.pickup_location = Some(GeoPoint::new(40.7128, -74.006));
        let scored = score(&s, &Policy::default());
        assert_eq!(scored.score, 100);
        assert_eq!(scored.factors.len(), 2);
    }

    #[test]
    fn city_mismatch_without_coordinates() {
        let mut s = signals(Some("203.0.113.10"), None);
        s.ip_city = Some("Lyon".into());
        s.pickup_city = Some("lyon".into());
        assert_eq!(score(&s, &Policy::default()).score, 0);
        s.pickup_city = Some("Paris".into());
        assert_eq!(score(&s, &Policy::default()).score, 15);
    }

    #[test]
    fn missing_ip_is_penalized() {
        let s = score(&signals(None, None), &Policy::default());
        assert_eq!(s.score, 30);
        assert_eq!(s.factors, vec!["signal missing: ip address"]);
    }
}
