//! Shared fixtures for scenario, property, and concurrency tests.

use std::net::{IpAddr, Ipv4Addr};

use chrono::{DateTime, NaiveDate, Utc};

use riskgate_core::config::EngineConfig;
use riskgate_core::store::MemoryRiskStore;
use riskgate_core::types::{BookingId, GeoPoint, NetworkClass, RiskSignals};
use riskgate_node_lib::RiskEngine;

/// Engine over an empty in-memory store with the default policy.
pub fn memory_engine() -> RiskEngine<MemoryRiskStore> {
    engine_with(EngineConfig::default())
}

/// Engine over an empty in-memory store with a custom policy.
pub fn engine_with(config: EngineConfig) -> RiskEngine<MemoryRiskStore> {
    match RiskEngine::new(MemoryRiskStore::new(), config) {
        Ok(engine) => engine,
        Err(e) => panic!("test policy rejected: {e}"),
    }
}

/// A documentation-range address unique to `n`.
pub fn ip(n: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(203, 0, 113, n))
}

/// A booking every scorer considers clean apart from its free-mail domain.
///
/// Scores email 10, everything else 0: overall 2.
pub fn clean_signals(id: &str, n: u8) -> RiskSignals {
    clean_signals_at(id, n, Utc::now())
}

pub fn clean_signals_at(id: &str, n: u8, captured_at: DateTime<Utc>) -> RiskSignals {
    let mut s = RiskSignals::empty(BookingId::new(id), captured_at);
    s.email = Some(format!("jane.doe.{n}@gmail.com"));
    s.email_domain = Some("gmail.com".into());
    s.email_verified = true;
    s.display_name = Some("Jane Doe".into());
    s.phone = Some(format!("+1555000{n:04}"));
    s.phone_verified = true;
    s.device_fingerprint = Some(format!("fp-clean-{n}"));
    s.ip_address = Some(ip(n));
    s.ip_network = Some(NetworkClass::Residential);
    s.ip_city = Some("Berlin".into());
    s.ip_location = Some(GeoPoint::new(52.52, 13.40));
    s.pickup_city = Some("Berlin".into());
    s.pickup_location = Some(GeoPoint::new(52.40, 13.05));
    s.session_duration_secs = Some(240);
    s.max_idle_gap_secs = Some(20);
    s.date_of_birth = NaiveDate::from_ymd_opt(1988, 3, 14);
    s
}

/// Disposable unverified email, no fingerprint, 12 s session, datacenter IP.
///
/// Scores email 100, session 88, device 90, location 70, velocity 0 when
/// it has no relatives: overall 62, `high`.
pub fn throwaway_signals(id: &str, n: u8) -> RiskSignals {
    let mut s = RiskSignals::empty(BookingId::new(id), Utc::now());
    s.email = Some("x@tempmail.com".into());
    s.email_domain = Some("tempmail.com".into());
    s.session_duration_secs = Some(12);
    s.ip_address = Some(ip(n));
    s.ip_network = Some(NetworkClass::Datacenter);
    s
}

/// A scripted booking from an automated, emulated device on a hosting
/// network far from pickup.
///
/// Scores email 100, session 100, device 85, location 100 before any
/// velocity contribution.
pub fn bot_signals(id: &str, email: &str, fingerprint: &str, n: u8) -> RiskSignals {
    let mut s = RiskSignals::empty(BookingId::new(id), Utc::now());
    s.email = Some(email.to_string());
    s.email_domain = email.rsplit_once('@').map(|(_, d)| d.to_string());
    s.device_fingerprint = Some(fingerprint.to_string());
    s.automation_markers = vec!["android-emulator".into(), "navigator.webdriver".into()];
    s.session_duration_secs = Some(12);
    s.max_idle_gap_secs = Some(3_600);
    s.ip_address = Some(ip(n));
    s.ip_network = Some(NetworkClass::Datacenter);
    s.ip_location = Some(GeoPoint::new(1.35, 103.82));
    s.pickup_location = Some(GeoPoint::new(52.52, 13.40));
    s
}
