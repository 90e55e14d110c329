//! Device scorer.
//!
//! A missing fingerprint is treated as suspicious, not neutral: legitimate
//! browsers expose one, so its absence means it was blocked or spoofed.

use riskgate_core::config::ScorerConfig;
use riskgate_core::constants::{
    WEIGHT_AUTOMATION_MARKER, WEIGHT_EMULATOR_MARKER, WEIGHT_FINGERPRINT_MISSING, WEIGHT_FINGERPRINT_REUSE,
    WEIGHT_FINGERPRINT_REUSE_CAP, WEIGHT_FINGERPRINT_REUSE_STEP,
};
use riskgate_core::types::{Category, CategoryScore, RiskSignals};

use crate::scorer::Tally;

/// Substrings identifying browser automation frameworks.
pub const AUTOMATION_SIGNATURES: &[&str] = &["webdriver", "headless", "selenium", "puppeteer", "playwright", "automation"];

/// Substrings identifying emulated or virtualized devices.
pub const EMULATOR_SIGNATURES: &[&str] = &["emulator", "simulator", "virtual"];

fn first_match<'a>(markers: &'a [String], signatures: &[&str]) -> Option<&'a str> {
    markers
        .iter()
        .find(|m| signatures.iter().any(|sig| m.contains(sig)))
        .map(String::as_str)
}

/// Score device signals. `fingerprint_emails` is the number of distinct
/// other emails seen on this fingerprint within the lookback window.
pub fn score(signals: &RiskSignals, fingerprint_emails: usize, config: &ScorerConfig) -> CategoryScore {
    let mut tally = Tally::new(Category::Device);

    if signals.device_fingerprint.is_none() {
        tally.add(WEIGHT_FINGERPRINT_MISSING, "signal missing: device fingerprint (blocked or spoofed)");
    }
    if let Some(marker) = first_match(&signals.automation_markers, AUTOMATION_SIGNATURES) {
        tally.add(WEIGHT_AUTOMATION_MARKER, format!("automation signature: {marker}"));
    }
    if let Some(marker) = first_match(&signals.automation_markers, EMULATOR_SIGNATURES) {
        tally.add(WEIGHT_EMULATOR_MARKER, format!("emulator signature: {marker}"));
    }

    let threshold = config.fingerprint_email_threshold;
    if threshold > 0 && fingerprint_emails >= threshold {
        let extra = (fingerprint_emails - threshold) as u32;
        let points = WEIGHT_FINGERPRINT_REUSE
            .saturating_add(extra.saturating_mul(WEIGHT_FINGERPRINT_REUSE_STEP))
            .min(WEIGHT_FINGERPRINT_REUSE_CAP);
        tally.add(points, format!("fingerprint reused across {fingerprint_emails} other emails in lookback window"));
    }

    tally.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use riskgate_core::types::BookingId;

    fn signals(fp: Option<&str>, markers: &[&str]) -> RiskSignals {
        let mut s = RiskSignals::empty(BookingId::new("b"), DateTime::from_timestamp(0, 0).unwrap());
        s.device_fingerprint = fp.map(String::from);
        s.automation_markers = markers.iter().map(|m| m.to_string()).collect();
        s
    }

    #[test]
    fn clean_device_scores_zero() {
        let s = score(&signals(Some("fp"), &[]), 0, &ScorerConfig::default());
        assert_eq!(s.score, 0);
        assert!(s.factors.is_empty());
    }

    #[test]
    fn missing_fingerprint_is_suspicious() {
        let s = score(&signals(None, &[]), 0, &ScorerConfig::default());
        assert_eq!(s.score, 90);
        assert!(s.factors[0].contains("device fingerprint"));
    }

    #[test]
    fn automation_and_emulator_markers() {
        let s = score(&signals(Some("fp"), &["android-emulator", "navigator.webdriver"]), 0, &ScorerConfig::default());
        assert_eq!(s.score, 85);
        assert_eq!(s.factors.len(), 2);
        let s = score(&signals(Some("fp"), &["headless-chrome", "puppeteer"]), 0, &ScorerConfig::default());
        assert_eq!(s.score, 50);
    }

    #[test]
    fn fingerprint_reuse_grows_then_caps() {
        let config = ScorerConfig::default();
        assert_eq!(score(&signals(Some("fp"), &[]), 2, &config).score, 0);
        assert_eq!(score(&signals(Some("fp"), &[]), 3, &config).score, 35);
        assert_eq!(score(&signals(Some("fp"), &[]), 5, &config).score, 45);
        assert_eq!(score(&signals(Some("fp"), &[]), 40, &config).score, 50);
    }

    #[test]
    fn total_is_capped() {
        let s = score(&signals(None, &["webdriver", "emulator"]), 0, &ScorerConfig::default());
        assert_eq!(s.score, 100);
        assert_eq!(s.factors.len(), 3);
    }
}
