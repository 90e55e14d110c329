//! Policy configuration and validation.
//!
//! [`EngineConfig`] is the tunable, serde-loadable form. It becomes a
//! [`Policy`] only through [`EngineConfig::into_policy`], which rejects the
//! whole configuration on the first problem so a policy is never applied
//! partially.

use std::collections::HashSet;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::ConfigError;
use crate::types::Category;

/// Category weights as fractions of 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryWeights {
    pub email: f64,
    pub session: f64,
    pub device: f64,
    pub location: f64,
    pub velocity: f64,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            email: DEFAULT_WEIGHT_EMAIL,
            session: DEFAULT_WEIGHT_SESSION,
            device: DEFAULT_WEIGHT_DEVICE,
            location: DEFAULT_WEIGHT_LOCATION,
            velocity: DEFAULT_WEIGHT_VELOCITY,
        }
    }
}

impl CategoryWeights {
    pub fn get(&self, category: Category) -> f64 {
        match category {
            Category::Email => self.email,
            Category::Session => self.session,
            Category::Device => self.device,
            Category::Location => self.location,
            Category::Velocity => self.velocity,
        }
    }

    /// Check ranges and the 1.0 sum, then convert to basis points.
    ///
    /// Rounding residue is assigned to the heaviest category so the basis
    /// points always sum to exactly [`BPS_PRECISION`].
    pub fn to_bps(&self) -> Result<[u32; 5], ConfigError> {
        let mut sum = 0.0;
        for category in Category::ALL {
            let value = self.get(category);
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::WeightRange { category, value });
            }
            sum += value;
        }
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum(sum));
        }

        let mut bps = [0u32; 5];
        for category in Category::ALL {
            bps[category.index()] = (self.get(category) * BPS_PRECISION as f64).round() as u32;
        }
        let total: u32 = bps.iter().sum();
        if total != BPS_PRECISION {
            let heaviest = (0..bps.len()).max_by_key(|&i| (bps[i], usize::MAX - i)).unwrap_or(0);
            bps[heaviest] = (bps[heaviest] + BPS_PRECISION).saturating_sub(total);
        }
        Ok(bps)
    }
}

/// Lower bounds of the medium, high, and critical risk levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskBoundaries {
    pub medium: u8,
    pub high: u8,
    pub critical: u8,
}

impl Default for RiskBoundaries {
    fn default() -> Self {
        Self {
            medium: DEFAULT_MEDIUM_BOUNDARY,
            high: DEFAULT_HIGH_BOUNDARY,
            critical: DEFAULT_CRITICAL_BOUNDARY,
        }
    }
}

impl RiskBoundaries {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ok = 0 < self.medium
            && self.medium < self.high
            && self.high < self.critical
            && self.critical <= MAX_SCORE;
        if ok {
            Ok(())
        } else {
            Err(ConfigError::NonMonotonicBoundaries {
                medium: self.medium,
                high: self.high,
                critical: self.critical,
            })
        }
    }
}

/// Thresholds used by the individual category scorers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub min_session_secs: u64,
    pub max_idle_gap_secs: u64,
    pub max_pickup_distance_km: u32,
    pub fingerprint_email_threshold: usize,
    /// Domains treated as disposable in addition to the built-in list.
    pub extra_disposable_domains: Vec<String>,
    /// CIDR ranges of anonymizing proxies and datacenter ASNs.
    pub high_risk_networks: Vec<String>,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            min_session_secs: DEFAULT_MIN_SESSION_SECS,
            max_idle_gap_secs: DEFAULT_MAX_IDLE_GAP_SECS,
            max_pickup_distance_km: DEFAULT_MAX_PICKUP_DISTANCE_KM,
            fingerprint_email_threshold: DEFAULT_FINGERPRINT_EMAIL_THRESHOLD,
            extra_disposable_domains: Vec::new(),
            high_risk_networks: Vec::new(),
        }
    }
}

/// Tunable engine policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub lookback_window_days: u32,
    pub scorer_timeout_ms: u64,
    pub weights: CategoryWeights,
    pub auto_approve_threshold: u8,
    pub risk_boundaries: RiskBoundaries,
    pub max_transition_retries: u32,
    pub max_cluster_size: usize,
    pub scorers: ScorerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lookback_window_days: DEFAULT_LOOKBACK_WINDOW_DAYS,
            scorer_timeout_ms: DEFAULT_SCORER_TIMEOUT_MS,
            weights: CategoryWeights::default(),
            auto_approve_threshold: DEFAULT_AUTO_APPROVE_THRESHOLD,
            risk_boundaries: RiskBoundaries::default(),
            max_transition_retries: DEFAULT_MAX_TRANSITION_RETRIES,
            max_cluster_size: DEFAULT_MAX_CLUSTER_SIZE,
            scorers: ScorerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Validate without consuming.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.clone().into_policy().map(|_| ())
    }

    /// Validate and compile into an immutable [`Policy`].
    pub fn into_policy(self) -> Result<Policy, ConfigError> {
        if self.lookback_window_days == 0 {
            return Err(invalid("lookback_window_days", "must be at least 1"));
        }
        if self.scorer_timeout_ms == 0 {
            return Err(invalid("scorer_timeout_ms", "must be positive"));
        }
        if self.auto_approve_threshold > MAX_SCORE {
            return Err(invalid("auto_approve_threshold", "must be <= 100"));
        }
        if self.max_transition_retries == 0 {
            return Err(invalid("max_transition_retries", "must be at least 1"));
        }
        if self.max_cluster_size == 0 {
            return Err(invalid("max_cluster_size", "must be at least 1"));
        }
        if self.scorers.fingerprint_email_threshold == 0 {
            return Err(invalid("scorers.fingerprint_email_threshold", "must be at least 1"));
        }
        self.risk_boundaries.validate()?;
        let weights_bps = self.weights.to_bps()?;

        let high_risk_networks = self
            .scorers
            .high_risk_networks
            .iter()
            .map(|s| s.parse::<IpNetwork>())
            .collect::<Result<Vec<_>, _>>()?;

        let extra_disposable_domains = self
            .scorers
            .extra_disposable_domains
            .iter()
            .map(|d| d.trim().trim_start_matches('@').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();

        Ok(Policy {
            config: self,
            weights_bps,
            high_risk_networks,
            extra_disposable_domains,
        })
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue { field, reason: reason.to_string() }
}

/// A validated, compiled [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct Policy {
    config: EngineConfig,
    weights_bps: [u32; 5],
    high_risk_networks: Vec<IpNetwork>,
    extra_disposable_domains: HashSet<String>,
}

impl Policy {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scorers(&self) -> &ScorerConfig {
        &self.config.scorers
    }

    pub fn boundaries(&self) -> &RiskBoundaries {
        &self.config.risk_boundaries
    }

    /// Weight of `category` in basis points.
    pub fn weight_bps(&self, category: Category) -> u32 {
        self.weights_bps[category.index()]
    }

    pub fn lookback(&self) -> Duration {
        Duration::days(i64::from(self.config.lookback_window_days))
    }

    pub fn scorer_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.config.scorer_timeout_ms)
    }

    /// First configured high-risk network containing `ip`.
    pub fn high_risk_network(&self, ip: &IpAddr) -> Option<&IpNetwork> {
        self.high_risk_networks.iter().find(|n| n.contains(ip))
    }

    pub fn is_extra_disposable(&self, domain: &str) -> bool {
        self.extra_disposable_domains.contains(domain)
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            weights_bps: [2_000, 1_500, 2_000, 1_500, 3_000],
            high_risk_networks: Vec::new(),
            extra_disposable_domains: HashSet::new(),
        }
    }
}

/// An IPv4 or IPv6 CIDR block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix: u8,
}

impl IpNetwork {
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(net) & mask == u32::from(*ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                u128::from(net) & mask == u128::from(*ip) & mask
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for IpNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl FromStr for IpNetwork {
    type Err = ConfigError;

    /// Parses `addr/prefix`; a bare address is a host route.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ConfigError::InvalidNetwork(s.to_string());
        let (addr_str, prefix_str) = match s.trim().split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (s.trim(), None),
        };
        let addr: IpAddr = addr_str.parse().map_err(|_| err())?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix_str {
            Some(p) => p.parse::<u8>().map_err(|_| err())?,
            None => max,
        };
        if prefix > max {
            return Err(err());
        }
        Ok(Self { addr, prefix })
    }
}
