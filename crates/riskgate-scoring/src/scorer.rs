//! The closed set of category scorers and the snapshot they read from.

use std::collections::BTreeSet;
use std::sync::Arc;

use riskgate_core::config::Policy;
use riskgate_core::error::RiskError;
use riskgate_core::traits::SignalHistory;
use riskgate_core::types::{Category, CategoryScore, LinkKey, RiskSignals};

use crate::cluster::{Cluster, build_cluster};
use crate::{device, email, location, session, velocity};

/// Everything a scorer may look at, captured once per assessment.
///
/// Built under a single read of the history so concurrently submitted
/// bookings cannot appear or vanish halfway through an assessment.
#[derive(Debug, Clone)]
pub struct ScoringContext {
    pub signals: RiskSignals,
    pub cluster: Cluster,
    /// Distinct emails, other than this booking's, seen on the same device
    /// fingerprint within the lookback window.
    pub fingerprint_emails: usize,
    pub policy: Arc<Policy>,
}

impl ScoringContext {
    /// Snapshot the history relevant to `signals`.
    pub fn snapshot<H: SignalHistory + ?Sized>(
        history: &H,
        signals: RiskSignals,
        policy: Arc<Policy>,
    ) -> Result<Self, RiskError> {
        let cluster = build_cluster(history, &signals, policy.lookback(), policy.config().max_cluster_size)?;
        let fingerprint_emails = fingerprint_emails(history, &signals, &policy)?;
        Ok(Self { signals, cluster, fingerprint_emails, policy })
    }

    /// Context with no history at all.
    pub fn isolated(signals: RiskSignals, policy: Arc<Policy>) -> Self {
        let cluster = Cluster::empty(signals.booking_id.clone());
        Self { signals, cluster, fingerprint_emails: 0, policy }
    }
}

fn fingerprint_emails<H: SignalHistory + ?Sized>(
    history: &H,
    signals: &RiskSignals,
    policy: &Policy,
) -> Result<usize, RiskError> {
    let Some(fp) = signals.device_fingerprint.as_deref().filter(|s| !s.is_empty()) else {
        return Ok(0);
    };
    let lookback = policy.lookback();
    let mut emails = BTreeSet::new();
    for id in history.bookings_with_key(&LinkKey::Device(fp.to_string()))? {
        if id == signals.booking_id {
            continue;
        }
        let Some(other) = history.signals(&id)? else { continue };
        if (other.captured_at - signals.captured_at).abs() > lookback {
            continue;
        }
        if let Some(e) = other.email.filter(|e| Some(e) != signals.email.as_ref()) {
            emails.insert(e);
        }
    }
    Ok(emails.len())
}

/// One scorer per category. The set is closed; adding a category is a
/// data model change, not a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scorer {
    Email,
    Session,
    Device,
    Location,
    Velocity,
}

impl Scorer {
    pub const ALL: [Scorer; 5] = [Scorer::Email, Scorer::Session, Scorer::Device, Scorer::Location, Scorer::Velocity];

    pub fn for_category(category: Category) -> Self {
        match category {
            Category::Email => Self::Email,
            Category::Session => Self::Session,
            Category::Device => Self::Device,
            Category::Location => Self::Location,
            Category::Velocity => Self::Velocity,
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Self::Email => Category::Email,
            Self::Session => Category::Session,
            Self::Device => Category::Device,
            Self::Location => Category::Location,
            Self::Velocity => Category::Velocity,
        }
    }

    /// Score the snapshot. Pure: no I/O and no shared state.
    pub fn score(&self, ctx: &ScoringContext) -> CategoryScore {
        match self {
            Self::Email => email::score(&ctx.signals, &ctx.policy),
            Self::Session => session::score(&ctx.signals, ctx.policy.scorers()),
            Self::Device => device::score(&ctx.signals, ctx.fingerprint_emails, ctx.policy.scorers()),
            Self::Location => location::score(&ctx.signals, &ctx.policy),
            Self::Velocity => velocity::score(&ctx.cluster),
        }
    }
}

/// Accumulates weighted factors for one category, capped at 100.
#[derive(Debug)]
pub(crate) struct Tally {
    category: Category,
    points: u32,
    factors: Vec<String>,
}

impl Tally {
    pub(crate) fn new(category: Category) -> Self {
        Self { category, points: 0, factors: Vec::new() }
    }

    pub(crate) fn add(&mut self, points: u32, factor: impl Into<String>) {
        self.points = self.points.saturating_add(points);
        self.factors.push(factor.into());
    }

    /// Record a factor that carries no penalty.
    pub(crate) fn note(&mut self, factor: impl Into<String>) {
        self.factors.push(factor.into());
    }

    pub(crate) fn finish(self) -> CategoryScore {
        CategoryScore {
            category: self.category,
            score: self.points.min(u32::from(riskgate_core::constants::MAX_SCORE)) as u8,
            factors: self.factors,
        }
    }
}
