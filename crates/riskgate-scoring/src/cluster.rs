//! Relationship clustering over shared identity signals.
//!
//! Two bookings are directly related when they share an exact device
//! fingerprint, IP address, or email address AND were captured within the
//! lookback window of each other. The walk follows the transitive closure
//! of that relation, but only component members captured within the
//! lookback window of the anchor are reported. Both conditions are
//! symmetric, so if A lists B, B lists A.
//!
//! Rules:
//! 1. Any single shared key is enough (OR across signal types).
//! 2. Absent, empty, loopback, and unspecified values are never keys.
//! 3. A chain through time may bridge to older bookings, but they are
//!    never reported unless they fall inside the anchor's own window.
//! 4. Expansion stops once `max_size` bookings are walked; the cluster is
//!    then marked truncated.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use riskgate_core::error::RiskError;
use riskgate_core::traits::SignalHistory;
use riskgate_core::types::{BookingId, DispositionState, LinkKey, LinkKind, RelatedBooking, RiskSignals};

/// Another booking in the anchor's cluster, with its last known outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMember {
    pub booking_id: BookingId,
    pub captured_at: DateTime<Utc>,
    pub score: Option<u8>,
    pub state: Option<DispositionState>,
    /// Key types through which it is directly related to another member.
    pub links: Vec<LinkKind>,
}

impl ClusterMember {
    pub fn is_adverse(&self) -> bool {
        self.state.is_some_and(|s| s.is_adverse())
    }
}

/// Bookings related to the anchor, excluding the anchor itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub anchor: BookingId,
    /// Sorted by booking id.
    pub members: Vec<ClusterMember>,
    pub truncated: bool,
}

impl Cluster {
    pub fn empty(anchor: BookingId) -> Self {
        Self { anchor, members: Vec::new(), truncated: false }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members already rejected or marked fraudulent.
    pub fn adverse_count(&self) -> usize {
        self.members.iter().filter(|m| m.is_adverse()).count()
    }

    pub fn contains(&self, booking: &BookingId) -> bool {
        self.members.iter().any(|m| &m.booking_id == booking)
    }

    /// Members in the form recorded on an assessment.
    pub fn related(&self) -> Vec<RelatedBooking> {
        self.members
            .iter()
            .map(|m| RelatedBooking {
                booking_id: m.booking_id.clone(),
                score: m.score,
                state: m.state,
                links: m.links.clone(),
            })
            .collect()
    }
}

/// Whether two captures are close enough in time to be related.
fn within(a: DateTime<Utc>, b: DateTime<Utc>, lookback: Duration) -> bool {
    (a - b).abs() <= lookback
}

/// Build `anchor`'s cluster from `history`.
///
/// Breadth-first over direct relations, so every member found is connected
/// to the anchor even when the walk is cut short by `max_size`. Bookings
/// walked through but captured outside the anchor's lookback window are
/// dropped from the result. Key lookups and signal reads are cached for the
/// duration of the call.
pub fn build_cluster<H: SignalHistory + ?Sized>(
    history: &H,
    anchor: &RiskSignals,
    lookback: Duration,
    max_size: usize,
) -> Result<Cluster, RiskError> {
    let mut known: HashMap<BookingId, RiskSignals> = HashMap::new();
    let mut key_members: HashMap<LinkKey, Vec<BookingId>> = HashMap::new();
    let mut links: BTreeMap<BookingId, BTreeSet<LinkKind>> = BTreeMap::new();
    let mut queue: VecDeque<BookingId> = VecDeque::new();
    let mut truncated = false;

    known.insert(anchor.booking_id.clone(), anchor.clone());
    queue.push_back(anchor.booking_id.clone());

    'walk: while let Some(current) = queue.pop_front() {
        let Some(node) = known.get(&current).cloned() else { continue };
        for key in node.link_keys() {
            if !key_members.contains_key(&key) {
                let ids = history.bookings_with_key(&key)?;
                key_members.insert(key.clone(), ids);
            }
            let candidates = key_members.get(&key).cloned().unwrap_or_default();
            for id in candidates {
                if id == current {
                    continue;
                }
                let other_at = match known.get(&id) {
                    Some(s) => s.captured_at,
                    None => match history.signals(&id)? {
                        Some(s) => s.captured_at,
                        None => {
                            debug!(booking = %id, "indexed booking has no signals, skipping");
                            continue;
                        }
                    },
                };
                if !within(node.captured_at, other_at, lookback) {
                    continue;
                }
                if !known.contains_key(&id) {
                    // Anchor is in `known` but is not a member.
                    if known.len() > max_size {
                        truncated = true;
                        break 'walk;
                    }
                    if let Some(s) = history.signals(&id)? {
                        known.insert(id.clone(), s);
                        queue.push_back(id.clone());
                    }
                }
                let kind = key.kind();
                links.entry(id.clone()).or_default().insert(kind);
                links.entry(current.clone()).or_default().insert(kind);
            }
        }
    }

    let mut members = Vec::with_capacity(known.len().saturating_sub(1));
    for (id, signals) in &known {
        if id == &anchor.booking_id || !within(anchor.captured_at, signals.captured_at, lookback) {
            continue;
        }
        members.push(ClusterMember {
            booking_id: id.clone(),
            captured_at: signals.captured_at,
            score: history.latest_score(id)?,
            state: history.current_state(id)?,
            links: links.get(id).map(|k| k.iter().copied().collect()).unwrap_or_default(),
        });
    }
    members.sort_by(|a, b| a.booking_id.cmp(&b.booking_id));

    if truncated {
        debug!(booking = %anchor.booking_id, members = members.len(), "cluster truncated");
    }
    Ok(Cluster { anchor: anchor.booking_id.clone(), members, truncated })
}

/// Disjoint-set forest with path halving and union by size.
#[derive(Debug, Clone)]
pub struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self { parent: (0..n).collect(), size: vec![1; n] }
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
    }
}

/// Partition a batch of bookings into clusters.
///
/// Per key, bookings are sorted by capture time and consecutive pairs within
/// `lookback` are joined; on a time line that yields exactly the components
/// of the pairwise relation. Each group is sorted by id, and groups are
/// ordered by their first id. Singletons are included.
pub fn partition(signals: &[RiskSignals], lookback: Duration) -> Vec<Vec<BookingId>> {
    let mut by_key: HashMap<LinkKey, Vec<usize>> = HashMap::new();
    for (i, s) in signals.iter().enumerate() {
        for key in s.link_keys() {
            by_key.entry(key).or_default().push(i);
        }
    }

    let mut uf = UnionFind::new(signals.len());
    for idxs in by_key.values_mut() {
        idxs.sort_by_key(|&i| signals[i].captured_at);
        for pair in idxs.windows(2) {
            if within(signals[pair[0]].captured_at, signals[pair[1]].captured_at, lookback) {
                uf.union(pair[0], pair[1]);
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<BookingId>> = BTreeMap::new();
    for i in 0..signals.len() {
        let root = uf.find(i);
        groups.entry(root).or_default().push(signals[i].booking_id.clone());
    }
    let mut out: Vec<Vec<BookingId>> = groups
        .into_values()
        .map(|mut g| {
            g.sort();
            g.dedup();
            g
        })
        .collect();
    out.sort();
    out
}
