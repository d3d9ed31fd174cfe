//! Presence reconciliation.
//!
//! One poll sweep produces a [`Snapshot`]; [`reconcile`] diffs it against the
//! [`PresenceSet`] carried over from the previous sweep and returns the
//! arrivals and departures. Nothing here does I/O or can fail: targets
//! without a usable identity are dropped while the snapshot is being built,
//! before reconciliation ever sees them.
//!
//! A sweep in which some modulations failed with a transport error is
//! *partial*. Tags last seen at a modulation that went unobserved are kept
//! as they are rather than departed, so RF noise on one family never shows
//! up as a spurious departure.

use std::collections::{BTreeMap, HashSet};

use crate::types::{Modulation, TagIdentity, TargetInfo};

// =============================================================================
// SNAPSHOT
// =============================================================================

/// A tag seen during one sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sighting {
    /// The tag's identity.
    pub identity: TagIdentity,
    /// Metadata reported for it.
    pub target: TargetInfo,
    /// Modulation it answered at.
    pub modulation: Modulation,
}

/// Unified view of every tag visible during one full sweep of a reader.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    sightings: Vec<Sighting>,
    seen: HashSet<TagIdentity>,
    unobserved: Vec<Modulation>,
    excluded: usize,
}

impl Snapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the targets a modulation answered with.
    ///
    /// Targets with no identity are counted as excluded and otherwise ignored.
    /// A tag already recorded under an earlier modulation keeps its first
    /// sighting.
    pub fn record(&mut self, modulation: Modulation, targets: impl IntoIterator<Item = TargetInfo>) {
        for target in targets {
            let Some(identity) = target.identity() else {
                self.excluded += 1;
                continue;
            };
            if self.seen.insert(identity.clone()) {
                self.sightings.push(Sighting {
                    identity,
                    target,
                    modulation,
                });
            }
        }
    }

    /// Records that a modulation was polled and nothing answered.
    pub fn record_timeout(&mut self, modulation: Modulation) {
        self.record(modulation, std::iter::empty());
    }

    /// Records that a modulation could not be polled this sweep.
    pub fn record_transport_error(&mut self, modulation: Modulation) {
        if !self.unobserved.contains(&modulation) {
            self.unobserved.push(modulation);
        }
    }

    /// Sightings in the order they were recorded.
    #[must_use]
    pub fn sightings(&self) -> &[Sighting] {
        &self.sightings
    }

    /// Whether the snapshot contains the identity.
    #[must_use]
    pub fn contains(&self, identity: &TagIdentity) -> bool {
        self.seen.contains(identity)
    }

    /// Modulations that failed with a transport error.
    #[must_use]
    pub fn unobserved(&self) -> &[Modulation] {
        &self.unobserved
    }

    /// Whether every polled modulation was observed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unobserved.is_empty()
    }

    /// Number of targets dropped for lack of an identity.
    #[must_use]
    pub const fn excluded(&self) -> usize {
        self.excluded
    }

    /// Number of distinct identities seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sightings.len()
    }

    /// Whether no tag was seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sightings.is_empty()
    }
}

// =============================================================================
// PRESENCE SET
// =============================================================================

/// Identities currently believed present on one reader, with the modulation
/// each was last seen at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceSet {
    tags: BTreeMap<TagIdentity, Modulation>,
}

impl PresenceSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the identity is present.
    #[must_use]
    pub fn contains(&self, identity: &TagIdentity) -> bool {
        self.tags.contains_key(identity)
    }

    /// Modulation the identity was last seen at.
    #[must_use]
    pub fn modulation_of(&self, identity: &TagIdentity) -> Option<Modulation> {
        self.tags.get(identity).copied()
    }

    /// Present identities in byte order.
    pub fn identities(&self) -> impl Iterator<Item = &TagIdentity> {
        self.tags.keys()
    }

    /// Present identities and their modulations in byte order.
    pub fn iter(&self) -> impl Iterator<Item = (&TagIdentity, Modulation)> {
        self.tags.iter().map(|(id, m)| (id, *m))
    }

    /// Number of present identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Whether nothing is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Forgets every identity without producing events.
    pub fn clear(&mut self) {
        self.tags.clear();
    }
}

// =============================================================================
// RECONCILIATION
// =============================================================================

/// Transitions produced by one call to [`reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Newly present tags, in sweep order.
    pub arrived: Vec<(TagIdentity, TargetInfo)>,
    /// Tags no longer present, in byte order.
    pub departed: Vec<TagIdentity>,
}

impl Reconciliation {
    /// Whether the call changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arrived.is_empty() && self.departed.is_empty()
    }
}

/// Diffs a sweep against the tracked state and advances the state.
///
/// - every identity in `snapshot` but not in `state` arrives and is added;
/// - every identity in `state` but not in `snapshot` departs and is removed,
///   unless it was last seen at a modulation the snapshot could not observe;
/// - identities in both are left alone apart from refreshing their modulation.
///
/// For a complete snapshot the state afterwards equals the snapshot's
/// identity set, so a second call with the same snapshot yields no events.
pub fn reconcile(snapshot: &Snapshot, state: &mut PresenceSet) -> Reconciliation {
    let departed: Vec<TagIdentity> = state
        .tags
        .iter()
        .filter(|(identity, modulation)| {
            !snapshot.contains(identity) && !snapshot.unobserved.contains(modulation)
        })
        .map(|(identity, _)| identity.clone())
        .collect();

    for identity in &departed {
        state.tags.remove(identity);
    }

    let mut arrived = Vec::new();
    for sighting in &snapshot.sightings {
        if state
            .tags
            .insert(sighting.identity.clone(), sighting.modulation)
            .is_none()
        {
            arrived.push((sighting.identity.clone(), sighting.target.clone()));
        }
    }

    Reconciliation { arrived, departed }
}

// =============================================================================
// TRACKER
// =============================================================================

/// Owns one reader's [`PresenceSet`] across sweeps.
///
/// Only ever driven from its reader's poll loop, so it carries no locking.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    state: PresenceSet,
}

impl PresenceTracker {
    /// Creates a tracker with nothing present.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconciles one sweep against the tracked state.
    pub fn reconcile(&mut self, snapshot: &Snapshot) -> Reconciliation {
        reconcile(snapshot, &mut self.state)
    }

    /// The tracked state.
    #[must_use]
    pub const fn present(&self) -> &PresenceSet {
        &self.state
    }

    /// Discards the tracked state without producing departures.
    pub fn reset(&mut self) {
        self.state.clear();
    }

    /// Number of tags present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.len()
    }

    /// Whether nothing is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}
