//! Beat construction strategies and their shared plumbing.
//!
//! Every strategy implements [`BeatBuilder`] over the same contract: consume
//! one territory plus the constraint set, emit beats covering every territory
//! customer exactly once. The shared passes in this module (coverage
//! verification, merge/split rebalancing, finalization) run after the
//! strategy-specific construction so the four builders stay honest about the
//! contract even when their heuristics leave gaps.

mod annealing;
mod enhanced;
mod isolation;
mod nearest;

pub use annealing::{AnnealingBuilder, AnnealingOptions};
pub use enhanced::{EnhancedBuilder, EnhancedOptions};
pub use isolation::{IsolationBuilder, IsolationOptions};
pub use nearest::NearestNeighborBuilder;

use std::collections::HashMap;

use tracing::{info, warn};

use crate::constraints::ConstraintSet;
use crate::error::BuildError;
use crate::ledger::AssignmentLedger;
use crate::metrics;
use crate::model::{Beat, Customer, Depot, Stop, Strategy, Territory};

/// Common contract for the four construction strategies.
pub trait BeatBuilder {
    fn build(
        &self,
        territory: &Territory,
        customers: &[Customer],
        depot: &Depot,
        constraints: &ConstraintSet,
    ) -> Result<Vec<Beat>, BuildError>;
}

/// Build beats for one territory with the chosen strategy.
///
/// `customers` is the dataset the territory's ids resolve against; it may be
/// the full customer list or a pre-filtered slice.
pub fn build_beats(
    territory: &Territory,
    customers: &[Customer],
    depot: &Depot,
    constraints: &ConstraintSet,
    strategy: Strategy,
) -> Result<Vec<Beat>, BuildError> {
    info!(territory = territory.id, ?strategy, size = territory.size(), "building beats");
    match strategy {
        Strategy::NearestNeighbor => {
            NearestNeighborBuilder::default().build(territory, customers, depot, constraints)
        }
        Strategy::Annealing => {
            AnnealingBuilder::default().build(territory, customers, depot, constraints)
        }
        Strategy::Isolation => {
            IsolationBuilder::default().build(territory, customers, depot, constraints)
        }
        Strategy::Enhanced => {
            EnhancedBuilder::default().build(territory, customers, depot, constraints)
        }
    }
}

/// Like [`build_beats`], but answers an infrastructural failure (and only
/// that) by re-running with the nearest-neighbor strategy. Constraint
/// infeasibility always propagates.
pub fn build_beats_with_fallback(
    territory: &Territory,
    customers: &[Customer],
    depot: &Depot,
    constraints: &ConstraintSet,
    strategy: Strategy,
) -> Result<Vec<Beat>, BuildError> {
    match build_beats(territory, customers, depot, constraints, strategy) {
        Err(err) if err.is_infrastructural() && strategy != Strategy::NearestNeighbor => {
            warn!(
                territory = territory.id,
                ?strategy,
                error = %err,
                "strategy failed on infrastructure, falling back to nearest neighbor"
            );
            build_beats(territory, customers, depot, constraints, Strategy::NearestNeighbor)
        }
        other => other,
    }
}

/// Resolve a territory's customer ids against the dataset, preserving
/// membership order.
pub(crate) fn resolve_territory<'a>(
    territory: &Territory,
    customers: &'a [Customer],
) -> Result<Vec<&'a Customer>, BuildError> {
    let by_id: HashMap<&str, &Customer> =
        customers.iter().map(|c| (c.id.as_str(), c)).collect();

    let mut resolved = Vec::with_capacity(territory.customer_ids.len());
    for id in &territory.customer_ids {
        match by_id.get(id.as_str()) {
            Some(&customer) => resolved.push(customer),
            None => {
                return Err(BuildError::UnknownCustomer {
                    territory: territory.id,
                    id: id.clone(),
                });
            }
        }
    }
    if resolved.is_empty() {
        return Err(BuildError::EmptyTerritory {
            territory: territory.id,
        });
    }
    Ok(resolved)
}

/// Post-construction contract check: the union of all beats must equal the
/// territory's customer set exactly once. Duplicates are dropped (first
/// occurrence wins) and missing customers force-assigned to the most nearly
/// compatible beat, or a new singleton beat. Logged as repairs, not failures.
pub(crate) fn verify_coverage(
    beats: &mut Vec<Beat>,
    territory: &Territory,
    resolved: &[&Customer],
    depot: &Depot,
    constraints: &ConstraintSet,
) {
    // The run's ownership ledger: every stop claims its customer id; a claim
    // that already has an owner is a duplicate and is dropped.
    let mut ledger = AssignmentLedger::with_capacity(resolved.len());
    let mut duplicates = 0usize;
    for (index, beat) in beats.iter_mut().enumerate() {
        beat.stops.retain(|stop| {
            if ledger.is_assigned(&stop.customer_id) {
                duplicates += 1;
                return false;
            }
            ledger.assign(&stop.customer_id, index);
            true
        });
    }
    if duplicates > 0 {
        warn!(territory = territory.id, duplicates, "removed duplicated stops during coverage repair");
    }

    // Force-assign anything the strategy missed.
    for customer in resolved {
        if ledger.is_assigned(&customer.id) {
            continue;
        }
        let target = beats
            .iter_mut()
            .filter(|b| b.size() < constraints.max_outlets_per_beat)
            .min_by(|a, b| {
                let da = a.centroid_distance_km(customer.coords());
                let db = b.centroid_distance_km(customer.coords());
                da.partial_cmp(&db).expect("distances are finite")
            });
        match target {
            Some(beat) => {
                warn!(
                    territory = territory.id,
                    customer = %customer.id,
                    beat = beat.id,
                    "coverage repair: force-assigned missing customer"
                );
                beat.stops.push(Stop::from_customer(customer, territory.id));
            }
            None => {
                warn!(
                    territory = territory.id,
                    customer = %customer.id,
                    "coverage repair: opened singleton beat for missing customer"
                );
                let mut beat = Beat::new(beats.len(), *depot, territory.id);
                beat.stops.push(Stop::from_customer(customer, territory.id));
                beats.push(beat);
            }
        }
    }
}

/// Merge beats below the minimum into a same-territory sibling with spare
/// capacity, nearest centroid first. Beats left undersized (no sibling can
/// take them) stay as they are and surface in the validation report.
pub(crate) fn merge_undersized(beats: &mut Vec<Beat>, constraints: &ConstraintSet) {
    loop {
        let merge = beats
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.is_empty() && b.size() < constraints.min_outlets_per_beat)
            .find_map(|(source, small)| {
                let centroid = small.centroid();
                beats
                    .iter()
                    .enumerate()
                    .filter(|(i, b)| {
                        *i != source
                            && !b.is_empty()
                            && b.territory_ids.intersection(&small.territory_ids).next().is_some()
                            && b.size() + small.size() <= constraints.max_outlets_per_beat
                    })
                    .min_by(|(_, a), (_, b)| {
                        let da = a.centroid_distance_km(centroid);
                        let db = b.centroid_distance_km(centroid);
                        da.partial_cmp(&db).expect("distances are finite")
                    })
                    .map(|(target, _)| (source, target))
            });

        let Some((source, target)) = merge else { break };
        let moved: Vec<Stop> = std::mem::take(&mut beats[source].stops);
        let moved_territories: Vec<usize> = beats[source].territory_ids.iter().copied().collect();
        beats[target].stops.extend(moved);
        beats[target].territory_ids.extend(moved_territories);
        beats.remove(source);
    }
}

/// Split beats above the maximum at the midpoint, repeatedly, so every
/// resulting beat is within the cap.
pub(crate) fn split_oversized(beats: &mut Vec<Beat>, depot: &Depot, constraints: &ConstraintSet) {
    let mut cursor = 0;
    while cursor < beats.len() {
        if beats[cursor].size() > constraints.max_outlets_per_beat {
            let mid = beats[cursor].size() / 2;
            let tail: Vec<Stop> = beats[cursor].stops.split_off(mid);
            let territory_id = tail
                .first()
                .map(|s| s.territory_id)
                .unwrap_or_else(|| *beats[cursor].territory_ids.iter().next().expect("beat has a territory"));
            let mut new_beat = Beat::new(beats.len(), *depot, territory_id);
            for stop in &tail {
                new_beat.territory_ids.insert(stop.territory_id);
            }
            new_beat.stops = tail;
            beats.push(new_beat);
            // Re-check the shortened beat; it may still be oversized.
            continue;
        }
        cursor += 1;
    }
}

/// Drop empty beats, recompute metrics, renumber ids sequentially.
pub(crate) fn finalize(beats: &mut Vec<Beat>, constraints: &ConstraintSet) {
    beats.retain(|b| !b.is_empty());
    for (index, beat) in beats.iter_mut().enumerate() {
        beat.id = index;
    }
    metrics::recompute_all(beats, constraints);
}
