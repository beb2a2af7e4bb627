//! Nearest-neighbor construction with merge/split rebalancing.

use tracing::warn;

use crate::constraints::ConstraintSet;
use crate::error::BuildError;
use crate::geo;
use crate::model::{Beat, Customer, Depot, Stop, Territory};

use super::{
    BeatBuilder, finalize, merge_undersized, resolve_territory, split_oversized, verify_coverage,
};

/// Greedy builder: walk outward from the depot, always appending the nearest
/// unvisited customer that still fits the working-time budget, opening a new
/// beat whenever the dynamic target size is reached. A rebalancing pass then
/// merges undersized beats and splits oversized ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighborBuilder;

impl BeatBuilder for NearestNeighborBuilder {
    fn build(
        &self,
        territory: &Territory,
        customers: &[Customer],
        depot: &Depot,
        constraints: &ConstraintSet,
    ) -> Result<Vec<Beat>, BuildError> {
        let resolved = resolve_territory(territory, customers)?;

        let mut remaining: Vec<usize> = (0..resolved.len()).collect();
        let mut beats: Vec<Beat> = Vec::new();

        while !remaining.is_empty() {
            let target = dynamic_target(remaining.len(), constraints.max_outlets_per_beat);
            let mut beat = Beat::new(beats.len(), *depot, territory.id);
            let mut position = depot.coords();
            let mut elapsed_mins = 0.0;

            while beat.size() < target && !remaining.is_empty() {
                let (slot, distance_km) = nearest_remaining(&remaining, &resolved, position);
                let leg_mins = constraints.leg_time_mins(distance_km);

                if elapsed_mins + leg_mins > constraints.max_working_time_mins {
                    if beat.is_empty() {
                        // Nothing fits an empty beat; take the nearest anyway
                        // so the pass always advances. The validator will
                        // report the overrun.
                        warn!(
                            territory = territory.id,
                            distance_km,
                            "working-time budget too small for any visit, forcing nearest customer"
                        );
                    } else {
                        break;
                    }
                }

                let index = remaining.remove(slot);
                let customer = resolved[index];
                beat.stops.push(Stop::from_customer(customer, territory.id));
                elapsed_mins += leg_mins;
                position = customer.coords();
            }

            beats.push(beat);
        }

        merge_undersized(&mut beats, constraints);
        split_oversized(&mut beats, depot, constraints);
        verify_coverage(&mut beats, territory, &resolved, depot, constraints);
        finalize(&mut beats, constraints);
        Ok(beats)
    }
}

/// Beat size to aim for given how many customers are left: everything if it
/// fits under the cap, an even split when slightly above it, the cap
/// otherwise.
pub(crate) fn dynamic_target(remaining: usize, max_per_beat: usize) -> usize {
    if remaining <= max_per_beat {
        remaining
    } else if remaining < 2 * max_per_beat {
        remaining.div_ceil(2)
    } else {
        max_per_beat
    }
}

fn nearest_remaining(
    remaining: &[usize],
    resolved: &[&Customer],
    position: (f64, f64),
) -> (usize, f64) {
    let mut best_slot = 0;
    let mut best_dist = f64::INFINITY;
    for (slot, &index) in remaining.iter().enumerate() {
        let dist = geo::haversine_km(position, resolved[index].coords());
        if dist < best_dist {
            best_dist = dist;
            best_slot = slot;
        }
    }
    (best_slot, best_dist)
}
