//! Density-seeded isolation builder.
//!
//! The inverse of the annealer's intra-beat tightness: this strategy enforces
//! a minimum separation between stops that land in *different* beats of the
//! same territory, so two salespeople never work the same street. A fixed
//! number of beats is seeded, customers are placed where they break nothing
//! (or the least), and a bounded repair loop relocates the worst offenders.

use tracing::{debug, warn};

use crate::constraints::ConstraintSet;
use crate::error::BuildError;
use crate::geo;
use crate::model::{Beat, Customer, Depot, Stop, Territory};

use super::{BeatBuilder, finalize, resolve_territory, verify_coverage};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsolationOptions {
    /// Beats to seed per territory; 0 derives the count from the territory
    /// size and the per-beat cap.
    pub beats_per_territory: usize,
    /// Repair rounds before the residue is accepted as reduced compliance.
    pub max_repair_rounds: usize,
    /// Corrective relocations attempted per round.
    pub max_moves_per_round: usize,
}

impl Default for IsolationOptions {
    fn default() -> Self {
        Self {
            beats_per_territory: 0,
            max_repair_rounds: 10,
            max_moves_per_round: 20,
        }
    }
}

/// Separation-enforcing beat builder.
#[derive(Debug, Clone, Default)]
pub struct IsolationBuilder {
    pub options: IsolationOptions,
}

impl IsolationBuilder {
    pub fn new(options: IsolationOptions) -> Self {
        Self { options }
    }
}

impl BeatBuilder for IsolationBuilder {
    fn build(
        &self,
        territory: &Territory,
        customers: &[Customer],
        depot: &Depot,
        constraints: &ConstraintSet,
    ) -> Result<Vec<Beat>, BuildError> {
        let resolved = resolve_territory(territory, customers)?;
        let n = resolved.len();

        let beat_count = if self.options.beats_per_territory > 0 {
            self.options.beats_per_territory
        } else {
            n.div_ceil(constraints.max_outlets_per_beat).max(1)
        };

        // Everyone within the isolation threshold of everyone else, computed
        // once; placement and repair both read from it.
        let close = close_neighbors(&resolved, constraints.min_isolation_km);

        let mut assignment: Vec<Vec<usize>> = vec![Vec::new(); beat_count];
        let mut owner: Vec<usize> = vec![usize::MAX; n];

        // Simple spatial key keeps nearby customers adjacent in placement
        // order, which lets the zero-violation branch do most of the work.
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            let ka = (resolved[a].lat, resolved[a].lng);
            let kb = (resolved[b].lat, resolved[b].lng);
            ka.partial_cmp(&kb).expect("coordinates must not be NaN")
        });

        for index in order {
            let placement = place(index, &assignment, &owner, &close, constraints);
            assignment[placement].push(index);
            owner[index] = placement;
        }

        let residual = repair(
            &mut assignment,
            &mut owner,
            &close,
            constraints,
            &self.options,
        );
        if residual > 0 {
            warn!(
                territory = territory.id,
                residual,
                "isolation violations remain after bounded repair; carried forward"
            );
        }

        let mut beats = materialize(&assignment, &resolved, territory.id, depot);
        verify_coverage(&mut beats, territory, &resolved, depot, constraints);
        finalize(&mut beats, constraints);
        Ok(beats)
    }
}

/// For each customer, the indices closer than the isolation threshold, with
/// their distances.
fn close_neighbors(resolved: &[&Customer], threshold_km: f64) -> Vec<Vec<(usize, f64)>> {
    let n = resolved.len();
    let mut close = vec![Vec::new(); n];
    for i in 0..n {
        for j in (i + 1)..n {
            let dist = geo::haversine_km(resolved[i].coords(), resolved[j].coords());
            if dist < threshold_km {
                close[i].push((j, dist));
                close[j].push((i, dist));
            }
        }
    }
    close
}

/// Cross-beat violations `index` would have if it lived in `beat`: its close
/// neighbors that are already placed somewhere else.
fn violations_in(
    index: usize,
    beat: usize,
    owner: &[usize],
    close: &[Vec<(usize, f64)>],
) -> usize {
    close[index]
        .iter()
        .filter(|&&(neighbor, _)| owner[neighbor] != usize::MAX && owner[neighbor] != beat)
        .count()
}

/// First beat with zero new violations, else fewest violations, ties broken
/// by smallest current size. Beats with spare capacity are preferred when any
/// exist.
fn place(
    index: usize,
    assignment: &[Vec<usize>],
    owner: &[usize],
    close: &[Vec<(usize, f64)>],
    constraints: &ConstraintSet,
) -> usize {
    let mut candidates: Vec<usize> = (0..assignment.len())
        .filter(|&b| assignment[b].len() < constraints.max_outlets_per_beat)
        .collect();
    if candidates.is_empty() {
        candidates = (0..assignment.len()).collect();
    }

    for &beat in &candidates {
        if violations_in(index, beat, owner, close) == 0 {
            return beat;
        }
    }

    *candidates
        .iter()
        .min_by_key(|&&beat| (violations_in(index, beat, owner, close), assignment[beat].len()))
        .expect("at least one beat is always seeded")
}

/// Bounded corrective-relocation loop. Only zero-violation relocations are
/// taken, so the total violation count is non-increasing across rounds.
/// Returns the residual violation count.
fn repair(
    assignment: &mut [Vec<usize>],
    owner: &mut [usize],
    close: &[Vec<(usize, f64)>],
    constraints: &ConstraintSet,
    options: &IsolationOptions,
) -> usize {
    for round in 0..options.max_repair_rounds {
        let pairs = violating_pairs(owner, close);
        if pairs.is_empty() {
            return 0;
        }
        debug!(round, pairs = pairs.len(), "isolation repair round");

        let mut moves = 0;
        for (a, b) in &pairs {
            if moves >= options.max_moves_per_round {
                break;
            }
            // The pair may have been fixed by an earlier move this round.
            if owner[*a] == owner[*b] {
                continue;
            }
            if try_relocate(*a, assignment, owner, close, constraints)
                || try_relocate(*b, assignment, owner, close, constraints)
            {
                moves += 1;
            }
        }

        if moves == 0 {
            break; // no beneficial move exists
        }
    }

    violating_pairs(owner, close).len()
}

/// Cross-beat pairs under the threshold, sorted by ascending distance so the
/// worst offenders are repaired first.
fn violating_pairs(owner: &[usize], close: &[Vec<(usize, f64)>]) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for (a, neighbors) in close.iter().enumerate() {
        for &(b, dist) in neighbors {
            if a < b && owner[a] != owner[b] {
                pairs.push((a, b, dist));
            }
        }
    }
    pairs.sort_by(|x, y| x.2.partial_cmp(&y.2).expect("distances are finite"));
    pairs.into_iter().map(|(a, b, _)| (a, b)).collect()
}

/// Move `index` to a beat where it has zero cross-beat violations and spare
/// capacity. Returns whether a move happened.
fn try_relocate(
    index: usize,
    assignment: &mut [Vec<usize>],
    owner: &mut [usize],
    close: &[Vec<(usize, f64)>],
    constraints: &ConstraintSet,
) -> bool {
    let from = owner[index];
    let home = (0..assignment.len()).find(|&beat| {
        beat != from
            && assignment[beat].len() < constraints.max_outlets_per_beat
            && violations_in(index, beat, owner, close) == 0
    });
    let Some(to) = home else {
        return false;
    };

    assignment[from].retain(|&member| member != index);
    assignment[to].push(index);
    owner[index] = to;
    true
}

fn materialize(
    assignment: &[Vec<usize>],
    resolved: &[&Customer],
    territory_id: usize,
    depot: &Depot,
) -> Vec<Beat> {
    assignment
        .iter()
        .filter(|members| !members.is_empty())
        .enumerate()
        .map(|(id, members)| {
            let mut beat = Beat::new(id, *depot, territory_id);
            for &member in members {
                beat.stops
                    .push(Stop::from_customer(resolved[member], territory_id));
            }
            beat
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(id: &str, lat: f64, lng: f64) -> Customer {
        Customer::new(id, lat, lng)
    }

    fn territory_of(customers: &[Customer]) -> Territory {
        Territory {
            id: 0,
            customer_ids: customers.iter().map(|c| c.id.clone()).collect(),
            rev1_total: 0.0,
            rev2_total: 0.0,
            center: (0.0, 0.0),
            angular_bounds: None,
        }
    }

    /// Two pockets ~5 km apart, 4 customers each.
    fn two_pockets() -> Vec<Customer> {
        let mut customers = Vec::new();
        for i in 0..4 {
            customers.push(customer(&format!("w{}", i), 12.900 + i as f64 * 0.0005, 77.600));
        }
        for i in 0..4 {
            customers.push(customer(&format!("e{}", i), 12.900 + i as f64 * 0.0005, 77.646));
        }
        customers
    }

    #[test]
    fn test_pockets_stay_whole() {
        let customers = two_pockets();
        let territory = territory_of(&customers);
        let depot = Depot::new(12.9, 77.62);
        let constraints = ConstraintSet {
            min_outlets_per_beat: 1,
            max_outlets_per_beat: 6,
            min_isolation_km: 0.5,
            ..ConstraintSet::default()
        };
        let builder = IsolationBuilder::new(IsolationOptions {
            beats_per_territory: 2,
            ..IsolationOptions::default()
        });

        let beats = builder
            .build(&territory, &customers, &depot, &constraints)
            .unwrap();

        assert_eq!(beats.len(), 2);
        for beat in &beats {
            let west: Vec<bool> = beat.customer_ids().map(|id| id.starts_with('w')).collect();
            assert!(
                west.iter().all(|&w| w) || west.iter().all(|&w| !w),
                "a beat mixed the two pockets"
            );
        }
    }

    #[test]
    fn test_repair_never_increases_violations() {
        // A line of customers 300 m apart with a 500 m threshold: heavily
        // conflicted whatever the split; repair must monotonically improve.
        let customers: Vec<Customer> = (0..10)
            .map(|i| customer(&format!("c{}", i), 12.900 + i as f64 * 0.0027, 77.600))
            .collect();
        let resolved: Vec<&Customer> = customers.iter().collect();
        let constraints = ConstraintSet {
            max_outlets_per_beat: 5,
            min_isolation_km: 0.5,
            ..ConstraintSet::default()
        };
        let close = close_neighbors(&resolved, constraints.min_isolation_km);

        let mut assignment: Vec<Vec<usize>> = vec![Vec::new(), Vec::new()];
        let mut owner = vec![usize::MAX; 10];
        // Deliberately bad split: alternate beats.
        for i in 0..10 {
            assignment[i % 2].push(i);
            owner[i] = i % 2;
        }

        let mut last = violating_pairs(&owner, &close).len();
        assert!(last > 0);
        for _ in 0..5 {
            let residual = repair(
                &mut assignment,
                &mut owner,
                &close,
                &constraints,
                &IsolationOptions {
                    max_repair_rounds: 1,
                    max_moves_per_round: 4,
                    ..IsolationOptions::default()
                },
            );
            assert!(residual <= last, "violations grew: {} -> {}", last, residual);
            last = residual;
        }
    }

    #[test]
    fn test_covers_everyone() {
        let customers = two_pockets();
        let territory = territory_of(&customers);
        let depot = Depot::new(12.9, 77.62);
        let constraints = ConstraintSet {
            min_outlets_per_beat: 1,
            max_outlets_per_beat: 3,
            min_isolation_km: 0.5,
            ..ConstraintSet::default()
        };

        let beats = IsolationBuilder::default()
            .build(&territory, &customers, &depot, &constraints)
            .unwrap();

        let total: usize = beats.iter().map(|b| b.size()).sum();
        assert_eq!(total, customers.len());
    }
}
