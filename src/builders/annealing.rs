//! Proximity-constrained simulated annealing.
//!
//! Geographic tightness dominates the energy function: an intra-beat pair
//! beyond the proximity radius costs four orders of magnitude more than a
//! kilometer of route length, and beat-size imbalance sits in between. The
//! annealer therefore converges toward compact, even beats rather than short
//! ones. All randomness comes from one seeded generator so runs reproduce.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::constraints::ConstraintSet;
use crate::error::BuildError;
use crate::geo;
use crate::model::{Beat, Customer, Depot, Stop, Territory};

use super::{BeatBuilder, finalize, resolve_territory, verify_coverage};

/// Penalty per intra-beat pair beyond the proximity radius.
const PROXIMITY_PENALTY: f64 = 10_000.0;
/// Penalty per outlet of deviation from the mean beat size.
const BALANCE_PENALTY: f64 = 100.0;
/// Weight on total route distance.
const DISTANCE_WEIGHT: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnealingOptions {
    /// Maximum distance between stops of the same beat before the heavy
    /// penalty applies.
    pub proximity_radius_km: f64,
    pub initial_temperature: f64,
    pub minimum_temperature: f64,
    pub cooling_factor: f64,
    /// Moves attempted per temperature level.
    pub iterations_per_round: usize,
    /// Hard cap across all rounds; the only bound on worst-case runtime.
    pub max_total_iterations: usize,
    /// Rounds without improving the best-known solution before giving up.
    pub stall_rounds: usize,
    /// RNG seed; fixed by default so identical inputs replan identically.
    pub seed: u64,
}

impl Default for AnnealingOptions {
    fn default() -> Self {
        Self {
            proximity_radius_km: 0.2,
            initial_temperature: 50.0,
            minimum_temperature: 0.1,
            cooling_factor: 0.95,
            iterations_per_round: 150,
            max_total_iterations: 20_000,
            stall_rounds: 25,
            seed: 0x5EED_BEA7,
        }
    }
}

/// Simulated-annealing beat builder.
#[derive(Debug, Clone, Default)]
pub struct AnnealingBuilder {
    pub options: AnnealingOptions,
}

impl AnnealingBuilder {
    pub fn new(options: AnnealingOptions) -> Self {
        Self { options }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            options: AnnealingOptions {
                seed,
                ..AnnealingOptions::default()
            },
        }
    }
}

impl BeatBuilder for AnnealingBuilder {
    fn build(
        &self,
        territory: &Territory,
        customers: &[Customer],
        depot: &Depot,
        constraints: &ConstraintSet,
    ) -> Result<Vec<Beat>, BuildError> {
        let resolved = resolve_territory(territory, customers)?;
        let arena = Arena::new(&resolved, depot);
        let options = &self.options;

        let mut current = initial_assignment(&arena, constraints, options.proximity_radius_km);
        let mut current_energy = energy(&current, &arena, options.proximity_radius_km);
        // Snapshots are plain index-array copies, never serialization.
        let mut best = current.clone();
        let mut best_energy = current_energy;

        let mut rng = SmallRng::seed_from_u64(options.seed);
        let mut temperature = options.initial_temperature;
        let mut total_iterations = 0usize;
        let mut stall = 0usize;

        while temperature > options.minimum_temperature
            && total_iterations < options.max_total_iterations
            && stall < options.stall_rounds
        {
            let mut improved = false;

            for _ in 0..options.iterations_per_round {
                if total_iterations >= options.max_total_iterations {
                    break;
                }
                total_iterations += 1;

                let Some(candidate) = propose_move(&current, &mut rng, constraints) else {
                    continue;
                };

                // Revert any move that introduces a proximity violation that
                // was not there before it.
                let violations_before = proximity_violations(&current, &arena, options.proximity_radius_km);
                let violations_after =
                    proximity_violations(&candidate, &arena, options.proximity_radius_km);
                if violations_after > violations_before {
                    continue;
                }

                let candidate_energy = energy(&candidate, &arena, options.proximity_radius_km);
                let delta = candidate_energy - current_energy;
                let accept = delta <= 0.0 || rng.r#gen::<f64>() < (-delta / temperature).exp();
                if accept {
                    current = candidate;
                    current_energy = candidate_energy;
                    if current_energy < best_energy {
                        best = current.clone();
                        best_energy = current_energy;
                        improved = true;
                    }
                }
            }

            stall = if improved { 0 } else { stall + 1 };
            temperature *= options.cooling_factor;
        }

        info!(
            territory = territory.id,
            iterations = total_iterations,
            final_energy = best_energy,
            violations = proximity_violations(&best, &arena, options.proximity_radius_km),
            "annealing converged"
        );

        let mut beats = materialize(&best, &resolved, territory.id, depot);
        minimum_size_repair(&mut beats, constraints, options.proximity_radius_km);
        verify_coverage(&mut beats, territory, &resolved, depot, constraints);
        finalize(&mut beats, constraints);
        Ok(beats)
    }
}

/// Pairwise distances plus depot legs, computed once per run.
struct Arena {
    pairwise_km: Vec<Vec<f64>>,
    depot_km: Vec<f64>,
}

impl Arena {
    fn new(resolved: &[&Customer], depot: &Depot) -> Self {
        let n = resolved.len();
        let mut pairwise_km = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let d = geo::haversine_km(resolved[i].coords(), resolved[j].coords());
                pairwise_km[i][j] = d;
                pairwise_km[j][i] = d;
            }
        }
        let depot_km = resolved
            .iter()
            .map(|c| geo::haversine_km(depot.coords(), c.coords()))
            .collect();
        Self {
            pairwise_km,
            depot_km,
        }
    }
}

type Assignment = Vec<Vec<usize>>;

/// Deterministic construction: a customer joins the first beat it is
/// proximity-compatible with; leftovers seed new beats.
fn initial_assignment(
    arena: &Arena,
    constraints: &ConstraintSet,
    radius_km: f64,
) -> Assignment {
    let n = arena.depot_km.len();
    let mut beats: Assignment = Vec::new();

    for index in 0..n {
        let home = beats.iter_mut().find(|beat| {
            beat.len() < constraints.max_outlets_per_beat
                && beat
                    .iter()
                    .all(|&member| arena.pairwise_km[index][member] <= radius_km)
        });
        match home {
            Some(beat) => beat.push(index),
            None => beats.push(vec![index]),
        }
    }

    debug!(beats = beats.len(), customers = n, "annealing initial assignment");
    beats
}

/// Count intra-beat pairs beyond the proximity radius.
fn proximity_violations(assignment: &Assignment, arena: &Arena, radius_km: f64) -> usize {
    let mut violations = 0;
    for beat in assignment {
        for (slot, &a) in beat.iter().enumerate() {
            for &b in &beat[slot + 1..] {
                if arena.pairwise_km[a][b] > radius_km {
                    violations += 1;
                }
            }
        }
    }
    violations
}

/// Heavy proximity term, moderate balance term, light distance term.
fn energy(assignment: &Assignment, arena: &Arena, radius_km: f64) -> f64 {
    let live: Vec<&Vec<usize>> = assignment.iter().filter(|b| !b.is_empty()).collect();
    if live.is_empty() {
        return 0.0;
    }

    let violations = proximity_violations(assignment, arena, radius_km) as f64;

    let total: usize = live.iter().map(|b| b.len()).sum();
    let mean = total as f64 / live.len() as f64;
    let imbalance: f64 = live.iter().map(|b| (b.len() as f64 - mean).abs()).sum();

    let mut distance = 0.0;
    for beat in &live {
        distance += arena.depot_km[beat[0]];
        for pair in beat.windows(2) {
            distance += arena.pairwise_km[pair[0]][pair[1]];
        }
    }

    PROXIMITY_PENALTY * violations + BALANCE_PENALTY * imbalance + DISTANCE_WEIGHT * distance
}

/// One random neighbor move: adjacent swap, two-stop reversal, or relocation
/// to a compatible beat. Returns `None` when the drawn move is a no-op.
fn propose_move(
    current: &Assignment,
    rng: &mut SmallRng,
    constraints: &ConstraintSet,
) -> Option<Assignment> {
    let live: Vec<usize> = (0..current.len()).filter(|&i| !current[i].is_empty()).collect();
    if live.is_empty() {
        return None;
    }

    let mut candidate = current.clone();
    match rng.gen_range(0..3u8) {
        0 => {
            // Swap two adjacent stops.
            let beat = live[rng.gen_range(0..live.len())];
            if candidate[beat].len() < 2 {
                return None;
            }
            let at = rng.gen_range(0..candidate[beat].len() - 1);
            candidate[beat].swap(at, at + 1);
        }
        1 => {
            // Reverse a two-stop segment.
            let beat = live[rng.gen_range(0..live.len())];
            if candidate[beat].len() < 2 {
                return None;
            }
            let at = rng.gen_range(0..candidate[beat].len() - 1);
            candidate[beat][at..at + 2].reverse();
        }
        _ => {
            // Relocate one stop to another beat with spare capacity.
            if live.len() < 2 {
                return None;
            }
            let from = live[rng.gen_range(0..live.len())];
            let to = live[rng.gen_range(0..live.len())];
            if from == to || candidate[to].len() >= constraints.max_outlets_per_beat {
                return None;
            }
            let slot = rng.gen_range(0..candidate[from].len());
            let moved = candidate[from].remove(slot);
            candidate[to].push(moved);
            candidate.retain(|beat| !beat.is_empty());
        }
    }
    Some(candidate)
}

fn materialize(
    assignment: &Assignment,
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

/// Merge each undersized beat into its nearest sibling when the merge is
/// fully proximity- and size-feasible, otherwise transfer only the stops
/// that are individually compatible with the sibling.
fn minimum_size_repair(beats: &mut Vec<Beat>, constraints: &ConstraintSet, radius_km: f64) {
    let mut source = 0;
    while source < beats.len() {
        if beats[source].size() >= constraints.min_outlets_per_beat || beats[source].is_empty() {
            source += 1;
            continue;
        }

        let centroid = beats[source].centroid();
        let target = beats
            .iter()
            .enumerate()
            .filter(|(i, b)| *i != source && !b.is_empty())
            .min_by(|(_, a), (_, b)| {
                let da = a.centroid_distance_km(centroid);
                let db = b.centroid_distance_km(centroid);
                da.partial_cmp(&db).expect("distances are finite")
            })
            .map(|(i, _)| i);
        let Some(target) = target else {
            break; // lone beat, nothing to merge with
        };

        let fits = beats[source].size() + beats[target].size() <= constraints.max_outlets_per_beat;
        let compatible = fits
            && beats[source].stops.iter().all(|stop| {
                beats[target]
                    .stops
                    .iter()
                    .all(|other| geo::haversine_km(stop.coords(), other.coords()) <= radius_km)
            });

        if compatible {
            debug!(from = source, to = target, "merging undersized beat");
            let moved: Vec<Stop> = std::mem::take(&mut beats[source].stops);
            beats[target].stops.extend(moved);
            beats.remove(source);
            // Indices shifted; restart the scan from this slot.
            continue;
        }

        // Partial transfer of individually compatible stops.
        let mut slot = 0;
        while slot < beats[source].stops.len() {
            if beats[target].size() >= constraints.max_outlets_per_beat {
                break;
            }
            let stop_coords = beats[source].stops[slot].coords();
            let stop_fits = beats[target]
                .stops
                .iter()
                .all(|other| geo::haversine_km(stop_coords, other.coords()) <= radius_km);
            if stop_fits {
                let stop = beats[source].stops.remove(slot);
                beats[target].stops.push(stop);
            } else {
                slot += 1;
            }
        }
        if beats[source].is_empty() {
            beats.remove(source);
        } else {
            source += 1;
        }
    }
}
