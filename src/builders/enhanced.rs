//! Enhanced multi-constraint nearest neighbor.
//!
//! Extends the plain greedy walk with a natural proximity scale learned from
//! the data itself: the mode of the pairwise distance histogram. Candidates
//! are scored, not merely ranked by distance. A hard cap of twice the mode
//! keeps any beat from straddling unrelated neighborhoods, mixing density
//! pockets is penalized, and a convex-hull area cap evicts the stop that
//! bloats a beat's footprint the most.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::constraints::ConstraintSet;
use crate::dbscan::{self, DensityOptions};
use crate::error::BuildError;
use crate::geo;
use crate::model::{Beat, Customer, Depot, Stop, Territory};

use super::nearest::dynamic_target;
use super::{
    BeatBuilder, finalize, merge_undersized, resolve_territory, split_oversized, verify_coverage,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnhancedOptions {
    /// Bin width of the pairwise-distance histogram, km. Also the fallback
    /// scale when the dataset is too small to produce a mode.
    pub histogram_bin_km: f64,
    /// Quantile of candidate-to-member distances the soft rule holds under
    /// the mode distance.
    pub percentile: f64,
    /// Score penalty for mixing customers from different density pockets.
    pub transition_penalty: f64,
    /// Score penalty when the soft percentile rule is broken.
    pub soft_rule_penalty: f64,
    /// `min_samples` for the density sub-clustering (eps is the mode).
    pub density_min_samples: usize,
    /// Hull area allowed for a beat at the outlet cap, km²; smaller beats get
    /// a proportionally tighter cap. 0 derives `(2 × mode)²`.
    pub hull_area_cap_km2: f64,
}

impl Default for EnhancedOptions {
    fn default() -> Self {
        Self {
            histogram_bin_km: 0.1,
            percentile: 0.90,
            transition_penalty: 0.5,
            soft_rule_penalty: 0.25,
            density_min_samples: 3,
            hull_area_cap_km2: 0.0,
        }
    }
}

/// Mode-distance scored beat builder.
#[derive(Debug, Clone, Default)]
pub struct EnhancedBuilder {
    pub options: EnhancedOptions,
}

impl EnhancedBuilder {
    pub fn new(options: EnhancedOptions) -> Self {
        Self { options }
    }
}

impl BeatBuilder for EnhancedBuilder {
    fn build(
        &self,
        territory: &Territory,
        customers: &[Customer],
        depot: &Depot,
        constraints: &ConstraintSet,
    ) -> Result<Vec<Beat>, BuildError> {
        let resolved = resolve_territory(territory, customers)?;
        let options = &self.options;

        let mode_km = mode_distance(&resolved, options.histogram_bin_km);
        let hard_cap_km = 2.0 * mode_km;
        let hull_cap_km2 = if options.hull_area_cap_km2 > 0.0 {
            options.hull_area_cap_km2
        } else {
            hard_cap_km * hard_cap_km
        };
        debug!(
            territory = territory.id,
            mode_km, hard_cap_km, "mode distance estimated"
        );

        // Natural pockets; crossing one mid-beat is penalized in scoring.
        let owned: Vec<Customer> = resolved.iter().map(|&c| c.clone()).collect();
        let pockets = dbscan::cluster(
            &owned,
            &DensityOptions {
                eps_km: mode_km,
                min_samples: options.density_min_samples,
            },
        );
        let mut pocket_of = vec![0usize; resolved.len()];
        for pocket in &pockets {
            for &member in &pocket.members {
                pocket_of[member] = pocket.id;
            }
        }

        let mut remaining: Vec<usize> = (0..resolved.len()).collect();
        let mut beats: Vec<Beat> = Vec::new();
        let mut evicted: Vec<usize> = Vec::new();

        while !remaining.is_empty() {
            let target = dynamic_target(remaining.len(), constraints.max_outlets_per_beat);
            let mut members: Vec<usize> = Vec::new();
            let mut position = depot.coords();
            let mut elapsed_mins = 0.0;
            let mut beat_pocket: Option<usize> = None;

            while members.len() < target && !remaining.is_empty() {
                let pick = best_candidate(
                    &remaining,
                    &resolved,
                    &members,
                    position,
                    elapsed_mins,
                    beat_pocket,
                    &pocket_of,
                    mode_km,
                    hard_cap_km,
                    constraints,
                    options,
                );

                let slot = match pick {
                    Some(slot) => slot,
                    None if members.is_empty() => {
                        // Nothing scores as feasible for an empty beat; fall
                        // back to plain nearest so the pass advances.
                        warn!(
                            territory = territory.id,
                            "no feasible candidate for empty beat, taking nearest"
                        );
                        nearest_slot(&remaining, &resolved, position)
                    }
                    None => break,
                };

                let index = remaining.remove(slot);
                let customer = resolved[index];
                let leg_km = geo::haversine_km(position, customer.coords());
                elapsed_mins += constraints.leg_time_mins(leg_km);
                position = customer.coords();
                beat_pocket.get_or_insert(pocket_of[index]);
                members.push(index);
            }

            // Hull enforcement: evict the stop whose removal shrinks the
            // footprint the most until the beat fits its area budget. The
            // budget scales with beat size, so small beats are held tighter.
            while members.len() > 3
                && hull_area_km2(&members, &resolved)
                    > hull_cap_km2 * members.len() as f64
                        / constraints.max_outlets_per_beat as f64
            {
                let worst = (0..members.len())
                    .min_by(|&a, &b| {
                        let without_a = area_without(&members, a, &resolved);
                        let without_b = area_without(&members, b, &resolved);
                        without_a.partial_cmp(&without_b).expect("areas are finite")
                    })
                    .expect("beat has members");
                let index = members.remove(worst);
                debug!(
                    territory = territory.id,
                    customer = %resolved[index].id,
                    "evicted stop to satisfy hull area cap"
                );
                evicted.push(index);
            }

            let mut beat = Beat::new(beats.len(), *depot, territory.id);
            for &member in &members {
                beat.stops
                    .push(Stop::from_customer(resolved[member], territory.id));
            }
            beats.push(beat);
        }

        // Evicted stops regroup into their own beats, nearest-first.
        while !evicted.is_empty() {
            let mut beat = Beat::new(beats.len(), *depot, territory.id);
            let mut position = depot.coords();
            while beat.size() < constraints.max_outlets_per_beat && !evicted.is_empty() {
                let slot = nearest_slot(&evicted, &resolved, position);
                let index = evicted.remove(slot);
                position = resolved[index].coords();
                beat.stops
                    .push(Stop::from_customer(resolved[index], territory.id));
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

/// The most frequent pairwise distance, estimated by histogram binning. The
/// bin width doubles as the fallback for datasets too small to vote.
pub(crate) fn mode_distance(resolved: &[&Customer], bin_km: f64) -> f64 {
    if resolved.len() < 2 {
        return bin_km;
    }

    let mut bins: HashMap<usize, usize> = HashMap::new();
    for (slot, a) in resolved.iter().enumerate() {
        for b in &resolved[slot + 1..] {
            let dist = geo::haversine_km(a.coords(), b.coords());
            let bin = (dist / bin_km) as usize;
            *bins.entry(bin).or_insert(0) += 1;
        }
    }

    let mode_bin = bins
        .into_iter()
        .max_by_key(|&(bin, count)| (count, std::cmp::Reverse(bin)))
        .map(|(bin, _)| bin)
        .unwrap_or(0);
    (mode_bin as f64 + 0.5) * bin_km
}

/// Highest-scoring feasible candidate slot, if any is feasible at all.
#[allow(clippy::too_many_arguments)]
fn best_candidate(
    remaining: &[usize],
    resolved: &[&Customer],
    members: &[usize],
    position: (f64, f64),
    elapsed_mins: f64,
    beat_pocket: Option<usize>,
    pocket_of: &[usize],
    mode_km: f64,
    hard_cap_km: f64,
    constraints: &ConstraintSet,
    options: &EnhancedOptions,
) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;

    'candidates: for (slot, &index) in remaining.iter().enumerate() {
        let candidate = resolved[index];
        let leg_km = geo::haversine_km(position, candidate.coords());

        // Time feasibility against the remaining budget.
        if elapsed_mins + constraints.leg_time_mins(leg_km) > constraints.max_working_time_mins {
            continue;
        }

        // Hard cap: no same-beat pair may exceed twice the mode distance.
        let mut member_dists = Vec::with_capacity(members.len());
        for &member in members {
            let dist = geo::haversine_km(candidate.coords(), resolved[member].coords());
            if dist > hard_cap_km {
                continue 'candidates;
            }
            member_dists.push(dist);
        }

        let mut score = mode_km / (mode_km + leg_km);

        let remaining_budget = constraints.max_working_time_mins
            - (elapsed_mins + constraints.leg_time_mins(leg_km));
        score += remaining_budget.max(0.0) / constraints.max_working_time_mins;

        // Soft rule: the 90th-percentile member distance should stay under
        // the mode.
        if !member_dists.is_empty()
            && percentile(&mut member_dists, options.percentile) > mode_km
        {
            score -= options.soft_rule_penalty;
        }

        if let Some(pocket) = beat_pocket {
            if pocket_of[index] != pocket {
                score -= options.transition_penalty;
            }
        }

        match best {
            Some((_, best_score)) if best_score >= score => {}
            _ => best = Some((slot, score)),
        }
    }

    best.map(|(slot, _)| slot)
}

fn nearest_slot(pool: &[usize], resolved: &[&Customer], position: (f64, f64)) -> usize {
    let mut best_slot = 0;
    let mut best_dist = f64::INFINITY;
    for (slot, &index) in pool.iter().enumerate() {
        let dist = geo::haversine_km(position, resolved[index].coords());
        if dist < best_dist {
            best_dist = dist;
            best_slot = slot;
        }
    }
    best_slot
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).expect("distances are finite"));
    let rank = ((values.len() as f64 * p).ceil() as usize).clamp(1, values.len());
    values[rank - 1]
}

fn area_without(members: &[usize], skip: usize, resolved: &[&Customer]) -> f64 {
    let subset: Vec<usize> = members
        .iter()
        .enumerate()
        .filter(|(slot, _)| *slot != skip)
        .map(|(_, &index)| index)
        .collect();
    hull_area_km2(&subset, resolved)
}

/// Convex hull area of a member set, km². Coordinates are projected to a
/// local flat frame around the member centroid before the monotone-chain
/// sweep; fine at beat scale.
fn hull_area_km2(members: &[usize], resolved: &[&Customer]) -> f64 {
    if members.len() < 3 {
        return 0.0;
    }

    let n = members.len() as f64;
    let lat0 = members.iter().map(|&i| resolved[i].lat).sum::<f64>() / n;
    let lng0 = members.iter().map(|&i| resolved[i].lng).sum::<f64>() / n;
    let cos_lat = lat0.to_radians().cos();

    let mut points: Vec<(f64, f64)> = members
        .iter()
        .map(|&i| {
            (
                (resolved[i].lng - lng0) * 111.320 * cos_lat,
                (resolved[i].lat - lat0) * 110.574,
            )
        })
        .collect();
    points.sort_by(|a, b| a.partial_cmp(b).expect("projected points are finite"));
    points.dedup();
    if points.len() < 3 {
        return 0.0;
    }

    let hull = monotone_chain(&points);
    shoelace_area(&hull)
}

fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// Andrew's monotone chain over lexicographically sorted points; returns the
/// hull counterclockwise.
fn monotone_chain(points: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut lower: Vec<(f64, f64)> = Vec::with_capacity(points.len());
    for &p in points {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }

    let mut upper: Vec<(f64, f64)> = Vec::with_capacity(points.len());
    for &p in points.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }

    // The endpoints appear in both chains.
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

fn shoelace_area(hull: &[(f64, f64)]) -> f64 {
    if hull.len() < 3 {
        return 0.0;
    }
    let mut doubled = 0.0;
    for i in 0..hull.len() {
        let (x1, y1) = hull[i];
        let (x2, y2) = hull[(i + 1) % hull.len()];
        doubled += x1 * y2 - x2 * y1;
    }
    doubled.abs() / 2.0
}
