//! Median-center circular-sector territory partitioner.
//!
//! Customers are converted to polar coordinates around the per-axis median of
//! the dataset (robust to outliers, unlike the centroid), sliced into equal
//! angular sectors, then pushed through three repair passes: revenue
//! enforcement, strict minimum size, and oversize balancing. Size bounds are
//! hard; revenue floors are soft. The final validation distinguishes
//! recoverable degradation (oversized sector, missed revenue floor) from
//! fatal invariant breaks (lost customers, sector below minimum).

use std::collections::HashSet;
use std::f64::consts::TAU;

use tracing::{debug, info, warn};

use crate::constraints::ConstraintSet;
use crate::error::PartitionError;
use crate::ledger::AssignmentLedger;
use crate::model::{Customer, Territory};

/// Partition a customer set into territories.
///
/// Coordinate and id sanity checks are the ingestion layer's responsibility;
/// this function assumes parseable coordinates but still rejects structural
/// problems it can see (duplicates, empty input, impossible bounds).
pub fn partition_territories(
    customers: &[Customer],
    constraints: &ConstraintSet,
) -> Result<Vec<Territory>, PartitionError> {
    check_input(customers, constraints)?;

    let center = median_center(customers);
    let angles: Vec<f64> = customers
        .iter()
        .map(|c| angle_from(center, c.coords()))
        .collect();

    let sector_count = select_sector_count(customers, constraints);
    info!(
        customers = customers.len(),
        sectors = sector_count,
        center_lat = center.0,
        center_lng = center.1,
        "partitioning into angular sectors"
    );

    let mut ledger = AssignmentLedger::with_capacity(customers.len());
    let mut sectors = slice_into_sectors(customers, &angles, sector_count, &mut ledger);

    revenue_pass(&mut sectors, customers, &angles, constraints, &mut ledger);
    strict_minimum_pass(&mut sectors, customers, &angles, constraints, &mut ledger);
    balance_pass(&mut sectors, customers, &angles, constraints, &mut ledger);

    let territories = finalize(sectors, customers, center, constraints)?;
    info!(territories = territories.len(), "partition complete");
    Ok(territories)
}

/// One angular sector under construction. Indices refer into the input slice.
/// Sectors emptied by a repair pass stay in the vector (so ledger owners keep
/// meaning) and are dropped at finalization.
#[derive(Debug, Clone)]
struct Sector {
    members: Vec<usize>,
    bounds: Option<(f64, f64)>,
}

impl Sector {
    fn spare_capacity(&self, constraints: &ConstraintSet) -> usize {
        constraints
            .max_outlets_per_territory
            .saturating_sub(self.members.len())
    }

    fn rev_totals(&self, customers: &[Customer]) -> (f64, f64) {
        let rev1 = self
            .members
            .iter()
            .map(|&i| customers[i].rev1.unwrap_or(0.0))
            .sum();
        let rev2 = self
            .members
            .iter()
            .map(|&i| customers[i].rev2.unwrap_or(0.0))
            .sum();
        (rev1, rev2)
    }

    /// Angular midpoint: the slice midpoint while the sector still has its
    /// original bounds, the circular mean of member angles afterwards.
    fn midpoint(&self, angles: &[f64]) -> f64 {
        match self.bounds {
            Some((start, end)) => (start + end) / 2.0,
            None => circular_mean(self.members.iter().map(|&i| angles[i])),
        }
    }

    fn meets_revenue(&self, customers: &[Customer], constraints: &ConstraintSet) -> bool {
        let (rev1, rev2) = self.rev_totals(customers);
        rev1 >= constraints.effective_rev1_floor() && rev2 >= constraints.effective_rev2_floor()
    }

    fn is_valid(&self, customers: &[Customer], constraints: &ConstraintSet) -> bool {
        self.members.len() >= constraints.min_outlets_per_territory
            && self.members.len() <= constraints.max_outlets_per_territory
            && self.meets_revenue(customers, constraints)
    }
}

fn check_input(customers: &[Customer], constraints: &ConstraintSet) -> Result<(), PartitionError> {
    if customers.is_empty() {
        return Err(PartitionError::EmptyInput);
    }
    if constraints.min_outlets_per_territory == 0
        || constraints.min_outlets_per_territory > constraints.max_outlets_per_territory
    {
        return Err(PartitionError::InvalidConstraints {
            reason: format!(
                "territory size bounds [{}, {}] are not a valid range",
                constraints.min_outlets_per_territory, constraints.max_outlets_per_territory
            ),
        });
    }
    if customers.len() < constraints.min_outlets_per_territory {
        return Err(PartitionError::NotEnoughCustomers {
            count: customers.len(),
            min: constraints.min_outlets_per_territory,
        });
    }
    let mut seen = HashSet::with_capacity(customers.len());
    for customer in customers {
        if !seen.insert(customer.id.as_str()) {
            return Err(PartitionError::DuplicateCustomer {
                id: customer.id.clone(),
            });
        }
    }
    Ok(())
}

/// Independent per-axis median of the customer coordinates.
pub(crate) fn median_center(customers: &[Customer]) -> (f64, f64) {
    let lats: Vec<f64> = customers.iter().map(|c| c.lat).collect();
    let lngs: Vec<f64> = customers.iter().map(|c| c.lng).collect();
    (median(lats), median(lngs))
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).expect("coordinates must not be NaN"));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Angle of `point` around `center`, normalized to [0, 2π).
fn angle_from(center: (f64, f64), point: (f64, f64)) -> f64 {
    let (lat, lng) = point;
    (lat - center.0).atan2(lng - center.1).rem_euclid(TAU)
}

/// Shortest angular distance between two angles, accounting for wraparound.
fn angular_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).abs() % TAU;
    d.min(TAU - d)
}

fn circular_mean(angles: impl Iterator<Item = f64>) -> f64 {
    let (mut sin_sum, mut cos_sum) = (0.0, 0.0);
    for angle in angles {
        sin_sum += angle.sin();
        cos_sum += angle.cos();
    }
    sin_sum.atan2(cos_sum).rem_euclid(TAU)
}

/// Sector-count formula. Size bounds always take priority over revenue
/// targets; the revenue-derived count carries a 10% buffer so sectors are not
/// cut so fine they can never meet their floors.
fn select_sector_count(customers: &[Customer], constraints: &ConstraintSet) -> usize {
    let n = customers.len();
    let max_by_size = (n / constraints.min_outlets_per_territory).max(1);
    let min_by_size = n.div_ceil(constraints.max_outlets_per_territory);

    let total_rev1: f64 = customers.iter().map(|c| c.rev1.unwrap_or(0.0)).sum();
    let total_rev2: f64 = customers.iter().map(|c| c.rev2.unwrap_or(0.0)).sum();
    let by_revenue = match (
        revenue_sector_bound(total_rev1, constraints.min_rev1_per_territory),
        revenue_sector_bound(total_rev2, constraints.min_rev2_per_territory),
    ) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => 1,
    };

    max_by_size.min(min_by_size.max(by_revenue)).max(1)
}

/// Sectors the revenue total can sustain against a floor, with a 10% buffer.
/// A zero floor imposes no bound.
fn revenue_sector_bound(total: f64, floor: f64) -> Option<usize> {
    if floor <= 0.0 {
        return None;
    }
    let sustained = (total / (floor * 1.10)).floor() as usize;
    Some(sustained.max(1))
}

fn slice_into_sectors(
    customers: &[Customer],
    angles: &[f64],
    sector_count: usize,
    ledger: &mut AssignmentLedger,
) -> Vec<Sector> {
    let width = TAU / sector_count as f64;
    let mut sectors: Vec<Sector> = (0..sector_count)
        .map(|i| Sector {
            members: Vec::new(),
            bounds: Some((i as f64 * width, (i as f64 + 1.0) * width)),
        })
        .collect();

    for (i, &angle) in angles.iter().enumerate() {
        let mut index = (angle / width) as usize;
        if index >= sector_count {
            // Floating-point edge at the 0/2π seam: take the sector whose
            // midpoint is angularly nearest.
            index = nearest_sector_by_midpoint(&sectors, angles, angle)
                .unwrap_or(sector_count - 1);
        }
        sectors[index].members.push(i);
        ledger.assign(&customers[i].id, index);
    }

    sectors
}

fn nearest_sector_by_midpoint(sectors: &[Sector], angles: &[f64], angle: f64) -> Option<usize> {
    sectors
        .iter()
        .enumerate()
        .map(|(i, sector)| (i, angular_distance(angle, sector.midpoint(angles))))
        .min_by(|a, b| a.1.partial_cmp(&b.1).expect("angular distances are finite"))
        .map(|(i, _)| i)
}

/// Dissolve sectors that miss the size or revenue bar into valid neighbors,
/// then rebuild or force-merge whatever is left over. No customer may be
/// dropped.
fn revenue_pass(
    sectors: &mut Vec<Sector>,
    customers: &[Customer],
    angles: &[f64],
    constraints: &ConstraintSet,
    ledger: &mut AssignmentLedger,
) {
    let invalid: Vec<usize> = (0..sectors.len())
        .filter(|&i| !sectors[i].members.is_empty() && !sectors[i].is_valid(customers, constraints))
        .collect();
    if invalid.is_empty() {
        return;
    }
    let valid: HashSet<usize> = (0..sectors.len())
        .filter(|&i| sectors[i].is_valid(customers, constraints))
        .collect();
    debug!(
        invalid = invalid.len(),
        valid = valid.len(),
        "revenue pass redistributing invalid sectors"
    );

    let mut leftovers: Vec<usize> = Vec::new();
    for sector_index in invalid {
        let members = std::mem::take(&mut sectors[sector_index].members);
        sectors[sector_index].bounds = None;
        for member in members {
            let target = valid
                .iter()
                .copied()
                .filter(|&t| sectors[t].spare_capacity(constraints) > 0)
                .min_by(|&a, &b| {
                    let da = angular_distance(angles[member], sectors[a].midpoint(angles));
                    let db = angular_distance(angles[member], sectors[b].midpoint(angles));
                    da.partial_cmp(&db).expect("angular distances are finite")
                });
            match target {
                Some(t) => {
                    sectors[t].members.push(member);
                    ledger.transfer(&customers[member].id, t);
                }
                None => leftovers.push(member),
            }
        }
    }

    // Rebuild: as long as enough leftovers remain, grow a fresh sector by
    // descending revenue until both floors are met and it reaches minimum
    // size.
    while leftovers.len() >= constraints.min_outlets_per_territory {
        match greedy_sector(&leftovers, customers, constraints) {
            Some(chosen) => {
                let new_index = sectors.len();
                for &member in &chosen {
                    ledger.transfer(&customers[member].id, new_index);
                }
                let chosen_set: HashSet<usize> = chosen.iter().copied().collect();
                leftovers.retain(|m| !chosen_set.contains(m));
                debug!(sector = new_index, size = chosen.len(), "rebuilt sector from leftovers");
                sectors.push(Sector {
                    members: chosen,
                    bounds: None,
                });
            }
            None => break,
        }
    }

    if !leftovers.is_empty() {
        // Force-merge into the smallest sector, past the size cap if need be.
        let smallest = (0..sectors.len())
            .filter(|&i| !sectors[i].members.is_empty())
            .min_by_key(|&i| sectors[i].members.len());
        if let Some(target) = smallest {
            warn!(
                leftovers = leftovers.len(),
                sector = target,
                new_size = sectors[target].members.len() + leftovers.len(),
                "force-merging leftover customers past the size cap"
            );
            for member in leftovers {
                ledger.transfer(&customers[member].id, target);
                sectors[target].members.push(member);
            }
        } else {
            // Every sector was dissolved; the leftovers become the partition.
            let new_index = sectors.len();
            for &member in &leftovers {
                ledger.transfer(&customers[member].id, new_index);
            }
            sectors.push(Sector {
                members: leftovers,
                bounds: None,
            });
        }
    }
}

/// Greedily pick leftover members by descending combined revenue until both
/// floors are met, topping up to minimum size. Returns `None` when the
/// leftovers cannot produce a valid sector.
fn greedy_sector(
    leftovers: &[usize],
    customers: &[Customer],
    constraints: &ConstraintSet,
) -> Option<Vec<usize>> {
    let mut ordered: Vec<usize> = leftovers.to_vec();
    ordered.sort_by(|&a, &b| {
        customers[b]
            .combined_revenue()
            .partial_cmp(&customers[a].combined_revenue())
            .expect("revenue figures must not be NaN")
    });

    let mut chosen = Vec::new();
    let (mut rev1, mut rev2) = (0.0, 0.0);
    for member in ordered {
        if chosen.len() >= constraints.max_outlets_per_territory {
            break;
        }
        let floors_met = rev1 >= constraints.effective_rev1_floor()
            && rev2 >= constraints.effective_rev2_floor();
        if floors_met && chosen.len() >= constraints.min_outlets_per_territory {
            break;
        }
        rev1 += customers[member].rev1.unwrap_or(0.0);
        rev2 += customers[member].rev2.unwrap_or(0.0);
        chosen.push(member);
    }

    let floors_met =
        rev1 >= constraints.effective_rev1_floor() && rev2 >= constraints.effective_rev2_floor();
    if floors_met && chosen.len() >= constraints.min_outlets_per_territory {
        Some(chosen)
    } else {
        None
    }
}

/// Zero-tolerance minimum-size pass. Dissolves every undersized sector into
/// sectors with spare capacity (nearest angular midpoint first) or, failing
/// that, the smallest other sector. May degrade revenue compliance but never
/// count compliance.
fn strict_minimum_pass(
    sectors: &mut [Sector],
    customers: &[Customer],
    angles: &[f64],
    constraints: &ConstraintSet,
    ledger: &mut AssignmentLedger,
) {
    let undersized: Vec<usize> = (0..sectors.len())
        .filter(|&i| {
            !sectors[i].members.is_empty()
                && sectors[i].members.len() < constraints.min_outlets_per_territory
        })
        .collect();

    for sector_index in undersized {
        let members = std::mem::take(&mut sectors[sector_index].members);
        sectors[sector_index].bounds = None;
        debug!(
            sector = sector_index,
            size = members.len(),
            "dissolving sector below minimum size"
        );
        for member in members {
            let target = (0..sectors.len())
                .filter(|&t| {
                    t != sector_index
                        && !sectors[t].members.is_empty()
                        && sectors[t].spare_capacity(constraints) > 0
                })
                .min_by(|&a, &b| {
                    let da = angular_distance(angles[member], sectors[a].midpoint(angles));
                    let db = angular_distance(angles[member], sectors[b].midpoint(angles));
                    da.partial_cmp(&db).expect("angular distances are finite")
                });
            let target = target.or_else(|| {
                // Everyone is full: force onto the smallest sector.
                (0..sectors.len())
                    .filter(|&t| t != sector_index && !sectors[t].members.is_empty())
                    .min_by_key(|&t| sectors[t].members.len())
            });
            match target {
                Some(t) => {
                    if sectors[t].spare_capacity(constraints) == 0 {
                        warn!(sector = t, "force-assigning past the size cap");
                    }
                    sectors[t].members.push(member);
                    ledger.transfer(&customers[member].id, t);
                }
                None => {
                    // No other sector exists; the undersized sector stays and
                    // finalization reports it as fatal.
                    sectors[sector_index].members.push(member);
                }
            }
        }
    }
}

/// Split oversized sectors into near-equal angular runs, each still at least
/// the minimum size. A sector with no valid split is left oversized; the
/// minimum bound outranks the maximum.
fn balance_pass(
    sectors: &mut Vec<Sector>,
    customers: &[Customer],
    angles: &[f64],
    constraints: &ConstraintSet,
    ledger: &mut AssignmentLedger,
) {
    // New sectors appended during the loop are already within bounds.
    let original_count = sectors.len();
    for sector_index in 0..original_count {
        let size = sectors[sector_index].members.len();
        if size <= constraints.max_outlets_per_territory {
            continue;
        }

        let parts = size
            .div_ceil(constraints.max_outlets_per_territory)
            .min(size / constraints.min_outlets_per_territory);
        if parts < 2 {
            warn!(
                sector = sector_index,
                size,
                max = constraints.max_outlets_per_territory,
                "sector left oversized, no split keeps every part above minimum"
            );
            continue;
        }

        let mut members = std::mem::take(&mut sectors[sector_index].members);
        members.sort_by(|&a, &b| {
            angles[a]
                .partial_cmp(&angles[b])
                .expect("angles are finite")
        });

        debug!(sector = sector_index, size, parts, "splitting oversized sector");
        let base = size / parts;
        let remainder = size % parts;
        let mut cursor = 0;
        for part in 0..parts {
            let take = base + usize::from(part < remainder);
            let chunk: Vec<usize> = members[cursor..cursor + take].to_vec();
            cursor += take;
            if part == 0 {
                sectors[sector_index].members = chunk;
                sectors[sector_index].bounds = None;
            } else {
                let new_index = sectors.len();
                for &member in &chunk {
                    ledger.transfer(&customers[member].id, new_index);
                }
                sectors.push(Sector {
                    members: chunk,
                    bounds: None,
                });
            }
        }
    }
}

/// Drop empty sectors, renumber, and run the fatal-invariant checks.
fn finalize(
    sectors: Vec<Sector>,
    customers: &[Customer],
    center: (f64, f64),
    constraints: &ConstraintSet,
) -> Result<Vec<Territory>, PartitionError> {
    let live: Vec<Sector> = sectors
        .into_iter()
        .filter(|s| !s.members.is_empty())
        .collect();

    let total: usize = live.iter().map(|s| s.members.len()).sum();
    if total != customers.len() {
        return Err(PartitionError::CountMismatch {
            expected: customers.len(),
            actual: total,
        });
    }

    let mut seen: HashSet<usize> = HashSet::with_capacity(total);
    for sector in &live {
        for &member in &sector.members {
            if !seen.insert(member) {
                return Err(PartitionError::DuplicateCustomer {
                    id: customers[member].id.clone(),
                });
            }
        }
    }

    for (index, sector) in live.iter().enumerate() {
        if sector.members.len() < constraints.min_outlets_per_territory {
            return Err(PartitionError::TerritoryBelowMinimum {
                territory: index,
                size: sector.members.len(),
                min: constraints.min_outlets_per_territory,
            });
        }
        if sector.members.len() > constraints.max_outlets_per_territory {
            warn!(
                territory = index,
                size = sector.members.len(),
                max = constraints.max_outlets_per_territory,
                "territory exceeds the size cap; carried forward as reduced compliance"
            );
        }
        if !sector.meets_revenue(customers, constraints) {
            warn!(
                territory = index,
                "territory misses a revenue floor; carried forward as reduced compliance"
            );
        }
    }

    Ok(live
        .into_iter()
        .enumerate()
        .map(|(id, sector)| {
            let (rev1_total, rev2_total) = sector.rev_totals(customers);
            Territory {
                id,
                customer_ids: sector
                    .members
                    .iter()
                    .map(|&i| customers[i].id.clone())
                    .collect(),
                rev1_total,
                rev2_total,
                center,
                angular_bounds: sector.bounds,
            }
        })
        .collect())
}
