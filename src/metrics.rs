//! Route metric recomputation.
//!
//! Walks a beat's stop sequence from the depot and rewrites every per-stop
//! distance/time figure plus the beat totals. Must be re-run after any
//! structural change (merge, split, relocation); the builders and repair
//! passes all call through here rather than patching totals incrementally.

use crate::constraints::ConstraintSet;
use crate::geo;
use crate::model::Beat;

/// Recompute per-stop legs and beat totals in place.
///
/// The depot-to-first-stop leg is counted in the totals. Each stop's
/// `distance_to_next_km`/`time_to_next_mins` refer to the leg toward the
/// following stop; the last stop's are zero.
pub fn recompute(beat: &mut Beat, constraints: &ConstraintSet) {
    if beat.stops.is_empty() {
        beat.total_distance_km = 0.0;
        beat.total_time_mins = 0.0;
        return;
    }

    let approach_km = geo::haversine_km(beat.depot.coords(), beat.stops[0].coords());
    let mut total_distance = approach_km;
    let mut total_time = geo::travel_time_mins(approach_km, constraints.travel_speed_kmh);

    let n = beat.stops.len();
    for i in 0..n {
        beat.stops[i].visit_time_mins = constraints.visit_time_mins;
        total_time += constraints.visit_time_mins;

        if i + 1 < n {
            let leg_km = geo::haversine_km(beat.stops[i].coords(), beat.stops[i + 1].coords());
            let leg_mins = geo::travel_time_mins(leg_km, constraints.travel_speed_kmh);
            beat.stops[i].distance_to_next_km = leg_km;
            beat.stops[i].time_to_next_mins = leg_mins;
            total_distance += leg_km;
            total_time += leg_mins;
        } else {
            beat.stops[i].distance_to_next_km = 0.0;
            beat.stops[i].time_to_next_mins = 0.0;
        }
    }

    beat.total_distance_km = total_distance;
    beat.total_time_mins = total_time;
}

/// Recompute every beat in a set.
pub fn recompute_all(beats: &mut [Beat], constraints: &ConstraintSet) {
    for beat in beats.iter_mut() {
        recompute(beat, constraints);
    }
}
