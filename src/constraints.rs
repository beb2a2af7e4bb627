//! Planner constraint configuration.

use serde::{Deserialize, Serialize};

/// Shared constraint surface for partitioning, building, and validation.
///
/// Revenue floors are soft: a territory within `revenue_margin` of the floor
/// still counts as compliant. Size bounds are hard and always take priority
/// over revenue targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSet {
    pub min_outlets_per_beat: usize,
    pub max_outlets_per_beat: usize,
    /// Working-time budget per beat, minutes.
    pub max_working_time_mins: f64,
    /// Fixed service time per customer, minutes.
    pub visit_time_mins: f64,
    /// Average travel speed, km/h.
    pub travel_speed_kmh: f64,
    /// Minimum allowed distance between stops of different beats, km.
    pub min_isolation_km: f64,
    /// Maximum allowed distance between stops of the same beat, km.
    pub max_spread_km: f64,
    pub min_outlets_per_territory: usize,
    pub max_outlets_per_territory: usize,
    /// Soft floor on territory `rev1` totals; 0 disables the floor.
    pub min_rev1_per_territory: f64,
    /// Soft floor on territory `rev2` totals; 0 disables the floor.
    pub min_rev2_per_territory: f64,
    /// Relative margin applied to the soft revenue floors.
    pub revenue_margin: f64,
}

impl Default for ConstraintSet {
    fn default() -> Self {
        Self {
            min_outlets_per_beat: 20,
            max_outlets_per_beat: 40,
            max_working_time_mins: 480.0, // 8-hour day
            visit_time_mins: 6.0,
            travel_speed_kmh: 25.0,
            min_isolation_km: 0.5,
            max_spread_km: 2.0,
            min_outlets_per_territory: 180,
            max_outlets_per_territory: 240,
            min_rev1_per_territory: 0.0,
            min_rev2_per_territory: 0.0,
            revenue_margin: 0.05,
        }
    }
}

impl ConstraintSet {
    /// `rev1` floor relaxed by the margin; what the partitioner and validator
    /// actually compare against.
    pub fn effective_rev1_floor(&self) -> f64 {
        self.min_rev1_per_territory * (1.0 - self.revenue_margin)
    }

    /// `rev2` floor relaxed by the margin.
    pub fn effective_rev2_floor(&self) -> f64 {
        self.min_rev2_per_territory * (1.0 - self.revenue_margin)
    }

    /// Travel plus service time for one leg ending in a visit, minutes.
    pub fn leg_time_mins(&self, distance_km: f64) -> f64 {
        crate::geo::travel_time_mins(distance_km, self.travel_speed_kmh) + self.visit_time_mins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_floors_apply_margin() {
        let constraints = ConstraintSet {
            min_rev1_per_territory: 1000.0,
            min_rev2_per_territory: 500.0,
            revenue_margin: 0.05,
            ..ConstraintSet::default()
        };
        assert!((constraints.effective_rev1_floor() - 950.0).abs() < 1e-9);
        assert!((constraints.effective_rev2_floor() - 475.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_floor_stays_zero() {
        let constraints = ConstraintSet::default();
        assert_eq!(constraints.effective_rev1_floor(), 0.0);
    }

    #[test]
    fn test_leg_time_combines_travel_and_visit() {
        let constraints = ConstraintSet {
            travel_speed_kmh: 30.0,
            visit_time_mins: 6.0,
            ..ConstraintSet::default()
        };
        // 5 km at 30 km/h = 10 minutes travel + 6 minutes service
        assert!((constraints.leg_time_mins(5.0) - 16.0).abs() < 1e-9);
    }
}
