//! Post-hoc constraint audit.
//!
//! Runs independently of the builders over a finished beat set and produces
//! a structured violation report. The builders repair what they can; this
//! module only observes and counts, so a dishonest repair pass cannot hide a
//! violation from the caller.

use serde::{Deserialize, Serialize};

use crate::constraints::ConstraintSet;
use crate::geo;
use crate::model::Beat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Reported but does not invalidate the plan.
    Warning,
    /// Invalidates the plan.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationKind {
    BeatBelowMinimum,
    BeatAboveMaximum,
    WorkingTimeExceeded,
    IsolationBreached,
    SpreadExceeded,
}

/// One failed check, with the measured value that failed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub severity: Severity,
    pub beat_id: usize,
    pub territory_id: Option<usize>,
    pub message: String,
    pub detail: f64,
}

/// Violation list plus aggregate compliance statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationReport {
    pub violations: Vec<Violation>,
    pub checks_performed: usize,
    pub beats_checked: usize,
    pub error_count: usize,
    pub warning_count: usize,
    /// `1 − violations / checks_performed`.
    pub compliance: f64,
    pub total_distance_km: f64,
    pub total_time_mins: f64,
    pub mean_outlets_per_beat: f64,
}

impl ViolationReport {
    /// A plan is valid when no error-severity violation was found; warnings
    /// alone do not invalidate it.
    pub fn is_valid(&self) -> bool {
        self.error_count == 0
    }
}

/// Audit a finished beat set against the constraint surface.
pub fn validate(beats: &[Beat], constraints: &ConstraintSet) -> ViolationReport {
    let mut violations = Vec::new();
    let mut checks = 0usize;

    for beat in beats {
        // Outlet-count bound.
        checks += 1;
        if beat.size() < constraints.min_outlets_per_beat {
            violations.push(Violation {
                kind: ViolationKind::BeatBelowMinimum,
                severity: Severity::Warning,
                beat_id: beat.id,
                territory_id: beat.territory_ids.iter().next().copied(),
                message: format!(
                    "beat {} has {} outlets, below the minimum of {}",
                    beat.id,
                    beat.size(),
                    constraints.min_outlets_per_beat
                ),
                detail: beat.size() as f64,
            });
        } else if beat.size() > constraints.max_outlets_per_beat {
            violations.push(Violation {
                kind: ViolationKind::BeatAboveMaximum,
                severity: Severity::Error,
                beat_id: beat.id,
                territory_id: beat.territory_ids.iter().next().copied(),
                message: format!(
                    "beat {} has {} outlets, above the maximum of {}",
                    beat.id,
                    beat.size(),
                    constraints.max_outlets_per_beat
                ),
                detail: beat.size() as f64,
            });
        }

        // Working-time bound.
        checks += 1;
        if beat.total_time_mins > constraints.max_working_time_mins {
            violations.push(Violation {
                kind: ViolationKind::WorkingTimeExceeded,
                severity: Severity::Error,
                beat_id: beat.id,
                territory_id: beat.territory_ids.iter().next().copied(),
                message: format!(
                    "beat {} needs {:.1} minutes, budget is {:.1}",
                    beat.id, beat.total_time_mins, constraints.max_working_time_mins
                ),
                detail: beat.total_time_mins,
            });
        }

        // Intra-beat spread.
        for (slot, a) in beat.stops.iter().enumerate() {
            for b in &beat.stops[slot + 1..] {
                checks += 1;
                let dist = geo::haversine_km(a.coords(), b.coords());
                if dist > constraints.max_spread_km {
                    violations.push(Violation {
                        kind: ViolationKind::SpreadExceeded,
                        severity: Severity::Error,
                        beat_id: beat.id,
                        territory_id: Some(a.territory_id),
                        message: format!(
                            "stops {} and {} in beat {} are {:.2} km apart, spread cap is {:.2}",
                            a.customer_id, b.customer_id, beat.id, dist, constraints.max_spread_km
                        ),
                        detail: dist,
                    });
                }
            }
        }
    }

    // Inter-beat isolation, same territory only.
    for (slot, first) in beats.iter().enumerate() {
        for second in &beats[slot + 1..] {
            if first
                .territory_ids
                .intersection(&second.territory_ids)
                .next()
                .is_none()
            {
                continue;
            }
            for a in &first.stops {
                for b in &second.stops {
                    checks += 1;
                    let dist = geo::haversine_km(a.coords(), b.coords());
                    if dist < constraints.min_isolation_km {
                        violations.push(Violation {
                            kind: ViolationKind::IsolationBreached,
                            severity: Severity::Error,
                            beat_id: first.id,
                            territory_id: Some(a.territory_id),
                            message: format!(
                                "stops {} (beat {}) and {} (beat {}) are {:.3} km apart, isolation floor is {:.3}",
                                a.customer_id,
                                first.id,
                                b.customer_id,
                                second.id,
                                dist,
                                constraints.min_isolation_km
                            ),
                            detail: dist,
                        });
                    }
                }
            }
        }
    }

    let error_count = violations
        .iter()
        .filter(|v| v.severity == Severity::Error)
        .count();
    let warning_count = violations.len() - error_count;
    let compliance = if checks == 0 {
        1.0
    } else {
        1.0 - violations.len() as f64 / checks as f64
    };

    let total_outlets: usize = beats.iter().map(|b| b.size()).sum();
    ViolationReport {
        checks_performed: checks,
        beats_checked: beats.len(),
        error_count,
        warning_count,
        compliance,
        total_distance_km: beats.iter().map(|b| b.total_distance_km).sum(),
        total_time_mins: beats.iter().map(|b| b.total_time_mins).sum(),
        mean_outlets_per_beat: if beats.is_empty() {
            0.0
        } else {
            total_outlets as f64 / beats.len() as f64
        },
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Customer, Depot, Stop};

    fn beat(id: usize, territory: usize, coords: &[(f64, f64)]) -> Beat {
        let mut beat = Beat::new(id, Depot::new(12.9, 77.6), territory);
        for (i, &(lat, lng)) in coords.iter().enumerate() {
            let customer = Customer::new(format!("b{}c{}", id, i), lat, lng);
            beat.stops.push(Stop::from_customer(&customer, territory));
        }
        beat
    }

    fn lenient() -> ConstraintSet {
        ConstraintSet {
            min_outlets_per_beat: 1,
            max_outlets_per_beat: 100,
            max_working_time_mins: 1e9,
            min_isolation_km: 0.0,
            max_spread_km: 1e9,
            ..ConstraintSet::default()
        }
    }

    #[test]
    fn test_clean_set_is_valid_with_full_compliance() {
        let beats = vec![beat(0, 0, &[(12.90, 77.60), (12.901, 77.60)])];
        let report = validate(&beats, &lenient());
        assert!(report.is_valid());
        assert!(report.violations.is_empty());
        assert_eq!(report.compliance, 1.0);
    }

    #[test]
    fn test_undersized_beat_is_a_warning_not_an_error() {
        let constraints = ConstraintSet {
            min_outlets_per_beat: 5,
            ..lenient()
        };
        let beats = vec![beat(0, 0, &[(12.90, 77.60)])];
        let report = validate(&beats, &constraints);
        assert_eq!(report.warning_count, 1);
        assert_eq!(report.error_count, 0);
        assert!(report.is_valid());
        assert_eq!(report.violations[0].kind, ViolationKind::BeatBelowMinimum);
    }

    #[test]
    fn test_oversized_beat_is_an_error() {
        let constraints = ConstraintSet {
            max_outlets_per_beat: 1,
            ..lenient()
        };
        let beats = vec![beat(0, 0, &[(12.90, 77.60), (12.901, 77.60)])];
        let report = validate(&beats, &constraints);
        assert_eq!(report.error_count, 1);
        assert!(!report.is_valid());
        assert_eq!(report.violations[0].kind, ViolationKind::BeatAboveMaximum);
    }

    #[test]
    fn test_spread_violation_detected() {
        let constraints = ConstraintSet {
            max_spread_km: 1.0,
            ..lenient()
        };
        // ~2.2 km apart in one beat.
        let beats = vec![beat(0, 0, &[(12.90, 77.60), (12.92, 77.60)])];
        let report = validate(&beats, &constraints);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.violations[0].kind, ViolationKind::SpreadExceeded);
        assert!(report.violations[0].detail > 1.0);
    }

    #[test]
    fn test_isolation_checked_within_territory_only() {
        let constraints = ConstraintSet {
            min_isolation_km: 1.0,
            ..lenient()
        };
        // Two beats ~110 m apart: same territory breaches, different does not.
        let same = vec![
            beat(0, 0, &[(12.900, 77.60)]),
            beat(1, 0, &[(12.901, 77.60)]),
        ];
        let report = validate(&same, &constraints);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.violations[0].kind, ViolationKind::IsolationBreached);

        let different = vec![
            beat(0, 0, &[(12.900, 77.60)]),
            beat(1, 1, &[(12.901, 77.60)]),
        ];
        let report = validate(&different, &constraints);
        assert_eq!(report.error_count, 0);
    }

    #[test]
    fn test_working_time_violation() {
        let constraints = ConstraintSet {
            max_working_time_mins: 60.0,
            ..lenient()
        };
        let mut over = beat(0, 0, &[(12.90, 77.60)]);
        over.total_time_mins = 75.0;
        let report = validate(&[over], &constraints);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.violations[0].kind, ViolationKind::WorkingTimeExceeded);
    }

    #[test]
    fn test_compliance_arithmetic() {
        let constraints = ConstraintSet {
            min_outlets_per_beat: 5,
            ..lenient()
        };
        // One beat, one stop: 2 beat-level checks + 0 pair checks; the size
        // warning is the single violation.
        let beats = vec![beat(0, 0, &[(12.90, 77.60)])];
        let report = validate(&beats, &constraints);
        assert_eq!(report.checks_performed, 2);
        assert!((report.compliance - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_set_reports_full_compliance() {
        let report = validate(&[], &lenient());
        assert!(report.is_valid());
        assert_eq!(report.compliance, 1.0);
        assert_eq!(report.mean_outlets_per_beat, 0.0);
    }
}
