//! Beat builder tests across all four strategies.

mod fixtures;

use beat_planner::builders::{
    build_beats, build_beats_with_fallback, AnnealingBuilder, BeatBuilder, IsolationBuilder,
    IsolationOptions,
};
use beat_planner::constraints::ConstraintSet;
use beat_planner::error::BuildError;
use beat_planner::geo;
use beat_planner::model::Strategy;

use fixtures::{depot, grid, pocket, sorted_beat_ids, sorted_customer_ids, territory_of};

fn beat_bounds(min: usize, max: usize) -> ConstraintSet {
    ConstraintSet {
        min_outlets_per_beat: min,
        max_outlets_per_beat: max,
        ..ConstraintSet::default()
    }
}

#[test]
fn every_strategy_covers_the_territory_exactly_once() {
    let customers = grid("c", (12.90, 77.60), 4, 6, 0.002);
    let territory = territory_of(0, &customers);
    let depot = depot(12.90, 77.60);
    let constraints = beat_bounds(2, 8);

    for strategy in [
        Strategy::NearestNeighbor,
        Strategy::Annealing,
        Strategy::Isolation,
        Strategy::Enhanced,
    ] {
        let beats = build_beats(&territory, &customers, &depot, &constraints, strategy).unwrap();
        assert_eq!(
            sorted_beat_ids(&beats),
            sorted_customer_ids(&customers),
            "coverage broken for {:?}",
            strategy
        );
    }
}

#[test]
fn beats_are_renumbered_sequentially() {
    let customers = grid("c", (12.90, 77.60), 3, 5, 0.002);
    let territory = territory_of(0, &customers);
    let depot = depot(12.90, 77.60);

    for strategy in [
        Strategy::NearestNeighbor,
        Strategy::Annealing,
        Strategy::Isolation,
        Strategy::Enhanced,
    ] {
        let beats =
            build_beats(&territory, &customers, &depot, &beat_bounds(2, 6), strategy).unwrap();
        for (index, beat) in beats.iter().enumerate() {
            assert_eq!(beat.id, index, "ids not sequential for {:?}", strategy);
        }
    }
}

#[test]
fn two_groups_across_the_depot_make_two_pure_beats() {
    // Two pockets of six, ~5 km apart, depot at the midpoint. The greedy
    // walk must exhaust one pocket before crossing to the other, and the
    // rebalancing pass has nothing to fix.
    let mut customers = pocket("west", 12.900, 77.600, 6, 0.0005);
    customers.extend(pocket("east", 12.900, 77.646, 6, 0.0005));
    let territory = territory_of(0, &customers);
    let depot = depot(12.900, 77.623);
    let constraints = beat_bounds(3, 6);

    let beats = build_beats(
        &territory,
        &customers,
        &depot,
        &constraints,
        Strategy::NearestNeighbor,
    )
    .unwrap();

    assert_eq!(beats.len(), 2);
    for beat in &beats {
        assert_eq!(beat.size(), 6);
        let west: Vec<bool> = beat.customer_ids().map(|id| id.starts_with("west")).collect();
        assert!(
            west.iter().all(|&w| w) || west.iter().all(|&w| !w),
            "beat mixed the two groups"
        );
    }
}

#[test]
fn builder_metrics_are_consistent_with_the_geometry() {
    let customers = grid("c", (12.90, 77.60), 3, 4, 0.002);
    let territory = territory_of(0, &customers);
    let home = depot(12.90, 77.60);
    let constraints = beat_bounds(2, 6);

    let beats = build_beats(
        &territory,
        &customers,
        &home,
        &constraints,
        Strategy::NearestNeighbor,
    )
    .unwrap();

    for beat in &beats {
        let approach = geo::haversine_km(home.coords(), beat.stops[0].coords());
        let legs: f64 = beat.stops.iter().map(|s| s.distance_to_next_km).sum();
        assert!(
            (beat.total_distance_km - (approach + legs)).abs() < 1e-9,
            "distance total out of sync for beat {}",
            beat.id
        );

        let visits: f64 = beat.stops.iter().map(|s| s.visit_time_mins).sum();
        assert!(beat.total_time_mins >= visits);
        assert_eq!(beat.stops.last().unwrap().distance_to_next_km, 0.0);
    }
}

#[test]
fn nearest_neighbor_respects_the_beat_cap() {
    let customers = grid("c", (12.90, 77.60), 2, 9, 0.0005);
    let territory = territory_of(0, &customers);
    let depot = depot(12.90, 77.60);
    let constraints = beat_bounds(2, 5);

    let beats = build_beats(
        &territory,
        &customers,
        &depot,
        &constraints,
        Strategy::NearestNeighbor,
    )
    .unwrap();

    assert!(beats.iter().all(|b| b.size() <= 5));
    assert_eq!(sorted_beat_ids(&beats).len(), 18);
}

#[test]
fn annealing_is_deterministic_for_a_fixed_seed() {
    let customers = grid("c", (12.90, 77.60), 3, 4, 0.001);
    let territory = territory_of(0, &customers);
    let depot = depot(12.90, 77.60);
    let constraints = beat_bounds(2, 6);

    let first = AnnealingBuilder::seeded(42)
        .build(&territory, &customers, &depot, &constraints)
        .unwrap();
    let second = AnnealingBuilder::seeded(42)
        .build(&territory, &customers, &depot, &constraints)
        .unwrap();

    assert_eq!(first, second);
}

#[test]
fn isolation_builder_honors_a_fixed_beat_count() {
    // Fifteen customers, three seeded beats, capacity five: every beat must
    // fill, so the target count survives to the output.
    let mut customers = pocket("a", 12.900, 77.600, 5, 0.0005);
    customers.extend(pocket("b", 12.900, 77.650, 5, 0.0005));
    customers.extend(pocket("c", 12.950, 77.625, 5, 0.0005));
    let territory = territory_of(0, &customers);
    let depot = depot(12.92, 77.625);
    let constraints = ConstraintSet {
        min_outlets_per_beat: 1,
        max_outlets_per_beat: 5,
        min_isolation_km: 0.4,
        ..ConstraintSet::default()
    };

    let builder = IsolationBuilder::new(IsolationOptions {
        beats_per_territory: 3,
        ..IsolationOptions::default()
    });
    let beats = builder
        .build(&territory, &customers, &depot, &constraints)
        .unwrap();

    assert_eq!(beats.len(), 3);
    assert_eq!(sorted_beat_ids(&beats).len(), 15);
}

#[test]
fn unknown_territory_member_is_an_error() {
    let customers = grid("c", (12.90, 77.60), 2, 3, 0.002);
    let mut territory = territory_of(0, &customers);
    territory.customer_ids.push("ghost".to_string());
    let depot = depot(12.90, 77.60);

    let err = build_beats(
        &territory,
        &customers,
        &depot,
        &beat_bounds(1, 6),
        Strategy::NearestNeighbor,
    )
    .unwrap_err();

    assert!(matches!(err, BuildError::UnknownCustomer { id, .. } if id == "ghost"));
    assert!(!err.is_infrastructural());
}

#[test]
fn fallback_dispatch_matches_direct_dispatch_on_success() {
    let customers = grid("c", (12.90, 77.60), 3, 4, 0.002);
    let territory = territory_of(0, &customers);
    let depot = depot(12.90, 77.60);
    let constraints = beat_bounds(2, 6);

    let direct =
        build_beats(&territory, &customers, &depot, &constraints, Strategy::Annealing).unwrap();
    let with_fallback = build_beats_with_fallback(
        &territory,
        &customers,
        &depot,
        &constraints,
        Strategy::Annealing,
    )
    .unwrap();

    assert_eq!(direct, with_fallback);
}

#[test]
fn stops_carry_their_territory_id() {
    let customers = grid("c", (12.90, 77.60), 2, 4, 0.002);
    let territory = territory_of(7, &customers);
    let depot = depot(12.90, 77.60);

    let beats = build_beats(
        &territory,
        &customers,
        &depot,
        &beat_bounds(1, 6),
        Strategy::Enhanced,
    )
    .unwrap();

    for beat in &beats {
        assert!(beat.territory_ids.contains(&7));
        assert!(beat.stops.iter().all(|s| s.territory_id == 7));
    }
}
