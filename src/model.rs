//! Core domain types for territory partitioning and beat construction.
//!
//! These are plain value types. The excluded ingestion/export layers move them
//! across their boundaries as serialized data; the planner itself owns no wire
//! or file format.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::geo;

/// A field-sales customer location ("outlet"). Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    /// Unique identifier, assigned by the ingestion layer.
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    /// Display name, when the source sheet carried one.
    pub name: Option<String>,
    /// First revenue figure (e.g. trailing-period sales).
    pub rev1: Option<f64>,
    /// Second revenue figure (e.g. target or category sales).
    pub rev2: Option<f64>,
}

impl Customer {
    pub fn new(id: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            id: id.into(),
            lat,
            lng,
            name: None,
            rev1: None,
            rev2: None,
        }
    }

    pub fn coords(&self) -> (f64, f64) {
        (self.lat, self.lng)
    }

    /// Combined revenue used for greedy ordering; absent figures count as zero.
    pub fn combined_revenue(&self) -> f64 {
        self.rev1.unwrap_or(0.0) + self.rev2.unwrap_or(0.0)
    }
}

/// The depot every beat originates from. One per dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Depot {
    pub lat: f64,
    pub lng: f64,
}

impl Depot {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn coords(&self) -> (f64, f64) {
        (self.lat, self.lng)
    }
}

/// A size- and revenue-bounded partition of the customer set.
///
/// Membership is by customer id; territories always partition the input set
/// exactly (no loss, no duplication). `center` is the median center used
/// during sector slicing; `angular_bounds` are the `[start, end)` angles of
/// the producing sector, absent for territories reshaped past recognition by
/// the repair passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Territory {
    pub id: usize,
    pub customer_ids: Vec<String>,
    pub rev1_total: f64,
    pub rev2_total: f64,
    pub center: (f64, f64),
    pub angular_bounds: Option<(f64, f64)>,
}

impl Territory {
    pub fn size(&self) -> usize {
        self.customer_ids.len()
    }

    pub fn contains(&self, customer_id: &str) -> bool {
        self.customer_ids.iter().any(|id| id == customer_id)
    }
}

/// One visit within a beat. Owned by exactly one beat at a time; moving a
/// stop between beats transfers ownership, never duplicates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub customer_id: String,
    pub lat: f64,
    pub lng: f64,
    /// Distance to the next stop in the sequence; 0 for the last stop.
    pub distance_to_next_km: f64,
    /// Travel time to the next stop; 0 for the last stop.
    pub time_to_next_mins: f64,
    /// Fixed service time at this stop.
    pub visit_time_mins: f64,
    pub territory_id: usize,
}

impl Stop {
    pub fn from_customer(customer: &Customer, territory_id: usize) -> Self {
        Self {
            customer_id: customer.id.clone(),
            lat: customer.lat,
            lng: customer.lng,
            distance_to_next_km: 0.0,
            time_to_next_mins: 0.0,
            visit_time_mins: 0.0,
            territory_id,
        }
    }

    pub fn coords(&self) -> (f64, f64) {
        (self.lat, self.lng)
    }
}

/// An ordered sequence of stops visited in one working session, anchored at
/// the depot.
///
/// Created empty by a builder, grown by stop insertion, mutated by the repair
/// passes (merge/split/relocate), finalized with sequential id renumbering.
/// Totals include the depot-to-first-stop leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beat {
    pub id: usize,
    pub stops: Vec<Stop>,
    pub total_distance_km: f64,
    pub total_time_mins: f64,
    /// Territories represented in this beat; normally exactly one.
    pub territory_ids: BTreeSet<usize>,
    pub depot: Depot,
}

impl Beat {
    pub fn new(id: usize, depot: Depot, territory_id: usize) -> Self {
        let mut territory_ids = BTreeSet::new();
        territory_ids.insert(territory_id);
        Self {
            id,
            stops: Vec::new(),
            total_distance_km: 0.0,
            total_time_mins: 0.0,
            territory_ids,
            depot,
        }
    }

    pub fn size(&self) -> usize {
        self.stops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    pub fn customer_ids(&self) -> impl Iterator<Item = &str> {
        self.stops.iter().map(|stop| stop.customer_id.as_str())
    }

    /// Mean coordinates of the current stops; the depot when empty.
    pub fn centroid(&self) -> (f64, f64) {
        if self.stops.is_empty() {
            return self.depot.coords();
        }
        let n = self.stops.len() as f64;
        let lat = self.stops.iter().map(|s| s.lat).sum::<f64>() / n;
        let lng = self.stops.iter().map(|s| s.lng).sum::<f64>() / n;
        (lat, lng)
    }

    /// Distance from this beat's centroid to a point.
    pub fn centroid_distance_km(&self, point: (f64, f64)) -> f64 {
        geo::haversine_km(self.centroid(), point)
    }
}

/// Beat construction strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    /// Greedy nearest-neighbor with merge/split rebalancing.
    NearestNeighbor,
    /// Proximity-constrained simulated annealing.
    Annealing,
    /// Density-seeded builder enforcing inter-beat separation.
    Isolation,
    /// Multi-constraint nearest neighbor scored by mode distance.
    Enhanced,
}
