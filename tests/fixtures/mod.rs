//! Test fixtures for beat-planner.
//!
//! Provides builders for customers and territories plus deterministic
//! geographic layouts (grids, pockets, rings) used across the integration
//! tests.

#![allow(dead_code)]

use beat_planner::model::{Customer, Depot, Territory};

/// Builder for test customers with sensible defaults.
#[derive(Clone, Debug)]
pub struct CustomerBuilder {
    id: String,
    lat: f64,
    lng: f64,
    name: Option<String>,
    rev1: Option<f64>,
    rev2: Option<f64>,
}

impl CustomerBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            lat: 0.0,
            lng: 0.0,
            name: None,
            rev1: None,
            rev2: None,
        }
    }

    pub fn at(mut self, lat: f64, lng: f64) -> Self {
        self.lat = lat;
        self.lng = lng;
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn revenue(mut self, rev1: f64, rev2: f64) -> Self {
        self.rev1 = Some(rev1);
        self.rev2 = Some(rev2);
        self
    }

    pub fn build(self) -> Customer {
        Customer {
            id: self.id,
            lat: self.lat,
            lng: self.lng,
            name: self.name,
            rev1: self.rev1,
            rev2: self.rev2,
        }
    }
}

pub fn customer(id: &str, lat: f64, lng: f64) -> Customer {
    CustomerBuilder::new(id).at(lat, lng).build()
}

pub fn depot(lat: f64, lng: f64) -> Depot {
    Depot::new(lat, lng)
}

/// `rows x cols` grid of customers starting at `origin`, `spacing_deg`
/// degrees apart on both axes.
pub fn grid(prefix: &str, origin: (f64, f64), rows: usize, cols: usize, spacing_deg: f64) -> Vec<Customer> {
    let mut customers = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            customers.push(customer(
                &format!("{}{}", prefix, row * cols + col),
                origin.0 + row as f64 * spacing_deg,
                origin.1 + col as f64 * spacing_deg,
            ));
        }
    }
    customers
}

/// A tight pocket of `count` customers around a point, ~`spacing_deg` apart.
pub fn pocket(prefix: &str, lat: f64, lng: f64, count: usize, spacing_deg: f64) -> Vec<Customer> {
    (0..count)
        .map(|i| {
            customer(
                &format!("{}{}", prefix, i),
                lat + i as f64 * spacing_deg,
                lng + (i % 2) as f64 * spacing_deg,
            )
        })
        .collect()
}

/// `count` customers on a circle of `radius_deg` degrees around a center;
/// angularly uniform, which keeps equal-angle sector slicing exact.
pub fn ring(prefix: &str, center: (f64, f64), count: usize, radius_deg: f64) -> Vec<Customer> {
    (0..count)
        .map(|i| {
            let angle = i as f64 / count as f64 * std::f64::consts::TAU;
            customer(
                &format!("{}{}", prefix, i),
                center.0 + radius_deg * angle.sin(),
                center.1 + radius_deg * angle.cos(),
            )
        })
        .collect()
}

/// Wrap a customer list into a single territory, as the partitioner would.
pub fn territory_of(id: usize, customers: &[Customer]) -> Territory {
    Territory {
        id,
        customer_ids: customers.iter().map(|c| c.id.clone()).collect(),
        rev1_total: customers.iter().map(|c| c.rev1.unwrap_or(0.0)).sum(),
        rev2_total: customers.iter().map(|c| c.rev2.unwrap_or(0.0)).sum(),
        center: (0.0, 0.0),
        angular_bounds: None,
    }
}

/// All customer ids across a beat set, sorted; handy for coverage asserts.
pub fn sorted_beat_ids(beats: &[beat_planner::model::Beat]) -> Vec<String> {
    let mut ids: Vec<String> = beats
        .iter()
        .flat_map(|b| b.customer_ids().map(str::to_string))
        .collect();
    ids.sort();
    ids
}

/// All customer ids in a dataset, sorted.
pub fn sorted_customer_ids(customers: &[Customer]) -> Vec<String> {
    let mut ids: Vec<String> = customers.iter().map(|c| c.id.clone()).collect();
    ids.sort();
    ids
}
