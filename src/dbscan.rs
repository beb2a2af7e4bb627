//! Density sub-clustering over customer coordinates.
//!
//! Classical neighbor-expansion DBSCAN with one deliberate deviation: points
//! that end up as noise are not discarded. Each is folded into the cluster
//! with the nearest centroid, so every input point is covered by exactly one
//! output cluster. Beat builders that want natural geographic pockets consume
//! this directly.

use tracing::debug;

use crate::geo;
use crate::model::Customer;

/// Density parameters. `eps_km` is the neighborhood radius; a point with at
/// least `min_samples` neighbors inside it (itself included) is a core point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DensityOptions {
    pub eps_km: f64,
    pub min_samples: usize,
}

impl Default for DensityOptions {
    fn default() -> Self {
        Self {
            eps_km: 0.5,
            min_samples: 4,
        }
    }
}

/// A density cluster over input indices.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityCluster {
    pub id: usize,
    /// Indices into the input customer slice.
    pub members: Vec<usize>,
    pub centroid: (f64, f64),
}

impl DensityCluster {
    fn from_members(id: usize, members: Vec<usize>, customers: &[Customer]) -> Self {
        let centroid = centroid_of(&members, customers);
        Self {
            id,
            members,
            centroid,
        }
    }
}

/// Group customers into density clusters covering every input index exactly
/// once.
pub fn cluster(customers: &[Customer], options: &DensityOptions) -> Vec<DensityCluster> {
    if customers.is_empty() {
        return Vec::new();
    }

    let n = customers.len();
    let mut labels: Vec<Option<usize>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut clusters: Vec<Vec<usize>> = Vec::new();

    for point in 0..n {
        if visited[point] {
            continue;
        }
        visited[point] = true;

        let neighbors = neighbors_of(point, customers, options.eps_km);
        if neighbors.len() < options.min_samples {
            continue; // noise for now; reassigned below
        }

        // New cluster seeded by this core point; breadth-first expansion.
        let cluster_id = clusters.len();
        let mut members = vec![point];
        labels[point] = Some(cluster_id);

        let mut frontier = neighbors;
        let mut cursor = 0;
        while cursor < frontier.len() {
            let candidate = frontier[cursor];
            cursor += 1;

            if !visited[candidate] {
                visited[candidate] = true;
                let candidate_neighbors = neighbors_of(candidate, customers, options.eps_km);
                if candidate_neighbors.len() >= options.min_samples {
                    frontier.extend(candidate_neighbors);
                }
            }

            if labels[candidate].is_none() {
                labels[candidate] = Some(cluster_id);
                members.push(candidate);
            }
        }

        clusters.push(members);
    }

    let noise: Vec<usize> = (0..n).filter(|&i| labels[i].is_none()).collect();

    if clusters.is_empty() {
        // Nothing dense enough anywhere; the whole input is one pocket.
        debug!(points = n, "no density cluster formed, folding all points into one");
        return vec![DensityCluster::from_members(0, (0..n).collect(), customers)];
    }

    if !noise.is_empty() {
        debug!(
            noise = noise.len(),
            clusters = clusters.len(),
            "reassigning noise points to nearest centroids"
        );
        let centroids: Vec<(f64, f64)> = clusters
            .iter()
            .map(|members| centroid_of(members, customers))
            .collect();
        for point in noise {
            let nearest = nearest_centroid(customers[point].coords(), &centroids);
            clusters[nearest].push(point);
        }
    }

    clusters
        .into_iter()
        .enumerate()
        .map(|(id, members)| DensityCluster::from_members(id, members, customers))
        .collect()
}

/// Indices within `eps_km` of `point`, the point itself included.
fn neighbors_of(point: usize, customers: &[Customer], eps_km: f64) -> Vec<usize> {
    let origin = customers[point].coords();
    customers
        .iter()
        .enumerate()
        .filter(|(_, other)| geo::haversine_km(origin, other.coords()) <= eps_km)
        .map(|(i, _)| i)
        .collect()
}

fn centroid_of(members: &[usize], customers: &[Customer]) -> (f64, f64) {
    let n = members.len() as f64;
    let lat = members.iter().map(|&i| customers[i].lat).sum::<f64>() / n;
    let lng = members.iter().map(|&i| customers[i].lng).sum::<f64>() / n;
    (lat, lng)
}

fn nearest_centroid(point: (f64, f64), centroids: &[(f64, f64)]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, &centroid) in centroids.iter().enumerate() {
        let dist = geo::haversine_km(point, centroid);
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
    }
    best
}
