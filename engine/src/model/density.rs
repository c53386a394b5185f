//! Density-based clustering (DBSCAN) in the explicit form the pipeline
//! consumes: eps, core-sample vectors, labels, and core-sample indices.
//!
//! `fit` is the classic O(n²) region-query algorithm; training sets are
//! capped upstream. `predict` scans core samples in order and assigns the
//! label of the first one closer than eps, or −1 (noise).

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::PipelineError;

pub const NOISE: i64 = -1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensityModel {
    pub eps: f64,
    pub min_samples: usize,
    /// Core sample feature vectors, ordered by sample index.
    pub components: Vec<Vec<f64>>,
    /// Cluster label per training sample (−1 = noise).
    pub labels: Vec<i64>,
    /// Training-set index of each core sample.
    pub core_sample_indices: Vec<usize>,
}

pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

impl DensityModel {
    /// Run DBSCAN over `points` and capture the fitted state.
    pub fn fit(points: &[Vec<f64>], eps: f64, min_samples: usize) -> Self {
        let n = points.len();
        let mut labels: Vec<i64> = vec![NOISE; n];
        let mut visited = vec![false; n];

        // Region queries (a point is its own neighbor).
        let neighbors: Vec<Vec<usize>> = (0..n)
            .map(|i| {
                (0..n)
                    .filter(|&j| euclidean(&points[i], &points[j]) <= eps)
                    .collect()
            })
            .collect();

        let is_core: Vec<bool> = neighbors.iter().map(|ns| ns.len() >= min_samples).collect();

        let mut cluster: i64 = 0;
        for i in 0..n {
            if visited[i] || !is_core[i] {
                continue;
            }
            // Grow a new cluster from this unvisited core point.
            let mut frontier = vec![i];
            visited[i] = true;
            labels[i] = cluster;
            while let Some(p) = frontier.pop() {
                if !is_core[p] {
                    continue;
                }
                for &q in &neighbors[p] {
                    if labels[q] == NOISE {
                        labels[q] = cluster;
                    }
                    if !visited[q] {
                        visited[q] = true;
                        frontier.push(q);
                    }
                }
            }
            cluster += 1;
        }

        let core_sample_indices: Vec<usize> = (0..n).filter(|&i| is_core[i]).collect();
        let components: Vec<Vec<f64>> = core_sample_indices
            .iter()
            .map(|&i| points[i].clone())
            .collect();

        Self {
            eps,
            min_samples,
            components,
            labels,
            core_sample_indices,
        }
    }

    /// Label a new sample by the first core sample strictly closer than eps;
    /// −1 when none is.
    pub fn predict(&self, x: &[f64]) -> i64 {
        for (i, core) in self.components.iter().enumerate() {
            if euclidean(x, core) < self.eps {
                return self.labels[self.core_sample_indices[i]];
            }
        }
        NOISE
    }
}

/// On-disk wrapper matching the `{"trained_model": …}` artifact layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensityArtifact {
    pub trained_model: DensityModel,
}

impl DensityArtifact {
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(self)
            .map_err(|e| PipelineError::TransformFailure(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| PipelineError::TransformFailure(format!("{}: {e}", path.display())))
    }
}
