//! Per-device standard scaler and its on-disk artifact form.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::PipelineError;
use crate::features::NUM_FEATURES;

/// Per-feature affine standardizer: `(x - mean) / scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Scaler {
    /// Fit column means and population standard deviations. Zero-variance
    /// columns get scale 1 so the transform stays invertible.
    pub fn fit(rows: &[[f64; NUM_FEATURES]]) -> Self {
        let n = rows.len().max(1) as f64;
        let mut mean = vec![0.0; NUM_FEATURES];
        for row in rows {
            for (m, x) in mean.iter_mut().zip(row.iter()) {
                *m += x;
            }
        }
        for m in mean.iter_mut() {
            *m /= n;
        }

        let mut scale = vec![0.0; NUM_FEATURES];
        for row in rows {
            for (s, (x, m)) in scale.iter_mut().zip(row.iter().zip(mean.iter())) {
                *s += (x - m) * (x - m);
            }
        }
        for s in scale.iter_mut() {
            *s = (*s / n).sqrt();
            if *s == 0.0 || !s.is_finite() {
                *s = 1.0;
            }
        }

        Self { mean, scale }
    }

    /// Identity scaler (zero mean, unit scale).
    pub fn identity() -> Self {
        Self {
            mean: vec![0.0; NUM_FEATURES],
            scale: vec![1.0; NUM_FEATURES],
        }
    }

    pub fn transform(&self, x: &[f64; NUM_FEATURES]) -> [f64; NUM_FEATURES] {
        let mut out = [0.0; NUM_FEATURES];
        for i in 0..NUM_FEATURES {
            out[i] = (x[i] - self.mean[i]) / self.scale[i];
        }
        out
    }

    pub fn inverse_transform(&self, x: &[f64; NUM_FEATURES]) -> [f64; NUM_FEATURES] {
        let mut out = [0.0; NUM_FEATURES];
        for i in 0..NUM_FEATURES {
            out[i] = x[i] * self.scale[i] + self.mean[i];
        }
        out
    }
}

/// On-disk wrapper matching the `{"ss": …}` artifact layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerArtifact {
    pub ss: Scaler,
}

impl ScalerArtifact {
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
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
