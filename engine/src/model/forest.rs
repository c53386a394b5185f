//! Binary event classifiers: small decision-tree ensembles serialized as
//! self-describing JSON, the neutral replacement for foreign pickled
//! estimators.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::PipelineError;

/// One node in flattened array form. `feature < 0` marks a leaf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub feature: i32,
    pub threshold: f64,
    pub left: usize,
    pub right: usize,
    /// Class counts (or probabilities) for [negative, positive].
    pub value: [f64; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// A single-split tree: `x[feature] <= threshold` → left distribution,
    /// otherwise right. Handy for bootstrapping and tests.
    pub fn stump(feature: usize, threshold: f64, left: [f64; 2], right: [f64; 2]) -> Self {
        Self {
            nodes: vec![
                TreeNode {
                    feature: feature as i32,
                    threshold,
                    left: 1,
                    right: 2,
                    value: [0.0, 0.0],
                },
                TreeNode {
                    feature: -1,
                    threshold: 0.0,
                    left: 0,
                    right: 0,
                    value: left,
                },
                TreeNode {
                    feature: -1,
                    threshold: 0.0,
                    left: 0,
                    right: 0,
                    value: right,
                },
            ],
        }
    }

    /// Walk to a leaf and return its normalized class distribution.
    fn proba(&self, x: &[f64]) -> Result<[f64; 2], PipelineError> {
        let mut idx = 0usize;
        for _ in 0..self.nodes.len() + 1 {
            let node = self
                .nodes
                .get(idx)
                .ok_or_else(|| PipelineError::PredictFailure(format!("bad node index {idx}")))?;
            if node.feature < 0 {
                let total = node.value[0] + node.value[1];
                if total <= 0.0 {
                    return Ok([0.5, 0.5]);
                }
                return Ok([node.value[0] / total, node.value[1] / total]);
            }
            let feature = node.feature as usize;
            let cell = *x.get(feature).ok_or_else(|| {
                PipelineError::PredictFailure(format!("feature index {feature} out of range"))
            })?;
            idx = if cell <= node.threshold {
                node.left
            } else {
                node.right
            };
        }
        Err(PipelineError::PredictFailure(
            "tree walk did not terminate".to_string(),
        ))
    }
}

/// A forest voting by averaged leaf distributions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventClassifier {
    pub trees: Vec<DecisionTree>,
}

impl EventClassifier {
    /// `[p(negative), p(positive)]`, averaged over all trees.
    pub fn predict_proba(&self, x: &[f64]) -> Result<[f64; 2], PipelineError> {
        if self.trees.is_empty() {
            return Err(PipelineError::PredictFailure("empty ensemble".to_string()));
        }
        let mut acc = [0.0, 0.0];
        for tree in &self.trees {
            let p = tree.proba(x)?;
            acc[0] += p[0];
            acc[1] += p[1];
        }
        let n = self.trees.len() as f64;
        Ok([acc[0] / n, acc[1] / n])
    }

    /// Hard 0/1 decision; ties go to the negative class.
    pub fn predict(&self, x: &[f64]) -> Result<u8, PipelineError> {
        let p = self.predict_proba(x)?;
        Ok(if p[1] > p[0] { 1 } else { 0 })
    }

    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(self)
            .map_err(|e| PipelineError::PredictFailure(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| PipelineError::PredictFailure(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positive_above(feature: usize, threshold: f64) -> EventClassifier {
        EventClassifier {
            trees: vec![DecisionTree::stump(
                feature,
                threshold,
                [1.0, 0.0],
                [0.0, 1.0],
            )],
        }
    }

    #[test]
    fn test_stump_decision() {
        let clf = positive_above(0, 0.5);
        assert_eq!(clf.predict(&[0.4, 0.0]).unwrap(), 0);
        assert_eq!(clf.predict(&[0.6, 0.0]).unwrap(), 1);
        // Boundary value goes left (negative).
        assert_eq!(clf.predict(&[0.5, 0.0]).unwrap(), 0);
    }

    #[test]
    fn test_proba_averages_trees() {
        let clf = EventClassifier {
            trees: vec![
                DecisionTree::stump(0, 0.5, [1.0, 0.0], [0.0, 1.0]),
                DecisionTree::stump(0, 0.5, [1.0, 0.0], [1.0, 0.0]),
            ],
        };
        let p = clf.predict_proba(&[0.9]).unwrap();
        assert!((p[1] - 0.5).abs() < 1e-12);
        // Tie → negative class.
        assert_eq!(clf.predict(&[0.9]).unwrap(), 0);
    }

    #[test]
    fn test_leaf_counts_are_normalized() {
        let clf = EventClassifier {
            trees: vec![DecisionTree::stump(0, 0.0, [30.0, 10.0], [2.0, 18.0])],
        };
        let p = clf.predict_proba(&[1.0]).unwrap();
        assert!((p[1] - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_range_feature_is_predict_failure() {
        let clf = positive_above(5, 0.5);
        let err = clf.predict(&[1.0]).unwrap_err();
        assert!(matches!(err, PipelineError::PredictFailure(_)));
    }

    #[test]
    fn test_empty_ensemble_rejected() {
        let clf = EventClassifier { trees: Vec::new() };
        assert!(clf.predict(&[1.0]).is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rf").join("amazon-plug").join("clf_on.json");

        let clf = positive_above(11, 3.0);
        clf.save(&path).unwrap();

        let loaded = EventClassifier::load(&path).unwrap();
        assert_eq!(loaded.predict(&[0.0; 22]).unwrap(), 0);
        let mut x = [0.0; 22];
        x[11] = 5.0;
        assert_eq!(loaded.predict(&x).unwrap(), 1);
    }
}
