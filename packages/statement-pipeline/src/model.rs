//! Trained relevance models.
//!
//! A model artifact is a JSON document holding a standard scaler, a support
//! vector machine (support vectors, dual coefficients and intercept) and an
//! optional Platt calibration. It is produced offline by the training job and
//! loaded once at startup; scoring is pure and deterministic.
//!
//! ```json
//! {
//!   "name": "page_relevance",
//!   "level": "page",
//!   "feature_names": ["distance_from_start", "..."],
//!   "scaler": { "mean": [0.0], "scale": [1.0] },
//!   "svm": {
//!     "kernel": { "type": "rbf", "gamma": 0.125 },
//!     "support_vectors": [[0.0]],
//!     "dual_coef": [1.0],
//!     "intercept": -0.5
//!   },
//!   "calibration": { "a": -2.0, "b": 0.0 }
//! }
//! ```
//!
//! A positive decision value means "exclude".

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FeatureSchemaError, ModelLoadError};
use crate::features::FeatureTable;

/// Which kind of unit a model scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationLevel {
    Page,
    Excerpt,
}

impl std::fmt::Display for ClassificationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Page => write!(f, "page"),
            Self::Excerpt => write!(f, "excerpt"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn transform(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .map(|(value, (mean, scale))| (value - mean) / scale)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Kernel {
    Linear,
    Rbf { gamma: f64 },
    Poly { gamma: f64, coef0: f64, degree: i32 },
    Sigmoid { gamma: f64, coef0: f64 },
}

impl Kernel {
    pub fn apply(&self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            Self::Linear => dot(a, b),
            Self::Rbf { gamma } => {
                let sq: f64 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
                (-gamma * sq).exp()
            }
            Self::Poly {
                gamma,
                coef0,
                degree,
            } => (gamma * dot(a, b) + coef0).powi(*degree),
            Self::Sigmoid { gamma, coef0 } => (gamma * dot(a, b) + coef0).tanh(),
        }
    }

    fn gamma(&self) -> Option<f64> {
        match self {
            Self::Linear => None,
            Self::Rbf { gamma } | Self::Poly { gamma, .. } | Self::Sigmoid { gamma, .. } => {
                Some(*gamma)
            }
        }
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportVectorMachine {
    pub kernel: Kernel,
    pub support_vectors: Vec<Vec<f64>>,
    pub dual_coef: Vec<f64>,
    pub intercept: f64,
}

impl SupportVectorMachine {
    /// Signed distance from the separating surface for a scaled sample.
    pub fn decision(&self, x: &[f64]) -> f64 {
        self.support_vectors
            .iter()
            .zip(&self.dual_coef)
            .map(|(sv, coef)| coef * self.kernel.apply(sv, x))
            .sum::<f64>()
            + self.intercept
    }
}

/// Sigmoid mapping a decision value to P(exclude).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlattCalibration {
    pub a: f64,
    pub b: f64,
}

impl PlattCalibration {
    pub fn probability(&self, decision: f64) -> f64 {
        1.0 / (1.0 + (self.a * decision + self.b).exp())
    }
}

/// A trained exclude/keep classifier over a fixed feature schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceModel {
    pub name: String,
    pub level: ClassificationLevel,
    pub feature_names: Vec<String>,
    pub scaler: StandardScaler,
    pub svm: SupportVectorMachine,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<PlattCalibration>,
}

impl RelevanceModel {
    /// Load and validate a model artifact from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ModelLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let model = Self::from_json(&raw, &path.display().to_string())?;

        tracing::info!(
            model = %model.name,
            level = %model.level,
            features = model.feature_names.len(),
            support_vectors = model.svm.support_vectors.len(),
            calibrated = model.is_calibrated(),
            "Loaded relevance model"
        );
        Ok(model)
    }

    /// Parse and validate a model artifact. `origin` names it in errors.
    pub fn from_json(raw: &str, origin: &str) -> Result<Self, ModelLoadError> {
        let model: Self = serde_json::from_str(raw).map_err(|source| ModelLoadError::Parse {
            origin: origin.to_string(),
            source,
        })?;
        model.validate()?;
        Ok(model)
    }

    /// Check that every dimension of the artifact agrees with its feature list.
    pub fn validate(&self) -> Result<(), ModelLoadError> {
        let invalid = |reason: String| ModelLoadError::Invalid {
            name: self.name.clone(),
            reason,
        };
        let n = self.feature_names.len();

        if n == 0 {
            return Err(invalid("no feature names".into()));
        }
        if self.scaler.mean.len() != n || self.scaler.scale.len() != n {
            return Err(invalid(format!(
                "scaler has {} means and {} scales for {} features",
                self.scaler.mean.len(),
                self.scaler.scale.len(),
                n
            )));
        }
        if self
            .scaler
            .scale
            .iter()
            .any(|s| !s.is_finite() || *s == 0.0)
        {
            return Err(invalid("scaler scale must be finite and non-zero".into()));
        }
        if self.svm.support_vectors.is_empty() {
            return Err(invalid("no support vectors".into()));
        }
        if let Some(bad) = self.svm.support_vectors.iter().position(|sv| sv.len() != n) {
            return Err(invalid(format!(
                "support vector {} has {} dimensions, expected {}",
                bad,
                self.svm.support_vectors[bad].len(),
                n
            )));
        }
        if self.svm.dual_coef.len() != self.svm.support_vectors.len() {
            return Err(invalid(format!(
                "{} dual coefficients for {} support vectors",
                self.svm.dual_coef.len(),
                self.svm.support_vectors.len()
            )));
        }
        if !self.svm.intercept.is_finite() {
            return Err(invalid("intercept is not finite".into()));
        }
        if let Some(gamma) = self.svm.kernel.gamma() {
            if !gamma.is_finite() || gamma <= 0.0 {
                return Err(invalid(format!("kernel gamma must be positive, got {}", gamma)));
            }
        }
        if let Some(cal) = self.calibration {
            if !cal.a.is_finite() || !cal.b.is_finite() {
                return Err(invalid("calibration parameters are not finite".into()));
            }
        }
        Ok(())
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_some()
    }

    fn check_columns(&self, table: &FeatureTable) -> Result<(), FeatureSchemaError> {
        if table.columns() == self.feature_names.as_slice() {
            Ok(())
        } else {
            Err(FeatureSchemaError {
                expected: self.feature_names.clone(),
                found: table.columns().to_vec(),
            })
        }
    }

    /// Decision value per row.
    pub fn decision_function(&self, table: &FeatureTable) -> Result<Vec<f64>, FeatureSchemaError> {
        self.check_columns(table)?;
        Ok(table
            .rows()
            .iter()
            .map(|row| self.svm.decision(&self.scaler.transform(row)))
            .collect())
    }

    /// Hard labels per row: 1 = exclude, 0 = keep.
    pub fn predict(&self, table: &FeatureTable) -> Result<Vec<u8>, FeatureSchemaError> {
        Ok(self
            .decision_function(table)?
            .into_iter()
            .map(|d| u8::from(d > 0.0))
            .collect())
    }

    /// P(exclude) per row. Uncalibrated models report their hard label as 0.0 or 1.0.
    pub fn predict_exclusion_proba(
        &self,
        table: &FeatureTable,
    ) -> Result<Vec<f64>, FeatureSchemaError> {
        let decisions = self.decision_function(table)?;
        Ok(match self.calibration {
            Some(cal) => decisions.into_iter().map(|d| cal.probability(d)).collect(),
            None => decisions
                .into_iter()
                .map(|d| if d > 0.0 { 1.0 } else { 0.0 })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_feature_model() -> RelevanceModel {
        RelevanceModel {
            name: "toy".into(),
            level: ClassificationLevel::Excerpt,
            feature_names: vec!["a".into(), "b".into()],
            scaler: StandardScaler {
                mean: vec![1.0, 0.0],
                scale: vec![2.0, 1.0],
            },
            svm: SupportVectorMachine {
                kernel: Kernel::Linear,
                support_vectors: vec![vec![1.0, -1.0]],
                dual_coef: vec![1.0],
                intercept: 0.0,
            },
            calibration: None,
        }
    }

    fn table(rows: &[[f64; 2]]) -> FeatureTable {
        let mut t = FeatureTable::new(&["a", "b"]);
        for row in rows {
            t.push_row(row.to_vec());
        }
        t
    }

    #[test]
    fn test_linear_decision_uses_scaled_features() {
        let model = two_feature_model();
        // scaled: ((5-1)/2, 1) = (2, 1); w = (1, -1) -> 1
        let decisions = model.decision_function(&table(&[[5.0, 1.0]])).unwrap();
        assert!((decisions[0] - 1.0).abs() < 1e-12);
        assert_eq!(model.predict(&table(&[[5.0, 1.0], [1.0, 3.0]])).unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_empty_table_predicts_nothing() {
        let model = two_feature_model();
        assert!(model.predict(&table(&[])).unwrap().is_empty());
        assert!(model.predict_exclusion_proba(&table(&[])).unwrap().is_empty());
    }

    #[test]
    fn test_rbf_kernel_is_one_at_support_vector() {
        let kernel = Kernel::Rbf { gamma: 0.5 };
        assert!((kernel.apply(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-12);
        assert!(kernel.apply(&[0.0, 0.0], &[3.0, 4.0]) < 1e-5);
    }

    #[test]
    fn test_uncalibrated_probabilities_are_hard_labels() {
        let model = two_feature_model();
        let probs = model
            .predict_exclusion_proba(&table(&[[5.0, 1.0], [1.0, 3.0]]))
            .unwrap();
        assert_eq!(probs, vec![1.0, 0.0]);
    }

    #[test]
    fn test_calibration_is_monotonic_in_decision() {
        let cal = PlattCalibration { a: -2.0, b: 0.0 };
        assert!((cal.probability(0.0) - 0.5).abs() < 1e-12);
        assert!(cal.probability(1.0) > cal.probability(0.5));
        assert!(cal.probability(-3.0) < 0.01);
    }

    #[test]
    fn test_mismatched_columns_are_rejected() {
        let model = two_feature_model();
        let mut wrong = FeatureTable::new(&["b", "a"]);
        wrong.push_row(vec![0.0, 0.0]);

        let err = model.predict(&wrong).unwrap_err();
        assert_eq!(err.expected, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_validate_rejects_dimension_mismatch() {
        let mut model = two_feature_model();
        model.svm.support_vectors.push(vec![1.0]);
        model.svm.dual_coef.push(1.0);
        assert!(matches!(model.validate(), Err(ModelLoadError::Invalid { .. })));

        let mut model = two_feature_model();
        model.scaler.scale[1] = 0.0;
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_from_json_round_trips_kernel_tag() {
        let json = r#"{
            "name": "p",
            "level": "page",
            "feature_names": ["x"],
            "scaler": {"mean": [0.0], "scale": [1.0]},
            "svm": {
                "kernel": {"type": "poly", "gamma": 1.0, "coef0": 1.0, "degree": 2},
                "support_vectors": [[1.0]],
                "dual_coef": [0.5],
                "intercept": -1.0
            }
        }"#;
        let model = RelevanceModel::from_json(json, "inline").unwrap();
        assert_eq!(model.level, ClassificationLevel::Page);
        assert!(!model.is_calibrated());
        // (1*1*2 + 1)^2 * 0.5 - 1 = 3.5
        let mut t = FeatureTable::new(&["x"]);
        t.push_row(vec![2.0]);
        assert!((model.decision_function(&t).unwrap()[0] - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = RelevanceModel::load("/nonexistent/model.json").unwrap_err();
        assert!(matches!(err, ModelLoadError::Io { .. }));
    }
}
