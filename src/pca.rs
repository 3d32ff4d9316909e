//! Principal component decomposition of one category family.
//!
//! Columns are standardized over the complete-case records of the family and
//! the correlation matrix is eigendecomposed. Components come back in
//! descending explained variance with unit-norm, mutually orthogonal loading
//! vectors; each loading vector is signed so its largest-magnitude entry is
//! positive, which makes results reproducible across runs.

use nalgebra::{DMatrix, SymmetricEigen};
use serde::Serialize;
use tracing::{info, warn};

use crate::data::CategoryFamily;
use crate::errors::AnalyticsError;
use crate::matrix::CategoryMatrix;
use crate::predictors::PredictorSet;
use crate::stats::{mean, sample_variance};
use crate::types::{CategoryName, RecordId};

/// Why a family could not be decomposed.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PcaUndefined {
    /// Fewer than two records have every category of the family.
    TooFewRecords {
        /// Complete-case records found.
        complete: usize,
    },
    /// A category is constant over the complete-case records.
    ZeroVarianceColumn {
        /// The constant category.
        category: CategoryName,
    },
}

/// One principal component of a family.
#[derive(Clone, Debug, Serialize)]
pub struct PrincipalComponent {
    /// Display name, `PC1`, `PC2`, ...
    pub name: String,
    /// Variance along the component (correlation scale).
    pub eigenvalue: f64,
    /// Share of total variance.
    pub explained_ratio: f64,
    /// Share explained by this and all earlier components.
    pub cumulative_ratio: f64,
    /// One entry per category, in schema order.
    pub loadings: Vec<f64>,
}

/// Component scores of one complete-case record.
#[derive(Clone, Debug, Serialize)]
pub struct RecordScores {
    /// Record identifier.
    pub record: RecordId,
    /// Score on each component, in component order.
    pub scores: Vec<f64>,
}

/// Decomposition of one category family.
#[derive(Clone, Debug, Serialize)]
pub struct PcaResult {
    /// Family decomposed.
    pub family: CategoryFamily,
    /// Categories in schema order.
    pub categories: Vec<CategoryName>,
    /// Records with every category present.
    pub n_used: usize,
    /// Records excluded for a missing category value.
    pub dropped_records: usize,
    /// Reason the decomposition is undefined, if it is.
    pub undefined: Option<PcaUndefined>,
    /// Components by decreasing eigenvalue.
    pub components: Vec<PrincipalComponent>,
    /// Scores of the complete-case records.
    pub scores: Vec<RecordScores>,
    #[serde(skip)]
    rows: Vec<usize>,
    #[serde(skip)]
    total_records: usize,
}

impl PcaResult {
    /// True when components were computed.
    pub fn is_defined(&self) -> bool {
        self.undefined.is_none()
    }

    /// The first `k` component scores as predictors aligned with the matrix
    /// records; dropped records carry missing values.
    pub fn component_predictors(&self, k: usize) -> PredictorSet {
        let mut set = PredictorSet::new();
        for (c, component) in self.components.iter().take(k).enumerate() {
            let mut values = vec![None; self.total_records];
            for (slot, &row) in self.rows.iter().enumerate() {
                values[row] = self.scores.get(slot).and_then(|s| s.scores.get(c)).copied();
            }
            set.push(format!("{}_{}", self.family, component.name), values);
        }
        set
    }
}

/// Decomposes a category family into decorrelated components.
#[derive(Clone, Copy, Debug, Default)]
pub struct PcaReducer;

impl PcaReducer {
    /// New reducer.
    pub fn new() -> Self {
        Self
    }

    /// Full ordered decomposition of `family`.
    ///
    /// A family missing from the schema is a configuration error; too few
    /// complete records or a constant column yield an undefined result.
    pub fn decompose(
        &self,
        matrix: &CategoryMatrix,
        family: CategoryFamily,
    ) -> Result<PcaResult, AnalyticsError> {
        let categories = matrix.schema().categories(family).to_vec();
        if categories.is_empty() {
            return Err(AnalyticsError::Configuration(format!(
                "{family} family is not declared in the category schema"
            )));
        }
        let columns = categories
            .iter()
            .map(|category| matrix.column(family, category))
            .collect::<Result<Vec<_>, _>>()?;
        let rows: Vec<usize> = (0..matrix.len())
            .filter(|&i| columns.iter().all(|column| column[i].is_some()))
            .collect();
        let mut result = PcaResult {
            family,
            categories,
            n_used: rows.len(),
            dropped_records: matrix.len() - rows.len(),
            undefined: None,
            components: Vec::new(),
            scores: Vec::new(),
            rows,
            total_records: matrix.len(),
        };
        if result.dropped_records > 0 {
            info!(
                "[engagement:pca] {}: dropped {} of {} records with missing scores",
                family,
                result.dropped_records,
                matrix.len()
            );
        }

        let n = result.rows.len();
        if n < 2 {
            warn!("[engagement:pca] {}: only {} complete records; decomposition undefined", family, n);
            result.undefined = Some(PcaUndefined::TooFewRecords { complete: n });
            return Ok(result);
        }

        let p = columns.len();
        let mut standardized = DMatrix::zeros(n, p);
        for (j, column) in columns.iter().enumerate() {
            let values: Vec<f64> = result.rows.iter().filter_map(|&i| column[i]).collect();
            let center = mean(&values).unwrap_or(0.0);
            let spread = sample_variance(&values).map(f64::sqrt).unwrap_or(0.0);
            if spread <= 0.0 || !spread.is_finite() {
                warn!(
                    "[engagement:pca] {}: category '{}' is constant; decomposition undefined",
                    family, result.categories[j]
                );
                result.undefined = Some(PcaUndefined::ZeroVarianceColumn {
                    category: result.categories[j].clone(),
                });
                return Ok(result);
            }
            for (slot, value) in values.iter().enumerate() {
                standardized[(slot, j)] = (value - center) / spread;
            }
        }

        let correlation = standardized.tr_mul(&standardized) / (n - 1) as f64;
        let eigen = SymmetricEigen::new(correlation);
        let mut order: Vec<usize> = (0..p).collect();
        order.sort_by(|a, b| eigen.eigenvalues[*b].total_cmp(&eigen.eigenvalues[*a]));
        let total: f64 = eigen.eigenvalues.iter().map(|value| value.max(0.0)).sum();

        let mut loadings = DMatrix::zeros(p, p);
        let mut cumulative = 0.0;
        for (c, &k) in order.iter().enumerate() {
            let mut vector = eigen.eigenvectors.column(k).into_owned();
            let anchor = vector
                .iter()
                .enumerate()
                .fold((0, 0.0_f64), |best, (j, value)| {
                    if value.abs() > best.1 { (j, value.abs()) } else { best }
                })
                .0;
            if vector[anchor] < 0.0 {
                vector.neg_mut();
            }
            let eigenvalue = eigen.eigenvalues[k].max(0.0);
            let explained_ratio = if total > 0.0 { eigenvalue / total } else { 0.0 };
            cumulative += explained_ratio;
            loadings.set_column(c, &vector);
            result.components.push(PrincipalComponent {
                name: format!("PC{}", c + 1),
                eigenvalue,
                explained_ratio,
                cumulative_ratio: cumulative,
                loadings: vector.iter().copied().collect(),
            });
        }

        let scores = &standardized * &loadings;
        result.scores = result
            .rows
            .iter()
            .enumerate()
            .map(|(slot, &row)| RecordScores {
                record: matrix.records()[row].id.clone(),
                scores: scores.row(slot).iter().copied().collect(),
            })
            .collect();

        info!(
            "[engagement:pca] {}: {} components from {} records (PC1 explains {:.3})",
            family,
            result.components.len(),
            n,
            result.components.first().map(|c| c.explained_ratio).unwrap_or(0.0)
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceRule;
    use crate::data::{EngagementCounters, FamilyTable, RecordInput};
    use crate::matrix::{CategoryMatrixBuilder, CategorySchema};
    use chrono::NaiveDate;

    fn build(rows: &[[Option<f64>; 3]]) -> CategoryMatrix {
        let names: Vec<CategoryName> = vec!["joy".into(), "fear".into(), "anger".into()];
        let mut table = FamilyTable::new(CategoryFamily::Emotion, names.clone());
        let mut records = Vec::new();
        for (i, scores) in rows.iter().enumerate() {
            let id = format!("r{i}");
            records.push(RecordInput {
                id: id.clone(),
                date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                source_label: "Herald".into(),
                counters: EngagementCounters::default(),
            });
            table.push_row(id, scores.to_vec());
        }
        CategoryMatrixBuilder::new(
            CategorySchema::empty().with_family(CategoryFamily::Emotion, names),
            SourceRule::default(),
        )
        .with_records(records)
        .with_family_table(table)
        .build()
        .unwrap()
    }

    fn sample() -> CategoryMatrix {
        build(&[
            [Some(0.9), Some(0.1), Some(0.2)],
            [Some(0.7), Some(0.3), Some(0.1)],
            [Some(0.2), Some(0.8), Some(0.6)],
            [Some(0.4), None, Some(0.5)],
            [Some(0.1), Some(0.9), Some(0.7)],
            [Some(0.5), Some(0.4), Some(0.9)],
            [Some(0.6), Some(0.5), Some(0.3)],
        ])
    }

    #[test]
    fn loadings_are_orthonormal_and_ordered() {
        let result = PcaReducer::new()
            .decompose(&sample(), CategoryFamily::Emotion)
            .unwrap();
        assert!(result.is_defined());
        assert_eq!(result.n_used, 6);
        assert_eq!(result.dropped_records, 1);
        assert_eq!(result.components.len(), 3);
        for (a, left) in result.components.iter().enumerate() {
            for (b, right) in result.components.iter().enumerate() {
                let dot: f64 = left.loadings.iter().zip(&right.loadings).map(|(x, y)| x * y).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-6);
            }
        }
        let eigenvalues: Vec<f64> = result.components.iter().map(|c| c.eigenvalue).collect();
        assert!(eigenvalues.windows(2).all(|w| w[0] >= w[1]));
        let last = result.components.last().unwrap();
        assert!((last.cumulative_ratio - 1.0).abs() < 1e-9);
    }

    #[test]
    fn largest_loading_is_positive() {
        let result = PcaReducer::new()
            .decompose(&sample(), CategoryFamily::Emotion)
            .unwrap();
        for component in &result.components {
            let anchor = component
                .loadings
                .iter()
                .copied()
                .fold(0.0_f64, |best, value| if value.abs() > best.abs() { value } else { best });
            assert!(anchor > 0.0);
        }
    }

    #[test]
    fn component_scores_have_eigenvalue_variance() {
        let result = PcaReducer::new()
            .decompose(&sample(), CategoryFamily::Emotion)
            .unwrap();
        let first: Vec<f64> = result.scores.iter().map(|s| s.scores[0]).collect();
        let variance = sample_variance(&first).unwrap();
        assert!((variance - result.components[0].eigenvalue).abs() < 1e-9);
        assert!(mean(&first).unwrap().abs() < 1e-9);
    }

    #[test]
    fn predictors_align_with_records() {
        let matrix = sample();
        let result = PcaReducer::new()
            .decompose(&matrix, CategoryFamily::Emotion)
            .unwrap();
        let predictors = result.component_predictors(2);
        assert_eq!(predictors.len(), 2);
        let pc1 = predictors.iter().next().unwrap();
        assert_eq!(pc1.id, "emotion_pc1");
        assert_eq!(pc1.values.len(), matrix.len());
        assert!(pc1.values[3].is_none());
        assert_eq!(pc1.values[0], Some(result.scores[0].scores[0]));
    }

    #[test]
    fn undefined_cases_are_reported() {
        let constant = build(&[
            [Some(0.3), Some(0.1), Some(0.2)],
            [Some(0.3), Some(0.5), Some(0.6)],
            [Some(0.3), Some(0.9), Some(0.4)],
        ]);
        let result = PcaReducer::new()
            .decompose(&constant, CategoryFamily::Emotion)
            .unwrap();
        assert_eq!(
            result.undefined,
            Some(PcaUndefined::ZeroVarianceColumn { category: "joy".into() })
        );
        assert!(result.component_predictors(3).is_empty());

        let sparse = build(&[[Some(0.3), None, Some(0.2)], [Some(0.5), Some(0.4), Some(0.1)]]);
        let result = PcaReducer::new()
            .decompose(&sparse, CategoryFamily::Emotion)
            .unwrap();
        assert_eq!(result.undefined, Some(PcaUndefined::TooFewRecords { complete: 1 }));
        assert!(result.components.is_empty());
    }
}
