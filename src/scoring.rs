//! Engagement scoring: standardized counters, composite score, and
//! quantile-threshold labels.
//!
//! Scoring is a pure function of the matrix and the configured quantile.
//! Labels are computed in two phases: the cutoff is taken from the full
//! column first, then each record is compared against it.

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::validate_quantile;
use crate::constants::scoring::{COMPOSITE_TAG, MIN_STANDARDIZE_OBSERVATIONS};
use crate::data::EngagementMetric;
use crate::errors::AnalyticsError;
use crate::matrix::CategoryMatrix;
use crate::stats::{mean, present, quantile, sample_variance};
use crate::types::OutcomeTag;

/// A nullable column rescaled to zero mean and unit sample variance.
#[derive(Clone, Debug, Serialize)]
pub struct StandardizedColumn {
    /// Mean of the non-missing observations (undefined when not standardizable).
    pub mean: Option<f64>,
    /// Sample standard deviation of the non-missing observations.
    pub std_dev: Option<f64>,
    /// Non-missing observations used.
    pub observations: usize,
    /// Standardized values; all missing when the column is not standardizable.
    pub values: Vec<Option<f64>>,
}

impl StandardizedColumn {
    /// True when the column could be standardized.
    pub fn is_defined(&self) -> bool {
        self.std_dev.is_some()
    }
}

/// Standardize a column over its non-missing entries.
///
/// Fewer than two observations or zero variance leave every value missing.
pub fn standardize(column: &[Option<f64>]) -> StandardizedColumn {
    let observed = present(column);
    let moments = if observed.len() < MIN_STANDARDIZE_OBSERVATIONS {
        None
    } else {
        mean(&observed)
            .zip(sample_variance(&observed))
            .filter(|(_, var)| *var > 0.0)
            .map(|(mu, var)| (mu, var.sqrt()))
    };
    let values = match moments {
        Some((mu, sd)) => column
            .iter()
            .map(|value| value.filter(|v| v.is_finite()).map(|v| (v - mu) / sd))
            .collect(),
        None => vec![None; column.len()],
    };
    StandardizedColumn {
        mean: moments.map(|(mu, _)| mu),
        std_dev: moments.map(|(_, sd)| sd),
        observations: observed.len(),
        values,
    }
}

/// Mean of the present values; missing when none are present.
pub fn compose(values: &[Option<f64>]) -> Option<f64> {
    mean(&present(values))
}

/// Boolean labels marking values at or above a population quantile.
#[derive(Clone, Debug, Serialize)]
pub struct QuantileLabels {
    /// Quantile the cutoff was taken at.
    pub quantile: f64,
    /// Cutoff value; missing when the column has no observations.
    pub cutoff: Option<f64>,
    /// `Some(true)` iff value >= cutoff; missing where the value is missing.
    pub labels: Vec<Option<bool>>,
}

impl QuantileLabels {
    /// Number of records labeled `true`.
    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|label| **label == Some(true)).count()
    }

    /// Number of records carrying a label.
    pub fn labeled(&self) -> usize {
        self.labels.iter().filter(|label| label.is_some()).count()
    }
}

/// Two-phase quantile labeling shared by every per-metric and composite label.
///
/// Values tied with the cutoff are labeled `true`, so ties at the boundary can
/// push the positive count above `(1 - q) * N`.
pub fn label_at_quantile(values: &[Option<f64>], q: f64) -> QuantileLabels {
    let cutoff = quantile(&present(values), q);
    let labels = values
        .iter()
        .map(|value| {
            let value = value.filter(|v| v.is_finite())?;
            cutoff.map(|cut| value >= cut)
        })
        .collect();
    QuantileLabels {
        quantile: q,
        cutoff,
        labels,
    }
}

/// Binary outcome variants available to the logistic fitter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Composite score at or above its quantile.
    HighEngagement,
    /// One raw counter at or above its own quantile.
    HighMetric(EngagementMetric),
}

impl Outcome {
    /// Composite first, then each metric in canonical order.
    pub fn all() -> Vec<Outcome> {
        std::iter::once(Outcome::HighEngagement)
            .chain(EngagementMetric::ALL.iter().copied().map(Outcome::HighMetric))
            .collect()
    }

    /// Stable tag used in result rows.
    pub fn tag(&self) -> OutcomeTag {
        match self {
            Outcome::HighEngagement => COMPOSITE_TAG.to_string(),
            Outcome::HighMetric(metric) => metric.as_str().to_string(),
        }
    }
}

/// Derived engagement table for one scoring run.
#[derive(Clone, Debug, Serialize)]
pub struct EngagementScores {
    /// Quantile used for every label set.
    pub quantile: f64,
    /// Standardized column per metric.
    pub standardized: IndexMap<EngagementMetric, StandardizedColumn>,
    /// Mean of available standardized metrics per record.
    pub composite: Vec<Option<f64>>,
    /// Composite high-engagement labels.
    pub high_engagement: QuantileLabels,
    /// Per-metric labels, each thresholded at its own quantile of raw counts.
    pub metric_labels: IndexMap<EngagementMetric, QuantileLabels>,
}

impl EngagementScores {
    /// Labels of one outcome variant.
    pub fn labels(&self, outcome: Outcome) -> &[Option<bool>] {
        match outcome {
            Outcome::HighEngagement => &self.high_engagement.labels,
            Outcome::HighMetric(metric) => self
                .metric_labels
                .get(&metric)
                .map(|labels| labels.labels.as_slice())
                .unwrap_or(&[]),
        }
    }
}

/// The category matrix paired with its derived engagement scores.
#[derive(Clone, Debug)]
pub struct ScoredMatrix<'m> {
    /// Matrix the scores were derived from.
    pub matrix: &'m CategoryMatrix,
    /// Derived engagement table.
    pub scores: EngagementScores,
}

/// Derives standardized metrics, the composite score, and threshold labels.
#[derive(Clone, Copy, Debug)]
pub struct EngagementScorer {
    quantile: f64,
}

impl EngagementScorer {
    /// Scorer labeling at quantile `quantile`.
    pub fn new(quantile: f64) -> Result<Self, AnalyticsError> {
        validate_quantile(quantile)?;
        Ok(Self { quantile })
    }

    /// Configured quantile.
    pub fn quantile(&self) -> f64 {
        self.quantile
    }

    /// Derive every engagement column for `matrix`.
    pub fn score<'m>(&self, matrix: &'m CategoryMatrix) -> ScoredMatrix<'m> {
        let mut standardized = IndexMap::new();
        let mut metric_labels = IndexMap::new();
        for metric in EngagementMetric::ALL {
            let raw = matrix.counter_column(metric);
            let column = standardize(&raw);
            if !column.is_defined() {
                debug!(
                    "[engagement:scoring] metric '{}' is not standardizable ({} observations)",
                    metric, column.observations
                );
            }
            standardized.insert(metric, column);
            metric_labels.insert(metric, label_at_quantile(&raw, self.quantile));
        }

        let composite: Vec<Option<f64>> = (0..matrix.len())
            .map(|row| {
                let values: Vec<Option<f64>> = standardized
                    .values()
                    .map(|column| column.values[row])
                    .collect();
                compose(&values)
            })
            .collect();
        let high_engagement = label_at_quantile(&composite, self.quantile);

        info!(
            "[engagement:scoring] scored {} records (composite={}, high={}, q={:.3})",
            matrix.len(),
            high_engagement.labeled(),
            high_engagement.positives(),
            self.quantile
        );

        ScoredMatrix {
            matrix,
            scores: EngagementScores {
                quantile: self.quantile,
                standardized,
                composite,
                high_engagement,
                metric_labels,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardize_ignores_missing_entries() {
        let column = standardize(&[Some(10.0), Some(20.0), Some(30.0), None, Some(50.0)]);
        assert!(column.is_defined());
        assert_eq!(column.observations, 4);
        assert!(column.values[3].is_none());
        let present: Vec<f64> = column.values.iter().flatten().copied().collect();
        let mu = mean(&present).unwrap();
        let var = sample_variance(&present).unwrap();
        assert!(mu.abs() < 1e-9);
        assert!((var - 1.0).abs() < 1e-9);
    }

    #[test]
    fn standardize_rejects_constant_and_tiny_columns() {
        let constant = standardize(&[Some(4.0), Some(4.0), None]);
        assert!(!constant.is_defined());
        assert!(constant.values.iter().all(Option::is_none));

        let single = standardize(&[Some(4.0), None]);
        assert!(!single.is_defined());
        assert_eq!(single.observations, 1);
    }

    #[test]
    fn compose_requires_one_present_value() {
        assert_eq!(compose(&[None, None]), None);
        assert_eq!(compose(&[Some(1.0), None, Some(3.0)]), Some(2.0));
    }

    #[test]
    fn labels_include_ties_at_cutoff() {
        let values = vec![Some(1.0), Some(2.0), Some(2.0), Some(2.0), None];
        let labels = label_at_quantile(&values, 0.5);
        assert_eq!(labels.cutoff, Some(2.0));
        assert_eq!(
            labels.labels,
            vec![Some(false), Some(true), Some(true), Some(true), None]
        );
        assert_eq!(labels.positives(), 3);
        assert_eq!(labels.labeled(), 4);
    }

    #[test]
    fn distinct_values_give_expected_label_count() {
        let values: Vec<Option<f64>> = (0..100).map(|v| Some(v as f64)).collect();
        let labels = label_at_quantile(&values, 0.9);
        assert_eq!(labels.positives(), 10);
    }

    #[test]
    fn outcome_tags_are_stable() {
        let tags: Vec<OutcomeTag> = Outcome::all().iter().map(Outcome::tag).collect();
        assert_eq!(tags, vec!["composite", "views", "likes", "comments", "shares"]);
    }

    #[test]
    fn scorer_rejects_invalid_quantile() {
        assert!(EngagementScorer::new(1.0).is_err());
        assert!(EngagementScorer::new(0.0).is_err());
        assert!(EngagementScorer::new(0.9).is_ok());
    }
}
