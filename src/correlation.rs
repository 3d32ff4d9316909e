//! Spearman rank correlation between category scores and engagement metrics.

use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::constants::correlation::MIN_PAIRED_OBSERVATIONS;
use crate::constants::scoring::COMPOSITE_TAG;
use crate::data::{CategoryFamily, EngagementMetric};
use crate::errors::AnalyticsError;
use crate::scoring::ScoredMatrix;
use crate::stats::{average_ranks, pearson, t_two_sided_p};
use crate::types::CategoryName;

/// Coefficient and two-sided p-value over pairwise-complete observations.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SpearmanResult {
    /// Records where both values were present.
    pub n: usize,
    /// Spearman coefficient.
    pub rho: Option<f64>,
    /// Two-sided p-value from the t approximation.
    pub p_value: Option<f64>,
}

/// Spearman correlation using only records where both values are present.
///
/// Ties get average ranks. Fewer than three pairs, or a constant ranked
/// vector, leave the coefficient and p-value undefined.
pub fn spearman(x: &[Option<f64>], y: &[Option<f64>]) -> SpearmanResult {
    let (xs, ys): (Vec<f64>, Vec<f64>) = x
        .iter()
        .zip(y)
        .filter_map(|(a, b)| match (a, b) {
            (Some(a), Some(b)) if a.is_finite() && b.is_finite() => Some((*a, *b)),
            _ => None,
        })
        .unzip();
    let n = xs.len();
    if n < MIN_PAIRED_OBSERVATIONS {
        return SpearmanResult {
            n,
            rho: None,
            p_value: None,
        };
    }
    let rho = pearson(&average_ranks(&xs), &average_ranks(&ys));
    let p_value = rho.and_then(|r| {
        let df = (n - 2) as f64;
        if (1.0 - r * r) <= f64::EPSILON {
            return Some(0.0);
        }
        t_two_sided_p(r * (df / (1.0 - r * r)).sqrt(), df)
    });
    SpearmanResult { n, rho, p_value }
}

/// Engagement column a category is correlated against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementColumn {
    /// Raw counter (ranks are unchanged by standardization).
    Raw(EngagementMetric),
    /// Composite engagement score.
    Composite,
}

impl EngagementColumn {
    /// Composite first, then each raw metric.
    pub fn all() -> Vec<EngagementColumn> {
        std::iter::once(EngagementColumn::Composite)
            .chain(EngagementMetric::ALL.iter().copied().map(EngagementColumn::Raw))
            .collect()
    }

    /// Column name used in result tables.
    pub fn name(&self) -> &'static str {
        match self {
            EngagementColumn::Raw(metric) => metric.as_str(),
            EngagementColumn::Composite => COMPOSITE_TAG,
        }
    }
}

/// One category x engagement-column correlation.
#[derive(Clone, Debug, Serialize)]
pub struct CorrelationRow {
    /// Family of the category.
    pub family: CategoryFamily,
    /// Category correlated.
    pub category: CategoryName,
    /// Engagement column correlated against.
    pub metric: EngagementColumn,
    /// Coefficient, p-value and pair count.
    #[serde(flatten)]
    pub result: SpearmanResult,
}

/// Bulk rank correlations across categories and engagement columns.
#[derive(Clone, Copy, Debug, Default)]
pub struct CorrelationEngine;

impl CorrelationEngine {
    /// New engine.
    pub fn new() -> Self {
        Self
    }

    /// Correlate every `(family, category)` with every engagement column.
    ///
    /// Rows are sorted by descending |rho|; equal magnitudes keep
    /// category-major, metric-minor input order, and undefined coefficients
    /// sort last.
    pub fn correlate_all(
        &self,
        scored: &ScoredMatrix<'_>,
        categories: &[(CategoryFamily, CategoryName)],
        metrics: &[EngagementColumn],
    ) -> Result<Vec<CorrelationRow>, AnalyticsError> {
        let category_columns = categories
            .iter()
            .map(|(family, category)| scored.matrix.column(*family, category))
            .collect::<Result<Vec<_>, _>>()?;
        let metric_columns: Vec<Vec<Option<f64>>> = metrics
            .iter()
            .map(|metric| match metric {
                EngagementColumn::Raw(metric) => scored.matrix.counter_column(*metric),
                EngagementColumn::Composite => scored.scores.composite.clone(),
            })
            .collect();

        let pairs: Vec<(usize, usize)> = (0..categories.len())
            .flat_map(|c| (0..metrics.len()).map(move |m| (c, m)))
            .collect();
        let mut rows: Vec<CorrelationRow> = pairs
            .par_iter()
            .map(|&(c, m)| CorrelationRow {
                family: categories[c].0,
                category: categories[c].1.clone(),
                metric: metrics[m],
                result: spearman(&category_columns[c], &metric_columns[m]),
            })
            .collect();

        // stable sort keeps first-seen order among equal magnitudes
        rows.sort_by(|a, b| match (a.result.rho, b.result.rho) {
            (Some(x), Some(y)) => y.abs().total_cmp(&x.abs()),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });

        info!(
            "[engagement:correlation] computed {} correlations ({} defined)",
            rows.len(),
            rows.iter().filter(|row| row.result.rho.is_some()).count()
        );
        Ok(rows)
    }
}
