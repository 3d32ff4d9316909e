//! Threshold-based co-occurrence summaries between category families.
//!
//! A record is "tagged" with category A when its A score is at or above the
//! presence threshold. The same rule drives all three outputs: the mean
//! co-occurrence matrix, the void list, and the top-tier pair frequencies.

use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::config::AnalysisConfig;
use crate::data::CategoryFamily;
use crate::errors::AnalyticsError;
use crate::scoring::ScoredMatrix;
use crate::stats::{present, quantile};
use crate::types::CategoryName;

/// Engagement tier restricting which records are aggregated.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierFilter {
    /// Every record.
    All,
    /// Records whose composite score is within the top fraction.
    TopFraction(f64),
}

/// Conditional mean co-occurrence of one category pair.
#[derive(Clone, Debug, Serialize)]
pub struct CooccurrenceCell {
    /// Conditioning category (family A).
    pub category_a: CategoryName,
    /// Scored category (family B).
    pub category_b: CategoryName,
    /// Mean B score among A-tagged records; 0 when no record is A-tagged.
    pub mean_score: f64,
    /// A-tagged records with a present B score.
    pub support: usize,
}

/// Co-occurrence table of family A against family B.
#[derive(Clone, Debug, Serialize)]
pub struct CooccurrenceMatrix {
    /// Family whose presence conditions each row.
    pub family_a: CategoryFamily,
    /// Family whose scores are averaged.
    pub family_b: CategoryFamily,
    /// Score at or above which an A category counts as present.
    pub presence_threshold: f64,
    /// Tier the records were drawn from.
    pub tier: TierFilter,
    /// Records passing the tier filter.
    pub records_considered: usize,
    /// Row-major: every B for the first A, then the next A.
    pub cells: Vec<CooccurrenceCell>,
}

impl CooccurrenceMatrix {
    /// Cell for one `(A, B)` pair.
    pub fn cell(&self, category_a: &str, category_b: &str) -> Option<&CooccurrenceCell> {
        self.cells
            .iter()
            .find(|cell| cell.category_a == category_a && cell.category_b == category_b)
    }
}

/// Category pair that effectively never co-occurs.
#[derive(Clone, Debug, Serialize)]
pub struct VoidPair {
    /// Conditioning category.
    pub category_a: CategoryName,
    /// Scored category.
    pub category_b: CategoryName,
    /// Mean B score among A-tagged records.
    pub mean_score: f64,
    /// A-tagged records behind the mean.
    pub support: usize,
}

/// How often a category pair occurs together in the top tier.
#[derive(Clone, Debug, Serialize)]
pub struct PairFrequency {
    /// Conditioning category.
    pub category_a: CategoryName,
    /// Co-occurring category.
    pub category_b: CategoryName,
    /// Records tagged with A that also have a nonzero B score.
    pub count: usize,
}

/// Cross-tabulates category presence within engagement tiers.
#[derive(Clone, Copy, Debug)]
pub struct CooccurrenceAnalyzer {
    presence_threshold: f64,
    void_threshold: f64,
}

impl CooccurrenceAnalyzer {
    /// Analyzer with validated thresholds.
    pub fn new(presence_threshold: f64, void_threshold: f64) -> Result<Self, AnalyticsError> {
        if !(presence_threshold > 0.0 && presence_threshold <= 1.0) {
            return Err(AnalyticsError::Configuration(format!(
                "presence threshold must be in (0, 1], got {presence_threshold}"
            )));
        }
        if !(void_threshold >= 0.0 && void_threshold < presence_threshold) {
            return Err(AnalyticsError::Configuration(format!(
                "void threshold {void_threshold} must be non-negative and below presence threshold {presence_threshold}"
            )));
        }
        Ok(Self {
            presence_threshold,
            void_threshold,
        })
    }

    /// Analyzer using the thresholds of `config`.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self, AnalyticsError> {
        Self::new(config.presence_threshold, config.void_threshold)
    }

    /// Presence threshold in use.
    pub fn presence_threshold(&self) -> f64 {
        self.presence_threshold
    }

    fn is_tagged(&self, score: Option<f64>) -> bool {
        score.is_some_and(|value| value >= self.presence_threshold)
    }

    /// Mean score of each B category among records tagged with each A
    /// category, within the tier.
    pub fn matrix(
        &self,
        scored: &ScoredMatrix<'_>,
        family_a: CategoryFamily,
        family_b: CategoryFamily,
        tier: TierFilter,
    ) -> Result<CooccurrenceMatrix, AnalyticsError> {
        let rows = tier_rows(scored, tier)?;
        let (names_a, columns_a) = family_columns(scored, family_a)?;
        let (names_b, columns_b) = family_columns(scored, family_b)?;

        let cells: Vec<Vec<CooccurrenceCell>> = (0..names_a.len())
            .into_par_iter()
            .map(|a| {
                let tagged: Vec<usize> = rows
                    .iter()
                    .copied()
                    .filter(|&i| self.is_tagged(columns_a[a][i]))
                    .collect();
                (0..names_b.len())
                    .map(|b| {
                        let values: Vec<f64> =
                            tagged.iter().filter_map(|&i| columns_b[b][i]).collect();
                        let mean_score = if values.is_empty() {
                            0.0
                        } else {
                            values.iter().sum::<f64>() / values.len() as f64
                        };
                        CooccurrenceCell {
                            category_a: names_a[a].clone(),
                            category_b: names_b[b].clone(),
                            mean_score,
                            support: values.len(),
                        }
                    })
                    .collect()
            })
            .collect();

        let matrix = CooccurrenceMatrix {
            family_a,
            family_b,
            presence_threshold: self.presence_threshold,
            tier,
            records_considered: rows.len(),
            cells: cells.into_iter().flatten().collect(),
        };
        info!(
            "[engagement:cooccurrence] {} x {} matrix over {} records ({} cells)",
            family_a,
            family_b,
            matrix.records_considered,
            matrix.cells.len()
        );
        Ok(matrix)
    }

    /// Pairs whose mean co-occurrence falls below the void threshold.
    ///
    /// Cells without any A-tagged record carry no evidence and are skipped, as
    /// are self-pairs when a family is compared with itself.
    pub fn voids(&self, matrix: &CooccurrenceMatrix) -> Vec<VoidPair> {
        let same_family = matrix.family_a == matrix.family_b;
        matrix
            .cells
            .iter()
            .filter(|cell| cell.support > 0 && cell.mean_score < self.void_threshold)
            .filter(|cell| !(same_family && cell.category_a == cell.category_b))
            .map(|cell| VoidPair {
                category_a: cell.category_a.clone(),
                category_b: cell.category_b.clone(),
                mean_score: cell.mean_score,
                support: cell.support,
            })
            .collect()
    }

    /// Counts of records in the top engagement fraction that are tagged with
    /// A and have a nonzero B score, sorted by descending count.
    ///
    /// Pairs with no such record are omitted; equal counts keep A-major order.
    pub fn pair_frequencies(
        &self,
        scored: &ScoredMatrix<'_>,
        family_a: CategoryFamily,
        family_b: CategoryFamily,
        top_fraction: f64,
    ) -> Result<Vec<PairFrequency>, AnalyticsError> {
        let rows = tier_rows(scored, TierFilter::TopFraction(top_fraction))?;
        let (names_a, columns_a) = family_columns(scored, family_a)?;
        let (names_b, columns_b) = family_columns(scored, family_b)?;
        let same_family = family_a == family_b;

        let per_a: Vec<Vec<PairFrequency>> = (0..names_a.len())
            .into_par_iter()
            .map(|a| {
                let tagged: Vec<usize> = rows
                    .iter()
                    .copied()
                    .filter(|&i| self.is_tagged(columns_a[a][i]))
                    .collect();
                (0..names_b.len())
                    .filter(|&b| !(same_family && a == b))
                    .map(|b| PairFrequency {
                        category_a: names_a[a].clone(),
                        category_b: names_b[b].clone(),
                        count: tagged
                            .iter()
                            .filter(|&&i| columns_b[b][i].is_some_and(|v| v > 0.0))
                            .count(),
                    })
                    .filter(|pair| pair.count > 0)
                    .collect()
            })
            .collect();
        let mut pairs: Vec<PairFrequency> = per_a.into_iter().flatten().collect();
        pairs.sort_by(|x, y| y.count.cmp(&x.count));
        Ok(pairs)
    }
}

/// Matrix rows passing the tier filter.
fn tier_rows(scored: &ScoredMatrix<'_>, tier: TierFilter) -> Result<Vec<usize>, AnalyticsError> {
    let composite = &scored.scores.composite;
    match tier {
        TierFilter::All => Ok((0..scored.matrix.len()).collect()),
        TierFilter::TopFraction(fraction) => {
            if !(fraction > 0.0 && fraction < 1.0) {
                return Err(AnalyticsError::Configuration(format!(
                    "top engagement fraction must be in (0, 1), got {fraction}"
                )));
            }
            let Some(cutoff) = quantile(&present(composite), 1.0 - fraction) else {
                return Ok(Vec::new());
            };
            Ok((0..composite.len())
                .filter(|&i| composite[i].is_some_and(|value| value >= cutoff))
                .collect())
        }
    }
}

fn family_columns(
    scored: &ScoredMatrix<'_>,
    family: CategoryFamily,
) -> Result<(Vec<CategoryName>, Vec<Vec<Option<f64>>>), AnalyticsError> {
    let names = scored.matrix.schema().categories(family).to_vec();
    let columns = names
        .iter()
        .map(|name| scored.matrix.column(family, name))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((names, columns))
}
