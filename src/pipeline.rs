//! End-to-end analysis run over one immutable category matrix.
//!
//! Each stage reads the matrix (and, where needed, the scored stage) and
//! produces its own named output; no stage overwrites another.

use std::time::Instant;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::info;

use crate::config::AnalysisConfig;
use crate::cooccurrence::{
    CooccurrenceAnalyzer, CooccurrenceMatrix, PairFrequency, TierFilter, VoidPair,
};
use crate::correlation::{CorrelationEngine, CorrelationRow, EngagementColumn};
use crate::data::CategoryFamily;
use crate::errors::AnalyticsError;
use crate::logistic::{CoefficientRow, LogisticModelFitter, ModelLayout, OutcomeLabels};
use crate::matrix::CategoryMatrix;
use crate::pca::{PcaReducer, PcaResult};
use crate::predictors::PredictorSet;
use crate::scoring::{EngagementScorer, EngagementScores, Outcome, ScoredMatrix};
use crate::smoothing::{SmoothFit, SmoothingRegressionEngine};
use crate::types::CategoryName;

/// Co-occurrence outputs sharing one presence threshold.
#[derive(Clone, Debug, Serialize)]
pub struct CooccurrenceReport {
    /// Matrix over every record.
    pub all_records: CooccurrenceMatrix,
    /// Matrix over the top engagement tier.
    pub top_tier: CooccurrenceMatrix,
    /// Pairs below the void threshold.
    pub voids: Vec<VoidPair>,
    /// Pair counts in the top tier, most frequent first.
    pub top_pairs: Vec<PairFrequency>,
}

/// Every stage output of one analysis run.
#[derive(Clone, Debug, Serialize)]
pub struct AnalysisReport {
    /// Configuration the run used.
    pub config: AnalysisConfig,
    /// Records in the matrix.
    pub n_records: usize,
    /// Engagement scoring stage.
    pub scored: EngagementScores,
    /// Category x engagement correlations.
    pub correlations: Vec<CorrelationRow>,
    /// One model per category and outcome.
    pub logistic_by_category: Vec<CoefficientRow>,
    /// Additive time model.
    pub smooth_fit: SmoothFit,
    /// Decomposition per family.
    pub pca_by_family: IndexMap<CategoryFamily, PcaResult>,
    /// Joint component models per family and outcome.
    pub logistic_by_component: Vec<CoefficientRow>,
    /// Co-occurrence stage.
    pub cooccurrence: CooccurrenceReport,
}

/// Run every stage against `matrix`.
///
/// Configuration problems abort before any stage runs. Statistically
/// undefined cells and failed fits are contained in the stage outputs.
pub fn run_analysis(
    matrix: &CategoryMatrix,
    config: &AnalysisConfig,
) -> Result<AnalysisReport, AnalyticsError> {
    config.validate()?;
    for name in &config.smooth_categories {
        if matrix.schema().family_of(name).is_none() {
            return Err(AnalyticsError::Configuration(format!(
                "smooth category '{name}' is not in the category schema"
            )));
        }
    }
    let run_start = Instant::now();
    let schema = matrix.schema();
    let families: Vec<CategoryFamily> = schema.families().collect();
    let categories: Vec<(CategoryFamily, CategoryName)> = families
        .iter()
        .flat_map(|&family| {
            schema
                .categories(family)
                .iter()
                .map(move |category| (family, category.clone()))
        })
        .collect();

    let stage = Instant::now();
    let scored = EngagementScorer::new(config.high_engagement_quantile)?.score(matrix);
    log_stage("scored", stage);

    let stage = Instant::now();
    let correlations =
        CorrelationEngine::new().correlate_all(&scored, &categories, &EngagementColumn::all())?;
    log_stage("correlations", stage);

    let fitter = LogisticModelFitter::new(config.logistic.clone());
    let outcomes = outcome_labels(&scored);
    let sources = matrix.source_types();

    let stage = Instant::now();
    let mut category_predictors = PredictorSet::new();
    for (family, category) in &categories {
        category_predictors.push(category.clone(), matrix.column(*family, category)?);
    }
    let logistic_by_category = fitter.fit_outcomes(
        &outcomes,
        &sources,
        &category_predictors,
        ModelLayout::PerPredictor,
    );
    log_stage("logistic_by_category", stage);

    let stage = Instant::now();
    let smooth_fit = SmoothingRegressionEngine::new(config.smoothing.clone())
        .fit(&scored, &config.smooth_categories)?;
    log_stage("smooth_fit", stage);

    let stage = Instant::now();
    let reducer = PcaReducer::new();
    let mut pca_by_family = IndexMap::new();
    for &family in &families {
        pca_by_family.insert(family, reducer.decompose(matrix, family)?);
    }
    log_stage("pca_by_family", stage);

    let stage = Instant::now();
    let logistic_by_component: Vec<CoefficientRow> = pca_by_family
        .values()
        .filter(|pca| pca.is_defined())
        .flat_map(|pca| {
            fitter.fit_outcomes(
                &outcomes,
                &sources,
                &pca.component_predictors(config.pca_components),
                ModelLayout::Joint,
            )
        })
        .collect();
    log_stage("logistic_by_component", stage);

    let stage = Instant::now();
    let cooccurrence = cooccurrence_stage(&scored, config, &families)?;
    log_stage("cooccurrence", stage);

    info!(
        "[engagement:pipeline] analysis of {} records finished in {:.2}s",
        matrix.len(),
        run_start.elapsed().as_secs_f64()
    );
    Ok(AnalysisReport {
        config: config.clone(),
        n_records: matrix.len(),
        scored: scored.scores,
        correlations,
        logistic_by_category,
        smooth_fit,
        pca_by_family,
        logistic_by_component,
        cooccurrence,
    })
}

/// Composite label first, then one label per raw metric.
fn outcome_labels(scored: &ScoredMatrix<'_>) -> Vec<OutcomeLabels> {
    Outcome::all()
        .into_iter()
        .map(|outcome| OutcomeLabels::new(outcome.tag(), scored.scores.labels(outcome).to_vec()))
        .collect()
}

/// First schema family against the second (or against itself when the schema
/// holds a single family).
fn cooccurrence_stage(
    scored: &ScoredMatrix<'_>,
    config: &AnalysisConfig,
    families: &[CategoryFamily],
) -> Result<CooccurrenceReport, AnalyticsError> {
    let analyzer = CooccurrenceAnalyzer::from_config(config)?;
    let family_a = families.first().copied().unwrap_or(CategoryFamily::Emotion);
    let family_b = families.get(1).copied().unwrap_or(family_a);
    let all_records = analyzer.matrix(scored, family_a, family_b, TierFilter::All)?;
    let top_tier = analyzer.matrix(
        scored,
        family_a,
        family_b,
        TierFilter::TopFraction(config.top_engagement_fraction),
    )?;
    let voids = analyzer.voids(&all_records);
    let top_pairs =
        analyzer.pair_frequencies(scored, family_a, family_b, config.top_engagement_fraction)?;
    Ok(CooccurrenceReport {
        all_records,
        top_tier,
        voids,
        top_pairs,
    })
}

fn log_stage(name: &str, started: Instant) {
    info!(
        "[engagement:pipeline] stage '{}' done in {:.2}s",
        name,
        started.elapsed().as_secs_f64()
    );
}
