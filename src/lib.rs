#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Cubic B-spline bases and difference penalties.
pub mod basis;
/// Boundary to the external text classifier.
pub mod classifier;
/// Analysis configuration types.
pub mod config;
/// Centralized constants used across scoring, fitting, and aggregation.
pub mod constants;
/// Category co-occurrence summaries.
pub mod cooccurrence;
/// Spearman rank correlations.
pub mod correlation;
/// Record, counter, and category family types.
pub mod data;
/// Logistic regression with a bias-reduced fallback.
pub mod logistic;
/// The joined category matrix.
pub mod matrix;
/// Principal component decomposition of category families.
pub mod pca;
/// Named analysis stages.
pub mod pipeline;
/// Static predictor sets with escaped identifiers.
pub mod predictors;
/// Engagement standardization, composite score, and labels.
pub mod scoring;
/// Additive time regression with REML smoothing selection.
pub mod smoothing;
/// Shared numeric helpers.
pub mod stats;
/// Shared type aliases.
pub mod types;

mod errors;

pub use classifier::{CategoryClassifier, TextRecord, classify_records};
pub use config::{AnalysisConfig, LogisticControls, SmoothingControls, SourceRule};
pub use cooccurrence::{
    CooccurrenceAnalyzer, CooccurrenceCell, CooccurrenceMatrix, PairFrequency, TierFilter,
    VoidPair,
};
pub use correlation::{CorrelationEngine, CorrelationRow, EngagementColumn, SpearmanResult, spearman};
pub use data::{
    CategoryFamily, EngagementCounters, EngagementMetric, FamilyRow, FamilyTable, Record,
    RecordInput, ScoreTriple, SourceType,
};
pub use errors::AnalyticsError;
pub use logistic::{
    CoefficientRow, FitIssue, FitMethod, LogisticModelFitter, ModelFit, ModelLayout,
    OutcomeLabels, TermKind,
};
pub use matrix::{CategoryMatrix, CategoryMatrixBuilder, CategorySchema};
pub use pca::{PcaReducer, PcaResult, PcaUndefined, PrincipalComponent, RecordScores};
pub use pipeline::{AnalysisReport, CooccurrenceReport, run_analysis};
pub use predictors::{Predictor, PredictorSet};
pub use scoring::{
    EngagementScorer, EngagementScores, Outcome, QuantileLabels, ScoredMatrix,
    StandardizedColumn, compose, label_at_quantile, standardize,
};
pub use smoothing::{
    BaselinePoint, ParametricRow, SmoothFit, SmoothTermStatus, SmoothTermSummary,
    SmoothingRegressionEngine,
};
pub use types::{CategoryName, OutcomeTag, PredictorId, RecordId, SourceLabel};
