use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::cooccurrence::{
    DEFAULT_PRESENCE_THRESHOLD, DEFAULT_TOP_ENGAGEMENT_FRACTION, DEFAULT_VOID_THRESHOLD,
};
use crate::constants::logistic::{
    DEFAULT_CI_LEVEL, DEFAULT_EFFECT_BOUND, DEFAULT_FIRTH_MAX_ITERATIONS,
    DEFAULT_FIRTH_TOLERANCE, DEFAULT_ML_MAX_ITERATIONS, DEFAULT_ML_TOLERANCE,
};
use crate::constants::schema::DEFAULT_CHANNEL_B_PREFIX;
use crate::constants::scoring::DEFAULT_HIGH_ENGAGEMENT_QUANTILE;
use crate::constants::smoothing::{
    DEFAULT_BASIS_SIZE, DEFAULT_LOG_LAMBDA_MAX, DEFAULT_LOG_LAMBDA_MIN, DEFAULT_SWEEPS,
    MIN_BASIS_SIZE,
};
use crate::data::SourceType;
use crate::errors::AnalyticsError;
use crate::types::CategoryName;

/// Prefix rule mapping a raw source label to its publication channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceRule {
    /// Labels starting with this prefix (case-insensitive) are channel B.
    pub channel_b_prefix: String,
}

impl Default for SourceRule {
    fn default() -> Self {
        Self {
            channel_b_prefix: DEFAULT_CHANNEL_B_PREFIX.to_string(),
        }
    }
}

impl SourceRule {
    /// Rule with a custom channel-B prefix.
    pub fn new(channel_b_prefix: impl Into<String>) -> Self {
        Self {
            channel_b_prefix: channel_b_prefix.into(),
        }
    }

    /// Classify a raw source label. Leading whitespace is ignored.
    pub fn classify(&self, label: &str) -> SourceType {
        let label = label.trim_start().to_lowercase();
        let prefix = self.channel_b_prefix.to_lowercase();
        if !prefix.is_empty() && label.starts_with(&prefix) {
            SourceType::ChannelB
        } else {
            SourceType::ChannelA
        }
    }
}

/// Fitting controls for the logistic model fitter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticControls {
    /// Iteration cap for maximum-likelihood IRLS.
    pub ml_max_iterations: usize,
    /// Relative deviance change treated as IRLS convergence.
    pub ml_tolerance: f64,
    /// Iteration cap for the bias-reduced estimator.
    pub firth_max_iterations: usize,
    /// Max absolute coefficient update treated as Firth convergence.
    pub firth_tolerance: f64,
    /// Bound on |coefficient| x observed predictor range; larger ML effects
    /// are treated as unbounded and trigger the bias-reduced fallback.
    pub effect_bound: f64,
    /// Confidence level for coefficient intervals.
    pub ci_level: f64,
}

impl Default for LogisticControls {
    fn default() -> Self {
        Self {
            ml_max_iterations: DEFAULT_ML_MAX_ITERATIONS,
            ml_tolerance: DEFAULT_ML_TOLERANCE,
            firth_max_iterations: DEFAULT_FIRTH_MAX_ITERATIONS,
            firth_tolerance: DEFAULT_FIRTH_TOLERANCE,
            effect_bound: DEFAULT_EFFECT_BOUND,
            ci_level: DEFAULT_CI_LEVEL,
        }
    }
}

/// Fitting controls for the smoothing regression engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingControls {
    /// Number of B-spline basis functions per smooth (before constraints).
    pub basis_size: usize,
    /// Lower bound of the log smoothing-parameter search.
    pub log_lambda_min: f64,
    /// Upper bound of the log smoothing-parameter search.
    pub log_lambda_max: f64,
    /// Coordinate sweeps over the smoothing parameters.
    pub sweeps: usize,
}

impl Default for SmoothingControls {
    fn default() -> Self {
        Self {
            basis_size: DEFAULT_BASIS_SIZE,
            log_lambda_min: DEFAULT_LOG_LAMBDA_MIN,
            log_lambda_max: DEFAULT_LOG_LAMBDA_MAX,
            sweeps: DEFAULT_SWEEPS,
        }
    }
}

/// Top-level analysis configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Population quantile above which a record is labeled high-engagement.
    pub high_engagement_quantile: f64,
    /// Minimum category score at which a record counts as tagged.
    pub presence_threshold: f64,
    /// Mean co-occurrence below which a category pair is a void.
    pub void_threshold: f64,
    /// Fraction of records (by composite score) kept for pair frequencies.
    pub top_engagement_fraction: f64,
    /// Number of leading principal components used as logistic predictors.
    pub pca_components: usize,
    /// Categories whose effect may vary smoothly over time; every other
    /// category enters the smoothing model as a linear control.
    pub smooth_categories: Vec<CategoryName>,
    /// Source-label prefix rule.
    pub source_rule: SourceRule,
    /// Logistic fitting controls.
    pub logistic: LogisticControls,
    /// Smoothing regression controls.
    pub smoothing: SmoothingControls,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            high_engagement_quantile: DEFAULT_HIGH_ENGAGEMENT_QUANTILE,
            presence_threshold: DEFAULT_PRESENCE_THRESHOLD,
            void_threshold: DEFAULT_VOID_THRESHOLD,
            top_engagement_fraction: DEFAULT_TOP_ENGAGEMENT_FRACTION,
            pca_components: 3,
            smooth_categories: Vec::new(),
            source_rule: SourceRule::default(),
            logistic: LogisticControls::default(),
            smoothing: SmoothingControls::default(),
        }
    }
}

impl AnalysisConfig {
    /// Parse a (possibly partial) JSON configuration and validate it.
    pub fn from_json_str(raw: &str) -> Result<Self, AnalyticsError> {
        let config: AnalysisConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file and validate it.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AnalyticsError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Check value ranges and threshold ordering.
    pub fn validate(&self) -> Result<(), AnalyticsError> {
        validate_quantile(self.high_engagement_quantile)?;
        if !(self.presence_threshold > 0.0 && self.presence_threshold <= 1.0) {
            return Err(AnalyticsError::Configuration(format!(
                "presence threshold must be in (0, 1], got {}",
                self.presence_threshold
            )));
        }
        if !(self.void_threshold >= 0.0 && self.void_threshold < self.presence_threshold) {
            return Err(AnalyticsError::Configuration(format!(
                "void threshold {} must be non-negative and below presence threshold {}",
                self.void_threshold, self.presence_threshold
            )));
        }
        if !(self.top_engagement_fraction > 0.0 && self.top_engagement_fraction < 1.0) {
            return Err(AnalyticsError::Configuration(format!(
                "top engagement fraction must be in (0, 1), got {}",
                self.top_engagement_fraction
            )));
        }
        if self.pca_components == 0 {
            return Err(AnalyticsError::Configuration(
                "pca_components must be at least 1".into(),
            ));
        }
        if self.smoothing.basis_size < MIN_BASIS_SIZE {
            return Err(AnalyticsError::Configuration(format!(
                "smoothing basis size must be at least {MIN_BASIS_SIZE}, got {}",
                self.smoothing.basis_size
            )));
        }
        if !(self.smoothing.log_lambda_min < self.smoothing.log_lambda_max) {
            return Err(AnalyticsError::Configuration(
                "smoothing log-lambda bounds must be increasing".into(),
            ));
        }
        if !(self.logistic.ci_level > 0.0 && self.logistic.ci_level < 1.0) {
            return Err(AnalyticsError::Configuration(format!(
                "confidence level must be in (0, 1), got {}",
                self.logistic.ci_level
            )));
        }
        if self.logistic.ml_max_iterations == 0 || self.logistic.firth_max_iterations == 0 {
            return Err(AnalyticsError::Configuration(
                "logistic iteration caps must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Reject quantiles outside the open unit interval.
pub fn validate_quantile(q: f64) -> Result<(), AnalyticsError> {
    if q > 0.0 && q < 1.0 {
        Ok(())
    } else {
        Err(AnalyticsError::Configuration(format!(
            "quantile must be in (0, 1), got {q}"
        )))
    }
}
