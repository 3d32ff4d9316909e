/// Constants used by engagement scoring and label derivation.
pub mod scoring {
    /// Default population quantile for the high-engagement label.
    pub const DEFAULT_HIGH_ENGAGEMENT_QUANTILE: f64 = 0.90;
    /// Minimum non-missing observations needed to standardize a metric.
    pub const MIN_STANDARDIZE_OBSERVATIONS: usize = 2;
    /// Outcome tag used for labels derived from the composite score.
    pub const COMPOSITE_TAG: &str = "composite";
}

/// Constants used by co-occurrence aggregation.
pub mod cooccurrence {
    /// Default minimum score at which a record counts as tagged with a category.
    pub const DEFAULT_PRESENCE_THRESHOLD: f64 = 0.3;
    /// Default mean co-occurrence below which a pair is reported as a void.
    pub const DEFAULT_VOID_THRESHOLD: f64 = 0.05;
    /// Default fraction of records kept by the top-engagement tier filter.
    pub const DEFAULT_TOP_ENGAGEMENT_FRACTION: f64 = 0.01;
}

/// Constants used by the rank correlation engine.
pub mod correlation {
    /// Minimum paired observations for a defined coefficient.
    pub const MIN_PAIRED_OBSERVATIONS: usize = 3;
}

/// Constants used by logistic model fitting.
pub mod logistic {
    /// Iteration cap for maximum-likelihood IRLS.
    pub const DEFAULT_ML_MAX_ITERATIONS: usize = 25;
    /// Relative deviance change treated as converged for IRLS.
    pub const DEFAULT_ML_TOLERANCE: f64 = 1e-8;
    /// Iteration cap for the bias-reduced (Firth) estimator.
    pub const DEFAULT_FIRTH_MAX_ITERATIONS: usize = 50;
    /// Max absolute coefficient update treated as converged for Firth.
    pub const DEFAULT_FIRTH_TOLERANCE: f64 = 1e-6;
    /// Relative Cholesky pivot below which an information matrix is singular.
    pub const COLLINEAR_PIVOT: f64 = 1e-10;
    /// Largest Newton step allowed per Firth iteration.
    pub const FIRTH_MAX_STEP: f64 = 5.0;
    /// Step-halving attempts per iteration before giving up.
    pub const MAX_HALF_STEPS: usize = 25;
    /// Sanity bound on |coefficient| x (observed predictor range) for ML fits.
    pub const DEFAULT_EFFECT_BOUND: f64 = 15.0;
    /// Fitted probabilities closer than this to 0 or 1 indicate separation.
    pub const FITTED_PROBABILITY_EPS: f64 = 1e-10;
    /// Default confidence level for coefficient intervals.
    pub const DEFAULT_CI_LEVEL: f64 = 0.95;
    /// Bracketing steps attempted per side when profiling a Firth interval.
    pub const PROFILE_BRACKET_STEPS: usize = 30;
    /// Bisection iterations used to refine a profile interval bound.
    pub const PROFILE_BISECTION_STEPS: usize = 40;
    /// Display name of the intercept term.
    pub const INTERCEPT_TERM: &str = "(Intercept)";
    /// Display name of the source-type control term.
    pub const SOURCE_TERM: &str = "source_type";
}

/// Constants used by the smoothing regression engine.
pub mod smoothing {
    /// Default number of B-spline basis functions per smooth.
    pub const DEFAULT_BASIS_SIZE: usize = 10;
    /// Smallest basis size accepted by configuration validation.
    pub const MIN_BASIS_SIZE: usize = 5;
    /// Cubic splines.
    pub const SPLINE_DEGREE: usize = 3;
    /// Order of the difference penalty (penalizes curvature).
    pub const PENALTY_ORDER: usize = 2;
    /// Minimum distinct days needed before time smooths are fitted.
    pub const MIN_DISTINCT_DAYS: usize = 4;
    /// Lower bound of the log smoothing-parameter search.
    pub const DEFAULT_LOG_LAMBDA_MIN: f64 = -12.0;
    /// Upper bound of the log smoothing-parameter search.
    pub const DEFAULT_LOG_LAMBDA_MAX: f64 = 20.0;
    /// Coordinate sweeps over smoothing parameters.
    pub const DEFAULT_SWEEPS: usize = 4;
    /// Grid points scanned before golden-section refinement.
    pub const GRID_POINTS: usize = 13;
    /// Golden-section refinement iterations per coordinate.
    pub const GOLDEN_ITERATIONS: usize = 24;
    /// Relative ridge added to the penalized normal equations.
    pub const RIDGE_SCALE: f64 = 1e-9;
    /// Standard deviation below this fraction of max(|mean|, 1) is degenerate.
    pub const DEGENERATE_SPREAD: f64 = 1e-4;
    /// Share of a smooth category's variation explained by day at which it is
    /// indistinguishable from the baseline curve.
    pub const DAY_COLLINEAR_R2: f64 = 0.999;
    /// Unexplained share below which a by-day direction counts as confounded
    /// with the terms already in the model.
    pub const CONFOUNDED_FRACTION: f64 = 1e-6;
    /// Relative eigenvalue floor for directions a design can identify.
    pub const GRAM_TOLERANCE: f64 = 1e-10;
    /// Display name of the baseline time smooth.
    pub const BASELINE_TERM: &str = "s(day)";
}

/// Constants describing the default category schema.
pub mod schema {
    /// Default emotion family categories.
    pub const EMOTIONS: [&str; 12] = [
        "admiration",
        "amusement",
        "anger",
        "annoyance",
        "disgust",
        "fear",
        "gratitude",
        "joy",
        "optimism",
        "pride",
        "sadness",
        "surprise",
    ];
    /// Default theme family categories.
    pub const THEMES: [&str; 12] = [
        "crime",
        "culture",
        "economy",
        "education",
        "environment",
        "health",
        "immigration",
        "international",
        "politics",
        "public safety",
        "sports",
        "technology",
    ];
    /// Default source-label prefix marking channel B.
    pub const DEFAULT_CHANNEL_B_PREFIX: &str = "@";
}
