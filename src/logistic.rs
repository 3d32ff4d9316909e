//! Logistic regression of engagement labels on category predictors.
//!
//! Every model is first fitted by maximum likelihood (IRLS). When that fit
//! does not converge, produces an effect beyond the sanity bound, or the data
//! show separation, the model is refitted with Firth's bias-reduced penalized
//! likelihood, which keeps coefficients finite. Firth intervals come from the
//! profile penalized likelihood and p-values from the penalized
//! likelihood-ratio test. If both estimators fail, the affected rows are
//! reported with missing statistics; sibling models are unaffected.

use nalgebra::{DMatrix, DVector, Dyn, linalg::Cholesky};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::LogisticControls;
use crate::constants::logistic::{
    COLLINEAR_PIVOT, FIRTH_MAX_STEP, FITTED_PROBABILITY_EPS, INTERCEPT_TERM, MAX_HALF_STEPS,
    PROFILE_BISECTION_STEPS, PROFILE_BRACKET_STEPS, SOURCE_TERM,
};
use crate::data::SourceType;
use crate::predictors::PredictorSet;
use crate::stats::{chi_squared_quantile, chi_squared_upper_tail, normal_quantile, normal_two_sided_p};
use crate::types::{OutcomeTag, PredictorId};

/// Role of a term in the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TermKind {
    /// Model intercept.
    Intercept,
    /// Source channel indicator.
    Control,
    /// Category or component score.
    Predictor,
}

/// Estimator that produced a row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMethod {
    /// Standard IRLS fit.
    MaximumLikelihood,
    /// Firth penalized likelihood.
    BiasReduced,
    /// Neither estimator produced a usable fit.
    Undefined,
}

/// Why a fit fell back to the bias-reduced estimator, or why a row is undefined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FitIssue {
    /// IRLS did not converge within the iteration cap.
    NonConvergence,
    /// A coefficient was infinite or beyond the effect bound.
    UnboundedCoefficient,
    /// A term (or the constant outcome) separates events from non-events.
    Separation,
    /// The information matrix could not be factored.
    SingularInformation,
    /// The predictor is constant over the fitted rows.
    ConstantPredictor,
    /// No complete-case rows remained.
    NoObservations,
}

/// Binary outcome variant with its tag.
#[derive(Clone, Debug, Serialize)]
pub struct OutcomeLabels {
    /// Outcome tag copied to every result row.
    pub tag: OutcomeTag,
    /// Label per record; missing records are skipped.
    #[serde(skip)]
    pub labels: Vec<Option<bool>>,
}

impl OutcomeLabels {
    /// Labels tagged with `tag`.
    pub fn new(tag: impl Into<OutcomeTag>, labels: Vec<Option<bool>>) -> Self {
        Self {
            tag: tag.into(),
            labels,
        }
    }
}

/// How predictors are arranged into models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelLayout {
    /// One model per predictor (plus intercept and source control); only the
    /// predictor rows are reported.
    PerPredictor,
    /// One model holding every predictor; all rows are reported.
    Joint,
}

/// Tidy coefficient row.
#[derive(Clone, Debug, Serialize)]
pub struct CoefficientRow {
    /// Outcome tag.
    pub outcome: OutcomeTag,
    /// Internal identifier.
    pub term_id: PredictorId,
    /// Display name; cosmetic only.
    pub term: String,
    /// Role in the model.
    pub kind: TermKind,
    /// Log-odds coefficient.
    pub estimate: Option<f64>,
    /// Standard error of `estimate`.
    pub std_error: Option<f64>,
    /// `exp(estimate)`.
    pub odds_ratio: Option<f64>,
    /// Lower interval bound on the odds-ratio scale.
    pub ci_low: Option<f64>,
    /// Upper interval bound on the odds-ratio scale.
    pub ci_high: Option<f64>,
    /// Wald (ML) or penalized likelihood-ratio (Firth) p-value.
    pub p_value: Option<f64>,
    /// Estimator that produced the row.
    pub method: FitMethod,
    /// Fallback trigger (bias-reduced rows) or failure cause (undefined rows).
    pub issue: Option<FitIssue>,
    /// Complete-case rows in the model.
    pub n_obs: usize,
    /// Positive labels among them.
    pub n_events: usize,
}

/// Result of fitting one model.
#[derive(Clone, Debug, Serialize)]
pub struct ModelFit {
    /// Outcome tag.
    pub outcome: OutcomeTag,
    /// Estimator used.
    pub method: FitMethod,
    /// Fallback trigger or failure cause.
    pub issue: Option<FitIssue>,
    /// Complete-case rows in the model.
    pub n_obs: usize,
    /// Positive labels among them.
    pub n_events: usize,
    /// Intercept, control, then predictors in set order.
    pub rows: Vec<CoefficientRow>,
}

#[derive(Clone, Debug)]
struct Term {
    id: PredictorId,
    display: String,
    kind: TermKind,
}

struct DesignFrame {
    x: DMatrix<f64>,
    y: DVector<f64>,
    terms: Vec<Term>,
}

struct FrameBuild {
    frame: DesignFrame,
    /// Predictors left out of the design, with the reason.
    excluded: Vec<(Term, FitIssue)>,
    /// Predictor order for reporting: `Ok(column)` or `Err(excluded index)`.
    order: Vec<Result<usize, usize>>,
    n_obs: usize,
    n_events: usize,
}

#[derive(Clone, Debug)]
struct Estimate {
    beta: DVector<f64>,
    cov: DMatrix<f64>,
    /// Log-likelihood (ML) or penalized log-likelihood (Firth).
    objective: f64,
    converged: bool,
}

/// Fits maximum-likelihood logistic models with a Firth fallback.
#[derive(Clone, Debug, Default)]
pub struct LogisticModelFitter {
    controls: LogisticControls,
}

impl LogisticModelFitter {
    /// Fitter with explicit controls.
    pub fn new(controls: LogisticControls) -> Self {
        Self { controls }
    }

    /// Controls in use.
    pub fn controls(&self) -> &LogisticControls {
        &self.controls
    }

    /// Fit several outcome variants independently and concatenate their rows
    /// in outcome order.
    pub fn fit_outcomes(
        &self,
        outcomes: &[OutcomeLabels],
        sources: &[SourceType],
        predictors: &PredictorSet,
        layout: ModelLayout,
    ) -> Vec<CoefficientRow> {
        let per_outcome: Vec<Vec<CoefficientRow>> = outcomes
            .par_iter()
            .map(|outcome| match layout {
                ModelLayout::PerPredictor => self.fit_each(outcome, sources, predictors),
                ModelLayout::Joint => self.fit_joint(outcome, sources, predictors).rows,
            })
            .collect();
        let rows: Vec<CoefficientRow> = per_outcome.into_iter().flatten().collect();
        info!(
            "[engagement:logistic] fitted {} outcome(s), {} rows ({} bias-reduced, {} undefined)",
            outcomes.len(),
            rows.len(),
            rows.iter()
                .filter(|row| row.method == FitMethod::BiasReduced)
                .count(),
            rows.iter()
                .filter(|row| row.method == FitMethod::Undefined)
                .count()
        );
        rows
    }

    /// One model per predictor; returns the predictor rows in set order.
    pub fn fit_each(
        &self,
        outcome: &OutcomeLabels,
        sources: &[SourceType],
        predictors: &PredictorSet,
    ) -> Vec<CoefficientRow> {
        let all: Vec<_> = predictors.iter().collect();
        all.par_iter()
            .map(|predictor| {
                let single = PredictorSet::single(predictor);
                self.fit_joint(outcome, sources, &single)
                    .rows
                    .into_iter()
                    .filter(|row| row.kind == TermKind::Predictor)
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect()
    }

    /// Fit one model: intercept, source control, and every predictor.
    pub fn fit_joint(
        &self,
        outcome: &OutcomeLabels,
        sources: &[SourceType],
        predictors: &PredictorSet,
    ) -> ModelFit {
        let build = build_frame(&outcome.labels, sources, predictors);
        if build.n_obs == 0 {
            return undefined_fit(outcome, &build, FitIssue::NoObservations);
        }

        let ml = fit_maximum_likelihood(&build.frame, &self.controls).and_then(|estimate| {
            match diagnose(&build.frame, &estimate, &self.controls) {
                Some(issue) => Err(issue),
                None => Ok(estimate),
            }
        });

        match ml {
            Ok(estimate) => {
                let rows = self.wald_rows(outcome, &build, &estimate);
                finish(outcome, &build, FitMethod::MaximumLikelihood, None, rows)
            }
            Err(trigger) => {
                warn!(
                    "[engagement:logistic] outcome '{}' ({} terms): ML fit rejected ({:?}); refitting with bias-reduced estimator",
                    outcome.tag,
                    build.frame.terms.len(),
                    trigger
                );
                match fit_firth(&build.frame, &self.controls, None, None) {
                    Ok(estimate) => {
                        let rows = self.profile_rows(outcome, &build, &estimate, trigger);
                        finish(outcome, &build, FitMethod::BiasReduced, Some(trigger), rows)
                    }
                    Err(issue) => {
                        warn!(
                            "[engagement:logistic] outcome '{}': bias-reduced fit failed ({:?}); rows reported as undefined",
                            outcome.tag, issue
                        );
                        undefined_fit(outcome, &build, issue)
                    }
                }
            }
        }
    }

    fn wald_rows(
        &self,
        outcome: &OutcomeLabels,
        build: &FrameBuild,
        estimate: &Estimate,
    ) -> Vec<Option<CoefficientRow>> {
        let z = normal_quantile(1.0 - (1.0 - self.controls.ci_level) / 2.0);
        (0..build.frame.terms.len())
            .map(|j| {
                let beta = estimate.beta[j];
                let se = estimate.cov[(j, j)].sqrt();
                let se = se.is_finite().then_some(se);
                let bounds = se.zip(z).map(|(se, z)| ((beta - z * se).exp(), (beta + z * se).exp()));
                Some(CoefficientRow {
                    std_error: se,
                    ci_low: bounds.map(|b| b.0),
                    ci_high: bounds.map(|b| b.1),
                    p_value: se.and_then(|se| normal_two_sided_p(beta / se)),
                    ..defined_row(outcome, build, j, beta, FitMethod::MaximumLikelihood, None)
                })
            })
            .collect()
    }

    fn profile_rows(
        &self,
        outcome: &OutcomeLabels,
        build: &FrameBuild,
        estimate: &Estimate,
        trigger: FitIssue,
    ) -> Vec<Option<CoefficientRow>> {
        let critical = chi_squared_quantile(self.controls.ci_level, 1.0);
        (0..build.frame.terms.len())
            .into_par_iter()
            .map(|j| {
                let beta = estimate.beta[j];
                let se = estimate.cov[(j, j)].sqrt();
                let se = se.is_finite().then_some(se);
                let profile = Profile {
                    frame: &build.frame,
                    controls: &self.controls,
                    estimate,
                    term: j,
                };
                let p_value = profile
                    .at(0.0)
                    .and_then(|constrained| {
                        chi_squared_upper_tail((2.0 * (estimate.objective - constrained)).max(0.0), 1.0)
                    });
                let (low, high) = match critical {
                    Some(critical) => {
                        let target = estimate.objective - critical / 2.0;
                        let step = se.unwrap_or(1.0).max(0.1);
                        (profile.bound(target, -1.0, step), profile.bound(target, 1.0, step))
                    }
                    None => (None, None),
                };
                Some(CoefficientRow {
                    std_error: se,
                    ci_low: low.map(f64::exp),
                    ci_high: high.map(f64::exp),
                    p_value,
                    ..defined_row(
                        outcome,
                        build,
                        j,
                        beta,
                        FitMethod::BiasReduced,
                        Some(trigger),
                    )
                })
            })
            .collect()
    }
}

fn defined_row(
    outcome: &OutcomeLabels,
    build: &FrameBuild,
    column: usize,
    beta: f64,
    method: FitMethod,
    issue: Option<FitIssue>,
) -> CoefficientRow {
    let term = &build.frame.terms[column];
    CoefficientRow {
        outcome: outcome.tag.clone(),
        term_id: term.id.clone(),
        term: term.display.clone(),
        kind: term.kind,
        estimate: Some(beta),
        std_error: None,
        odds_ratio: Some(beta.exp()),
        ci_low: None,
        ci_high: None,
        p_value: None,
        method,
        issue,
        n_obs: build.n_obs,
        n_events: build.n_events,
    }
}

fn undefined_row(outcome: &OutcomeLabels, build: &FrameBuild, term: &Term, issue: FitIssue) -> CoefficientRow {
    CoefficientRow {
        outcome: outcome.tag.clone(),
        term_id: term.id.clone(),
        term: term.display.clone(),
        kind: term.kind,
        estimate: None,
        std_error: None,
        odds_ratio: None,
        ci_low: None,
        ci_high: None,
        p_value: None,
        method: FitMethod::Undefined,
        issue: Some(issue),
        n_obs: build.n_obs,
        n_events: build.n_events,
    }
}

/// Assemble rows in reporting order: design columns for intercept and
/// control, then predictors in set order including excluded ones.
fn finish(
    outcome: &OutcomeLabels,
    build: &FrameBuild,
    method: FitMethod,
    issue: Option<FitIssue>,
    mut defined: Vec<Option<CoefficientRow>>,
) -> ModelFit {
    let mut rows = Vec::with_capacity(build.frame.terms.len() + build.excluded.len());
    for (column, term) in build.frame.terms.iter().enumerate() {
        if term.kind != TermKind::Predictor {
            if let Some(row) = defined[column].take() {
                rows.push(row);
            }
        }
    }
    for slot in &build.order {
        match slot {
            Ok(column) => {
                if let Some(row) = defined[*column].take() {
                    rows.push(row);
                }
            }
            Err(excluded) => {
                let (term, cause) = &build.excluded[*excluded];
                rows.push(undefined_row(outcome, build, term, *cause));
            }
        }
    }
    ModelFit {
        outcome: outcome.tag.clone(),
        method,
        issue,
        n_obs: build.n_obs,
        n_events: build.n_events,
        rows,
    }
}

fn undefined_fit(outcome: &OutcomeLabels, build: &FrameBuild, issue: FitIssue) -> ModelFit {
    let defined = build
        .frame
        .terms
        .iter()
        .map(|term| Some(undefined_row(outcome, build, term, issue)))
        .collect();
    finish(outcome, build, FitMethod::Undefined, Some(issue), defined)
}

/// Complete-case design: rows with a label and every predictor present.
///
/// The source control enters only when both channels occur among the kept
/// rows. Predictors that are constant over the kept rows are excluded.
fn build_frame(
    labels: &[Option<bool>],
    sources: &[SourceType],
    predictors: &PredictorSet,
) -> FrameBuild {
    let rows: Vec<usize> = (0..labels.len())
        .filter(|&i| labels[i].is_some() && sources.get(i).is_some())
        .filter(|&i| {
            predictors.iter().all(|predictor| {
                predictor
                    .values
                    .get(i)
                    .copied()
                    .flatten()
                    .is_some_and(f64::is_finite)
            })
        })
        .collect();
    let n_obs = rows.len();
    let y = DVector::from_iterator(
        n_obs,
        rows.iter()
            .map(|&i| if labels[i] == Some(true) { 1.0 } else { 0.0 }),
    );
    let n_events = y.iter().filter(|v| **v > 0.5).count();

    let mut columns: Vec<Vec<f64>> = vec![vec![1.0; n_obs]];
    let mut terms = vec![Term {
        id: "intercept".into(),
        display: INTERCEPT_TERM.into(),
        kind: TermKind::Intercept,
    }];

    let source_column: Vec<f64> = rows
        .iter()
        .map(|&i| if sources[i] == SourceType::ChannelB { 1.0 } else { 0.0 })
        .collect();
    if column_range(&source_column) > 0.0 {
        columns.push(source_column);
        terms.push(Term {
            id: "source_type_b".into(),
            display: SOURCE_TERM.into(),
            kind: TermKind::Control,
        });
    } else {
        debug!("[engagement:logistic] single source channel among {} rows; control dropped", n_obs);
    }

    let mut excluded = Vec::new();
    let mut order = Vec::with_capacity(predictors.len());
    for predictor in predictors.iter() {
        let term = Term {
            id: predictor.id.clone(),
            display: predictor.display.clone(),
            kind: TermKind::Predictor,
        };
        let values: Vec<f64> = rows
            .iter()
            .filter_map(|&i| predictor.values.get(i).copied().flatten())
            .collect();
        if n_obs > 0 && column_range(&values) <= 0.0 {
            order.push(Err(excluded.len()));
            excluded.push((term, FitIssue::ConstantPredictor));
        } else {
            order.push(Ok(terms.len()));
            columns.push(values);
            terms.push(term);
        }
    }

    let x = DMatrix::from_fn(n_obs, columns.len(), |i, j| columns[j][i]);
    FrameBuild {
        frame: DesignFrame { x, y, terms },
        excluded,
        order,
        n_obs,
        n_events,
    }
}

fn column_range(values: &[f64]) -> f64 {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if values.is_empty() { 0.0 } else { max - min }
}

fn sigmoid(eta: f64) -> f64 {
    if eta >= 0.0 {
        1.0 / (1.0 + (-eta).exp())
    } else {
        let e = eta.exp();
        e / (1.0 + e)
    }
}

fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

fn log_likelihood(y: &DVector<f64>, eta: &DVector<f64>) -> f64 {
    y.iter()
        .zip(eta.iter())
        .map(|(yi, ei)| yi * ei - softplus(*ei))
        .sum()
}

/// Fisher information X' W X with W = diag(mu (1 - mu)).
fn information(x: &DMatrix<f64>, mu: &DVector<f64>) -> DMatrix<f64> {
    let mut weighted = x.clone();
    for i in 0..x.nrows() {
        let w = mu[i] * (1.0 - mu[i]);
        for j in 0..x.ncols() {
            weighted[(i, j)] *= w;
        }
    }
    x.tr_mul(&weighted)
}

/// Cholesky factor of an information matrix, rejecting matrices where a
/// column is (numerically) a combination of the preceding ones.
///
/// Each squared pivot is the part of its diagonal entry left after projecting
/// on the earlier columns; a relative remainder below `COLLINEAR_PIVOT` means
/// the information is singular for practical purposes.
fn information_cholesky(matrix: DMatrix<f64>) -> Option<Cholesky<f64, Dyn>> {
    let diagonal = matrix.diagonal();
    let chol = matrix.cholesky()?;
    let l = chol.l_dirty();
    let well_posed = (0..diagonal.len()).all(|i| {
        let pivot = l[(i, i)] * l[(i, i)];
        pivot > COLLINEAR_PIVOT * diagonal[i]
    });
    well_posed.then_some(chol)
}

fn log_det_spd(matrix: &DMatrix<f64>) -> Option<f64> {
    let chol = information_cholesky(matrix.clone())?;
    let l = chol.l();
    let log_det: f64 = (0..l.nrows()).map(|i| l[(i, i)].ln()).sum::<f64>() * 2.0;
    log_det.is_finite().then_some(log_det)
}

fn fit_maximum_likelihood(
    frame: &DesignFrame,
    controls: &LogisticControls,
) -> Result<Estimate, FitIssue> {
    let p = frame.x.ncols();
    let mut beta = DVector::zeros(p);
    let mut loglik = log_likelihood(&frame.y, &(&frame.x * &beta));
    let mut converged = false;

    for _ in 0..controls.ml_max_iterations {
        let eta = &frame.x * &beta;
        let mu = eta.map(sigmoid);
        let chol = information_cholesky(information(&frame.x, &mu))
            .ok_or(FitIssue::SingularInformation)?;
        let score = frame.x.tr_mul(&(&frame.y - &mu));
        let delta = chol.solve(&score);

        let mut step = 1.0;
        let mut candidate = &beta + &delta;
        let mut candidate_ll = log_likelihood(&frame.y, &(&frame.x * &candidate));
        let mut halvings = 0;
        while (candidate_ll.is_nan() || candidate_ll < loglik - 1e-12) && halvings < MAX_HALF_STEPS {
            step /= 2.0;
            candidate = &beta + &delta * step;
            candidate_ll = log_likelihood(&frame.y, &(&frame.x * &candidate));
            halvings += 1;
        }

        let deviance_old = -2.0 * loglik;
        let deviance_new = -2.0 * candidate_ll;
        beta = candidate;
        loglik = candidate_ll;
        if (deviance_new - deviance_old).abs() / (deviance_new.abs() + 0.1) < controls.ml_tolerance {
            converged = true;
            break;
        }
    }

    let mu = (&frame.x * &beta).map(sigmoid);
    let cov = information_cholesky(information(&frame.x, &mu))
        .ok_or(FitIssue::SingularInformation)?
        .inverse();
    Ok(Estimate {
        beta,
        cov,
        objective: loglik,
        converged,
    })
}

/// Decide whether a maximum-likelihood fit must be replaced by Firth.
fn diagnose(frame: &DesignFrame, estimate: &Estimate, controls: &LogisticControls) -> Option<FitIssue> {
    if !estimate.converged {
        return Some(FitIssue::NonConvergence);
    }
    if estimate.beta.iter().any(|b| !b.is_finite()) {
        return Some(FitIssue::UnboundedCoefficient);
    }
    for j in 1..frame.x.ncols() {
        let column: Vec<f64> = frame.x.column(j).iter().copied().collect();
        if estimate.beta[j].abs() * column_range(&column) > controls.effect_bound {
            return Some(FitIssue::UnboundedCoefficient);
        }
    }
    if let Some(column) = separated_column(frame) {
        debug!(
            "[engagement:logistic] term '{}' separates the outcome",
            frame.terms[column].display
        );
        return Some(FitIssue::Separation);
    }
    let mu = (&frame.x * &estimate.beta).map(sigmoid);
    if mu
        .iter()
        .any(|m| *m < FITTED_PROBABILITY_EPS || *m > 1.0 - FITTED_PROBABILITY_EPS)
    {
        return Some(FitIssue::Separation);
    }
    None
}

/// First non-intercept column whose values order events and non-events
/// without overlap (complete or quasi-complete separation along that column).
/// A constant outcome is reported as separated on the intercept.
fn separated_column(frame: &DesignFrame) -> Option<usize> {
    let events = frame.y.iter().filter(|v| **v > 0.5).count();
    if events == 0 || events == frame.y.len() {
        return Some(0);
    }
    (1..frame.x.ncols()).find(|&j| {
        let mut event_min = f64::INFINITY;
        let mut event_max = f64::NEG_INFINITY;
        let mut other_min = f64::INFINITY;
        let mut other_max = f64::NEG_INFINITY;
        for (value, outcome) in frame.x.column(j).iter().zip(frame.y.iter()) {
            if *outcome > 0.5 {
                event_min = event_min.min(*value);
                event_max = event_max.max(*value);
            } else {
                other_min = other_min.min(*value);
                other_max = other_max.max(*value);
            }
        }
        event_max <= other_min || event_min >= other_max
    })
}

/// Firth penalized log-likelihood: l(beta) + 0.5 log|I(beta)|.
fn penalized_log_likelihood(frame: &DesignFrame, beta: &DVector<f64>) -> Option<f64> {
    let eta = &frame.x * beta;
    let mu = eta.map(sigmoid);
    let log_det = log_det_spd(&information(&frame.x, &mu))?;
    Some(log_likelihood(&frame.y, &eta) + 0.5 * log_det)
}

/// Firth bias-reduced fit, optionally holding one coefficient fixed.
///
/// The modified score is X'(y - mu + h (1/2 - mu)) with h the diagonal of the
/// weighted hat matrix. Steps are capped and halved until the penalized
/// log-likelihood does not decrease.
fn fit_firth(
    frame: &DesignFrame,
    controls: &LogisticControls,
    fixed: Option<(usize, f64)>,
    start: Option<&DVector<f64>>,
) -> Result<Estimate, FitIssue> {
    let (n, p) = (frame.x.nrows(), frame.x.ncols());
    let mut beta = start.cloned().unwrap_or_else(|| DVector::zeros(p));
    if let Some((j, value)) = fixed {
        beta[j] = value;
    }
    let mut objective =
        penalized_log_likelihood(frame, &beta).ok_or(FitIssue::SingularInformation)?;
    let mut converged = false;

    for _ in 0..controls.firth_max_iterations {
        let mu = (&frame.x * &beta).map(sigmoid);
        let info = information(&frame.x, &mu);
        let inverse = information_cholesky(info.clone())
            .ok_or(FitIssue::SingularInformation)?
            .inverse();
        let projected = &frame.x * &inverse;
        let adjusted = DVector::from_fn(n, |i, _| {
            let w = mu[i] * (1.0 - mu[i]);
            let h = w * projected.row(i).dot(&frame.x.row(i));
            frame.y[i] - mu[i] + h * (0.5 - mu[i])
        });
        let mut score = frame.x.tr_mul(&adjusted);

        let mut system = info;
        if let Some((j, _)) = fixed {
            score[j] = 0.0;
            for k in 0..p {
                system[(j, k)] = 0.0;
                system[(k, j)] = 0.0;
            }
            system[(j, j)] = 1.0;
        }
        let mut delta = system
            .cholesky()
            .ok_or(FitIssue::SingularInformation)?
            .solve(&score);
        let largest = delta.amax();
        if largest > FIRTH_MAX_STEP {
            delta *= FIRTH_MAX_STEP / largest;
        }

        let mut step = 1.0;
        let mut candidate = &beta + &delta;
        let mut candidate_objective = penalized_log_likelihood(frame, &candidate);
        let mut halvings = 0;
        while !candidate_objective.is_some_and(|value| value >= objective - 1e-12)
            && halvings < MAX_HALF_STEPS
        {
            step /= 2.0;
            candidate = &beta + &delta * step;
            candidate_objective = penalized_log_likelihood(frame, &candidate);
            halvings += 1;
        }
        let Some(value) = candidate_objective else {
            return Err(FitIssue::SingularInformation);
        };
        beta = candidate;
        objective = value;
        if (&delta * step).amax() <= controls.firth_tolerance {
            converged = true;
            break;
        }
    }

    if !converged {
        return Err(FitIssue::NonConvergence);
    }
    let mu = (&frame.x * &beta).map(sigmoid);
    let cov = information_cholesky(information(&frame.x, &mu))
        .ok_or(FitIssue::SingularInformation)?
        .inverse();
    if beta.iter().any(|b| !b.is_finite()) {
        return Err(FitIssue::UnboundedCoefficient);
    }
    Ok(Estimate {
        beta,
        cov,
        objective,
        converged,
    })
}

/// Profile of the penalized log-likelihood along one coefficient.
struct Profile<'a> {
    frame: &'a DesignFrame,
    controls: &'a LogisticControls,
    estimate: &'a Estimate,
    term: usize,
}

impl Profile<'_> {
    /// Maximized penalized log-likelihood with the term held at `value`.
    fn at(&self, value: f64) -> Option<f64> {
        fit_firth(
            self.frame,
            self.controls,
            Some((self.term, value)),
            Some(&self.estimate.beta),
        )
        .ok()
        .map(|fit| fit.objective)
    }

    /// Where the profile crosses `target` on one side of the estimate.
    fn bound(&self, target: f64, direction: f64, initial_step: f64) -> Option<f64> {
        let center = self.estimate.beta[self.term];
        let mut inside = center;
        let mut step = initial_step;
        let mut outside = None;
        for _ in 0..PROFILE_BRACKET_STEPS {
            let candidate = inside + direction * step;
            if self.at(candidate)? < target {
                outside = Some(candidate);
                break;
            }
            inside = candidate;
            step *= 2.0;
        }
        let mut outside = outside?;
        for _ in 0..PROFILE_BISECTION_STEPS {
            if (outside - inside).abs() < 1e-6 {
                break;
            }
            let mid = 0.5 * (inside + outside);
            if self.at(mid)? < target {
                outside = mid;
            } else {
                inside = mid;
            }
        }
        Some(0.5 * (inside + outside))
    }
}
