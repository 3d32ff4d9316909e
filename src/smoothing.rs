//! Additive regression of the composite engagement score on time.
//!
//! The model is
//!
//! ```text
//! composite ~ 1 + source_type + linear categories + s(day) + sum_c x_c * f_c(day)
//! ```
//!
//! where `s(day)` is a centered cubic P-spline baseline and each `f_c` is a
//! time-varying coefficient for a smooth-interacting category. Smoothing
//! parameters are chosen by minimizing the Gaussian REML criterion with the
//! scale profiled out, so the caller never picks smoothness by hand.

use std::collections::{BTreeSet, HashSet};

use nalgebra::{DMatrix, DVector, Dyn, SymmetricEigen, linalg::Cholesky};
use serde::Serialize;
use tracing::{debug, info};

use crate::basis::{BSplineBasis, centered_smooth, difference_penalty, side_constrained};
use crate::config::SmoothingControls;
use crate::constants::logistic::{INTERCEPT_TERM, SOURCE_TERM};
use crate::constants::smoothing::{
    BASELINE_TERM, DAY_COLLINEAR_R2, DEGENERATE_SPREAD, GOLDEN_ITERATIONS, GRID_POINTS,
    MIN_DISTINCT_DAYS, RIDGE_SCALE,
};
use crate::data::{CategoryFamily, SourceType};
use crate::errors::AnalyticsError;
use crate::predictors::escape_identifier;
use crate::scoring::ScoredMatrix;
use crate::stats::{f_upper_tail, sample_variance, t_two_sided_p};
use crate::types::{CategoryName, PredictorId};

/// Outcome of a smooth-interacting category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothTermStatus {
    /// Smooth estimated.
    Fitted,
    /// Near-zero variance over the fitted rows; reported with zero EDF.
    Degenerate,
    /// Too few distinct days for time smooths; the category entered linearly.
    InsufficientDays,
}

/// Summary of one time-varying category effect.
#[derive(Clone, Debug, Serialize)]
pub struct SmoothTermSummary {
    /// Family of the category.
    pub family: CategoryFamily,
    /// Category name.
    pub category: CategoryName,
    /// Display term, `s(day):<category>`.
    pub term: String,
    /// How the category entered the model.
    pub status: SmoothTermStatus,
    /// Effective degrees of freedom.
    pub edf: f64,
    /// Rank used by the Wald test.
    pub ref_df: Option<f64>,
    /// Wald F statistic.
    pub f_statistic: Option<f64>,
    /// p-value of `f_statistic`.
    pub p_value: Option<f64>,
    /// Selected smoothing parameter.
    pub lambda: Option<f64>,
}

/// Unpenalized coefficient with a t-test.
#[derive(Clone, Debug, Serialize)]
pub struct ParametricRow {
    /// Internal identifier.
    pub term_id: PredictorId,
    /// Display name.
    pub term: String,
    /// Coefficient.
    pub estimate: Option<f64>,
    /// Standard error.
    pub std_error: Option<f64>,
    /// `estimate / std_error`.
    pub t_value: Option<f64>,
    /// Two-sided p-value on the residual degrees of freedom.
    pub p_value: Option<f64>,
}

/// Baseline time curve evaluated at one observed day.
#[derive(Clone, Debug, Serialize)]
pub struct BaselinePoint {
    /// Day offset (first day is 1).
    pub day: u32,
    /// Centered baseline value.
    pub estimate: f64,
    /// Pointwise standard error.
    pub std_error: Option<f64>,
}

/// Fitted additive model.
#[derive(Clone, Debug, Serialize)]
pub struct SmoothFit {
    /// Rows used.
    pub n_obs: usize,
    /// Records excluded for a missing composite score or category value.
    pub dropped_rows: usize,
    /// Whether time smooths were fitted.
    pub time_smooths: bool,
    /// `1 - rss / tss`.
    pub deviance_explained: Option<f64>,
    /// R-squared adjusted by the residual degrees of freedom.
    pub adjusted_r_squared: Option<f64>,
    /// Residual variance estimate.
    pub scale: Option<f64>,
    /// REML criterion at the optimum.
    pub reml_score: Option<f64>,
    /// Sum of the influence-matrix diagonal.
    pub total_edf: f64,
    /// EDF of the baseline smooth.
    pub baseline_edf: Option<f64>,
    /// Smoothing parameter of the baseline.
    pub baseline_lambda: Option<f64>,
    /// Baseline curve per observed day.
    pub baseline: Vec<BaselinePoint>,
    /// Intercept, source and linear controls.
    pub parametric: Vec<ParametricRow>,
    /// One summary per smooth category.
    pub smooth_terms: Vec<SmoothTermSummary>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BlockRole {
    Baseline,
    Category(usize),
}

struct PenaltyBlock {
    role: BlockRole,
    start: usize,
    penalty: DMatrix<f64>,
    rank: usize,
    /// Log pseudo-determinant of `penalty`.
    log_det: f64,
}

impl PenaltyBlock {
    fn new(role: BlockRole, start: usize, penalty: DMatrix<f64>, rank: usize) -> Self {
        let mut eigenvalues: Vec<f64> = SymmetricEigen::new(penalty.clone())
            .eigenvalues
            .iter()
            .copied()
            .collect();
        eigenvalues.sort_by(|a, b| b.total_cmp(a));
        let log_det = eigenvalues
            .iter()
            .take(rank)
            .filter(|value| **value > 0.0)
            .map(|value| value.ln())
            .sum();
        Self {
            role,
            start,
            penalty,
            rank,
            log_det,
        }
    }

    fn size(&self) -> usize {
        self.penalty.nrows()
    }
}

/// Cross products of the design, formed once and reused for every
/// smoothing-parameter trial.
struct Problem {
    xtx: DMatrix<f64>,
    xty: DVector<f64>,
    yty: f64,
    n: usize,
    blocks: Vec<PenaltyBlock>,
    ridge: f64,
}

struct Solution {
    beta: DVector<f64>,
    chol: Cholesky<f64, Dyn>,
    rss: f64,
    penalty: f64,
    log_det: f64,
}

impl Problem {
    fn null_dimension(&self) -> usize {
        self.xtx.nrows() - self.blocks.iter().map(|block| block.rank).sum::<usize>()
    }

    fn solve(&self, rho: &[f64]) -> Option<Solution> {
        let mut system = self.xtx.clone();
        for (block, log_lambda) in self.blocks.iter().zip(rho) {
            let lambda = log_lambda.exp();
            for i in 0..block.size() {
                for j in 0..block.size() {
                    system[(block.start + i, block.start + j)] += lambda * block.penalty[(i, j)];
                }
            }
        }
        for i in 0..system.nrows() {
            system[(i, i)] += self.ridge;
        }
        let chol = system.cholesky()?;
        let beta = chol.solve(&self.xty);
        let rss = (self.yty - 2.0 * beta.dot(&self.xty) + beta.dot(&(&self.xtx * &beta))).max(0.0);
        let penalty = self
            .blocks
            .iter()
            .zip(rho)
            .map(|(block, log_lambda)| {
                let coefficients = beta.rows(block.start, block.size());
                log_lambda.exp() * coefficients.dot(&(&block.penalty * &coefficients))
            })
            .sum();
        let l = chol.l();
        let log_det = 2.0 * (0..l.nrows()).map(|i| l[(i, i)].ln()).sum::<f64>();
        Some(Solution {
            beta,
            chol,
            rss,
            penalty,
            log_det,
        })
    }

    /// REML criterion with the scale profiled out; `None` when undefined.
    fn reml(&self, rho: &[f64], solution: &Solution) -> Option<f64> {
        let dof = self.n.checked_sub(self.null_dimension()).filter(|d| *d > 0)? as f64;
        let scale = (solution.rss + solution.penalty) / dof;
        if scale.is_nan() || scale <= 0.0 || !solution.log_det.is_finite() {
            return None;
        }
        let penalty_log_det: f64 = self
            .blocks
            .iter()
            .zip(rho)
            .map(|(block, log_lambda)| block.rank as f64 * log_lambda + block.log_det)
            .sum();
        Some(
            0.5 * dof * (1.0 + (2.0 * std::f64::consts::PI * scale).ln())
                + 0.5 * solution.log_det
                - 0.5 * penalty_log_det,
        )
    }

    fn criterion(&self, rho: &[f64]) -> f64 {
        self.solve(rho)
            .and_then(|solution| self.reml(rho, &solution))
            .unwrap_or(f64::INFINITY)
    }
}

/// Fits the additive time model with automatic smoothness selection.
#[derive(Clone, Debug, Default)]
pub struct SmoothingRegressionEngine {
    controls: SmoothingControls,
}

impl SmoothingRegressionEngine {
    /// Engine with explicit controls.
    pub fn new(controls: SmoothingControls) -> Self {
        Self { controls }
    }

    /// Fit the model with `smooth` as the smooth-interacting categories and
    /// every other schema category as a linear control.
    ///
    /// Unknown smooth category names are a configuration error. Records with a
    /// missing composite score or any missing category value are dropped and
    /// counted.
    pub fn fit(
        &self,
        scored: &ScoredMatrix<'_>,
        smooth: &[CategoryName],
    ) -> Result<SmoothFit, AnalyticsError> {
        let matrix = scored.matrix;
        let schema = matrix.schema();

        let mut smooth_terms: Vec<(CategoryFamily, CategoryName)> = Vec::new();
        for name in smooth {
            let family = schema.family_of(name).ok_or_else(|| {
                AnalyticsError::Configuration(format!(
                    "smooth category '{name}' is not in the category schema"
                ))
            })?;
            if !smooth_terms.iter().any(|(_, existing)| existing == name) {
                smooth_terms.push((family, name.clone()));
            }
        }
        let linear_terms: Vec<(CategoryFamily, CategoryName)> = schema
            .families()
            .flat_map(|family| {
                schema
                    .categories(family)
                    .iter()
                    .map(move |category| (family, category.clone()))
            })
            .filter(|(family, category)| {
                !smooth_terms
                    .iter()
                    .any(|(f, c)| f == family && c == category)
            })
            .collect();

        let smooth_columns = smooth_terms
            .iter()
            .map(|(family, category)| matrix.column(*family, category))
            .collect::<Result<Vec<_>, _>>()?;
        let linear_columns = linear_terms
            .iter()
            .map(|(family, category)| matrix.column(*family, category))
            .collect::<Result<Vec<_>, _>>()?;

        let response = &scored.scores.composite;
        let rows: Vec<usize> = (0..matrix.len())
            .filter(|&i| response[i].is_some())
            .filter(|&i| {
                smooth_columns
                    .iter()
                    .chain(linear_columns.iter())
                    .all(|column| column[i].is_some())
            })
            .collect();
        let n = rows.len();
        let dropped_rows = matrix.len() - n;
        if dropped_rows > 0 {
            debug!(
                "[engagement:smoothing] dropped {} of {} records with missing values",
                dropped_rows,
                matrix.len()
            );
        }

        let pick = |column: &[Option<f64>]| -> Vec<f64> {
            rows.iter().map(|&i| column[i].unwrap_or(0.0)).collect()
        };
        let y = pick(response);
        let day_index = matrix.day_index();
        let days: Vec<f64> = rows.iter().map(|&i| f64::from(day_index[i])).collect();
        let distinct_days: BTreeSet<u32> = rows.iter().map(|&i| day_index[i]).collect();
        let time_smooths = distinct_days.len() >= MIN_DISTINCT_DAYS;

        // parametric columns: intercept, source, linear controls
        let mut columns: Vec<Vec<f64>> = vec![vec![1.0; n]];
        let mut parametric_terms: Vec<(PredictorId, String, Option<usize>)> =
            vec![("intercept".into(), INTERCEPT_TERM.into(), Some(0))];
        let mut taken = HashSet::new();
        taken.insert("intercept".to_string());
        taken.insert("source_type_b".to_string());

        let sources = matrix.source_types();
        let source: Vec<f64> = rows
            .iter()
            .map(|&i| if sources[i] == SourceType::ChannelB { 1.0 } else { 0.0 })
            .collect();
        if is_varying(&source) {
            parametric_terms.push(("source_type_b".into(), SOURCE_TERM.into(), Some(columns.len())));
            columns.push(source);
        }

        let basis = if time_smooths {
            let lower = days.iter().copied().fold(f64::INFINITY, f64::min);
            let upper = days.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            BSplineBasis::new(lower, upper, self.controls.basis_size.min(distinct_days.len()))
        } else {
            None
        };
        let raw = basis.as_ref().map(|basis| basis.design(&days));

        let mut statuses = vec![SmoothTermStatus::Fitted; smooth_terms.len()];
        let mut linear_inputs: Vec<(String, Vec<f64>)> = linear_terms
            .iter()
            .zip(&linear_columns)
            .map(|((_, category), column)| (category.clone(), pick(column)))
            .collect();
        let mut smooth_values: Vec<Option<Vec<f64>>> = Vec::with_capacity(smooth_terms.len());
        for (slot, ((_, category), column)) in smooth_terms.iter().zip(&smooth_columns).enumerate() {
            let values = pick(column);
            if !is_varying(&values) {
                statuses[slot] = SmoothTermStatus::Degenerate;
                smooth_values.push(None);
                continue;
            }
            let Some(raw) = &raw else {
                statuses[slot] = SmoothTermStatus::InsufficientDays;
                linear_inputs.push((category.clone(), values));
                smooth_values.push(None);
                continue;
            };
            if explained_by_day(&values, raw).is_some_and(|r2| r2 >= DAY_COLLINEAR_R2) {
                debug!(
                    "[engagement:smoothing] smooth category '{}' is a function of day; reported as degenerate",
                    category
                );
                statuses[slot] = SmoothTermStatus::Degenerate;
                smooth_values.push(None);
            } else {
                smooth_values.push(Some(values));
            }
        }

        for (category, values) in linear_inputs {
            let id = escape_identifier(&category, &taken);
            taken.insert(id.clone());
            if is_varying(&values) {
                parametric_terms.push((id, category, Some(columns.len())));
                columns.push(values);
            } else {
                debug!("[engagement:smoothing] linear control '{}' is constant; omitted", category);
                parametric_terms.push((id, category, None));
            }
        }

        let mut blocks = Vec::new();
        let mut baseline_transform = None;
        if let (Some(basis), Some(raw)) = (&basis, &raw) {
            if let Some(smooth) = centered_smooth(basis, &days) {
                let start = columns.len();
                columns.extend(smooth.design.column_iter().map(|c| c.iter().copied().collect()));
                blocks.push(PenaltyBlock::new(BlockRole::Baseline, start, smooth.penalty, smooth.rank));
                baseline_transform = Some(smooth.transform);
            }
            // by-day blocks are identified against the parametric terms and the baseline
            let side = DMatrix::from_fn(n, columns.len(), |i, j| columns[j][i]);
            let penalty = difference_penalty(basis.size());
            for (slot, values) in smooth_values.iter().enumerate() {
                let Some(values) = values else { continue };
                let center = values.iter().sum::<f64>() / n as f64;
                let by = DMatrix::from_fn(n, raw.ncols(), |i, j| (values[i] - center) * raw[(i, j)]);
                let Some(smooth) = side_constrained(&by, &side, &penalty) else {
                    debug!(
                        "[engagement:smoothing] smooth category '{}' is confounded with the model terms",
                        smooth_terms[slot].1
                    );
                    statuses[slot] = SmoothTermStatus::Degenerate;
                    continue;
                };
                let start = columns.len();
                columns.extend(smooth.design.column_iter().map(|c| c.iter().copied().collect()));
                blocks.push(PenaltyBlock::new(
                    BlockRole::Category(slot),
                    start,
                    smooth.penalty,
                    smooth.rank,
                ));
            }
        }

        let p = columns.len();
        let x = DMatrix::from_fn(n, p, |i, j| columns[j][i]);
        let y = DVector::from_vec(y);
        let xtx = x.tr_mul(&x);
        let ridge = RIDGE_SCALE * (xtx.trace() / p as f64).max(1.0);
        let problem = Problem {
            xty: x.tr_mul(&y),
            yty: y.dot(&y),
            xtx,
            n,
            blocks,
            ridge,
        };

        let rho = self.select_smoothing(&problem);
        let solution = problem.solve(&rho);
        let reml_score = solution
            .as_ref()
            .and_then(|solution| problem.reml(&rho, solution));

        let fit = match solution {
            Some(solution) if n > 0 => self.summarize(SummaryInput {
                problem: &problem,
                x: &x,
                y: &y,
                rho: &rho,
                solution,
                parametric_terms: &parametric_terms,
                smooth_terms: &smooth_terms,
                statuses: &statuses,
                baseline: basis.as_ref().zip(baseline_transform.as_ref()),
                distinct_days: &distinct_days,
                dropped_rows,
                reml_score,
            }),
            _ => undefined_fit(n, dropped_rows, &parametric_terms, &smooth_terms, &statuses),
        };

        info!(
            "[engagement:smoothing] fitted {} rows: {} smooth terms, total edf {:.2}, deviance explained {}",
            fit.n_obs,
            fit.smooth_terms.len(),
            fit.total_edf,
            fit.deviance_explained
                .map(|value| format!("{value:.3}"))
                .unwrap_or_else(|| "n/a".into())
        );
        Ok(fit)
    }

    /// Coordinate search on log smoothing parameters: a coarse grid per
    /// coordinate, refined by golden-section search around the best point.
    fn select_smoothing(&self, problem: &Problem) -> Vec<f64> {
        let (lower, upper) = (self.controls.log_lambda_min, self.controls.log_lambda_max);
        let mut rho = vec![0.0_f64.clamp(lower, upper); problem.blocks.len()];
        let grid: Vec<f64> = (0..GRID_POINTS)
            .map(|g| lower + (upper - lower) * g as f64 / (GRID_POINTS - 1) as f64)
            .collect();
        let ratio = (5.0_f64.sqrt() - 1.0) / 2.0;

        for _ in 0..self.controls.sweeps {
            for j in 0..rho.len() {
                let at = |value: f64| {
                    let mut trial = rho.clone();
                    trial[j] = value;
                    problem.criterion(&trial)
                };
                let scores: Vec<f64> = grid.iter().map(|value| at(*value)).collect();
                let best = scores
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(index, _)| index)
                    .unwrap_or(0);

                let mut a = grid[best.saturating_sub(1)];
                let mut b = grid[(best + 1).min(grid.len() - 1)];
                let mut c = b - ratio * (b - a);
                let mut d = a + ratio * (b - a);
                let mut fc = at(c);
                let mut fd = at(d);
                for _ in 0..GOLDEN_ITERATIONS {
                    if fc < fd {
                        b = d;
                        d = c;
                        fd = fc;
                        c = b - ratio * (b - a);
                        fc = at(c);
                    } else {
                        a = c;
                        c = d;
                        fc = fd;
                        d = a + ratio * (b - a);
                        fd = at(d);
                    }
                }
                let refined = 0.5 * (a + b);
                let refined_score = at(refined);
                rho[j] = if refined_score <= scores[best] {
                    refined
                } else {
                    grid[best]
                };
            }
        }
        rho
    }

    fn summarize(&self, input: SummaryInput<'_>) -> SmoothFit {
        let SummaryInput {
            problem,
            x,
            y,
            rho,
            solution,
            parametric_terms,
            smooth_terms,
            statuses,
            baseline,
            distinct_days,
            dropped_rows,
            reml_score,
        } = input;
        let n = problem.n;
        let beta = &solution.beta;
        let inverse = solution.chol.inverse();
        let influence = &inverse * &problem.xtx;
        let edf_of = |start: usize, size: usize| (start..start + size).map(|i| influence[(i, i)]).sum::<f64>();
        let total_edf = influence.trace();

        let residuals = y - x * beta;
        let rss = residuals.dot(&residuals);
        let y_mean = y.mean();
        let tss: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();
        let residual_df = n as f64 - total_edf;
        let scale = (residual_df > 0.0).then(|| rss / residual_df);
        let covariance = scale.map(|scale| &inverse * scale);

        let deviance_explained = (tss > 0.0).then(|| 1.0 - rss / tss);
        let adjusted_r_squared = match (scale, tss > 0.0 && n > 1) {
            (Some(scale), true) => Some(1.0 - scale / (tss / (n - 1) as f64)),
            _ => None,
        };

        let parametric = parametric_terms
            .iter()
            .map(|(term_id, term, column)| {
                let Some(column) = column else {
                    return ParametricRow {
                        term_id: term_id.clone(),
                        term: term.clone(),
                        estimate: None,
                        std_error: None,
                        t_value: None,
                        p_value: None,
                    };
                };
                let estimate = beta[*column];
                let std_error = covariance
                    .as_ref()
                    .map(|cov| cov[(*column, *column)].sqrt())
                    .filter(|se| se.is_finite() && *se > 0.0);
                let t_value = std_error.map(|se| estimate / se);
                ParametricRow {
                    term_id: term_id.clone(),
                    term: term.clone(),
                    estimate: Some(estimate),
                    std_error,
                    t_value,
                    p_value: t_value.and_then(|t| t_two_sided_p(t, residual_df)),
                }
            })
            .collect();

        let mut summaries: Vec<SmoothTermSummary> = smooth_terms
            .iter()
            .zip(statuses)
            .map(|((family, category), status)| SmoothTermSummary {
                family: *family,
                category: category.clone(),
                term: format!("{BASELINE_TERM}:{category}"),
                status: *status,
                edf: 0.0,
                ref_df: None,
                f_statistic: None,
                p_value: None,
                lambda: None,
            })
            .collect();

        let mut baseline_edf = None;
        let mut baseline_lambda = None;
        let mut curve = Vec::new();
        for (block, log_lambda) in problem.blocks.iter().zip(rho) {
            let edf = edf_of(block.start, block.size()).max(0.0);
            match block.role {
                BlockRole::Baseline => {
                    baseline_edf = Some(edf);
                    baseline_lambda = Some(log_lambda.exp());
                    if let Some((basis, transform)) = baseline {
                        let coefficients = beta.rows(block.start, block.size()).into_owned();
                        curve = distinct_days
                            .iter()
                            .map(|day| {
                                let raw = DVector::from_vec(basis.evaluate(f64::from(*day)));
                                let row = transform.tr_mul(&raw);
                                let std_error = covariance.as_ref().map(|cov| {
                                    let block_cov =
                                        cov.view((block.start, block.start), (block.size(), block.size()));
                                    row.dot(&(block_cov * &row)).max(0.0).sqrt()
                                });
                                BaselinePoint {
                                    day: *day,
                                    estimate: row.dot(&coefficients),
                                    std_error,
                                }
                            })
                            .collect();
                    }
                }
                BlockRole::Category(slot) => {
                    let summary = &mut summaries[slot];
                    summary.edf = edf;
                    summary.lambda = Some(log_lambda.exp());
                    if let Some(cov) = &covariance {
                        let coefficients = beta.rows(block.start, block.size()).into_owned();
                        let block_cov = cov
                            .view((block.start, block.start), (block.size(), block.size()))
                            .into_owned();
                        let rank = (edf.round() as usize).clamp(1, block.size());
                        if let Some(statistic) = wald_statistic(&coefficients, block_cov, rank) {
                            let f_statistic = statistic / rank as f64;
                            summary.ref_df = Some(rank as f64);
                            summary.f_statistic = Some(f_statistic);
                            summary.p_value = f_upper_tail(f_statistic, rank as f64, residual_df);
                        }
                    }
                }
            }
        }

        SmoothFit {
            n_obs: n,
            dropped_rows,
            time_smooths: baseline.is_some(),
            deviance_explained,
            adjusted_r_squared,
            scale,
            reml_score,
            total_edf,
            baseline_edf,
            baseline_lambda,
            baseline: curve,
            parametric,
            smooth_terms: summaries,
        }
    }
}

struct SummaryInput<'a> {
    problem: &'a Problem,
    x: &'a DMatrix<f64>,
    y: &'a DVector<f64>,
    rho: &'a [f64],
    solution: Solution,
    parametric_terms: &'a [(PredictorId, String, Option<usize>)],
    smooth_terms: &'a [(CategoryFamily, CategoryName)],
    statuses: &'a [SmoothTermStatus],
    baseline: Option<(&'a BSplineBasis, &'a DMatrix<f64>)>,
    distinct_days: &'a BTreeSet<u32>,
    dropped_rows: usize,
    reml_score: Option<f64>,
}

/// `beta' V^{r-} beta` with a rank-`rank` eigen pseudo-inverse of `V`.
fn wald_statistic(beta: &DVector<f64>, covariance: DMatrix<f64>, rank: usize) -> Option<f64> {
    let eigen = SymmetricEigen::new(covariance);
    let mut order: Vec<usize> = (0..eigen.eigenvalues.len()).collect();
    order.sort_by(|a, b| eigen.eigenvalues[*b].total_cmp(&eigen.eigenvalues[*a]));
    let largest = eigen.eigenvalues[*order.first()?];
    if largest.is_nan() || largest <= 0.0 {
        return None;
    }
    let statistic = order
        .iter()
        .take(rank)
        .filter(|&&k| eigen.eigenvalues[k] > largest * 1e-12)
        .map(|&k| {
            let projection = eigen.eigenvectors.column(k).dot(beta);
            projection * projection / eigen.eigenvalues[k]
        })
        .sum::<f64>();
    statistic.is_finite().then_some(statistic)
}

/// Spread large enough to estimate an effect, relative to the magnitude of
/// the values (scores live on a unit scale, so the floor is 1).
fn is_varying(values: &[f64]) -> bool {
    let Some(variance) = sample_variance(values) else {
        return false;
    };
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    variance.sqrt() > DEGENERATE_SPREAD * mean.abs().max(1.0)
}

/// R-squared of `values` regressed on the day basis; the basis spans the
/// constant, so this is the share of variation that is a function of day.
fn explained_by_day(values: &[f64], raw: &DMatrix<f64>) -> Option<f64> {
    let y = DVector::from_column_slice(values);
    let mean = y.mean();
    let tss: f64 = y.iter().map(|v| (v - mean).powi(2)).sum();
    if tss <= 0.0 {
        return None;
    }
    let coefficients = raw.clone().svd(true, true).solve(&y, 1e-10).ok()?;
    let residuals = &y - raw * coefficients;
    Some(1.0 - residuals.dot(&residuals) / tss)
}

fn undefined_fit(
    n: usize,
    dropped_rows: usize,
    parametric_terms: &[(PredictorId, String, Option<usize>)],
    smooth_terms: &[(CategoryFamily, CategoryName)],
    statuses: &[SmoothTermStatus],
) -> SmoothFit {
    SmoothFit {
        n_obs: n,
        dropped_rows,
        time_smooths: false,
        deviance_explained: None,
        adjusted_r_squared: None,
        scale: None,
        reml_score: None,
        total_edf: 0.0,
        baseline_edf: None,
        baseline_lambda: None,
        baseline: Vec::new(),
        parametric: parametric_terms
            .iter()
            .map(|(term_id, term, _)| ParametricRow {
                term_id: term_id.clone(),
                term: term.clone(),
                estimate: None,
                std_error: None,
                t_value: None,
                p_value: None,
            })
            .collect(),
        smooth_terms: smooth_terms
            .iter()
            .zip(statuses)
            .map(|((family, category), status)| SmoothTermSummary {
                family: *family,
                category: category.clone(),
                term: format!("{BASELINE_TERM}:{category}"),
                status: *status,
                edf: 0.0,
                ref_df: None,
                f_statistic: None,
                p_value: None,
                lambda: None,
            })
            .collect(),
    }
}
