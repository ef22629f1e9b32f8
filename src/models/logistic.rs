/////////////////////////////////////////////////////////////////////////////////////////////\
//
// L1-penalized logistic outcome model for 180-day readmission.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Outcome model
//!
//! Binary logistic regression of readmission on the two exposures and the
//! confounders, fit by penalized maximum likelihood:
//!
//! ```text
//! minimize  -(1/n) * loglik(beta) + lambda * sum_j |beta_j|
//! ```
//!
//! Each outer iteration builds the IRLS quadratic approximation and solves it by
//! cyclic coordinate descent with soft thresholding. Steps that increase the
//! penalized objective are halved, so the last iterate is always the best one seen.
//! When the iteration budget runs out, [`fit_outcome_model`] keeps that iterate
//! and flags the report as not converged, while [`fit_outcome_model_converged`]
//! treats the same situation as an error.

use std::fmt;

use faer::Mat;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use thiserror::Error;

use crate::input::{Dataset, PatientRecord, Variable};
use crate::models::matrix_ops::{map_mat, select_columns, select_entries};
use crate::preprocess::constant_predictors;
use crate::utils::{matrix_is_finite, max_abs_diff, solve_linear_system, usize_to_f64};

/// Penalty strength used by the published analysis.
pub const DEFAULT_L1_STRENGTH: f64 = 0.01;
/// Outer iteration budget used by the published analysis.
pub const DEFAULT_MAX_ITER: usize = 1_000;

const MAX_STEP_HALVINGS: usize = 30;
const MAX_CD_SWEEPS: usize = 1_000;
const CD_TOLERANCE: f64 = 1e-10;
const OBJECTIVE_SLACK: f64 = 1e-12;

/// Penalty applied to the coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Regularization {
    /// Unpenalized maximum likelihood.
    None,
    /// L1 (lasso) penalty on the mean log-likelihood scale.
    #[serde(rename = "l1")]
    Lasso {
        lambda: f64,
        /// Leave the intercept unpenalized.
        #[serde(default)]
        exclude_intercept: bool,
    },
}

impl Regularization {
    #[must_use]
    pub const fn method(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lasso { .. } => "l1",
        }
    }

    #[must_use]
    pub const fn strength(self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Lasso { lambda, .. } => lambda,
        }
    }

    const fn penalty(self) -> (f64, bool) {
        match self {
            Self::None => (0.0, true),
            Self::Lasso {
                lambda,
                exclude_intercept,
            } => (lambda, exclude_intercept),
        }
    }
}

/// Outcome model specification: outcome, ordered predictors, and solver settings.
///
/// No exposure interaction term is part of the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelSpec {
    pub outcome: Variable,
    pub predictors: Vec<Variable>,
    pub regularization: Regularization,
    /// Maximum number of outer (IRLS) iterations.
    pub max_iter: usize,
    /// Convergence tolerance on the largest coefficient change.
    pub tolerance: f64,
    /// Lower bound on IRLS weights.
    pub min_weight: f64,
}

impl Default for ModelSpec {
    fn default() -> Self {
        let mut predictors = vec![Variable::Aphasia, Variable::AnyPim];
        predictors.extend(Variable::CONFOUNDERS);
        Self {
            outcome: Variable::Readmission180,
            predictors,
            regularization: Regularization::Lasso {
                lambda: DEFAULT_L1_STRENGTH,
                exclude_intercept: false,
            },
            max_iter: DEFAULT_MAX_ITER,
            tolerance: 1e-6,
            min_weight: 1e-6,
        }
    }
}

impl ModelSpec {
    /// # Errors
    ///
    /// Returns `FitError` if these settings cannot produce a usable model.
    pub fn validate(&self) -> Result<(), FitError> {
        for exposure in [Variable::Aphasia, Variable::AnyPim] {
            if !self.predictors.contains(&exposure) {
                return Err(FitError::MissingExposure(exposure));
            }
        }
        if self.predictors.contains(&self.outcome) {
            return Err(FitError::OutcomeAsPredictor(self.outcome));
        }
        for (index, predictor) in self.predictors.iter().enumerate() {
            if self.predictors[..index].contains(predictor) {
                return Err(FitError::DuplicatePredictor(*predictor));
            }
        }
        if self.max_iter == 0 {
            return Err(FitError::InvalidIterations);
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(FitError::InvalidTolerance(self.tolerance));
        }
        if !(self.min_weight.is_finite() && self.min_weight > 0.0) {
            return Err(FitError::InvalidTolerance(self.min_weight));
        }
        let strength = self.regularization.strength();
        if !(strength.is_finite() && strength >= 0.0) {
            return Err(FitError::InvalidPenalty(strength));
        }
        Ok(())
    }
}

/// Errors returned by outcome model fitting.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FitError {
    #[error("model predictors must include `{0}`")]
    MissingExposure(Variable),
    #[error("outcome `{0}` cannot also be a predictor")]
    OutcomeAsPredictor(Variable),
    #[error("predictor `{0}` is listed more than once")]
    DuplicatePredictor(Variable),
    #[error("iteration budget must be positive")]
    InvalidIterations,
    #[error("tolerance must be positive and finite, got {0}")]
    InvalidTolerance(f64),
    #[error("penalty strength must be non-negative and finite, got {0}")]
    InvalidPenalty(f64),
    #[error("model failed to converge within {iterations} iterations")]
    NonConvergence { iterations: usize },
    #[error("linear solve failed")]
    SolveFailed,
    #[error("penalized likelihood became non-finite")]
    NonFiniteEstimate,
}

/// Anything that maps a patient record to a predicted outcome probability.
pub trait ProbabilityModel {
    fn predict_record(&self, record: &PatientRecord) -> f64;

    /// One probability per record, in dataset order.
    fn predict(&self, dataset: &Dataset) -> Vec<f64> {
        dataset.iter().map(|record| self.predict_record(record)).collect()
    }
}

/// Coefficient label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Term {
    Intercept,
    Predictor(Variable),
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Intercept => f.write_str("Intercept"),
            Self::Predictor(variable) => write!(f, "{variable}"),
        }
    }
}

/// Immutable fitted outcome model.
#[derive(Debug, Clone)]
pub struct FittedModel {
    outcome: Variable,
    predictors: Vec<Variable>,
    /// Intercept first, then one entry per predictor.
    coefficients: Mat<f64>,
    regularization: Regularization,
}

impl FittedModel {
    /// Assemble a model from known coefficients (intercept first).
    ///
    /// # Panics
    ///
    /// Panics if `coefficients` does not hold one value per predictor plus the intercept.
    #[must_use]
    pub fn from_coefficients(
        predictors: Vec<Variable>,
        coefficients: &[f64],
        regularization: Regularization,
    ) -> Self {
        assert_eq!(
            coefficients.len(),
            predictors.len() + 1,
            "coefficients must cover the intercept and every predictor"
        );
        Self {
            outcome: Variable::Readmission180,
            predictors,
            coefficients: Mat::from_fn(coefficients.len(), 1, |i, _| coefficients[i]),
            regularization,
        }
    }

    #[must_use]
    pub const fn outcome(&self) -> Variable {
        self.outcome
    }

    #[must_use]
    pub fn predictors(&self) -> &[Variable] {
        &self.predictors
    }

    #[must_use]
    pub const fn coefficients(&self) -> &Mat<f64> {
        &self.coefficients
    }

    #[must_use]
    pub const fn regularization(&self) -> Regularization {
        self.regularization
    }

    /// Coefficient for `term`, or `None` if the term is not in the model.
    #[must_use]
    pub fn coefficient(&self, term: Term) -> Option<f64> {
        match term {
            Term::Intercept => Some(self.coefficients[(0, 0)]),
            Term::Predictor(variable) => self
                .predictors
                .iter()
                .position(|p| *p == variable)
                .map(|idx| self.coefficients[(idx + 1, 0)]),
        }
    }

    #[must_use]
    pub fn terms(&self) -> Vec<Term> {
        std::iter::once(Term::Intercept)
            .chain(self.predictors.iter().copied().map(Term::Predictor))
            .collect()
    }

    #[must_use]
    pub fn linear_predictor(&self, record: &PatientRecord) -> f64 {
        self.predictors
            .iter()
            .enumerate()
            .fold(self.coefficients[(0, 0)], |eta, (idx, predictor)| {
                self.coefficients[(idx + 1, 0)].mul_add(record.indicator(*predictor), eta)
            })
    }
}

impl ProbabilityModel for FittedModel {
    fn predict_record(&self, record: &PatientRecord) -> f64 {
        logistic_stable(self.linear_predictor(record))
    }
}

/// Confidence interval bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Significance tier of a two-sided Wald test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Significance {
    NotSignificant,
    P05,
    P01,
    P001,
}

impl Significance {
    #[must_use]
    pub fn from_p_value(p_value: f64) -> Self {
        if p_value < 0.001 {
            Self::P001
        } else if p_value < 0.01 {
            Self::P01
        } else if p_value < 0.05 {
            Self::P05
        } else {
            Self::NotSignificant
        }
    }

    #[must_use]
    pub const fn marker(self) -> &'static str {
        match self {
            Self::NotSignificant => "",
            Self::P05 => "*",
            Self::P01 => "**",
            Self::P001 => "***",
        }
    }
}

/// One row of the coefficient report.
///
/// Coefficients shrunk to exactly zero by the penalty are trimmed from the
/// covariance; their inference fields are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientRow {
    pub term: Term,
    pub coefficient: f64,
    pub std_error: Option<f64>,
    pub odds_ratio: f64,
    pub odds_ratio_ci: Option<ConfidenceInterval>,
    pub p_value: Option<f64>,
    pub significance: Significance,
}

/// Likelihood-based fit statistics, evaluated at the penalized estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitStatistics {
    pub n_obs: usize,
    /// Parameters with a non-zero estimate (intercept included).
    pub n_active: usize,
    pub log_likelihood: f64,
    pub null_log_likelihood: f64,
    /// McFadden pseudo R², undefined when the outcome is constant.
    pub pseudo_r2: Option<f64>,
    pub aic: f64,
    pub bic: f64,
}

/// Diagnostics and inference produced alongside a fitted model.
#[derive(Debug, Clone, PartialEq)]
pub struct FitReport {
    pub iterations: usize,
    pub converged: bool,
    pub coefficients: Vec<CoefficientRow>,
    pub statistics: FitStatistics,
}

impl FitReport {
    #[must_use]
    pub fn row(&self, term: Term) -> Option<&CoefficientRow> {
        self.coefficients.iter().find(|row| row.term == term)
    }
}

#[derive(Debug, Clone)]
struct LogitSolution {
    beta: Mat<f64>,
    iterations: usize,
    converged: bool,
}

/// Fit the outcome model and build the coefficient report.
///
/// Non-convergence is tolerated: the best iterate is returned and
/// `FitReport::converged` is false.
///
/// # Errors
///
/// Returns `FitError` if the model settings are invalid or the solver breaks down.
///
/// # Examples
///
/// ```
/// use clinical_impact::{Dataset, ModelSpec, PatientRecord, fit_outcome_model};
///
/// let records = (0..40)
///     .map(|i| PatientRecord {
///         readmitted: i % 3 == 0 || (i % 4 == 0 && i % 5 != 0),
///         aphasia: i % 2 == 0,
///         any_pim: i % 4 == 0,
///         ..PatientRecord::default()
///     })
///     .collect();
/// let dataset = Dataset::new(records).expect("non-empty");
///
/// let (model, report) = fit_outcome_model(&dataset, &ModelSpec::default()).expect("fit");
/// assert_eq!(report.coefficients.len(), model.predictors().len() + 1);
/// assert!(report.converged);
/// ```
pub fn fit_outcome_model(
    dataset: &Dataset,
    spec: &ModelSpec,
) -> Result<(FittedModel, FitReport), FitError> {
    spec.validate()?;
    let x = dataset.design_matrix(&spec.predictors);
    let y = dataset.indicator_column(spec.outcome);

    let constant = constant_predictors(&x, &spec.predictors);
    if !constant.is_empty() {
        warn!(
            "predictors without variation in this cohort: {}",
            constant
                .iter()
                .map(|variable| variable.column())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let solution = fit_logit_penalized(&x, &y, spec)?;
    if solution.converged {
        debug!(
            "outcome model converged after {} iterations",
            solution.iterations
        );
    } else {
        warn!(
            "outcome model did not converge within {} iterations; keeping the best iterate",
            solution.iterations
        );
    }

    let coefficients = coefficient_report(&x, &solution.beta, &spec.predictors, spec.min_weight);
    let statistics = fit_statistics(&x, &y, &solution.beta);
    let report = FitReport {
        iterations: solution.iterations,
        converged: solution.converged,
        coefficients,
        statistics,
    };
    Ok((build_model(spec, solution.beta), report))
}

/// Fit the outcome model, treating non-convergence as an error.
///
/// Used for bootstrap replicates, where a struggling fit discards the replicate.
///
/// # Errors
///
/// Returns `FitError::NonConvergence` if the iteration budget is exhausted,
/// or any other `FitError` from validation and the solver.
pub fn fit_outcome_model_converged(
    dataset: &Dataset,
    spec: &ModelSpec,
) -> Result<FittedModel, FitError> {
    spec.validate()?;
    let x = dataset.design_matrix(&spec.predictors);
    let y = dataset.indicator_column(spec.outcome);
    let solution = fit_logit_penalized(&x, &y, spec)?;
    if !solution.converged {
        return Err(FitError::NonConvergence {
            iterations: solution.iterations,
        });
    }
    Ok(build_model(spec, solution.beta))
}

fn build_model(spec: &ModelSpec, beta: Mat<f64>) -> FittedModel {
    FittedModel {
        outcome: spec.outcome,
        predictors: spec.predictors.clone(),
        coefficients: beta,
        regularization: spec.regularization,
    }
}

/// Stable logistic transform.
#[must_use]
pub fn logistic_stable(value: f64) -> f64 {
    if value >= 0.0 {
        let z = (-value).exp();
        1.0 / (1.0 + z)
    } else {
        let z = value.exp();
        z / (1.0 + z)
    }
}

fn fit_logit_penalized(
    x: &Mat<f64>,
    y: &Mat<f64>,
    spec: &ModelSpec,
) -> Result<LogitSolution, FitError> {
    let n = x.nrows();
    let n_f = usize_to_f64(n);
    let (lambda, exclude_intercept) = spec.regularization.penalty();

    let mut beta = Mat::<f64>::zeros(x.ncols(), 1);
    let prevalence = (0..n).map(|i| y[(i, 0)]).sum::<f64>() / n_f;
    let clamped = prevalence.clamp(1e-4, 1.0 - 1e-4);
    beta[(0, 0)] = (clamped / (1.0 - clamped)).ln();

    let mut objective = penalized_objective(x, y, &beta, lambda, exclude_intercept);
    if !objective.is_finite() {
        return Err(FitError::NonFiniteEstimate);
    }

    for iteration in 0..spec.max_iter {
        let eta = x * &beta;
        let p = map_mat(&eta, logistic_stable);
        let irls_weights = Mat::from_fn(n, 1, |i, _| {
            (p[(i, 0)] * (1.0 - p[(i, 0)])).max(spec.min_weight)
        });
        let z = Mat::from_fn(n, 1, |i, _| {
            eta[(i, 0)] + (y[(i, 0)] - p[(i, 0)]) / irls_weights[(i, 0)]
        });
        let scaled = Mat::from_fn(n, 1, |i, _| irls_weights[(i, 0)] / n_f);

        let proposal = if lambda > 0.0 {
            lasso_wls(x, &scaled, &z, &beta, lambda, exclude_intercept)?
        } else {
            weighted_least_squares(x, &scaled, &z)?
        };

        let mut trial = proposal;
        let mut trial_objective = penalized_objective(x, y, &trial, lambda, exclude_intercept);
        let mut halvings = 0;
        while (!trial_objective.is_finite()
            || trial_objective > objective + OBJECTIVE_SLACK * objective.abs().max(1.0))
            && halvings < MAX_STEP_HALVINGS
        {
            trial = Mat::from_fn(trial.nrows(), 1, |j, _| {
                0.5f64.mul_add(trial[(j, 0)] - beta[(j, 0)], beta[(j, 0)])
            });
            trial_objective = penalized_objective(x, y, &trial, lambda, exclude_intercept);
            halvings += 1;
        }
        if halvings > 0 {
            debug!("iteration {iteration}: step halved {halvings} times");
        }

        if !trial_objective.is_finite() {
            return Err(FitError::NonFiniteEstimate);
        }
        if trial_objective > objective + OBJECTIVE_SLACK * objective.abs().max(1.0) {
            // No descent direction left at working precision.
            return Ok(LogitSolution {
                beta,
                iterations: iteration + 1,
                converged: true,
            });
        }

        let change = max_abs_diff(&trial, &beta);
        debug!(
            "iteration {iteration}: objective {trial_objective:.10}, \
             max coefficient change {change:.3e}"
        );
        beta = trial;
        objective = trial_objective;
        if change < spec.tolerance {
            return Ok(LogitSolution {
                beta,
                iterations: iteration + 1,
                converged: true,
            });
        }
    }

    Ok(LogitSolution {
        beta,
        iterations: spec.max_iter,
        converged: false,
    })
}

fn penalized_objective(
    x: &Mat<f64>,
    y: &Mat<f64>,
    beta: &Mat<f64>,
    lambda: f64,
    exclude_intercept: bool,
) -> f64 {
    let n_f = usize_to_f64(x.nrows());
    let penalty = (0..beta.nrows())
        .filter(|&j| !(exclude_intercept && j == 0))
        .map(|j| beta[(j, 0)].abs())
        .sum::<f64>();
    lambda.mul_add(penalty, -log_likelihood(x, y, beta) / n_f)
}

fn log_likelihood(x: &Mat<f64>, y: &Mat<f64>, beta: &Mat<f64>) -> f64 {
    let eta = x * beta;
    (0..eta.nrows())
        .map(|i| y[(i, 0)].mul_add(eta[(i, 0)], -log1p_exp(eta[(i, 0)])))
        .sum()
}

// log(1 + exp(value)) without overflow.
fn log1p_exp(value: f64) -> f64 {
    if value > 0.0 {
        value + (-value).exp().ln_1p()
    } else {
        value.exp().ln_1p()
    }
}

fn lasso_wls(
    x: &Mat<f64>,
    weights: &Mat<f64>,
    z: &Mat<f64>,
    start: &Mat<f64>,
    lambda: f64,
    exclude_intercept: bool,
) -> Result<Mat<f64>, FitError> {
    let n = x.nrows();
    let p = x.ncols();
    let mut beta = start.clone();
    let fitted = x * &beta;
    let mut residual = Mat::from_fn(n, 1, |i, _| z[(i, 0)] - fitted[(i, 0)]);

    let mut col_norms = vec![0.0; p];
    for (j, col_norm) in col_norms.iter_mut().enumerate() {
        let mut norm = 0.0;
        for i in 0..n {
            let xij = x[(i, j)];
            norm += weights[(i, 0)] * xij * xij;
        }
        *col_norm = norm.max(1e-12);
    }

    for _ in 0..MAX_CD_SWEEPS {
        let mut max_delta = 0.0;
        for j in 0..p {
            let mut rho = 0.0;
            for i in 0..n {
                rho += weights[(i, 0)] * x[(i, j)] * residual[(i, 0)];
            }
            rho += col_norms[j] * beta[(j, 0)];

            let new_beta = if exclude_intercept && j == 0 {
                rho / col_norms[j]
            } else {
                soft_threshold(rho, lambda) / col_norms[j]
            };

            let delta = new_beta - beta[(j, 0)];
            if delta != 0.0 {
                for i in 0..n {
                    residual[(i, 0)] -= x[(i, j)] * delta;
                }
            }
            if delta.abs() > max_delta {
                max_delta = delta.abs();
            }
            beta[(j, 0)] = new_beta;
        }

        if max_delta < CD_TOLERANCE {
            break;
        }
    }

    if !matrix_is_finite(&beta) {
        return Err(FitError::SolveFailed);
    }
    Ok(beta)
}

fn soft_threshold(value: f64, penalty: f64) -> f64 {
    if value > penalty {
        value - penalty
    } else if value < -penalty {
        value + penalty
    } else {
        0.0
    }
}

fn weighted_least_squares(
    x: &Mat<f64>,
    weights: &Mat<f64>,
    z: &Mat<f64>,
) -> Result<Mat<f64>, FitError> {
    let xtwx = weighted_xtx(x, weights);
    let xtwz = weighted_xtz(x, weights, z);
    solve_linear_system(&xtwx, &xtwz)
}

fn weighted_xtx(x: &Mat<f64>, weights: &Mat<f64>) -> Mat<f64> {
    let n = x.nrows();
    let p = x.ncols();
    let mut xtx = Mat::<f64>::zeros(p, p);
    for i in 0..n {
        let w = weights[(i, 0)];
        for col_i in 0..p {
            let wxi = w * x[(i, col_i)];
            for col_j in 0..p {
                xtx[(col_i, col_j)] += wxi * x[(i, col_j)];
            }
        }
    }
    xtx
}

fn weighted_xtz(x: &Mat<f64>, weights: &Mat<f64>, z: &Mat<f64>) -> Mat<f64> {
    let n = x.nrows();
    let p = x.ncols();
    let mut xtz = Mat::<f64>::zeros(p, 1);
    for i in 0..n {
        let wz = weights[(i, 0)] * z[(i, 0)];
        for col in 0..p {
            xtz[(col, 0)] += x[(i, col)] * wz;
        }
    }
    xtz
}

fn coefficient_report(
    x: &Mat<f64>,
    beta: &Mat<f64>,
    predictors: &[Variable],
    min_weight: f64,
) -> Vec<CoefficientRow> {
    let active = (0..beta.nrows())
        .filter(|&j| j == 0 || beta[(j, 0)] != 0.0)
        .collect::<Vec<_>>();
    let std_errors = active_std_errors(x, beta, &active, min_weight);
    let z = normal_quantile(0.975);
    let normal = Normal::new(0.0, 1.0).ok();

    (0..beta.nrows())
        .map(|j| {
            let term = if j == 0 {
                Term::Intercept
            } else {
                Term::Predictor(predictors[j - 1])
            };
            let coefficient = beta[(j, 0)];
            let std_error = std_errors
                .as_ref()
                .and_then(|se| active.iter().position(|&a| a == j).map(|pos| se[(pos, 0)]))
                .filter(|se| se.is_finite() && *se > 0.0);
            let odds_ratio_ci = std_error.map(|se| ConfidenceInterval {
                lower: z.mul_add(-se, coefficient).exp(),
                upper: z.mul_add(se, coefficient).exp(),
            });
            let p_value = match (std_error, normal.as_ref()) {
                (Some(se), Some(normal)) => Some(2.0 * normal.sf((coefficient / se).abs())),
                _ => None,
            };
            CoefficientRow {
                term,
                coefficient,
                std_error,
                odds_ratio: coefficient.exp(),
                odds_ratio_ci,
                p_value,
                significance: p_value
                    .map_or(Significance::NotSignificant, Significance::from_p_value),
            }
        })
        .collect()
}

fn active_std_errors(
    x: &Mat<f64>,
    beta: &Mat<f64>,
    active: &[usize],
    min_weight: f64,
) -> Option<Mat<f64>> {
    let x_active = select_columns(x, active);
    let beta_active = select_entries(beta, active);
    let eta = &x_active * &beta_active;
    let weights = Mat::from_fn(eta.nrows(), 1, |i, _| {
        let p = logistic_stable(eta[(i, 0)]);
        (p * (1.0 - p)).max(min_weight)
    });
    let information = weighted_xtx(&x_active, &weights);
    let identity = Mat::<f64>::identity(information.nrows(), information.ncols());
    match solve_linear_system(&information, &identity) {
        Ok(covariance) => Some(Mat::from_fn(covariance.nrows(), 1, |i, _| {
            covariance[(i, i)].max(0.0).sqrt()
        })),
        Err(err) => {
            warn!("coefficient covariance unavailable: {err}");
            None
        }
    }
}

fn fit_statistics(x: &Mat<f64>, y: &Mat<f64>, beta: &Mat<f64>) -> FitStatistics {
    let n_obs = x.nrows();
    let n_f = usize_to_f64(n_obs);
    let n_active = (0..beta.nrows())
        .filter(|&j| j == 0 || beta[(j, 0)] != 0.0)
        .count();
    let k = usize_to_f64(n_active);

    let log_likelihood = log_likelihood(x, y, beta);
    let prevalence = (0..n_obs).map(|i| y[(i, 0)]).sum::<f64>() / n_f;
    let null_log_likelihood = if prevalence <= 0.0 || prevalence >= 1.0 {
        0.0
    } else {
        n_f * prevalence.mul_add(prevalence.ln(), (1.0 - prevalence) * (1.0 - prevalence).ln())
    };
    let pseudo_r2 = (null_log_likelihood < 0.0).then(|| 1.0 - log_likelihood / null_log_likelihood);

    FitStatistics {
        n_obs,
        n_active,
        log_likelihood,
        null_log_likelihood,
        pseudo_r2,
        aic: (-2.0f64).mul_add(log_likelihood, 2.0 * k),
        bic: (-2.0f64).mul_add(log_likelihood, k * n_f.ln()),
    }
}

fn normal_quantile(p: f64) -> f64 {
    Normal::new(0.0, 1.0).map_or(f64::NAN, |normal| normal.inverse_cdf(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Confounders;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{RngExt, SeedableRng};

    fn simulated_cohort(n: usize, seed: u64) -> Dataset {
        let mut rng = StdRng::seed_from_u64(seed);
        let records = (0..n)
            .map(|_| {
                let aphasia = rng.random::<f64>() < 0.3;
                let any_pim = rng.random::<f64>() < if aphasia { 0.5 } else { 0.3 };
                let depression = rng.random::<f64>() < 0.25;
                let eta = 0.4f64.mul_add(
                    f64::from(u8::from(depression)),
                    0.9f64.mul_add(
                        f64::from(u8::from(any_pim)),
                        0.6f64.mul_add(f64::from(u8::from(aphasia)), -1.5),
                    ),
                );
                PatientRecord {
                    readmitted: rng.random::<f64>() < logistic_stable(eta),
                    aphasia,
                    any_pim,
                    confounders: Confounders {
                        depression,
                        anxiety: rng.random::<f64>() < 0.2,
                        ..Confounders::default()
                    },
                }
            })
            .collect();
        Dataset::new(records).expect("non-empty cohort")
    }

    fn separated_cohort() -> Dataset {
        // Outcome equals the PIM indicator exactly.
        Dataset::new(vec![
            PatientRecord {
                readmitted: true,
                aphasia: true,
                any_pim: true,
                ..PatientRecord::default()
            },
            PatientRecord {
                readmitted: false,
                aphasia: true,
                any_pim: false,
                ..PatientRecord::default()
            },
            PatientRecord {
                readmitted: true,
                aphasia: false,
                any_pim: true,
                ..PatientRecord::default()
            },
            PatientRecord {
                readmitted: false,
                aphasia: false,
                any_pim: false,
                ..PatientRecord::default()
            },
        ])
        .expect("non-empty")
    }

    #[test]
    fn fit_recovers_exposure_effects_on_simulated_cohort() {
        let dataset = simulated_cohort(3_000, 42);
        let (model, report) = fit_outcome_model(&dataset, &ModelSpec::default()).expect("fit");
        assert!(report.converged);
        let pim = model
            .coefficient(Term::Predictor(Variable::AnyPim))
            .expect("pim coefficient");
        let aphasia = model
            .coefficient(Term::Predictor(Variable::Aphasia))
            .expect("aphasia coefficient");
        assert!(pim > 0.5 && pim < 1.3, "pim coefficient {pim}");
        assert!(aphasia > 0.2 && aphasia < 1.0, "aphasia coefficient {aphasia}");

        let row = report.row(Term::Predictor(Variable::AnyPim)).expect("pim row");
        assert_relative_eq!(row.odds_ratio, pim.exp());
        let ci = row.odds_ratio_ci.expect("active coefficient has a CI");
        assert!(ci.lower < row.odds_ratio && row.odds_ratio < ci.upper);
        assert_eq!(row.significance, Significance::P001);
    }

    #[test]
    fn lasso_zeroes_predictors_without_variation() {
        let dataset = simulated_cohort(500, 7);
        let (model, report) = fit_outcome_model(&dataset, &ModelSpec::default()).expect("fit");
        let seizure = model
            .coefficient(Term::Predictor(Variable::Seizure))
            .expect("seizure is a predictor");
        assert_eq!(seizure, 0.0);
        let row = report.row(Term::Predictor(Variable::Seizure)).expect("row");
        assert!(row.std_error.is_none());
        assert!(row.p_value.is_none());
        assert_eq!(row.significance, Significance::NotSignificant);
        assert!(report.statistics.n_active < model.terms().len());
    }

    #[test]
    fn penalty_keeps_separated_fit_finite() {
        let dataset = separated_cohort();
        let (model, report) = fit_outcome_model(&dataset, &ModelSpec::default()).expect("fit");
        assert!(report.converged);
        let pim = model
            .coefficient(Term::Predictor(Variable::AnyPim))
            .expect("pim coefficient");
        assert!(pim.is_finite() && pim > 0.0);
        let predictions = model.predict(&dataset);
        assert!(predictions[0] > predictions[1]);
        assert!(predictions.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn unpenalized_fit_is_not_shrunk() {
        let dataset = simulated_cohort(2_000, 5);
        let exposures_only = |regularization| ModelSpec {
            predictors: vec![Variable::Aphasia, Variable::AnyPim],
            regularization,
            ..ModelSpec::default()
        };
        let plain = fit_outcome_model_converged(&dataset, &exposures_only(Regularization::None))
            .expect("unpenalized fit");
        let lasso = fit_outcome_model_converged(
            &dataset,
            &exposures_only(Regularization::Lasso {
                lambda: 0.05,
                exclude_intercept: true,
            }),
        )
        .expect("penalized fit");
        let term = Term::Predictor(Variable::AnyPim);
        let plain_pim = plain.coefficient(term).expect("pim");
        let lasso_pim = lasso.coefficient(term).expect("pim");
        assert!(plain_pim > lasso_pim, "{plain_pim} vs {lasso_pim}");
        assert!(lasso_pim >= 0.0);
    }

    #[test]
    fn iteration_budget_is_tolerated_for_the_primary_fit_only() {
        let dataset = simulated_cohort(400, 3);
        let spec = ModelSpec {
            max_iter: 1,
            tolerance: 1e-14,
            ..ModelSpec::default()
        };
        let (_model, report) = fit_outcome_model(&dataset, &spec).expect("tolerant fit");
        assert!(!report.converged);
        assert_eq!(report.iterations, 1);

        let err = fit_outcome_model_converged(&dataset, &spec).expect_err("strict fit");
        assert_eq!(err, FitError::NonConvergence { iterations: 1 });
    }

    #[test]
    fn spec_validation_rejects_malformed_predictor_lists() {
        let missing = ModelSpec {
            predictors: vec![Variable::Aphasia],
            ..ModelSpec::default()
        };
        assert_eq!(
            missing.validate(),
            Err(FitError::MissingExposure(Variable::AnyPim))
        );

        let mut duplicated = ModelSpec::default();
        duplicated.predictors.push(Variable::Ptsd);
        assert_eq!(
            duplicated.validate(),
            Err(FitError::DuplicatePredictor(Variable::Ptsd))
        );

        let mut outcome = ModelSpec::default();
        outcome.predictors.push(Variable::Readmission180);
        assert_eq!(
            outcome.validate(),
            Err(FitError::OutcomeAsPredictor(Variable::Readmission180))
        );

        let negative = ModelSpec {
            regularization: Regularization::Lasso {
                lambda: -1.0,
                exclude_intercept: false,
            },
            ..ModelSpec::default()
        };
        assert_eq!(negative.validate(), Err(FitError::InvalidPenalty(-1.0)));
    }

    #[test]
    fn fit_statistics_are_consistent() {
        let dataset = simulated_cohort(800, 11);
        let (_model, report) = fit_outcome_model(&dataset, &ModelSpec::default()).expect("fit");
        let stats = report.statistics;
        assert_eq!(stats.n_obs, 800);
        assert!(stats.log_likelihood < 0.0);
        assert!(stats.log_likelihood > stats.null_log_likelihood);
        let r2 = stats.pseudo_r2.expect("outcome varies");
        assert!(r2 > 0.0 && r2 < 1.0);
        assert_relative_eq!(
            stats.aic,
            2.0f64.mul_add(usize_to_f64(stats.n_active), -2.0 * stats.log_likelihood),
            epsilon = 1e-9
        );
    }

    #[test]
    fn significance_tiers_follow_thresholds() {
        assert_eq!(Significance::from_p_value(0.0005), Significance::P001);
        assert_eq!(Significance::from_p_value(0.005), Significance::P01);
        assert_eq!(Significance::from_p_value(0.03), Significance::P05);
        assert_eq!(Significance::from_p_value(0.5), Significance::NotSignificant);
        assert_eq!(Significance::P01.marker(), "**");
    }

    #[test]
    fn from_coefficients_predicts_logistic_of_linear_predictor() {
        let model = FittedModel::from_coefficients(
            vec![Variable::Aphasia, Variable::AnyPim],
            &[-1.0, 0.5, 0.25],
            Regularization::None,
        );
        let record = PatientRecord {
            aphasia: true,
            any_pim: true,
            ..PatientRecord::default()
        };
        assert_relative_eq!(model.linear_predictor(&record), -0.25);
        assert_relative_eq!(model.predict_record(&record), 1.0 / (1.0 + 0.25f64.exp()));
        assert_eq!(model.coefficient(Term::Predictor(Variable::Seizure)), None);
    }

    #[test]
    fn logistic_stable_is_symmetric() {
        assert_relative_eq!(logistic_stable(0.0), 0.5);
        assert_relative_eq!(logistic_stable(3.0) + logistic_stable(-3.0), 1.0);
        assert!(logistic_stable(-800.0) >= 0.0);
    }
}
