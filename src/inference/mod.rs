//! Nonparametric bootstrap for the four scenario probabilities.
//!
//! Iteration `i` resamples the dataset with replacement using seed
//! `seed + i`, refits the outcome model, and evaluates all four scenarios on
//! the resample. A failed refit discards the whole iteration; it is counted
//! and logged, never retried. Iterations may be spread over worker threads:
//! each worker takes every `threads`-th iteration and the results are merged
//! in iteration order, so the draws do not depend on the thread count.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::input::Dataset;
use crate::models::logistic::{
    FitError, FittedModel, ModelSpec, ProbabilityModel, fit_outcome_model_converged,
};
use crate::models::scenario::{Scenario, ScenarioProbabilities, predict_scenarios};
use crate::utils::{mean, percentile};

const PROGRESS_INTERVAL: usize = 100;

/// Errors returned by the bootstrap estimator.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BootstrapError {
    #[error("bootstrap iterations must be positive")]
    InvalidIterations,
    #[error("worker thread count must be positive")]
    InvalidThreads,
    #[error("time limit must be positive and finite, got {0}")]
    InvalidTimeLimit(f64),
    #[error("confidence level must be in (0, 1), got {0}")]
    InvalidConfidenceLevel(f64),
    #[error("no successful bootstrap iterations ({failed} of {attempted} attempted failed)")]
    NoSuccessfulIterations { attempted: usize, failed: usize },
    #[error("bootstrap worker thread panicked")]
    WorkerPanicked,
}

/// Bootstrap schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootstrapOptions {
    /// Iteration cap.
    pub iterations: usize,
    /// Base seed; iteration `i` uses `seed + i`.
    pub seed: u64,
    /// Worker threads.
    pub threads: usize,
    /// Wall-clock budget in seconds. Iterations not started in time are skipped.
    pub time_limit_secs: Option<f64>,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            iterations: 1_000,
            seed: 0,
            threads: 1,
            time_limit_secs: None,
        }
    }
}

impl BootstrapOptions {
    /// # Errors
    ///
    /// Returns `BootstrapError` if the schedule cannot run.
    pub fn validate(self) -> Result<(), BootstrapError> {
        if self.iterations == 0 {
            return Err(BootstrapError::InvalidIterations);
        }
        if self.threads == 0 {
            return Err(BootstrapError::InvalidThreads);
        }
        if let Some(limit) = self.time_limit_secs
            && !(limit.is_finite() && limit > 0.0)
        {
            return Err(BootstrapError::InvalidTimeLimit(limit));
        }
        Ok(())
    }

    #[must_use]
    pub fn iteration_seed(self, iteration: usize) -> u64 {
        self.seed
            .wrapping_add(u64::try_from(iteration).unwrap_or(u64::MAX))
    }
}

/// Refits the outcome model on a bootstrap resample.
///
/// Implementations are shared across worker threads.
pub trait ReplicateFitter: Sync {
    type Model: ProbabilityModel;

    /// # Errors
    ///
    /// Returns `FitError` when the replicate cannot be fit; the iteration is discarded.
    fn fit_replicate(&self, sample: &Dataset, iteration: usize) -> Result<Self::Model, FitError>;
}

impl ReplicateFitter for ModelSpec {
    type Model = FittedModel;

    fn fit_replicate(&self, sample: &Dataset, _iteration: usize) -> Result<FittedModel, FitError> {
        fit_outcome_model_converged(sample, self)
    }
}

/// Result of one bootstrap iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicateOutcome {
    Success(ScenarioProbabilities),
    Failure(FitError),
}

/// A discarded iteration and why.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicateFailure {
    pub iteration: usize,
    pub error: FitError,
}

/// Raw bootstrap draws plus run accounting.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BootstrapRun {
    /// Iterations that were started.
    pub attempted: usize,
    /// Successful iterations, in iteration order.
    pub successes: Vec<(usize, ScenarioProbabilities)>,
    pub failures: Vec<ReplicateFailure>,
    /// Iterations skipped because the time limit was reached.
    pub not_started: usize,
}

impl BootstrapRun {
    #[must_use]
    pub fn successful(&self) -> usize {
        self.successes.len()
    }

    /// Draws for `scenario`, in iteration order.
    #[must_use]
    pub fn draws(&self, scenario: Scenario) -> Vec<f64> {
        self.successes
            .iter()
            .map(|(_, probabilities)| probabilities.get(scenario))
            .collect()
    }

    /// Mean and percentile interval for every scenario.
    ///
    /// # Errors
    ///
    /// Returns `BootstrapError::NoSuccessfulIterations` if every iteration failed or
    /// none was started, or `InvalidConfidenceLevel` for a level outside `(0, 1)`.
    pub fn summarize(&self, confidence_level: f64) -> Result<ScenarioIntervals, BootstrapError> {
        validate_confidence_level(confidence_level)?;
        if self.successes.is_empty() {
            return Err(BootstrapError::NoSuccessfulIterations {
                attempted: self.attempted,
                failed: self.failures.len(),
            });
        }
        let tail = (1.0 - confidence_level) / 2.0;
        let mut intervals = ScenarioIntervals::new();
        for scenario in Scenario::ALL {
            let mut draws = self.draws(scenario);
            draws.sort_by(f64::total_cmp);
            intervals.insert(
                scenario,
                ScenarioInterval {
                    mean: mean(&draws).unwrap_or(f64::NAN),
                    lower: percentile(&draws, tail),
                    upper: percentile(&draws, 1.0 - tail),
                    draws: draws.len(),
                },
            );
        }
        Ok(intervals)
    }
}

/// Bootstrap mean and percentile bounds for one scenario.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenarioInterval {
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
    /// Successful iterations behind the estimate.
    pub draws: usize,
}

/// Interval estimate per scenario.
pub type ScenarioIntervals = BTreeMap<Scenario, ScenarioInterval>;

/// # Errors
///
/// Returns `BootstrapError::InvalidConfidenceLevel` unless `0 < level < 1`.
pub fn validate_confidence_level(level: f64) -> Result<(), BootstrapError> {
    if level > 0.0 && level < 1.0 {
        Ok(())
    } else {
        Err(BootstrapError::InvalidConfidenceLevel(level))
    }
}

/// Row indices of a same-size resample with replacement.
#[must_use]
pub fn resample_indices(len: usize, seed: u64) -> Vec<usize> {
    if len == 0 {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random_range(0..len)).collect()
}

/// Run the bootstrap, honouring `options.time_limit_secs`.
///
/// # Errors
///
/// Returns `BootstrapError` for invalid options or a panicked worker. Failed
/// iterations are recorded in the returned run, not raised.
pub fn bootstrap_scenarios<F: ReplicateFitter>(
    dataset: &Dataset,
    fitter: &F,
    options: BootstrapOptions,
) -> Result<BootstrapRun, BootstrapError> {
    options.validate()?;
    let deadline = options
        .time_limit_secs
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .and_then(|budget| Instant::now().checked_add(budget));
    bootstrap_scenarios_until(dataset, fitter, options, deadline)
}

/// Run the bootstrap with an explicit deadline; no iteration starts after it.
///
/// # Errors
///
/// Returns `BootstrapError` for invalid options or a panicked worker.
pub fn bootstrap_scenarios_until<F: ReplicateFitter>(
    dataset: &Dataset,
    fitter: &F,
    options: BootstrapOptions,
    deadline: Option<Instant>,
) -> Result<BootstrapRun, BootstrapError> {
    options.validate()?;
    let workers = options.threads.min(options.iterations);
    let progress = AtomicUsize::new(0);

    let mut results = std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let progress = &progress;
            handles.push(scope.spawn(move || {
                let mut local = Vec::new();
                for iteration in (worker..options.iterations).step_by(workers) {
                    if deadline.is_some_and(|limit| Instant::now() >= limit) {
                        break;
                    }
                    local.push((iteration, run_replicate(dataset, fitter, options, iteration)));
                    let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
                    if done % PROGRESS_INTERVAL == 0 {
                        debug!("bootstrap progress: {done}/{}", options.iterations);
                    }
                }
                local
            }));
        }

        let mut merged = Vec::with_capacity(options.iterations);
        for handle in handles {
            merged.extend(handle.join().map_err(|_| BootstrapError::WorkerPanicked)?);
        }
        Ok::<_, BootstrapError>(merged)
    })?;
    results.sort_by_key(|(iteration, _)| *iteration);

    let mut run = BootstrapRun {
        attempted: results.len(),
        not_started: options.iterations - results.len(),
        ..BootstrapRun::default()
    };
    for (iteration, outcome) in results {
        match outcome {
            ReplicateOutcome::Success(probabilities) => {
                run.successes.push((iteration, probabilities));
            }
            ReplicateOutcome::Failure(error) => {
                warn!("bootstrap iteration {iteration} discarded: {error}");
                run.failures.push(ReplicateFailure { iteration, error });
            }
        }
    }
    if run.not_started > 0 {
        warn!(
            "time limit reached; {} of {} bootstrap iterations not started",
            run.not_started, options.iterations
        );
    }
    debug!(
        "bootstrap finished: {} successful, {} failed, {} not started",
        run.successful(),
        run.failures.len(),
        run.not_started
    );
    Ok(run)
}

/// Bootstrap the scenario probabilities and summarize them at `confidence_level`.
///
/// # Errors
///
/// Returns `BootstrapError` for invalid options, a panicked worker, or when no
/// iteration succeeded.
///
/// # Examples
///
/// ```
/// use clinical_impact::{BootstrapOptions, Dataset, ModelSpec, PatientRecord, Scenario};
/// use clinical_impact::bootstrap_confidence_intervals;
///
/// let records = (0..60)
///     .map(|i| PatientRecord {
///         readmitted: i % 3 == 0,
///         aphasia: i % 2 == 0,
///         any_pim: i % 5 < 2,
///         ..PatientRecord::default()
///     })
///     .collect();
/// let dataset = Dataset::new(records).expect("non-empty");
/// let options = BootstrapOptions { iterations: 20, ..BootstrapOptions::default() };
///
/// let intervals = bootstrap_confidence_intervals(&dataset, &ModelSpec::default(), options, 0.95)
///     .expect("bootstrap");
/// let interval = intervals[&Scenario::AphasiaPim];
/// assert!(interval.lower <= interval.mean && interval.mean <= interval.upper);
/// ```
pub fn bootstrap_confidence_intervals<F: ReplicateFitter>(
    dataset: &Dataset,
    fitter: &F,
    options: BootstrapOptions,
    confidence_level: f64,
) -> Result<ScenarioIntervals, BootstrapError> {
    validate_confidence_level(confidence_level)?;
    bootstrap_scenarios(dataset, fitter, options)?.summarize(confidence_level)
}

fn run_replicate<F: ReplicateFitter>(
    dataset: &Dataset,
    fitter: &F,
    options: BootstrapOptions,
    iteration: usize,
) -> ReplicateOutcome {
    let indices = resample_indices(dataset.len(), options.iteration_seed(iteration));
    let sample = dataset.resample(&indices);
    match fitter.fit_replicate(&sample, iteration) {
        Ok(model) => ReplicateOutcome::Success(predict_scenarios(&model, &sample)),
        Err(error) => ReplicateOutcome::Failure(error),
    }
}
