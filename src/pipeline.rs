//! End-to-end analysis: observed rates, outcome model, scenario point
//! estimates, bootstrap intervals, risk tables, and the decomposition.

use log::info;
use thiserror::Error;

use crate::config::{AnalysisConfig, ConfigError};
use crate::inference::{BootstrapError, BootstrapRun, ScenarioIntervals, bootstrap_scenarios};
use crate::input::{Dataset, TableError};
use crate::models::decomposition::{
    Decomposition, DecompositionError, comparison_groups, decompose,
};
use crate::models::logistic::{FitError, FitReport, FittedModel, fit_outcome_model};
use crate::models::risk::{
    EventsPer1000Row, RiskDifference, RiskError, events_per_1000, risk_differences,
};
use crate::models::scenario::{ScenarioProbabilities, predict_scenarios};
use crate::preprocess::{GroupRates, observed_rates};

/// Errors returned by [`run_analysis`].
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Input(#[from] TableError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("outcome model fit failed: {0}")]
    Fit(#[from] FitError),
    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),
    #[error(transparent)]
    Risk(#[from] RiskError),
    #[error("decomposition failed: {0}")]
    Decomposition(#[from] DecompositionError),
}

/// Structured results of one run; rendering lives in [`crate::report`].
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub config: AnalysisConfig,
    pub observed_rates: Vec<GroupRates>,
    pub model: FittedModel,
    pub fit: FitReport,
    /// Marginal probabilities from the primary fit.
    pub point_estimates: ScenarioProbabilities,
    pub bootstrap: BootstrapRun,
    pub intervals: ScenarioIntervals,
    pub events_per_1000: Vec<EventsPer1000Row>,
    pub risk_differences: Vec<RiskDifference>,
    pub decomposition: Decomposition,
}

/// Run the full analysis on an already validated dataset.
///
/// # Errors
///
/// Returns `AnalysisError` if the configuration is invalid, the primary fit
/// breaks down, every bootstrap iteration fails, or an aphasia group is empty.
pub fn run_analysis(
    dataset: &Dataset,
    config: &AnalysisConfig,
) -> Result<AnalysisReport, AnalysisError> {
    config.validate()?;
    comparison_groups(dataset)?;
    info!("analysing {} patients", dataset.len());

    let observed_rates = observed_rates(dataset);
    for group in &observed_rates {
        info!(
            "{}: n = {}, readmission rate {:.4}, PIM rate {:.4}",
            group.label(),
            group.n,
            group.readmission_rate,
            group.pim_rate
        );
    }

    info!(
        "fitting outcome model ({} penalty, strength {})",
        config.model.regularization.method(),
        config.model.regularization.strength()
    );
    let (model, fit) = fit_outcome_model(dataset, &config.model)?;
    info!(
        "outcome model: {} iterations, converged = {}, log-likelihood {:.4}",
        fit.iterations, fit.converged, fit.statistics.log_likelihood
    );

    let point_estimates = predict_scenarios(&model, dataset);
    for (scenario, probability) in point_estimates.iter() {
        info!("point estimate {scenario}: {probability:.4}");
    }

    info!(
        "bootstrapping {} iterations on {} thread(s)",
        config.bootstrap.iterations, config.bootstrap.threads
    );
    let bootstrap = bootstrap_scenarios(dataset, &config.model, config.bootstrap)?;
    info!(
        "bootstrap: {} successful, {} failed, {} not started",
        bootstrap.successful(),
        bootstrap.failures.len(),
        bootstrap.not_started
    );
    let intervals = bootstrap.summarize(config.confidence_level)?;

    let events = events_per_1000(&intervals)?;
    let differences = risk_differences(&intervals)?;

    let decomposition = decompose(&model, dataset)?;
    info!(
        "predicted disparity {:+.2} per 1000, observed {:+.2} per 1000",
        decomposition.total_predicted, decomposition.total_observed
    );

    Ok(AnalysisReport {
        config: config.clone(),
        observed_rates,
        model,
        fit,
        point_estimates,
        bootstrap,
        intervals,
        events_per_1000: events,
        risk_differences: differences,
        decomposition,
    })
}
