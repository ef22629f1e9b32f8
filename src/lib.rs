#![forbid(unsafe_code)]

//! # `clinical_impact`
//!
//! Counterfactual (g-computation) analysis of how potentially inappropriate
//! medications (PIMs) relate to 180-day readmission after stroke, by aphasia
//! status.
//!
//! The pipeline fits an L1-penalized logistic outcome model, averages
//! predictions over the cohort under four forced exposure scenarios, attaches
//! bootstrap percentile intervals, and reports absolute risk, pairwise risk
//! differences, and a decomposition of the aphasia disparity into exposure,
//! direct, and interaction components.
//!
//! Logging goes through the `log` facade; install a logger such as
//! `env_logger` to see stage progress and bootstrap diagnostics.

pub mod config;
pub mod inference;
pub mod input;
pub mod models;
pub mod pipeline;
pub mod preprocess;
pub mod report;
pub mod utils;

pub use config::{AnalysisConfig, ConfigError};
pub use inference::{
    BootstrapError, BootstrapOptions, BootstrapRun, ReplicateFailure, ReplicateFitter,
    ReplicateOutcome, ScenarioInterval, ScenarioIntervals, bootstrap_confidence_intervals,
    bootstrap_scenarios, bootstrap_scenarios_until, resample_indices,
};
pub use input::{
    Confounders, Dataset, PatientRecord, SchemaError, TableError, Variable, dataset_from_columns,
    read_csv, read_csv_path, with_exposures,
};
pub use models::decomposition::{
    CONTRIBUTION_EPSILON, CellProbabilities, Contributions, Decomposition, DecompositionComponent,
    DecompositionError, comparison_groups, decompose, decompose_from_parts,
};
pub use models::logistic::{
    CoefficientRow, ConfidenceInterval, DEFAULT_L1_STRENGTH, DEFAULT_MAX_ITER, FitError,
    FitReport, FitStatistics, FittedModel, ModelSpec, ProbabilityModel, Regularization,
    Significance, Term, fit_outcome_model, fit_outcome_model_converged,
};
pub use models::risk::{
    Comparison, EVENTS_SCALE, EventsPer1000Row, RiskDifference, RiskError, events_per_1000,
    risk_differences,
};
pub use models::scenario::{
    Scenario, ScenarioProbabilities, marginal_probability, predict_scenarios,
};
pub use pipeline::{AnalysisError, AnalysisReport, run_analysis};
pub use preprocess::{GroupRates, group_rates, observed_rates};
pub use report::{ReportTables, render_report};
