//! # Models
//!
//! The outcome model and everything computed from it: counterfactual scenario
//! probabilities, absolute and relative risk, and the disparity decomposition.

pub mod decomposition;
pub mod logistic;
pub mod matrix_ops;
pub mod risk;
pub mod scenario;
