//! Immutable analysis configuration.
//!
//! [`AnalysisConfig::default`] reproduces the published analysis: L1 strength
//! 0.01, 1000 solver iterations, 1000 bootstrap iterations seeded from 0, and
//! 95% intervals. A TOML file may override any subset of fields:
//!
//! ```
//! use clinical_impact::AnalysisConfig;
//!
//! let config = AnalysisConfig::from_toml_str(
//!     r#"
//!     confidence_level = 0.9
//!
//!     [bootstrap]
//!     iterations = 200
//!     threads = 4
//!
//!     [model.regularization]
//!     method = "l1"
//!     lambda = 0.05
//!     "#,
//! )
//! .expect("valid config");
//! assert_eq!(config.bootstrap.iterations, 200);
//! assert_eq!(config.bootstrap.seed, 0);
//! assert_eq!(config.model.max_iter, 1_000);
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inference::{BootstrapError, BootstrapOptions, validate_confidence_level};
use crate::models::logistic::{FitError, ModelSpec};

/// Errors returned while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid model settings: {0}")]
    Model(#[from] FitError),
    #[error("invalid bootstrap settings: {0}")]
    Bootstrap(#[from] BootstrapError),
}

/// Settings for one end-to-end run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    pub model: ModelSpec,
    pub bootstrap: BootstrapOptions,
    /// Two-sided level for bootstrap percentile intervals.
    pub confidence_level: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            model: ModelSpec::default(),
            bootstrap: BootstrapOptions::default(),
            confidence_level: 0.95,
        }
    }
}

impl AnalysisConfig {
    /// # Errors
    ///
    /// Returns `ConfigError` if any section is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model.validate()?;
        self.bootstrap.validate()?;
        validate_confidence_level(self.confidence_level)?;
        Ok(())
    }

    /// Parse and validate a TOML document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` on malformed TOML, unknown keys, or invalid values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or is invalid.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Variable;
    use crate::models::logistic::{DEFAULT_L1_STRENGTH, Regularization};

    #[test]
    fn empty_document_yields_defaults() {
        let config = AnalysisConfig::from_toml_str("").expect("empty config");
        assert_eq!(config, AnalysisConfig::default());
        assert_eq!(config.model.regularization.strength(), DEFAULT_L1_STRENGTH);
        assert_eq!(config.model.predictors.len(), 9);
    }

    #[test]
    fn predictors_are_named_by_column() {
        let config = AnalysisConfig::from_toml_str(
            r#"
            [model]
            predictors = ["has_aphasia", "has_any_pim", "has_depression"]

            [model.regularization]
            method = "none"
            "#,
        )
        .expect("valid config");
        assert_eq!(
            config.model.predictors,
            vec![Variable::Aphasia, Variable::AnyPim, Variable::Depression]
        );
        assert_eq!(config.model.regularization, Regularization::None);
    }

    #[test]
    fn penalty_method_reads_as_it_is_reported() {
        let config = AnalysisConfig::from_toml_str(
            r#"
            [model.regularization]
            method = "l1"
            lambda = 0.05
            exclude_intercept = true
            "#,
        )
        .expect("valid config");
        let regularization = config.model.regularization;
        assert_eq!(
            regularization,
            Regularization::Lasso {
                lambda: 0.05,
                exclude_intercept: true
            }
        );
        assert_eq!(regularization.method(), "l1");

        let err = AnalysisConfig::from_toml_str("[model.regularization]\nmethod = \"lasso\"\n")
            .expect_err("one name per method");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = AnalysisConfig::from_toml_str("[bootstrap]\nrepetitions = 5\n")
            .expect_err("unknown key");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn invalid_values_are_rejected_after_parsing() {
        let err = AnalysisConfig::from_toml_str("confidence_level = 1.5\n").expect_err("bad level");
        assert!(matches!(
            err,
            ConfigError::Bootstrap(BootstrapError::InvalidConfidenceLevel(_))
        ));

        let err = AnalysisConfig::from_toml_str("[model]\npredictors = [\"has_any_pim\"]\n")
            .expect_err("missing exposure");
        assert!(matches!(
            err,
            ConfigError::Model(FitError::MissingExposure(Variable::Aphasia))
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = AnalysisConfig::from_path("/nonexistent/clinical-impact.toml")
            .expect_err("missing file");
        assert!(err.to_string().contains("/nonexistent/clinical-impact.toml"));
    }
}
