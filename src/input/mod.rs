//! # Patient records
//!
//! Typed patient-level records for the readmission analysis and the
//! [`Dataset`] container the fitter, the scenario predictor, and the bootstrap
//! operate on.
//!
//! Counterfactual views are built with [`with_exposures`], which returns a new
//! record and never touches the observed one.
//!
//! # Examples
//!
//! ```
//! use clinical_impact::{Dataset, PatientRecord, with_exposures};
//!
//! let observed = PatientRecord {
//!     readmitted: true,
//!     aphasia: false,
//!     any_pim: true,
//!     ..PatientRecord::default()
//! };
//! let counterfactual = with_exposures(&observed, true, false);
//! assert!(counterfactual.aphasia);
//! assert!(!counterfactual.any_pim);
//! assert!(!observed.aphasia);
//!
//! let dataset = Dataset::new(vec![observed, counterfactual]).expect("non-empty");
//! assert_eq!(dataset.len(), 2);
//! ```
//!
//! ```
//! use clinical_impact::{Dataset, SchemaError};
//!
//! assert_eq!(Dataset::new(Vec::new()), Err(SchemaError::EmptyDataset));
//! ```

use std::fmt;

use faer::Mat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod table;

pub use table::{TableError, dataset_from_columns, read_csv, read_csv_path};

/// Errors returned when a cohort extract does not satisfy the required schema.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("missing required variables: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("column `{column}` has {found} values; expected {expected}")]
    ColumnLength {
        column: String,
        expected: usize,
        found: usize,
    },
    #[error("column `{column}` row {row}: `{value}` is not a 0/1 indicator")]
    NonBinaryValue {
        column: String,
        row: usize,
        value: String,
    },
    #[error("dataset must contain at least one patient record")]
    EmptyDataset,
}

/// Variables of the prepared cohort extract, named by their column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Variable {
    #[serde(rename = "has_180day_readmission")]
    Readmission180,
    #[serde(rename = "has_aphasia")]
    Aphasia,
    #[serde(rename = "has_any_pim")]
    AnyPim,
    #[serde(rename = "has_depression")]
    Depression,
    #[serde(rename = "has_anxiety")]
    Anxiety,
    #[serde(rename = "has_ptsd")]
    Ptsd,
    #[serde(rename = "has_bipolar")]
    Bipolar,
    #[serde(rename = "has_schizophrenia")]
    Schizophrenia,
    #[serde(rename = "has_psychotic_disorder")]
    PsychoticDisorder,
    #[serde(rename = "has_seizure")]
    Seizure,
}

impl Variable {
    /// Every required variable, in extract column order.
    pub const ALL: [Self; 10] = [
        Self::Readmission180,
        Self::Aphasia,
        Self::AnyPim,
        Self::Depression,
        Self::Anxiety,
        Self::Ptsd,
        Self::Bipolar,
        Self::Schizophrenia,
        Self::PsychoticDisorder,
        Self::Seizure,
    ];

    /// Mental-health and seizure confounders held at observed values.
    pub const CONFOUNDERS: [Self; 7] = [
        Self::Depression,
        Self::Anxiety,
        Self::Ptsd,
        Self::Bipolar,
        Self::Schizophrenia,
        Self::PsychoticDisorder,
        Self::Seizure,
    ];

    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Readmission180 => "has_180day_readmission",
            Self::Aphasia => "has_aphasia",
            Self::AnyPim => "has_any_pim",
            Self::Depression => "has_depression",
            Self::Anxiety => "has_anxiety",
            Self::Ptsd => "has_ptsd",
            Self::Bipolar => "has_bipolar",
            Self::Schizophrenia => "has_schizophrenia",
            Self::PsychoticDisorder => "has_psychotic_disorder",
            Self::Seizure => "has_seizure",
        }
    }

    #[must_use]
    pub fn from_column(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|variable| variable.column() == name)
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Binary confounder indicators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Confounders {
    pub depression: bool,
    pub anxiety: bool,
    pub ptsd: bool,
    pub bipolar: bool,
    pub schizophrenia: bool,
    pub psychotic_disorder: bool,
    pub seizure: bool,
}

/// One post-stroke patient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PatientRecord {
    /// Readmitted within 180 days (outcome).
    pub readmitted: bool,
    /// Primary exposure.
    pub aphasia: bool,
    /// Secondary exposure: any potentially inappropriate medication.
    pub any_pim: bool,
    pub confounders: Confounders,
}

impl PatientRecord {
    #[must_use]
    pub const fn value(&self, variable: Variable) -> bool {
        match variable {
            Variable::Readmission180 => self.readmitted,
            Variable::Aphasia => self.aphasia,
            Variable::AnyPim => self.any_pim,
            Variable::Depression => self.confounders.depression,
            Variable::Anxiety => self.confounders.anxiety,
            Variable::Ptsd => self.confounders.ptsd,
            Variable::Bipolar => self.confounders.bipolar,
            Variable::Schizophrenia => self.confounders.schizophrenia,
            Variable::PsychoticDisorder => self.confounders.psychotic_disorder,
            Variable::Seizure => self.confounders.seizure,
        }
    }

    /// The variable as a 0/1 regressor.
    #[must_use]
    pub const fn indicator(&self, variable: Variable) -> f64 {
        if self.value(variable) { 1.0 } else { 0.0 }
    }

    pub(crate) const fn set(&mut self, variable: Variable, value: bool) {
        match variable {
            Variable::Readmission180 => self.readmitted = value,
            Variable::Aphasia => self.aphasia = value,
            Variable::AnyPim => self.any_pim = value,
            Variable::Depression => self.confounders.depression = value,
            Variable::Anxiety => self.confounders.anxiety = value,
            Variable::Ptsd => self.confounders.ptsd = value,
            Variable::Bipolar => self.confounders.bipolar = value,
            Variable::Schizophrenia => self.confounders.schizophrenia = value,
            Variable::PsychoticDisorder => self.confounders.psychotic_disorder = value,
            Variable::Seizure => self.confounders.seizure = value,
        }
    }
}

/// Copy of `record` with both exposures forced; outcome and confounders are kept.
#[must_use]
pub const fn with_exposures(record: &PatientRecord, aphasia: bool, any_pim: bool) -> PatientRecord {
    PatientRecord {
        aphasia,
        any_pim,
        ..*record
    }
}

/// Non-empty collection of patient records sharing the extract schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    records: Vec<PatientRecord>,
}

impl Dataset {
    /// # Errors
    ///
    /// Returns `SchemaError::EmptyDataset` if `records` is empty.
    pub fn new(records: Vec<PatientRecord>) -> Result<Self, SchemaError> {
        if records.is_empty() {
            return Err(SchemaError::EmptyDataset);
        }
        Ok(Self { records })
    }

    #[must_use]
    pub fn records(&self) -> &[PatientRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always false; construction rejects empty datasets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PatientRecord> {
        self.records.iter()
    }

    /// Counterfactual copy where every record is assigned the given exposures.
    #[must_use]
    pub fn with_exposures(&self, aphasia: bool, any_pim: bool) -> Self {
        Self {
            records: self
                .records
                .iter()
                .map(|record| with_exposures(record, aphasia, any_pim))
                .collect(),
        }
    }

    /// Rows at `indices`, repeats allowed.
    ///
    /// # Panics
    ///
    /// Panics if `indices` is empty or holds an out-of-range index.
    #[must_use]
    pub fn resample(&self, indices: &[usize]) -> Self {
        assert!(!indices.is_empty(), "a resample needs at least one row");
        Self {
            records: indices.iter().map(|&idx| self.records[idx]).collect(),
        }
    }

    /// Records whose primary exposure equals `aphasia`.
    pub fn group(&self, aphasia: bool) -> impl Iterator<Item = &PatientRecord> {
        self.records
            .iter()
            .filter(move |record| record.aphasia == aphasia)
    }

    /// Number of records where `variable` is set.
    #[must_use]
    pub fn count(&self, variable: Variable) -> usize {
        self.records
            .iter()
            .filter(|record| record.value(variable))
            .count()
    }

    /// Design matrix with a leading intercept column followed by `predictors`.
    #[must_use]
    pub fn design_matrix(&self, predictors: &[Variable]) -> Mat<f64> {
        Mat::from_fn(self.records.len(), predictors.len() + 1, |i, j| {
            if j == 0 {
                1.0
            } else {
                self.records[i].indicator(predictors[j - 1])
            }
        })
    }

    /// Single-column 0/1 matrix for `variable`.
    #[must_use]
    pub fn indicator_column(&self, variable: Variable) -> Mat<f64> {
        Mat::from_fn(self.records.len(), 1, |i, _| {
            self.records[i].indicator(variable)
        })
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a PatientRecord;
    type IntoIter = std::slice::Iter<'a, PatientRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
