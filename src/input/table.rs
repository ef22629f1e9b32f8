//! Column-table and CSV ingestion of prepared cohort extracts.
//!
//! Only the required variables are read; any other column is ignored. Every
//! required column must be present and every value must be a 0/1 indicator.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use thiserror::Error;

use super::{Dataset, PatientRecord, SchemaError, Variable};

/// Errors returned while reading a cohort extract.
#[derive(Debug, Error)]
pub enum TableError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("failed to read cohort extract: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to open cohort extract: {0}")]
    Io(#[from] std::io::Error),
}

/// Build a dataset from named integer columns.
///
/// # Errors
///
/// Returns `SchemaError` if a required column is missing, column lengths differ,
/// a value is not 0/1, or the columns are empty.
///
/// # Examples
///
/// ```
/// use clinical_impact::{SchemaError, dataset_from_columns};
///
/// let err = dataset_from_columns(&[("has_aphasia", vec![0, 1])]).expect_err("incomplete");
/// assert!(matches!(err, SchemaError::MissingColumns(_)));
/// ```
pub fn dataset_from_columns<S: AsRef<str>>(
    columns: &[(S, Vec<i64>)],
) -> Result<Dataset, SchemaError> {
    let lookup = |variable: Variable| {
        columns
            .iter()
            .find(|(name, _)| name.as_ref() == variable.column())
            .map(|(_, values)| values)
    };

    let missing = Variable::ALL
        .into_iter()
        .filter(|variable| lookup(*variable).is_none())
        .map(|variable| variable.column().to_string())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(SchemaError::MissingColumns(missing));
    }

    let mut required = Vec::with_capacity(Variable::ALL.len());
    for variable in Variable::ALL {
        if let Some(values) = lookup(variable) {
            required.push((variable, values));
        }
    }
    let rows = required.first().map_or(0, |(_, values)| values.len());

    let mut records = vec![PatientRecord::default(); rows];
    for (variable, values) in required {
        if values.len() != rows {
            return Err(SchemaError::ColumnLength {
                column: variable.column().to_string(),
                expected: rows,
                found: values.len(),
            });
        }
        for (row, &value) in values.iter().enumerate() {
            let flag = match value {
                0 => false,
                1 => true,
                other => {
                    return Err(SchemaError::NonBinaryValue {
                        column: variable.column().to_string(),
                        row,
                        value: other.to_string(),
                    });
                }
            };
            records[row].set(variable, flag);
        }
    }

    Dataset::new(records)
}

/// Read a headed CSV extract.
///
/// # Errors
///
/// Returns `TableError` on malformed CSV or when the schema is not satisfied.
///
/// # Examples
///
/// ```
/// use clinical_impact::read_csv;
///
/// let csv = "\
/// person_id,has_180day_readmission,has_aphasia,has_any_pim,has_depression,has_anxiety,has_ptsd,has_bipolar,has_schizophrenia,has_psychotic_disorder,has_seizure
/// 11,1,1,1,0,0,0,0,0,0,0
/// 12,0,0,0,1,0,0,0,0,0,1
/// ";
/// let dataset = read_csv(csv.as_bytes()).expect("valid extract");
/// assert_eq!(dataset.len(), 2);
/// ```
pub fn read_csv<R: Read>(reader: R) -> Result<Dataset, TableError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let mut positions = Vec::with_capacity(Variable::ALL.len());
    let mut missing = Vec::new();
    for variable in Variable::ALL {
        match headers.iter().position(|header| header == variable.column()) {
            Some(position) => positions.push((variable, position)),
            None => missing.push(variable.column().to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(SchemaError::MissingColumns(missing).into());
    }

    let mut records = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let fields = result?;
        let mut record = PatientRecord::default();
        for &(variable, position) in &positions {
            let raw = fields.get(position).unwrap_or("");
            let flag = parse_indicator(raw).ok_or_else(|| SchemaError::NonBinaryValue {
                column: variable.column().to_string(),
                row,
                value: raw.to_string(),
            })?;
            record.set(variable, flag);
        }
        records.push(record);
    }

    Ok(Dataset::new(records)?)
}

/// Read a headed CSV extract from `path`.
///
/// # Errors
///
/// Returns `TableError` if the file cannot be opened or read.
pub fn read_csv_path(path: impl AsRef<Path>) -> Result<Dataset, TableError> {
    let file = File::open(path)?;
    read_csv(file)
}

// Extracts written through a dataframe may carry float-formatted indicators.
fn parse_indicator(raw: &str) -> Option<bool> {
    match raw {
        "0" | "0.0" => Some(false),
        "1" | "1.0" => Some(true),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "has_180day_readmission,has_aphasia,has_any_pim,has_depression,has_anxiety,has_ptsd,has_bipolar,has_schizophrenia,has_psychotic_disorder,has_seizure";

    fn full_columns(rows: usize) -> Vec<(&'static str, Vec<i64>)> {
        Variable::ALL
            .into_iter()
            .map(|variable| (variable.column(), vec![0; rows]))
            .collect()
    }

    #[test]
    fn columns_missing_required_variables_are_named() {
        let mut columns = full_columns(3);
        columns.retain(|(name, _)| *name != "has_ptsd" && *name != "has_seizure");
        let err = dataset_from_columns(&columns).expect_err("missing columns should fail");
        assert_eq!(
            err,
            SchemaError::MissingColumns(vec!["has_ptsd".to_string(), "has_seizure".to_string()])
        );
    }

    #[test]
    fn columns_reject_non_binary_values() {
        let mut columns = full_columns(3);
        columns[1].1[2] = 2;
        let err = dataset_from_columns(&columns).expect_err("non-binary should fail");
        assert_eq!(
            err,
            SchemaError::NonBinaryValue {
                column: "has_aphasia".to_string(),
                row: 2,
                value: "2".to_string(),
            }
        );
    }

    #[test]
    fn columns_reject_ragged_lengths() {
        let mut columns = full_columns(3);
        columns[4].1.pop();
        let err = dataset_from_columns(&columns).expect_err("ragged columns should fail");
        assert!(matches!(err, SchemaError::ColumnLength { expected: 3, found: 2, .. }));
    }

    #[test]
    fn columns_build_typed_records() {
        let mut columns = full_columns(2);
        columns[0].1 = vec![1, 0];
        columns[2].1 = vec![0, 1];
        columns.push(("person_id", vec![10, 20]));
        let dataset = dataset_from_columns(&columns).expect("valid columns");
        assert!(dataset.records()[0].readmitted);
        assert!(dataset.records()[1].any_pim);
    }

    #[test]
    fn empty_columns_are_rejected() {
        let err = dataset_from_columns(&full_columns(0)).expect_err("empty should fail");
        assert_eq!(err, SchemaError::EmptyDataset);
    }

    #[test]
    fn csv_accepts_float_formatted_indicators() {
        let csv = format!("{HEADER}\n1.0,1,0,0,0,0,0,0,0,1.0\n");
        let dataset = read_csv(csv.as_bytes()).expect("valid csv");
        let record = dataset.records()[0];
        assert!(record.readmitted);
        assert!(record.aphasia);
        assert!(record.confounders.seizure);
    }

    #[test]
    fn csv_rejects_missing_values() {
        let csv = format!("{HEADER}\n1,,0,0,0,0,0,0,0,0\n");
        let err = read_csv(csv.as_bytes()).expect_err("blank value should fail");
        assert!(matches!(
            err,
            TableError::Schema(SchemaError::NonBinaryValue { row: 0, .. })
        ));
    }

    #[test]
    fn csv_reports_missing_header() {
        let csv = "has_aphasia,has_any_pim\n1,0\n";
        let err = read_csv(csv.as_bytes()).expect_err("missing headers should fail");
        match err {
            TableError::Schema(SchemaError::MissingColumns(missing)) => {
                assert_eq!(missing.len(), 8);
                assert!(missing.contains(&"has_180day_readmission".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
