use faer::Mat;

use crate::input::{Dataset, Variable};
use crate::utils::usize_to_f64;

/// Observed readmission and PIM prescription rates within one aphasia group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupRates {
    pub aphasia: bool,
    pub n: usize,
    pub readmissions: usize,
    pub readmission_rate: f64,
    pub pim_count: usize,
    pub pim_rate: f64,
}

impl GroupRates {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        if self.aphasia { "Aphasia" } else { "No Aphasia" }
    }
}

/// Rates for the group with `has_aphasia == aphasia`, or `None` if that group is empty.
#[must_use]
pub fn group_rates(dataset: &Dataset, aphasia: bool) -> Option<GroupRates> {
    let mut n = 0usize;
    let mut readmissions = 0usize;
    let mut pim_count = 0usize;
    for record in dataset.group(aphasia) {
        n += 1;
        readmissions += usize::from(record.readmitted);
        pim_count += usize::from(record.any_pim);
    }
    if n == 0 {
        return None;
    }
    Some(GroupRates {
        aphasia,
        n,
        readmissions,
        readmission_rate: usize_to_f64(readmissions) / usize_to_f64(n),
        pim_count,
        pim_rate: usize_to_f64(pim_count) / usize_to_f64(n),
    })
}

/// Observed rates for the non-aphasia then the aphasia group, skipping empty groups.
#[must_use]
pub fn observed_rates(dataset: &Dataset) -> Vec<GroupRates> {
    [false, true]
        .into_iter()
        .filter_map(|aphasia| group_rates(dataset, aphasia))
        .collect()
}

#[must_use]
pub fn column_has_variation(x: &Mat<f64>, column: usize, tolerance: f64) -> bool {
    if column >= x.ncols() || x.nrows() < 2 {
        return false;
    }
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for row in 0..x.nrows() {
        let value = x[(row, column)];
        min = min.min(value);
        max = max.max(value);
    }
    (max - min).abs() > tolerance.abs()
}

/// Predictors whose design column is constant. `x` carries the intercept in column 0.
#[must_use]
pub fn constant_predictors(x: &Mat<f64>, predictors: &[Variable]) -> Vec<Variable> {
    predictors
        .iter()
        .enumerate()
        .filter(|(idx, _)| !column_has_variation(x, idx + 1, 0.0))
        .map(|(_, predictor)| *predictor)
        .collect()
}
