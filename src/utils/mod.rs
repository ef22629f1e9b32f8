/////////////////////////////////////////////////////////////////////////////////////////////\
//
// Shared linear algebra and summary statistics for the counterfactual engine.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Utilities
//!
//! Linear solves on faer matrices, linear-interpolated percentiles, and the
//! numeric conversions shared by the fitter and the bootstrap.

use faer::Mat;
use faer::prelude::Solve;
use num_traits::ToPrimitive;

use crate::models::logistic::FitError;

#[must_use]
pub fn usize_to_f64(value: usize) -> f64 {
    f64::from(u32::try_from(value).unwrap_or(u32::MAX))
}

#[must_use]
pub fn max_abs_diff(a: &Mat<f64>, b: &Mat<f64>) -> f64 {
    let mut max = 0.0;
    for i in 0..a.nrows() {
        let diff = (a[(i, 0)] - b[(i, 0)]).abs();
        if diff > max {
            max = diff;
        }
    }
    max
}

/// # Errors
///
/// Returns `FitError::SolveFailed` if the solve produces non-finite values.
pub fn solve_linear_system(a: &Mat<f64>, b: &Mat<f64>) -> Result<Mat<f64>, FitError> {
    let rhs = b.clone();
    let lu = a.full_piv_lu();
    let solution = lu.solve(rhs);
    if !matrix_is_finite(&solution) {
        return Err(FitError::SolveFailed);
    }
    Ok(solution)
}

#[must_use]
pub fn matrix_is_finite(matrix: &Mat<f64>) -> bool {
    for i in 0..matrix.nrows() {
        for j in 0..matrix.ncols() {
            if !matrix[(i, j)].is_finite() {
                return false;
            }
        }
    }
    true
}

/// Running mean of `values`, or `None` when empty.
///
/// The incremental form returns the common value exactly when every entry is equal.
#[must_use]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut mean = 0.0;
    for (index, value) in values.iter().enumerate() {
        mean += (value - mean) / usize_to_f64(index + 1);
    }
    Some(mean)
}

/// Percentile of already sorted values with linear interpolation between ranks.
///
/// `probability` is in `[0, 1]`; returns NaN for an empty slice.
#[must_use]
pub fn percentile(sorted_values: &[f64], probability: f64) -> f64 {
    if sorted_values.is_empty() {
        return f64::NAN;
    }

    let clamped = probability.clamp(0.0, 1.0);
    let last = sorted_values.len() - 1;
    let position = clamped * usize_to_f64(last);
    let lower = position.floor().to_usize().unwrap_or(0).min(last);
    let upper = position.ceil().to_usize().unwrap_or(last).min(last);
    let weight = position - usize_to_f64(lower);
    // Equal neighbours interpolate to exactly their value.
    weight.mul_add(
        sorted_values[upper] - sorted_values[lower],
        sorted_values[lower],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn max_abs_diff_matches_expected_value() {
        let a = Mat::from_fn(3, 1, |i, _| usize_to_f64(i));
        let b = Mat::from_fn(3, 1, |i, _| if i == 2 { 10.0 } else { 0.0 });
        assert_relative_eq!(max_abs_diff(&a, &b), 8.0);
    }

    #[test]
    fn solve_linear_system_rejects_non_finite_solution() {
        let a = Mat::from_fn(2, 2, |i, j| if i == j { 1.0 } else { 0.0 });
        let b = Mat::from_fn(2, 1, |i, _| if i == 0 { f64::NAN } else { 1.0 });
        let err = solve_linear_system(&a, &b).expect_err("non-finite rhs should fail");
        assert!(matches!(err, FitError::SolveFailed));
    }

    #[test]
    fn mean_of_constant_values_is_exact() {
        let values = vec![0.1; 7];
        assert_eq!(mean(&values), Some(0.1));
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_relative_eq!(percentile(&sorted, 0.0), 1.0);
        assert_relative_eq!(percentile(&sorted, 0.5), 3.0);
        assert_relative_eq!(percentile(&sorted, 1.0), 5.0);
        // position 0.025 * 4 = 0.1
        assert_relative_eq!(percentile(&sorted, 0.025), 1.1);
        assert_relative_eq!(percentile(&sorted, 0.975), 4.9);
    }

    #[test]
    fn percentile_of_constant_values_is_exact() {
        let sorted = [0.1; 10];
        assert_eq!(percentile(&sorted, 0.025), 0.1);
        assert_eq!(percentile(&sorted, 0.975), 0.1);
    }

    #[test]
    fn percentile_of_empty_slice_is_nan() {
        assert!(percentile(&[], 0.5).is_nan());
    }

    #[test]
    fn matrix_is_finite_detects_nan() {
        let matrix = Mat::from_fn(2, 1, |i, _| if i == 0 { 1.0 } else { f64::NAN });
        assert!(!matrix_is_finite(&matrix));
    }
}
