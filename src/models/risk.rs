//! Absolute risk on the events-per-1000 scale and pairwise risk differences
//! between scenarios.

use log::warn;
use thiserror::Error;

use crate::inference::{ScenarioInterval, ScenarioIntervals};
use crate::models::scenario::Scenario;

/// Patients per reporting unit.
pub const EVENTS_SCALE: f64 = 1_000.0;

/// Errors returned by the risk calculator.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RiskError {
    #[error("scenario `{0}` is missing from the interval estimates")]
    MissingScenario(Scenario),
}

/// Expected readmissions per 1000 patients for one scenario.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventsPer1000Row {
    pub scenario: Scenario,
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Pairwise scenario comparisons, reported in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    WithinAphasia,
    WithinNoAphasia,
    BetweenGroupsWithPim,
    BetweenGroupsWithoutPim,
}

impl Comparison {
    pub const ALL: [Self; 4] = [
        Self::WithinAphasia,
        Self::WithinNoAphasia,
        Self::BetweenGroupsWithPim,
        Self::BetweenGroupsWithoutPim,
    ];

    /// `(exposed, reference)` scenarios.
    #[must_use]
    pub const fn scenarios(self) -> (Scenario, Scenario) {
        match self {
            Self::WithinAphasia => (Scenario::AphasiaPim, Scenario::AphasiaNoPim),
            Self::WithinNoAphasia => (Scenario::NoAphasiaPim, Scenario::NoAphasiaNoPim),
            Self::BetweenGroupsWithPim => (Scenario::AphasiaPim, Scenario::NoAphasiaPim),
            Self::BetweenGroupsWithoutPim => (Scenario::AphasiaNoPim, Scenario::NoAphasiaNoPim),
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::WithinAphasia => "Aphasia: PIM vs No PIM",
            Self::WithinNoAphasia => "No Aphasia: PIM vs No PIM",
            Self::BetweenGroupsWithPim => "With PIMs: Aphasia vs No Aphasia",
            Self::BetweenGroupsWithoutPim => "Without PIMs: Aphasia vs No Aphasia",
        }
    }

    #[must_use]
    pub const fn group(self) -> &'static str {
        match self {
            Self::WithinAphasia => "Within Aphasia",
            Self::WithinNoAphasia => "Within No Aphasia",
            Self::BetweenGroupsWithPim => "Between Groups (with PIMs)",
            Self::BetweenGroupsWithoutPim => "Between Groups (without PIMs)",
        }
    }
}

/// Difference between two scenario means.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskDifference {
    pub comparison: Comparison,
    /// `(p1 - p0) * 1000`.
    pub absolute_per_1000: f64,
    /// `(p1 / p0 - 1) * 100`, or `None` when the reference risk is not positive.
    pub relative_percent: Option<f64>,
}

fn lookup(
    intervals: &ScenarioIntervals,
    scenario: Scenario,
) -> Result<&ScenarioInterval, RiskError> {
    intervals
        .get(&scenario)
        .ok_or(RiskError::MissingScenario(scenario))
}

/// Scale each scenario estimate and its bounds to events per 1000 patients.
///
/// # Errors
///
/// Returns `RiskError::MissingScenario` if any of the four scenarios is absent.
pub fn events_per_1000(intervals: &ScenarioIntervals) -> Result<Vec<EventsPer1000Row>, RiskError> {
    Scenario::ALL
        .into_iter()
        .map(|scenario| {
            let interval = lookup(intervals, scenario)?;
            Ok(EventsPer1000Row {
                scenario,
                mean: interval.mean * EVENTS_SCALE,
                lower: interval.lower * EVENTS_SCALE,
                upper: interval.upper * EVENTS_SCALE,
            })
        })
        .collect()
}

/// Absolute and relative risk differences for every [`Comparison`].
///
/// # Errors
///
/// Returns `RiskError::MissingScenario` if any of the four scenarios is absent.
pub fn risk_differences(intervals: &ScenarioIntervals) -> Result<Vec<RiskDifference>, RiskError> {
    Comparison::ALL
        .into_iter()
        .map(|comparison| {
            let (exposed, reference) = comparison.scenarios();
            let p1 = lookup(intervals, exposed)?.mean;
            let p0 = lookup(intervals, reference)?.mean;
            let relative_percent = relative_difference(p1, p0);
            if relative_percent.is_none() {
                warn!(
                    "relative difference for `{}` is not meaningful: reference risk {p0}",
                    comparison.label()
                );
            }
            Ok(RiskDifference {
                comparison,
                absolute_per_1000: (p1 - p0) * EVENTS_SCALE,
                relative_percent,
            })
        })
        .collect()
}

fn relative_difference(p1: f64, p0: f64) -> Option<f64> {
    if p0 <= 0.0 {
        return None;
    }
    Some((p1 / p0 - 1.0) * 100.0).filter(|value| value.is_finite())
}
