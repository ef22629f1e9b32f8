//! Marginal-effects decomposition of the aphasia readmission disparity.
//!
//! With cell probabilities `Pij = P(readmission | aphasia = i, PIM = j)` from
//! the counterfactual predictions and observed PIM rates `pi1`, `pi0`:
//!
//! ```text
//! composition  = (pi1 - pi0) * (P01 - P00)
//! direct       = P10 - P00
//! interaction  = (P11 - P10) - (P01 - P00)
//! predicted    = pi1*P11 + (1-pi1)*P10 - pi0*P01 - (1-pi0)*P00
//! observed     = ybar1 - ybar0
//! ```
//!
//! all on the events-per-1000 scale. The three components omit cross terms and
//! need not add up to the predicted total.

use log::info;
use thiserror::Error;

use crate::input::Dataset;
use crate::models::logistic::ProbabilityModel;
use crate::models::risk::EVENTS_SCALE;
use crate::models::scenario::{Scenario, ScenarioProbabilities, predict_scenarios};
use crate::preprocess::{GroupRates, group_rates};

/// Smallest |predicted total| (per 1000) for which percentage contributions are reported.
pub const CONTRIBUTION_EPSILON: f64 = 1e-3;

/// Errors returned by the decomposition engine.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecompositionError {
    #[error("the {} group has no patients", group_name(.aphasia))]
    EmptyGroup { aphasia: bool },
}

const fn group_name(aphasia: &bool) -> &'static str {
    if *aphasia { "aphasia" } else { "no-aphasia" }
}

/// Observed rates of the aphasia and no-aphasia groups, in that order.
///
/// # Errors
///
/// Returns `DecompositionError::EmptyGroup` if either group has no patients.
pub fn comparison_groups(
    dataset: &Dataset,
) -> Result<(GroupRates, GroupRates), DecompositionError> {
    let aphasia =
        group_rates(dataset, true).ok_or(DecompositionError::EmptyGroup { aphasia: true })?;
    let no_aphasia =
        group_rates(dataset, false).ok_or(DecompositionError::EmptyGroup { aphasia: false })?;
    Ok((aphasia, no_aphasia))
}

/// Counterfactual cell probabilities, indexed `p{aphasia}{pim}`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellProbabilities {
    pub p00: f64,
    pub p01: f64,
    pub p10: f64,
    pub p11: f64,
}

impl From<ScenarioProbabilities> for CellProbabilities {
    fn from(probabilities: ScenarioProbabilities) -> Self {
        Self {
            p00: probabilities.get(Scenario::NoAphasiaNoPim),
            p01: probabilities.get(Scenario::NoAphasiaPim),
            p10: probabilities.get(Scenario::AphasiaNoPim),
            p11: probabilities.get(Scenario::AphasiaPim),
        }
    }
}

/// Rows of the decomposition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecompositionComponent {
    BaselineRisk,
    DifferentialPimExposure,
    IndependentAphasiaEffect,
    Interaction,
    TotalPredicted,
    TotalObserved,
}

impl DecompositionComponent {
    pub const ALL: [Self; 6] = [
        Self::BaselineRisk,
        Self::DifferentialPimExposure,
        Self::IndependentAphasiaEffect,
        Self::Interaction,
        Self::TotalPredicted,
        Self::TotalObserved,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::BaselineRisk => "Baseline Risk (No Aphasia, No PIM)",
            Self::DifferentialPimExposure => "Differential PIM Exposure",
            Self::IndependentAphasiaEffect => "Independent Effect of Aphasia",
            Self::Interaction => "Interaction Effect",
            Self::TotalPredicted => "Total Predicted Disparity",
            Self::TotalObserved => "Total Observed Disparity",
        }
    }

    #[must_use]
    pub const fn interpretation(self) -> &'static str {
        match self {
            Self::BaselineRisk => "Baseline readmission risk",
            Self::DifferentialPimExposure => "Due to different PIM prescription rates",
            Self::IndependentAphasiaEffect => "Direct effect of aphasia (without PIMs)",
            Self::Interaction => "Differential response to PIMs between groups",
            Self::TotalPredicted => "Sum of components (model-based)",
            Self::TotalObserved => "Actual observed difference",
        }
    }
}

/// Share of the predicted disparity attributed to each component, in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contributions {
    pub differential_pim_exposure: f64,
    pub independent_aphasia_effect: f64,
    pub interaction: f64,
}

impl Contributions {
    #[must_use]
    pub fn total(&self) -> f64 {
        self.differential_pim_exposure + self.independent_aphasia_effect + self.interaction
    }
}

/// Decomposition result; component values are events per 1000 patients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decomposition {
    pub cells: CellProbabilities,
    pub aphasia: GroupRates,
    pub no_aphasia: GroupRates,
    pub baseline_risk: f64,
    pub differential_pim_exposure: f64,
    pub independent_aphasia_effect: f64,
    pub interaction: f64,
    pub total_predicted: f64,
    pub total_observed: f64,
}

impl Decomposition {
    #[must_use]
    pub const fn value(&self, component: DecompositionComponent) -> f64 {
        match component {
            DecompositionComponent::BaselineRisk => self.baseline_risk,
            DecompositionComponent::DifferentialPimExposure => self.differential_pim_exposure,
            DecompositionComponent::IndependentAphasiaEffect => self.independent_aphasia_effect,
            DecompositionComponent::Interaction => self.interaction,
            DecompositionComponent::TotalPredicted => self.total_predicted,
            DecompositionComponent::TotalObserved => self.total_observed,
        }
    }

    /// Table rows in reporting order.
    #[must_use]
    pub fn rows(&self) -> Vec<(DecompositionComponent, f64)> {
        DecompositionComponent::ALL
            .into_iter()
            .map(|component| (component, self.value(component)))
            .collect()
    }

    /// Sum of the three disparity components; generally differs from `total_predicted`.
    #[must_use]
    pub fn component_sum(&self) -> f64 {
        self.differential_pim_exposure + self.independent_aphasia_effect + self.interaction
    }

    /// Percentage contributions, or `None` when the predicted total is too close to zero.
    #[must_use]
    pub fn contributions(&self) -> Option<Contributions> {
        if self.total_predicted.abs() <= CONTRIBUTION_EPSILON {
            return None;
        }
        let share = |value: f64| value / self.total_predicted * 100.0;
        Some(Contributions {
            differential_pim_exposure: share(self.differential_pim_exposure),
            independent_aphasia_effect: share(self.independent_aphasia_effect),
            interaction: share(self.interaction),
        })
    }
}

/// Decompose from precomputed cell probabilities and observed group rates.
#[must_use]
pub fn decompose_from_parts(
    cells: CellProbabilities,
    aphasia: GroupRates,
    no_aphasia: GroupRates,
) -> Decomposition {
    let pi1 = aphasia.pim_rate;
    let pi0 = no_aphasia.pim_rate;
    let pim_effect_aphasia = cells.p11 - cells.p10;
    let pim_effect_no_aphasia = cells.p01 - cells.p00;
    let predicted = pi1.mul_add(cells.p11, (1.0 - pi1) * cells.p10)
        - pi0.mul_add(cells.p01, (1.0 - pi0) * cells.p00);

    Decomposition {
        cells,
        aphasia,
        no_aphasia,
        baseline_risk: cells.p00 * EVENTS_SCALE,
        differential_pim_exposure: (pi1 - pi0) * pim_effect_no_aphasia * EVENTS_SCALE,
        independent_aphasia_effect: (cells.p10 - cells.p00) * EVENTS_SCALE,
        interaction: (pim_effect_aphasia - pim_effect_no_aphasia) * EVENTS_SCALE,
        total_predicted: predicted * EVENTS_SCALE,
        total_observed: (aphasia.readmission_rate - no_aphasia.readmission_rate) * EVENTS_SCALE,
    }
}

/// Decompose the disparity using `model` and the observed `dataset`.
///
/// # Errors
///
/// Returns `DecompositionError::EmptyGroup` if either aphasia group has no patients.
pub fn decompose<M: ProbabilityModel + ?Sized>(
    model: &M,
    dataset: &Dataset,
) -> Result<Decomposition, DecompositionError> {
    let (aphasia, no_aphasia) = comparison_groups(dataset)?;
    let cells = CellProbabilities::from(predict_scenarios(model, dataset));
    let decomposition = decompose_from_parts(cells, aphasia, no_aphasia);
    if decomposition.contributions().is_none() {
        info!("predicted disparity is near zero; percentage contributions not meaningful");
    }
    Ok(decomposition)
}
