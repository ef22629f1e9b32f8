//! Counterfactual exposure scenarios and their marginal (dataset-averaged)
//! readmission probabilities.
//!
//! Every scenario forces both exposures for all patients while the confounders
//! keep their observed values, then averages the model's predictions.

use std::fmt;

use crate::input::Dataset;
use crate::models::logistic::ProbabilityModel;
use crate::utils::mean;

/// One of the four exposure combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scenario {
    AphasiaPim,
    AphasiaNoPim,
    NoAphasiaPim,
    NoAphasiaNoPim,
}

impl Scenario {
    /// Reporting order.
    pub const ALL: [Self; 4] = [
        Self::AphasiaPim,
        Self::AphasiaNoPim,
        Self::NoAphasiaPim,
        Self::NoAphasiaNoPim,
    ];

    /// Forced `(aphasia, any_pim)` values.
    #[must_use]
    pub const fn exposures(self) -> (bool, bool) {
        match self {
            Self::AphasiaPim => (true, true),
            Self::AphasiaNoPim => (true, false),
            Self::NoAphasiaPim => (false, true),
            Self::NoAphasiaNoPim => (false, false),
        }
    }

    #[must_use]
    pub const fn from_exposures(aphasia: bool, any_pim: bool) -> Self {
        match (aphasia, any_pim) {
            (true, true) => Self::AphasiaPim,
            (true, false) => Self::AphasiaNoPim,
            (false, true) => Self::NoAphasiaPim,
            (false, false) => Self::NoAphasiaNoPim,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AphasiaPim => "aphasia_pim",
            Self::AphasiaNoPim => "aphasia_no_pim",
            Self::NoAphasiaPim => "no_aphasia_pim",
            Self::NoAphasiaNoPim => "no_aphasia_no_pim",
        }
    }

    #[must_use]
    pub const fn aphasia_label(self) -> &'static str {
        if self.exposures().0 { "Aphasia" } else { "No Aphasia" }
    }

    #[must_use]
    pub const fn pim_label(self) -> &'static str {
        if self.exposures().1 { "PIM" } else { "No PIM" }
    }

    /// Position in [`Scenario::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::AphasiaPim => 0,
            Self::AphasiaNoPim => 1,
            Self::NoAphasiaPim => 2,
            Self::NoAphasiaNoPim => 3,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// All four marginal probabilities from one model and one dataset.
///
/// Built in one go so a bootstrap replicate contributes either all four values or none.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenarioProbabilities([f64; 4]);

impl ScenarioProbabilities {
    #[must_use]
    pub const fn new(values: [f64; 4]) -> Self {
        Self(values)
    }

    #[must_use]
    pub const fn get(&self, scenario: Scenario) -> f64 {
        self.0[scenario.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Scenario, f64)> + '_ {
        Scenario::ALL.into_iter().map(|scenario| (scenario, self.get(scenario)))
    }
}

/// Average predicted probability with both exposures forced to `scenario`.
///
/// The dataset is non-empty by construction, so the average is always defined.
#[must_use]
pub fn marginal_probability<M: ProbabilityModel + ?Sized>(
    model: &M,
    dataset: &Dataset,
    scenario: Scenario,
) -> f64 {
    let (aphasia, any_pim) = scenario.exposures();
    let counterfactual = dataset.with_exposures(aphasia, any_pim);
    mean(&model.predict(&counterfactual)).unwrap_or(f64::NAN)
}

/// Marginal probabilities for every scenario.
#[must_use]
pub fn predict_scenarios<M: ProbabilityModel + ?Sized>(
    model: &M,
    dataset: &Dataset,
) -> ScenarioProbabilities {
    ScenarioProbabilities(
        Scenario::ALL.map(|scenario| marginal_probability(model, dataset, scenario)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{Confounders, PatientRecord, Variable};
    use crate::models::logistic::{FittedModel, Regularization};
    use approx::assert_relative_eq;

    struct ConstantModel(f64);

    impl ProbabilityModel for ConstantModel {
        fn predict_record(&self, _record: &PatientRecord) -> f64 {
            self.0
        }
    }

    // Probability depends on the exposures and on depression only.
    struct TableModel;

    impl ProbabilityModel for TableModel {
        fn predict_record(&self, record: &PatientRecord) -> f64 {
            let base = match (record.aphasia, record.any_pim) {
                (true, true) => 0.4,
                (true, false) => 0.3,
                (false, true) => 0.2,
                (false, false) => 0.1,
            };
            if record.confounders.depression { base + 0.1 } else { base }
        }
    }

    fn cohort() -> Dataset {
        let depressed = Confounders {
            depression: true,
            ..Confounders::default()
        };
        Dataset::new(vec![
            PatientRecord {
                aphasia: true,
                any_pim: false,
                confounders: depressed,
                ..PatientRecord::default()
            },
            PatientRecord {
                aphasia: false,
                any_pim: true,
                ..PatientRecord::default()
            },
            PatientRecord {
                aphasia: false,
                any_pim: false,
                ..PatientRecord::default()
            },
            PatientRecord::default(),
        ])
        .expect("non-empty")
    }

    #[test]
    fn constant_model_gives_constant_marginals() {
        let probabilities = predict_scenarios(&ConstantModel(0.3), &cohort());
        for (_, value) in probabilities.iter() {
            assert_eq!(value, 0.3);
        }
    }

    #[test]
    fn marginal_ignores_observed_exposures() {
        let dataset = cohort();
        // One of four records is depressed, adding 0.1 / 4.
        assert_relative_eq!(
            marginal_probability(&TableModel, &dataset, Scenario::AphasiaPim),
            0.425
        );
        assert_relative_eq!(
            marginal_probability(&TableModel, &dataset, Scenario::NoAphasiaNoPim),
            0.125
        );
    }

    #[test]
    fn marginalization_matches_hand_computed_logistic_average() {
        let model = FittedModel::from_coefficients(
            vec![Variable::Aphasia, Variable::AnyPim, Variable::Depression],
            &[-1.0, 0.5, 0.8, 0.3],
            Regularization::None,
        );
        let dataset = cohort();
        let expected = (3.0 * (0.3f64).exp() / (1.0 + 0.3f64.exp())
            + 0.6f64.exp() / (1.0 + 0.6f64.exp()))
            / 4.0;
        assert_relative_eq!(
            marginal_probability(&model, &dataset, Scenario::AphasiaPim),
            expected,
            epsilon = 1e-12
        );
    }

    #[test]
    fn scenario_exposures_round_trip() {
        for scenario in Scenario::ALL {
            let (aphasia, any_pim) = scenario.exposures();
            assert_eq!(Scenario::from_exposures(aphasia, any_pim), scenario);
            assert_eq!(Scenario::ALL[scenario.index()], scenario);
        }
        assert_eq!(Scenario::NoAphasiaPim.aphasia_label(), "No Aphasia");
        assert_eq!(Scenario::NoAphasiaPim.pim_label(), "PIM");
        assert_eq!(Scenario::AphasiaNoPim.to_string(), "aphasia_no_pim");
    }
}
