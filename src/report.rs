//! Table rendering for [`AnalysisReport`] using `comfy_table`.

use comfy_table::{Attribute, Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

use crate::inference::{BootstrapRun, ScenarioIntervals};
use crate::models::decomposition::Decomposition;
use crate::models::logistic::{CoefficientRow, FitStatistics};
use crate::models::risk::{EventsPer1000Row, RiskDifference};
use crate::models::scenario::{Scenario, ScenarioProbabilities};
use crate::pipeline::AnalysisReport;
use crate::preprocess::GroupRates;

const NOT_MEANINGFUL: &str = "n/a";

/// Rendered tables, one string per section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportTables {
    pub observed_rates: String,
    pub coefficients: String,
    pub fit_statistics: String,
    pub scenarios: String,
    pub bootstrap: String,
    pub events_per_1000: String,
    pub risk_differences: String,
    pub decomposition: String,
    pub contributions: String,
}

impl ReportTables {
    /// Sections joined with their titles, in reporting order.
    #[must_use]
    pub fn to_text(&self) -> String {
        [
            ("Observed rates", &self.observed_rates),
            ("Outcome model coefficients", &self.coefficients),
            ("Model fit", &self.fit_statistics),
            ("Scenario probabilities", &self.scenarios),
            ("Bootstrap", &self.bootstrap),
            ("Expected readmissions per 1000 patients", &self.events_per_1000),
            ("Risk differences", &self.risk_differences),
            ("Marginal effects decomposition", &self.decomposition),
            ("Percentage contributions to disparity", &self.contributions),
        ]
        .iter()
        .map(|(title, table)| format!("{title}\n{table}\n"))
        .collect::<Vec<_>>()
        .join("\n")
    }
}

/// Render every section of `report`.
#[must_use]
pub fn render_report(report: &AnalysisReport) -> ReportTables {
    ReportTables {
        observed_rates: render_observed_rates(&report.observed_rates),
        coefficients: render_coefficients(&report.fit.coefficients),
        fit_statistics: render_fit_statistics(
            &report.fit.statistics,
            report.fit.iterations,
            report.fit.converged,
        ),
        scenarios: render_scenarios(&report.point_estimates, &report.intervals),
        bootstrap: render_bootstrap(&report.bootstrap),
        events_per_1000: render_events_per_1000(&report.events_per_1000),
        risk_differences: render_risk_differences(&report.risk_differences),
        decomposition: render_decomposition(&report.decomposition),
        contributions: render_contributions(&report.decomposition),
    }
}

#[must_use]
pub fn render_observed_rates(rates: &[GroupRates]) -> String {
    let mut table = make_table(&["group", "n", "readmissions", "rate", "PIM count", "PIM rate"]);
    for group in rates {
        table.add_row(vec![
            Cell::new(group.label()),
            Cell::new(group.n),
            Cell::new(group.readmissions),
            Cell::new(format!("{:.4}", group.readmission_rate)),
            Cell::new(group.pim_count),
            Cell::new(format!("{:.4}", group.pim_rate)),
        ]);
    }
    table.to_string()
}

#[must_use]
pub fn render_coefficients(rows: &[CoefficientRow]) -> String {
    let mut table = make_table(&["term", "coef", "se", "OR", "OR 95% CI", "p", ""]);
    for row in rows {
        table.add_row(vec![
            Cell::new(row.term),
            Cell::new(format!("{:.4}", row.coefficient)),
            Cell::new(optional(row.std_error, 4)),
            Cell::new(format!("{:.3}", row.odds_ratio)),
            Cell::new(
                row.odds_ratio_ci.map_or_else(
                    || NOT_MEANINGFUL.to_string(),
                    |ci| format!("{:.3} to {:.3}", ci.lower, ci.upper),
                ),
            ),
            Cell::new(row.p_value.map_or_else(|| NOT_MEANINGFUL.to_string(), format_p_value)),
            Cell::new(row.significance.marker()).add_attribute(Attribute::Bold),
        ]);
    }
    table.to_string()
}

#[must_use]
pub fn render_fit_statistics(
    statistics: &FitStatistics,
    iterations: usize,
    converged: bool,
) -> String {
    let mut table = make_table(&["statistic", "value"]);
    let rows = [
        ("observations", statistics.n_obs.to_string()),
        ("non-zero parameters", statistics.n_active.to_string()),
        ("log-likelihood", format!("{:.4}", statistics.log_likelihood)),
        ("null log-likelihood", format!("{:.4}", statistics.null_log_likelihood)),
        ("McFadden pseudo R2", optional(statistics.pseudo_r2, 4)),
        ("AIC", format!("{:.2}", statistics.aic)),
        ("BIC", format!("{:.2}", statistics.bic)),
        ("iterations", iterations.to_string()),
        ("converged", converged.to_string()),
    ];
    for (name, value) in rows {
        table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }
    table.to_string()
}

#[must_use]
pub fn render_scenarios(points: &ScenarioProbabilities, intervals: &ScenarioIntervals) -> String {
    let mut table = make_table(&["aphasia", "PIM", "point", "bootstrap mean", "lower", "upper"]);
    for scenario in Scenario::ALL {
        let interval = intervals.get(&scenario);
        table.add_row(vec![
            Cell::new(scenario.aphasia_label()),
            Cell::new(scenario.pim_label()),
            Cell::new(format!("{:.4}", points.get(scenario))),
            Cell::new(optional(interval.map(|i| i.mean), 4)),
            Cell::new(optional(interval.map(|i| i.lower), 4)),
            Cell::new(optional(interval.map(|i| i.upper), 4)),
        ]);
    }
    table.to_string()
}

#[must_use]
pub fn render_bootstrap(run: &BootstrapRun) -> String {
    let mut table = make_table(&["attempted", "successful", "failed", "not started"]);
    table.add_row(vec![
        Cell::new(run.attempted),
        Cell::new(run.successful()),
        Cell::new(run.failures.len()),
        Cell::new(run.not_started),
    ]);
    table.to_string()
}

#[must_use]
pub fn render_events_per_1000(rows: &[EventsPer1000Row]) -> String {
    let mut table = make_table(&["aphasia", "PIM", "events per 1000", "lower", "upper"]);
    for row in rows {
        table.add_row(vec![
            Cell::new(row.scenario.aphasia_label()),
            Cell::new(row.scenario.pim_label()),
            Cell::new(format!("{:.1}", row.mean)),
            Cell::new(format!("{:.1}", row.lower)),
            Cell::new(format!("{:.1}", row.upper)),
        ]);
    }
    table.to_string()
}

#[must_use]
pub fn render_risk_differences(rows: &[RiskDifference]) -> String {
    let mut table = make_table(&["comparison", "group", "absolute (per 1000)", "relative (%)"]);
    for row in rows {
        table.add_row(vec![
            Cell::new(row.comparison.label()),
            Cell::new(row.comparison.group()),
            Cell::new(format!("{:+.1}", row.absolute_per_1000)),
            Cell::new(
                row.relative_percent
                    .map_or_else(|| NOT_MEANINGFUL.to_string(), |value| format!("{value:+.1}")),
            ),
        ]);
    }
    table.to_string()
}

#[must_use]
pub fn render_decomposition(decomposition: &Decomposition) -> String {
    let mut table = make_table(&["component", "value (per 1000)", "interpretation"]);
    for (component, value) in decomposition.rows() {
        table.add_row(vec![
            Cell::new(component.label()),
            Cell::new(format!("{value:+.2}")),
            Cell::new(component.interpretation()),
        ]);
    }
    table.to_string()
}

#[must_use]
pub fn render_contributions(decomposition: &Decomposition) -> String {
    let mut table = make_table(&["component", "share (%)"]);
    match decomposition.contributions() {
        Some(contributions) => {
            let rows = [
                ("Differential PIM Exposure", contributions.differential_pim_exposure),
                ("Independent Effect of Aphasia", contributions.independent_aphasia_effect),
                ("Interaction Effect", contributions.interaction),
                ("Total", contributions.total()),
            ];
            for (name, value) in rows {
                table.add_row(vec![Cell::new(name), Cell::new(format!("{value:.1}"))]);
            }
        }
        None => {
            table.add_row(vec![
                Cell::new("Total disparity is near zero"),
                Cell::new(NOT_MEANINGFUL),
            ]);
        }
    }
    table.to_string()
}

fn make_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| Cell::new(*h)).collect::<Vec<_>>());
    table
}

fn optional(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| NOT_MEANINGFUL.to_string(), |v| format!("{v:.precision$}"))
}

fn format_p_value(p: f64) -> String {
    if p < 0.001 { "<0.001".to_string() } else { format!("{p:.3}") }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::ScenarioInterval;
    use crate::models::decomposition::{CellProbabilities, decompose_from_parts};
    use crate::models::logistic::{Significance, Term};
    use crate::models::risk::{Comparison, risk_differences};

    fn group(aphasia: bool, readmission_rate: f64, pim_rate: f64) -> GroupRates {
        GroupRates {
            aphasia,
            n: 10,
            readmissions: 5,
            readmission_rate,
            pim_count: 5,
            pim_rate,
        }
    }

    #[test]
    fn coefficient_table_marks_trimmed_terms() {
        let rows = vec![CoefficientRow {
            term: Term::Intercept,
            coefficient: 0.0,
            std_error: None,
            odds_ratio: 1.0,
            odds_ratio_ci: None,
            p_value: None,
            significance: Significance::NotSignificant,
        }];
        let rendered = render_coefficients(&rows);
        assert!(rendered.contains("Intercept"));
        assert!(rendered.contains(NOT_MEANINGFUL));
    }

    #[test]
    fn risk_table_reports_undefined_relative_difference() {
        let intervals: ScenarioIntervals = Scenario::ALL
            .into_iter()
            .map(|scenario| {
                let mean = if scenario == Scenario::AphasiaNoPim { 0.0 } else { 0.2 };
                (
                    scenario,
                    ScenarioInterval {
                        mean,
                        lower: mean,
                        upper: mean,
                        draws: 1,
                    },
                )
            })
            .collect();
        let rows = risk_differences(&intervals).expect("complete map");
        let rendered = render_risk_differences(&rows);
        assert!(rendered.contains(Comparison::WithinAphasia.label()));
        assert!(rendered.contains(NOT_MEANINGFUL));
    }

    #[test]
    fn contributions_table_handles_zero_disparity() {
        let flat = CellProbabilities {
            p00: 0.1,
            p01: 0.1,
            p10: 0.1,
            p11: 0.1,
        };
        let decomposition =
            decompose_from_parts(flat, group(true, 0.5, 0.5), group(false, 0.5, 0.5));
        let rendered = render_contributions(&decomposition);
        assert!(rendered.contains("near zero"));
        let rows = render_decomposition(&decomposition);
        assert!(rows.contains("Total Observed Disparity"));
    }

    #[test]
    fn p_values_below_threshold_are_abbreviated() {
        assert_eq!(format_p_value(0.0001), "<0.001");
        assert_eq!(format_p_value(0.0123), "0.012");
    }
}
