use clinical_impact::{
    AnalysisConfig, BootstrapOptions, Confounders, Dataset, PatientRecord, render_report,
    run_analysis,
};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

fn logistic(value: f64) -> f64 {
    if value >= 0.0 {
        1.0 / (1.0 + (-value).exp())
    } else {
        let exp_value = value.exp();
        exp_value / (1.0 + exp_value)
    }
}

fn flag(value: bool) -> f64 {
    f64::from(u8::from(value))
}

fn simulate_cohort(n: usize, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let records = (0..n)
        .map(|_| {
            let aphasia = rng.random::<f64>() < 0.3;
            let confounders = Confounders {
                depression: rng.random::<f64>() < 0.3,
                anxiety: rng.random::<f64>() < 0.25,
                ptsd: rng.random::<f64>() < 0.05,
                bipolar: rng.random::<f64>() < 0.03,
                schizophrenia: rng.random::<f64>() < 0.02,
                psychotic_disorder: rng.random::<f64>() < 0.03,
                seizure: rng.random::<f64>() < 0.12,
            };
            let pim_baseline = if aphasia { -0.2 } else { -0.7 };
            let pim_eta = 0.5f64.mul_add(flag(confounders.depression), pim_baseline);
            let any_pim = rng.random::<f64>() < logistic(pim_eta);
            let eta = 0.35f64.mul_add(
                flag(confounders.seizure),
                0.3f64.mul_add(
                    flag(confounders.depression),
                    0.6f64.mul_add(flag(any_pim), 0.45f64.mul_add(flag(aphasia), -1.7)),
                ),
            );
            PatientRecord {
                readmitted: rng.random::<f64>() < logistic(eta),
                aphasia,
                any_pim,
                confounders,
            }
        })
        .collect();
    Dataset::new(records).expect("non-empty cohort")
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let dataset = simulate_cohort(4_000, 11);
    let config = AnalysisConfig {
        bootstrap: BootstrapOptions {
            iterations: 200,
            threads: 4,
            ..BootstrapOptions::default()
        },
        ..AnalysisConfig::default()
    };

    let report = run_analysis(&dataset, &config).expect("analysis");
    println!("{}", render_report(&report).to_text());
    println!(
        "components sum to {:+.2} per 1000 against a predicted total of {:+.2}",
        report.decomposition.component_sum(),
        report.decomposition.total_predicted
    );
}
