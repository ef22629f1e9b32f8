use std::time::Instant;

use clinical_impact::{
    BootstrapOptions, Dataset, ModelSpec, PatientRecord, Scenario, bootstrap_scenarios,
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let records = (0..3_000)
        .map(|i| PatientRecord {
            readmitted: i % 4 == 0 || (i % 6 == 0 && i % 5 < 2),
            aphasia: i % 3 == 0,
            any_pim: i % 5 < 2,
            ..PatientRecord::default()
        })
        .collect();
    let dataset = Dataset::new(records).expect("non-empty cohort");

    let options = BootstrapOptions {
        iterations: 5_000,
        threads: 4,
        time_limit_secs: Some(2.0),
        ..BootstrapOptions::default()
    };
    let start = Instant::now();
    let run = bootstrap_scenarios(&dataset, &ModelSpec::default(), options).expect("bootstrap");
    println!(
        "{} of {} iterations finished in {:.2?} ({} failed, {} not started)",
        run.successful(),
        options.iterations,
        start.elapsed(),
        run.failures.len(),
        run.not_started
    );

    match run.summarize(0.95) {
        Ok(intervals) => {
            for scenario in Scenario::ALL {
                let interval = intervals[&scenario];
                println!(
                    "{:>18}: {:.4} [{:.4}, {:.4}]",
                    scenario.name(),
                    interval.mean,
                    interval.lower,
                    interval.upper
                );
            }
        }
        Err(err) => println!("no intervals: {err}"),
    }
}
