use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clinical_impact::{AnalysisConfig, AnalysisError, read_csv_path, render_report, run_analysis};
use log::{error, info};

/// Counterfactual impact of potentially inappropriate medications on 180-day
/// readmission, by aphasia status.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Prepared cohort extract (CSV with 0/1 indicator columns)
    input: PathBuf,

    /// TOML configuration; omitted fields keep the published defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bootstrap iterations
    #[arg(long)]
    iterations: Option<usize>,

    /// Base bootstrap seed
    #[arg(long)]
    seed: Option<u64>,

    /// Bootstrap worker threads
    #[arg(long)]
    threads: Option<usize>,

    /// Wall-clock budget for the bootstrap, in seconds
    #[arg(long)]
    time_limit: Option<f64>,
}

impl Cli {
    fn analysis_config(&self) -> Result<AnalysisConfig, AnalysisError> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::from_path(path)?,
            None => AnalysisConfig::default(),
        };
        if let Some(iterations) = self.iterations {
            config.bootstrap.iterations = iterations;
        }
        if let Some(seed) = self.seed {
            config.bootstrap.seed = seed;
        }
        if let Some(threads) = self.threads {
            config.bootstrap.threads = threads;
        }
        if self.time_limit.is_some() {
            config.bootstrap.time_limit_secs = self.time_limit;
        }
        config.validate()?;
        Ok(config)
    }
}

fn run(cli: &Cli) -> Result<(), AnalysisError> {
    let config = cli.analysis_config()?;
    info!("reading cohort extract {}", cli.input.display());
    let dataset = read_csv_path(&cli.input)?;
    let report = run_analysis(&dataset, &config)?;
    println!("{}", render_report(&report).to_text());
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
