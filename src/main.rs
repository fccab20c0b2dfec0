use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::env;
use std::path::PathBuf;
use stf_engine::{
    commands::{lags, train_all, train_model, train_model::TrainingOverrides},
    config::parse_f64_list,
    context::AppContext,
    model_selection::SamplingPolicy,
};

#[derive(Parser)]
#[command(name = "stf-engine")]
#[command(about = "Trains short-term load forecasting models")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone)]
struct TrainingArgs {
    /// Directory of the file store (ignored when DATABASE_URL is set)
    #[arg(long = "data-dir", value_name = "PATH")]
    data_dir: Option<PathBuf>,
    /// Train even when the previous model is older than the maximum age
    #[arg(long)]
    skip_age_check: bool,
    /// Persist the new model without comparing it to the previous one
    #[arg(long)]
    no_compare: bool,
    /// Comma separated forecast horizons in hours, e.g. 0.25,24
    #[arg(long, value_name = "HOURS")]
    horizons: Option<String>,
    /// How validation rows are sampled
    #[arg(long, value_enum)]
    sampling: Option<SamplingPolicy>,
    /// Add autocorrelation peaks as extra minute lags
    #[arg(long)]
    detect_lags: bool,
    /// Where training reports are written
    #[arg(long = "report-dir", value_name = "PATH")]
    report_dir: Option<PathBuf>,
}

impl TrainingArgs {
    fn overrides(&self) -> Result<TrainingOverrides> {
        Ok(TrainingOverrides {
            skip_age_check: self.skip_age_check,
            no_compare: self.no_compare,
            horizons: self
                .horizons
                .as_deref()
                .map(|raw| {
                    parse_f64_list(raw).with_context(|| format!("Invalid --horizons value {}", raw))
                })
                .transpose()?,
            sampling: self.sampling,
            detect_lags: self.detect_lags,
            report_dir: self.report_dir.clone(),
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Train the model of one prediction job
    Train {
        /// Prediction job id
        job_id: i64,
        #[command(flatten)]
        args: TrainingArgs,
    },
    /// Train several prediction jobs in parallel (all known jobs when none are given)
    TrainAll {
        /// Prediction job ids
        job_ids: Vec<i64>,
        #[command(flatten)]
        args: TrainingArgs,
    },
    /// Print the default lag features for a horizon
    Lags {
        /// Forecast horizon in hours
        #[arg(long)]
        horizon: f64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let database_url = env::var("DATABASE_URL").ok();
    match cli.command {
        Commands::Train { job_id, args } => {
            let app_context = AppContext::initialize(database_url, args.data_dir.clone());
            train_model::run(&app_context, job_id, &args.overrides()?)?;
        }
        Commands::TrainAll { job_ids, args } => {
            let app_context = AppContext::initialize(database_url, args.data_dir.clone());
            train_all::run(&app_context, &job_ids, &args.overrides()?)?;
        }
        Commands::Lags { horizon } => {
            lags::run(horizon)?;
        }
    }

    info!("Done");
    Ok(())
}
