//! The command line interface for nbsopt.
use crate::input::load_model;
use crate::log;
use crate::model::Model;
use crate::output::{
    create_output_directory, get_output_dir, write_appraisal, write_baseline, write_metadata,
    write_optimisation,
};
use crate::portfolio::Portfolio;
use crate::settings::Settings;
use crate::simulation::{evaluate_portfolio, run_baseline, run_optimisation};
use ::log::{info, warn};
use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

pub mod settings;
use settings::SettingsSubcommands;

/// The command line interface for nbsopt.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// The available commands.
    #[command(subcommand)]
    command: Option<Commands>,
    /// Flag to provide the CLI docs as markdown
    #[arg(long, hide = true)]
    markdown_help: bool,
}

/// Options for commands which write results
#[derive(Args, Default)]
pub struct RunOpts {
    /// Directory for output files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Whether to overwrite the output directory if it already exists
    #[arg(long)]
    pub overwrite: bool,
}

/// The available commands.
#[derive(Subcommand)]
enum Commands {
    /// Estimate the cost of inaction under every climate scenario.
    Baseline {
        /// Path to the model directory.
        model_dir: PathBuf,
        /// Other run options
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Appraise a single portfolio.
    Evaluate {
        /// Path to the model directory.
        model_dir: PathBuf,
        /// Name of a portfolio in portfolios.csv, or an inline portfolio such as
        /// "wetland:2;bioswale:5".
        portfolio: String,
        /// Other run options
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Search for the Pareto frontier of portfolios within budget.
    Optimise {
        /// Path to the model directory.
        model_dir: PathBuf,
        /// Other run options
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Validate a model.
    Validate {
        /// The path to the model directory.
        model_dir: PathBuf,
    },
    /// Manage settings file.
    Settings {
        /// The subcommands for managing the settings file.
        #[command(subcommand)]
        subcommand: SettingsSubcommands,
    },
}

impl Commands {
    /// Execute the supplied CLI command
    fn execute(self) -> Result<()> {
        match self {
            Self::Baseline { model_dir, opts } => handle_baseline_command(&model_dir, &opts, None),
            Self::Evaluate {
                model_dir,
                portfolio,
                opts,
            } => handle_evaluate_command(&model_dir, &portfolio, &opts, None),
            Self::Optimise { model_dir, opts } => handle_optimise_command(&model_dir, &opts, None),
            Self::Validate { model_dir } => handle_validate_command(&model_dir, None),
            Self::Settings { subcommand } => subcommand.execute(),
        }
    }
}

/// Parse CLI arguments and start nbsopt
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Invoked as: `$ nbsopt --markdown-help`
    if cli.markdown_help {
        clap_markdown::print_help_markdown::<Cli>();
        return Ok(());
    }

    let Some(command) = cli.command else {
        // Output program help in markdown format
        let help_str = Cli::command().render_long_help().to_string();
        println!("{help_str}");
        return Ok(());
    };

    command.execute()
}

/// Load settings if the caller didn't provide them
fn load_settings(settings: Option<Settings>) -> Result<Settings> {
    match settings {
        Some(settings) => Ok(settings),
        None => Settings::load().context("Failed to load settings."),
    }
}

/// Prepare the output folder, start logging and load the model.
///
/// Shared set-up for every command which writes results.
fn start_run(
    model_path: &Path,
    opts: &RunOpts,
    settings: Option<Settings>,
) -> Result<(Model, PathBuf)> {
    let settings = load_settings(settings)?;

    // Get path to output folder
    let output_path = match &opts.output_dir {
        Some(path) => path.clone(),
        None => get_output_dir(model_path)?,
    };

    // Overwriting can be enabled either in settings or on the command line
    let allow_overwrite = opts.overwrite || settings.overwrite;
    let overwrite = create_output_directory(&output_path, allow_overwrite).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            output_path.display()
        )
    })?;

    // Initialise program logger
    log::init(Some(settings.log_level.as_str()), Some(&output_path))
        .context("Failed to initialise logging.")?;

    // NB: We have to wait until the logger is initialised to display this warning
    if overwrite {
        warn!("Output folder will be overwritten");
    }

    // A second attempt within the same process will fail, which is harmless
    if let Err(err) = settings.init_thread_pool() {
        warn!("{err:#}");
    }

    let model = load_model(model_path).context("Failed to load model.")?;
    info!("Loaded model from {}", model_path.display());
    info!("Output folder: {}", output_path.display());

    Ok((model, output_path))
}

/// Handle the `baseline` command.
pub fn handle_baseline_command(
    model_path: &Path,
    opts: &RunOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let (model, output_path) = start_run(model_path, opts, settings)?;
    write_metadata(&output_path, model_path, "baseline", &model)
        .context("Failed to save metadata.")?;

    let results = run_baseline(&model)?;
    for result in &results {
        info!(
            "Scenario {}: expected loss {:.0} (std. error {:.0})",
            result.scenario,
            result.loss.mean.value(),
            result.loss.std_error.value()
        );
    }
    write_baseline(&output_path, &results).context("Failed to write results.")?;
    info!("Baseline complete!");

    Ok(())
}

/// Look up a named portfolio, falling back on parsing it inline
fn resolve_portfolio(model: &Model, portfolio: &str) -> Result<Portfolio> {
    if let Ok(named) = model.portfolio(portfolio) {
        return Ok(named.clone());
    }

    portfolio
        .parse()
        .with_context(|| format!("\"{portfolio}\" is neither a named nor an inline portfolio"))
}

/// Handle the `evaluate` command.
pub fn handle_evaluate_command(
    model_path: &Path,
    portfolio: &str,
    opts: &RunOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let (model, output_path) = start_run(model_path, opts, settings)?;
    write_metadata(&output_path, model_path, "evaluate", &model)
        .context("Failed to save metadata.")?;

    let portfolio = resolve_portfolio(&model, portfolio)?;
    info!("Evaluating portfolio {portfolio}");
    let appraisal = evaluate_portfolio(&model, &portfolio)?;
    info!(
        "Expected NPV {:.0}, spend {:.0}",
        appraisal.expected_npv.value(),
        appraisal.total_spend.value()
    );
    write_appraisal(&output_path, &model, &appraisal).context("Failed to write results.")?;
    info!("Evaluation complete!");

    Ok(())
}

/// Handle the `optimise` command.
pub fn handle_optimise_command(
    model_path: &Path,
    opts: &RunOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let (model, output_path) = start_run(model_path, opts, settings)?;
    write_metadata(&output_path, model_path, "optimise", &model)
        .context("Failed to save metadata.")?;

    let cancel = AtomicBool::new(false);
    let result = run_optimisation(&model, &cancel)?;
    info!(
        "Search finished ({}) after {} evaluations with {} portfolios on the frontier",
        result.search.termination,
        result.search.evaluations,
        result.search.frontier.len()
    );
    match &result.recommendation {
        Some(recommendation) => info!(
            "Recommended portfolio: {}",
            recommendation.candidate.portfolio
        ),
        None => info!("No selection policy given, so no portfolio is recommended"),
    }
    write_optimisation(&output_path, &model, &result).context("Failed to write results.")?;
    info!("Optimisation complete!");

    Ok(())
}

/// Handle the `validate` command.
pub fn handle_validate_command(model_path: &Path, settings: Option<Settings>) -> Result<()> {
    let settings = load_settings(settings)?;

    // Initialise program logger (we won't save log files when running the validate command)
    log::init(Some(settings.log_level.as_str()), None).context("Failed to initialise logging.")?;

    // Load/validate the model
    load_model(model_path).context("Failed to validate model.")?;
    info!("Model validation successful!");

    Ok(())
}
