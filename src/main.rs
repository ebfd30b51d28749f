//! facestats: statistical compliance reports for facial-perception studies

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use facestats::config::{default_config_json, load_config, Config, CONFIG_FILENAME};
use facestats::error::PipelineError;
use facestats::reporter::{publish, ConsoleReporter, JsonReporter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Aggregate participant response files and produce a statistical compliance report
#[derive(Parser, Debug)]
#[command(name = "facestats")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Directory of participant response files (default: "dataDir" from the config)
    path: Option<PathBuf>,

    /// Path to config file (default: search .facestatsrc.json in the data dir and parents)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory for report artifacts (default: <data dir>/report)
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Print the full report as JSON instead of the console summary
    #[arg(long, short)]
    json: bool,

    /// Quiet mode (errors only)
    #[arg(long, short)]
    quiet: bool,

    /// Verbose output
    #[arg(long, short)]
    verbose: bool,

    /// Run every analysis but write no files
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create .facestatsrc.json with sensible defaults
    Init {
        /// Directory in which to create config (default: current)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Print the dataset summary as JSON without fitting any model
    Summary {
        /// Directory of participant response files
        path: Option<PathBuf>,

        /// Path to config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            ExitCode::from(2)
        }
    }
}

fn run() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::Init { dir } => run_init(dir.as_deref()),
            Commands::Summary { path, config } => run_summary(path.as_deref(), config.as_deref()),
        };
    }

    let (data_dir, config) = resolve(args.path.as_deref(), args.config.as_deref(), args.output.as_deref())?;
    let report = facestats::run_pipeline(&data_dir, &config)?;

    if args.json {
        print!("{}", JsonReporter::new().pretty().report(&report)?);
    } else if !args.quiet {
        let mut console = ConsoleReporter::new();
        if args.verbose {
            console = console.verbose();
        }
        console.report(&report);
    }

    if args.dry_run {
        if !args.quiet {
            eprintln!("{}: dry run, no files written", "Info".blue());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let out_dir = config.output_dir(&data_dir);
    let written = publish(&report, &out_dir)?;
    if !args.quiet {
        eprintln!(
            "{}: wrote {} files to {}",
            "Done".green().bold(),
            written.len(),
            out_dir.display()
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// `env_logger` at `warn` by default; `RUST_LOG` takes precedence over the flags
fn init_logging(verbose: bool, quiet: bool) {
    let level = if quiet {
        "error"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

/// Effective data directory and configuration. CLI values win over the config file.
fn resolve(
    path: Option<&Path>,
    config_path: Option<&Path>,
    output: Option<&Path>,
) -> Result<(PathBuf, Config)> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let work_dir = match path {
        Some(p) if p.is_dir() => p.to_path_buf(),
        _ => cwd,
    };

    let config = load_config(&work_dir, config_path)?.merge_with_cli(path, output);
    let data_dir = config.data_dir().ok_or(PipelineError::MissingDataDir)?;
    Ok((data_dir, config))
}

fn run_summary(path: Option<&Path>, config_path: Option<&Path>) -> Result<ExitCode> {
    let (data_dir, config) = resolve(path, config_path, None)?;
    let summary = facestats::summarize(&data_dir, &config)?;
    print!("{}", JsonReporter::new().pretty().summary(&summary)?);
    Ok(ExitCode::SUCCESS)
}

fn run_init(dir: Option<&Path>) -> Result<ExitCode> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let dir = dir.unwrap_or(&cwd);
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() {
        eprintln!(
            "{}: {} already exists; use --dir to write elsewhere or remove it first",
            "Warning".yellow(),
            config_path.display()
        );
        return Ok(ExitCode::SUCCESS);
    }

    std::fs::write(&config_path, default_config_json())
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

    println!("{}: Created {}", "Done".green().bold(), config_path.display());
    Ok(ExitCode::SUCCESS)
}
