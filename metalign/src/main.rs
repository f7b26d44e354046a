use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};

use metalign::error::Result;
use metalign::io::read_feature_file;
use metalign::params::AlignmentParams;
use metalign::MultiRunAligner;

#[derive(Parser)]
#[command(name = "metalign")]
#[command(about = "Calibrate and align LC-MS features across runs", long_about = None)]
#[command(version)]
struct Cli {
    /// Parameter file with `key = value` lines
    #[arg(short = 'p', long, value_name = "FILE")]
    params: PathBuf,

    /// Reference run name, overriding `reference_feature` of the parameter file
    #[arg(short = 'r', long, value_name = "NAME")]
    reference: Option<String>,

    /// Number of worker threads (default: all cores)
    #[arg(short = 't', long, value_name = "INT")]
    threads: Option<usize>,

    /// Print the alignment summary as JSON to stdout
    #[arg(long)]
    summary_json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,

    /// Tab-delimited feature files, one per run
    #[arg(value_name = "FEATURE_FILE", required = true)]
    features: Vec<PathBuf>,
}

fn run(cli: Cli) -> Result<()> {
    let mut params = AlignmentParams::from_file(&cli.params)?;
    if let Some(reference) = cli.reference {
        params.reference_feature = reference;
    }

    if let Some(n) = cli.threads {
        match rayon::ThreadPoolBuilder::new().num_threads(n.max(1)).build_global() {
            Ok(_) => log::debug!("Built global thread pool with {} threads", n.max(1)),
            Err(e) => log::warn!("Failed to configure thread pool: {}", e),
        }
    }

    let runs = cli.features.iter().map(read_feature_file).collect::<Result<Vec<_>>>()?;
    let outcome = MultiRunAligner::new(params).align(runs)?;

    log::info!(
        "{} fully aligned and {} partially aligned features against {}",
        outcome.result.full.len(),
        outcome.result.partial.len(),
        outcome.runs[outcome.reference].name
    );

    if cli.summary_json {
        println!("{}", serde_json::to_string_pretty(&outcome.summary())?);
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_target(false)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
