//! kfxpack - KPF to KFX fragment repacker

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use kfxpack::{Config, convert_kpf};

#[derive(Parser)]
#[command(name = "kfxpack")]
#[command(version, about = "Repack Kindle Previewer books into KFX fragments", long_about = None)]
#[command(after_help = "EXAMPLES:
    kfxpack book.kpf                 Show a summary of the converted book
    kfxpack --json book.kpf          List every fragment as JSON
    kfxpack -v --work-dir out book.kpf")]
struct Cli {
    /// Input file (KPF)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// JSON settings file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Keep the unwrapped book.sqlite in this directory
    #[arg(long, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Print fragment summaries as JSON
    #[arg(long)]
    json: bool,

    /// Log skipped fragments and pipeline stages
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress output messages
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(cli: &Cli) {
    let default = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<(), String> {
    let mut config = match &cli.config {
        Some(path) => Config::from_json_file(path).map_err(|e| e.to_string())?,
        None => Config::default(),
    };
    if let Some(dir) = &cli.work_dir {
        config.work_dir = Some(dir.clone());
        config.keep_unwrapped = true;
    }

    let container = convert_kpf(&cli.input, &config).map_err(|e| {
        format!("{} ({:?}): {e}", cli.input.display(), e.class())
    })?;

    if cli.json {
        let summaries = container.fragment_summaries();
        let json = serde_json::to_string_pretty(&summaries).map_err(|e| e.to_string())?;
        println!("{json}");
    } else if !cli.quiet {
        println!("{container}");
    }
    Ok(())
}

