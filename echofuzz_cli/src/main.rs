use echofuzz_core::config::{EchofuzzConfig, VulnerabilityProfile};
use echofuzz_core::executor::{CommandExecutor, CommandExecutorConfig};
use echofuzz_core::exploit::OutputScanBridge;
use echofuzz_core::fuzzer::Fuzzer;
use echofuzz_core::store::{FileResultStore, MemoryResultStore, ResultStore};

use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Target program and its arguments, split on whitespace.
    #[clap(long)]
    target_command: Option<String>,
    #[clap(long)]
    probe_length: Option<usize>,
    #[clap(long)]
    mutation_rate: Option<f64>,
    #[clap(long)]
    probes_per_worker: Option<usize>,
    /// `automated-fuzzing` (1) or `format-string` (2).
    #[clap(long)]
    profile: Option<VulnerabilityProfile>,
    #[clap(long)]
    seed: Option<u64>,
    #[clap(long, value_parser)]
    results_file: Option<PathBuf>,
    /// Used when RUST_LOG is not set.
    #[clap(long, default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: Option<PathBuf>) -> Result<EchofuzzConfig, anyhow::Error> {
    match path {
        Some(config_path) => {
            info!(path = ?config_path, "loading configuration");
            EchofuzzConfig::load_from_file(&config_path)
        }
        None => {
            let default_config_path = PathBuf::from("config.toml");
            if default_config_path.exists() {
                info!(path = ?default_config_path, "no config file specified, loading default");
                EchofuzzConfig::load_from_file(&default_config_path)
            } else {
                info!("no config file specified and 'config.toml' not found, using built-in defaults");
                Ok(EchofuzzConfig::default())
            }
        }
    }
}

fn apply_overrides(config: &mut EchofuzzConfig, cli: Cli) {
    if let Some(command) = cli.target_command {
        config.target.command = command.split_whitespace().map(str::to_string).collect();
    }
    if let Some(probe_length) = cli.probe_length {
        config.fuzzer.probe_length = probe_length;
    }
    if let Some(mutation_rate) = cli.mutation_rate {
        config.fuzzer.mutation_rate = mutation_rate;
    }
    if let Some(probes_per_worker) = cli.probes_per_worker {
        config.fuzzer.probes_per_worker = probes_per_worker;
    }
    if let Some(profile) = cli.profile {
        config.fuzzer.profile = profile;
    }
    if let Some(seed) = cli.seed {
        config.fuzzer.seed = Some(seed);
    }
    if let Some(results_file) = cli.results_file {
        config.output.results_file = results_file;
    }
}

/// Opens the results file, keeping results in memory when it cannot be created.
fn open_store(path: &Path) -> Box<dyn ResultStore> {
    match FileResultStore::create(path) {
        Ok(store) => {
            info!(path = ?store.path(), "writing results");
            Box::new(store)
        }
        Err(e) => {
            error!(error = %e, "cannot create results file, keeping results in memory");
            Box::new(MemoryResultStore::default())
        }
    }
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut config = load_config(cli.config_file.clone())?;
    apply_overrides(&mut config, cli);
    let config = config.validate()?;
    info!(
        command = ?config.command,
        profile = %config.profile,
        probe_length = config.probe_length,
        mutation_rate = config.mutation_rate,
        probes_per_worker = config.probes_per_worker,
        "effective configuration"
    );

    let executor = CommandExecutor::new(CommandExecutorConfig {
        command: config.command.clone(),
        timeout: config.timeout,
        working_dir: config.working_dir.clone(),
    });
    let mut store = open_store(&config.results_file);
    let mut bridge = OutputScanBridge::new(config.flag_pattern.clone());

    let start_time = Instant::now();
    let fuzzer = Fuzzer::new(config, executor);
    let summary = fuzzer.run(store.as_mut(), &mut bridge);

    println!(
        "\nFuzzing finished in {:.2?}. Executions: {}, Anomalies: {}",
        start_time.elapsed(),
        summary.executions,
        summary.anomalies
    );
    match &summary.report {
        Some(report) => println!("{}", report.summary()),
        None => println!("No anomalies found"),
    }
    match summary.secret {
        Some(secret) => println!("Secret: {secret}"),
        None if summary.report.is_some() => warn!("no secret could be extracted"),
        None => {}
    }

    Ok(())
}
