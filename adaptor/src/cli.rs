use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use serde_json::Value;
use serde_json::json;
use tracing::error;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::adaptor::HoudiniAdaptor;
use crate::config::AdaptorConfig;
use crate::path_mapping::parse_rules;
use crate::telemetry::INTEGRATION_DATA_INTERFACE_VERSION;

const FILE_PREFIX: &str = "file://";

/// Runs Houdini renders headlessly for a render farm worker.
#[derive(Debug, Parser)]
#[command(name = "houdini-adaptor", version)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start Houdini, render every run-data payload in order, then shut down.
    Run(RunArgs),
    /// Print the adaptor and data interface versions as JSON.
    VersionInfo,
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    /// Init data as inline JSON or `file://<path>`.
    #[arg(long = "init-data", value_name = "JSON")]
    init_data: String,
    /// Run data for one task, inline JSON or `file://<path>`. Repeatable.
    #[arg(long = "run-data", value_name = "JSON")]
    run_data: Vec<String>,
    /// Adaptor config file (TOML).
    #[arg(long = "config", value_name = "FILE")]
    config: Option<PathBuf>,
    /// Path mapping rules as inline JSON or `file://<path>`.
    #[arg(long = "path-mapping-rules", value_name = "JSON")]
    path_mapping_rules: Option<String>,
}

/// Returns the process exit code.
pub fn run(cli: Cli) -> u8 {
    match cli.command {
        Command::Run(args) => {
            let config = match args.config.as_deref().map(AdaptorConfig::load).transpose() {
                Ok(config) => config.unwrap_or_default(),
                Err(err) => {
                    setup_tracing(&AdaptorConfig::default().log_level);
                    error!("{err}");
                    return 1;
                }
            };
            setup_tracing(&config.log_level);
            match run_lifecycle(&args, config) {
                Ok(()) => 0,
                Err(err) => {
                    error!("{err:#}");
                    1
                }
            }
        }
        Command::VersionInfo => {
            let info = json!({
                "adaptor_version": env!("CARGO_PKG_VERSION"),
                "integration_data_interface_version": INTEGRATION_DATA_INTERFACE_VERSION,
            });
            println!("{info}");
            0
        }
    }
}

fn run_lifecycle(args: &RunArgs, config: AdaptorConfig) -> Result<()> {
    let init_data = load_json(&args.init_data).context("invalid --init-data")?;
    let run_data = args
        .run_data
        .iter()
        .map(|raw| load_json(raw).context("invalid --run-data"))
        .collect::<Result<Vec<_>>>()?;
    let rules = match args.path_mapping_rules.as_deref() {
        Some(raw) => parse_rules(&load_text(raw)?).context("invalid --path-mapping-rules")?,
        None => Vec::new(),
    };

    let mut adaptor = HoudiniAdaptor::new(init_data, config).with_path_mapping_rules(rules);
    let cancel = adaptor.cancel_handle();
    if let Err(err) = ctrlc::set_handler(move || cancel.cancel()) {
        warn!("failed to install Ctrl-C handler: {err}");
    }

    let result = drive(&mut adaptor, run_data);
    adaptor.on_cleanup();
    result
}

fn drive(adaptor: &mut HoudiniAdaptor, run_data: Vec<Value>) -> Result<()> {
    adaptor.on_start()?;
    for task in run_data {
        adaptor.on_run(task)?;
    }
    adaptor.on_stop();
    Ok(())
}

fn load_text(raw: &str) -> Result<String> {
    match raw.strip_prefix(FILE_PREFIX) {
        Some(path) => std::fs::read_to_string(Path::new(path))
            .with_context(|| format!("failed to read {path}")),
        None => Ok(raw.to_string()),
    }
}

fn load_json(raw: &str) -> Result<Value> {
    let text = load_text(raw)?;
    Ok(serde_json::from_str(&text)?)
}

fn setup_tracing(default_level: &str) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
