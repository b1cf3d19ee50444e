//! ONTAP Reconciler
//!
//! Drives a NetApp ONTAP cluster toward the desired state of one resource:
//! - reads the module parameters from a YAML or JSON file
//! - talks REST or ZAPI depending on the cluster and `use_rest`
//! - prints the outcome (`changed`, `failed`, `msg`, `modify`, `warnings`)
//!   as JSON on stdout; logs go to stderr

mod adapter;
mod backoff;
mod controller;
mod emitter;
mod error;
mod gate;
mod host;
mod kernel;
mod mapping;
mod model;
mod modules;
mod params;
#[cfg(test)]
mod test_utils;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Reconcile one ONTAP resource toward its desired state
#[derive(Debug, Parser)]
#[command(name = "ontap-reconciler", version, about)]
struct Cli {
    /// Module to run, e.g. `aggregate`, `lun`, `user_role`
    #[arg(long, short = 'm')]
    module: String,

    /// YAML or JSON file with the module parameters
    #[arg(long, short = 'p')]
    params: PathBuf,

    /// Report what would change without changing anything
    #[arg(long)]
    check_mode: bool,

    /// Cluster management address, used when the parameter file has none
    #[arg(long, env = "ONTAP_HOSTNAME")]
    hostname: Option<String>,

    /// Cluster user, used when the parameter file has none
    #[arg(long, env = "ONTAP_USERNAME")]
    username: Option<String>,

    /// Cluster password, used when the parameter file has none
    #[arg(long, env = "ONTAP_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log format on stderr
    #[arg(long, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(verbose: u8, format: LogFormat) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_params(cli: &Cli) -> anyhow::Result<serde_json::Map<String, Value>> {
    let text = std::fs::read_to_string(&cli.params)
        .with_context(|| format!("failed to read {}", cli.params.display()))?;
    let value: Value = serde_yaml::from_str(&text)
        .with_context(|| format!("failed to parse {}", cli.params.display()))?;
    let mut params = match value {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => anyhow::bail!("{}: expected a mapping of parameters, got {other}", cli.params.display()),
    };
    host::merge_env_defaults(
        &mut params,
        &[
            ("hostname", cli.hostname.clone()),
            ("username", cli.username.clone()),
            ("password", cli.password.clone()),
        ],
    );
    Ok(params)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    info!("Starting ONTAP reconciler: module {}", cli.module);
    let params = load_params(&cli)?;

    let outcome = controller::run(&cli.module, params, cli.check_mode).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
