use clap::Parser;
use miette::{IntoDiagnostic, Result};
use pgflow::application::gateway::PaymentGateway;
use pgflow::application::orchestrator::Strategy;
use pgflow::config::GatewayConfig;
use pgflow::domain::provider::ProviderId;
use pgflow::infrastructure::simulated::SimulatedProvider;
use pgflow::interfaces::csv::outcome_writer::{OutcomeRecord, OutcomeWriter};
use pgflow::interfaces::csv::request_reader::RequestReader;
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Payment requests CSV file
    input: PathBuf,

    /// JSON gateway configuration. Read from the environment when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured strategy (single, exhaust-all, fail-fast, round-robin)
    #[arg(long)]
    strategy: Option<Strategy>,

    /// Provider tried first when available
    #[arg(long)]
    preferred: Option<ProviderId>,

    /// Maximum number of requests in flight
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Run each request through the standard payment workflow
    #[arg(long)]
    workflow: bool,

    /// Print the health report as JSON on stderr after the batch
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => GatewayConfig::from_json_file(path),
        None => GatewayConfig::from_env(),
    }
    .into_diagnostic()?;
    if let Some(strategy) = cli.strategy {
        config.orchestrator.strategy = strategy;
    }

    let gateway = PaymentGateway::new(
        config,
        ProviderId::ALL.map(|provider| (provider, SimulatedProvider::constructor())),
    )
    .into_diagnostic()?;

    let file = File::open(&cli.input).into_diagnostic()?;
    let mut requests = Vec::new();
    for (row, result) in RequestReader::new(file).requests().enumerate() {
        match result {
            Ok(request) => requests.push(request),
            Err(e) => warn!(row = row + 1, error = %e, "Error reading payment request, skipped"),
        }
    }

    let results = gateway
        .process_batch(&requests, cli.preferred, cli.workflow, cli.max_concurrency)
        .await;

    let stdout = io::stdout();
    let mut writer = OutcomeWriter::new(stdout.lock());
    writer
        .write_outcomes(
            requests
                .iter()
                .zip(&results)
                .map(|(request, result)| OutcomeRecord::from_result(request.order_id(), result)),
        )
        .into_diagnostic()?;

    if cli.health {
        let report = gateway.health_check().await;
        eprintln!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
    }

    gateway.close().await.into_diagnostic()?;
    Ok(())
}
