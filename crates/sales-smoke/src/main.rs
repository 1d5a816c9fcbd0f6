mod cli;

use anyhow::Context;
use clap::Parser;
use sales_client::SalesClient;
use sales_fake::InMemorySalesServer;
use sales_harness::application::scenarios::{RunSummary, Scenario, SmokeRun};
use sales_harness::config::HarnessConfig;
use sales_harness::errors::HarnessError;
use sales_harness::ports::api_transport::ApiTransport;
use sales_harness::reporter::Reporter;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, RunArgs};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err
                .downcast_ref::<HarnessError>()
                .map_or(1, HarnessError::exit_code);
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    // An explicit env file must exist; the default .env is optional.
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path).with_context(|| format!("loading {}", path.display()))?;
        }
        None => {
            let _ = dotenvy::dotenv();
        }
    }
    init_tracing(cli.log_level.as_deref());

    let config = cli.apply(HarnessConfig::from_env()?);
    let run_all = RunArgs::default();
    let args = match &cli.command {
        Some(Command::Scenarios) => {
            for scenario in Scenario::ALL {
                println!("{scenario}");
            }
            return Ok(ExitCode::SUCCESS);
        }
        Some(Command::Run(args)) => args,
        None => &run_all,
    };
    let scenarios = args.scenarios();

    let code = if args.offline {
        tracing::info!("running against the in-memory emulation");
        smoke(InMemorySalesServer::seeded(), config, &scenarios).await
    } else {
        let client = SalesClient::new(&config.base_url)
            .with_context(|| format!("building client for {}", config.base_url))?;
        smoke(client, config, &scenarios).await
    };
    Ok(code)
}

/// Failures are printed by the reporter against their step; only the exit
/// code is left to the caller.
async fn smoke<T: ApiTransport>(transport: T, config: HarnessConfig, scenarios: &[Scenario]) -> ExitCode {
    let mut run = SmokeRun::new(transport, config, Reporter::console());
    match run.execute(scenarios).await {
        Ok(summary) => {
            print_documents(&summary);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{}", run.reporter().summary());
            ExitCode::from(err.exit_code())
        }
    }
}

fn print_documents(summary: &RunSummary) {
    println!("Tenant: {}", summary.tenant);
    for outcome in &summary.outcomes {
        for doc in &outcome.documents {
            println!(
                "  [{}] {} {} ({}): {}",
                outcome.scenario,
                doc.kind,
                doc.number(),
                doc.id(),
                doc.trail().render()
            );
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
