use clap::{Args, Parser, Subcommand, ValueEnum};
use sales_harness::application::lifecycle::ApprovalChain;
use sales_harness::application::scenarios::Scenario;
use sales_harness::config::{parse_approval_steps, Credentials, HarnessConfig, TenantSelection};
use sales_harness::domain::tenant::TenantId;
use std::path::PathBuf;

/// Walks sales documents through their approval workflows against a running
/// server and stops at the first broken step.
#[derive(Debug, Parser)]
#[command(name = "sales-smoke", version, about)]
pub struct Cli {
    /// API root, e.g. http://localhost:3001
    #[arg(long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    #[arg(long, global = true)]
    pub email: Option<String>,

    #[arg(long, global = true)]
    pub password: Option<String>,

    /// Activate this tenant instead of the first available one
    #[arg(long, global = true, value_name = "ID")]
    pub tenant_id: Option<String>,

    /// Comma separated approval step indices, e.g. `0,1`
    #[arg(long, global = true, value_name = "STEPS", value_parser = parse_approval_steps)]
    pub approval_steps: Option<ApprovalChain>,

    /// Env file read instead of `.env`
    #[arg(long, global = true, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Log filter; defaults to `RUST_LOG`, then `info`
    #[arg(long, global = true, value_name = "FILTER")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run scenarios (all of them unless some are named)
    Run(RunArgs),
    /// Print the scenario names
    Scenarios,
}

#[derive(Debug, Default, Args)]
pub struct RunArgs {
    #[arg(long = "scenario", short = 's', value_enum)]
    pub scenarios: Vec<ScenarioArg>,

    /// Run against the in-memory emulation instead of a server
    #[arg(long)]
    pub offline: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScenarioArg {
    Order,
    Invoice,
    CreditNote,
}

impl From<ScenarioArg> for Scenario {
    fn from(arg: ScenarioArg) -> Self {
        match arg {
            ScenarioArg::Order => Scenario::Order,
            ScenarioArg::Invoice => Scenario::Invoice,
            ScenarioArg::CreditNote => Scenario::CreditNote,
        }
    }
}

impl RunArgs {
    pub fn scenarios(&self) -> Vec<Scenario> {
        self.scenarios.iter().copied().map(Scenario::from).collect()
    }
}

impl Cli {
    /// Flags win over whatever the environment provided.
    pub fn apply(&self, mut config: HarnessConfig) -> HarnessConfig {
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        if self.email.is_some() || self.password.is_some() {
            config.credentials = Credentials::new(
                self.email.clone().unwrap_or(config.credentials.email),
                self.password
                    .clone()
                    .unwrap_or(config.credentials.password),
            );
        }
        if let Some(id) = &self.tenant_id {
            config.tenant_selection = TenantSelection::Explicit(TenantId::new(id.as_str()));
        }
        if let Some(chain) = &self.approval_steps {
            config.approval_chain = chain.clone();
        }
        config
    }
}
