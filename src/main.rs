//! Nosana Deployer
//!
//! Command line entry point: posts jobs, creates and funds deployments and
//! drives them to a running state.

#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(unused_must_use)]

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nosana_deployer::address::{parse_address, to_ui_amount, NOS_DECIMALS};
use nosana_deployer::deployment::DeploymentStrategy;
use nosana_deployer::funding::market::token_account_amount;
use nosana_deployer::funding::FundingReceipt;
use nosana_deployer::{Config, DeployRequest, Deployer, DeployerContext, JobDefinition};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON logs and JSON results
    #[arg(long, global = true)]
    json: bool,

    /// Print Prometheus metrics after the command finishes
    #[arg(long, global = true)]
    dump_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Post a job directly to the Jobs program
    Post {
        #[command(flatten)]
        job: JobArgs,
    },
    /// Create, fund and start a deployment
    Deploy {
        #[arg(long)]
        name: String,
        #[command(flatten)]
        job: JobArgs,
        #[arg(long, default_value_t = 1)]
        replicas: u32,
        /// SIMPLE, SIMPLE-EXTEND, SCHEDULED or INFINITE
        #[arg(long, default_value = "SIMPLE")]
        strategy: String,
        /// Cron expression for the scheduled strategy
        #[arg(long)]
        schedule: Option<String>,
        /// Return once started instead of waiting for a stable status
        #[arg(long)]
        no_wait: bool,
    },
    /// Show a deployment
    Status { id: String },
    /// Start a deployment, or wait for it with --wait
    Start {
        id: String,
        #[arg(long)]
        wait: bool,
        /// Completion timeout for --wait, in seconds
        #[arg(long)]
        wait_timeout: Option<u64>,
    },
    Stop { id: String },
    Archive { id: String },
    /// Change the replica count
    Scale { id: String, replicas: u32 },
    /// Change the job timeout, in seconds
    Extend { id: String, timeout: u64 },
    /// Fund a deployment vault, or only plan it with --plan
    Fund {
        /// Deployment id whose vault is topped up
        id: Option<String>,
        #[arg(long)]
        market: Option<String>,
        #[arg(long)]
        plan: bool,
    },
    /// Show the wallet address and balances
    Wallet,
}

#[derive(clap::Args, Debug)]
struct JobArgs {
    /// Content address of an already stored job definition
    #[arg(long, conflicts_with = "file")]
    cid: Option<String>,
    /// Job definition file, uploaded before use
    #[arg(long)]
    file: Option<PathBuf>,
    #[arg(long)]
    market: Option<String>,
    /// Job timeout in seconds
    #[arg(long, default_value_t = 3600)]
    timeout: u64,
}

impl JobArgs {
    fn definition(&self) -> Result<JobDefinition> {
        match (&self.cid, &self.file) {
            (Some(cid), _) => Ok(JobDefinition::ContentAddress(cid.clone())),
            (None, Some(path)) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read job definition {}", path.display()))?;
                let document = serde_json::from_str(&content)
                    .with_context(|| format!("Job definition {} is not valid JSON", path.display()))?;
                Ok(JobDefinition::Json(document))
            }
            (None, None) => bail!("either --cid or --file is required"),
        }
    }

    fn market(&self) -> Result<Option<Pubkey>> {
        parse_market(self.market.as_deref())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.json)?;
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    let deployer = Deployer::new(DeployerContext::from_config(&config)?);

    let result = run(&deployer, &args).await;

    if args.dump_metrics {
        let text = deployer
            .context()
            .metrics
            .encode_text()
            .context("Failed to encode metrics")?;
        eprintln!("{}", text);
    }
    result
}

async fn run(deployer: &Deployer, args: &Args) -> Result<()> {
    match &args.command {
        Command::Post { job } => {
            let posted = deployer
                .post_job(job.market()?, &job.definition()?, job.timeout)
                .await?;
            emit(args.json, &posted, || {
                format!(
                    "Job {} posted (run {}, tx {})\n  content: {}",
                    posted.job, posted.run, posted.signature, posted.content_address
                )
            })
        }
        Command::Deploy {
            name,
            job,
            replicas,
            strategy,
            schedule,
            no_wait,
        } => {
            let strategy = DeploymentStrategy::from_str(strategy).map_err(anyhow::Error::msg)?;
            let mut request = DeployRequest::new(name.clone(), job.definition()?);
            request.market = job.market()?;
            request.replicas = *replicas;
            request.timeout_secs = job.timeout;
            request.strategy = strategy;
            request.schedule = schedule.clone();
            request.wait = !no_wait;

            let outcome = deployer.deploy(request).await?;
            let summary = outcome.summary();
            emit(args.json, &summary, || {
                let history: Vec<&str> = summary.history.iter().map(|s| s.as_str()).collect();
                format!(
                    "Deployment {} is {}\n  vault: {}\n  funding: {}\n  history: {}",
                    summary.id,
                    summary.status,
                    summary.vault,
                    describe_receipt(&outcome.funding),
                    history.join(" -> ")
                )
            })
        }
        Command::Status { id } => {
            let deployment = deployer.status(id).await?;
            emit(args.json, &deployment, || {
                let mut text = format!(
                    "Deployment {} is {} ({} replicas, timeout {}s)",
                    deployment.id, deployment.status, deployment.replicas, deployment.timeout
                );
                let events = deployment.event_log();
                if !events.is_empty() {
                    text.push('\n');
                    text.push_str(&events);
                }
                text
            })
        }
        Command::Start {
            id,
            wait,
            wait_timeout,
        } => {
            let report = deployer.start(id).await?;
            info!(attempts = report.attempts, restarts = report.restarts, "Start finished");
            let deployment = if *wait && !report.deployment.status.is_stable() {
                deployer
                    .wait(id, wait_timeout.map(Duration::from_secs))
                    .await?
                    .deployment
            } else {
                report.deployment
            };
            emit(args.json, &deployment, || {
                format!("Deployment {} is {}", deployment.id, deployment.status)
            })
        }
        Command::Stop { id } => {
            let status = deployer.stop(id).await?;
            emit(args.json, &status, || format!("Deployment {} is {}", id, status))
        }
        Command::Archive { id } => {
            deployer.archive(id).await?;
            emit(args.json, &serde_json::json!({ "id": id, "archived": true }), || {
                format!("Deployment {} archived", id)
            })
        }
        Command::Scale { id, replicas } => {
            let deployment = deployer.scale(id, *replicas).await?;
            emit(args.json, &deployment, || {
                format!("Deployment {} has {} replicas", deployment.id, deployment.replicas)
            })
        }
        Command::Extend { id, timeout } => {
            let deployment = deployer.extend(id, *timeout).await?;
            emit(args.json, &deployment, || {
                format!("Deployment {} timeout is {}s", deployment.id, deployment.timeout)
            })
        }
        Command::Fund { id, market, plan } => {
            let id = match id {
                Some(id) if !*plan => id,
                _ => return show_plan(deployer, args.json, market.as_deref()).await,
            };
            if market.is_some() {
                warn!("--market is ignored when topping up a deployment; its own market is used");
            }
            let receipt = deployer.top_up(id).await?;
            let value = serde_json::json!({
                "id": id,
                "signature": receipt.signature().map(|s| s.to_string()),
            });
            emit(args.json, &value, || format!("Deployment {}: {}", id, describe_receipt(&receipt)))
        }
        Command::Wallet => {
            let ctx = deployer.context();
            let owner = ctx.wallet.pubkey();
            let lamports = ctx.ledger.get_balance(&owner).await?;
            let tokens = match ctx.ledger.get_account_data(&ctx.ids.token_account(&owner)).await? {
                Some(data) => token_account_amount(&data)?,
                None => 0,
            };
            let value = serde_json::json!({
                "address": owner.to_string(),
                "lamports": lamports,
                "tokens": tokens,
            });
            emit(args.json, &value, || {
                format!(
                    "Wallet {}\n  SOL: {:.9}\n  NOS: {:.6}",
                    owner,
                    to_ui_amount(lamports, 9),
                    to_ui_amount(tokens, NOS_DECIMALS)
                )
            })
        }
    }
}

async fn show_plan(deployer: &Deployer, json: bool, market: Option<&str>) -> Result<()> {
    let plan = deployer.plan_funding(parse_market(market)?).await?;
    let value = serde_json::json!({
        "market_price": plan.market_price,
        "wallet_lamports": plan.wallet_lamports,
        "native_lamports": plan.native_lamports,
        "token_amount": plan.token_amount,
        "token_deferred": plan.token_deferred,
    });
    emit(json, &value, || {
        format!(
            "Would move {} lamports and {:.6} NOS (deferred: {})",
            plan.native_lamports,
            to_ui_amount(plan.token_amount, NOS_DECIMALS),
            plan.token_deferred
        )
    })
}

fn parse_market(value: Option<&str>) -> Result<Option<Pubkey>> {
    value
        .map(|m| parse_address("market", m))
        .transpose()
        .context("Invalid --market")
}

fn describe_receipt(receipt: &FundingReceipt) -> String {
    match receipt {
        FundingReceipt::NotRequired => "not required".to_string(),
        FundingReceipt::Funded {
            signature,
            native_lamports,
            token_amount,
            ..
        } => format!(
            "{} lamports + {:.6} NOS (tx {})",
            native_lamports,
            to_ui_amount(*token_amount, NOS_DECIMALS),
            signature
        ),
    }
}

/// Print `value` as JSON, or the human rendering
fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce() -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", human());
    }
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let env_filter = if verbose {
        "nosana_deployer=debug,info"
    } else {
        "nosana_deployer=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| env_filter.into());

    // Logs go to stderr so --json output on stdout stays parseable
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    Ok(())
}

/// Load configuration from file with fallback to defaults plus environment
fn load_config(path: &std::path::Path) -> Result<Config> {
    if path.exists() {
        Config::from_file_with_env(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))
    } else {
        warn!("Config file '{}' not found, using defaults", path.display());
        Ok(Config::from_env())
    }
}
