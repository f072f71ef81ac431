use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::ratelimit::Lease;
use tollgate::{Clock, DecisionEngine, ManualClock, MonotonicClock, RequestDescriptor, TollgateConfig};

/// Admission control policy tool.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, global = true, default_value = "tollgate.yaml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and list its policies
    Check,

    /// Replay a burst of requests against a policy on a simulated clock
    Simulate {
        /// Policy to check requests against
        #[arg(short, long)]
        policy: String,

        /// Number of requests to send
        #[arg(short = 'n', long, default_value_t = 10)]
        requests: u32,

        /// Simulated time between requests, in milliseconds
        #[arg(short, long, default_value_t = 0)]
        interval_ms: u64,

        /// Client address attached to every request
        #[arg(long)]
        client: Option<IpAddr>,

        /// Query parameter attached to every request (repeatable)
        #[arg(long, value_parser = parse_pair)]
        query: Vec<(String, String)>,

        /// Header attached to every request (repeatable)
        #[arg(long, value_parser = parse_pair)]
        header: Vec<(String, String)>,

        /// Print decisions as JSON lines
        #[arg(long)]
        json: bool,
    },
}

/// One simulated decision, as printed.
#[derive(Debug, Serialize)]
struct SimulatedDecision {
    request: u32,
    at_ms: u128,
    decision: String,
    partition: String,
    remaining: Option<u64>,
    retry_after_secs: Option<u64>,
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
    Ok((name.to_string(), value.to_string()))
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = TollgateConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    match cli.command {
        Command::Check => check(&config),
        Command::Simulate {
            policy,
            requests,
            interval_ms,
            client,
            query,
            header,
            json,
        } => {
            let mut descriptor = RequestDescriptor::new();
            if let Some(addr) = client {
                descriptor = descriptor.with_client_addr(addr);
            }
            for (name, value) in query {
                descriptor = descriptor.with_query(name, value);
            }
            for (name, value) in header {
                descriptor = descriptor.with_header(name, value);
            }

            simulate(
                &config,
                &policy,
                &descriptor,
                requests,
                Duration::from_millis(interval_ms),
                json,
            )
        }
    }
}

fn check(config: &TollgateConfig) -> anyhow::Result<()> {
    let engine = DecisionEngine::from_config(config, MonotonicClock::new())
        .context("configuration is invalid")?;

    for policy in config.policies()? {
        let limit = policy.limit();
        println!(
            "{}: {} (limit {}), {} tier(s)",
            policy.name(),
            limit.kind(),
            limit.limit(),
            policy.tiers().len()
        );
        for tier in policy.tiers() {
            println!("  tier {}", tier.name());
        }
    }

    println!(
        "{} policies OK, rejected requests answer {}",
        engine.registry().len(),
        config.engine.rejection_status_code
    );
    Ok(())
}

fn simulate(
    config: &TollgateConfig,
    policy: &str,
    descriptor: &RequestDescriptor,
    requests: u32,
    interval: Duration,
    json: bool,
) -> anyhow::Result<()> {
    let clock = Arc::new(ManualClock::default());
    let engine = DecisionEngine::from_config(config, Arc::clone(&clock))?;

    // Admitted leases stay alive for the whole run, so concurrency permits
    // are only returned at the end.
    let mut held: Vec<Lease> = Vec::new();
    let mut admitted = 0u32;

    for request in 0..requests {
        let at = clock.now();
        let lease = engine
            .check(policy, descriptor)
            .with_context(|| format!("request {} failed", request))?;

        let record = SimulatedDecision {
            request,
            at_ms: at.as_millis(),
            decision: lease.decision().to_string(),
            partition: lease.partition().to_string(),
            remaining: lease.remaining(),
            retry_after_secs: lease.retry_after_secs(),
        };

        if json {
            println!("{}", serde_json::to_string(&record)?);
        } else {
            println!(
                "#{:<4} t={:>8}ms {:<8} {} remaining={} retry_after={}",
                record.request,
                record.at_ms,
                record.decision,
                record.partition,
                record.remaining.map_or("-".to_string(), |r| r.to_string()),
                record
                    .retry_after_secs
                    .map_or("-".to_string(), |s| format!("{}s", s)),
            );
        }

        if lease.is_admitted() {
            admitted += 1;
            held.push(lease);
        }
        clock.advance(interval);
    }

    info!(
        policy = %policy,
        requests,
        admitted,
        rejected = requests - admitted,
        "Simulation finished"
    );
    Ok(())
}
