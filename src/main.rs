use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use deployctl::config::{self, Config};
use deployctl::deploy::{
    ComposeRunner, HealthPoller, NginxReloader, Orchestrator, ServiceProbe, TokioClock,
};
use deployctl::error::OrchestrateError;
use deployctl::observability;
use deployctl::tls::{CertificateManager, CertificateOutcome, CertificateStore, LetsEncryptClient};

#[derive(Parser)]
#[command(name = "deployctl")]
#[command(about = "Certificate lifecycle and health-gated deployment orchestrator", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "deploy.toml", env = "DEPLOYCTL_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate, ensure certificates, start the group, wait for health (default)
    Deploy {
        /// Re-issue certificates even when valid ones are present
        #[arg(long)]
        force_certs: bool,
    },
    /// Stop the service group
    Stop,
    /// Show container and certificate status
    Status {
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the service group's log tail
    Logs {
        #[arg(long, default_value_t = 100)]
        tail: usize,
        /// Limit to the named services
        services: Vec<String>,
    },
    /// Renew certificates nearing expiry and signal the proxy to reload
    Renew {
        /// Renew every domain regardless of remaining validity
        #[arg(long)]
        force: bool,
        /// Keep running and re-check on the configured schedule
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(&cli.config)?;
    let _guard = observability::logging::init_logging(&config.logging);
    let config = Arc::new(config);

    let store = CertificateStore::new(&config.lets_encrypt.store_dir);
    let acme = Arc::new(LetsEncryptClient::new(&config.lets_encrypt));
    let manager = CertificateManager::new(config.lets_encrypt.clone(), store.clone(), acme);
    let runner = Arc::new(
        ComposeRunner::new(
            &config.service_group.name,
            &config.service_group.compose_file,
            &config.service_group.work_dir,
        )
        .await,
    );
    let orchestrator = Orchestrator::new(config.clone(), runner.clone(), store);

    let command = cli.command.unwrap_or(Commands::Deploy { force_certs: false });
    let result = match command {
        Commands::Deploy { force_certs } => {
            run_deploy(&config, &manager, &orchestrator, force_certs).await
        }
        Commands::Stop => orchestrator.stop().await,
        Commands::Status { json } => run_status(&orchestrator, json).await,
        Commands::Logs { tail, services } => match orchestrator.logs(tail, &services).await {
            Ok(output) => {
                print!("{}", output);
                Ok(())
            }
            Err(e) => Err(e),
        },
        Commands::Renew { force, watch } => {
            run_renew(&config, &manager, &runner, force, watch).await
        }
    };

    if let Err(e) = result {
        error!(kind = e.kind(), "{}", e);
        std::process::exit(1);
    }
    Ok(())
}

/// The full deployment sequence: validate, certificates, start, health gate.
async fn run_deploy(
    config: &Arc<Config>,
    manager: &CertificateManager,
    orchestrator: &Orchestrator,
    force_certs: bool,
) -> Result<(), OrchestrateError> {
    config.validate()?;

    // Certificate work for every domain completes, successfully or with a
    // recorded failure, before any service is started.
    let outcomes = manager.ensure_all(force_certs).await;
    report_outcomes(&outcomes);

    orchestrator.validate()?;
    orchestrator.deploy().await?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    let poller = HealthPoller::new(
        Arc::new(ServiceProbe::new()),
        Arc::new(TokioClock),
        Duration::from_secs(config.health.poll_interval_secs),
        Duration::from_secs(config.health.max_wait_secs),
    );
    let report = poller
        .await_group(&config.service_group.services, &cancel)
        .await;

    if report.cancelled {
        warn!("Deployment attempt cancelled; services are left running");
        std::process::exit(130);
    }

    if report.is_success() {
        info!(
            "Deployment of {} successful: all services healthy",
            config.service_group.name
        );
        return Ok(());
    }

    // Surface logs of the services that never reported healthy before
    // failing; diagnosis is the operator's call, there is no rollback.
    match orchestrator.logs(50, &report.unhealthy).await {
        Ok(output) => {
            eprintln!("--- logs of unhealthy services ---");
            eprint!("{}", output);
        }
        Err(e) => warn!("Could not fetch logs of unhealthy services: {}", e),
    }

    Err(OrchestrateError::TimedOut {
        unhealthy: report.unhealthy,
    })
}

async fn run_status(orchestrator: &Orchestrator, json: bool) -> Result<(), OrchestrateError> {
    let report = orchestrator.status().await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string())
        );
        return Ok(());
    }

    println!("Service group: {}", report.group);
    print!("{}", report.containers);
    println!("Certificates:");
    for cert in &report.certificates {
        match (&cert.expires_at, cert.days_until_expiry) {
            (Some(expires_at), Some(days)) => {
                println!("  {}: expires {} ({} days)", cert.domain, expires_at, days)
            }
            _ => println!("  {}: MISSING", cert.domain),
        }
    }
    Ok(())
}

async fn run_renew(
    config: &Arc<Config>,
    manager: &CertificateManager,
    runner: &Arc<ComposeRunner>,
    force: bool,
    watch: bool,
) -> Result<(), OrchestrateError> {
    config.validate()?;
    let reloader = NginxReloader::new((**runner).clone(), &config.service_group.proxy_service);

    let outcomes = manager.renew_all(force, &reloader).await;
    report_outcomes(&outcomes);

    if !watch {
        return first_failure(outcomes);
    }

    let mut timer = tokio::time::interval(Duration::from_secs(
        config.lets_encrypt.renew_check_interval_secs,
    ));
    timer.tick().await; // the pass above covered the immediate tick
    loop {
        timer.tick().await;
        let outcomes = manager.renew_all(false, &reloader).await;
        report_outcomes(&outcomes);
    }
}

fn report_outcomes(outcomes: &[CertificateOutcome]) {
    for outcome in outcomes {
        match outcome {
            CertificateOutcome::Valid { cert } => info!(
                "Certificate for {} already valid (expires {})",
                cert.domain, cert.expires_at
            ),
            CertificateOutcome::Issued {
                domain,
                renewal,
                fullchain_path,
                ..
            } => info!(
                "{} certificate for {} at {}",
                if *renewal { "Renewed" } else { "Issued" },
                domain,
                fullchain_path.display()
            ),
            CertificateOutcome::Failed { domain, error } => {
                error!(kind = error.kind(), "Certificate for {} failed: {}", domain, error)
            }
        }
    }
}

fn first_failure(outcomes: Vec<CertificateOutcome>) -> Result<(), OrchestrateError> {
    for outcome in outcomes {
        if let CertificateOutcome::Failed { error, .. } = outcome {
            return Err(error);
        }
    }
    Ok(())
}
