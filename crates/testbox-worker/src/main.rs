//! testbox worker entry point.
//!
//! Boots one sandbox per configured slot, checks that a shell session can be
//! opened into it, tears it down again and reports each outcome.
//!
//! ```text
//! testbox-worker [CONFIG_FILE] [LANGUAGE]
//! ```
//!
//! `TESTBOX_CONFIG` and `TESTBOX_LANGUAGE` are used when the arguments are
//! omitted. Without a config file the defaults apply, with `TESTBOX_…`
//! environment overrides on top.

use std::sync::Arc;
use testbox_common::WorkerConfig;
use testbox_core::{MetricsRegistry, Provider, Publisher, TcpSessionFactory};
use testbox_vm_manager::DockerBackend;
use testbox_worker::{run_smoke_job, JobReport, JobState, LogExchange};
use tokio::signal;
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("testbox=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting testbox worker");

    let mut args = std::env::args().skip(1);
    let config_path = args.next().or_else(|| std::env::var("TESTBOX_CONFIG").ok());
    let language = args.next().or_else(|| std::env::var("TESTBOX_LANGUAGE").ok());

    let config = match &config_path {
        Some(path) => WorkerConfig::from_file(path)?,
        None => WorkerConfig::from_env()?,
    };
    tracing::info!(
        path = config_path.as_deref().unwrap_or("<defaults>"),
        host = %config.host,
        vms = config.vms.count,
        "Configuration loaded"
    );

    let backend = Arc::new(DockerBackend::connect(config.docker.socket.as_deref())?);
    let metrics = Arc::new(MetricsRegistry::new());
    let provider = Provider::new(
        config,
        backend,
        Arc::new(TcpSessionFactory::new()),
        metrics.clone(),
    )
    .await?;
    provider.prepare();

    let pool = provider.pool();
    let publisher = Publisher::reporting(Arc::new(LogExchange));

    let mut jobs = JoinSet::new();
    for slot in pool.slots() {
        jobs.spawn(run_smoke_job(slot.clone(), language.clone(), publisher.clone()));
    }

    let mut reports = Vec::new();
    let interrupted = tokio::select! {
        _ = collect(&mut jobs, &mut reports) => false,
        _ = signal::ctrl_c() => true,
    };

    if interrupted {
        tracing::warn!("Interrupted, aborting running jobs");
        jobs.abort_all();
        while jobs.join_next().await.is_some() {}
    }

    // Slots of aborted jobs may still hold containers
    pool.shutdown().await;

    let passed = reports.iter().filter(|r| r.state == JobState::Passed).count();
    tracing::info!(
        passed,
        errored = reports.len() - passed,
        metrics = %serde_json::to_string(&metrics.snapshot())?,
        "Worker finished"
    );

    Ok(())
}

async fn collect(jobs: &mut JoinSet<JobReport>, reports: &mut Vec<JobReport>) {
    while let Some(joined) = jobs.join_next().await {
        match joined {
            Ok(report) => reports.push(report),
            Err(e) => tracing::error!(error = %e, "Job task failed"),
        }
    }
}
