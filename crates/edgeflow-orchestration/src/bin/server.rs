//! # edgeflow Server
//!
//! Standalone orchestrator binary. Loads a TOML configuration naming the
//! backend cluster and strategy choices, starts the orchestrator, and runs
//! until interrupted.
//!
//! ```bash
//! edgeflow-server --config edgeflow.toml
//! RUST_LOG=debug edgeflow-server --config edgeflow.toml --port 9090
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::info;

use edgeflow_orchestration::admission::{
    AdmissionPolicy, AlwaysAdmit, DeadlineAware, MaxActiveTasks,
};
use edgeflow_orchestration::device::DeviceManager;
use edgeflow_orchestration::scaling::{
    ConservativeScalingPolicy, ScalingPolicy, UtilizationScalingPolicy,
};
use edgeflow_orchestration::scheduling::{
    ClusterScheduler, FirstFitScheduler, LeastLoadedScheduler,
};
use edgeflow_orchestration::{OrchestratorDeps, OrchestratorServer};
use edgeflow_shared::config::{
    AdmissionConfig, SchedulerConfig, ScalingPolicyConfig, ServerConfig,
};
use edgeflow_shared::{logging, Clock, Cluster, TaskTypeRegistry};

#[derive(Debug, Parser)]
#[command(name = "edgeflow-server", about = "Edge workload orchestrator")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, short)]
    config: PathBuf,

    /// Override the configured listen port
    #[arg(long)]
    port: Option<u16>,
}

fn build_deps(config: &ServerConfig) -> OrchestratorDeps {
    let mut cluster = Cluster::new();
    for backend in &config.backends {
        cluster.add_backend(backend.addr, backend.accelerator_type.clone());
    }

    let scheduler: Box<dyn ClusterScheduler> = match config.scheduler {
        SchedulerConfig::FirstFit => Box::new(FirstFitScheduler::new()),
        SchedulerConfig::LeastLoaded => Box::new(LeastLoadedScheduler::new()),
    };

    let admission_policy: Option<Box<dyn AdmissionPolicy>> =
        config.admission.as_ref().map(|admission| match admission {
            AdmissionConfig::AlwaysAdmit => Box::new(AlwaysAdmit) as Box<dyn AdmissionPolicy>,
            AdmissionConfig::MaxActiveTasks { threshold } => {
                Box::new(MaxActiveTasks::new(*threshold))
            }
            AdmissionConfig::DeadlineAware { compute_rate } => {
                Box::new(DeadlineAware::new(*compute_rate, Clock::new()))
            }
        });

    let device_manager = config.scaling.as_ref().map(|scaling| {
        let policy: Box<dyn ScalingPolicy> = match scaling.policy {
            ScalingPolicyConfig::Utilization => Box::new(UtilizationScalingPolicy),
            ScalingPolicyConfig::Conservative => Box::new(ConservativeScalingPolicy),
        };
        DeviceManager::from_config(policy, scaling)
    });

    OrchestratorDeps {
        cluster,
        scheduler,
        admission_policy,
        device_manager,
        registry: TaskTypeRegistry::new(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    let args = Args::parse();
    let raw = std::fs::read_to_string(&args.config)
        .with_context(|| format!("reading config {}", args.config.display()))?;
    let mut config: ServerConfig = toml::from_str(&raw).context("parsing config")?;
    if let Some(port) = args.port {
        config.orchestrator.port = port;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backends = config.backends.len(),
        port = config.orchestrator.port,
        "starting edgeflow orchestrator"
    );

    let deps = build_deps(&config);
    let handle = OrchestratorServer::start(config.orchestrator.clone(), deps)
        .await
        .context("starting orchestrator")?;

    info!(addr = %handle.local_addr(), "orchestrator running, press ctrl-c to stop");
    signal::ctrl_c().await.context("waiting for shutdown signal")?;

    info!("shutdown signal received, stopping");
    let stats = handle.stats().await.ok();
    handle.shutdown().await;
    if let Some(stats) = stats {
        info!(
            admitted = stats.workloads_admitted,
            completed = stats.workloads_completed,
            rejected = stats.workloads_rejected,
            cancelled = stats.workloads_cancelled,
            "final counters"
        );
    }
    Ok(())
}
