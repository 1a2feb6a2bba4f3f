//! # Orchestrator Server
//!
//! Runtime wrapper tying the core state machine to the TCP connection layer:
//! binds the client listener, dials every backend, then runs the actor loop
//! until shutdown. The returned [`OrchestratorHandle`] is the control
//! surface for drivers and tests.

use std::net::SocketAddr;

use edgeflow_shared::config::OrchestratorConfig;
use edgeflow_shared::{Cluster, EdgeflowError, EdgeflowResult, TaskTypeRegistry};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::admission::AdmissionPolicy;
use crate::core::{Event, OrchestratorCommand, OrchestratorCore, StatsSnapshot, TraceEvent};
use crate::device::DeviceManager;
use crate::net;
use crate::scheduling::ClusterScheduler;

/// Everything the orchestrator needs besides its scalar config: the cluster
/// and the pluggable decision points.
pub struct OrchestratorDeps {
    /// The backend cluster, fixed for the run (required, non-empty for any
    /// useful deployment)
    pub cluster: Cluster,
    /// Backend selection strategy (required)
    pub scheduler: Box<dyn ClusterScheduler>,
    /// Admission policy; `None` admits everything
    pub admission_policy: Option<Box<dyn AdmissionPolicy>>,
    /// DVFS control loop; `None` disables scaling
    pub device_manager: Option<DeviceManager>,
    /// Task codecs; an empty registry gets the default simple-task codec
    pub registry: TaskTypeRegistry,
}

/// Control surface of a running orchestrator.
pub struct OrchestratorHandle {
    local_addr: SocketAddr,
    events_tx: mpsc::UnboundedSender<Event>,
    traces: broadcast::Sender<TraceEvent>,
    cancel: CancellationToken,
    actor: JoinHandle<()>,
}

impl OrchestratorHandle {
    /// Address the client listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Subscribe to workload lifecycle trace events.
    pub fn subscribe_traces(&self) -> broadcast::Receiver<TraceEvent> {
        self.traces.subscribe()
    }

    /// Fetch a counters snapshot from the actor.
    pub async fn stats(&self) -> EdgeflowResult<StatsSnapshot> {
        let (resp, rx) = oneshot::channel();
        self.events_tx
            .send(Event::Command(OrchestratorCommand::GetStats { resp }))
            .map_err(|_| EdgeflowError::SendFailed {
                peer: "orchestrator".to_string(),
            })?;
        rx.await.map_err(|_| EdgeflowError::SendFailed {
            peer: "orchestrator".to_string(),
        })
    }

    /// Cancel all work, close every connection, and stop the actor.
    pub async fn shutdown(self) {
        let (resp, rx) = oneshot::channel();
        if self
            .events_tx
            .send(Event::Command(OrchestratorCommand::Shutdown { resp }))
            .is_ok()
        {
            let _ = rx.await;
        }
        self.cancel.cancel();
        let _ = self.actor.await;
    }
}

/// Orchestrator server entry point.
pub struct OrchestratorServer;

impl OrchestratorServer {
    /// Bind the listener, dial every backend, and start the actor loop.
    ///
    /// Fails if the listen port cannot be bound or any backend is
    /// unreachable; the cluster is fixed at startup, so a missing backend is
    /// a deployment error rather than a runtime condition.
    pub async fn start(
        config: OrchestratorConfig,
        deps: OrchestratorDeps,
    ) -> EdgeflowResult<OrchestratorHandle> {
        let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "orchestrator listening for clients");

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (traces_tx, _) = broadcast::channel(1024);
        let cancel = CancellationToken::new();

        let mut core = OrchestratorCore::new(
            config,
            deps.cluster.clone(),
            deps.scheduler,
            deps.admission_policy,
            deps.device_manager,
            deps.registry,
            events_tx.clone(),
            traces_tx.clone(),
        );

        // One outbound connection per backend, established up front.
        for (idx, backend) in deps.cluster.iter().enumerate() {
            let tx = net::connect_backend(
                backend.addr,
                idx as u32,
                events_tx.clone(),
                cancel.clone(),
            )
            .await
            .map_err(|err| {
                warn!(addr = %backend.addr, %err, "cannot reach backend");
                EdgeflowError::config(format!("backend {} unreachable: {err}", backend.addr))
            })?;
            core.backend_connected(idx as u32, tx);
        }

        net::spawn_client_listener(listener, events_tx.clone(), cancel.clone());

        let actor_cancel = cancel.clone();
        let actor = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = actor_cancel.cancelled() => break,
                    event = events_rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                if !core.handle_event(event) {
                    actor_cancel.cancel();
                    break;
                }
            }
            core.shutdown();
        });

        Ok(OrchestratorHandle {
            local_addr,
            events_tx,
            traces: traces_tx,
            cancel,
            actor,
        })
    }
}
