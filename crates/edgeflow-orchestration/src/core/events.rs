//! # Orchestrator Events and Commands
//!
//! Everything that can happen to the orchestrator arrives as an [`Event`] on
//! a single channel and is processed to completion by the actor task, which
//! serializes all state transitions. Control-plane requests use the command
//! pattern: an enum variant carrying a `oneshot` responder.

use std::net::SocketAddr;

use bytes::Bytes;
use edgeflow_shared::BackendState;
use tokio::sync::{mpsc, oneshot};

use super::workload::RejectReason;

/// Events consumed by the orchestrator actor.
#[derive(Debug)]
pub enum Event {
    /// A client connection was accepted; `tx` is its outbound byte channel.
    ClientConnected {
        peer: SocketAddr,
        tx: mpsc::UnboundedSender<Bytes>,
    },
    /// Bytes arrived from a client.
    ClientData { peer: SocketAddr, bytes: Bytes },
    /// A client connection closed. Fires at most once per peer; no further
    /// data events follow it.
    ClientClosed { peer: SocketAddr },
    /// Bytes arrived from a backend.
    BackendData { backend_idx: u32, bytes: Bytes },
    /// A backend connection closed.
    BackendClosed { backend_idx: u32 },
    /// A pending admission's timer fired.
    AdmissionTimeout {
        peer: SocketAddr,
        admission_id: u64,
    },
    /// Control-plane command.
    Command(OrchestratorCommand),
}

/// Request/response control commands.
#[derive(Debug)]
pub enum OrchestratorCommand {
    /// Snapshot counters and per-backend load.
    GetStats {
        resp: oneshot::Sender<StatsSnapshot>,
    },
    /// Cancel everything and stop the actor.
    Shutdown { resp: oneshot::Sender<()> },
}

/// Point-in-time view of the orchestrator counters.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub workloads_admitted: u64,
    pub workloads_rejected: u64,
    pub workloads_completed: u64,
    pub workloads_cancelled: u64,
    pub active_workloads: u32,
    /// Per-backend load and lifetime counters, in cluster index order
    pub backends: Vec<BackendState>,
}

/// Observable lifecycle events, delivered over a broadcast channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    WorkloadAdmitted {
        workload_id: u64,
        task_count: u32,
    },
    WorkloadRejected {
        task_count: u32,
        reason: RejectReason,
    },
    WorkloadCancelled {
        workload_id: u64,
    },
    TaskDispatched {
        workload_id: u64,
        task_id: u64,
        backend_idx: u32,
    },
    TaskCompleted {
        workload_id: u64,
        task_id: u64,
        backend_idx: u32,
    },
    WorkloadCompleted {
        workload_id: u64,
    },
    FrequencyChanged {
        backend_idx: u32,
        old_frequency: f64,
        new_frequency: f64,
    },
}
