//! # Orchestrator Core
//!
//! The authoritative state machine for workload admission, DAG execution,
//! dispatch, response routing, and cleanup. The core is driven entirely by
//! [`Event`]s delivered from network readers, timers, and the control
//! surface; it owns every piece of mutable state and processes one event to
//! completion at a time, so no locking is needed anywhere in the hot path.
//!
//! ## Protocol overview
//!
//! Clients speak a two-phase protocol: a small metadata-only admission
//! request (Phase 1), answered immediately, then the bulk DAG upload
//! (Phase 2) for each admitted workload, in admission order. Admitted
//! workloads become [`WorkloadState`] entries; their ready tasks are handed
//! to the scheduler and dispatched to backends under wire task IDs encoding
//! `(workload, dag index)`. Backend responses advance the DAG; sink-task
//! results are returned to the originating client.

mod events;
mod workload;

pub use events::{Event, OrchestratorCommand, StatsSnapshot, TraceEvent};
pub use workload::{PendingAdmission, RejectReason, TimeoutHandle, WorkloadState};

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

use bytes::{Buf, Bytes, BytesMut};
use edgeflow_shared::config::OrchestratorConfig;
use edgeflow_shared::wire::{
    self, DeviceMetricsHeader, Direction, OrchHeader, OrchMessageType, MSG_ADMISSION_REQUEST,
    MSG_DEVICE_METRICS, TASK_HEADER_PREFIX_LEN,
};
use edgeflow_shared::{Cluster, ClusterState, Task, TaskDag, TaskTypeRegistry};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::admission::AdmissionPolicy;
use crate::device::DeviceManager;
use crate::scheduling::ClusterScheduler;

struct ClientConn {
    tx: mpsc::UnboundedSender<Bytes>,
    buffer: BytesMut,
}

struct BackendConn {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    buffer: BytesMut,
}

/// The orchestrator state machine.
///
/// Not `Sync` and never shared: exactly one actor task owns the core and
/// feeds it events.
pub struct OrchestratorCore {
    config: OrchestratorConfig,
    cluster: Cluster,
    registry: TaskTypeRegistry,
    scheduler: Box<dyn ClusterScheduler>,
    admission_policy: Option<Box<dyn AdmissionPolicy>>,
    device_manager: Option<DeviceManager>,

    cluster_state: ClusterState,
    clients: HashMap<SocketAddr, ClientConn>,
    backends: Vec<BackendConn>,
    workloads: HashMap<u64, WorkloadState>,
    pending_admissions: HashMap<SocketAddr, VecDeque<PendingAdmission>>,
    /// Wire task ID to task type, recorded at dispatch so backend responses
    /// can pick the right deserializer
    wire_task_type: HashMap<u64, u8>,
    next_workload_id: u64,

    workloads_admitted: u64,
    workloads_rejected: u64,
    workloads_completed: u64,
    workloads_cancelled: u64,

    events_tx: mpsc::UnboundedSender<Event>,
    traces: broadcast::Sender<TraceEvent>,
}

impl OrchestratorCore {
    /// Build the core. The registry gets the default simple-task codec when
    /// empty; the scheduler is required by construction.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        cluster: Cluster,
        scheduler: Box<dyn ClusterScheduler>,
        admission_policy: Option<Box<dyn AdmissionPolicy>>,
        device_manager: Option<DeviceManager>,
        registry: TaskTypeRegistry,
        events_tx: mpsc::UnboundedSender<Event>,
        traces: broadcast::Sender<TraceEvent>,
    ) -> Self {
        let registry = if registry.is_empty() {
            debug!("registering default simple-task codec");
            TaskTypeRegistry::with_default()
        } else {
            registry
        };
        let backend_count = cluster.len();
        Self {
            config,
            cluster,
            registry,
            scheduler,
            admission_policy,
            device_manager,
            cluster_state: ClusterState::with_backends(backend_count),
            clients: HashMap::new(),
            backends: (0..backend_count)
                .map(|_| BackendConn {
                    tx: None,
                    buffer: BytesMut::new(),
                })
                .collect(),
            workloads: HashMap::new(),
            pending_admissions: HashMap::new(),
            wire_task_type: HashMap::new(),
            next_workload_id: 1,
            workloads_admitted: 0,
            workloads_rejected: 0,
            workloads_completed: 0,
            workloads_cancelled: 0,
            events_tx,
            traces,
        }
    }

    /// Register the outbound channel for a backend, established at startup.
    pub fn backend_connected(&mut self, backend_idx: u32, tx: mpsc::UnboundedSender<Bytes>) {
        if let Some(conn) = self.backends.get_mut(backend_idx as usize) {
            conn.tx = Some(tx);
        }
    }

    /// Process one event to completion. Returns false when the actor should
    /// stop.
    pub fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::ClientConnected { peer, tx } => {
                debug!(%peer, "client connected");
                self.clients.insert(
                    peer,
                    ClientConn {
                        tx,
                        buffer: BytesMut::new(),
                    },
                );
            }
            Event::ClientData { peer, bytes } => self.on_client_data(peer, bytes),
            Event::ClientClosed { peer } => self.on_client_closed(peer),
            Event::BackendData { backend_idx, bytes } => self.on_backend_data(backend_idx, bytes),
            Event::BackendClosed { backend_idx } => self.on_backend_closed(backend_idx),
            Event::AdmissionTimeout { peer, admission_id } => {
                self.on_admission_timeout(peer, admission_id)
            }
            Event::Command(OrchestratorCommand::GetStats { resp }) => {
                let _ = resp.send(self.stats_snapshot());
            }
            Event::Command(OrchestratorCommand::Shutdown { resp }) => {
                self.shutdown();
                let _ = resp.send(());
                return false;
            }
        }
        true
    }

    /// Counters and per-backend load at this event boundary.
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            workloads_admitted: self.workloads_admitted,
            workloads_rejected: self.workloads_rejected,
            workloads_completed: self.workloads_completed,
            workloads_cancelled: self.workloads_cancelled,
            active_workloads: self.workloads.len() as u32,
            backends: self.cluster_state.iter().cloned().collect(),
        }
    }

    /// Number of admissions awaiting upload for a client.
    pub fn pending_admission_count(&self, peer: &SocketAddr) -> usize {
        self.pending_admissions.get(peer).map_or(0, VecDeque::len)
    }

    // ------------------------------------------------------------------
    // Client path
    // ------------------------------------------------------------------

    fn on_client_data(&mut self, peer: SocketAddr, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        let Some(conn) = self.clients.get_mut(&peer) else {
            warn!(%peer, "data from unregistered client");
            return;
        };
        debug!(%peer, len = bytes.len(), "client bytes");
        conn.buffer.extend_from_slice(&bytes);
        self.drain_client_buffer(peer);
    }

    /// Extract complete messages from a client's receive buffer. Each
    /// iteration either shrinks the buffer or exits the loop.
    fn drain_client_buffer(&mut self, peer: SocketAddr) {
        let Some(conn) = self.clients.get_mut(&peer) else {
            return;
        };
        let mut buffer = std::mem::take(&mut conn.buffer);

        while !buffer.is_empty() {
            if buffer[0] >= MSG_ADMISSION_REQUEST {
                // Phase 1: orchestrator-header-framed admission message.
                let header = match OrchHeader::decode(&buffer) {
                    Ok(Some(header)) => header,
                    Ok(None) => break,
                    Err(err) => {
                        warn!(%peer, %err, "unparseable client frame, dropping buffer");
                        buffer.clear();
                        break;
                    }
                };
                let Some(total) =
                    (header.payload_size as usize).checked_add(OrchHeader::SERIALIZED_SIZE)
                else {
                    warn!(%peer, payload_size = header.payload_size, "absurd payload size, dropping buffer");
                    buffer.clear();
                    break;
                };
                if buffer.len() < total {
                    debug!(
                        %peer,
                        have = buffer.len(),
                        need = total,
                        "waiting for full admission message"
                    );
                    break;
                }
                let payload = buffer
                    .split_to(total)
                    .split_off(OrchHeader::SERIALIZED_SIZE)
                    .freeze();

                match header.message_type {
                    OrchMessageType::AdmissionRequest => {
                        self.handle_admission_request(peer, header.task_id, &payload);
                    }
                    OrchMessageType::AdmissionResponse => {
                        warn!(%peer, "unexpected admission response from client, skipping");
                    }
                }
            } else {
                // Phase 2: raw DAG upload for the front pending admission.
                let has_pending = self
                    .pending_admissions
                    .get(&peer)
                    .is_some_and(|queue| !queue.is_empty());
                if !has_pending {
                    error!(%peer, "phase-2 data with no pending admission, dropping buffer");
                    buffer.clear();
                    break;
                }

                match TaskDag::deserialize_full(&buffer, &self.registry) {
                    Ok(None) => break,
                    Ok(Some((dag, consumed))) => {
                        buffer.advance(consumed);
                        self.consume_front_pending(peer);
                        let _ = self.create_and_dispatch_workload(dag, peer);
                    }
                    Err(err) => {
                        warn!(%peer, %err, "failed to deserialize workload data");
                        self.consume_front_pending(peer);
                        self.reject_workload(0, RejectReason::DeserializationFailed);
                        // The stream can no longer be framed reliably.
                        buffer.clear();
                        break;
                    }
                }
            }
        }

        if let Some(conn) = self.clients.get_mut(&peer) {
            conn.buffer = buffer;
        }
    }

    /// Phase 1: deserialize DAG metadata, validate structure, consult the
    /// admission policy, and answer the client.
    fn handle_admission_request(&mut self, peer: SocketAddr, dag_id: u64, payload: &[u8]) {
        let dag = match TaskDag::deserialize_metadata(payload, &self.registry) {
            Ok(Some((dag, _consumed))) => dag,
            Ok(None) | Err(_) => {
                warn!(%peer, dag_id, "failed to deserialize DAG metadata");
                self.reject_workload(0, RejectReason::DeserializationFailed);
                self.send_admission_response(peer, dag_id, false);
                return;
            }
        };

        if dag.is_empty() {
            warn!(%peer, dag_id, "admission request for empty DAG");
            self.reject_workload(0, RejectReason::EmptyDag);
            self.send_admission_response(peer, dag_id, false);
            return;
        }

        if !dag.validate() {
            warn!(%peer, dag_id, "DAG validation failed");
            self.reject_workload(dag.task_count(), RejectReason::InvalidDag);
            self.send_admission_response(peer, dag_id, false);
            return;
        }

        self.process_admission_decision(dag, dag_id, peer);
    }

    fn process_admission_decision(&mut self, dag: TaskDag, id: u64, peer: SocketAddr) -> bool {
        if !self.check_admission(&dag) {
            info!(dag_id = id, "workload rejected by admission policy");
            self.reject_workload(dag.task_count(), RejectReason::AdmissionRejected);
            self.send_admission_response(peer, id, false);
            return false;
        }

        let queue = self.pending_admissions.entry(peer).or_default();
        if queue.iter().any(|entry| entry.id == id) {
            warn!(%peer, dag_id = id, "duplicate admission request");
            self.reject_workload(dag.task_count(), RejectReason::DuplicateAdmission);
            self.send_admission_response(peer, id, false);
            return false;
        }

        let timeout = self.schedule_admission_timeout(peer, id);
        self.pending_admissions
            .entry(peer)
            .or_default()
            .push_back(PendingAdmission { id, timeout });

        info!(dag_id = id, "workload admitted, awaiting data upload");
        self.send_admission_response(peer, id, true);
        true
    }

    fn check_admission(&self, dag: &TaskDag) -> bool {
        match &self.admission_policy {
            None => {
                debug!("no admission policy, admitting by default");
                true
            }
            Some(policy) => policy.should_admit(dag, &self.cluster, &self.cluster_state),
        }
    }

    fn schedule_admission_timeout(&self, peer: SocketAddr, id: u64) -> Option<TimeoutHandle> {
        let timeout = self.config.admission_timeout()?;
        let tx = self.events_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Event::AdmissionTimeout {
                peer,
                admission_id: id,
            });
        });
        Some(TimeoutHandle::new(handle))
    }

    fn send_admission_response(&self, peer: SocketAddr, dag_id: u64, admitted: bool) {
        let response = OrchHeader::admission_response(dag_id, admitted);
        if !self.send_to_client(peer, response.encode()) {
            warn!(%peer, dag_id, "failed to send admission response");
        }
        debug!(%peer, dag_id, admitted, "sent admission response");
    }

    /// Cancel the front pending admission for a client; its timer aborts on
    /// drop.
    fn consume_front_pending(&mut self, peer: SocketAddr) {
        if let Some(queue) = self.pending_admissions.get_mut(&peer) {
            queue.pop_front();
            if queue.is_empty() {
                self.pending_admissions.remove(&peer);
            }
        }
    }

    /// A pending admission timed out before its upload began. Stream order
    /// ties Phase-2 data to the queue front, so every pending admission for
    /// this client must go: once one is dropped, later uploads can no longer
    /// be parsed in order.
    fn on_admission_timeout(&mut self, peer: SocketAddr, admission_id: u64) {
        let Some(queue) = self.pending_admissions.get_mut(&peer) else {
            return;
        };
        if queue.front().map(|entry| entry.id) != Some(admission_id) {
            debug!(%peer, admission_id, "stale admission timeout, ignoring");
            return;
        }

        warn!(%peer, admission_id, "admission timed out, clearing pending queue");
        let drained = self
            .pending_admissions
            .remove(&peer)
            .unwrap_or_default();
        for _entry in drained {
            self.reject_workload(0, RejectReason::AdmissionTimeout);
        }
    }

    fn on_client_closed(&mut self, peer: SocketAddr) {
        info!(%peer, "client disconnected");
        self.clients.remove(&peer);

        if let Some(queue) = self.pending_admissions.remove(&peer) {
            for entry in queue {
                debug!(%peer, admission_id = entry.id, "dropping pending admission");
                self.reject_workload(0, RejectReason::ClientDisconnect);
            }
        }

        let affected: Vec<u64> = self
            .workloads
            .iter()
            .filter(|(_, state)| state.client_addr == peer)
            .map(|(&id, _)| id)
            .collect();
        for workload_id in affected {
            debug!(workload_id, "cancelling workload of disconnected client");
            self.cancel_workload(workload_id);
        }
    }

    // ------------------------------------------------------------------
    // Workload lifecycle
    // ------------------------------------------------------------------

    /// Create a live workload from uploaded data and dispatch its initial
    /// ready set. Returns `None` when dispatch failed and the workload was
    /// cancelled.
    fn create_and_dispatch_workload(&mut self, dag: TaskDag, peer: SocketAddr) -> Option<u64> {
        let task_count = dag.task_count();
        let workload_id = self.next_workload_id;
        self.next_workload_id += 1;

        self.workloads
            .insert(workload_id, WorkloadState::new(dag, peer));
        self.cluster_state
            .set_active_workloads(self.workloads.len() as u32);

        if !self.process_ready_tasks(workload_id) {
            // Already cancelled by process_ready_tasks.
            return None;
        }

        self.workloads_admitted += 1;
        self.fire_trace(TraceEvent::WorkloadAdmitted {
            workload_id,
            task_count,
        });
        self.scaling_tick();

        info!(workload_id, task_count, "workload admitted");
        Some(workload_id)
    }

    /// Dispatch every ready task that is not already in flight. Returns
    /// false if a dispatch failed, in which case the workload is cancelled.
    fn process_ready_tasks(&mut self, workload_id: u64) -> bool {
        let Some(state) = self.workloads.get(&workload_id) else {
            error!(workload_id, "process_ready_tasks: workload not found");
            return false;
        };

        let ready: Vec<(u32, u64)> = state
            .dag
            .ready_tasks()
            .into_iter()
            .filter_map(|idx| state.dag.task(idx).map(|task| (idx, task.task_id)))
            .collect();

        for (dag_idx, task_id) in ready {
            let already_dispatched = self
                .workloads
                .get(&workload_id)
                .is_some_and(|state| state.task_to_backend.contains_key(&task_id));
            if already_dispatched {
                continue;
            }
            if !self.dispatch_task(workload_id, dag_idx) {
                error!(
                    workload_id,
                    task_id, "failed to dispatch ready task, failing workload"
                );
                self.cancel_workload(workload_id);
                return false;
            }
        }
        true
    }

    /// Schedule one task onto a backend and send it. On send failure the
    /// dispatch records are rolled back.
    fn dispatch_task(&mut self, workload_id: u64, dag_idx: u32) -> bool {
        let Some(task) = self
            .workloads
            .get(&workload_id)
            .and_then(|state| state.dag.task(dag_idx))
            .cloned()
        else {
            error!(workload_id, dag_idx, "dispatch_task: task not found");
            return false;
        };

        let Some(backend_idx) =
            self.scheduler
                .schedule_task(&task, &self.cluster, &self.cluster_state)
        else {
            warn!(
                workload_id,
                task_id = task.task_id,
                "scheduler found no backend for task"
            );
            return false;
        };
        if backend_idx as usize >= self.cluster.len() {
            warn!(backend_idx, "scheduler returned invalid backend index");
            return false;
        }

        let wire_id = wire::encode_wire_task_id(workload_id as u32, dag_idx);
        let encoded = match self.registry.get(task.task_type) {
            Ok(codec) => {
                let mut wire_task = task.clone();
                wire_task.task_id = wire_id;
                codec.encode(&wire_task, Direction::Request)
            }
            Err(err) => {
                error!(task_type = task.task_type, %err, "cannot encode task");
                return false;
            }
        };

        let Some(state) = self.workloads.get_mut(&workload_id) else {
            return false;
        };
        self.wire_task_type.insert(wire_id, task.task_type);
        state.task_to_backend.insert(task.task_id, backend_idx);
        state.pending_tasks += 1;

        if !self.send_to_backend(backend_idx, encoded) {
            error!(backend_idx, "failed to send task to backend, rolling back");
            self.wire_task_type.remove(&wire_id);
            if let Some(state) = self.workloads.get_mut(&workload_id) {
                state.task_to_backend.remove(&task.task_id);
                state.pending_tasks -= 1;
            }
            return false;
        }

        self.cluster_state.notify_task_dispatched(backend_idx);
        self.fire_trace(TraceEvent::TaskDispatched {
            workload_id,
            task_id: task.task_id,
            backend_idx,
        });
        info!(
            workload_id,
            task_id = task.task_id,
            wire_id,
            backend_idx,
            "dispatched task"
        );
        true
    }

    // ------------------------------------------------------------------
    // Backend path
    // ------------------------------------------------------------------

    fn on_backend_data(&mut self, backend_idx: u32, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        let Some(conn) = self.backends.get_mut(backend_idx as usize) else {
            warn!(backend_idx, "data from unknown backend");
            return;
        };
        debug!(backend_idx, len = bytes.len(), "backend bytes");
        conn.buffer.extend_from_slice(&bytes);
        self.drain_backend_buffer(backend_idx);
    }

    fn drain_backend_buffer(&mut self, backend_idx: u32) {
        let Some(conn) = self.backends.get_mut(backend_idx as usize) else {
            return;
        };
        let mut buffer = std::mem::take(&mut conn.buffer);

        loop {
            if buffer.len() < TASK_HEADER_PREFIX_LEN {
                break;
            }

            // Device metrics interleave with task responses on the same
            // stream when DVFS is enabled.
            if buffer[0] == MSG_DEVICE_METRICS {
                if self.device_manager.is_none() {
                    warn!(backend_idx, "device metrics without device manager, dropping buffer");
                    buffer.clear();
                    break;
                }
                match DeviceMetricsHeader::decode(&buffer) {
                    Ok(None) => break,
                    Ok(Some(metrics)) => {
                        buffer.advance(DeviceMetricsHeader::SERIALIZED_SIZE);
                        if let Some(manager) = &self.device_manager {
                            manager.handle_metrics(backend_idx, metrics, &mut self.cluster_state);
                        }
                        self.scaling_tick();
                        continue;
                    }
                    Err(err) => {
                        error!(backend_idx, %err, "bad device metrics frame, dropping buffer");
                        buffer.clear();
                        break;
                    }
                }
            }

            let Some(wire_id) = wire::peek_wire_task_id(&buffer) else {
                break;
            };
            let Some(&task_type) = self.wire_task_type.get(&wire_id) else {
                error!(backend_idx, wire_id, "no task type recorded for wire id");
                buffer.clear();
                break;
            };
            let codec = match self.registry.get(task_type) {
                Ok(codec) => codec.clone(),
                Err(err) => {
                    error!(backend_idx, %err, "no codec for recorded task type");
                    buffer.clear();
                    break;
                }
            };

            let (mut task, consumed) = match codec.decode_full(&buffer) {
                Ok(Some(decoded)) => decoded,
                Ok(None) => break,
                Err(err) => {
                    error!(backend_idx, wire_id, %err, "bad task response frame, dropping buffer");
                    buffer.clear();
                    break;
                }
            };
            buffer.advance(consumed);
            self.wire_task_type.remove(&wire_id);
            task.task_type = task_type;

            let (workload_id, dag_idx) = wire::decode_wire_task_id(wire_id);
            let Some(state) = self.workloads.get(&workload_id) else {
                // Cancelled workload; late responses are dropped.
                debug!(workload_id, wire_id, "response for unknown workload, dropping");
                continue;
            };
            let Some(original) = state.dag.task(dag_idx) else {
                warn!(workload_id, dag_idx, "response references invalid DAG index");
                continue;
            };
            task.task_id = original.task_id;

            let Some(&dispatched_backend) = state.task_to_backend.get(&task.task_id) else {
                error!(
                    workload_id,
                    task_id = task.task_id,
                    "no dispatch record for completed task, skipping"
                );
                continue;
            };

            self.on_task_completed(workload_id, task, dispatched_backend);
        }

        if let Some(conn) = self.backends.get_mut(backend_idx as usize) {
            conn.buffer = buffer;
        }
    }

    fn on_task_completed(&mut self, workload_id: u64, task: Task, backend_idx: u32) {
        let task_id = task.task_id;
        let Some(state) = self.workloads.get_mut(&workload_id) else {
            warn!(workload_id, "completion for unknown workload");
            return;
        };

        self.scheduler.notify_task_completed(backend_idx, &task);
        self.cluster_state.notify_task_completed(backend_idx);

        state.task_to_backend.remove(&task_id);
        debug_assert!(state.pending_tasks > 0, "pending task underflow");
        state.pending_tasks = state.pending_tasks.saturating_sub(1);

        let Some(dag_idx) = state.dag.task_index(task_id) else {
            error!(workload_id, task_id, "completed task not found in DAG");
            return;
        };
        // Replace the DAG slot with the response task before marking
        // complete: data successors must see the backend-reported output
        // size.
        state.dag.set_task(dag_idx, task);
        state.dag.mark_completed(dag_idx);
        let complete = state.dag.is_complete();

        self.scaling_tick();
        self.fire_trace(TraceEvent::TaskCompleted {
            workload_id,
            task_id,
            backend_idx,
        });
        info!(workload_id, task_id, backend_idx, "task completed");

        if complete {
            self.complete_workload(workload_id);
        } else {
            self.process_ready_tasks(workload_id);
        }
    }

    fn complete_workload(&mut self, workload_id: u64) {
        let Some(state) = self.workloads.remove(&workload_id) else {
            return;
        };
        self.cluster_state
            .set_active_workloads(self.workloads.len() as u32);
        self.workloads_completed += 1;
        self.fire_trace(TraceEvent::WorkloadCompleted { workload_id });
        info!(workload_id, "workload completed");

        let sinks = state.dag.sink_tasks();
        debug!(
            workload_id,
            sink_count = sinks.len(),
            "sending sink results to client"
        );
        for idx in sinks {
            let Some(task) = state.dag.task(idx) else {
                continue;
            };
            let encoded = match self.registry.get(task.task_type) {
                Ok(codec) => codec.encode(task, Direction::Response),
                Err(err) => {
                    error!(task_type = task.task_type, %err, "cannot encode sink result");
                    continue;
                }
            };
            if !self.send_to_client(state.client_addr, encoded) {
                warn!(peer = %state.client_addr, "failed to send result to client");
            }
        }
    }

    /// Cancel a live workload, rolling back backend load accounting and wire
    /// ID records for every in-flight task.
    fn cancel_workload(&mut self, workload_id: u64) -> bool {
        let Some(state) = self.workloads.remove(&workload_id) else {
            return false;
        };
        warn!(workload_id, "cancelling workload");

        for (&task_id, &backend_idx) in &state.task_to_backend {
            self.cluster_state.notify_task_completed(backend_idx);
            if let Some(dag_idx) = state.dag.task_index(task_id) {
                self.wire_task_type
                    .remove(&wire::encode_wire_task_id(workload_id as u32, dag_idx));
            }
        }

        self.workloads_cancelled += 1;
        self.fire_trace(TraceEvent::WorkloadCancelled { workload_id });
        self.cluster_state
            .set_active_workloads(self.workloads.len() as u32);
        true
    }

    fn on_backend_closed(&mut self, backend_idx: u32) {
        warn!(backend_idx, "backend disconnected");
        if let Some(conn) = self.backends.get_mut(backend_idx as usize) {
            conn.buffer.clear();
            conn.tx = None;
        }

        let affected: Vec<u64> = self
            .workloads
            .iter()
            .filter(|(_, state)| {
                state
                    .task_to_backend
                    .values()
                    .any(|&idx| idx == backend_idx)
            })
            .map(|(&id, _)| id)
            .collect();
        for workload_id in affected {
            warn!(workload_id, backend_idx, "cancelling workload on backend loss");
            self.cancel_workload(workload_id);
        }
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    fn reject_workload(&mut self, task_count: u32, reason: RejectReason) {
        self.workloads_rejected += 1;
        self.fire_trace(TraceEvent::WorkloadRejected { task_count, reason });
    }

    /// Run the DVFS policy over the cluster and push any scaling commands.
    fn scaling_tick(&self) {
        let Some(manager) = &self.device_manager else {
            return;
        };
        for action in manager.evaluate_scaling(&self.cluster_state) {
            self.fire_trace(TraceEvent::FrequencyChanged {
                backend_idx: action.backend_idx,
                old_frequency: action.old_frequency,
                new_frequency: action.command.target_frequency,
            });
            if !self.send_to_backend(action.backend_idx, action.command.encode()) {
                debug!(
                    backend_idx = action.backend_idx,
                    "failed to send scaling command"
                );
            }
        }
    }

    fn send_to_client(&self, peer: SocketAddr, bytes: Bytes) -> bool {
        self.clients
            .get(&peer)
            .is_some_and(|conn| conn.tx.send(bytes).is_ok())
    }

    fn send_to_backend(&self, backend_idx: u32, bytes: Bytes) -> bool {
        self.backends
            .get(backend_idx as usize)
            .and_then(|conn| conn.tx.as_ref())
            .is_some_and(|tx| tx.send(bytes).is_ok())
    }

    fn fire_trace(&self, event: TraceEvent) {
        let _ = self.traces.send(event);
    }

    /// Cancel every pending admission and live workload and drop all
    /// connections. Idempotent.
    pub fn shutdown(&mut self) {
        info!("orchestrator shutting down");
        self.pending_admissions.clear();

        let live: Vec<u64> = self.workloads.keys().copied().collect();
        for workload_id in live {
            self.cancel_workload(workload_id);
        }

        self.clients.clear();
        for conn in &mut self.backends {
            conn.tx = None;
            conn.buffer.clear();
        }
    }
}
