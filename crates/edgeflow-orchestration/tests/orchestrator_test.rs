//! End-to-end orchestrator scenarios over loopback TCP, with real client and
//! backend processes faked by in-test tasks.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;

use edgeflow_orchestration::admission::{AdmissionPolicy, DeadlineAware, MaxActiveTasks};
use edgeflow_orchestration::core::RejectReason;
use edgeflow_orchestration::scheduling::FirstFitScheduler;
use edgeflow_orchestration::{OrchestratorDeps, OrchestratorHandle, OrchestratorServer, TraceEvent};
use edgeflow_shared::config::OrchestratorConfig;
use edgeflow_shared::registry::TaskCodec;
use edgeflow_shared::wire::{Direction, OrchHeader, SimpleTaskCodec};
use edgeflow_shared::{Clock, Cluster, Task, TaskDag, TaskTypeRegistry};

const WAIT: Duration = Duration::from_secs(5);

/// A client speaking the two-phase protocol over a real socket.
struct TestClient {
    stream: TcpStream,
    rx: BytesMut,
    registry: TaskTypeRegistry,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        // The orchestrator binds the wildcard address; dial loopback.
        let target = SocketAddr::from(([127, 0, 0, 1], addr.port()));
        let stream = timeout(WAIT, TcpStream::connect(target))
            .await
            .expect("connect timed out")
            .expect("connect failed");
        Self {
            stream,
            rx: BytesMut::new(),
            registry: TaskTypeRegistry::with_default(),
        }
    }

    /// Phase 1: send an admission request and await the response.
    async fn request_admission(&mut self, dag_id: u64, dag: &TaskDag) -> bool {
        let metadata = dag.serialize_metadata(&self.registry).unwrap();
        let header = OrchHeader::admission_request(dag_id, metadata.len() as u64);
        self.stream.write_all(&header.encode()).await.unwrap();
        self.stream.write_all(&metadata).await.unwrap();

        loop {
            if let Some(response) = OrchHeader::decode(&self.rx).unwrap() {
                self.rx.advance(OrchHeader::SERIALIZED_SIZE);
                assert_eq!(response.task_id, dag_id);
                return response.admitted;
            }
            let n = timeout(WAIT, self.stream.read_buf(&mut self.rx))
                .await
                .expect("admission response timed out")
                .unwrap();
            assert!(n > 0, "orchestrator closed the connection");
        }
    }

    /// Phase 2: upload the full DAG data.
    async fn upload(&mut self, dag: &TaskDag) {
        let data = dag.serialize_full(&self.registry).unwrap();
        self.stream.write_all(&data).await.unwrap();
    }

    /// Await one sink-task result frame.
    async fn recv_result(&mut self) -> Task {
        loop {
            if let Some((task, consumed)) = SimpleTaskCodec.decode_full(&self.rx).unwrap() {
                self.rx.advance(consumed);
                return task;
            }
            let n = timeout(WAIT, self.stream.read_buf(&mut self.rx))
                .await
                .expect("result timed out")
                .unwrap();
            assert!(n > 0, "orchestrator closed the connection");
        }
    }

    /// Assert nothing arrives within `window`.
    async fn expect_silence(&mut self, window: Duration) {
        let read = timeout(window, self.stream.read_buf(&mut self.rx)).await;
        match read {
            Err(_) => {}
            Ok(Ok(0)) => {}
            Ok(Ok(n)) => panic!("unexpected {n} bytes from orchestrator"),
            Ok(Err(err)) => panic!("read error: {err}"),
        }
    }
}

/// A backend accepting the orchestrator's startup connection.
struct TestBackend {
    stream: TcpStream,
    rx: BytesMut,
}

impl TestBackend {
    async fn accept(listener: TcpListener) -> Self {
        let (stream, _) = timeout(WAIT, listener.accept())
            .await
            .expect("orchestrator never connected")
            .unwrap();
        Self {
            stream,
            rx: BytesMut::new(),
        }
    }

    async fn recv_task(&mut self) -> Task {
        loop {
            if let Some((task, consumed)) = SimpleTaskCodec.decode_full(&self.rx).unwrap() {
                self.rx.advance(consumed);
                return task;
            }
            let n = timeout(WAIT, self.stream.read_buf(&mut self.rx))
                .await
                .expect("dispatch timed out")
                .unwrap();
            assert!(n > 0, "orchestrator closed the backend connection");
        }
    }

    async fn respond(&mut self, task: &Task) {
        let frame = SimpleTaskCodec.encode(task, Direction::Response);
        self.stream.write_all(&frame).await.unwrap();
    }

    /// Run as an echo executor: every request comes straight back as a
    /// response.
    fn spawn_echo(mut self) {
        tokio::spawn(async move {
            loop {
                if let Some((task, consumed)) = SimpleTaskCodec.decode_full(&self.rx).unwrap() {
                    self.rx.advance(consumed);
                    self.respond(&task).await;
                    continue;
                }
                match self.stream.read_buf(&mut self.rx).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        });
    }
}

async fn bind_backends(n: usize) -> (Vec<TcpListener>, Cluster) {
    let mut listeners = Vec::new();
    let mut cluster = Cluster::new();
    for _ in 0..n {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        cluster.add_backend(listener.local_addr().unwrap(), Some("GPU".to_string()));
        listeners.push(listener);
    }
    (listeners, cluster)
}

async fn start_orchestrator(
    cluster: Cluster,
    admission_policy: Option<Box<dyn AdmissionPolicy>>,
    admission_timeout_ms: u64,
    listeners: Vec<TcpListener>,
) -> (OrchestratorHandle, Vec<TestBackend>) {
    let deps = OrchestratorDeps {
        cluster,
        scheduler: Box::new(FirstFitScheduler::new()),
        admission_policy,
        device_manager: None,
        registry: TaskTypeRegistry::new(),
    };
    let config = OrchestratorConfig {
        port: 0,
        admission_timeout_ms,
    };

    let accept_all = async {
        let mut backends = Vec::new();
        for listener in listeners {
            backends.push(TestBackend::accept(listener).await);
        }
        backends
    };
    let (started, backends) = tokio::join!(OrchestratorServer::start(config, deps), accept_all);
    (started.expect("orchestrator should start"), backends)
}

fn single_task_dag(task_id: u64, compute: f64, input: u64, output: u64) -> TaskDag {
    let mut dag = TaskDag::new();
    dag.add_task(
        Task::new(task_id)
            .with_compute_demand(compute)
            .with_input_size(input)
            .with_output_size(output),
    );
    dag
}

async fn wait_for_trace(
    traces: &mut broadcast::Receiver<TraceEvent>,
    pred: impl Fn(&TraceEvent) -> bool,
) -> TraceEvent {
    timeout(WAIT, async {
        loop {
            let event = traces.recv().await.expect("trace channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected trace never fired")
}

#[tokio::test]
async fn test_single_task_happy_path() {
    let (listeners, cluster) = bind_backends(1).await;
    let (handle, backends) = start_orchestrator(cluster, None, 0, listeners).await;
    let mut traces = handle.subscribe_traces();
    for backend in backends {
        backend.spawn_echo();
    }

    let mut client = TestClient::connect(handle.local_addr()).await;
    let dag = single_task_dag(42, 1e9, 1024, 102);
    assert!(client.request_admission(1, &dag).await);
    client.upload(&dag).await;

    let dispatched = wait_for_trace(&mut traces, |t| {
        matches!(t, TraceEvent::TaskDispatched { .. })
    })
    .await;
    assert!(matches!(
        dispatched,
        TraceEvent::TaskDispatched {
            task_id: 42,
            backend_idx: 0,
            ..
        }
    ));
    wait_for_trace(&mut traces, |t| {
        matches!(
            t,
            TraceEvent::TaskCompleted {
                task_id: 42,
                backend_idx: 0,
                ..
            }
        )
    })
    .await;
    wait_for_trace(&mut traces, |t| {
        matches!(t, TraceEvent::WorkloadCompleted { .. })
    })
    .await;

    let result = client.recv_result().await;
    assert_eq!(result.task_id, 42);
    assert_eq!(result.output_size, 102);

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.workloads_admitted, 1);
    assert_eq!(stats.workloads_completed, 1);
    assert_eq!(stats.backends[0].total_dispatched, 1);
    assert_eq!(stats.backends[0].active_tasks, 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_two_clients_share_two_backends() {
    let (listeners, cluster) = bind_backends(2).await;
    let (handle, backends) = start_orchestrator(cluster, None, 0, listeners).await;
    for backend in backends {
        backend.spawn_echo();
    }
    let addr = handle.local_addr();

    let run_client = |base_id: u64| async move {
        let mut client = TestClient::connect(addr).await;
        for i in 0..3u64 {
            let dag = single_task_dag(base_id + i, 1e9, 512, 64);
            assert!(client.request_admission(base_id + i, &dag).await);
            client.upload(&dag).await;
            let result = client.recv_result().await;
            assert_eq!(result.task_id, base_id + i);
        }
    };
    tokio::join!(run_client(100), run_client(200));

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.workloads_completed, 6);
    assert_eq!(stats.active_workloads, 0);
    assert!(stats.backends[0].total_dispatched >= 1);
    assert!(stats.backends[1].total_dispatched >= 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_admission_rejected_at_capacity() {
    let (listeners, cluster) = bind_backends(2).await;
    let (handle, mut backends) =
        start_orchestrator(cluster, Some(Box::new(MaxActiveTasks::new(5))), 0, listeners).await;
    let mut traces = handle.subscribe_traces();

    // Backends swallow dispatches without responding, pinning active_tasks.
    let mut client = TestClient::connect(handle.local_addr()).await;
    for i in 0..10u64 {
        let dag = single_task_dag(i, 1e9, 256, 32);
        assert!(client.request_admission(i, &dag).await);
        client.upload(&dag).await;
    }
    for backend in &mut backends {
        for _ in 0..5 {
            backend.recv_task().await;
        }
    }
    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.backends[0].active_tasks, 5);
    assert_eq!(stats.backends[1].active_tasks, 5);

    // The next workload bounces without any Phase-2 upload.
    let dag = single_task_dag(999, 1e9, 256, 32);
    assert!(!client.request_admission(999, &dag).await);
    let rejected = wait_for_trace(&mut traces, |t| {
        matches!(t, TraceEvent::WorkloadRejected { .. })
    })
    .await;
    assert_eq!(
        rejected,
        TraceEvent::WorkloadRejected {
            task_count: 1,
            reason: RejectReason::AdmissionRejected
        }
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn test_deadline_infeasible_chain_rejected() {
    let clock = Clock::new();
    let (listeners, cluster) = bind_backends(1).await;
    let (handle, _backends) = start_orchestrator(
        cluster,
        Some(Box::new(DeadlineAware::new(1e9, clock))),
        0,
        listeners,
    )
    .await;
    let mut traces = handle.subscribe_traces();

    // A -> B, each needing one second of compute. B's earliest finish is
    // two seconds out, past its 1.5 s deadline.
    let mut dag = TaskDag::new();
    let a = dag.add_task(Task::new(1).with_compute_demand(1e9).with_input_size(128));
    let b = dag.add_task(
        Task::new(2)
            .with_compute_demand(1e9)
            .with_input_size(128)
            .with_deadline_ns(clock.now_ns() + 1_500_000_000),
    );
    dag.add_control_edge(a, b);

    let mut client = TestClient::connect(handle.local_addr()).await;
    assert!(!client.request_admission(7, &dag).await);
    let rejected = wait_for_trace(&mut traces, |t| {
        matches!(t, TraceEvent::WorkloadRejected { .. })
    })
    .await;
    assert_eq!(
        rejected,
        TraceEvent::WorkloadRejected {
            task_count: 2,
            reason: RejectReason::AdmissionRejected
        }
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn test_backend_disconnect_cancels_workload() {
    let (listeners, cluster) = bind_backends(1).await;
    let (handle, mut backends) = start_orchestrator(cluster, None, 0, listeners).await;
    let mut traces = handle.subscribe_traces();
    let mut backend = backends.remove(0);

    let mut dag = TaskDag::new();
    let a = dag.add_task(Task::new(1).with_compute_demand(1e9).with_input_size(256));
    let b = dag.add_task(Task::new(2).with_compute_demand(1e9).with_input_size(256));
    dag.add_control_edge(a, b);

    let mut client = TestClient::connect(handle.local_addr()).await;
    assert!(client.request_admission(1, &dag).await);
    client.upload(&dag).await;

    // First task reaches the backend, which then dies before responding.
    backend.recv_task().await;
    drop(backend);

    let cancelled = wait_for_trace(&mut traces, |t| {
        matches!(t, TraceEvent::WorkloadCancelled { .. })
    })
    .await;
    assert!(matches!(cancelled, TraceEvent::WorkloadCancelled { .. }));

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.workloads_cancelled, 1);
    assert_eq!(stats.active_workloads, 0);
    assert_eq!(stats.backends[0].active_tasks, 0);

    // The client never hears back.
    client.expect_silence(Duration::from_millis(300)).await;

    handle.shutdown().await;
}

#[tokio::test]
async fn test_admission_timeout_rejects_all_pending() {
    let (listeners, cluster) = bind_backends(1).await;
    let (handle, _backends) = start_orchestrator(cluster, None, 100, listeners).await;
    let mut traces = handle.subscribe_traces();

    let mut client = TestClient::connect(handle.local_addr()).await;
    for dag_id in [10u64, 11, 12] {
        let dag = single_task_dag(dag_id, 1e9, 128, 16);
        assert!(client.request_admission(dag_id, &dag).await);
    }

    // Never upload; all three admissions must expire together.
    for _ in 0..3 {
        let rejected = wait_for_trace(&mut traces, |t| {
            matches!(t, TraceEvent::WorkloadRejected { .. })
        })
        .await;
        assert_eq!(
            rejected,
            TraceEvent::WorkloadRejected {
                task_count: 0,
                reason: RejectReason::AdmissionTimeout
            }
        );
    }

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.workloads_rejected, 3);
    assert_eq!(stats.workloads_admitted, 0);

    handle.shutdown().await;
}
