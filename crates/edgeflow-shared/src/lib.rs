//! # edgeflow-shared
//!
//! Shared types for the edgeflow orchestrator: the wire protocol (framing
//! headers and task codecs), the task and DAG models, the task-type registry,
//! cluster topology and load state, configuration, and error types.
//!
//! This crate holds everything both the orchestrator and its clients or
//! backends need to speak the protocol; the orchestration logic itself lives
//! in `edgeflow-orchestration`.

pub mod cluster;
pub mod cluster_state;
pub mod config;
pub mod dag;
pub mod error;
pub mod logging;
pub mod registry;
pub mod task;
pub mod time;
pub mod wire;

pub use cluster::{Backend, Cluster};
pub use cluster_state::{BackendState, ClusterState};
pub use dag::{EdgeKind, TaskDag};
pub use error::{EdgeflowError, EdgeflowResult};
pub use registry::{TaskCodec, TaskTypeRegistry};
pub use task::Task;
pub use time::Clock;
