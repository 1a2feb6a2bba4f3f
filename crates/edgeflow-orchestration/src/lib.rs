//! # edgeflow-orchestration
//!
//! The edgeflow orchestrator: accepts DAG workloads from concurrent clients
//! over a two-phase admission protocol, schedules ready tasks onto a fixed
//! backend cluster, routes responses back to the originating clients, and
//! optionally drives a per-backend DVFS control loop.
//!
//! The crate is organized around a single-owner actor:
//!
//! - [`core`]: the state machine for admission, workload lifecycle, dispatch,
//!   response routing, cleanup.
//! - [`admission`], [`scheduling`], [`scaling`]: the three pluggable
//!   strategy points.
//! - [`device`]: the DVFS device manager built on the scaling policies.
//! - [`server`]: the runtime wrapper binding the actor to TCP transport.

pub mod admission;
pub mod core;
pub mod device;
mod net;
pub mod scaling;
pub mod scheduling;
pub mod server;

pub use crate::core::{Event, OrchestratorCore, StatsSnapshot, TraceEvent};
pub use crate::server::{OrchestratorDeps, OrchestratorHandle, OrchestratorServer};
