//! # Workload DAG
//!
//! A [`TaskDag`] holds the tasks of one workload plus two edge sets over
//! task indices: control edges define execution order, and data edges (a
//! subset of control) additionally propagate the predecessor's output size
//! into the successor's input size on completion.
//!
//! The graph is arena-style: nodes live in a `Vec` and edges reference
//! indices, so runtime cycles in the workload never become ownership cycles.
//! The explicit edge list is the serialization source of truth; successor
//! lists and in-degrees are derived execution state maintained incrementally.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{error, warn};

use crate::error::{EdgeflowError, EdgeflowResult};
use crate::registry::TaskTypeRegistry;
use crate::task::Task;
use crate::wire::Direction;

/// Edge kind on the wire and in the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Ordering only
    Control = 0,
    /// Ordering plus output-size propagation
    Data = 1,
}

#[derive(Debug, Clone)]
struct DagNode {
    task: Task,
    /// Indices of ordering successors
    successors: Vec<u32>,
    /// Indices of data-dependent successors
    data_successors: Vec<u32>,
    /// Count of incomplete control predecessors
    in_degree: u32,
    completed: bool,
}

/// Directed acyclic graph of tasks for one workload.
#[derive(Debug, Clone, Default)]
pub struct TaskDag {
    nodes: Vec<DagNode>,
    /// Edge list in insertion order, used for serialization
    edges: Vec<(u32, u32, EdgeKind)>,
    completed_count: u32,
    id_index: HashMap<u64, u32>,
}

impl TaskDag {
    /// Create an empty DAG.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task and return its index.
    pub fn add_task(&mut self, task: Task) -> u32 {
        let idx = self.nodes.len() as u32;
        self.id_index.insert(task.task_id, idx);
        self.nodes.push(DagNode {
            task,
            successors: Vec::new(),
            data_successors: Vec::new(),
            in_degree: 0,
            completed: false,
        });
        idx
    }

    /// Add an ordering edge: `from` must complete before `to` starts.
    ///
    /// Invalid indices and self-loops are logged and ignored; callers are
    /// expected to [`validate`](Self::validate) before running the DAG.
    pub fn add_control_edge(&mut self, from: u32, to: u32) {
        if !self.check_edge(from, to) {
            return;
        }
        self.edges.push((from, to, EdgeKind::Control));
        self.nodes[from as usize].successors.push(to);
        self.nodes[to as usize].in_degree += 1;
    }

    /// Add a data edge: ordering plus output-size propagation on completion.
    ///
    /// Multiple data predecessors accumulate: their outputs are summed into
    /// the successor's input size.
    pub fn add_data_edge(&mut self, from: u32, to: u32) {
        if !self.check_edge(from, to) {
            return;
        }
        self.edges.push((from, to, EdgeKind::Data));
        self.nodes[from as usize].successors.push(to);
        self.nodes[from as usize].data_successors.push(to);
        self.nodes[to as usize].in_degree += 1;
    }

    fn check_edge(&self, from: u32, to: u32) -> bool {
        let n = self.nodes.len() as u32;
        if from >= n || to >= n {
            error!(from, to, task_count = n, "edge references invalid task index");
            return false;
        }
        if from == to {
            error!(idx = from, "self-dependency not allowed");
            return false;
        }
        true
    }

    /// Indices of tasks with all control predecessors completed and not yet
    /// completed themselves.
    pub fn ready_tasks(&self) -> Vec<u32> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| !node.completed && node.in_degree == 0)
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Indices of sink tasks (no successors). Their outputs are returned to
    /// the client when the workload completes; well-formed DAGs usually have
    /// exactly one.
    pub fn sink_tasks(&self) -> Vec<u32> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.successors.is_empty())
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Mark a task completed: decrement successors' in-degrees and add this
    /// task's current output size to each data successor's input size.
    ///
    /// Marking an already-completed index is a no-op with a warning.
    pub fn mark_completed(&mut self, idx: u32) {
        let Some(node) = self.nodes.get(idx as usize) else {
            error!(idx, "mark_completed: invalid task index");
            return;
        };
        if node.completed {
            warn!(idx, "task already completed");
            return;
        }
        let successors = node.successors.clone();
        let data_successors = node.data_successors.clone();
        let output_size = node.task.output_size;

        self.nodes[idx as usize].completed = true;
        self.completed_count += 1;

        for s in successors {
            let successor = &mut self.nodes[s as usize];
            if successor.in_degree > 0 {
                successor.in_degree -= 1;
            }
        }
        for s in data_successors {
            self.nodes[s as usize].task.input_size += output_size;
        }
    }

    /// Whether every task has completed.
    pub fn is_complete(&self) -> bool {
        self.completed_count as usize == self.nodes.len()
    }

    /// Cycle check: DFS three-coloring over all nodes, handling disconnected
    /// components. An empty DAG is valid.
    pub fn validate(&self) -> bool {
        const WHITE: u8 = 0;
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;

        let n = self.nodes.len();
        let mut color = vec![WHITE; n];

        for start in 0..n {
            if color[start] != WHITE {
                continue;
            }
            color[start] = GRAY;
            let mut stack: Vec<(u32, usize)> = vec![(start as u32, 0)];
            while let Some((u, child)) = stack.last_mut() {
                let successors = &self.nodes[*u as usize].successors;
                if *child < successors.len() {
                    let v = successors[*child] as usize;
                    *child += 1;
                    match color[v] {
                        GRAY => {
                            warn!("cycle detected in DAG");
                            return false;
                        }
                        WHITE => {
                            color[v] = GRAY;
                            stack.push((v as u32, 0));
                        }
                        _ => {}
                    }
                } else {
                    color[*u as usize] = BLACK;
                    stack.pop();
                }
            }
        }
        true
    }

    /// Topological order of all task indices (Kahn's algorithm), ignoring
    /// completion state. Shorter than the task count iff the graph is cyclic;
    /// callers validate first.
    pub fn topological_order(&self) -> Vec<u32> {
        let n = self.nodes.len();
        let mut in_degree = vec![0u32; n];
        for node in &self.nodes {
            for &s in &node.successors {
                in_degree[s as usize] += 1;
            }
        }
        let mut queue: std::collections::VecDeque<u32> = (0..n as u32)
            .filter(|&i| in_degree[i as usize] == 0)
            .collect();
        let mut order = Vec::with_capacity(n);
        while let Some(u) = queue.pop_front() {
            order.push(u);
            for &s in &self.nodes[u as usize].successors {
                in_degree[s as usize] -= 1;
                if in_degree[s as usize] == 0 {
                    queue.push_back(s);
                }
            }
        }
        order
    }

    /// Get a task by index.
    pub fn task(&self, idx: u32) -> Option<&Task> {
        self.nodes.get(idx as usize).map(|node| &node.task)
    }

    /// Replace the task at `idx`, keeping the ID index consistent.
    ///
    /// Used to swap in the backend's response task before
    /// [`mark_completed`](Self::mark_completed) so data successors see the
    /// reported output size.
    pub fn set_task(&mut self, idx: u32, task: Task) -> bool {
        let Some(node) = self.nodes.get_mut(idx as usize) else {
            return false;
        };
        self.id_index.remove(&node.task.task_id);
        self.id_index.insert(task.task_id, idx);
        node.task = task;
        true
    }

    /// O(1) lookup of a task index by task ID.
    pub fn task_index(&self, task_id: u64) -> Option<u32> {
        self.id_index.get(&task_id).copied()
    }

    /// Ordering successors of a task.
    pub fn successors(&self, idx: u32) -> &[u32] {
        self.nodes
            .get(idx as usize)
            .map_or(&[], |node| node.successors.as_slice())
    }

    /// Number of tasks in the DAG.
    pub fn task_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    /// Whether the DAG holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Serialize task metadata and the edge set (admission phase).
    pub fn serialize_metadata(&self, registry: &TaskTypeRegistry) -> EdgeflowResult<Bytes> {
        self.serialize(registry, None)
    }

    /// Serialize full task data including payloads (data phase).
    pub fn serialize_full(&self, registry: &TaskTypeRegistry) -> EdgeflowResult<Bytes> {
        self.serialize(registry, Some(Direction::Request))
    }

    fn serialize(
        &self,
        registry: &TaskTypeRegistry,
        payload: Option<Direction>,
    ) -> EdgeflowResult<Bytes> {
        let mut buf = BytesMut::new();
        buf.put_u32(self.task_count());
        for node in &self.nodes {
            let codec = registry.get(node.task.task_type)?;
            buf.put_u8(node.task.task_type);
            match payload {
                Some(direction) => buf.put_slice(&codec.encode(&node.task, direction)),
                None => buf.put_slice(&codec.encode_metadata(&node.task)),
            }
        }
        buf.put_u32(self.edges.len() as u32);
        for &(from, to, kind) in &self.edges {
            buf.put_u32(from);
            buf.put_u32(to);
            buf.put_u8(kind as u8);
        }
        Ok(buf.freeze())
    }

    /// Deserialize a metadata-only DAG from the front of `buf`.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold the whole
    /// serialization; on success the second element is the consumed byte
    /// count.
    pub fn deserialize_metadata(
        buf: &[u8],
        registry: &TaskTypeRegistry,
    ) -> EdgeflowResult<Option<(TaskDag, usize)>> {
        Self::deserialize(buf, registry, true)
    }

    /// Deserialize a full-data DAG (headers + payloads) from the front of `buf`.
    pub fn deserialize_full(
        buf: &[u8],
        registry: &TaskTypeRegistry,
    ) -> EdgeflowResult<Option<(TaskDag, usize)>> {
        Self::deserialize(buf, registry, false)
    }

    fn deserialize(
        buf: &[u8],
        registry: &TaskTypeRegistry,
        metadata_only: bool,
    ) -> EdgeflowResult<Option<(TaskDag, usize)>> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let task_count = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let mut offset = 4usize;

        let mut dag = TaskDag::new();
        for _ in 0..task_count {
            let decoded = if metadata_only {
                registry.decode_prefixed_metadata(&buf[offset..])?
            } else {
                registry.decode_prefixed_full(&buf[offset..])?
            };
            let Some((task, consumed)) = decoded else {
                return Ok(None);
            };
            dag.add_task(task);
            offset += consumed;
        }

        if buf.len() < offset + 4 {
            return Ok(None);
        }
        let edge_count = u32::from_be_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ]) as usize;
        offset += 4;

        if buf.len() < offset + edge_count * 9 {
            return Ok(None);
        }
        for _ in 0..edge_count {
            let from = u32::from_be_bytes([
                buf[offset],
                buf[offset + 1],
                buf[offset + 2],
                buf[offset + 3],
            ]);
            let to = u32::from_be_bytes([
                buf[offset + 4],
                buf[offset + 5],
                buf[offset + 6],
                buf[offset + 7],
            ]);
            let kind = buf[offset + 8];
            offset += 9;

            if from >= task_count || to >= task_count || from == to {
                return Err(EdgeflowError::deserialization(format!(
                    "invalid edge {from} -> {to} in {task_count}-task DAG"
                )));
            }
            match kind {
                0 => dag.add_control_edge(from, to),
                1 => dag.add_data_edge(from, to),
                other => {
                    return Err(EdgeflowError::deserialization(format!(
                        "invalid edge kind {other}"
                    )))
                }
            }
        }

        Ok(Some((dag, offset)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: u64) -> Task {
        Task::new(id)
            .with_compute_demand(1e9)
            .with_input_size(1000)
            .with_output_size(500)
    }

    /// Diamond: a -> b (data), a -> c (control), b -> d (data), c -> d (control).
    fn diamond() -> TaskDag {
        let mut dag = TaskDag::new();
        let a = dag.add_task(task(10));
        let b = dag.add_task(task(20));
        let c = dag.add_task(task(30));
        let d = dag.add_task(task(40));
        dag.add_data_edge(a, b);
        dag.add_control_edge(a, c);
        dag.add_data_edge(b, d);
        dag.add_control_edge(c, d);
        dag
    }

    #[test]
    fn test_ready_tasks_follow_dependencies() {
        let mut dag = diamond();
        assert_eq!(dag.ready_tasks(), vec![0]);

        dag.mark_completed(0);
        assert_eq!(dag.ready_tasks(), vec![1, 2]);

        dag.mark_completed(1);
        assert_eq!(dag.ready_tasks(), vec![2]);

        dag.mark_completed(2);
        assert_eq!(dag.ready_tasks(), vec![3]);

        dag.mark_completed(3);
        assert!(dag.ready_tasks().is_empty());
        assert!(dag.is_complete());
    }

    #[test]
    fn test_ready_tasks_never_contain_completed() {
        let mut dag = diamond();
        let mut drained = 0;
        while !dag.is_complete() {
            let ready = dag.ready_tasks();
            assert!(!ready.is_empty(), "valid DAG must always expose ready work");
            for idx in ready {
                assert!(!dag.nodes[idx as usize].completed);
                dag.mark_completed(idx);
                drained += 1;
            }
        }
        // Draining marks every task exactly once.
        assert_eq!(drained, dag.task_count());
    }

    #[test]
    fn test_mark_completed_twice_is_noop() {
        let mut dag = diamond();
        dag.mark_completed(0);
        dag.mark_completed(0);
        // in-degrees decremented only once
        assert_eq!(dag.ready_tasks(), vec![1, 2]);
    }

    #[test]
    fn test_data_propagation_uses_current_output_size() {
        let mut dag = diamond();
        // Simulate a backend response reporting a larger output for task a.
        let mut response = task(10);
        response.output_size = 2000;
        dag.set_task(0, response);
        dag.mark_completed(0);

        // Data successor b gains the reported output; control successor c
        // is untouched.
        assert_eq!(dag.task(1).unwrap().input_size, 3000);
        assert_eq!(dag.task(2).unwrap().input_size, 1000);
    }

    #[test]
    fn test_multiple_data_predecessors_accumulate() {
        let mut dag = TaskDag::new();
        let a = dag.add_task(task(1));
        let b = dag.add_task(task(2));
        let c = dag.add_task(task(3));
        dag.add_data_edge(a, c);
        dag.add_data_edge(b, c);
        dag.mark_completed(a);
        dag.mark_completed(b);
        assert_eq!(dag.task(c).unwrap().input_size, 2000);
    }

    #[test]
    fn test_sink_tasks() {
        let dag = diamond();
        assert_eq!(dag.sink_tasks(), vec![3]);
    }

    #[test]
    fn test_validate_acyclic() {
        assert!(diamond().validate());
        assert!(TaskDag::new().validate());
    }

    #[test]
    fn test_validate_detects_cycle() {
        let mut dag = TaskDag::new();
        let a = dag.add_task(task(1));
        let b = dag.add_task(task(2));
        let c = dag.add_task(task(3));
        dag.add_control_edge(a, b);
        dag.add_control_edge(b, c);
        dag.add_control_edge(c, a);
        assert!(!dag.validate());
    }

    #[test]
    fn test_validate_cycle_in_disconnected_component() {
        let mut dag = TaskDag::new();
        let a = dag.add_task(task(1));
        let b = dag.add_task(task(2));
        dag.add_control_edge(a, b);
        let c = dag.add_task(task(3));
        let d = dag.add_task(task(4));
        dag.add_control_edge(c, d);
        dag.add_control_edge(d, c);
        assert!(!dag.validate());
    }

    #[test]
    fn test_self_loop_rejected_at_insert() {
        let mut dag = TaskDag::new();
        let a = dag.add_task(task(1));
        dag.add_control_edge(a, a);
        assert!(dag.edges.is_empty());
        assert_eq!(dag.nodes[0].in_degree, 0);
    }

    #[test]
    fn test_invalid_index_rejected_at_insert() {
        let mut dag = TaskDag::new();
        let a = dag.add_task(task(1));
        dag.add_control_edge(a, 5);
        assert!(dag.edges.is_empty());
    }

    #[test]
    fn test_topological_order() {
        let dag = diamond();
        let order = dag.topological_order();
        assert_eq!(order.len(), 4);
        let pos = |i: u32| order.iter().position(|&x| x == i).unwrap();
        assert!(pos(0) < pos(1));
        assert!(pos(0) < pos(2));
        assert!(pos(1) < pos(3));
        assert!(pos(2) < pos(3));
    }

    #[test]
    fn test_task_index_lookup() {
        let dag = diamond();
        assert_eq!(dag.task_index(30), Some(2));
        assert_eq!(dag.task_index(99), None);
    }

    #[test]
    fn test_metadata_roundtrip() {
        let registry = TaskTypeRegistry::with_default();
        let dag = diamond();
        let bytes = dag.serialize_metadata(&registry).unwrap();

        let (restored, consumed) = TaskDag::deserialize_metadata(&bytes, &registry)
            .unwrap()
            .expect("complete serialization");
        assert_eq!(consumed, bytes.len());
        assert_eq!(restored.task_count(), 4);
        assert_eq!(restored.edges, dag.edges);
        assert_eq!(restored.task(0).unwrap(), dag.task(0).unwrap());
        assert_eq!(restored.ready_tasks(), vec![0]);
        assert_eq!(restored.validate(), dag.validate());
    }

    #[test]
    fn test_full_roundtrip_preserves_propagation_semantics() {
        let registry = TaskTypeRegistry::with_default();
        let dag = diamond();
        let bytes = dag.serialize_full(&registry).unwrap();

        let (mut restored, consumed) = TaskDag::deserialize_full(&bytes, &registry)
            .unwrap()
            .expect("complete serialization");
        assert_eq!(consumed, bytes.len());
        assert_eq!(restored.task_count(), 4);

        restored.mark_completed(0);
        // Data edge a -> b carries a's output into b's input.
        assert_eq!(restored.task(1).unwrap().input_size, 1500);
    }

    #[test]
    fn test_deserialize_incremental_delivery() {
        let registry = TaskTypeRegistry::with_default();
        let bytes = diamond().serialize_full(&registry).unwrap();

        for cut in 0..bytes.len() {
            assert!(
                TaskDag::deserialize_full(&bytes[..cut], &registry)
                    .unwrap()
                    .is_none(),
                "prefix of {cut} bytes must report incomplete"
            );
        }
        assert!(TaskDag::deserialize_full(&bytes, &registry).unwrap().is_some());
    }

    #[test]
    fn test_deserialize_rejects_invalid_edge() {
        let registry = TaskTypeRegistry::with_default();
        let mut dag = TaskDag::new();
        dag.add_task(task(1));
        dag.add_task(task(2));
        dag.add_control_edge(0, 1);
        let mut bytes = dag.serialize_metadata(&registry).unwrap().to_vec();
        // Corrupt the edge target to an out-of-range index.
        let len = bytes.len();
        bytes[len - 2] = 9;
        assert!(TaskDag::deserialize_metadata(&bytes, &registry).is_err());
    }
}
