//! CPU graph backend over CSR adjacency
//!
//! Each start vertex is an independent traversal, so batches fan out over
//! rayon with one task per start.

use rayon::prelude::*;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use strata_accel_core::validate;
use strata_accel_core::{
    AccelError, AccelResult, BackendCapabilities, BackendState, BackendType, ComputeBackend,
    CsrGraph, GraphBackend, Lifecycle,
};

const NO_PARENT: u32 = u32::MAX;

/// BFS and shortest path on the host CPU.
#[derive(Debug, Default)]
pub struct CpuGraphBackend {
    lifecycle: Lifecycle,
}

impl CpuGraphBackend {
    /// New, uninitialized backend
    pub fn new() -> Self {
        Self::default()
    }
}

impl ComputeBackend for CpuGraphBackend {
    fn name(&self) -> &str {
        "cpu-graph"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Cpu
    }

    fn is_available(&self) -> bool {
        true
    }

    fn capabilities(&self) -> BackendCapabilities {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        BackendCapabilities::graph("CPU").with_device(0, cores)
    }

    fn initialize(&self) -> AccelResult<()> {
        self.lifecycle.initialize_with(|| Ok(()))
    }

    fn shutdown(&self) {
        self.lifecycle.shutdown_with(|| {});
    }

    fn state(&self) -> BackendState {
        self.lifecycle.state()
    }
}

impl GraphBackend for CpuGraphBackend {
    fn batch_bfs(
        &self,
        graph: &CsrGraph<'_>,
        start_vertices: &[u32],
        max_depth: u32,
    ) -> AccelResult<Vec<Vec<u32>>> {
        self.lifecycle.ensure_initialized(self.name())?;
        validate::csr_graph(graph, start_vertices)?;
        Ok(start_vertices
            .par_iter()
            .map(|&start| bfs(graph, start, max_depth))
            .collect())
    }

    fn batch_shortest_path(
        &self,
        graph: &CsrGraph<'_>,
        starts: &[u32],
        ends: &[u32],
    ) -> AccelResult<Vec<Vec<u32>>> {
        self.lifecycle.ensure_initialized(self.name())?;
        if starts.len() != ends.len() {
            return Err(AccelError::invalid_input(format!(
                "{} start vertices but {} end vertices",
                starts.len(),
                ends.len()
            )));
        }
        validate::csr_graph(graph, starts)?;
        validate::csr_graph(graph, ends)?;
        Ok(starts
            .par_iter()
            .zip(ends.par_iter())
            .map(|(&s, &e)| match graph.weights {
                Some(_) => dijkstra(graph, s, e),
                None => unweighted_path(graph, s, e),
            })
            .collect())
    }
}

/// Vertices within `max_depth` hops of `start`, in visit order.
fn bfs(graph: &CsrGraph<'_>, start: u32, max_depth: u32) -> Vec<u32> {
    let mut visited = vec![false; graph.num_vertices()];
    let mut order = Vec::new();
    let mut queue = VecDeque::new();
    visited[start as usize] = true;
    queue.push_back((start, 0u32));
    while let Some((v, depth)) = queue.pop_front() {
        order.push(v);
        if depth == max_depth {
            continue;
        }
        for &n in graph.neighbors(v) {
            if !visited[n as usize] {
                visited[n as usize] = true;
                queue.push_back((n, depth + 1));
            }
        }
    }
    order
}

fn unweighted_path(graph: &CsrGraph<'_>, start: u32, end: u32) -> Vec<u32> {
    let mut parent = vec![NO_PARENT; graph.num_vertices()];
    let mut visited = vec![false; graph.num_vertices()];
    let mut queue = VecDeque::new();
    visited[start as usize] = true;
    queue.push_back(start);
    while let Some(v) = queue.pop_front() {
        if v == end {
            return walk_back(&parent, start, end);
        }
        for &n in graph.neighbors(v) {
            if !visited[n as usize] {
                visited[n as usize] = true;
                parent[n as usize] = v;
                queue.push_back(n);
            }
        }
    }
    Vec::new()
}

/// Heap entry ordered by total order on the tentative distance.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Tentative {
    dist: f32,
    vertex: u32,
}

impl Eq for Tentative {}

impl Ord for Tentative {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then(self.vertex.cmp(&other.vertex))
    }
}

impl PartialOrd for Tentative {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn dijkstra(graph: &CsrGraph<'_>, start: u32, end: u32) -> Vec<u32> {
    let n = graph.num_vertices();
    let mut dist = vec![f32::INFINITY; n];
    let mut parent = vec![NO_PARENT; n];
    let mut heap = BinaryHeap::new();
    dist[start as usize] = 0.0;
    heap.push(Reverse(Tentative {
        dist: 0.0,
        vertex: start,
    }));
    while let Some(Reverse(Tentative { dist: d, vertex: v })) = heap.pop() {
        if v == end {
            return walk_back(&parent, start, end);
        }
        if d > dist[v as usize] {
            continue;
        }
        let weights = graph.edge_weights(v).unwrap_or(&[]);
        for (&next, &w) in graph.neighbors(v).iter().zip(weights) {
            let candidate = d + w;
            if candidate < dist[next as usize] {
                dist[next as usize] = candidate;
                parent[next as usize] = v;
                heap.push(Reverse(Tentative {
                    dist: candidate,
                    vertex: next,
                }));
            }
        }
    }
    Vec::new()
}

fn walk_back(parent: &[u32], start: u32, end: u32) -> Vec<u32> {
    let mut path = vec![end];
    let mut v = end;
    while v != start {
        v = parent[v as usize];
        path.push(v);
    }
    path.reverse();
    path
}
