//! Pipeline execution-graph timing
//!
//! Generalizes `ExeGraphBBTime`/`StandardXGraphBuilder`: one node per
//! (instruction, pipeline stage) pair, edges for in-order stage progression
//! and, for single-issue stages, in-order issue between consecutive
//! instructions. A block's time is the longest path through this DAG, the
//! same criterion `StepGraphBuilder` resolves by ready-list simulation; since
//! the graph here is small and its node order is already topological (every
//! edge strictly increases the node index), a single forward relaxation
//! pass suffices and no simulation loop is needed.
//!
//! The adjacency is a plain `Vec<Vec<StageEdge>>`, not a graph crate: the
//! stack this core otherwise draws its ambient dependencies from never
//! reaches for one either, building its own graphs (CFGs, dominator trees)
//! by hand throughout.

use super::{Time, TimingModel};
use crate::cfg::{Block, EdgeData};

/// One pipeline stage: a name for diagnostics, its latency in cycles, and
/// whether it can only process one instruction at a time (a structural
/// hazard that serializes consecutive instructions through it).
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub name: String,
    pub latency: u64,
    pub single_issue: bool,
}

/// A directed edge in the per-block execution graph: `to` is a node index
/// (`instruction * stage_count + stage`), `weight` the cycle cost of the
/// edge's source stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageEdge {
    pub to: usize,
    pub weight: u64,
}

/// Timing backend built from a fixed pipeline shape shared by every block.
#[derive(Debug, Clone)]
pub struct PipelineGraphTiming {
    pub stages: Vec<StageSpec>,
}

impl PipelineGraphTiming {
    pub fn new(stages: Vec<StageSpec>) -> Self {
        PipelineGraphTiming { stages }
    }

    fn node(&self, inst: usize, stage: usize) -> usize {
        inst * self.stages.len() + stage
    }

    /// Build the execution graph for a block of `n_insts` instructions.
    /// Node `i * stage_count + s` is instruction `i` in stage `s`.
    fn build_graph(&self, n_insts: usize) -> Vec<Vec<StageEdge>> {
        let n_stages = self.stages.len();
        let mut adjacency = vec![Vec::new(); n_insts * n_stages];
        for i in 0..n_insts {
            for s in 0..n_stages {
                let latency = self.stages[s].latency;
                if s + 1 < n_stages {
                    adjacency[self.node(i, s)].push(StageEdge { to: self.node(i, s + 1), weight: latency });
                }
                if i + 1 < n_insts && self.stages[s].single_issue {
                    adjacency[self.node(i, s)].push(StageEdge { to: self.node(i + 1, s), weight: latency });
                }
            }
        }
        adjacency
    }

    /// Longest path from node 0, assuming `adjacency`'s node indices are
    /// already a topological order (true by construction: every edge here
    /// goes from a lower index to a higher one).
    fn longest_path(&self, adjacency: &[Vec<StageEdge>]) -> Time {
        if adjacency.is_empty() {
            return 0;
        }
        let mut arrival = vec![0u64; adjacency.len()];
        for node in 0..adjacency.len() {
            for edge in &adjacency[node] {
                let candidate = arrival[node] + edge.weight;
                if candidate > arrival[edge.to] {
                    arrival[edge.to] = candidate;
                }
            }
        }
        let n_stages = self.stages.len();
        let last_stage = n_stages - 1;
        (0..adjacency.len())
            .filter(|node| node % n_stages == last_stage)
            .map(|node| arrival[node] + self.stages[last_stage].latency)
            .max()
            .unwrap_or(0)
    }
}

impl TimingModel for PipelineGraphTiming {
    fn block_time(&self, block: &Block) -> Time {
        let Some(data) = block.as_basic() else { return 0 };
        if data.instructions.is_empty() || self.stages.is_empty() {
            return 0;
        }
        let adjacency = self.build_graph(data.instructions.len());
        self.longest_path(&adjacency)
    }

    fn edge_delta(&self, _edge: &EdgeData) -> Time {
        0
    }
}
