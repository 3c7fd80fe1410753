//! IPET (Implicit Path Enumeration Technique) construction
//!
//! [`IpetBuilder`] walks one [`Cfg`] and emits the classic IPET linear
//! program, grounded in `ipet_IPET.cpp`'s variable/constraint/objective
//! layout: one [`Var`] per block and per edge, structural flow-conservation
//! equalities, loop-bound inequalities from flow facts, a (simplified)
//! infeasible-path bound, and an objective summing block times, edge deltas
//! and cache-miss penalties. The `Delta` inter-block timing open question
//! (§12) means `TIME_DELTA` is only ever read off edges inside this single
//! CFG - a caller wanting cross-procedure precision must virtualise first
//! ([`crate::cfg::transform::virtualize`]).

pub mod ilp;
pub mod props;

pub use ilp::{Cmp, ConstraintId, IlpSystem, ReferenceIlpSystem, Solution, Var};

use crate::analysis::{dominance, loop_info};
use crate::cache::Category;
use crate::cfg::{BlockId, Cfg, CfgCollection, EdgeId};
use crate::error::Result;
use crate::flowfacts::FlowFacts;
use std::collections::HashMap;

/// One cache access's contribution to the objective: the block making it,
/// its category, and the cycle penalty charged on a miss.
#[derive(Debug, Clone, Copy)]
pub struct CachePenalty {
    pub block: BlockId,
    pub category: Category,
    pub penalty: u64,
}

/// Builds the IPET system for a single CFG against a given [`IlpSystem`].
pub struct IpetBuilder<'a, S: IlpSystem> {
    cfg: &'a mut Cfg,
    ilp: &'a mut S,
    flow_facts: &'a FlowFacts,
}

impl<'a, S: IlpSystem> IpetBuilder<'a, S> {
    pub fn new(cfg: &'a mut Cfg, ilp: &'a mut S, flow_facts: &'a FlowFacts) -> Self {
        IpetBuilder { cfg, ilp, flow_facts }
    }

    /// Assign variables, add every constraint family and the objective.
    /// Does not solve - callers needing to add extra constraints (e.g. from
    /// a calling context) can do so between `build` and `solve`.
    pub fn build(&mut self, cache_penalties: &[CachePenalty]) {
        self.assign_variables();
        self.add_flow_constraints();
        self.add_loop_bound_constraints();
        self.add_infeasible_path_constraints();
        self.add_objective(cache_penalties);
    }

    /// Solve the system built by `build` and record `WCET`/`COUNT` back onto
    /// the CFG, returning the WCET in cycles.
    pub fn solve(&mut self) -> Result<i64> {
        self.ilp.solve()?;
        self.record_solution();
        Ok(*self.cfg.props.get(&props::WCET).expect("record_solution just set it"))
    }

    fn var_of_block(&self, b: BlockId) -> Var {
        *self.cfg.block(b).props.get(&props::VAR).expect("assign_variables runs before any other step")
    }

    fn var_of_edge(&self, e: EdgeId) -> Var {
        *self.cfg.edge(e).props.get(&props::VAR).expect("assign_variables runs before any other step")
    }

    fn time_of(&self, b: BlockId) -> i64 {
        self.cfg.block(b).props.get(&props::TIME).copied().unwrap_or(0)
    }

    fn delta_of(&self, e: EdgeId) -> i64 {
        self.cfg.edge(e).props.get(&props::TIME_DELTA).copied().unwrap_or(0)
    }

    fn assign_variables(&mut self) {
        let explicit = *self.cfg.props.get_or_default(&props::EXPLICIT);
        let cfg_index = self.cfg.index.0;
        for b in self.cfg.block_ids() {
            let name = if explicit { format!("b{cfg_index}_{}", b.0) } else { String::new() };
            let var = self.ilp.new_var(&name);
            self.cfg.block_mut(b).props.set(&props::VAR, var);
        }
        let edge_count = self.cfg.edges.len() as u32;
        for e in 0..edge_count {
            let eid = EdgeId(e);
            let name = if explicit { format!("e{cfg_index}_{e}") } else { String::new() };
            let var = self.ilp.new_var(&name);
            self.cfg.edge_mut(eid).props.set(&props::VAR, var);
        }
    }

    /// `x_entry = 1`, and for every block `x_v = Σ out(v) = Σ in(v)`
    /// (whichever side has edges - the CFG's entry has no in-edges, its
    /// exit no out-edges).
    fn add_flow_constraints(&mut self) {
        let entry = self.cfg.entry;
        let entry_var = self.var_of_block(entry);
        let root = self.ilp.new_constraint(Cmp::Eq, 1.0);
        self.ilp.add_to_constraint(root, 1.0, entry_var);

        for b in self.cfg.block_ids() {
            let block_var = self.var_of_block(b);
            let out_edges: Vec<EdgeId> = self.cfg.block(b).out_edges.iter().copied().collect();
            if !out_edges.is_empty() {
                let c = self.ilp.new_constraint(Cmp::Eq, 0.0);
                self.ilp.add_to_constraint(c, -1.0, block_var);
                for e in out_edges {
                    let v = self.var_of_edge(e);
                    self.ilp.add_to_constraint(c, 1.0, v);
                }
            }
            let in_edges: Vec<EdgeId> = self.cfg.block(b).in_edges.iter().copied().collect();
            if !in_edges.is_empty() {
                let c = self.ilp.new_constraint(Cmp::Eq, 0.0);
                self.ilp.add_to_constraint(c, -1.0, block_var);
                for e in in_edges {
                    let v = self.var_of_edge(e);
                    self.ilp.add_to_constraint(c, 1.0, v);
                }
            }
        }
    }

    /// `Σ back-edges(h) ≤ N · Σ entry-edges(h)` for every loop header `h`
    /// with a recorded bound; a header without one is left unconstrained -
    /// if its body carries any positive cost the solver surfaces that as an
    /// unbounded objective rather than this code silently assuming a bound.
    fn add_loop_bound_constraints(&mut self) {
        let dom = dominance::dominance(self.cfg);
        let info = loop_info::loop_info(self.cfg, &dom);
        let headers: Vec<BlockId> = info.is_header.iter().copied().collect();

        for header in headers {
            let address = self.cfg.block(header).as_basic().map(|data| data.address);
            let Some(bound) = address.and_then(|a| self.flow_facts.loop_bounds.get(&a)) else {
                continue;
            };
            let bound = *bound as f64;

            let in_edges: Vec<EdgeId> = self.cfg.block(header).in_edges.iter().copied().collect();
            let (back_edges, entry_edges): (Vec<EdgeId>, Vec<EdgeId>) = in_edges
                .into_iter()
                .partition(|&e| dom.dominates(header, self.cfg.edge(e).source));

            let c = self.ilp.new_constraint(Cmp::Le, 0.0);
            for e in back_edges {
                let v = self.var_of_edge(e);
                self.ilp.add_to_constraint(c, 1.0, v);
            }
            for e in entry_edges {
                let v = self.var_of_edge(e);
                self.ilp.add_to_constraint(c, -bound, v);
            }
        }
    }

    /// `x_a + x_b ≤ bound` for every infeasible-path pair whose two
    /// addresses both resolve to a block of this CFG. Every qualifier
    /// (`FIRST_IT`/`LAST_IT`/`ALL_IT`) collapses to the same aggregate
    /// bound here - a precise per-iteration encoding needs an auxiliary
    /// counter per shared enclosing loop, which this core does not build
    /// (see `DESIGN.md`).
    fn add_infeasible_path_constraints(&mut self) {
        let mut addr_to_block: HashMap<u32, BlockId> = HashMap::new();
        for b in self.cfg.block_ids() {
            if let Some(data) = self.cfg.block(b).as_basic() {
                addr_to_block.insert(data.address, b);
            }
        }
        if addr_to_block.is_empty() {
            return;
        }

        let dom = dominance::dominance(self.cfg);
        let info = loop_info::loop_info(self.cfg, &dom);

        for pair in self.flow_facts.infeasible_paths.clone() {
            let (Some(&a), Some(&b)) = (addr_to_block.get(&pair.a), addr_to_block.get(&pair.b)) else {
                continue;
            };
            let a_header = info.enclosing.get(&a).copied();
            let b_header = info.enclosing.get(&b).copied();
            let bound = match (a_header, b_header) {
                (Some(ha), Some(hb)) if ha == hb => self
                    .cfg
                    .block(ha)
                    .as_basic()
                    .and_then(|data| self.flow_facts.loop_bounds.get(&data.address))
                    .copied()
                    .unwrap_or(1) as f64,
                _ => 1.0,
            };

            let c = self.ilp.new_constraint(Cmp::Le, bound);
            let va = self.var_of_block(a);
            self.ilp.add_to_constraint(c, 1.0, va);
            let vb = self.var_of_block(b);
            self.ilp.add_to_constraint(c, 1.0, vb);
        }
    }

    /// `Σ T(v)x_v + Σ ΔT(e)x_e + cache terms`, maximized. Always-Hit
    /// accesses add nothing; Always-Miss and Not-Classified accesses charge
    /// their block's execution count; First-Miss(h) accesses charge an
    /// auxiliary variable pinned to `h`'s entry-edge count (once per loop
    /// entry, not per iteration), per `ipet_IPET.cpp`'s own auxiliary-pair
    /// treatment of that category.
    fn add_objective(&mut self, cache_penalties: &[CachePenalty]) {
        self.ilp.set_maximize(true);

        for b in self.cfg.block_ids() {
            let time = self.time_of(b);
            if time != 0 {
                let v = self.var_of_block(b);
                self.ilp.add_to_objective(time as f64, v);
            }
        }
        let edge_count = self.cfg.edges.len() as u32;
        for e in 0..edge_count {
            let eid = EdgeId(e);
            let delta = self.delta_of(eid);
            if delta != 0 {
                let v = self.var_of_edge(eid);
                self.ilp.add_to_objective(delta as f64, v);
            }
        }

        let mut always_miss: HashMap<BlockId, u64> = HashMap::new();
        let mut first_miss: HashMap<BlockId, u64> = HashMap::new();
        for penalty in cache_penalties {
            match penalty.category {
                Category::AlwaysHit => {}
                Category::AlwaysMiss | Category::NotClassified => {
                    *always_miss.entry(penalty.block).or_insert(0) += penalty.penalty;
                }
                Category::FirstMiss(header) => {
                    *first_miss.entry(header).or_insert(0) += penalty.penalty;
                }
            }
        }

        for (block, penalty) in always_miss {
            let v = self.var_of_block(block);
            self.ilp.add_to_objective(penalty as f64, v);
        }

        let dom = dominance::dominance(self.cfg);
        for (header, penalty) in first_miss {
            let entry_edges: Vec<EdgeId> = self
                .cfg
                .block(header)
                .in_edges
                .iter()
                .copied()
                .filter(|&e| !dom.dominates(header, self.cfg.edge(e).source))
                .collect();
            let miss_var = self.ilp.new_var("");
            let c = self.ilp.new_constraint(Cmp::Eq, 0.0);
            self.ilp.add_to_constraint(c, -1.0, miss_var);
            for e in entry_edges {
                let v = self.var_of_edge(e);
                self.ilp.add_to_constraint(c, 1.0, v);
            }
            self.ilp.add_to_objective(penalty as f64, miss_var);
        }
    }

    fn record_solution(&mut self) {
        let wcet = self.ilp.objective_value().round() as i64;
        self.cfg.props.set(&props::WCET, wcet);
        for b in self.cfg.block_ids() {
            let var = self.var_of_block(b);
            let count = self.ilp.value_of(var).round() as i64;
            self.cfg.block_mut(b).props.set(&props::COUNT, count);
        }
        let edge_count = self.cfg.edges.len() as u32;
        for e in 0..edge_count {
            let eid = EdgeId(e);
            let var = self.var_of_edge(eid);
            let count = self.ilp.value_of(var).round() as i64;
            self.cfg.edge_mut(eid).props.set(&props::COUNT, count);
        }
    }
}

/// Build, solve and record the IPET system for a collection's entry CFG.
pub fn compute_wcet<S: IlpSystem>(
    collection: &mut CfgCollection,
    ilp: &mut S,
    flow_facts: &FlowFacts,
    cache_penalties: &[CachePenalty],
) -> Result<i64> {
    let idx = collection.entry;
    let cfg = collection.cfg_mut(idx);
    let mut builder = IpetBuilder::new(cfg, ilp, flow_facts);
    builder.build(cache_penalties);
    builder.solve()
}
