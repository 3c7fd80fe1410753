//! Abstract-interpretation engine
//!
//! A generic worklist-driven fixed-point solver over a user-supplied
//! [`Domain`], directly generalizing `HalfAbsInt` from
//! `include/otawa/util/HalfAbsInt.h`: a single driver instance walks the
//! whole [`CfgCollection`] (entry CFG and callee CFGs alike) by pushing a
//! call stack of `(CfgIndex, BlockId)` whenever it reaches a `SynthBlock`,
//! rather than requiring the collection to be fully virtualised first.
//!
//! Loop headers use the "first-unrolling fixpoint": the first visit to a
//! header only joins its non-back in-edges (the loop body has not produced
//! any state yet), every later visit joins both non-back and back edges,
//! and the header is considered stable once its out-state stops changing.
//! This is a direct, domain-agnostic rendering of `HalfAbsInt::solve`'s
//! `FIRST_ITER`/`FIXED` handling - the back-edge/entry-edge union split is
//! computed by the driver itself rather than delegated to the `Domain`,
//! since it depends only on graph shape (which edges are back edges), not
//! on domain semantics.

use crate::analysis::{dominance, loop_info};
use crate::cfg::{BlockKind, Cfg, CfgCollection, CfgIndex, EdgeData, EndKind, GlobalBlockId};
use std::collections::{HashMap, HashSet, VecDeque};

/// The abstract domain an analysis runs over. `State` must support equality
/// so the driver can detect a fixed point without a domain-specific hook.
pub trait Domain {
    type State: Clone + PartialEq;

    /// The least element - used to seed predecessors that have not been
    /// visited yet.
    fn bottom(&self) -> Self::State;

    /// The state flowing into the overall entry point of the analysis.
    fn entry(&self) -> Self::State;

    /// Least upper bound of two states.
    fn join(&self, a: &Self::State, b: &Self::State) -> Self::State;

    /// Transfer function applied when a state flows along an edge (e.g. a
    /// conditional-branch-aware cache or value analysis narrows on
    /// `EdgeFlag::Taken` vs `NotTaken`).
    fn update_edge(&self, edge: &EdgeData, state: &Self::State) -> Self::State;

    /// Transfer function applied by a block to its in-state, producing the
    /// block's out-state.
    fn update_block(&self, block: &crate::cfg::Block, state: &Self::State) -> Self::State;
}

/// Per-header iteration state. Convergence itself is detected by the driver
/// via `out_states` equality, so this only needs to track whether the loop's
/// back edges have produced a value yet.
#[derive(Debug, Clone)]
struct FixPointState {
    first_iter: bool,
}

/// Precomputed, per-CFG structural facts the driver needs: which blocks are
/// loop headers, and which in-edges of each block are back edges. Callers
/// build this once (from [`crate::analysis::dominance`] and
/// [`crate::analysis::loop_info`]) and reuse it across analyses.
pub struct LoopShape {
    headers: HashSet<GlobalBlockId>,
    back_edges: HashSet<(CfgIndex, crate::cfg::EdgeId)>,
}

impl LoopShape {
    pub fn compute(collection: &CfgCollection) -> Self {
        let mut headers = HashSet::new();
        let mut back_edges = HashSet::new();
        for idx in collection.cfg_indices() {
            let cfg = collection.cfg(idx);
            let dom = dominance::dominance(cfg);
            let info = loop_info::loop_info(cfg, &dom);
            for &h in &info.is_header {
                headers.insert(GlobalBlockId { cfg: idx, block: h });
            }
            for b in cfg.block_ids() {
                for &e in &cfg.block(b).out_edges {
                    let edge = cfg.edge(e);
                    if dom.dominates(edge.sink, edge.source) {
                        back_edges.insert((idx, e));
                    }
                }
            }
        }
        LoopShape { headers, back_edges }
    }

    fn is_header(&self, b: GlobalBlockId) -> bool {
        self.headers.contains(&b)
    }

    fn is_back_edge(&self, cfg: CfgIndex, edge: crate::cfg::EdgeId) -> bool {
        self.back_edges.contains(&(cfg, edge))
    }
}

/// The worklist-driven solver.
pub struct WorklistDriver<'a, D: Domain> {
    collection: &'a CfgCollection,
    domain: &'a D,
    shape: &'a LoopShape,
    in_states: HashMap<GlobalBlockId, D::State>,
    out_states: HashMap<GlobalBlockId, D::State>,
    fixpoints: HashMap<GlobalBlockId, FixPointState>,
    call_marks: HashMap<CfgIndex, D::State>,
}

impl<'a, D: Domain> WorklistDriver<'a, D> {
    pub fn new(collection: &'a CfgCollection, domain: &'a D, shape: &'a LoopShape) -> Self {
        WorklistDriver {
            collection,
            domain,
            shape,
            in_states: HashMap::new(),
            out_states: HashMap::new(),
            fixpoints: HashMap::new(),
            call_marks: HashMap::new(),
        }
    }

    pub fn out_state(&self, block: GlobalBlockId) -> Option<&D::State> {
        self.out_states.get(&block)
    }

    pub fn in_state(&self, block: GlobalBlockId) -> Option<&D::State> {
        self.in_states.get(&block)
    }

    /// Run the fixed-point computation to completion and return the final
    /// out-state table.
    pub fn solve(&mut self) -> HashMap<GlobalBlockId, D::State> {
        let entry_cfg_idx = self.collection.entry;
        let entry_block = self.collection.entry_cfg().entry;
        let mut worklist: VecDeque<GlobalBlockId> = VecDeque::new();
        let mut call_stack: Vec<GlobalBlockId> = Vec::new();
        worklist.push_back(GlobalBlockId { cfg: entry_cfg_idx, block: entry_block });

        while let Some(current) = worklist.pop_front() {
            let cfg = self.collection.cfg(current.cfg);
            let block = cfg.block(current.block);

            let in_state = self.compute_in_state(cfg, current, &call_stack);
            self.in_states.insert(current, in_state.clone());

            let out_state = self.domain.update_block(block, &in_state);
            let changed = self
                .out_states
                .get(&current)
                .map(|prev| *prev != out_state)
                .unwrap_or(true);
            self.out_states.insert(current, out_state.clone());

            if !changed {
                // Stable: nothing new to propagate from here this round.
                continue;
            }

            if let BlockKind::End(EndKind::Exit) = &block.kind {
                if current.cfg != entry_cfg_idx {
                    if let Some(synth) = call_stack.pop() {
                        self.call_marks.insert(current.cfg, out_state.clone());
                        for succ in self.collection.cfg(synth.cfg).successors(synth.block) {
                            worklist.push_back(GlobalBlockId { cfg: synth.cfg, block: succ });
                        }
                    }
                    continue;
                }
            }

            if let BlockKind::Synth(s) = &block.kind {
                if let Some(callee_idx) = s.callee {
                    call_stack.push(current);
                    let callee_entry = self.collection.cfg(callee_idx).entry;
                    worklist.push_back(GlobalBlockId { cfg: callee_idx, block: callee_entry });
                    continue;
                }
            }

            for succ in cfg.successors(current.block) {
                worklist.push_back(GlobalBlockId { cfg: current.cfg, block: succ });
            }
        }

        self.out_states.clone()
    }

    fn compute_in_state(&mut self, cfg: &Cfg, current: GlobalBlockId, call_stack: &[GlobalBlockId]) -> D::State {
        let block = cfg.block(current.block);
        if block.is_end(EndKind::Entry) {
            if let Some(mark) = self.call_marks.remove(&current.cfg) {
                return mark;
            }
            if current.cfg == self.collection.entry {
                return self.domain.entry();
            }
            // A callee entry reached outside of a tracked call (e.g. an
            // extra root entry) behaves like a fresh task entry.
            return self.domain.entry();
        }

        if self.shape.is_header(current) {
            let entry_union = self.edge_union(cfg, current, false);
            let fp = self
                .fixpoints
                .entry(current)
                .or_insert(FixPointState { first_iter: true });
            let in_state = if fp.first_iter {
                entry_union
            } else {
                let back_union = self.edge_union(cfg, current, true);
                self.domain.join(&entry_union, &back_union)
            };
            fp.first_iter = false;
            return in_state;
        }

        // An ordinary (non-header) block only ever has non-back in-edges by
        // definition of "header" - a back edge always targets a header.
        let _ = call_stack;
        self.edge_union(cfg, current, false)
    }

    /// Join `update_edge` applied to every in-edge's predecessor out-state,
    /// restricted to back edges (`only_back = true`) or non-back edges.
    fn edge_union(&self, cfg: &Cfg, current: GlobalBlockId, only_back: bool) -> D::State {
        let mut acc: Option<D::State> = None;
        for &edge_id in &cfg.block(current.block).in_edges {
            let is_back = self.shape.is_back_edge(current.cfg, edge_id);
            if is_back != only_back {
                continue;
            }
            let edge = cfg.edge(edge_id);
            let pred = GlobalBlockId { cfg: current.cfg, block: edge.source };
            let pred_out = self
                .out_states
                .get(&pred)
                .cloned()
                .unwrap_or_else(|| self.domain.bottom());
            let contribution = self.domain.update_edge(edge, &pred_out);
            acc = Some(match acc {
                None => contribution,
                Some(prev) => self.domain.join(&prev, &contribution),
            });
        }
        acc.unwrap_or_else(|| self.domain.bottom())
    }
}
