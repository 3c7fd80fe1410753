//! Timing analysis
//!
//! A [`TimingModel`] turns a block and an edge into a cycle count; the two
//! backends below (`trivial`, `pipeline_graph`) generalize
//! `TrivialBBTime`/`ExeGraphBBTime`: both only need `&Block`/`&EdgeData`, so
//! neither has to see the owning CFG, mirroring `otawa::ipet::TIME`'s own
//! per-entity scope. [`annotate`] runs a model over a whole collection and
//! stores the result as [`crate::ipet::props::TIME`]/
//! [`crate::ipet::props::TIME_DELTA`] so the IPET builder can read it back
//! without knowing which backend produced it.

pub mod pipeline_graph;
pub mod trivial;

pub use pipeline_graph::{PipelineGraphTiming, StageEdge, StageSpec};
pub use trivial::TrivialTiming;

use crate::cfg::{Block, CfgCollection, EdgeData, EdgeId};
use crate::ipet::props::{TIME, TIME_DELTA};

/// Execution time in cycles.
pub type Time = u64;

/// A backend that prices a block's execution and an edge's inter-block
/// effect. Per the resolved open question on `Delta` across virtualised call
/// boundaries, `edge_delta` is only ever asked about edges inside a single
/// CFG - callers never invoke it across a `SynthBlock` call/return pair.
pub trait TimingModel {
    fn block_time(&self, block: &Block) -> Time;
    fn edge_delta(&self, edge: &EdgeData) -> Time;
}

/// Run `model` over every block and edge of `collection`, recording the
/// result as the `TIME`/`TIME_DELTA` properties the IPET builder consumes.
pub fn annotate(collection: &mut CfgCollection, model: &dyn TimingModel) {
    for idx in collection.cfg_indices() {
        let cfg = collection.cfg_mut(idx);
        for b in cfg.block_ids() {
            let t = model.block_time(cfg.block(b));
            cfg.block_mut(b).props.set(&TIME, t as i64);
        }
        let edge_count = cfg.edges.len() as u32;
        for e in 0..edge_count {
            let eid = EdgeId(e);
            let d = model.edge_delta(cfg.edge(eid));
            cfg.edge_mut(eid).props.set(&TIME_DELTA, d as i64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{BasicBlockData, BlockId, BlockKind, Cfg, CfgIndex, CfgKind, EdgeFlag, EndKind};
    use crate::loader::{InstKind, Instruction};
    use crate::prop::PropList;
    use smallvec::SmallVec;

    fn inst(address: u32, kind: InstKind) -> Instruction {
        Instruction {
            address,
            size: 4,
            kind,
            branch_target: None,
            reads: SmallVec::new(),
            writes: SmallVec::new(),
            micro_ops: Vec::new(),
        }
    }

    fn straight_line_cfg() -> Cfg {
        let mut cfg = Cfg {
            index: CfgIndex(0),
            kind: CfgKind::Subprog,
            first_instruction: 0,
            blocks: Vec::new(),
            edges: Vec::new(),
            entry: BlockId(0),
            exit: BlockId(0),
            callers: Vec::new(),
            props: PropList::new(),
        };
        let entry = cfg.add_block(BlockKind::End(EndKind::Entry));
        let body = cfg.add_block(BlockKind::Basic(BasicBlockData {
            address: 0,
            size: 8,
            instructions: vec![inst(0, InstKind::ALU), inst(4, InstKind::MEM | InstKind::LOAD)],
        }));
        let exit = cfg.add_block(BlockKind::End(EndKind::Exit));
        cfg.entry = entry;
        cfg.exit = exit;
        cfg.add_edge(entry, body, EdgeFlag::Both);
        cfg.add_edge(body, exit, EdgeFlag::Both);
        cfg
    }

    #[test]
    fn annotate_sets_time_from_the_model() {
        let mut collection = CfgCollection { cfgs: vec![straight_line_cfg()], entry: CfgIndex(0) };
        let model = TrivialTiming::with_default(1);
        annotate(&mut collection, &model);
        let body = collection.cfg(CfgIndex(0)).block(BlockId(1));
        assert_eq!(body.props.get(&TIME), Some(&2));
    }
}
