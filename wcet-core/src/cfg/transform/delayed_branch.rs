//! Delayed-branch normalisation
//!
//! For architectures with N delay slots, the instructions physically
//! following a branch execute regardless of (or, for "taken-only" delayed
//! branches, only when) the branch is taken, before control actually
//! transfers. Downstream timing and cache analyses assume ordinary
//! fall-through semantics, so this pass removes the special case instead of
//! teaching it to every consumer: each qualifying out-edge of a
//! delayed-branch block gets a small synthetic block spliced in, carrying a
//! copy of the delay-slot instructions, so the instructions that really do
//! execute on that path are visible to whoever walks the graph afterwards.
//!
//! The delay-slot instructions themselves are supplied by the caller (keyed
//! by the block whose last instruction is the delayed branch) rather than
//! re-derived from the loader here, since this pass's signature - like the
//! other two transformers - only takes a [`CfgCollection`] and a [`Config`].
//! The one decoder the core ships ([`crate::loader::elf::OpaqueDecoder`]) is
//! not a delayed-branch architecture, so in practice this map is empty and
//! the pass degenerates to an identity clone; it exists fully built out for
//! architectures supplied through a custom `Decoder`.

use crate::cfg::transform::{BlockMap, EdgeMap};
use crate::cfg::{BlockId, BlockKind, Cfg, CfgCollection, CfgIndex, EdgeId, GlobalBlockId};
use crate::config::Config;
use crate::error::Result;
use crate::loader::Instruction;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayedBranchKind {
    /// The delay slot executes unconditionally after the branch.
    AlwaysDelayed,
    /// The delay slot is nullified unless the branch is taken.
    TakenOnlyDelayed,
}

pub fn normalize(
    old: &CfgCollection,
    delay_slot_instructions: &HashMap<(CfgIndex, BlockId), Vec<Instruction>>,
    kind: DelayedBranchKind,
    _config: &Config,
) -> Result<(CfgCollection, BlockMap, EdgeMap)> {
    let mut new_cfgs = Vec::with_capacity(old.cfgs.len());
    let mut block_map = BlockMap::new();
    let mut edge_map = EdgeMap::new();

    for cfg in &old.cfgs {
        let idx = cfg.index;
        let delay_here: HashMap<BlockId, &Vec<Instruction>> = delay_slot_instructions
            .iter()
            .filter(|((c, _), _)| *c == idx)
            .map(|((_, b), insts)| (*b, insts))
            .collect();

        if delay_here.is_empty() {
            new_cfgs.push(cfg.clone());
            for b in cfg.block_ids() {
                block_map.insert(GlobalBlockId { cfg: idx, block: b }, GlobalBlockId { cfg: idx, block: b });
            }
            for e in 0..cfg.edges.len() as u32 {
                edge_map.insert((idx, EdgeId(e)), (idx, EdgeId(e)));
            }
            continue;
        }

        let mut out = cfg.clone();
        for b in cfg.block_ids() {
            block_map.insert(GlobalBlockId { cfg: idx, block: b }, GlobalBlockId { cfg: idx, block: b });
        }
        for e in 0..cfg.edges.len() as u32 {
            edge_map.insert((idx, EdgeId(e)), (idx, EdgeId(e)));
        }

        for (&branching_block, delay_insts) in &delay_here {
            let out_edges: Vec<EdgeId> = out.block(branching_block).out_edges.to_vec();
            for edge_id in out_edges {
                let edge = out.edge(edge_id).clone();
                let qualifies = match kind {
                    DelayedBranchKind::AlwaysDelayed => true,
                    DelayedBranchKind::TakenOnlyDelayed => edge.flag == crate::cfg::EdgeFlag::Taken,
                };
                if !qualifies {
                    continue;
                }
                let delay_block = out.add_block(BlockKind::Basic(crate::cfg::BasicBlockData {
                    address: delay_insts.first().map(|i| i.address).unwrap_or(0),
                    size: delay_insts.iter().map(|i| i.size).sum(),
                    instructions: (*delay_insts).clone(),
                }));
                out.add_edge(branching_block, delay_block, edge.flag);
                out.add_edge(delay_block, edge.sink, crate::cfg::EdgeFlag::Both);
                detach_edge(&mut out, edge_id);
            }
        }
        new_cfgs.push(out);
    }

    Ok((CfgCollection { cfgs: new_cfgs, entry: old.entry }, block_map, edge_map))
}

fn detach_edge(cfg: &mut Cfg, edge_id: EdgeId) {
    let edge = cfg.edge(edge_id).clone();
    cfg.block_mut(edge.source).out_edges.retain(|&e| e != edge_id);
    cfg.block_mut(edge.sink).in_edges.retain(|&e| e != edge_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{BasicBlockData, CfgKind, EdgeFlag, EndKind};
    use crate::loader::InstKind;
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

    fn branchy_cfg() -> (Cfg, BlockId) {
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
        let branch = cfg.add_block(BlockKind::Basic(BasicBlockData {
            address: 0,
            size: 4,
            instructions: vec![inst(0, InstKind::CONTROL | InstKind::COND)],
        }));
        let taken = cfg.add_block(BlockKind::End(EndKind::Exit));
        let not_taken = cfg.add_block(BlockKind::End(EndKind::Phony));
        cfg.entry = entry;
        cfg.exit = taken;
        cfg.add_edge(entry, branch, EdgeFlag::Both);
        cfg.add_edge(branch, taken, EdgeFlag::Taken);
        cfg.add_edge(branch, not_taken, EdgeFlag::NotTaken);
        (cfg, branch)
    }

    #[test]
    fn always_delayed_splices_both_successors() {
        let (cfg, branch) = branchy_cfg();
        let collection = CfgCollection { cfgs: vec![cfg], entry: CfgIndex(0) };
        let mut map = HashMap::new();
        map.insert((CfgIndex(0), branch), vec![inst(4, InstKind::ALU)]);
        let config = Config::new();
        let (out, _bmap, _emap) =
            normalize(&collection, &map, DelayedBranchKind::AlwaysDelayed, &config).unwrap();
        let out_cfg = out.cfg(CfgIndex(0));
        let delay_blocks = out_cfg
            .blocks
            .iter()
            .filter(|b| b.as_basic().map(|d| d.address == 4).unwrap_or(false))
            .count();
        assert_eq!(delay_blocks, 2);
    }

    #[test]
    fn taken_only_splices_single_successor() {
        let (cfg, branch) = branchy_cfg();
        let collection = CfgCollection { cfgs: vec![cfg], entry: CfgIndex(0) };
        let mut map = HashMap::new();
        map.insert((CfgIndex(0), branch), vec![inst(4, InstKind::ALU)]);
        let config = Config::new();
        let (out, _bmap, _emap) =
            normalize(&collection, &map, DelayedBranchKind::TakenOnlyDelayed, &config).unwrap();
        let out_cfg = out.cfg(CfgIndex(0));
        let delay_blocks = out_cfg
            .blocks
            .iter()
            .filter(|b| b.as_basic().map(|d| d.address == 4).unwrap_or(false))
            .count();
        assert_eq!(delay_blocks, 1);
    }
}
