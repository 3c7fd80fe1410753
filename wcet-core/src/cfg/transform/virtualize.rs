//! Virtualisation (inlining)
//!
//! Each root CFG (a subprogram with no callers - the task entry, or a
//! `CfgKind::User` entry added alongside it) is rebuilt as a single flattened
//! graph: every `SynthBlock` whose callee is known is replaced by an inlined
//! copy of the callee's body, with the call site rewired directly to the
//! callee's entry successor and the callee's exit predecessors rewired to
//! the call site's return block. Recursive calls (the callee already being
//! inlined on the current call stack) and calls beyond the configured depth
//! limit are left as an un-inlined `SynthBlock`, which keeps the callee CFG
//! itself in the output collection, still reachable at its original index.

use crate::cfg::transform::{BlockMap, EdgeMap};
use crate::cfg::{BlockId, BlockKind, Cfg, CfgCollection, CfgIndex, EdgeFlag, GlobalBlockId};
use crate::config::Config;
use crate::error::Result;
use crate::prop::Identifier;

/// Set on a retained (un-inlined) `SynthBlock` when virtualisation declined
/// to expand it, so downstream passes can tell "no callee" apart from
/// "deliberately left as a call boundary".
pub static RECURSIVE_CALL: Identifier<bool> = Identifier::new("wcet.virtualize.recursive_call", false);
pub static DEPTH_LIMITED: Identifier<bool> = Identifier::new("wcet.virtualize.depth_limited", false);

const DEFAULT_MAX_DEPTH: u32 = 8;

pub fn virtualize(old: &CfgCollection, config: &Config) -> Result<(CfgCollection, BlockMap, EdgeMap)> {
    let max_depth: u32 = config
        .param("virtualize.max_depth")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_DEPTH);

    let mut new_cfgs: Vec<Cfg> = old.cfgs.clone();
    let mut block_map: BlockMap = BlockMap::new();
    let mut edge_map: EdgeMap = EdgeMap::new();

    // Identity mapping as the baseline; roots get overwritten below.
    for (i, cfg) in old.cfgs.iter().enumerate() {
        let idx = CfgIndex(i as u32);
        for b in cfg.block_ids() {
            block_map.insert(GlobalBlockId { cfg: idx, block: b }, GlobalBlockId { cfg: idx, block: b });
        }
        for e in 0..cfg.edges.len() as u32 {
            edge_map.insert((idx, crate::cfg::EdgeId(e)), (idx, crate::cfg::EdgeId(e)));
        }
    }

    for i in 0..old.cfgs.len() {
        let idx = CfgIndex(i as u32);
        if !old.cfg(idx).callers.is_empty() {
            continue; // not a root; stays in place, inlined away where called.
        }
        let mut on_stack = vec![idx];
        let (flat, bmap, emap) = inline_cfg(old, idx, &mut on_stack, max_depth);
        new_cfgs[i] = flat;
        for (k, v) in bmap {
            block_map.insert(k, v);
        }
        for (k, v) in emap {
            edge_map.insert(k, v);
        }
    }

    Ok((CfgCollection { cfgs: new_cfgs, entry: old.entry }, block_map, edge_map))
}

/// Rebuild `root`'s graph with every inlinable `SynthBlock` expanded.
fn inline_cfg(
    old: &CfgCollection,
    root: CfgIndex,
    on_stack: &mut Vec<CfgIndex>,
    max_depth: u32,
) -> (Cfg, BlockMap, EdgeMap) {
    let src = old.cfg(root);
    let mut out = Cfg {
        index: root,
        kind: src.kind,
        first_instruction: src.first_instruction,
        blocks: Vec::new(),
        edges: Vec::new(),
        entry: BlockId(0),
        exit: BlockId(0),
        callers: src.callers.clone(),
        props: src.props.clone(),
    };
    let mut block_map = BlockMap::new();
    let mut edge_map = EdgeMap::new();
    splice_region(old, root, src, &mut out, &mut block_map, &mut edge_map, on_stack, 0, max_depth);
    out.entry = block_map[&GlobalBlockId { cfg: root, block: src.entry }].block;
    out.exit = block_map[&GlobalBlockId { cfg: root, block: src.exit }].block;
    (out, block_map, edge_map)
}

/// Copy every block/edge of `src` (belonging to `src_idx` in `old`) into
/// `out`, recursively inlining any `SynthBlock` whose callee can still be
/// expanded at `depth`.
#[allow(clippy::too_many_arguments)]
fn splice_region(
    old: &CfgCollection,
    src_idx: CfgIndex,
    src: &Cfg,
    out: &mut Cfg,
    block_map: &mut BlockMap,
    edge_map: &mut EdgeMap,
    on_stack: &mut Vec<CfgIndex>,
    depth: u32,
    max_depth: u32,
) {
    // First pass: copy every block verbatim (Synth blocks included as
    // placeholders); second pass rewires/recurses into them.
    for b in src.block_ids() {
        let new_id = out.add_block(src.block(b).kind.clone());
        out.block_mut(new_id).props = src.block(b).props.clone();
        block_map.insert(GlobalBlockId { cfg: src_idx, block: b }, GlobalBlockId { cfg: out.index, block: new_id });
    }
    for (e, edge) in src.edges.iter().enumerate() {
        let new_source = block_map[&GlobalBlockId { cfg: src_idx, block: edge.source }].block;
        let new_sink = block_map[&GlobalBlockId { cfg: src_idx, block: edge.sink }].block;
        let new_edge = out.add_edge(new_source, new_sink, edge.flag);
        out.edge_mut(new_edge).props = edge.props.clone();
        edge_map.insert((src_idx, crate::cfg::EdgeId(e as u32)), (out.index, new_edge));
    }

    // Second pass: expand Synth blocks discovered in this region.
    let synth_blocks: Vec<(BlockId, Option<CfgIndex>)> = src
        .block_ids()
        .filter_map(|b| match &src.block(b).kind {
            BlockKind::Synth(s) => Some((b, s.callee)),
            _ => None,
        })
        .collect();

    for (old_block, callee) in synth_blocks {
        let new_synth = block_map[&GlobalBlockId { cfg: src_idx, block: old_block }].block;
        let Some(callee_idx) = callee else { continue };
        if on_stack.contains(&callee_idx) {
            out.block_mut(new_synth).props.set(&RECURSIVE_CALL, true);
            continue;
        }
        if depth >= max_depth {
            out.block_mut(new_synth).props.set(&DEPTH_LIMITED, true);
            continue;
        }

        let callee_cfg = old.cfg(callee_idx);
        on_stack.push(callee_idx);
        splice_region(old, callee_idx, callee_cfg, out, block_map, edge_map, on_stack, depth + 1, max_depth);
        on_stack.pop();

        let callee_entry = block_map[&GlobalBlockId { cfg: callee_idx, block: callee_cfg.entry }].block;
        let callee_exit = block_map[&GlobalBlockId { cfg: callee_idx, block: callee_cfg.exit }].block;

        // Rewire: predecessors of the SynthBlock now go straight to whatever
        // the callee entry pseudo-block pointed to; callee exit's
        // predecessors are redirected to the SynthBlock's own successor
        // (the return site). The SynthBlock and the callee's End blocks
        // become dead and are left unreferenced in the arena.
        let preds: Vec<BlockId> = out.predecessors(new_synth).collect();
        let entry_succs: Vec<BlockId> = out.successors(callee_entry).collect();
        for p in &preds {
            for &s in &entry_succs {
                out.add_edge(*p, s, EdgeFlag::Both);
            }
        }
        let return_succs: Vec<BlockId> = out.successors(new_synth).collect();
        let exit_preds: Vec<BlockId> = out.predecessors(callee_exit).collect();
        for p in &exit_preds {
            for &s in &return_succs {
                out.add_edge(*p, s, EdgeFlag::Both);
            }
        }
        detach(out, new_synth);
        detach(out, callee_entry);
        detach(out, callee_exit);
    }
}

/// Remove a block's adjacency so it is no longer reachable, without
/// renumbering the arena (its slot becomes dead weight, cleaned up by the
/// final trim pass over the whole collection if ever needed).
fn detach(cfg: &mut Cfg, block: BlockId) {
    let outs: Vec<_> = cfg.block(block).out_edges.to_vec();
    let ins: Vec<_> = cfg.block(block).in_edges.to_vec();
    for e in outs {
        let sink = cfg.edge(e).sink;
        cfg.block_mut(sink).in_edges.retain(|&x| x != e);
    }
    for e in ins {
        let source = cfg.edge(e).source;
        cfg.block_mut(source).out_edges.retain(|&x| x != e);
    }
    cfg.block_mut(block).out_edges.clear();
    cfg.block_mut(block).in_edges.clear();
}
