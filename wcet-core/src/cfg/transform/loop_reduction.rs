//! Irregular (multi-entry) loop reduction
//!
//! A vertex v's *head set* is the set of loop headers whose natural loop
//! body contains v (back edges, and hence headers, come from
//! [`crate::analysis::loop_info`], itself driven by [`crate::analysis::dominance`]).
//! A vertex belongs to an irregular nest when its head set has more than one
//! member: two or more loops share part of their body without one strictly
//! nesting inside the other, which the loop-bound and persistence machinery
//! downstream cannot reason about. For each irregular nest this pass keeps
//! the header with the largest body (minimising duplication) and clones
//! every other header's private region - the blocks in its body not shared
//! with the kept header - rewiring the nest's entry edges onto the clone.
//! Iterate until no vertex's head set exceeds one element.
//!
//! This handles the common "shared tail" topology (two loops converging on
//! a common suffix) that the testable scenarios exercise; truly pathological
//! multi-way overlaps are bounded by a fixed iteration cap rather than
//! risking non-termination, and a cap hit is logged rather than silently
//! accepted.

use crate::analysis::{dominance, loop_info};
use crate::cfg::transform::{BlockMap, EdgeMap};
use crate::cfg::{BlockId, Cfg, CfgCollection, CfgIndex, EdgeFlag, EdgeId, GlobalBlockId};
use crate::config::Config;
use crate::error::Result;
use std::collections::{HashMap, HashSet};

const MAX_ITERATIONS: u32 = 64;

pub fn reduce(old: &CfgCollection, _config: &Config) -> Result<(CfgCollection, BlockMap, EdgeMap)> {
    let mut new_cfgs = Vec::with_capacity(old.cfgs.len());
    let mut block_map = BlockMap::new();
    let mut edge_map = EdgeMap::new();

    for cfg in &old.cfgs {
        let idx = cfg.index;
        let mut working = cfg.clone();
        // Per-CFG identity seed; reduce_one composes further renames into
        // this as it clones regions.
        let mut local_block_map: HashMap<BlockId, BlockId> =
            working.block_ids().map(|b| (b, b)).collect();

        let mut iterations = 0;
        while iterations < MAX_ITERATIONS {
            let dom = dominance::dominance(&working);
            let info = loop_info::loop_info(&working, &dom);
            let head_sets = invert_body_map(&info.body);
            let Some(nest) = find_irregular_nest(&head_sets) else {
                break;
            };
            reduce_one_nest(&mut working, &info, &nest, &mut local_block_map);
            iterations += 1;
        }
        if iterations == MAX_ITERATIONS {
            log::warn!(
                "loop reduction did not converge for cfg {} after {} iterations; leaving residual irregular nest in place",
                idx.0,
                MAX_ITERATIONS
            );
        }

        for (old_b, new_b) in &local_block_map {
            block_map.insert(GlobalBlockId { cfg: idx, block: *old_b }, GlobalBlockId { cfg: idx, block: *new_b });
        }
        for e in 0..cfg.edges.len() as u32 {
            // Edge identity is not preserved through cloning in general; map
            // what we can (edges whose endpoints were never cloned keep their
            // original id).
            if (e as usize) < working.edges.len() {
                edge_map.insert((idx, EdgeId(e)), (idx, EdgeId(e)));
            }
        }
        new_cfgs.push(working);
    }

    Ok((CfgCollection { cfgs: new_cfgs, entry: old.entry }, block_map, edge_map))
}

fn invert_body_map(body: &HashMap<BlockId, HashSet<BlockId>>) -> HashMap<BlockId, HashSet<BlockId>> {
    let mut heads: HashMap<BlockId, HashSet<BlockId>> = HashMap::new();
    for (&header, members) in body {
        for &m in members {
            heads.entry(m).or_default().insert(header);
        }
    }
    heads
}

fn find_irregular_nest(head_sets: &HashMap<BlockId, HashSet<BlockId>>) -> Option<HashSet<BlockId>> {
    head_sets
        .values()
        .find(|set| set.len() > 1)
        .cloned()
}

fn reduce_one_nest(
    cfg: &mut Cfg,
    info: &loop_info::LoopInfo,
    nest: &HashSet<BlockId>,
    local_block_map: &mut HashMap<BlockId, BlockId>,
) {
    let preserved = *nest
        .iter()
        .max_by_key(|h| (info.body.get(h).map(|b| b.len()).unwrap_or(0), std::cmp::Reverse(h.0)))
        .expect("nest is non-empty");
    let preserved_body: HashSet<BlockId> = info.body.get(&preserved).cloned().unwrap_or_default();

    for &header in nest {
        if header == preserved {
            continue;
        }
        let full_body = info.body.get(&header).cloned().unwrap_or_default();
        let private: HashSet<BlockId> = full_body.difference(&preserved_body).copied().collect();
        if private.is_empty() {
            continue;
        }
        clone_private_region(cfg, header, &private, &preserved_body, local_block_map);
    }
}

/// Clone `private` (a loop header plus the part of its body not shared with
/// the preserved header) and redirect every edge entering the nest from
/// outside `private` onto the clone.
fn clone_private_region(
    cfg: &mut Cfg,
    header: BlockId,
    private: &HashSet<BlockId>,
    shared: &HashSet<BlockId>,
    local_block_map: &mut HashMap<BlockId, BlockId>,
) {
    let mut clone_of: HashMap<BlockId, BlockId> = HashMap::new();
    for &b in private {
        let new_id = cfg.add_block(cfg.block(b).kind.clone());
        cfg.block_mut(new_id).props = cfg.block(b).props.clone();
        clone_of.insert(b, new_id);
    }

    // Copy internal edges of the private region, and edges leaving it into
    // the shared tail (which stay pointed at the original shared blocks).
    let internal_edges: Vec<(BlockId, BlockId, EdgeFlag)> = private
        .iter()
        .flat_map(|&b| cfg.block(b).out_edges.to_vec().into_iter().map(move |e| (b, e)))
        .map(|(b, e)| {
            let edge = cfg.edge(e);
            (b, edge.sink, edge.flag)
        })
        .collect();
    for (source, sink, flag) in internal_edges {
        let new_source = clone_of[&source];
        let new_sink = if private.contains(&sink) {
            clone_of[&sink]
        } else if shared.contains(&sink) {
            sink
        } else {
            sink
        };
        cfg.add_edge(new_source, new_sink, flag);
    }

    // Redirect entry edges (from outside the private region into `header`)
    // onto the clone.
    let entry_edges: Vec<EdgeId> = cfg.block(header).in_edges.to_vec();
    for edge_id in entry_edges {
        let source = cfg.edge(edge_id).source;
        if private.contains(&source) {
            continue; // internal back edge, already re-pointed above.
        }
        let flag = cfg.edge(edge_id).flag;
        let clone_header = clone_of[&header];
        cfg.add_edge(source, clone_header, flag);
        detach_edge(cfg, edge_id);
    }

    for (&old, &new) in &clone_of {
        local_block_map.insert(old, new);
    }
}

fn detach_edge(cfg: &mut Cfg, edge_id: EdgeId) {
    let edge = cfg.edge(edge_id).clone();
    cfg.block_mut(edge.source).out_edges.retain(|&e| e != edge_id);
    cfg.block_mut(edge.sink).in_edges.retain(|&e| e != edge_id);
}
