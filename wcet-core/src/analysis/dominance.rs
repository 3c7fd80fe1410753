//! Dominance and post-dominance
//!
//! Classic Cooper-Harvey-Kennedy iterative algorithm (reverse postorder,
//! intersect immediate dominators until a fixed point) rather than the
//! textbook data-flow-over-bitsets formulation; it is the idiomatic choice
//! for a block count in the thousands, and it is what the original source's
//! `Dominance` pass implements.

use crate::cfg::{BlockId, Cfg};
use bitvec::prelude::*;

#[derive(Debug, Clone)]
pub struct Dominance {
    /// Immediate dominator of each block; `None` for the entry block.
    pub idom: Vec<Option<BlockId>>,
    /// Full dominator set of each block, as a bitset over block indices.
    pub dom_sets: Vec<BitVec<u32>>,
}

impl Dominance {
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.dom_sets[b.0 as usize][a.0 as usize]
    }

    pub fn idom(&self, b: BlockId) -> Option<BlockId> {
        self.idom[b.0 as usize]
    }
}

fn reverse_postorder(cfg: &Cfg, root: BlockId) -> Vec<BlockId> {
    let n = cfg.blocks.len();
    let mut visited = bitvec![u32, Lsb0; 0; n];
    let mut order = Vec::with_capacity(n);
    let mut stack = vec![(root, false)];
    visited.set(root.0 as usize, true);
    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            order.push(node);
            continue;
        }
        stack.push((node, true));
        for succ in cfg.successors(node) {
            if !visited[succ.0 as usize] {
                visited.set(succ.0 as usize, true);
                stack.push((succ, false));
            }
        }
    }
    order.reverse();
    order
}

fn compute_idom(cfg: &Cfg, root: BlockId, predecessors_of: impl Fn(&Cfg, BlockId) -> Vec<BlockId>) -> Vec<Option<BlockId>> {
    let n = cfg.blocks.len();
    let rpo = reverse_postorder(cfg, root);
    let mut rpo_index = vec![usize::MAX; n];
    for (i, &b) in rpo.iter().enumerate() {
        rpo_index[b.0 as usize] = i;
    }

    let mut idom: Vec<Option<BlockId>> = vec![None; n];
    idom[root.0 as usize] = Some(root);

    let intersect = |idom: &[Option<BlockId>], mut a: BlockId, mut b: BlockId| -> BlockId {
        while a != b {
            while rpo_index[a.0 as usize] > rpo_index[b.0 as usize] {
                a = idom[a.0 as usize].unwrap();
            }
            while rpo_index[b.0 as usize] > rpo_index[a.0 as usize] {
                b = idom[b.0 as usize].unwrap();
            }
        }
        a
    };

    let mut changed = true;
    while changed {
        changed = false;
        for &node in &rpo {
            if node == root {
                continue;
            }
            let preds = predecessors_of(cfg, node);
            let mut new_idom: Option<BlockId> = None;
            for p in preds {
                if idom[p.0 as usize].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => p,
                    Some(curr) => intersect(&idom, curr, p),
                });
            }
            if idom[node.0 as usize] != new_idom {
                idom[node.0 as usize] = new_idom;
                changed = true;
            }
        }
    }
    idom
}

fn dom_sets_from_idom(n: usize, root: BlockId, idom: &[Option<BlockId>]) -> Vec<BitVec<u32>> {
    let mut sets = vec![bitvec![u32, Lsb0; 0; n]; n];
    for i in 0..n {
        let mut b = BlockId(i as u32);
        sets[i].set(i, true);
        if idom[i].is_none() && BlockId(i as u32) != root {
            continue;
        }
        while b != root {
            let Some(d) = idom[b.0 as usize] else { break };
            sets[i].set(d.0 as usize, true);
            if d == b {
                break;
            }
            b = d;
        }
        sets[i].set(root.0 as usize, true);
    }
    sets
}

/// Forward dominance over `cfg`, rooted at `cfg.entry`.
pub fn dominance(cfg: &Cfg) -> Dominance {
    let idom = compute_idom(cfg, cfg.entry, |cfg, b| cfg.predecessors(b).collect());
    let dom_sets = dom_sets_from_idom(cfg.blocks.len(), cfg.entry, &idom);
    Dominance { idom, dom_sets }
}

/// Post-dominance: dominance over the reverse graph, rooted at `cfg.exit`.
pub fn post_dominance(cfg: &Cfg) -> Dominance {
    let idom = compute_idom(cfg, cfg.exit, |cfg, b| cfg.successors(b).collect());
    let dom_sets = dom_sets_from_idom(cfg.blocks.len(), cfg.exit, &idom);
    Dominance { idom, dom_sets }
}
