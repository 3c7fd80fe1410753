//! Loop header identification and loop nesting info
//!
//! A back edge is any edge `s -> h` where `h` dominates `s`; `h` is then a
//! loop header. Loop membership for non-header blocks is the set of blocks
//! that reach the header without going through it again (natural loop
//! body), and the enclosing loop of a block is its innermost containing
//! header. Exit edges are tagged with the outermost loop they leave, per the
//! `LOOP_EXIT` annotation's tie-break rule.

use crate::analysis::dominance::Dominance;
use crate::cfg::{BlockId, Cfg, EdgeId};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
pub struct LoopInfo {
    /// Block -> true if it is a loop header.
    pub is_header: HashSet<BlockId>,
    /// Block -> its innermost enclosing loop header, if any.
    pub enclosing: HashMap<BlockId, BlockId>,
    /// Loop header -> the set of blocks in its natural loop body (including
    /// the header itself).
    pub body: HashMap<BlockId, HashSet<BlockId>>,
    /// Loop header -> nesting depth (0 = outermost).
    pub depth: HashMap<BlockId, u32>,
    /// Edge -> outermost loop header it exits, mirroring `EdgeData::loop_exit_of`.
    pub exit_of: HashMap<EdgeId, BlockId>,
}

/// Compute loop headers, natural loop bodies and exit-edge annotations for
/// `cfg`, given its already-computed forward dominance.
pub fn loop_info(cfg: &Cfg, dom: &Dominance) -> LoopInfo {
    let mut info = LoopInfo::default();

    let mut back_edges: Vec<(BlockId, BlockId)> = Vec::new();
    for block in cfg.block_ids() {
        for &edge_id in &cfg.block(block).out_edges {
            let edge = cfg.edge(edge_id);
            if dom.dominates(edge.sink, edge.source) {
                back_edges.push((edge.source, edge.sink));
                info.is_header.insert(edge.sink);
            }
        }
    }

    // Natural loop body of each header: union, over all back edges into it,
    // of every block that reaches the back-edge source without passing
    // through the header.
    for &(source, header) in &back_edges {
        let body = info.body.entry(header).or_insert_with(|| {
            let mut s = HashSet::new();
            s.insert(header);
            s
        });
        body.insert(source);
        let mut stack = vec![source];
        while let Some(node) = stack.pop() {
            for pred in cfg.predecessors(node) {
                if body.insert(pred) {
                    stack.push(pred);
                }
            }
        }
    }

    // Enclosing header per block: innermost (smallest) body containing it.
    for block in cfg.block_ids() {
        let mut best: Option<(BlockId, usize)> = None;
        for (&header, body) in &info.body {
            if body.contains(&block) && block != header {
                let size = body.len();
                if best.map(|(_, s)| size < s).unwrap_or(true) {
                    best = Some((header, size));
                }
            }
        }
        if let Some((header, _)) = best {
            info.enclosing.insert(block, header);
        }
    }

    // Depth: count how many other headers' bodies contain this header.
    for &header in info.is_header.iter().collect::<Vec<_>>() {
        let mut depth = 0;
        for (&other, body) in &info.body {
            if other != header && body.contains(&header) {
                depth += 1;
            }
        }
        info.depth.insert(header, depth);
    }

    // Exit edges: any edge whose source is inside a loop body and whose sink
    // is not; tagged with the outermost such loop (max body size == smallest
    // depth, i.e. depth 0 wins ties per the outermost-loop tie-break rule).
    for block in cfg.block_ids() {
        for &edge_id in &cfg.block(block).out_edges {
            let edge = cfg.edge(edge_id);
            let mut exited: Vec<BlockId> = Vec::new();
            for (&header, body) in &info.body {
                if body.contains(&edge.source) && !body.contains(&edge.sink) {
                    exited.push(header);
                }
            }
            if let Some(outermost) = exited
                .into_iter()
                .min_by_key(|h| info.depth.get(h).copied().unwrap_or(0))
            {
                info.exit_of.insert(edge_id, outermost);
            }
        }
    }

    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::dominance::dominance;
    use crate::cfg::{BlockKind, CfgIndex, CfgKind, EdgeFlag, EndKind};
    use crate::prop::PropList;

    fn single_loop() -> Cfg {
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
        let header = cfg.add_block(BlockKind::End(EndKind::Phony));
        let body = cfg.add_block(BlockKind::End(EndKind::Phony));
        let exit = cfg.add_block(BlockKind::End(EndKind::Exit));
        cfg.entry = entry;
        cfg.exit = exit;
        cfg.add_edge(entry, header, EdgeFlag::Both);
        cfg.add_edge(header, body, EdgeFlag::Taken);
        cfg.add_edge(header, exit, EdgeFlag::NotTaken);
        cfg.add_edge(body, header, EdgeFlag::Both); // back edge
        cfg
    }

    #[test]
    fn finds_single_header_and_body() {
        let cfg = single_loop();
        let dom = dominance(&cfg);
        let info = loop_info(&cfg, &dom);
        assert!(info.is_header.contains(&BlockId(1)));
        let body = &info.body[&BlockId(1)];
        assert!(body.contains(&BlockId(1)));
        assert!(body.contains(&BlockId(2)));
        assert!(!body.contains(&BlockId(0)));
    }

    #[test]
    fn exit_edge_tagged_with_header() {
        let cfg = single_loop();
        let dom = dominance(&cfg);
        let info = loop_info(&cfg, &dom);
        // header -> exit is the loop-exit edge (edge index 1).
        assert_eq!(info.exit_of.get(&EdgeId(1)), Some(&BlockId(1)));
    }
}
