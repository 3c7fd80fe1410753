//! Cache categorisation
//!
//! Generalizes `icat3`/`dcache`: every instruction fetch, and every
//! resolvable `LOAD`/`STORE`, is an [`CacheAccess`] attached to the block
//! that makes it (see [`lblock`]); [`AcsManager`] runs the Must, May and
//! Persistence abstract-interpretation domains (see [`acs`]) over one CFG at
//! a time and hands their converged states to [`category::categorize_block`]
//! to produce a verdict per access, which the IPET builder turns into
//! penalty terms.

pub mod acs;
pub mod category;
pub mod lblock;

pub use acs::{Acs, Age, MayDomain, MustDomain, PersAcs, PersDomain};
pub use category::Category;
pub use lblock::{CacheGeometry, LBlock, LBlockCollection, LBlockId};

use crate::ai::{LoopShape, WorklistDriver};
use crate::cfg::{BlockId, Cfg, CfgCollection, CfgIndex, GlobalBlockId};
use crate::prop::Identifier;
use std::collections::HashMap;

/// How an access resolves against the l-blocks of its set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// A single, statically known cache line.
    Block(LBlockId),
    /// Anywhere between two known lines (a partially resolved address);
    /// treated the same as [`AccessKind::Any`] by the ACS step, per
    /// `MUSTProblem::update`'s `RANGE` case falling through to `ageAll`.
    Range(LBlockId, LBlockId),
    /// Address could not be resolved at all: conservatively ages every line
    /// of the set without injecting certainty into any of them.
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheAccess {
    pub set: u32,
    pub kind: AccessKind,
}

/// Every access a block makes, in program order, across all cache sets.
/// Populated by [`lblock::annotate_instruction_accesses`] and
/// [`lblock::annotate_data_accesses`].
pub static ACCESSES: Identifier<Vec<CacheAccess>> = Identifier::new("wcet.cache.accesses", Vec::new());

/// Drives the Must/May/Persistence fixpoints for one cache (instruction or
/// data) over a single CFG and turns the converged states into per-access
/// categories. Operates one [`Cfg`] at a time - the common case once
/// [`crate::cfg::transform::virtualize`] has flattened a task's calls into a
/// single graph; an un-inlined callee CFG is simply categorized separately,
/// which is also the conservative, always-safe choice when virtualisation
/// left a recursive or depth-limited call boundary in place.
pub struct AcsManager {
    pub geometry: CacheGeometry,
}

impl AcsManager {
    pub fn new(geometry: CacheGeometry) -> Self {
        AcsManager { geometry }
    }

    /// Categorize every access of `cfg` against cache set `set`, returning
    /// one verdict per `(block, access)` pair.
    pub fn categorize_set(&self, cfg: &Cfg, set: u32, n_lines: usize) -> HashMap<(BlockId, usize), Category> {
        let collection = CfgCollection { cfgs: vec![cfg.clone()], entry: CfgIndex(0) };
        let shape = LoopShape::compute(&collection);
        let assoc = self.geometry.ways;

        let must = MustDomain { set, n_lines, assoc };
        let mut must_driver = WorklistDriver::new(&collection, &must, &shape);
        must_driver.solve();

        let may = MayDomain { set, n_lines, assoc };
        let mut may_driver = WorklistDriver::new(&collection, &may, &shape);
        may_driver.solve();

        let pers = PersDomain::new(cfg, set, n_lines, assoc);
        let mut pers_driver = WorklistDriver::new(&collection, &pers, &shape);
        pers_driver.solve();

        let mut out = HashMap::new();
        let flat = collection.cfg(CfgIndex(0));
        for b in flat.block_ids() {
            let block = flat.block(b);
            let accesses = block.props.get(&ACCESSES);
            let Some(accesses) = accesses else { continue };
            let gid = GlobalBlockId { cfg: CfgIndex(0), block: b };
            let must_in = must_driver.in_state(gid).cloned().unwrap_or_else(|| Acs::bottom(n_lines));
            let may_in = may_driver.in_state(gid).cloned().unwrap_or_else(|| Acs::bottom(n_lines));
            let pers_in = pers_driver.in_state(gid).cloned().unwrap_or_default();
            let categorized = category::categorize_block(accesses, set, assoc, &must_in, &may_in, &pers_in);
            for (i, (_, cat)) in categorized.into_iter().enumerate() {
                out.insert((b, i), cat);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{BasicBlockData, BlockKind, CfgKind, EdgeFlag, EndKind};
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

    /// A single-block loop that fetches the same line every iteration. Must
    /// alone can never call this an always-hit (the very first execution,
    /// reached from outside the loop, is a genuine miss); Persistence should
    /// find it first-miss instead, since every iteration after the first
    /// reuses the line it loaded on the previous one.
    fn loop_cfg() -> Cfg {
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
        let header = cfg.add_block(BlockKind::Basic(BasicBlockData {
            address: 0,
            size: 4,
            instructions: vec![inst(0, InstKind::ALU)],
        }));
        let exit = cfg.add_block(BlockKind::End(EndKind::Exit));
        cfg.entry = entry;
        cfg.exit = exit;
        cfg.add_edge(entry, header, EdgeFlag::Both);
        cfg.add_edge(header, header, EdgeFlag::Taken);
        cfg.add_edge(header, exit, EdgeFlag::NotTaken);
        cfg
    }

    #[test]
    fn loop_body_fetch_is_classified_first_miss() {
        let mut cfg = loop_cfg();
        let geometry = CacheGeometry { sets: 4, ways: 2, line_size: 16 };
        let mut collection = CfgCollection { cfgs: vec![cfg.clone()], entry: CfgIndex(0) };
        let lblocks = lblock::annotate_instruction_accesses(&mut collection, &geometry);
        cfg = collection.cfgs.into_iter().next().unwrap();
        assert_eq!(lblocks.len_of_set(geometry.set_of(0)), 1);

        let manager = AcsManager::new(geometry);
        let set = geometry.set_of(0);
        let n_lines = lblocks.len_of_set(set);
        let result = manager.categorize_set(&cfg, set, n_lines);
        assert_eq!(result.get(&(BlockId(1), 0)), Some(&Category::FirstMiss(BlockId(1))));
    }
}
