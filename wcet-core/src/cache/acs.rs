//! Must / May / Persistence abstract cache states
//!
//! Each domain tracks, per l-block of one cache set, an LRU age: `Some(0)` is
//! "just loaded", `Some(a)` is "`a` distinct other lines touched since", and
//! `None` is "evicted, or never known to be in the cache along this path" -
//! generalizing `MUSTProblem`/`MAYProblem` from `dcache_ACSBuilder.cpp` to
//! run over [`crate::ai::Domain`] instead of `HalfAbsInt`'s own per-analysis
//! subclassing.
//!
//! Must and May differ only in how they join two incoming ages
//! (`max` vs `min`, absent-wins-conservative vs absent-loses) and in what an
//! absent entry means (`age >= A` vs `never present`); the per-block
//! update - age every line, then set the touched line's age to zero - is
//! shared.
//!
//! Persistence tracks one [`Acs`] per loop nesting level enclosing the
//! current block (outermost first), pushing a fresh level when entering a
//! new header and joining by level *and* header identity at merge points.
//! This is a deliberately simplified rendering of `dcache`'s persistence
//! levels (see `DESIGN.md`): it does not distinguish `DFML_INNER` /
//! `DFML_OUTER` / `DFML_MULTI` configuration modes, always reporting the
//! innermost level at which persistence holds.

use super::lblock::LBlockId;
use super::{AccessKind, CacheAccess};
use crate::ai::Domain;
use crate::analysis::{dominance, loop_info};
use crate::cfg::{BlockId, Cfg, EdgeData};
use std::collections::HashMap;

pub type Age = Option<u8>;

/// One cache set's abstract state: LRU age of every l-block known in that
/// set, indexed by [`LBlockId`].
#[derive(Debug, Clone, PartialEq)]
pub struct Acs {
    pub ages: Vec<Age>,
}

impl Acs {
    pub fn bottom(n_lines: usize) -> Self {
        Acs { ages: vec![None; n_lines] }
    }

    pub fn age_of(&self, lb: LBlockId) -> Age {
        self.ages.get(lb.0 as usize).copied().flatten()
    }
}

/// Age every tracked line by one step (evicting anything that reaches
/// associativity), then mark `inject` (if any) as just-touched. Shared by
/// Must, May and Persistence - only the join operator differs between them,
/// mirroring `MUSTProblem::update`'s `ageAll`/`inject` pair.
pub(super) fn step(ages: &mut [Age], inject: Option<usize>, assoc: u8) {
    for age in ages.iter_mut() {
        *age = match *age {
            Some(v) if v + 1 < assoc => Some(v + 1),
            _ => None,
        };
    }
    if let Some(idx) = inject {
        ages[idx] = Some(0);
    }
}

fn apply_accesses(ages: &mut Vec<Age>, accesses: &[CacheAccess], set: u32, assoc: u8) {
    for access in accesses.iter().filter(|a| a.set == set) {
        match access.kind {
            AccessKind::Block(lb) => step(ages, Some(lb.0 as usize), assoc),
            AccessKind::Range(..) | AccessKind::Any => step(ages, None, assoc),
        }
    }
}

fn accesses_of<'a>(block: &'a crate::cfg::Block) -> &'a [CacheAccess] {
    block.props.get(&super::ACCESSES).map(Vec::as_slice).unwrap_or(&[])
}

fn must_join(a: &Acs, b: &Acs) -> Acs {
    let ages = a
        .ages
        .iter()
        .zip(&b.ages)
        .map(|(&x, &y)| match (x, y) {
            (Some(p), Some(q)) => Some(p.max(q)),
            _ => None,
        })
        .collect();
    Acs { ages }
}

fn may_join(a: &Acs, b: &Acs) -> Acs {
    let ages = a
        .ages
        .iter()
        .zip(&b.ages)
        .map(|(&x, &y)| match (x, y) {
            (Some(p), Some(q)) => Some(p.min(q)),
            (Some(p), None) | (None, Some(p)) => Some(p),
            (None, None) => None,
        })
        .collect();
    Acs { ages }
}

/// Must-ACS for one cache set: an l-block is guaranteed in cache (age < A)
/// only if every path into this point agrees it is, and at no worse an age.
pub struct MustDomain {
    pub set: u32,
    pub n_lines: usize,
    pub assoc: u8,
}

impl Domain for MustDomain {
    type State = Acs;

    fn bottom(&self) -> Acs {
        Acs::bottom(self.n_lines)
    }

    fn entry(&self) -> Acs {
        Acs::bottom(self.n_lines)
    }

    fn join(&self, a: &Acs, b: &Acs) -> Acs {
        must_join(a, b)
    }

    fn update_edge(&self, _edge: &EdgeData, state: &Acs) -> Acs {
        state.clone()
    }

    fn update_block(&self, block: &crate::cfg::Block, state: &Acs) -> Acs {
        let mut ages = state.ages.clone();
        apply_accesses(&mut ages, accesses_of(block), self.set, self.assoc);
        Acs { ages }
    }
}

/// May-ACS for one cache set: an l-block may be in cache (age < A) if some
/// path into this point put it there; an entry absent on every path is a
/// certain miss.
pub struct MayDomain {
    pub set: u32,
    pub n_lines: usize,
    pub assoc: u8,
}

impl Domain for MayDomain {
    type State = Acs;

    fn bottom(&self) -> Acs {
        Acs::bottom(self.n_lines)
    }

    fn entry(&self) -> Acs {
        Acs::bottom(self.n_lines)
    }

    fn join(&self, a: &Acs, b: &Acs) -> Acs {
        may_join(a, b)
    }

    fn update_edge(&self, _edge: &EdgeData, state: &Acs) -> Acs {
        state.clone()
    }

    fn update_block(&self, block: &crate::cfg::Block, state: &Acs) -> Acs {
        let mut ages = state.ages.clone();
        apply_accesses(&mut ages, accesses_of(block), self.set, self.assoc);
        Acs { ages }
    }
}

/// Persistence state: one [`Acs`] per loop-nesting level currently enclosing
/// the block being processed, tagged with that level's header so joins only
/// combine states that agree on loop identity. Innermost level last.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PersAcs {
    pub levels: Vec<(BlockId, Acs)>,
}

/// Persistence-ACS for one cache set. Precomputes, for every block, the
/// chain of loop headers enclosing it (outermost first, innermost possibly
/// being the block itself if it is a header), from [`loop_info`].
pub struct PersDomain {
    pub set: u32,
    pub n_lines: usize,
    pub assoc: u8,
    chains: HashMap<BlockId, Vec<BlockId>>,
}

impl PersDomain {
    pub fn new(cfg: &Cfg, set: u32, n_lines: usize, assoc: u8) -> Self {
        let dom = dominance::dominance(cfg);
        let info = loop_info::loop_info(cfg, &dom);
        let mut chains = HashMap::new();
        for block in cfg.block_ids() {
            chains.insert(block, header_chain(block, &info));
        }
        PersDomain { set, n_lines, assoc, chains }
    }
}

fn header_chain(block: BlockId, info: &loop_info::LoopInfo) -> Vec<BlockId> {
    let mut innermost_first = Vec::new();
    let mut cur = if info.is_header.contains(&block) {
        Some(block)
    } else {
        info.enclosing.get(&block).copied()
    };
    while let Some(h) = cur {
        innermost_first.push(h);
        cur = info.enclosing.get(&h).copied();
    }
    innermost_first.reverse();
    innermost_first
}

impl Domain for PersDomain {
    type State = PersAcs;

    fn bottom(&self) -> PersAcs {
        PersAcs::default()
    }

    fn entry(&self) -> PersAcs {
        PersAcs::default()
    }

    fn join(&self, a: &PersAcs, b: &PersAcs) -> PersAcs {
        // The two sides commonly have different stack depths - e.g. the
        // entry edge into a header (depth 0, never having entered the loop)
        // joined with the back edge (depth >= 1). Join level-by-level over
        // the common prefix, then keep whichever side goes deeper verbatim:
        // a side that never reached that depth contributes no information
        // to it, not a reset to bottom.
        let common = a.levels.len().min(b.levels.len());
        let mut levels = Vec::with_capacity(common.max(a.levels.len()).max(b.levels.len()));
        let mut matched = true;
        for i in 0..common {
            let (ha, acs_a) = &a.levels[i];
            let (hb, acs_b) = &b.levels[i];
            if ha != hb {
                matched = false;
                break;
            }
            levels.push((*ha, must_join(acs_a, acs_b)));
        }
        if matched {
            let longer = if a.levels.len() > b.levels.len() { &a.levels } else { &b.levels };
            levels.extend(longer[common..].iter().cloned());
        }
        PersAcs { levels }
    }

    fn update_edge(&self, _edge: &EdgeData, state: &PersAcs) -> PersAcs {
        state.clone()
    }

    fn update_block(&self, block: &crate::cfg::Block, state: &PersAcs) -> PersAcs {
        let chain = self.chains.get(&block.id).cloned().unwrap_or_default();
        let mut levels: Vec<(BlockId, Acs)> = Vec::with_capacity(chain.len());
        for (i, &header) in chain.iter().enumerate() {
            match state.levels.get(i) {
                Some((h, acs)) if *h == header => levels.push((header, acs.clone())),
                _ => levels.push((header, Acs::bottom(self.n_lines))),
            }
        }
        if let Some((_, innermost)) = levels.last_mut() {
            apply_accesses(&mut innermost.ages, accesses_of(block), self.set, self.assoc);
        }
        PersAcs { levels }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn must_join_keeps_worse_of_two_known_ages() {
        let a = Acs { ages: vec![Some(0), None] };
        let b = Acs { ages: vec![Some(2), Some(1)] };
        let joined = must_join(&a, &b);
        assert_eq!(joined.ages, vec![Some(2), None]);
    }

    #[test]
    fn may_join_keeps_better_of_two_known_ages() {
        let a = Acs { ages: vec![Some(0), None] };
        let b = Acs { ages: vec![Some(2), Some(1)] };
        let joined = may_join(&a, &b);
        assert_eq!(joined.ages, vec![Some(0), Some(1)]);
    }

    #[test]
    fn repeated_touch_of_same_line_stays_at_age_zero() {
        let mut ages = vec![None, None];
        step(&mut ages, Some(0), 2);
        step(&mut ages, Some(0), 2);
        assert_eq!(ages, vec![Some(0), None]);
    }

    #[test]
    fn second_distinct_line_evicts_the_first_at_associativity_one() {
        let mut ages = vec![None, None];
        step(&mut ages, Some(0), 1);
        step(&mut ages, Some(1), 1);
        assert_eq!(ages, vec![None, Some(0)]);
    }
}
