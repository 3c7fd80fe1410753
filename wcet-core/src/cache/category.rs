//! Cache access categorisation
//!
//! A pure function over already-converged Must/May/Persistence states,
//! mirroring `dcache_CatBuilder.cpp`'s separate categorisation pass: the ACS
//! fixpoints (from [`super::acs`]) answer "what's the state on entry to this
//! block", categorisation answers "what does *this* access cost", applying
//! the same per-access step used by the ACS builders so that a block with
//! several accesses to the same set gets one verdict per access rather than
//! one for the whole block.

use super::acs::{step, Acs, PersAcs};
use super::lblock::LBlockId;
use super::{AccessKind, CacheAccess};
use crate::cfg::BlockId;

/// Verdict for one cache access, in the precedence order the IPET builder
/// relies on (`ALWAYS_HIT > FIRST_MISS(L) > ALWAYS_MISS > NOT_CLASSIFIED`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Guaranteed in cache: no penalty term.
    AlwaysHit,
    /// Misses exactly once per execution of the named enclosing loop,
    /// hits on every other iteration.
    FirstMiss(BlockId),
    /// Guaranteed absent: full miss penalty every execution.
    AlwaysMiss,
    /// Neither bound could be established; treated as `AlwaysMiss` by the
    /// IPET builder (the conservative fallback named in the cache module).
    NotClassified,
}

fn is_hit(age: super::acs::Age, assoc: u8) -> bool {
    age.map(|a| a < assoc).unwrap_or(false)
}

/// Categorize every access of `accesses` restricted to `set`, given the
/// converged Must/May/Persistence in-states for the block they belong to.
/// Returns one category per qualifying access, in program order.
pub fn categorize_block(
    accesses: &[CacheAccess],
    set: u32,
    assoc: u8,
    must_in: &Acs,
    may_in: &Acs,
    pers_in: &PersAcs,
) -> Vec<(CacheAccess, Category)> {
    let mut must = must_in.ages.clone();
    let mut may = may_in.ages.clone();
    let mut pers = pers_in.levels.last().map(|(_, acs)| acs.ages.clone());
    let pers_header = pers_in.levels.last().map(|(h, _)| *h);

    let mut out = Vec::new();
    for &access in accesses.iter().filter(|a| a.set == set) {
        let lb = match access.kind {
            AccessKind::Block(lb) => Some(lb),
            AccessKind::Range(..) | AccessKind::Any => None,
        };
        let category = categorize_one(lb, assoc, &must, &may, pers.as_deref(), pers_header);
        out.push((access, category));

        let inject = lb.map(|LBlockId(i)| i as usize);
        step(&mut must, inject, assoc);
        step(&mut may, inject, assoc);
        if let Some(levels) = pers.as_mut() {
            step(levels, inject, assoc);
        }
    }
    out
}

fn categorize_one(
    lb: Option<LBlockId>,
    assoc: u8,
    must: &[super::acs::Age],
    may: &[super::acs::Age],
    pers: Option<&[super::acs::Age]>,
    pers_header: Option<BlockId>,
) -> Category {
    let Some(LBlockId(idx)) = lb else {
        // Range/Any accesses touch the whole set; no identity to look up a
        // per-line age against, so they can never be shown to hit.
        return Category::NotClassified;
    };
    let idx = idx as usize;

    if is_hit(must.get(idx).copied().flatten(), assoc) {
        return Category::AlwaysHit;
    }

    if let (Some(pers), Some(header)) = (pers, pers_header) {
        if is_hit(pers.get(idx).copied().flatten(), assoc) {
            return Category::FirstMiss(header);
        }
    }

    let always_miss = may.get(idx).copied().flatten().is_none();
    if always_miss {
        return Category::AlwaysMiss;
    }

    Category::NotClassified
}
