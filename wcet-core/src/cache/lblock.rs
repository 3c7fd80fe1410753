//! L-Block collection
//!
//! An l-block is a cache line's worth of code or data that some instruction
//! in the program actually touches, generalizing `icat3::LBlock`/
//! `icat3::LBlockBuilder`: rather than walking a pre-marked
//! `icache::ACCESSES` bag (a pass this core does not implement), instruction
//! fetches are derived directly from each basic block's instruction stream,
//! and data accesses are derived from `LOAD`/`STORE` instructions, address
//! precision permitting (see [`super::AccessKind`]).

use crate::cfg::{CfgCollection, CfgIndex};
use std::collections::HashMap;

/// Cache geometry: set count, associativity (ways) and line size, all
/// assumed powers of two per `hard::Cache`'s `round`/`set` helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheGeometry {
    pub sets: u32,
    pub ways: u8,
    pub line_size: u32,
}

impl CacheGeometry {
    pub fn line_of(&self, address: u32) -> u32 {
        address & !(self.line_size - 1)
    }

    pub fn set_of(&self, address: u32) -> u32 {
        (self.line_of(address) / self.line_size) % self.sets
    }
}

/// Index of an l-block within the set it belongs to (the `Acs`/`PersAcs`
/// vectors index by this).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LBlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LBlock {
    pub id: LBlockId,
    pub address: u32,
    pub set: u32,
}

/// All l-blocks touched by the program, bucketed by cache set, mirroring
/// `icat3::LBlockCollection`'s per-set vectors.
#[derive(Debug, Default, Clone)]
pub struct LBlockCollection {
    by_set: Vec<Vec<LBlock>>,
    addr_to_id: HashMap<u32, LBlockId>,
}

impl LBlockCollection {
    pub fn new(sets: u32) -> Self {
        LBlockCollection {
            by_set: vec![Vec::new(); sets as usize],
            addr_to_id: HashMap::new(),
        }
    }

    pub fn intern(&mut self, geometry: &CacheGeometry, address: u32) -> LBlockId {
        let line = geometry.line_of(address);
        if let Some(&id) = self.addr_to_id.get(&line) {
            return id;
        }
        let set = geometry.set_of(line);
        let bucket = &mut self.by_set[set as usize];
        let id = LBlockId(bucket.len() as u32);
        bucket.push(LBlock { id, address: line, set });
        self.addr_to_id.insert(line, id);
        id
    }

    pub fn len_of_set(&self, set: u32) -> usize {
        self.by_set[set as usize].len()
    }

    pub fn lblock(&self, set: u32, id: LBlockId) -> &LBlock {
        &self.by_set[set as usize][id.0 as usize]
    }

    pub fn lblock_of(&self, address: u32) -> Option<LBlockId> {
        self.addr_to_id.get(&address).copied()
    }
}

/// Walk every basic block's instructions, intern one l-block per distinct
/// cache line fetched, and attach [`super::ACCESSES`] entries (in program
/// order, de-duplicating consecutive fetches of the same line) to each
/// block. Returns the resulting collection so callers can size per-set `Acs`
/// vectors.
pub fn annotate_instruction_accesses(
    collection: &mut CfgCollection,
    geometry: &CacheGeometry,
) -> LBlockCollection {
    let mut lblocks = LBlockCollection::new(geometry.sets);
    for idx in collection.cfg_indices() {
        annotate_cfg_instructions(collection.cfg_mut(idx), idx, geometry, &mut lblocks);
    }
    lblocks
}

fn annotate_cfg_instructions(
    cfg: &mut crate::cfg::Cfg,
    _idx: CfgIndex,
    geometry: &CacheGeometry,
    lblocks: &mut LBlockCollection,
) {
    for b in cfg.block_ids() {
        let accesses = {
            let block = cfg.block(b);
            let Some(data) = block.as_basic() else { continue };
            let mut accesses = Vec::new();
            let mut last_line: Option<u32> = None;
            for inst in &data.instructions {
                let line = geometry.line_of(inst.address);
                if last_line == Some(line) {
                    continue;
                }
                last_line = Some(line);
                let lb = lblocks.intern(geometry, inst.address);
                accesses.push(super::CacheAccess {
                    set: geometry.set_of(inst.address),
                    kind: super::AccessKind::Block(lb),
                });
            }
            accesses
        };
        if !accesses.is_empty() {
            cfg.block_mut(b).props.set(&super::ACCESSES, accesses);
        }
    }
}

/// Walk every basic block's `LOAD`/`STORE` instructions and attach data-cache
/// [`super::ACCESSES`] entries, appended after any instruction-cache entries
/// already set by [`annotate_instruction_accesses`]. `overrides` supplies a
/// precisely resolved access for a given instruction address - the caller
/// mints its `LBlockId`s through the same [`LBlockCollection::intern`] used
/// for instruction fetches, keyed like the delayed-branch pass's side table,
/// since this core has no address/value analysis stage of its own. Any
/// `LOAD`/`STORE` instruction absent from `overrides` is modeled as
/// [`super::AccessKind::Any`] (an unresolved address conservatively touches
/// every line of its set).
pub fn annotate_data_accesses(
    collection: &mut CfgCollection,
    geometry: &CacheGeometry,
    overrides: &HashMap<u32, super::CacheAccess>,
) {
    for idx in collection.cfg_indices() {
        let cfg = collection.cfg_mut(idx);
        for b in cfg.block_ids() {
            let mut extra = Vec::new();
            {
                let block = cfg.block(b);
                let Some(data) = block.as_basic() else { continue };
                for inst in &data.instructions {
                    let is_mem = inst.kind.contains(crate::loader::InstKind::LOAD)
                        || inst.kind.contains(crate::loader::InstKind::STORE);
                    if !is_mem {
                        continue;
                    }
                    if let Some(&access) = overrides.get(&inst.address) {
                        extra.push(access);
                    } else {
                        extra.push(super::CacheAccess {
                            set: geometry.set_of(inst.address),
                            kind: super::AccessKind::Any,
                        });
                    }
                }
            }
            if extra.is_empty() {
                continue;
            }
            let block = cfg.block_mut(b);
            let mut accesses = block.props.get(&super::ACCESSES).cloned().unwrap_or_default();
            accesses.extend(extra);
            block.props.set(&super::ACCESSES, accesses);
        }
    }
}
