//! CFG Collector
//!
//! Discovers basic-block boundaries and builds the CFG-of-CFGs from a
//! loader and a task entry point, per the construction algorithm:
//!
//! 1. For each entry instruction, enqueue a CFG maker.
//! 2. For each maker, identify basic-block boundaries (entry, branch
//!    targets, instruction after a control instruction).
//! 3. For each control instruction, create successor edges (unconditional,
//!    conditional, call, return, unresolved computed branch).
//! 4. Resolve computed branches using flow-fact annotations before giving up
//!    to `Unknown`.
//! 5. Respect user `NO_CALL`/`IGNORE_CONTROL` annotations.
//!
//! Unlike a disassembler handed a flat instruction array, the loader here
//! only exposes `decode(address)`; block-start discovery is therefore driven
//! by actual control-flow reachability (recursive descent) rather than a
//! blind linear address sweep - an address that is never the target of any
//! edge is never decoded or added to the graph, which keeps Invariant 1
//! (every block reachable from entry) true by construction instead of by a
//! later dead-code pass.

use crate::cfg::{
    BasicBlockData, BlockKind, Cfg, CfgCollection, CfgIndex, CfgKind, EdgeFlag, EndKind,
    GlobalBlockId, SynthBlockData,
};
use crate::error::{Result, WcetError};
use crate::flowfacts::FlowFacts;
use crate::loader::{Instruction, Loader};
use std::collections::{BTreeSet, HashMap, HashSet};

/// How a call to a `NO_CALL`-annotated function is represented in the CFG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoCallMode {
    /// Treat the call instruction as a no-op: the calling block simply
    /// continues past it.
    NoOp,
    /// Treat the call as never returning: the calling block ends at a
    /// `Phony` sink and no path through it reaches `Exit`.
    NonReturning,
}

#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub no_call_mode: NoCallMode,
    /// Depth-unrelated user annotations honoured verbatim from flow facts;
    /// `IGNORE_ENTRY`/`IGNORE_SEQ` addresses suppress the corresponding
    /// automatic block-start rule at that address.
    pub ignore_entry: HashSet<u32>,
    pub ignore_seq: HashSet<u32>,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        CollectorOptions {
            no_call_mode: NoCallMode::NoOp,
            ignore_entry: HashSet::new(),
            ignore_seq: HashSet::new(),
        }
    }
}

/// Build the full CFG-of-CFGs for a task entry point plus any user-added
/// entries, consuming flow facts for branch/call resolution.
pub fn collect(
    loader: &dyn Loader,
    entry_address: u32,
    extra_entries: &[u32],
    facts: &FlowFacts,
    options: &CollectorOptions,
) -> Result<CfgCollection> {
    let no_call_addrs: HashSet<u32> = facts
        .no_call
        .iter()
        .filter_map(|name| loader.symbol(name))
        .collect();

    let mut cfgs: Vec<Cfg> = Vec::new();
    let mut addr_to_cfg: HashMap<u32, CfgIndex> = HashMap::new();
    let mut queue: Vec<u32> = vec![entry_address];
    queue.extend(extra_entries.iter().copied());
    let mut queued: HashSet<u32> = queue.iter().copied().collect();
    let mut pending_synths: Vec<(CfgIndex, crate::cfg::BlockId, u32)> = Vec::new();

    let mut qi = 0;
    while qi < queue.len() {
        let address = queue[qi];
        qi += 1;
        if addr_to_cfg.contains_key(&address) {
            continue;
        }
        if loader.segment_containing(address).is_none() {
            return Err(WcetError::analysis(address, "address not in any executable segment"));
        }

        let index = CfgIndex(cfgs.len() as u32);
        addr_to_cfg.insert(address, index);

        let (cfg, callees, synths) =
            build_one_cfg(loader, address, index, facts, options, &no_call_addrs)?;
        cfgs.push(cfg);
        for target in callees {
            if queued.insert(target) {
                queue.push(target);
            }
        }
        pending_synths.extend(synths);
    }

    // Backpatch synth-block callee references now that every CFG has an index.
    for (caller_cfg, block, target) in pending_synths {
        if let Some(&callee_idx) = addr_to_cfg.get(&target) {
            let block_data = cfgs[caller_cfg.0 as usize].block_mut(block);
            if let BlockKind::Synth(s) = &mut block_data.kind {
                s.callee = Some(callee_idx);
            }
            cfgs[callee_idx.0 as usize].callers.push(GlobalBlockId {
                cfg: caller_cfg,
                block,
            });
        }
    }

    let entry = *addr_to_cfg.get(&entry_address).expect("entry was just built");
    Ok(CfgCollection { cfgs, entry })
}

enum Terminator {
    Fallthrough,
    Unconditional { target: Option<u32> },
    Conditional { target: Option<u32>, fallthrough: u32 },
    Multi { targets: Vec<u32> },
    Call { target: Option<u32>, return_site: u32, ignored: bool },
    Return,
}

fn classify(
    inst: &Instruction,
    facts: &FlowFacts,
    options: &CollectorOptions,
    no_call_addrs: &HashSet<u32>,
) -> Terminator {
    if facts.ignore_control.contains(&inst.address) || options.ignore_seq.contains(&inst.address) {
        return Terminator::Fallthrough;
    }
    if inst.is_return() || facts.returns.contains(&inst.address) {
        return Terminator::Return;
    }
    if inst.is_call() {
        let target = inst.branch_target.or_else(|| {
            facts.branch_targets.get(&inst.address).and_then(|v| v.first().copied())
        });
        let ignored = target.map(|t| no_call_addrs.contains(&t)).unwrap_or(false);
        return Terminator::Call {
            target,
            return_site: inst.end_address(),
            ignored,
        };
    }
    if facts.multibranch.contains(&inst.address) || inst.kind.contains(crate::loader::InstKind::MULTI) {
        if let Some(targets) = facts.branch_targets.get(&inst.address) {
            return Terminator::Multi { targets: targets.clone() };
        }
    }
    if inst.is_conditional() {
        let target = inst
            .branch_target
            .or_else(|| facts.branch_targets.get(&inst.address).and_then(|v| v.first().copied()));
        return Terminator::Conditional {
            target,
            fallthrough: inst.end_address(),
        };
    }
    if inst.is_control() {
        let target = inst
            .branch_target
            .or_else(|| facts.branch_targets.get(&inst.address).and_then(|v| v.first().copied()));
        return Terminator::Unconditional { target };
    }
    Terminator::Fallthrough
}

#[allow(clippy::type_complexity)]
fn build_one_cfg(
    loader: &dyn Loader,
    entry_address: u32,
    index: CfgIndex,
    facts: &FlowFacts,
    options: &CollectorOptions,
    no_call_addrs: &HashSet<u32>,
) -> Result<(Cfg, Vec<u32>, Vec<(CfgIndex, crate::cfg::BlockId, u32)>)> {
    let mut decoded: HashMap<u32, Instruction> = HashMap::new();
    let mut block_starts: BTreeSet<u32> = BTreeSet::new();
    block_starts.insert(entry_address);
    let mut unknown_targets: HashSet<u32> = HashSet::new();
    let mut callees: Vec<u32> = Vec::new();
    let mut worklist: Vec<u32> = vec![entry_address];
    let mut visited_starts: HashSet<u32> = HashSet::new();

    while let Some(start) = worklist.pop() {
        if !visited_starts.insert(start) {
            continue;
        }
        let mut addr = start;
        loop {
            let inst = match decoded.get(&addr) {
                Some(i) => i.clone(),
                None => {
                    let i = loader.decode(addr)?;
                    decoded.insert(addr, i.clone());
                    i
                }
            };
            match classify(&inst, facts, options, no_call_addrs) {
                Terminator::Fallthrough => {
                    addr = inst.end_address();
                    if block_starts.contains(&addr) {
                        break;
                    }
                    continue;
                }
                Terminator::Return => break,
                Terminator::Call { target, return_site, ignored } => {
                    if let Some(t) = target {
                        if ignored {
                            if options.no_call_mode == NoCallMode::NoOp {
                                addr = inst.end_address();
                                if block_starts.contains(&addr) {
                                    break;
                                }
                                continue;
                            } else {
                                break; // NonReturning: path ends here.
                            }
                        } else {
                            callees.push(t);
                        }
                    }
                    block_starts.insert(return_site);
                    worklist.push(return_site);
                    break;
                }
                Terminator::Unconditional { target } => {
                    match target {
                        Some(t) => {
                            block_starts.insert(t);
                            worklist.push(t);
                        }
                        None => {
                            unknown_targets.insert(addr);
                        }
                    }
                    break;
                }
                Terminator::Conditional { target, fallthrough } => {
                    match target {
                        Some(t) => {
                            block_starts.insert(t);
                            worklist.push(t);
                        }
                        None => {
                            unknown_targets.insert(addr);
                        }
                    }
                    block_starts.insert(fallthrough);
                    worklist.push(fallthrough);
                    break;
                }
                Terminator::Multi { targets } => {
                    for t in targets {
                        block_starts.insert(t);
                        worklist.push(t);
                    }
                    break;
                }
            }
        }
    }

    // Phase 2: materialise blocks from block_starts, walking the already
    // decoded instruction cache and splitting on the next known start.
    let mut cfg = Cfg {
        index,
        kind: CfgKind::Subprog,
        first_instruction: entry_address,
        blocks: Vec::new(),
        edges: Vec::new(),
        entry: crate::cfg::BlockId(0),
        exit: crate::cfg::BlockId(0),
        callers: Vec::new(),
        props: crate::prop::PropList::new(),
    };
    let entry_end = cfg.add_block(BlockKind::End(EndKind::Entry));
    let exit_end = cfg.add_block(BlockKind::End(EndKind::Exit));
    cfg.entry = entry_end;
    cfg.exit = exit_end;
    let mut unknown_end: Option<crate::cfg::BlockId> = None;

    let starts: Vec<u32> = block_starts.iter().copied().collect();
    let mut addr_to_block: HashMap<u32, crate::cfg::BlockId> = HashMap::new();
    let mut synths: Vec<(CfgIndex, crate::cfg::BlockId, u32)> = Vec::new();

    for (i, &start) in starts.iter().enumerate() {
        let next_start = starts.get(i + 1).copied();
        let mut instructions = Vec::new();
        let mut addr = start;
        let mut terminator_addr = start;
        loop {
            let inst = match decoded.get(&addr) {
                Some(i) => i.clone(),
                None => break, // unreachable tail, never decoded in phase 1
            };
            terminator_addr = addr;
            instructions.push(inst.clone());
            match classify(&inst, facts, options, no_call_addrs) {
                Terminator::Fallthrough => {
                    addr = inst.end_address();
                    if Some(addr) == next_start || unknown_targets.contains(&terminator_addr) {
                        break;
                    }
                    continue;
                }
                _ => break,
            }
        }
        let bb_size = instructions.iter().map(|i| i.size).sum();
        let block_id = cfg.add_block(BlockKind::Basic(BasicBlockData {
            address: start,
            size: bb_size,
            instructions,
        }));
        addr_to_block.insert(start, block_id);
        let _ = terminator_addr;
    }

    // Wire edges now that every block exists.
    let entry_target = *addr_to_block.get(&entry_address).expect("entry block built");
    cfg.add_edge(entry_end, entry_target, EdgeFlag::Both);

    for &start in &starts {
        let block_id = *addr_to_block.get(&start).unwrap();
        let last_inst = {
            let bb = cfg.block(block_id).as_basic().unwrap();
            bb.instructions.last().cloned()
        };
        let Some(last_inst) = last_inst else { continue };
        match classify(&last_inst, facts, options, no_call_addrs) {
            Terminator::Fallthrough => {
                // Ran into the next block start without its own control instruction.
                let bb = cfg.block(block_id).as_basic().unwrap();
                let next_addr = bb.address + bb.size;
                if let Some(&next_id) = addr_to_block.get(&next_addr) {
                    cfg.add_edge(block_id, next_id, EdgeFlag::Both);
                }
            }
            Terminator::Return => {
                cfg.add_edge(block_id, exit_end, EdgeFlag::Taken);
            }
            Terminator::Call { target, return_site, ignored } => {
                if ignored && options.no_call_mode == NoCallMode::NonReturning {
                    let phony = cfg.add_block(BlockKind::End(EndKind::Phony));
                    cfg.add_edge(block_id, phony, EdgeFlag::Both);
                    continue;
                }
                if ignored {
                    if let Some(&next_id) = addr_to_block.get(&return_site) {
                        cfg.add_edge(block_id, next_id, EdgeFlag::Both);
                    }
                    continue;
                }
                let synth = cfg.add_block(BlockKind::Synth(SynthBlockData { callee: None }));
                cfg.add_edge(block_id, synth, EdgeFlag::Both);
                if let Some(&return_id) = addr_to_block.get(&return_site) {
                    cfg.add_edge(synth, return_id, EdgeFlag::Both);
                }
                if let Some(t) = target {
                    synths.push((index, synth, t));
                }
            }
            Terminator::Unconditional { target } => match target {
                Some(t) => {
                    if let Some(&tid) = addr_to_block.get(&t) {
                        cfg.add_edge(block_id, tid, EdgeFlag::Both);
                    }
                }
                None => {
                    let unk = *unknown_end.get_or_insert_with(|| cfg.add_block(BlockKind::End(EndKind::Unknown)));
                    cfg.add_edge(block_id, unk, EdgeFlag::Both);
                }
            },
            Terminator::Conditional { target, fallthrough } => {
                match target {
                    Some(t) => {
                        if let Some(&tid) = addr_to_block.get(&t) {
                            cfg.add_edge(block_id, tid, EdgeFlag::Taken);
                        }
                    }
                    None => {
                        let unk = *unknown_end.get_or_insert_with(|| cfg.add_block(BlockKind::End(EndKind::Unknown)));
                        cfg.add_edge(block_id, unk, EdgeFlag::Taken);
                    }
                }
                if let Some(&fid) = addr_to_block.get(&fallthrough) {
                    cfg.add_edge(block_id, fid, EdgeFlag::NotTaken);
                }
            }
            Terminator::Multi { targets } => {
                for t in targets {
                    if let Some(&tid) = addr_to_block.get(&t) {
                        cfg.add_edge(block_id, tid, EdgeFlag::Taken);
                    }
                }
            }
        }
    }

    Ok((cfg, callees, synths))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{InstKind, SyntheticLoader};
    use smallvec::SmallVec;

    fn straight_line_inst(address: u32) -> Instruction {
        Instruction {
            address,
            size: 4,
            kind: InstKind::ALU,
            branch_target: None,
            reads: SmallVec::new(),
            writes: SmallVec::new(),
            micro_ops: Vec::new(),
        }
    }

    fn return_inst(address: u32) -> Instruction {
        Instruction {
            address,
            size: 4,
            kind: InstKind::CONTROL | InstKind::RETURN,
            branch_target: None,
            reads: SmallVec::new(),
            writes: SmallVec::new(),
            micro_ops: Vec::new(),
        }
    }

    #[test]
    fn straight_line_three_blocks() {
        let loader = SyntheticLoader::new(0)
            .with_instruction(straight_line_inst(0))
            .with_instruction(straight_line_inst(4))
            .with_instruction(return_inst(8));
        let facts = FlowFacts::new();
        let options = CollectorOptions::default();
        let collection = collect(&loader, 0, &[], &facts, &options).unwrap();
        let cfg = collection.entry_cfg();
        // Entry end + one basic block + Exit end = 3 blocks (straight-line fallthrough to return).
        let basics: Vec<_> = cfg.blocks.iter().filter(|b| b.is_basic()).collect();
        assert_eq!(basics.len(), 1);
        assert!(cfg.reachable_from_entry().iter().all(|&r| r));
    }

    #[test]
    fn unresolved_branch_reaches_unknown() {
        let mut branch = straight_line_inst(0);
        branch.kind = InstKind::CONTROL;
        branch.branch_target = None;
        let loader = SyntheticLoader::new(0).with_instruction(branch);
        let facts = FlowFacts::new();
        let options = CollectorOptions::default();
        let collection = collect(&loader, 0, &[], &facts, &options).unwrap();
        let cfg = collection.entry_cfg();
        assert!(cfg.blocks.iter().any(|b| b.is_end(EndKind::Unknown)));
    }
}
