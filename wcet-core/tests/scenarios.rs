//! End-to-end scenarios exercising CFG construction, timing, loop reduction,
//! cache categorisation and IPET solving together, rather than one module in
//! isolation.

use wcet_core::analysis::{dominance, loop_info};
use wcet_core::cache::{AcsManager, Category, CacheGeometry};
use wcet_core::cfg::{
    BasicBlockData, BlockId, BlockKind, Cfg, CfgCollection, CfgIndex, CfgKind, EdgeFlag, EndKind,
};
use wcet_core::flowfacts::{FlowFacts, InfeasiblePath, IterQualifier};
use wcet_core::ipet::props::TIME;
use wcet_core::ipet::{compute_wcet, CachePenalty, ReferenceIlpSystem};
use wcet_core::loader::{InstKind, Instruction};
use wcet_core::prop::PropList;

fn empty_cfg() -> Cfg {
    Cfg {
        index: CfgIndex(0),
        kind: CfgKind::Subprog,
        first_instruction: 0,
        blocks: Vec::new(),
        edges: Vec::new(),
        entry: BlockId(0),
        exit: BlockId(0),
        callers: Vec::new(),
        props: PropList::new(),
    }
}

fn timed_block(cfg: &mut Cfg, address: u32, time: i64) -> BlockId {
    let id = cfg.add_block(BlockKind::Basic(BasicBlockData { address, size: 4, instructions: Vec::new() }));
    cfg.block_mut(id).props.set(&TIME, time);
    id
}

fn collection_of(cfg: Cfg) -> CfgCollection {
    CfgCollection { cfgs: vec![cfg], entry: CfgIndex(0) }
}

#[test]
fn scenario_a_straight_line() {
    let mut cfg = empty_cfg();
    let entry = cfg.add_block(BlockKind::End(EndKind::Entry));
    let b0 = timed_block(&mut cfg, 0, 5);
    let b1 = timed_block(&mut cfg, 4, 7);
    let b2 = timed_block(&mut cfg, 8, 3);
    let exit = cfg.add_block(BlockKind::End(EndKind::Exit));
    cfg.entry = entry;
    cfg.exit = exit;
    cfg.add_edge(entry, b0, EdgeFlag::Both);
    cfg.add_edge(b0, b1, EdgeFlag::Both);
    cfg.add_edge(b1, b2, EdgeFlag::Both);
    cfg.add_edge(b2, exit, EdgeFlag::Both);

    let mut collection = collection_of(cfg);
    let mut ilp = ReferenceIlpSystem::new();
    let wcet = compute_wcet(&mut collection, &mut ilp, &FlowFacts::new(), &[]).unwrap();
    assert_eq!(wcet, 15);

    let flat = collection.cfg(CfgIndex(0));
    for b in [b0, b1, b2] {
        assert_eq!(flat.block(b).props.get(&wcet_core::ipet::props::COUNT), Some(&1));
    }
}

#[test]
fn scenario_b_single_loop() {
    let mut cfg = empty_cfg();
    let entry = cfg.add_block(BlockKind::End(EndKind::Entry));
    let header = timed_block(&mut cfg, 0, 2);
    let body = timed_block(&mut cfg, 4, 10);
    let exit_block = timed_block(&mut cfg, 8, 1);
    let exit = cfg.add_block(BlockKind::End(EndKind::Exit));
    cfg.entry = entry;
    cfg.exit = exit;
    cfg.add_edge(entry, header, EdgeFlag::Both);
    cfg.add_edge(header, body, EdgeFlag::Taken);
    cfg.add_edge(body, header, EdgeFlag::Both);
    cfg.add_edge(header, exit_block, EdgeFlag::NotTaken);
    cfg.add_edge(exit_block, exit, EdgeFlag::Both);

    let mut facts = FlowFacts::new();
    facts.loop_bounds.insert(0, 100);

    let mut collection = collection_of(cfg);
    let mut ilp = ReferenceIlpSystem::new();
    let wcet = compute_wcet(&mut collection, &mut ilp, &facts, &[]).unwrap();
    assert_eq!(wcet, 2 * 101 + 10 * 100 + 1);

    let flat = collection.cfg(CfgIndex(0));
    assert_eq!(flat.block(header).props.get(&wcet_core::ipet::props::COUNT), Some(&101));
    assert_eq!(flat.block(body).props.get(&wcet_core::ipet::props::COUNT), Some(&100));
}

#[test]
fn scenario_c_if_then_else_takes_the_expensive_branch() {
    let mut cfg = empty_cfg();
    let entry = cfg.add_block(BlockKind::End(EndKind::Entry));
    let c = timed_block(&mut cfg, 0, 1);
    let t = timed_block(&mut cfg, 4, 20);
    let e = timed_block(&mut cfg, 8, 5);
    let j = timed_block(&mut cfg, 12, 2);
    let exit = cfg.add_block(BlockKind::End(EndKind::Exit));
    cfg.entry = entry;
    cfg.exit = exit;
    cfg.add_edge(entry, c, EdgeFlag::Both);
    cfg.add_edge(c, t, EdgeFlag::Taken);
    cfg.add_edge(c, e, EdgeFlag::NotTaken);
    cfg.add_edge(t, j, EdgeFlag::Both);
    cfg.add_edge(e, j, EdgeFlag::Both);
    cfg.add_edge(j, exit, EdgeFlag::Both);

    let mut collection = collection_of(cfg);
    let mut ilp = ReferenceIlpSystem::new();
    let wcet = compute_wcet(&mut collection, &mut ilp, &FlowFacts::new(), &[]).unwrap();
    assert_eq!(wcet, 23);

    let flat = collection.cfg(CfgIndex(0));
    assert_eq!(flat.block(t).props.get(&wcet_core::ipet::props::COUNT), Some(&1));
    assert_eq!(flat.block(e).props.get(&wcet_core::ipet::props::COUNT), Some(&0));
}

#[test]
fn scenario_d_cache_hit_on_loop_body_charges_the_miss_once() {
    fn inst(address: u32) -> Instruction {
        Instruction {
            address,
            size: 4,
            kind: InstKind::ALU,
            branch_target: None,
            reads: smallvec::SmallVec::new(),
            writes: smallvec::SmallVec::new(),
            micro_ops: Vec::new(),
        }
    }

    let mut cfg = empty_cfg();
    let entry = cfg.add_block(BlockKind::End(EndKind::Entry));
    let header = cfg.add_block(BlockKind::Basic(BasicBlockData {
        address: 0,
        size: 16,
        instructions: vec![inst(0), inst(4), inst(8), inst(12)],
    }));
    cfg.block_mut(header).props.set(&TIME, 4);
    let exit = cfg.add_block(BlockKind::End(EndKind::Exit));
    cfg.entry = entry;
    cfg.exit = exit;
    cfg.add_edge(entry, header, EdgeFlag::Both);
    cfg.add_edge(header, header, EdgeFlag::Taken);
    cfg.add_edge(header, exit, EdgeFlag::NotTaken);

    let geometry = CacheGeometry { sets: 4, ways: 2, line_size: 16 };
    let mut collection = collection_of(cfg);
    let lblocks = wcet_core::cache::lblock::annotate_instruction_accesses(&mut collection, &geometry);
    let cfg = collection.cfgs.into_iter().next().unwrap();

    let manager = AcsManager::new(geometry);
    let set = geometry.set_of(0);
    let n_lines = lblocks.len_of_set(set);
    let categories = manager.categorize_set(&cfg, set, n_lines);
    assert_eq!(categories.get(&(header, 0)), Some(&Category::FirstMiss(header)));

    let penalties: Vec<CachePenalty> = categories
        .into_iter()
        .map(|((block, _), category)| CachePenalty { block, category, penalty: 10 })
        .collect();

    let mut facts = FlowFacts::new();
    facts.loop_bounds.insert(0, 50);

    let mut collection = collection_of(cfg);
    let mut ilp = ReferenceIlpSystem::new();
    let wcet = compute_wcet(&mut collection, &mut ilp, &facts, &penalties).unwrap();
    // header runs 51 times (entry + 50 back edges): 4*51 = 204 plus a single
    // 10-cycle miss charge, not one per iteration.
    assert_eq!(wcet, 4 * 51 + 10);
}

#[test]
fn scenario_e_irregular_loop_reduces_to_one_regular_header() {
    // Two loop headers (a, b) reachable from a common entry via separate
    // edges, both closing back-edges through a shared tail block - the
    // "shared tail" irregular-nest topology the reduction pass targets.
    let mut cfg = empty_cfg();
    let entry = cfg.add_block(BlockKind::End(EndKind::Entry));
    let a = cfg.add_block(BlockKind::Basic(BasicBlockData { address: 0, size: 4, instructions: Vec::new() }));
    let b = cfg.add_block(BlockKind::Basic(BasicBlockData { address: 4, size: 4, instructions: Vec::new() }));
    let tail = cfg.add_block(BlockKind::Basic(BasicBlockData { address: 8, size: 4, instructions: Vec::new() }));
    let exit = cfg.add_block(BlockKind::End(EndKind::Exit));
    cfg.entry = entry;
    cfg.exit = exit;
    cfg.add_edge(entry, a, EdgeFlag::Taken);
    cfg.add_edge(entry, b, EdgeFlag::NotTaken);
    cfg.add_edge(a, tail, EdgeFlag::Both);
    cfg.add_edge(b, tail, EdgeFlag::Both);
    cfg.add_edge(tail, a, EdgeFlag::Taken);
    cfg.add_edge(tail, b, EdgeFlag::Taken);
    cfg.add_edge(tail, exit, EdgeFlag::NotTaken);

    let before = CfgCollection { cfgs: vec![cfg], entry: CfgIndex(0) };
    let (reduced, _block_map, _edge_map) =
        wcet_core::cfg::transform::reduce_irregular_loops(&before, &wcet_core::config::Config::new()).unwrap();

    let flat = reduced.cfg(CfgIndex(0));
    let dom = dominance::dominance(flat);
    let info = loop_info::loop_info(flat, &dom);
    let heads = flat
        .block_ids()
        .filter(|b| info.is_header.contains(b))
        .count();
    assert_eq!(heads, 1, "reduction should leave exactly one loop header");
}

#[test]
fn scenario_f_infeasible_pair_bounds_the_combined_count() {
    let mut cfg = empty_cfg();
    let entry = cfg.add_block(BlockKind::End(EndKind::Entry));
    let c = timed_block(&mut cfg, 0, 1);
    let b1 = timed_block(&mut cfg, 4, 100);
    let b2 = timed_block(&mut cfg, 8, 100);
    let j = timed_block(&mut cfg, 12, 1);
    let exit = cfg.add_block(BlockKind::End(EndKind::Exit));
    cfg.entry = entry;
    cfg.exit = exit;
    cfg.add_edge(entry, c, EdgeFlag::Both);
    cfg.add_edge(c, b1, EdgeFlag::Taken);
    cfg.add_edge(c, b2, EdgeFlag::NotTaken);
    cfg.add_edge(b1, j, EdgeFlag::Both);
    cfg.add_edge(b2, j, EdgeFlag::Both);
    cfg.add_edge(j, exit, EdgeFlag::Both);

    let mut facts = FlowFacts::new();
    facts.infeasible_paths.push(InfeasiblePath {
        a: 4,
        b: 8,
        qualifier: IterQualifier::AllIt,
    });

    let mut collection = collection_of(cfg);
    let mut ilp = ReferenceIlpSystem::new();
    let wcet = compute_wcet(&mut collection, &mut ilp, &facts, &[]).unwrap();
    // Without the infeasible-path fact the if-then-else structure already
    // forbids taking both branches, so the constraint does not lower the
    // bound further here; the test asserts the solver still finds the
    // single-branch optimum rather than double-counting both blocks.
    assert_eq!(wcet, 1 + 100 + 1);
}

#[test]
fn invariant_every_block_is_reachable_from_entry() {
    let mut cfg = empty_cfg();
    let entry = cfg.add_block(BlockKind::End(EndKind::Entry));
    let body = timed_block(&mut cfg, 0, 1);
    let exit = cfg.add_block(BlockKind::End(EndKind::Exit));
    cfg.entry = entry;
    cfg.exit = exit;
    cfg.add_edge(entry, body, EdgeFlag::Both);
    cfg.add_edge(body, exit, EdgeFlag::Both);

    assert!(cfg.reachable_from_entry().iter().all(|&r| r));
}

#[test]
fn invariant_back_edge_source_is_dominated_by_its_header() {
    let mut cfg = empty_cfg();
    let entry = cfg.add_block(BlockKind::End(EndKind::Entry));
    let header = timed_block(&mut cfg, 0, 1);
    let body = timed_block(&mut cfg, 4, 1);
    let exit = cfg.add_block(BlockKind::End(EndKind::Exit));
    cfg.entry = entry;
    cfg.exit = exit;
    cfg.add_edge(entry, header, EdgeFlag::Both);
    cfg.add_edge(header, body, EdgeFlag::Taken);
    cfg.add_edge(body, header, EdgeFlag::Both);
    cfg.add_edge(header, exit, EdgeFlag::NotTaken);

    let dom = dominance::dominance(&cfg);
    assert!(dom.dominates(header, body));
}

#[test]
fn boundary_empty_task_wcet_is_just_entry_time() {
    let mut cfg = empty_cfg();
    let entry = cfg.add_block(BlockKind::End(EndKind::Entry));
    let body = timed_block(&mut cfg, 0, 9);
    let exit = cfg.add_block(BlockKind::End(EndKind::Exit));
    cfg.entry = entry;
    cfg.exit = exit;
    cfg.add_edge(entry, body, EdgeFlag::Both);
    cfg.add_edge(body, exit, EdgeFlag::Both);

    let mut collection = collection_of(cfg);
    let mut ilp = ReferenceIlpSystem::new();
    let wcet = compute_wcet(&mut collection, &mut ilp, &FlowFacts::new(), &[]).unwrap();
    assert_eq!(wcet, 9);
}

#[test]
fn boundary_loop_without_a_bound_is_unbounded_in_the_solver() {
    let mut cfg = empty_cfg();
    let entry = cfg.add_block(BlockKind::End(EndKind::Entry));
    let header = timed_block(&mut cfg, 0, 1);
    let exit = cfg.add_block(BlockKind::End(EndKind::Exit));
    cfg.entry = entry;
    cfg.exit = exit;
    cfg.add_edge(entry, header, EdgeFlag::Both);
    cfg.add_edge(header, header, EdgeFlag::Taken);
    cfg.add_edge(header, exit, EdgeFlag::NotTaken);

    let mut collection = collection_of(cfg);
    let mut ilp = ReferenceIlpSystem::new();
    // No loop bound is configured for this header, so nothing caps the
    // solved value: the reference solver reports this as infeasible rather
    // than silently picking an arbitrary large count.
    let result = compute_wcet(&mut collection, &mut ilp, &FlowFacts::new(), &[]);
    assert!(result.is_err());
}
