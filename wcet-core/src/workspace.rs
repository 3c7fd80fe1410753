//! Top-level analysis context
//!
//! Per §3.10's ownership summary: the workspace is the root that owns the
//! CFG collection, the loader-supplied view of the binary, the flow facts,
//! the ILP system and every analysis result reachable through properties.
//! It is the `ctx` every [`crate::scheduler::Processor`] runs against.

use crate::cfg::transform::{BlockMap, EdgeMap};
use crate::cfg::CfgCollection;
use crate::config::Config;
use crate::flowfacts::FlowFacts;
use crate::ipet::ilp::IlpSystem;
use crate::loader::Loader;
use crate::prop::PropList;
use crate::scheduler::Feature;
use std::collections::HashSet;

/// Owns everything an analysis pipeline touches. `loader` and `ilp` are
/// optional because unit-level processor tests often exercise only the CFG
/// and property layer; a real pipeline run supplies both before scheduling
/// any pass that needs them.
pub struct Workspace {
    pub collection: CfgCollection,
    pub config: Config,
    pub flow_facts: FlowFacts,
    pub props: PropList,
    pub loader: Option<Box<dyn Loader>>,
    pub ilp: Option<Box<dyn IlpSystem>>,
    features: HashSet<Feature>,
}

impl Workspace {
    pub fn new(collection: CfgCollection, config: Config) -> Self {
        Workspace {
            collection,
            config,
            flow_facts: FlowFacts::new(),
            props: PropList::new(),
            loader: None,
            ilp: None,
            features: HashSet::new(),
        }
    }

    pub fn with_loader(mut self, loader: Box<dyn Loader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_ilp(mut self, ilp: Box<dyn IlpSystem>) -> Self {
        self.ilp = Some(ilp);
        self
    }

    pub fn with_flow_facts(mut self, flow_facts: FlowFacts) -> Self {
        self.flow_facts = flow_facts;
        self
    }

    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    pub fn mark_feature(&mut self, feature: Feature) {
        self.features.insert(feature);
    }

    pub fn clear_feature(&mut self, feature: Feature) {
        self.features.remove(&feature);
    }

    /// Replace the CFG collection with the output of a transformer, copying
    /// every block's and edge's property list across via the old->new maps
    /// the transformer produced, per `cfg::transform`'s "clone with
    /// modification" design: the rebuild is only safe to adopt once the
    /// properties prior passes attached (e.g. `TIME`, `ACCESSES`) have a home
    /// in the new graph.
    pub fn migrate_properties(&mut self, mut new_collection: CfgCollection, block_map: &BlockMap, edge_map: &EdgeMap) {
        for (&old, &new) in block_map {
            let props = self.collection.cfg(old.cfg).block(old.block).props.clone();
            new_collection.cfg_mut(new.cfg).block_mut(new.block).props = props;
        }
        for (&(old_cfg, old_edge), &(new_cfg, new_edge)) in edge_map {
            let props = self.collection.cfg(old_cfg).edge(old_edge).props.clone();
            new_collection.cfg_mut(new_cfg).edge_mut(new_edge).props = props;
        }
        self.collection = new_collection;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{BasicBlockData, BlockKind, CfgIndex, CfgKind, EdgeFlag, EndKind, GlobalBlockId};
    use crate::ipet::props::TIME;

    fn one_block_cfg() -> crate::cfg::Cfg {
        let mut cfg = crate::cfg::Cfg {
            index: CfgIndex(0),
            kind: CfgKind::Subprog,
            first_instruction: 0,
            blocks: Vec::new(),
            edges: Vec::new(),
            entry: crate::cfg::BlockId(0),
            exit: crate::cfg::BlockId(0),
            callers: Vec::new(),
            props: PropList::new(),
        };
        let entry = cfg.add_block(BlockKind::End(EndKind::Entry));
        let body = cfg.add_block(BlockKind::Basic(BasicBlockData { address: 0, size: 4, instructions: Vec::new() }));
        let exit = cfg.add_block(BlockKind::End(EndKind::Exit));
        cfg.entry = entry;
        cfg.exit = exit;
        cfg.add_edge(entry, body, EdgeFlag::Both);
        cfg.add_edge(body, exit, EdgeFlag::Both);
        cfg
    }

    #[test]
    fn feature_marking_round_trips() {
        const DONE: Feature = Feature("done");
        let mut ws = Workspace::new(CfgCollection { cfgs: Vec::new(), entry: CfgIndex(0) }, Config::new());
        assert!(!ws.has_feature(DONE));
        ws.mark_feature(DONE);
        assert!(ws.has_feature(DONE));
        ws.clear_feature(DONE);
        assert!(!ws.has_feature(DONE));
    }

    #[test]
    fn migrate_properties_carries_values_across_a_rebuild() {
        let mut old_cfg = one_block_cfg();
        old_cfg.block_mut(crate::cfg::BlockId(1)).props.set(&TIME, 42);
        let old_collection = CfgCollection { cfgs: vec![old_cfg], entry: CfgIndex(0) };
        let mut ws = Workspace::new(old_collection, Config::new());

        let new_cfg = one_block_cfg();
        let new_collection = CfgCollection { cfgs: vec![new_cfg], entry: CfgIndex(0) };

        let mut block_map = BlockMap::new();
        block_map.insert(
            GlobalBlockId { cfg: CfgIndex(0), block: crate::cfg::BlockId(1) },
            GlobalBlockId { cfg: CfgIndex(0), block: crate::cfg::BlockId(1) },
        );
        let edge_map = EdgeMap::new();

        ws.migrate_properties(new_collection, &block_map, &edge_map);
        let migrated = ws.collection.cfg(CfgIndex(0)).block(crate::cfg::BlockId(1)).props.get(&TIME).copied();
        assert_eq!(migrated, Some(42));
    }
}
