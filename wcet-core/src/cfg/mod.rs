//! Control-Flow Graph data model
//!
//! A CFG is an arena of blocks owned by the CFG; edges are (source, sink)
//! index pairs, also owned by the CFG. This avoids the doubly-owning
//! reference cycles a naive graph-of-objects translation would need: callee
//! references from a [`BlockKind::Synth`] block are weak indices into the
//! owning [`CfgCollection`], never an owning pointer.

pub mod collector;
pub mod transform;

use crate::loader::Instruction;
use crate::prop::PropList;
use smallvec::SmallVec;

/// Index of a block within its owning [`Cfg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Index of an edge within its owning [`Cfg`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub u32);

/// Index of a CFG within a [`CfgCollection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CfgIndex(pub u32);

/// A block identified across the whole collection: CFG offset + intra-CFG
/// index, per the "global id" notion of the block data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalBlockId {
    pub cfg: CfgIndex,
    pub block: BlockId,
}

/// The four kinds of end block: function entry/exit, and the two synthetic
/// sinks used when control flow cannot be resolved statically or is never
/// meant to be analysed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndKind {
    Entry,
    Exit,
    /// Target of a computed branch that could not be resolved, even with
    /// flow-fact help.
    Unknown,
    /// Placeholder block with no analysis meaning (e.g. a removed call
    /// target under `NO_CALL`).
    Phony,
}

/// A maximal instruction sequence with single entry and single exit: every
/// instruction but the last is fall-through.
#[derive(Debug, Clone)]
pub struct BasicBlockData {
    pub address: u32,
    pub size: u32,
    pub instructions: Vec<Instruction>,
}

/// A call site: references a callee CFG, or `None` if the callee is unknown
/// (unresolved indirect call).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthBlockData {
    pub callee: Option<CfgIndex>,
}

/// Tagged sum over the three block capability sets, replacing a type-code +
/// downcast pattern: every call site switches on this tag instead of probing
/// an `IS_BASIC`/`IS_SYNTH`/`IS_END` flag.
#[derive(Debug, Clone)]
pub enum BlockKind {
    Basic(BasicBlockData),
    Synth(SynthBlockData),
    End(EndKind),
}

/// A block in a [`Cfg`], tagged by [`BlockKind`] and carrying its own
/// property list plus adjacency (as [`EdgeId`]s into the owning CFG).
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub kind: BlockKind,
    pub out_edges: SmallVec<[EdgeId; 2]>,
    pub in_edges: SmallVec<[EdgeId; 2]>,
    pub props: PropList,
}

impl Block {
    pub fn is_basic(&self) -> bool {
        matches!(self.kind, BlockKind::Basic(_))
    }

    pub fn is_synth(&self) -> bool {
        matches!(self.kind, BlockKind::Synth(_))
    }

    pub fn is_end(&self, kind: EndKind) -> bool {
        matches!(&self.kind, BlockKind::End(k) if *k == kind)
    }

    pub fn as_basic(&self) -> Option<&BasicBlockData> {
        match &self.kind {
            BlockKind::Basic(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_synth(&self) -> Option<&SynthBlockData> {
        match &self.kind {
            BlockKind::Synth(s) => Some(s),
            _ => None,
        }
    }
}

/// Directed flags on an edge: which side of a (possibly conditional)
/// control transfer it represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EdgeFlag {
    Taken = 0,
    NotTaken = 1,
    Both = 2,
}

/// A directed connection between two blocks of the same CFG. `back_edge`
/// and `loop_exit_of` are filled in by the structural analyses (dominance /
/// loop info), not at construction time.
#[derive(Debug, Clone)]
pub struct EdgeData {
    pub source: BlockId,
    pub sink: BlockId,
    pub flag: EdgeFlag,
    pub back_edge: bool,
    /// Set to the outermost loop header this edge exits, if any.
    pub loop_exit_of: Option<BlockId>,
    pub props: PropList,
}

/// What kind of subroutine a [`Cfg`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfgKind {
    /// An ordinary subprogram, reachable from the task entry.
    Subprog,
    /// A CFG created purely to host a virtualisation/inlining copy.
    Synth,
    /// A CFG added by the user (e.g. `ADDED_FUNCTION`), not discovered from
    /// static call resolution.
    User,
}

/// A control-flow graph: an arena of [`Block`]s and [`EdgeData`], with
/// distinguished entry/exit.
#[derive(Debug, Clone)]
pub struct Cfg {
    pub index: CfgIndex,
    pub kind: CfgKind,
    pub first_instruction: u32,
    pub blocks: Vec<Block>,
    pub edges: Vec<EdgeData>,
    pub entry: BlockId,
    pub exit: BlockId,
    /// Synth blocks (in other CFGs) that call this CFG.
    pub callers: Vec<GlobalBlockId>,
    pub props: PropList,
}

impl Cfg {
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    pub fn edge(&self, id: EdgeId) -> &EdgeData {
        &self.edges[id.0 as usize]
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> &mut EdgeData {
        &mut self.edges[id.0 as usize]
    }

    pub fn successors(&self, id: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.block(id).out_edges.iter().map(move |&e| self.edge(e).sink)
    }

    pub fn predecessors(&self, id: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.block(id).in_edges.iter().map(move |&e| self.edge(e).source)
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn add_block(&mut self, kind: BlockKind) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            id,
            kind,
            out_edges: SmallVec::new(),
            in_edges: SmallVec::new(),
            props: PropList::new(),
        });
        id
    }

    pub fn add_edge(&mut self, source: BlockId, sink: BlockId, flag: EdgeFlag) -> EdgeId {
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(EdgeData {
            source,
            sink,
            flag,
            back_edge: false,
            loop_exit_of: None,
            props: PropList::new(),
        });
        self.block_mut(source).out_edges.push(id);
        self.block_mut(sink).in_edges.push(id);
        id
    }

    /// Every block reachable from `entry`, as invariant 1 of the testable
    /// properties requires.
    pub fn reachable_from_entry(&self) -> Vec<bool> {
        let mut seen = vec![false; self.blocks.len()];
        let mut stack = vec![self.entry];
        seen[self.entry.0 as usize] = true;
        while let Some(b) = stack.pop() {
            for succ in self.successors(b) {
                if !seen[succ.0 as usize] {
                    seen[succ.0 as usize] = true;
                    stack.push(succ);
                }
            }
        }
        seen
    }
}

/// An ordered list of CFGs with a distinguished entry CFG.
#[derive(Debug, Clone)]
pub struct CfgCollection {
    pub cfgs: Vec<Cfg>,
    pub entry: CfgIndex,
}

impl CfgCollection {
    pub fn cfg(&self, idx: CfgIndex) -> &Cfg {
        &self.cfgs[idx.0 as usize]
    }

    pub fn cfg_mut(&mut self, idx: CfgIndex) -> &mut Cfg {
        &mut self.cfgs[idx.0 as usize]
    }

    pub fn entry_cfg(&self) -> &Cfg {
        self.cfg(self.entry)
    }

    pub fn total_block_count(&self) -> usize {
        self.cfgs.iter().map(|c| c.blocks.len()).sum()
    }

    pub fn block(&self, id: GlobalBlockId) -> &Block {
        self.cfg(id.cfg).block(id.block)
    }

    pub fn cfg_indices(&self) -> impl Iterator<Item = CfgIndex> {
        (0..self.cfgs.len() as u32).map(CfgIndex)
    }
}
