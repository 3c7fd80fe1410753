//! Trivial basic-block timing
//!
//! Generalizes `TrivialBBTime`: each instruction costs a fixed number of
//! cycles looked up by its [`InstKind`], with a configured fallback for any
//! kind the table does not name. No inter-block effect is modeled -
//! `edge_delta` is always zero, matching the source's own "trivial" naming.

use super::{Time, TimingModel};
use crate::cfg::{Block, EdgeData};
use crate::config::Config;
use crate::loader::InstKind;

/// One `(kind, cycles)` entry. The table is searched in order and the first
/// matching kind wins, so more specific kinds (e.g. `LOAD`) should be listed
/// ahead of more general ones (e.g. `MEM`) when both apply to the same
/// instruction.
#[derive(Debug, Clone, Copy)]
pub struct KindCost {
    pub kind: InstKind,
    pub cycles: u64,
}

/// Instruction-kind to cycle-count table, read from configuration at
/// construction time (`-p timing.trivial.<kind>=<cycles>`,
/// `-p timing.trivial.default=<cycles>`).
#[derive(Debug, Clone)]
pub struct TrivialTiming {
    default_cycles: u64,
    table: Vec<KindCost>,
}

const KIND_PARAMS: &[(&str, InstKind)] = &[
    ("load", InstKind::LOAD),
    ("store", InstKind::STORE),
    ("mul", InstKind::MUL),
    ("div", InstKind::DIV),
    ("float", InstKind::FLOAT),
    ("mem", InstKind::MEM),
    ("control", InstKind::CONTROL),
    ("alu", InstKind::ALU),
];

impl TrivialTiming {
    /// Every instruction costs `default_cycles`, regardless of kind.
    pub fn with_default(default_cycles: u64) -> Self {
        TrivialTiming { default_cycles, table: Vec::new() }
    }

    /// Read `timing.trivial.*` parameters from `config`, falling back to one
    /// cycle per instruction for anything left unconfigured.
    pub fn from_config(config: &Config) -> Self {
        let default_cycles = config
            .param("timing.trivial.default")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);
        let mut table = Vec::new();
        for (name, kind) in KIND_PARAMS {
            let key = format!("timing.trivial.{name}");
            if let Some(cycles) = config.param(&key).and_then(|v| v.parse().ok()) {
                table.push(KindCost { kind: *kind, cycles });
            }
        }
        TrivialTiming { default_cycles, table }
    }

    fn cycles_for(&self, kind: InstKind) -> u64 {
        self.table
            .iter()
            .find(|entry| kind.contains(entry.kind))
            .map(|entry| entry.cycles)
            .unwrap_or(self.default_cycles)
    }
}

impl TimingModel for TrivialTiming {
    fn block_time(&self, block: &Block) -> Time {
        match block.as_basic() {
            Some(data) => data.instructions.iter().map(|inst| self.cycles_for(inst.kind)).sum(),
            None => 0,
        }
    }

    fn edge_delta(&self, _edge: &EdgeData) -> Time {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{BasicBlockData, BlockKind};
    use crate::loader::Instruction;
    use smallvec::SmallVec;

    fn inst(kind: InstKind) -> Instruction {
        Instruction {
            address: 0,
            size: 4,
            kind,
            branch_target: None,
            reads: SmallVec::new(),
            writes: SmallVec::new(),
            micro_ops: Vec::new(),
        }
    }

    fn block_with(instructions: Vec<Instruction>) -> Block {
        Block {
            id: crate::cfg::BlockId(0),
            kind: BlockKind::Basic(BasicBlockData { address: 0, size: 4, instructions }),
            out_edges: SmallVec::new(),
            in_edges: SmallVec::new(),
            props: crate::prop::PropList::new(),
        }
    }

    #[test]
    fn default_cycles_apply_to_every_instruction_kind() {
        let model = TrivialTiming::with_default(3);
        let block = block_with(vec![inst(InstKind::ALU), inst(InstKind::MEM | InstKind::LOAD)]);
        assert_eq!(model.block_time(&block), 6);
    }

    #[test]
    fn configured_kind_cost_overrides_the_default() {
        let model = TrivialTiming {
            default_cycles: 1,
            table: vec![KindCost { kind: InstKind::LOAD, cycles: 10 }],
        };
        let block = block_with(vec![inst(InstKind::ALU), inst(InstKind::MEM | InstKind::LOAD)]);
        assert_eq!(model.block_time(&block), 11);
    }

    #[test]
    fn from_config_reads_per_kind_and_default_parameters() {
        let config = Config::new()
            .with_param("timing.trivial.default", "2")
            .with_param("timing.trivial.load", "8");
        let model = TrivialTiming::from_config(&config);
        let block = block_with(vec![inst(InstKind::ALU), inst(InstKind::MEM | InstKind::LOAD)]);
        assert_eq!(model.block_time(&block), 10);
    }
}
