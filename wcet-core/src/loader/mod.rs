//! Loader interface
//!
//! Binary parsing (ELF, symbol tables, debug lines) is an external collaborator:
//! this module specifies only the interface the core consumes, plus one
//! concrete, runnable adapter ([`elf::ElfLoader`]) so the crate is usable
//! end to end without a separate loader plugin.

pub mod elf;

use crate::error::Result;
use smallvec::SmallVec;
use std::collections::HashMap;

/// Bitset over the instruction kinds a decoded instruction may belong to.
/// Instructions commonly carry more than one kind (e.g. a conditional branch
/// is both `CONTROL` and `COND`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstKind(u16);

impl InstKind {
    pub const ALU: InstKind = InstKind(1 << 0);
    pub const MEM: InstKind = InstKind(1 << 1);
    pub const LOAD: InstKind = InstKind(1 << 2);
    pub const STORE: InstKind = InstKind(1 << 3);
    pub const CONTROL: InstKind = InstKind(1 << 4);
    pub const CALL: InstKind = InstKind(1 << 5);
    pub const RETURN: InstKind = InstKind(1 << 6);
    pub const COND: InstKind = InstKind(1 << 7);
    pub const TRAP: InstKind = InstKind(1 << 8);
    pub const INTERN: InstKind = InstKind(1 << 9);
    pub const FLOAT: InstKind = InstKind(1 << 10);
    pub const MUL: InstKind = InstKind(1 << 11);
    pub const DIV: InstKind = InstKind(1 << 12);
    pub const SHIFT: InstKind = InstKind(1 << 13);
    pub const MULTI: InstKind = InstKind(1 << 14);
    pub const SPECIAL: InstKind = InstKind(1 << 15);

    pub const fn empty() -> Self {
        InstKind(0)
    }

    pub const fn contains(self, other: InstKind) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: InstKind) -> InstKind {
        InstKind(self.0 | other.0)
    }
}

impl std::ops::BitOr for InstKind {
    type Output = InstKind;
    fn bitor(self, rhs: InstKind) -> InstKind {
        self.union(rhs)
    }
}

/// A semantic micro-operation, as a RISC-like decomposition of an
/// instruction's effect. Optional: loaders that cannot provide semantics
/// leave an instruction's micro-op list empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MicroOp {
    Load { dst: u8, base: u8, offset: i32 },
    Store { src: u8, base: u8, offset: i32 },
    Set { dst: u8, value: i64 },
    Add { dst: u8, lhs: u8, rhs: u8 },
    Cmp { lhs: u8, rhs: u8 },
    Branch { target: Option<u32> },
}

/// A decoded machine instruction, as supplied by a loader plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub address: u32,
    pub size: u32,
    pub kind: InstKind,
    /// Static branch target, if known at decode time. `None` for computed
    /// branches (register-indirect, PC-relative-through-table, ...).
    pub branch_target: Option<u32>,
    pub reads: SmallVec<[u8; 4]>,
    pub writes: SmallVec<[u8; 4]>,
    pub micro_ops: Vec<MicroOp>,
}

impl Instruction {
    pub fn is_control(&self) -> bool {
        self.kind.contains(InstKind::CONTROL)
    }

    pub fn is_call(&self) -> bool {
        self.kind.contains(InstKind::CALL)
    }

    pub fn is_return(&self) -> bool {
        self.kind.contains(InstKind::RETURN)
    }

    pub fn is_conditional(&self) -> bool {
        self.kind.contains(InstKind::COND)
    }

    pub fn end_address(&self) -> u32 {
        self.address.wrapping_add(self.size)
    }
}

/// A contiguous memory segment of the loaded binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: u32,
    pub end: u32,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    pub initialised: bool,
}

impl Segment {
    pub fn contains(&self, address: u32) -> bool {
        address >= self.start && address < self.end
    }
}

/// The loader-supplied view of a binary: segments, symbols, and a decoder.
///
/// This is the sole interface boundary to binary-format parsing; the core
/// never inspects file bytes directly.
pub trait Loader {
    fn segments(&self) -> &[Segment];
    fn symbol(&self, name: &str) -> Option<u32>;
    fn symbol_at(&self, address: u32) -> Option<&str>;
    fn decode(&self, address: u32) -> Result<Instruction>;
    fn entry(&self) -> u32;
    fn stack_pointer_init(&self) -> u32;

    fn segment_containing(&self, address: u32) -> Option<&Segment> {
        self.segments().iter().find(|s| s.contains(address))
    }
}

/// In-memory loader backed by a plain address -> instruction map, used in
/// tests and by callers that already have a decoded instruction stream
/// (e.g. the seed scenarios of the testable-properties section) and do not
/// need to go through a real binary parser.
#[derive(Debug, Default)]
pub struct SyntheticLoader {
    instructions: HashMap<u32, Instruction>,
    symbols: HashMap<String, u32>,
    segments: Vec<Segment>,
    entry: u32,
    sp_init: u32,
}

impl SyntheticLoader {
    pub fn new(entry: u32) -> Self {
        SyntheticLoader {
            entry,
            segments: vec![Segment {
                start: 0,
                end: u32::MAX,
                readable: true,
                writable: false,
                executable: true,
                initialised: true,
            }],
            ..Default::default()
        }
    }

    pub fn with_instruction(mut self, inst: Instruction) -> Self {
        self.instructions.insert(inst.address, inst);
        self
    }

    pub fn with_symbol(mut self, name: impl Into<String>, address: u32) -> Self {
        self.symbols.insert(name.into(), address);
        self
    }
}

impl Loader for SyntheticLoader {
    fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn symbol(&self, name: &str) -> Option<u32> {
        self.symbols.get(name).copied()
    }

    fn symbol_at(&self, address: u32) -> Option<&str> {
        self.symbols
            .iter()
            .find(|(_, &a)| a == address)
            .map(|(n, _)| n.as_str())
    }

    fn decode(&self, address: u32) -> Result<Instruction> {
        self.instructions.get(&address).cloned().ok_or_else(|| {
            crate::error::WcetError::analysis(address, "no instruction at address")
        })
    }

    fn entry(&self) -> u32 {
        self.entry
    }

    fn stack_pointer_init(&self) -> u32 {
        self.sp_init
    }
}
