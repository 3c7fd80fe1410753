//! ELF loader adapter
//!
//! Concrete [`Loader`](super::Loader) implementation backed by `goblin`. This
//! is the one runnable binary-format adapter the core ships with; real
//! instruction decoding (opcode -> semantics) is architecture-specific and is
//! delegated to a pluggable [`Decoder`], since the core treats decoding as a
//! loader responsibility (§6).

use super::{Instruction, Loader, Segment};
use crate::error::{Result, WcetError};
use goblin::elf::Elf;
use smallvec::SmallVec;
use std::collections::HashMap;

/// Architecture-specific instruction decoder, plugged into [`ElfLoader`].
/// Kept separate from the ELF container parsing so the loader stays
/// architecture-agnostic.
pub trait Decoder: std::fmt::Debug {
    fn decode(&self, bytes: &[u8], address: u32) -> Result<Instruction>;
    fn instruction_alignment(&self) -> u32;
}

/// A trivial decoder used when no architecture-specific decoder is
/// available: every instruction is treated as fixed-size, non-branching
/// `ALU`, which is always a safe (if pessimistic) default for WCET purposes
/// since no cache/control-flow structure is assumed.
#[derive(Debug, Clone, Copy)]
pub struct OpaqueDecoder {
    pub instruction_size: u32,
}

impl Decoder for OpaqueDecoder {
    fn decode(&self, _bytes: &[u8], address: u32) -> Result<Instruction> {
        Ok(Instruction {
            address,
            size: self.instruction_size,
            kind: super::InstKind::ALU,
            branch_target: None,
            reads: SmallVec::new(),
            writes: SmallVec::new(),
            micro_ops: Vec::new(),
        })
    }

    fn instruction_alignment(&self) -> u32 {
        self.instruction_size
    }
}

/// Loader backed by an in-memory ELF image.
pub struct ElfLoader<D: Decoder> {
    segments: Vec<Segment>,
    symbols: HashMap<String, u32>,
    sections: Vec<(u32, u32, Vec<u8>)>, // (start, end, bytes) of loadable sections
    entry: u32,
    decoder: D,
}

impl<D: Decoder> ElfLoader<D> {
    /// Parse an ELF image already read into memory.
    pub fn parse(bytes: &[u8], decoder: D) -> Result<Self> {
        let elf = Elf::parse(bytes)
            .map_err(|e| WcetError::input("elf", format!("failed to parse ELF: {e}")))?;

        let mut segments = Vec::new();
        let mut sections = Vec::new();
        for phdr in &elf.program_headers {
            if phdr.p_type != goblin::elf::program_header::PT_LOAD {
                continue;
            }
            let start = phdr.p_vaddr as u32;
            let end = start.wrapping_add(phdr.p_memsz as u32);
            segments.push(Segment {
                start,
                end,
                readable: phdr.is_read(),
                writable: phdr.is_write(),
                executable: phdr.is_executable(),
                initialised: phdr.p_filesz > 0,
            });
            if phdr.is_executable() {
                let file_start = phdr.p_offset as usize;
                let file_end = file_start + phdr.p_filesz as usize;
                if let Some(slice) = bytes.get(file_start..file_end) {
                    sections.push((start, start.wrapping_add(phdr.p_filesz as u32), slice.to_vec()));
                }
            }
        }

        let mut symbols = HashMap::new();
        for sym in &elf.syms {
            if sym.st_value == 0 {
                continue;
            }
            if let Some(name) = elf.strtab.get_at(sym.st_name) {
                if !name.is_empty() {
                    symbols.insert(name.to_string(), sym.st_value as u32);
                }
            }
        }

        Ok(ElfLoader {
            segments,
            symbols,
            sections,
            entry: elf.entry as u32,
            decoder,
        })
    }

    fn bytes_at(&self, address: u32, size: u32) -> Option<&[u8]> {
        for (start, end, data) in &self.sections {
            if address >= *start && address.wrapping_add(size) <= *end {
                let offset = (address - start) as usize;
                return data.get(offset..offset + size as usize);
            }
        }
        None
    }
}

impl<D: Decoder> Loader for ElfLoader<D> {
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
        if self.segment_containing(address).is_none() {
            return Err(WcetError::analysis(address, "address not in any executable segment"));
        }
        let align = self.decoder.instruction_alignment().max(1);
        let bytes = self
            .bytes_at(address, align)
            .ok_or_else(|| WcetError::analysis(address, "no instruction bytes at address"))?;
        self.decoder.decode(bytes, address)
    }

    fn entry(&self) -> u32 {
        self.entry
    }

    fn stack_pointer_init(&self) -> u32 {
        self.segments
            .iter()
            .filter(|s| s.writable)
            .map(|s| s.end)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_decoder_produces_fixed_size_alu() {
        let decoder = OpaqueDecoder { instruction_size: 4 };
        let inst = decoder.decode(&[0, 0, 0, 0], 0x1000).unwrap();
        assert_eq!(inst.size, 4);
        assert_eq!(inst.kind, super::super::InstKind::ALU);
    }
}
