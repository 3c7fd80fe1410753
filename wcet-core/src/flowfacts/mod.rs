//! Flow facts
//!
//! User- or tool-provided assertions about program execution: loop bounds,
//! infeasible paths, branch targets. Consumed by the CFG collector (branch
//! resolution, `NO_CALL`), and by IPET construction (loop bound and
//! infeasible-path constraints).

pub mod f4;

use std::collections::{HashMap, HashSet};

/// Which loop iterations an infeasible-path pair is qualified by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterQualifier {
    FirstIt,
    LastIt,
    AllIt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfeasiblePath {
    pub a: u32,
    pub b: u32,
    pub qualifier: IterQualifier,
}

/// All flow facts collected from one or more fact files, merged into a
/// single set keyed by address or label as the F4 format dictates.
#[derive(Debug, Clone, Default)]
pub struct FlowFacts {
    /// Loop header address -> maximum iteration count.
    pub loop_bounds: HashMap<u32, u64>,
    /// Checksummed file -> expected CRC, for binary-identity verification.
    pub checksums: HashMap<String, u32>,
    /// Functions (by symbol) that must not be entered.
    pub no_call: HashSet<String>,
    /// Functions (by symbol) known to never return.
    pub no_return: HashSet<String>,
    /// Computed-branch address -> statically asserted possible targets.
    pub branch_targets: HashMap<u32, Vec<u32>>,
    /// Addresses that should be treated as a function return.
    pub returns: HashSet<u32>,
    /// Addresses whose control effect should be ignored (treated as
    /// fall-through only).
    pub ignore_control: HashSet<u32>,
    /// Addresses known to be multi-way computed branches (e.g. jump tables).
    pub multibranch: HashSet<u32>,
    pub infeasible_paths: Vec<InfeasiblePath>,
}

impl FlowFacts {
    pub fn new() -> Self {
        FlowFacts::default()
    }

    pub fn merge(&mut self, other: FlowFacts) {
        self.loop_bounds.extend(other.loop_bounds);
        self.checksums.extend(other.checksums);
        self.no_call.extend(other.no_call);
        self.no_return.extend(other.no_return);
        self.branch_targets.extend(other.branch_targets);
        self.returns.extend(other.returns);
        self.ignore_control.extend(other.ignore_control);
        self.multibranch.extend(other.multibranch);
        self.infeasible_paths.extend(other.infeasible_paths);
    }
}
