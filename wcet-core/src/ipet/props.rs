//! IPET property identifiers
//!
//! Translates `ipet_IPET.cpp`'s `TIME`/`VAR`/`WCET`/`EXPLICIT`/`TIME_DELTA`/
//! `COUNT`/`RECURSIVE` identifiers into [`Identifier`] constants, keeping
//! the original property names (as doc comments) so a reader familiar with
//! the source can still find them.

use super::ilp::Var;
use crate::prop::Identifier;

/// `otawa::ipet::TIME` - execution time of a program part, in cycles.
pub static TIME: Identifier<i64> = Identifier::new("wcet.ipet.time", -1);

/// `otawa::ipet::TIME_DELTA` - time fix for an edge traversal, in cycles.
pub static TIME_DELTA: Identifier<i64> = Identifier::new("wcet.ipet.time_delta", 0);

/// `otawa::ipet::VAR` - the ILP variable assigned to a block or edge.
pub static VAR: Identifier<Var> = Identifier::new("wcet.ipet.var", Var(u32::MAX));

/// `otawa::ipet::COUNT` - execution count of a block or edge on the WCET path.
pub static COUNT: Identifier<i64> = Identifier::new("wcet.ipet.count", -1);

/// `otawa::ipet::WCET` - the computed WCET of a root CFG, in cycles.
pub static WCET: Identifier<i64> = Identifier::new("wcet.ipet.wcet", -1);

/// `otawa::ipet::EXPLICIT` - generate explicit (debuggable) variable names.
pub static EXPLICIT: Identifier<bool> = Identifier::new("wcet.ipet.explicit", false);

/// `otawa::ipet::RECURSIVE` - whether IPET construction should recurse into
/// un-virtualised callees rather than require a flattened collection.
pub static RECURSIVE: Identifier<bool> = Identifier::new("wcet.ipet.recursive", false);
