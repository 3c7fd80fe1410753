//! Worst-case execution time analysis core
//!
//! A property-driven pipeline over a loader-supplied instruction stream:
//! CFG recovery, structural analyses (dominance, loop info), CFG
//! transformers (virtualisation, delayed-branch normalisation, irregular-
//! loop reduction), a generic abstract-interpretation engine, cache
//! categorisation (Must/May/Persistence), per-block/edge timing, and IPET
//! construction against a pluggable ILP solver.

pub mod ai;
pub mod analysis;
pub mod cache;
pub mod cfg;
pub mod config;
pub mod error;
pub mod flowfacts;
pub mod ipet;
pub mod loader;
pub mod prop;
pub mod scheduler;
pub mod timing;
pub mod workspace;

pub use error::{Result, WcetError};
