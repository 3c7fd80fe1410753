//! Error Handling
//!
//! This module provides the error types surfaced by the analysis core, following
//! the error-kind taxonomy of the design: configuration, input, analysis failure,
//! and invariant violation. All variants are zero-cost (no heap allocation beyond
//! the message string) and propagate through a single channel - no pass attempts
//! partial recovery.

use thiserror::Error;

/// Core analysis error types.
///
/// Every fatal condition in the pipeline surfaces through one of these variants.
/// Diagnostics (log output) are orthogonal and never swallow an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WcetError {
    /// Missing required property, type mismatch in config, unknown identifier,
    /// or a cyclic feature dependency in the processor scheduler.
    #[error("configuration error in {processor}: {message}")]
    Configuration { processor: String, message: String },

    /// Unsupported binary format, missing entry symbol, flow-fact syntax error,
    /// or flow-fact checksum mismatch.
    #[error("input error ({location}): {message}")]
    Input { location: String, message: String },

    /// Infeasible or unbounded ILP, unresolved computed branch reaching
    /// `Unknown` on a required path, or unsupported cache geometry.
    #[error("analysis failure at 0x{address:08X}: {message}")]
    Analysis { address: u32, message: String },

    /// Internal invariant violation (broken CFG reachability, identifier
    /// mismatch, dominance inconsistency). Should never occur outside a bug.
    #[error("invariant violation: {message}")]
    Invariant { message: String },
}

impl WcetError {
    pub fn configuration(processor: impl Into<String>, message: impl Into<String>) -> Self {
        WcetError::Configuration {
            processor: processor.into(),
            message: message.into(),
        }
    }

    pub fn input(location: impl Into<String>, message: impl Into<String>) -> Self {
        WcetError::Input {
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn analysis(address: u32, message: impl Into<String>) -> Self {
        WcetError::Analysis {
            address,
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        WcetError::Invariant {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WcetError>;
