//! Configuration
//!
//! Processor configuration and CLI script parameters (`-p KEY=VALUE`) share
//! the same property-list substrate used everywhere else in the core, rather
//! than a bespoke configuration struct: analyses read their tunables through
//! [`Identifier`]s declared alongside the processor that consumes them.

use crate::prop::PropList;

/// A property list scoped to configuration, plus raw `key=value` script
/// parameters forwarded verbatim from the CLI (`-p KEY=VALUE` in the
/// external CLI surface).
#[derive(Debug, Default)]
pub struct Config {
    pub props: PropList,
    params: Vec<(String, String)>,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
