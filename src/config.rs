//! Engine-wide tunables, constructed with [`Default`] the way `robt::Config`
//! is: a plain struct of `pub` fields rather than a builder, since every
//! field has a sane default and callers typically only override one or two.

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of one `TreeIndex` page before it splits.
    /// Default: [`EngineConfig::PAGE_CAPACITY`]
    pub page_capacity: usize,
    /// How many primary-key tuples an online index build scans before
    /// yielding back to the caller.
    /// Default: [`EngineConfig::YIELD_EVERY`]
    pub yield_every: u32,
    /// `R-tree` node fan-out before a node splits.
    /// Default: [`EngineConfig::RTREE_NODE_CAPACITY`]
    pub rtree_node_capacity: usize,
    /// Emit a `log::warn!` when a single statement's triggers take longer
    /// than this to run. `None` disables the check.
    pub slow_statement_warn_ms: Option<u64>,
}

impl EngineConfig {
    pub const PAGE_CAPACITY: usize = 64;
    pub const YIELD_EVERY: u32 = 1024;
    pub const RTREE_NODE_CAPACITY: usize = 8;
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            page_capacity: EngineConfig::PAGE_CAPACITY,
            yield_every: EngineConfig::YIELD_EVERY,
            rtree_node_capacity: EngineConfig::RTREE_NODE_CAPACITY,
            slow_statement_warn_ms: None,
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
