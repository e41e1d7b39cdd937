use super::*;

#[test]
fn default_matches_the_documented_constants() {
    let cfg = EngineConfig::default();
    assert_eq!(cfg.page_capacity, EngineConfig::PAGE_CAPACITY);
    assert_eq!(cfg.yield_every, EngineConfig::YIELD_EVERY);
    assert_eq!(cfg.rtree_node_capacity, EngineConfig::RTREE_NODE_CAPACITY);
    assert!(cfg.slow_statement_warn_ms.is_none());
}
