//! The engine context: the space cache and the recovery state, encapsulated
//! in one struct passed by reference rather than kept as mutable globals —
//! so a test can spin up an isolated engine per case.

use crate::config::EngineConfig;
use crate::space::cache::SpaceCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    InitialRecovery,
    FinalRecovery,
    Normal,
}

pub struct EngineContext {
    cache: SpaceCache,
    recovery_state: RecoveryState,
    config: EngineConfig,
}

impl EngineContext {
    pub fn new() -> EngineContext {
        EngineContext {
            cache: SpaceCache::new(),
            recovery_state: RecoveryState::Normal,
            config: EngineConfig::default(),
        }
    }

    pub fn with_recovery_state(recovery_state: RecoveryState) -> EngineContext {
        EngineContext {
            cache: SpaceCache::new(),
            recovery_state,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(config: EngineConfig) -> EngineContext {
        EngineContext {
            cache: SpaceCache::new(),
            recovery_state: RecoveryState::Normal,
            config,
        }
    }

    pub fn cache(&self) -> &SpaceCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut SpaceCache {
        &mut self.cache
    }

    pub fn recovery_state(&self) -> RecoveryState {
        self.recovery_state
    }

    pub fn set_recovery_state(&mut self, state: RecoveryState) {
        self.recovery_state = state;
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Default for EngineContext {
    fn default() -> EngineContext {
        EngineContext::new()
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;
