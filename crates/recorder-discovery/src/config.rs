//! Discovery settings.

use recorder_core::constants::RECORDER_CACHE_SIZE;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Only accept FAT-formatted mounts.
    pub strict: bool,

    /// Registry entries kept before dead ones are swept. Live recorders
    /// are never dropped from the registry.
    pub cache_size: usize,

    /// Re-point cached recorders at the path they were found on.
    pub update_paths: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            strict: true,
            cache_size: RECORDER_CACHE_SIZE,
            update_paths: false,
        }
    }
}

impl DiscoveryConfig {
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    #[must_use]
    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    #[must_use]
    pub fn with_update_paths(mut self, update: bool) -> Self {
        self.update_paths = update;
        self
    }
}
