use serde::{Deserialize, Serialize};

use capsule_types::{FileType, ReturnWidth};

/// Configuration for a [`CapsuleStore`](crate::CapsuleStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Type tag identifying the capsule container in the archive.
    pub container_file_type: FileType,
    /// Result width used by [`invoke`](crate::CapsuleStore::invoke).
    pub default_return_width: ReturnWidth,
    /// Instruction budget for the simulated executor.
    pub sim_step_limit: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            container_file_type: FileType::CAPSULE_BUFFER,
            default_return_width: ReturnWidth::Byte,
            sim_step_limit: 10_000,
        }
    }
}
