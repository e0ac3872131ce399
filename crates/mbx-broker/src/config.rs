use mbx_fs::FsParams;
use serde::{Deserialize, Serialize};

/// Configuration for a [`Broker`](crate::Broker).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Capacity of the box registry.
    pub max_boxes: usize,
    /// Number of dispatcher worker tasks.
    pub worker_count: usize,
    /// Capacity of the session queue; a full queue blocks `submit`.
    pub queue_depth: usize,
    /// Chunk size for streaming between transport and backing files.
    pub chunk_len: usize,
    /// Sizing of the backing volume.
    pub fs: FsParams,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_boxes: 63,
            worker_count: 4,
            queue_depth: 16,
            chunk_len: 1024,
            fs: FsParams::default(),
        }
    }
}
