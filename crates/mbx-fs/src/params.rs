use serde::{Deserialize, Serialize};

use crate::error::{FsError, FsResult};

/// Sizing parameters for a [`FileSystem`](crate::FileSystem) volume.
///
/// All four values are fixed for the lifetime of the volume and must be
/// positive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsParams {
    /// Capacity of the inode table (the root directory occupies one slot).
    pub max_inode_count: usize,
    /// Capacity of the data block pool.
    pub max_block_count: usize,
    /// Capacity of the open-file table.
    pub max_open_files_count: usize,
    /// Size of every data block in bytes. A file occupies at most one block.
    pub block_size: usize,
}

impl Default for FsParams {
    fn default() -> Self {
        Self {
            max_inode_count: 64,
            max_block_count: 1024,
            max_open_files_count: 16,
            block_size: 1024,
        }
    }
}

impl FsParams {
    /// Check that every parameter is positive.
    pub fn validate(&self) -> FsResult<()> {
        if self.max_inode_count == 0
            || self.max_block_count == 0
            || self.max_open_files_count == 0
            || self.block_size == 0
        {
            return Err(FsError::InvalidParams(
                "all volume parameters must be positive".into(),
            ));
        }
        Ok(())
    }
}
