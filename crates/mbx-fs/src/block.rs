use std::sync::{Mutex, RwLock};

use crate::error::{FsError, FsResult};

/// Fixed pool of equally sized data blocks.
///
/// Allocation state lives in a single free map behind its own mutex,
/// distinct from any inode lock. Block contents sit behind per-block
/// reader/writer locks, so reads and writes to different blocks never
/// serialize against each other. Freed indices are immediately reusable;
/// there is no compaction.
pub struct BlockPool {
    blocks: Vec<RwLock<Vec<u8>>>,
    free: Mutex<Vec<bool>>,
    block_size: usize,
}

impl BlockPool {
    /// Create a pool of `block_count` zero-filled blocks of `block_size`
    /// bytes each.
    pub fn new(block_count: usize, block_size: usize) -> Self {
        Self {
            blocks: (0..block_count)
                .map(|_| RwLock::new(vec![0u8; block_size]))
                .collect(),
            free: Mutex::new(vec![true; block_count]),
            block_size,
        }
    }

    /// Size of every block in the pool, in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of currently free blocks.
    pub fn free_count(&self) -> usize {
        self.free
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|f| **f)
            .count()
    }

    /// Allocate a block and return its index. The block is handed out
    /// zero-filled.
    pub fn allocate(&self) -> FsResult<usize> {
        let mut free = self.free.lock().expect("lock poisoned");
        let index = free
            .iter()
            .position(|f| *f)
            .ok_or(FsError::BlockPoolFull)?;
        free[index] = false;
        drop(free);

        self.blocks[index]
            .write()
            .expect("lock poisoned")
            .fill(0);
        Ok(index)
    }

    /// Return a block to the pool.
    pub fn free(&self, index: usize) -> FsResult<()> {
        let mut free = self.free.lock().expect("lock poisoned");
        match free.get_mut(index) {
            Some(slot) if !*slot => {
                *slot = true;
                Ok(())
            }
            _ => Err(FsError::InvalidBlock(index)),
        }
    }

    /// Copy bytes out of a block starting at `offset`. Returns the number
    /// of bytes copied, capped at the end of the block.
    pub fn read_at(&self, index: usize, offset: usize, buf: &mut [u8]) -> FsResult<usize> {
        let block = self
            .blocks
            .get(index)
            .ok_or(FsError::InvalidBlock(index))?
            .read()
            .expect("lock poisoned");
        let end = self.block_size.min(offset.saturating_add(buf.len()));
        if offset >= end {
            return Ok(0);
        }
        let n = end - offset;
        buf[..n].copy_from_slice(&block[offset..end]);
        Ok(n)
    }

    /// Copy bytes into a block starting at `offset`. Returns the number of
    /// bytes copied, capped at the end of the block.
    pub fn write_at(&self, index: usize, offset: usize, data: &[u8]) -> FsResult<usize> {
        let mut block = self
            .blocks
            .get(index)
            .ok_or(FsError::InvalidBlock(index))?
            .write()
            .expect("lock poisoned");
        let end = self.block_size.min(offset.saturating_add(data.len()));
        if offset >= end {
            return Ok(0);
        }
        let n = end - offset;
        block[offset..end].copy_from_slice(&data[..n]);
        Ok(n)
    }
}
