use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::block::BlockPool;
use crate::error::{FsError, FsResult};

/// Inumber of the root directory, created once at volume initialization and
/// never deleted.
pub const ROOT_INUMBER: usize = 0;

/// Kind of object an inode describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InodeType {
    File,
    Directory,
    Symlink,
}

/// Metadata record for one file, directory, or symlink.
///
/// Invariants: a `File` or `Directory` has `data_block == None` iff
/// `size == 0` (directories are allocated their block at creation);
/// `symlink_target` is present iff the type is `Symlink`; the inode is
/// reachable only while `hard_links >= 1` (symlinks are deleted outright
/// regardless of the counter).
#[derive(Debug)]
pub struct Inode {
    pub node_type: InodeType,
    pub size: usize,
    pub data_block: Option<usize>,
    pub hard_links: u32,
    pub symlink_target: Option<String>,
}

/// Shared read access to one inode, released on drop.
pub struct InodeReadGuard<'a> {
    guard: RwLockReadGuard<'a, Option<Inode>>,
}

impl Deref for InodeReadGuard<'_> {
    type Target = Inode;

    fn deref(&self) -> &Inode {
        self.guard
            .as_ref()
            .expect("inode slot vacated while referenced")
    }
}

/// Exclusive access to one inode, released on drop.
pub struct InodeWriteGuard<'a> {
    guard: RwLockWriteGuard<'a, Option<Inode>>,
}

impl Deref for InodeWriteGuard<'_> {
    type Target = Inode;

    fn deref(&self) -> &Inode {
        self.guard
            .as_ref()
            .expect("inode slot vacated while referenced")
    }
}

impl DerefMut for InodeWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Inode {
        self.guard
            .as_mut()
            .expect("inode slot vacated while referenced")
    }
}

/// Fixed arena of inode slots.
///
/// Each slot carries its own reader/writer lock; allocation state lives in
/// a separate free map behind its own mutex. Accessors hand out RAII
/// guards, so a lock taken by [`read`](InodeTable::read) or
/// [`write`](InodeTable::write) is released exactly once on every exit
/// path.
pub struct InodeTable {
    slots: Vec<RwLock<Option<Inode>>>,
    alloc: Mutex<Vec<bool>>,
}

impl InodeTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| RwLock::new(None)).collect(),
            alloc: Mutex::new(vec![true; capacity]),
        }
    }

    /// Allocate and initialize a new inode, returning its inumber.
    ///
    /// Directories are given a freshly allocated (zeroed) data block sized
    /// to hold the full directory-entry array; files and symlinks start
    /// empty.
    pub fn create(&self, node_type: InodeType, blocks: &BlockPool) -> FsResult<usize> {
        let inumber = {
            let mut alloc = self.alloc.lock().expect("lock poisoned");
            let inumber = alloc
                .iter()
                .position(|f| *f)
                .ok_or(FsError::InodeTableFull)?;
            alloc[inumber] = false;
            inumber
        };

        let inode = match node_type {
            InodeType::Directory => {
                let block = match blocks.allocate() {
                    Ok(block) => block,
                    Err(e) => {
                        // Roll the slot reservation back before reporting.
                        self.alloc.lock().expect("lock poisoned")[inumber] = true;
                        return Err(e);
                    }
                };
                Inode {
                    node_type,
                    size: blocks.block_size(),
                    data_block: Some(block),
                    hard_links: 1,
                    symlink_target: None,
                }
            }
            InodeType::File | InodeType::Symlink => Inode {
                node_type,
                size: 0,
                data_block: None,
                hard_links: 1,
                symlink_target: None,
            },
        };

        *self.slots[inumber].write().expect("lock poisoned") = Some(inode);
        Ok(inumber)
    }

    /// Acquire shared access to an inode.
    pub fn read(&self, inumber: usize) -> InodeReadGuard<'_> {
        InodeReadGuard {
            guard: self
                .slots
                .get(inumber)
                .expect("inumber out of range")
                .read()
                .expect("lock poisoned"),
        }
    }

    /// Acquire exclusive access to an inode.
    pub fn write(&self, inumber: usize) -> InodeWriteGuard<'_> {
        InodeWriteGuard {
            guard: self
                .slots
                .get(inumber)
                .expect("inumber out of range")
                .write()
                .expect("lock poisoned"),
        }
    }

    /// Delete an inode: free its data block (if any), drop its symlink
    /// target (if any), and vacate the slot.
    ///
    /// The caller must hold no guard on this inode.
    pub fn delete(&self, inumber: usize, blocks: &BlockPool) {
        let inode = self
            .slots
            .get(inumber)
            .expect("inumber out of range")
            .write()
            .expect("lock poisoned")
            .take()
            .expect("inode deleted twice");

        if let Some(block) = inode.data_block {
            blocks.free(block).expect("inode held an invalid block");
        }

        self.alloc.lock().expect("lock poisoned")[inumber] = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> BlockPool {
        BlockPool::new(4, 64)
    }

    #[test]
    fn create_file_starts_empty() {
        let blocks = pool();
        let table = InodeTable::new(4);
        let inum = table.create(InodeType::File, &blocks).unwrap();

        let inode = table.read(inum);
        assert_eq!(inode.node_type, InodeType::File);
        assert_eq!(inode.size, 0);
        assert_eq!(inode.data_block, None);
        assert_eq!(inode.hard_links, 1);
    }

    #[test]
    fn create_directory_allocates_block() {
        let blocks = pool();
        let table = InodeTable::new(4);
        let inum = table.create(InodeType::Directory, &blocks).unwrap();

        let inode = table.read(inum);
        assert_eq!(inode.node_type, InodeType::Directory);
        assert_eq!(inode.size, blocks.block_size());
        assert!(inode.data_block.is_some());
        assert_eq!(blocks.free_count(), 3);
    }

    #[test]
    fn exhaustion() {
        let blocks = pool();
        let table = InodeTable::new(2);
        table.create(InodeType::File, &blocks).unwrap();
        table.create(InodeType::File, &blocks).unwrap();
        assert!(matches!(
            table.create(InodeType::File, &blocks),
            Err(FsError::InodeTableFull)
        ));
    }

    #[test]
    fn directory_create_rolls_back_on_block_exhaustion() {
        let blocks = BlockPool::new(1, 64);
        let table = InodeTable::new(4);
        table.create(InodeType::Directory, &blocks).unwrap();

        // Second directory cannot get a block; its inode slot must be
        // released again.
        assert!(matches!(
            table.create(InodeType::Directory, &blocks),
            Err(FsError::BlockPoolFull)
        ));
        let inum = table.create(InodeType::File, &blocks).unwrap();
        assert_eq!(inum, 1);
    }

    #[test]
    fn delete_frees_block_and_slot() {
        let blocks = pool();
        let table = InodeTable::new(2);
        let inum = table.create(InodeType::Directory, &blocks).unwrap();
        assert_eq!(blocks.free_count(), 3);

        table.delete(inum, &blocks);
        assert_eq!(blocks.free_count(), 4);

        // Slot is reusable.
        assert_eq!(table.create(InodeType::File, &blocks).unwrap(), inum);
    }

    #[test]
    fn write_guard_mutates() {
        let blocks = pool();
        let table = InodeTable::new(2);
        let inum = table.create(InodeType::File, &blocks).unwrap();

        table.write(inum).hard_links += 1;
        assert_eq!(table.read(inum).hard_links, 2);
    }
}
