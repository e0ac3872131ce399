//! Concurrent, in-memory, single-volume filesystem engine for MBX.
//!
//! The volume is a fixed arena: an inode table, a pool of equally sized
//! data blocks, one flat root directory, and a bounded open-file table.
//! Regular files occupy at most one block; hard links and symbolic links
//! are supported. Every operation is safe under simultaneous access from
//! many threads.
//!
//! # Layers
//!
//! - [`BlockPool`] -- fixed pool of data blocks with a free map
//! - [`InodeTable`] -- inode arena with per-slot reader/writer locks
//! - [`directory`] -- entry records inside the root's single data block
//! - [`OpenFileTable`] -- bounded table of open handles
//! - [`FileSystem`] -- the public facade composing the layers above
//!
//! # Design Rules
//!
//! 1. Resources are identified by index handles (inumbers, block indices,
//!    file handles), never by long-lived pointers.
//! 2. All locking is scoped RAII guards; no code path can leave a lock
//!    held.
//! 3. Allocation maps have their own locks, distinct from per-resource
//!    locks.
//! 4. Operations return `Result`; a violated internal invariant aborts
//!    rather than continuing on corrupt state.
//! 5. The volume lives from `FileSystem::new` to drop; there is no
//!    ambient/static state.

pub mod block;
pub mod directory;
pub mod error;
pub mod fs;
pub mod inode;
pub mod open_file;
pub mod params;

// Re-export primary types at crate root for ergonomic imports.
pub use block::BlockPool;
pub use error::{FsError, FsResult};
pub use fs::{FileSystem, OpenFlags, MAX_SYMLINK_HOPS};
pub use inode::{Inode, InodeTable, InodeType, ROOT_INUMBER};
pub use open_file::{FileHandle, OpenFile, OpenFileTable};
pub use params::FsParams;
