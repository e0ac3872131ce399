use std::io::Read;
use std::path::Path;

use tracing::{debug, info};

use crate::block::BlockPool;
use crate::directory;
use crate::error::{FsError, FsResult};
use crate::inode::{InodeTable, InodeType, ROOT_INUMBER};
use crate::open_file::{FileHandle, OpenFileTable};
use crate::params::FsParams;

bitflags::bitflags! {
    /// Mode flags for [`FileSystem::open`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpenFlags: u8 {
        /// Create the file if the path does not resolve.
        const CREATE = 1 << 0;
        /// Discard existing content, resetting the size to zero.
        const TRUNCATE = 1 << 1;
        /// Start the cursor at the current end of the file.
        const APPEND = 1 << 2;
    }
}

/// Upper bound on symlink hops during `open`. Past this the chain is
/// treated as a cycle.
pub const MAX_SYMLINK_HOPS: usize = 8;

const COPY_BUFFER_LEN: usize = 128;

enum OpenOutcome {
    Opened(FileHandle),
    FollowLink(String),
}

/// A single-volume, in-memory filesystem: one flat root directory over a
/// fixed inode table, a fixed block pool, and a bounded open-file table.
///
/// Every operation is safe under concurrent use from many threads. All
/// internal locking is via RAII guards, so no code path can leave a lock
/// held.
///
/// The volume lives from construction to drop; there is no other global
/// state.
pub struct FileSystem {
    params: FsParams,
    blocks: BlockPool,
    inodes: InodeTable,
    open_files: OpenFileTable,
}

impl FileSystem {
    /// Initialize a volume and create its root directory (inumber 0).
    pub fn new(params: FsParams) -> FsResult<Self> {
        params.validate()?;

        let blocks = BlockPool::new(params.max_block_count, params.block_size);
        let inodes = InodeTable::new(params.max_inode_count);
        let open_files = OpenFileTable::new(params.max_open_files_count);

        let root = inodes.create(InodeType::Directory, &blocks)?;
        assert_eq!(root, ROOT_INUMBER, "root directory must be inode 0");

        info!(
            max_inode_count = params.max_inode_count,
            max_block_count = params.max_block_count,
            max_open_files_count = params.max_open_files_count,
            block_size = params.block_size,
            "volume initialized"
        );

        Ok(Self {
            params,
            blocks,
            inodes,
            open_files,
        })
    }

    /// The volume's sizing parameters.
    pub fn params(&self) -> &FsParams {
        &self.params
    }

    /// Size of a data block (and so the maximum file size) in bytes.
    pub fn block_size(&self) -> usize {
        self.params.block_size
    }

    /// Open a file, following symlinks, and return a handle whose cursor
    /// starts at 0 (or at the end of the file with [`OpenFlags::APPEND`]).
    ///
    /// With [`OpenFlags::CREATE`] a missing path is created (find-or-create:
    /// two racing creators converge on one inode). Symlinks are re-resolved
    /// with the original flags, so opening a dangling link with `CREATE`
    /// creates its target.
    pub fn open(&self, path: &str, flags: OpenFlags) -> FsResult<FileHandle> {
        let mut current = path.to_string();
        for _ in 0..=MAX_SYMLINK_HOPS {
            match self.open_once(&current, flags)? {
                OpenOutcome::Opened(handle) => return Ok(handle),
                OpenOutcome::FollowLink(target) => current = target,
            }
        }
        Err(FsError::TooManySymlinks {
            path: path.to_string(),
            limit: MAX_SYMLINK_HOPS,
        })
    }

    /// One resolution step of `open`: either a handle, or the target of a
    /// symlink that still needs following.
    fn open_once(&self, path: &str, flags: OpenFlags) -> FsResult<OpenOutcome> {
        let name = split_path(path)?;

        // Fast path: resolve under the root's read guard.
        {
            let root = self.inodes.read(ROOT_INUMBER);
            let root_block = root
                .data_block
                .expect("root directory must have a data block");
            match directory::find(&self.blocks, root_block, name) {
                Ok(inumber) => return self.open_existing(inumber, flags),
                Err(FsError::NotFound(_)) if flags.contains(OpenFlags::CREATE) => {}
                Err(e) => return Err(e),
            }
        }

        // Create path: retry the lookup under the root's write guard, since
        // another thread may have created the name in between.
        let root = self.inodes.write(ROOT_INUMBER);
        let root_block = root
            .data_block
            .expect("root directory must have a data block");
        match directory::find(&self.blocks, root_block, name) {
            Ok(inumber) => self.open_existing(inumber, flags),
            Err(FsError::NotFound(_)) => {
                let inumber = self.inodes.create(InodeType::File, &self.blocks)?;
                if let Err(e) = directory::add(&self.blocks, root_block, name, inumber) {
                    self.inodes.delete(inumber, &self.blocks);
                    return Err(e);
                }
                debug!(path, inumber, "file created");
                // Register before the root guard drops, so a concurrent
                // unlink cannot slip in between resolution and registration.
                let handle = self.open_files.register(inumber, 0)?;
                Ok(OpenOutcome::Opened(handle))
            }
            Err(e) => Err(e),
        }
    }

    /// Open a resolved inode. Caller holds the root guard, which stays
    /// alive until the open-file entry is registered.
    fn open_existing(&self, inumber: usize, flags: OpenFlags) -> FsResult<OpenOutcome> {
        {
            let inode = self.inodes.read(inumber);
            if inode.node_type == InodeType::Symlink {
                let target = inode
                    .symlink_target
                    .clone()
                    .expect("symlink inode must carry a target path");
                return Ok(OpenOutcome::FollowLink(target));
            }
        }

        let offset = if flags.contains(OpenFlags::TRUNCATE) {
            let mut inode = self.inodes.write(inumber);
            if inode.size > 0 {
                let block = inode
                    .data_block
                    .take()
                    .expect("non-empty file must have a data block");
                self.blocks.free(block).expect("file held an invalid block");
                inode.size = 0;
            }
            0
        } else if flags.contains(OpenFlags::APPEND) {
            self.inodes.read(inumber).size
        } else {
            0
        };

        let handle = self.open_files.register(inumber, offset)?;
        Ok(OpenOutcome::Opened(handle))
    }

    /// Close a handle. Fails with `InvalidHandle` if it is not open.
    pub fn close(&self, handle: FileHandle) -> FsResult<()> {
        self.open_files.release(handle)
    }

    /// Read from the handle's cursor into `buf`. Returns the number of
    /// bytes read; 0 means end-of-file, not an error.
    pub fn read(&self, handle: FileHandle, buf: &mut [u8]) -> FsResult<usize> {
        let mut entry = self.open_files.entry(handle)?;
        let inode = self.inodes.read(entry.inumber);

        let available = inode.size.saturating_sub(entry.offset);
        let n = available.min(buf.len());
        if n > 0 {
            let block = inode
                .data_block
                .expect("non-empty file must have a data block");
            self.blocks.read_at(block, entry.offset, &mut buf[..n])?;
            entry.offset += n;
        }
        Ok(n)
    }

    /// Write `data` at the handle's cursor. Returns the number of bytes
    /// written, silently capped so the file never grows past one block.
    ///
    /// A block is allocated lazily on the first write to an empty file.
    pub fn write(&self, handle: FileHandle, data: &[u8]) -> FsResult<usize> {
        let mut entry = self.open_files.entry(handle)?;
        let mut inode = self.inodes.write(entry.inumber);

        let n = data
            .len()
            .min(self.params.block_size.saturating_sub(entry.offset));
        if n > 0 {
            let block = match inode.data_block {
                Some(block) => block,
                None => {
                    let block = self.blocks.allocate()?;
                    inode.data_block = Some(block);
                    block
                }
            };
            self.blocks.write_at(block, entry.offset, &data[..n])?;
            entry.offset += n;
            if entry.offset > inode.size {
                inode.size = entry.offset;
            }
        }
        Ok(n)
    }

    /// Create a hard link `link_path` aliasing `target_path`'s inode.
    ///
    /// Hard links to symlinks are disallowed.
    pub fn link(&self, target_path: &str, link_path: &str) -> FsResult<()> {
        let link_name = split_path(link_path)?;
        let target_name = split_path(target_path)?;

        let root = self.inodes.write(ROOT_INUMBER);
        let root_block = root
            .data_block
            .expect("root directory must have a data block");

        if directory::find(&self.blocks, root_block, link_name).is_ok() {
            return Err(FsError::AlreadyExists(link_path.to_string()));
        }
        let target_inumber = directory::find(&self.blocks, root_block, target_name)?;

        if self.inodes.read(target_inumber).node_type == InodeType::Symlink {
            return Err(FsError::HardLinkToSymlink(target_path.to_string()));
        }

        directory::add(&self.blocks, root_block, link_name, target_inumber)?;
        self.inodes.write(target_inumber).hard_links += 1;
        Ok(())
    }

    /// Create a symbolic link at `link_path` storing `target_path` verbatim.
    ///
    /// The target must resolve now; it is not re-validated afterward, so a
    /// later deletion leaves a dangling link that `open` reports lazily.
    pub fn symlink(&self, target_path: &str, link_path: &str) -> FsResult<()> {
        let link_name = split_path(link_path)?;
        let target_name = split_path(target_path)?;

        let root = self.inodes.write(ROOT_INUMBER);
        let root_block = root
            .data_block
            .expect("root directory must have a data block");

        if directory::find(&self.blocks, root_block, link_name).is_ok() {
            return Err(FsError::AlreadyExists(link_path.to_string()));
        }
        directory::find(&self.blocks, root_block, target_name)?;

        let inumber = self.inodes.create(InodeType::Symlink, &self.blocks)?;
        self.inodes.write(inumber).symlink_target = Some(target_path.to_string());

        if let Err(e) = directory::add(&self.blocks, root_block, link_name, inumber) {
            self.inodes.delete(inumber, &self.blocks);
            return Err(e);
        }
        Ok(())
    }

    /// Remove a directory entry.
    ///
    /// A symlink, or a regular file whose hard-link counter is 1, is fully
    /// deleted (its data block freed); deletion is refused with `FileBusy`
    /// while the file has an open handle. With more than one hard link,
    /// only the counter is decremented.
    pub fn unlink(&self, path: &str) -> FsResult<()> {
        let name = split_path(path)?;

        let root = self.inodes.write(ROOT_INUMBER);
        let root_block = root
            .data_block
            .expect("root directory must have a data block");
        let inumber = directory::find(&self.blocks, root_block, name)?;

        let delete = {
            let inode = self.inodes.read(inumber);
            inode.node_type == InodeType::Symlink || inode.hard_links == 1
        };
        if delete && self.open_files.is_open(inumber) {
            return Err(FsError::FileBusy(path.to_string()));
        }

        directory::clear(&self.blocks, root_block, name)?;
        if delete {
            self.inodes.delete(inumber, &self.blocks);
            debug!(path, inumber, "inode deleted");
        } else {
            self.inodes.write(inumber).hard_links -= 1;
        }
        Ok(())
    }

    /// Copy a file from the host filesystem into the volume at
    /// `dest_path`, creating or truncating it.
    pub fn copy_from_external(
        &self,
        source_path: impl AsRef<Path>,
        dest_path: &str,
    ) -> FsResult<()> {
        let source = std::fs::File::open(source_path)?;
        self.copy_from_reader(source, dest_path)
    }

    /// Copy every byte of `source` into the volume at `dest_path`,
    /// creating or truncating it. Fails with `ShortWrite` if the volume
    /// accepts fewer bytes than the source produced.
    pub fn copy_from_reader(&self, mut source: impl Read, dest_path: &str) -> FsResult<()> {
        let handle = self.open(dest_path, OpenFlags::CREATE | OpenFlags::TRUNCATE)?;
        let result = self.copy_loop(&mut source, handle);
        // The destination handle is closed on every path.
        let closed = self.close(handle);
        result.and(closed)
    }

    fn copy_loop(&self, source: &mut impl Read, handle: FileHandle) -> FsResult<()> {
        let mut buf = [0u8; COPY_BUFFER_LEN];
        loop {
            let read = source.read(&mut buf)?;
            if read == 0 {
                return Ok(());
            }
            let written = self.write(handle, &buf[..read])?;
            if written != read {
                return Err(FsError::ShortWrite {
                    requested: read,
                    written,
                });
            }
        }
    }
}

/// Split a path into its single name component. A valid path is the
/// separator followed by one name of 1..=[`directory::MAX_NAME_LEN`]
/// bytes.
fn split_path(path: &str) -> FsResult<&str> {
    let name = path
        .strip_prefix('/')
        .ok_or_else(|| FsError::InvalidPath(path.to_string()))?;
    if name.is_empty()
        || name.len() > directory::MAX_NAME_LEN
        || name.bytes().any(|b| b == 0 || b == b'/')
    {
        return Err(FsError::InvalidPath(path.to_string()));
    }
    Ok(name)
}
