/// Errors from filesystem engine operations.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// The path is malformed (missing separator, empty, or over-length name).
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// A directory-entry name is empty, over-length, or contains a
    /// forbidden byte.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// The volume was configured with a non-positive parameter.
    #[error("invalid volume parameters: {0}")]
    InvalidParams(String),

    /// No free slot in the inode table.
    #[error("inode table full")]
    InodeTableFull,

    /// No free block in the data block pool.
    #[error("block pool exhausted")]
    BlockPoolFull,

    /// No free slot in the open-file table.
    #[error("open file table full")]
    OpenFileTableFull,

    /// No free entry slot in the root directory.
    #[error("root directory full")]
    DirectoryFull,

    /// Lookup miss, including a dangling symlink target.
    #[error("not found: {0}")]
    NotFound(String),

    /// A directory entry with this name already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Hard links may only alias regular files.
    #[error("cannot hard-link to a symlink: {0}")]
    HardLinkToSymlink(String),

    /// Symlink resolution exceeded the hop limit (cycle or over-deep chain).
    #[error("too many symlink hops resolving {path:?} (limit {limit})")]
    TooManySymlinks { path: String, limit: usize },

    /// Unlink would delete a file that still has an open handle.
    #[error("file is open: {0}")]
    FileBusy(String),

    /// The handle is closed or was never opened.
    #[error("invalid file handle: {0}")]
    InvalidHandle(usize),

    /// The block index is out of range or the block is not allocated.
    #[error("invalid block index: {0}")]
    InvalidBlock(usize),

    /// The engine accepted fewer bytes than an external copy required.
    #[error("short write: requested {requested}, wrote {written}")]
    ShortWrite { requested: usize, written: usize },

    /// I/O error from an external byte source during copy-in.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for engine operations.
pub type FsResult<T> = Result<T, FsError>;
