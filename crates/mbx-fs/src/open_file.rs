use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};

use crate::error::{FsError, FsResult};

/// Token representing one `open` call's read/write cursor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileHandle(pub usize);

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fh:{}", self.0)
    }
}

/// One live entry in the open-file table.
#[derive(Clone, Copy, Debug)]
pub struct OpenFile {
    pub inumber: usize,
    pub offset: usize,
}

/// Exclusive access to one open-file entry, released on drop.
pub struct OpenFileGuard<'a> {
    guard: MutexGuard<'a, Option<OpenFile>>,
}

impl Deref for OpenFileGuard<'_> {
    type Target = OpenFile;

    fn deref(&self) -> &OpenFile {
        self.guard.as_ref().expect("entry vacated while referenced")
    }
}

impl DerefMut for OpenFileGuard<'_> {
    fn deref_mut(&mut self) -> &mut OpenFile {
        self.guard.as_mut().expect("entry vacated while referenced")
    }
}

/// Bounded table of open handles.
///
/// Each entry carries its own exclusive lock, held for the duration of a
/// single read or write call. Allocation state lives in a separate free
/// map; the lock order is always free map before entry.
pub struct OpenFileTable {
    slots: Vec<Mutex<Option<OpenFile>>>,
    alloc: Mutex<Vec<bool>>,
}

impl OpenFileTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
            alloc: Mutex::new(vec![true; capacity]),
        }
    }

    /// Register a new open file and return its handle.
    pub fn register(&self, inumber: usize, offset: usize) -> FsResult<FileHandle> {
        let mut alloc = self.alloc.lock().expect("lock poisoned");
        let index = alloc
            .iter()
            .position(|f| *f)
            .ok_or(FsError::OpenFileTableFull)?;
        alloc[index] = false;
        *self.slots[index].lock().expect("lock poisoned") = Some(OpenFile { inumber, offset });
        Ok(FileHandle(index))
    }

    /// Release a handle. Fails with `InvalidHandle` if it is not currently
    /// open.
    pub fn release(&self, handle: FileHandle) -> FsResult<()> {
        let mut alloc = self.alloc.lock().expect("lock poisoned");
        let slot = self
            .slots
            .get(handle.0)
            .ok_or(FsError::InvalidHandle(handle.0))?;
        if slot.lock().expect("lock poisoned").take().is_none() {
            return Err(FsError::InvalidHandle(handle.0));
        }
        alloc[handle.0] = true;
        Ok(())
    }

    /// Acquire the exclusive lock on an entry and return a guard over it.
    pub fn entry(&self, handle: FileHandle) -> FsResult<OpenFileGuard<'_>> {
        let guard = self
            .slots
            .get(handle.0)
            .ok_or(FsError::InvalidHandle(handle.0))?
            .lock()
            .expect("lock poisoned");
        if guard.is_none() {
            return Err(FsError::InvalidHandle(handle.0));
        }
        Ok(OpenFileGuard { guard })
    }

    /// Whether any live entry refers to `inumber`.
    pub fn is_open(&self, inumber: usize) -> bool {
        self.slots.iter().any(|slot| {
            matches!(
                *slot.lock().expect("lock poisoned"),
                Some(entry) if entry.inumber == inumber
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_entry_release() {
        let table = OpenFileTable::new(2);
        let h = table.register(5, 10).unwrap();

        {
            let entry = table.entry(h).unwrap();
            assert_eq!(entry.inumber, 5);
            assert_eq!(entry.offset, 10);
        }

        table.release(h).unwrap();
        assert!(matches!(table.entry(h), Err(FsError::InvalidHandle(_))));
    }

    #[test]
    fn release_twice_rejected() {
        let table = OpenFileTable::new(2);
        let h = table.register(1, 0).unwrap();
        table.release(h).unwrap();
        assert!(matches!(table.release(h), Err(FsError::InvalidHandle(_))));
    }

    #[test]
    fn unknown_handle_rejected() {
        let table = OpenFileTable::new(2);
        assert!(matches!(
            table.entry(FileHandle(9)),
            Err(FsError::InvalidHandle(9))
        ));
    }

    #[test]
    fn exhaustion_and_reuse() {
        let table = OpenFileTable::new(2);
        let a = table.register(1, 0).unwrap();
        let _b = table.register(2, 0).unwrap();
        assert!(matches!(
            table.register(3, 0),
            Err(FsError::OpenFileTableFull)
        ));

        table.release(a).unwrap();
        let c = table.register(3, 0).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn offset_advances_through_guard() {
        let table = OpenFileTable::new(1);
        let h = table.register(1, 0).unwrap();
        table.entry(h).unwrap().offset += 42;
        assert_eq!(table.entry(h).unwrap().offset, 42);
    }

    #[test]
    fn is_open_tracks_live_entries() {
        let table = OpenFileTable::new(2);
        assert!(!table.is_open(7));

        let h = table.register(7, 0).unwrap();
        assert!(table.is_open(7));

        table.release(h).unwrap();
        assert!(!table.is_open(7));
    }
}
