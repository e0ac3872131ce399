//! Operations over the single root directory's data block.
//!
//! The namespace is flat: only the root directory ever exists, and its
//! entries live as fixed-size records inside its one data block. Every
//! function here assumes the caller already holds the root inode's guard
//! in the appropriate mode; the per-block lock inside [`BlockPool`] only
//! protects the raw byte copies.

use crate::block::BlockPool;
use crate::error::{FsError, FsResult};

/// Maximum length of a directory-entry name, in bytes.
pub const MAX_NAME_LEN: usize = 40;

/// On-block size of one entry record: a zero-padded name followed by a
/// little-endian `i32` inumber. An empty name marks a free slot.
pub const ENTRY_LEN: usize = MAX_NAME_LEN + 4;

/// Number of entry records a directory block holds.
pub fn entry_capacity(block_size: usize) -> usize {
    block_size / ENTRY_LEN
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.bytes().any(|b| b == 0 || b == b'/')
}

fn read_entry(blocks: &BlockPool, dir_block: usize, slot: usize) -> FsResult<(Vec<u8>, i32)> {
    let mut record = [0u8; ENTRY_LEN];
    blocks.read_at(dir_block, slot * ENTRY_LEN, &mut record)?;
    let name_len = record[..MAX_NAME_LEN]
        .iter()
        .position(|b| *b == 0)
        .unwrap_or(MAX_NAME_LEN);
    let inumber = i32::from_le_bytes(
        record[MAX_NAME_LEN..ENTRY_LEN]
            .try_into()
            .expect("entry record is 4 bytes past the name"),
    );
    Ok((record[..name_len].to_vec(), inumber))
}

fn write_entry(blocks: &BlockPool, dir_block: usize, slot: usize, name: &str, inumber: usize) -> FsResult<()> {
    let mut record = [0u8; ENTRY_LEN];
    record[..name.len()].copy_from_slice(name.as_bytes());
    record[MAX_NAME_LEN..ENTRY_LEN].copy_from_slice(&(inumber as i32).to_le_bytes());
    blocks.write_at(dir_block, slot * ENTRY_LEN, &record)?;
    Ok(())
}

/// Look a name up among the live entries. Linear scan, exact match.
pub fn find(blocks: &BlockPool, dir_block: usize, name: &str) -> FsResult<usize> {
    for slot in 0..entry_capacity(blocks.block_size()) {
        let (entry_name, inumber) = read_entry(blocks, dir_block, slot)?;
        if !entry_name.is_empty() && entry_name == name.as_bytes() {
            return Ok(inumber as usize);
        }
    }
    Err(FsError::NotFound(name.to_string()))
}

/// Store `(name, inumber)` in the first free slot.
///
/// Does not check for duplicates; callers look the name up first under the
/// same root guard.
pub fn add(blocks: &BlockPool, dir_block: usize, name: &str, inumber: usize) -> FsResult<()> {
    if !valid_name(name) {
        return Err(FsError::InvalidName(name.to_string()));
    }
    for slot in 0..entry_capacity(blocks.block_size()) {
        let (entry_name, _) = read_entry(blocks, dir_block, slot)?;
        if entry_name.is_empty() {
            return write_entry(blocks, dir_block, slot, name, inumber);
        }
    }
    Err(FsError::DirectoryFull)
}

/// Empty the slot holding `name`, making it reusable.
pub fn clear(blocks: &BlockPool, dir_block: usize, name: &str) -> FsResult<()> {
    for slot in 0..entry_capacity(blocks.block_size()) {
        let (entry_name, _) = read_entry(blocks, dir_block, slot)?;
        if !entry_name.is_empty() && entry_name == name.as_bytes() {
            let zeroed = [0u8; ENTRY_LEN];
            blocks.write_at(dir_block, slot * ENTRY_LEN, &zeroed)?;
            return Ok(());
        }
    }
    Err(FsError::NotFound(name.to_string()))
}
