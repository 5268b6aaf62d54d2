//! # Piece Store
//!
//! Completed pieces leave the engine through the `PieceStore` trait:
//! opaque storage keyed by piece index. The result collector is the only
//! writer; the reassembly step reads the pieces back in index order once
//! the download has finished.
//!
//! Two implementations ship with the client: `DiskStore` keeps one
//! scratch file per piece (bounded memory, any torrent size) and
//! `MemoryStore` keeps a single pre-sized buffer (fast path used by the
//! CLI).

use anyhow::{anyhow, Result};
use rand::Rng;

use std::fs;
use std::path::{Path, PathBuf};

/// Storage for completed, verified pieces, keyed by piece index.
pub trait PieceStore {
    /// Prepares the storage. Called once, before the first `put`.
    fn init(&mut self) -> Result<()>;

    /// Stores a complete verified piece at `index`.
    fn put(&mut self, index: u32, bytes: &[u8]) -> Result<()>;

    /// Retrieves the piece stored at `index`.
    fn get(&mut self, index: u32) -> Result<Vec<u8>>;

    /// Releases all resources. Every operation after `close` fails.
    fn close(&mut self) -> Result<()>;
}

fn closed_error() -> anyhow::Error {
    anyhow!("the piece store is closed")
}

/// A piece store keeping one file per piece in a scratch directory.
///
/// `init` creates a uniquely named directory below the chosen parent,
/// pieces land in files named by their index in hex, and `close` removes
/// the whole directory.
pub struct DiskStore {
    parent: PathBuf,
    /// Scratch directory; `None` until `init`, and again after `close`.
    root: Option<PathBuf>,
}

impl DiskStore {
    /// Creates a store that will keep its scratch directory under
    /// `parent`.
    pub fn new<P: AsRef<Path>>(parent: P) -> DiskStore {
        DiskStore {
            parent: parent.as_ref().to_path_buf(),
            root: None,
        }
    }

    fn piece_path(root: &Path, index: u32) -> PathBuf {
        root.join(format!("{:x}", index))
    }
}

impl PieceStore for DiskStore {
    fn init(&mut self) -> Result<()> {
        let suffix: u32 = rand::thread_rng().gen();
        let root = self.parent.join(format!("pieces-{:08x}", suffix));

        fs::create_dir_all(&root)
            .map_err(|e| anyhow!("could not create piece directory: {}", e))?;

        self.root = Some(root);
        Ok(())
    }

    fn put(&mut self, index: u32, bytes: &[u8]) -> Result<()> {
        let root = self.root.as_ref().ok_or_else(closed_error)?;

        fs::write(Self::piece_path(root, index), bytes)
            .map_err(|e| anyhow!("could not store piece {}: {}", index, e))
    }

    fn get(&mut self, index: u32) -> Result<Vec<u8>> {
        let root = self.root.as_ref().ok_or_else(closed_error)?;

        fs::read(Self::piece_path(root, index))
            .map_err(|e| anyhow!("could not fetch piece {}: {}", index, e))
    }

    fn close(&mut self) -> Result<()> {
        let root = self.root.take().ok_or_else(closed_error)?;

        fs::remove_dir_all(&root)
            .map_err(|e| anyhow!("could not remove piece directory: {}", e))
    }
}

/// A piece store assembling pieces directly into one buffer.
///
/// Pieces are addressed by `index × piece_length`, so the buffer holds
/// the final concatenated content once every piece has arrived.
pub struct MemoryStore {
    piece_length: u32,
    total_length: u64,
    buffer: Vec<u8>,
    closed: bool,
}

impl MemoryStore {
    pub fn new(piece_length: u32, total_length: u64) -> MemoryStore {
        MemoryStore {
            piece_length,
            total_length,
            buffer: vec![0; total_length as usize],
            closed: false,
        }
    }

    /// Hands the assembled content over, consuming the store.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Returns the byte range of the piece at `index`.
    fn piece_range(&self, index: u32) -> Result<(usize, usize)> {
        let begin = index as u64 * self.piece_length as u64;
        if begin >= self.total_length {
            return Err(anyhow!("piece {} outside the torrent", index));
        }

        let end = (begin + self.piece_length as u64).min(self.total_length);
        Ok((begin as usize, end as usize))
    }
}

impl PieceStore for MemoryStore {
    fn init(&mut self) -> Result<()> {
        if self.closed {
            return Err(closed_error());
        }

        Ok(())
    }

    fn put(&mut self, index: u32, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(closed_error());
        }

        let (begin, end) = self.piece_range(index)?;
        if bytes.len() != end - begin {
            return Err(anyhow!(
                "piece {} is {} bytes, expected {}",
                index,
                bytes.len(),
                end - begin
            ));
        }

        self.buffer[begin..end].copy_from_slice(bytes);
        Ok(())
    }

    fn get(&mut self, index: u32) -> Result<Vec<u8>> {
        if self.closed {
            return Err(closed_error());
        }

        let (begin, end) = self.piece_range(index)?;
        Ok(self.buffer[begin..end].to_vec())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(closed_error());
        }

        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips_pieces() {
        let mut store = MemoryStore::new(4, 7);
        store.init().unwrap();

        store.put(1, b"xyz").unwrap();
        store.put(0, b"abcd").unwrap();

        assert_eq!(store.get(0).unwrap(), b"abcd");
        assert_eq!(store.get(1).unwrap(), b"xyz");
        assert_eq!(store.into_bytes(), b"abcdxyz");
    }

    #[test]
    fn memory_store_rejects_wrong_sizes_and_indices() {
        let mut store = MemoryStore::new(4, 7);
        store.init().unwrap();

        assert!(store.put(0, b"toolong!!").is_err());
        assert!(store.put(1, b"xy").is_err());
        assert!(store.put(2, b"a").is_err());
        assert!(store.get(9).is_err());
    }

    #[test]
    fn memory_store_fails_after_close() {
        let mut store = MemoryStore::new(4, 4);
        store.init().unwrap();
        store.put(0, b"abcd").unwrap();
        store.close().unwrap();

        assert!(store.init().is_err());
        assert!(store.put(0, b"abcd").is_err());
        assert!(store.get(0).is_err());
        assert!(store.close().is_err());
    }

    #[test]
    fn disk_store_round_trips_pieces() {
        let mut store = DiskStore::new(std::env::temp_dir());
        store.init().unwrap();

        store.put(0, b"hello").unwrap();
        store.put(255, b"world").unwrap();

        assert_eq!(store.get(0).unwrap(), b"hello");
        assert_eq!(store.get(255).unwrap(), b"world");

        store.close().unwrap();
    }

    #[test]
    fn disk_store_close_removes_the_scratch_directory() {
        let mut store = DiskStore::new(std::env::temp_dir());
        store.init().unwrap();
        store.put(0, b"data").unwrap();

        let root = store.root.clone().unwrap();
        assert!(root.exists());

        store.close().unwrap();
        assert!(!root.exists());

        assert!(store.put(0, b"data").is_err());
        assert!(store.get(0).is_err());
        assert!(store.close().is_err());
    }

    #[test]
    fn disk_store_fails_before_init() {
        let mut store = DiskStore::new(std::env::temp_dir());
        assert!(store.put(0, b"data").is_err());
    }
}
