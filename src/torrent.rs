//! # Torrent Metainfo
//!
//! This module turns a `.torrent` document into the descriptor the rest
//! of the engine works with. A metainfo file is a bencoded dictionary:
//!
//! - **announce**: tracker URL
//! - **info**: dictionary with the piece geometry and the file layout
//!   - **piece length**: bytes per piece
//!   - **pieces**: concatenated 20-byte SHA-1 hashes, one per piece
//!   - **name**: file name (single-file) or directory name (multi-file)
//!   - **length** or **files**: exactly one of the two, deciding the layout
//! - optional **creation date**, **comment**, **created by**
//!
//! ## Info-hash
//!
//! The info-hash identifies the torrent in tracker announces and peer
//! handshakes, and it is computed over the *encoded* info dictionary. To
//! guarantee the hash reflects the document as it appeared on the wire,
//! the loader hashes the exact byte span of the `info` value captured
//! during decoding rather than re-encoding the parsed structure.

use crate::bencode;

use anyhow::{anyhow, Result};
use boring::sha::Sha1;
use rand::Rng;
use serde::Deserialize;
use serde_bytes::ByteBuf;

use std::fs;
use std::path::Path;

// Size of a SHA-1 digest in bytes
const SHA1_HASH_SIZE: usize = 20;

// Default port reported to the tracker
const PORT: u16 = 6881;

/// Raw schema of a metainfo document.
#[derive(Debug, Default, Deserialize)]
struct RawTorrent {
    #[serde(default)]
    announce: String,
    #[serde(default)]
    info: RawInfo,
    #[serde(rename = "creation date", default)]
    creation_date: i64,
    #[serde(default)]
    comment: String,
    #[serde(rename = "created by", default)]
    created_by: String,
}

/// Raw schema of the info dictionary.
#[derive(Debug, Default, Deserialize)]
struct RawInfo {
    #[serde(rename = "piece length", default)]
    piece_length: u32,
    #[serde(default)]
    pieces: ByteBuf,
    #[serde(default)]
    name: String,
    // Single-file only
    #[serde(default)]
    length: u64,
    // Multi-file only
    #[serde(default)]
    files: Vec<RawFile>,
}

/// One entry of a multi-file torrent.
#[derive(Debug, Default, Deserialize)]
struct RawFile {
    #[serde(default)]
    length: u64,
    #[serde(default)]
    path: Vec<String>,
}

/// The file layout described by a torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// A single file named `name`.
    SingleFile { name: String, length: u64 },
    /// A directory `dir` holding the listed files.
    MultiFile { dir: String, files: Vec<FileEntry> },
}

/// A file inside a multi-file torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path segments below the torrent directory; the last one is the
    /// file name.
    pub path: Vec<String>,
    /// File length in bytes.
    pub length: u64,
}

/// Everything the engine needs to download one torrent.
#[derive(Debug, Clone)]
pub struct Torrent {
    /// Tracker announce URL.
    pub announce: String,
    /// 20-byte SHA-1 hash of the bencoded info dictionary.
    pub info_hash: [u8; 20],
    /// SHA-1 hash of each piece, in piece order.
    pub piece_hashes: Vec<[u8; 20]>,
    /// Bytes per piece (except possibly the last).
    pub piece_length: u32,
    /// Total length of the torrent content in bytes.
    pub length: u64,
    /// Single- or multi-file layout.
    pub layout: Layout,
    /// Random 20-byte identifier for this client process.
    pub peer_id: [u8; 20],
    /// Port reported to the tracker.
    pub port: u16,
}

impl Torrent {
    /// Reads and parses a metainfo file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Torrent> {
        let buf = fs::read(&path)
            .map_err(|e| anyhow!("could not read torrent file: {}", e))?;

        Torrent::from_bytes(&buf)
    }

    /// Parses a metainfo document from raw bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Torrent> {
        let raw: RawTorrent = bencode::from_bytes(buf)
            .map_err(|e| anyhow!("could not decode torrent: {}", e))?;

        if raw.announce.is_empty() {
            return Err(anyhow!("torrent has no announce url"));
        }

        if !raw.comment.is_empty() {
            debug!("Torrent comment: {}", raw.comment);
        }
        if !raw.created_by.is_empty() {
            debug!(
                "Torrent created by {} at {}",
                raw.created_by, raw.creation_date
            );
        }

        // Hash the exact bytes of the info value as they appeared in the
        // document
        let span = bencode::value_span(buf, b"info")
            .map_err(|e| anyhow!("could not decode torrent: {}", e))?
            .ok_or_else(|| anyhow!("torrent has no info dictionary"))?;
        let info_hash = sha1(&buf[span]);

        let piece_hashes = split_piece_hashes(&raw.info.pieces)?;
        let layout = build_layout(&raw.info);

        let length = match &layout {
            Layout::SingleFile { length, .. } => *length,
            Layout::MultiFile { files, .. } => files.iter().map(|f| f.length).sum(),
        };

        let torrent = Torrent {
            announce: raw.announce,
            info_hash,
            piece_hashes,
            piece_length: raw.info.piece_length,
            length,
            layout,
            peer_id: generate_peer_id(),
            port: PORT,
        };
        torrent.check_geometry()?;

        Ok(torrent)
    }

    /// Returns the suggested name from the torrent metadata: the file
    /// name for single-file torrents, the directory name otherwise.
    pub fn name(&self) -> &str {
        match &self.layout {
            Layout::SingleFile { name, .. } => name,
            Layout::MultiFile { dir, .. } => dir,
        }
    }

    /// Returns the length of the piece at `index`.
    ///
    /// Every piece is `piece_length` bytes except the last, which holds
    /// whatever remains.
    pub fn piece_len(&self, index: u32) -> u32 {
        let begin = index as u64 * self.piece_length as u64;
        let end = (begin + self.piece_length as u64).min(self.length);

        (end - begin) as u32
    }

    /// Returns the byte offset of the piece at `index` within the
    /// concatenated torrent content.
    pub fn piece_offset(&self, index: u32) -> u64 {
        index as u64 * self.piece_length as u64
    }

    /// Validates the piece geometry against the total length.
    fn check_geometry(&self) -> Result<()> {
        if self.piece_length == 0 {
            return Err(anyhow!("torrent has zero piece length"));
        }

        let n = self.piece_hashes.len() as u64;
        if n == 0 {
            return Err(anyhow!("torrent has no pieces"));
        }

        // The last piece must hold between 1 byte and a full piece
        let full = self.piece_length as u64;
        let low = (n - 1) * full;
        if self.length <= low || self.length > n * full {
            return Err(anyhow!(
                "torrent length {} does not fit {} pieces of {} bytes",
                self.length,
                n,
                full
            ));
        }

        Ok(())
    }
}

/// Splits the concatenated hash string into per-piece digests.
fn split_piece_hashes(pieces: &[u8]) -> Result<Vec<[u8; 20]>> {
    if pieces.len() % SHA1_HASH_SIZE != 0 {
        return Err(anyhow!(
            "malformed piece hash string of length {}",
            pieces.len()
        ));
    }

    Ok(pieces
        .chunks_exact(SHA1_HASH_SIZE)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}

/// Chooses the layout by presence of the `files` key.
fn build_layout(info: &RawInfo) -> Layout {
    if info.files.is_empty() {
        Layout::SingleFile {
            name: info.name.clone(),
            length: info.length,
        }
    } else {
        Layout::MultiFile {
            dir: info.name.clone(),
            files: info
                .files
                .iter()
                .map(|f| FileEntry {
                    path: f.path.clone(),
                    length: f.length,
                })
                .collect(),
        }
    }
}

/// Generates a fresh random 20-byte identifier for this process.
fn generate_peer_id() -> [u8; 20] {
    let mut id = [0u8; 20];
    rand::thread_rng().fill(&mut id);
    id
}

/// Computes the SHA-1 digest of `data`.
pub fn sha1(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A two-piece single-file document: piece length 4, content length 7.
    fn single_file_doc() -> Vec<u8> {
        let mut doc = Vec::new();
        doc.extend_from_slice(b"d8:announce20:http://tracker/thing4:info");
        doc.extend_from_slice(&info_dict());
        doc.push(b'e');
        doc
    }

    fn info_dict() -> Vec<u8> {
        let mut info = Vec::new();
        info.extend_from_slice(b"d6:lengthi7e4:name5:a.txt12:piece lengthi4e6:pieces40:");
        info.extend_from_slice(&[0x11; 20]);
        info.extend_from_slice(&[0x22; 20]);
        info.push(b'e');
        info
    }

    #[test]
    fn parses_single_file_torrents() {
        let torrent = Torrent::from_bytes(&single_file_doc()).unwrap();

        assert_eq!(torrent.announce, "http://tracker/thing");
        assert_eq!(torrent.piece_length, 4);
        assert_eq!(torrent.length, 7);
        assert_eq!(torrent.piece_hashes.len(), 2);
        assert_eq!(torrent.piece_hashes[0], [0x11; 20]);
        assert_eq!(torrent.piece_hashes[1], [0x22; 20]);
        assert_eq!(
            torrent.layout,
            Layout::SingleFile {
                name: String::from("a.txt"),
                length: 7
            }
        );
        assert_eq!(torrent.name(), "a.txt");
    }

    #[test]
    fn info_hash_covers_the_exact_input_bytes() {
        let torrent = Torrent::from_bytes(&single_file_doc()).unwrap();
        assert_eq!(torrent.info_hash, sha1(&info_dict()));
    }

    #[test]
    fn parses_multi_file_torrents() {
        let mut doc = Vec::new();
        doc.extend_from_slice(b"d8:announce20:http://tracker/thing4:info");
        doc.extend_from_slice(b"d5:filesl");
        doc.extend_from_slice(b"d6:lengthi3e4:pathl1:aee");
        doc.extend_from_slice(b"d6:lengthi4e4:pathl3:sub1:bee");
        doc.extend_from_slice(b"e4:name3:dir12:piece lengthi4e6:pieces40:");
        doc.extend_from_slice(&[0x33; 40]);
        doc.extend_from_slice(b"ee");

        let torrent = Torrent::from_bytes(&doc).unwrap();

        assert_eq!(torrent.length, 7);
        assert_eq!(torrent.name(), "dir");
        match &torrent.layout {
            Layout::MultiFile { dir, files } => {
                assert_eq!(dir, "dir");
                assert_eq!(files.len(), 2);
                assert_eq!(files[0].path, vec!["a"]);
                assert_eq!(files[0].length, 3);
                assert_eq!(files[1].path, vec!["sub", "b"]);
                assert_eq!(files[1].length, 4);
            }
            other => panic!("expected multi-file layout, got {:?}", other),
        }
    }

    #[test]
    fn piece_lengths_sum_to_the_total() {
        let torrent = Torrent::from_bytes(&single_file_doc()).unwrap();

        let total: u64 = (0..torrent.piece_hashes.len() as u32)
            .map(|i| torrent.piece_len(i) as u64)
            .sum();
        assert_eq!(total, torrent.length);

        assert_eq!(torrent.piece_len(0), 4);
        assert_eq!(torrent.piece_len(1), 3);
    }

    #[test]
    fn rejects_malformed_hash_strings() {
        let mut doc = Vec::new();
        doc.extend_from_slice(b"d8:announce20:http://tracker/thing4:info");
        doc.extend_from_slice(b"d6:lengthi7e4:name5:a.txt12:piece lengthi4e6:pieces19:");
        doc.extend_from_slice(&[0x11; 19]);
        doc.extend_from_slice(b"ee");

        assert!(Torrent::from_bytes(&doc).is_err());
    }

    #[test]
    fn rejects_impossible_geometry() {
        // 2 pieces of 4 bytes cannot cover 9 bytes
        let mut doc = Vec::new();
        doc.extend_from_slice(b"d8:announce20:http://tracker/thing4:info");
        doc.extend_from_slice(b"d6:lengthi9e4:name5:a.txt12:piece lengthi4e6:pieces40:");
        doc.extend_from_slice(&[0x11; 40]);
        doc.extend_from_slice(b"ee");
        assert!(Torrent::from_bytes(&doc).is_err());

        // nor can they cover 4 (the second piece would be empty)
        let mut doc = Vec::new();
        doc.extend_from_slice(b"d8:announce20:http://tracker/thing4:info");
        doc.extend_from_slice(b"d6:lengthi4e4:name5:a.txt12:piece lengthi4e6:pieces40:");
        doc.extend_from_slice(&[0x11; 40]);
        doc.extend_from_slice(b"ee");
        assert!(Torrent::from_bytes(&doc).is_err());
    }

    #[test]
    fn rejects_torrents_without_announce_or_info() {
        assert!(Torrent::from_bytes(b"de").is_err());
        assert!(Torrent::from_bytes(b"d8:announce20:http://tracker/thinge").is_err());
    }

    #[test]
    fn peer_ids_are_fresh_per_load() {
        let a = Torrent::from_bytes(&single_file_doc()).unwrap();
        let b = Torrent::from_bytes(&single_file_doc()).unwrap();
        assert_ne!(a.peer_id, b.peer_id);
    }
}
