//! # Remora BitTorrent Client
//!
//! A command-line BitTorrent download client written in Rust.
//!
//! ## Features
//!
//! - In-crate bencode codec with strict, canonical encoding
//! - HTTP tracker announces with compact peer lists
//! - Multi-peer concurrent downloading with pipelined block requests
//! - Piece verification with SHA-1 hashing
//! - Single- and multi-file torrent reassembly
//! - Progress tracking with a visual progress bar
//!
//! ## Usage
//!
//! ```bash
//! remora <torrent_file>
//! remora <torrent_file> -o <output_path>
//! ```

use remora::download::{self, Config};
use remora::store::{MemoryStore, PieceStore};
use remora::torrent::{Layout, Torrent};

use anyhow::{anyhow, Result};
use clap::Parser;
use log::info;

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "A command-line BitTorrent download client, written in Rust."
)]
struct Args {
    /// Path to the .torrent file
    torrent: String,

    /// Output path (defaults to the name from the torrent)
    #[arg(short = 'o', long)]
    output: Option<String>,

    /// Number of peers to request from the tracker
    #[arg(long, default_value_t = 500)]
    peers: u32,

    /// Maximum unanswered block requests per peer
    #[arg(long, default_value_t = 25)]
    backlog: u32,

    /// Seconds allowed for connecting and handshaking with a peer
    #[arg(long, default_value_t = 5)]
    connect_timeout: u64,

    /// Seconds allowed for downloading one piece from a peer
    #[arg(long, default_value_t = 20)]
    piece_timeout: u64,
}

/// Sanitize a torrent-supplied name to prevent path traversal.
fn sanitize_filename(filename: &str) -> String {
    // Replace path separators with underscores to prevent directory
    // traversal
    let safe_name = filename.replace(['/', '\\'], "_");

    if safe_name.trim().is_empty() || safe_name == "." || safe_name == ".." {
        String::from("download")
    } else {
        safe_name
    }
}

/// Asks the user before overwriting an existing path.
fn confirm_overwrite(path: &Path) -> Result<bool> {
    println!("Output path {:?} already exists.", path);
    print!("Do you want to overwrite it? (y/N): ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim().to_lowercase();

    Ok(input == "y" || input == "yes")
}

fn run(args: Args) -> Result<()> {
    // Check that the torrent file exists
    if !Path::new(&args.torrent).exists() {
        return Err(anyhow!("could not find torrent file: {}", args.torrent));
    }

    let torrent = Torrent::open(&args.torrent)?;

    info!(
        "Loaded torrent {:?}: {} pieces of {} bytes",
        torrent.name(),
        torrent.piece_hashes.len(),
        torrent.piece_length
    );

    // Determine the output path
    let default_name = sanitize_filename(torrent.name());
    let output_path = PathBuf::from(args.output.as_deref().unwrap_or(&default_name));

    if output_path.exists() && !confirm_overwrite(&output_path)? {
        println!("Download cancelled.");
        return Ok(());
    }

    let config = Config {
        backlog: args.backlog,
        max_peers: args.peers,
        connect_timeout: Duration::from_secs(args.connect_timeout),
        download_timeout: Duration::from_secs(args.piece_timeout),
    };

    // Download every piece into the store
    let mut store = MemoryStore::new(torrent.piece_length, torrent.length);
    download::download(&torrent, &mut store, &config)?;

    // Reassemble the output from the stored pieces
    save(&torrent, &mut store, &output_path)?;
    store.close()?;

    println!("Saved in {:?}.", output_path);

    Ok(())
}

/// Writes the downloaded content to its final shape: one file for
/// single-file torrents, a directory tree for multi-file ones.
fn save(torrent: &Torrent, store: &mut dyn PieceStore, output: &Path) -> Result<()> {
    match &torrent.layout {
        Layout::SingleFile { .. } => {
            let mut file = File::create(output)
                .map_err(|e| anyhow!("could not create output file {:?}: {}", output, e))?;

            for index in 0..torrent.piece_hashes.len() as u32 {
                file.write_all(&store.get(index)?)?;
            }
        }
        Layout::MultiFile { files, .. } => {
            fs::create_dir_all(output)
                .map_err(|e| anyhow!("could not create output directory {:?}: {}", output, e))?;

            // The pieces form one concatenated stream; split it across
            // the listed files in order
            let mut stream = PieceStream::new(store);
            for entry in files {
                let path = entry_path(output, &entry.path)?;

                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }

                let mut file = File::create(&path)
                    .map_err(|e| anyhow!("could not create output file {:?}: {}", path, e))?;
                stream.copy_to(&mut file, entry.length)?;
            }
        }
    }

    Ok(())
}

/// Builds the on-disk path of one multi-file entry, sanitizing every
/// segment.
fn entry_path(root: &Path, segments: &[String]) -> Result<PathBuf> {
    if segments.is_empty() {
        return Err(anyhow!("torrent lists a file without a path"));
    }

    let mut path = root.to_path_buf();
    for segment in segments {
        path.push(sanitize_filename(segment));
    }

    Ok(path)
}

/// Reads the piece store as one continuous byte stream.
struct PieceStream<'a> {
    store: &'a mut dyn PieceStore,
    next_index: u32,
    piece: Vec<u8>,
    pos: usize,
}

impl<'a> PieceStream<'a> {
    fn new(store: &'a mut dyn PieceStore) -> PieceStream<'a> {
        PieceStream {
            store,
            next_index: 0,
            piece: Vec::new(),
            pos: 0,
        }
    }

    /// Copies the next `len` bytes of the stream into `writer`.
    fn copy_to(&mut self, writer: &mut dyn Write, len: u64) -> Result<()> {
        let mut remaining = len;

        while remaining > 0 {
            if self.pos == self.piece.len() {
                self.piece = self.store.get(self.next_index)?;
                self.next_index += 1;
                self.pos = 0;
            }

            let take = ((self.piece.len() - self.pos) as u64).min(remaining) as usize;
            writer.write_all(&self.piece[self.pos..self.pos + take])?;
            self.pos += take;
            remaining -= take as u64;
        }

        Ok(())
    }
}

fn main() {
    // Initialize logger
    pretty_env_logger::init_timed();

    // Parse arguments
    let args = Args::parse();

    // Run program, eventually exit failure
    if let Err(error) = run(args) {
        eprintln!("Error: {}", error);
        std::process::exit(1);
    }

    // Exit success
    std::process::exit(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use remora::torrent::FileEntry;

    #[test]
    fn sanitizes_hostile_names() {
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("a\\b"), "a_b");
        assert_eq!(sanitize_filename(""), "download");
        assert_eq!(sanitize_filename("  "), "download");
        assert_eq!(sanitize_filename(".."), "download");
        assert_eq!(sanitize_filename("plain.iso"), "plain.iso");
    }

    #[test]
    fn entry_paths_stay_below_the_root() {
        let root = PathBuf::from("out");

        let path = entry_path(&root, &[String::from("sub"), String::from("file.bin")]).unwrap();
        assert_eq!(path, PathBuf::from("out/sub/file.bin"));

        let path = entry_path(&root, &[String::from("../evil")]).unwrap();
        assert_eq!(path, PathBuf::from("out/.._evil"));

        assert!(entry_path(&root, &[]).is_err());
    }

    #[test]
    fn piece_stream_splits_content_across_files() {
        let mut store = MemoryStore::new(4, 10);
        store.init().unwrap();
        store.put(0, b"abcd").unwrap();
        store.put(1, b"efgh").unwrap();
        store.put(2, b"ij").unwrap();

        let mut stream = PieceStream::new(&mut store);

        let mut first = Vec::new();
        stream.copy_to(&mut first, 3).unwrap();
        assert_eq!(first, b"abc");

        let mut second = Vec::new();
        stream.copy_to(&mut second, 7).unwrap();
        assert_eq!(second, b"defghij");
    }

    #[test]
    fn save_writes_multi_file_layouts() {
        let dir = std::env::temp_dir().join(format!("remora-test-{}", std::process::id()));

        let torrent = Torrent {
            announce: String::from("http://tracker/announce"),
            info_hash: [0; 20],
            piece_hashes: vec![[0; 20], [0; 20]],
            piece_length: 4,
            length: 7,
            layout: Layout::MultiFile {
                dir: String::from("d"),
                files: vec![
                    FileEntry {
                        path: vec![String::from("a")],
                        length: 3,
                    },
                    FileEntry {
                        path: vec![String::from("sub"), String::from("b")],
                        length: 4,
                    },
                ],
            },
            peer_id: [0; 20],
            port: 6881,
        };

        let mut store = MemoryStore::new(4, 7);
        store.init().unwrap();
        store.put(0, b"abcd").unwrap();
        store.put(1, b"efg").unwrap();

        save(&torrent, &mut store, &dir).unwrap();

        assert_eq!(fs::read(dir.join("a")).unwrap(), b"abc");
        assert_eq!(fs::read(dir.join("sub").join("b")).unwrap(), b"defg");

        fs::remove_dir_all(&dir).unwrap();
    }
}
