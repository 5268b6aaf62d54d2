//! # Download Coordinator
//!
//! The coordinator turns a torrent descriptor and a peer list into a
//! finished download. All coordination is by channels; no state is shared
//! between tasks:
//!
//! - **work**: every piece that still needs downloading. Bounded to the
//!   total piece count so a worker pushing a failed piece back can never
//!   block, whatever the interleaving.
//! - **results**: completed, verified pieces on their way to the store.
//! - **deaths**: one notification per terminated worker.
//! - **done**: disconnects when the download completes, releasing workers
//!   idling on the work queue.
//!
//! One worker thread runs per peer. A spawned death watcher counts worker
//! deaths; the coordinator's own thread collects results, feeds the piece
//! store (which it alone touches), and blocks until one of two outcomes
//! wins: every piece collected, or every worker dead. There is no overall
//! timeout — as long as one worker is alive the download can progress.

use crate::peer::Peer;
use crate::piece::{PieceResult, PieceWork};
use crate::store::PieceStore;
use crate::torrent::Torrent;
use crate::tracker;
use crate::worker::Worker;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, select, unbounded};
use indicatif::{ProgressBar, ProgressStyle};

use std::thread;
use std::time::Duration;

/// Tunable knobs of the download engine.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Maximum number of unanswered block requests per session.
    pub backlog: u32,
    /// Number of peers requested from the tracker.
    pub max_peers: u32,
    /// Deadline for connecting and handshaking with a peer.
    pub connect_timeout: Duration,
    /// Deadline for downloading one whole piece.
    pub download_timeout: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            backlog: 25,
            max_peers: 500,
            connect_timeout: Duration::from_secs(5),
            download_timeout: Duration::from_secs(20),
        }
    }
}

/// Downloads the torrent into the store, discovering peers through the
/// tracker.
pub fn download(torrent: &Torrent, store: &mut dyn PieceStore, config: &Config) -> Result<()> {
    let peers = tracker::announce(torrent, config.max_peers)?;
    run(torrent, peers, store, config)
}

/// Downloads the torrent from the given peers into the store.
///
/// Returns once every piece has been collected and stored, or with an
/// error when every worker has died first.
pub fn run(
    torrent: &Torrent,
    peers: Vec<Peer>,
    store: &mut dyn PieceStore,
    config: &Config,
) -> Result<()> {
    let piece_count = torrent.piece_hashes.len();

    store.init()?;

    if piece_count == 0 {
        return Ok(());
    }

    println!(
        "Downloading {:?} ({} pieces, {} peers)",
        torrent.name(),
        piece_count,
        peers.len()
    );

    // The work queue is sized to hold every piece at once, so requeueing
    // never blocks
    let (work_tx, work_rx) = bounded::<PieceWork>(piece_count);
    let (result_tx, result_rx) = unbounded::<PieceResult>();
    let (death_tx, death_rx) = unbounded::<()>();
    let (dead_tx, dead_rx) = bounded::<()>(1);
    let (done_tx, done_rx) = bounded::<()>(0);

    // Queue every piece
    for index in 0..piece_count as u32 {
        let work = PieceWork {
            index,
            hash: torrent.piece_hashes[index as usize],
            length: torrent.piece_len(index),
        };

        if work_tx.send(work).is_err() {
            return Err(anyhow!("could not queue piece for download"));
        }
    }

    // One session per peer
    let peer_count = peers.len();
    info!("Starting {} peer sessions", peer_count);

    for peer in peers {
        let worker = Worker::new(
            peer,
            torrent.peer_id,
            torrent.info_hash,
            work_tx.clone(),
            work_rx.clone(),
            result_tx.clone(),
            death_tx.clone(),
            done_rx.clone(),
            *config,
        );

        thread::spawn(move || worker.run());
    }

    // The workers hold the only live handles now
    drop(work_tx);
    drop(result_tx);
    drop(death_tx);

    // Death watcher: when as many deaths as workers have been counted
    // before completion, the download cannot progress
    thread::spawn(move || {
        for _ in 0..peer_count {
            if death_rx.recv().is_err() {
                return;
            }
        }

        let _ = dead_tx.send(());
    });

    let pb = ProgressBar::new(torrent.length);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {bytes}/{total_bytes} [{bar:40.cyan/blue}] {percent}%")
            .unwrap()
            .progress_chars("#>-"),
    );

    // Collect results until one outcome wins
    let mut completed = 0usize;
    while completed < piece_count {
        select! {
            recv(result_rx) -> msg => match msg {
                Ok(result) => deliver(store, &pb, result, &mut completed)?,
                // Empty and no senders left means every worker is gone
                Err(_) => return Err(anyhow!("all workers dead")),
            },
            recv(dead_rx) -> _ => {
                // Results can arrive in the same instant as the last
                // death; drain them before giving up
                while let Ok(result) = result_rx.try_recv() {
                    deliver(store, &pb, result, &mut completed)?;
                }

                if completed < piece_count {
                    return Err(anyhow!("all workers dead"));
                }
            },
        }
    }

    // Close the work queue; idle sessions exit as they observe the
    // disconnect
    drop(done_tx);

    pb.finish();
    info!("Download complete");

    Ok(())
}

/// Hands one verified piece to the store.
fn deliver(
    store: &mut dyn PieceStore,
    pb: &ProgressBar,
    result: PieceResult,
    completed: &mut usize,
) -> Result<()> {
    info!("Downloaded piece {}", result.index);

    store.put(result.index, &result.data)?;
    pb.inc(result.data.len() as u64);
    *completed += 1;

    Ok(())
}
