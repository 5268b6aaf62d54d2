//! # Peer Session Worker
//!
//! One worker drives one peer for the length of the download. The session
//! is a straight line: dial, handshake, read the initial bitfield, signal
//! `unchoke` + `interested`, then loop pulling pieces off the shared work
//! queue.
//!
//! ## Piece pipeline
//!
//! A piece is downloaded as a window of pipelined 16 KiB block requests:
//! as long as the peer is not choking us and the number of unanswered
//! requests is below the backlog limit, more requests go out. Keeping
//! several requests in flight hides the round-trip latency of each block,
//! which is the dominant throughput lever over long-haul links.
//!
//! ## Failure policy
//!
//! Anything that goes wrong with the peer — connect failure, protocol
//! violation, I/O error, timeout, bad piece hash — ends the session. The
//! piece in hand is pushed back on the queue for another worker, and the
//! coordinator is notified of the death. Peers are plentiful and sessions
//! are cheap; partial trust is not worth the complexity.

use crate::client::Client;
use crate::download::Config;
use crate::message::*;
use crate::peer::Peer;
use crate::piece::{PieceResult, PieceWork};
use crate::torrent::sha1;

use anyhow::{anyhow, Result};
use crossbeam_channel::{select, Receiver, Sender};

use std::time::Instant;

// Standard block size for piece downloads (16 KiB)
const MAX_BLOCK: u32 = 16384;

/// Download progress of the piece currently in flight.
#[derive(Debug, Default)]
struct Progress {
    /// Piece buffer, filled block by block.
    buf: Vec<u8>,
    /// Bytes received so far.
    downloaded: u32,
    /// Bytes requested so far.
    requested: u32,
    /// Requests sent but not yet answered.
    backlog: u32,
}

/// Notifies the coordinator of this worker's death on every exit path,
/// panics included.
struct DeathNotice(Sender<()>);

impl Drop for DeathNotice {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// Manages the download session with a single peer.
pub struct Worker {
    peer: Peer,
    peer_id: [u8; 20],
    info_hash: [u8; 20],
    work_tx: Sender<PieceWork>,
    work_rx: Receiver<PieceWork>,
    result_tx: Sender<PieceResult>,
    death_tx: Sender<()>,
    /// Disconnects when the download completes; idle workers exit.
    done_rx: Receiver<()>,
    config: Config,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        peer: Peer,
        peer_id: [u8; 20],
        info_hash: [u8; 20],
        work_tx: Sender<PieceWork>,
        work_rx: Receiver<PieceWork>,
        result_tx: Sender<PieceResult>,
        death_tx: Sender<()>,
        done_rx: Receiver<()>,
        config: Config,
    ) -> Worker {
        Worker {
            peer,
            peer_id,
            info_hash,
            work_tx,
            work_rx,
            result_tx,
            death_tx,
            done_rx,
            config,
        }
    }

    /// Runs the session to completion. Never panics outward; the death
    /// notice fires no matter how the session ends.
    pub fn run(self) {
        let _death = DeathNotice(self.death_tx.clone());

        if let Err(e) = self.session() {
            debug!("Session with peer {} ended: {}", self.peer, e);
        }
    }

    /// The session state machine.
    fn session(&self) -> Result<()> {
        // Dial and set the handshake-phase deadline
        let mut client = Client::connect(
            self.peer,
            self.peer_id,
            self.info_hash,
            self.config.connect_timeout,
        )?;
        client.set_connection_timeout(self.config.connect_timeout)?;

        client.handshake()?;
        client.read_bitfield()?;

        client.send_unchoke()?;
        client.send_interested()?;

        loop {
            // Pull the next piece; exit when the work queue closes or the
            // download completes
            let piece = select! {
                recv(self.work_rx) -> msg => match msg {
                    Ok(piece) => piece,
                    Err(_) => return Ok(()),
                },
                recv(self.done_rx) -> _ => return Ok(()),
            };

            // Pass on pieces this peer does not have
            if !client.has_piece(piece.index) {
                self.requeue(piece);
                continue;
            }

            // Download the piece; the connection is not trusted after
            // any failure
            let data = match self.download_piece(&mut client, &piece) {
                Ok(data) => data,
                Err(e) => {
                    debug!("Piece {} from peer {} failed: {}", piece.index, self.peer, e);
                    self.requeue(piece);
                    return Ok(());
                }
            };

            // A piece that fails verification is rejected whole, and so
            // is the peer that sent it
            if sha1(&data) != piece.hash {
                warn!("Piece {} from peer {} failed its hash check", piece.index, self.peer);
                self.requeue(piece);
                return Ok(());
            }

            info!("Verified piece {} from peer {}", piece.index, self.peer);

            // Let the peer know, then deliver
            if let Err(e) = client.send_have(piece.index) {
                debug!("Could not send HAVE to peer {}: {}", self.peer, e);
            }

            if self
                .result_tx
                .send(PieceResult {
                    index: piece.index,
                    data,
                })
                .is_err()
            {
                return Ok(());
            }
        }
    }

    /// Pushes a piece back onto the work queue.
    ///
    /// The queue is sized to the total piece count, so this send can
    /// never block.
    fn requeue(&self, piece: PieceWork) {
        if self.work_tx.send(piece).is_err() {
            error!("could not requeue piece, work channel closed");
        }
    }

    /// Downloads one piece through the pipelined request window.
    fn download_piece(&self, client: &mut Client, piece: &PieceWork) -> Result<Vec<u8>> {
        // The deadline covers the whole piece
        client.set_connection_timeout(self.config.download_timeout)?;
        let deadline = Instant::now() + self.config.download_timeout;

        let mut progress = Progress {
            buf: vec![0; piece.length as usize],
            ..Progress::default()
        };

        while progress.downloaded < piece.length {
            if Instant::now() >= deadline {
                return Err(anyhow!("piece {} timed out", piece.index));
            }

            // Keep the request window full while the peer allows it
            if !client.is_choked() {
                while progress.backlog < self.config.backlog && progress.requested < piece.length {
                    let block_size = MAX_BLOCK.min(piece.length - progress.requested);

                    client.send_request(piece.index, progress.requested, block_size)?;
                    progress.backlog += 1;
                    progress.requested += block_size;
                }
            }

            // React to one message
            let message = client.read_message()?;
            match message.id {
                MESSAGE_CHOKE => {
                    debug!("Peer {} choked us", self.peer);
                    client.set_choked(true);
                }
                MESSAGE_UNCHOKE => {
                    debug!("Peer {} unchoked us", self.peer);
                    client.set_choked(false);
                }
                MESSAGE_HAVE => {
                    let index = parse_have(&message)?;
                    client.record_piece(index);
                }
                MESSAGE_PIECE => {
                    let n = parse_piece(piece.index, &mut progress.buf, &message)?;
                    progress.downloaded += n;
                    progress.backlog = progress.backlog.saturating_sub(1);
                }
                _ => {}
            }
        }

        Ok(progress.buf)
    }
}
