//! # Peer Connection
//!
//! One `Client` owns one TCP connection to one remote peer for the whole
//! life of the session: dial, handshake, initial bitfield, then the
//! message exchange that the download loop drives. When the session ends
//! the client is dropped and the socket closes with it.
//!
//! All socket operations carry deadlines. A peer that stops talking is
//! indistinguishable from a dead one, and the swarm always has more
//! peers; hanging on a silent socket is the only unrecoverable mistake.

use crate::bitfield::Bitfield;
use crate::handshake::{deserialize_handshake, Handshake};
use crate::message::*;
use crate::peer::Peer;

use anyhow::{anyhow, Result};
use byteorder::{BigEndian, ReadBytesExt};

use std::io::{Cursor, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::time::Duration;

/// Upper bound on an inbound frame, comfortably above a 16 KiB block
/// plus its header. A hostile length prefix must not turn into a huge
/// allocation.
const MAX_MESSAGE_LEN: usize = 1 << 17;

/// A connection to a remote peer.
pub struct Client {
    /// The remote endpoint.
    peer: Peer,
    /// Our 20-byte identifier.
    peer_id: [u8; 20],
    /// Info-hash of the torrent this connection serves.
    info_hash: [u8; 20],
    /// The TCP connection.
    conn: TcpStream,
    /// Pieces the peer advertises.
    bitfield: Bitfield,
    /// Whether the peer is currently choking us.
    choked: bool,
}

impl Client {
    /// Dials the peer with a bounded connect timeout.
    ///
    /// The connection starts out choked with an empty bitfield, per the
    /// protocol's initial state.
    pub fn connect(
        peer: Peer,
        peer_id: [u8; 20],
        info_hash: [u8; 20],
        timeout: Duration,
    ) -> Result<Client> {
        let addr = SocketAddr::new(IpAddr::V4(peer.ip), peer.port);
        let conn = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|_| anyhow!("could not connect to peer {}", peer))?;

        debug!("Connected to peer {}", peer);

        Ok(Client {
            peer,
            peer_id,
            info_hash,
            conn,
            bitfield: Bitfield::default(),
            choked: true,
        })
    }

    /// Returns whether the peer is choking us.
    pub fn is_choked(&self) -> bool {
        self.choked
    }

    pub fn set_choked(&mut self, choked: bool) {
        self.choked = choked;
    }

    /// Checks whether the peer advertises piece `index`.
    pub fn has_piece(&self, index: u32) -> bool {
        self.bitfield.has(index)
    }

    /// Records a piece announced by a `have` message.
    pub fn record_piece(&mut self, index: u32) {
        self.bitfield.set(index);
    }

    /// Sets the read and write deadlines on the connection.
    pub fn set_connection_timeout(&self, timeout: Duration) -> Result<()> {
        self.conn
            .set_read_timeout(Some(timeout))
            .map_err(|_| anyhow!("could not set read timeout"))?;

        self.conn
            .set_write_timeout(Some(timeout))
            .map_err(|_| anyhow!("could not set write timeout"))?;

        Ok(())
    }

    /// Exchanges and verifies handshakes with the peer.
    pub fn handshake(&mut self) -> Result<()> {
        // Send our handshake
        let handshake = Handshake::new(self.info_hash, self.peer_id);
        self.conn
            .write_all(&handshake.serialize())
            .map_err(|_| anyhow!("could not send handshake to peer"))?;

        // Read the peer's protocol name length
        let mut len_buf = [0u8; 1];
        self.conn
            .read_exact(&mut len_buf)
            .map_err(|_| anyhow!("could not read handshake from peer"))?;

        let pstrlen = len_buf[0] as usize;
        if pstrlen == 0 {
            return Err(anyhow!("invalid handshake length received from peer"));
        }

        // Read the rest of the frame and verify it
        let mut buf = vec![0u8; pstrlen + 48];
        self.conn
            .read_exact(&mut buf)
            .map_err(|_| anyhow!("could not read handshake from peer"))?;

        let received = deserialize_handshake(&buf, pstrlen)?;
        received.verify(&self.info_hash)?;

        debug!("Handshake complete with peer {}", self.peer);

        Ok(())
    }

    /// Reads the initial bitfield message.
    ///
    /// The first message after the handshake must be `bitfield`; anything
    /// else ends the session.
    pub fn read_bitfield(&mut self) -> Result<()> {
        let message = self.read_message()?;
        if message.id != MESSAGE_BITFIELD {
            return Err(anyhow!(
                "expected bitfield message, received id {}",
                message.id
            ));
        }

        info!("Receive MESSAGE_BITFIELD from peer {}", self.peer);

        self.bitfield = Bitfield::new(message.payload);
        Ok(())
    }

    /// Reads one message from the peer.
    ///
    /// Keep-alive frames come back as messages with the keep-alive
    /// sentinel id.
    pub fn read_message(&mut self) -> Result<Message> {
        // Read the 4-byte length prefix
        let mut len_buf = [0u8; 4];
        self.conn
            .read_exact(&mut len_buf)
            .map_err(|_| anyhow!("could not read message from peer"))?;

        let mut cursor = Cursor::new(&len_buf);
        let message_len = cursor.read_u32::<BigEndian>()? as usize;

        if message_len == 0 {
            debug!("Receive KEEP_ALIVE from peer {}", self.peer);
            return Ok(Message::new(MESSAGE_KEEPALIVE));
        }

        if message_len > MAX_MESSAGE_LEN {
            return Err(anyhow!("message of {} bytes is too large", message_len));
        }

        // Read the message body
        let mut message_buf = vec![0u8; message_len];
        self.conn
            .read_exact(&mut message_buf)
            .map_err(|_| anyhow!("could not read message from peer"))?;

        deserialize_message(&message_buf)
    }

    /// Sends an `unchoke` message.
    pub fn send_unchoke(&mut self) -> Result<()> {
        info!("Send MESSAGE_UNCHOKE to peer {}", self.peer);
        self.send(&Message::new(MESSAGE_UNCHOKE))
    }

    /// Sends an `interested` message.
    pub fn send_interested(&mut self) -> Result<()> {
        info!("Send MESSAGE_INTERESTED to peer {}", self.peer);
        self.send(&Message::new(MESSAGE_INTERESTED))
    }

    /// Sends a `have` message for a completed piece.
    pub fn send_have(&mut self, index: u32) -> Result<()> {
        info!("Send MESSAGE_HAVE {} to peer {}", index, self.peer);
        self.send(&new_have(index)?)
    }

    /// Sends a `request` message for one block.
    pub fn send_request(&mut self, index: u32, begin: u32, length: u32) -> Result<()> {
        debug!(
            "Send MESSAGE_REQUEST for piece {} [{}:{}] to peer {}",
            index,
            begin,
            begin + length,
            self.peer
        );
        self.send(&new_request(index, begin, length)?)
    }

    fn send(&mut self, message: &Message) -> Result<()> {
        let serialized = message.serialize()?;
        self.conn
            .write_all(&serialized)
            .map_err(|_| anyhow!("could not send message to peer"))
    }
}
