//! # BitTorrent Handshake
//!
//! The handshake is the fixed-layout greeting frame that opens every peer
//! connection:
//!
//! ```text
//! <pstrlen><pstr><reserved><info_hash><peer_id>
//! ```
//!
//! - **pstrlen**: 1 byte - length of the protocol identifier (19)
//! - **pstr**: protocol identifier ("BitTorrent protocol")
//! - **reserved**: 8 bytes, all zero (extension negotiation)
//! - **info_hash**: 20 bytes - SHA-1 of the torrent's info dictionary
//! - **peer_id**: 20 bytes - identifier of the sender
//!
//! Total size is 49 + pstrlen bytes, 68 for the standard protocol. A peer
//! whose handshake carries a different protocol name or a different
//! info-hash is talking about some other swarm, and the session must end.

use anyhow::{anyhow, Result};

/// The protocol identifier this client speaks.
pub const PROTOCOL_ID: &[u8] = b"BitTorrent protocol";

/// A handshake frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Protocol identifier bytes.
    pub pstr: Vec<u8>,
    /// Reserved extension bytes.
    pub reserved: [u8; 8],
    /// 20-byte SHA-1 hash of the torrent's info dictionary.
    pub info_hash: [u8; 20],
    /// 20-byte identifier of the sending peer.
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Builds our side of the handshake.
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Handshake {
        Handshake {
            pstr: PROTOCOL_ID.to_vec(),
            reserved: [0; 8],
            info_hash,
            peer_id,
        }
    }

    /// Serializes the handshake for transmission.
    pub fn serialize(&self) -> Vec<u8> {
        let mut serialized = Vec::with_capacity(49 + self.pstr.len());

        serialized.push(self.pstr.len() as u8);
        serialized.extend_from_slice(&self.pstr);
        serialized.extend_from_slice(&self.reserved);
        serialized.extend_from_slice(&self.info_hash);
        serialized.extend_from_slice(&self.peer_id);

        serialized
    }

    /// Verifies a handshake received from a peer: the protocol name must
    /// match ours and the info-hash must match the torrent's.
    pub fn verify(&self, info_hash: &[u8; 20]) -> Result<()> {
        if self.pstr != PROTOCOL_ID {
            return Err(anyhow!("peer speaks an unknown protocol"));
        }

        if &self.info_hash != info_hash {
            return Err(anyhow!("peer handshake carries a different info hash"));
        }

        Ok(())
    }
}

/// Parses a received handshake.
///
/// `buf` holds everything after the length byte: the protocol identifier
/// (`pstrlen` bytes) followed by the 48 fixed bytes.
pub fn deserialize_handshake(buf: &[u8], pstrlen: usize) -> Result<Handshake> {
    if buf.len() < pstrlen + 48 {
        return Err(anyhow!("handshake received from peer is too short"));
    }

    let pstr = buf[0..pstrlen].to_vec();

    let mut reserved = [0u8; 8];
    reserved.copy_from_slice(&buf[pstrlen..pstrlen + 8]);

    let mut info_hash = [0u8; 20];
    info_hash.copy_from_slice(&buf[pstrlen + 8..pstrlen + 28]);

    let mut peer_id = [0u8; 20];
    peer_id.copy_from_slice(&buf[pstrlen + 28..pstrlen + 48]);

    Ok(Handshake {
        pstr,
        reserved,
        info_hash,
        peer_id,
    })
}
