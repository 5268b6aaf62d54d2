//! # Peer Endpoints
//!
//! Peers are discovered through the tracker, which answers with a compact
//! binary list: 6 bytes per peer, 4 for the IPv4 address and 2 for the
//! port, both in network byte order.

use anyhow::{anyhow, Result};
use byteorder::{BigEndian, ReadBytesExt};

use std::fmt;
use std::io::Cursor;
use std::net::Ipv4Addr;

/// Length of one compact peer record.
const PEER_SIZE: usize = 6;

/// A remote peer endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peer {
    /// IPv4 address of the peer.
    pub ip: Ipv4Addr,
    /// Port the peer is listening on.
    pub port: u16,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Parses a compact peer list received from the tracker.
pub fn parse_compact(buf: &[u8]) -> Result<Vec<Peer>> {
    if buf.len() % PEER_SIZE != 0 {
        return Err(anyhow!("malformed peer list of length {}", buf.len()));
    }

    let mut peers = Vec::with_capacity(buf.len() / PEER_SIZE);

    for record in buf.chunks_exact(PEER_SIZE) {
        let ip = Ipv4Addr::new(record[0], record[1], record[2], record[3]);

        let mut cursor = Cursor::new(&record[4..6]);
        let port = cursor.read_u16::<BigEndian>()?;

        peers.push(Peer { ip, port });
    }

    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_records() {
        let buf = [192, 168, 1, 1, 0x1a, 0xe1, 10, 0, 0, 7, 0x00, 0x50];
        let peers = parse_compact(&buf).unwrap();

        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].ip, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(peers[0].port, 6881);
        assert_eq!(peers[1].ip, Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(peers[1].port, 80);
    }

    #[test]
    fn empty_list_is_valid() {
        assert!(parse_compact(&[]).unwrap().is_empty());
    }

    #[test]
    fn rejects_lengths_not_divisible_by_six() {
        assert!(parse_compact(&[1, 2, 3, 4, 5]).is_err());
        assert!(parse_compact(&[1, 2, 3, 4, 5, 6, 7]).is_err());
    }

    #[test]
    fn displays_as_ip_port() {
        let peer = Peer {
            ip: Ipv4Addr::new(127, 0, 0, 1),
            port: 6881,
        };
        assert_eq!(peer.to_string(), "127.0.0.1:6881");
    }
}
