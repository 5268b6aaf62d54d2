//! # Tracker Client
//!
//! The tracker is the rendezvous point of a swarm: an HTTP GET on the
//! announce URL, parameterized with the torrent's info-hash and our peer
//! id, answers with a bencoded document carrying the compact peer list.
//!
//! The info-hash and peer id are raw 20-byte strings, not text, so they
//! cannot go through a regular form encoder; they are percent-encoded
//! byte by byte.

use crate::bencode;
use crate::peer::{self, Peer};
use crate::torrent::Torrent;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_bytes::ByteBuf;
use url::Url;

use std::time::Duration;

// Tracker HTTP round-trip timeout
const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw schema of a tracker announce response.
#[derive(Debug, Default, Deserialize)]
struct TrackerResponse {
    /// Human-readable error; when present the announce failed.
    #[serde(rename = "failure reason", default)]
    failure: String,
    /// Non-fatal notice from the tracker.
    #[serde(rename = "warning message", default)]
    warning: String,
    /// Seconds to wait before re-announcing.
    #[serde(default)]
    interval: u32,
    #[allow(dead_code)]
    #[serde(rename = "min interval", default)]
    min_interval: u32,
    #[allow(dead_code)]
    #[serde(rename = "tracker id", default)]
    tracker_id: ByteBuf,
    /// Number of seeders known to the tracker.
    #[serde(default)]
    complete: u32,
    /// Number of leechers known to the tracker.
    #[serde(default)]
    incomplete: u32,
    /// Compact peer list: 6 bytes per peer.
    #[serde(default)]
    peers: ByteBuf,
}

/// Announces to the torrent's tracker and returns the peer list.
///
/// `numwant` is the number of peers requested from the tracker.
pub fn announce(torrent: &Torrent, numwant: u32) -> Result<Vec<Peer>> {
    let url = announce_url(torrent, numwant)?;

    debug!("Announce to {}", url);

    // Build blocking HTTP client with a short timeout
    let client = reqwest::blocking::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| anyhow!("could not build tracker client: {}", e))?;

    // Fetch the peer list from the tracker
    let body = client
        .get(&url)
        .send()
        .map_err(|e| anyhow!("could not reach tracker: {}", e))?
        .bytes()
        .map_err(|e| anyhow!("could not read tracker response: {}", e))?;

    let response: TrackerResponse = bencode::from_bytes(&body)
        .map_err(|e| anyhow!("could not decode tracker response: {}", e))?;

    parse_response(response)
}

/// Extracts the peer list from a decoded tracker response, surfacing a
/// tracker-reported failure.
fn parse_response(response: TrackerResponse) -> Result<Vec<Peer>> {
    if !response.failure.is_empty() {
        return Err(anyhow!("tracker refused announce: {}", response.failure));
    }

    if !response.warning.is_empty() {
        warn!("Tracker warning: {}", response.warning);
    }

    info!(
        "Tracker answered: {} seeders, {} leechers, interval {}s",
        response.complete, response.incomplete, response.interval
    );

    peer::parse_compact(&response.peers)
}

/// Builds the announce URL with its query parameters.
fn announce_url(torrent: &Torrent, numwant: u32) -> Result<String> {
    // Validate the base URL before appending the query by hand
    let base = Url::parse(&torrent.announce)
        .map_err(|_| anyhow!("could not parse tracker url: {}", torrent.announce))?;

    let query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left={}&compact=1&numwant={}",
        percent_encode_binary(&torrent.info_hash),
        percent_encode_binary(&torrent.peer_id),
        torrent.port,
        torrent.length,
        numwant,
    );

    let mut url = base.to_string();
    if url.contains('?') {
        url.push('&');
    } else {
        url.push('?');
    }
    url.push_str(&query);

    Ok(url)
}

/// Percent-encodes raw bytes as %XX sequences.
fn percent_encode_binary(data: &[u8]) -> String {
    const HEX_DIGITS: &[u8] = b"0123456789ABCDEF";
    let mut encoded = String::with_capacity(data.len() * 3);

    for &byte in data {
        encoded.push('%');
        encoded.push(HEX_DIGITS[(byte >> 4) as usize] as char);
        encoded.push(HEX_DIGITS[(byte & 0x0f) as usize] as char);
    }

    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::Layout;

    fn test_torrent() -> Torrent {
        Torrent {
            announce: String::from("http://tracker.example/announce"),
            info_hash: [0x01; 20],
            piece_hashes: vec![[0xaa; 20]],
            piece_length: 16384,
            length: 16384,
            layout: Layout::SingleFile {
                name: String::from("a.bin"),
                length: 16384,
            },
            peer_id: [0xff; 20],
            port: 6881,
        }
    }

    #[test]
    fn announce_url_carries_all_parameters() {
        let url = announce_url(&test_torrent(), 500).unwrap();

        assert!(url.starts_with("http://tracker.example/announce?"));
        assert!(url.contains(&format!("info_hash={}", "%01".repeat(20))));
        assert!(url.contains(&format!("peer_id={}", "%FF".repeat(20))));
        assert!(url.contains("port=6881"));
        assert!(url.contains("uploaded=0"));
        assert!(url.contains("downloaded=0"));
        assert!(url.contains("left=16384"));
        assert!(url.contains("compact=1"));
        assert!(url.contains("numwant=500"));
    }

    #[test]
    fn announce_url_extends_existing_queries() {
        let mut torrent = test_torrent();
        torrent.announce = String::from("http://tracker.example/announce?key=abc");

        let url = announce_url(&torrent, 50).unwrap();
        assert!(url.starts_with("http://tracker.example/announce?key=abc&info_hash="));
    }

    #[test]
    fn rejects_invalid_announce_urls() {
        let mut torrent = test_torrent();
        torrent.announce = String::from("not a url");
        assert!(announce_url(&torrent, 50).is_err());
    }

    #[test]
    fn decodes_peer_lists() {
        let body = b"d8:completei3e10:incompletei7e8:intervali1800e5:peers12:\x7f\x00\x00\x01\x1a\xe1\x7f\x00\x00\x01\x1a\xe2e";
        let response: TrackerResponse = bencode::from_bytes(body).unwrap();
        let peers = parse_response(response).unwrap();

        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].to_string(), "127.0.0.1:6881");
        assert_eq!(peers[1].to_string(), "127.0.0.1:6882");
    }

    #[test]
    fn surfaces_tracker_failures() {
        let body = b"d14:failure reason12:unregisterede";
        let response: TrackerResponse = bencode::from_bytes(body).unwrap();

        let err = parse_response(response).unwrap_err();
        assert!(err.to_string().contains("unregistered"));
    }

    #[test]
    fn rejects_malformed_peer_lists() {
        let body = b"d5:peers5:\x7f\x00\x00\x01\x1ae";
        let response: TrackerResponse = bencode::from_bytes(body).unwrap();
        assert!(parse_response(response).is_err());
    }

    #[test]
    fn percent_encoding_covers_all_bytes() {
        assert_eq!(percent_encode_binary(&[0x00, 0x7f, 0xff]), "%00%7F%FF");
        assert_eq!(percent_encode_binary(b"abc"), "%61%62%63");
    }
}
