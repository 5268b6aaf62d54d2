//! # Remora BitTorrent Engine
//!
//! The download engine behind the `remora` command-line client: it
//! parses a metainfo document, announces to the HTTP tracker, downloads
//! and verifies every piece over many concurrent peer connections, and
//! hands the pieces to a pluggable store.
//!
//! ## Architecture
//!
//! The engine follows a multi-threaded, channel-driven architecture:
//!
//! - **Coordinator** ([`download`]): queues piece work, spawns one worker
//!   per peer, collects verified results, and decides the outcome
//! - **Workers** ([`worker`]): each owns a single TCP connection and
//!   downloads one piece at a time through a pipelined request window
//! - **Channels**: all coordination happens over crossbeam channels; no
//!   mutable state is shared between threads
//!
//! Supporting cast: the [`bencode`] codec (a serde data format for the
//! binary container used by metainfo files and tracker replies), the
//! [`torrent`] metainfo loader, the [`tracker`] HTTP client, the wire
//! codec ([`handshake`], [`message`]), and the [`store`] that receives
//! completed pieces.

#[macro_use]
extern crate log;

pub mod bencode;
pub mod bitfield;
pub mod client;
pub mod download;
pub mod handshake;
pub mod message;
pub mod peer;
pub mod piece;
pub mod store;
pub mod torrent;
pub mod tracker;
pub mod worker;
