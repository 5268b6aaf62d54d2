//! # Peer Wire Messages
//!
//! Every message after the handshake follows the same frame layout:
//!
//! ```text
//! <length prefix><message ID><payload>
//! ```
//!
//! - **Length prefix**: 4 bytes (big-endian u32) covering ID + payload
//! - **Message ID**: 1 byte
//! - **Payload**: `length - 1` bytes
//!
//! A frame with length 0 is a keep-alive: no ID, no payload. Internally
//! keep-alives are tagged with a sentinel ID so the receive path can hand
//! back a plain `Message`.
//!
//! | ID | Name | Payload |
//! |----|------|---------|
//! | 0 | CHOKE | empty |
//! | 1 | UNCHOKE | empty |
//! | 2 | INTERESTED | empty |
//! | 3 | NOT INTERESTED | empty |
//! | 4 | HAVE | piece index (u32) |
//! | 5 | BITFIELD | raw bitfield bytes |
//! | 6 | REQUEST | index, begin, length (u32 each) |
//! | 7 | PIECE | index, begin, block bytes |
//! | 8 | CANCEL | index, begin, length (u32 each) |

use anyhow::{anyhow, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use std::io::Cursor;

type MessageId = u8;

pub const MESSAGE_CHOKE: MessageId = 0;
pub const MESSAGE_UNCHOKE: MessageId = 1;
pub const MESSAGE_INTERESTED: MessageId = 2;
#[allow(dead_code)]
pub const MESSAGE_NOT_INTERESTED: MessageId = 3;
pub const MESSAGE_HAVE: MessageId = 4;
pub const MESSAGE_BITFIELD: MessageId = 5;
pub const MESSAGE_REQUEST: MessageId = 6;
pub const MESSAGE_PIECE: MessageId = 7;
#[allow(dead_code)]
pub const MESSAGE_CANCEL: MessageId = 8;
/// Sentinel for keep-alive frames (length 0, no ID on the wire).
pub const MESSAGE_KEEPALIVE: MessageId = 255;

/// A peer wire message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type identifier.
    pub id: MessageId,
    /// Message payload data.
    pub payload: Vec<u8>,
}

impl Message {
    /// Builds a message without a payload.
    pub fn new(id: MessageId) -> Message {
        Message {
            id,
            payload: vec![],
        }
    }

    /// Builds a message with a payload.
    pub fn new_with_payload(id: MessageId, payload: Vec<u8>) -> Message {
        Message { id, payload }
    }

    /// Serializes the message with its length prefix.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        // Keep-alives are a bare zero length prefix
        if self.id == MESSAGE_KEEPALIVE {
            return Ok(vec![0; 4]);
        }

        let message_len = 1 + self.payload.len();

        let mut serialized: Vec<u8> = Vec::with_capacity(4 + message_len);
        serialized.write_u32::<BigEndian>(message_len as u32)?;
        serialized.push(self.id);
        serialized.extend_from_slice(&self.payload);

        Ok(serialized)
    }
}

/// Deserializes a message body (everything after the length prefix).
pub fn deserialize_message(message_buf: &[u8]) -> Result<Message> {
    if message_buf.is_empty() {
        return Err(anyhow!("received empty message body from peer"));
    }

    Ok(Message {
        id: message_buf[0],
        payload: message_buf[1..].to_vec(),
    })
}

/// Builds a `REQUEST` message for one block of a piece.
pub fn new_request(index: u32, begin: u32, length: u32) -> Result<Message> {
    let mut payload: Vec<u8> = Vec::with_capacity(12);
    payload.write_u32::<BigEndian>(index)?;
    payload.write_u32::<BigEndian>(begin)?;
    payload.write_u32::<BigEndian>(length)?;

    Ok(Message::new_with_payload(MESSAGE_REQUEST, payload))
}

/// Builds a `HAVE` message for a completed piece.
pub fn new_have(index: u32) -> Result<Message> {
    let mut payload: Vec<u8> = Vec::with_capacity(4);
    payload.write_u32::<BigEndian>(index)?;

    Ok(Message::new_with_payload(MESSAGE_HAVE, payload))
}

/// Parses a `HAVE` message and returns the announced piece index.
pub fn parse_have(message: &Message) -> Result<u32> {
    if message.id != MESSAGE_HAVE {
        return Err(anyhow!("expected HAVE message, received id {}", message.id));
    }

    if message.payload.len() != 4 {
        return Err(anyhow!(
            "HAVE payload must be 4 bytes, received {}",
            message.payload.len()
        ));
    }

    let mut cursor = Cursor::new(&message.payload);
    Ok(cursor.read_u32::<BigEndian>()?)
}

/// Parses a `PIECE` message and copies its block into `buf`.
///
/// The message must carry the expected piece index and the block must fit
/// within the buffer; both come from the remote peer and are not trusted.
/// Returns the number of block bytes copied.
pub fn parse_piece(index: u32, buf: &mut [u8], message: &Message) -> Result<u32> {
    if message.id != MESSAGE_PIECE {
        return Err(anyhow!("expected PIECE message, received id {}", message.id));
    }

    if message.payload.len() < 8 {
        return Err(anyhow!(
            "PIECE payload too short at {} bytes",
            message.payload.len()
        ));
    }

    let mut cursor = Cursor::new(&message.payload[0..8]);
    let received_index = cursor.read_u32::<BigEndian>()?;
    if received_index != index {
        return Err(anyhow!(
            "expected block of piece {}, received piece {}",
            index,
            received_index
        ));
    }

    let begin = cursor.read_u32::<BigEndian>()? as usize;
    let block = &message.payload[8..];

    if begin >= buf.len() {
        return Err(anyhow!("block offset {} outside piece", begin));
    }

    if begin + block.len() > buf.len() {
        return Err(anyhow!("block of {} bytes overflows piece", block.len()));
    }

    buf[begin..begin + block.len()].copy_from_slice(block);
    Ok(block.len() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_every_variant() {
        let messages = vec![
            Message::new(MESSAGE_CHOKE),
            Message::new(MESSAGE_UNCHOKE),
            Message::new(MESSAGE_INTERESTED),
            Message::new(MESSAGE_NOT_INTERESTED),
            new_have(42).unwrap(),
            Message::new_with_payload(MESSAGE_BITFIELD, vec![0b1010_0000, 0x01]),
            new_request(1, 16384, 16384).unwrap(),
            Message::new_with_payload(MESSAGE_PIECE, vec![0, 0, 0, 1, 0, 0, 0, 0, 0xaa]),
            Message::new_with_payload(MESSAGE_CANCEL, vec![0; 12]),
        ];

        for message in messages {
            let serialized = message.serialize().unwrap();
            let parsed = deserialize_message(&serialized[4..]).unwrap();
            assert_eq!(parsed, message);
        }
    }

    #[test]
    fn keepalive_serializes_to_bare_prefix() {
        let serialized = Message::new(MESSAGE_KEEPALIVE).serialize().unwrap();
        assert_eq!(serialized, vec![0, 0, 0, 0]);
    }

    #[test]
    fn length_prefix_counts_id_and_payload() {
        let serialized = new_request(0, 0, 16384).unwrap().serialize().unwrap();
        assert_eq!(serialized.len(), 17);
        assert_eq!(&serialized[0..4], &[0, 0, 0, 13]);
        assert_eq!(serialized[4], MESSAGE_REQUEST);
    }

    #[test]
    fn parse_have_extracts_index() {
        let message = new_have(7).unwrap();
        assert_eq!(parse_have(&message).unwrap(), 7);
    }

    #[test]
    fn parse_have_rejects_bad_payloads() {
        assert!(parse_have(&Message::new(MESSAGE_CHOKE)).is_err());
        assert!(parse_have(&Message::new_with_payload(MESSAGE_HAVE, vec![0; 3])).is_err());
    }

    #[test]
    fn parse_piece_copies_block_at_offset() {
        let mut payload = vec![0, 0, 0, 2, 0, 0, 0, 4];
        payload.extend_from_slice(b"data");
        let message = Message::new_with_payload(MESSAGE_PIECE, payload);

        let mut buf = vec![0u8; 8];
        let n = parse_piece(2, &mut buf, &message).unwrap();

        assert_eq!(n, 4);
        assert_eq!(&buf, b"\x00\x00\x00\x00data");
    }

    #[test]
    fn parse_piece_rejects_wrong_index() {
        let payload = vec![0, 0, 0, 9, 0, 0, 0, 0, 0xff];
        let message = Message::new_with_payload(MESSAGE_PIECE, payload);

        let mut buf = vec![0u8; 8];
        assert!(parse_piece(2, &mut buf, &message).is_err());
    }

    #[test]
    fn parse_piece_rejects_blocks_outside_the_piece() {
        // offset beyond the buffer
        let message =
            Message::new_with_payload(MESSAGE_PIECE, vec![0, 0, 0, 0, 0, 0, 0, 9, 0xff]);
        let mut buf = vec![0u8; 8];
        assert!(parse_piece(0, &mut buf, &message).is_err());

        // block runs past the end of the buffer
        let mut payload = vec![0, 0, 0, 0, 0, 0, 0, 6];
        payload.extend_from_slice(b"abcdef");
        let message = Message::new_with_payload(MESSAGE_PIECE, payload);
        let mut buf = vec![0u8; 8];
        assert!(parse_piece(0, &mut buf, &message).is_err());
    }
}
