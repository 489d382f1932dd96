//! Wire frame assembly and parsing.
//!
//! Every exchange starts with the 2-byte command word and its 16-bit CRC.
//! Data frames append one 8-byte block per addressed node: a 6-byte register
//! payload followed by the packed data CRC field. Writes broadcast one
//! payload to every node; reads clock dummy blocks out and receive the real
//! data back in the same slots, MSB-first.

use crate::constants::{COMMAND_FRAME_SIZE, NODE_BLOCK_SIZE, REGISTER_SIZE_BYTES};
use crate::crc;
use crate::error::BmsError;

/// One 6-byte register payload.
pub type RegisterBlock = [u8; REGISTER_SIZE_BYTES];

/// Total frame length for a data exchange with `node_count` nodes.
pub(crate) fn frame_len(node_count: usize) -> usize {
    COMMAND_FRAME_SIZE + node_count * NODE_BLOCK_SIZE
}

/// Build the 4-byte command header: command word plus command CRC.
pub(crate) fn command_frame(cmd: u16) -> [u8; COMMAND_FRAME_SIZE] {
    let word = cmd.to_be_bytes();
    let crc = crc::compute_command_crc(&word).to_be_bytes();
    [word[0], word[1], crc[0], crc[1]]
}

/// Build a write frame broadcasting `payload` to `node_count` nodes.
///
/// Outbound blocks embed counter zero; the counter field only carries
/// meaning on replies.
pub(crate) fn write_frame(cmd: u16, payload: &RegisterBlock, node_count: usize) -> Vec<u8> {
    let mut frame = Vec::with_capacity(frame_len(node_count));
    frame.extend_from_slice(&command_frame(cmd));
    let field = crc::pack_data_crc(crc::compute_data_crc(payload, 0), 0);
    for _ in 0..node_count {
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&field.to_be_bytes());
    }
    frame
}

/// Build a read frame: command header followed by dummy blocks that clock
/// the nodes' reply data through the chain.
pub(crate) fn read_frame(cmd: u16, node_count: usize) -> Vec<u8> {
    let mut frame = vec![0u8; frame_len(node_count)];
    frame[..COMMAND_FRAME_SIZE].copy_from_slice(&command_frame(cmd));
    frame
}

/// Parse the reply of an `node_count`-node read exchange.
///
/// Validates each slot's data CRC against the counter the sender embedded
/// and returns `(payload, counter)` pairs in chain order. Port B sees the
/// ring from the far end, so its slots arrive reversed and `reverse` flips
/// them back. A single bad slot fails the whole call: once framing is
/// suspect, no slot boundary can be trusted.
pub(crate) fn parse_read_frame(
    rx: &[u8],
    node_count: usize,
    reverse: bool,
) -> Result<Vec<(RegisterBlock, u8)>, BmsError> {
    debug_assert_eq!(rx.len(), frame_len(node_count));
    let mut slots = Vec::with_capacity(node_count);
    for slot in 0..node_count {
        let start = COMMAND_FRAME_SIZE + slot * NODE_BLOCK_SIZE;
        let mut payload = [0u8; REGISTER_SIZE_BYTES];
        payload.copy_from_slice(&rx[start..start + REGISTER_SIZE_BYTES]);
        let field = u16::from_be_bytes([
            rx[start + REGISTER_SIZE_BYTES],
            rx[start + REGISTER_SIZE_BYTES + 1],
        ]);
        if !crc::validate_data_field(&payload, field) {
            log::warn!("data CRC mismatch in slot {slot} of {node_count}-node read");
            return Err(BmsError::Crc);
        }
        slots.push((payload, crc::extract_counter(field)));
    }
    if reverse {
        slots.reverse();
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc;

    fn reply_frame(payloads: &[(RegisterBlock, u8)]) -> Vec<u8> {
        let mut rx = vec![0u8; frame_len(payloads.len())];
        for (slot, (payload, counter)) in payloads.iter().enumerate() {
            let start = COMMAND_FRAME_SIZE + slot * NODE_BLOCK_SIZE;
            rx[start..start + REGISTER_SIZE_BYTES].copy_from_slice(payload);
            let field = crc::pack_data_crc(crc::compute_data_crc(payload, *counter), *counter);
            rx[start + REGISTER_SIZE_BYTES..start + NODE_BLOCK_SIZE]
                .copy_from_slice(&field.to_be_bytes());
        }
        rx
    }

    #[test]
    fn command_frame_layout() {
        let frame = command_frame(0x0360);
        assert_eq!(&frame[..2], &[0x03, 0x60]);
        let crc = crc::compute_command_crc(&[0x03, 0x60]).to_be_bytes();
        assert_eq!(&frame[2..], &crc);
    }

    #[test]
    fn write_frame_broadcasts_payload() {
        let payload = [1, 2, 3, 4, 5, 6];
        let frame = write_frame(0x0001, &payload, 3);
        assert_eq!(frame.len(), frame_len(3));
        for slot in 0..3 {
            let start = COMMAND_FRAME_SIZE + slot * NODE_BLOCK_SIZE;
            assert_eq!(&frame[start..start + REGISTER_SIZE_BYTES], &payload);
        }
    }

    #[test]
    fn parse_returns_slots_in_chain_order() {
        let blocks = [([0x0A; 6], 3), ([0x0B; 6], 3), ([0x0C; 6], 3)];
        let rx = reply_frame(&blocks);

        let forward = parse_read_frame(&rx, 3, false).unwrap();
        assert_eq!(forward[0].0, [0x0A; 6]);
        assert_eq!(forward[2].0, [0x0C; 6]);

        // Port B slot order: nearest node first, so chain order is reversed.
        let reversed = parse_read_frame(&rx, 3, true).unwrap();
        assert_eq!(reversed[0].0, [0x0C; 6]);
        assert_eq!(reversed[2].0, [0x0A; 6]);
    }

    #[test]
    fn parse_preserves_per_slot_counters() {
        let blocks = [([0x11; 6], 7), ([0x22; 6], 8)];
        let rx = reply_frame(&blocks);
        let slots = parse_read_frame(&rx, 2, false).unwrap();
        assert_eq!(slots[0].1, 7);
        assert_eq!(slots[1].1, 8);
    }

    #[test]
    fn corrupt_slot_fails_the_whole_parse() {
        let blocks = [([0x0A; 6], 1), ([0x0B; 6], 1)];
        let mut rx = reply_frame(&blocks);
        rx[COMMAND_FRAME_SIZE + NODE_BLOCK_SIZE] ^= 0x01;
        assert!(matches!(
            parse_read_frame(&rx, 2, false),
            Err(BmsError::Crc)
        ));
    }
}
