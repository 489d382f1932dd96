//! CRC engine for the chain wire protocol.
//!
//! Two independent table-driven CRCs protect every frame:
//!
//! - a 16-bit command CRC over the 2-byte command word, and
//! - a 10-bit data CRC over each 6-byte register payload, with the sender's
//!   6-bit rolling command counter folded into the division and packed into
//!   the top bits of the 2-byte CRC field.
//!
//! The 256-entry tables are derived at compile time by polynomial long
//! division from the generator polynomials, one table step per byte.

/// Seed of the command CRC.
const COMMAND_CRC_SEED: u16 = 0x0020;

/// Generator polynomial of the command CRC.
const COMMAND_CRC_POLY: u16 = 0x8B32;

/// Seed of the data CRC.
const DATA_CRC_SEED: u16 = 0x0010;

/// Generator polynomial of the data CRC.
const DATA_CRC_POLY: u16 = 0x008F;

/// Width mask of the 10-bit data CRC.
const DATA_CRC_MASK: u16 = 0x03FF;

/// Mask of the 6-bit command counter.
const COUNTER_MASK: u16 = 0x003F;

const fn command_crc_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut rem = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            if rem & 0x8000 != 0 {
                rem = (rem << 1) ^ COMMAND_CRC_POLY;
            } else {
                rem <<= 1;
            }
            bit += 1;
        }
        table[i] = rem;
        i += 1;
    }
    table
}

const fn data_crc_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        // Align the byte so its MSB sits at bit 9 of the 10-bit register.
        let mut rem = ((i as u16) << 2) & DATA_CRC_MASK;
        let mut bit = 0;
        while bit < 8 {
            if rem & 0x0200 != 0 {
                rem = ((rem << 1) ^ DATA_CRC_POLY) & DATA_CRC_MASK;
            } else {
                rem = (rem << 1) & DATA_CRC_MASK;
            }
            bit += 1;
        }
        table[i] = rem;
        i += 1;
    }
    table
}

static COMMAND_TABLE: [u16; 256] = command_crc_table();
static DATA_TABLE: [u16; 256] = data_crc_table();

/// Compute the 16-bit command CRC over `bytes`.
pub fn compute_command_crc(bytes: &[u8]) -> u16 {
    let mut crc = COMMAND_CRC_SEED;
    for &b in bytes {
        let idx = ((crc >> 8) ^ b as u16) & 0xFF;
        crc = (crc << 8) ^ COMMAND_TABLE[idx as usize];
    }
    crc
}

/// Compute the 10-bit data CRC over `bytes`, then fold in the 6-bit command
/// counter with one additional table step.
pub fn compute_data_crc(bytes: &[u8], counter: u8) -> u16 {
    let mut crc = DATA_CRC_SEED;
    for &b in bytes {
        let idx = ((crc >> 2) ^ b as u16) & 0xFF;
        crc = ((crc << 8) ^ DATA_TABLE[idx as usize]) & DATA_CRC_MASK;
    }
    // The counter occupies the top 6 bits of the final table step.
    let idx = ((crc >> 2) ^ ((counter as u16 & COUNTER_MASK) << 2)) & 0xFF;
    ((crc << 8) ^ DATA_TABLE[idx as usize]) & DATA_CRC_MASK
}

/// Pack a data CRC and the sender's command counter into the 2-byte wire
/// field: top 6 bits counter, low 10 bits CRC.
pub fn pack_data_crc(crc: u16, counter: u8) -> u16 {
    ((counter as u16 & COUNTER_MASK) << 10) | (crc & DATA_CRC_MASK)
}

/// Extract the sender's 6-bit command counter from the wire field.
///
/// Extraction happens before validation: the CRC must be checked against the
/// counter the sender embedded, not the receiver's expectation.
pub fn extract_counter(field: u16) -> u8 {
    ((field >> 10) & COUNTER_MASK) as u8
}

/// Validate a received payload against its packed CRC field.
pub fn validate_data_field(payload: &[u8], field: u16) -> bool {
    let counter = extract_counter(field);
    compute_data_crc(payload, counter) == (field & DATA_CRC_MASK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn command_crc_is_deterministic() {
        let cmd = [0x03, 0x60];
        assert_eq!(compute_command_crc(&cmd), compute_command_crc(&cmd));
    }

    #[test_case(&[0x00, 0x01]; "verify read")]
    #[test_case(&[0x03, 0x60]; "start adc")]
    #[test_case(&[0x00, 0x2E]; "reset counter")]
    #[test_case(&[0xFF, 0xFF]; "all ones")]
    fn command_crc_detects_single_bit_flips(cmd: &[u8]) {
        let good = compute_command_crc(cmd);
        let mut flipped = [0u8; 2];
        flipped.copy_from_slice(cmd);
        for byte in 0..2 {
            for bit in 0..8 {
                flipped[byte] ^= 1 << bit;
                assert_ne!(
                    compute_command_crc(&flipped),
                    good,
                    "flip of byte {byte} bit {bit} went undetected"
                );
                flipped[byte] ^= 1 << bit;
            }
        }
    }

    #[test_case(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00], 1)]
    #[test_case(&[0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC], 17)]
    #[test_case(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF], 63)]
    fn data_crc_round_trips(payload: &[u8], counter: u8) {
        let field = pack_data_crc(compute_data_crc(payload, counter), counter);
        assert_eq!(extract_counter(field), counter);
        assert!(validate_data_field(payload, field));
    }

    #[test]
    fn data_crc_detects_single_bit_flips() {
        let payload = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC];
        let field = pack_data_crc(compute_data_crc(&payload, 5), 5);
        for byte in 0..payload.len() {
            for bit in 0..8 {
                let mut bad = payload;
                bad[byte] ^= 1 << bit;
                assert!(
                    !validate_data_field(&bad, field),
                    "payload flip byte {byte} bit {bit} went undetected"
                );
            }
        }
        // Flips within the CRC bits of the field must also fail validation.
        for bit in 0..10 {
            assert!(!validate_data_field(&payload, field ^ (1 << bit)));
        }
    }

    #[test]
    fn data_crc_depends_on_counter() {
        let payload = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        assert_ne!(
            compute_data_crc(&payload, 1),
            compute_data_crc(&payload, 2)
        );
    }

    #[test]
    fn counter_flip_in_field_fails_validation() {
        // Corrupting the embedded counter changes which CRC the receiver
        // recomputes, so the field no longer validates.
        let payload = [0xAA, 0x55, 0xAA, 0x55, 0xAA, 0x55];
        let field = pack_data_crc(compute_data_crc(&payload, 9), 9);
        for bit in 10..16 {
            assert!(!validate_data_field(&payload, field ^ (1 << bit)));
        }
    }

    #[test]
    fn zero_table_entries_are_zero() {
        assert_eq!(COMMAND_TABLE[0], 0);
        assert_eq!(DATA_TABLE[0], 0);
    }
}
