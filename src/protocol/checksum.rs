//! 16-bit Internet checksum used by the GBN wire format.
//!
//! One's-complement sum with end-around carry over big-endian 16-bit words.
//! Data packets checksum `seq ‖ payload`; ACKs checksum the ack number alone.

/// Compute the one's-complement checksum of `data`.
///
/// An odd trailing byte is treated as the high byte of a final word
/// (padded on the right with zero). The folded sum is bit-inverted so
/// that a region of zeroes does not checksum to zero.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);

    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }

    if let Some(&byte) = words.remainder().first() {
        sum += u32::from(byte) << 8;
    }

    // Fold carries back into the low 16 bits.
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Recompute the checksum of `data` and compare against a stated value.
pub fn verify(data: &[u8], stated: u16) -> bool {
    checksum(data) == stated
}
