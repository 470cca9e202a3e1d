/// 16-bit Internet checksum (RFC 1071) over `data`.
///
/// Words are read big-endian; an odd trailing byte is padded with a zero low
/// byte. The folded one's-complement sum is complemented before returning.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);

    for chunk in &mut chunks {
        let value = u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        sum = sum.wrapping_add(value);
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    if let Some(&byte) = chunks.remainder().first() {
        sum = sum.wrapping_add((byte as u32) << 8);
    }

    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Checksum carried in the header for `payload`: empty payloads carry 0.
pub fn payload_checksum(payload: &[u8]) -> u16 {
    if payload.is_empty() {
        0
    } else {
        internet_checksum(payload)
    }
}
