/// Internet checksum as described in RFC 1071 section 4.1: the one's complement of the one's
///  complement sum of all 16 bit big-endian words. An odd trailing byte is padded with a zero byte
///  on the right.
///
/// NB: This is a utility for applications; SRUDP's header has no checksum field, relying on
///  UDP's own checksum instead.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut chunks = data.chunks_exact(2);
    let mut sum: u32 = 0;
    for word in &mut chunks {
        sum = fold(sum + u32::from(u16::from_be_bytes([word[0], word[1]])));
    }
    if let [last] = chunks.remainder() {
        sum = fold(sum + (u32::from(*last) << 8));
    }

    !(sum as u16)
}

/// keeps the running sum below 0x10000, so adding another word can not overflow
fn fold(sum: u32) -> u32 {
    (sum & 0xffff) + (sum >> 16)
}
