//! Wire-format byte conversion helpers
//!
//! Callers must size-check the span before calling; every function indexes the
//! first N bytes of `bytes` directly. Protocol framing in `io::protocol` does the
//! length checks, this layer only converts.

#[inline]
fn take<const N: usize>(bytes: &[u8], big_endian: bool) -> [u8; N] {
    let mut raw = [0u8; N];
    raw.copy_from_slice(&bytes[..N]);
    if big_endian {
        raw.reverse();
    }
    raw
}

#[inline]
pub fn u16_from_bytes(bytes: &[u8], big_endian: bool) -> u16 {
    u16::from_le_bytes(take::<2>(bytes, big_endian))
}

#[inline]
pub fn u32_from_bytes(bytes: &[u8], big_endian: bool) -> u32 {
    u32::from_le_bytes(take::<4>(bytes, big_endian))
}

#[inline]
pub fn u64_from_bytes(bytes: &[u8], big_endian: bool) -> u64 {
    u64::from_le_bytes(take::<8>(bytes, big_endian))
}

#[inline]
pub fn f32_from_bytes(bytes: &[u8], big_endian: bool) -> f32 {
    f32::from_le_bytes(take::<4>(bytes, big_endian))
}

#[inline]
pub fn f64_from_bytes(bytes: &[u8], big_endian: bool) -> f64 {
    f64::from_le_bytes(take::<8>(bytes, big_endian))
}

#[inline]
pub fn u16_to_bytes(value: u16, out: &mut [u8], big_endian: bool) {
    let raw = if big_endian { value.to_be_bytes() } else { value.to_le_bytes() };
    out[..2].copy_from_slice(&raw);
}

#[inline]
pub fn u32_to_bytes(value: u32, out: &mut [u8], big_endian: bool) {
    let raw = if big_endian { value.to_be_bytes() } else { value.to_le_bytes() };
    out[..4].copy_from_slice(&raw);
}

#[inline]
pub fn u64_to_bytes(value: u64, out: &mut [u8], big_endian: bool) {
    let raw = if big_endian { value.to_be_bytes() } else { value.to_le_bytes() };
    out[..8].copy_from_slice(&raw);
}

#[inline]
pub fn f32_to_bytes(value: f32, out: &mut [u8], big_endian: bool) {
    u32_to_bytes(value.to_bits(), out, big_endian);
}

#[inline]
pub fn f64_to_bytes(value: f64, out: &mut [u8], big_endian: bool) {
    u64_to_bytes(value.to_bits(), out, big_endian);
}
