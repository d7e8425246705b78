use std::time::SystemTime;

/// Returns the current unix timestamp in milliseconds.
#[inline]
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Closed timelike curve, reality compromised")
        .as_millis() as u64
}

/// Splits a millisecond timestamp into two wire words, high word first.
#[inline]
pub fn split_millis(ts: u64) -> (u32, u32) {
    ((ts >> 32) as u32, ts as u32)
}

/// Reassembles a millisecond timestamp from two wire words.
#[inline]
pub fn join_millis(hi: u32, lo: u32) -> u64 {
    (u64::from(hi) << 32) | u64::from(lo)
}
