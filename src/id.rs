//! Self-describing unique identifiers.
//!
//! An id is 24 random bytes with the creation time (48-bit Unix milliseconds)
//! scattered over six fixed positions and a 24-bit checksum over three more.
//! The value is encoded to 32 characters of a URL-safe alphabet, so its age can
//! be checked without any lookup.

use rand::{RngCore, rngs::OsRng};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

const RAW_LEN: usize = 24;

/// Length of an encoded id.
pub const ENCODED_LEN: usize = 32;

const ALPHABET: &[u8; 64] = b"_-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

// Least significant byte first.
const TIME_POSITIONS: [usize; 6] = [3, 9, 15, 6, 12, 18];
const CHECKSUM_POSITIONS: [usize; 3] = [11, 20, 0];

const MAX_CLOCK_SKEW_MS: i64 = 1000;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IdError {
    #[error("invalid id encoding")]
    Malformed,
    #[error("invalid time signature")]
    Future,
    #[error("expired time signature")]
    Expired,
    #[error("invalid checksum")]
    Checksum,
}

/// Current Unix time in milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
        })
}

/// Generate a new id stamped with the current time.
#[must_use]
pub fn generate() -> String {
    generate_at(now_millis())
}

fn generate_at(now_ms: i64) -> String {
    let mut raw = [0u8; RAW_LEN];
    OsRng.fill_bytes(&mut raw);

    for (i, pos) in TIME_POSITIONS.iter().enumerate() {
        raw[*pos] = byte_at(now_ms, i);
    }

    let hash = checksum(&raw, now_ms);
    for (i, pos) in CHECKSUM_POSITIONS.iter().enumerate() {
        raw[*pos] = byte_at(i64::from(hash), i);
    }

    encode(&raw)
}

/// Check that `id` was produced by [`generate`] and is no older than `ttl`.
///
/// A zero `ttl` disables the age check.
///
/// # Errors
///
/// Returns [`IdError`] when the id is malformed, stamped in the future, expired,
/// or fails its checksum.
pub fn verify(id: &str, ttl: Duration) -> Result<(), IdError> {
    verify_at(id, ttl, now_millis())
}

/// Same as [`verify`] against an explicit clock reading.
///
/// # Errors
///
/// See [`verify`].
pub fn verify_at(id: &str, ttl: Duration, now_ms: i64) -> Result<(), IdError> {
    let raw = decode(id)?;
    let issued = timestamp(&raw);

    let age = now_ms.saturating_sub(issued);
    if age < -MAX_CLOCK_SKEW_MS {
        return Err(IdError::Future);
    }

    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    if ttl_ms > 0 && age > ttl_ms {
        return Err(IdError::Expired);
    }

    let stored = CHECKSUM_POSITIONS
        .iter()
        .enumerate()
        .fold(0u32, |acc, (i, pos)| acc | (u32::from(raw[*pos]) << (8 * i)));
    if stored != checksum(&raw, issued) {
        return Err(IdError::Checksum);
    }

    Ok(())
}

/// Creation time embedded in `id`, in Unix milliseconds.
///
/// # Errors
///
/// Returns [`IdError::Malformed`] if `id` is not an encoded id.
pub fn issued_at_millis(id: &str) -> Result<i64, IdError> {
    decode(id).map(|raw| timestamp(&raw))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
const fn byte_at(value: i64, index: usize) -> u8 {
    ((value >> (8 * index)) & 0xff) as u8
}

fn timestamp(raw: &[u8; RAW_LEN]) -> i64 {
    TIME_POSITIONS
        .iter()
        .enumerate()
        .fold(0i64, |acc, (i, pos)| acc | (i64::from(raw[*pos]) << (8 * i)))
}

// Bytes are folded as signed values, seeded with the low 32 bits of the timestamp.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
fn checksum(raw: &[u8; RAW_LEN], timestamp: i64) -> u32 {
    let mut hash = timestamp as i32;
    for (i, byte) in raw.iter().enumerate().take(20).skip(1) {
        if i != CHECKSUM_POSITIONS[0] {
            hash = hash.wrapping_mul(47).wrapping_add(i32::from(*byte as i8));
        }
    }
    (hash as u32) & 0x00ff_ffff
}

fn encode(raw: &[u8; RAW_LEN]) -> String {
    let mut out = String::with_capacity(ENCODED_LEN);
    for chunk in raw.chunks_exact(3) {
        let n = (u32::from(chunk[0]) << 16) | (u32::from(chunk[1]) << 8) | u32::from(chunk[2]);
        for shift in [18, 12, 6, 0] {
            out.push(char::from(ALPHABET[((n >> shift) & 0x3f) as usize]));
        }
    }
    out
}

fn decode_symbol(c: u8) -> Option<u32> {
    match c {
        b'_' => Some(0),
        b'-' => Some(1),
        b'0'..=b'9' => Some(u32::from(c - b'0') + 2),
        b'A'..=b'Z' => Some(u32::from(c - b'A') + 12),
        b'a'..=b'z' => Some(u32::from(c - b'a') + 38),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn decode(id: &str) -> Result<[u8; RAW_LEN], IdError> {
    let bytes = id.as_bytes();
    if bytes.len() != ENCODED_LEN {
        return Err(IdError::Malformed);
    }

    let mut raw = [0u8; RAW_LEN];
    for (quad, out) in bytes.chunks_exact(4).zip(raw.chunks_exact_mut(3)) {
        let mut n = 0u32;
        for c in quad {
            n = (n << 6) | decode_symbol(*c).ok_or(IdError::Malformed)?;
        }
        out[0] = (n >> 16) as u8;
        out[1] = (n >> 8) as u8;
        out[2] = n as u8;
    }
    Ok(raw)
}
