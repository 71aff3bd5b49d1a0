//! Register <-> byte buffer conversion.
//!
//! Memory is little endian. Loads narrower than a register are zero- or
//! sign-extended into the full register width.

use super::constants::REGISTER_WIDTH;
use super::error::{SimError, SimResult};

fn check_size(size: usize) -> SimResult<()> {
    if size == 0 || size > REGISTER_WIDTH {
        return Err(SimError::invalid(format!(
            "memory operation of {size} bytes does not fit a {REGISTER_WIDTH}-byte register"
        )));
    }
    Ok(())
}

/// Serializes the low `size` bytes of `value` into a little-endian buffer.
pub fn serialize_register(value: u64, size: usize) -> SimResult<Vec<u8>> {
    check_size(size)?;
    Ok(value.to_le_bytes()[..size].to_vec())
}

/// Reads a little-endian value of `bytes.len()` bytes, zero-extended.
pub fn unserialize_register(bytes: &[u8]) -> SimResult<u64> {
    check_size(bytes.len())?;
    let mut raw = [0u8; REGISTER_WIDTH];
    raw[..bytes.len()].copy_from_slice(bytes);
    Ok(u64::from_le_bytes(raw))
}

/// Sign-extends the low `size` bytes of `value` to the full register width.
///
/// The shift is `(REGISTER_WIDTH - size) * 8` bits.
pub fn sign_extend(value: u64, size: usize) -> SimResult<u64> {
    check_size(size)?;
    let shift = (REGISTER_WIDTH - size) * 8;
    Ok((((value << shift) as i64) >> shift) as u64)
}
