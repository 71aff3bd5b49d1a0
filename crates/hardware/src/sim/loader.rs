//! Memory image loader.
//!
//! This module places raw binary images into simulated memory before a run. It performs:
//! 1. **Binary loading:** Reads an image file from disk into a byte buffer.
//! 2. **Placement:** Writes the bytes at a given address, bypassing timing and coherence.
//! 3. **Argument parsing:** Splits the `FILE@ADDR` form used on the command line.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::common::{MemAddr, SimError, SimResult};
use crate::memory::Memory;

/// Loads a binary file from disk into a byte vector.
///
/// # Arguments
///
/// * `path` - Path to the binary file.
pub fn load_binary(path: impl AsRef<Path>) -> SimResult<Vec<u8>> {
    let path = path.as_ref();
    fs::read(path).map_err(|e| SimError::invalid(format!("could not read {}: {e}", path.display())))
}

/// Loads the image at `path` into `memory` at `addr`.
///
/// Returns the number of bytes written.
pub fn load_image(memory: &mut dyn Memory, path: impl AsRef<Path>, addr: MemAddr) -> SimResult<usize> {
    let path = path.as_ref();
    let bytes = load_binary(path)?;
    if !bytes.is_empty() && !memory.check_address(addr, bytes.len()) {
        return Err(SimError::invalid(format!(
            "image {} ({} bytes) does not fit at {addr}",
            path.display(),
            bytes.len()
        )));
    }
    memory.load(addr, &bytes)?;
    info!(path = %path.display(), %addr, bytes = bytes.len(), "image loaded");
    Ok(bytes.len())
}

/// Parses `FILE@ADDR`, where `ADDR` is decimal or `0x`-prefixed hex.
pub fn parse_image_arg(arg: &str) -> SimResult<(PathBuf, MemAddr)> {
    let (file, addr) = arg
        .rsplit_once('@')
        .ok_or_else(|| SimError::invalid(format!("image argument {arg:?} is not FILE@ADDR")))?;
    let parsed = match addr.strip_prefix("0x").or_else(|| addr.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => addr.parse(),
    };
    let addr = parsed.map_err(|e| SimError::invalid(format!("image address {addr:?}: {e}")))?;
    if file.is_empty() {
        return Err(SimError::invalid(format!("image argument {arg:?} has no file")));
    }
    Ok((PathBuf::from(file), MemAddr(addr)))
}
