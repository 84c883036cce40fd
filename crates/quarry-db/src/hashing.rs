// crates/quarry-db/src/hashing.rs
// ============================================================================
// Module: Quarry Content Hashing
// Description: SHA-256 digests of database files and names.
// Purpose: Fingerprint immutable databases and derive stable display colors.
// Dependencies: sha2
// ============================================================================

//! ## Overview
//! File hashes are computed in fixed 1 MiB blocks so large databases never
//! need to fit in memory. Digests are rendered as lowercase hex.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::Digest;
use sha2::Sha256;

use crate::error::DatabaseError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Read block size used while hashing files.
pub const HASH_BLOCK_SIZE: usize = 1024 * 1024;

// ============================================================================
// SECTION: Hashing
// ============================================================================

/// Returns the SHA-256 hex digest of a file's content.
///
/// # Errors
///
/// Returns [`DatabaseError::Io`] when the file cannot be read.
pub fn hash_file(path: &Path) -> Result<String, DatabaseError> {
    let mut file = File::open(path)
        .map_err(|err| DatabaseError::Io(format!("{}: {err}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut block = vec![0_u8; HASH_BLOCK_SIZE];
    loop {
        let read = file
            .read(&mut block)
            .map_err(|err| DatabaseError::Io(format!("{}: {err}", path.display())))?;
        if read == 0 {
            break;
        }
        hasher.update(&block[.. read]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

/// Returns the SHA-256 hex digest of `bytes`.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex_encode(&Sha256::digest(bytes))
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}
