//! Tunnel name validation and suffix minting.

use rand::Rng;

use crate::error::TunnelError;

/// Alphabet for random name suffixes: lowercase letters plus digits.
const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of the random suffix appended to a base name.
pub const SUFFIX_LEN: usize = 3;

/// Attempts before the minting loop gives up with `NameExhausted`.
pub(crate) const MAX_MINT_ATTEMPTS: usize = 1000;

const MIN_BASE_LEN: usize = 3;
const MAX_BASE_LEN: usize = 32;

/// Validate a tunnel base name (DNS-label-safe character class).
///
/// Also accepts already-minted full names, since the suffix stays within the
/// same character class.
pub fn validate_name(name: &str) -> Result<(), TunnelError> {
    if name.is_empty() {
        return Err(TunnelError::InvalidName("name cannot be empty".to_string()));
    }

    if name.len() < MIN_BASE_LEN {
        return Err(TunnelError::InvalidName(format!(
            "name too short (minimum {} characters)",
            MIN_BASE_LEN
        )));
    }

    // Full names carry "-xxx" on top of the base length cap.
    if name.len() > MAX_BASE_LEN + SUFFIX_LEN + 1 {
        return Err(TunnelError::InvalidName(format!(
            "name too long (maximum {} characters)",
            MAX_BASE_LEN
        )));
    }

    if name.starts_with('-') || name.ends_with('-') {
        return Err(TunnelError::InvalidName(
            "name cannot start or end with hyphen".to_string(),
        ));
    }

    for ch in name.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '-' {
            return Err(TunnelError::InvalidName(format!(
                "name contains invalid character '{}' (only alphanumeric and hyphens allowed)",
                ch
            )));
        }
    }

    Ok(())
}

/// Validate a base name about to be minted (stricter length cap than lookups).
pub fn validate_base_name(name: &str) -> Result<(), TunnelError> {
    validate_name(name)?;

    if name.len() > MAX_BASE_LEN {
        return Err(TunnelError::InvalidName(format!(
            "name too long (maximum {} characters)",
            MAX_BASE_LEN
        )));
    }

    Ok(())
}

/// Generate a random suffix of [`SUFFIX_LEN`] characters.
pub fn random_suffix() -> String {
    let mut rng = rand::rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}
