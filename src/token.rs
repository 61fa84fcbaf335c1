//! Secret tokens: random, human-typeable strings that carry a checksum so typos are caught before a key exchange is started with them.
//!
//! A token is `<prefix><hex(16 random bytes || first 2 bytes of SHA-256 of them)>`. Strings that don't start with a token prefix are ordinary passphrases and pass through untouched.

use rand_core::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

use crate::errors::PandaError;

/// STRETCH_PREFIX marks a token that is still run through the password stretcher
pub const STRETCH_PREFIX: &str = "r!";
/// STRONG_PREFIX marks a token that is random enough to skip stretching. Accepted on input; only emitted on request, since older peers stretch every secret and would derive different keys.
pub const STRONG_PREFIX: &str = "r[";
/// RANDOM_LENGTH is the number of random bytes in a token
pub const RANDOM_LENGTH: usize = 16;
const CHECKSUM_LENGTH: usize = 2;

fn checksum(random: &[u8]) -> [u8; CHECKSUM_LENGTH] {
    let digest = Sha256::digest(random);
    [digest[0], digest[1]]
}

fn encode<R: RngCore + CryptoRng>(rng: &mut R, prefix: &str) -> Result<String, PandaError> {
    let mut bytes = [0u8; RANDOM_LENGTH + CHECKSUM_LENGTH];
    rng.try_fill_bytes(&mut bytes[..RANDOM_LENGTH])?;
    let sum = checksum(&bytes[..RANDOM_LENGTH]);
    bytes[RANDOM_LENGTH..].copy_from_slice(&sum);
    Ok(prefix.to_string() + &hex::encode(bytes))
}

/// generate draws a fresh token with the stretch-me prefix
pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Result<String, PandaError> {
    encode(rng, STRETCH_PREFIX)
}

/// generate_strong draws a fresh token that tells both sides to skip stretching. Only use it when the peer is known to understand the prefix.
pub fn generate_strong<R: RngCore + CryptoRng>(rng: &mut R) -> Result<String, PandaError> {
    encode(rng, STRONG_PREFIX)
}

fn has_prefix(s: &str) -> bool {
    s.starts_with(STRETCH_PREFIX) || s.starts_with(STRONG_PREFIX)
}

/// validate is true iff `s` has a token prefix, decodes to exactly 18 bytes and the checksum matches
pub fn validate(s: &str) -> bool {
    if !has_prefix(s) {
        return false;
    }
    // both prefixes are two ASCII bytes
    let body = &s[STRETCH_PREFIX.len()..];
    let mut bytes = [0u8; RANDOM_LENGTH + CHECKSUM_LENGTH];
    if hex::decode_to_slice(body, &mut bytes).is_err() {
        return false;
    }
    bytes[RANDOM_LENGTH..] == checksum(&bytes[..RANDOM_LENGTH])
}

/// is_acceptable rejects only strings that look like tokens but fail the checksum
pub fn is_acceptable(s: &str) -> bool {
    !has_prefix(s) || validate(s)
}

/// is_strong is true for a valid token carrying the no-stretch prefix
pub fn is_strong(s: &str) -> bool {
    s.starts_with(STRONG_PREFIX) && validate(s)
}
