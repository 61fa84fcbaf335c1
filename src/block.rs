//! A 256-bit block cipher used to hide the first message's DH public value.
//!
//! Four-round Feistel network over two 128-bit halves. The round function is HMAC-SHA256 keyed with the password-derived key over the round number and the right half, truncated to 128 bits. Four rounds with a pseudorandom round function give a strong pseudorandom permutation (Luby-Rackoff).
//!
//! There is no authentication here: no shared key exists yet when the first message is sent.

use hkdf::hmac::{Hmac, Mac};
use sha2::Sha256;

/// BLOCK_LENGTH is 32 bytes, the size of an X25519 public value
pub const BLOCK_LENGTH: usize = 32;
const HALF: usize = BLOCK_LENGTH / 2;
const ROUNDS: u8 = 4;

pub struct WideBlockCipher {
    mac: Hmac<Sha256>,
}

impl WideBlockCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        // HMAC accepts keys of any length
        let mac = match Hmac::<Sha256>::new_from_slice(key) {
            Ok(mac) => mac,
            Err(_) => unreachable!("hmac keys have no length limit"),
        };
        Self { mac }
    }

    fn round(&self, round: u8, half: &[u8]) -> [u8; HALF] {
        let mut mac = self.mac.clone();
        mac.update(&[round]);
        mac.update(half);
        let digest = mac.finalize().into_bytes();
        let mut out = [0u8; HALF];
        out.copy_from_slice(&digest[..HALF]);
        out
    }

    pub fn encrypt(&self, block: &[u8; BLOCK_LENGTH]) -> [u8; BLOCK_LENGTH] {
        let (mut left, mut right) = split(block);
        for r in 0..ROUNDS {
            let f = self.round(r, &right);
            let next = xor(&left, &f);
            left = right;
            right = next;
        }
        join(&left, &right)
    }

    pub fn decrypt(&self, block: &[u8; BLOCK_LENGTH]) -> [u8; BLOCK_LENGTH] {
        let (mut left, mut right) = split(block);
        for r in (0..ROUNDS).rev() {
            let f = self.round(r, &left);
            let prev = xor(&right, &f);
            right = left;
            left = prev;
        }
        join(&left, &right)
    }
}

fn split(block: &[u8; BLOCK_LENGTH]) -> ([u8; HALF], [u8; HALF]) {
    let mut left = [0u8; HALF];
    let mut right = [0u8; HALF];
    left.copy_from_slice(&block[..HALF]);
    right.copy_from_slice(&block[HALF..]);
    (left, right)
}

fn join(left: &[u8; HALF], right: &[u8; HALF]) -> [u8; BLOCK_LENGTH] {
    let mut out = [0u8; BLOCK_LENGTH];
    out[..HALF].copy_from_slice(left);
    out[HALF..].copy_from_slice(right);
    out
}

fn xor(a: &[u8; HALF], b: &[u8; HALF]) -> [u8; HALF] {
    core::array::from_fn(|i| a[i] ^ b[i])
}
