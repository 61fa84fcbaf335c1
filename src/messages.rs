//! Wire messages posted at the meeting place. Both are padded to exactly the meeting place's fixed size so their length says nothing.
//!
//! - message 1: `WideBlockCipher(key, dh_public) || random filler`
//! - message 2: `nonce (24) || XChaCha20-Poly1305(shared_key, nonce, len_le32 || payload || random filler)`

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand_core::{CryptoRng, RngCore};

use crate::block::{WideBlockCipher, BLOCK_LENGTH};
use crate::errors::PandaError;

/// NONCE_LENGTH is the cleartext nonce in front of message 2
pub const NONCE_LENGTH: usize = 24;
/// AEAD_OVERHEAD is the Poly1305 tag
pub const AEAD_OVERHEAD: usize = 16;
/// LENGTH_PREFIX is the little-endian u32 in front of the payload
pub const LENGTH_PREFIX: usize = 4;

/// second_message_capacity is how many plaintext bytes fit inside message 2's AEAD, or None if the padding can't hold the framing
fn second_message_capacity(padding: usize) -> Option<usize> {
    padding.checked_sub(NONCE_LENGTH + AEAD_OVERHEAD)
}

/// check_capacity fails if either message would not fit in `padding` bytes with a payload of `payload_len`
pub fn check_capacity(padding: usize, payload_len: usize) -> Result<(), PandaError> {
    if BLOCK_LENGTH > padding {
        return Err(PandaError::TooLarge { needed: BLOCK_LENGTH, padding });
    }
    let needed = NONCE_LENGTH + LENGTH_PREFIX + payload_len + AEAD_OVERHEAD;
    if needed > padding || payload_len > u32::MAX as usize {
        return Err(PandaError::TooLarge { needed, padding });
    }
    Ok(())
}

/// seal_first hides our DH public value and pads it to `padding` bytes
pub fn seal_first<R: RngCore + CryptoRng>(
    rng: &mut R,
    cipher: &WideBlockCipher,
    dh_public: &[u8; BLOCK_LENGTH],
    padding: usize,
) -> Result<Vec<u8>, PandaError> {
    if BLOCK_LENGTH > padding {
        return Err(PandaError::TooLarge { needed: BLOCK_LENGTH, padding });
    }
    let mut message = vec![0u8; padding];
    message[..BLOCK_LENGTH].copy_from_slice(&cipher.encrypt(dh_public));
    rng.try_fill_bytes(&mut message[BLOCK_LENGTH..])?;
    Ok(message)
}

/// open_first recovers the peer's DH public value. With a wrong key this yields an unrelated value, not an error; the mismatch only surfaces when message 2 fails to authenticate.
pub fn open_first(cipher: &WideBlockCipher, reply: &[u8]) -> Result<[u8; BLOCK_LENGTH], PandaError> {
    if reply.len() < BLOCK_LENGTH {
        return Err(PandaError::ReplyTooSmall { len: reply.len(), min: BLOCK_LENGTH });
    }
    let mut encrypted = [0u8; BLOCK_LENGTH];
    encrypted.copy_from_slice(&reply[..BLOCK_LENGTH]);
    Ok(cipher.decrypt(&encrypted))
}

/// seal_second frames, pads and encrypts the payload so the result is exactly `padding` bytes
pub fn seal_second<R: RngCore + CryptoRng>(
    rng: &mut R,
    shared_key: &[u8; 32],
    payload: &[u8],
    padding: usize,
) -> Result<Vec<u8>, PandaError> {
    check_capacity(padding, payload.len())?;
    let capacity = second_message_capacity(padding).unwrap_or(0);

    let mut padded = vec![0u8; capacity];
    padded[..LENGTH_PREFIX].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    padded[LENGTH_PREFIX..LENGTH_PREFIX + payload.len()].copy_from_slice(payload);
    rng.try_fill_bytes(&mut padded[LENGTH_PREFIX + payload.len()..])?;

    let mut nonce = [0u8; NONCE_LENGTH];
    rng.try_fill_bytes(&mut nonce)?;

    let cipher = XChaCha20Poly1305::new(shared_key.into());
    let sealed = cipher
        .encrypt(XNonce::from_slice(&nonce), padded.as_slice())
        .map_err(|_| PandaError::TooLarge { needed: padded.len(), padding })?;

    let mut message = Vec::with_capacity(padding);
    message.extend_from_slice(&nonce);
    message.extend_from_slice(&sealed);
    Ok(message)
}

/// open_second authenticates and unframes the peer's payload. Any authentication failure is final.
pub fn open_second(shared_key: &[u8; 32], reply: &[u8]) -> Result<Vec<u8>, PandaError> {
    if reply.len() < NONCE_LENGTH {
        return Err(PandaError::ReplyTooSmall { len: reply.len(), min: NONCE_LENGTH });
    }
    let (nonce, sealed) = reply.split_at(NONCE_LENGTH);
    let cipher = XChaCha20Poly1305::new(shared_key.into());
    let mut message = cipher
        .decrypt(XNonce::from_slice(nonce), sealed)
        .map_err(|_| PandaError::Authentication)?;

    if message.len() < LENGTH_PREFIX {
        return Err(PandaError::MalformedPayload);
    }
    let mut prefix = [0u8; LENGTH_PREFIX];
    prefix.copy_from_slice(&message[..LENGTH_PREFIX]);
    let claimed = u32::from_le_bytes(prefix) as usize;
    if claimed > message.len() - LENGTH_PREFIX {
        return Err(PandaError::Truncated);
    }
    message.drain(..LENGTH_PREFIX);
    message.truncate(claimed);
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    const PADDING: usize = 256;

    #[test]
    fn first_message_fills_padding() {
        let cipher = WideBlockCipher::new(&[3u8; 32]);
        let public = [5u8; 32];
        let message = seal_first(&mut OsRng, &cipher, &public, PADDING).unwrap();
        assert_eq!(message.len(), PADDING);
        assert_eq!(open_first(&cipher, &message).unwrap(), public);
    }

    #[test]
    fn first_message_needs_room_for_a_block() {
        let cipher = WideBlockCipher::new(&[3u8; 32]);
        assert!(matches!(
            seal_first(&mut OsRng, &cipher, &[0u8; 32], 31),
            Err(PandaError::TooLarge { .. })
        ));
        assert!(matches!(open_first(&cipher, &[0u8; 31]), Err(PandaError::ReplyTooSmall { .. })));
    }

    #[test]
    fn second_message_fills_padding() {
        let key = [8u8; 32];
        let message = seal_second(&mut OsRng, &key, b"contact card", PADDING).unwrap();
        assert_eq!(message.len(), PADDING);
        assert_eq!(open_second(&key, &message).unwrap(), b"contact card");
    }

    #[test]
    fn payload_may_exactly_fill_the_message() {
        let key = [8u8; 32];
        let payload = vec![0xab; PADDING - NONCE_LENGTH - LENGTH_PREFIX - AEAD_OVERHEAD];
        let message = seal_second(&mut OsRng, &key, &payload, PADDING).unwrap();
        assert_eq!(message.len(), PADDING);
        assert_eq!(open_second(&key, &message).unwrap(), payload);
        let too_big = vec![0xab; payload.len() + 1];
        assert!(matches!(check_capacity(PADDING, too_big.len()), Err(PandaError::TooLarge { .. })));
    }

    #[test]
    fn every_flipped_bit_fails_authentication() {
        let key = [8u8; 32];
        let message = seal_second(&mut OsRng, &key, b"hi", 64).unwrap();
        for i in 0..message.len() * 8 {
            let mut tampered = message.clone();
            tampered[i / 8] ^= 1 << (i % 8);
            assert!(matches!(open_second(&key, &tampered), Err(PandaError::Authentication)), "bit {}", i);
        }
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let message = seal_second(&mut OsRng, &[8u8; 32], b"hi", PADDING).unwrap();
        assert!(matches!(open_second(&[9u8; 32], &message), Err(PandaError::Authentication)));
    }

    #[test]
    fn short_reply_is_rejected() {
        assert!(matches!(open_second(&[8u8; 32], &[0u8; 10]), Err(PandaError::ReplyTooSmall { .. })));
    }

    #[test]
    fn over_long_length_claim_is_rejected() {
        let key = [8u8; 32];
        let cipher = XChaCha20Poly1305::new((&key).into());
        let nonce = [1u8; NONCE_LENGTH];
        let mut plain = vec![0u8; 16];
        plain[..4].copy_from_slice(&100u32.to_le_bytes());
        let sealed = cipher.encrypt(XNonce::from_slice(&nonce), plain.as_slice()).unwrap();
        let reply = [nonce.to_vec(), sealed].concat();
        assert!(matches!(open_second(&key, &reply), Err(PandaError::Truncated)));

        let sealed = cipher.encrypt(XNonce::from_slice(&nonce), &[1u8, 2][..]).unwrap();
        let reply = [nonce.to_vec(), sealed].concat();
        assert!(matches!(open_second(&key, &reply), Err(PandaError::MalformedPayload)));
    }
}
