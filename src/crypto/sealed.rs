use rand::RngCore;

use crate::nonce_cache::NonceCache;

use super::cipher::{Cipher, NONCE_LEN, TAG_LEN};

pub const SEALED_NONCE_LEN: usize = NONCE_LEN;
pub const SEALED_TAG_LEN: usize = TAG_LEN;
pub const INIT_PASSWORD_LEN: usize = 32;

/// Seals a standalone blob under AES-256-GCM with a random single-use nonce,
/// producing `nonce | ciphertext | tag`. Used only for the initial greeting,
/// keyed by the shared init-password.
pub fn seal(
    plaintext: &[u8],
    key: &[u8; INIT_PASSWORD_LEN],
    nonce_cache: &NonceCache,
) -> std::io::Result<Vec<u8>> {
    let aead = Cipher::Aes256Gcm.new_aead(key)?;

    let mut nonce = [0u8; SEALED_NONCE_LEN];
    let mut rng = rand::thread_rng();
    loop {
        rng.fill_bytes(&mut nonce);
        if nonce_cache.try_insert(&nonce) {
            break;
        }
    }

    let ciphertext = aead.seal(&nonce, plaintext)?;
    let mut blob = Vec::with_capacity(SEALED_NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Opens a sealed blob, rejecting previously observed nonces before touching
/// the ciphertext.
pub fn open_sealed(
    blob: &[u8],
    key: &[u8; INIT_PASSWORD_LEN],
    nonce_cache: &NonceCache,
) -> std::io::Result<Vec<u8>> {
    if blob.len() <= SEALED_NONCE_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "ciphertext too short",
        ));
    }

    let (nonce, ciphertext) = blob.split_at(SEALED_NONCE_LEN);
    if !nonce_cache.try_insert(nonce) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "duplicate nonce in sealed blob, possible replay attack",
        ));
    }

    let aead = Cipher::Aes256Gcm.new_aead(key)?;
    aead.open(nonce, ciphertext).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "sealed blob decrypt failed")
    })
}
