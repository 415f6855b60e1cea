use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use chacha20poly1305::ChaCha20Poly1305;

/// All supported AEADs use a 96-bit nonce and a 128-bit tag.
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

// The aes-gcm crate only aliases the 128 and 256 bit variants.
type Aes192Gcm = AesGcm<Aes192, U12>;

/// The AEAD algorithms a connection can be configured with, keyed by the
/// exact lowercase names used in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cipher {
    Chacha20Poly1305,
    Aes256Gcm,
    Aes192Gcm,
    Aes128Gcm,
}

impl Cipher {
    pub fn from_name(name: &str) -> std::io::Result<Self> {
        match name {
            "chacha20-poly1305" => Ok(Cipher::Chacha20Poly1305),
            "aes-256-gcm" => Ok(Cipher::Aes256Gcm),
            "aes-192-gcm" => Ok(Cipher::Aes192Gcm),
            "aes-128-gcm" => Ok(Cipher::Aes128Gcm),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unsupported encryption algorithm: {}", name),
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Cipher::Chacha20Poly1305 => "chacha20-poly1305",
            Cipher::Aes256Gcm => "aes-256-gcm",
            Cipher::Aes192Gcm => "aes-192-gcm",
            Cipher::Aes128Gcm => "aes-128-gcm",
        }
    }

    pub fn key_len(&self) -> usize {
        match self {
            Cipher::Chacha20Poly1305 | Cipher::Aes256Gcm => 32,
            Cipher::Aes192Gcm => 24,
            Cipher::Aes128Gcm => 16,
        }
    }

    /// The password doubles as the AEAD key, so its length must match the
    /// algorithm's key size exactly.
    pub fn validate_password(&self, password: &[u8]) -> std::io::Result<()> {
        if password.len() != self.key_len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "{} requires a {}-byte password, got {} bytes",
                    self.name(),
                    self.key_len(),
                    password.len()
                ),
            ));
        }
        Ok(())
    }

    pub fn new_aead(&self, key: &[u8]) -> std::io::Result<AeadCipher> {
        self.validate_password(key)?;
        let aead = match self {
            Cipher::Chacha20Poly1305 => {
                AeadCipher::Chacha20Poly1305(ChaCha20Poly1305::new_from_slice(key).unwrap())
            }
            Cipher::Aes256Gcm => AeadCipher::Aes256Gcm(Aes256Gcm::new_from_slice(key).unwrap()),
            Cipher::Aes192Gcm => AeadCipher::Aes192Gcm(Aes192Gcm::new_from_slice(key).unwrap()),
            Cipher::Aes128Gcm => AeadCipher::Aes128Gcm(Aes128Gcm::new_from_slice(key).unwrap()),
        };
        Ok(aead)
    }
}

/// A keyed AEAD instance used to seal and open records.
pub enum AeadCipher {
    Chacha20Poly1305(ChaCha20Poly1305),
    Aes256Gcm(Aes256Gcm),
    Aes192Gcm(Aes192Gcm),
    Aes128Gcm(Aes128Gcm),
}

impl AeadCipher {
    /// Encrypts `plaintext`, returning ciphertext with the tag appended.
    pub fn seal(&self, nonce: &[u8], plaintext: &[u8]) -> std::io::Result<Vec<u8>> {
        let nonce = Nonce::from_slice(nonce);
        let result = match self {
            AeadCipher::Chacha20Poly1305(cipher) => cipher.encrypt(nonce, plaintext),
            AeadCipher::Aes256Gcm(cipher) => cipher.encrypt(nonce, plaintext),
            AeadCipher::Aes192Gcm(cipher) => cipher.encrypt(nonce, plaintext),
            AeadCipher::Aes128Gcm(cipher) => cipher.encrypt(nonce, plaintext),
        };
        result.map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "encryption failed"))
    }

    /// Decrypts and authenticates `ciphertext` (tag included).
    pub fn open(&self, nonce: &[u8], ciphertext: &[u8]) -> std::io::Result<Vec<u8>> {
        let nonce = Nonce::from_slice(nonce);
        let result = match self {
            AeadCipher::Chacha20Poly1305(cipher) => cipher.decrypt(nonce, ciphertext),
            AeadCipher::Aes256Gcm(cipher) => cipher.decrypt(nonce, ciphertext),
            AeadCipher::Aes192Gcm(cipher) => cipher.decrypt(nonce, ciphertext),
            AeadCipher::Aes128Gcm(cipher) => cipher.decrypt(nonce, ciphertext),
        };
        result.map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "decryption failed")
        })
    }
}

impl std::fmt::Debug for AeadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AeadCipher::Chacha20Poly1305(_) => "chacha20-poly1305",
            AeadCipher::Aes256Gcm(_) => "aes-256-gcm",
            AeadCipher::Aes192Gcm(_) => "aes-192-gcm",
            AeadCipher::Aes128Gcm(_) => "aes-128-gcm",
        };
        f.debug_tuple("AeadCipher").field(&name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cipher_names() {
        for name in [
            "chacha20-poly1305",
            "aes-256-gcm",
            "aes-192-gcm",
            "aes-128-gcm",
        ] {
            let cipher = Cipher::from_name(name).unwrap();
            assert_eq!(cipher.name(), name);
        }
        assert!(Cipher::from_name("aes-512-gcm").is_err());
        assert!(Cipher::from_name("AES-256-GCM").is_err());
    }

    #[test]
    fn test_key_lengths() {
        assert_eq!(Cipher::Chacha20Poly1305.key_len(), 32);
        assert_eq!(Cipher::Aes256Gcm.key_len(), 32);
        assert_eq!(Cipher::Aes192Gcm.key_len(), 24);
        assert_eq!(Cipher::Aes128Gcm.key_len(), 16);
    }

    #[test]
    fn test_password_length_validation() {
        assert!(Cipher::Aes128Gcm.validate_password(&[0u8; 16]).is_ok());
        assert!(Cipher::Aes128Gcm.validate_password(&[0u8; 32]).is_err());
        assert!(Cipher::Aes192Gcm.validate_password(&[0u8; 24]).is_ok());
        assert!(Cipher::Chacha20Poly1305.validate_password(b"short").is_err());
    }

    #[test]
    fn test_seal_open_round_trip_all_algorithms() {
        for cipher in [
            Cipher::Chacha20Poly1305,
            Cipher::Aes256Gcm,
            Cipher::Aes192Gcm,
            Cipher::Aes128Gcm,
        ] {
            let key = vec![0x42u8; cipher.key_len()];
            let aead = cipher.new_aead(&key).unwrap();
            let nonce = [7u8; NONCE_LEN];
            let sealed = aead.seal(&nonce, b"attack at dawn").unwrap();
            assert_eq!(sealed.len(), b"attack at dawn".len() + TAG_LEN);
            let opened = aead.open(&nonce, &sealed).unwrap();
            assert_eq!(opened, b"attack at dawn");
        }
    }

    #[test]
    fn test_open_fails_on_tampered_ciphertext() {
        let aead = Cipher::Aes256Gcm.new_aead(&[0x42u8; 32]).unwrap();
        let nonce = [7u8; NONCE_LEN];
        let mut sealed = aead.seal(&nonce, b"payload").unwrap();
        sealed[0] ^= 0x01;
        assert!(aead.open(&nonce, &sealed).is_err());
    }
}
