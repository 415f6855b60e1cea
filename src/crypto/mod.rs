mod cipher;
mod sealed;

pub use cipher::{AeadCipher, Cipher, NONCE_LEN, TAG_LEN};
pub use sealed::{open_sealed, seal, INIT_PASSWORD_LEN, SEALED_NONCE_LEN, SEALED_TAG_LEN};
