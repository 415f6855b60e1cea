use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::address::{read_location, write_location_to_vec, NetLocation};
use crate::crypto::{SEALED_NONCE_LEN, SEALED_TAG_LEN};

pub const VERSION: u8 = 1;

pub const CMD_CONNECT: u8 = 1;
pub const CMD_BIND: u8 = 2;
pub const CMD_UDP: u8 = 3;

pub const STATUS_SUCCESS: u8 = 0;
pub const STATUS_FAILED: u8 = 1;

pub const HASH_LEN: usize = 32;

/// Cleartext greeting size: version, command, and the account hash.
pub const GREETING_LEN: usize = 2 + HASH_LEN;

/// Greeting size on the wire after sealing.
pub const SEALED_GREETING_LEN: usize = SEALED_NONCE_LEN + GREETING_LEN + SEALED_TAG_LEN;

/// The stable per-user identifier: SHA-256 of username concatenated with
/// password. Keys the server's credential map and identifies the client in
/// the greeting.
pub fn account_hash(username: &str, password: &str) -> [u8; HASH_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

/// The 34-byte opening message carried inside the sealed blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GreetingHeader {
    pub version: u8,
    pub cmd: u8,
    pub hash: [u8; HASH_LEN],
}

impl GreetingHeader {
    pub fn new(hash: [u8; HASH_LEN]) -> Self {
        Self {
            version: VERSION,
            cmd: CMD_CONNECT,
            hash,
        }
    }

    pub fn encode(&self) -> [u8; GREETING_LEN] {
        let mut bytes = [0u8; GREETING_LEN];
        bytes[0] = self.version;
        bytes[1] = self.cmd;
        bytes[2..].copy_from_slice(&self.hash);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> std::io::Result<Self> {
        if bytes.len() != GREETING_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid greeting length: {}", bytes.len()),
            ));
        }
        if bytes[0] != VERSION {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unsupported protocol version: {}", bytes[0]),
            ));
        }
        match bytes[1] {
            CMD_CONNECT => {}
            CMD_BIND | CMD_UDP => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("unsupported command: {}", bytes[1]),
                ));
            }
            cmd => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("invalid command: {}", cmd),
                ));
            }
        }
        let mut hash = [0u8; HASH_LEN];
        hash.copy_from_slice(&bytes[2..]);
        Ok(Self {
            version: bytes[0],
            cmd: bytes[1],
            hash,
        })
    }
}

/// The server's reply to a request: version, status, and the bound address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyHeader {
    pub version: u8,
    pub status: u8,
    pub bind: NetLocation,
}

impl ReplyHeader {
    pub fn success(bind: NetLocation) -> Self {
        Self {
            version: VERSION,
            status: STATUS_SUCCESS,
            bind,
        }
    }

    pub fn encode(&self) -> std::io::Result<Vec<u8>> {
        let mut bytes = vec![self.version, self.status];
        write_location_to_vec(&self.bind, &mut bytes)?;
        Ok(bytes)
    }

    pub async fn read<R>(stream: &mut R) -> std::io::Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut head = [0u8; 2];
        stream.read_exact(&mut head).await?;
        if head[0] != VERSION {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unsupported protocol version in reply: {}", head[0]),
            ));
        }
        if head[1] != STATUS_SUCCESS {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("request rejected by server: status {}", head[1]),
            ));
        }
        let bind = read_location(stream).await?;
        Ok(Self {
            version: head[0],
            status: head[1],
            bind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use std::net::Ipv4Addr;

    #[test]
    fn test_account_hash_matches_concatenation() {
        let expected: [u8; 32] = Sha256::digest(b"uaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").into();
        assert_eq!(
            account_hash("u", "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
            expected
        );
        assert_ne!(account_hash("u", "a"), account_hash("ua", ""));
    }

    #[test]
    fn test_greeting_round_trip() {
        let greeting = GreetingHeader::new(account_hash("u", "p"));
        let encoded = greeting.encode();
        assert_eq!(encoded.len(), GREETING_LEN);
        let decoded = GreetingHeader::decode(&encoded).unwrap();
        assert_eq!(decoded, greeting);
        assert_eq!(decoded.encode(), encoded);
    }

    #[test]
    fn test_greeting_rejects_bad_fields() {
        let mut encoded = GreetingHeader::new([7u8; HASH_LEN]).encode();
        encoded[0] = 2;
        assert!(GreetingHeader::decode(&encoded).is_err());

        let mut encoded = GreetingHeader::new([7u8; HASH_LEN]).encode();
        encoded[1] = CMD_BIND;
        let err = GreetingHeader::decode(&encoded).unwrap_err();
        assert!(err.to_string().contains("unsupported command"));

        let mut encoded = GreetingHeader::new([7u8; HASH_LEN]).encode();
        encoded[1] = CMD_UDP;
        assert!(GreetingHeader::decode(&encoded).is_err());

        assert!(GreetingHeader::decode(&[VERSION, CMD_CONNECT]).is_err());
    }

    #[tokio::test]
    async fn test_reply_round_trip() {
        let reply = ReplyHeader::success(NetLocation::new(
            Address::Ipv4(Ipv4Addr::new(93, 184, 216, 34)),
            80,
        ));
        let encoded = reply.encode().unwrap();
        let mut cursor = std::io::Cursor::new(encoded.clone());
        let decoded = ReplyHeader::read(&mut cursor).await.unwrap();
        assert_eq!(decoded, reply);
        assert_eq!(decoded.encode().unwrap(), encoded);
    }

    #[tokio::test]
    async fn test_reply_failure_status_rejected() {
        let encoded = vec![VERSION, STATUS_FAILED, 0x01, 0, 0, 0, 0, 0, 0];
        let mut cursor = std::io::Cursor::new(encoded);
        let err = ReplyHeader::read(&mut cursor).await.unwrap_err();
        assert!(err.to_string().contains("rejected"));
    }
}
