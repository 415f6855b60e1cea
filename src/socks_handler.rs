use rustc_hash::FxHashMap;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::address::{read_location, NetLocation};
use crate::async_stream::AsyncStream;

pub const VER_SOCKS5: u8 = 0x05;
pub const VER_AUTH: u8 = 0x01;

pub const METHOD_NONE: u8 = 0x00;
pub const METHOD_USERNAME: u8 = 0x02;
pub const METHOD_INVALID: u8 = 0xff;

pub const RESULT_SUCCESS: u8 = 0x00;
pub const RESULT_FAILURE: u8 = 0x01;

pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

pub struct Socks5SetupResult {
    pub stream: Box<dyn AsyncStream>,
    pub remote_location: NetLocation,
}

/// Server-role SOCKS5 state machine: greeting and method selection, optional
/// RFC 1929 username/password sub-negotiation, and a CONNECT request whose
/// destination is handed back unresolved.
pub struct Socks5ServerHandler {
    credentials: Option<FxHashMap<String, String>>,
}

impl Socks5ServerHandler {
    pub fn new(credentials: Option<FxHashMap<String, String>>) -> Self {
        Self { credentials }
    }

    pub async fn setup_server_stream(
        &self,
        mut stream: Box<dyn AsyncStream>,
    ) -> std::io::Result<Socks5SetupResult> {
        let mut data = [0u8; 2];
        stream.read_exact(&mut data).await?;

        if data[0] != VER_SOCKS5 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unsupported SOCKS version: {}", data[0]),
            ));
        }

        let method_len = data[1] as usize;
        if method_len < 1 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid method count: {}", method_len),
            ));
        }

        let mut methods = vec![0u8; method_len];
        stream.read_exact(&mut methods).await?;

        let selected_method = self.select_method(&methods);
        if selected_method == METHOD_INVALID {
            stream.write_all(&[VER_SOCKS5, METHOD_INVALID]).await?;
            stream.flush().await?;
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("no acceptable SOCKS method, client sent {:?}", methods),
            ));
        }

        stream.write_all(&[VER_SOCKS5, selected_method]).await?;

        if selected_method == METHOD_USERNAME {
            self.negotiate_user_password(&mut stream).await?;
        }

        let mut connection_request = [0u8; 3];
        stream.read_exact(&mut connection_request).await?;
        if connection_request[0] != VER_SOCKS5 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unsupported SOCKS version: {}", connection_request[0]),
            ));
        }

        match connection_request[1] {
            CMD_CONNECT => {}
            CMD_BIND | CMD_UDP_ASSOCIATE => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("unsupported SOCKS command: {}", connection_request[1]),
                ));
            }
            cmd => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("invalid SOCKS command: {}", cmd),
                ));
            }
        }

        if connection_request[2] != 0x0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "invalid reserved byte",
            ));
        }

        let remote_location = read_location(&mut stream).await?;

        // Reply success with a dummy bound address before the upstream dial
        // has happened. If the dial fails later the connection is simply
        // closed, with no further SOCKS reply.
        stream
            .write_all(&[
                VER_SOCKS5,
                RESULT_SUCCESS,
                0x0, // reserved
                0x01,
                0,
                0,
                0,
                0, // 0.0.0.0
                0,
                0, // port 0
            ])
            .await?;
        stream.flush().await?;

        Ok(Socks5SetupResult {
            stream,
            remote_location,
        })
    }

    fn select_method(&self, methods: &[u8]) -> u8 {
        let no_auth = methods.contains(&METHOD_NONE);
        let user_pass = methods.contains(&METHOD_USERNAME);

        if self.credentials.is_some() && user_pass {
            METHOD_USERNAME
        } else if self.credentials.is_none() && no_auth {
            METHOD_NONE
        } else {
            METHOD_INVALID
        }
    }

    async fn negotiate_user_password(
        &self,
        stream: &mut Box<dyn AsyncStream>,
    ) -> std::io::Result<()> {
        let mut data = [0u8; 2];
        stream.read_exact(&mut data).await?;
        if data[0] != VER_AUTH {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unsupported SOCKS auth version: {}", data[0]),
            ));
        }

        let username_len = data[1] as usize;
        if username_len == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty SOCKS username",
            ));
        }
        let mut username = vec![0u8; username_len];
        stream.read_exact(&mut username).await?;

        stream.read_exact(&mut data[0..1]).await?;
        let password_len = data[0] as usize;
        if password_len == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty SOCKS password",
            ));
        }
        let mut password = vec![0u8; password_len];
        stream.read_exact(&mut password).await?;

        if !self.check_credentials(&username, &password) {
            stream.write_all(&[VER_AUTH, RESULT_FAILURE]).await?;
            stream.flush().await?;
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "SOCKS authentication failed",
            ));
        }

        stream.write_all(&[VER_AUTH, RESULT_SUCCESS]).await?;
        Ok(())
    }

    fn check_credentials(&self, username: &[u8], password: &[u8]) -> bool {
        let credentials = match self.credentials.as_ref() {
            Some(credentials) => credentials,
            None => return false,
        };
        let username = match std::str::from_utf8(username) {
            Ok(s) => s,
            Err(_) => return false,
        };
        match credentials.get(username) {
            Some(expected) => expected.as_bytes().ct_eq(password).into(),
            None => false,
        }
    }
}
