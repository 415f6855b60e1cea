use std::path::Path;

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::crypto::{Cipher, INIT_PASSWORD_LEN};
use crate::gordafarid::Credential;

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TimeoutConfig {
    #[serde(rename = "dialTimeout", default = "default_timeout_secs")]
    pub dial_timeout: u64,
    #[serde(rename = "socks5HandshakeTimeout", default = "default_timeout_secs")]
    pub socks5_handshake_timeout: u64,
    #[serde(
        rename = "gordafaridHandshakeTimeout",
        default = "default_timeout_secs"
    )]
    pub gordafarid_handshake_timeout: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            dial_timeout: default_timeout_secs(),
            socks5_handshake_timeout: default_timeout_secs(),
            gordafarid_handshake_timeout: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerSection {
    #[serde(default)]
    pub address: String,
    #[serde(rename = "initPassword", default)]
    pub init_password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientSection {
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Account {
    pub fn to_credential(&self) -> Credential {
        Credential::new(self.username.clone(), self.password.clone())
    }
}

/// Configuration of the local client process: where to listen for SOCKS5,
/// where the remote server is, and the account used to authenticate.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(rename = "cryptoAlgorithm", default)]
    pub crypto_algorithm: String,
    #[serde(default)]
    pub account: Account,
    #[serde(rename = "socks5Credentials", default)]
    pub socks5_credentials: FxHashMap<String, String>,
    #[serde(default)]
    pub timeout: TimeoutConfig,
}

impl ClientConfig {
    pub fn validate(&self) -> std::io::Result<()> {
        let mut missing_fields = Vec::new();
        if self.server.address.is_empty() {
            missing_fields.push("server.address");
        }
        if self.client.address.is_empty() {
            missing_fields.push("client.address");
        }
        if self.crypto_algorithm.is_empty() {
            missing_fields.push("cryptoAlgorithm");
        }
        if self.account.username.is_empty() {
            missing_fields.push("account.username");
        }
        if self.account.password.is_empty() {
            missing_fields.push("account.password");
        }
        if !missing_fields.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("missing fields: {}", missing_fields.join(", ")),
            ));
        }

        let cipher = Cipher::from_name(&self.crypto_algorithm)?;
        cipher.validate_password(self.account.password.as_bytes())?;
        validate_init_password(&self.server.init_password)?;

        Ok(())
    }

    pub fn cipher(&self) -> std::io::Result<Cipher> {
        Cipher::from_name(&self.crypto_algorithm)
    }

    pub fn init_password(&self) -> std::io::Result<[u8; INIT_PASSWORD_LEN]> {
        init_password_bytes(&self.server.init_password)
    }

    pub fn is_socks5_auth_enabled(&self) -> bool {
        !self.socks5_credentials.is_empty()
    }
}

/// Configuration of the remote server process: the listen address, the
/// shared init-password, and the accounts allowed to connect.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(rename = "cryptoAlgorithm", default)]
    pub crypto_algorithm: String,
    #[serde(default)]
    pub credentials: Vec<Account>,
    #[serde(default)]
    pub timeout: TimeoutConfig,
}

impl ServerConfig {
    pub fn validate(&self) -> std::io::Result<()> {
        let mut missing_fields = Vec::new();
        if self.server.address.is_empty() {
            missing_fields.push("server.address");
        }
        if self.crypto_algorithm.is_empty() {
            missing_fields.push("cryptoAlgorithm");
        }
        if !missing_fields.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("missing fields: {}", missing_fields.join(", ")),
            ));
        }

        let cipher = Cipher::from_name(&self.crypto_algorithm)?;
        validate_init_password(&self.server.init_password)?;

        if self.credentials.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty server credentials",
            ));
        }
        for (i, credential) in self.credentials.iter().enumerate() {
            if credential.username.is_empty() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("credential at index {} has an empty username", i),
                ));
            }
            if credential.password.is_empty() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("credential at index {} has an empty password", i),
                ));
            }
            if let Err(e) = cipher.validate_password(credential.password.as_bytes()) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("credential at index {}: {}", i, e),
                ));
            }
        }

        Ok(())
    }

    pub fn cipher(&self) -> std::io::Result<Cipher> {
        Cipher::from_name(&self.crypto_algorithm)
    }

    pub fn init_password(&self) -> std::io::Result<[u8; INIT_PASSWORD_LEN]> {
        init_password_bytes(&self.server.init_password)
    }

    pub fn to_credentials(&self) -> Vec<Credential> {
        self.credentials
            .iter()
            .map(Account::to_credential)
            .collect()
    }
}

fn validate_init_password(init_password: &str) -> std::io::Result<()> {
    if init_password.len() != INIT_PASSWORD_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!(
                "server.initPassword must be exactly {} bytes, got {}",
                INIT_PASSWORD_LEN,
                init_password.len()
            ),
        ));
    }
    Ok(())
}

fn init_password_bytes(init_password: &str) -> std::io::Result<[u8; INIT_PASSWORD_LEN]> {
    validate_init_password(init_password)?;
    let mut bytes = [0u8; INIT_PASSWORD_LEN];
    bytes.copy_from_slice(init_password.as_bytes());
    Ok(bytes)
}

pub fn load_client(path: impl AsRef<Path>) -> std::io::Result<ClientConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: ClientConfig = toml::from_str(&contents).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("failed to parse client config: {}", e),
        )
    })?;
    config.validate()?;
    Ok(config)
}

pub fn load_server(path: impl AsRef<Path>) -> std::io::Result<ServerConfig> {
    let contents = std::fs::read_to_string(path)?;
    let config: ServerConfig = toml::from_str(&contents).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("failed to parse server config: {}", e),
        )
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT_TOML: &str = r#"
cryptoAlgorithm = "chacha20-poly1305"

[server]
address = "198.51.100.7:8080"
initPassword = "00000000000000000000000000000000"

[client]
address = "127.0.0.1:1080"

[account]
username = "u"
password = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"

[socks5Credentials]
alice = "secret"

[timeout]
dialTimeout = 5
"#;

    const SERVER_TOML: &str = r#"
cryptoAlgorithm = "aes-256-gcm"

[server]
address = "0.0.0.0:8080"
initPassword = "00000000000000000000000000000000"

[[credentials]]
username = "u"
password = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
"#;

    #[test]
    fn test_client_config_parse() {
        let config: ClientConfig = toml::from_str(CLIENT_TOML).unwrap();
        config.validate().unwrap();
        assert_eq!(config.client.address, "127.0.0.1:1080");
        assert_eq!(config.cipher().unwrap(), Cipher::Chacha20Poly1305);
        assert!(config.is_socks5_auth_enabled());
        assert_eq!(config.socks5_credentials["alice"], "secret");
        assert_eq!(config.timeout.dial_timeout, 5);
        // Unspecified timeouts fall back to the default.
        assert_eq!(config.timeout.socks5_handshake_timeout, 10);
        assert_eq!(config.timeout.gordafarid_handshake_timeout, 10);
    }

    #[test]
    fn test_server_config_parse() {
        let config: ServerConfig = toml::from_str(SERVER_TOML).unwrap();
        config.validate().unwrap();
        assert_eq!(config.cipher().unwrap(), Cipher::Aes256Gcm);
        assert_eq!(config.to_credentials().len(), 1);
        assert_eq!(config.timeout.dial_timeout, 10);
    }

    #[test]
    fn test_missing_fields_listed_together() {
        let config: ClientConfig = toml::from_str("").unwrap();
        let err = config.validate().unwrap_err();
        let message = err.to_string();
        for field in [
            "server.address",
            "client.address",
            "cryptoAlgorithm",
            "account.username",
            "account.password",
        ] {
            assert!(message.contains(field), "missing {} in: {}", field, message);
        }
    }

    #[test]
    fn test_wrong_password_length_rejected() {
        let toml_str = CLIENT_TOML.replace(
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            "tooshort",
        );
        let config: ClientConfig = toml::from_str(&toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_init_password_rejected() {
        let toml_str = CLIENT_TOML.replace(
            "initPassword = \"00000000000000000000000000000000\"",
            "initPassword = \"short\"",
        );
        let config: ClientConfig = toml::from_str(&toml_str).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("initPassword"));
    }

    #[test]
    fn test_empty_server_credentials_rejected() {
        let toml_str = SERVER_TOML.split("[[credentials]]").next().unwrap().to_string();
        let config: ServerConfig = toml::from_str(&toml_str).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("credentials"));
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let toml_str = SERVER_TOML.replace("aes-256-gcm", "rot13");
        let config: ServerConfig = toml::from_str(&toml_str).unwrap();
        assert!(config.validate().is_err());
    }
}
