use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// A destination address as carried on the wire: a raw IP address, or a
/// hostname left unresolved for the dialing side to look up.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Hostname(String),
}

impl Address {
    pub fn from(s: &str) -> std::io::Result<Self> {
        if s.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "empty address",
            ));
        }
        if s.contains(':') {
            return match s.parse::<Ipv6Addr>() {
                Ok(addr) => Ok(Address::Ipv6(addr)),
                Err(_) => Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("failed to parse address: {}", s),
                )),
            };
        }
        if let Ok(addr) = s.parse::<Ipv4Addr>() {
            return Ok(Address::Ipv4(addr));
        }
        Ok(Address::Hostname(s.to_string()))
    }

    pub fn is_hostname(&self) -> bool {
        matches!(self, Address::Hostname(_))
    }

    pub fn hostname(&self) -> Option<&str> {
        match self {
            Address::Hostname(ref hostname) => Some(hostname),
            _ => None,
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Ipv4(addr) => addr.fmt(f),
            Address::Ipv6(addr) => addr.fmt(f),
            Address::Hostname(hostname) => hostname.fmt(f),
        }
    }
}

/// An address together with a port, the unit every request and reply header
/// carries.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct NetLocation {
    address: Address,
    port: u16,
}

impl NetLocation {
    pub fn new(address: Address, port: u16) -> Self {
        Self { address, port }
    }

    pub fn from_ip_addr(ip: IpAddr, port: u16) -> Self {
        let address = match ip {
            IpAddr::V4(addr) => Address::Ipv4(addr),
            IpAddr::V6(addr) => Address::Ipv6(addr),
        };
        Self { address, port }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn components(&self) -> (&Address, u16) {
        (&self.address, self.port)
    }

    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        match self.address {
            Address::Ipv4(ref addr) => Some(SocketAddr::new(IpAddr::V4(*addr), self.port)),
            Address::Ipv6(ref addr) => Some(SocketAddr::new(IpAddr::V6(*addr), self.port)),
            Address::Hostname(_) => None,
        }
    }
}

impl std::fmt::Display for NetLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.address {
            Address::Ipv6(ref addr) => write!(f, "[{}]:{}", addr, self.port),
            _ => write!(f, "{}:{}", self.address, self.port),
        }
    }
}

/// Reads an address-type tagged location: atyp, address bytes (length-prefixed
/// for domains), and a big-endian port.
pub async fn read_location<R>(stream: &mut R) -> std::io::Result<NetLocation>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut data = [0u8; 1];
    stream.read_exact(&mut data).await?;
    let address_type = data[0];

    match address_type {
        ATYP_IPV4 => {
            let mut address_bytes = [0u8; 6];
            stream.read_exact(&mut address_bytes).await?;

            let v4addr = Ipv4Addr::new(
                address_bytes[0],
                address_bytes[1],
                address_bytes[2],
                address_bytes[3],
            );
            let port = u16::from_be_bytes(address_bytes[4..6].try_into().unwrap());

            Ok(NetLocation::new(Address::Ipv4(v4addr), port))
        }
        ATYP_IPV6 => {
            let mut address_bytes = [0u8; 18];
            stream.read_exact(&mut address_bytes).await?;

            let octets: [u8; 16] = address_bytes[0..16].try_into().unwrap();
            let port = u16::from_be_bytes(address_bytes[16..18].try_into().unwrap());

            Ok(NetLocation::new(Address::Ipv6(Ipv6Addr::from(octets)), port))
        }
        ATYP_DOMAIN => {
            stream.read_exact(&mut data).await?;
            let address_len = data[0] as usize;
            if address_len == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "zero-length domain name",
                ));
            }

            let mut address_bytes = vec![0u8; address_len + 2];
            stream.read_exact(&mut address_bytes).await?;

            let address_str = match std::str::from_utf8(&address_bytes[0..address_len]) {
                Ok(s) => s,
                Err(e) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("failed to decode domain name: {}", e),
                    ));
                }
            };

            let port = u16::from_be_bytes(
                address_bytes[address_len..address_len + 2]
                    .try_into()
                    .unwrap(),
            );

            // Some clients pass IP literals with the domain address type, so
            // parse rather than assuming a hostname.
            Ok(NetLocation::new(Address::from(address_str)?, port))
        }
        _ => Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("unsupported address type: {}", address_type),
        )),
    }
}

pub async fn write_location<W>(stream: &mut W, location: &NetLocation) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut data = Vec::with_capacity(1 + 1 + 255 + 2);
    write_location_to_vec(location, &mut data)?;
    stream.write_all(&data).await
}

/// Serializes a location into `data` in the same wire format `read_location`
/// consumes.
pub fn write_location_to_vec(location: &NetLocation, data: &mut Vec<u8>) -> std::io::Result<()> {
    let (address, port) = location.components();
    match address {
        Address::Ipv4(v4addr) => {
            data.push(ATYP_IPV4);
            data.extend_from_slice(&v4addr.octets());
        }
        Address::Ipv6(v6addr) => {
            data.push(ATYP_IPV6);
            data.extend_from_slice(&v6addr.octets());
        }
        Address::Hostname(domain_name) => {
            let domain_name_bytes = domain_name.as_bytes();
            if domain_name_bytes.is_empty() || domain_name_bytes.len() > 255 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("invalid domain name length: {}", domain_name_bytes.len()),
                ));
            }
            data.push(ATYP_DOMAIN);
            data.push(domain_name_bytes.len() as u8);
            data.extend_from_slice(domain_name_bytes);
        }
    }
    data.extend_from_slice(&port.to_be_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn round_trip(location: NetLocation) {
        let mut encoded = Vec::new();
        write_location_to_vec(&location, &mut encoded).unwrap();

        let mut cursor = std::io::Cursor::new(encoded.clone());
        let decoded = read_location(&mut cursor).await.unwrap();
        assert_eq!(decoded, location);

        let mut reencoded = Vec::new();
        write_location_to_vec(&decoded, &mut reencoded).unwrap();
        assert_eq!(reencoded, encoded);
    }

    #[tokio::test]
    async fn test_location_round_trip_all_address_types() {
        round_trip(NetLocation::new(
            Address::Ipv4(Ipv4Addr::new(93, 184, 216, 34)),
            80,
        ))
        .await;
        round_trip(NetLocation::new(
            Address::Ipv6("2606:2800:220:1:248:1893:25c8:1946".parse().unwrap()),
            443,
        ))
        .await;
        round_trip(NetLocation::new(
            Address::Hostname("example.com".to_string()),
            8080,
        ))
        .await;
    }

    #[tokio::test]
    async fn test_zero_length_domain_rejected() {
        let encoded = vec![ATYP_DOMAIN, 0, 0, 80];
        let mut cursor = std::io::Cursor::new(encoded);
        let err = read_location(&mut cursor).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_unknown_address_type_rejected() {
        let encoded = vec![0x05, 1, 2, 3, 4, 0, 80];
        let mut cursor = std::io::Cursor::new(encoded);
        let err = read_location(&mut cursor).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_address_parse() {
        assert!(matches!(
            Address::from("10.0.0.1").unwrap(),
            Address::Ipv4(_)
        ));
        assert!(matches!(Address::from("::1").unwrap(), Address::Ipv6(_)));
        assert!(matches!(
            Address::from("example.com").unwrap(),
            Address::Hostname(_)
        ));
        assert!(Address::from("").is_err());
    }

    #[test]
    fn test_display_includes_port() {
        let v6 = NetLocation::new(Address::Ipv6("::1".parse().unwrap()), 443);
        assert_eq!(v6.to_string(), "[::1]:443");
        let host = NetLocation::new(Address::Hostname("example.com".into()), 80);
        assert_eq!(host.to_string(), "example.com:80");
    }
}
