use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::address::{read_location, write_location, NetLocation};
use crate::async_stream::AsyncStream;
use crate::cipher_stream::CipherStream;
use crate::crypto::{open_sealed, seal};

use super::proto::{
    GreetingHeader, ReplyHeader, SEALED_GREETING_LEN, STATUS_SUCCESS, VERSION,
};
use super::{ClientHandshakeConfig, ServerHandshakeConfig};

pub(crate) struct HandshakeOutcome {
    pub stream: CipherStream,
    pub request: NetLocation,
}

pub(crate) async fn client_handshake(
    mut stream: Box<dyn AsyncStream>,
    config: Arc<ClientHandshakeConfig>,
    target: NetLocation,
) -> std::io::Result<HandshakeOutcome> {
    let greeting = GreetingHeader::new(config.hash);
    let blob = seal(
        &greeting.encode(),
        &config.init_password,
        &config.greeting_nonces,
    )?;
    stream.write_all(&blob).await?;
    stream.flush().await?;

    // Everything after the sealed greeting travels as AEAD records keyed by
    // the account password.
    let aead = config.cipher.new_aead(&config.password)?;
    let mut stream = CipherStream::new(stream, aead, config.stream_nonces.clone());

    let mut response = [0u8; 2];
    stream.read_exact(&mut response).await?;
    if response[0] != VERSION {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "unsupported protocol version in greeting response: {}",
                response[0]
            ),
        ));
    }
    if response[1] != STATUS_SUCCESS {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "greeting rejected by server",
        ));
    }

    write_location(&mut stream, &target).await?;
    stream.flush().await?;

    // The bound address in the reply is parsed and discarded.
    ReplyHeader::read(&mut stream).await?;

    Ok(HandshakeOutcome {
        stream,
        request: target,
    })
}

pub(crate) async fn server_handshake(
    mut stream: Box<dyn AsyncStream>,
    config: Arc<ServerHandshakeConfig>,
) -> std::io::Result<HandshakeOutcome> {
    let mut blob = [0u8; SEALED_GREETING_LEN];
    stream.read_exact(&mut blob).await?;

    // Before the AEAD is established there is no shared key to frame a
    // response under, so greeting and authentication failures close the
    // connection without replying.
    let plaintext = open_sealed(&blob, &config.init_password, &config.greeting_nonces)?;
    let greeting = GreetingHeader::decode(&plaintext)?;

    // Deliberately the same error whether the identifier is unknown or the
    // stored password later fails to decrypt traffic.
    let password = config.credentials.get(&greeting.hash).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "authentication failed",
        )
    })?;

    let aead = config.cipher.new_aead(password)?;
    let mut stream = CipherStream::new(stream, aead, config.stream_nonces.clone());

    stream.write_all(&[VERSION, STATUS_SUCCESS]).await?;
    stream.flush().await?;

    let request = read_location(&mut stream).await?;

    // The reply echoes the requested destination as the bound address.
    let reply = ReplyHeader::success(request.clone());
    stream.write_all(&reply.encode()?).await?;
    stream.flush().await?;

    Ok(HandshakeOutcome { stream, request })
}
