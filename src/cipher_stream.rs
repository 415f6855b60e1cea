use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::ready;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::async_stream::AsyncStream;
use crate::crypto::{AeadCipher, NONCE_LEN, TAG_LEN};
use crate::nonce_cache::NonceCache;

const LENGTH_PREFIX_LEN: usize = 2;

/// A record is length-prefixed with a u16, and the length counts the nonce
/// and the ciphertext+tag that follow it.
pub const MAX_RECORD_LEN: usize = u16::MAX as usize;

/// The largest plaintext a single record can carry.
pub const MAX_PAYLOAD_LEN: usize = MAX_RECORD_LEN - NONCE_LEN - TAG_LEN;

const MIN_RECORD_LEN: usize = NONCE_LEN + TAG_LEN;

/// Layers the AEAD record format over a raw byte stream.
///
/// Each write seals one record (`u16-be length | nonce | ciphertext+tag`)
/// under a fresh random nonce. Reads reassemble records and expose the
/// decrypted payloads as a plain byte stream, failing on any replayed
/// nonce. Record boundaries are invisible to callers.
pub struct CipherStream {
    stream: Box<dyn AsyncStream>,
    aead: AeadCipher,
    nonce_cache: Arc<NonceCache>,

    // Incoming record bytes, length prefix included. At most one record is
    // buffered at a time.
    unprocessed_buf: Box<[u8]>,
    unprocessed_end: usize,
    pending_record_len: Option<usize>,

    // Decrypted payload not yet drained by the caller.
    processed_buf: Vec<u8>,
    processed_start: usize,

    // One sealed record waiting to be written out.
    write_cache: Box<[u8]>,
    write_start: usize,
    write_end: usize,

    is_eof: bool,
}

impl CipherStream {
    pub fn new(
        stream: Box<dyn AsyncStream>,
        aead: AeadCipher,
        nonce_cache: Arc<NonceCache>,
    ) -> Self {
        Self {
            stream,
            aead,
            nonce_cache,
            unprocessed_buf: vec![0u8; LENGTH_PREFIX_LEN + MAX_RECORD_LEN].into_boxed_slice(),
            unprocessed_end: 0,
            pending_record_len: None,
            processed_buf: Vec::new(),
            processed_start: 0,
            write_cache: vec![0u8; LENGTH_PREFIX_LEN + MAX_RECORD_LEN].into_boxed_slice(),
            write_start: 0,
            write_end: 0,
            is_eof: false,
        }
    }

    fn read_processed(&mut self, buf: &mut ReadBuf<'_>) {
        let available = &self.processed_buf[self.processed_start..];
        let amount = std::cmp::min(buf.remaining(), available.len());
        buf.put_slice(&available[0..amount]);

        self.processed_start += amount;
        if self.processed_start == self.processed_buf.len() {
            self.processed_buf.clear();
            self.processed_start = 0;
        }
    }

    fn decrypt_record(&mut self, record_len: usize) -> std::io::Result<()> {
        let record = &self.unprocessed_buf[LENGTH_PREFIX_LEN..LENGTH_PREFIX_LEN + record_len];
        let (nonce, ciphertext) = record.split_at(NONCE_LEN);

        if !self.nonce_cache.try_insert(nonce) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "duplicate record nonce, possible replay attack",
            ));
        }

        let plaintext = self
            .aead
            .open(nonce, ciphertext)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "record decrypt failed"))?;

        self.processed_buf = plaintext;
        self.processed_start = 0;
        self.pending_record_len = None;
        self.unprocessed_end = 0;
        Ok(())
    }

    fn seal_record(&mut self, plaintext: &[u8]) -> std::io::Result<()> {
        debug_assert!(self.write_start == 0 && self.write_end == 0);
        debug_assert!(plaintext.len() <= MAX_PAYLOAD_LEN);

        let mut nonce = [0u8; NONCE_LEN];
        let mut rng = rand::thread_rng();
        loop {
            rng.fill_bytes(&mut nonce);
            if self.nonce_cache.try_insert(&nonce) {
                break;
            }
        }

        let ciphertext = self.aead.seal(&nonce, plaintext)?;
        let record_len = NONCE_LEN + ciphertext.len();

        self.write_cache[0..LENGTH_PREFIX_LEN].copy_from_slice(&(record_len as u16).to_be_bytes());
        self.write_cache[LENGTH_PREFIX_LEN..LENGTH_PREFIX_LEN + NONCE_LEN].copy_from_slice(&nonce);
        self.write_cache
            [LENGTH_PREFIX_LEN + NONCE_LEN..LENGTH_PREFIX_LEN + record_len]
            .copy_from_slice(&ciphertext);
        self.write_end = LENGTH_PREFIX_LEN + record_len;
        Ok(())
    }

    /// Pushes cached record bytes into the underlying stream. Returns true
    /// once the cache is fully drained.
    fn flush_write_cache(&mut self, cx: &mut Context<'_>) -> std::io::Result<bool> {
        while self.write_start < self.write_end {
            match Pin::new(&mut self.stream)
                .poll_write(cx, &self.write_cache[self.write_start..self.write_end])
            {
                Poll::Ready(Ok(written)) => {
                    if written == 0 {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::WriteZero,
                            "EOF while writing sealed record",
                        ));
                    }
                    self.write_start += written;
                }
                Poll::Ready(Err(e)) => {
                    return Err(e);
                }
                Poll::Pending => {
                    return Ok(false);
                }
            }
        }
        self.write_start = 0;
        self.write_end = 0;
        Ok(true)
    }
}

impl AsyncRead for CipherStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        loop {
            if this.processed_start < this.processed_buf.len() {
                this.read_processed(buf);
                return Poll::Ready(Ok(()));
            }

            if this.is_eof {
                return Poll::Ready(Ok(()));
            }

            let wanted = match this.pending_record_len {
                None => LENGTH_PREFIX_LEN,
                Some(record_len) => LENGTH_PREFIX_LEN + record_len,
            };

            if this.unprocessed_end < wanted {
                let mut read_buf =
                    ReadBuf::new(&mut this.unprocessed_buf[this.unprocessed_end..wanted]);
                ready!(Pin::new(&mut this.stream).poll_read(cx, &mut read_buf))?;
                let len = read_buf.filled().len();
                if len == 0 {
                    if this.unprocessed_end > 0 {
                        return Poll::Ready(Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "EOF in the middle of a record",
                        )));
                    }
                    this.is_eof = true;
                    return Poll::Ready(Ok(()));
                }
                this.unprocessed_end += len;
                continue;
            }

            match this.pending_record_len {
                None => {
                    let record_len = u16::from_be_bytes(
                        this.unprocessed_buf[0..LENGTH_PREFIX_LEN].try_into().unwrap(),
                    ) as usize;
                    if record_len < MIN_RECORD_LEN {
                        return Poll::Ready(Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!(
                                "record length {} shorter than nonce and tag",
                                record_len
                            ),
                        )));
                    }
                    this.pending_record_len = Some(record_len);
                }
                Some(record_len) => {
                    this.decrypt_record(record_len)?;
                    // An empty payload yields no bytes; keep reading rather
                    // than signalling EOF with a zero-length fill.
                }
            }
        }
    }
}

impl AsyncWrite for CipherStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();

        // A previously sealed record must go out before the next one is
        // built, so that plaintext order matches record order.
        match this.flush_write_cache(cx) {
            Ok(true) => {}
            Ok(false) => return Poll::Pending,
            Err(e) => return Poll::Ready(Err(e)),
        }

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let chunk_len = std::cmp::min(buf.len(), MAX_PAYLOAD_LEN);
        this.seal_record(&buf[0..chunk_len])?;

        // The plaintext is committed to the cache; a partial flush is
        // finished by the next write or flush.
        if let Err(e) = this.flush_write_cache(cx) {
            return Poll::Ready(Err(e));
        }

        Poll::Ready(Ok(chunk_len))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        match this.flush_write_cache(cx) {
            Ok(true) => {}
            Ok(false) => return Poll::Pending,
            Err(e) => return Poll::Ready(Err(e)),
        }
        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        match this.flush_write_cache(cx) {
            Ok(true) => {}
            Ok(false) => return Poll::Pending,
            Err(e) => return Poll::Ready(Err(e)),
        }
        Pin::new(&mut this.stream).poll_shutdown(cx)
    }
}

impl AsyncStream for CipherStream {}
