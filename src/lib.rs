//! gordafarid - an encrypted, authenticated TCP relay.
//!
//! Two processes cooperate: a local client that accepts SOCKS5 connections
//! from user applications, and a remote server that terminates the custom
//! Gordafarid tunnel, dials the requested destination, and relays bytes.
//! All post-greeting traffic travels as length-prefixed AEAD records with
//! per-record random nonces and process-wide replay detection; the initial
//! greeting is sealed separately under a pre-shared init-password.

pub mod address;
pub mod async_stream;
pub mod cipher_stream;
pub mod client;
pub mod config;
pub mod crypto;
pub mod gordafarid;
pub mod nonce_cache;
pub mod relay;
pub mod server;
pub mod socks_handler;
