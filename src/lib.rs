/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! An implementation of the Disco extension to the Noise protocol framework,
//! as specified at <https://www.discocrypto.com/disco.html>.
//!
//! Disco collapses Noise's usual cipher + hash + HKDF triad into a single
//! primitive: the STROBE duplex over Keccak-f[1600]. One duplex object
//! absorbs the whole handshake transcript, encrypts its payloads, and is
//! finally cloned into the two halves that protect the transport stream.
//!
//! The crate offers three levels of API, lowest first:
//!
//! - [`Strobe`]: the raw keyed duplex, plus the stand-alone symmetric
//!   primitives built on it ([`hash`], [`derive_keys`], [`encrypt`], ...).
//! - [`HandshakeState`]: one side of a Noise handshake, message by message.
//! - [`Session`]: a full encrypted stream over anything implementing
//!   `Read + Write`, with lazy handshaking, record framing and peer
//!   verification.
//!
//! ```no_run
//! use std::io::Write;
//! use std::net::TcpStream;
//!
//! use disco::{Config, HandshakePattern, KeyPair, Session};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::new(HandshakePattern::XX)
//!     .with_key_pair(KeyPair::generate()?)
//!     .with_proof(Vec::new())
//!     .with_verifier(|_key, _proof| true);
//!
//! let stream = TcpStream::connect("127.0.0.1:7878")?;
//! let mut session = Session::client(stream, config)?;
//! session.write_all(b"hello over disco")?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod handshake;
mod keys;
mod patterns;
mod proto;
mod session;
mod strobe;
mod symmetric;
mod symmetric_state;

pub use crate::config::{Config, PublicKeyVerifier};
pub use crate::error::{Error, Result};
pub use crate::handshake::{HandshakeState, TransportPair};
pub use crate::keys::KeyPair;
pub use crate::patterns::{HandshakePattern, Token};
pub use crate::proto::{DH_LEN, NONCE_SIZE, TAG_SIZE};
pub use crate::session::Session;
pub use crate::strobe::{SecurityLevel, Strobe, STROBE_SERIALIZED_SIZE};
pub use crate::symmetric::{
    decrypt, decrypt_and_authenticate, derive_keys, encrypt, encrypt_and_authenticate, hash,
    protect_integrity, verify_integrity, Hasher,
};
