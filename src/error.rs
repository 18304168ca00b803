/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use std::io;

use thiserror::Error;

/// Everything that can go wrong while negotiating or using a Disco session.
///
/// Cryptographic verification failures are terminal: they are surfaced once,
/// the session transitions to its failed state and every subsequent operation
/// fails fast. None of them are retried internally, because the duplex state
/// advances byte by byte and a partially consumed record would desynchronize
/// both endpoints.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The wire carried fewer bytes than the current handshake token requires.
    #[error("handshake message is shorter than the pattern requires")]
    ShortMessage,

    /// A MAC did not verify. An attacker, a truncated record or a
    /// desynchronized duplex all end up here; they are indistinguishable.
    #[error("payload could not be authenticated")]
    Decrypt,

    /// The application-supplied verifier rejected the peer's static key.
    #[error("remote static public key was rejected by the verifier")]
    Authentication,

    /// Configuration references a handshake pattern this crate does not define.
    #[error("unknown handshake pattern `{0}`")]
    UnknownPattern(String),

    /// The selected pattern mandates key material the caller did not supply.
    #[error("handshake pattern requires a {0} that was not supplied")]
    MissingKey(&'static str),

    /// `recover` was given a static key pair whose public half does not match
    /// the serialized state.
    #[error("serialized state does not match the supplied static key pair")]
    MismatchedKey,

    /// Serialized duplex or handshake state failed structural validation.
    #[error("serialized state is malformed")]
    MalformedState,

    /// The operating system's randomness source failed. There is no fallback.
    #[error("system randomness is unavailable")]
    Randomness,

    /// `write_message`/`read_message` was called after the handshake completed.
    #[error("no more handshake messages to process")]
    NoMorePatterns,

    /// The underlying byte stream failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        match e {
            Error::Io(e) => e,
            e => io::Error::new(io::ErrorKind::InvalidData, e),
        }
    }
}
