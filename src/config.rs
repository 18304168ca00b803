/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::keys::KeyPair;
use crate::patterns::HandshakePattern;
use crate::proto::DH_LEN;

/// Callback deciding whether a static public key received during the
/// handshake is acceptable. It is handed the key and the opaque proof blob
/// the peer attached to its final handshake message; returning `false`
/// aborts the session.
pub type PublicKeyVerifier = Box<dyn Fn(&[u8; DH_LEN], &[u8]) -> bool + Send + Sync>;

/// Everything a [`Session`](crate::Session) needs to know before the first
/// byte hits the wire.
///
/// Which fields are mandatory depends on the pattern and on which side of
/// the connection this configuration is used; [`Config::check`] is run at
/// session construction and reports the first missing piece.
pub struct Config {
    /// The handshake to run.
    pub pattern: HandshakePattern,
    /// The local static key pair. Required whenever the pattern advertises
    /// or transmits a static key for this side.
    pub key_pair: Option<KeyPair>,
    /// The peer's static public key, for patterns where it is known ahead
    /// of time (the "K" sides: K, NK, KK, IK, ...).
    pub remote_key: Option<[u8; DH_LEN]>,
    /// Arbitrary bytes mixed into the transcript before the first message.
    /// Both sides must supply the same value.
    pub prologue: Vec<u8>,
    /// The pre-shared key for `psk` patterns.
    pub psk: Option<Zeroizing<Vec<u8>>>,
    /// Opaque blob sent as the final handshake payload when this side
    /// transmits its static key; typically a signature over that key by
    /// some authority the peer trusts.
    pub static_public_key_proof: Option<Vec<u8>>,
    /// Invoked with the peer's static key and proof when one is received.
    pub public_key_verifier: Option<PublicKeyVerifier>,
    /// Run both directions of the established session over a single duplex.
    /// The application must then strictly alternate send and receive.
    pub half_duplex: bool,
    /// Append the peer's authenticated static key to the session's
    /// remote-address string.
    pub remote_addr_contains_remote_pubkey: bool,
}

impl Config {
    pub fn new(pattern: HandshakePattern) -> Self {
        Self {
            pattern,
            key_pair: None,
            remote_key: None,
            prologue: Vec::new(),
            psk: None,
            static_public_key_proof: None,
            public_key_verifier: None,
            half_duplex: false,
            remote_addr_contains_remote_pubkey: false,
        }
    }

    pub fn with_key_pair(mut self, key_pair: KeyPair) -> Self {
        self.key_pair = Some(key_pair);
        self
    }

    pub fn with_remote_key(mut self, remote_key: [u8; DH_LEN]) -> Self {
        self.remote_key = Some(remote_key);
        self
    }

    pub fn with_prologue(mut self, prologue: impl Into<Vec<u8>>) -> Self {
        self.prologue = prologue.into();
        self
    }

    pub fn with_psk(mut self, psk: impl Into<Vec<u8>>) -> Self {
        self.psk = Some(Zeroizing::new(psk.into()));
        self
    }

    pub fn with_proof(mut self, proof: impl Into<Vec<u8>>) -> Self {
        self.static_public_key_proof = Some(proof.into());
        self
    }

    pub fn with_verifier(
        mut self,
        verifier: impl Fn(&[u8; DH_LEN], &[u8]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.public_key_verifier = Some(Box::new(verifier));
        self
    }

    pub fn with_half_duplex(mut self) -> Self {
        self.half_duplex = true;
        self
    }

    /// Validate that this configuration can actually run its pattern from
    /// the given side.
    pub(crate) fn check(&self, initiator: bool) -> Result<()> {
        if self.pattern.requires_local_static(initiator) && self.key_pair.is_none() {
            return Err(Error::MissingKey("local static key pair"));
        }
        if self.pattern.requires_remote_static(initiator) && self.remote_key.is_none() {
            return Err(Error::MissingKey("remote static public key"));
        }
        if self.pattern.uses_psk() && self.psk.is_none() {
            return Err(Error::MissingKey("pre-shared key"));
        }
        if self.pattern.receives_static(initiator) && self.public_key_verifier.is_none() {
            return Err(Error::MissingKey("public key verifier"));
        }
        if self.pattern.transmits_static(initiator) && self.static_public_key_proof.is_none() {
            return Err(Error::MissingKey("static public key proof"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nk_sides_have_different_requirements() {
        // The NK initiator needs the pinned server key, nothing else.
        let config = Config::new(HandshakePattern::NK);
        assert!(matches!(
            config.check(true),
            Err(Error::MissingKey("remote static public key"))
        ));
        let config = config.with_remote_key([0x11; DH_LEN]);
        assert!(config.check(true).is_ok());
        // The NK responder needs its own key pair instead.
        assert!(matches!(
            config.check(false),
            Err(Error::MissingKey("local static key pair"))
        ));
    }

    #[test]
    fn xx_needs_proof_and_verifier_on_both_sides() {
        for initiator in [true, false] {
            let config = Config::new(HandshakePattern::XX)
                .with_key_pair(KeyPair::generate().unwrap());
            assert!(matches!(
                config.check(initiator),
                Err(Error::MissingKey("public key verifier"))
            ));
            let config = config.with_verifier(|_, _| true);
            assert!(matches!(
                config.check(initiator),
                Err(Error::MissingKey("static public key proof"))
            ));
            assert!(config.with_proof(vec![]).check(initiator).is_ok());
        }
    }

    #[test]
    fn psk_pattern_requires_the_psk() {
        let config = Config::new(HandshakePattern::NNpsk2);
        assert!(matches!(
            config.check(true),
            Err(Error::MissingKey("pre-shared key"))
        ));
        assert!(config.with_psk(*b"shared secret").check(false).is_ok());
    }
}
