/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! X25519 key pairs used for every Diffie-Hellman in the handshake.

use std::fmt;

use rand_core::{OsRng, RngCore};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{Error, Result};
use crate::proto::DH_LEN;

/// Fill a fixed-size buffer from the operating system's randomness source.
///
/// A failure here is fatal to whatever operation needed the bytes; there is
/// deliberately no userspace fallback.
pub(crate) fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut out = [0u8; N];
    OsRng.try_fill_bytes(&mut out).map_err(|_| Error::Randomness)?;
    Ok(out)
}

/// An X25519 key pair: a 32-byte scalar and its public point.
///
/// Serves both as a long-lived static identity and as a per-handshake
/// ephemeral. The private half is wiped on drop and never printed.
#[derive(Clone)]
pub struct KeyPair {
    private: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair from system randomness.
    pub fn generate() -> Result<Self> {
        Ok(Self::from_private_key(&random_bytes::<DH_LEN>()?))
    }

    /// Build a key pair from an existing private scalar.
    pub fn from_private_key(private: &[u8; DH_LEN]) -> Self {
        let private = StaticSecret::from(*private);
        let public = PublicKey::from(&private);
        Self { private, public }
    }

    /// The public half, as raw bytes suitable for the wire.
    pub fn public(&self) -> [u8; DH_LEN] {
        self.public.to_bytes()
    }

    /// The public half in hex, for display and peer pinning configuration.
    pub fn public_hex(&self) -> String {
        hex::encode(self.public.as_bytes())
    }

    /// The raw private scalar. Only the handshake serializer may see this.
    pub(crate) fn private_bytes(&self) -> [u8; DH_LEN] {
        self.private.to_bytes()
    }

    /// X25519 scalar multiplication against a peer's public key.
    pub(crate) fn dh(&self, peer_public: &[u8; DH_LEN]) -> [u8; DH_LEN] {
        let shared = self.private.diffie_hellman(&PublicKey::from(*peer_public));
        shared.to_bytes()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the private scalar.
        f.debug_struct("KeyPair")
            .field("public", &self.public_hex())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_pairs_are_distinct() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        assert_ne!(a.public(), b.public());
    }

    #[test]
    fn dh_agreement() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        assert_eq!(a.dh(&b.public()), b.dh(&a.public()));
    }

    #[test]
    fn private_key_round_trip() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::from_private_key(&a.private_bytes());
        assert_eq!(a.public(), b.public());
    }

    #[test]
    fn debug_redacts_private_half() {
        let kp = KeyPair::generate().unwrap();
        let printed = format!("{kp:?}");
        assert!(!printed.contains(&hex::encode(kp.private_bytes())));
    }
}
