/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::error::{Error, Result};
use crate::proto::{DH_LEN, LABEL_INITIATOR, LABEL_RESPONDER, SPLIT_RATCHET_SIZE, TAG_SIZE};
use crate::strobe::{SecurityLevel, Strobe};

/// The symmetric half of a handshake: one duplex plus a flag recording
/// whether key material has been mixed in yet.
///
/// Where standard Noise juggles a cipher state, a chaining key and a
/// handshake hash tied together by HKDF, here the duplex absorbs everything
/// and the flag alone decides whether payloads are encrypted or pass through
/// in the clear.
#[derive(Clone)]
pub(crate) struct SymmetricState {
    strobe: Strobe,
    is_keyed: bool,
}

impl SymmetricState {
    pub fn initialize(protocol_name: &str) -> Self {
        Self {
            strobe: Strobe::new(protocol_name.as_bytes(), SecurityLevel::Bits128),
            is_keyed: false,
        }
    }

    pub(crate) fn from_parts(strobe: Strobe, is_keyed: bool) -> Self {
        Self { strobe, is_keyed }
    }

    /// Once keyed, a state never reverts within a handshake.
    pub fn is_keyed(&self) -> bool {
        self.is_keyed
    }

    pub fn mix_key(&mut self, input_key_material: &[u8; DH_LEN]) {
        self.strobe.ad(input_key_material, false);
        self.is_keyed = true;
    }

    pub fn mix_hash(&mut self, data: &[u8]) {
        self.strobe.ad(data, false);
    }

    /// Mix a pre-shared key. Unlike standard Noise this does not flip the
    /// keyed flag: a psk alone carries no fresh entropy against an attacker
    /// who knows it, so only DH outputs arm encryption.
    pub fn mix_key_and_hash(&mut self, input_key_material: &[u8]) {
        self.strobe.ad(input_key_material, false);
    }

    /// A transcript digest suitable for channel binding.
    ///
    /// Computed on a clone so it can be taken at any point without touching
    /// the live transcript; both peers obtain the same value.
    pub fn handshake_hash(&self) -> [u8; 32] {
        let mut reader = self.strobe.clone();
        let mut out = [0u8; 32];
        reader.prf(&mut out, false);
        out
    }

    /// Encrypt a handshake payload, or pass it through before any key has
    /// been mixed.
    pub fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Vec<u8> {
        if !self.is_keyed {
            // No key yet, nothing to encrypt with.
            return plaintext.to_vec();
        }
        let mut ciphertext = plaintext.to_vec();
        self.strobe.send_enc(&mut ciphertext, false);
        let mut tag = [0u8; TAG_SIZE];
        self.strobe.send_mac(&mut tag);
        ciphertext.extend_from_slice(&tag);
        ciphertext
    }

    /// The inverse of [`SymmetricState::encrypt_and_hash`].
    pub fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if !self.is_keyed {
            return Ok(ciphertext.to_vec());
        }
        if ciphertext.len() < TAG_SIZE {
            return Err(Error::Decrypt);
        }
        let body_len = ciphertext.len() - TAG_SIZE;
        let mut plaintext = ciphertext[..body_len].to_vec();
        self.strobe.recv_enc(&mut plaintext, false);
        let mut tag = <[u8; TAG_SIZE]>::try_from(&ciphertext[body_len..]).unwrap();
        self.strobe.recv_mac(&mut tag)?;
        Ok(plaintext)
    }

    /// Derive the two post-handshake transport duplexes.
    ///
    /// Each half is a deep copy of the final handshake duplex, domain
    /// separated by a fixed label and ratcheted so the pre-split state
    /// cannot be reconstructed from either half.
    pub fn split(&self) -> (Strobe, Strobe) {
        let mut initiator_half = self.strobe.clone();
        initiator_half.meta_ad(LABEL_INITIATOR, false);
        initiator_half.ratchet(SPLIT_RATCHET_SIZE);

        let mut responder_half = self.strobe.clone();
        responder_half.meta_ad(LABEL_RESPONDER, false);
        responder_half.ratchet(SPLIT_RATCHET_SIZE);

        (initiator_half, responder_half)
    }

    pub(crate) fn serialize_strobe(&self) -> Vec<u8> {
        self.strobe.serialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed_pair() -> (SymmetricState, SymmetricState) {
        let mut a = SymmetricState::initialize("Noise_XX_25519_STROBEv1.0.2");
        let mut b = SymmetricState::initialize("Noise_XX_25519_STROBEv1.0.2");
        for s in [&mut a, &mut b] {
            s.mix_hash(b"prologue");
            s.mix_key(&[0x5A; DH_LEN]);
        }
        (a, b)
    }

    #[test]
    fn unkeyed_payloads_pass_through() {
        let mut s = SymmetricState::initialize("Noise_NX_25519_STROBEv1.0.2");
        assert!(!s.is_keyed());
        assert_eq!(s.encrypt_and_hash(b"in the clear"), b"in the clear");
        assert_eq!(s.decrypt_and_hash(b"in the clear").unwrap(), b"in the clear");
    }

    #[test]
    fn keyed_payloads_round_trip() {
        let (mut tx, mut rx) = keyed_pair();
        let ciphertext = tx.encrypt_and_hash(b"secret payload");
        assert_eq!(ciphertext.len(), b"secret payload".len() + TAG_SIZE);
        assert_eq!(rx.decrypt_and_hash(&ciphertext).unwrap(), b"secret payload");
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let (mut tx, mut rx) = keyed_pair();
        let mut ciphertext = tx.encrypt_and_hash(b"secret payload");
        ciphertext[3] ^= 0x01;
        assert!(matches!(rx.decrypt_and_hash(&ciphertext), Err(Error::Decrypt)));
    }

    #[test]
    fn short_ciphertext_is_rejected() {
        let (_, mut rx) = keyed_pair();
        assert!(matches!(rx.decrypt_and_hash(&[0u8; TAG_SIZE - 1]), Err(Error::Decrypt)));
    }

    #[test]
    fn psk_mixing_does_not_arm_encryption() {
        let mut s = SymmetricState::initialize("Noise_NNpsk2_25519_STROBEv1.0.2");
        s.mix_key_and_hash(b"a 32-byte pre-shared key........");
        assert!(!s.is_keyed());
    }

    #[test]
    fn split_halves_agree_across_peers_and_differ_from_each_other() {
        let (a, b) = keyed_pair();
        let (a_init, a_resp) = a.split();
        let (b_init, b_resp) = b.split();

        assert_eq!(a_init.serialize(), b_init.serialize());
        assert_eq!(a_resp.serialize(), b_resp.serialize());
        assert_ne!(a_init.serialize(), a_resp.serialize());
    }

    #[test]
    fn handshake_hash_is_stable_and_shared() {
        let (a, b) = keyed_pair();
        assert_eq!(a.handshake_hash(), b.handshake_hash());
        // Reading the hash must not perturb the transcript.
        assert_eq!(a.handshake_hash(), a.handshake_hash());
        assert_eq!(a.split().0.serialize(), b.split().0.serialize());
    }
}
