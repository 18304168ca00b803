/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Stand-alone symmetric primitives: hashing, key derivation, integrity
//! protection and authenticated encryption.
//!
//! Each function spins up a fresh duplex under its own domain string, so all
//! of them are pure with respect to their inputs and safe to call from any
//! number of threads at once.

use std::io;

use crate::error::{Error, Result};
use crate::keys::random_bytes;
use crate::proto::{
    DOMAIN_AE, DOMAIN_AEAD, DOMAIN_HASH, DOMAIN_KDF, DOMAIN_MAC, MIN_CIPHERTEXT_SIZE,
    MIN_HASH_SIZE, MIN_KEY_SIZE, NONCE_SIZE, TAG_SIZE,
};
use crate::strobe::{SecurityLevel, Strobe};

/// Hash `input` into `output_len` bytes.
///
/// Panics if `output_len` is smaller than 32; truncating the output below
/// 256 bits has security consequences and is always a caller bug.
pub fn hash(input: &[u8], output_len: usize) -> Vec<u8> {
    assert!(
        output_len >= MIN_HASH_SIZE,
        "hash output below 256 bits has security consequences"
    );
    let mut h = Strobe::new(DOMAIN_HASH, SecurityLevel::Bits128);
    h.ad(input, false);
    let mut out = vec![0u8; output_len];
    h.prf(&mut out, false);
    out
}

/// A stateful hash that absorbs input incrementally.
///
/// [`Hasher::write`] streams contiguous data; [`Hasher::write_tuple`] absorbs
/// its argument as a self-delimiting unit, so structured input hashes
/// unambiguously no matter how the surrounding bytes are chunked.
#[derive(Clone)]
pub struct Hasher {
    strobe: Strobe,
    streaming: bool,
    output_len: usize,
}

impl Hasher {
    /// Panics if `output_len` is smaller than 32, like [`hash`].
    pub fn new(output_len: usize) -> Self {
        assert!(
            output_len >= MIN_HASH_SIZE,
            "hash output below 256 bits has security consequences"
        );
        Self {
            strobe: Strobe::new(DOMAIN_HASH, SecurityLevel::Bits128),
            streaming: false,
            output_len,
        }
    }

    /// Absorb a chunk of a contiguous byte stream.
    pub fn write(&mut self, input: &[u8]) {
        self.strobe.ad(input, self.streaming);
        self.streaming = true;
    }

    /// Absorb one structural field, separated from whatever surrounds it.
    pub fn write_tuple(&mut self, input: &[u8]) {
        self.strobe.ad(input, false);
    }

    /// Produce the digest of everything absorbed so far.
    ///
    /// The duplex is cloned first, so the hasher stays valid for further
    /// writes and repeated sums.
    pub fn sum(&self) -> Vec<u8> {
        let mut reader = self.strobe.clone();
        let mut out = vec![0u8; self.output_len];
        reader.prf(&mut out, false);
        out
    }
}

impl io::Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Hasher::write(self, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Stretch `input_key` into `output_len` bytes of key material.
///
/// Panics if `input_key` carries fewer than 128 bits.
pub fn derive_keys(input_key: &[u8], output_len: usize) -> Vec<u8> {
    assert!(
        input_key.len() >= MIN_KEY_SIZE,
        "deriving keys from less than 128 bits has security consequences"
    );
    let mut kdf = Strobe::new(DOMAIN_KDF, SecurityLevel::Bits128);
    kdf.ad(input_key, false);
    let mut out = vec![0u8; output_len];
    kdf.prf(&mut out, false);
    out
}

/// Authenticate a cleartext message: returns `plaintext || tag`.
///
/// Panics if `key` carries fewer than 128 bits.
pub fn protect_integrity(key: &[u8], plaintext: &[u8]) -> Vec<u8> {
    assert!(
        key.len() >= MIN_KEY_SIZE,
        "using a key of less than 128 bits has security consequences"
    );
    let mut mac = Strobe::new(DOMAIN_MAC, SecurityLevel::Bits128);
    mac.ad(key, false);
    mac.ad(plaintext, false);

    let mut out = Vec::with_capacity(plaintext.len() + TAG_SIZE);
    out.extend_from_slice(plaintext);
    let mut tag = [0u8; TAG_SIZE];
    mac.send_mac(&mut tag);
    out.extend_from_slice(&tag);
    out
}

/// Verify a message produced by [`protect_integrity`] and return the
/// plaintext without its tag.
pub fn verify_integrity(key: &[u8], plaintext_and_tag: &[u8]) -> Result<Vec<u8>> {
    assert!(
        key.len() >= MIN_KEY_SIZE,
        "using a key of less than 128 bits has security consequences"
    );
    if plaintext_and_tag.len() < TAG_SIZE {
        return Err(Error::Decrypt);
    }
    let offset = plaintext_and_tag.len() - TAG_SIZE;
    let (plaintext, tag) = plaintext_and_tag.split_at(offset);

    let mut mac = Strobe::new(DOMAIN_MAC, SecurityLevel::Bits128);
    mac.ad(key, false);
    mac.ad(plaintext, false);

    let mut tag = <[u8; TAG_SIZE]>::try_from(tag).unwrap();
    mac.recv_mac(&mut tag)?;
    Ok(plaintext.to_vec())
}

/// Encrypt `plaintext` under `key`: returns `nonce(24) || ciphertext || tag(16)`.
///
/// Panics if `key` carries fewer than 128 bits. Fails only if the system
/// randomness source does, in which case there is nothing safe to emit.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    assert!(
        key.len() >= MIN_KEY_SIZE,
        "using a key of less than 128 bits has security consequences"
    );
    seal(DOMAIN_AE, key, None, plaintext)
}

/// Decrypt a message produced by [`encrypt`].
pub fn decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if key.len() < MIN_KEY_SIZE {
        return Err(Error::Decrypt);
    }
    open(DOMAIN_AE, key, None, ciphertext)
}

/// Like [`encrypt`], additionally binding `ad` into the authentication tag.
/// `ad` itself is not part of the ciphertext and must travel separately.
pub fn encrypt_and_authenticate(key: &[u8], plaintext: &[u8], ad: &[u8]) -> Result<Vec<u8>> {
    assert!(
        key.len() >= MIN_KEY_SIZE,
        "using a key of less than 128 bits has security consequences"
    );
    seal(DOMAIN_AEAD, key, Some(ad), plaintext)
}

/// Decrypt a message produced by [`encrypt_and_authenticate`]. The same `ad`
/// must be presented or authentication fails.
pub fn decrypt_and_authenticate(key: &[u8], ciphertext: &[u8], ad: &[u8]) -> Result<Vec<u8>> {
    if key.len() < MIN_KEY_SIZE {
        return Err(Error::Decrypt);
    }
    open(DOMAIN_AEAD, key, Some(ad), ciphertext)
}

fn seal(domain: &[u8], key: &[u8], ad: Option<&[u8]>, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut ae = Strobe::new(domain, SecurityLevel::Bits128);
    ae.ad(key, false);
    if let Some(ad) = ad {
        ae.ad(ad, false);
    }
    let nonce = random_bytes::<NONCE_SIZE>()?;
    ae.ad(&nonce, false);

    let mut out = Vec::with_capacity(NONCE_SIZE + plaintext.len() + TAG_SIZE);
    out.extend_from_slice(&nonce);
    let body_start = out.len();
    out.extend_from_slice(plaintext);
    ae.send_enc(&mut out[body_start..], false);
    let mut tag = [0u8; TAG_SIZE];
    ae.send_mac(&mut tag);
    out.extend_from_slice(&tag);
    Ok(out)
}

fn open(domain: &[u8], key: &[u8], ad: Option<&[u8]>, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < MIN_CIPHERTEXT_SIZE {
        return Err(Error::Decrypt);
    }
    let mut ae = Strobe::new(domain, SecurityLevel::Bits128);
    ae.ad(key, false);
    if let Some(ad) = ad {
        ae.ad(ad, false);
    }
    ae.ad(&ciphertext[..NONCE_SIZE], false);

    let tag_start = ciphertext.len() - TAG_SIZE;
    let mut plaintext = ciphertext[NONCE_SIZE..tag_start].to_vec();
    ae.recv_enc(&mut plaintext, false);
    let mut tag = <[u8; TAG_SIZE]>::try_from(&ciphertext[tag_start..]).unwrap();
    ae.recv_mac(&mut tag)?;
    Ok(plaintext)
}
