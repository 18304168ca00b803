/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

/* Common constants */

/// The size in bytes of an X25519 public key and of a DH output.
pub const DH_LEN: usize = 32;

/// The size in bytes of every authentication tag produced by the duplex.
pub const TAG_SIZE: usize = 16;

/// The size in bytes of the random nonce prepended to `encrypt` and
/// `encrypt_and_authenticate` ciphertexts.
pub const NONCE_SIZE: usize = 24;

pub(crate) const MIN_CIPHERTEXT_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// Keys absorbed by the symmetric primitives must carry at least 128 bits.
pub(crate) const MIN_KEY_SIZE: usize = 16;

/// Hash and KDF outputs shorter than 256 bits are refused.
pub(crate) const MIN_HASH_SIZE: usize = 32;

/* Record framing constants */

/// Every record on the wire is `length (2 bytes, big endian) || payload`,
/// so no single message can exceed what the prefix can describe.
pub(crate) const MAX_MESSAGE_SIZE: usize = 65535;

/// Maximum plaintext carried by one transport record, leaving room for the tag.
pub(crate) const MAX_PLAINTEXT_SIZE: usize = MAX_MESSAGE_SIZE - TAG_SIZE;

pub(crate) const LEN_PREFIX_SIZE: usize = 2;

/* Protocol names */

pub(crate) const PROTOCOL_PREFIX: &str = "Noise_";
pub(crate) const PROTOCOL_SUFFIX: &str = "_25519_STROBEv1.0.2";

pub(crate) const DOMAIN_HASH: &[u8] = b"DiscoHash";
pub(crate) const DOMAIN_KDF: &[u8] = b"DiscoKDF";
pub(crate) const DOMAIN_MAC: &[u8] = b"DiscoMAC";
pub(crate) const DOMAIN_AE: &[u8] = b"DiscoAE";
pub(crate) const DOMAIN_AEAD: &[u8] = b"DiscoAEAD";

/// Labels absorbed into the two duplex halves at split time.
pub(crate) const LABEL_INITIATOR: &[u8] = b"initiator";
pub(crate) const LABEL_RESPONDER: &[u8] = b"responder";

/// Bytes of sponge state destroyed by the post-split ratchet.
pub(crate) const SPLIT_RATCHET_SIZE: usize = 32;
