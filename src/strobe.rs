/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The STROBE duplex over Keccak-f[1600].
//!
//! This is the cryptographic heart of the crate: every other module is a thin
//! wrapper that drives one of these state machines with a domain-separated
//! initialization string. See <https://strobe.sourceforge.io/specs> for the
//! framework specification; section references in comments below point there.

use subtle::{Choice, ConstantTimeEq};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// The number of words in the permutation state.
const STATE_SIZE_U64: usize = 25;
/// The number of bytes in the permutation state.
const STATE_SIZE_U8: usize = STATE_SIZE_U64 * 8;

// 6.2: Operations and flags.
type Flags = u8;

// Inbound flag. Set when receiving data.
const FLAG_I: Flags = 0b0000_0001;
// Application flag. Set when data moves to or from the application.
const FLAG_A: Flags = 0b0000_0010;
// Cipher flag. Set when the output depends on the cipher state.
const FLAG_C: Flags = 0b0000_0100;
// Transport flag. Set when the operation sends or receives data on the transport.
const FLAG_T: Flags = 0b0000_1000;
// Meta flag. Set when the operation handles framing or protocol metadata.
const FLAG_M: Flags = 0b0001_0000;
// Keytree flag. Reserved by the framework; forces a permutation like C does.
const FLAG_K: Flags = 0b0010_0000;

/// Security level of a duplex instance, fixing the sponge rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Zeroize)]
pub enum SecurityLevel {
    Bits128,
    Bits256,
}

impl SecurityLevel {
    /// Capacity strength in bytes (security bits / 8).
    pub(crate) fn strength(self) -> usize {
        match self {
            SecurityLevel::Bits128 => 16,
            SecurityLevel::Bits256 => 32,
        }
    }

    /// The byte rate of the sponge: total state minus capacity minus the
    /// two bytes reserved for framework padding.
    pub(crate) fn rate(self) -> u8 {
        (STATE_SIZE_U8 - 2 * self.strength() - 2) as u8
    }

    fn from_strength(strength: u8) -> Option<Self> {
        match strength {
            16 => Some(SecurityLevel::Bits128),
            32 => Some(SecurityLevel::Bits256),
            _ => None,
        }
    }
}

/// Which side of a transport conversation this duplex is. Pinned by the first
/// T-flagged operation so that both peers absorb identical flag bytes.
#[derive(Clone, Copy, Debug, PartialEq, Zeroize)]
#[repr(u8)]
enum Role {
    Initiator = 0,
    Responder = 1,
    Undecided = 2,
}

impl Role {
    fn to_flag(self) -> Flags {
        match self {
            Role::Initiator => 0,
            Role::Responder => 1,
            Role::Undecided => panic!("undecided duplex role used in a transport operation"),
        }
    }

    fn from_byte(x: u8) -> Self {
        match x {
            0 => Role::Initiator,
            1 => Role::Responder,
            _ => Role::Undecided,
        }
    }
}

/// A buffer of state bytes aligned so it can be reinterpreted as the
/// `[u64; 25]` lanes the permutation operates on.
#[derive(Clone, Zeroize)]
#[repr(align(8))]
struct AlignedState([u8; STATE_SIZE_U8]);

impl AlignedState {
    fn permute(&mut self) {
        // SAFETY: the struct is 8-byte aligned and exactly 25 * 8 bytes long.
        let lanes = unsafe { &mut *(self as *mut Self as *mut [u64; STATE_SIZE_U64]) };
        // The duplex addresses the state as little-endian lanes; correct for
        // big-endian hosts around the permutation.
        for lane in lanes.iter_mut() {
            *lane = u64::from_le(*lane);
        }
        keccak::f1600(lanes);
        for lane in lanes.iter_mut() {
            *lane = u64::to_le(*lane);
        }
    }
}

fn check_zero(data: &[u8]) -> Result<()> {
    let mut ok = Choice::from(1);
    for b in data {
        ok &= b.ct_eq(&0u8);
    }
    if bool::from(ok) {
        Ok(())
    } else {
        Err(Error::Decrypt)
    }
}

/// A keyed duplex object.
///
/// The sponge buffer together with the cursor is sufficient to reproduce any
/// future output; cloning is a deep copy and the whole state is wiped on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct Strobe {
    state: AlignedState,
    pos: u8,
    pos_begin: u8,
    rate: u8,
    security: SecurityLevel,
    role: Role,
    cur_flags: Flags,
}

/// Serialized size of a duplex: a 9-byte header followed by the full sponge.
pub const STROBE_SERIALIZED_SIZE: usize = 9 + STATE_SIZE_U8;

impl Strobe {
    /// Instantiate a fresh duplex bound to `protocol`.
    ///
    /// "5.1: The initial state of the object is as follows:
    ///   st = F([0x01, R+2, 0x01, 0x00, 0x01, 0x60] + ascii("STROBEvX.Y.Z"))
    ///   pos = posbegin = 0
    ///   I0 = None"
    pub fn new(protocol: &[u8], security: SecurityLevel) -> Self {
        let rate = security.rate();
        let mut state = AlignedState([0u8; STATE_SIZE_U8]);
        state.0[0..6].copy_from_slice(&[0x01, rate + 2, 0x01, 0x00, 0x01, 0x60]);
        state.0[6..18].copy_from_slice(b"STROBEv1.0.2");
        state.permute();

        let mut out = Self {
            state,
            pos: 0,
            pos_begin: 0,
            rate,
            security,
            role: Role::Undecided,
            cur_flags: 0,
        };
        out.meta_ad(protocol, false);
        out
    }

    /// Absorb associated data.
    pub fn ad(&mut self, data: &[u8], more: bool) {
        self.begin_op(FLAG_A, more);
        self.absorb(data);
    }

    /// Absorb framing metadata.
    pub fn meta_ad(&mut self, data: &[u8], more: bool) {
        self.begin_op(FLAG_M | FLAG_A, more);
        self.absorb(data);
    }

    /// Absorb key material, overwriting the corresponding state bytes.
    pub fn key(&mut self, data: &[u8], more: bool) {
        self.begin_op(FLAG_A | FLAG_C, more);
        self.overwrite(data);
    }

    /// Fill `out` with pseudorandom output, destroying the emitted state bytes.
    pub fn prf(&mut self, out: &mut [u8], more: bool) {
        self.begin_op(FLAG_I | FLAG_A | FLAG_C, more);
        self.squeeze(out);
    }

    /// Encrypt `data` in place with the running keystream. Unauthenticated on
    /// its own; callers follow up with [`Strobe::send_mac`].
    pub fn send_enc(&mut self, data: &mut [u8], more: bool) {
        self.begin_op(FLAG_A | FLAG_C | FLAG_T, more);
        self.absorb_and_set(data);
    }

    /// Decrypt `data` in place. The inverse of [`Strobe::send_enc`].
    pub fn recv_enc(&mut self, data: &mut [u8], more: bool) {
        self.begin_op(FLAG_I | FLAG_A | FLAG_C | FLAG_T, more);
        self.exchange(data);
    }

    /// Emit an authentication tag over everything absorbed so far.
    pub fn send_mac(&mut self, mac: &mut [u8]) {
        self.begin_op(FLAG_C | FLAG_T, false);
        self.copy_out(mac);
    }

    /// Verify a tag produced by the peer's [`Strobe::send_mac`].
    ///
    /// The comparison is constant time. Failure leaves the duplex
    /// desynchronized on purpose; callers must discard it.
    pub fn recv_mac(&mut self, mac: &mut [u8]) -> Result<()> {
        self.begin_op(FLAG_I | FLAG_C | FLAG_T, false);
        self.exchange(mac);
        check_zero(mac)
    }

    /// Destroy `len` bytes of sponge state, making prior keys unrecoverable.
    pub fn ratchet(&mut self, len: usize) {
        self.begin_op(FLAG_C, false);
        self.zero_out(len);
    }

    /// Encode the duplex into its fixed serialization layout.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(STROBE_SERIALIZED_SIZE);
        out.push(self.security.strength() as u8);
        out.push(self.rate);
        out.extend_from_slice(&u16::from(self.pos).to_le_bytes());
        out.extend_from_slice(&u16::from(self.pos_begin).to_le_bytes());
        out.push(self.role as u8);
        out.push(self.cur_flags);
        out.push(1); // initialized
        out.extend_from_slice(&self.state.0);
        out
    }

    /// Rebuild a duplex from [`Strobe::serialize`] output.
    pub fn recover(serialized: &[u8]) -> Result<Self> {
        if serialized.len() != STROBE_SERIALIZED_SIZE {
            return Err(Error::MalformedState);
        }
        let security = SecurityLevel::from_strength(serialized[0]).ok_or(Error::MalformedState)?;
        let rate = serialized[1];
        if rate != security.rate() {
            return Err(Error::MalformedState);
        }
        let pos = u16::from_le_bytes([serialized[2], serialized[3]]);
        let pos_begin = u16::from_le_bytes([serialized[4], serialized[5]]);
        if pos >= u16::from(rate) || pos_begin > u16::from(rate) {
            return Err(Error::MalformedState);
        }
        let role = Role::from_byte(serialized[6]);
        let cur_flags = serialized[7];
        if serialized[8] != 1 {
            return Err(Error::MalformedState);
        }
        let mut state = AlignedState([0u8; STATE_SIZE_U8]);
        state.0.copy_from_slice(&serialized[9..]);
        Ok(Self {
            state,
            pos: pos as u8,
            pos_begin: pos_begin as u8,
            rate,
            security,
            role,
            cur_flags,
        })
    }
}

impl Strobe {
    /// 7.1: running F. Pad, permute, reset the cursor.
    fn run_f(&mut self) {
        self.state.0[self.pos as usize] ^= self.pos_begin;
        self.state.0[self.pos as usize + 1] ^= 0x04;
        self.state.0[self.rate as usize + 1] ^= 0x80;
        self.state.permute();
        self.pos = 0;
        self.pos_begin = 0;
    }

    #[inline(always)]
    fn advance_pos(&mut self) {
        self.pos += 1;
        if self.pos == self.rate {
            self.run_f();
        }
    }

    fn absorb(&mut self, data: &[u8]) {
        for b in data {
            self.state.0[self.pos as usize] ^= b;
            self.advance_pos();
        }
    }

    fn absorb_and_set(&mut self, data: &mut [u8]) {
        for b in data {
            self.state.0[self.pos as usize] ^= *b;
            *b = self.state.0[self.pos as usize];
            self.advance_pos();
        }
    }

    fn overwrite(&mut self, data: &[u8]) {
        for &b in data {
            self.state.0[self.pos as usize] = b;
            self.advance_pos();
        }
    }

    fn zero_out(&mut self, len: usize) {
        for _ in 0..len {
            self.state.0[self.pos as usize] = 0;
            self.advance_pos();
        }
    }

    fn exchange(&mut self, data: &mut [u8]) {
        for b in data {
            let pos = self.pos as usize;
            *b ^= self.state.0[pos];
            self.state.0[pos] ^= *b;
            self.advance_pos();
        }
    }

    fn copy_out(&mut self, data: &mut [u8]) {
        for b in data {
            *b = self.state.0[self.pos as usize];
            self.advance_pos();
        }
    }

    fn squeeze(&mut self, data: &mut [u8]) {
        for b in data {
            let pos = self.pos as usize;
            *b = self.state.0[pos];
            self.state.0[pos] = 0;
            self.advance_pos();
        }
    }

    /// 7.3: beginning an operation.
    fn begin_op(&mut self, flags: Flags, more: bool) {
        if more {
            assert_eq!(
                self.cur_flags, flags,
                "cannot continue operation {:#04x} with {:#04x}",
                self.cur_flags, flags
            );
            return;
        }
        self.cur_flags = flags;

        // Transport operations must absorb the same direction bit on both
        // peers; the first one pins this duplex's role.
        let flags = if flags & FLAG_T != 0 {
            if let Role::Undecided = self.role {
                self.role = Role::from_byte(flags & FLAG_I);
            }
            flags ^ self.role.to_flag()
        } else {
            flags
        };

        let old_begin = self.pos_begin;
        self.pos_begin = self.pos + 1;

        self.absorb(&[old_begin, flags]);

        let force_f = (flags & (FLAG_C | FLAG_K)) != 0;
        if force_f && self.pos != 0 {
            self.run_f();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streamed_absorb_equals_one_shot() {
        let mut a = Strobe::new(b"test protocol", SecurityLevel::Bits128);
        a.ad(b"hello world", false);

        let mut b = Strobe::new(b"test protocol", SecurityLevel::Bits128);
        b.ad(b"hello", false);
        b.ad(b" world", true);

        let (mut out_a, mut out_b) = ([0u8; 32], [0u8; 32]);
        a.prf(&mut out_a, false);
        b.prf(&mut out_b, false);
        assert_eq!(out_a, out_b);
    }

    #[test]
    fn separate_absorbs_differ_from_one_shot() {
        let mut a = Strobe::new(b"test protocol", SecurityLevel::Bits128);
        a.ad(b"hello world", false);

        let mut b = Strobe::new(b"test protocol", SecurityLevel::Bits128);
        b.ad(b"hello", false);
        b.ad(b" world", false);

        let (mut out_a, mut out_b) = ([0u8; 32], [0u8; 32]);
        a.prf(&mut out_a, false);
        b.prf(&mut out_b, false);
        assert_ne!(out_a, out_b);
    }

    #[test]
    fn authenticated_encryption_round_trip() {
        let key = [0xAA; 32];
        let message = *b"an important message that needs to cross a rate boundary eventually";

        let mut sealed = message;
        let mut tag = [0u8; 16];
        {
            let mut tx = Strobe::new(b"test protocol", SecurityLevel::Bits128);
            tx.key(&key, false);
            tx.send_enc(&mut sealed, false);
            tx.send_mac(&mut tag);
        }
        assert_ne!(message, sealed);

        let mut rx = Strobe::new(b"test protocol", SecurityLevel::Bits128);
        rx.key(&key, false);
        let mut opened = sealed;
        rx.recv_enc(&mut opened, false);
        assert_eq!(message, opened);

        let mut bad_tag = tag;
        bad_tag[0] ^= 0x01;
        assert!(rx.clone().recv_mac(&mut bad_tag).is_err());
        assert!(rx.recv_mac(&mut tag).is_ok());
    }

    #[test]
    fn clone_produces_identical_outputs() {
        let mut s = Strobe::new(b"test protocol", SecurityLevel::Bits128);
        s.ad(b"some shared history", false);
        let mut c = s.clone();

        let (mut out_s, mut out_c) = ([0u8; 64], [0u8; 64]);
        s.ad(b"more", false);
        c.ad(b"more", false);
        s.prf(&mut out_s, false);
        c.prf(&mut out_c, false);
        assert_eq!(out_s, out_c);
    }

    #[test]
    fn serialize_recover_round_trip() {
        let mut s = Strobe::new(b"test protocol", SecurityLevel::Bits128);
        s.key(&[0x42; 32], false);
        let mut scratch = *b"ciphertext pins the transport role before serialization";
        s.send_enc(&mut scratch, false);

        let mut r = Strobe::recover(&s.serialize()).unwrap();
        assert_eq!(s.serialize(), r.serialize());

        // Both must keep producing identical output streams.
        let (mut out_s, mut out_r) = ([0u8; 48], [0u8; 48]);
        s.prf(&mut out_s, false);
        r.prf(&mut out_r, false);
        assert_eq!(out_s, out_r);
    }

    #[test]
    fn recover_rejects_malformed_input() {
        let s = Strobe::new(b"test protocol", SecurityLevel::Bits128);
        let good = s.serialize();

        assert!(Strobe::recover(&good[..good.len() - 1]).is_err());

        let mut bad_rate = good.clone();
        bad_rate[1] = 77;
        assert!(Strobe::recover(&bad_rate).is_err());

        let mut uninitialized = good.clone();
        uninitialized[8] = 0;
        assert!(Strobe::recover(&uninitialized).is_err());

        let mut bad_pos = good;
        bad_pos[2..4].copy_from_slice(&200u16.to_le_bytes());
        assert!(Strobe::recover(&bad_pos).is_err());
    }

    #[test]
    fn ratchet_prevents_state_rollback() {
        let mut a = Strobe::new(b"test protocol", SecurityLevel::Bits128);
        a.key(&[0x07; 32], false);
        let mut b = a.clone();

        a.ratchet(32);
        b.ratchet(32);
        let (mut out_a, mut out_b) = ([0u8; 32], [0u8; 32]);
        a.prf(&mut out_a, false);
        b.prf(&mut out_b, false);
        // Ratcheting is deterministic...
        assert_eq!(out_a, out_b);

        // ...but a ratcheted duplex diverges from an unratcheted clone.
        let mut c = Strobe::new(b"test protocol", SecurityLevel::Bits128);
        c.key(&[0x07; 32], false);
        let mut out_c = [0u8; 32];
        c.prf(&mut out_c, false);
        assert_ne!(out_a, out_c);
    }

    #[test]
    fn security_levels_fix_the_rate() {
        assert_eq!(SecurityLevel::Bits128.rate(), 166);
        assert_eq!(SecurityLevel::Bits256.rate(), 134);
    }
}
