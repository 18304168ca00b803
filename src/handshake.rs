/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The handshake state machine: a uniform interpreter over the pattern
//! catalogue. Each `write_message`/`read_message` call consumes exactly one
//! message pattern, and consuming the last one splits the duplex into the
//! two transport halves.

use std::collections::VecDeque;

use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::keys::KeyPair;
use crate::patterns::{HandshakePattern, Token};
use crate::proto::{DH_LEN, PROTOCOL_PREFIX, PROTOCOL_SUFFIX, TAG_SIZE};
use crate::strobe::{Strobe, STROBE_SERIALIZED_SIZE};
use crate::symmetric_state::SymmetricState;

/// The two independent duplex halves produced by a completed handshake,
/// already mapped to this side's role: `tx` encrypts outgoing records and
/// `rx` decrypts incoming ones.
pub struct TransportPair {
    pub tx: Strobe,
    pub rx: Strobe,
}

/// An in-progress Noise handshake over a single duplex.
pub struct HandshakeState {
    symmetric: SymmetricState,
    /// The local static key pair, if the pattern calls for one.
    s: Option<KeyPair>,
    /// The local ephemeral, generated when an `e` token is written.
    e: Option<KeyPair>,
    /// The remote static public key, pinned or received.
    rs: Option<[u8; DH_LEN]>,
    /// The remote ephemeral public key, received.
    re: Option<[u8; DH_LEN]>,
    initiator: bool,
    message_patterns: VecDeque<Vec<Token>>,
    should_write: bool,
    psk: Option<Zeroizing<Vec<u8>>>,
}

impl HandshakeState {
    /// Set up one side of a handshake.
    ///
    /// `prologue` is mixed into the transcript before anything else, so both
    /// sides must agree on it byte for byte. Key material mandated by the
    /// pattern's pre-messages must be present or this fails with
    /// [`Error::MissingKey`].
    pub fn initialize(
        pattern: HandshakePattern,
        initiator: bool,
        prologue: &[u8],
        s: Option<KeyPair>,
        rs: Option<[u8; DH_LEN]>,
        psk: Option<&[u8]>,
    ) -> Result<Self> {
        let spec = pattern.spec();

        if pattern.uses_psk() && psk.is_none() {
            return Err(Error::MissingKey("pre-shared key"));
        }

        let protocol_name = format!("{PROTOCOL_PREFIX}{}{PROTOCOL_SUFFIX}", spec.name);
        let mut symmetric = SymmetricState::initialize(&protocol_name);
        symmetric.mix_hash(prologue);

        // Pre-message public keys are hashed in pattern order, the
        // initiator's side first.
        for (side, tokens) in spec.pre_message.iter().enumerate() {
            let advertises_local = (side == 0) == initiator;
            for token in *tokens {
                match token {
                    Token::S if advertises_local => {
                        let s = s.as_ref().ok_or(Error::MissingKey("local static key"))?;
                        symmetric.mix_hash(&s.public());
                    }
                    Token::S => {
                        let rs = rs.as_ref().ok_or(Error::MissingKey("remote static key"))?;
                        symmetric.mix_hash(rs);
                    }
                    _ => unreachable!("only static keys appear in pre-messages"),
                }
            }
        }

        Ok(Self {
            symmetric,
            s,
            e: None,
            rs,
            re: None,
            initiator,
            message_patterns: spec.messages.iter().map(|m| m.to_vec()).collect(),
            should_write: initiator,
            psk: psk.map(|p| Zeroizing::new(p.to_vec())),
        })
    }

    /// Whether the next step for this side is `write_message`.
    pub fn should_write(&self) -> bool {
        self.should_write
    }

    /// Whether every message pattern has been consumed.
    pub fn is_complete(&self) -> bool {
        self.message_patterns.is_empty()
    }

    pub(crate) fn remaining_messages(&self) -> usize {
        self.message_patterns.len()
    }

    /// The peer's static public key, once pinned or received.
    pub fn remote_static(&self) -> Option<[u8; DH_LEN]> {
        self.rs
    }

    /// A transcript digest for channel binding; identical on both peers once
    /// they have processed the same messages.
    pub fn handshake_hash(&self) -> [u8; 32] {
        self.symmetric.handshake_hash()
    }

    /// Produce the next handshake message into `message`: the token outputs
    /// for one message pattern followed by the (possibly encrypted) payload.
    ///
    /// Returns the transport halves when this message completes the
    /// handshake. Calling this when it is the peer's turn is a caller bug
    /// and panics.
    pub fn write_message(
        &mut self,
        payload: &[u8],
        message: &mut Vec<u8>,
    ) -> Result<Option<TransportPair>> {
        assert!(
            self.should_write,
            "write_message called when it is the peer's turn to write"
        );
        let pattern = self.message_patterns.pop_front().ok_or(Error::NoMorePatterns)?;

        for token in pattern {
            match token {
                Token::E => {
                    let e = KeyPair::generate()?;
                    message.extend_from_slice(&e.public());
                    self.symmetric.mix_hash(&e.public());
                    if self.psk.is_some() {
                        self.symmetric.mix_key(&e.public());
                    }
                    self.e = Some(e);
                }
                Token::S => {
                    let s = self.s.as_ref().ok_or(Error::MissingKey("local static key"))?;
                    let ciphertext = self.symmetric.encrypt_and_hash(&s.public());
                    message.extend_from_slice(&ciphertext);
                }
                Token::Psk => {
                    let psk = self.psk.as_ref().ok_or(Error::MissingKey("pre-shared key"))?;
                    self.symmetric.mix_key_and_hash(psk);
                }
                dh => self.mix_dh(dh)?,
            }
        }

        let ciphertext = self.symmetric.encrypt_and_hash(payload);
        message.extend_from_slice(&ciphertext);

        self.should_write = false;
        Ok(self.finish_if_complete())
    }

    /// Consume one handshake message, appending its decrypted payload to
    /// `payload`. The mirror image of [`HandshakeState::write_message`].
    pub fn read_message(
        &mut self,
        message: &[u8],
        payload: &mut Vec<u8>,
    ) -> Result<Option<TransportPair>> {
        assert!(
            !self.should_write,
            "read_message called when it is this side's turn to write"
        );
        let pattern = self.message_patterns.pop_front().ok_or(Error::NoMorePatterns)?;

        let mut offset = 0;
        for token in pattern {
            match token {
                Token::E => {
                    let end = offset + DH_LEN;
                    let re: [u8; DH_LEN] = message
                        .get(offset..end)
                        .ok_or(Error::ShortMessage)?
                        .try_into()
                        .unwrap();
                    offset = end;
                    self.symmetric.mix_hash(&re);
                    if self.psk.is_some() {
                        self.symmetric.mix_key(&re);
                    }
                    self.re = Some(re);
                }
                Token::S => {
                    // The static key travels encrypted (and grows a tag) once
                    // any key has been mixed.
                    let len = if self.symmetric.is_keyed() {
                        DH_LEN + TAG_SIZE
                    } else {
                        DH_LEN
                    };
                    let end = offset + len;
                    let ciphertext = message.get(offset..end).ok_or(Error::ShortMessage)?;
                    let plaintext = self.symmetric.decrypt_and_hash(ciphertext)?;
                    offset = end;
                    self.rs = Some(plaintext.as_slice().try_into().unwrap());
                }
                Token::Psk => {
                    let psk = self.psk.as_ref().ok_or(Error::MissingKey("pre-shared key"))?;
                    self.symmetric.mix_key_and_hash(psk);
                }
                dh => self.mix_dh(dh)?,
            }
        }

        let plaintext = self.symmetric.decrypt_and_hash(&message[offset..])?;
        payload.extend_from_slice(&plaintext);

        self.should_write = true;
        Ok(self.finish_if_complete())
    }

    /// Perform the DH a token names and mix the shared secret. Which local
    /// key pairs with which remote key depends on this side's role.
    fn mix_dh(&mut self, token: Token) -> Result<()> {
        let e = || self.e.as_ref().ok_or(Error::MissingKey("local ephemeral key"));
        let s = || self.s.as_ref().ok_or(Error::MissingKey("local static key"));
        let re = || self.re.as_ref().ok_or(Error::MissingKey("remote ephemeral key"));
        let rs = || self.rs.as_ref().ok_or(Error::MissingKey("remote static key"));

        let shared = match token {
            Token::Ee => e()?.dh(re()?),
            Token::Es if self.initiator => e()?.dh(rs()?),
            Token::Es => s()?.dh(re()?),
            Token::Se if self.initiator => s()?.dh(re()?),
            Token::Se => e()?.dh(rs()?),
            Token::Ss => s()?.dh(rs()?),
            _ => unreachable!("not a DH token"),
        };
        self.symmetric.mix_key(&shared);
        Ok(())
    }

    fn finish_if_complete(&mut self) -> Option<TransportPair> {
        if !self.message_patterns.is_empty() {
            return None;
        }
        let (initiator_half, responder_half) = self.symmetric.split();
        // The ephemeral has served its purpose; drop it now rather than when
        // the whole state goes away.
        self.e = None;
        Some(if self.initiator {
            TransportPair { tx: initiator_half, rx: responder_half }
        } else {
            TransportPair { tx: responder_half, rx: initiator_half }
        })
    }
}

/* Handshake suspension.
 *
 * A handshake can be serialized mid-flight and resumed later, possibly in
 * another process. The static private key and the psk are deliberately never
 * part of the serialization; the caller must present them again on recovery.
 */

const EMPTY_KEY: [u8; DH_LEN] = [0u8; DH_LEN];

impl HandshakeState {
    /// Encode this state into a fixed-order byte layout.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 * DH_LEN + 8 + STROBE_SERIALIZED_SIZE);

        out.extend_from_slice(&self.s.as_ref().map_or(EMPTY_KEY, |s| s.public()));
        match &self.e {
            Some(e) => {
                out.extend_from_slice(&e.private_bytes());
                out.extend_from_slice(&e.public());
            }
            None => {
                out.extend_from_slice(&EMPTY_KEY);
                out.extend_from_slice(&EMPTY_KEY);
            }
        }
        out.extend_from_slice(&self.rs.unwrap_or(EMPTY_KEY));
        out.extend_from_slice(&self.re.unwrap_or(EMPTY_KEY));
        out.push(u8::from(self.initiator));

        out.extend_from_slice(&(self.message_patterns.len() as u16).to_le_bytes());
        for pattern in &self.message_patterns {
            out.extend_from_slice(&(pattern.len() as u16).to_le_bytes());
            out.extend(pattern.iter().map(|t| t.to_byte()));
        }

        out.push(u8::from(self.should_write));
        out.push(u8::from(self.symmetric.is_keyed()));
        out.extend_from_slice(&self.symmetric.serialize_strobe());
        out
    }

    /// Rebuild a handshake from [`HandshakeState::serialize`] output.
    ///
    /// The supplied static key pair must match the serialized public key
    /// ([`Error::MismatchedKey`]); a psk must be re-supplied if the pattern
    /// uses one. Structurally invalid input is [`Error::MalformedState`].
    pub fn recover(
        serialized: &[u8],
        psk: Option<&[u8]>,
        s: Option<&KeyPair>,
    ) -> Result<Self> {
        let mut cursor = Cursor::new(serialized);

        let s_public: [u8; DH_LEN] = cursor.take(DH_LEN)?.try_into().unwrap();
        let s = match (s_public != EMPTY_KEY, s) {
            (true, Some(kp)) if kp.public() == s_public => Some(kp.clone()),
            (false, None) => None,
            _ => return Err(Error::MismatchedKey),
        };

        let e_private: [u8; DH_LEN] = cursor.take(DH_LEN)?.try_into().unwrap();
        let e_public: [u8; DH_LEN] = cursor.take(DH_LEN)?.try_into().unwrap();
        let e = if e_private != EMPTY_KEY {
            let e = KeyPair::from_private_key(&e_private);
            if e.public() != e_public {
                return Err(Error::MalformedState);
            }
            Some(e)
        } else {
            None
        };

        let rs: [u8; DH_LEN] = cursor.take(DH_LEN)?.try_into().unwrap();
        let re: [u8; DH_LEN] = cursor.take(DH_LEN)?.try_into().unwrap();
        let initiator = cursor.take_bool()?;

        let pattern_count = cursor.take_u16()?;
        let mut message_patterns = VecDeque::with_capacity(usize::from(pattern_count));
        for _ in 0..pattern_count {
            let token_count = cursor.take_u16()?;
            let tokens = cursor.take(usize::from(token_count))?;
            let pattern = tokens
                .iter()
                .map(|&b| Token::from_byte(b).ok_or(Error::MalformedState))
                .collect::<Result<Vec<Token>>>()?;
            message_patterns.push_back(pattern);
        }

        let should_write = cursor.take_bool()?;
        let is_keyed = cursor.take_bool()?;
        let strobe = Strobe::recover(cursor.rest())?;

        Ok(Self {
            symmetric: SymmetricState::from_parts(strobe, is_keyed),
            s,
            e,
            rs: (rs != EMPTY_KEY).then_some(rs),
            re: (re != EMPTY_KEY).then_some(re),
            initiator,
            message_patterns,
            should_write,
            psk: psk.map(|p| Zeroizing::new(p.to_vec())),
        })
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(Error::MalformedState);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn take_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn take_bool(&mut self) -> Result<bool> {
        match self.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(Error::MalformedState),
        }
    }

    fn rest(&self) -> &'a [u8] {
        self.buf
    }
}
