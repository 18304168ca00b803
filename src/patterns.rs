/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The handshake pattern catalogue.
//!
//! A pattern is nothing more than a name, two pre-message token sequences and
//! an ordered list of message token sequences; the interpreter in
//! `handshake.rs` consumes them uniformly. Pattern semantics follow Sections
//! 7.2 and 7.3 of the Noise specification.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// One step of a message pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token {
    /// Emit or consume an ephemeral public key.
    E,
    /// Emit or consume a (possibly encrypted) static public key.
    S,
    /// DH between the two ephemerals.
    Ee,
    /// DH between the initiator's ephemeral and the responder's static.
    Es,
    /// DH between the initiator's static and the responder's ephemeral.
    Se,
    /// DH between the two statics.
    Ss,
    /// Mix the pre-shared key.
    Psk,
}

impl Token {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            Token::E => 1,
            Token::S => 2,
            Token::Es => 3,
            Token::Se => 4,
            Token::Ss => 5,
            Token::Ee => 6,
            Token::Psk => 7,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Token::E),
            2 => Some(Token::S),
            3 => Some(Token::Es),
            4 => Some(Token::Se),
            5 => Some(Token::Ss),
            6 => Some(Token::Ee),
            7 => Some(Token::Psk),
            _ => None,
        }
    }
}

pub(crate) struct PatternSpec {
    pub(crate) name: &'static str,
    /// Pre-message tokens: `[initiator side, responder side]`.
    pub(crate) pre_message: [&'static [Token]; 2],
    pub(crate) messages: &'static [&'static [Token]],
}

use Token::{Ee, Es, Psk, Se, Ss, E, S};

/// The handshakes this crate knows how to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakePattern {
    /// One-way: the recipient's static key is known in advance, the sender
    /// stays anonymous.
    N,
    /// One-way: both static keys are known in advance.
    K,
    /// One-way: the sender transmits its static key during the handshake.
    X,
    /// Both static keys known in advance.
    KK,
    /// The responder transmits its static key; the initiator must validate
    /// it via the verifier callback. The "HTTPS-like" pattern.
    NX,
    /// The responder's static key is pinned in advance. The "public key
    /// pinning" pattern.
    NK,
    /// Both sides transmit their static keys and validate each other's.
    XX,
    /// The initiator's static key is known in advance, the responder
    /// transmits its own.
    KX,
    /// The responder's static key is known in advance, the initiator
    /// transmits its own in the final message.
    XK,
    /// The responder's static key is known in advance, the initiator
    /// transmits its own immediately.
    IK,
    /// Both sides transmit their static keys, the initiator immediately.
    IX,
    /// Anonymous interactive handshake authenticated by a pre-shared key.
    NNpsk2,
}

static N_SPEC: PatternSpec = PatternSpec {
    name: "N",
    pre_message: [&[], &[S]],
    messages: &[&[E, Es]],
};
static K_SPEC: PatternSpec = PatternSpec {
    name: "K",
    pre_message: [&[S], &[S]],
    messages: &[&[E, Es, Ss]],
};
static X_SPEC: PatternSpec = PatternSpec {
    name: "X",
    pre_message: [&[], &[S]],
    messages: &[&[E, Es, S, Ss]],
};
static KK_SPEC: PatternSpec = PatternSpec {
    name: "KK",
    pre_message: [&[S], &[S]],
    messages: &[&[E, Es, Ss], &[E, Ee, Se]],
};
static NX_SPEC: PatternSpec = PatternSpec {
    name: "NX",
    pre_message: [&[], &[]],
    messages: &[&[E], &[E, Ee, S, Es]],
};
static NK_SPEC: PatternSpec = PatternSpec {
    name: "NK",
    pre_message: [&[], &[S]],
    messages: &[&[E, Es], &[E, Ee]],
};
static XX_SPEC: PatternSpec = PatternSpec {
    name: "XX",
    pre_message: [&[], &[]],
    messages: &[&[E], &[E, Ee, S, Es], &[S, Se]],
};
static KX_SPEC: PatternSpec = PatternSpec {
    name: "KX",
    pre_message: [&[S], &[]],
    messages: &[&[E], &[E, Ee, Se, S, Es]],
};
static XK_SPEC: PatternSpec = PatternSpec {
    name: "XK",
    pre_message: [&[], &[S]],
    messages: &[&[E, Es], &[E, Ee], &[S, Se]],
};
static IK_SPEC: PatternSpec = PatternSpec {
    name: "IK",
    pre_message: [&[], &[S]],
    messages: &[&[E, Es, S, Ss], &[E, Ee, Se]],
};
static IX_SPEC: PatternSpec = PatternSpec {
    name: "IX",
    pre_message: [&[], &[]],
    messages: &[&[E, S], &[E, Ee, Se, S, Es]],
};
static NNPSK2_SPEC: PatternSpec = PatternSpec {
    name: "NNpsk2",
    pre_message: [&[], &[]],
    messages: &[&[E], &[E, Ee, Psk]],
};

impl HandshakePattern {
    pub(crate) fn spec(self) -> &'static PatternSpec {
        match self {
            HandshakePattern::N => &N_SPEC,
            HandshakePattern::K => &K_SPEC,
            HandshakePattern::X => &X_SPEC,
            HandshakePattern::KK => &KK_SPEC,
            HandshakePattern::NX => &NX_SPEC,
            HandshakePattern::NK => &NK_SPEC,
            HandshakePattern::XX => &XX_SPEC,
            HandshakePattern::KX => &KX_SPEC,
            HandshakePattern::XK => &XK_SPEC,
            HandshakePattern::IK => &IK_SPEC,
            HandshakePattern::IX => &IX_SPEC,
            HandshakePattern::NNpsk2 => &NNPSK2_SPEC,
        }
    }

    /// One-way patterns carry data from initiator to responder only.
    pub fn is_one_way(self) -> bool {
        matches!(
            self,
            HandshakePattern::N | HandshakePattern::K | HandshakePattern::X
        )
    }

    /// Whether any message pattern mixes a pre-shared key.
    pub(crate) fn uses_psk(self) -> bool {
        self.spec()
            .messages
            .iter()
            .any(|m| m.contains(&Token::Psk))
    }

    /// Whether the given side sends its static key inside a handshake message.
    /// The initiator writes the even-numbered messages, the responder the odd.
    pub(crate) fn transmits_static(self, initiator: bool) -> bool {
        self.spec()
            .messages
            .iter()
            .enumerate()
            .filter(|(i, _)| (i % 2 == 0) == initiator)
            .any(|(_, m)| m.contains(&Token::S))
    }

    /// Whether the given side will receive the peer's static key on the wire
    /// and therefore must be able to validate it.
    pub(crate) fn receives_static(self, initiator: bool) -> bool {
        self.transmits_static(!initiator)
    }

    /// Whether the given side needs its own static key pair at all: either a
    /// pre-message advertises it or a message transmits it.
    pub(crate) fn requires_local_static(self, initiator: bool) -> bool {
        let side = usize::from(!initiator);
        !self.spec().pre_message[side].is_empty() || self.transmits_static(initiator)
    }

    /// Whether the given side must already know the peer's static key before
    /// the handshake starts (the peer's pre-message advertises it).
    pub(crate) fn requires_remote_static(self, initiator: bool) -> bool {
        let peer_side = usize::from(initiator);
        !self.spec().pre_message[peer_side].is_empty()
    }
}

impl fmt::Display for HandshakePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.spec().name)
    }
}

impl FromStr for HandshakePattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "N" => Ok(HandshakePattern::N),
            "K" => Ok(HandshakePattern::K),
            "X" => Ok(HandshakePattern::X),
            "KK" => Ok(HandshakePattern::KK),
            "NX" => Ok(HandshakePattern::NX),
            "NK" => Ok(HandshakePattern::NK),
            "XX" => Ok(HandshakePattern::XX),
            "KX" => Ok(HandshakePattern::KX),
            "XK" => Ok(HandshakePattern::XK),
            "IK" => Ok(HandshakePattern::IK),
            "IX" => Ok(HandshakePattern::IX),
            "NNpsk2" => Ok(HandshakePattern::NNpsk2),
            other => Err(Error::UnknownPattern(other.to_string())),
        }
    }
}
