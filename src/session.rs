/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The framed transport session: a bidirectional encrypted byte stream over
//! any `Read + Write` transport.
//!
//! Every record on the wire, handshake messages included, is
//! `length (2 bytes, big endian) || body`. Application plaintext is chunked
//! so that `body = ciphertext || tag` never exceeds what the length prefix
//! can express. A session drives its handshake lazily on first use, after
//! which it behaves like an ordinary I/O stream.

use std::io::{self, Read, Write};

use tracing::{debug, trace, warn};
use zeroize::Zeroize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::handshake::HandshakeState;
use crate::proto::{
    DH_LEN, LEN_PREFIX_SIZE, MAX_MESSAGE_SIZE, MAX_PLAINTEXT_SIZE, TAG_SIZE,
};
use crate::strobe::Strobe;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    /// Created; the handshake has not run yet.
    New,
    /// Handshake done, application data flows.
    Established,
    /// A cryptographic or I/O failure poisoned the duplex state.
    Failed,
    /// Explicitly closed; key material has been wiped.
    Closed,
}

/// The post-handshake duplex halves. In half-duplex mode both directions
/// share one duplex (the initiator-labeled half on both peers), so the
/// application must strictly alternate sends and receives.
enum Transport {
    Full { tx: Strobe, rx: Strobe },
    Half(Strobe),
}

impl Transport {
    fn tx(&mut self) -> &mut Strobe {
        match self {
            Transport::Full { tx, .. } => tx,
            Transport::Half(both) => both,
        }
    }

    fn rx(&mut self) -> &mut Strobe {
        match self {
            Transport::Full { rx, .. } => rx,
            Transport::Half(both) => both,
        }
    }
}

/// An encrypted session over an arbitrary byte stream.
///
/// A session is externally synchronized: drive it from one thread at a time
/// (`&mut self` enforces as much). Independent sessions are free to run on
/// as many threads as desired. Deadlines, timeouts and shutdown semantics
/// are those of the underlying stream; reach it through
/// [`Session::get_ref`]/[`Session::get_mut`].
pub struct Session<S> {
    stream: S,
    /// Present on configured sessions; `None` after [`Session::resume`].
    config: Option<Config>,
    is_client: bool,
    one_way: bool,
    state: SessionState,
    transport: Option<Transport>,
    read_buffer: Vec<u8>,
    read_pos: usize,
    remote_public: Option<[u8; DH_LEN]>,
    handshake_hash: Option<[u8; 32]>,
    remote_addr: Option<String>,
}

impl<S: Read + Write> Session<S> {
    /// Wrap `stream` as the initiator side of `config`'s handshake.
    pub fn client(stream: S, config: Config) -> Result<Self> {
        config.check(true)?;
        Ok(Self::new(stream, Some(config), true))
    }

    /// Wrap `stream` as the responder side of `config`'s handshake.
    pub fn server(stream: S, config: Config) -> Result<Self> {
        config.check(false)?;
        Ok(Self::new(stream, Some(config), false))
    }

    /// Re-create an established full-duplex session from two recovered
    /// transport halves (see [`Strobe::serialize`] and [`Strobe::recover`]).
    pub fn resume(stream: S, tx: Strobe, rx: Strobe) -> Self {
        let mut session = Self::new(stream, None, true);
        session.transport = Some(Transport::Full { tx, rx });
        session.state = SessionState::Established;
        session
    }

    fn new(stream: S, config: Option<Config>, is_client: bool) -> Self {
        let one_way = config.as_ref().map_or(false, |c| c.pattern.is_one_way());
        Self {
            stream,
            config,
            is_client,
            one_way,
            state: SessionState::New,
            transport: None,
            read_buffer: Vec::new(),
            read_pos: 0,
            remote_public: None,
            handshake_hash: None,
            remote_addr: None,
        }
    }

    /// Run the handshake now instead of on first I/O. Idempotent once the
    /// session is established.
    pub fn handshake(&mut self) -> Result<()> {
        match self.state {
            SessionState::New => match self.drive_handshake() {
                Ok(()) => Ok(()),
                Err(e) => {
                    self.state = SessionState::Failed;
                    Err(e)
                }
            },
            SessionState::Established => Ok(()),
            SessionState::Failed | SessionState::Closed => Err(self.dead_session()),
        }
    }

    /// Encrypt and send `plaintext`, chunked into as many records as needed.
    pub fn send(&mut self, plaintext: &[u8]) -> Result<usize> {
        self.handshake()?;
        if self.one_way && !self.is_client {
            return Err(one_way_violation("receiving end of a one-way pattern cannot send"));
        }
        for chunk in plaintext.chunks(MAX_PLAINTEXT_SIZE) {
            if let Err(e) = self.send_record(chunk) {
                // A partially written record cannot be retried; the duplex
                // has already advanced past it.
                self.state = SessionState::Failed;
                return Err(e);
            }
        }
        Ok(plaintext.len())
    }

    /// Receive decrypted bytes into `buf`, reading a new record from the
    /// stream only once previously decrypted data has been drained.
    /// Returns `Ok(0)` on a clean end of stream at a record boundary.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.handshake()?;
        if self.one_way && self.is_client {
            return Err(one_way_violation("sending end of a one-way pattern cannot receive"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        while self.read_pos == self.read_buffer.len() {
            match self.fill_read_buffer() {
                Ok(true) => {}
                Ok(false) => return Ok(0),
                Err(e) => {
                    self.state = SessionState::Failed;
                    return Err(e);
                }
            }
        }
        let available = &self.read_buffer[self.read_pos..];
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.read_pos += n;
        if self.read_pos == self.read_buffer.len() {
            self.read_buffer.zeroize();
            self.read_buffer.clear();
            self.read_pos = 0;
        }
        Ok(n)
    }

    /// Wipe the transport key material and refuse any further I/O.
    pub fn close(&mut self) {
        self.transport = None;
        self.read_buffer.zeroize();
        self.read_buffer.clear();
        self.read_pos = 0;
        self.state = SessionState::Closed;
        trace!("session closed");
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    /// The peer's static public key, once the handshake has authenticated one.
    pub fn remote_public_key(&self) -> Option<[u8; DH_LEN]> {
        self.remote_public
    }

    /// The channel-binding digest of the completed handshake.
    pub fn handshake_hash(&self) -> Option<[u8; 32]> {
        self.handshake_hash
    }

    /// Record a human-readable peer address for [`Session::remote_address`].
    pub fn set_remote_addr(&mut self, addr: impl Into<String>) {
        self.remote_addr = Some(addr.into());
    }

    /// The configured peer address; with
    /// `remote_addr_contains_remote_pubkey` set, the authenticated static
    /// key is appended in hex.
    pub fn remote_address(&self) -> Option<String> {
        let base = self.remote_addr.clone()?;
        let include_key = self
            .config
            .as_ref()
            .map_or(false, |c| c.remote_addr_contains_remote_pubkey);
        match self.remote_public {
            Some(key) if include_key => Some(format!("{base}:{}", hex::encode(key))),
            _ => Some(base),
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    fn drive_handshake(&mut self) -> Result<()> {
        let config = self
            .config
            .as_ref()
            .expect("a session in the New state always carries its configuration");
        debug!(pattern = %config.pattern, initiator = self.is_client, "starting handshake");

        let mut hs = HandshakeState::initialize(
            config.pattern,
            self.is_client,
            &config.prologue,
            config.key_pair.clone(),
            config.remote_key,
            config.psk.as_deref().map(|p| p.as_slice()),
        )?;

        let transmits_static = config.pattern.transmits_static(self.is_client);
        let mut last_payload = Vec::new();
        let pair = loop {
            if hs.should_write() {
                // The proof rides on this side's final message, which is also
                // the message carrying (or following) its static key.
                let payload: &[u8] = if transmits_static && hs.remaining_messages() <= 2 {
                    config.static_public_key_proof.as_deref().unwrap_or(&[])
                } else {
                    &[]
                };
                let mut message = Vec::new();
                let done = hs.write_message(payload, &mut message)?;
                if message.len() > MAX_MESSAGE_SIZE {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "handshake message exceeds the framing limit",
                    )));
                }
                write_frame(&mut self.stream, &message)?;
                trace!(len = message.len(), "handshake message sent");
                if let Some(pair) = done {
                    break pair;
                }
            } else {
                let message = read_frame(&mut self.stream)?;
                trace!(len = message.len(), "handshake message received");
                let mut payload = Vec::new();
                let done = hs.read_message(&message, &mut payload)?;
                last_payload = payload;
                if let Some(pair) = done {
                    break pair;
                }
            }
        };

        self.remote_public = hs.remote_static();
        if config.pattern.receives_static(self.is_client) {
            let verifier = config
                .public_key_verifier
                .as_ref()
                .ok_or(Error::MissingKey("public key verifier"))?;
            let key = self.remote_public.ok_or(Error::Authentication)?;
            if !verifier(&key, &last_payload) {
                warn!("peer static public key rejected by the verifier");
                return Err(Error::Authentication);
            }
        }

        self.handshake_hash = Some(hs.handshake_hash());
        self.transport = Some(match (config.half_duplex, self.is_client) {
            (false, _) => Transport::Full { tx: pair.tx, rx: pair.rx },
            // Both peers keep the initiator-labeled half: the client's tx,
            // which is the server's rx.
            (true, true) => Transport::Half(pair.tx),
            (true, false) => Transport::Half(pair.rx),
        });
        self.state = SessionState::Established;
        debug!(pattern = %config.pattern, "handshake complete");
        Ok(())
    }

    fn send_record(&mut self, chunk: &[u8]) -> Result<()> {
        let strobe = self
            .transport
            .as_mut()
            .expect("an established session always has transport state")
            .tx();

        let mut record = Vec::with_capacity(LEN_PREFIX_SIZE + chunk.len() + TAG_SIZE);
        record.extend_from_slice(&((chunk.len() + TAG_SIZE) as u16).to_be_bytes());
        let body_start = record.len();
        record.extend_from_slice(chunk);
        strobe.send_enc(&mut record[body_start..], false);
        let mut tag = [0u8; TAG_SIZE];
        strobe.send_mac(&mut tag);
        record.extend_from_slice(&tag);

        self.stream.write_all(&record)?;
        trace!(len = chunk.len(), "record sent");
        Ok(())
    }

    /// Read and decrypt one record. `Ok(false)` means the stream ended
    /// cleanly at a record boundary.
    fn fill_read_buffer(&mut self) -> Result<bool> {
        let mut first = [0u8; 1];
        loop {
            match self.stream.read(&mut first) {
                Ok(0) => return Ok(false),
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let mut second = [0u8; 1];
        self.stream.read_exact(&mut second)?;
        let len = usize::from(u16::from_be_bytes([first[0], second[0]]));
        if len < TAG_SIZE {
            return Err(Error::ShortMessage);
        }

        let mut record = vec![0u8; len];
        self.stream.read_exact(&mut record)?;

        let strobe = self
            .transport
            .as_mut()
            .expect("an established session always has transport state")
            .rx();
        let body_len = len - TAG_SIZE;
        strobe.recv_enc(&mut record[..body_len], false);
        let mut tag = <[u8; TAG_SIZE]>::try_from(&record[body_len..]).unwrap();
        if let Err(e) = strobe.recv_mac(&mut tag) {
            warn!("record failed authentication");
            return Err(e);
        }
        record.truncate(body_len);
        trace!(len = body_len, "record received");

        self.read_buffer = record;
        self.read_pos = 0;
        Ok(true)
    }

    fn dead_session(&self) -> Error {
        let message = match self.state {
            SessionState::Failed => "session has failed and refuses further use",
            _ => "session is closed",
        };
        Error::Io(io::Error::new(io::ErrorKind::NotConnected, message))
    }
}

fn one_way_violation(message: &'static str) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::Unsupported, message))
}

fn write_frame<S: Write>(stream: &mut S, message: &[u8]) -> Result<()> {
    debug_assert!(message.len() <= MAX_MESSAGE_SIZE);
    let mut frame = Vec::with_capacity(LEN_PREFIX_SIZE + message.len());
    frame.extend_from_slice(&(message.len() as u16).to_be_bytes());
    frame.extend_from_slice(message);
    stream.write_all(&frame)?;
    stream.flush()?;
    Ok(())
}

fn read_frame<S: Read>(stream: &mut S) -> Result<Vec<u8>> {
    let mut len = [0u8; LEN_PREFIX_SIZE];
    stream.read_exact(&mut len)?;
    let mut message = vec![0u8; usize::from(u16::from_be_bytes(len))];
    stream.read_exact(&mut message)?;
    Ok(message)
}

impl<S: Read + Write> Read for Session<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf).map_err(Into::into)
    }
}

impl<S: Read + Write> Write for Session<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl<S> Drop for Session<S> {
    fn drop(&mut self) {
        // Decrypted-but-unconsumed plaintext is as sensitive as the keys.
        self.read_buffer.zeroize();
    }
}
