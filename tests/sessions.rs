/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! End-to-end session tests: real TCP streams for the interactive flows and
//! an in-memory stream where the wire needs to be tampered with.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use disco::{
    Config, Error, HandshakePattern, HandshakeState, KeyPair, Session, Strobe, TransportPair,
};

fn xx_config() -> Config {
    Config::new(HandshakePattern::XX)
        .with_key_pair(KeyPair::generate().unwrap())
        .with_proof(Vec::new())
        .with_verifier(|_key, _proof| true)
}

#[test]
fn several_writes_cross_a_tcp_session() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut session = Session::server(stream, xx_config()).unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 100];
        loop {
            match session.recv(&mut buf) {
                Ok(0) => break,
                Ok(n) => received.push(String::from_utf8(buf[..n].to_vec()).unwrap()),
                Err(e) => panic!("server recv failed: {e}"),
            }
        }
        (received, session.handshake_hash().unwrap())
    });

    let stream = TcpStream::connect(addr).unwrap();
    let mut session = Session::client(stream, xx_config()).unwrap();
    for i in 0..100 {
        session.send(format!("hello {i}").as_bytes()).unwrap();
    }
    let client_hash = session.handshake_hash().unwrap();
    drop(session);

    let (received, server_hash) = server.join().unwrap();
    assert_eq!(received.len(), 100);
    for (i, message) in received.iter().enumerate() {
        assert_eq!(message, &format!("hello {i}"));
    }
    assert_eq!(client_hash, server_hash);
}

#[test]
fn half_duplex_echo() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut session = Session::server(stream, xx_config().with_half_duplex()).unwrap();
        let mut buf = [0u8; 10];
        loop {
            let n = match session.recv(&mut buf) {
                Ok(0) => return,
                Ok(n) => n,
                Err(e) => panic!("server recv failed: {e}"),
            };
            session.send(&buf[..n]).unwrap();
        }
    });

    let stream = TcpStream::connect(addr).unwrap();
    let mut session = Session::client(stream, xx_config().with_half_duplex()).unwrap();
    let mut buf = [0u8; 10];
    for i in 0..50u8 {
        let mut message = b"hello".to_vec();
        message.push(i);
        assert_eq!(session.send(&message).unwrap(), 6);
        let n = session.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], &message[..]);
    }
    drop(session);
    server.join().unwrap();
}

#[test]
fn one_way_pattern_restricts_directions() {
    let server_static = KeyPair::generate().unwrap();
    let server_public = server_static.public();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let config = Config::new(HandshakePattern::N).with_key_pair(server_static);
        let mut session = Session::server(stream, config).unwrap();

        // The receiving end of a one-way pattern must not send.
        assert!(session.send(b"nope").is_err());

        let mut buf = [0u8; 64];
        let n = session.recv(&mut buf).unwrap();
        buf[..n].to_vec()
    });

    let stream = TcpStream::connect(addr).unwrap();
    let config = Config::new(HandshakePattern::N).with_remote_key(server_public);
    let mut session = Session::client(stream, config).unwrap();
    session.send(b"fire and forget").unwrap();

    // The sending end must not receive.
    let mut buf = [0u8; 8];
    assert!(session.recv(&mut buf).is_err());
    drop(session);

    assert_eq!(server.join().unwrap(), b"fire and forget");
}

#[test]
fn remote_address_can_carry_the_peer_key() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (stream, peer) = listener.accept().unwrap();
        let mut config = xx_config();
        config.remote_addr_contains_remote_pubkey = true;
        let mut session = Session::server(stream, config).unwrap();
        session.set_remote_addr(peer.to_string());

        let mut buf = [0u8; 128];
        let n = session.recv(&mut buf).unwrap();
        let announced_key = String::from_utf8(buf[..n].to_vec()).unwrap();
        let remote_address = session.remote_address().unwrap();
        assert!(
            remote_address.ends_with(&announced_key),
            "{remote_address} does not end with {announced_key}"
        );
    });

    let key_pair = KeyPair::generate().unwrap();
    let announced = key_pair.public_hex();
    let config = Config::new(HandshakePattern::XX)
        .with_key_pair(key_pair)
        .with_proof(Vec::new())
        .with_verifier(|_, _| true);
    let stream = TcpStream::connect(addr).unwrap();
    let mut session = Session::client(stream, config).unwrap();
    session.send(announced.as_bytes()).unwrap();
    drop(session);
    server.join().unwrap();
}

#[test]
fn verifier_rejection_aborts_the_session() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let config = xx_config();
        let mut session = Session::server(stream, config).unwrap();
        let mut buf = [0u8; 16];
        // The peer aborts after its verifier rejects us, so we observe either
        // a clean end of stream or an error; application data never arrives.
        match session.recv(&mut buf) {
            Ok(0) | Err(_) => {}
            Ok(n) => panic!("received {n} bytes from an unauthenticated peer"),
        }
    });

    let config = Config::new(HandshakePattern::XX)
        .with_key_pair(KeyPair::generate().unwrap())
        .with_proof(Vec::new())
        .with_verifier(|_key, _proof| false);
    let stream = TcpStream::connect(addr).unwrap();
    let mut session = Session::client(stream, config).unwrap();
    let err = session.handshake().unwrap_err();
    assert!(matches!(err, Error::Authentication), "got {err:?}");

    // The failure is sticky.
    assert!(session.send(b"data").is_err());
    drop(session);
    server.join().unwrap();
}

/* An in-memory stream: reads consume a prepared input buffer, writes land in
 * an inspectable output buffer. Enough to test established sessions whose
 * traffic we need to capture or corrupt. */
struct MemStream {
    input: io::Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl MemStream {
    fn new(input: Vec<u8>) -> Self {
        Self { input: io::Cursor::new(input), output: Vec::new() }
    }
}

impl Read for MemStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for MemStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run an NK handshake purely in memory and hand back both sides' halves.
fn nk_transport_pairs() -> (TransportPair, TransportPair) {
    let server_static = KeyPair::generate().unwrap();
    let mut client = HandshakeState::initialize(
        HandshakePattern::NK,
        true,
        b"",
        None,
        Some(server_static.public()),
        None,
    )
    .unwrap();
    let mut server = HandshakeState::initialize(
        HandshakePattern::NK,
        false,
        b"",
        Some(server_static),
        None,
        None,
    )
    .unwrap();

    let mut m1 = Vec::new();
    client.write_message(b"", &mut m1).unwrap();
    server.read_message(&m1, &mut Vec::new()).unwrap();
    let mut m2 = Vec::new();
    let server_pair = server.write_message(b"", &mut m2).unwrap().unwrap();
    let client_pair = client.read_message(&m2, &mut Vec::new()).unwrap().unwrap();
    (client_pair, server_pair)
}

#[test]
fn tampered_record_is_fatal() {
    let (client_pair, server_pair) = nk_transport_pairs();

    let mut client = Session::resume(MemStream::new(Vec::new()), client_pair.tx, client_pair.rx);
    client.send(b"untouchable").unwrap();
    client.send(b"never seen").unwrap();
    let mut wire = client.get_ref().output.clone();

    // Flip one ciphertext bit of the first record.
    wire[2] ^= 0x01;

    let mut server = Session::resume(MemStream::new(wire), server_pair.tx, server_pair.rx);
    let mut buf = [0u8; 64];
    assert!(matches!(server.recv(&mut buf), Err(Error::Decrypt)));

    // The session is poisoned: even the intact second record stays sealed.
    assert!(server.recv(&mut buf).is_err());
    assert!(server.send(b"reply").is_err());
}

#[test]
fn established_session_survives_serialization() {
    let (client_pair, server_pair) = nk_transport_pairs();

    // Persist the client's halves and resurrect them.
    let tx_bytes = client_pair.tx.serialize();
    let rx_bytes = client_pair.rx.serialize();

    let mut client = Session::resume(
        MemStream::new(Vec::new()),
        Strobe::recover(&tx_bytes).unwrap(),
        Strobe::recover(&rx_bytes).unwrap(),
    );
    client.send(b"after a restart").unwrap();
    let wire = client.get_ref().output.clone();

    let mut server = Session::resume(MemStream::new(wire), server_pair.tx, server_pair.rx);
    let mut buf = [0u8; 64];
    let n = server.recv(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"after a restart");

    // Reverse direction: the server replies and a second resurrection of the
    // client state reads it.
    server.send(b"welcome back").unwrap();
    let reply_wire = server.get_ref().output.clone();
    let mut client = Session::resume(
        MemStream::new(reply_wire),
        Strobe::recover(&tx_bytes).unwrap(),
        Strobe::recover(&rx_bytes).unwrap(),
    );
    let n = client.recv(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"welcome back");
}

#[test]
fn large_payloads_are_chunked_into_records() {
    let (client_pair, server_pair) = nk_transport_pairs();

    let mut client = Session::resume(MemStream::new(Vec::new()), client_pair.tx, client_pair.rx);
    // Two max-sized records plus a small tail.
    let payload: Vec<u8> = (0..140_000u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(client.send(&payload).unwrap(), payload.len());
    let wire = client.get_ref().output.clone();

    let mut server = Session::resume(MemStream::new(wire), server_pair.tx, server_pair.rx);
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match server.recv(&mut buf).unwrap() {
            0 => break,
            n => received.extend_from_slice(&buf[..n]),
        }
    }
    assert_eq!(received, payload);
}
