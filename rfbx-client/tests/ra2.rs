//! End-to-end RA2ne handshake against an in-process server.
//!
//! The server half mirrors the client's derivations: both sides must
//! agree on session keys, hashes, and AEAD counters for the handshake to
//! complete. Client-side RSA key generation makes this the slowest test
//! in the suite.

mod common;

use common::*;
use rand::RngCore;
use rfbx_client::{Command, Config, Event};
use rfbx_crypto::MessageCipher;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use std::time::Duration;

const SERVER_BITS: usize = 1024;
const SERVER_BYTES: usize = SERVER_BITS / 8;

fn left_pad(bytes: &[u8], width: usize) -> Vec<u8> {
    let mut out = vec![0u8; width];
    out[width - bytes.len()..].copy_from_slice(bytes);
    out
}

fn session_key(a: &[u8], b: &[u8]) -> [u8; 16] {
    let digest: [u8; 20] = Sha1::digest([a, b].concat()).into();
    digest[..16].try_into().unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ra2_password_only_handshake() {
    let config = Config::builder().password("ra2pass").build().unwrap();
    let (client, _renderer, mut server) = start_client(config);

    server.send.push_bytes(b"RFB 003.008\n").unwrap();
    server.send.flush().unwrap();
    server.recv.read_string(12).await.unwrap();

    server.send.push_u8(1).unwrap();
    server.send.push_u8(6).unwrap(); // RA2ne
    server.send.flush().unwrap();
    assert_eq!(server.recv.read_u8().await.unwrap(), 6);

    // Server RSA key.
    let mut rng = rand::thread_rng();
    let server_key = RsaPrivateKey::new(&mut rng, SERVER_BITS).unwrap();
    let server_n = left_pad(&server_key.n().to_bytes_be(), SERVER_BYTES);
    let server_e = left_pad(&server_key.e().to_bytes_be(), SERVER_BYTES);
    let mut server_blob = (SERVER_BITS as u32).to_be_bytes().to_vec();
    server_blob.extend_from_slice(&server_n);
    server_blob.extend_from_slice(&server_e);

    server.send.push_u32(SERVER_BITS as u32).unwrap();
    server.send.push_bytes(&server_n).unwrap();
    server.send.push_bytes(&server_e).unwrap();
    server.send.flush().unwrap();

    // Host verification: key surfaced, then approved.
    match next_event(&client).await {
        Event::ServerVerification { kind, public_key } => {
            assert_eq!(kind, "RSA");
            assert_eq!(public_key, server_blob);
        }
        other => panic!("expected ServerVerification, got {other:?}"),
    }
    client.send(Command::ApproveServer).unwrap();

    // Client public key (this is where the client generates its 2048-bit
    // key, so allow plenty of time).
    let client_bits = tokio::time::timeout(Duration::from_secs(300), server.recv.read_u32())
        .await
        .expect("client key generation timed out")
        .unwrap();
    assert_eq!(client_bits, 2048);
    let client_n = server.recv.read_bytes(256).await.unwrap();
    let client_e = server.recv.read_bytes(256).await.unwrap();
    let mut client_blob = 2048u32.to_be_bytes().to_vec();
    client_blob.extend_from_slice(&client_n);
    client_blob.extend_from_slice(&client_e);
    let client_pub = RsaPublicKey::new(
        BigUint::from_bytes_be(&client_n),
        BigUint::from_bytes_be(&client_e),
    )
    .unwrap();

    // Client random, encrypted under our key.
    assert_eq!(server.recv.read_u16().await.unwrap() as usize, SERVER_BYTES);
    let encrypted = server.recv.read_bytes(SERVER_BYTES).await.unwrap();
    let client_random = server_key.decrypt(Pkcs1v15Encrypt, &encrypted).unwrap();
    assert_eq!(client_random.len(), 16);

    // Server random, encrypted under the client key.
    let mut server_random = [0u8; 16];
    rng.fill_bytes(&mut server_random);
    let encrypted = client_pub
        .encrypt(&mut rng, Pkcs1v15Encrypt, &server_random)
        .unwrap();
    server.send.push_u16(256).unwrap();
    server.send.push_bytes(&encrypted).unwrap();
    server.send.flush().unwrap();

    // Session ciphers. The client-to-server direction is keyed by
    // SHA1(serverRandom, clientRandom), the reverse by the mirror.
    let mut from_client = MessageCipher::new(&session_key(&server_random, &client_random));
    let mut to_client = MessageCipher::new(&session_key(&client_random, &server_random));

    let client_hash: [u8; 20] =
        Sha1::digest([client_blob.as_slice(), server_blob.as_slice()].concat()).into();
    let server_hash: [u8; 20] =
        Sha1::digest([server_blob.as_slice(), client_blob.as_slice()].concat()).into();

    // Verify the client's hash message.
    let len = server.recv.read_u16().await.unwrap();
    assert_eq!(len, 20);
    let body = server.recv.read_bytes(20 + 16).await.unwrap();
    let received = from_client.receive_message(len, &body).unwrap();
    assert_eq!(received, client_hash);

    // Send ours.
    server.send.push_bytes(&to_client.make_message(&server_hash)).unwrap();
    server.send.flush().unwrap();

    // Credential subtype 2: password only.
    server.send.push_bytes(&to_client.make_message(&[2])).unwrap();
    server.send.flush().unwrap();

    let len = server.recv.read_u16().await.unwrap();
    let body = server.recv.read_bytes(len as usize + 16).await.unwrap();
    let creds = from_client.receive_message(len, &body).unwrap();
    // u8 userLen (0), empty username, 0x00, u8 passLen, password.
    assert_eq!(creds[0], 0);
    assert_eq!(creds[1], 0);
    assert_eq!(creds[2] as usize, "ra2pass".len());
    assert_eq!(&creds[3..], b"ra2pass");

    // SecurityResult + init.
    server.send.push_u32(0).unwrap();
    server.send.flush().unwrap();
    server.complete_init("ra2 server").await;

    let event = wait_for_event(&client, |e| matches!(e, Event::Connected { .. })).await;
    assert!(matches!(event, Event::Connected { .. }));
}
