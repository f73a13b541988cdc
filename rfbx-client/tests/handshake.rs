//! Handshake integration tests: version negotiation, security types, and
//! initialization, driven from an in-process server.

mod common;

use common::*;
use rfbx_client::{Command, Config, Event};
use rfbx_protocol::messages::encodings;

#[tokio::test]
async fn test_handshake_38_none() {
    let (client, _renderer, mut server) = start_client(Config::default());

    let encs = server.handshake_none().await;

    let event = next_event(&client).await;
    assert_eq!(
        event,
        Event::Connected {
            width: FB_WIDTH,
            height: FB_HEIGHT,
            name: "test desktop".into(),
        }
    );

    // Depth-24 preference order: CopyRect first, Raw closing the real
    // encodings, pseudo-encodings appended.
    assert_eq!(encs.encodings[0], encodings::COPY_RECT);
    assert_eq!(encs.encodings[1], encodings::TIGHT);
    let raw_pos = encs
        .encodings
        .iter()
        .position(|&e| e == encodings::RAW)
        .unwrap();
    assert!(encs.encodings[..raw_pos].iter().all(|&e| e >= 0));
    assert!(encs.encodings.contains(&encodings::PSEUDO_LAST_RECT));
    assert!(encs.encodings.contains(&encodings::PSEUDO_EXTENDED_CLIPBOARD));
    // Default config: quality 6, compression 2.
    assert!(encs.encodings.contains(&(encodings::PSEUDO_QUALITY_LEVEL_0 + 6)));
    assert!(encs.encodings.contains(&(encodings::PSEUDO_COMPRESS_LEVEL_0 + 2)));
}

#[tokio::test]
async fn test_handshake_33_vnc_auth() {
    let config = Config::builder().password("secret").build().unwrap();
    let (client, _renderer, mut server) = start_client(config);

    server.send.push_bytes(b"RFB 003.003\n").unwrap();
    server.send.flush().unwrap();
    assert_eq!(server.recv.read_string(12).await.unwrap(), "RFB 003.003\n");

    // 3.3: the server dictates the scheme as a u32.
    server.send.push_u32(2).unwrap();
    let challenge = *b"0123456789abcdef";
    server.send.push_bytes(&challenge).unwrap();
    server.send.flush().unwrap();

    let response = server.recv.read_bytes(16).await.unwrap();
    assert_eq!(
        response,
        rfbx_crypto::des::encrypt_challenge("secret", &challenge)
    );

    // 3.3 has no SecurityResult stage; ClientInit follows directly.
    server.complete_init("legacy").await;
    assert!(matches!(next_event(&client).await, Event::Connected { .. }));
}

#[tokio::test]
async fn test_handshake_38_vnc_auth() {
    let config = Config::builder().password("hunter2").build().unwrap();
    let (client, _renderer, mut server) = start_client(config);

    server.send.push_bytes(b"RFB 003.008\n").unwrap();
    server.send.flush().unwrap();
    server.recv.read_string(12).await.unwrap();

    server.send.push_u8(1).unwrap();
    server.send.push_u8(2).unwrap(); // VNCAuth only
    server.send.flush().unwrap();
    assert_eq!(server.recv.read_u8().await.unwrap(), 2);

    let challenge = [0xAB; 16];
    server.send.push_bytes(&challenge).unwrap();
    server.send.flush().unwrap();

    let response = server.recv.read_bytes(16).await.unwrap();
    assert_eq!(
        response,
        rfbx_crypto::des::encrypt_challenge("hunter2", &challenge)
    );

    server.send.push_u32(0).unwrap();
    server.send.flush().unwrap();
    server.complete_init("authd").await;
    assert!(matches!(next_event(&client).await, Event::Connected { .. }));
}

#[tokio::test]
async fn test_server_picks_first_supported_type() {
    let (_client, _renderer, mut server) = start_client(Config::default());

    server.send.push_bytes(b"RFB 003.008\n").unwrap();
    server.send.flush().unwrap();
    server.recv.read_string(12).await.unwrap();

    // Unknown type 77 first; the client must take the first it supports
    // in server order (None).
    server.send.push_u8(3).unwrap();
    server.send.push_bytes(&[77, 1, 2]).unwrap();
    server.send.flush().unwrap();
    assert_eq!(server.recv.read_u8().await.unwrap(), 1);
}

#[tokio::test]
async fn test_repeater_identification() {
    let config = Config::builder().repeater_id("1234").build().unwrap();
    let (client, _renderer, mut server) = start_client(config);

    server.send.push_bytes(b"RFB 000.000\n").unwrap();
    server.send.flush().unwrap();

    // 250-byte ASCII ID block, NUL-padded.
    let id_block = server.recv.read_bytes(250).await.unwrap();
    assert_eq!(&id_block[..7], b"ID:1234");
    assert!(id_block[7..].iter().all(|&b| b == 0));

    // The real server announces itself afterwards.
    server.greet_38_none().await;
    server.complete_init("behind repeater").await;
    assert!(matches!(next_event(&client).await, Event::Connected { .. }));
}

#[tokio::test]
async fn test_vencrypt_plain() {
    let config = Config::builder()
        .username("user")
        .password("pass")
        .build()
        .unwrap();
    let (client, _renderer, mut server) = start_client(config);

    server.send.push_bytes(b"RFB 003.008\n").unwrap();
    server.send.flush().unwrap();
    server.recv.read_string(12).await.unwrap();

    server.send.push_u8(1).unwrap();
    server.send.push_u8(19).unwrap(); // VeNCrypt
    server.send.flush().unwrap();
    assert_eq!(server.recv.read_u8().await.unwrap(), 19);

    // Version exchange: server 0.2, client echoes 0.2.
    server.send.push_u8(0).unwrap();
    server.send.push_u8(2).unwrap();
    server.send.flush().unwrap();
    assert_eq!(server.recv.read_bytes(2).await.unwrap(), vec![0, 2]);

    // Ack, then the subtype list.
    server.send.push_u8(0).unwrap();
    server.send.flush().unwrap();
    server.send.push_u8(1).unwrap();
    server.send.push_u32(256).unwrap(); // Plain
    server.send.flush().unwrap();
    assert_eq!(server.recv.read_u32().await.unwrap(), 256);

    // Plain credentials: u32 lengths then the strings.
    assert_eq!(server.recv.read_u32().await.unwrap(), 4);
    assert_eq!(server.recv.read_u32().await.unwrap(), 4);
    assert_eq!(server.recv.read_bytes(4).await.unwrap(), b"user");
    assert_eq!(server.recv.read_bytes(4).await.unwrap(), b"pass");

    server.send.push_u32(0).unwrap();
    server.send.flush().unwrap();
    server.complete_init("vencrypt").await;
    assert!(matches!(next_event(&client).await, Event::Connected { .. }));
}

#[tokio::test]
async fn test_security_failure_38_reports_reason() {
    let (client, _renderer, mut server) = start_client(Config::default());

    server.send.push_bytes(b"RFB 003.008\n").unwrap();
    server.send.flush().unwrap();
    server.recv.read_string(12).await.unwrap();

    server.send.push_u8(1).unwrap();
    server.send.push_u8(1).unwrap();
    server.send.flush().unwrap();
    server.recv.read_u8().await.unwrap();

    // Non-zero SecurityResult, then the reason string.
    server.send.push_u32(1).unwrap();
    let reason = "too many failures";
    server.send.push_u32(reason.len() as u32).unwrap();
    server.send.push_bytes(reason.as_bytes()).unwrap();
    server.send.flush().unwrap();

    assert_eq!(
        next_event(&client).await,
        Event::SecurityFailure {
            status: 1,
            reason: Some(reason.into()),
        }
    );
    assert_eq!(next_event(&client).await, Event::Disconnected { clean: false });
}

#[tokio::test]
async fn test_no_security_types_is_refusal() {
    let (client, _renderer, mut server) = start_client(Config::default());

    server.send.push_bytes(b"RFB 003.008\n").unwrap();
    server.send.flush().unwrap();
    server.recv.read_string(12).await.unwrap();

    // Zero security types: a refusal with a reason.
    server.send.push_u8(0).unwrap();
    let reason = "banned";
    server.send.push_u32(reason.len() as u32).unwrap();
    server.send.push_bytes(reason.as_bytes()).unwrap();
    server.send.flush().unwrap();

    assert_eq!(
        next_event(&client).await,
        Event::SecurityFailure {
            status: 1,
            reason: Some(reason.into()),
        }
    );
}

#[tokio::test]
async fn test_credentials_requested_when_missing() {
    // No password configured; VNCAuth must ask for one.
    let (client, _renderer, mut server) = start_client(Config::default());

    server.send.push_bytes(b"RFB 003.008\n").unwrap();
    server.send.flush().unwrap();
    server.recv.read_string(12).await.unwrap();

    server.send.push_u8(1).unwrap();
    server.send.push_u8(2).unwrap();
    server.send.flush().unwrap();
    server.recv.read_u8().await.unwrap();

    let challenge = [0x55; 16];
    server.send.push_bytes(&challenge).unwrap();
    server.send.flush().unwrap();

    assert_eq!(
        next_event(&client).await,
        Event::CredentialsRequired {
            types: vec!["password"],
        }
    );
    client
        .send(Command::Credentials {
            username: None,
            password: Some("late".into()),
            target: None,
        })
        .unwrap();

    let response = server.recv.read_bytes(16).await.unwrap();
    assert_eq!(
        response,
        rfbx_crypto::des::encrypt_challenge("late", &challenge)
    );
}

#[tokio::test]
async fn test_tight_security_no_auth() {
    let (client, _renderer, mut server) = start_client(Config::default());

    server.send.push_bytes(b"RFB 003.008\n").unwrap();
    server.send.flush().unwrap();
    server.recv.read_string(12).await.unwrap();

    server.send.push_u8(1).unwrap();
    server.send.push_u8(16).unwrap(); // Tight
    server.send.flush().unwrap();
    assert_eq!(server.recv.read_u8().await.unwrap(), 16);

    // One tunnel capability: NOTUNNEL.
    server.send.push_u32(1).unwrap();
    server.send.push_u32(0).unwrap();
    server.send.push_bytes(b"TGHT").unwrap();
    server.send.push_bytes(b"NOTUNNEL").unwrap();
    server.send.flush().unwrap();
    assert_eq!(server.recv.read_u32().await.unwrap(), 0);

    // No sub-authentication.
    server.send.push_u32(0).unwrap();
    server.send.push_u32(0).unwrap(); // SecurityResult: OK
    server.send.flush().unwrap();

    // Tight mode: ServerInit grows a capability tail.
    let shared = server.recv.read_u8().await.unwrap();
    assert_eq!(shared, 1);
    server.send.push_u16(FB_WIDTH).unwrap();
    server.send.push_u16(FB_HEIGHT).unwrap();
    rfbx_protocol::messages::PixelFormat::from_depth(24)
        .write_to(&mut server.send)
        .unwrap();
    let name = b"tight server";
    server.send.push_u32(name.len() as u32).unwrap();
    server.send.push_bytes(name).unwrap();
    // 1 server message cap, 0 client, 0 encodings + padding.
    server.send.push_u16(1).unwrap();
    server.send.push_u16(0).unwrap();
    server.send.push_u16(0).unwrap();
    server.send.push_u16(0).unwrap();
    server.send.push_bytes(&[0u8; 16]).unwrap();
    server.send.flush().unwrap();

    server.read_client_setup().await;
    assert!(matches!(next_event(&client).await, Event::Connected { .. }));
}

#[tokio::test]
async fn test_amt_kvm_drops_to_depth_8() {
    let (client, _renderer, mut server) = start_client(Config::default());

    server.greet_38_none().await;
    let shared = server.recv.read_u8().await.unwrap();
    assert_eq!(shared, 1);

    server.send.push_u16(FB_WIDTH).unwrap();
    server.send.push_u16(FB_HEIGHT).unwrap();
    rfbx_protocol::messages::PixelFormat::from_depth(24)
        .write_to(&mut server.send)
        .unwrap();
    let name = b"Intel(r) AMT KVM";
    server.send.push_u32(name.len() as u32).unwrap();
    server.send.push_bytes(name).unwrap();
    server.send.flush().unwrap();

    assert_eq!(server.recv.read_u8().await.unwrap(), 0);
    let pf = rfbx_protocol::messages::SetPixelFormat::read_from(&mut server.recv)
        .await
        .unwrap();
    assert_eq!(pf.pixel_format.bits_per_pixel, 8);
    assert_eq!(pf.pixel_format.depth, 8);

    assert_eq!(server.recv.read_u8().await.unwrap(), 2);
    let encs = rfbx_protocol::messages::SetEncodings::read_from(&mut server.recv)
        .await
        .unwrap();
    // Depth 8 drops the compressed encodings entirely.
    assert!(!encs.encodings.contains(&encodings::TIGHT));
    assert!(!encs.encodings.contains(&encodings::ZRLE));
    assert!(encs.encodings.contains(&encodings::RAW));

    assert!(matches!(next_event(&client).await, Event::Connected { .. }));
}

#[tokio::test]
async fn test_unsupported_version_disconnects() {
    let (client, _renderer, mut server) = start_client(Config::default());

    server.send.push_bytes(b"RFB 002.000\n").unwrap();
    server.send.flush().unwrap();

    assert_eq!(next_event(&client).await, Event::Disconnected { clean: false });
}
