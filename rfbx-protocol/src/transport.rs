//! Message-oriented transport adapters.
//!
//! The protocol engine is transport-agnostic: it only requires a duplex
//! channel that delivers opaque byte chunks in order. [`TransportChannels`]
//! is that surface — an incoming chunk receiver and an outgoing chunk
//! sender. Closing either direction is signalled by channel disconnection.
//!
//! Two concrete transports are provided:
//!
//! - [`loopback_pair`] wires two endpoints directly together, used by the
//!   integration tests to play the server side in-process.
//! - [`TcpTransport`] bridges a [`TcpStream`] into chunk channels, with
//!   `TCP_NODELAY` set so small input events are not delayed.

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// The transport surface the engine consumes: ordered chunks in, ordered
/// chunks out. Dropping `outgoing` (or the peer dropping its end) closes
/// the corresponding direction.
pub struct TransportChannels {
    pub incoming: flume::Receiver<Bytes>,
    pub outgoing: flume::Sender<Bytes>,
}

/// Create a directly-connected pair of transports. Everything sent on one
/// endpoint arrives as a chunk on the other, preserving message boundaries.
pub fn loopback_pair() -> (TransportChannels, TransportChannels) {
    let (a_tx, b_rx) = flume::unbounded();
    let (b_tx, a_rx) = flume::unbounded();
    (
        TransportChannels {
            incoming: a_rx,
            outgoing: a_tx,
        },
        TransportChannels {
            incoming: b_rx,
            outgoing: b_tx,
        },
    )
}

/// TCP bridge: pumps socket reads into the incoming channel and outgoing
/// chunks into socket writes.
pub struct TcpTransport;

impl TcpTransport {
    /// Connect to `host:port` and return the chunk channels for the
    /// connection. The bridging tasks run until either side closes.
    pub async fn connect(host: &str, port: u16) -> std::io::Result<TransportChannels> {
        let stream = TcpStream::connect((host, port)).await?;
        // Interactive sessions need small frames (pointer events) on the
        // wire immediately.
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-connected stream (useful for tunnelled sockets).
    pub fn from_stream(stream: TcpStream) -> TransportChannels {
        let (mut read_half, mut write_half) = stream.into_split();
        let (in_tx, in_rx) = flume::unbounded::<Bytes>();
        let (out_tx, out_rx) = flume::unbounded::<Bytes>();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 16 * 1024];
            loop {
                match read_half.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if in_tx.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("transport read error: {e}");
                        break;
                    }
                }
            }
            // Dropping in_tx signals close to the receive stream.
        });

        tokio::spawn(async move {
            while let Ok(chunk) = out_rx.recv_async().await {
                if let Err(e) = write_half.write_all(&chunk).await {
                    tracing::debug!("transport write error: {e}");
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });

        TransportChannels {
            incoming: in_rx,
            outgoing: out_tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{RecvStream, SendStream};

    #[tokio::test]
    async fn test_loopback_round_trip() {
        let (client, server) = loopback_pair();
        let mut client_send = SendStream::new(client.outgoing);
        let mut server_recv = RecvStream::new(server.incoming);

        client_send.push_bytes(b"RFB 003.008\n").unwrap();
        client_send.flush().unwrap();

        assert_eq!(server_recv.read_string(12).await.unwrap(), "RFB 003.008\n");
    }

    #[tokio::test]
    async fn test_loopback_close_propagates() {
        let (client, server) = loopback_pair();
        drop(server);
        let mut recv = RecvStream::new(client.incoming);
        assert!(recv.read_u8().await.is_err());
    }

    #[tokio::test]
    async fn test_tcp_transport_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(&buf).await.unwrap();
        });

        let channels = TcpTransport::connect("127.0.0.1", addr.port()).await.unwrap();
        let mut send = SendStream::new(channels.outgoing);
        let mut recv = RecvStream::new(channels.incoming);

        send.push_bytes(b"hello").unwrap();
        send.flush().unwrap();
        assert_eq!(recv.read_bytes(5).await.unwrap(), b"hello");
    }
}
