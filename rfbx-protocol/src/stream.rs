//! Buffered streams over a message-oriented transport.
//!
//! The RFB client receives opaque byte chunks from its transport (one per
//! transport message) and parses a continuous byte stream out of them. This
//! module provides the two halves of that plumbing:
//!
//! - [`RecvStream`]: a growable receive queue fed by transport chunks, with
//!   type-safe async reads in network byte order. A read that needs more
//!   bytes than are queued suspends until a chunk arrives that satisfies it.
//! - [`SendStream`]: a fixed-capacity write buffer whose [`flush`]
//!   (SendStream::flush) transmits the accumulated bytes as a single
//!   transport message.
//!
//! # Receive queue discipline
//!
//! The queue is a single buffer `rq` with a read index `rqi` and a fill
//! length `rqlen` (`0 <= rqi <= rqlen <= rq.len()`). `rqlen - rqi` bytes are
//! available. On every appended chunk the queue compacts or grows:
//!
//! - fully drained: indices reset to zero;
//! - tail would overflow: the unread tail is moved to offset 0;
//! - chunk exceeds capacity: the buffer grows to the smallest power of two
//!   at least `8 * (unread + chunk)` bytes.
//!
//! # Pending demands
//!
//! At most one read demand may be outstanding. Dropping a read future while
//! it is suspended abandons the demand mid-stream and poisons the stream:
//! every later read fails with [`StreamError::ConcurrentRead`]. Transport
//! close while a demand is pending fails that demand with
//! [`StreamError::Closed`].

use bytes::Bytes;
use thiserror::Error;

/// Capacity of the send buffer. A push that would overflow triggers an
/// automatic flush; a push larger than the whole capacity is split into
/// capacity-sized frames.
pub const SEND_CAPACITY: usize = 10 * 1024;

/// Initial receive queue capacity.
const RECV_INITIAL_CAPACITY: usize = 4096;

/// Errors surfaced by [`RecvStream`] and [`SendStream`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// The transport closed while bytes were still required.
    #[error("connection closed")]
    Closed,

    /// A second read demand was issued while one was already outstanding
    /// (a read future was abandoned mid-demand).
    #[error("concurrent read on receive stream")]
    ConcurrentRead,
}

/// The receive queue: a compacting, growable byte buffer.
///
/// This is the synchronous core of [`RecvStream`]; it never blocks and is
/// directly testable. All multi-byte reads are big-endian.
#[derive(Debug)]
pub struct RecvBuffer {
    rq: Vec<u8>,
    rqi: usize,
    rqlen: usize,
}

impl Default for RecvBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecvBuffer {
    pub fn new() -> Self {
        Self {
            rq: vec![0; RECV_INITIAL_CAPACITY],
            rqi: 0,
            rqlen: 0,
        }
    }

    /// Number of unread bytes in the queue.
    pub fn available(&self) -> usize {
        self.rqlen - self.rqi
    }

    /// Append an incoming transport chunk, compacting or growing as needed.
    pub fn receive_chunk(&mut self, chunk: &[u8]) {
        if self.rqlen + chunk.len() > self.rq.len() {
            let unread = self.rqlen - self.rqi;
            if unread + chunk.len() > self.rq.len() {
                let target = 8 * (unread + chunk.len());
                let new_len = target.next_power_of_two();
                let mut grown = vec![0; new_len];
                grown[..unread].copy_from_slice(&self.rq[self.rqi..self.rqlen]);
                self.rq = grown;
            } else {
                self.rq.copy_within(self.rqi..self.rqlen, 0);
            }
            self.rqi = 0;
            self.rqlen = unread;
        }
        self.rq[self.rqlen..self.rqlen + chunk.len()].copy_from_slice(chunk);
        self.rqlen += chunk.len();
    }

    /// Current capacity of the backing buffer (growth is observable in tests).
    pub fn capacity(&self) -> usize {
        self.rq.len()
    }

    fn drain_check(&mut self) {
        if self.rqi == self.rqlen {
            self.rqi = 0;
            self.rqlen = 0;
        }
    }

    /// Read one byte. Caller must have checked `available() >= 1`.
    pub fn shift_u8(&mut self) -> u8 {
        debug_assert!(self.available() >= 1);
        let b = self.rq[self.rqi];
        self.rqi += 1;
        self.drain_check();
        b
    }

    /// Read a big-endian u16. Caller must have checked `available() >= 2`.
    pub fn shift_u16(&mut self) -> u16 {
        let b0 = self.shift_u8() as u16;
        let b1 = self.shift_u8() as u16;
        (b0 << 8) | b1
    }

    /// Read a big-endian u32. Caller must have checked `available() >= 4`.
    pub fn shift_u32(&mut self) -> u32 {
        let hi = self.shift_u16() as u32;
        let lo = self.shift_u16() as u32;
        (hi << 16) | lo
    }

    /// Copy `n` bytes out of the queue. Caller must have checked availability.
    pub fn shift_bytes(&mut self, n: usize) -> Vec<u8> {
        debug_assert!(self.available() >= n);
        let out = self.rq[self.rqi..self.rqi + n].to_vec();
        self.rqi += n;
        self.drain_check();
        out
    }

    /// Discard `n` bytes. Caller must have checked availability.
    pub fn skip(&mut self, n: usize) {
        debug_assert!(self.available() >= n);
        self.rqi += n;
        self.drain_check();
    }

    /// Look at the next byte without consuming it.
    pub fn peek_u8(&self) -> u8 {
        debug_assert!(self.available() >= 1);
        self.rq[self.rqi]
    }

    /// Look at the next `n` bytes without consuming them.
    pub fn peek_bytes(&self, n: usize) -> &[u8] {
        debug_assert!(self.available() >= n);
        &self.rq[self.rqi..self.rqi + n]
    }
}

/// Asynchronous receive stream: [`RecvBuffer`] plus the transport's chunk
/// channel. Every typed read suspends until enough bytes are queued.
pub struct RecvStream {
    buf: RecvBuffer,
    incoming: flume::Receiver<Bytes>,
    /// Set while a demand is outstanding; sticky when the demand is
    /// abandoned (its future dropped) so that framing corruption surfaces
    /// as [`StreamError::ConcurrentRead`] instead of silent misparses.
    demand: bool,
}

impl RecvStream {
    pub fn new(incoming: flume::Receiver<Bytes>) -> Self {
        Self {
            buf: RecvBuffer::new(),
            incoming,
            demand: false,
        }
    }

    /// Number of bytes readable without suspending.
    pub fn available(&self) -> usize {
        self.buf.available()
    }

    /// Direct access to the queue, for tests and diagnostics.
    pub fn buffer(&self) -> &RecvBuffer {
        &self.buf
    }

    /// Non-suspending readiness probe: drains any chunks the transport has
    /// already delivered, then reports whether the caller should yield.
    /// Returns `true` when fewer than `n` bytes are available.
    pub fn try_wait(&mut self, n: usize) -> bool {
        while self.buf.available() < n {
            match self.incoming.try_recv() {
                Ok(chunk) => self.buf.receive_chunk(&chunk),
                Err(_) => break,
            }
        }
        self.buf.available() < n
    }

    /// Cancel-safe wait until at least `n` bytes are available. Consumes
    /// nothing; used at message boundaries where the driver may be
    /// interleaving other work.
    pub async fn readable(&mut self, n: usize) -> Result<(), StreamError> {
        while self.buf.available() < n {
            if self.demand {
                return Err(StreamError::ConcurrentRead);
            }
            match self.incoming.recv_async().await {
                Ok(chunk) => self.buf.receive_chunk(&chunk),
                Err(_) => return Err(StreamError::Closed),
            }
        }
        Ok(())
    }

    /// Establish a demand for `n` bytes and suspend until it is satisfied.
    ///
    /// Unlike [`readable`](Self::readable) this is *not* cancel-safe by
    /// design: a typed read sits mid-message, and abandoning it leaves the
    /// stream unframed. The demand flag stays set in that case and all
    /// subsequent reads fail with [`StreamError::ConcurrentRead`].
    async fn ensure(&mut self, n: usize) -> Result<(), StreamError> {
        if self.demand {
            return Err(StreamError::ConcurrentRead);
        }
        if self.buf.available() >= n {
            return Ok(());
        }
        self.demand = true;
        while self.buf.available() < n {
            match self.incoming.recv_async().await {
                Ok(chunk) => self.buf.receive_chunk(&chunk),
                Err(_) => {
                    // Transport close rejects the pending demand.
                    self.demand = false;
                    return Err(StreamError::Closed);
                }
            }
        }
        self.demand = false;
        Ok(())
    }

    pub async fn read_u8(&mut self) -> Result<u8, StreamError> {
        self.ensure(1).await?;
        Ok(self.buf.shift_u8())
    }

    pub async fn read_u16(&mut self) -> Result<u16, StreamError> {
        self.ensure(2).await?;
        Ok(self.buf.shift_u16())
    }

    pub async fn read_u32(&mut self) -> Result<u32, StreamError> {
        self.ensure(4).await?;
        Ok(self.buf.shift_u32())
    }

    /// Read a big-endian i32 (two's complement of the u32 on the wire).
    pub async fn read_i32(&mut self) -> Result<i32, StreamError> {
        Ok(self.read_u32().await? as i32)
    }

    pub async fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, StreamError> {
        self.ensure(n).await?;
        Ok(self.buf.shift_bytes(n))
    }

    /// Read `n` bytes interpreted as a latin-1 string (each byte maps to
    /// the code point of the same value).
    pub async fn read_string(&mut self, n: usize) -> Result<String, StreamError> {
        let bytes = self.read_bytes(n).await?;
        Ok(bytes.into_iter().map(char::from).collect())
    }

    pub async fn skip(&mut self, n: usize) -> Result<(), StreamError> {
        self.ensure(n).await?;
        self.buf.skip(n);
        Ok(())
    }

    pub async fn peek_u8(&mut self) -> Result<u8, StreamError> {
        self.ensure(1).await?;
        Ok(self.buf.peek_u8())
    }

    pub async fn peek_bytes(&mut self, n: usize) -> Result<Vec<u8>, StreamError> {
        self.ensure(n).await?;
        Ok(self.buf.peek_bytes(n).to_vec())
    }
}

/// Buffered send stream over the transport's outgoing channel.
///
/// Pushes accumulate in a [`SEND_CAPACITY`]-byte buffer; [`flush`]
/// (Self::flush) transmits the buffered bytes as one transport message.
/// Sending never suspends: the outgoing channel is unbounded.
pub struct SendStream {
    buf: Vec<u8>,
    outgoing: flume::Sender<Bytes>,
}

impl SendStream {
    pub fn new(outgoing: flume::Sender<Bytes>) -> Self {
        Self {
            buf: Vec::with_capacity(SEND_CAPACITY),
            outgoing,
        }
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn push_u8(&mut self, v: u8) -> Result<(), StreamError> {
        self.push_bytes(&[v])
    }

    pub fn push_u16(&mut self, v: u16) -> Result<(), StreamError> {
        self.push_bytes(&v.to_be_bytes())
    }

    pub fn push_u32(&mut self, v: u32) -> Result<(), StreamError> {
        self.push_bytes(&v.to_be_bytes())
    }

    pub fn push_i32(&mut self, v: i32) -> Result<(), StreamError> {
        self.push_bytes(&v.to_be_bytes())
    }

    /// Push a string as latin-1 bytes (code points above 0xFF are replaced
    /// with `?`, matching the classic cut-text rules).
    pub fn push_string(&mut self, s: &str) -> Result<(), StreamError> {
        let bytes: Vec<u8> = s
            .chars()
            .map(|c| if (c as u32) < 0x100 { c as u8 } else { b'?' })
            .collect();
        self.push_bytes(&bytes)
    }

    pub fn push_bytes(&mut self, data: &[u8]) -> Result<(), StreamError> {
        if data.len() > SEND_CAPACITY {
            // Oversize payloads bypass the buffer: flush what is queued,
            // then transmit the payload in capacity-sized frames.
            self.flush()?;
            for frame in data.chunks(SEND_CAPACITY) {
                self.transmit(frame)?;
            }
            return Ok(());
        }
        if self.buf.len() + data.len() > SEND_CAPACITY {
            self.flush()?;
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Transmit all buffered bytes as a single transport message.
    pub fn flush(&mut self) -> Result<(), StreamError> {
        if !self.buf.is_empty() {
            let frame = std::mem::take(&mut self.buf);
            self.buf.reserve(SEND_CAPACITY);
            self.transmit_owned(frame)?;
        }
        Ok(())
    }

    fn transmit(&self, frame: &[u8]) -> Result<(), StreamError> {
        self.outgoing
            .send(Bytes::copy_from_slice(frame))
            .map_err(|_| StreamError::Closed)
    }

    fn transmit_owned(&self, frame: Vec<u8>) -> Result<(), StreamError> {
        self.outgoing
            .send(Bytes::from(frame))
            .map_err(|_| StreamError::Closed)
    }
}
