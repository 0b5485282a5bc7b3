//! Length-prefixed packet framing over a byte stream.
//!
//! Wire format:
//! ```text
//! [length:4][payload:length]
//! ```
//! The length is an unsigned 32-bit big-endian integer.  The payload is
//! conventionally a UTF-8 JSON document, but this module treats it as raw
//! bytes; serialization is the caller's job.
//!
//! # Why a length prefix? (for beginners)
//!
//! TCP is a *stream* protocol: a single `read()` call may return half a
//! message, or the tail of one message and the head of the next.  Prefixing
//! each packet with its size lets the receiver read exactly one packet at a
//! time, no matter how the bytes were chopped up in transit.
//!
//! # Receive timeouts
//!
//! [`FrameReader::read_frame`] takes a `wait` budget.  If the 4-byte length
//! prefix has not fully arrived when the budget runs out, the call returns
//! [`FrameError::Idle`], which is *recoverable*: the connection is still fine,
//! the peer simply had nothing to say yet.  Any bytes of the prefix that did
//! arrive are kept inside the reader, so the next call resumes exactly where
//! this one stopped.  Every other failure (EOF, I/O error, payload timeout,
//! oversized length) means the stream can no longer be trusted.
//!
//! # Oversized packets
//!
//! Packets are bounded by [`FrameLimits::max_payload`] (the receive buffer).
//! What happens when a peer announces a bigger packet depends on
//! [`OversizePolicy`]:
//!
//! - `Reject` – fail with [`FrameError::Oversized`] before reading the payload.
//! - `Truncate` – keep the first `max_payload` bytes and discard the rest so
//!   the stream stays aligned on the next length prefix.

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::warn;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default receive buffer bound in bytes.
pub const DEFAULT_BUFLEN: usize = 16 * 1024;

/// What to do with a packet whose declared length exceeds the buffer bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversizePolicy {
    /// Fail the receive; the connection must be treated as dead.
    #[default]
    Reject,
    /// Keep the head of the payload and drain the remainder from the stream.
    Truncate,
}

/// Size bound and oversize policy applied to every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_payload: usize,
    pub oversize: OversizePolicy,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_BUFLEN,
            oversize: OversizePolicy::Reject,
        }
    }
}

/// Errors that can occur while writing or reading a packet.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The length prefix did not fully arrive within the wait budget.
    #[error("no complete length prefix received within {0:?}")]
    Idle(Duration),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// The packet is larger than the buffer bound.
    #[error("packet length {declared} exceeds the {max}-byte bound")]
    Oversized { declared: usize, max: usize },

    /// The length prefix arrived but the payload did not follow in time.
    #[error("payload of {expected} bytes not received within {waited:?}")]
    PayloadTimeout { expected: usize, waited: Duration },

    /// Any other I/O failure on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Returns `true` when the caller may simply try to receive again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::Idle(_))
    }
}

/// Three-way result of a single receive attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// One complete packet.
    Packet(Vec<u8>),
    /// Nothing arrived in time; the connection is still usable.
    Warning,
    /// The connection is dead or desynchronized.
    Error,
}

impl From<Result<Vec<u8>, FrameError>> for ReceiveOutcome {
    fn from(result: Result<Vec<u8>, FrameError>) -> Self {
        match result {
            Ok(payload) => ReceiveOutcome::Packet(payload),
            Err(e) if e.is_recoverable() => ReceiveOutcome::Warning,
            Err(_) => ReceiveOutcome::Error,
        }
    }
}

/// Writes one packet: the 4-byte big-endian length, then the payload.
///
/// `write_all` keeps writing until the whole buffer is flushed, so a short
/// write from the OS never truncates a packet.
///
/// # Errors
///
/// Returns [`FrameError::Oversized`] if `payload` exceeds the bound (nothing
/// is written in that case), or [`FrameError::Io`] if the stream fails.
pub async fn write_frame<W>(
    writer: &mut W,
    payload: &[u8],
    limits: &FrameLimits,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if payload.len() > limits.max_payload {
        return Err(FrameError::Oversized {
            declared: payload.len(),
            max: limits.max_payload,
        });
    }
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::Oversized {
        declared: payload.len(),
        max: u32::MAX as usize,
    })?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Stateful packet reader for one connection.
///
/// Holds the partially received length prefix between calls, which is what
/// makes [`FrameError::Idle`] safe to retry.  Use one `FrameReader` per
/// stream and never share it between streams.
#[derive(Debug)]
pub struct FrameReader {
    prefix: [u8; LENGTH_PREFIX_SIZE],
    filled: usize,
    limits: FrameLimits,
}

impl FrameReader {
    pub fn new(limits: FrameLimits) -> Self {
        Self {
            prefix: [0; LENGTH_PREFIX_SIZE],
            filled: 0,
            limits,
        }
    }

    pub fn limits(&self) -> &FrameLimits {
        &self.limits
    }

    /// Returns `true` if some, but not all, prefix bytes have been received.
    pub fn has_partial_prefix(&self) -> bool {
        self.filled > 0
    }

    /// Reads one complete packet from `reader`.
    ///
    /// The length prefix must complete within `wait`; the payload then gets a
    /// fresh `wait` budget of its own.
    ///
    /// # Errors
    ///
    /// See [`FrameError`].  Only [`FrameError::Idle`] leaves the reader in a
    /// state where calling again makes sense.
    pub async fn read_frame<R>(&mut self, reader: &mut R, wait: Duration) -> Result<Vec<u8>, FrameError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let deadline = deadline_after(wait);

        // `read` is cancel safe, so a timeout between two reads never loses bytes.
        while self.filled < LENGTH_PREFIX_SIZE {
            match timeout_at(deadline, reader.read(&mut self.prefix[self.filled..])).await {
                Err(_elapsed) => return Err(FrameError::Idle(wait)),
                Ok(Ok(0)) => {
                    self.filled = 0;
                    return Err(FrameError::Closed);
                }
                Ok(Ok(n)) => self.filled += n,
                Ok(Err(e))
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    return Err(FrameError::Idle(wait));
                }
                Ok(Err(e)) => {
                    self.filled = 0;
                    return Err(FrameError::Io(e));
                }
            }
        }

        let declared = u32::from_be_bytes(self.prefix) as usize;
        self.filled = 0;

        let keep = if declared > self.limits.max_payload {
            match self.limits.oversize {
                OversizePolicy::Reject => {
                    return Err(FrameError::Oversized {
                        declared,
                        max: self.limits.max_payload,
                    })
                }
                OversizePolicy::Truncate => {
                    warn!(
                        "truncating {declared}-byte packet to {} bytes",
                        self.limits.max_payload
                    );
                    self.limits.max_payload
                }
            }
        } else {
            declared
        };

        let mut payload = vec![0u8; keep];
        read_exact_within(reader, &mut payload, wait).await?;

        let excess = declared - keep;
        if excess > 0 {
            let mut rest = (&mut *reader).take(excess as u64);
            let drained = match timeout(wait, tokio::io::copy(&mut rest, &mut tokio::io::sink())).await {
                Ok(result) => result?,
                Err(_elapsed) => {
                    return Err(FrameError::PayloadTimeout {
                        expected: excess,
                        waited: wait,
                    })
                }
            };
            if drained < excess as u64 {
                return Err(FrameError::Closed);
            }
        }

        Ok(payload)
    }
}

/// Roughly 30 years; stands in for "no deadline" when `now + wait` overflows.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + wait`, clamped so that a huge `wait` such as `Duration::MAX` means
/// "wait indefinitely" instead of overflowing.
fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

async fn read_exact_within<R>(reader: &mut R, buf: &mut [u8], wait: Duration) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if buf.is_empty() {
        return Ok(());
    }
    match timeout(wait, reader.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FrameError::Closed),
        Ok(Err(e)) => Err(FrameError::Io(e)),
        Err(_elapsed) => Err(FrameError::PayloadTimeout {
            expected: buf.len(),
            waited: wait,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
