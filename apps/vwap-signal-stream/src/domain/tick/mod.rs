//! Binary Tick Decoder
//!
//! Parses the fixed-layout quote packets of the market feed into [`Tick`]s.
//!
//! # Frame Layout
//!
//! Every packet starts with an 8-byte little-endian header followed by a
//! packet-specific payload. Quote packets (response code `4`) carry:
//!
//! ```text
//! header   0  u8   response code
//!          1  i16  message length
//!          3  u8   exchange segment
//!          4  i32  security id
//! payload  0  f32  last traded price
//!          4  i16  last traded quantity
//!          6  i32  last trade time (epoch seconds)
//!         10  f32  average traded price
//!         14  i32  cumulative traded volume
//! ```
//!
//! Offsets and widths are fixed by the upstream feed.

use serde::{Deserialize, Serialize};

/// Response code of a quote packet.
pub const QUOTE_PACKET_CODE: u8 = 4;

/// Response code of the server's disconnect packet.
pub const DISCONNECT_PACKET_CODE: u8 = 50;

/// Size of the packet header.
pub const HEADER_LEN: usize = 8;

/// Bytes of quote payload this decoder reads.
pub const QUOTE_PAYLOAD_LEN: usize = 18;

/// Smallest frame that can hold a quote.
pub const MIN_QUOTE_FRAME_LEN: usize = HEADER_LEN + QUOTE_PAYLOAD_LEN;

const PRICE_OFFSET: usize = 0;
const LAST_QTY_OFFSET: usize = 4;
const TIMESTAMP_OFFSET: usize = 6;
const AVG_PRICE_OFFSET: usize = 10;
const CUMULATIVE_VOLUME_OFFSET: usize = 14;

/// Decoding failures. The frame is dropped; no state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Frame is shorter than a quote packet.
    #[error("frame too short: {len} bytes, need at least {min}")]
    TooShort {
        /// Actual frame length.
        len: usize,
        /// Required frame length.
        min: usize,
    },

    /// Leading response code is not the quote packet code.
    #[error("unexpected packet type {0}, expected {QUOTE_PACKET_CODE}")]
    UnexpectedType(u8),
}

impl DecodeError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TooShort { .. } => "too_short",
            Self::UnexpectedType(_) => "unexpected_type",
        }
    }
}

/// Packet header shared by every feed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    /// Feed response code (packet type).
    pub response_code: u8,
    /// Message length as reported by the feed.
    pub message_length: i16,
    /// Exchange segment code.
    pub exchange_segment: u8,
    /// Instrument security id.
    pub security_id: i32,
}

/// A decoded quote tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Packet header.
    pub header: FrameHeader,
    /// Last traded price.
    pub price: f32,
    /// Last traded quantity.
    pub last_quantity: i16,
    /// Last trade time, epoch seconds.
    pub timestamp: i32,
    /// Average traded price for the day.
    pub average_price: f32,
    /// Cumulative traded volume for the day.
    pub cumulative_volume: i32,
}

/// Read the response code of a packet without decoding it.
#[must_use]
pub fn peek_response_code(frame: &[u8]) -> Option<u8> {
    frame.first().copied()
}

/// Decode a quote frame.
///
/// # Errors
///
/// Returns [`DecodeError::TooShort`] for frames under
/// [`MIN_QUOTE_FRAME_LEN`] bytes and [`DecodeError::UnexpectedType`] when
/// the leading byte is not [`QUOTE_PACKET_CODE`].
pub fn decode(frame: &[u8]) -> Result<Tick, DecodeError> {
    if frame.len() < MIN_QUOTE_FRAME_LEN {
        return Err(DecodeError::TooShort {
            len: frame.len(),
            min: MIN_QUOTE_FRAME_LEN,
        });
    }

    let response_code = frame[0];
    if response_code != QUOTE_PACKET_CODE {
        return Err(DecodeError::UnexpectedType(response_code));
    }

    let header = FrameHeader {
        response_code,
        message_length: i16::from_le_bytes([frame[1], frame[2]]),
        exchange_segment: frame[3],
        security_id: read_i32(frame, 4),
    };

    let payload = &frame[HEADER_LEN..];

    Ok(Tick {
        header,
        price: f32::from_le_bytes(read_4(payload, PRICE_OFFSET)),
        last_quantity: i16::from_le_bytes([
            payload[LAST_QTY_OFFSET],
            payload[LAST_QTY_OFFSET + 1],
        ]),
        timestamp: read_i32(payload, TIMESTAMP_OFFSET),
        average_price: f32::from_le_bytes(read_4(payload, AVG_PRICE_OFFSET)),
        cumulative_volume: read_i32(payload, CUMULATIVE_VOLUME_OFFSET),
    })
}

/// Read the reason code of a disconnect packet.
#[must_use]
pub fn decode_disconnect_reason(frame: &[u8]) -> Option<i16> {
    if peek_response_code(frame)? != DISCONNECT_PACKET_CODE || frame.len() < HEADER_LEN + 2 {
        return None;
    }
    Some(i16::from_le_bytes([frame[HEADER_LEN], frame[HEADER_LEN + 1]]))
}

// Callers check the length first.
const fn read_4(bytes: &[u8], offset: usize) -> [u8; 4] {
    [
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ]
}

const fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(read_4(bytes, offset))
}

/// Frame encoding for tests and replay tooling.
#[derive(Debug, Clone, Copy)]
pub struct QuoteFrameBuilder {
    security_id: i32,
    exchange_segment: u8,
    price: f32,
    last_quantity: i16,
    timestamp: i32,
    average_price: f32,
    cumulative_volume: i32,
}

impl Default for QuoteFrameBuilder {
    fn default() -> Self {
        Self {
            security_id: 1_165_486,
            exchange_segment: 8,
            price: 0.0,
            last_quantity: 0,
            timestamp: 0,
            average_price: 0.0,
            cumulative_volume: 0,
        }
    }
}

impl QuoteFrameBuilder {
    /// Start a frame with the given price, last quantity, time and volume.
    #[must_use]
    pub fn new(price: f32, last_quantity: i16, timestamp: i32, cumulative_volume: i32) -> Self {
        Self {
            price,
            last_quantity,
            timestamp,
            cumulative_volume,
            ..Self::default()
        }
    }

    /// Set the security id.
    #[must_use]
    pub const fn security_id(mut self, security_id: i32) -> Self {
        self.security_id = security_id;
        self
    }

    /// Set the average traded price.
    #[must_use]
    pub const fn average_price(mut self, average_price: f32) -> Self {
        self.average_price = average_price;
        self
    }

    /// Encode the frame.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MIN_QUOTE_FRAME_LEN);
        buf.push(QUOTE_PACKET_CODE);
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        buf.extend_from_slice(&(MIN_QUOTE_FRAME_LEN as i16).to_le_bytes());
        buf.push(self.exchange_segment);
        buf.extend_from_slice(&self.security_id.to_le_bytes());
        buf.extend_from_slice(&self.price.to_le_bytes());
        buf.extend_from_slice(&self.last_quantity.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.average_price.to_le_bytes());
        buf.extend_from_slice(&self.cumulative_volume.to_le_bytes());
        buf
    }
}
