// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! The fixed frame header.

use crate::error::Error;

/// Protocol version spoken by this build.
pub const WIRE_VERSION: u16 = 1;

/// Encoded size of [`FrameHeader`].
pub const HEADER_LEN: usize = 8;

/// Global bound on `payload_len`, enforced before the per-type check.
pub const MAX_PAYLOAD_LEN: u32 = 64;

/// Message types carried on the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    /// User requests a ticket (FIFO front).
    TicketReq = 1,
    /// Issuer answers a ticket request.
    TicketResp = 2,
    /// User joins a priority queue (broker front).
    JoinQueue = 3,
    /// Broker acknowledges a queue join.
    JoinAck = 4,
    /// Worker asks the broker for its next work item.
    GetWork = 5,
    /// Broker answers a work request.
    WorkItem = 6,
}

impl TryFrom<u8> for MsgType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match value {
            1 => Ok(MsgType::TicketReq),
            2 => Ok(MsgType::TicketResp),
            3 => Ok(MsgType::JoinQueue),
            4 => Ok(MsgType::JoinAck),
            5 => Ok(MsgType::GetWork),
            6 => Ok(MsgType::WorkItem),
            found => Err(Error::UnknownMsgType { found }),
        }
    }
}

/// The 8-byte frame header preceding every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol version; must equal [`WIRE_VERSION`].
    pub version: u16,
    /// Payload discriminator.
    pub msg_type: MsgType,
    /// Reserved; always zero in this version.
    pub flags: u8,
    /// Exact payload size that follows the header.
    pub payload_len: u32,
}

impl FrameHeader {
    /// Builds the header for a payload of the given type and size.
    #[must_use]
    pub const fn new(msg_type: MsgType, payload_len: u32) -> Self {
        Self {
            version: WIRE_VERSION,
            msg_type,
            flags: 0,
            payload_len,
        }
    }

    /// Encodes the header into its little-endian wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..2].copy_from_slice(&self.version.to_le_bytes());
        buf[2] = self.msg_type as u8;
        buf[3] = self.flags;
        buf[4..8].copy_from_slice(&self.payload_len.to_le_bytes());
        buf
    }

    /// Decodes and validates a header.
    ///
    /// Checks, in order: length, version, message type, and the global
    /// payload bound. The per-type `payload_len` equality check happens in
    /// the payload codec, which knows the expected size.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HEADER_LEN {
            return Err(Error::Truncated {
                needed: HEADER_LEN,
                found: buf.len(),
            });
        }
        let version = u16::from_le_bytes([buf[0], buf[1]]);
        if version != WIRE_VERSION {
            return Err(Error::UnsupportedVersion {
                found: version,
                expected: WIRE_VERSION,
            });
        }
        let msg_type = MsgType::try_from(buf[2])?;
        let payload_len = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLarge {
                found: payload_len,
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(Self {
            version,
            msg_type,
            flags: buf[3],
            payload_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn header_round_trip() {
        let header = FrameHeader::new(MsgType::TicketReq, 12);
        let decoded = FrameHeader::decode(&header.encode()).expect("decode");
        assert_eq!(decoded, header);
    }

    #[test]
    fn rejects_wrong_version() {
        let mut buf = FrameHeader::new(MsgType::TicketReq, 12).encode();
        buf[0] = 9;
        assert_eq!(
            FrameHeader::decode(&buf),
            Err(Error::UnsupportedVersion {
                found: 9,
                expected: WIRE_VERSION
            })
        );
    }

    #[test]
    fn rejects_unknown_type() {
        let mut buf = FrameHeader::new(MsgType::TicketReq, 12).encode();
        buf[2] = 0xAA;
        assert_eq!(
            FrameHeader::decode(&buf),
            Err(Error::UnknownMsgType { found: 0xAA })
        );
    }

    #[test]
    fn rejects_oversized_payload() {
        let mut buf = FrameHeader::new(MsgType::TicketReq, 12).encode();
        buf[4..8].copy_from_slice(&(MAX_PAYLOAD_LEN + 1).to_le_bytes());
        assert!(matches!(
            FrameHeader::decode(&buf),
            Err(Error::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(matches!(
            FrameHeader::decode(&[0u8; 4]),
            Err(Error::Truncated { .. })
        ));
    }
}
