// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Payload codecs.
//!
//! Every payload is a fixed-size little-endian record. Booleans travel as
//! one byte followed by three zero pad bytes so all fields stay 4-aligned.

use crate::error::Error;
use crate::frame::{FrameHeader, HEADER_LEN, MsgType};

/// User → issuer: request a ticket for a service type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketReq {
    /// PID of the requesting process.
    pub requester_pid: u32,
    /// Thread id of the requesting user agent.
    pub requester_tid: u32,
    /// The service the user wants.
    pub service_type: u32,
}

/// Issuer → user: the assigned ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketResp {
    /// The drawn ticket number.
    pub ticket_number: u32,
    /// The service the ticket is valid for.
    pub assigned_service: u32,
}

/// User → broker: join a priority queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinQueue {
    /// PID of the requesting process.
    pub requester_pid: u32,
    /// The service the user wants.
    pub service_type: u32,
    /// Whether the user holds VIP priority.
    pub is_vip: bool,
}

/// Broker → user: queue join acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinAck {
    /// The drawn ticket number.
    pub ticket_number: u32,
    /// Rough wall-clock wait estimate from current queue depth.
    pub estimated_wait_ms: u32,
}

/// Worker → broker: ask for the next work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetWork {
    /// PID of the worker host.
    pub worker_pid: u32,
    /// The service the worker is assigned to.
    pub service_type: u32,
}

/// Broker → worker: the next work item, or none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    /// The dispatched ticket; `0` means "no work right now".
    pub ticket_number: u32,
    /// Whether the dispatched ticket was VIP-prioritized.
    pub is_vip: bool,
}

/// A decoded frame of any type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// `TICKET_REQ`
    TicketReq(TicketReq),
    /// `TICKET_RESP`
    TicketResp(TicketResp),
    /// `JOIN_QUEUE`
    JoinQueue(JoinQueue),
    /// `JOIN_ACK`
    JoinAck(JoinAck),
    /// `GET_WORK`
    GetWork(GetWork),
    /// `WORK_ITEM`
    WorkItem(WorkItem),
}

const fn expected_len(msg_type: MsgType) -> u32 {
    match msg_type {
        MsgType::TicketReq => 12,
        MsgType::TicketResp => 8,
        MsgType::JoinQueue => 12,
        MsgType::JoinAck => 8,
        MsgType::GetWork => 8,
        MsgType::WorkItem => 8,
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn read_flag(buf: &[u8], offset: usize, field: &'static str) -> Result<bool, Error> {
    match buf[offset] {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Error::InvalidField {
            field,
            details: format!("boolean byte must be 0 or 1, got {other}"),
        }),
    }
}

impl Message {
    /// The wire discriminator of this message.
    #[must_use]
    pub const fn msg_type(&self) -> MsgType {
        match self {
            Message::TicketReq(_) => MsgType::TicketReq,
            Message::TicketResp(_) => MsgType::TicketResp,
            Message::JoinQueue(_) => MsgType::JoinQueue,
            Message::JoinAck(_) => MsgType::JoinAck,
            Message::GetWork(_) => MsgType::GetWork,
            Message::WorkItem(_) => MsgType::WorkItem,
        }
    }

    /// Encodes header plus payload into one buffer ready to write.
    #[must_use]
    pub fn encode_frame(&self) -> Vec<u8> {
        let payload_len = expected_len(self.msg_type());
        let mut buf = Vec::with_capacity(HEADER_LEN + payload_len as usize);
        buf.extend_from_slice(&FrameHeader::new(self.msg_type(), payload_len).encode());
        match self {
            Message::TicketReq(m) => {
                buf.extend_from_slice(&m.requester_pid.to_le_bytes());
                buf.extend_from_slice(&m.requester_tid.to_le_bytes());
                buf.extend_from_slice(&m.service_type.to_le_bytes());
            }
            Message::TicketResp(m) => {
                buf.extend_from_slice(&m.ticket_number.to_le_bytes());
                buf.extend_from_slice(&m.assigned_service.to_le_bytes());
            }
            Message::JoinQueue(m) => {
                buf.extend_from_slice(&m.requester_pid.to_le_bytes());
                buf.extend_from_slice(&m.service_type.to_le_bytes());
                buf.push(u8::from(m.is_vip));
                buf.extend_from_slice(&[0u8; 3]);
            }
            Message::JoinAck(m) => {
                buf.extend_from_slice(&m.ticket_number.to_le_bytes());
                buf.extend_from_slice(&m.estimated_wait_ms.to_le_bytes());
            }
            Message::GetWork(m) => {
                buf.extend_from_slice(&m.worker_pid.to_le_bytes());
                buf.extend_from_slice(&m.service_type.to_le_bytes());
            }
            Message::WorkItem(m) => {
                buf.extend_from_slice(&m.ticket_number.to_le_bytes());
                buf.push(u8::from(m.is_vip));
                buf.extend_from_slice(&[0u8; 3]);
            }
        }
        buf
    }

    /// Decodes a payload against its validated header.
    ///
    /// The header's `payload_len` must exactly equal the size expected for
    /// the type, and `payload` must provide at least that many bytes.
    pub fn decode(header: &FrameHeader, payload: &[u8]) -> Result<Self, Error> {
        let expected = expected_len(header.msg_type);
        if header.payload_len != expected {
            return Err(Error::PayloadLenMismatch {
                msg_type: header.msg_type,
                expected,
                found: header.payload_len,
            });
        }
        if payload.len() < expected as usize {
            return Err(Error::Truncated {
                needed: expected as usize,
                found: payload.len(),
            });
        }
        Ok(match header.msg_type {
            MsgType::TicketReq => Message::TicketReq(TicketReq {
                requester_pid: read_u32(payload, 0),
                requester_tid: read_u32(payload, 4),
                service_type: read_u32(payload, 8),
            }),
            MsgType::TicketResp => Message::TicketResp(TicketResp {
                ticket_number: read_u32(payload, 0),
                assigned_service: read_u32(payload, 4),
            }),
            MsgType::JoinQueue => Message::JoinQueue(JoinQueue {
                requester_pid: read_u32(payload, 0),
                service_type: read_u32(payload, 4),
                is_vip: read_flag(payload, 8, "is_vip")?,
            }),
            MsgType::JoinAck => Message::JoinAck(JoinAck {
                ticket_number: read_u32(payload, 0),
                estimated_wait_ms: read_u32(payload, 4),
            }),
            MsgType::GetWork => Message::GetWork(GetWork {
                worker_pid: read_u32(payload, 0),
                service_type: read_u32(payload, 4),
            }),
            MsgType::WorkItem => Message::WorkItem(WorkItem {
                ticket_number: read_u32(payload, 0),
                is_vip: read_flag(payload, 4, "is_vip")?,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn round_trip(message: Message) {
        let frame = message.encode_frame();
        let header = FrameHeader::decode(&frame[..HEADER_LEN]).expect("header");
        let decoded = Message::decode(&header, &frame[HEADER_LEN..]).expect("payload");
        assert_eq!(decoded, message);
    }

    #[test]
    fn ticket_exchange_round_trip() {
        round_trip(Message::TicketReq(TicketReq {
            requester_pid: 4321,
            requester_tid: 7,
            service_type: 2,
        }));
        round_trip(Message::TicketResp(TicketResp {
            ticket_number: 99,
            assigned_service: 2,
        }));
    }

    #[test]
    fn broker_exchanges_round_trip() {
        round_trip(Message::JoinQueue(JoinQueue {
            requester_pid: 10,
            service_type: 1,
            is_vip: true,
        }));
        round_trip(Message::JoinAck(JoinAck {
            ticket_number: 5,
            estimated_wait_ms: 1500,
        }));
        round_trip(Message::GetWork(GetWork {
            worker_pid: 77,
            service_type: 3,
        }));
        round_trip(Message::WorkItem(WorkItem {
            ticket_number: 0,
            is_vip: false,
        }));
    }

    #[test]
    fn payload_len_must_match_type_exactly() {
        let mut header = FrameHeader::new(MsgType::TicketReq, 12);
        header.payload_len = 8;
        let err = Message::decode(&header, &[0u8; 12]).expect_err("mismatch");
        assert_eq!(
            err,
            Error::PayloadLenMismatch {
                msg_type: MsgType::TicketReq,
                expected: 12,
                found: 8
            }
        );
    }

    #[test]
    fn nonbinary_flag_byte_is_rejected() {
        let mut frame = Message::JoinQueue(JoinQueue {
            requester_pid: 1,
            service_type: 0,
            is_vip: false,
        })
        .encode_frame();
        frame[HEADER_LEN + 8] = 7;
        let header = FrameHeader::decode(&frame[..HEADER_LEN]).expect("header");
        let err = Message::decode(&header, &frame[HEADER_LEN..]).expect_err("bad flag");
        assert!(matches!(err, Error::InvalidField { .. }));
    }
}
