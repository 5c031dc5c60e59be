// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Wire protocol for the ticket-service endpoint.
//!
//! Every exchange on the local stream socket is one request frame followed
//! by one response frame. A frame is a fixed 8-byte header
//! `{version:u16, msg_type:u8, flags:u8, payload_len:u32}` (little-endian)
//! followed by a fixed-size payload. `payload_len` must exactly match the
//! size expected for the message type; a mismatch is a protocol error and
//! the connection is dropped.
//!
//! Two front-ends speak this protocol: the FIFO ticket issuer
//! (`TICKET_REQ`/`TICKET_RESP`) and the priority work broker
//! (`JOIN_QUEUE`/`JOIN_ACK`, `GET_WORK`/`WORK_ITEM`).

pub mod endpoint;
pub mod error;
pub mod frame;
pub mod message;

pub use error::Error;
pub use frame::{FrameHeader, MsgType, HEADER_LEN, MAX_PAYLOAD_LEN, WIRE_VERSION};
pub use message::{GetWork, JoinAck, JoinQueue, Message, TicketReq, TicketResp, WorkItem};
