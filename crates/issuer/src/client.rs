// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Blocking client helpers for the ticket endpoint.
//!
//! Every call performs one connect → request → response → close exchange.
//! Connecting retries on a fixed cadence because users race the endpoint
//! at startup; each blocking step polls the caller's cancellation closure.

use crate::error::Error;
use crate::io::{arm_deadlines, read_frame, write_frame};
use posim_wire::{GetWork, JoinAck, JoinQueue, Message, TicketReq, TicketResp, WorkItem, endpoint};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connect attempts before declaring the endpoint unreachable.
pub const CONNECT_ATTEMPTS: u32 = 100;

/// Pause between connect attempts.
pub const CONNECT_BACKOFF: Duration = Duration::from_millis(20);

/// A dialed endpoint.
pub struct EndpointClient {
    path: PathBuf,
}

impl EndpointClient {
    /// A client for the per-user default endpoint path.
    #[must_use]
    pub fn new() -> Self {
        Self {
            path: endpoint::socket_path(),
        }
    }

    /// A client for an explicit socket path (tests).
    #[must_use]
    pub fn with_path(path: &Path) -> Self {
        Self {
            path: path.to_owned(),
        }
    }

    /// Connects with bounded retry, polling `keep_waiting` between attempts.
    pub fn connect(&self, keep_waiting: impl Fn() -> bool) -> Result<UnixStream, Error> {
        let mut attempts = 0;
        loop {
            match UnixStream::connect(&self.path) {
                Ok(stream) => {
                    arm_deadlines(&stream)?;
                    return Ok(stream);
                }
                Err(_) => {
                    attempts += 1;
                    if attempts >= CONNECT_ATTEMPTS || !keep_waiting() {
                        return Err(Error::Unreachable {
                            path: self.path.clone(),
                            attempts,
                        });
                    }
                    std::thread::sleep(CONNECT_BACKOFF);
                }
            }
        }
    }

    /// FIFO front: requests one ticket.
    pub fn request_ticket(
        &self,
        request: TicketReq,
        keep_waiting: impl Fn() -> bool,
    ) -> Result<TicketResp, Error> {
        let mut stream = self.connect(keep_waiting)?;
        write_frame(&mut stream, &Message::TicketReq(request))?;
        match read_frame(&mut stream)? {
            Message::TicketResp(resp) => Ok(resp),
            other => Err(Error::UnexpectedMessage {
                got: other.msg_type(),
            }),
        }
    }

    /// Broker front: joins a priority queue.
    pub fn join_queue(
        &self,
        request: JoinQueue,
        keep_waiting: impl Fn() -> bool,
    ) -> Result<JoinAck, Error> {
        let mut stream = self.connect(keep_waiting)?;
        write_frame(&mut stream, &Message::JoinQueue(request))?;
        match read_frame(&mut stream)? {
            Message::JoinAck(ack) => Ok(ack),
            other => Err(Error::UnexpectedMessage {
                got: other.msg_type(),
            }),
        }
    }

    /// Broker front: asks for the next work item.
    ///
    /// Returns `None` when the broker has no work for the service right now.
    pub fn get_work(
        &self,
        request: GetWork,
        keep_waiting: impl Fn() -> bool,
    ) -> Result<Option<WorkItem>, Error> {
        let mut stream = self.connect(keep_waiting)?;
        write_frame(&mut stream, &Message::GetWork(request))?;
        match read_frame(&mut stream)? {
            Message::WorkItem(item) if item.ticket_number == 0 => Ok(None),
            Message::WorkItem(item) => Ok(Some(item)),
            other => Err(Error::UnexpectedMessage {
                got: other.msg_type(),
            }),
        }
    }
}

impl Default for EndpointClient {
    fn default() -> Self {
        Self::new()
    }
}
