// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Bounded-retry framed I/O over the local stream socket.
//!
//! Transient conditions (`EINTR`, `EAGAIN`, short reads) are retried by
//! re-polling with a short timeout a bounded number of times; exhausting
//! the bound surfaces the last error and the caller drops the connection.

use crate::error::Error;
use posim_wire::{FrameHeader, HEADER_LEN, Message};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

/// Per-call read/write deadline armed on every connection.
pub(crate) const IO_TIMEOUT: Duration = Duration::from_millis(500);

/// How many transient stalls a single framed read tolerates.
const MAX_STALLS: u32 = 8;

/// Arms both socket deadlines; connections never block indefinitely.
pub(crate) fn arm_deadlines(stream: &UnixStream) -> Result<(), Error> {
    stream
        .set_read_timeout(Some(IO_TIMEOUT))
        .and_then(|()| stream.set_write_timeout(Some(IO_TIMEOUT)))
        .map_err(|source| Error::Io {
            operation: "configure",
            source,
        })
}

/// Reads exactly `buf.len()` bytes with bounded retries on stalls.
pub(crate) fn read_exact_bounded(stream: &mut UnixStream, buf: &mut [u8]) -> Result<(), Error> {
    let mut filled = 0;
    let mut stalls = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(Error::Io {
                    operation: "read",
                    source: std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                stalls += 1;
                if stalls > MAX_STALLS {
                    return Err(Error::Io {
                        operation: "read",
                        source: e,
                    });
                }
            }
            Err(e) => {
                return Err(Error::Io {
                    operation: "read",
                    source: e,
                });
            }
        }
    }
    Ok(())
}

/// Writes the whole buffer with bounded retries on stalls.
pub(crate) fn write_all_bounded(stream: &mut UnixStream, buf: &[u8]) -> Result<(), Error> {
    let mut written = 0;
    let mut stalls = 0;
    while written < buf.len() {
        match stream.write(&buf[written..]) {
            Ok(0) => {
                return Err(Error::Io {
                    operation: "write",
                    source: std::io::Error::from(std::io::ErrorKind::WriteZero),
                });
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                stalls += 1;
                if stalls > MAX_STALLS {
                    return Err(Error::Io {
                        operation: "write",
                        source: e,
                    });
                }
            }
            Err(e) => {
                return Err(Error::Io {
                    operation: "write",
                    source: e,
                });
            }
        }
    }
    Ok(())
}

/// Reads one full frame (header + exact payload).
pub(crate) fn read_frame(stream: &mut UnixStream) -> Result<Message, Error> {
    let mut header_buf = [0u8; HEADER_LEN];
    read_exact_bounded(stream, &mut header_buf)?;
    let header = FrameHeader::decode(&header_buf)?;

    let mut payload = vec![0u8; header.payload_len as usize];
    read_exact_bounded(stream, &mut payload)?;
    Ok(Message::decode(&header, &payload)?)
}

/// Writes one full frame.
pub(crate) fn write_frame(stream: &mut UnixStream, message: &Message) -> Result<(), Error> {
    write_all_bounded(stream, &message.encode_frame())
}
