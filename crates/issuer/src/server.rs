// Copyright The posim Authors
// SPDX-License-Identifier: Apache-2.0

//! Accept loop and handler pool.

use crate::broker::Broker;
use crate::error::Error;
use crate::io::{arm_deadlines, read_frame, write_frame};
use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use posim_shm::{FRONT_MODE_BROKER, Region};
use posim_wire::{JoinAck, Message, TicketResp, WorkItem, endpoint};
use std::os::fd::AsFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Runtime settings for the endpoint process.
#[derive(Debug, Clone)]
pub struct IssuerSettings {
    /// Number of connection handler threads.
    pub pool_size: usize,
    /// Explicit socket path override; `None` uses the per-user default.
    pub socket_path: Option<std::path::PathBuf>,
}

/// Granularity of poll cycles, channel waits, and shutdown checks.
const CYCLE: Duration = Duration::from_millis(200);

/// Runs the front-end until `keep_running` clears or the simulation ends.
///
/// The calling thread becomes the accept thread and represents the
/// endpoint in the day-start barrier between poll cycles. Which protocol
/// is served (FIFO issuer or work broker) follows `params.front_mode`.
pub fn run(
    region: Arc<Region>,
    settings: IssuerSettings,
    keep_running: Arc<AtomicBool>,
) -> Result<(), Error> {
    let path = match &settings.socket_path {
        Some(path) => path.clone(),
        None => {
            let dir =
                endpoint::prepare_socket_dir().map_err(|source| Error::EndpointDir { source })?;
            dir.join(endpoint::SOCKET_FILE)
        }
    };

    // A stale socket file from a previous run would make bind fail.
    match std::fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => return Err(Error::EndpointDir { source }),
    }

    let listener = UnixListener::bind(&path).map_err(|source| Error::Bind {
        path: path.clone(),
        source,
    })?;
    listener
        .set_nonblocking(true)
        .map_err(|source| Error::Bind {
            path: path.clone(),
            source,
        })?;

    let shared = region.shared();
    let broker = (shared.params.front_mode == FRONT_MODE_BROKER)
        .then(|| Arc::new(Broker::new(shared.params.n_services)));
    info!(
        path = %path.display(),
        pool_size = settings.pool_size,
        front = if broker.is_some() { "broker" } else { "fifo" },
        "ticket endpoint listening"
    );

    // Bounded handoff: when every handler is busy and the channel is full,
    // the accept loop stops draining and new clients queue in the accept
    // backlog.
    let (tx, rx) = bounded::<UnixStream>(settings.pool_size);
    let mut pool = Vec::with_capacity(settings.pool_size);
    for i in 0..settings.pool_size {
        let rx = rx.clone();
        let region = Arc::clone(&region);
        let broker = broker.clone();
        let keep_running = Arc::clone(&keep_running);
        let handle = std::thread::Builder::new()
            .name(format!("posim-issuer-{i}"))
            .spawn(move || handler_loop(&region, broker.as_deref(), &rx, &keep_running))
            .map_err(|source| Error::Io {
                operation: "spawn",
                source,
            })?;
        pool.push(handle);
    }
    drop(rx);

    let mut last_synced_day = 0u32;
    let mut pending: Option<UnixStream> = None;
    while keep_running.load(Ordering::Acquire) && shared.clock.is_active() {
        // Barrier first: no connection is served for a day the endpoint has
        // not acknowledged.
        let _ = shared
            .barrier
            .participant_join(&mut last_synced_day, || keep_running.load(Ordering::Acquire));

        // Finish handing over a connection accepted in a previous cycle.
        if let Some(stream) = pending.take() {
            match tx.send_timeout(stream, CYCLE) {
                Ok(()) => {}
                Err(crossbeam_channel::SendTimeoutError::Timeout(stream)) => {
                    pending = Some(stream);
                    continue;
                }
                Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => break,
            }
        }

        let mut fds = [PollFd::new(listener.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(CYCLE.as_millis() as u16)) {
            Ok(0) => continue,
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => continue,
            Err(errno) => {
                return Err(Error::Io {
                    operation: "poll",
                    source: std::io::Error::from(errno),
                });
            }
        }

        loop {
            match listener.accept() {
                Ok((stream, _addr)) => match tx.send_timeout(stream, CYCLE) {
                    Ok(()) => {}
                    Err(crossbeam_channel::SendTimeoutError::Timeout(stream)) => {
                        // Pool saturated: park the connection and re-enter
                        // the cycle so the barrier stays responsive.
                        pending = Some(stream);
                        break;
                    }
                    Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => break,
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    drop(tx);
    for handle in pool {
        let name = handle.thread().name().unwrap_or("posim-issuer").to_owned();
        if handle.join().is_err() {
            return Err(Error::PoolThread { name });
        }
    }
    let _ = std::fs::remove_file(&path);
    info!("ticket endpoint closed");
    Ok(())
}

fn handler_loop(
    region: &Region,
    broker: Option<&Broker>,
    rx: &Receiver<UnixStream>,
    keep_running: &AtomicBool,
) {
    loop {
        match rx.recv_timeout(CYCLE) {
            Ok(mut stream) => {
                if let Err(e) = handle_connection(region, broker, &mut stream) {
                    debug!(error = %e, "connection dropped");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if !keep_running.load(Ordering::Acquire) && !region.shared().clock.is_active() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Serves exactly one request/response exchange, then closes.
fn handle_connection(
    region: &Region,
    broker: Option<&Broker>,
    stream: &mut UnixStream,
) -> Result<(), Error> {
    arm_deadlines(stream)?;
    let shared = region.shared();
    let request = match read_frame(stream) {
        Ok(message) => message,
        Err(e @ Error::Protocol(_)) => {
            shared.stats.inc_protocol_errors();
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    let response = match (request, broker) {
        (Message::TicketReq(req), None) => {
            if region.queue(req.service_type).is_err() {
                shared.stats.inc_protocol_errors();
                return Err(Error::Protocol(posim_wire::Error::InvalidField {
                    field: "service_type",
                    details: format!("no such service: {}", req.service_type),
                }));
            }
            // Draw the sequence only after the request is fully read; the
            // ticket counter is never held across I/O.
            let ticket = shared.tickets.next();
            shared.stats.inc_tickets_issued();
            debug!(
                ticket,
                service = req.service_type,
                pid = req.requester_pid,
                "ticket issued"
            );
            Message::TicketResp(TicketResp {
                ticket_number: ticket,
                assigned_service: req.service_type,
            })
        }
        (Message::JoinQueue(req), Some(broker)) => {
            if !broker.has_service(req.service_type) {
                shared.stats.inc_protocol_errors();
                return Err(Error::Protocol(posim_wire::Error::InvalidField {
                    field: "service_type",
                    details: format!("no such service: {}", req.service_type),
                }));
            }
            let ticket = shared.tickets.next();
            shared.stats.inc_tickets_issued();
            let depth = broker.join(req.service_type, ticket, req.is_vip);
            let queue = region.queue(req.service_type)?;
            queue.inc_waiting();
            queue.notify_added_all();
            // Advisory only: measured mean once history exists, the
            // configured midpoint before the first completion.
            let mean_ms = queue.mean_service_ms().unwrap_or_else(|| {
                shared.params.serv_min_ms.midpoint(shared.params.serv_max_ms)
            });
            let estimated_wait_ms =
                u32::try_from((depth as u64).saturating_mul(mean_ms)).unwrap_or(u32::MAX);
            debug!(
                ticket,
                service = req.service_type,
                vip = req.is_vip,
                "queue joined"
            );
            Message::JoinAck(JoinAck {
                ticket_number: ticket,
                estimated_wait_ms,
            })
        }
        (Message::GetWork(req), Some(broker)) => {
            if !broker.has_service(req.service_type) {
                shared.stats.inc_protocol_errors();
                return Err(Error::Protocol(posim_wire::Error::InvalidField {
                    field: "service_type",
                    details: format!("no such service: {}", req.service_type),
                }));
            }
            match broker.take(req.service_type) {
                Some((ticket, is_vip)) => {
                    region.queue(req.service_type)?.dec_waiting();
                    Message::WorkItem(WorkItem {
                        ticket_number: ticket,
                        is_vip,
                    })
                }
                None => Message::WorkItem(WorkItem {
                    ticket_number: 0,
                    is_vip: false,
                }),
            }
        }
        (other, _) => {
            // A type this front does not serve is a protocol error, same as
            // an unknown type.
            shared.stats.inc_protocol_errors();
            return Err(Error::UnexpectedMessage {
                got: other.msg_type(),
            });
        }
    };

    write_frame(stream, &response)
}
