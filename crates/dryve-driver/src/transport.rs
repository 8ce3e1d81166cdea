//! Modbus TCP transport with reconnection and heartbeat supervision.
//!
//! The transport owns the single TCP link to the drive. One request is in
//! flight at a time: application traffic and the background heartbeat
//! probe serialize over the same link mutex, so bytes from different
//! requests never interleave on the wire.
//!
//! Frames are read in two phases: the fixed-size MBAP header first, then
//! exactly the number of bytes its length field declares. A response whose
//! transaction id does not match the request just sent is discarded (a
//! stale answer to an earlier, abandoned call), never returned.

use dryve_common::{DriveError, DriveResult, TransportConfig};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::frame::{self, MbapHeader};
use crate::od;

/// Capability interface over the drive link.
///
/// The concrete implementation is selected at construction time; the rest
/// of the stack never cares whether the peer is real hardware or a test
/// drive answering the same wire protocol.
pub trait Transport: Send {
    /// Establish the TCP session.
    fn connect(&self) -> DriveResult<()>;

    /// Send one PDU and block until the matching response frame arrives.
    ///
    /// Assigns a fresh transaction id, returns it together with the raw
    /// response frame (MBAP header + PDU). On I/O failure the link is
    /// marked dead and reconnected transparently, up to the configured
    /// attempt bound.
    fn send_and_receive(&self, pdu: &[u8]) -> DriveResult<(u16, Vec<u8>)>;

    /// Close the link and stop background supervision.
    fn close(&self);

    /// Whether the link is currently established.
    fn is_connected(&self) -> bool;
}

/// The mutable link state shared between callers and the heartbeat thread.
struct Link {
    stream: Option<TcpStream>,
    transaction_id: u16,
}

impl Link {
    /// Next transaction id; wraps on overflow.
    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.transaction_id
    }
}

struct HeartbeatHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Blocking Modbus TCP transport over `std::net::TcpStream`.
pub struct ModbusTcpTransport {
    config: TransportConfig,
    link: Arc<Mutex<Link>>,
    heartbeat: Mutex<Option<HeartbeatHandle>>,
}

impl ModbusTcpTransport {
    /// Create an unconnected transport. Call [`Transport::connect`] before
    /// exchanging traffic (or let the first call reconnect on demand).
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            link: Arc::new(Mutex::new(Link {
                stream: None,
                transaction_id: 0,
            })),
            heartbeat: Mutex::new(None),
        }
    }

    /// The transport's configuration.
    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn lock_link(&self) -> DriveResult<MutexGuard<'_, Link>> {
        self.link
            .lock()
            .map_err(|_| DriveError::Transport("link mutex poisoned".into()))
    }

    fn open_stream(config: &TransportConfig) -> DriveResult<TcpStream> {
        let addr = config.addr();
        let connection_err = |reason: String| DriveError::Connection {
            addr: addr.clone(),
            reason,
        };

        let sock_addr = addr
            .to_socket_addrs()
            .map_err(|e| connection_err(format!("address resolution failed: {e}")))?
            .next()
            .ok_or_else(|| connection_err("no usable address".into()))?;

        let stream = TcpStream::connect_timeout(&sock_addr, config.connect_timeout)
            .map_err(|e| connection_err(e.to_string()))?;
        stream
            .set_read_timeout(Some(config.io_timeout))
            .map_err(|e| connection_err(format!("failed to set read timeout: {e}")))?;
        stream
            .set_write_timeout(Some(config.io_timeout))
            .map_err(|e| connection_err(format!("failed to set write timeout: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| connection_err(format!("failed to set TCP_NODELAY: {e}")))?;
        Ok(stream)
    }

    fn classify_read_error(err: &std::io::Error) -> DriveError {
        match err.kind() {
            // A quiet link is not a dead link: let the SDO layer decide
            // whether to retry with a fresh transaction id.
            ErrorKind::WouldBlock | ErrorKind::TimedOut => DriveError::SdoTimeout {
                object: "response frame".into(),
                attempts: 1,
            },
            ErrorKind::UnexpectedEof => {
                DriveError::Transport("connection closed by peer".into())
            }
            _ => DriveError::Transport(format!("receive failed: {err}")),
        }
    }

    /// One framed exchange on an established stream: write the request,
    /// then read complete frames until one matches `tid` or the deadline
    /// passes. Non-matching frames are drained and dropped.
    fn exchange(
        stream: &mut TcpStream,
        tid: u16,
        frame_bytes: &[u8],
        io_timeout: Duration,
    ) -> DriveResult<Vec<u8>> {
        stream
            .write_all(frame_bytes)
            .map_err(|e| DriveError::Transport(format!("send failed: {e}")))?;

        let deadline = Instant::now() + io_timeout;
        loop {
            let mut header = [0u8; MbapHeader::SIZE];
            stream
                .read_exact(&mut header)
                .map_err(|e| Self::classify_read_error(&e))?;
            let parsed = MbapHeader::from_bytes(&header)?;
            if parsed.protocol_id != frame::PROTOCOL_ID {
                return Err(DriveError::Frame(format!(
                    "unexpected protocol id {}",
                    parsed.protocol_id
                )));
            }
            let declared = parsed.length as usize;
            if declared == 0 || MbapHeader::SIZE + declared - 1 > frame::MAX_FRAME_LEN {
                return Err(DriveError::Frame(format!(
                    "unreasonable length field {declared}"
                )));
            }

            let mut body = vec![0u8; declared - 1];
            stream
                .read_exact(&mut body)
                .map_err(|e| Self::classify_read_error(&e))?;

            if parsed.transaction_id != tid {
                trace!(
                    expected = tid,
                    received = parsed.transaction_id,
                    "discarding stale response frame"
                );
                if Instant::now() >= deadline {
                    return Err(DriveError::SdoTimeout {
                        object: "response frame".into(),
                        attempts: 1,
                    });
                }
                continue;
            }

            let mut full = Vec::with_capacity(MbapHeader::SIZE + body.len());
            full.extend_from_slice(&header);
            full.extend_from_slice(&body);
            return Ok(full);
        }
    }

    fn exchange_with_reconnect(&self, link: &mut Link, pdu: &[u8]) -> DriveResult<(u16, Vec<u8>)> {
        let max = self.config.reconnect.max_attempts;
        let mut last_failure: Option<DriveError> = None;

        for attempt in 0..=max {
            if attempt > 0 {
                warn!(attempt, max, addr = %self.config.addr(), "reconnecting to drive");
                thread::sleep(self.config.reconnect.delay);
            }

            if link.stream.is_none() {
                match Self::open_stream(&self.config) {
                    Ok(stream) => {
                        info!(addr = %self.config.addr(), "link established");
                        link.stream = Some(stream);
                    }
                    Err(err) => {
                        last_failure = Some(err);
                        continue;
                    }
                }
            }

            let tid = link.next_transaction_id();
            let frame_bytes = frame::encode_frame(tid, self.config.unit_id, pdu);
            let Some(stream) = link.stream.as_mut() else {
                continue;
            };

            trace!(tid, len = frame_bytes.len(), "sending frame");
            match Self::exchange(stream, tid, &frame_bytes, self.config.io_timeout) {
                Ok(response) => {
                    trace!(tid, len = response.len(), "received frame");
                    return Ok((tid, response));
                }
                Err(err @ (DriveError::Transport(_) | DriveError::Connection { .. })) => {
                    warn!(error = %err, "transport error, marking link dead");
                    link.stream = None;
                    last_failure = Some(err);
                }
                // Timeouts and malformed frames do not invalidate the link;
                // they belong to the layers above.
                Err(other) => return Err(other),
            }
        }

        Err(DriveError::Transport(format!(
            "giving up after {max} reconnect attempt(s): {}",
            last_failure.map_or_else(|| "no attempt made".to_string(), |e| e.to_string())
        )))
    }

    fn start_heartbeat(&self) {
        if !self.config.heartbeat.enabled || self.config.heartbeat.interval.is_zero() {
            return;
        }
        let Ok(mut slot) = self.heartbeat.lock() else {
            return;
        };
        if slot.is_some() {
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let link = Arc::clone(&self.link);
        let config = self.config.clone();
        let stop_for_thread = Arc::clone(&stop);
        let spawned = thread::Builder::new()
            .name("dryve-heartbeat".into())
            .spawn(move || heartbeat_loop(&link, &config, &stop_for_thread));
        match spawned {
            Ok(handle) => {
                debug!(interval = ?self.config.heartbeat.interval, "heartbeat started");
                *slot = Some(HeartbeatHandle {
                    stop,
                    thread: handle,
                });
            }
            Err(err) => warn!(error = %err, "failed to spawn heartbeat thread"),
        }
    }

    fn stop_heartbeat(&self) {
        let handle = match self.heartbeat.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            handle.stop.store(true, Ordering::Relaxed);
            let _ = handle.thread.join();
            debug!("heartbeat stopped");
        }
    }
}

impl Transport for ModbusTcpTransport {
    fn connect(&self) -> DriveResult<()> {
        {
            let mut link = self.lock_link()?;
            let stream = Self::open_stream(&self.config)?;
            link.stream = Some(stream);
            link.transaction_id = 0;
        }
        self.start_heartbeat();
        info!(addr = %self.config.addr(), "connected to drive");
        Ok(())
    }

    fn send_and_receive(&self, pdu: &[u8]) -> DriveResult<(u16, Vec<u8>)> {
        let mut link = self.lock_link()?;
        self.exchange_with_reconnect(&mut link, pdu)
    }

    fn close(&self) {
        self.stop_heartbeat();
        if let Ok(mut link) = self.link.lock() {
            if let Some(stream) = link.stream.take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
        debug!(addr = %self.config.addr(), "transport closed");
    }

    fn is_connected(&self) -> bool {
        self.link
            .lock()
            .map(|link| link.stream.is_some())
            .unwrap_or(false)
    }
}

impl Drop for ModbusTcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sleep `interval` in small slices, returning true once `stop` is set.
fn wait_with_stop(stop: &AtomicBool, interval: Duration) -> bool {
    let slice = Duration::from_millis(20).min(interval);
    let deadline = Instant::now() + interval;
    while Instant::now() < deadline {
        if stop.load(Ordering::Relaxed) {
            return true;
        }
        thread::sleep(slice);
    }
    stop.load(Ordering::Relaxed)
}

/// Background liveness supervision: a statusword read on a fixed interval.
///
/// Shares the link mutex with application traffic, so probe and request
/// bytes never interleave. After `max_misses` consecutive failures the
/// link is torn down; while the link is down the probe doubles as the
/// background reconnector.
fn heartbeat_loop(link: &Arc<Mutex<Link>>, config: &TransportConfig, stop: &AtomicBool) {
    let probe = frame::sdo_read_request(&od::STATUSWORD);
    let mut misses = 0u32;

    while !wait_with_stop(stop, config.heartbeat.interval) {
        let Ok(mut guard) = link.lock() else {
            break;
        };

        if guard.stream.is_none() {
            match ModbusTcpTransport::open_stream(config) {
                Ok(stream) => {
                    info!(addr = %config.addr(), "heartbeat re-established link");
                    guard.stream = Some(stream);
                    misses = 0;
                }
                Err(err) => debug!(error = %err, "heartbeat reconnect failed"),
            }
            continue;
        }

        let tid = guard.next_transaction_id();
        let frame_bytes = frame::encode_frame(tid, config.unit_id, &probe);
        let Some(stream) = guard.stream.as_mut() else {
            continue;
        };
        match ModbusTcpTransport::exchange(stream, tid, &frame_bytes, config.io_timeout) {
            Ok(_) => {
                misses = 0;
                trace!(tid, "heartbeat ok");
            }
            Err(err) => {
                misses += 1;
                warn!(
                    misses,
                    max = config.heartbeat.max_misses,
                    error = %err,
                    "heartbeat probe failed"
                );
                if misses >= config.heartbeat.max_misses {
                    info!("tearing down link after repeated heartbeat failures");
                    guard.stream = None;
                    misses = 0;
                }
            }
        }
    }
}
