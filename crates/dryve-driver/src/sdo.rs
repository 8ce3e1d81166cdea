//! Object dictionary access over the transport.
//!
//! One request in flight at a time; each call encodes the request, sends
//! it, and verifies that the decoded response matches the request by
//! transaction id, object identity, and direction before a value is
//! returned. Only timeout-class failures are retried, each attempt with a
//! fresh transaction id so a stale in-flight response can never be
//! mistaken for the retry's answer.

use dryve_common::{DriveError, DriveResult, SdoConfig};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::frame::{self, SdoPayload, SdoResponse};
use crate::od::{self, ObjectEntry};
use crate::transport::Transport;

/// SDO client: typed reads and writes of object dictionary entries.
pub struct SdoClient<T: Transport> {
    transport: T,
    retries: u32,
    retry_delay: Duration,
}

impl<T: Transport> SdoClient<T> {
    /// Create a client with the default retry policy.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, &SdoConfig::default())
    }

    /// Create a client with an explicit retry policy.
    pub fn with_config(transport: T, config: &SdoConfig) -> Self {
        Self {
            transport,
            retries: config.retries,
            retry_delay: config.retry_delay,
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Read the current value of `entry`.
    pub fn read(&self, entry: &ObjectEntry) -> DriveResult<i64> {
        if !entry.access.readable() {
            return Err(DriveError::Protocol(format!("{entry} is not readable")));
        }
        let pdu = frame::sdo_read_request(entry);
        let response = self.request(entry, &pdu, false)?;
        let value = od::decode_value(entry, &response.data)?;
        trace!(object = %entry, value, "read");
        Ok(value)
    }

    /// Write `value` to `entry`, returning once the drive acknowledges.
    pub fn write(&self, entry: &ObjectEntry, value: i64) -> DriveResult<()> {
        if !entry.access.writable() {
            return Err(DriveError::Protocol(format!("{entry} is not writable")));
        }
        let data = od::encode_value(entry, value)?;
        let pdu = frame::sdo_write_request(entry, &data);
        self.request(entry, &pdu, true)?;
        trace!(object = %entry, value, "write acknowledged");
        Ok(())
    }

    /// Issue one request with the bounded retry loop around it. The same
    /// object is retried, never a different one; the transport assigns a
    /// fresh transaction id on every attempt.
    fn request(&self, entry: &ObjectEntry, pdu: &[u8], is_write: bool) -> DriveResult<SdoResponse> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.attempt(entry, pdu, is_write) {
                Ok(response) => return Ok(response),
                Err(err) if err.is_timeout() => {
                    if attempts > self.retries {
                        warn!(object = %entry, attempts, "request timed out, retry budget spent");
                        return Err(DriveError::SdoTimeout {
                            object: entry.to_string(),
                            attempts,
                        });
                    }
                    debug!(object = %entry, attempt = attempts, "request timed out, retrying");
                    thread::sleep(self.retry_delay);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn attempt(&self, entry: &ObjectEntry, pdu: &[u8], is_write: bool) -> DriveResult<SdoResponse> {
        let (tid, raw) = self.transport.send_and_receive(pdu)?;
        let decoded = frame::decode_frame(&raw)?;
        if decoded.transaction_id != tid {
            return Err(DriveError::Protocol(format!(
                "transaction id mismatch for {entry}: sent {tid}, received {}",
                decoded.transaction_id
            )));
        }

        let response = match frame::decode_sdo_response(&decoded.pdu)? {
            SdoPayload::Abort(code) => {
                return Err(DriveError::SdoAbort {
                    object: entry.to_string(),
                    code,
                })
            }
            SdoPayload::Response(response) => response,
        };

        if response.index != entry.index || response.subindex != entry.subindex {
            return Err(DriveError::Protocol(format!(
                "object mismatch: requested {entry}, response addresses 0x{:04X}:{:02X}",
                response.index, response.subindex
            )));
        }
        if response.is_write != is_write {
            return Err(DriveError::Protocol(format!(
                "direction mismatch for {entry}: response flags a {}",
                if response.is_write { "write" } else { "read" }
            )));
        }
        Ok(response)
    }
}
