//! Modbus TCP driver stack for CiA‑402 linear drives.
//!
//! The stack is layered bottom-up:
//! - [`transport`] owns the TCP link: connect/reconnect, framed exchange,
//!   heartbeat supervision.
//! - [`frame`] encodes/decodes Modbus TCP frames and the SDO envelope
//!   (pure, stateless).
//! - [`od`] describes the drive's object dictionary and the value codec.
//! - [`sdo`] expresses object reads/writes on top of the transport, with
//!   request/response correlation and bounded retries.
//! - [`cia402`] models the drive power state machine (pure).
//! - [`controller`] sequences SDO calls and state transitions into motion
//!   primitives: enable, home, move-to-position, stop, status.
//!
//! The stack assumes a single caller at a time; multi-threaded access must
//! be serialized externally.

pub mod cia402;
pub mod controller;
pub mod frame;
pub mod od;
pub mod sdo;
pub mod transport;

pub use cia402::{decode_status, Controlword, DriveState, OperationMode, Statusword};
pub use controller::{DriveController, DriveStatus, MotionProfile};
pub use sdo::SdoClient;
pub use transport::{ModbusTcpTransport, Transport};
