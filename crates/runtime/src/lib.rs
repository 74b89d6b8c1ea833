//! imd runtime - device discovery and framed device streams
//!
//! This crate provides the low-level plumbing for talking to devices through
//! the usbmuxd daemon:
//!
//! - **Configuration**: daemon address, client label, pair-record location
//! - **Transport**: header-framed daemon requests and length-framed lockdown
//!   streams over Unix sockets, TCP or TLS
//! - **Registry**: device enumeration, tunnelling and pair-record lookup
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │   imd-rs    │  Sessions, queries, formatting
//! └──────┬──────┘
//!        │
//! ┌──────▼──────┐
//! │ imd-runtime │  This crate
//! │  ┌────────┐ │
//! │  │Registry│ │  ListDevices / Connect / ReadPairRecord
//! │  └────────┘ │
//! │  ┌────────┐ │
//! │  │ Trans  │ │  Muxer + lockdown framing
//! │  └────────┘ │
//! └─────────────┘
//! ```

pub mod config;
pub mod error;
pub mod registry;
#[cfg(unix)]
pub mod testing;
pub mod transport;

pub use config::{Config, MuxerAddress};
pub use error::{Error, Result};
pub use registry::{DeviceIdentifier, DeviceList, DeviceRegistry, RegistryEntry, TransportKind, TransportSet};
pub use transport::{BoxedStream, DeviceStream, LockdownTransport, MuxerConnection};
