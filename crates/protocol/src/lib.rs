//! Wire types for the usbmuxd and lockdown protocols.
//!
//! This crate is pure data: it builds and parses frames but performs no I/O.
//!
//! - [`value`] - the [`PropertyValue`] tree every query result is decoded into
//! - [`muxer`] - usbmuxd header, requests and replies
//! - [`lockdown`] - lockdown requests, replies and pair records

pub mod error;
pub mod lockdown;
pub mod muxer;
pub mod value;

pub use error::{Error, Result};
pub use lockdown::{LockdownRequest, LockdownResponse, PairRecord};
pub use muxer::{ClientInfo, DeviceRecord, MuxHeader, MuxRequest, MuxResult};
pub use value::{Integer, PropertyValue};
