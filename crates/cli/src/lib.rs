//! `idevice_id`: list attached devices or print a device's name.

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod output;
