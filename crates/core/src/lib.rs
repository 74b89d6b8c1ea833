//! imd: device property queries over lockdown
//!
//! This crate is the public API for finding attached devices, opening
//! lockdown sessions on them and reading their properties.
//!
//! # Examples
//!
//! ## Print every USB device's name
//!
//! ```ignore
//! use imd::{Config, DeviceRegistry, HandshakeMode, QueryService, Session, TransportSet};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> imd::Result<()> {
//!     let registry = DeviceRegistry::new(Config::default());
//!     let queries = QueryService::standard();
//!
//!     for entry in registry.enumerate().await? {
//!         let mut session = Session::open(
//!             &registry,
//!             &entry.identifier,
//!             TransportSet::USB,
//!             HandshakeMode::Verified,
//!             None,
//!         )
//!         .await?;
//!         println!("{}: {}", entry.identifier, queries.device_name(&mut session, None).await?);
//!         session.close().await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Dump a domain as XML
//!
//! ```ignore
//! use imd::{OutputStyle, QueryScope, format};
//!
//! let scope = QueryScope::new(Some("com.apple.mobile.battery"), None)?;
//! if let Some(value) = queries.query(&mut session, &scope, None).await? {
//!     std::io::stdout().write_all(&format(&value, OutputStyle::StructuredMarkup)?)?;
//! }
//! ```

pub mod domains;
pub mod format;
pub mod query;
pub mod session;

pub use domains::{KnownDomainSet, STANDARD_DOMAINS};
pub use format::{OutputStyle, decode_markup, format, format_text};
pub use imd_protocol::{Integer, PropertyValue};
pub use imd_runtime::{
	Config, DeviceIdentifier, DeviceList, DeviceRegistry, Error, MuxerAddress, RegistryEntry, Result,
	TransportKind, TransportSet,
};
pub use query::{DEVICE_NAME_KEY, QueryScope, QueryService};
pub use session::{HandshakeMode, Session, SessionState};
