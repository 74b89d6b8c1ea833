//! Framed byte streams to the multiplexer and to lockdown.
//!
//! Two framings share one underlying stream type:
//!
//! - [`MuxerConnection`]: 16-byte little-endian header + plist, used to talk
//!   to the daemon itself
//! - [`LockdownTransport`]: 4-byte big-endian length + plist, used once the
//!   daemon has tunnelled the socket to the device's lockdown port
//!
//! Streams are boxed so a plain socket, a tunnelled socket and a TLS session
//! look the same to the layers above.


use imd_protocol::lockdown::{self, LENGTH_PREFIX_LEN};
use imd_protocol::muxer::{self, HEADER_LEN};
use imd_protocol::{ClientInfo, LockdownRequest, LockdownResponse, MuxHeader, MuxRequest};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::config::MuxerAddress;
use crate::error::{Error, Result};

/// Any bidirectional byte stream a device connection can run over.
pub trait DeviceStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> DeviceStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Owned, type-erased device stream.
pub type BoxedStream = Box<dyn DeviceStream>;

/// Opens a raw socket to the multiplexer daemon.
pub async fn connect_muxer(address: &MuxerAddress) -> Result<BoxedStream> {
	let unavailable = |source: std::io::Error| Error::TransportUnavailable {
		address: address.to_string(),
		source,
	};

	match address {
		#[cfg(unix)]
		MuxerAddress::Unix(path) => {
			let stream = tokio::net::UnixStream::connect(path)
				.await
				.map_err(unavailable)?;
			Ok(Box::new(stream))
		}
		#[cfg(not(unix))]
		MuxerAddress::Unix(_) => Err(unavailable(std::io::Error::new(
			std::io::ErrorKind::Unsupported,
			"unix sockets are not available on this platform",
		))),
		MuxerAddress::Tcp(addr) => {
			let stream = tokio::net::TcpStream::connect(addr.as_str())
				.await
				.map_err(unavailable)?;
			stream.set_nodelay(true).map_err(unavailable)?;
			Ok(Box::new(stream))
		}
	}
}

/// Request/reply channel to the multiplexer daemon.
pub struct MuxerConnection {
	stream: BoxedStream,
	client: ClientInfo,
	next_tag: u32,
}

impl MuxerConnection {
	pub fn new(stream: BoxedStream, client: ClientInfo) -> Self {
		Self {
			stream,
			client,
			next_tag: 1,
		}
	}

	/// Connects to the daemon at `address`.
	pub async fn open(address: &MuxerAddress, client: ClientInfo) -> Result<Self> {
		let stream = connect_muxer(address).await?;
		debug!(%address, "connected to device multiplexer");
		Ok(Self::new(stream, client))
	}

	pub fn client(&self) -> &ClientInfo {
		&self.client
	}

	/// Sends `request` and returns the raw reply payload.
	pub async fn request_raw(&mut self, request: &MuxRequest) -> Result<Vec<u8>> {
		let tag = self.next_tag;
		self.next_tag = self.next_tag.wrapping_add(1);

		let frame = request.to_frame(tag)?;
		trace!(tag, message = request.message_type, len = frame.len(), "muxer request");
		self.stream.write_all(&frame).await?;
		self.stream.flush().await?;

		let mut header_buf = [0u8; HEADER_LEN];
		self.stream.read_exact(&mut header_buf).await?;
		let header = MuxHeader::decode(&header_buf)?;
		if header.tag != tag {
			return Err(imd_protocol::Error::UnexpectedMessage {
				expected: "reply with matching tag",
				actual: format!("tag {}", header.tag),
			}
			.into());
		}

		let mut payload = vec![0u8; header.payload_len()];
		self.stream.read_exact(&mut payload).await?;
		trace!(tag, len = payload.len(), "muxer reply");
		Ok(payload)
	}

	/// Sends `request` and decodes the reply as `T`.
	pub async fn request<T: DeserializeOwned>(&mut self, request: &MuxRequest) -> Result<T> {
		let payload = self.request_raw(request).await?;
		Ok(muxer::decode_reply(&payload)?)
	}

	/// Gives up the connection, typically after a successful `Connect`.
	pub fn into_stream(self) -> BoxedStream {
		self.stream
	}
}

/// Length-prefixed plist channel to the lockdown service.
pub struct LockdownTransport {
	stream: BoxedStream,
}

impl LockdownTransport {
	pub fn new(stream: BoxedStream) -> Self {
		Self { stream }
	}

	pub async fn send(&mut self, request: &LockdownRequest<'_>) -> Result<()> {
		let frame = request.to_frame()?;
		trace!(request = request.request, len = frame.len(), "lockdown request");
		self.stream.write_all(&frame).await?;
		self.stream.flush().await?;
		Ok(())
	}

	pub async fn recv(&mut self) -> Result<LockdownResponse> {
		let mut prefix = [0u8; LENGTH_PREFIX_LEN];
		self.stream.read_exact(&mut prefix).await?;
		let len = lockdown::decode_length(prefix)?;

		let mut payload = vec![0u8; len];
		self.stream.read_exact(&mut payload).await?;
		trace!(len, "lockdown reply");
		Ok(LockdownResponse::from_payload(&payload)?)
	}

	/// Sends `request` and waits for the reply echoing its name.
	///
	/// Replies carrying an `Error` are returned as-is for the caller to
	/// classify.
	pub async fn exchange(&mut self, request: &LockdownRequest<'_>) -> Result<LockdownResponse> {
		self.send(request).await?;
		let response = self.recv().await?;
		if response.request.is_some() {
			response.expect_request(request.request)?;
		}
		Ok(response)
	}

	/// Flushes and shuts down the write half.
	pub async fn shutdown(&mut self) -> Result<()> {
		self.stream.shutdown().await?;
		Ok(())
	}

	/// Returns the underlying stream, e.g. to wrap it in TLS.
	pub fn into_inner(self) -> BoxedStream {
		self.stream
	}
}
